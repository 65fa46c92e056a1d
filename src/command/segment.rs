use nom::{bytes::complete::take, multi::count, number::Endianness, IResult};
use num_derive::FromPrimitive;

use crate::helpers::fixed_name;

use super::{LCLoadCommand, LoadCommandBase};

bitflags::bitflags! {
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Protection: u32 {
        const NONE = 0x00;
        const READ = 0x01;
        const WRITE = 0x02;
        const EXECUTE = 0x04;
    }
}

bitflags::bitflags! {
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SGFlags: u32 {
        const HIGHVM = 0x1;
        const FVMLIB = 0x2;
        const NORELOC = 0x4;
        const PROTECTED_VERSION_1 = 0x8;
        const READ_ONLY = 0x10;
    }
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum SectionType {
    SRegular = 0x0,
    SZeroFill = 0x1,
    SCstringLiterals = 0x2,
    S4ByteLiterals = 0x3,
    S8ByteLiterals = 0x4,
    SLiteralPointers = 0x5,
    SNonLazySymbolPointers = 0x6,
    SLazySymbolPointers = 0x7,
    SSymbolStubs = 0x8,
    SModInitFuncPointers = 0x9,
    SModTermFuncPointers = 0xa,
    SCoalesced = 0xb,
    SGbZeroFill = 0xc,
    SInterposing = 0xd,
    S16ByteLiterals = 0xe,
    SDtraceDof = 0xf,
    SLazyDylibSymbolPointers = 0x10,
    SThreadLocalRegular = 0x11,
    SThreadLocalZeroFill = 0x12,
    SThreadLocalVariables = 0x13,
    SThreadLocalVariablePointers = 0x14,
    SThreadLocalInitFunctionPointers = 0x15,
    SInitFuncOffsets = 0x16,
}

impl SectionType {
    pub const SECTION_TYPE_MASK: u32 = 0x000000ff;

    /// Types outside the known range read as regular sections.
    pub fn from_flags(flags: u32) -> SectionType {
        num::FromPrimitive::from_u32(flags & Self::SECTION_TYPE_MASK)
            .unwrap_or(SectionType::SRegular)
    }

    pub fn is_zerofill(&self) -> bool {
        matches!(
            self,
            SectionType::SZeroFill | SectionType::SGbZeroFill | SectionType::SThreadLocalZeroFill
        )
    }
}

bitflags::bitflags! {
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectionAttributes: u32 {
        const PURE_INSTRUCTIONS = 0x80000000;
        const NO_TOC = 0x40000000;
        const STRIP_STATIC_SYMS = 0x20000000;
        const NO_DEAD_STRIP = 0x10000000;
        const LIVE_SUPPORT = 0x08000000;
        const SELF_MODIFYING_CODE = 0x04000000;
        const DEBUG = 0x02000000;
        const SOME_INSTRUCTIONS = 0x00000400;
        const EXT_RELOC = 0x00000200;
        const LOC_RELOC = 0x00000100;
    }
}

fn read_word(bytes: &[u8], endian: Endianness, is_64: bool) -> IResult<&[u8], u64> {
    if is_64 {
        nom::number::complete::u64(endian)(bytes)
    } else {
        let (bytes, value) = nom::number::complete::u32(endian)(bytes)?;
        Ok((bytes, value as u64))
    }
}

/// A section header. 32-bit sections are widened on parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub sectname: String,
    pub segname: String,
    pub addr: u64,
    pub size: u64,
    pub offset: u32,
    pub align: u32,
    pub reloff: u32,
    pub nreloc: u32,
    pub sectype: SectionType,
    pub attributes: SectionAttributes,
    pub reserved1: u32,
    pub reserved2: u32,
}

impl Section {
    pub const SIZE_32: u32 = 68;
    pub const SIZE_64: u32 = 80;

    pub fn parse(bytes: &[u8], endian: Endianness, is_64: bool) -> IResult<&[u8], Self> {
        let read_u32 = nom::number::complete::u32(endian);
        let (bytes, sectname) = fixed_name(bytes, 16)?;
        let (bytes, segname) = fixed_name(bytes, 16)?;
        let (bytes, addr) = read_word(bytes, endian, is_64)?;
        let (bytes, size) = read_word(bytes, endian, is_64)?;
        let (bytes, offset) = read_u32(bytes)?;
        let (bytes, align) = read_u32(bytes)?;
        let (bytes, reloff) = read_u32(bytes)?;
        let (bytes, nreloc) = read_u32(bytes)?;
        let (bytes, flags) = read_u32(bytes)?;
        let (bytes, reserved1) = read_u32(bytes)?;
        let (bytes, reserved2) = read_u32(bytes)?;
        let (bytes, _) = if is_64 { take(4usize)(bytes)? } else { (bytes, bytes) };

        Ok((
            bytes,
            Section {
                sectname,
                segname,
                addr,
                size,
                offset,
                align,
                reloff,
                nreloc,
                sectype: SectionType::from_flags(flags),
                attributes: SectionAttributes::from_bits_truncate(flags),
                reserved1,
                reserved2,
            },
        ))
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.addr && addr - self.addr < self.size
    }
}

/// `LC_SEGMENT` and `LC_SEGMENT_64`, widened to 64-bit fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentCommand {
    pub cmd: LCLoadCommand,
    pub cmdsize: u32,
    pub segname: String,
    pub vmaddr: u64,
    pub vmsize: u64,
    pub fileoff: u64,
    pub filesize: u64,
    pub maxprot: Protection,
    pub initprot: Protection,
    pub nsects: u32,
    pub flags: SGFlags,
    pub sections: Vec<Section>,
}

impl SegmentCommand {
    pub fn parse(ldcmd: &[u8], endian: Endianness, is_64: bool) -> IResult<&[u8], Self> {
        let read_u32 = nom::number::complete::u32(endian);

        let (cursor, base) = LoadCommandBase::parse(ldcmd, endian)?;
        let (cursor, segname) = fixed_name(cursor, 16)?;
        let (cursor, vmaddr) = read_word(cursor, endian, is_64)?;
        let (cursor, vmsize) = read_word(cursor, endian, is_64)?;
        let (cursor, fileoff) = read_word(cursor, endian, is_64)?;
        let (cursor, filesize) = read_word(cursor, endian, is_64)?;
        let (cursor, maxprot) = read_u32(cursor)?;
        let (cursor, initprot) = read_u32(cursor)?;
        let (cursor, nsects) = read_u32(cursor)?;
        let (cursor, flags) = read_u32(cursor)?;
        let (cursor, sections) = count(
            |input| Section::parse(input, endian, is_64),
            nsects as usize,
        )(cursor)?;

        Ok((
            cursor,
            SegmentCommand {
                cmd: base.cmd,
                cmdsize: base.cmdsize,
                segname,
                vmaddr,
                vmsize,
                fileoff,
                filesize,
                maxprot: Protection::from_bits_truncate(maxprot),
                initprot: Protection::from_bits_truncate(initprot),
                nsects,
                flags: SGFlags::from_bits_truncate(flags),
                sections,
            },
        ))
    }

    pub fn vm_end(&self) -> u64 {
        self.vmaddr.saturating_add(self.vmsize)
    }

    pub fn overlaps(&self, other: &SegmentCommand) -> bool {
        self.vmsize > 0
            && other.vmsize > 0
            && self.vmaddr < other.vm_end()
            && other.vmaddr < self.vm_end()
    }
}
