use nom::{number::Endianness, sequence::tuple, IResult};
use nom_derive::{Nom, Parse};
use num_derive::FromPrimitive;

use crate::{
    machine::{Architecture, CpuSubType, CpuType},
    macho::{MachOErr, MachOResult},
};

/// The magic as it appears when the first four bytes are read big-endian.
/// The byte swapped forms identify little-endian images.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Nom)]
pub enum MHMagic {
    MhMagic = 0xfeedface,
    MhMagic64 = 0xfeedfacf,
    MhCigam = 0xcefaedfe,
    MhCigam64 = 0xcffaedfe,
}

impl MHMagic {
    pub fn is_64(&self) -> bool {
        matches!(self, MHMagic::MhMagic64 | MHMagic::MhCigam64)
    }

    pub fn endian(&self) -> Endianness {
        match self {
            MHMagic::MhMagic | MHMagic::MhMagic64 => Endianness::Big,
            MHMagic::MhCigam | MHMagic::MhCigam64 => Endianness::Little,
        }
    }
}

bitflags::bitflags! {
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MHFlags: u32 {
        const MH_NOUNDEFS = 0x1;
        const MH_INCRLINK = 0x2;
        const MH_DYLDLINK = 0x4;
        const MH_BINDATLOAD = 0x8;
        const MH_PREBOUND = 0x10;
        const MH_SPLIT_SEGS = 0x20;
        const MH_TWOLEVEL = 0x80;
        const MH_WEAK_DEFINES = 0x8000;
        const MH_BINDS_TO_WEAK = 0x10000;
        const MH_PIE = 0x200000;
        const MH_HAS_TLV_DESCRIPTORS = 0x800000;
        const MH_APP_EXTENSION_SAFE = 0x02000000;
        const MH_SIM_SUPPORT = 0x08000000;
        const MH_DYLIB_IN_CACHE = 0x80000000;
    }
}

impl MHFlags {
    pub fn parse(bytes: &[u8], endian: Endianness) -> IResult<&[u8], MHFlags> {
        let (bytes, flags) = nom::number::complete::u32(endian)(bytes)?;
        Ok((bytes, MHFlags::from_bits_truncate(flags)))
    }
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum MHFileType {
    MhObject = 0x1,
    MhExecute = 0x2,
    MhFvmlib = 0x3,
    MhCore = 0x4,
    MhPreload = 0x5,
    MhDylib = 0x6,
    MhDylinker = 0x7,
    MhBundle = 0x8,
    MhDylibStub = 0x9,
    MhDsym = 0xa,
    MhKextBundle = 0xb,
    MhFileset = 0xc,
    Unknown = !0,
}

impl MHFileType {
    pub fn parse(bytes: &[u8], endian: Endianness) -> IResult<&[u8], MHFileType> {
        let (bytes, filetype) = nom::number::complete::u32(endian)(bytes)?;
        Ok((
            bytes,
            num::FromPrimitive::from_u32(filetype).unwrap_or(MHFileType::Unknown),
        ))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MachHeader32 {
    pub magic: MHMagic,
    pub cputype: CpuType,
    pub cpusubtype: CpuSubType,
    pub filetype: MHFileType,
    pub ncmds: u32,
    pub sizeofcmds: u32,
    pub flags: MHFlags,
}

impl MachHeader32 {
    pub const SIZE: u8 = 28;

    pub fn parse(bytes: &[u8], magic: MHMagic) -> IResult<&[u8], MachHeader32> {
        let endian = magic.endian();
        let (bytes, _) = nom::bytes::complete::take(4usize)(bytes)?;
        let (bytes, cputype) = CpuType::parse(bytes, endian)?;
        let (bytes, (cpusubtype, filetype, ncmds, sizeofcmds, flags)) = tuple((
            |input| CpuSubType::parse(input, cputype, endian),
            |input| MHFileType::parse(input, endian),
            nom::number::complete::u32(endian),
            nom::number::complete::u32(endian),
            |input| MHFlags::parse(input, endian),
        ))(bytes)?;

        Ok((
            bytes,
            MachHeader32 {
                magic,
                cputype,
                cpusubtype,
                filetype,
                ncmds,
                sizeofcmds,
                flags,
            },
        ))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MachHeader64 {
    pub magic: MHMagic,
    pub cputype: CpuType,
    pub cpusubtype: CpuSubType,
    pub filetype: MHFileType,
    pub ncmds: u32,
    pub sizeofcmds: u32,
    pub flags: MHFlags,
    pub reserved: u32,
}

impl MachHeader64 {
    pub const SIZE: u8 = 32;

    pub fn parse(bytes: &[u8], magic: MHMagic) -> IResult<&[u8], MachHeader64> {
        let endian = magic.endian();
        let (bytes, header) = MachHeader32::parse(bytes, magic)?;
        let (bytes, reserved) = nom::number::complete::u32(endian)(bytes)?;

        Ok((
            bytes,
            MachHeader64 {
                magic,
                cputype: header.cputype,
                cpusubtype: header.cpusubtype,
                filetype: header.filetype,
                ncmds: header.ncmds,
                sizeofcmds: header.sizeofcmds,
                flags: header.flags,
                reserved,
            },
        ))
    }
}

#[derive(Debug, Clone, Copy)]
pub enum MachHeader {
    Header32(MachHeader32),
    Header64(MachHeader64),
}

impl MachHeader {
    /// Peeks at the magic without consuming anything.
    pub fn sniff(bytes: &[u8]) -> Option<MHMagic> {
        MHMagic::parse_be(bytes).ok().map(|(_, magic)| magic)
    }

    pub fn parse(bytes: &[u8]) -> MachOResult<MachHeader> {
        let magic = Self::sniff(bytes)
            .ok_or_else(|| MachOErr::MalformedHeader("unrecognized magic".to_string()))?;

        let header = if magic.is_64() {
            MachHeader64::parse(bytes, magic).map(|(_, h)| MachHeader::Header64(h))
        } else {
            MachHeader32::parse(bytes, magic).map(|(_, h)| MachHeader::Header32(h))
        };
        header.map_err(|_| MachOErr::MalformedHeader("truncated mach header".to_string()))
    }

    pub fn magic(&self) -> MHMagic {
        match self {
            MachHeader::Header32(h) => h.magic,
            MachHeader::Header64(h) => h.magic,
        }
    }

    pub fn cputype(&self) -> CpuType {
        match self {
            MachHeader::Header32(h) => h.cputype,
            MachHeader::Header64(h) => h.cputype,
        }
    }

    pub fn cpusubtype(&self) -> CpuSubType {
        match self {
            MachHeader::Header32(h) => h.cpusubtype,
            MachHeader::Header64(h) => h.cpusubtype,
        }
    }

    pub fn filetype(&self) -> MHFileType {
        match self {
            MachHeader::Header32(h) => h.filetype,
            MachHeader::Header64(h) => h.filetype,
        }
    }

    pub fn ncmds(&self) -> u32 {
        match self {
            MachHeader::Header32(h) => h.ncmds,
            MachHeader::Header64(h) => h.ncmds,
        }
    }

    pub fn sizeofcmds(&self) -> u32 {
        match self {
            MachHeader::Header32(h) => h.sizeofcmds,
            MachHeader::Header64(h) => h.sizeofcmds,
        }
    }

    pub fn flags(&self) -> MHFlags {
        match self {
            MachHeader::Header32(h) => h.flags,
            MachHeader::Header64(h) => h.flags,
        }
    }

    pub fn size(&self) -> u8 {
        match self {
            MachHeader::Header32(_) => MachHeader32::SIZE,
            MachHeader::Header64(_) => MachHeader64::SIZE,
        }
    }

    pub fn architecture(&self) -> Architecture {
        let magic = self.magic();
        Architecture::new(self.cputype(), self.cpusubtype(), magic.is_64(), magic.endian())
    }
}
