use nom::{multi::count, number::complete::{be_u32, be_u64}, IResult};
use nom_derive::{Nom, Parse};

use crate::{
    machine::{CpuSubType, CpuType},
    macho::{MachOErr, MachOResult},
    source::ByteSource,
};

/// Fat headers are always big-endian.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Nom)]
pub enum FatMagic {
    Fat = 0xcafebabe,
    Fat64 = 0xcafebabf,
}

#[derive(Debug, Clone, Copy)]
pub struct FatHeader {
    pub magic: FatMagic,
    pub nfat_arch: u32,
}

impl FatHeader {
    pub const SIZE: u64 = 8;

    pub fn parse(input: &[u8]) -> IResult<&[u8], FatHeader> {
        let (input, magic) = FatMagic::parse_be(input)?;
        let (input, nfat_arch) = be_u32(input)?;

        Ok((input, FatHeader { magic, nfat_arch }))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FatArch32 {
    pub cputype: CpuType,
    pub cpusubtype: CpuSubType,
    pub offset: u32,
    pub size: u32,
    pub align: u32,
}

impl FatArch32 {
    pub const SIZE: u64 = 20;

    pub fn parse(input: &[u8]) -> IResult<&[u8], FatArch32> {
        let (input, cputype) = be_u32(input)?;
        let cputype = CpuType::from_raw(cputype);
        let (input, cpusubtype) = be_u32(input)?;
        let (input, offset) = be_u32(input)?;
        let (input, size) = be_u32(input)?;
        let (input, align) = be_u32(input)?;

        Ok((
            input,
            FatArch32 {
                cputype,
                cpusubtype: CpuSubType::from_raw(cputype, cpusubtype),
                offset,
                size,
                align,
            },
        ))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FatArch64 {
    pub cputype: CpuType,
    pub cpusubtype: CpuSubType,
    pub offset: u64,
    pub size: u64,
    pub align: u32,
    pub reserved: u32,
}

impl FatArch64 {
    pub const SIZE: u64 = 32;

    pub fn parse(input: &[u8]) -> IResult<&[u8], FatArch64> {
        let (input, cputype) = be_u32(input)?;
        let cputype = CpuType::from_raw(cputype);
        let (input, cpusubtype) = be_u32(input)?;
        let (input, offset) = be_u64(input)?;
        let (input, size) = be_u64(input)?;
        let (input, align) = be_u32(input)?;
        let (input, reserved) = be_u32(input)?;

        Ok((
            input,
            FatArch64 {
                cputype,
                cpusubtype: CpuSubType::from_raw(cputype, cpusubtype),
                offset,
                size,
                align,
                reserved,
            },
        ))
    }
}

#[derive(Debug, Clone, Copy)]
pub enum FatArch {
    Arch32(FatArch32),
    Arch64(FatArch64),
}

impl FatArch {
    pub fn parse(input: &[u8], magic: FatMagic) -> IResult<&[u8], FatArch> {
        match magic {
            FatMagic::Fat => {
                let (input, arch) = FatArch32::parse(input)?;
                Ok((input, FatArch::Arch32(arch)))
            }
            FatMagic::Fat64 => {
                let (input, arch) = FatArch64::parse(input)?;
                Ok((input, FatArch::Arch64(arch)))
            }
        }
    }

    pub fn cputype(&self) -> CpuType {
        match self {
            FatArch::Arch32(arch) => arch.cputype,
            FatArch::Arch64(arch) => arch.cputype,
        }
    }

    pub fn cpusubtype(&self) -> CpuSubType {
        match self {
            FatArch::Arch32(arch) => arch.cpusubtype,
            FatArch::Arch64(arch) => arch.cpusubtype,
        }
    }

    pub fn offset(&self) -> u64 {
        match self {
            FatArch::Arch32(arch) => arch.offset as u64,
            FatArch::Arch64(arch) => arch.offset,
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            FatArch::Arch32(arch) => arch.size as u64,
            FatArch::Arch64(arch) => arch.size,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FatMachO {
    pub header: FatHeader,
    pub archs: Vec<FatArch>,
}

impl FatMachO {
    pub fn is_fat(bytes: &[u8]) -> bool {
        FatMagic::parse_be(bytes).is_ok()
    }

    pub fn parse(bytes: &[u8]) -> MachOResult<FatMachO> {
        let (rest, header) = FatHeader::parse(bytes)
            .map_err(|_| MachOErr::MalformedHeader("truncated fat header".to_string()))?;

        let entry_size = match header.magic {
            FatMagic::Fat => FatArch32::SIZE,
            FatMagic::Fat64 => FatArch64::SIZE,
        };
        let table_end = FatHeader::SIZE + entry_size * header.nfat_arch as u64;
        if table_end > bytes.len() as u64 {
            return Err(MachOErr::MalformedHeader(format!(
                "fat arch table of {} entries exceeds the file",
                header.nfat_arch
            )));
        }

        let (_, archs) = count(
            |input| FatArch::parse(input, header.magic),
            header.nfat_arch as usize,
        )(rest)
        .map_err(|_| MachOErr::MalformedHeader("truncated fat arch table".to_string()))?;

        Ok(FatMachO { header, archs })
    }

    /// The bytes of one slice. A slice extending past the file is malformed.
    pub fn slice<'a>(bytes: &'a [u8], arch: &FatArch) -> MachOResult<&'a [u8]> {
        ByteSource::new(bytes, nom::number::Endianness::Big)
            .slice(arch.offset(), arch.size())
            .map_err(|_| {
                MachOErr::MalformedHeader(format!(
                    "fat slice at {:#x} with size {:#x} exceeds the file",
                    arch.offset(),
                    arch.size()
                ))
            })
    }
}
