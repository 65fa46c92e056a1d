use nom::{number::Endianness, IResult};
use num_derive::FromPrimitive;
use strum_macros::Display;

#[repr(u32)]
#[derive(Debug, Copy, Clone, FromPrimitive)]
pub enum CpuABI {
    ABI64 = 0x01000000,
    ABI64_32 = 0x02000000,
}

#[repr(u32)]
#[derive(Debug, Copy, Clone, FromPrimitive, PartialEq, Eq, Display)]
pub enum CpuType {
    Any = 0,
    Vax = 1,
    Mc680x0 = 6,
    I386 = 7,
    X86_64 = 7 | CpuABI::ABI64 as u32,
    Mc98000 = 10,
    Hppa = 11,
    Arm = 12,
    Arm64 = 12 | CpuABI::ABI64 as u32,
    Arm64_32 = 12 | CpuABI::ABI64_32 as u32,
    Mc88000 = 13,
    Sparc = 14,
    I860 = 15,
    PowerPC = 18,
    PowerPC64 = 18 | CpuABI::ABI64 as u32,
    Unknown = !0,
}

impl CpuType {
    pub fn parse(bytes: &[u8], endian: Endianness) -> IResult<&[u8], CpuType> {
        let (bytes, cputype) = nom::number::complete::u32(endian)(bytes)?;
        Ok((bytes, Self::from_raw(cputype)))
    }

    pub fn from_raw(cputype: u32) -> CpuType {
        num::FromPrimitive::from_u32(cputype).unwrap_or(CpuType::Unknown)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive)]
pub enum CpuSubTypeX86 {
    All = 3,
    X86Arch1 = 4,
    X86_64H = 8,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive)]
pub enum CpuSubTypeArm {
    All = 0,
    V4T = 5,
    V6 = 6,
    V5TEJ = 7,
    XScale = 8,
    V7 = 9,
    V7F = 10,
    V7S = 11,
    V7K = 12,
    V8 = 13,
    V6M = 14,
    V7M = 15,
    V7EM = 16,
    V8M = 17,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive)]
pub enum CpuSubTypeArm64 {
    All = 0,
    V8 = 1,
    ARM64E = 2,
}

/// The cpu subtype with its capability bits masked off. Subtypes this crate
/// has no name for are kept raw.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CpuSubType {
    X86(CpuSubTypeX86),
    Arm(CpuSubTypeArm),
    Arm64(CpuSubTypeArm64),
    Other(u32),
}

impl CpuSubType {
    pub const CPU_SUBTYPE_MASK: u32 = 0xff000000;

    pub fn parse(bytes: &[u8], cpu: CpuType, endian: Endianness) -> IResult<&[u8], CpuSubType> {
        let (bytes, raw) = nom::number::complete::u32(endian)(bytes)?;
        Ok((bytes, Self::from_raw(cpu, raw)))
    }

    pub fn from_raw(cpu: CpuType, raw: u32) -> CpuSubType {
        let masked = raw & !Self::CPU_SUBTYPE_MASK;
        let known = match cpu {
            CpuType::X86_64 | CpuType::I386 => {
                num::FromPrimitive::from_u32(masked).map(CpuSubType::X86)
            }
            CpuType::Arm => num::FromPrimitive::from_u32(masked).map(CpuSubType::Arm),
            CpuType::Arm64 => num::FromPrimitive::from_u32(masked).map(CpuSubType::Arm64),
            _ => None,
        };
        known.unwrap_or(CpuSubType::Other(masked))
    }
}

/// One architecture slice: what the cpu is and how its memory reads.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Architecture {
    pub cputype: CpuType,
    pub cpusubtype: CpuSubType,
    /// Pointer width in bytes, 4 or 8.
    pub pointer_width: u8,
    pub endian: Endianness,
}

impl Architecture {
    pub fn new(cputype: CpuType, cpusubtype: CpuSubType, is_64: bool, endian: Endianness) -> Self {
        Architecture {
            cputype,
            cpusubtype,
            pointer_width: if is_64 { 8 } else { 4 },
            endian,
        }
    }

    pub fn is_64(&self) -> bool {
        self.pointer_width == 8
    }

    pub fn is_arm64e(&self) -> bool {
        self.cpusubtype == CpuSubType::Arm64(CpuSubTypeArm64::ARM64E)
    }

    pub fn name(&self) -> String {
        let name = match (self.cputype, self.cpusubtype) {
            (CpuType::I386, _) => "i386",
            (CpuType::X86_64, CpuSubType::X86(CpuSubTypeX86::X86_64H)) => "x86_64h",
            (CpuType::X86_64, _) => "x86_64",
            (CpuType::Arm, CpuSubType::Arm(CpuSubTypeArm::V6)) => "armv6",
            (CpuType::Arm, CpuSubType::Arm(CpuSubTypeArm::V7)) => "armv7",
            (CpuType::Arm, CpuSubType::Arm(CpuSubTypeArm::V7F)) => "armv7f",
            (CpuType::Arm, CpuSubType::Arm(CpuSubTypeArm::V7S)) => "armv7s",
            (CpuType::Arm, CpuSubType::Arm(CpuSubTypeArm::V7K)) => "armv7k",
            (CpuType::Arm, CpuSubType::Arm(CpuSubTypeArm::V8)) => "armv8",
            (CpuType::Arm, _) => "arm",
            (CpuType::Arm64, CpuSubType::Arm64(CpuSubTypeArm64::ARM64E)) => "arm64e",
            (CpuType::Arm64, _) => "arm64",
            (CpuType::Arm64_32, _) => "arm64_32",
            (CpuType::PowerPC, _) => "ppc",
            (CpuType::PowerPC64, _) => "ppc64",
            (other, _) => return other.to_string().to_lowercase(),
        };
        name.to_string()
    }
}
