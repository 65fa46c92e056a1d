pub mod dyld_chained_fixup;
pub mod dyld_info;
pub mod dylib;
pub mod encryption_info;
pub mod linkedit_data;
pub mod segment;
pub mod uuid;

use nom::{number::Endianness, IResult};
use num_derive::FromPrimitive;
use tracing::trace;

use crate::{
    header::MachHeader,
    macho::{MachOErr, MachOResult},
    source::ByteSource,
};

pub use dyld_info::DyldInfoCommand;
pub use dylib::DylibCommand;
pub use encryption_info::EncryptionInfoCommand;
pub use linkedit_data::LinkeditDataCommand;
pub use segment::{Section, SegmentCommand};
pub use uuid::UuidCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadCommandBase {
    pub cmd: LCLoadCommand,
    /// The command word as read, kept for commands this crate has no name for.
    pub raw_cmd: u32,
    pub cmdsize: u32,
}

impl LoadCommandBase {
    pub const SIZE: u32 = 8;

    pub fn parse(bytes: &[u8], endian: Endianness) -> IResult<&[u8], LoadCommandBase> {
        let (bytes, raw_cmd) = nom::number::complete::u32(endian)(bytes)?;
        let (bytes, cmdsize) = nom::number::complete::u32(endian)(bytes)?;

        Ok((
            bytes,
            LoadCommandBase {
                cmd: num::FromPrimitive::from_u32(raw_cmd).unwrap_or(LCLoadCommand::Unknown),
                raw_cmd,
                cmdsize,
            },
        ))
    }
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum LCLoadCommand {
    LcSegment = 0x1,
    LcSymtab = 0x2,
    LcDysymtab = 0xb,
    LcLoadDylib = 0xc,
    LcIdDylib = 0xd,
    LcLoadWeakDylib = 0x18 | Self::LC_REQ_DYLD,
    LcSegment64 = 0x19,
    LcUuid = 0x1b,
    LcReexportDylib = 0x1f | Self::LC_REQ_DYLD,
    LcEncryptionInfo = 0x21,
    LcDyldInfo = 0x22,
    LcDyldInfoOnly = 0x22 | Self::LC_REQ_DYLD,
    LcEncryptionInfo64 = 0x2C,
    LcDyldChainedFixups = 0x34 | Self::LC_REQ_DYLD,
    Unknown = 0x7fffffff,
}

impl LCLoadCommand {
    pub const LC_REQ_DYLD: u32 = 0x80000000;
}

/// The load commands needed to map addresses and resolve pointers.
/// Everything else is kept only as its base.
#[derive(Debug, Clone)]
pub enum LoadCommand {
    Segment(SegmentCommand),
    Uuid(UuidCommand),
    EncryptionInfo(EncryptionInfoCommand),
    DyldInfo(DyldInfoCommand),
    DyldChainedFixups(LinkeditDataCommand),
    DylibId(DylibCommand),
    LoadDylib(DylibCommand),
    Other(LoadCommandBase),
}

impl LoadCommand {
    pub fn parse(ldcmd: &[u8], base: LoadCommandBase, endian: Endianness) -> IResult<&[u8], Self> {
        match base.cmd {
            LCLoadCommand::LcSegment | LCLoadCommand::LcSegment64 => {
                let is_64 = base.cmd == LCLoadCommand::LcSegment64;
                let (bytes, cmd) = SegmentCommand::parse(ldcmd, endian, is_64)?;
                Ok((bytes, LoadCommand::Segment(cmd)))
            }
            LCLoadCommand::LcUuid => {
                let (bytes, cmd) = UuidCommand::parse(ldcmd, endian)?;
                Ok((bytes, LoadCommand::Uuid(cmd)))
            }
            LCLoadCommand::LcEncryptionInfo | LCLoadCommand::LcEncryptionInfo64 => {
                let (bytes, cmd) = EncryptionInfoCommand::parse(ldcmd, endian)?;
                Ok((bytes, LoadCommand::EncryptionInfo(cmd)))
            }
            LCLoadCommand::LcDyldInfo | LCLoadCommand::LcDyldInfoOnly => {
                let (bytes, cmd) = DyldInfoCommand::parse(ldcmd, endian)?;
                Ok((bytes, LoadCommand::DyldInfo(cmd)))
            }
            LCLoadCommand::LcDyldChainedFixups => {
                let (bytes, cmd) = LinkeditDataCommand::parse(ldcmd, endian)?;
                Ok((bytes, LoadCommand::DyldChainedFixups(cmd)))
            }
            LCLoadCommand::LcIdDylib => {
                let (bytes, cmd) = DylibCommand::parse(ldcmd, endian)?;
                Ok((bytes, LoadCommand::DylibId(cmd)))
            }
            LCLoadCommand::LcLoadDylib
            | LCLoadCommand::LcLoadWeakDylib
            | LCLoadCommand::LcReexportDylib => {
                let (bytes, cmd) = DylibCommand::parse(ldcmd, endian)?;
                Ok((bytes, LoadCommand::LoadDylib(cmd)))
            }
            _ => Ok((&ldcmd[ldcmd.len()..], LoadCommand::Other(base))),
        }
    }

    /// Parses every load command following the header. Commands must lie
    /// within `sizeofcmds` and inside the image.
    pub fn parse_all(source: &ByteSource, header: &MachHeader) -> MachOResult<Vec<LoadCommand>> {
        let endian = source.endian();
        let area = source
            .slice(header.size() as u64, header.sizeofcmds() as u64)
            .map_err(|_| {
                MachOErr::MalformedHeader(format!(
                    "load commands ({:#x} bytes) exceed the image",
                    header.sizeofcmds()
                ))
            })?;

        if header.ncmds() as u64 * LoadCommandBase::SIZE as u64 > header.sizeofcmds() as u64 {
            return Err(MachOErr::MalformedHeader(format!(
                "{} load commands cannot fit in {:#x} bytes",
                header.ncmds(),
                header.sizeofcmds()
            )));
        }

        let mut commands = Vec::new();
        let mut remaining = area;
        for index in 0..header.ncmds() {
            let (_, base) = LoadCommandBase::parse(remaining, endian).map_err(|_| {
                MachOErr::MalformedHeader(format!("truncated load command {}", index))
            })?;

            let cmdsize = base.cmdsize as usize;
            if base.cmdsize < LoadCommandBase::SIZE || cmdsize > remaining.len() {
                return Err(MachOErr::MalformedHeader(format!(
                    "load command {} has invalid size {:#x}",
                    index, base.cmdsize
                )));
            }

            let ldcmd = &remaining[..cmdsize];
            let (_, command) = LoadCommand::parse(ldcmd, base, endian).map_err(|_| {
                MachOErr::MalformedHeader(format!(
                    "unable to parse load command {} ({:#x})",
                    index, base.raw_cmd
                ))
            })?;
            trace!(index, cmd = base.raw_cmd, cmdsize = base.cmdsize, "load command");
            commands.push(command);
            remaining = &remaining[cmdsize..];
        }

        Ok(commands)
    }
}
