use nom::{bytes::complete::take, number::Endianness, IResult};
use uuid::Uuid;

use super::{LCLoadCommand, LoadCommandBase};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UuidCommand {
    pub cmd: LCLoadCommand,
    pub cmdsize: u32,
    pub uuid: Uuid,
}

impl UuidCommand {
    pub fn parse(ldcmd: &[u8], endian: Endianness) -> IResult<&[u8], Self> {
        let (cursor, base) = LoadCommandBase::parse(ldcmd, endian)?;
        let (cursor, raw) = take(16usize)(cursor)?;
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(raw);

        Ok((
            cursor,
            UuidCommand {
                cmd: base.cmd,
                cmdsize: base.cmdsize,
                uuid: Uuid::from_bytes(bytes),
            },
        ))
    }
}
