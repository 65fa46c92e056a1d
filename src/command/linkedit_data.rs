use nom::{number::Endianness, IResult};

use super::{LCLoadCommand, LoadCommandBase};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkeditDataCommand {
    pub cmd: LCLoadCommand,
    pub cmdsize: u32,
    pub dataoff: u32,
    pub datasize: u32,
}

impl LinkeditDataCommand {
    pub fn parse(ldcmd: &[u8], endian: Endianness) -> IResult<&[u8], Self> {
        let (cursor, base) = LoadCommandBase::parse(ldcmd, endian)?;
        let (cursor, dataoff) = nom::number::complete::u32(endian)(cursor)?;
        let (cursor, datasize) = nom::number::complete::u32(endian)(cursor)?;

        Ok((
            cursor,
            LinkeditDataCommand {
                cmd: base.cmd,
                cmdsize: base.cmdsize,
                dataoff,
                datasize,
            },
        ))
    }
}
