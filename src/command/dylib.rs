use nom::{number::Endianness, sequence, IResult};

use crate::helpers::{string_upto_null_terminator, version_string};

use super::{LCLoadCommand, LoadCommandBase};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DylibCommand {
    pub cmd: LCLoadCommand,
    pub cmdsize: u32,
    pub name: String,
    pub timestamp: u32,
    pub current_version: String,
    pub compatibility_version: String,
}

impl DylibCommand {
    pub fn parse(ldcmd: &[u8], endian: Endianness) -> IResult<&[u8], Self> {
        let (cursor, base) = LoadCommandBase::parse(ldcmd, endian)?;
        let read_u32 = nom::number::complete::u32(endian);

        let (cursor, (name_offset, timestamp, current_version, compatibility_version)) =
            sequence::tuple((&read_u32, &read_u32, &read_u32, &read_u32))(cursor)?;

        // A name offset outside the command leaves the name empty.
        let name = match ldcmd.get(name_offset as usize..) {
            Some(tail) => string_upto_null_terminator(tail)?.1,
            None => String::new(),
        };

        Ok((
            cursor,
            DylibCommand {
                cmd: base.cmd,
                cmdsize: base.cmdsize,
                name,
                timestamp,
                current_version: version_string(current_version),
                compatibility_version: version_string(compatibility_version),
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dylib() {
        let mut bytes = Vec::new();
        for word in [0xdu32, 48, 24, 2, 0x00010203, 0x00010000] {
            bytes.extend(word.to_le_bytes());
        }
        bytes.extend(b"/usr/lib/libFoo.dylib\0");
        bytes.resize(48, 0);

        let (_, cmd) = DylibCommand::parse(&bytes, Endianness::Little).unwrap();
        assert_eq!(cmd.cmd, LCLoadCommand::LcIdDylib);
        assert_eq!(cmd.name, "/usr/lib/libFoo.dylib");
        assert_eq!(cmd.current_version, "1.2.3");
        assert_eq!(cmd.compatibility_version, "1.0.0");
    }
}
