use nom::{number::Endianness, IResult};

use super::{LCLoadCommand, LoadCommandBase};

/// `LC_ENCRYPTION_INFO` and `LC_ENCRYPTION_INFO_64`. The trailing pad of the
/// 64-bit form is not read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionInfoCommand {
    pub cmd: LCLoadCommand,
    pub cmdsize: u32,
    pub cryptoff: u32,
    pub cryptsize: u32,
    pub cryptid: u32,
}

impl EncryptionInfoCommand {
    pub fn parse(ldcmd: &[u8], endian: Endianness) -> IResult<&[u8], Self> {
        let (cursor, base) = LoadCommandBase::parse(ldcmd, endian)?;
        let (cursor, cryptoff) = nom::number::complete::u32(endian)(cursor)?;
        let (cursor, cryptsize) = nom::number::complete::u32(endian)(cursor)?;
        let (cursor, cryptid) = nom::number::complete::u32(endian)(cursor)?;

        Ok((
            cursor,
            EncryptionInfoCommand {
                cmd: base.cmd,
                cmdsize: base.cmdsize,
                cryptoff,
                cryptsize,
                cryptid,
            },
        ))
    }

    /// The encrypted file range, if the image is still encrypted.
    pub fn encrypted_range(&self) -> Option<std::ops::Range<u64>> {
        if self.cryptid == 0 || self.cryptsize == 0 {
            return None;
        }
        let start = self.cryptoff as u64;
        Some(start..start + self.cryptsize as u64)
    }
}
