use nom::number::Endianness;

use crate::{
    helpers::string_upto_null_terminator,
    macho::{MachOErr, MachOResult},
};

/// A bounds checked, byte order aware view over an in-memory binary.
#[derive(Debug, Clone, Copy)]
pub struct ByteSource<'a> {
    bytes: &'a [u8],
    endian: Endianness,
}

impl<'a> ByteSource<'a> {
    pub fn new(bytes: &'a [u8], endian: Endianness) -> Self {
        ByteSource { bytes, endian }
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn endian(&self) -> Endianness {
        self.endian
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn slice(&self, offset: u64, size: u64) -> MachOResult<&'a [u8]> {
        let out_of_bounds = MachOErr::OutOfBounds {
            offset,
            size,
            available: self.bytes.len() as u64,
        };
        let start = usize::try_from(offset).map_err(|_| out_of_bounds.clone())?;
        let end = offset
            .checked_add(size)
            .and_then(|end| usize::try_from(end).ok())
            .ok_or_else(|| out_of_bounds.clone())?;
        self.bytes.get(start..end).ok_or(out_of_bounds)
    }

    pub fn read_u8(&self, offset: u64) -> MachOResult<u8> {
        Ok(self.slice(offset, 1)?[0])
    }

    pub fn read_u16(&self, offset: u64) -> MachOResult<u16> {
        let bytes = self.slice(offset, 2)?;
        let (_, value) = nom::number::complete::u16::<_, ()>(self.endian)(bytes)
            .map_err(|_| MachOErr::Parse(format!("u16 at {:#x}", offset)))?;
        Ok(value)
    }

    pub fn read_u32(&self, offset: u64) -> MachOResult<u32> {
        let bytes = self.slice(offset, 4)?;
        let (_, value) = nom::number::complete::u32::<_, ()>(self.endian)(bytes)
            .map_err(|_| MachOErr::Parse(format!("u32 at {:#x}", offset)))?;
        Ok(value)
    }

    pub fn read_u64(&self, offset: u64) -> MachOResult<u64> {
        let bytes = self.slice(offset, 8)?;
        let (_, value) = nom::number::complete::u64::<_, ()>(self.endian)(bytes)
            .map_err(|_| MachOErr::Parse(format!("u64 at {:#x}", offset)))?;
        Ok(value)
    }

    /// Reads a pointer sized word, zero extended to 64 bits.
    pub fn read_word(&self, offset: u64, width: u8) -> MachOResult<u64> {
        match width {
            8 => self.read_u64(offset),
            _ => self.read_u32(offset).map(u64::from),
        }
    }

    /// Reads a NUL terminated string that must end inside the buffer.
    pub fn read_cstring(&self, offset: u64) -> MachOResult<String> {
        let tail = self.slice(offset, (self.bytes.len() as u64).saturating_sub(offset))?;
        if !tail.contains(&0) {
            return Err(MachOErr::OutOfBounds {
                offset,
                size: tail.len() as u64 + 1,
                available: self.bytes.len() as u64,
            });
        }
        let (_, s) = string_upto_null_terminator(tail)
            .map_err(|_| MachOErr::Parse(format!("string at {:#x}", offset)))?;
        Ok(s)
    }
}
