use nom::{
    error::{Error, ErrorKind},
    number::{complete::u8 as read_u8, Endianness},
    sequence,
    Err::Failure,
    IResult,
};
use num_derive::FromPrimitive;

use crate::helpers::{read_sleb, read_uleb, string_upto_null_terminator};

use super::{LCLoadCommand, LoadCommandBase};

#[derive(Debug, FromPrimitive, Clone, Copy, PartialEq, Eq)]
pub enum BindType {
    Pointer = 1,
    TextAbsolute32 = 2,
    TextPCRel32 = 3,
}

#[derive(Debug, FromPrimitive, Clone, Copy, PartialEq, Eq)]
pub enum BindOpcode {
    Done = 0,
    SetDylibOrdinalImm = 1,
    SetDylibOrdinalUleb = 2,
    SetDylibSpecialImm = 3,
    SetSymbolTrailingFlagsImm = 4,
    SetTypeImm = 5,
    SetAddendSleb = 6,
    SetSegmentAndOffsetUleb = 7,
    AddAddressUleb = 8,
    DoBind = 9,
    DoBindAddAddressUleb = 10,
    DoBindAddAddressImmScaled = 11,
    DoBindUlebTimesSkippingUleb = 12,
    Threaded = 13,
}

impl BindOpcode {
    pub const BIND_OPCODE_MASK: u8 = 0xF0;
    pub const BIND_IMMEDIATE_MASK: u8 = 0x0F;

    pub fn parse(bytes: &[u8]) -> IResult<&[u8], (BindOpcode, u8)> {
        let (bytes, opcode) = read_u8(bytes)?;
        match num::FromPrimitive::from_u8((opcode & Self::BIND_OPCODE_MASK) >> 4) {
            Some(opc) => Ok((bytes, (opc, (opcode & Self::BIND_IMMEDIATE_MASK)))),
            None => Err(Failure(Error::new(bytes, ErrorKind::Tag))),
        }
    }
}

#[derive(Debug, FromPrimitive)]
pub enum BindSubOpcode {
    ThreadedSetBindOrdinalTableSizeUleb = 0,
    ThreadedApply = 1,
}

/// One bound slot: `segment_offset` bytes into segment `segment_index`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindInstruction {
    pub segment_index: u8,
    pub segment_offset: u64,
    pub bind_type: BindType,
    /// Negative values are the special ordinals (self, main executable, flat lookup).
    pub dylib_ordinal: i64,
    pub symbol_name: String,
    pub addend: i64,
}

impl BindInstruction {
    /// Runs a bind opcode stream. Slots advance by `pointer_width`.
    pub fn parse(bytes: &[u8], pointer_width: u8) -> IResult<&[u8], Vec<BindInstruction>> {
        let ptr = pointer_width as u64;
        let mut instructions = vec![];
        let mut offset: u64 = 0;
        let mut segment_index = 0;
        let mut bind_type = BindType::Pointer;
        let mut symbol_name = String::new();
        let mut dylib_ordinal: i64 = 0;
        let mut addend = 0;
        let mut cursor = bytes;

        macro_rules! bind {
            () => {
                instructions.push(BindInstruction {
                    segment_index,
                    segment_offset: offset,
                    bind_type,
                    dylib_ordinal,
                    symbol_name: symbol_name.clone(),
                    addend,
                })
            };
        }

        while !cursor.is_empty() {
            let (next, (opcode, immediate)) = BindOpcode::parse(cursor)?;
            cursor = next;
            match opcode {
                BindOpcode::Done => {
                    // Lazy bind streams are a series of Done terminated runs.
                    continue;
                }
                BindOpcode::SetDylibOrdinalImm => {
                    dylib_ordinal = immediate as i64;
                }
                BindOpcode::SetDylibOrdinalUleb => {
                    let (next, num) = read_uleb(cursor)?;
                    cursor = next;
                    dylib_ordinal = num as i64;
                }
                BindOpcode::SetDylibSpecialImm => {
                    dylib_ordinal = if immediate == 0 {
                        0
                    } else {
                        (immediate | BindOpcode::BIND_OPCODE_MASK) as i8 as i64
                    };
                }
                BindOpcode::SetSymbolTrailingFlagsImm => {
                    let (next, name) = string_upto_null_terminator(cursor)?;
                    cursor = next;
                    symbol_name = name;
                }
                BindOpcode::SetTypeImm => {
                    bind_type = num::FromPrimitive::from_u8(immediate)
                        .ok_or(Failure(Error::new(cursor, ErrorKind::Tag)))?;
                }
                BindOpcode::SetAddendSleb => {
                    let (next, num) = read_sleb(cursor)?;
                    cursor = next;
                    addend = num;
                }
                BindOpcode::SetSegmentAndOffsetUleb => {
                    let (next, num) = read_uleb(cursor)?;
                    cursor = next;
                    segment_index = immediate;
                    offset = num;
                }
                BindOpcode::AddAddressUleb => {
                    let (next, num) = read_uleb(cursor)?;
                    cursor = next;
                    // Wrapping adds are how the stream moves backwards.
                    offset = offset.wrapping_add(num);
                }
                BindOpcode::DoBind => {
                    bind!();
                    offset = offset.wrapping_add(ptr);
                }
                BindOpcode::DoBindAddAddressUleb => {
                    bind!();
                    let (next, num) = read_uleb(cursor)?;
                    cursor = next;
                    offset = offset.wrapping_add(num).wrapping_add(ptr);
                }
                BindOpcode::DoBindAddAddressImmScaled => {
                    bind!();
                    offset = offset.wrapping_add(immediate as u64 * ptr + ptr);
                }
                BindOpcode::DoBindUlebTimesSkippingUleb => {
                    let (next, times) = read_uleb(cursor)?;
                    let (next, skip) = read_uleb(next)?;
                    cursor = next;
                    for _ in 0..times {
                        bind!();
                        offset = offset.wrapping_add(skip).wrapping_add(ptr);
                    }
                }
                BindOpcode::Threaded => match num::FromPrimitive::from_u8(immediate) {
                    Some(BindSubOpcode::ThreadedSetBindOrdinalTableSizeUleb) => {
                        let (next, _) = read_uleb(cursor)?;
                        cursor = next;
                    }
                    Some(BindSubOpcode::ThreadedApply) => {
                        bind!();
                        offset = offset.wrapping_add(ptr);
                    }
                    None => return Err(Failure(Error::new(cursor, ErrorKind::Tag))),
                },
            }
        }

        Ok((cursor, instructions))
    }
}

/// `LC_DYLD_INFO(_ONLY)`. Only the bind streams are of interest here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DyldInfoCommand {
    pub cmd: LCLoadCommand,
    pub cmdsize: u32,
    pub rebase_off: u32,
    pub rebase_size: u32,
    pub bind_off: u32,
    pub bind_size: u32,
    pub weak_bind_off: u32,
    pub weak_bind_size: u32,
    pub lazy_bind_off: u32,
    pub lazy_bind_size: u32,
    pub export_off: u32,
    pub export_size: u32,
}

impl DyldInfoCommand {
    pub fn parse(ldcmd: &[u8], endian: Endianness) -> IResult<&[u8], Self> {
        let (cursor, base) = LoadCommandBase::parse(ldcmd, endian)?;
        let u = nom::number::complete::u32(endian);
        let (cursor, (rebase_off, rebase_size, bind_off, bind_size, weak_bind_off)) =
            sequence::tuple((&u, &u, &u, &u, &u))(cursor)?;
        let (cursor, (weak_bind_size, lazy_bind_off, lazy_bind_size, export_off, export_size)) =
            sequence::tuple((&u, &u, &u, &u, &u))(cursor)?;

        Ok((
            cursor,
            DyldInfoCommand {
                cmd: base.cmd,
                cmdsize: base.cmdsize,
                rebase_off,
                rebase_size,
                bind_off,
                bind_size,
                weak_bind_off,
                weak_bind_size,
                lazy_bind_off,
                lazy_bind_size,
                export_off,
                export_size,
            },
        ))
    }

    /// File ranges of the regular, weak and lazy bind streams.
    pub fn bind_streams(&self) -> [(u32, u32); 3] {
        [
            (self.bind_off, self.bind_size),
            (self.weak_bind_off, self.weak_bind_size),
            (self.lazy_bind_off, self.lazy_bind_size),
        ]
    }
}
