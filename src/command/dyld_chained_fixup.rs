use bitfield::bitfield;
use nom::{
    error::{Error, ErrorKind},
    multi,
    number::Endianness,
    Err::Failure,
    IResult,
};
use num_derive::FromPrimitive;
use tracing::warn;

use crate::helpers::string_upto_null_terminator;

#[repr(u16)]
#[derive(Debug, FromPrimitive, Clone, Copy, PartialEq, Eq)]
pub enum DyldPointerFormat {
    Arm64e = 1,
    Ptr64 = 2,
    Ptr32 = 3,
    Ptr32Cache = 4,
    Ptr32Firmware = 5,
    Ptr64Offset = 6,
    Arm64eKernel = 7,
    Ptr64KernelCache = 8,
    Arm64eUserland = 9,
    Arm64eFirmware = 10,
    X86_64KernelCache = 11,
    Arm64eUserland24 = 12,
    Arm64eSharedCache = 13,
}

impl DyldPointerFormat {
    pub const DYLD_POINTER_MASK: u16 = 0xFF;

    pub fn parse(bytes: &[u8], endian: Endianness) -> IResult<&[u8], DyldPointerFormat> {
        let (bytes, value) = nom::number::complete::u16(endian)(bytes)?;
        match num::FromPrimitive::from_u16(value & Self::DYLD_POINTER_MASK) {
            Some(format) => Ok((bytes, format)),
            None => Err(Failure(Error::new(bytes, ErrorKind::Tag))),
        }
    }

    /// Bytes per unit of a chain's `next` field.
    pub fn stride(self) -> u64 {
        match self {
            DyldPointerFormat::Arm64e
            | DyldPointerFormat::Arm64eUserland
            | DyldPointerFormat::Arm64eUserland24 => 8,
            _ => 4,
        }
    }

    pub fn is_32(self) -> bool {
        matches!(
            self,
            DyldPointerFormat::Ptr32 | DyldPointerFormat::Ptr32Cache | DyldPointerFormat::Ptr32Firmware
        )
    }
}

#[derive(Debug, FromPrimitive, Clone, Copy, PartialEq, Eq)]
pub enum DyldSymbolsFormat {
    Uncompressed = 0,
    Zlib = 1,
}

#[derive(Debug, FromPrimitive, Clone, Copy, PartialEq, Eq)]
pub enum DyldImportFormat {
    Import = 1,
    ImportAddend = 2,
    ImportAddend64 = 3,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DyldChainedFixupsHeader {
    pub fixups_version: u32,
    pub starts_offset: u32,
    pub imports_offset: u32,
    pub symbols_offset: u32,
    pub imports_count: u32,
    pub imports_format: DyldImportFormat,
    pub symbols_format: DyldSymbolsFormat,
}

impl DyldChainedFixupsHeader {
    pub fn parse(bytes: &[u8], endian: Endianness) -> IResult<&[u8], DyldChainedFixupsHeader> {
        let u = nom::number::complete::u32(endian);
        let (bytes, fixups_version) = u(bytes)?;
        let (bytes, starts_offset) = u(bytes)?;
        let (bytes, imports_offset) = u(bytes)?;
        let (bytes, symbols_offset) = u(bytes)?;
        let (bytes, imports_count) = u(bytes)?;
        let (bytes, imports_format) = u(bytes)?;
        let (bytes, symbols_format) = u(bytes)?;

        let imports_format = num::FromPrimitive::from_u32(imports_format)
            .ok_or(Failure(Error::new(bytes, ErrorKind::Tag)))?;
        let symbols_format = num::FromPrimitive::from_u32(symbols_format)
            .ok_or(Failure(Error::new(bytes, ErrorKind::Tag)))?;

        Ok((
            bytes,
            DyldChainedFixupsHeader {
                fixups_version,
                starts_offset,
                imports_offset,
                symbols_offset,
                imports_count,
                imports_format,
                symbols_format,
            },
        ))
    }
}

bitfield! {
    struct DyldChainedImportBF(u32);
    impl Debug;
    u32;
    lib_ordinal, _: 7, 0;
    weak, _: 8, 8;
    name_offset, _: 31, 9;
}

bitfield! {
    struct DyldChainedImport64BF(u64);
    impl Debug;
    u64;
    lib_ordinal, _: 15, 0;
    weak, _: 16, 16;
    name_offset, _: 63, 32;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DyldChainedImport {
    pub lib_ordinal: i64,
    pub is_weak: bool,
    pub name: String,
    pub addend: i64,
}

impl DyldChainedImport {
    pub fn parse<'a>(
        bytes: &'a [u8],
        symbols: &'a [u8],
        format: DyldImportFormat,
        endian: Endianness,
    ) -> IResult<&'a [u8], DyldChainedImport> {
        let (bytes, lib_ordinal, is_weak, name_offset, addend) = match format {
            DyldImportFormat::Import | DyldImportFormat::ImportAddend => {
                let (bytes, value) = nom::number::complete::u32(endian)(bytes)?;
                let bf = DyldChainedImportBF(value);
                let (bytes, addend) = if format == DyldImportFormat::ImportAddend {
                    let (bytes, addend) = nom::number::complete::i32(endian)(bytes)?;
                    (bytes, addend as i64)
                } else {
                    (bytes, 0)
                };
                // Ordinals above 0xf0 are the negative special ordinals.
                let ordinal = bf.lib_ordinal() as u8;
                let ordinal = if ordinal > 0xf0 { ordinal as i8 as i64 } else { ordinal as i64 };
                (bytes, ordinal, bf.weak() != 0, bf.name_offset() as usize, addend)
            }
            DyldImportFormat::ImportAddend64 => {
                let (bytes, value) = nom::number::complete::u64(endian)(bytes)?;
                let (bytes, addend) = nom::number::complete::i64(endian)(bytes)?;
                let bf = DyldChainedImport64BF(value);
                let ordinal = bf.lib_ordinal() as u16;
                let ordinal = if ordinal > 0xfff0 { ordinal as i16 as i64 } else { ordinal as i64 };
                (bytes, ordinal, bf.weak() != 0, bf.name_offset() as usize, addend)
            }
        };

        let name = match symbols.get(name_offset..) {
            Some(tail) => string_upto_null_terminator(tail)
                .map_or_else(|_| String::new(), |(_, name)| name),
            None => String::new(),
        };

        Ok((
            bytes,
            DyldChainedImport {
                lib_ordinal,
                is_weak,
                name,
                addend,
            },
        ))
    }
}

/// Chain starts for one segment. `page_starts` holds (page index, offset in
/// page) for every chain, with multi-start pages flattened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DyldStartsInSegment {
    pub size: u32,
    pub page_size: u16,
    pub pointer_format: DyldPointerFormat,
    pub segment_offset: u64,
    pub max_valid_pointer: u32,
    pub page_count: u16,
    pub page_starts: Vec<(u16, u16)>,
}

impl DyldStartsInSegment {
    pub const DYLD_CHAINED_PTR_START_NONE: u16 = 0xffff;
    pub const DYLD_CHAINED_PTR_START_MULTI: u16 = 0x8000;
    pub const DYLD_CHAINED_PTR_START_LAST: u16 = 0x8000;

    pub fn parse(bytes: &[u8], endian: Endianness) -> IResult<&[u8], DyldStartsInSegment> {
        let read_u16 = nom::number::complete::u16(endian);
        let (cursor, size) = nom::number::complete::u32(endian)(bytes)?;
        let (cursor, page_size) = read_u16(cursor)?;
        let (cursor, pointer_format) = DyldPointerFormat::parse(cursor, endian)?;
        let (cursor, segment_offset) = nom::number::complete::u64(endian)(cursor)?;
        let (cursor, max_valid_pointer) = nom::number::complete::u32(endian)(cursor)?;
        let (cursor, page_count) = read_u16(cursor)?;
        let (cursor, raw_starts) = multi::count(read_u16, page_count as usize)(cursor)?;

        let mut page_starts = Vec::new();
        for (page, start) in raw_starts.iter().enumerate() {
            let page = page as u16;
            if *start == Self::DYLD_CHAINED_PTR_START_NONE {
                continue;
            }
            if start & Self::DYLD_CHAINED_PTR_START_MULTI == 0 {
                page_starts.push((page, *start));
                continue;
            }

            // Overflow entries follow the page table, the last one is tagged.
            let mut index = (start & !Self::DYLD_CHAINED_PTR_START_MULTI) as usize;
            loop {
                let Some(entry) = raw_overflow(bytes, index, endian) else {
                    warn!(page, "chain start overflow entry out of bounds");
                    break;
                };
                page_starts.push((page, entry & !Self::DYLD_CHAINED_PTR_START_LAST));
                if entry & Self::DYLD_CHAINED_PTR_START_LAST != 0 {
                    break;
                }
                index += 1;
            }
        }

        Ok((
            cursor,
            DyldStartsInSegment {
                size,
                page_size,
                pointer_format,
                segment_offset,
                max_valid_pointer,
                page_count,
                page_starts,
            },
        ))
    }
}

/// Entry `index` of the `page_start` array, read past `page_count` if needed.
fn raw_overflow(segment_starts: &[u8], index: usize, endian: Endianness) -> Option<u16> {
    const PAGE_START_OFFSET: usize = 22;
    let at = PAGE_START_OFFSET.checked_add(index.checked_mul(2)?)?;
    let bytes = segment_starts.get(at..at + 2)?;
    nom::number::complete::u16::<_, ()>(endian)(bytes)
        .ok()
        .map(|(_, v)| v)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DyldStartsInImage {
    pub seg_count: u32,
    pub seg_info_offset: Vec<u32>,
    /// Starts keyed by segment index in load command order.
    pub seg_starts: Vec<(usize, DyldStartsInSegment)>,
}

impl DyldStartsInImage {
    pub fn parse(bytes: &[u8], endian: Endianness) -> IResult<&[u8], DyldStartsInImage> {
        let (cursor, seg_count) = nom::number::complete::u32(endian)(bytes)?;
        let (cursor, seg_info_offset) =
            multi::count(nom::number::complete::u32(endian), seg_count as usize)(cursor)?;

        let mut seg_starts = vec![];
        for (index, offset) in seg_info_offset.iter().enumerate() {
            // No fixups in this segment
            if *offset == 0 {
                continue;
            }
            let Some(start_bytes) = bytes.get(*offset as usize..) else {
                return Err(Failure(Error::new(cursor, ErrorKind::Eof)));
            };
            let (_, seg_start) = DyldStartsInSegment::parse(start_bytes, endian)?;
            seg_starts.push((index, seg_start));
        }

        Ok((
            cursor,
            DyldStartsInImage {
                seg_count,
                seg_info_offset,
                seg_starts,
            },
        ))
    }
}

/// The decoded `LC_DYLD_CHAINED_FIXUPS` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DyldChainedFixups {
    pub header: DyldChainedFixupsHeader,
    pub imports: Vec<DyldChainedImport>,
    pub starts: DyldStartsInImage,
}

impl DyldChainedFixups {
    pub fn parse(blob: &[u8], endian: Endianness) -> IResult<&[u8], DyldChainedFixups> {
        let (_, header) = DyldChainedFixupsHeader::parse(blob, endian)?;
        let eof = || Failure(Error::new(blob, ErrorKind::Eof));

        let symbols = blob.get(header.symbols_offset as usize..).ok_or_else(eof)?;
        let mut imports = Vec::new();
        if header.symbols_format == DyldSymbolsFormat::Uncompressed {
            let mut cursor = blob.get(header.imports_offset as usize..).ok_or_else(eof)?;
            for _ in 0..header.imports_count {
                let (next, import) =
                    DyldChainedImport::parse(cursor, symbols, header.imports_format, endian)?;
                imports.push(import);
                cursor = next;
            }
        } else {
            warn!("compressed chained fixup symbols are not supported");
        }

        let starts_bytes = blob.get(header.starts_offset as usize..).ok_or_else(eof)?;
        let (_, starts) = DyldStartsInImage::parse(starts_bytes, endian)?;

        Ok((
            blob,
            DyldChainedFixups {
                header,
                imports,
                starts,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push32(buf: &mut Vec<u8>, values: &[u32]) {
        for v in values {
            buf.extend(v.to_le_bytes());
        }
    }

    /// header(28) | starts at 0x20 | imports at 0x48 | symbols at 0x50
    fn blob() -> Vec<u8> {
        let mut blob = Vec::new();
        push32(&mut blob, &[0, 0x20, 0x48, 0x50, 2, 1, 0]);
        blob.resize(0x20, 0);
        // starts_in_image: 2 segments, only the second has starts
        push32(&mut blob, &[2, 0, 0x0c]);
        // starts_in_segment
        push32(&mut blob, &[24]);
        blob.extend(0x4000u16.to_le_bytes());
        blob.extend(6u16.to_le_bytes());
        blob.extend(0x4000u64.to_le_bytes());
        push32(&mut blob, &[0]);
        blob.extend(2u16.to_le_bytes());
        blob.extend(0x10u16.to_le_bytes());
        blob.extend(0xffffu16.to_le_bytes());
        blob.resize(0x48, 0);
        // imports: ordinal 1 name 0, ordinal 0xfe weak name 23
        push32(&mut blob, &[1, 0xfe | (1 << 8) | (23 << 9)]);
        blob.extend(b"_OBJC_CLASS_$_NSObject\0_weak\0");
        blob
    }

    #[test]
    fn test_parse_chained_fixups() {
        let blob = blob();
        let (_, fixups) = DyldChainedFixups::parse(&blob, Endianness::Little).unwrap();
        assert_eq!(fixups.header.imports_format, DyldImportFormat::Import);
        assert_eq!(fixups.imports.len(), 2);
        assert_eq!(fixups.imports[0].name, "_OBJC_CLASS_$_NSObject");
        assert_eq!(fixups.imports[0].lib_ordinal, 1);
        assert_eq!(fixups.imports[1].name, "_weak");
        assert_eq!(fixups.imports[1].lib_ordinal, -2);
        assert!(fixups.imports[1].is_weak);

        assert_eq!(fixups.starts.seg_starts.len(), 1);
        let (index, starts) = &fixups.starts.seg_starts[0];
        assert_eq!(*index, 1);
        assert_eq!(starts.pointer_format, DyldPointerFormat::Ptr64Offset);
        assert_eq!(starts.page_starts, vec![(0, 0x10)]);
    }

    #[test]
    fn test_stride() {
        assert_eq!(DyldPointerFormat::Arm64e.stride(), 8);
        assert_eq!(DyldPointerFormat::Ptr64.stride(), 4);
        assert!(DyldPointerFormat::Ptr32.is_32());
    }

    #[test]
    fn test_import_names_come_from_symbol_table() {
        let mut table = Vec::new();
        push32(&mut table, &[3 | (6 << 9)]);
        table.extend(0x10i32.to_le_bytes());
        let symbols = b"_skip\0_OBJC_CLASS_$_NSView\0".to_vec();

        let (rest, import) =
            DyldChainedImport::parse(&table, &symbols, DyldImportFormat::ImportAddend, Endianness::Little)
                .unwrap();
        assert!(rest.is_empty());
        assert_eq!(import.name, "_OBJC_CLASS_$_NSView");
        assert_eq!(import.lib_ordinal, 3);
        assert_eq!(import.addend, 0x10);

        // A name offset past the table yields an empty name.
        let mut far = Vec::new();
        push32(&mut far, &[1 | (0x1000 << 9)]);
        let (_, import) =
            DyldChainedImport::parse(&far, &symbols, DyldImportFormat::Import, Endianness::Little).unwrap();
        assert_eq!(import.name, "");
    }

    #[test]
    fn test_huge_import_count_fails_cleanly() {
        let mut blob = blob();
        blob[16..20].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(DyldChainedFixups::parse(&blob, Endianness::Little).is_err());
    }

    #[test]
    fn test_truncated_blob() {
        let blob = blob();
        assert!(DyldChainedFixups::parse(&blob[..0x30], Endianness::Little).is_err());
    }
}
