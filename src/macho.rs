use std::ops::Range;

use nom::number::Endianness;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::{
    command::{DylibCommand, LoadCommand, Section, SegmentCommand},
    fat::{FatArch, FatMachO},
    fixups::{Fixups, ImageValue},
    header::MachHeader,
    machine::Architecture,
    source::ByteSource,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MachOErr {
    #[error("malformed header: {0}")]
    MalformedHeader(String),
    #[error("address {address:#x} (+{size:#x}) is not mapped by any section")]
    UnmappedAddress { address: u64, size: u64 },
    #[error("address {address:#x} lies in the encrypted range")]
    Encrypted { address: u64 },
    #[error("read of {size:#x} bytes at offset {offset:#x} exceeds {available:#x} bytes")]
    OutOfBounds { offset: u64, size: u64, available: u64 },
    #[error("parse error: {0}")]
    Parse(String),
}

pub type MachOResult<T> = Result<T, MachOErr>;

/// One architecture's image: header, load commands and the address space
/// they describe, borrowed from the file buffer.
#[derive(Debug)]
pub struct MachO<'a> {
    pub header: MachHeader,
    pub arch: Architecture,
    pub load_commands: Vec<LoadCommand>,
    segments: Vec<SegmentCommand>,
    source: ByteSource<'a>,
    fixups: Fixups,
    encrypted: Option<Range<u64>>,
}

impl<'a> MachO<'a> {
    pub fn is_macho_magic(bytes: &[u8]) -> bool {
        MachHeader::sniff(bytes).is_some()
    }

    pub fn parse(bytes: &'a [u8]) -> MachOResult<Self> {
        let header = MachHeader::parse(bytes)?;
        let arch = header.architecture();
        let source = ByteSource::new(bytes, arch.endian);
        let load_commands = LoadCommand::parse_all(&source, &header)?;

        let segments: Vec<SegmentCommand> = load_commands
            .iter()
            .filter_map(|lc| match lc {
                LoadCommand::Segment(cmd) => Some(cmd),
                _ => None,
            })
            .cloned()
            .collect();

        for (i, seg) in segments.iter().enumerate() {
            if seg.fileoff.saturating_add(seg.filesize) > bytes.len() as u64 {
                return Err(MachOErr::MalformedHeader(format!(
                    "segment {} exceeds the file",
                    seg.segname
                )));
            }
            if let Some(other) = segments[i + 1..].iter().find(|other| seg.overlaps(other)) {
                return Err(MachOErr::MalformedHeader(format!(
                    "segments {} and {} overlap",
                    seg.segname, other.segname
                )));
            }
            for sect in &seg.sections {
                let vm_end = sect.addr.checked_add(sect.size);
                if sect.addr < seg.vmaddr || vm_end.map_or(true, |end| end > seg.vm_end()) {
                    return Err(MachOErr::MalformedHeader(format!(
                        "section {},{} lies outside segment {}",
                        sect.segname, sect.sectname, seg.segname
                    )));
                }
                let in_file = (sect.offset as u64).saturating_add(sect.size);
                if !sect.sectype.is_zerofill() && sect.size > 0 && in_file > bytes.len() as u64 {
                    return Err(MachOErr::MalformedHeader(format!(
                        "section {},{} exceeds the file",
                        sect.segname, sect.sectname
                    )));
                }
            }
        }

        // File-backed sections must not share addresses.
        let mut mapped: Vec<&Section> = segments
            .iter()
            .flat_map(|seg| seg.sections.iter())
            .filter(|sect| !sect.sectype.is_zerofill() && sect.size > 0)
            .collect();
        mapped.sort_by_key(|sect| sect.addr);
        if let Some(pair) = mapped
            .windows(2)
            .find(|pair| pair[0].addr + pair[0].size > pair[1].addr)
        {
            return Err(MachOErr::MalformedHeader(format!(
                "sections {},{} and {},{} overlap",
                pair[0].segname, pair[0].sectname, pair[1].segname, pair[1].sectname
            )));
        }

        let encrypted = load_commands.iter().find_map(|lc| match lc {
            LoadCommand::EncryptionInfo(cmd) => cmd.encrypted_range(),
            _ => None,
        });

        let fixups = Fixups::build(&source, &segments, &load_commands, &arch);
        debug!(
            arch = %arch.name(),
            segments = segments.len(),
            commands = load_commands.len(),
            encrypted = encrypted.is_some(),
            "parsed mach-o image"
        );

        Ok(MachO {
            header,
            arch,
            load_commands,
            segments,
            source,
            fixups,
            encrypted,
        })
    }

    pub fn segments(&self) -> &[SegmentCommand] {
        &self.segments
    }

    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.segments.iter().flat_map(|seg| seg.sections.iter())
    }

    pub fn uuid(&self) -> Option<Uuid> {
        self.load_commands.iter().find_map(|lc| match lc {
            LoadCommand::Uuid(cmd) => Some(cmd.uuid),
            _ => None,
        })
    }

    pub fn dylib_id(&self) -> Option<&DylibCommand> {
        self.load_commands.iter().find_map(|lc| match lc {
            LoadCommand::DylibId(cmd) => Some(cmd),
            _ => None,
        })
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted.is_some()
    }

    pub fn pointer_width(&self) -> u8 {
        self.arch.pointer_width
    }

    pub fn endian(&self) -> Endianness {
        self.arch.endian
    }

    fn mapped_section(&self, address: u64) -> Option<&Section> {
        self.sections()
            .find(|sect| !sect.sectype.is_zerofill() && sect.contains(address))
    }

    /// Maps `[address, address + size)` to the file offset backing it.
    /// The range must lie inside a single file-backed section.
    pub fn file_offset(&self, address: u64, size: u64) -> MachOResult<u64> {
        let unmapped = MachOErr::UnmappedAddress { address, size };
        let sect = self.mapped_section(address).ok_or_else(|| unmapped.clone())?;
        let delta = address - sect.addr;
        if size > sect.size - delta {
            return Err(unmapped);
        }

        let offset = sect.offset as u64 + delta;
        if let Some(range) = &self.encrypted {
            if offset < range.end && range.start < offset + size.max(1) {
                return Err(MachOErr::Encrypted { address });
            }
        }
        Ok(offset)
    }

    pub fn translate(&self, address: u64, size: u64) -> MachOResult<&'a [u8]> {
        let offset = self.file_offset(address, size)?;
        self.source
            .slice(offset, size)
            .map_err(|_| MachOErr::UnmappedAddress { address, size })
    }

    /// The file offset's virtual address, if a section maps it.
    pub fn address_of_offset(&self, offset: u64) -> Option<u64> {
        self.sections()
            .find(|sect| {
                !sect.sectype.is_zerofill()
                    && offset >= sect.offset as u64
                    && offset - (sect.offset as u64) < sect.size
            })
            .map(|sect| sect.addr + (offset - sect.offset as u64))
    }

    pub fn section(&self, segname: &str, sectname: &str) -> Option<&'a [u8]> {
        let sect = self
            .sections()
            .find(|sect| sect.segname == segname && sect.sectname == sectname)?;
        self.section_bytes(sect)
    }

    /// Finds a section by name in any segment. Objective-C metadata moves
    /// between `__DATA`, `__DATA_CONST` and `__DATA_DIRTY`.
    pub fn section_named(&self, sectname: &str) -> Option<(&Section, &'a [u8])> {
        let sect = self.sections().find(|sect| sect.sectname == sectname)?;
        self.section_bytes(sect).map(|bytes| (sect, bytes))
    }

    fn section_bytes(&self, sect: &Section) -> Option<&'a [u8]> {
        if sect.sectype.is_zerofill() {
            return None;
        }
        self.source.slice(sect.offset as u64, sect.size).ok()
    }

    pub fn read_u32(&self, address: u64) -> MachOResult<u32> {
        let offset = self.file_offset(address, 4)?;
        self.source.read_u32(offset)
    }

    pub fn read_u64(&self, address: u64) -> MachOResult<u64> {
        let offset = self.file_offset(address, 8)?;
        self.source.read_u64(offset)
    }

    /// Reads a pointer-width word without applying fixups.
    pub fn read_word(&self, address: u64) -> MachOResult<u64> {
        let width = self.arch.pointer_width;
        let offset = self.file_offset(address, width as u64)?;
        self.source.read_word(offset, width)
    }

    /// Reads the pointer slot at `address` and resolves it through the
    /// image's fixups.
    pub fn read_pointer(&self, address: u64) -> MachOResult<ImageValue> {
        let raw = self.read_word(address)?;
        Ok(self.fixups.resolve(address, raw))
    }

    /// Reads a NUL terminated string; the terminator must lie in the same section.
    pub fn read_cstring(&self, address: u64) -> MachOResult<String> {
        let unmapped = MachOErr::UnmappedAddress { address, size: 1 };
        let sect = self.mapped_section(address).ok_or_else(|| unmapped.clone())?;
        let delta = address - sect.addr;
        let remaining = sect.size - delta;
        let bytes = self
            .source
            .slice(sect.offset as u64 + delta, remaining)
            .map_err(|_| unmapped)?;
        let Some(len) = bytes.iter().position(|b| *b == 0) else {
            return Err(MachOErr::UnmappedAddress {
                address,
                size: remaining + 1,
            });
        };
        // Only the string itself has to lie outside the encrypted range.
        let bytes = self.translate(address, len as u64 + 1)?;
        ByteSource::new(bytes, self.arch.endian).read_cstring(0)
    }
}

/// One slice of a possibly fat file.
#[derive(Debug)]
pub struct ImageSlice<'a> {
    pub arch_name: String,
    pub image: MachOResult<MachO<'a>>,
}

/// A thin or fat Mach-O file.
#[derive(Debug)]
pub struct MachOFile<'a> {
    bytes: &'a [u8],
    fat: Option<FatMachO>,
}

impl<'a> MachOFile<'a> {
    pub fn parse(bytes: &'a [u8]) -> MachOResult<Self> {
        if FatMachO::is_fat(bytes) {
            let fat = FatMachO::parse(bytes)?;
            debug!(slices = fat.archs.len(), "fat file");
            return Ok(MachOFile {
                bytes,
                fat: Some(fat),
            });
        }
        if MachO::is_macho_magic(bytes) {
            return Ok(MachOFile { bytes, fat: None });
        }
        Err(MachOErr::MalformedHeader(
            "not a mach-o or fat file".to_string(),
        ))
    }

    pub fn is_fat(&self) -> bool {
        self.fat.is_some()
    }

    pub fn archs(&self) -> Option<&[FatArch]> {
        self.fat.as_ref().map(|fat| fat.archs.as_slice())
    }

    /// Parses every slice in fat-arch table order. A malformed slice fails alone.
    pub fn images(&self) -> Vec<ImageSlice<'a>> {
        match &self.fat {
            None => {
                let image = MachO::parse(self.bytes);
                let arch_name = match &image {
                    Ok(image) => image.arch.name(),
                    Err(_) => "unknown".to_string(),
                };
                vec![ImageSlice { arch_name, image }]
            }
            Some(fat) => fat
                .archs
                .iter()
                .map(|arch| {
                    let arch_name = fat_arch_name(arch);
                    let image = FatMachO::slice(self.bytes, arch).and_then(MachO::parse);
                    ImageSlice { arch_name, image }
                })
                .collect(),
        }
    }
}

fn fat_arch_name(arch: &FatArch) -> String {
    Architecture::new(arch.cputype(), arch.cpusubtype(), false, Endianness::Big).name()
}
