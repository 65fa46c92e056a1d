//! On-disk runtime records. Pointer fields are resolved through the image's
//! fixups as they are read; everything else stays raw.

use crate::{
    fixups::ImageValue,
    macho::{MachO, MachOErr, MachOResult},
};

use super::model::ClassRoFlags;

bitflags::bitflags! {
    /// High bits of `method_list_t::entsizeAndFlags`.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodListFlags: u32 {
        const SMALL = 0x8000_0000;
        const UNIQUED = 0x4000_0000;
        const SORTED = 0x2000_0000;
    }
}

/// Low bits of the class data pointer.
pub const FAST_IS_SWIFT_LEGACY: u64 = 1 << 0;
pub const FAST_IS_SWIFT_STABLE: u64 = 1 << 1;

fn word(image: &MachO) -> u64 {
    image.pointer_width() as u64
}

/// `class_t`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassRecord {
    pub isa: ImageValue,
    pub superclass: ImageValue,
    /// The `class_ro_t` address with the flag bits masked off.
    pub data: Option<u64>,
    pub is_swift: bool,
}

impl ClassRecord {
    pub fn read(image: &MachO, address: u64) -> MachOResult<Self> {
        let w = word(image);
        image.translate(address, 5 * w)?;
        let isa = image.read_pointer(address)?;
        let superclass = image.read_pointer(address + w)?;
        let raw_data = image.read_pointer(address + 4 * w)?;

        let mask = if image.arch.is_64() { !7u64 } else { !3u64 };
        let (data, is_swift) = match raw_data.address() {
            Some(bits) => (
                Some(bits & mask),
                bits & (FAST_IS_SWIFT_LEGACY | FAST_IS_SWIFT_STABLE) != 0,
            ),
            None => (None, false),
        };

        Ok(ClassRecord {
            isa,
            superclass,
            data,
            is_swift,
        })
    }
}

/// `class_ro_t`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassRoRecord {
    pub flags: ClassRoFlags,
    pub instance_start: u32,
    pub instance_size: u32,
    pub name: ImageValue,
    pub base_methods: ImageValue,
    pub base_protocols: ImageValue,
    pub ivars: ImageValue,
    pub base_properties: ImageValue,
}

impl ClassRoRecord {
    pub fn read(image: &MachO, address: u64) -> MachOResult<Self> {
        let w = word(image);
        // 64-bit layouts carry a reserved word before the pointers.
        let ptrs = if image.arch.is_64() { 16 } else { 12 };
        image.translate(address, ptrs + 7 * w)?;

        let raw_flags = image.read_u32(address)?;
        let instance_start = image.read_u32(address + 4)?;
        let instance_size = image.read_u32(address + 8)?;
        let field = |index: u64| image.read_pointer(address + ptrs + index * w);

        Ok(ClassRoRecord {
            flags: ClassRoFlags::from_bits_retain(raw_flags),
            instance_start,
            instance_size,
            name: field(1)?,
            base_methods: field(2)?,
            base_protocols: field(3)?,
            ivars: field(4)?,
            base_properties: field(6)?,
        })
    }
}

/// `protocol_t`. The trailing fields exist only when `size` covers them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolRecord {
    pub name: ImageValue,
    pub protocols: ImageValue,
    pub instance_methods: ImageValue,
    pub class_methods: ImageValue,
    pub optional_instance_methods: ImageValue,
    pub optional_class_methods: ImageValue,
    pub instance_properties: ImageValue,
    pub size: u32,
    pub flags: u32,
    pub extended_method_types: Option<ImageValue>,
    pub class_properties: Option<ImageValue>,
}

impl ProtocolRecord {
    pub fn read(image: &MachO, address: u64) -> MachOResult<Self> {
        let w = word(image);
        image.translate(address, 8 * w + 8)?;
        let field = |index: u64| image.read_pointer(address + index * w);

        let size = image.read_u32(address + 8 * w)?;
        let flags = image.read_u32(address + 8 * w + 4)?;
        let tail = address + 8 * w + 8;
        let covers = |index: u64| size as u64 >= 8 * w + 8 + (index + 1) * w;
        let optional = |index: u64| -> MachOResult<Option<ImageValue>> {
            if covers(index) {
                image.read_pointer(tail + index * w).map(Some)
            } else {
                Ok(None)
            }
        };

        Ok(ProtocolRecord {
            name: field(1)?,
            protocols: field(2)?,
            instance_methods: field(3)?,
            class_methods: field(4)?,
            optional_instance_methods: field(5)?,
            optional_class_methods: field(6)?,
            instance_properties: field(7)?,
            size,
            flags,
            extended_method_types: optional(0)?,
            class_properties: optional(2)?,
        })
    }
}

/// `category_t`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRecord {
    pub name: ImageValue,
    pub cls: ImageValue,
    pub instance_methods: ImageValue,
    pub class_methods: ImageValue,
    pub protocols: ImageValue,
    pub instance_properties: ImageValue,
    pub class_properties: Option<ImageValue>,
}

impl CategoryRecord {
    pub fn read(image: &MachO, address: u64, has_class_properties: bool) -> MachOResult<Self> {
        let w = word(image);
        let fields = if has_class_properties { 7 } else { 6 };
        image.translate(address, fields * w)?;
        let field = |index: u64| image.read_pointer(address + index * w);

        Ok(CategoryRecord {
            name: field(0)?,
            cls: field(1)?,
            instance_methods: field(2)?,
            class_methods: field(3)?,
            protocols: field(4)?,
            instance_properties: field(5)?,
            class_properties: if has_class_properties {
                Some(field(6)?)
            } else {
                None
            },
        })
    }
}

/// Header shared by method, ivar and property lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListHeader {
    pub entsize: u32,
    pub flags: u32,
    pub count: u32,
}

impl ListHeader {
    pub const SIZE: u64 = 8;
    const FLAG_MASK: u32 = 0xffff_0003;

    pub fn read(image: &MachO, address: u64) -> MachOResult<Self> {
        let entsize_and_flags = image.read_u32(address)?;
        let count = image.read_u32(address + 4)?;
        Ok(ListHeader {
            entsize: entsize_and_flags & !Self::FLAG_MASK,
            flags: entsize_and_flags & Self::FLAG_MASK,
            count,
        })
    }

    pub fn method_flags(&self) -> MethodListFlags {
        MethodListFlags::from_bits_truncate(self.flags)
    }
}

/// Where a method entry's strings live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodEntry {
    pub name: MachOResult<u64>,
    pub types: MachOResult<u64>,
    pub imp: Option<u64>,
}

impl MethodEntry {
    /// Relative entries hold three `i32` offsets from each field's own address;
    /// the name offset targets a selector reference.
    pub fn read(image: &MachO, address: u64, small: bool) -> MachOResult<Self> {
        if small {
            let offset = |field: u64| -> MachOResult<u64> {
                let delta = image.read_u32(address + field)? as i32 as i64;
                Ok((address + field).wrapping_add_signed(delta))
            };
            let selref = offset(0)?;
            let types = offset(4)?;
            let imp = match image.read_u32(address + 8)? {
                0 => None,
                _ => Some(offset(8)?),
            };
            let name = image.read_pointer(selref).and_then(|value| {
                value.address().ok_or(MachOErr::UnmappedAddress {
                    address: selref,
                    size: word(image),
                })
            });
            return Ok(MethodEntry {
                name,
                types: Ok(types),
                imp,
            });
        }

        let w = word(image);
        let pointer_at = |slot: u64| -> MachOResult<u64> {
            let value = image.read_pointer(slot)?;
            value.address().ok_or(MachOErr::UnmappedAddress {
                address: slot,
                size: w,
            })
        };
        Ok(MethodEntry {
            name: pointer_at(address),
            types: pointer_at(address + w),
            imp: image.read_pointer(address + 2 * w)?.address(),
        })
    }
}

/// `ivar_t`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IvarEntry {
    pub offset: ImageValue,
    pub name: ImageValue,
    pub types: ImageValue,
    pub alignment_raw: u32,
    pub size: u32,
}

impl IvarEntry {
    pub fn read(image: &MachO, address: u64) -> MachOResult<Self> {
        let w = word(image);
        Ok(IvarEntry {
            offset: image.read_pointer(address)?,
            name: image.read_pointer(address + w)?,
            types: image.read_pointer(address + 2 * w)?,
            alignment_raw: image.read_u32(address + 3 * w)?,
            size: image.read_u32(address + 3 * w + 4)?,
        })
    }

    /// `alignment_raw` is a power of two exponent; all ones means word aligned.
    pub fn alignment(&self, pointer_width: u8) -> u32 {
        match self.alignment_raw {
            u32::MAX => pointer_width as u32,
            raw if raw < 32 => 1 << raw,
            _ => 0,
        }
    }
}

/// `property_t`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyEntry {
    pub name: ImageValue,
    pub attributes: ImageValue,
}

impl PropertyEntry {
    pub fn read(image: &MachO, address: u64) -> MachOResult<Self> {
        let w = word(image);
        Ok(PropertyEntry {
            name: image.read_pointer(address)?,
            attributes: image.read_pointer(address + w)?,
        })
    }
}

/// `objc_image_info`.
pub fn read_image_info(image: &MachO, address: u64) -> MachOResult<(u32, u32)> {
    Ok((image.read_u32(address)?, image.read_u32(address + 4)?))
}

/// Minimum entry sizes for each list kind.
pub fn method_entry_size(image: &MachO, small: bool) -> u64 {
    if small {
        12
    } else {
        3 * word(image)
    }
}

pub fn ivar_entry_size(image: &MachO) -> u64 {
    3 * word(image) + 8
}

pub fn property_entry_size(image: &MachO) -> u64 {
    2 * word(image)
}
