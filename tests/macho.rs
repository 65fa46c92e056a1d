mod common;

use common::{fat, foo_image, ImageBuilder, CPU_ARM64, CPU_X86_64};
use objcdump::{
    command::LoadCommand,
    fixups::ImageValue,
    macho::{MachO, MachOErr, MachOFile},
};

#[test]
fn test_parse_thin_image() {
    let mut builder = ImageBuilder::x86_64();
    foo_image(&mut builder);
    let bytes = builder.build();

    let image = MachO::parse(&bytes).unwrap();
    assert_eq!(image.arch.name(), "x86_64");
    assert_eq!(image.pointer_width(), 8);
    assert!(!image.is_encrypted());
    assert_eq!(image.segments().len(), 3);

    let (sect, contents) = image.section_named("__objc_classlist").unwrap();
    assert_eq!(sect.segname, "__DATA");
    assert_eq!(contents.len(), 8);
    assert!(image.section("__DATA", "__objc_imageinfo").is_some());
    assert!(image.section("__DATA", "__objc_catlist").is_none());
}

#[test]
fn test_translate_round_trip() {
    let mut builder = ImageBuilder::x86_64();
    let hello = builder.string("hello");
    let bytes = builder.build();
    let image = MachO::parse(&bytes).unwrap();

    let offset = image.file_offset(hello, 6).unwrap();
    assert_eq!(image.address_of_offset(offset), Some(hello));
    assert_eq!(image.translate(hello, 5).unwrap(), b"hello");
    assert_eq!(image.read_cstring(hello).unwrap(), "hello");
}

#[test]
fn test_unmapped_reads() {
    let bytes = ImageBuilder::x86_64().build();
    let image = MachO::parse(&bytes).unwrap();

    assert_eq!(
        image.translate(0xdead_0000, 4),
        Err(MachOErr::UnmappedAddress {
            address: 0xdead_0000,
            size: 4
        })
    );
    assert!(image.read_u64(0x10).is_err());
    // A range running off the end of its section is unmapped too.
    let (sect, _) = image.section_named("__cstring").unwrap();
    let (addr, size) = (sect.addr, sect.size);
    assert!(image.translate(addr, size + 1).is_err());
}

#[test]
fn test_bound_pointer() {
    let mut builder = ImageBuilder::x86_64();
    let foo = foo_image(&mut builder);
    let bytes = builder.build();
    let image = MachO::parse(&bytes).unwrap();

    assert_eq!(
        image.read_pointer(foo + 8).unwrap(),
        ImageValue::Bind("_OBJC_CLASS_$_NSObject".to_string())
    );
    // The raw slot is still zero.
    assert_eq!(image.read_word(foo + 8).unwrap(), 0);
    assert!(matches!(image.read_pointer(foo).unwrap(), ImageValue::Value(_)));
}

#[test]
fn test_32bit_image() {
    let mut builder = ImageBuilder::i386();
    foo_image(&mut builder);
    let bytes = builder.build();
    let image = MachO::parse(&bytes).unwrap();

    assert_eq!(image.arch.name(), "i386");
    assert_eq!(image.pointer_width(), 4);
    let (_, contents) = image.section_named("__objc_classlist").unwrap();
    assert_eq!(contents.len(), 4);
}

#[test]
fn test_fat_slices_are_independent() {
    let mut x86 = ImageBuilder::x86_64();
    foo_image(&mut x86);
    let mut arm = ImageBuilder::arm64();
    foo_image(&mut arm);
    let mut broken = arm.build();
    broken.truncate(0x100);

    let bytes = fat(&[(CPU_X86_64, 3, x86.build()), (CPU_ARM64, 0, broken)]);
    let file = MachOFile::parse(&bytes).unwrap();
    assert!(file.is_fat());
    assert_eq!(file.archs().map(|archs| archs.len()), Some(2));

    let slices = file.images();
    assert_eq!(slices.len(), 2);
    assert_eq!(slices[0].arch_name, "x86_64");
    assert_eq!(slices[1].arch_name, "arm64");
    assert!(slices[0].image.is_ok());
    assert!(matches!(
        slices[1].image,
        Err(MachOErr::MalformedHeader(_))
    ));
}

#[test]
fn test_not_a_macho() {
    assert!(matches!(
        MachOFile::parse(b"definitely not a binary"),
        Err(MachOErr::MalformedHeader(_))
    ));
    assert!(!MachO::is_macho_magic(b"\x7fELF"));
}

#[test]
fn test_section_outside_its_segment() {
    let mut builder = ImageBuilder::x86_64();
    foo_image(&mut builder);
    let text_address = builder.base() + 0x20;
    builder.move_section("__objc_classlist", text_address);

    match MachO::parse(&builder.build()) {
        Err(MachOErr::MalformedHeader(message)) => {
            assert!(message.contains("__objc_classlist lies outside segment __DATA"))
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_overlapping_sections() {
    let mut builder = ImageBuilder::x86_64();
    foo_image(&mut builder);
    let inside_records = builder.base() + 0x4008;
    builder.move_section("__objc_classlist", inside_records);

    match MachO::parse(&builder.build()) {
        Err(MachOErr::MalformedHeader(message)) => {
            assert!(message.contains("overlap"));
            assert!(message.contains("__objc_const"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_encrypted_range() {
    let mut builder = ImageBuilder::x86_64();
    let clear = builder.string("clear");
    let hidden = builder.string("hidden");
    builder.encrypt(hidden - builder.base(), 0x100);
    let bytes = builder.build();
    let image = MachO::parse(&bytes).unwrap();

    assert!(image.is_encrypted());
    assert_eq!(image.read_cstring(clear).unwrap(), "clear");
    assert_eq!(
        image.read_cstring(hidden),
        Err(MachOErr::Encrypted { address: hidden })
    );
    assert_eq!(
        image.translate(hidden + 2, 1),
        Err(MachOErr::Encrypted { address: hidden + 2 })
    );
}

#[test]
fn test_chained_fixups_resolve_slots() {
    let mut builder = ImageBuilder::x86_64();
    let foo = foo_image(&mut builder);
    builder.chained_fixups();
    let bytes = builder.build();
    let image = MachO::parse(&bytes).unwrap();

    assert!(image
        .load_commands
        .iter()
        .any(|lc| matches!(lc, LoadCommand::DyldChainedFixups(_))));
    let (sect, _) = image.section_named("__objc_classlist").unwrap();
    let slot = sect.addr;
    // The raw slot holds the encoded rebase, not the class address.
    assert_ne!(image.read_word(slot).unwrap(), foo);
    assert_eq!(image.read_pointer(slot).unwrap(), ImageValue::Value(foo));
    assert_eq!(
        image.read_pointer(foo + 8).unwrap(),
        ImageValue::Bind("_OBJC_CLASS_$_NSObject".to_string())
    );
}
