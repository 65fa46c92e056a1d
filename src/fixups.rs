use std::collections::HashMap;

use bitfield::bitfield;
use tracing::{debug, warn};

use crate::{
    command::{
        dyld_chained_fixup::{DyldChainedFixups, DyldPointerFormat, DyldStartsInSegment},
        dyld_info::BindInstruction,
        LoadCommand, SegmentCommand,
    },
    machine::Architecture,
    source::ByteSource,
};

bitfield! {
    pub struct DyldChainedPtrArm64eRebaseBF(u64);
    impl Debug;
    pub target, _: 42, 0;
    pub high8, _: 50, 43;
    pub next, _: 61, 51;
    pub bind, _: 62;
    pub auth, _: 63;
}

bitfield! {
    pub struct DyldChainedPtrArm64eBindBF(u64);
    impl Debug;
    pub ordinal, _: 15, 0;
    pub addend, _: 50, 32;
    pub next, _: 61, 51;
}

bitfield! {
    pub struct DyldChainedPtrArm64eAuthRebaseBF(u64);
    impl Debug;
    pub target, _: 31, 0;
    pub diversity, _: 47, 32;
    pub addr_div, _: 48;
    pub key, _: 50, 49;
    pub next, _: 61, 51;
}

bitfield! {
    pub struct DyldChainedPtrArm64eBind24BF(u64);
    impl Debug;
    pub ordinal, _: 23, 0;
    pub addend, _: 50, 32;
    pub next, _: 61, 51;
}

bitfield! {
    pub struct DyldChainedPtrArm64eRebase24BF(u64);
    impl Debug;
    pub target, _: 23, 0;
    pub high8, _: 31, 24;
    pub next, _: 61, 51;
}

bitfield! {
    pub struct DyldChainedPtr64RebaseBF(u64);
    impl Debug;
    pub target, _: 35, 0;
    pub high8, _: 43, 36;
    pub next, _: 62, 51;
    pub bind, _: 63;
}

bitfield! {
    pub struct DyldChainedPtr64BindBF(u64);
    impl Debug;
    pub ordinal, _: 23, 0;
    pub addend, _: 31, 24;
    pub next, _: 62, 51;
}

bitfield! {
    pub struct DyldChainedPtr64KernelCacheRebaseBF(u64);
    impl Debug;
    pub target, _: 29, 0;
    pub next, _: 62, 51;
}

bitfield! {
    pub struct DyldChainedPtr32RebaseBF(u32);
    impl Debug;
    pub target, _: 25, 0;
    pub next, _: 30, 26;
    pub bind, _: 31;
}

bitfield! {
    pub struct DyldChainedPtr32BindBF(u32);
    impl Debug;
    pub ordinal, _: 19, 0;
    pub addend, _: 25, 20;
    pub next, _: 30, 26;
}

/// One decoded chained fixup slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainedPointer {
    /// `target` is either a vm address or an offset from the image base.
    Rebase { target: u64, relative: bool },
    Bind { ordinal: u32, addend: i64 },
}

impl ChainedPointer {
    /// Decodes a raw slot, returning the fixup and the distance in bytes to
    /// the next slot of the chain (0 ends the chain).
    pub fn decode(raw: u64, format: DyldPointerFormat) -> Option<(ChainedPointer, u64)> {
        let stride = format.stride();
        let decoded = match format {
            DyldPointerFormat::Arm64e
            | DyldPointerFormat::Arm64eUserland
            | DyldPointerFormat::Arm64eKernel
            | DyldPointerFormat::Arm64eFirmware => {
                let rebase = DyldChainedPtrArm64eRebaseBF(raw);
                let next = rebase.next() * stride;
                match (rebase.bind(), rebase.auth()) {
                    (true, _) => {
                        let bind = DyldChainedPtrArm64eBindBF(raw);
                        let ordinal = bind.ordinal() as u32;
                        let addend = if rebase.auth() { 0 } else { sign_extend(bind.addend(), 19) };
                        (ChainedPointer::Bind { ordinal, addend }, next)
                    }
                    (false, true) => {
                        let auth = DyldChainedPtrArm64eAuthRebaseBF(raw);
                        let target = auth.target();
                        (ChainedPointer::Rebase { target, relative: true }, next)
                    }
                    (false, false) => (
                        ChainedPointer::Rebase {
                            target: rebase.target(),
                            relative: format != DyldPointerFormat::Arm64e,
                        },
                        next,
                    ),
                }
            }
            DyldPointerFormat::Arm64eUserland24 => {
                let rebase = DyldChainedPtrArm64eRebaseBF(raw);
                let next = rebase.next() * stride;
                match (rebase.bind(), rebase.auth()) {
                    (true, auth) => {
                        let bind = DyldChainedPtrArm64eBind24BF(raw);
                        let addend = if auth { 0 } else { sign_extend(bind.addend(), 19) };
                        let ordinal = bind.ordinal() as u32;
                        (ChainedPointer::Bind { ordinal, addend }, next)
                    }
                    (false, true) => {
                        let target = DyldChainedPtrArm64eAuthRebaseBF(raw).target() & 0xff_ffff;
                        (ChainedPointer::Rebase { target, relative: true }, next)
                    }
                    (false, false) => {
                        let target = DyldChainedPtrArm64eRebase24BF(raw).target();
                        (ChainedPointer::Rebase { target, relative: true }, next)
                    }
                }
            }
            DyldPointerFormat::Ptr64 | DyldPointerFormat::Ptr64Offset => {
                let rebase = DyldChainedPtr64RebaseBF(raw);
                let next = rebase.next() * stride;
                if rebase.bind() {
                    let bind = DyldChainedPtr64BindBF(raw);
                    let ordinal = bind.ordinal() as u32;
                    (ChainedPointer::Bind { ordinal, addend: bind.addend() as i64 }, next)
                } else {
                    let relative = format == DyldPointerFormat::Ptr64Offset;
                    (ChainedPointer::Rebase { target: rebase.target(), relative }, next)
                }
            }
            DyldPointerFormat::Ptr64KernelCache | DyldPointerFormat::X86_64KernelCache => {
                let rebase = DyldChainedPtr64KernelCacheRebaseBF(raw);
                let next = rebase.next() * stride;
                (ChainedPointer::Rebase { target: rebase.target(), relative: true }, next)
            }
            DyldPointerFormat::Ptr32 | DyldPointerFormat::Ptr32Cache | DyldPointerFormat::Ptr32Firmware => {
                let rebase = DyldChainedPtr32RebaseBF(raw as u32);
                let next = rebase.next() as u64 * stride;
                if format == DyldPointerFormat::Ptr32 && rebase.bind() {
                    let bind = DyldChainedPtr32BindBF(raw as u32);
                    let ordinal = bind.ordinal();
                    (ChainedPointer::Bind { ordinal, addend: bind.addend() as i64 }, next)
                } else {
                    let target = rebase.target() as u64;
                    (ChainedPointer::Rebase { target, relative: false }, next)
                }
            }
            DyldPointerFormat::Arm64eSharedCache => return None,
        };
        Some(decoded)
    }
}

fn sign_extend(value: u64, bits: u32) -> i64 {
    let shift = 64 - bits;
    ((value << shift) as i64) >> shift
}

/// What a pointer slot holds once fixups are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageValue {
    Null,
    Value(u64),
    Bind(String),
}

impl ImageValue {
    pub fn address(&self) -> Option<u64> {
        match self {
            ImageValue::Value(addr) => Some(*addr),
            _ => None,
        }
    }
}

/// Per-image pointer resolution: chained fixups and classic binds keyed by
/// the vm address of the slot they apply to.
#[derive(Debug, Default, Clone)]
pub struct Fixups {
    slots: HashMap<u64, ImageValue>,
    image_base: u64,
    strip_pac: bool,
}

impl Fixups {
    const ARM64E_TARGET_MASK: u64 = (1 << 43) - 1;
    const ARM64E_AUTH_BIT: u64 = 1 << 63;

    pub fn build(
        source: &ByteSource,
        segments: &[SegmentCommand],
        commands: &[LoadCommand],
        arch: &Architecture,
    ) -> Fixups {
        let image_base = segments
            .iter()
            .find(|seg| seg.fileoff == 0 && seg.filesize > 0)
            .map(|seg| seg.vmaddr)
            .unwrap_or(0);

        let mut fixups = Fixups {
            slots: HashMap::new(),
            image_base,
            strip_pac: false,
        };

        let mut chained = false;
        for command in commands {
            match command {
                LoadCommand::DyldChainedFixups(cmd) => {
                    chained = true;
                    let blob = match source.slice(cmd.dataoff as u64, cmd.datasize as u64) {
                        Ok(blob) => blob,
                        Err(err) => {
                            warn!(%err, "chained fixups blob out of bounds");
                            continue;
                        }
                    };
                    match DyldChainedFixups::parse(blob, source.endian()) {
                        Ok((_, parsed)) => fixups.apply_chains(source, segments, &parsed),
                        Err(err) => warn!(%err, "unable to parse chained fixups"),
                    }
                }
                LoadCommand::DyldInfo(cmd) => {
                    for (off, size) in cmd.bind_streams() {
                        if size == 0 {
                            continue;
                        }
                        let Ok(stream) = source.slice(off as u64, size as u64) else {
                            warn!(off, size, "bind stream out of bounds");
                            continue;
                        };
                        match BindInstruction::parse(stream, arch.pointer_width) {
                            Ok((_, binds)) => fixups.apply_binds(segments, &binds),
                            Err(err) => warn!(%err, "unable to parse bind opcodes"),
                        }
                    }
                }
                _ => {}
            }
        }

        fixups.strip_pac = !chained && arch.is_arm64e();
        debug!(slots = fixups.slots.len(), image_base, "pointer fixups");
        fixups
    }

    fn apply_binds(&mut self, segments: &[SegmentCommand], binds: &[BindInstruction]) {
        for bind in binds {
            let Some(seg) = segments.get(bind.segment_index as usize) else {
                warn!(segment = bind.segment_index, "bind into a missing segment");
                continue;
            };
            let slot = seg.vmaddr.wrapping_add(bind.segment_offset);
            self.slots
                .insert(slot, ImageValue::Bind(bind.symbol_name.clone()));
        }
    }

    fn apply_chains(
        &mut self,
        source: &ByteSource,
        segments: &[SegmentCommand],
        parsed: &DyldChainedFixups,
    ) {
        for (index, starts) in &parsed.starts.seg_starts {
            let Some(seg) = segments.get(*index) else {
                warn!(segment = index, "chain starts for a missing segment");
                continue;
            };
            for (page, offset) in &starts.page_starts {
                let delta = *page as u64 * starts.page_size as u64 + *offset as u64;
                self.walk_chain(source, seg, starts, delta, parsed);
            }
        }
    }

    fn walk_chain(
        &mut self,
        source: &ByteSource,
        seg: &SegmentCommand,
        starts: &DyldStartsInSegment,
        mut delta: u64,
        parsed: &DyldChainedFixups,
    ) {
        let format = starts.pointer_format;
        loop {
            let width = if format.is_32() { 4 } else { 8 };
            let raw = match source.read_word(seg.fileoff + delta, width) {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(%err, segment = %seg.segname, "chain runs out of the file");
                    return;
                }
            };
            let Some((pointer, next)) = ChainedPointer::decode(raw, format) else {
                warn!(?format, "unsupported chained pointer format");
                return;
            };

            let value = match pointer {
                ChainedPointer::Rebase { target, relative } if relative => {
                    ImageValue::Value(self.image_base.wrapping_add(target))
                }
                ChainedPointer::Rebase { target, .. } => ImageValue::Value(target),
                ChainedPointer::Bind { ordinal, .. } => match parsed.imports.get(ordinal as usize) {
                    Some(import) => ImageValue::Bind(import.name.clone()),
                    None => {
                        warn!(ordinal, "chained bind ordinal out of range");
                        ImageValue::Null
                    }
                },
            };
            self.slots.insert(seg.vmaddr + delta, value);

            if next == 0 {
                return;
            }
            delta += next;
        }
    }

    /// Resolves the raw contents of the pointer slot at `slot`.
    pub fn resolve(&self, slot: u64, raw: u64) -> ImageValue {
        if let Some(value) = self.slots.get(&slot) {
            return value.clone();
        }
        if raw == 0 {
            return ImageValue::Null;
        }
        if self.strip_pac && raw > Self::ARM64E_TARGET_MASK {
            if raw & Self::ARM64E_AUTH_BIT != 0 {
                return ImageValue::Value(self.image_base.wrapping_add(raw & 0xffff_ffff));
            }
            return ImageValue::Value(raw & Self::ARM64E_TARGET_MASK);
        }
        ImageValue::Value(raw)
    }

    pub fn image_base(&self) -> u64 {
        self.image_base
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
