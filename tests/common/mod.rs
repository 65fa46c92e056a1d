//! Builds small synthetic Mach-O images carrying Objective-C metadata.
#![allow(dead_code)]

const TEXT_OFF: u64 = 0x1000;
const RECORDS_OFF: u64 = 0x4000;
const RECORDS_CAP: u64 = 0x4000;
const LISTS_OFF: u64 = 0x8000;
const LIST_CAP: u64 = 0x400;
const TAIL_OFF: u64 = 0x9000;
const LINKEDIT_OFF: u64 = 0xa000;
const CHAIN_PAGE: u64 = 0x4000;
const DATA_SIZE: u64 = 0x6000;

pub const CPU_X86_64: u32 = 0x0100_0007;
pub const CPU_I386: u32 = 7;
pub const CPU_ARM64: u32 = 0x0100_000c;

/// Where a class or category points for its superclass or target class.
#[derive(Debug, Clone, Copy)]
pub enum ClassTarget<'s> {
    None,
    Local(u64),
    External(&'s str),
}

pub struct Ivar<'s> {
    pub name: &'s str,
    pub encoding: &'s str,
    pub offset: u32,
    pub size: u32,
}

#[derive(Default)]
pub struct ClassDef<'s> {
    pub ivars: Vec<Ivar<'s>>,
    pub instance_methods: Vec<(&'s str, &'s str)>,
    pub class_methods: Vec<(&'s str, &'s str)>,
    pub properties: Vec<(&'s str, &'s str)>,
    pub protocols: Vec<u64>,
    pub root: bool,
    /// Replaces `instance_methods` with an already built list.
    pub method_list: Option<u64>,
}

pub struct ImageBuilder {
    cputype: u32,
    cpusubtype: u32,
    is_64: bool,
    base: u64,
    text: Vec<u8>,
    records: Vec<u8>,
    classlist: Vec<u8>,
    protolist: Vec<u8>,
    catlist: Vec<u8>,
    tail: Vec<u8>,
    imageinfo: Option<(u32, u32)>,
    binds: Vec<(u64, String)>,
    moved_sections: Vec<(String, u64)>,
    encryption: Option<(u32, u32)>,
    chained: bool,
}

enum ChainedFixup {
    Rebase(u64),
    Bind(u64),
}

impl ImageBuilder {
    pub fn x86_64() -> Self {
        Self::new(CPU_X86_64, 3, true)
    }

    pub fn i386() -> Self {
        Self::new(CPU_I386, 3, false)
    }

    pub fn arm64() -> Self {
        Self::new(CPU_ARM64, 0, true)
    }

    pub fn new(cputype: u32, cpusubtype: u32, is_64: bool) -> Self {
        ImageBuilder {
            cputype,
            cpusubtype,
            is_64,
            base: if is_64 { 0x1_0000_0000 } else { 0x10_0000 },
            text: vec![],
            records: vec![],
            classlist: vec![],
            protolist: vec![],
            catlist: vec![],
            tail: vec![],
            imageinfo: None,
            binds: vec![],
            moved_sections: vec![],
            encryption: None,
            chained: false,
        }
    }

    pub fn width(&self) -> u64 {
        if self.is_64 {
            8
        } else {
            4
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    fn data_base(&self) -> u64 {
        self.base + RECORDS_OFF
    }

    fn word(&self, value: u64) -> Vec<u8> {
        if self.is_64 {
            value.to_le_bytes().to_vec()
        } else {
            (value as u32).to_le_bytes().to_vec()
        }
    }

    pub fn string(&mut self, s: &str) -> u64 {
        let address = self.base + TEXT_OFF + self.text.len() as u64;
        self.text.extend(s.as_bytes());
        self.text.push(0);
        address
    }

    /// Appends raw bytes to the record area and returns their address.
    pub fn alloc(&mut self, bytes: &[u8]) -> u64 {
        while self.records.len() % 8 != 0 {
            self.records.push(0);
        }
        let address = self.data_base() + self.records.len() as u64;
        self.records.extend(bytes);
        assert!((self.records.len() as u64) < RECORDS_CAP);
        address
    }

    /// Address of the next allocation.
    fn next_record(&self) -> u64 {
        let len = (self.records.len() as u64 + 7) & !7;
        self.data_base() + len
    }

    fn words(&self, values: &[u64]) -> Vec<u8> {
        values.iter().flat_map(|v| self.word(*v)).collect()
    }

    pub fn bind(&mut self, slot: u64, symbol: &str) {
        self.binds.push((slot, symbol.to_string()));
    }

    fn target(&mut self, slot: u64, target: ClassTarget) -> u64 {
        match target {
            ClassTarget::None => 0,
            ClassTarget::Local(address) => address,
            ClassTarget::External(name) => {
                self.bind(slot, &format!("_OBJC_CLASS_$_{name}"));
                0
            }
        }
    }

    pub fn method_list(&mut self, methods: &[(&str, &str)]) -> u64 {
        if methods.is_empty() {
            return 0;
        }
        let w = self.width();
        let mut bytes = vec![];
        bytes.extend((3 * w as u32).to_le_bytes());
        bytes.extend((methods.len() as u32).to_le_bytes());
        for (name, types) in methods {
            let name = self.string(name);
            let types = self.string(types);
            bytes.extend(self.words(&[name, types, 0]));
        }
        self.alloc(&bytes)
    }

    /// A method list of relative entries. Each name offset targets a
    /// selector reference, as in images linked for the shared cache.
    pub fn small_method_list(&mut self, methods: &[(&str, &str)]) -> u64 {
        let mut targets = vec![];
        for (name, types) in methods {
            let name = self.string(name);
            let selref = self.word(name);
            let selref = self.alloc(&selref);
            targets.push((selref, self.string(types)));
        }

        let list = self.next_record();
        let mut bytes = vec![];
        bytes.extend((12u32 | 0x8000_0000).to_le_bytes());
        bytes.extend((methods.len() as u32).to_le_bytes());
        for (i, (selref, types)) in targets.into_iter().enumerate() {
            let entry = list + 8 + i as u64 * 12;
            let relative = |target: u64, field: u64| (target as i64 - (entry + field) as i64) as i32;
            bytes.extend(relative(selref, 0).to_le_bytes());
            bytes.extend(relative(types, 4).to_le_bytes());
            bytes.extend(0i32.to_le_bytes());
        }
        assert_eq!(self.alloc(&bytes), list);
        list
    }

    /// A method list that declares `declared` entries but is the last thing
    /// in its section, so only `methods.len()` of them are mapped.
    pub fn truncated_method_list(&mut self, methods: &[(&str, &str)], declared: u32) -> u64 {
        assert!(self.tail.is_empty());
        let w = self.width();
        let mut bytes = vec![];
        bytes.extend((3 * w as u32).to_le_bytes());
        bytes.extend(declared.to_le_bytes());
        for (name, types) in methods {
            let name = self.string(name);
            let types = self.string(types);
            bytes.extend(self.words(&[name, types, 0]));
        }
        self.tail = bytes;
        self.base + TAIL_OFF
    }

    pub fn property_list(&mut self, properties: &[(&str, &str)]) -> u64 {
        if properties.is_empty() {
            return 0;
        }
        let w = self.width();
        let mut bytes = vec![];
        bytes.extend((2 * w as u32).to_le_bytes());
        bytes.extend((properties.len() as u32).to_le_bytes());
        for (name, attributes) in properties {
            let name = self.string(name);
            let attributes = self.string(attributes);
            bytes.extend(self.words(&[name, attributes]));
        }
        self.alloc(&bytes)
    }

    pub fn ivar_list(&mut self, ivars: &[Ivar]) -> u64 {
        if ivars.is_empty() {
            return 0;
        }
        let w = self.width();
        let offsets: Vec<u64> = ivars
            .iter()
            .map(|ivar| self.alloc(&ivar.offset.to_le_bytes()))
            .collect();
        let mut bytes = vec![];
        bytes.extend((3 * w as u32 + 8).to_le_bytes());
        bytes.extend((ivars.len() as u32).to_le_bytes());
        for (ivar, offset) in ivars.iter().zip(offsets) {
            let name = self.string(ivar.name);
            let types = self.string(ivar.encoding);
            bytes.extend(self.words(&[offset, name, types]));
            bytes.extend(2u32.to_le_bytes());
            bytes.extend(ivar.size.to_le_bytes());
        }
        self.alloc(&bytes)
    }

    pub fn protocol_list(&mut self, protocols: &[u64]) -> u64 {
        if protocols.is_empty() {
            return 0;
        }
        let mut values = vec![protocols.len() as u64];
        values.extend(protocols);
        let bytes = self.words(&values);
        self.alloc(&bytes)
    }

    /// A `protocol_t` with required and optional instance methods.
    pub fn protocol(
        &mut self,
        name: &str,
        adopted: &[u64],
        required: &[(&str, &str)],
        optional: &[(&str, &str)],
    ) -> u64 {
        self.protocol_with_types(name, adopted, required, optional, None)
    }

    /// An array of pointers to type strings, the layout of a protocol's
    /// extended method types.
    pub fn extended_types(&mut self, types: &[&str]) -> u64 {
        let strings: Vec<u64> = types.iter().map(|types| self.string(types)).collect();
        let bytes = self.words(&strings);
        self.alloc(&bytes)
    }

    /// Like [`ImageBuilder::protocol`]; with `extended` the record's size
    /// covers the extended method types pointer.
    pub fn protocol_with_types(
        &mut self,
        name: &str,
        adopted: &[u64],
        required: &[(&str, &str)],
        optional: &[(&str, &str)],
        extended: Option<u64>,
    ) -> u64 {
        let w = self.width();
        let name = self.string(name);
        let protocols = self.protocol_list(adopted);
        let required = self.method_list(required);
        let optional = self.method_list(optional);
        let mut bytes = self.words(&[0, name, protocols, required, 0, optional, 0, 0]);
        let size = if extended.is_some() { 9 * w + 8 } else { 8 * w + 8 };
        bytes.extend((size as u32).to_le_bytes());
        bytes.extend(0u32.to_le_bytes());
        if let Some(extended) = extended {
            bytes.extend(self.word(extended));
        }
        self.alloc(&bytes)
    }

    fn class_ro(
        &mut self,
        flags: u32,
        name: u64,
        methods: u64,
        protocols: u64,
        ivars: u64,
        properties: u64,
        instance_size: u32,
    ) -> u64 {
        let mut bytes = vec![];
        bytes.extend(flags.to_le_bytes());
        bytes.extend((self.width() as u32).to_le_bytes());
        bytes.extend(instance_size.to_le_bytes());
        if self.is_64 {
            bytes.extend(0u32.to_le_bytes());
        }
        bytes.extend(self.words(&[0, name, methods, protocols, ivars, 0, properties]));
        self.alloc(&bytes)
    }

    /// A class and its metaclass; returns the class address.
    pub fn class(&mut self, name: &str, superclass: ClassTarget, def: ClassDef) -> u64 {
        let root = if def.root { 1 << 1 } else { 0 };
        let name_addr = self.string(name);

        let class_methods = self.method_list(&def.class_methods);
        let meta_ro = self.class_ro(1 | root, name_addr, class_methods, 0, 0, 0, 40);
        let meta_address = self.next_record();
        let meta = self.words(&[0, 0, 0, 0, meta_ro]);
        self.alloc(&meta);

        let methods = match def.method_list {
            Some(list) => list,
            None => self.method_list(&def.instance_methods),
        };
        let protocols = self.protocol_list(&def.protocols);
        let ivars = self.ivar_list(&def.ivars);
        let properties = self.property_list(&def.properties);
        let size = def.ivars.iter().map(|i| i.offset + i.size).max().unwrap_or(8);
        let ro = self.class_ro(root, name_addr, methods, protocols, ivars, properties, size);

        let w = self.width();
        let address = self.next_record();
        let superclass = self.target(address + w, superclass);
        let class = self.words(&[meta_address, superclass, 0, 0, ro]);
        self.alloc(&class);
        address
    }

    pub fn category(
        &mut self,
        name: &str,
        class: ClassTarget,
        instance_methods: &[(&str, &str)],
        protocols: &[u64],
    ) -> u64 {
        let w = self.width();
        let name = self.string(name);
        let methods = self.method_list(instance_methods);
        let protocols = self.protocol_list(protocols);
        let address = self.next_record();
        let class = self.target(address + w, class);
        let bytes = self.words(&[name, class, methods, 0, protocols, 0]);
        self.alloc(&bytes);
        address
    }

    pub fn push_class(&mut self, address: u64) {
        let word = self.word(address);
        self.classlist.extend(word);
    }

    pub fn push_protocol(&mut self, address: u64) {
        let word = self.word(address);
        self.protolist.extend(word);
    }

    pub fn push_category(&mut self, address: u64) {
        let word = self.word(address);
        self.catlist.extend(word);
    }

    /// Adds a stray byte to the class list so its size is not a pointer multiple.
    pub fn misalign_classlist(&mut self) {
        self.classlist.push(0);
    }

    /// Overrides the virtual address written for `sectname`; its file
    /// offset is unchanged.
    pub fn move_section(&mut self, sectname: &str, address: u64) {
        self.moved_sections.push((sectname.to_string(), address));
    }

    /// Adds an encryption info command covering the file range.
    pub fn encrypt(&mut self, offset: u64, size: u64) {
        self.encryption = Some((offset as u32, size as u32));
    }

    /// Emits binds and list entries as `DYLD_CHAINED_PTR_64_OFFSET` chains
    /// under `LC_DYLD_CHAINED_FIXUPS` instead of bind opcodes.
    pub fn chained_fixups(&mut self) {
        assert!(self.is_64);
        self.chained = true;
    }

    pub fn image_info(&mut self, version: u32, flags: u32) {
        self.imageinfo = Some((version, flags));
    }

    fn bind_stream(&self) -> Vec<u8> {
        let mut stream = vec![];
        for (slot, symbol) in &self.binds {
            stream.push(0x11);
            stream.push(0x40);
            stream.extend(symbol.as_bytes());
            stream.push(0);
            stream.push(0x51);
            stream.push(0x71);
            let mut offset = slot - self.data_base();
            loop {
                let byte = (offset & 0x7f) as u8;
                offset >>= 7;
                if offset == 0 {
                    stream.push(byte);
                    break;
                }
                stream.push(byte | 0x80);
            }
            stream.push(0x90);
        }
        stream.push(0x00);
        stream
    }

    pub fn build(&self) -> Vec<u8> {
        let base = self.base;
        let section = |sectname: &str, segname: &str, offset: u64, size: u64| {
            (sectname.to_string(), segname.to_string(), offset, size)
        };

        let text_sections = vec![section("__cstring", "__TEXT", TEXT_OFF, self.text.len() as u64)];
        let mut data_sections = vec![section(
            "__objc_const",
            "__DATA",
            RECORDS_OFF,
            self.records.len() as u64,
        )];
        let lists = [
            ("__objc_classlist", &self.classlist),
            ("__objc_protolist", &self.protolist),
            ("__objc_catlist", &self.catlist),
        ];
        for (i, (name, list)) in lists.iter().enumerate() {
            if !list.is_empty() {
                let offset = LISTS_OFF + i as u64 * LIST_CAP;
                data_sections.push(section(name, "__DATA", offset, list.len() as u64));
            }
        }
        if self.imageinfo.is_some() {
            data_sections.push(section("__objc_imageinfo", "__DATA", LISTS_OFF + 3 * LIST_CAP, 8));
        }
        if !self.tail.is_empty() {
            data_sections.push(section("__objc_tail", "__DATA", TAIL_OFF, self.tail.len() as u64));
        }

        let (chain_words, linkedit) = if self.chained {
            self.chains()
        } else if self.binds.is_empty() {
            (vec![], vec![])
        } else {
            (vec![], self.bind_stream())
        };

        let mut commands: Vec<Vec<u8>> = vec![
            self.segment("__TEXT", base, 0x4000, 0, 0x4000, &text_sections),
            self.segment(
                "__DATA",
                base + RECORDS_OFF,
                DATA_SIZE,
                RECORDS_OFF,
                DATA_SIZE,
                &data_sections,
            ),
        ];
        if !linkedit.is_empty() {
            commands.push(self.segment(
                "__LINKEDIT",
                base + LINKEDIT_OFF,
                0x1000,
                LINKEDIT_OFF,
                linkedit.len() as u64,
                &[],
            ));
            let words: Vec<u32> = if self.chained {
                vec![0x8000_0034, 16, LINKEDIT_OFF as u32, linkedit.len() as u32]
            } else {
                vec![0x8000_0022, 48, 0, 0, LINKEDIT_OFF as u32, linkedit.len() as u32, 0, 0, 0, 0, 0, 0]
            };
            commands.push(words.iter().flat_map(|w| w.to_le_bytes()).collect());
        }
        if let Some((cryptoff, cryptsize)) = self.encryption {
            let words: Vec<u32> = if self.is_64 {
                vec![0x2c, 24, cryptoff, cryptsize, 1, 0]
            } else {
                vec![0x21, 20, cryptoff, cryptsize, 1]
            };
            commands.push(words.iter().flat_map(|w| w.to_le_bytes()).collect());
        }

        let sizeofcmds: usize = commands.iter().map(Vec::len).sum();
        let mut out = vec![];
        let magic: u32 = if self.is_64 { 0xfeed_facf } else { 0xfeed_face };
        for word in [
            magic,
            self.cputype,
            self.cpusubtype,
            6,
            commands.len() as u32,
            sizeofcmds as u32,
            0,
        ] {
            out.extend(word.to_le_bytes());
        }
        if self.is_64 {
            out.extend(0u32.to_le_bytes());
        }
        for cmd in commands {
            out.extend(cmd);
        }
        assert!(out.len() as u64 <= TEXT_OFF);

        let mut place = |offset: u64, bytes: &[u8]| {
            let end = offset as usize + bytes.len();
            if out.len() < end {
                out.resize(end, 0);
            }
            out[offset as usize..end].copy_from_slice(bytes);
        };
        place(TEXT_OFF, &self.text);
        place(RECORDS_OFF, &self.records);
        for (i, (_, list)) in lists.iter().enumerate() {
            place(LISTS_OFF + i as u64 * LIST_CAP, list);
        }
        if let Some((version, flags)) = self.imageinfo {
            let mut info = version.to_le_bytes().to_vec();
            info.extend(flags.to_le_bytes());
            place(LISTS_OFF + 3 * LIST_CAP, &info);
        }
        place(TAIL_OFF, &self.tail);
        for (offset, raw) in chain_words {
            place(offset, &raw.to_le_bytes());
        }
        place(LINKEDIT_OFF, &linkedit);
        if out.len() < LINKEDIT_OFF as usize {
            out.resize(LINKEDIT_OFF as usize, 0);
        }
        out
    }

    /// Chained slot contents keyed by file offset, and the fixups blob.
    fn chains(&self) -> (Vec<(u64, u64)>, Vec<u8>) {
        let mut imports: Vec<&str> = vec![];
        let mut fixups = vec![];
        for (slot, symbol) in &self.binds {
            let ordinal = match imports.iter().position(|name| *name == symbol.as_str()) {
                Some(ordinal) => ordinal,
                None => {
                    imports.push(symbol);
                    imports.len() - 1
                }
            };
            fixups.push((slot - self.base, ChainedFixup::Bind(ordinal as u64)));
        }
        let lists = [&self.classlist, &self.protolist, &self.catlist];
        for (i, list) in lists.iter().enumerate() {
            for (j, entry) in list.chunks_exact(8).enumerate() {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(entry);
                let target = u64::from_le_bytes(raw).wrapping_sub(self.base) & ((1 << 36) - 1);
                let offset = LISTS_OFF + i as u64 * LIST_CAP + j as u64 * 8;
                fixups.push((offset, ChainedFixup::Rebase(target)));
            }
        }
        fixups.sort_by_key(|(offset, _)| *offset);

        let page_count = DATA_SIZE.div_ceil(CHAIN_PAGE) as usize;
        let mut page_starts = vec![0xffffu16; page_count];
        let mut words = vec![];
        for (i, (offset, fixup)) in fixups.iter().enumerate() {
            let in_segment = offset - RECORDS_OFF;
            let page = in_segment / CHAIN_PAGE;
            if page_starts[page as usize] == 0xffff {
                page_starts[page as usize] = (in_segment % CHAIN_PAGE) as u16;
            }
            let next = match fixups.get(i + 1) {
                Some((following, _)) if (following - RECORDS_OFF) / CHAIN_PAGE == page => {
                    (following - offset) / 4
                }
                _ => 0,
            };
            let raw = match fixup {
                ChainedFixup::Rebase(target) => target | (next << 51),
                ChainedFixup::Bind(ordinal) => ordinal | (next << 51) | (1 << 63),
            };
            words.push((*offset, raw));
        }

        // starts_in_image for __TEXT, __DATA and __LINKEDIT, then __DATA's starts.
        let mut starts = vec![];
        for word in [3u32, 0, 16, 0] {
            starts.extend(word.to_le_bytes());
        }
        starts.extend((22 + 2 * page_count as u32).to_le_bytes());
        starts.extend((CHAIN_PAGE as u16).to_le_bytes());
        starts.extend(6u16.to_le_bytes());
        starts.extend(RECORDS_OFF.to_le_bytes());
        starts.extend(0u32.to_le_bytes());
        starts.extend((page_count as u16).to_le_bytes());
        for start in page_starts {
            starts.extend(start.to_le_bytes());
        }
        while starts.len() % 4 != 0 {
            starts.push(0);
        }

        let mut import_table = vec![];
        let mut symbols = vec![];
        for name in &imports {
            import_table.extend((1u32 | ((symbols.len() as u32) << 9)).to_le_bytes());
            symbols.extend(name.as_bytes());
            symbols.push(0);
        }

        let imports_offset = 0x20 + starts.len() as u32;
        let symbols_offset = imports_offset + import_table.len() as u32;
        let mut blob = vec![];
        for word in [0, 0x20, imports_offset, symbols_offset, imports.len() as u32, 1, 0] {
            blob.extend(word.to_le_bytes());
        }
        blob.resize(0x20, 0);
        blob.extend(starts);
        blob.extend(import_table);
        blob.extend(symbols);
        (words, blob)
    }

    fn segment(
        &self,
        name: &str,
        vmaddr: u64,
        vmsize: u64,
        fileoff: u64,
        filesize: u64,
        sections: &[(String, String, u64, u64)],
    ) -> Vec<u8> {
        let mut cmd = vec![];
        let (cmd_id, header, sect_size) = if self.is_64 {
            (0x19u32, 72, 80)
        } else {
            (0x1u32, 56, 68)
        };
        cmd.extend(cmd_id.to_le_bytes());
        cmd.extend(((header + sect_size * sections.len()) as u32).to_le_bytes());
        cmd.extend(fixed(name));
        cmd.extend(self.word(vmaddr));
        cmd.extend(self.word(vmsize));
        cmd.extend(self.word(fileoff));
        cmd.extend(self.word(filesize));
        for word in [7u32, 3, sections.len() as u32, 0] {
            cmd.extend(word.to_le_bytes());
        }
        for (sectname, segname, offset, size) in sections {
            cmd.extend(fixed(sectname));
            cmd.extend(fixed(segname));
            let address = self
                .moved_sections
                .iter()
                .find(|(name, _)| name == sectname)
                .map_or(self.base + offset, |(_, address)| *address);
            cmd.extend(self.word(address));
            cmd.extend(self.word(*size));
            for word in [*offset as u32, 3, 0, 0, 0, 0, 0] {
                cmd.extend(word.to_le_bytes());
            }
            if self.is_64 {
                cmd.extend(0u32.to_le_bytes());
            }
        }
        cmd
    }
}

fn fixed(name: &str) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[..name.len()].copy_from_slice(name.as_bytes());
    out
}

/// Wraps thin images in a fat file, one slice per 0x10000 bytes.
pub fn fat(slices: &[(u32, u32, Vec<u8>)]) -> Vec<u8> {
    const ALIGN: u64 = 0x10000;
    let mut out = vec![];
    out.extend(0xcafe_babeu32.to_be_bytes());
    out.extend((slices.len() as u32).to_be_bytes());
    let mut offset = ALIGN;
    for (cputype, cpusubtype, bytes) in slices {
        for word in [*cputype, *cpusubtype, offset as u32, bytes.len() as u32, 16] {
            out.extend(word.to_be_bytes());
        }
        offset += (bytes.len() as u64).div_ceil(ALIGN) * ALIGN;
    }
    let mut offset = ALIGN;
    for (_, _, bytes) in slices {
        out.resize(offset as usize, 0);
        out.extend(bytes);
        offset += (bytes.len() as u64).div_ceil(ALIGN) * ALIGN;
    }
    out
}

/// The common `Foo : NSObject` image: one ivar and one instance method.
pub fn foo_image(builder: &mut ImageBuilder) -> u64 {
    builder.image_info(0, 0);
    let def = ClassDef {
        ivars: vec![Ivar {
            name: "x",
            encoding: "i",
            offset: 8,
            size: 4,
        }],
        instance_methods: vec![("bar", "v16@0:8")],
        ..Default::default()
    };
    let foo = builder.class("Foo", ClassTarget::External("NSObject"), def);
    builder.push_class(foo);
    foo
}
