use std::{collections::HashMap, fmt};

use thiserror::Error;
use uuid::Uuid;

use crate::{
    macho::MachOErr,
    machine::Architecture,
    types::{MalformedEncoding, TypeNode},
};

bitflags::bitflags! {
    /// `class_ro_t::flags`.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ClassRoFlags: u32 {
        const META = 1 << 0;
        const ROOT = 1 << 1;
        const HAS_CXX_STRUCTORS = 1 << 2;
        const HIDDEN = 1 << 4;
        const EXCEPTION = 1 << 5;
        const HAS_SWIFT_INITIALIZER = 1 << 6;
        const IS_ARC = 1 << 7;
        const HAS_CXX_DTOR_ONLY = 1 << 8;
        const HAS_WEAK_WITHOUT_ARC = 1 << 9;
        const FORBIDS_ASSOCIATED_OBJECTS = 1 << 10;
        const FROM_BUNDLE = 1 << 29;
        const FUTURE = 1 << 30;
        const REALIZED = 1 << 31;
    }
}

bitflags::bitflags! {
    /// `objc_image_info::flags`; the Swift version bytes are kept apart.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ImageInfoFlags: u32 {
        const IS_REPLACEMENT = 1 << 0;
        const SUPPORTS_GC = 1 << 1;
        const REQUIRES_GC = 1 << 2;
        const OPTIMIZED_BY_DYLD = 1 << 3;
        const CORRECTED_SYNTHESIZE = 1 << 4;
        const IS_SIMULATED = 1 << 5;
        const HAS_CATEGORY_CLASS_PROPERTIES = 1 << 6;
        const OPTIMIZED_BY_DYLD_CLOSURE = 1 << 7;
    }
}

bitflags::bitflags! {
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct PropertyFlags: u32 {
        const READONLY = 1 << 0;
        const NONATOMIC = 1 << 1;
        const COPY = 1 << 2;
        const RETAIN = 1 << 3;
        const WEAK = 1 << 4;
        const DYNAMIC = 1 << 5;
        const CLASS = 1 << 6;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub version: u32,
    pub raw_flags: u32,
}

impl ImageInfo {
    pub fn flags(&self) -> ImageInfoFlags {
        ImageInfoFlags::from_bits_truncate(self.raw_flags)
    }

    pub fn swift_stable_version(&self) -> u32 {
        self.raw_flags >> 16
    }

    pub fn swift_unstable_version(&self) -> u32 {
        (self.raw_flags >> 8) & 0xff
    }

    pub fn has_swift(&self) -> bool {
        self.swift_stable_version() != 0 || self.swift_unstable_version() != 0
    }

    pub fn has_category_class_properties(&self) -> bool {
        self.flags()
            .contains(ImageInfoFlags::HAS_CATEGORY_CLASS_PROPERTIES)
    }
}

/// What happens to a nested list whose entries run past mapped memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum_macros::Display)]
pub enum ListPolicy {
    /// Keep the entries read before the truncation point.
    #[default]
    #[strum(serialize = "salvaged")]
    Salvage,
    /// Drop the whole list.
    #[strum(serialize = "dropped")]
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum MethodScope {
    #[strum(serialize = "class")]
    Class,
    #[strum(serialize = "instance")]
    Instance,
}

impl MethodScope {
    pub fn of(is_class: bool) -> Self {
        if is_class {
            MethodScope::Class
        } else {
            MethodScope::Instance
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiagnosticKind {
    #[error(transparent)]
    Image(#[from] MachOErr),
    #[error("{list} list declares {declared} entries but only {readable} are mapped ({policy})")]
    TruncatedList {
        list: &'static str,
        declared: u32,
        readable: u32,
        policy: ListPolicy,
    },
    #[error("{list} list entry size {entsize} is too small")]
    BadEntrySize { list: &'static str, entsize: u32 },
    #[error("duplicate {scope} method {selector}; later definition dropped")]
    DuplicateSelector {
        selector: String,
        scope: MethodScope,
    },
    #[error(transparent)]
    Encoding(#[from] MalformedEncoding),
    #[error("ivar {name} at offset {offset} is below the previous ivar offset {previous}")]
    IvarOrder {
        name: String,
        offset: u64,
        previous: u64,
    },
    #[error("invalid record at {address:#x}: {reason}")]
    InvalidRecord { address: u64, reason: String },
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// A soft failure; the entity it was recorded on is still rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub address: Option<u64>,
    pub kind: DiagnosticKind,
}

impl Diagnostic {
    pub fn new(address: Option<u64>, kind: impl Into<DiagnosticKind>) -> Self {
        Diagnostic {
            address,
            kind: kind.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassRef {
    Root,
    Named(String),
    Unresolved(Option<u64>),
}

impl ClassRef {
    pub fn name(&self) -> Option<&str> {
        match self {
            ClassRef::Named(name) => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ivar {
    pub name: String,
    pub ty: TypeNode,
    pub encoding: String,
    pub offset: u64,
    pub size: u32,
    pub alignment: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub ty: TypeNode,
    pub attributes_raw: String,
    pub flags: PropertyFlags,
    pub getter: Option<String>,
    pub setter: Option<String>,
    pub ivar: Option<String>,
}

impl Property {
    pub fn is_class(&self) -> bool {
        self.flags.contains(PropertyFlags::CLASS)
    }

    pub fn getter_name(&self) -> String {
        self.getter.clone().unwrap_or_else(|| self.name.clone())
    }

    /// `None` for readonly properties.
    pub fn setter_name(&self) -> Option<String> {
        if self.flags.contains(PropertyFlags::READONLY) {
            return None;
        }
        Some(self.setter.clone().unwrap_or_else(|| {
            let mut chars = self.name.chars();
            match chars.next() {
                Some(first) => format!("set{}{}:", first.to_uppercase(), chars.as_str()),
                None => "set:".to_string(),
            }
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    pub selector: String,
    pub return_type: TypeNode,
    /// Explicit arguments, `self` and `_cmd` excluded.
    pub arg_types: Vec<TypeNode>,
    pub is_class: bool,
    pub encoding: String,
    pub imp: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Protocol {
    pub name: String,
    pub address: u64,
    pub protocols: Vec<String>,
    pub class_methods: Vec<Method>,
    pub instance_methods: Vec<Method>,
    pub optional_class_methods: Vec<Method>,
    pub optional_instance_methods: Vec<Method>,
    pub properties: Vec<Property>,
    pub diagnostics: Vec<Diagnostic>,
    pub complete: bool,
    pub placeholder: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub name: String,
    pub address: u64,
    pub class: ClassRef,
    pub protocols: Vec<String>,
    pub instance_methods: Vec<Method>,
    pub class_methods: Vec<Method>,
    pub properties: Vec<Property>,
    pub diagnostics: Vec<Diagnostic>,
    pub placeholder: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjCClass {
    pub name: String,
    pub address: u64,
    pub superclass: ClassRef,
    pub instance_start: u32,
    pub instance_size: u32,
    pub flags: ClassRoFlags,
    pub ivars: Vec<Ivar>,
    pub instance_methods: Vec<Method>,
    pub class_methods: Vec<Method>,
    pub properties: Vec<Property>,
    pub protocols: Vec<String>,
    pub is_swift: bool,
    pub placeholder: bool,
    pub diagnostics: Vec<Diagnostic>,
}

pub(crate) fn placeholder_name(address: u64) -> String {
    format!("<invalid record at {address:#x}>")
}

impl ObjCClass {
    pub(crate) fn placeholder(address: u64, diagnostic: Diagnostic) -> Self {
        ObjCClass {
            name: placeholder_name(address),
            address,
            superclass: ClassRef::Unresolved(None),
            instance_start: 0,
            instance_size: 0,
            flags: ClassRoFlags::empty(),
            ivars: vec![],
            instance_methods: vec![],
            class_methods: vec![],
            properties: vec![],
            protocols: vec![],
            is_swift: false,
            placeholder: true,
            diagnostics: vec![diagnostic],
        }
    }
}

impl Category {
    pub(crate) fn placeholder(address: u64, diagnostic: Diagnostic) -> Self {
        Category {
            name: placeholder_name(address),
            address,
            class: ClassRef::Unresolved(None),
            protocols: vec![],
            instance_methods: vec![],
            class_methods: vec![],
            properties: vec![],
            diagnostics: vec![diagnostic],
            placeholder: true,
        }
    }
}

impl Protocol {
    pub(crate) fn placeholder(address: u64, diagnostic: Diagnostic) -> Self {
        Protocol {
            name: placeholder_name(address),
            address,
            diagnostics: vec![diagnostic],
            placeholder: true,
            ..Default::default()
        }
    }
}

/// Identifying load commands of the image, shown in the emitted header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageIdentity {
    pub uuid: Option<Uuid>,
    pub install_name: Option<String>,
    pub current_version: Option<String>,
}

/// Everything recovered from one architecture slice. Built by the walker,
/// read-only afterwards.
#[derive(Debug, Clone)]
pub struct ObjectModel {
    arch: Architecture,
    identity: ImageIdentity,
    image_info: Option<ImageInfo>,
    classes: Vec<ObjCClass>,
    class_index: HashMap<String, usize>,
    categories: Vec<Category>,
    protocols: Vec<Protocol>,
    protocol_index: HashMap<String, usize>,
    diagnostics: Vec<Diagnostic>,
}

impl ObjectModel {
    pub(crate) fn new(arch: Architecture) -> Self {
        ObjectModel {
            arch,
            identity: ImageIdentity::default(),
            image_info: None,
            classes: vec![],
            class_index: HashMap::new(),
            categories: vec![],
            protocols: vec![],
            protocol_index: HashMap::new(),
            diagnostics: vec![],
        }
    }

    pub(crate) fn set_identity(&mut self, identity: ImageIdentity) {
        self.identity = identity;
    }

    pub(crate) fn set_image_info(&mut self, info: ImageInfo) {
        self.image_info = Some(info);
    }

    pub(crate) fn push_class(&mut self, class: ObjCClass) {
        self.class_index
            .entry(class.name.clone())
            .or_insert(self.classes.len());
        self.classes.push(class);
    }

    pub(crate) fn push_category(&mut self, category: Category) {
        self.categories.push(category);
    }

    /// Adds a protocol unless one of the same name is already known. An
    /// incomplete definition is replaced in place by a complete one.
    pub(crate) fn add_protocol(&mut self, protocol: Protocol) {
        match self.protocol_index.get(&protocol.name) {
            Some(&index) => {
                if !self.protocols[index].complete && protocol.complete {
                    self.protocols[index] = protocol;
                }
            }
            None => {
                self.protocol_index
                    .insert(protocol.name.clone(), self.protocols.len());
                self.protocols.push(protocol);
            }
        }
    }

    pub(crate) fn push_diagnostic(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn arch(&self) -> &Architecture {
        &self.arch
    }

    pub fn identity(&self) -> &ImageIdentity {
        &self.identity
    }

    pub fn image_info(&self) -> Option<&ImageInfo> {
        self.image_info.as_ref()
    }

    pub fn classes(&self) -> &[ObjCClass] {
        &self.classes
    }

    pub fn class(&self, name: &str) -> Option<&ObjCClass> {
        self.class_index.get(name).map(|&i| &self.classes[i])
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn protocols(&self) -> &[Protocol] {
        &self.protocols
    }

    pub fn protocol(&self, name: &str) -> Option<&Protocol> {
        self.protocol_index.get(name).map(|&i| &self.protocols[i])
    }

    /// Model level diagnostics only.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Model level diagnostics plus those attached to every entity.
    pub fn diagnostic_count(&self) -> usize {
        self.diagnostics.len()
            + self.classes.iter().map(|c| c.diagnostics.len()).sum::<usize>()
            + self.categories.iter().map(|c| c.diagnostics.len()).sum::<usize>()
            + self.protocols.iter().map(|p| p.diagnostics.len()).sum::<usize>()
    }
}
