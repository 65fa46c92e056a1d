use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::{
    fixups::ImageValue,
    macho::{MachO, MachOErr, MachOResult},
    options::DumpOptions,
    types::{decode, decode_method, Primitive, TypeNode},
};

use super::{
    model::{
        Category, ClassRef, ClassRoFlags, Diagnostic, DiagnosticKind, ImageIdentity, ImageInfo,
        Ivar, ListPolicy, Method, MethodScope, ObjCClass, ObjectModel, Property, Protocol,
    },
    property::parse_property,
    raw::{
        ivar_entry_size, method_entry_size, property_entry_size, read_image_info, CategoryRecord,
        ClassRecord, ClassRoRecord, IvarEntry, ListHeader, MethodEntry, MethodListFlags,
        PropertyEntry, ProtocolRecord,
    },
    symbol_name, WalkError,
};

const PROTOCOL_LIST: &str = "__objc_protolist";
const CLASS_LIST: &str = "__objc_classlist";
const CATEGORY_LIST: &str = "__objc_catlist";
const IMAGE_INFO: &str = "__objc_imageinfo";

/// Builds the object model of one image: image info, then protocols,
/// classes and categories in the order of their list sections.
pub fn walk(image: &MachO<'_>, options: &DumpOptions) -> Result<ObjectModel, WalkError> {
    let mut walker = Walker {
        image,
        width: image.pointer_width() as u64,
        policy: options.list_policy(),
        category_class_properties: false,
        class_names: HashMap::new(),
        protocol_names: HashMap::new(),
        model: ObjectModel::new(image.arch),
    };
    let dylib = image.dylib_id();
    walker.model.set_identity(ImageIdentity {
        uuid: image.uuid(),
        install_name: dylib.map(|cmd| cmd.name.clone()),
        current_version: dylib.map(|cmd| cmd.current_version.clone()),
    });
    if image.is_encrypted() {
        warn!("image has an encrypted range; metadata inside it is reported as unreadable");
    }
    walker.run()?;

    let model = walker.model;
    debug!(
        arch = %model.arch().name(),
        protocols = model.protocols().len(),
        classes = model.classes().len(),
        categories = model.categories().len(),
        diagnostics = model.diagnostic_count(),
        "walked objc metadata"
    );
    Ok(model)
}

type Entries = Vec<(u64, MachOResult<ImageValue>)>;

struct Walker<'i, 'a> {
    image: &'i MachO<'a>,
    width: u64,
    policy: ListPolicy,
    category_class_properties: bool,
    class_names: HashMap<u64, String>,
    protocol_names: HashMap<u64, String>,
    model: ObjectModel,
}

fn read_string(image: &MachO, value: &ImageValue) -> MachOResult<String> {
    match value {
        ImageValue::Value(address) => image.read_cstring(*address),
        ImageValue::Null => Err(MachOErr::UnmappedAddress {
            address: 0,
            size: 1,
        }),
        ImageValue::Bind(symbol) => Err(MachOErr::Parse(format!(
            "string pointer bound to {symbol}"
        ))),
    }
}

/// Address of a nested list; null means empty.
fn list_address(value: &ImageValue, diags: &mut Vec<Diagnostic>) -> Option<u64> {
    match value {
        ImageValue::Value(address) => Some(*address),
        ImageValue::Null => None,
        ImageValue::Bind(symbol) => {
            diags.push(Diagnostic::new(
                None,
                DiagnosticKind::Unsupported(format!("list pointer bound to {symbol}")),
            ));
            None
        }
    }
}

fn record_target(slot: u64, value: MachOResult<ImageValue>) -> Result<u64, String> {
    match value {
        Ok(ImageValue::Value(address)) => Ok(address),
        Ok(ImageValue::Null) => Err(format!("null entry at {slot:#x}")),
        Ok(ImageValue::Bind(symbol)) => Err(format!("entry at {slot:#x} bound to {symbol}")),
        Err(err) => Err(err.to_string()),
    }
}

impl Walker<'_, '_> {
    fn run(&mut self) -> Result<(), WalkError> {
        let legacy = self
            .image
            .sections()
            .find(|sect| sect.segname == "__OBJC" && sect.sectname == "__module_info");
        if let Some(sect) = legacy {
            warn!("objc1 metadata is not supported");
            self.model.push_diagnostic(Diagnostic::new(
                Some(sect.addr),
                DiagnosticKind::Unsupported("Objective-C 1 runtime metadata".to_string()),
            ));
        }

        self.read_image_info();

        let protocols = self.pointer_list(PROTOCOL_LIST)?;
        let classes = self.pointer_list(CLASS_LIST)?;
        let categories = self.pointer_list(CATEGORY_LIST)?;

        for (slot, value) in protocols {
            let result = record_target(slot, value).and_then(|address| {
                self.protocol_at(address)
                    .map_err(|err| format!("{err} (record at {address:#x})"))
            });
            if let Err(reason) = result {
                let diag = self.invalid(PROTOCOL_LIST, slot, reason);
                self.model.add_protocol(Protocol::placeholder(slot, diag));
            }
        }

        for (slot, value) in classes {
            let class = match record_target(slot, value) {
                Ok(address) => match self.read_class(address) {
                    Ok(class) => class,
                    Err(err) => {
                        let diag = self.invalid(CLASS_LIST, address, err.to_string());
                        ObjCClass::placeholder(address, diag)
                    }
                },
                Err(reason) => {
                    let diag = self.invalid(CLASS_LIST, slot, reason);
                    ObjCClass::placeholder(slot, diag)
                }
            };
            for diag in &class.diagnostics {
                debug!(class = %class.name, %diag, "soft failure");
            }
            self.model.push_class(class);
        }

        for (slot, value) in categories {
            let category = match record_target(slot, value) {
                Ok(address) => match self.read_category(address) {
                    Ok(category) => category,
                    Err(err) => {
                        let diag = self.invalid(CATEGORY_LIST, address, err.to_string());
                        Category::placeholder(address, diag)
                    }
                },
                Err(reason) => {
                    let diag = self.invalid(CATEGORY_LIST, slot, reason);
                    Category::placeholder(slot, diag)
                }
            };
            for diag in &category.diagnostics {
                debug!(category = %category.name, %diag, "soft failure");
            }
            self.model.push_category(category);
        }

        Ok(())
    }

    fn invalid(&mut self, list: &'static str, address: u64, reason: String) -> Diagnostic {
        warn!(list, address, %reason, "invalid record");
        let diag = Diagnostic::new(
            Some(address),
            DiagnosticKind::InvalidRecord { address, reason },
        );
        self.model.push_diagnostic(diag.clone());
        diag
    }

    fn read_image_info(&mut self) {
        let Some((sect, _)) = self.image.section_named(IMAGE_INFO) else {
            return;
        };
        match read_image_info(self.image, sect.addr) {
            Ok((version, raw_flags)) => {
                let info = ImageInfo { version, raw_flags };
                self.category_class_properties = info.has_category_class_properties();
                debug!(version, flags = raw_flags, "objc image info");
                self.model.set_image_info(info);
            }
            Err(err) => {
                self.model
                    .push_diagnostic(Diagnostic::new(Some(sect.addr), err));
            }
        }
    }

    /// Reads a top level list section: a packed array of record pointers.
    fn pointer_list(&self, sectname: &'static str) -> Result<Entries, WalkError> {
        let Some((sect, _)) = self.image.section_named(sectname) else {
            return Ok(vec![]);
        };
        if sect.size % self.width != 0 {
            return Err(WalkError {
                reason: format!(
                    "{sectname} size {:#x} is not a multiple of the pointer size",
                    sect.size
                ),
                address: sect.addr,
            });
        }
        self.image
            .translate(sect.addr, sect.size)
            .map_err(|err| WalkError {
                reason: format!("{sectname} is unreadable: {err}"),
                address: sect.addr,
            })?;

        let count = sect.size / self.width;
        debug!(section = sectname, count, "list section");
        Ok((0..count)
            .map(|i| {
                let slot = sect.addr + i * self.width;
                (slot, self.image.read_pointer(slot))
            })
            .collect())
    }

    /// Addresses of the list's entries that are mapped. A list running off
    /// mapped memory is salvaged or dropped according to the policy.
    fn list_entries(
        &self,
        list: &'static str,
        first: u64,
        count: u32,
        entsize: u64,
        diags: &mut Vec<Diagnostic>,
    ) -> Vec<u64> {
        let mut entries = vec![];
        for i in 0..count as u64 {
            let entry = first + i * entsize;
            if self.image.translate(entry, entsize).is_err() {
                diags.push(Diagnostic::new(
                    Some(first),
                    DiagnosticKind::TruncatedList {
                        list,
                        declared: count,
                        readable: i as u32,
                        policy: self.policy,
                    },
                ));
                if self.policy == ListPolicy::Strict {
                    entries.clear();
                }
                break;
            }
            entries.push(entry);
        }
        entries
    }

    fn class_name_at(&mut self, address: u64) -> MachOResult<String> {
        if let Some(name) = self.class_names.get(&address) {
            return Ok(name.clone());
        }
        let record = ClassRecord::read(self.image, address)?;
        let data = record.data.ok_or(MachOErr::UnmappedAddress {
            address: address + 4 * self.width,
            size: self.width,
        })?;
        let ro = ClassRoRecord::read(self.image, data)?;
        let name = read_string(self.image, &ro.name)?;
        self.class_names.insert(address, name.clone());
        Ok(name)
    }

    fn class_ref(&mut self, value: &ImageValue, is_root: bool) -> ClassRef {
        match value {
            ImageValue::Value(address) => match self.class_name_at(*address) {
                Ok(name) => ClassRef::Named(name),
                Err(_) => ClassRef::Unresolved(Some(*address)),
            },
            ImageValue::Bind(symbol) => ClassRef::Named(symbol_name(symbol).to_string()),
            ImageValue::Null if is_root => ClassRef::Root,
            ImageValue::Null => ClassRef::Unresolved(None),
        }
    }

    fn read_class(&mut self, address: u64) -> MachOResult<ObjCClass> {
        let record = ClassRecord::read(self.image, address)?;
        let data = record.data.ok_or(MachOErr::UnmappedAddress {
            address: address + 4 * self.width,
            size: self.width,
        })?;
        let ro = ClassRoRecord::read(self.image, data)?;
        let name = read_string(self.image, &ro.name)?;
        self.class_names.insert(address, name.clone());

        let mut diags = vec![];
        let mut seen = HashSet::new();
        let superclass = self.class_ref(&record.superclass, ro.flags.contains(ClassRoFlags::ROOT));
        let (instance_methods, _) =
            self.method_list(&ro.base_methods, false, None, &mut seen, &mut diags);
        let protocols = self.protocol_refs(&ro.base_protocols, &mut diags);
        let ivars = self.ivars(&ro.ivars, &mut diags);
        let mut properties = self.properties(&ro.base_properties, false, &mut diags);

        let mut class_methods = vec![];
        let metaclass = match &record.isa {
            ImageValue::Value(meta) => ClassRecord::read(self.image, *meta)
                .and_then(|meta_record| {
                    meta_record.data.ok_or(MachOErr::UnmappedAddress {
                        address: *meta + 4 * self.width,
                        size: self.width,
                    })
                })
                .and_then(|meta_data| ClassRoRecord::read(self.image, meta_data))
                .map(Some),
            ImageValue::Null => Err(MachOErr::UnmappedAddress {
                address,
                size: self.width,
            }),
            // A class bound to an external metaclass has no local class methods.
            ImageValue::Bind(_) => Ok(None),
        };
        match metaclass {
            Ok(Some(meta_ro)) => {
                (class_methods, _) =
                    self.method_list(&meta_ro.base_methods, true, None, &mut seen, &mut diags);
                properties.extend(self.properties(&meta_ro.base_properties, true, &mut diags));
            }
            Ok(None) => {}
            Err(err) => diags.push(Diagnostic::new(Some(address), err)),
        }

        Ok(ObjCClass {
            name,
            address,
            superclass,
            instance_start: ro.instance_start,
            instance_size: ro.instance_size,
            flags: ro.flags,
            ivars,
            instance_methods,
            class_methods,
            properties,
            protocols,
            is_swift: record.is_swift,
            placeholder: false,
            diagnostics: diags,
        })
    }

    fn read_category(&mut self, address: u64) -> MachOResult<Category> {
        let record = CategoryRecord::read(self.image, address, self.category_class_properties)?;
        let name = read_string(self.image, &record.name)?;

        let mut diags = vec![];
        let mut seen = HashSet::new();
        let class = self.class_ref(&record.cls, false);
        let (instance_methods, _) =
            self.method_list(&record.instance_methods, false, None, &mut seen, &mut diags);
        let (class_methods, _) =
            self.method_list(&record.class_methods, true, None, &mut seen, &mut diags);
        let protocols = self.protocol_refs(&record.protocols, &mut diags);
        let mut properties = self.properties(&record.instance_properties, false, &mut diags);
        if let Some(class_properties) = &record.class_properties {
            properties.extend(self.properties(class_properties, true, &mut diags));
        }

        Ok(Category {
            name,
            address,
            class,
            protocols,
            instance_methods,
            class_methods,
            properties,
            diagnostics: diags,
            placeholder: false,
        })
    }

    /// Reads the protocol at `address` into the model, once per address,
    /// and returns its name.
    fn protocol_at(&mut self, address: u64) -> MachOResult<String> {
        if let Some(name) = self.protocol_names.get(&address) {
            return Ok(name.clone());
        }
        let record = ProtocolRecord::read(self.image, address)?;
        let name = read_string(self.image, &record.name)?;
        self.protocol_names.insert(address, name.clone());

        let mut diags = vec![];
        let mut seen = HashSet::new();
        let protocols = self.protocol_refs(&record.protocols, &mut diags);

        // Extended types run across the four method lists in this order.
        let mut extended = record
            .extended_method_types
            .as_ref()
            .and_then(ImageValue::address);
        let mut lists = [
            (&record.instance_methods, false, vec![]),
            (&record.class_methods, true, vec![]),
            (&record.optional_instance_methods, false, vec![]),
            (&record.optional_class_methods, true, vec![]),
        ];
        for (list, is_class, methods) in lists.iter_mut() {
            let (read, declared) = self.method_list(list, *is_class, extended, &mut seen, &mut diags);
            *methods = read;
            if let Some(base) = extended {
                extended = declared
                    .checked_mul(self.width)
                    .and_then(|span| base.checked_add(span));
                if extended.is_none() {
                    diags.push(Diagnostic::new(
                        Some(address),
                        DiagnosticKind::InvalidRecord {
                            address: base,
                            reason: "extended method types run past the end of the address space"
                                .to_string(),
                        },
                    ));
                }
            }
        }
        let [(_, _, instance_methods), (_, _, class_methods), (_, _, optional_instance_methods), (_, _, optional_class_methods)] =
            lists;

        let mut properties = self.properties(&record.instance_properties, false, &mut diags);
        if let Some(class_properties) = &record.class_properties {
            properties.extend(self.properties(class_properties, true, &mut diags));
        }

        for diag in &diags {
            debug!(protocol = %name, %diag, "soft failure");
        }
        self.model.add_protocol(Protocol {
            name: name.clone(),
            address,
            protocols,
            class_methods,
            instance_methods,
            optional_class_methods,
            optional_instance_methods,
            properties,
            complete: diags.is_empty(),
            diagnostics: diags,
            placeholder: false,
        });
        Ok(name)
    }

    /// Names of the protocols in a `protocol_list_t`.
    fn protocol_refs(&mut self, value: &ImageValue, diags: &mut Vec<Diagnostic>) -> Vec<String> {
        let Some(list) = list_address(value, diags) else {
            return vec![];
        };
        let count = match self.image.read_word(list) {
            Ok(count) => count.min(u32::MAX as u64) as u32,
            Err(err) => {
                diags.push(Diagnostic::new(Some(list), err));
                return vec![];
            }
        };

        let mut names = vec![];
        for entry in self.list_entries("protocol", list + self.width, count, self.width, diags) {
            match self.image.read_pointer(entry) {
                Ok(ImageValue::Value(address)) => match self.protocol_at(address) {
                    Ok(name) => names.push(name),
                    Err(err) => diags.push(Diagnostic::new(Some(address), err)),
                },
                Ok(ImageValue::Bind(symbol)) => names.push(symbol_name(&symbol).to_string()),
                Ok(ImageValue::Null) => {}
                Err(err) => diags.push(Diagnostic::new(Some(entry), err)),
            }
        }
        names
    }

    /// Returns the methods read and the count the list declares.
    fn method_list(
        &self,
        value: &ImageValue,
        is_class: bool,
        extended: Option<u64>,
        seen: &mut HashSet<(String, bool)>,
        diags: &mut Vec<Diagnostic>,
    ) -> (Vec<Method>, u64) {
        let Some(list) = list_address(value, diags) else {
            return (vec![], 0);
        };
        let header = match ListHeader::read(self.image, list) {
            Ok(header) => header,
            Err(err) => {
                diags.push(Diagnostic::new(Some(list), err));
                return (vec![], 0);
            }
        };
        let small = header.method_flags().contains(MethodListFlags::SMALL);
        if (header.entsize as u64) < method_entry_size(self.image, small) {
            diags.push(Diagnostic::new(
                Some(list),
                DiagnosticKind::BadEntrySize {
                    list: "method",
                    entsize: header.entsize,
                },
            ));
            return (vec![], header.count as u64);
        }

        let entries = self.list_entries(
            "method",
            list + ListHeader::SIZE,
            header.count,
            header.entsize as u64,
            diags,
        );
        let mut methods = vec![];
        for (index, entry) in entries.into_iter().enumerate() {
            let raw = match MethodEntry::read(self.image, entry, small) {
                Ok(raw) => raw,
                Err(err) => {
                    diags.push(Diagnostic::new(Some(entry), err));
                    continue;
                }
            };
            let selector = match raw.name.and_then(|name| self.image.read_cstring(name)) {
                Ok(selector) => selector,
                Err(err) => {
                    diags.push(Diagnostic::new(Some(entry), err));
                    continue;
                }
            };

            let extended_types = extended.and_then(|base| {
                let slot = (index as u64)
                    .checked_mul(self.width)
                    .and_then(|span| base.checked_add(span))?;
                self.image
                    .read_pointer(slot)
                    .and_then(|value| read_string(self.image, &value))
                    .ok()
            });
            let encoding = match extended_types {
                Some(types) => Ok(types),
                None => raw.types.and_then(|types| self.image.read_cstring(types)),
            };

            if !seen.insert((selector.clone(), is_class)) {
                diags.push(Diagnostic::new(
                    Some(entry),
                    DiagnosticKind::DuplicateSelector {
                        selector,
                        scope: MethodScope::of(is_class),
                    },
                ));
                continue;
            }
            methods.push(method(selector, encoding, is_class, raw.imp, entry, diags));
        }
        (methods, header.count as u64)
    }

    fn ivars(&self, value: &ImageValue, diags: &mut Vec<Diagnostic>) -> Vec<Ivar> {
        let Some(list) = list_address(value, diags) else {
            return vec![];
        };
        let header = match ListHeader::read(self.image, list) {
            Ok(header) => header,
            Err(err) => {
                diags.push(Diagnostic::new(Some(list), err));
                return vec![];
            }
        };
        if (header.entsize as u64) < ivar_entry_size(self.image) {
            diags.push(Diagnostic::new(
                Some(list),
                DiagnosticKind::BadEntrySize {
                    list: "ivar",
                    entsize: header.entsize,
                },
            ));
            return vec![];
        }

        let entries = self.list_entries(
            "ivar",
            list + ListHeader::SIZE,
            header.count,
            header.entsize as u64,
            diags,
        );
        let mut ivars: Vec<Ivar> = vec![];
        for entry in entries {
            let raw = match IvarEntry::read(self.image, entry) {
                Ok(raw) => raw,
                Err(err) => {
                    diags.push(Diagnostic::new(Some(entry), err));
                    continue;
                }
            };
            let name = match read_string(self.image, &raw.name) {
                Ok(name) => name,
                Err(err) => {
                    diags.push(Diagnostic::new(Some(entry), err));
                    continue;
                }
            };
            let encoding = match &raw.types {
                ImageValue::Null => String::new(),
                types => read_string(self.image, types).unwrap_or_else(|err| {
                    diags.push(Diagnostic::new(Some(entry), err));
                    String::new()
                }),
            };
            let offset = match raw.offset.address() {
                Some(variable) => match self.image.read_u32(variable) {
                    Ok(offset) => offset as u64,
                    Err(err) => {
                        diags.push(Diagnostic::new(Some(variable), err));
                        0
                    }
                },
                None => 0,
            };

            if self.image.arch.is_64() {
                if let Some(previous) = ivars.last().map(|ivar| ivar.offset) {
                    if offset < previous {
                        diags.push(Diagnostic::new(
                            Some(entry),
                            DiagnosticKind::IvarOrder {
                                name: name.clone(),
                                offset,
                                previous,
                            },
                        ));
                    }
                }
            }

            let ty = match decode(&encoding) {
                Ok(ty) => ty,
                Err(err) => {
                    diags.push(Diagnostic::new(Some(entry), err));
                    TypeNode::Unknown(encoding.clone())
                }
            };
            ivars.push(Ivar {
                name,
                ty,
                encoding,
                offset,
                size: raw.size,
                alignment: raw.alignment(self.image.pointer_width()),
            });
        }
        ivars
    }

    fn properties(
        &self,
        value: &ImageValue,
        is_class: bool,
        diags: &mut Vec<Diagnostic>,
    ) -> Vec<Property> {
        let Some(list) = list_address(value, diags) else {
            return vec![];
        };
        let header = match ListHeader::read(self.image, list) {
            Ok(header) => header,
            Err(err) => {
                diags.push(Diagnostic::new(Some(list), err));
                return vec![];
            }
        };
        if (header.entsize as u64) < property_entry_size(self.image) {
            diags.push(Diagnostic::new(
                Some(list),
                DiagnosticKind::BadEntrySize {
                    list: "property",
                    entsize: header.entsize,
                },
            ));
            return vec![];
        }

        let entries = self.list_entries(
            "property",
            list + ListHeader::SIZE,
            header.count,
            header.entsize as u64,
            diags,
        );
        let mut properties = vec![];
        for entry in entries {
            let strings = PropertyEntry::read(self.image, entry).and_then(|raw| {
                Ok((
                    read_string(self.image, &raw.name)?,
                    read_string(self.image, &raw.attributes)?,
                ))
            });
            match strings {
                Ok((name, attributes)) => {
                    let (property, error) = parse_property(&name, &attributes, is_class);
                    if let Some(err) = error {
                        diags.push(Diagnostic::new(Some(entry), err));
                    }
                    properties.push(property);
                }
                Err(err) => diags.push(Diagnostic::new(Some(entry), err)),
            }
        }
        properties
    }
}

fn method(
    selector: String,
    encoding: MachOResult<String>,
    is_class: bool,
    imp: Option<u64>,
    entry: u64,
    diags: &mut Vec<Diagnostic>,
) -> Method {
    let encoding = match encoding {
        Ok(encoding) => encoding,
        Err(err) => {
            let raw = format!("types unreadable at {entry:#x}: {err}");
            diags.push(Diagnostic::new(Some(entry), err));
            return Method {
                selector,
                return_type: TypeNode::Unknown(raw),
                arg_types: vec![],
                is_class,
                encoding: String::new(),
                imp,
            };
        }
    };

    let (return_type, arg_types) = match decode_method(&encoding) {
        Ok(types) => {
            let mut types = types.into_iter();
            let return_type = types
                .next()
                .unwrap_or(TypeNode::Primitive(Primitive::Void));
            // `self` and `_cmd`.
            (return_type, types.skip(2).collect())
        }
        Err(err) => {
            diags.push(Diagnostic::new(Some(entry), err));
            (TypeNode::Unknown(encoding.clone()), vec![])
        }
    };

    Method {
        selector,
        return_type,
        arg_types,
        is_class,
        encoding,
        imp,
    }
}
