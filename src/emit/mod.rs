//! Renders an [`ObjectModel`] as Objective-C declarations.
//!
//! Output is a pure function of the model and the options, so emitting the
//! same model twice gives the same text.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::{
    objc::{Category, ObjCClass, ObjectModel, Protocol},
    options::DumpOptions,
    types::{
        Aggregate, AggregateKind, TypeFormatter, TypeNode, UNKNOWN_BLOCK, UNKNOWN_FUNCTION_POINTER,
    },
};

mod interface;

use interface::{warning, Renderer};

/// The entities that pass the filter, in output order.
struct Selection<'m> {
    protocols: Vec<&'m Protocol>,
    classes: Vec<&'m ObjCClass>,
    categories: Vec<&'m Category>,
}

impl<'m> Selection<'m> {
    fn new(model: &'m ObjectModel, options: &DumpOptions) -> Self {
        let mut protocols: Vec<&Protocol> = model
            .protocols()
            .iter()
            .filter(|p| options.matches(&p.name))
            .collect();
        let mut classes: Vec<&ObjCClass> = model
            .classes()
            .iter()
            .filter(|c| options.matches(&c.name))
            .collect();
        let mut categories: Vec<&Category> = model
            .categories()
            .iter()
            .filter(|c| {
                options.matches(&c.name) || c.class.name().is_some_and(|n| options.matches(n))
            })
            .collect();

        if options.sort_classes {
            protocols.sort_by(|a, b| a.name.cmp(&b.name));
            classes.sort_by(|a, b| a.name.cmp(&b.name));
            categories.sort_by(|a, b| (a.class.name(), &a.name).cmp(&(b.class.name(), &b.name)));
        }
        if options.sort_by_inheritance {
            classes = superclasses_first(classes);
        }

        Selection {
            protocols,
            classes,
            categories,
        }
    }

    /// Every type mentioned by a selected entity.
    fn types(&self) -> Vec<&'m TypeNode> {
        let mut types = vec![];
        let methods = self
            .protocols
            .iter()
            .copied()
            .flat_map(|p| {
                p.class_methods
                    .iter()
                    .chain(&p.instance_methods)
                    .chain(&p.optional_class_methods)
                    .chain(&p.optional_instance_methods)
            })
            .chain(
                self.classes
                    .iter()
                    .copied()
                    .flat_map(|c| c.class_methods.iter().chain(&c.instance_methods)),
            )
            .chain(
                self.categories
                    .iter()
                    .copied()
                    .flat_map(|c| c.class_methods.iter().chain(&c.instance_methods)),
            );
        for method in methods {
            types.push(&method.return_type);
            types.extend(&method.arg_types);
        }

        let properties = self
            .protocols
            .iter()
            .copied()
            .flat_map(|p| &p.properties)
            .chain(self.classes.iter().copied().flat_map(|c| &c.properties))
            .chain(self.categories.iter().copied().flat_map(|c| &c.properties));
        types.extend(properties.map(|p| &p.ty));
        types.extend(self.classes.iter().copied().flat_map(|c| c.ivars.iter().map(|i| &i.ty)));
        types
    }
}

/// Moves each class after its selected ancestors, otherwise keeping the
/// given order. Superclass cycles are broken where they are found.
fn superclasses_first(classes: Vec<&ObjCClass>) -> Vec<&ObjCClass> {
    let by_name: HashMap<&str, usize> = classes
        .iter()
        .enumerate()
        .map(|(i, class)| (class.name.as_str(), i))
        .collect();
    let mut placed = vec![false; classes.len()];
    let mut ordered = Vec::with_capacity(classes.len());
    for start in 0..classes.len() {
        let mut chain = vec![];
        let mut next = Some(start);
        while let Some(index) = next {
            if placed[index] || chain.contains(&index) {
                break;
            }
            chain.push(index);
            next = classes[index]
                .superclass
                .name()
                .and_then(|name| by_name.get(name).copied());
        }
        for index in chain.into_iter().rev() {
            placed[index] = true;
            ordered.push(classes[index]);
        }
    }
    ordered
}

/// Names and placeholders the declarations depend on.
#[derive(Default)]
struct Usage<'m> {
    /// Fullest definition seen for each named aggregate.
    aggregates: BTreeMap<(&'static str, &'m str), (AggregateKind, &'m Aggregate)>,
    classes: BTreeSet<&'m str>,
    protocols: BTreeSet<&'m str>,
    function_pointer: bool,
    block: bool,
}

impl<'m> Usage<'m> {
    fn collect(selection: &Selection<'m>) -> Self {
        let mut usage = Usage::default();
        for ty in selection.types() {
            ty.walk(&mut |node| usage.note(node));
        }

        let superclasses = selection.classes.iter().copied().filter_map(|c| c.superclass.name());
        let category_classes = selection.categories.iter().copied().filter_map(|c| c.class.name());
        usage.classes.extend(superclasses.chain(category_classes));

        let adopted = selection
            .protocols
            .iter()
            .copied()
            .flat_map(|p| &p.protocols)
            .chain(selection.classes.iter().copied().flat_map(|c| &c.protocols))
            .chain(selection.categories.iter().copied().flat_map(|c| &c.protocols));
        usage.protocols.extend(adopted.map(String::as_str));
        usage
    }

    fn note(&mut self, node: &'m TypeNode) {
        match node {
            TypeNode::Object {
                class_name,
                protocols,
            } => {
                self.classes.extend(class_name.as_deref());
                self.protocols.extend(protocols.iter().map(String::as_str));
            }
            TypeNode::FunctionPointer => self.function_pointer = true,
            TypeNode::Block { signature: None } => self.block = true,
            TypeNode::Block {
                signature: Some(types),
            } if types.is_empty() => self.block = true,
            TypeNode::Aggregate { kind, body } => {
                let Some(name) = body.name.as_deref() else {
                    return;
                };
                if body.fields.is_none() {
                    return;
                }
                let entry = self
                    .aggregates
                    .entry((kind.keyword(), name))
                    .or_insert((*kind, body));
                if body.completeness() > entry.1.completeness() {
                    *entry = (*kind, body);
                }
            }
            _ => {}
        }
    }

    fn forward_declarations(&self, selection: &Selection) -> String {
        let defined_classes: BTreeSet<&str> =
            selection.classes.iter().map(|c| c.name.as_str()).collect();
        let defined_protocols: BTreeSet<&str> =
            selection.protocols.iter().map(|p| p.name.as_str()).collect();

        let classes: Vec<&str> = self
            .classes
            .iter()
            .filter(|name| !defined_classes.contains(*name))
            .copied()
            .collect();
        let protocols: Vec<&str> = self
            .protocols
            .iter()
            .filter(|name| !defined_protocols.contains(*name))
            .copied()
            .collect();

        let mut lines = vec![];
        if !classes.is_empty() {
            lines.push(format!("@class {};", classes.join(", ")));
        }
        if !protocols.is_empty() {
            lines.push(format!("@protocol {};", protocols.join(", ")));
        }
        lines.join("\n")
    }

    fn typedefs(&self) -> String {
        let mut lines = vec![];
        if self.function_pointer {
            lines.push(format!("typedef void (*{UNKNOWN_FUNCTION_POINTER})(void);"));
        }
        if self.block {
            lines.push(format!("typedef void (^{UNKNOWN_BLOCK})(void);"));
        }
        lines.join("\n")
    }
}

fn header(model: &ObjectModel) -> String {
    let mut lines = vec![
        "//".to_string(),
        format!("// Generated by objcdump {}", env!("CARGO_PKG_VERSION")),
        "//".to_string(),
        format!("// Architecture: {}", model.arch().name()),
    ];
    let identity = model.identity();
    if let Some(uuid) = identity.uuid {
        lines.push(format!("// UUID: {}", uuid.hyphenated().to_string().to_uppercase()));
    }
    if let Some(name) = &identity.install_name {
        lines.push(match &identity.current_version {
            Some(version) => format!("// Install name: {name} (current version {version})"),
            None => format!("// Install name: {name}"),
        });
    }
    if let Some(info) = model.image_info() {
        lines.push(format!(
            "// Objective-C image info: version {}, flags {:#x}",
            info.version, info.raw_flags
        ));
        if info.swift_stable_version() != 0 {
            lines.push(format!("// Swift ABI version: {}", info.swift_stable_version()));
        } else if info.swift_unstable_version() != 0 {
            lines.push(format!(
                "// Swift version (pre-stable ABI): {}",
                info.swift_unstable_version()
            ));
        }
    }
    lines.push("//".to_string());
    lines.join("\n")
}

/// Renders the whole model: header, model diagnostics, forward declarations,
/// typedefs, aggregate definitions, then protocols, classes and categories.
pub fn emit(model: &ObjectModel, options: &DumpOptions) -> String {
    let selection = Selection::new(model, options);
    let usage = Usage::collect(&selection);
    let renderer = Renderer {
        formatter: TypeFormatter::new(options.expand_depth),
        options,
    };

    let mut blocks = vec![];
    if options.show_header {
        blocks.push(header(model));
    }
    blocks.push(
        model
            .diagnostics()
            .iter()
            .map(warning)
            .collect::<Vec<_>>()
            .join("\n"),
    );
    blocks.push(usage.forward_declarations(&selection));
    blocks.push(usage.typedefs());
    blocks.extend(
        usage
            .aggregates
            .values()
            .map(|(kind, body)| renderer.formatter.definition(*kind, body)),
    );
    blocks.extend(selection.protocols.iter().map(|p| renderer.protocol(p)));
    blocks.extend(selection.classes.iter().map(|c| renderer.class(c)));
    blocks.extend(selection.categories.iter().map(|c| renderer.category(c)));

    let mut out = blocks
        .into_iter()
        .filter(|block| !block.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use nom::number::Endianness;

    use super::*;
    use crate::{
        machine::{Architecture, CpuSubType, CpuSubTypeX86, CpuType},
        objc::{parse_property, ClassRef, ClassRoFlags, Diagnostic, DiagnosticKind, Ivar, Method},
        types::{decode, decode_method},
    };

    fn model() -> ObjectModel {
        ObjectModel::new(Architecture::new(
            CpuType::X86_64,
            CpuSubType::X86(CpuSubTypeX86::All),
            true,
            Endianness::Little,
        ))
    }

    fn method(selector: &str, encoding: &str) -> Method {
        let mut types = decode_method(encoding).unwrap().into_iter();
        let return_type = types.next().unwrap();
        Method {
            selector: selector.to_string(),
            return_type,
            arg_types: types.skip(2).collect(),
            is_class: false,
            encoding: encoding.to_string(),
            imp: None,
        }
    }

    fn class(name: &str, superclass: ClassRef) -> ObjCClass {
        ObjCClass {
            name: name.to_string(),
            address: 0x4000,
            superclass,
            instance_start: 8,
            instance_size: 16,
            flags: ClassRoFlags::empty(),
            ivars: vec![],
            instance_methods: vec![],
            class_methods: vec![],
            properties: vec![],
            protocols: vec![],
            is_swift: false,
            placeholder: false,
            diagnostics: vec![],
        }
    }

    fn ivar(name: &str, encoding: &str, offset: u64) -> Ivar {
        Ivar {
            name: name.to_string(),
            ty: decode(encoding).unwrap(),
            encoding: encoding.to_string(),
            offset,
            size: 4,
            alignment: 4,
        }
    }

    #[test]
    fn test_golden_class() {
        let mut model = model();
        let mut foo = class("Foo", ClassRef::Named("NSObject".into()));
        foo.ivars.push(ivar("x", "i", 8));
        foo.instance_methods.push(method("bar", "v16@0:8"));
        model.push_class(foo);

        let options = DumpOptions::default().show_header(false);
        assert_eq!(
            emit(&model, &options),
            "@class NSObject;\n\n\
             @interface Foo : NSObject\n\
             {\n    int x;\n}\n\n\
             - (void)bar;\n\n\
             @end\n"
        );

        let options = options.show_ivar_offsets(true);
        assert!(emit(&model, &options).contains("    int x; // 8 = 0x8\n"));
    }

    #[test]
    fn test_root_and_unresolved_superclass() {
        let mut model = model();
        let mut root = class("Root", ClassRef::Root);
        root.flags = ClassRoFlags::ROOT;
        model.push_class(root);
        model.push_class(class("Orphan", ClassRef::Unresolved(Some(0x10))));

        let text = emit(&model, &DumpOptions::default().show_header(false));
        assert!(text.contains("@interface Root\n@end"));
        assert!(text.contains("@interface Orphan : /* unresolved superclass */\n@end"));
        assert!(!text.contains("@class"));
    }

    #[test]
    fn test_struct_definitions_and_typedefs() {
        let mut model = model();
        let mut foo = class("Foo", ClassRef::Root);
        foo.ivars.push(ivar("origin", "{CGPoint=\"x\"d\"y\"d}", 8));
        foo.ivars.push(ivar("callback", "^?", 24));
        foo.instance_methods.push(method("moveTo:", "v32@0:8{CGPoint=dd}16"));
        model.push_class(foo);

        let text = emit(&model, &DumpOptions::default().show_header(false));
        assert!(text.contains("typedef void (*UnknownFunctionPointer)(void);"));
        assert!(!text.contains("UnknownBlock)"));
        // The named-field definition wins over the anonymous-field one.
        assert!(text.contains("struct CGPoint {\n    double x;\n    double y;\n};"));
        assert!(text.contains("    struct CGPoint origin;"));
        assert!(text.contains("- (void)moveTo:(struct CGPoint)arg1;"));
    }

    #[test]
    fn test_filter_sort_and_hidden_accessors() {
        let mut model = model();
        let mut zed = class("NSZed", ClassRef::Root);
        let (prop, _) = parse_property("title", "T@\"NSString\",C,N", false);
        zed.properties.push(prop);
        zed.instance_methods.push(method("title", "@16@0:8"));
        zed.instance_methods.push(method("setTitle:", "v24@0:8@16"));
        zed.instance_methods.push(method("reload", "v16@0:8"));
        zed.instance_methods.push(method("adjust", "v16@0:8"));
        model.push_class(zed);
        model.push_class(class("NSAlpha", ClassRef::Root));
        model.push_class(class("Other", ClassRef::Root));

        let options = DumpOptions::default()
            .show_header(false)
            .class_filter(regex::Regex::new("^NS").unwrap())
            .sort_classes(true)
            .sort_methods(true)
            .hide_property_accessors(true);
        let text = emit(&model, &options);
        assert!(!text.contains("Other"));
        assert!(text.find("NSAlpha").unwrap() < text.find("NSZed").unwrap());
        assert!(text.contains("@property(nonatomic, copy) NSString *title;"));
        assert!(!text.contains("- (id)title;"));
        assert!(text.contains("- (void)adjust;\n- (void)reload;"));
    }

    #[test]
    fn test_sort_by_inheritance() {
        let mut model = model();
        model.push_class(class("Leaf", ClassRef::Named("Middle".into())));
        model.push_class(class("Alone", ClassRef::Named("NSObject".into())));
        model.push_class(class("Middle", ClassRef::Named("Base".into())));
        model.push_class(class("Base", ClassRef::Root));
        let order = |text: &str| -> Vec<usize> {
            ["@interface Base", "@interface Middle", "@interface Leaf", "@interface Alone"]
                .iter()
                .map(|head| text.find(head).unwrap())
                .collect()
        };

        let options = DumpOptions::default().show_header(false).sort_by_inheritance(true);
        let positions = order(&emit(&model, &options));
        assert!(positions[0] < positions[1] && positions[1] < positions[2]);
        // Unrelated classes keep their place after what came before them.
        assert!(positions[2] < positions[3]);

        let options = options.sort_classes(true);
        let positions = order(&emit(&model, &options));
        assert!(positions[3] < positions[0]);
        assert!(positions[0] < positions[1] && positions[1] < positions[2]);
    }

    #[test]
    fn test_superclass_cycle_keeps_every_class() {
        let a = class("A", ClassRef::Named("B".into()));
        let b = class("B", ClassRef::Named("A".into()));
        let ordered = superclasses_first(vec![&a, &b]);
        let names: Vec<&str> = ordered.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["B", "A"]);
    }

    #[test]
    fn test_swift_class_marker() {
        let mut model = model();
        let mut swift = class("_TtC4Demo5Model", ClassRef::Named("NSObject".into()));
        swift.is_swift = true;
        model.push_class(swift);
        model.push_class(class("Plain", ClassRef::Root));

        let text = emit(&model, &DumpOptions::default().show_header(false));
        assert!(text.contains("// Swift class\n@interface _TtC4Demo5Model : NSObject\n@end"));
        assert_eq!(text.matches("// Swift class").count(), 1);
    }

    #[test]
    fn test_diagnostics_and_placeholders() {
        let mut model = model();
        let diag = Diagnostic::new(
            Some(0x5000),
            DiagnosticKind::InvalidRecord {
                address: 0x5000,
                reason: "unmapped".into(),
            },
        );
        model.push_diagnostic(diag.clone());
        model.push_class(ObjCClass::placeholder(0x5000, diag));

        let text = emit(&model, &DumpOptions::default().show_header(false));
        assert!(text.starts_with("// warning: invalid record at 0x5000: unmapped [0x5000]\n"));
        assert!(text.contains("// @interface <invalid record at 0x5000>"));
        assert!(!text.contains("\n@interface"));
    }

    #[test]
    fn test_protocol_and_category_layout() {
        let mut model = model();
        let mut protocol = Protocol {
            name: "Drawing".into(),
            protocols: vec!["NSObject".into()],
            complete: true,
            ..Default::default()
        };
        protocol.instance_methods.push(method("draw", "v16@0:8"));
        protocol.optional_instance_methods.push(method("flush", "v16@0:8"));
        model.add_protocol(protocol);
        model.push_category(Category {
            name: "Extras".into(),
            address: 0x6000,
            class: ClassRef::Named("NSString".into()),
            protocols: vec!["Drawing".into()],
            instance_methods: vec![method("shout", "@16@0:8")],
            class_methods: vec![],
            properties: vec![],
            diagnostics: vec![],
            placeholder: false,
        });

        let text = emit(&model, &DumpOptions::default().show_header(false));
        assert!(text.contains("@class NSString;\n@protocol NSObject;"));
        assert!(text.contains(
            "@protocol Drawing <NSObject>\n- (void)draw;\n\n@optional\n- (void)flush;\n\n@end"
        ));
        assert!(text.contains("@interface NSString (Extras) <Drawing>\n- (id)shout;\n\n@end"));
    }

    #[test]
    fn test_header() {
        let text = emit(&model(), &DumpOptions::default());
        assert!(text.starts_with("//\n// Generated by objcdump"));
        assert!(text.contains("// Architecture: x86_64"));
        assert!(!text.contains("// UUID"));

        let mut model = model();
        model.set_identity(crate::objc::ImageIdentity {
            uuid: Some(uuid::Uuid::from_bytes([0xab; 16])),
            install_name: Some("/usr/lib/libFoo.dylib".into()),
            current_version: Some("1.2.3".into()),
        });
        let text = emit(&model, &DumpOptions::default());
        assert!(text.contains("// UUID: ABABABAB-ABAB-ABAB-ABAB-ABABABABABAB\n"));
        assert!(text.contains("// Install name: /usr/lib/libFoo.dylib (current version 1.2.3)\n"));
    }
}
