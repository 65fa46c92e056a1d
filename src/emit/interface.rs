use std::collections::HashSet;

use crate::{
    objc::{Category, ClassRef, Diagnostic, Method, ObjCClass, Property, PropertyFlags, Protocol},
    options::DumpOptions,
    types::TypeFormatter,
};

const INDENT: &str = "    ";

pub(super) fn warning(diag: &Diagnostic) -> String {
    match diag.address {
        Some(address) => format!("// warning: {diag} [{address:#x}]"),
        None => format!("// warning: {diag}"),
    }
}

/// `head`, the non-empty sections separated by blank lines, `@end`.
fn block(warnings: &[Diagnostic], head: String, sections: Vec<String>) -> String {
    let mut out: Vec<String> = warnings.iter().map(warning).collect();
    out.push(head);
    let sections: Vec<String> = sections.into_iter().filter(|s| !s.is_empty()).collect();
    if sections.is_empty() {
        out.push("@end".to_string());
    } else {
        out.push(sections.join("\n\n"));
        out.push(String::new());
        out.push("@end".to_string());
    }
    out.join("\n")
}

fn placeholder(keyword: &str, name: &str, warnings: &[Diagnostic]) -> String {
    let mut out = vec![format!("// {keyword} {name}")];
    out.extend(warnings.iter().map(warning));
    out.join("\n")
}

fn adopted(protocols: &[String]) -> String {
    if protocols.is_empty() {
        String::new()
    } else {
        format!(" <{}>", protocols.join(", "))
    }
}

/// Selectors implied by properties, keyed with whether they are class methods.
fn accessors(properties: &[Property]) -> HashSet<(String, bool)> {
    let mut hidden = HashSet::new();
    for property in properties {
        hidden.insert((property.getter_name(), property.is_class()));
        if let Some(setter) = property.setter_name() {
            hidden.insert((setter, property.is_class()));
        }
    }
    hidden
}

pub(super) struct Renderer<'o> {
    pub formatter: TypeFormatter,
    pub options: &'o DumpOptions,
}

impl Renderer<'_> {
    pub fn protocol(&self, protocol: &Protocol) -> String {
        if protocol.placeholder {
            return placeholder("@protocol", &protocol.name, &protocol.diagnostics);
        }
        let hidden = self.hidden(&protocol.properties);
        let head = format!("@protocol {}{}", protocol.name, adopted(&protocol.protocols));

        let mut sections = vec![
            self.properties(&protocol.properties),
            self.methods(&protocol.class_methods, &hidden),
            self.methods(&protocol.instance_methods, &hidden),
        ];
        let optional = [
            self.methods(&protocol.optional_class_methods, &hidden),
            self.methods(&protocol.optional_instance_methods, &hidden),
        ]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();
        if !optional.is_empty() {
            sections.push(format!("@optional\n{}", optional.join("\n")));
        }
        block(&protocol.diagnostics, head, sections)
    }

    pub fn class(&self, class: &ObjCClass) -> String {
        if class.placeholder {
            return placeholder("@interface", &class.name, &class.diagnostics);
        }
        let superclass = match &class.superclass {
            ClassRef::Root => String::new(),
            ClassRef::Named(name) => format!(" : {name}"),
            ClassRef::Unresolved(_) => " : /* unresolved superclass */".to_string(),
        };
        let mut head = format!(
            "@interface {}{}{}",
            class.name,
            superclass,
            adopted(&class.protocols)
        );
        if class.is_swift {
            head.insert_str(0, "// Swift class\n");
        }

        let ivars = if class.ivars.is_empty() {
            String::new()
        } else {
            let mut lines = vec!["{".to_string()];
            for ivar in &class.ivars {
                let mut line = format!(
                    "{INDENT}{};",
                    self.formatter.member(&ivar.ty, &ivar.name, 1)
                );
                if self.options.show_ivar_offsets {
                    line.push_str(&format!(" // {} = {:#x}", ivar.offset, ivar.offset));
                }
                lines.push(line);
            }
            lines.push("}".to_string());
            lines.join("\n")
        };

        let hidden = self.hidden(&class.properties);
        let sections = vec![
            ivars,
            self.properties(&class.properties),
            self.methods(&class.class_methods, &hidden),
            self.methods(&class.instance_methods, &hidden),
        ];
        block(&class.diagnostics, head, sections)
    }

    pub fn category(&self, category: &Category) -> String {
        if category.placeholder {
            return placeholder("@interface", &category.name, &category.diagnostics);
        }
        let class = match &category.class {
            ClassRef::Named(name) => name.as_str(),
            ClassRef::Root | ClassRef::Unresolved(_) => "/* unresolved class */",
        };
        let head = format!(
            "@interface {} ({}){}",
            class,
            category.name,
            adopted(&category.protocols)
        );

        let hidden = self.hidden(&category.properties);
        let sections = vec![
            self.properties(&category.properties),
            self.methods(&category.class_methods, &hidden),
            self.methods(&category.instance_methods, &hidden),
        ];
        block(&category.diagnostics, head, sections)
    }

    fn hidden(&self, properties: &[Property]) -> HashSet<(String, bool)> {
        if self.options.hide_property_accessors {
            accessors(properties)
        } else {
            HashSet::new()
        }
    }

    fn properties(&self, properties: &[Property]) -> String {
        properties
            .iter()
            .map(|property| self.property(property))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn property(&self, property: &Property) -> String {
        let flags = property.flags;
        let mut attrs = vec![];
        if flags.contains(PropertyFlags::NONATOMIC) {
            attrs.push("nonatomic".to_string());
        }
        if flags.contains(PropertyFlags::READONLY) {
            attrs.push("readonly".to_string());
        }
        if flags.contains(PropertyFlags::COPY) {
            attrs.push("copy".to_string());
        } else if flags.contains(PropertyFlags::RETAIN) {
            attrs.push("retain".to_string());
        } else if flags.contains(PropertyFlags::WEAK) {
            attrs.push("weak".to_string());
        }
        if let Some(getter) = &property.getter {
            attrs.push(format!("getter={getter}"));
        }
        if let Some(setter) = &property.setter {
            attrs.push(format!("setter={setter}"));
        }
        if flags.contains(PropertyFlags::CLASS) {
            attrs.push("class".to_string());
        }

        let decl = self.formatter.declaration(&property.ty, &property.name);
        if attrs.is_empty() {
            format!("@property {decl};")
        } else {
            format!("@property({}) {decl};", attrs.join(", "))
        }
    }

    fn methods(&self, methods: &[Method], hidden: &HashSet<(String, bool)>) -> String {
        let mut methods: Vec<&Method> = methods
            .iter()
            .filter(|m| !self.options.strips(&m.selector))
            .filter(|m| !hidden.contains(&(m.selector.clone(), m.is_class)))
            .collect();
        if self.options.sort_methods {
            methods.sort_by(|a, b| a.selector.cmp(&b.selector));
        }
        methods
            .into_iter()
            .map(|method| self.method(method))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// `- (id)initWithFrame:(struct CGRect)arg1 style:(long long)arg2;`
    pub fn method(&self, method: &Method) -> String {
        let sign = if method.is_class { '+' } else { '-' };
        let ret = self.formatter.type_name(&method.return_type);

        let colons = method.selector.matches(':').count();
        let name = if colons == 0 {
            method.selector.clone()
        } else {
            method
                .selector
                .split(':')
                .take(colons)
                .enumerate()
                .map(|(i, piece)| {
                    let ty = method
                        .arg_types
                        .get(i)
                        .map(|ty| self.formatter.type_name(ty))
                        .unwrap_or_else(|| "id".to_string());
                    format!("{piece}:({ty})arg{}", i + 1)
                })
                .collect::<Vec<_>>()
                .join(" ")
        };

        let mut line = format!("{sign} ({ret}){name};");
        if self.options.show_method_addresses {
            if let Some(imp) = method.imp {
                line.push_str(&format!(" // IMP={imp:#x}"));
            }
        }
        line
    }
}
