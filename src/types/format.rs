use super::{Aggregate, AggregateKind, Primitive, TypeNode};

/// Typedef name used for `^?`.
pub const UNKNOWN_FUNCTION_POINTER: &str = "UnknownFunctionPointer";
/// Typedef name used for a block without a signature.
pub const UNKNOWN_BLOCK: &str = "UnknownBlock";

const INDENT: &str = "    ";

/// Spells type trees as C declarations.
///
/// Named aggregates are referenced by name at the top level, since their
/// definitions are emitted separately. Inside a definition, nested named
/// aggregates are expanded while fewer than `expand_depth` bodies enclose
/// them. Anonymous aggregates are always expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeFormatter {
    pub expand_depth: usize,
}

#[derive(Debug, Clone, Copy)]
struct Layout {
    /// Number of aggregate bodies enclosing the current node.
    level: usize,
    /// Indentation of the current line, or `None` to keep bodies on one line.
    indent: Option<usize>,
}

fn join(base: &str, declarator: &str) -> String {
    if declarator.is_empty() {
        base.to_string()
    } else {
        format!("{base} {declarator}")
    }
}

fn comment_safe(raw: &str) -> String {
    raw.replace("*/", "* /")
}

impl TypeFormatter {
    pub fn new(expand_depth: usize) -> Self {
        TypeFormatter { expand_depth }
    }

    /// A single-line declaration; an empty `name` gives the bare type.
    pub fn declaration(&self, ty: &TypeNode, name: &str) -> String {
        let layout = Layout {
            level: 0,
            indent: None,
        };
        self.render(ty, name.to_string(), layout)
    }

    pub fn type_name(&self, ty: &TypeNode) -> String {
        self.declaration(ty, "")
    }

    /// A declaration inside a block indented by `indent` levels; anonymous
    /// aggregates are laid out over several lines.
    pub fn member(&self, ty: &TypeNode, name: &str, indent: usize) -> String {
        let layout = Layout {
            level: 0,
            indent: Some(indent),
        };
        self.render(ty, name.to_string(), layout)
    }

    /// `struct Name {\n    int _field1;\n};`
    pub fn definition(&self, kind: AggregateKind, body: &Aggregate) -> String {
        let layout = Layout {
            level: 0,
            indent: Some(0),
        };
        format!("{};", self.aggregate(kind, body, String::new(), layout, true))
    }

    fn render(&self, ty: &TypeNode, declarator: String, layout: Layout) -> String {
        match ty {
            TypeNode::Primitive(Primitive::CString) => {
                join("char", &format!("*{declarator}"))
            }
            TypeNode::Primitive(Primitive::Undefined) => join("__unknown_type /* ? */", &declarator),
            TypeNode::Primitive(prim) => join(prim.c_name(), &declarator),
            TypeNode::Object {
                class_name,
                protocols,
            } => {
                let protocols = if protocols.is_empty() {
                    String::new()
                } else {
                    format!("<{}>", protocols.join(", "))
                };
                match class_name {
                    Some(class) => join(&format!("{class}{protocols}"), &format!("*{declarator}")),
                    None if protocols.is_empty() => join("id", &declarator),
                    None => join(&format!("id {protocols}"), &declarator),
                }
            }
            TypeNode::Block { signature: None } => join(UNKNOWN_BLOCK, &declarator),
            TypeNode::Block {
                signature: Some(types),
            } => {
                let Some((ret, args)) = types.split_first() else {
                    return join(UNKNOWN_BLOCK, &declarator);
                };
                // The first argument is the block literal itself.
                let args = match args.first() {
                    Some(TypeNode::Block { .. }) => &args[1..],
                    _ => args,
                };
                let args = if args.is_empty() {
                    "void".to_string()
                } else {
                    args.iter()
                        .map(|arg| self.type_name(arg))
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                self.render(ret, format!("(^{declarator})({args})"), layout)
            }
            TypeNode::FunctionPointer => join(UNKNOWN_FUNCTION_POINTER, &declarator),
            TypeNode::Pointer(inner) => {
                let declarator = match **inner {
                    TypeNode::Array { .. } => format!("(*{declarator})"),
                    _ => format!("*{declarator}"),
                };
                self.render(inner, declarator, layout)
            }
            TypeNode::Array { count, element } => {
                self.render(element, format!("{declarator}[{count}]"), layout)
            }
            TypeNode::Aggregate { kind, body } => {
                let expand = match (&body.fields, &body.name) {
                    (None, _) => false,
                    (Some(_), None) => true,
                    (Some(_), Some(_)) => layout.level > 0 && layout.level < self.expand_depth,
                };
                self.aggregate(*kind, body, declarator, layout, expand)
            }
            TypeNode::Bitfield(width) => format!("unsigned int {declarator}:{width}"),
            TypeNode::Modified { modifier, inner } => {
                format!("{} {}", modifier.keyword(), self.render(inner, declarator, layout))
            }
            TypeNode::Unknown(raw) => join(
                &format!("__unknown_type /* {} */", comment_safe(raw)),
                &declarator,
            ),
        }
    }

    fn aggregate(
        &self,
        kind: AggregateKind,
        body: &Aggregate,
        declarator: String,
        layout: Layout,
        expand: bool,
    ) -> String {
        let head = match &body.name {
            Some(name) => format!("{} {}", kind.keyword(), name),
            None => format!("{} /* anonymous */", kind.keyword()),
        };
        let fields = match (&body.fields, expand) {
            (Some(fields), true) => fields,
            _ => return join(&head, &declarator),
        };
        let head = match &body.name {
            Some(_) => head,
            None => kind.keyword().to_string(),
        };

        let inner = Layout {
            level: layout.level + 1,
            indent: layout.indent.map(|indent| indent + 1),
        };
        let members: Vec<String> = fields
            .iter()
            .enumerate()
            .map(|(i, field)| {
                let name = match &field.name {
                    Some(name) if !name.is_empty() => name.clone(),
                    _ => format!("_field{}", i + 1),
                };
                format!("{};", self.render(&field.ty, name, inner))
            })
            .collect();

        let block = match layout.indent {
            None if members.is_empty() => format!("{head} {{}}"),
            None => format!("{head} {{ {} }}", members.join(" ")),
            Some(indent) => {
                let mut block = format!("{head} {{\n");
                for member in members {
                    block.push_str(&INDENT.repeat(indent + 1));
                    block.push_str(&member);
                    block.push('\n');
                }
                block.push_str(&INDENT.repeat(indent));
                block.push('}');
                block
            }
        };
        join(&block, &declarator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::decode;

    fn decl(encoding: &str, name: &str) -> String {
        TypeFormatter::new(1).declaration(&decode(encoding).unwrap(), name)
    }

    #[test]
    fn test_simple_declarations() {
        assert_eq!(decl("i", "x"), "int x");
        assert_eq!(decl("Q", ""), "unsigned long long");
        assert_eq!(decl("*", "s"), "char *s");
        assert_eq!(decl("r*", "s"), "const char *s");
        assert_eq!(decl("^^i", "p"), "int **p");
        assert_eq!(decl("[4f]", "v"), "float v[4]");
        assert_eq!(decl("^[4f]", "v"), "float (*v)[4]");
        assert_eq!(decl("b3", "flags"), "unsigned int flags:3");
        assert_eq!(decl("B", "ok"), "_Bool ok");
        assert_eq!(decl("#", ""), "Class");
        assert_eq!(decl(":", "sel"), "SEL sel");
    }

    #[test]
    fn test_objects() {
        assert_eq!(decl("@", "obj"), "id obj");
        assert_eq!(decl("@\"NSString\"", "name"), "NSString *name");
        assert_eq!(decl("@\"NSString\"", ""), "NSString *");
        assert_eq!(decl("@\"<P1><P2>\"", "d"), "id <P1, P2> d");
        assert_eq!(decl("@\"NSView<P>\"", "v"), "NSView<P> *v");
    }

    #[test]
    fn test_blocks_and_function_pointers() {
        assert_eq!(decl("@?", "handler"), "UnknownBlock handler");
        assert_eq!(decl("^?", "fp"), "UnknownFunctionPointer fp");
        assert_eq!(
            decl("@?<v@?@\"NSError\"B>", "completion"),
            "void (^completion)(NSError *, _Bool)"
        );
        assert_eq!(decl("@?<@@?>", "make"), "id (^make)(void)");
    }

    #[test]
    fn test_aggregates() {
        assert_eq!(decl("{CGPoint=dd}", "origin"), "struct CGPoint origin");
        assert_eq!(decl("^{__CFString}", "s"), "struct __CFString *s");
        assert_eq!(
            decl("{?=\"a\"i\"b\"b1}", "flags"),
            "struct { int a; unsigned int b:1; } flags"
        );
        assert_eq!(
            decl("(?=iq)", "u"),
            "union { int _field1; long long _field2; } u"
        );
    }

    #[test]
    fn test_definition_depth() {
        let ty = decode("{CGRect=\"origin\"{CGPoint=\"x\"d\"y\"d}\"size\"{CGSize=dd}}").unwrap();
        let TypeNode::Aggregate { kind, body } = ty else {
            panic!("expected struct");
        };

        let shallow = TypeFormatter::new(1).definition(kind, &body);
        assert_eq!(
            shallow,
            "struct CGRect {\n    struct CGPoint origin;\n    struct CGSize size;\n};"
        );

        let deep = TypeFormatter::new(2).definition(kind, &body);
        assert!(deep.contains("    struct CGPoint {\n        double x;\n        double y;\n    } origin;"));
        assert!(deep.contains("double _field1;"));
    }

    #[test]
    fn test_member_layout() {
        let ty = decode("{?=\"a\"b1\"b\"b2}").unwrap();
        let text = TypeFormatter::new(1).member(&ty, "_flags", 1);
        assert_eq!(
            text,
            "struct {\n        unsigned int a:1;\n        unsigned int b:2;\n    } _flags"
        );
    }

    #[test]
    fn test_unknown() {
        let ty = TypeNode::Unknown("!*/x".into());
        assert_eq!(
            TypeFormatter::new(1).declaration(&ty, "v"),
            "__unknown_type /* !* /x */ v"
        );
    }
}
