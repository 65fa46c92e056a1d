//! Objective-C type encodings.
//!
//! `decode` turns the runtime's compact encoding strings (`i`, `^{CGPoint=dd}`,
//! `@"NSString"`, ...) into a [`TypeNode`] tree; [`TypeNode::encoding`] spells
//! a tree back out in canonical form.

use std::fmt::{self, Write};

use num_derive::FromPrimitive;
use thiserror::Error;

mod format;
mod parser;

pub use format::{TypeFormatter, UNKNOWN_BLOCK, UNKNOWN_FUNCTION_POINTER};
pub use parser::{decode, decode_method};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed type encoding {raw:?}: {reason}")]
pub struct MalformedEncoding {
    pub raw: String,
    pub reason: String,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
pub enum Primitive {
    Char = b'c',
    Int = b'i',
    Short = b's',
    Long = b'l',
    LongLong = b'q',
    Int128 = b't',
    UnsignedChar = b'C',
    UnsignedInt = b'I',
    UnsignedShort = b'S',
    UnsignedLong = b'L',
    UnsignedLongLong = b'Q',
    UnsignedInt128 = b'T',
    Float = b'f',
    Double = b'd',
    LongDouble = b'D',
    Bool = b'B',
    Void = b'v',
    CString = b'*',
    Class = b'#',
    Selector = b':',
    Atom = b'%',
    Undefined = b'?',
}

impl Primitive {
    pub fn from_code(code: char) -> Option<Primitive> {
        if code.is_ascii() {
            num::FromPrimitive::from_u8(code as u8)
        } else {
            None
        }
    }

    pub fn code(&self) -> char {
        *self as u8 as char
    }

    pub fn c_name(&self) -> &'static str {
        match self {
            Primitive::Char => "char",
            Primitive::Int => "int",
            Primitive::Short => "short",
            Primitive::Long => "long",
            Primitive::LongLong => "long long",
            Primitive::Int128 => "__int128",
            Primitive::UnsignedChar => "unsigned char",
            Primitive::UnsignedInt => "unsigned int",
            Primitive::UnsignedShort => "unsigned short",
            Primitive::UnsignedLong => "unsigned long",
            Primitive::UnsignedLongLong => "unsigned long long",
            Primitive::UnsignedInt128 => "unsigned __int128",
            Primitive::Float => "float",
            Primitive::Double => "double",
            Primitive::LongDouble => "long double",
            Primitive::Bool => "_Bool",
            Primitive::Void | Primitive::Undefined => "void",
            Primitive::CString => "char *",
            Primitive::Class => "Class",
            Primitive::Selector => "SEL",
            Primitive::Atom => "NXAtom",
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
pub enum Modifier {
    Const = b'r',
    In = b'n',
    InOut = b'N',
    Out = b'o',
    ByCopy = b'O',
    ByRef = b'R',
    Oneway = b'V',
    Atomic = b'A',
    Complex = b'j',
}

impl Modifier {
    pub fn from_code(code: char) -> Option<Modifier> {
        if code.is_ascii() {
            num::FromPrimitive::from_u8(code as u8)
        } else {
            None
        }
    }

    pub fn code(&self) -> char {
        *self as u8 as char
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            Modifier::Const => "const",
            Modifier::In => "in",
            Modifier::InOut => "inout",
            Modifier::Out => "out",
            Modifier::ByCopy => "bycopy",
            Modifier::ByRef => "byref",
            Modifier::Oneway => "oneway",
            Modifier::Atomic => "_Atomic",
            Modifier::Complex => "_Complex",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Field {
    pub name: Option<String>,
    pub ty: TypeNode,
}

/// A struct or union. `fields` is `None` for a by-name reference such as `{Foo}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Aggregate {
    pub name: Option<String>,
    pub fields: Option<Vec<Field>>,
}

impl Aggregate {
    /// Ranks competing definitions of the same name; higher is fuller.
    pub fn completeness(&self) -> (usize, usize) {
        match &self.fields {
            None => (0, 0),
            Some(fields) => (
                fields.len() + 1,
                fields.iter().filter(|f| f.name.is_some()).count(),
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateKind {
    Struct,
    Union,
}

impl AggregateKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            AggregateKind::Struct => "struct",
            AggregateKind::Union => "union",
        }
    }

    fn delimiters(&self) -> (char, char) {
        match self {
            AggregateKind::Struct => ('{', '}'),
            AggregateKind::Union => ('(', ')'),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeNode {
    Primitive(Primitive),
    /// `@`, optionally typed: `@"NSString"`, `@"<NSCopying>"`.
    Object {
        class_name: Option<String>,
        protocols: Vec<String>,
    },
    /// `@?`. The signature, when present, is the return type followed by
    /// the arguments, starting with the block literal itself.
    Block {
        signature: Option<Vec<TypeNode>>,
    },
    FunctionPointer,
    Pointer(Box<TypeNode>),
    Array {
        count: u64,
        element: Box<TypeNode>,
    },
    Aggregate {
        kind: AggregateKind,
        body: Aggregate,
    },
    Bitfield(u32),
    Modified {
        modifier: Modifier,
        inner: Box<TypeNode>,
    },
    Unknown(String),
}

impl TypeNode {
    pub fn id() -> TypeNode {
        TypeNode::Object {
            class_name: None,
            protocols: vec![],
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, TypeNode::Unknown(_))
    }

    /// Canonical encoding; decoding it yields an equal tree.
    pub fn encoding(&self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = self.write_encoding(&mut out);
        out
    }

    fn write_encoding(&self, out: &mut String) -> fmt::Result {
        match self {
            TypeNode::Primitive(p) => out.write_char(p.code()),
            TypeNode::Object {
                class_name,
                protocols,
            } => {
                out.write_char('@')?;
                if class_name.is_some() || !protocols.is_empty() {
                    out.write_char('"')?;
                    if let Some(name) = class_name {
                        out.write_str(name)?;
                    }
                    for proto in protocols {
                        write!(out, "<{proto}>")?;
                    }
                    out.write_char('"')?;
                }
                Ok(())
            }
            TypeNode::Block { signature } => {
                out.write_str("@?")?;
                if let Some(types) = signature {
                    out.write_char('<')?;
                    for ty in types {
                        ty.write_encoding(out)?;
                    }
                    out.write_char('>')?;
                }
                Ok(())
            }
            TypeNode::FunctionPointer => out.write_str("^?"),
            TypeNode::Pointer(inner) => {
                out.write_char('^')?;
                inner.write_encoding(out)
            }
            TypeNode::Array { count, element } => {
                write!(out, "[{count}")?;
                element.write_encoding(out)?;
                out.write_char(']')
            }
            TypeNode::Aggregate { kind, body } => {
                let (open, close) = kind.delimiters();
                out.write_char(open)?;
                out.write_str(body.name.as_deref().unwrap_or("?"))?;
                if let Some(fields) = &body.fields {
                    out.write_char('=')?;
                    for field in fields {
                        if let Some(name) = &field.name {
                            write!(out, "\"{name}\"")?;
                        }
                        field.ty.write_encoding(out)?;
                    }
                }
                out.write_char(close)
            }
            TypeNode::Bitfield(width) => write!(out, "b{width}"),
            TypeNode::Modified { modifier, inner } => {
                out.write_char(modifier.code())?;
                inner.write_encoding(out)
            }
            TypeNode::Unknown(raw) => out.write_str(raw),
        }
    }

    /// Visits this node and every node below it, depth first.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a TypeNode)) {
        visit(self);
        match self {
            TypeNode::Block {
                signature: Some(types),
            } => types.iter().for_each(|ty| ty.walk(visit)),
            TypeNode::Pointer(inner) | TypeNode::Modified { inner, .. } => inner.walk(visit),
            TypeNode::Array { element, .. } => element.walk(visit),
            TypeNode::Aggregate { body, .. } => {
                if let Some(fields) = &body.fields {
                    fields.iter().for_each(|field| field.ty.walk(visit));
                }
            }
            _ => {}
        }
    }
}

impl fmt::Display for TypeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoding())
    }
}
