use crate::types::{decode, MalformedEncoding, TypeNode};

use super::model::{Property, PropertyFlags};

/// Splits the attribute string at top level commas. Commas inside the type
/// (`T{pair<int, int>=ii}`) or a quoted class name do not split.
fn split_attributes(raw: &str) -> Vec<&str> {
    let mut parts = vec![];
    let mut depth = 0i32;
    let mut quoted = false;
    let mut start = 0;

    for (i, c) in raw.char_indices() {
        match c {
            '"' => quoted = !quoted,
            '{' | '(' | '[' | '<' if !quoted => depth += 1,
            '}' | ')' | ']' | '>' if !quoted => depth -= 1,
            ',' if !quoted && depth <= 0 => {
                parts.push(&raw[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&raw[start..]);
    parts
}

/// Builds a property from its runtime name and attribute string
/// (`T@"NSString",C,N,V_title`). A malformed type is kept as `Unknown` and
/// returned alongside.
pub fn parse_property(
    name: &str,
    raw: &str,
    is_class: bool,
) -> (Property, Option<MalformedEncoding>) {
    let mut flags = if is_class {
        PropertyFlags::CLASS
    } else {
        PropertyFlags::empty()
    };
    let mut encoding = None;
    let mut getter = None;
    let mut setter = None;
    let mut ivar = None;

    for attr in split_attributes(raw) {
        let mut chars = attr.chars();
        let Some(code) = chars.next() else {
            continue;
        };
        let value = chars.as_str();
        match code {
            'T' => encoding = Some(value),
            'R' => flags |= PropertyFlags::READONLY,
            'N' => flags |= PropertyFlags::NONATOMIC,
            'C' => flags |= PropertyFlags::COPY,
            '&' => flags |= PropertyFlags::RETAIN,
            'W' => flags |= PropertyFlags::WEAK,
            'D' => flags |= PropertyFlags::DYNAMIC,
            'G' => getter = Some(value.to_string()),
            'S' => setter = Some(value.to_string()),
            'V' => ivar = Some(value.to_string()),
            // `P` (garbage collection) and `t` (old style type) carry nothing we render.
            _ => {}
        }
    }

    let (ty, error) = match encoding {
        Some(encoding) => match decode(encoding) {
            Ok(ty) => (ty, None),
            Err(err) => (TypeNode::Unknown(encoding.to_string()), Some(err)),
        },
        None => (
            TypeNode::Unknown(String::new()),
            Some(MalformedEncoding {
                raw: raw.to_string(),
                reason: "property has no type attribute".to_string(),
            }),
        ),
    };

    let property = Property {
        name: name.to_string(),
        ty,
        attributes_raw: raw.to_string(),
        flags,
        getter,
        setter,
        ivar: ivar.filter(|ivar| !ivar.is_empty()),
    };
    (property, error)
}
