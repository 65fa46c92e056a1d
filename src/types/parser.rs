use nom::{
    bytes::complete::take_till,
    character::complete::{char, digit0, digit1},
    combinator::map_res,
    error::{Error as NomError, ErrorKind},
    Err, IResult,
};

use super::{Aggregate, AggregateKind, Field, MalformedEncoding, Modifier, Primitive, TypeNode};

/// Nesting beyond this is rejected rather than risk the stack.
const MAX_DEPTH: usize = 512;

/// `close` is set while parsing the fields of an aggregate whose fields are
/// named; it disambiguates `@"Name"` from a following field name.
#[derive(Clone, Copy)]
struct Ctx {
    close: Option<char>,
    depth: usize,
}

impl Ctx {
    fn top() -> Ctx {
        Ctx {
            close: None,
            depth: 0,
        }
    }

    fn nested(self, close: Option<char>) -> Ctx {
        Ctx {
            close,
            depth: self.depth + 1,
        }
    }
}

fn fail(input: &str, kind: ErrorKind) -> Err<NomError<&str>> {
    Err::Error(NomError::new(input, kind))
}

fn malformed(raw: &str, err: Err<NomError<&str>>) -> MalformedEncoding {
    let reason = match err {
        Err::Error(e) | Err::Failure(e) if e.input.is_empty() => {
            format!("{:?} at end of input", e.code)
        }
        Err::Error(e) | Err::Failure(e) => format!("{:?} at {:?}", e.code, e.input),
        Err::Incomplete(_) => "incomplete input".to_string(),
    };
    MalformedEncoding {
        raw: raw.to_string(),
        reason,
    }
}

fn parse_type(input: &str, ctx: Ctx) -> IResult<&str, TypeNode> {
    if ctx.depth > MAX_DEPTH {
        return Err(fail(input, ErrorKind::TooLarge));
    }

    let mut chars = input.chars();
    let c = chars.next().ok_or_else(|| fail(input, ErrorKind::Eof))?;
    let rest = chars.as_str();

    if let Some(modifier) = Modifier::from_code(c) {
        let (rest, inner) = parse_type(rest, ctx.nested(ctx.close))?;
        return Ok((
            rest,
            TypeNode::Modified {
                modifier,
                inner: Box::new(inner),
            },
        ));
    }

    match c {
        '^' => match rest.strip_prefix('?') {
            Some(rest) => Ok((rest, TypeNode::FunctionPointer)),
            None => {
                let (rest, inner) = parse_type(rest, ctx.nested(ctx.close))?;
                Ok((rest, TypeNode::Pointer(Box::new(inner))))
            }
        },
        '@' => parse_object(rest, ctx),
        '[' => parse_array(rest, ctx),
        '{' => parse_aggregate(rest, AggregateKind::Struct, ctx),
        '(' => parse_aggregate(rest, AggregateKind::Union, ctx),
        'b' => {
            let (rest, width) = map_res(digit1, str::parse::<u32>)(rest)?;
            Ok((rest, TypeNode::Bitfield(width)))
        }
        ']' | '}' | ')' | '>' => Err(fail(input, ErrorKind::Char)),
        c => match Primitive::from_code(c) {
            Some(prim) => Ok((rest, TypeNode::Primitive(prim))),
            None => Ok((rest, TypeNode::Unknown(c.to_string()))),
        },
    }
}

fn parse_object(input: &str, ctx: Ctx) -> IResult<&str, TypeNode> {
    if let Some(rest) = input.strip_prefix('?') {
        return match rest.strip_prefix('<') {
            Some(sig) => {
                let (rest, types) = parse_sequence(sig, '>', ctx.nested(None))?;
                let (rest, _) = char('>')(rest)?;
                Ok((
                    rest,
                    TypeNode::Block {
                        signature: Some(types),
                    },
                ))
            }
            None => Ok((rest, TypeNode::Block { signature: None })),
        };
    }

    if let Some(quoted) = input.strip_prefix('"') {
        match quoted.find('"') {
            Some(end) => {
                let after = &quoted[end + 1..];
                let is_class_name = match ctx.close {
                    None => true,
                    Some(close) => after.starts_with('"') || after.starts_with(close),
                };
                if is_class_name {
                    return Ok((after, object_from_quoted(&quoted[..end])));
                }
            }
            None if ctx.close.is_none() => return Err(fail(input, ErrorKind::Char)),
            None => {}
        }
    }

    Ok((input, TypeNode::id()))
}

/// Splits `NSView<P1><P2>` into a class name and protocol names.
fn object_from_quoted(text: &str) -> TypeNode {
    let (class, mut tail) = match text.find('<') {
        Some(i) => (&text[..i], &text[i..]),
        None => (text, ""),
    };

    let mut protocols = vec![];
    while let Some(stripped) = tail.strip_prefix('<') {
        match stripped.find('>') {
            Some(end) => {
                protocols.push(stripped[..end].to_string());
                tail = &stripped[end + 1..];
            }
            None => {
                protocols.push(stripped.to_string());
                break;
            }
        }
    }

    TypeNode::Object {
        class_name: (!class.is_empty()).then(|| class.to_string()),
        protocols,
    }
}

fn parse_array(input: &str, ctx: Ctx) -> IResult<&str, TypeNode> {
    let (rest, digits) = digit0(input)?;
    let count = if digits.is_empty() {
        0
    } else {
        digits
            .parse::<u64>()
            .map_err(|_| fail(input, ErrorKind::TooLarge))?
    };
    let (rest, element) = parse_type(rest, ctx.nested(None))?;
    let (rest, _) = char(']')(rest)?;
    Ok((
        rest,
        TypeNode::Array {
            count,
            element: Box::new(element),
        },
    ))
}

fn parse_aggregate(input: &str, kind: AggregateKind, ctx: Ctx) -> IResult<&str, TypeNode> {
    let (_, close) = kind.delimiters();
    let (rest, name) = take_till(|c| c == '=' || c == close)(input)?;
    let name = match name {
        "" | "?" => None,
        name => Some(name.to_string()),
    };

    if let Some(rest) = rest.strip_prefix(close) {
        let body = Aggregate { name, fields: None };
        return Ok((rest, TypeNode::Aggregate { kind, body }));
    }

    let (mut rest, _) = char('=')(rest)?;
    let named = rest.starts_with('"');
    let field_ctx = ctx.nested(named.then_some(close));
    let mut fields = vec![];

    loop {
        if let Some(after) = rest.strip_prefix(close) {
            rest = after;
            break;
        }

        let mut field_name = None;
        if let Some(quoted) = rest.strip_prefix('"') {
            let end = quoted.find('"').ok_or_else(|| fail(rest, ErrorKind::Char))?;
            field_name = Some(quoted[..end].to_string());
            rest = &quoted[end + 1..];
        }

        let (after, ty) = parse_type(rest, field_ctx)?;
        fields.push(Field {
            name: field_name,
            ty,
        });
        rest = after;
    }

    let body = Aggregate {
        name,
        fields: Some(fields),
    };
    Ok((rest, TypeNode::Aggregate { kind, body }))
}

/// Frame offsets follow each type in method signatures.
fn skip_frame_offset(input: &str) -> &str {
    let input = input
        .strip_prefix(|c: char| c == '+' || c == '-')
        .unwrap_or(input);
    input.trim_start_matches(|c: char| c.is_ascii_digit())
}

fn parse_sequence(mut input: &str, stop: char, ctx: Ctx) -> IResult<&str, Vec<TypeNode>> {
    let mut types = vec![];
    while !input.starts_with(stop) {
        let (rest, ty) = parse_type(input, ctx)?;
        types.push(ty);
        input = skip_frame_offset(rest);
    }
    Ok((input, types))
}

/// Decodes exactly one type.
pub fn decode(encoding: &str) -> Result<TypeNode, MalformedEncoding> {
    match parse_type(encoding, Ctx::top()) {
        Ok(("", ty)) => Ok(ty),
        Ok((rest, _)) => Err(MalformedEncoding {
            raw: encoding.to_string(),
            reason: format!("trailing input {rest:?}"),
        }),
        Err(err) => Err(malformed(encoding, err)),
    }
}

/// Decodes a method signature: the return type followed by every argument,
/// including the implicit `self` and `_cmd`.
pub fn decode_method(encoding: &str) -> Result<Vec<TypeNode>, MalformedEncoding> {
    let mut input = skip_frame_offset(encoding);
    let mut types = vec![];
    while !input.is_empty() {
        let (rest, ty) = parse_type(input, Ctx::top()).map_err(|err| malformed(encoding, err))?;
        types.push(ty);
        input = skip_frame_offset(rest);
    }

    if types.is_empty() {
        return Err(MalformedEncoding {
            raw: encoding.to_string(),
            reason: "no types".to_string(),
        });
    }
    Ok(types)
}
