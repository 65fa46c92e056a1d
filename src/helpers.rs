use nom::{
    error::{Error, ErrorKind},
    Err::Failure,
    IResult,
};

/// Reads a NUL terminated string. A missing terminator consumes the rest of the input.
pub fn string_upto_null_terminator(bytes: &[u8]) -> IResult<&[u8], String> {
    match bytes.iter().position(|b| *b == 0) {
        Some(end) => Ok((
            &bytes[end + 1..],
            String::from_utf8_lossy(&bytes[..end]).into_owned(),
        )),
        None => Ok((&[], String::from_utf8_lossy(bytes).into_owned())),
    }
}

/// Reads a fixed width, NUL padded name such as a segment or section name.
pub fn fixed_name(bytes: &[u8], width: usize) -> IResult<&[u8], String> {
    let (rest, raw) = nom::bytes::complete::take(width)(bytes)?;
    let (_, name) = string_upto_null_terminator(raw)?;
    Ok((rest, name))
}

/// Formats a packed `xxxx.yy.zz` dylib version.
pub fn version_string(version: u32) -> String {
    format!(
        "{}.{}.{}",
        version >> 16,
        (version >> 8) & 0xff,
        version & 0xff
    )
}

pub fn read_uleb(bytes: &[u8]) -> IResult<&[u8], u64> {
    let mut result = 0;
    let mut shift = 0;
    let mut cursor = bytes;

    loop {
        let (remaining, byte) = nom::number::complete::u8(cursor)?;
        cursor = remaining;

        if shift >= 64 {
            return Err(Failure(Error::new(cursor, ErrorKind::TooLarge)));
        }
        result |= ((byte & 0x7f) as u64) << shift;
        if (byte & 0x80) == 0 {
            break;
        }
        shift += 7;
    }

    Ok((cursor, result))
}

pub fn read_sleb(bytes: &[u8]) -> IResult<&[u8], i64> {
    let mut result = 0;
    let mut shift = 0;
    let mut cursor = bytes;
    let mut byte;

    loop {
        let (remaining, current) = nom::number::complete::u8(cursor)?;
        cursor = remaining;
        byte = current;

        if shift >= 64 {
            return Err(Failure(Error::new(cursor, ErrorKind::TooLarge)));
        }
        result |= ((byte & 0x7f) as i64) << shift;
        shift += 7;

        if (byte & 0x80) == 0 {
            break;
        }
    }

    if shift < 64 && (byte & 0x40) != 0 {
        result |= -1i64 << shift;
    }

    Ok((cursor, result))
}
