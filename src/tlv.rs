use crate::error::{DecodeError, PixError};

/// Longest value a 2-digit length prefix can describe.
pub const MAX_VALUE_LEN: usize = 99;

/// Tag (2) + length (2).
pub const HEADER_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tlv<'a> {
    pub t: &'a str,
    pub v: &'a str,
}

fn is_valid_tag(tag: &str) -> bool {
    tag.len() == 2 && tag.bytes().all(|b| b.is_ascii_digit())
}

/// Encode a single field as `tag + LEN(2 digits) + value`.
///
/// The value may itself be the output of earlier `encode_field`/`build_tlv`
/// calls; its length is taken over the concatenated string as given.
pub fn encode_field(tag: &str, value: &str) -> Result<String, PixError> {
    if !is_valid_tag(tag) {
        return Err(PixError::InvalidTag(tag.to_string()));
    }

    if !value.is_ascii() {
        return Err(PixError::InvalidCharacters {
            tag: tag.to_string(),
        });
    }

    if value.len() > MAX_VALUE_LEN {
        return Err(PixError::FieldTooLong {
            tag: tag.to_string(),
            len: value.len(),
        });
    }

    let mut out = String::with_capacity(HEADER_LEN + value.len());
    out.push_str(tag);
    out.push_str(&format!("{:02}", value.len()));
    out.push_str(value);

    Ok(out)
}

/// Encode an ordered list of fields back to back.
pub fn build_tlv(elements: &[Tlv]) -> Result<String, PixError> {
    let mut out = String::new();

    for el in elements {
        out.push_str(&encode_field(el.t, el.v)?);
    }

    Ok(out)
}

/// Strict left-to-right reader. Every record must be complete and the
/// records must consume the whole input.
pub fn parse_tlv(buf: &str) -> Result<Vec<Tlv<'_>>, DecodeError> {
    if !buf.is_ascii() {
        return Err(DecodeError::NotAscii);
    }

    let mut result = Vec::new();
    let mut i = 0;

    while i < buf.len() {
        if i + HEADER_LEN > buf.len() {
            return Err(DecodeError::TruncatedHeader { offset: i });
        }

        let tag = &buf[i..i + 2];
        let len_field = &buf[i + 2..i + HEADER_LEN];

        if !is_valid_tag(tag) || !len_field.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DecodeError::InvalidLength { offset: i });
        }

        let len: usize = len_field
            .parse()
            .map_err(|_| DecodeError::InvalidLength { offset: i })?;

        let start = i + HEADER_LEN;
        let remaining = buf.len() - start;

        if len > remaining {
            return Err(DecodeError::TruncatedValue {
                tag: tag.to_string(),
                offset: i,
                len,
                remaining,
            });
        }

        result.push(Tlv {
            t: tag,
            v: &buf[start..start + len],
        });
        i = start + len;
    }

    Ok(result)
}
