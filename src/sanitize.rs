//! Input clean-up applied before anything reaches the TLV encoder.

use unicode_normalization::UnicodeNormalization;

use crate::error::PixError;

fn is_combining_mark(c: char) -> bool {
    ('\u{0300}'..='\u{036f}').contains(&c)
}

fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7e).contains(&b))
}

/// Decompose to NFD and drop the combining diacritical marks, so `"Açaí"`
/// becomes `"Acai"`. Characters with no decomposition pass through untouched.
pub fn strip_diacritics(s: &str) -> String {
    s.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

/// First `max` characters of `s`.
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Merchant name or city: fold, then cut to the field width. An empty result
/// is encoded as an empty field.
pub fn merchant_text(tag: &str, raw: &str, max: usize) -> Result<String, PixError> {
    let folded = truncate_chars(&strip_diacritics(raw), max);

    if !is_printable_ascii(&folded) {
        return Err(PixError::InvalidCharacters {
            tag: tag.to_string(),
        });
    }

    Ok(folded)
}

/// The key is embedded as given; it only has to be present and printable.
/// Length is left to the TLV encoder, which reports the overflowing tag.
pub fn validate_pix_key(key: &str) -> Result<&str, PixError> {
    if key.trim().is_empty() {
        return Err(PixError::MissingRequiredField("pix_key"));
    }

    if !is_printable_ascii(key) {
        return Err(PixError::InvalidCharacters {
            tag: String::from("01"),
        });
    }

    Ok(key)
}

/// Transaction id cut to `max` characters; an empty id stays empty (`0500`).
pub fn reference_label(tag: &str, txid: &str, max: usize) -> Result<String, PixError> {
    let label = truncate_chars(txid, max);

    if !is_printable_ascii(&label) {
        return Err(PixError::InvalidCharacters {
            tag: tag.to_string(),
        });
    }

    Ok(label)
}
