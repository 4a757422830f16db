//! Static PIX BR Code payload assembly and verification.

use serde::{Deserialize, Serialize};

use crate::{
    crc16::crc16_hex,
    error::{DecodeError, PixError},
    sanitize::{merchant_text, reference_label, validate_pix_key},
    tlv::{build_tlv, parse_tlv, Tlv, HEADER_LEN},
};

pub const ID_PAYLOAD_FORMAT: &str = "00";
pub const ID_MERCHANT_ACCOUNT: &str = "26";
pub const ID_MERCHANT_CATEGORY: &str = "52";
pub const ID_CURRENCY: &str = "53";
pub const ID_AMOUNT: &str = "54";
pub const ID_COUNTRY: &str = "58";
pub const ID_MERCHANT_NAME: &str = "59";
pub const ID_MERCHANT_CITY: &str = "60";
pub const ID_ADDITIONAL_DATA: &str = "62";
pub const ID_CRC: &str = "63";

// Sub-fields of 26.
pub const ID_GUI: &str = "00";
pub const ID_PIX_KEY: &str = "01";

// Sub-field of 62.
pub const ID_REFERENCE_LABEL: &str = "05";

pub const PAYLOAD_FORMAT: &str = "01";
pub const PIX_GUI: &str = "BR.GOV.BCB.PIX";
pub const MERCHANT_CATEGORY: &str = "0000";
pub const CURRENCY_BRL: &str = "986";
pub const COUNTRY_BR: &str = "BR";

pub const MAX_MERCHANT_NAME: usize = 25;
pub const MAX_MERCHANT_CITY: usize = 15;
pub const MAX_REFERENCE_LABEL: usize = 25;
pub const MAX_AMOUNT_LEN: usize = 13;

/// `63` + `04`: the checksum header is part of the checksummed data.
pub const CRC_HEADER: &str = "6304";
pub const CRC_LEN: usize = 4;

/// Top-level field order of a static payload.
const FIELD_ORDER: [&str; 10] = [
    ID_PAYLOAD_FORMAT,
    ID_MERCHANT_ACCOUNT,
    ID_MERCHANT_CATEGORY,
    ID_CURRENCY,
    ID_AMOUNT,
    ID_COUNTRY,
    ID_MERCHANT_NAME,
    ID_MERCHANT_CITY,
    ID_ADDITIONAL_DATA,
    ID_CRC,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PixPayloadRequest {
    pub pix_key: String,
    pub amount: f64,
    pub merchant_name: String,
    pub merchant_city: String,
    #[serde(alias = "txid")]
    pub transaction_id: String,
}

/// Fields read back out of a verified payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedPayload {
    pub pix_key: String,
    pub amount: String,
    pub merchant_name: String,
    pub merchant_city: String,
    pub transaction_id: String,
    pub crc: String,
}

/// Amounts from here up never fit the 13 characters of field `54`.
const AMOUNT_LIMIT: f64 = 1e13;

/// Whole cents, rounded the way JavaScript's `toFixed(2)` rounds: from the
/// exact decimal value of the float, with exact ties going up. `0.015` is
/// stored just below the half cent and gives 1 cent; `0.125` is an exact tie
/// and gives 13.
pub fn amount_to_cents(amount: f64) -> Result<u64, PixError> {
    if !amount.is_finite() || amount < 0.0 || amount >= AMOUNT_LIMIT {
        return Err(PixError::InvalidAmount(amount.to_string()));
    }

    // -0.0 formats as "-0.00".
    let amount = amount.abs();

    // A float sits exactly on a half cent only when amount * 8 is odd;
    // `{:.2}` would break those ties to even.
    let eighths = amount * 8.0;
    if eighths.fract() == 0.0 && eighths % 2.0 == 1.0 {
        return Ok((amount * 100.0 + 0.5) as u64);
    }

    format!("{:.2}", amount)
        .replace('.', "")
        .parse()
        .map_err(|_| PixError::InvalidAmount(amount.to_string()))
}

/// `13.5` -> `"13.50"`: two fraction digits, `.` separator, no grouping.
pub fn format_amount(amount: f64) -> Result<String, PixError> {
    let cents = amount_to_cents(amount)?;
    let formatted = format!("{}.{:02}", cents / 100, cents % 100);

    if formatted.len() > MAX_AMOUNT_LEN {
        return Err(PixError::InvalidAmount(amount.to_string()));
    }

    Ok(formatted)
}

/// Build the static BR Code for `request`.
///
/// Either the complete payload (fields, `6304` and checksum) comes back, or a
/// typed error; nothing partial is ever returned.
pub fn build_payload(request: &PixPayloadRequest) -> Result<String, PixError> {
    let amount = format_amount(request.amount)?;
    let pix_key = validate_pix_key(&request.pix_key)?;

    let merchant_name =
        merchant_text(ID_MERCHANT_NAME, &request.merchant_name, MAX_MERCHANT_NAME)?;
    let merchant_city =
        merchant_text(ID_MERCHANT_CITY, &request.merchant_city, MAX_MERCHANT_CITY)?;
    let label = reference_label(
        ID_REFERENCE_LABEL,
        &request.transaction_id,
        MAX_REFERENCE_LABEL,
    )?;

    let merchant_account = build_tlv(&[
        Tlv {
            t: ID_GUI,
            v: PIX_GUI,
        },
        Tlv {
            t: ID_PIX_KEY,
            v: pix_key,
        },
    ])?;

    let additional_data = build_tlv(&[Tlv {
        t: ID_REFERENCE_LABEL,
        v: &label,
    }])?;

    let mut payload = build_tlv(&[
        Tlv {
            t: ID_PAYLOAD_FORMAT,
            v: PAYLOAD_FORMAT,
        },
        Tlv {
            t: ID_MERCHANT_ACCOUNT,
            v: &merchant_account,
        },
        Tlv {
            t: ID_MERCHANT_CATEGORY,
            v: MERCHANT_CATEGORY,
        },
        Tlv {
            t: ID_CURRENCY,
            v: CURRENCY_BRL,
        },
        Tlv {
            t: ID_AMOUNT,
            v: &amount,
        },
        Tlv {
            t: ID_COUNTRY,
            v: COUNTRY_BR,
        },
        Tlv {
            t: ID_MERCHANT_NAME,
            v: &merchant_name,
        },
        Tlv {
            t: ID_MERCHANT_CITY,
            v: &merchant_city,
        },
        Tlv {
            t: ID_ADDITIONAL_DATA,
            v: &additional_data,
        },
    ])?;

    payload.push_str(CRC_HEADER);
    let crc = crc16_hex(payload.as_bytes());
    payload.push_str(&crc);

    Ok(payload)
}

fn sub_field<'a>(fields: &[Tlv<'a>], tag: &'static str) -> Result<&'a str, DecodeError> {
    fields
        .iter()
        .find(|f| f.t == tag)
        .map(|f| f.v)
        .ok_or(DecodeError::MissingField(tag))
}

/// Parse a payload, check field order and checksum, and return its fields.
pub fn verify_payload(payload: &str) -> Result<DecodedPayload, DecodeError> {
    let fields = parse_tlv(payload)?;

    for (i, expected) in FIELD_ORDER.iter().enumerate() {
        match fields.get(i) {
            Some(f) if f.t == *expected => {}
            Some(f) => {
                return Err(DecodeError::UnexpectedField {
                    expected: expected.to_string(),
                    found: f.t.to_string(),
                })
            }
            None => return Err(DecodeError::MissingField(*expected)),
        }
    }

    if let Some(extra) = fields.get(FIELD_ORDER.len()) {
        return Err(DecodeError::UnexpectedField {
            expected: String::from("end of payload"),
            found: extra.t.to_string(),
        });
    }

    let crc_field = &fields[FIELD_ORDER.len() - 1];
    if crc_field.v.len() != CRC_LEN {
        return Err(DecodeError::InvalidLength {
            offset: payload.len() - crc_field.v.len() - HEADER_LEN,
        });
    }

    let checked = &payload[..payload.len() - CRC_LEN];
    let computed = crc16_hex(checked.as_bytes());
    if computed != crc_field.v {
        return Err(DecodeError::ChecksumMismatch {
            computed,
            found: crc_field.v.to_string(),
        });
    }

    let merchant_account = parse_tlv(fields[1].v)?;
    let gui = sub_field(&merchant_account, ID_GUI)?;
    if gui != PIX_GUI {
        return Err(DecodeError::UnexpectedField {
            expected: PIX_GUI.to_string(),
            found: gui.to_string(),
        });
    }

    let additional_data = parse_tlv(fields[8].v)?;

    Ok(DecodedPayload {
        pix_key: sub_field(&merchant_account, ID_PIX_KEY)?.to_string(),
        amount: fields[4].v.to_string(),
        merchant_name: fields[6].v.to_string(),
        merchant_city: fields[7].v.to_string(),
        transaction_id: sub_field(&additional_data, ID_REFERENCE_LABEL)?.to_string(),
        crc: computed,
    })
}
