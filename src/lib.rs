pub mod charge;
pub mod crc16;
pub mod error;
pub mod payload;
pub mod render;
pub mod sanitize;
pub mod server;
pub mod tlv;

pub use error::{DecodeError, PixError};
pub use payload::{build_payload, verify_payload, PixPayloadRequest};
