//! # stackdb codec
//!
//! Record values and their binary encoding.
//!
//! - [`Value`] is the closed set of field kinds a record can hold
//! - [`RecordDictionary`] is a detached record: field name to value
//! - [`to_cbor`] / [`from_cbor`] encode any serde type as CBOR, which is how
//!   the store file persists headers and commits
//!
//! ## Usage
//!
//! ```
//! use stackdb_codec::{from_cbor, to_cbor, RecordDictionary, Value};
//!
//! let dict = RecordDictionary::new().with("id", 7).with("name", "Ada");
//! let bytes = to_cbor(&dict).unwrap();
//! let decoded: RecordDictionary = from_cbor(&bytes).unwrap();
//! assert_eq!(decoded.get("id"), Some(&Value::Integer(7)));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod dictionary;
mod error;
mod value;

pub use dictionary::RecordDictionary;
pub use error::{CodecError, CodecResult};
pub use value::{Value, ValueKind};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a value as CBOR bytes.
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailed`] if serialization fails.
pub fn to_cbor<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| CodecError::encoding_failed::<T>(e.to_string()))?;
    Ok(buf)
}

/// Decodes CBOR bytes into a value.
///
/// # Errors
///
/// Returns [`CodecError::DecodingFailed`] if the bytes are not valid CBOR for
/// `T`.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    ciborium::from_reader(bytes).map_err(|e| CodecError::decoding_failed::<T>(e.to_string()))
}
