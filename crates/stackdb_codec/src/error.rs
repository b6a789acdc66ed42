//! Codec errors.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// A value could not be converted to or from CBOR.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Serializing a `target` failed.
    #[error("cannot encode {target}: {message}")]
    EncodingFailed {
        /// Type being encoded.
        target: &'static str,
        /// What the serializer reported.
        message: String,
    },

    /// The bytes do not hold a valid `target`.
    #[error("cannot decode {target}: {message}")]
    DecodingFailed {
        /// Type being decoded.
        target: &'static str,
        /// What the deserializer reported.
        message: String,
    },
}

impl CodecError {
    /// Encoding failure for `T`.
    pub fn encoding_failed<T: ?Sized>(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            target: short_type_name::<T>(),
            message: message.into(),
        }
    }

    /// Decoding failure for `T`.
    pub fn decoding_failed<T: ?Sized>(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            target: short_type_name::<T>(),
            message: message.into(),
        }
    }
}

/// Last path segment of the type name, `stackdb_codec::RecordDictionary`
/// becomes `RecordDictionary`.
fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
