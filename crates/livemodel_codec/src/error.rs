//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while converting between stored and typed values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The value cannot be represented for the field's type.
    #[error("unsupported value for field `{field}`: {message}")]
    UnsupportedType {
        /// The field being converted.
        field: String,
        /// Description of the mismatch.
        message: String,
    },

    /// A NULL was supplied for a field that does not allow it.
    #[error("field `{field}` does not allow NULL")]
    NullNotAllowed {
        /// The field being converted.
        field: String,
    },

    /// Failed to encode a structured value to CBOR.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode CBOR bytes.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },
}

impl CodecError {
    /// Create an unsupported type error.
    pub fn unsupported(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnsupportedType {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }
}
