//! # livemodel codec
//!
//! Column values and the row codec for livemodel.
//!
//! This crate provides:
//! - [`Value`], the dynamic value type used for both stored column values
//!   and typed field values
//! - [`FieldType`] and [`FieldInfo`], the per-field descriptors derived from
//!   a table's schema
//! - [`RowCodec`] and [`DefaultRowCodec`], which convert between the two
//!   representations
//! - CBOR storage of structured values and a serde bridge
//!
//! ## Usage
//!
//! ```
//! use livemodel_codec::{DefaultRowCodec, FieldInfo, RowCodec, Value};
//!
//! let field = FieldInfo::from_column("active", "BOOLEAN", true, Some("0"));
//! let codec = DefaultRowCodec::new();
//!
//! let raw = codec.encode(&Value::Bool(true), &field).unwrap();
//! assert_eq!(raw, Value::Integer(1));
//! assert_eq!(codec.decode(raw, &field).unwrap(), Value::Bool(true));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod codec;
mod error;
mod field;
mod value;

pub use cbor::{from_cbor, to_cbor};
pub use codec::{DefaultRowCodec, RowCodec};
pub use error::{CodecError, CodecResult};
pub use field::{FieldInfo, FieldType};
pub use value::Value;
