//! # livemodel channel
//!
//! The serialized statement channel every livemodel database operation goes
//! through.
//!
//! This crate provides:
//! - [`StatementChannel`], the narrow execution interface the runtime consumes
//! - [`SqliteChannel`], a single-connection SQLite implementation
//! - [`InstrumentedChannel`], a counting wrapper with failure injection

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod channel;
mod error;
mod instrumented;
mod sqlite;

pub use channel::{ColumnInfo, ResultSet, Row, StatementChannel};
pub use error::{ChannelError, ChannelResult};
pub use instrumented::InstrumentedChannel;
pub use sqlite::{SqliteChannel, SqliteConfig};

