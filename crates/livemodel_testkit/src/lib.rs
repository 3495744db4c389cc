//! # livemodel testkit
//!
//! Test utilities for livemodel.
//!
//! This crate provides:
//! - Test databases with a small sample schema, in memory or file-backed
//! - Recording hooks that log every hook call and can refuse or resolve
//! - Property-based test generators using proptest
//! - Concurrency stress helpers
//! - Test logging setup
//!
//! ## Usage
//!
//! ```rust
//! use livemodel_testkit::prelude::*;
//!
//! with_temp_db(|db| {
//!     let ann = db.instance_with_key(PERSON, 1, true).unwrap().unwrap();
//!     ann.set("name", "Ann").unwrap();
//!     db.save(&ann).unwrap();
//!     assert_eq!(db.number_of_instances(PERSON).unwrap(), 1);
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod hooks;
pub mod logging;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::hooks::*;
    pub use crate::logging::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use hooks::*;
pub use logging::*;
pub use stress::*;
