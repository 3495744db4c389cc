//! # livemodel core
//!
//! Identity-mapped live models over a relational store.
//!
//! This crate provides:
//! - an identity map guaranteeing one live [`Instance`] per model and key
//! - the instance lifecycle: save, delete, revert and reload with dirty
//!   tracking and per-model [`ModelHooks`]
//! - reconciliation of live instances with writes made outside the
//!   lifecycle API, with a conflict hook for locally edited fields
//! - change notifications, optionally batched through a [`Batch`]
//! - a query cache with single-flight generation, invalidated by writes to
//!   the owning models
//!
//! ## Usage
//!
//! ```rust
//! use livemodel_core::{ChangeKind, Database, ModelDef, ModelScope, SaveResult, Value};
//!
//! let db = Database::open_in_memory()?;
//! db.execute_update_query(
//!     None,
//!     "CREATE TABLE people (id INTEGER PRIMARY KEY, name TEXT NOT NULL DEFAULT '', visits INTEGER)",
//!     &[],
//!     false,
//! )?;
//! db.register_model(ModelDef::new("person").table("people"))?;
//!
//! let updates = db.subscribe_to("person");
//! let ann = db.new_instance("person")?;
//! ann.set("name", "Ann")?;
//! assert_eq!(db.save(&ann)?, SaveResult::Succeeded);
//! assert_eq!(updates.try_recv().unwrap().kind, ChangeKind::Insert);
//!
//! // The same key always yields the same object.
//! let again = db.instance_with_key("person", ann.key().clone(), false)?.unwrap();
//! assert!(again.ptr_eq(&ann));
//!
//! // Cached until a `person` write touches something other than `visits`.
//! let named = db.cached_instances_where("person", "name <> ''", &[], &["visits"])?;
//! assert_eq!(named.len(), 1);
//!
//! db.execute_update_query(Some("person"), "UPDATE $T SET visits = 1", &[], true)?;
//! assert_eq!(ann.get("visits")?, Value::Integer(1));
//! db.save_all(&ModelScope::All)?;
//!
//! // Notifications hold instances too.
//! drop((ann, again, named, updates));
//! db.close()?;
//! # Ok::<(), livemodel_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
mod database;
mod error;
mod identity;
mod instance;
mod lifecycle;
mod model;
mod notify;
mod query;
mod reconcile;
mod schema;
mod stats;
mod types;

#[cfg(test)]
mod testing;

pub use cache::CacheKey;
pub use config::Config;
pub use database::{Database, MAX_KEY_GENERATION_ATTEMPTS};
pub use error::{CoreError, CoreResult};
pub use instance::Instance;
pub use model::{default_primary_key, DefaultHooks, ModelDef, ModelHooks};
pub use notify::{Batch, ChangeKind, ChangeNotification};
pub use schema::ModelSchema;
pub use stats::{DatabaseStats, StatsSnapshot};
pub use types::{AffectedFields, EntityState, Key, ModelScope, ReloadOutcome, SaveResult};

pub use livemodel_codec::{FieldInfo, FieldType, Value};
