//! Fixtures for unit tests.

use crate::config::Config;
use crate::database::Database;
use crate::instance::Instance;
use crate::model::{ModelDef, ModelHooks};
use crate::error::CoreResult;
use livemodel_channel::{InstrumentedChannel, SqliteChannel, StatementChannel};
use livemodel_codec::Value;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

pub(crate) const PEOPLE: &str = "person";

const PEOPLE_TABLE: &str = "CREATE TABLE people (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL DEFAULT '',
    age INTEGER,
    last_seen INTEGER
)";

fn sqlite() -> SqliteChannel {
    let channel = SqliteChannel::open_in_memory().unwrap();
    channel.execute_batch(PEOPLE_TABLE).unwrap();
    channel
}

fn people_over(channel: Arc<dyn StatementChannel>, config: Config, def: ModelDef) -> Database {
    let db = Database::open_with_channel(channel, config);
    db.register_model(def.table("people")).unwrap();
    db
}

/// An in-memory database with the `person` model mapped onto `people`.
pub(crate) fn people_db() -> Database {
    people_over(Arc::new(sqlite()), Config::default(), ModelDef::new(PEOPLE))
}

/// Like [`people_db`], with access to statement counters.
pub(crate) fn instrumented_people_db() -> (Database, Arc<InstrumentedChannel<SqliteChannel>>) {
    instrumented_people_db_with(Config::default())
}

pub(crate) fn instrumented_people_db_with(
    config: Config,
) -> (Database, Arc<InstrumentedChannel<SqliteChannel>>) {
    let channel = Arc::new(InstrumentedChannel::new(sqlite()));
    let db = people_over(channel.clone(), config, ModelDef::new(PEOPLE));
    (db, channel)
}

/// Hook call counters and switches.
#[derive(Default)]
pub(crate) struct Counts {
    pub(crate) init: AtomicUsize,
    pub(crate) inserted: AtomicUsize,
    pub(crate) updated: AtomicUsize,
    pub(crate) deleted: AtomicUsize,
    pub(crate) refused: AtomicUsize,
    pub(crate) failed: AtomicUsize,
    /// Makes every `should_*` hook decline.
    pub(crate) refuse: AtomicBool,
    /// Makes `should_insert` set `last_seen` to [`Counts::STAMP`].
    pub(crate) stamp_on_insert: AtomicBool,
    /// Value returned by `resolve_conflict`; `None` keeps the default.
    pub(crate) resolve_with: Mutex<Option<Value>>,
    /// Arguments of every `resolve_conflict` call.
    pub(crate) conflicts: Mutex<Vec<(String, Value)>>,
}

impl Counts {
    pub(crate) const STAMP: i64 = 1_700_000_000;
}

struct CountingHooks(Arc<Counts>);

impl ModelHooks for CountingHooks {
    fn did_init(&self, _instance: &Instance) {
        self.0.init.fetch_add(1, Ordering::SeqCst);
    }

    fn should_insert(&self, instance: &Instance) -> bool {
        if self.0.stamp_on_insert.load(Ordering::SeqCst) {
            instance.set("last_seen", Counts::STAMP).unwrap();
        }
        !self.0.refuse.load(Ordering::SeqCst)
    }

    fn should_update(&self, _instance: &Instance) -> bool {
        !self.0.refuse.load(Ordering::SeqCst)
    }

    fn should_delete(&self, _instance: &Instance) -> bool {
        !self.0.refuse.load(Ordering::SeqCst)
    }

    fn did_insert(&self, _instance: &Instance) {
        self.0.inserted.fetch_add(1, Ordering::SeqCst);
    }

    fn did_update(&self, _instance: &Instance) {
        self.0.updated.fetch_add(1, Ordering::SeqCst);
    }

    fn did_delete(&self, _instance: &Instance) {
        self.0.deleted.fetch_add(1, Ordering::SeqCst);
    }

    fn save_was_refused(&self, _instance: &Instance) {
        self.0.refused.fetch_add(1, Ordering::SeqCst);
    }

    fn save_did_fail(&self, _instance: &Instance, _error: &crate::CoreError) {
        self.0.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn resolve_conflict(&self, instance: &Instance, field: &str, database_value: &Value) -> CoreResult<Value> {
        self.0
            .conflicts
            .lock()
            .push((field.to_string(), database_value.clone()));
        match self.0.resolve_with.lock().clone() {
            Some(value) => Ok(value),
            None => Err(crate::CoreError::UnresolvedConflict {
                model: instance.model_name().to_string(),
                key: instance.key().clone(),
                field: field.to_string(),
            }),
        }
    }
}

/// A [`people_db`] whose model counts hook calls.
pub(crate) fn counting_people_db() -> (Database, Arc<Counts>) {
    let counts = Arc::new(Counts::default());
    let def = ModelDef::new(PEOPLE).hooks(CountingHooks(Arc::clone(&counts)));
    (people_over(Arc::new(sqlite()), Config::default(), def), counts)
}
