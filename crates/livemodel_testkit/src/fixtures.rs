//! Test fixtures and database helpers.
//!
//! Every test database carries the same schema:
//!
//! | Model      | Table       | Primary key       | Notes                       |
//! |------------|-------------|-------------------|-----------------------------|
//! | `person`   | `people`    | `id INTEGER`      | `last_seen` is bookkeeping  |
//! | `employee` | `employees` | `id INTEGER`      | subtype of `person`         |
//! | `pet`      | `pets`      | `id TEXT` (uuid)  | `tags` holds a CBOR array   |
//!
//! The channel is wrapped in an [`InstrumentedChannel`], so tests can count
//! statements or make writes fail.

use livemodel_channel::{InstrumentedChannel, SqliteChannel, SqliteConfig, StatementChannel};
use livemodel_codec::Value;
use livemodel_core::{Config, Database, DefaultHooks, ModelDef, ModelHooks};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Model mapped onto `people`.
pub const PERSON: &str = "person";
/// Subtype of [`PERSON`] mapped onto `employees`.
pub const EMPLOYEE: &str = "employee";
/// Model mapped onto `pets`.
pub const PET: &str = "pet";

/// Schema of every test database.
pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS people (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL DEFAULT '',
    age INTEGER,
    last_seen INTEGER
);
CREATE TABLE IF NOT EXISTS employees (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL DEFAULT '',
    title TEXT
);
CREATE TABLE IF NOT EXISTS pets (
    id TEXT PRIMARY KEY,
    owner_id INTEGER,
    name TEXT NOT NULL,
    vaccinated BOOLEAN NOT NULL DEFAULT 0,
    tags BLOB
);
";

const DB_FILE: &str = "test.sqlite";

/// The channel type used by test databases.
pub type TestChannel = InstrumentedChannel<SqliteChannel>;

/// Options for [`TestDatabase`].
#[derive(Clone)]
pub struct TestOptions {
    /// Database configuration.
    pub config: Config,
    /// Hooks of the `person` model.
    pub person_hooks: Arc<dyn ModelHooks>,
    /// Hooks of the `pet` model.
    pub pet_hooks: Arc<dyn ModelHooks>,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            config: Config::default(),
            person_hooks: Arc::new(DefaultHooks),
            pet_hooks: Arc::new(DefaultHooks),
        }
    }
}

impl TestOptions {
    /// Sets the database configuration.
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Sets the `person` hooks.
    #[must_use]
    pub fn person_hooks(mut self, hooks: Arc<dyn ModelHooks>) -> Self {
        self.person_hooks = hooks;
        self
    }

    /// Sets the `pet` hooks.
    #[must_use]
    pub fn pet_hooks(mut self, hooks: Arc<dyn ModelHooks>) -> Self {
        self.pet_hooks = hooks;
        self
    }
}

/// A test database with automatic cleanup.
pub struct TestDatabase {
    /// The database instance.
    pub db: Arc<Database>,
    /// The instrumented channel under the database.
    pub channel: Arc<TestChannel>,
    options: TestOptions,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestDatabase {
    /// Creates a new in-memory test database.
    pub fn memory() -> Self {
        Self::memory_with(TestOptions::default())
    }

    /// Creates a new in-memory test database with custom options.
    pub fn memory_with(options: TestOptions) -> Self {
        let channel = SqliteChannel::open_in_memory().expect("Failed to open in-memory database");
        Self::build(channel, options, None)
    }

    /// Creates a new file-based test database.
    pub fn file() -> Self {
        Self::file_with(TestOptions::default())
    }

    /// Creates a new file-based test database with custom options.
    pub fn file_with(options: TestOptions) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let channel = open_file(temp_dir.path());
        Self::build(channel, options, Some(temp_dir))
    }

    fn build(channel: SqliteChannel, options: TestOptions, temp_dir: Option<TempDir>) -> Self {
        channel.execute_batch(SCHEMA).expect("Failed to create schema");
        let channel = Arc::new(InstrumentedChannel::new(channel));
        let db = Database::open_with_channel(channel.clone(), options.config.clone());

        db.register_model(
            ModelDef::new(PERSON)
                .table("people")
                .shared_hooks(Arc::clone(&options.person_hooks)),
        )
        .expect("Failed to register person");
        db.register_model(ModelDef::new(EMPLOYEE).table("employees").subtype_of(PERSON))
            .expect("Failed to register employee");
        db.register_model(
            ModelDef::new(PET)
                .table("pets")
                .shared_hooks(Arc::clone(&options.pet_hooks)),
        )
        .expect("Failed to register pet");

        Self {
            db: Arc::new(db),
            channel,
            options,
            _temp_dir: temp_dir,
        }
    }

    /// Returns the database file if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self._temp_dir.as_ref().map(|d| d.path().join(DB_FILE))
    }

    /// Closes a file-based database and opens the same file again.
    ///
    /// # Panics
    ///
    /// Panics for in-memory databases, or if instances are still alive.
    pub fn reopen(mut self) -> Self {
        let temp_dir = self._temp_dir.take().expect("Only file databases can be reopened");
        self.db.close().expect("Instances still alive at reopen");
        let channel = open_file(temp_dir.path());
        Self::build(channel, self.options.clone(), Some(temp_dir))
    }

    /// Writes directly to the store, bypassing the runtime: no cache
    /// invalidation, no reconciliation, no statement counting.
    pub fn external_write(&self, sql: &str, args: &[Value]) -> u64 {
        self.channel
            .inner()
            .execute(sql, args)
            .expect("External write failed")
    }

    /// Inserts a `people` row behind the runtime's back.
    pub fn insert_person(&self, id: i64, name: &str, age: Option<i64>) {
        self.external_write(
            "INSERT INTO people (id, name, age) VALUES (?, ?, ?)",
            &[
                Value::Integer(id),
                Value::from(name),
                age.map_or(Value::Null, Value::Integer),
            ],
        );
    }

    /// Inserts `count` people with ids `1..=count`.
    pub fn populate_people(&self, count: i64) {
        for id in 1..=count {
            self.insert_person(id, &format!("person {id}"), Some(20 + id % 50));
        }
    }
}

fn open_file(dir: &Path) -> SqliteChannel {
    SqliteChannel::open(dir.join(DB_FILE), &SqliteConfig::default().journal_mode("WAL"))
        .expect("Failed to open file database")
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a temporary in-memory database.
///
/// # Example
///
/// ```rust
/// use livemodel_testkit::{with_temp_db, PET};
///
/// with_temp_db(|db| {
///     let pet = db.new_instance(PET).unwrap();
///     assert_eq!(pet.key().as_text().map(str::len), Some(36));
/// });
/// ```
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::memory();
    f(&test_db.db)
}

/// Runs a test with a temporary file-based database.
pub fn with_file_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database, &Path) -> R,
{
    let test_db = TestDatabase::file();
    let path = test_db.path().expect("File database should have a path");
    f(&test_db.db, &path)
}
