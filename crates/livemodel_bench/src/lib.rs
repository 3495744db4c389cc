//! Benchmark utilities.

use livemodel_channel::{SqliteChannel, SqliteConfig, StatementChannel};
use livemodel_codec::Value;
use livemodel_core::{Config, Database, ModelDef};
use rand::Rng;
use std::path::Path;
use std::sync::Arc;

/// Model used by every benchmark.
pub const PERSON: &str = "person";

const PEOPLE: &str = "CREATE TABLE IF NOT EXISTS people (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL DEFAULT '',
    age INTEGER,
    last_seen INTEGER
)";

fn with_people(channel: SqliteChannel, config: Config) -> Database {
    channel.execute_batch(PEOPLE).unwrap();
    let db = Database::open_with_channel(Arc::new(channel), config);
    db.register_model(ModelDef::new(PERSON).table("people")).unwrap();
    db
}

/// An in-memory database with `count` people.
pub fn people_db(count: i64) -> Database {
    people_db_with(count, Config::default())
}

/// Like [`people_db`] with a custom configuration.
pub fn people_db_with(count: i64, config: Config) -> Database {
    let db = with_people(SqliteChannel::open_in_memory().unwrap(), config);
    populate(&db, count);
    db
}

/// A file-backed database with `count` people, in WAL mode.
pub fn file_people_db(dir: &Path, count: i64) -> Database {
    let channel = SqliteChannel::open(
        dir.join("bench.sqlite"),
        &SqliteConfig::default().journal_mode("WAL"),
    )
    .unwrap();
    let db = with_people(channel, Config::default());
    populate(&db, count);
    db
}

/// Inserts people `1..=count` in one statement, without loading them.
pub fn populate(db: &Database, count: i64) {
    if count == 0 {
        return;
    }
    let mut rng = rand::thread_rng();
    let rows: Vec<String> = (1..=count)
        .map(|id| format!("({id}, 'person {id}', {})", rng.gen_range(18..90)))
        .collect();
    let sql = format!("INSERT INTO people (id, name, age) VALUES {}", rows.join(", "));
    db.execute_update_query(Some(PERSON), &sql, &[], false).unwrap();
}

/// Random keys in `1..=count`.
pub fn random_keys(count: i64, n: usize) -> Vec<i64> {
    let mut rng = rand::thread_rng();
    (0..n).map(|_| rng.gen_range(1..=count)).collect()
}

/// A random age as a field value.
pub fn random_age() -> Value {
    Value::Integer(rand::thread_rng().gen_range(18..90))
}
