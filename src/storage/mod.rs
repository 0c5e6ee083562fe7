//! SQLite storage layer -- schema, pool, ping log.

pub mod ping_log;
pub mod schema;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Truncate to the millisecond precision timestamps are stored at.
/// Writers apply this before persisting so the record they hand back
/// equals the one a later read returns.
pub fn db_precision(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(3)
}

/// Timestamps are stored as fixed-width RFC3339 UTC strings so that
/// lexical ordering in SQL matches chronological ordering.
pub fn to_db_time(ts: DateTime<Utc>) -> String {
    db_precision(ts).to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp inside a row mapper.
pub(crate) fn parse_db_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Parse a stored enum column inside a row mapper.
pub(crate) fn parse_db_enum<T>(idx: usize, raw: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[cfg(test)]
pub(crate) fn test_pool() -> (tempfile::TempDir, Pool) {
    let dir = tempfile::TempDir::new().expect("tempdir");
    let path = dir.path().join("branchwatch-test.db");
    let pool = open_pool(path.to_str().expect("utf-8 path")).expect("open pool");
    (dir, pool)
}
