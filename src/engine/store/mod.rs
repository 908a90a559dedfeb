// ── Engine: Temporal Store ──────────────────────────────────────────────────
// Pooled SQLite access for the ontology. One checkout per unit of work; the
// r2d2 guard returns the connection on every exit path, including panics.
//
// Module layout:
//   schema — idempotent migrations: tables, partial unique indexes, FTS5
//
// Concurrency notes:
//   • The one-open-version invariants (identifiers, edges, attributes) are
//     enforced by partial unique indexes filtered on `valid_to IS NULL`;
//     the losing writer surfaces a constraint violation which the owning
//     component maps to its conflict kind.
//   • Each checkout arms a wall-clock deadline via a progress handler, so a
//     runaway statement is interrupted instead of wedging the pool.

pub mod schema;

use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use log::info;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;

use crate::atoms::error::{OntologyError, OntologyResult};
use crate::engine::config::OntologyConfig;
use crate::engine::textmatch::trigram_similarity;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// How many SQLite VM ops run between deadline checks.
const PROGRESS_HANDLER_OPS: i32 = 1000;

/// Pooled store handle. Cheap to clone; created once at startup and passed
/// through as a dependency.
#[derive(Clone)]
pub struct OntologyStore {
    pool: DbPool,
    statement_timeout: Duration,
}

impl OntologyStore {
    /// Build the pool, initialize every connection (pragmas + the
    /// `trgm_similarity` SQL scalar), and run migrations.
    pub fn open(config: &OntologyConfig) -> OntologyResult<Self> {
        info!("[store] Opening ontology store at {:?}", config.db_path);

        let statement_timeout = config.statement_timeout;
        let manager = SqliteConnectionManager::file(&config.db_path)
            .with_init(move |conn| init_connection(conn, statement_timeout));

        let pool = Pool::builder()
            .min_idle(Some(config.pool_min))
            .max_size(config.pool_max)
            .connection_timeout(config.pool_wait)
            .build(manager)?;

        let store = OntologyStore {
            pool,
            statement_timeout,
        };

        schema::run_migrations(&*store.checkout()?)?;
        Ok(store)
    }

    /// Check a connection out of the pool, arming the statement deadline.
    /// Exhaustion past the waiter timeout fails with `Unavailable`.
    pub fn checkout(&self) -> OntologyResult<DbConn> {
        #[allow(unused_mut)]
        let mut conn = self
            .pool
            .get()
            .map_err(|e| OntologyError::Unavailable(format!("connection pool: {e}")))?;

        let deadline = Instant::now() + self.statement_timeout;
        conn.progress_handler(
            PROGRESS_HANDLER_OPS,
            Some(move || Instant::now() >= deadline),
        );
        Ok(conn)
    }
}

fn init_connection(conn: &mut Connection, statement_timeout: Duration) -> rusqlite::Result<()> {
    // journal_mode returns a row; tolerate engines that refuse WAL.
    conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.busy_timeout(statement_timeout)?;

    // Fuzzy alias matching runs store-side so the scan stays close to the
    // data, mirroring an engine-native similarity operator.
    conn.create_scalar_function(
        "trgm_similarity",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let a = ctx.get::<String>(0)?;
            let b = ctx.get::<String>(1)?;
            Ok(trigram_similarity(&a, &b))
        },
    )?;

    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// Timestamp codec
// ═══════════════════════════════════════════════════════════════════════════
// Timestamps are stored as fixed-width RFC-3339 UTC text with microsecond
// precision ("2024-07-01T12:00:00.000000Z"), so SQL string comparison is
// chronological comparison.

pub(crate) fn fmt_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

pub(crate) fn parse_ts_opt(s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_ts).transpose()
}

// ═══════════════════════════════════════════════════════════════════════════
// Enum column codecs
// ═══════════════════════════════════════════════════════════════════════════
// Unknown stored values indicate corruption and surface as conversion
// failures rather than panics.

pub(crate) fn parse_entity_type(s: &str) -> rusqlite::Result<crate::atoms::types::EntityType> {
    crate::atoms::types::EntityType::parse(s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown entity type: {s}").into(),
        )
    })
}

pub(crate) fn parse_entity_status(s: &str) -> rusqlite::Result<crate::atoms::types::EntityStatus> {
    crate::atoms::types::EntityStatus::parse(s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown entity status: {s}").into(),
        )
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn temp_store() -> (tempfile::TempDir, OntologyStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = OntologyConfig::for_db_path(dir.path().join("test.db"));
        let store = OntologyStore::open(&config).expect("open store");
        (dir, store)
    }

    #[test]
    fn test_timestamp_round_trip_is_lexicographic() {
        let t0 = Utc.with_ymd_and_hms(2024, 7, 1, 9, 30, 0).unwrap();
        let t1 = t0 + chrono::Duration::microseconds(1);
        let (s0, s1) = (fmt_ts(t0), fmt_ts(t1));
        assert!(s0 < s1);
        assert_eq!(parse_ts(&s0).unwrap(), t0);
        assert_eq!(parse_ts(&s1).unwrap(), t1);
    }

    #[test]
    fn test_checkout_and_trigram_scalar() {
        let (_dir, store) = temp_store();
        let conn = store.checkout().unwrap();
        let sim: f64 = conn
            .query_row(
                "SELECT trgm_similarity('apple', 'apple')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!((sim - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let (_dir, store) = temp_store();
        let conn = store.checkout().unwrap();
        schema::run_migrations(&conn).expect("second run must succeed");
    }
}
