//! Persistent identity history backed by SQLite.
//!
//! One row per identifier ever observed. Each write is a single statement,
//! so an update is atomic per identifier; the store assumes one writer.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::types::{CrawlResult, IdentityRecord};

/// Counts reported by `status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total: usize,
    pub active: usize,
    pub released: usize,
}

/// Storage seam for identity history.
pub trait IdentityStore: Send {
    /// Every stored record.
    fn all(&self) -> CrawlResult<Vec<IdentityRecord>>;

    fn get(&self, identifier: &str) -> CrawlResult<Option<IdentityRecord>>;

    /// Insert a first sighting. Returns false when the identifier already exists.
    fn insert_new(&mut self, identifier: &str, now: &str) -> CrawlResult<bool>;

    /// Refresh `last_seen_ts`.
    fn touch(&mut self, identifier: &str, now: &str) -> CrawlResult<()>;

    /// Set `released_ts` if it is still unset. Returns whether it was set.
    fn mark_released(&mut self, identifier: &str, now: &str) -> CrawlResult<bool>;

    /// Clear `released_ts`. Returns whether a release was cleared.
    fn reactivate(&mut self, identifier: &str) -> CrawlResult<bool>;

    fn stats(&self) -> CrawlResult<StoreStats>;

    /// Most recently seen records, newest first.
    fn recent(&self, limit: usize) -> CrawlResult<Vec<IdentityRecord>>;
}

/// `IdentityStore` over a SQLite file.
pub struct SqliteIdentityStore {
    db: Connection,
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS identities (
    identifier TEXT PRIMARY KEY,
    first_seen_ts TEXT NOT NULL,
    last_seen_ts TEXT NOT NULL,
    released_ts TEXT NULL
);
CREATE INDEX IF NOT EXISTS idx_identities_last_seen ON identities(last_seen_ts);";

const COLUMNS: &str = "identifier, first_seen_ts, last_seen_ts, released_ts";

impl SqliteIdentityStore {
    /// Open or create the store, creating parent directories as needed.
    pub fn open(path: &Path) -> CrawlResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let db = Connection::open(path)?;
        Self::init(db)
    }

    pub fn open_in_memory() -> CrawlResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(db: Connection) -> CrawlResult<Self> {
        db.execute_batch(SCHEMA)?;
        Ok(Self { db })
    }

    fn query(&self, sql: &str, params: impl rusqlite::Params) -> CrawlResult<Vec<IdentityRecord>> {
        let mut stmt = self.db.prepare(sql)?;
        let rows = stmt
            .query_map(params, from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<IdentityRecord> {
    Ok(IdentityRecord {
        identifier: row.get(0)?,
        first_seen_ts: row.get(1)?,
        last_seen_ts: row.get(2)?,
        released_ts: row.get(3)?,
    })
}

impl IdentityStore for SqliteIdentityStore {
    fn all(&self) -> CrawlResult<Vec<IdentityRecord>> {
        self.query(
            &format!("SELECT {COLUMNS} FROM identities ORDER BY identifier"),
            [],
        )
    }

    fn get(&self, identifier: &str) -> CrawlResult<Option<IdentityRecord>> {
        let record = self
            .db
            .query_row(
                &format!("SELECT {COLUMNS} FROM identities WHERE identifier = ?1"),
                params![identifier],
                from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn insert_new(&mut self, identifier: &str, now: &str) -> CrawlResult<bool> {
        let changed = self.db.execute(
            "INSERT OR IGNORE INTO identities (identifier, first_seen_ts, last_seen_ts)
             VALUES (?1, ?2, ?2)",
            params![identifier, now],
        )?;
        Ok(changed == 1)
    }

    fn touch(&mut self, identifier: &str, now: &str) -> CrawlResult<()> {
        self.db.execute(
            "UPDATE identities SET last_seen_ts = ?2 WHERE identifier = ?1",
            params![identifier, now],
        )?;
        Ok(())
    }

    fn mark_released(&mut self, identifier: &str, now: &str) -> CrawlResult<bool> {
        let changed = self.db.execute(
            "UPDATE identities SET released_ts = ?2
             WHERE identifier = ?1 AND released_ts IS NULL",
            params![identifier, now],
        )?;
        Ok(changed == 1)
    }

    fn reactivate(&mut self, identifier: &str) -> CrawlResult<bool> {
        let changed = self.db.execute(
            "UPDATE identities SET released_ts = NULL
             WHERE identifier = ?1 AND released_ts IS NOT NULL",
            params![identifier],
        )?;
        Ok(changed == 1)
    }

    fn stats(&self) -> CrawlResult<StoreStats> {
        let (total, released): (i64, i64) = self.db.query_row(
            "SELECT COUNT(*), COUNT(released_ts) FROM identities",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let total = total.max(0) as usize;
        let released = released.max(0) as usize;
        Ok(StoreStats {
            total,
            active: total - released,
            released,
        })
    }

    fn recent(&self, limit: usize) -> CrawlResult<Vec<IdentityRecord>> {
        self.query(
            &format!(
                "SELECT {COLUMNS} FROM identities
                 ORDER BY last_seen_ts DESC, identifier LIMIT ?1"
            ),
            params![limit as i64],
        )
    }
}
