//! Two-tier cache for resolved reference lists.
//!
//! **L1** – [`DashMap`] in-memory map.
//! **L2** – Optional SQLite database on disk (persists across process restarts).
//!
//! On [`get`](ReferenceCache::get): check L1 first; on miss, fall through to L2
//! and promote the record back into L1 on hit. On
//! [`insert`](ReferenceCache::insert): write-through to both tiers.
//!
//! Records are keyed by the normalized paper identifier. Only successful
//! resolutions are cached; failures are never stored.

use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{PaperId, Reference, RunLog};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("cache record encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to open cache database at {path}: {source}")]
    Open {
        path: String,
        source: rusqlite::Error,
    },
    #[error("cache database lock poisoned")]
    Poisoned,
}

/// One stored resolution: the ordered references plus the run's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedReferences {
    /// Normalized identifier (the cache key).
    pub paper_id: String,
    /// Identifier as originally requested.
    pub raw_id: String,
    pub references: Vec<Reference>,
    pub log: RunLog,
    /// Seconds since the Unix epoch.
    pub inserted_at: u64,
}

/// Open a SQLite connection with WAL mode and standard pragmas.
fn open_sqlite(path: &Path) -> Result<Connection, rusqlite::Error> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(path, flags)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;
         CREATE TABLE IF NOT EXISTS reference_cache (
             paper_id        TEXT PRIMARY KEY,
             raw_id          TEXT NOT NULL,
             references_json TEXT NOT NULL,
             log_json        TEXT NOT NULL,
             inserted_at     INTEGER NOT NULL
         );",
    )?;
    Ok(conn)
}

fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Thread-safe two-tier cache keyed by normalized paper identifier.
pub struct ReferenceCache {
    entries: DashMap<String, CachedReferences>,
    sqlite: Option<Mutex<Connection>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for ReferenceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceCache {
    /// In-memory-only cache (no disk persistence).
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            sqlite: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Open a persistent cache backed by a SQLite database at `path`.
    ///
    /// The parent directory is created if missing. L1 starts empty and is
    /// populated lazily as records are read.
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            // Surface the real failure through the open error below.
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = open_sqlite(path).map_err(|source| CacheError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self {
            sqlite: Some(Mutex::new(conn)),
            ..Self::new()
        })
    }

    pub fn get(&self, id: &PaperId) -> Option<CachedReferences> {
        let key = id.normalized();

        if let Some(entry) = self.entries.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(paper_id = %key, "cache L1 hit");
            return Some(entry.clone());
        }

        match self.read_l2(&key) {
            Ok(Some(record)) => {
                tracing::trace!(paper_id = %key, "cache L2 hit, promoting to L1");
                self.entries.insert(key, record.clone());
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(record);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(paper_id = %key, error = %e, "unreadable cache record, treating as miss");
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(paper_id = %key, "cache miss");
        None
    }

    fn read_l2(&self, key: &str) -> Result<Option<CachedReferences>, CacheError> {
        let Some(sqlite) = &self.sqlite else {
            return Ok(None);
        };
        let conn = sqlite.lock().map_err(|_| CacheError::Poisoned)?;
        let row = conn
            .query_row(
                "SELECT raw_id, references_json, log_json, inserted_at
                 FROM reference_cache WHERE paper_id = ?1",
                params![key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;
        let Some((raw_id, refs_json, log_json, inserted_at)) = row else {
            return Ok(None);
        };
        Ok(Some(CachedReferences {
            paper_id: key.to_string(),
            raw_id,
            references: serde_json::from_str(&refs_json)?,
            log: serde_json::from_str(&log_json)?,
            inserted_at: inserted_at.max(0) as u64,
        }))
    }

    /// Store a successful resolution. Write-through to both tiers.
    pub fn insert(
        &self,
        id: &PaperId,
        references: Vec<Reference>,
        log: RunLog,
    ) -> Result<CachedReferences, CacheError> {
        let record = CachedReferences {
            paper_id: id.normalized(),
            raw_id: id.raw().to_string(),
            references,
            log,
            inserted_at: now_epoch(),
        };
        tracing::trace!(paper_id = %record.paper_id, count = record.references.len(), "cache insert");

        if let Some(sqlite) = &self.sqlite {
            let refs_json = serde_json::to_string(&record.references)?;
            let log_json = serde_json::to_string(&record.log)?;
            let conn = sqlite.lock().map_err(|_| CacheError::Poisoned)?;
            conn.execute(
                "INSERT OR REPLACE INTO reference_cache
                 (paper_id, raw_id, references_json, log_json, inserted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.paper_id,
                    record.raw_id,
                    refs_json,
                    log_json,
                    record.inserted_at as i64
                ],
            )?;
        }

        self.entries.insert(record.paper_id.clone(), record.clone());
        Ok(record)
    }

    /// Drop one identifier from both tiers. Returns whether anything was removed.
    pub fn remove(&self, id: &PaperId) -> Result<bool, CacheError> {
        let key = id.normalized();
        let mut removed = self.entries.remove(&key).is_some();
        if let Some(sqlite) = &self.sqlite {
            let conn = sqlite.lock().map_err(|_| CacheError::Poisoned)?;
            let n = conn.execute(
                "DELETE FROM reference_cache WHERE paper_id = ?1",
                params![key],
            )?;
            removed |= n > 0;
        }
        Ok(removed)
    }

    /// Remove all records from both L1 and L2.
    pub fn clear(&self) -> Result<(), CacheError> {
        self.entries.clear();
        if let Some(sqlite) = &self.sqlite {
            let conn = sqlite.lock().map_err(|_| CacheError::Poisoned)?;
            conn.execute("DELETE FROM reference_cache", [])?;
        }
        Ok(())
    }

    /// Sorted normalized identifiers known to either tier.
    pub fn ids(&self) -> Result<Vec<String>, CacheError> {
        let mut ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        if let Some(sqlite) = &self.sqlite {
            let conn = sqlite.lock().map_err(|_| CacheError::Poisoned)?;
            let mut stmt = conn.prepare("SELECT paper_id FROM reference_cache")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            for row in rows {
                ids.push(row?);
            }
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    /// Number of cache hits since creation.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Number of cache misses since creation.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Number of records currently in the L1 in-memory cache.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether this cache has a persistent SQLite backing store.
    pub fn has_persistence(&self) -> bool {
        self.sqlite.is_some()
    }
}

impl std::fmt::Debug for ReferenceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceCache")
            .field("l1_entries", &self.entries.len())
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .field("persistent", &self.has_persistence())
            .finish()
    }
}
