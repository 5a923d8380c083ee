//! SQLite-backed durable cache tier.
//!
//! Evicts on TTL only; large payloads are gzip-compressed before the
//! write. WAL mode keeps readers unblocked during writes.

use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rusqlite::{params, Connection, OptionalExtension};

use super::{CachedValue, NegativeReason};
use crate::error::{Error, Result};

/// Payloads at or above this size are compressed before the durable write.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 4096;

pub(crate) struct DurableTier {
    conn: Arc<Mutex<Connection>>,
    compression_threshold: usize,
}

impl DurableTier {
    /// Open or create the durable tier at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::storage(e.to_string()))?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
        })
    }

    /// In-memory durable tier (tests and mock-data mode).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::storage(e.to_string()))?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
        })
    }

    pub fn with_compression_threshold(mut self, bytes: usize) -> Self {
        self.compression_threshold = bytes;
        self
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("cache connection lock poisoned: {}", e)))?;
        f(&conn).map_err(|e| Error::storage(e.to_string()))
    }

    /// Fetch a live entry; expired rows are treated as absent.
    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<(CachedValue, DateTime<Utc>)>> {
        let row = self.with_conn(|conn| {
            conn.query_row(
                "SELECT payload, negative_reason, compressed, expires_at
                 FROM cache_entries WHERE key = ?1",
                params![key],
                |row| {
                    Ok((
                        row.get::<_, Option<Vec<u8>>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, bool>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
        })?;

        let Some((payload, negative_reason, compressed, expires_at)) = row else {
            return Ok(None);
        };

        let expires_at = expires_at
            .parse::<DateTime<Utc>>()
            .map_err(|e| Error::storage(format!("bad expires_at: {}", e)))?;
        if expires_at <= now {
            return Ok(None);
        }

        let value = match negative_reason {
            Some(reason) => CachedValue::Negative(parse_reason(&reason)?),
            None => {
                let bytes = payload.ok_or_else(|| Error::storage("positive entry without payload"))?;
                let json = if compressed { decompress(&bytes)? } else { bytes };
                let value = serde_json::from_slice(&json)?;
                CachedValue::Payload(value)
            }
        };

        Ok(Some((value, expires_at)))
    }

    /// Insert or replace an entry.
    pub fn put(
        &self,
        key: &str,
        source: &str,
        value: &CachedValue,
        cached_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let (payload, negative_reason, compressed) = match value {
            CachedValue::Payload(json) => {
                let bytes = serde_json::to_vec(json)?;
                if bytes.len() >= self.compression_threshold {
                    (Some(compress(&bytes)?), None, true)
                } else {
                    (Some(bytes), None, false)
                }
            }
            CachedValue::Negative(reason) => (None, Some(reason.as_str().to_string()), false),
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO cache_entries
                 (key, source, payload, negative_reason, compressed, cached_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    key,
                    source,
                    payload,
                    negative_reason,
                    compressed,
                    cached_at.to_rfc3339(),
                    expires_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    /// Delete every key starting with `prefix`; returns the count.
    pub fn remove_prefix(&self, prefix: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
            conn.execute(
                "DELETE FROM cache_entries WHERE key LIKE ?1 ESCAPE '\\'",
                params![pattern],
            )
        })
    }

    /// Delete negative entries, optionally restricted to one source.
    pub fn clear_negative(&self, source: Option<&str>) -> Result<usize> {
        self.with_conn(|conn| match source {
            Some(source) => conn.execute(
                "DELETE FROM cache_entries WHERE negative_reason IS NOT NULL AND source = ?1",
                params![source],
            ),
            None => conn.execute(
                "DELETE FROM cache_entries WHERE negative_reason IS NOT NULL",
                [],
            ),
        })
    }

    /// TTL-based eviction; returns the number of rows removed.
    pub fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM cache_entries WHERE expires_at <= ?1",
                params![now.to_rfc3339()],
            )
        })
    }

    pub fn entry_count(&self) -> Result<usize> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| {
                row.get::<_, i64>(0)
            })
        })
        .map(|n| n as usize)
    }
}

fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| Error::storage(e.to_string()))?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS cache_entries (
            key TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            payload BLOB,
            negative_reason TEXT,
            compressed INTEGER NOT NULL DEFAULT 0,
            cached_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        )",
        [],
    )
    .map_err(|e| Error::storage(e.to_string()))?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cache_entries_source ON cache_entries(source)",
        [],
    )
    .map_err(|e| Error::storage(e.to_string()))?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cache_entries_expires ON cache_entries(expires_at)",
        [],
    )
    .map_err(|e| Error::storage(e.to_string()))?;
    Ok(())
}

fn compress(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .and_then(|_| encoder.finish())
        .map_err(|e| Error::storage(format!("compression failed: {}", e)))
}

fn decompress(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::storage(format!("decompression failed: {}", e)))?;
    Ok(out)
}

fn parse_reason(raw: &str) -> Result<NegativeReason> {
    NegativeReason::from_str(raw)
        .ok_or_else(|| Error::storage(format!("unknown negative reason: {}", raw)))
}
