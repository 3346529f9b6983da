//! Diagnostic dump routing.
//!
//! Failed waits and detections surface captured page content as
//! [`DumpRecord`]s. Without a store configured they print to stdout;
//! with one, records are handed to a long-lived worker task over a
//! bounded queue and written to an expiring key/value table. The
//! engine never reads dumps back.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;

/// Queue depth between the scrape driver and the store worker.
const DUMP_QUEUE_CAPACITY: usize = 64;

/// Which diagnostic channel a dump belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DumpCategory {
    WaitError,
    DetectError,
    CaptchaDump,
}

impl DumpCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WaitError => "wait-errors",
            Self::DetectError => "detect-errors",
            Self::CaptchaDump => "captcha-dumps",
        }
    }
}

/// A captured page or challenge snapshot, surfaced only on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpRecord {
    pub category: DumpCategory,
    pub timestamp: DateTime<Utc>,
    pub target_url: String,
    pub content: String,
}

impl DumpRecord {
    pub fn new(category: DumpCategory, target_url: &str, content: String) -> Self {
        Self {
            category,
            timestamp: Utc::now(),
            target_url: target_url.to_string(),
            content,
        }
    }

    /// Composite store key: `{category}-{unix_ts}-{url}`.
    pub fn key(&self) -> String {
        format!(
            "{}-{}-{}",
            self.category.as_str(),
            self.timestamp.timestamp(),
            self.target_url
        )
    }
}

/// Expiring dump store backed by SQLite.
pub struct DumpStore {
    conn: Connection,
}

impl DumpStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path).context("failed to open dump store")?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS dumps (
                key        TEXT PRIMARY KEY,
                category   TEXT NOT NULL,
                target_url TEXT NOT NULL,
                content    TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER
            )",
            [],
        )
        .context("failed to create dumps table")?;
        Ok(Self { conn })
    }

    /// Write a record. A zero TTL means the record never expires.
    pub fn put(&self, record: &DumpRecord, ttl: Duration) -> Result<()> {
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Some(record.timestamp.timestamp() + ttl.as_secs() as i64)
        };
        self.conn
            .execute(
                "INSERT OR REPLACE INTO dumps
                 (key, category, target_url, content, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.key(),
                    record.category.as_str(),
                    record.target_url,
                    record.content,
                    record.timestamp.timestamp(),
                    expires_at,
                ],
            )
            .context("failed to write dump record")?;
        Ok(())
    }

    /// Delete all records whose expiry has passed. Returns how many.
    pub fn purge_expired(&self) -> Result<usize> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM dumps WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                params![Utc::now().timestamp()],
            )
            .context("failed to purge expired dumps")?;
        Ok(removed)
    }

    pub fn len(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM dumps", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Where surfaced dumps go.
#[derive(Clone)]
pub enum DumpRouter {
    /// Print the captured content to stdout.
    Stdout,
    /// Hand off to the store worker's queue.
    Store(mpsc::Sender<DumpRecord>),
}

impl DumpRouter {
    /// Route one record. Never blocks the caller: store handoff is a
    /// spawned producer task that exits once the queue accepts it.
    pub fn route(&self, record: DumpRecord) {
        match self {
            Self::Stdout => {
                tracing::error!(
                    "dumping content for URL [{}] to stdout:",
                    record.target_url
                );
                println!("{}", record.content);
            }
            Self::Store(tx) => {
                tracing::error!(
                    "dumping content for URL [{}] to the dump store",
                    record.target_url
                );
                let tx = tx.clone();
                tokio::spawn(async move {
                    if tx.send(record).await.is_err() {
                        tracing::warn!("dump store worker is gone, record lost");
                    }
                });
            }
        }
    }
}

/// Spawn the long-lived store worker and return a router feeding it.
///
/// The worker drains its queue until every router clone is dropped,
/// purging expired rows as it goes.
pub fn spawn_store_worker(
    store: DumpStore,
    ttl: Duration,
) -> (DumpRouter, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<DumpRecord>(DUMP_QUEUE_CAPACITY);
    let handle = tokio::spawn(async move {
        tracing::info!(
            "dump store worker started (key expiration: {}s)",
            ttl.as_secs()
        );
        while let Some(record) = rx.recv().await {
            let key = record.key();
            if let Err(e) = store.purge_expired() {
                tracing::warn!("dump store purge failed: {e}");
            }
            match store.put(&record, ttl) {
                Ok(()) => tracing::info!("for key [{key}] store write was successful"),
                Err(e) => tracing::error!("for key [{key}] error encountered during write: {e}"),
            }
        }
    });
    (DumpRouter::Store(tx), handle)
}
