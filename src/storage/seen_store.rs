//! Durable ledger of delivered items.
//!
//! The ledger is a single JSON document replaced atomically on every flush:
//! the new contents go to a temporary file in the same directory, which is
//! synced and then renamed over the old ledger. A crash at any point leaves
//! either the previous or the new document on disk.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::errors::{FeedbagError, FeedbagResult};

const LEDGER_VERSION: u32 = 1;

/// feed identity -> ids of items already delivered (or backfilled).
pub type SeenRecord = BTreeMap<String, BTreeSet<String>>;

#[derive(Debug, Deserialize)]
struct LedgerDocument {
    version: u32,
    feeds: SeenRecord,
}

pub struct SeenStore {
    path: PathBuf,
    record: RwLock<SeenRecord>,
    flush_lock: Mutex<()>,
}

impl SeenStore {
    /// An empty store that will persist to `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self::with_record(path.into(), SeenRecord::new())
    }

    fn with_record(path: PathBuf, record: SeenRecord) -> Self {
        Self {
            path,
            record: RwLock::new(record),
            flush_lock: Mutex::new(()),
        }
    }

    /// Reconstruct the store from the ledger at `path`.
    ///
    /// A missing ledger yields an empty store. A ledger that exists but cannot
    /// be read back fails with [`FeedbagError::CorruptState`]; starting over
    /// with an empty ledger would re-deliver every item. Unversioned ledgers
    /// from older trackers are recognized but not migrated.
    pub fn load(path: impl Into<PathBuf>) -> FeedbagResult<Self> {
        let path = path.into();

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("No seen ledger at {}, starting empty", path.display());
                return Ok(Self::empty(path));
            }
            Err(e) => {
                return Err(FeedbagError::CorruptState {
                    path,
                    reason: e.to_string(),
                })
            }
        };

        let document: LedgerDocument =
            serde_json::from_slice(&bytes).map_err(|e| FeedbagError::CorruptState {
                path: path.clone(),
                reason: unreadable_reason(&bytes, e),
            })?;

        if document.version != LEDGER_VERSION {
            return Err(FeedbagError::CorruptState {
                path,
                reason: format!("unsupported ledger version {}", document.version),
            });
        }

        let items: usize = document.feeds.values().map(BTreeSet::len).sum();
        info!(
            "Loaded seen ledger {} ({} feeds, {} items)",
            path.display(),
            document.feeds.len(),
            items
        );

        Ok(Self::with_record(path, document.feeds))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has_seen(&self, feed_identity: &str, item_id: &str) -> bool {
        self.read()
            .get(feed_identity)
            .is_some_and(|ids| ids.contains(item_id))
    }

    /// Record an item in memory. Durable only after the next [`flush`](Self::flush).
    pub fn mark_seen(&self, feed_identity: &str, item_id: &str) {
        let mut record = self.record.write().unwrap_or_else(|e| e.into_inner());
        record
            .entry(feed_identity.to_string())
            .or_default()
            .insert(item_id.to_string());
    }

    /// Number of items recorded for a feed; zero means first sight.
    pub fn seen_count(&self, feed_identity: &str) -> usize {
        self.read().get(feed_identity).map_or(0, BTreeSet::len)
    }

    /// Atomically replace the ledger with the in-memory record.
    ///
    /// The document is deterministic, so flushing unchanged state twice
    /// writes identical bytes.
    pub fn flush(&self) -> FeedbagResult<()> {
        let _guard = self.flush_lock.lock().unwrap_or_else(|e| e.into_inner());

        let bytes = {
            let record = self.read();
            let document = LedgerDocumentRef {
                version: LEDGER_VERSION,
                feeds: &record,
            };
            serde_json::to_vec_pretty(&document)?
        };

        self.write_atomically(&bytes)
            .map_err(|source| FeedbagError::Persistence {
                path: self.path.clone(),
                source,
            })?;

        debug!("Flushed seen ledger to {}", self.path.display());
        Ok(())
    }

    fn write_atomically(&self, bytes: &[u8]) -> io::Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(bytes)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        // Make the rename itself durable.
        #[cfg(unix)]
        fs::File::open(&dir)?.sync_all()?;

        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, SeenRecord> {
        self.record.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Serialize)]
struct LedgerDocumentRef<'a> {
    version: u32,
    feeds: &'a SeenRecord,
}

/// Explain why `bytes` is not a ledger document.
///
/// A JSON object without a `version` key is the unversioned layout of older
/// trackers (`{feed_url: {hash: {url, title, seen_at}}}`); it is named as such
/// so the operator knows to move it aside rather than repair it.
fn unreadable_reason(bytes: &[u8], error: serde_json::Error) -> String {
    match serde_json::from_slice::<serde_json::Value>(bytes) {
        Ok(serde_json::Value::Object(map)) if !map.contains_key("version") => {
            "unversioned ledger from an older tracker; it is not migrated, \
             move it aside to start with an empty ledger"
                .to_string()
        }
        _ => error.to_string(),
    }
}
