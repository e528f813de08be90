//! Durable local cache — the offline fallback.
//!
//! A redb file holding the last-known-good snapshot and the session,
//! postcard-encoded under fixed keys. Written synchronously on every
//! mutation so an offline client never loses an edit; read once at boot.
//! The remote document store is never consulted for local reads.

use crate::board::Snapshot;
use crate::session::Session;
use redb::{Database, ReadableTable, TableDefinition};
use std::sync::Arc;

const CACHE: TableDefinition<&str, &[u8]> = TableDefinition::new("cache");

const KEY_SNAPSHOT: &str = "snapshot";
const KEY_SESSION: &str = "session";

/// Thin handle to the cache file. Cloneable (Arc inside).
#[derive(Clone)]
pub struct CacheFile {
    db: Arc<Database>,
}

impl CacheFile {
    /// Open (or create) the cache file at the given path.
    pub fn open(path: &str) -> Result<Self, CacheError> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        {
            let _ = txn.open_table(CACHE)?;
        }
        txn.commit()?;

        Ok(CacheFile { db: Arc::new(db) })
    }

    /// Last cached snapshot, or None on a fresh install.
    pub fn load_snapshot(&self) -> Result<Option<Snapshot>, CacheError> {
        self.load(KEY_SNAPSHOT)
    }

    /// Persist the snapshot. Must succeed before a mutation is reported
    /// as applied — callers treat a failure here as the mutation failing.
    pub fn store_snapshot(&self, snapshot: &Snapshot) -> Result<(), CacheError> {
        self.store(KEY_SNAPSHOT, snapshot)
    }

    pub fn load_session(&self) -> Result<Option<Session>, CacheError> {
        self.load(KEY_SESSION)
    }

    pub fn store_session(&self, session: &Session) -> Result<(), CacheError> {
        self.store(KEY_SESSION, session)
    }

    pub fn clear_session(&self) -> Result<(), CacheError> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(CACHE)?;
            table.remove(KEY_SESSION)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn load<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CACHE)?;
        match table.get(key)? {
            Some(data) => {
                let value = postcard::from_bytes(data.value())
                    .map_err(|e| CacheError::Decode(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn store<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        let bytes =
            postcard::to_allocvec(value).map_err(|e| CacheError::Encode(e.to_string()))?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(CACHE)?;
            table.insert(key, bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }
}

// ── Errors ─────────────────────────────────────────────────────

#[derive(Debug)]
pub enum CacheError {
    Redb(String),
    Decode(String),
    Encode(String),
}

// redb 2.x has many error types. Blanket them all into CacheError::Redb.
macro_rules! from_redb {
    ($($t:ty),*) => {
        $(impl From<$t> for CacheError {
            fn from(e: $t) -> Self { CacheError::Redb(e.to_string()) }
        })*
    };
}

from_redb!(
    redb::Error,
    redb::DatabaseError,
    redb::TableError,
    redb::TransactionError,
    redb::StorageError,
    redb::CommitError
);

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::Redb(e) => write!(f, "redb: {e}"),
            CacheError::Decode(e) => write!(f, "decode: {e}"),
            CacheError::Encode(e) => write!(f, "encode: {e}"),
        }
    }
}

impl std::error::Error for CacheError {}

// ── Tests ──────────────────────────────────────────────────────
