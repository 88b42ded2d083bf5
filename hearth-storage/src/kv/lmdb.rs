//! LMDB-backed key-value store.
//!
//! Uses the heed crate (Rust bindings for LMDB) as the durable store behind
//! the cache. Keys and values are UTF-8 strings stored as raw bytes in a
//! single unnamed database.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The store uses read transactions for
//! `get_item`/`keys` and one write transaction per mutation.

use std::path::Path;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use hearth_core::{HearthResult, StorageError};

use super::KeyValueStore;

/// LMDB-backed [`KeyValueStore`].
pub struct LmdbKeyValueStore {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
}

impl LmdbKeyValueStore {
    /// Open (or create) a store in `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> HearthResult<Self> {
        let path = path.as_ref();
        let open_err = |reason: String| StorageError::Open {
            path: path.display().to_string(),
            reason,
        };

        std::fs::create_dir_all(path).map_err(|e| open_err(e.to_string()))?;

        // SAFETY: the environment is opened once per directory by this store
        // and never reopened while a handle is alive in this process.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path)
        }
        .map_err(|e| open_err(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(|e| open_err(e.to_string()))?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| open_err(e.to_string()))?;
        wtxn.commit().map_err(|e| open_err(e.to_string()))?;

        tracing::debug!(path = %path.display(), max_size_mb, "Opened LMDB key-value store");

        Ok(Self { env, db })
    }
}

impl KeyValueStore for LmdbKeyValueStore {
    fn get_item(&self, key: &str) -> HearthResult<Option<String>> {
        let read_err = |reason: String| StorageError::Read {
            key: key.to_string(),
            reason,
        };

        let rtxn = self.env.read_txn().map_err(|e| read_err(e.to_string()))?;
        match self.db.get(&rtxn, key.as_bytes()) {
            Ok(Some(bytes)) => {
                let value = std::str::from_utf8(bytes)
                    .map_err(|e| read_err(e.to_string()))?
                    .to_string();
                Ok(Some(value))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(read_err(e.to_string()).into()),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> HearthResult<()> {
        let write_err = |reason: String| StorageError::Write {
            key: key.to_string(),
            reason,
        };

        let mut wtxn = self.env.write_txn().map_err(|e| write_err(e.to_string()))?;
        self.db
            .put(&mut wtxn, key.as_bytes(), value.as_bytes())
            .map_err(|e| write_err(e.to_string()))?;
        wtxn.commit().map_err(|e| write_err(e.to_string()))?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> HearthResult<()> {
        let delete_err = |reason: String| StorageError::Delete {
            key: key.to_string(),
            reason,
        };

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| delete_err(e.to_string()))?;
        self.db
            .delete(&mut wtxn, key.as_bytes())
            .map_err(|e| delete_err(e.to_string()))?;
        wtxn.commit().map_err(|e| delete_err(e.to_string()))?;
        Ok(())
    }

    fn keys(&self) -> HearthResult<Vec<String>> {
        let scan_err = |reason: String| StorageError::Scan { reason };

        let rtxn = self.env.read_txn().map_err(|e| scan_err(e.to_string()))?;
        let iter = self.db.iter(&rtxn).map_err(|e| scan_err(e.to_string()))?;

        let mut keys = Vec::new();
        for result in iter {
            match result {
                Ok((key, _)) => match std::str::from_utf8(key) {
                    Ok(key) => keys.push(key.to_string()),
                    // Not ours; the cache only writes UTF-8 keys.
                    Err(_) => continue,
                },
                Err(e) => return Err(scan_err(e.to_string()).into()),
            }
        }

        Ok(keys)
    }
}
