//! RocksDB-backed persisted state for the streaming indexer framework:
//! the idempotency ledger (§4.4b) and the dead-letter queue (§4.4c).
//! Column families are created idempotently on open, the same way
//! `ckb-db-migration` treats each migration as a no-op once applied.

use evochora_error::StorageError;
use rocksdb::{ColumnFamilyDescriptor, Options, DB};
use std::path::Path;
use std::sync::Arc;

const CF_IDEMPOTENCY: &str = "idempotency";
const CF_DEAD_LETTER: &str = "dead_letter";

/// The durable store a streaming indexer uses to track which batches
/// it has already committed and which it has given up on (§4.4).
pub trait PersistedState: Send + Sync {
    /// True if `key` (an idempotency key, §4.4b) has already been
    /// durably committed.
    fn is_processed(&self, key: &str) -> Result<bool, StorageError>;

    /// Durably records that `key` has been committed.
    fn mark_processed(&self, key: &str) -> Result<(), StorageError>;

    /// Appends a poison message to the dead-letter queue (§4.4c).
    fn push_dead_letter(&self, key: &str, reason: &str) -> Result<(), StorageError>;

    /// Lists dead-lettered keys, in insertion order.
    fn list_dead_letters(&self) -> Result<Vec<(String, String)>, StorageError>;
}

/// Opens (creating if absent) the column families this driver needs.
/// Column-family creation is idempotent: `create_missing_column_families`
/// means re-opening an already-migrated database is a no-op.
pub struct RocksDbPersistedState {
    db: Arc<DB>,
}

impl RocksDbPersistedState {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_IDEMPOTENCY, Options::default()),
            ColumnFamilyDescriptor::new(CF_DEAD_LETTER, Options::default()),
        ];
        let db = DB::open_cf_descriptors(&opts, path, cf_descriptors).map_err(StorageError::new)?;
        Ok(Self { db: Arc::new(db) })
    }
}

impl PersistedState for RocksDbPersistedState {
    fn is_processed(&self, key: &str) -> Result<bool, StorageError> {
        let cf = self
            .db
            .cf_handle(CF_IDEMPOTENCY)
            .expect("idempotency column family was created on open");
        Ok(self
            .db
            .get_pinned_cf(cf, key.as_bytes())
            .map_err(StorageError::new)?
            .is_some())
    }

    fn mark_processed(&self, key: &str) -> Result<(), StorageError> {
        let cf = self
            .db
            .cf_handle(CF_IDEMPOTENCY)
            .expect("idempotency column family was created on open");
        self.db
            .put_cf(cf, key.as_bytes(), [])
            .map_err(StorageError::new)
    }

    fn push_dead_letter(&self, key: &str, reason: &str) -> Result<(), StorageError> {
        let cf = self
            .db
            .cf_handle(CF_DEAD_LETTER)
            .expect("dead letter column family was created on open");
        self.db
            .put_cf(cf, key.as_bytes(), reason.as_bytes())
            .map_err(StorageError::new)
    }

    fn list_dead_letters(&self) -> Result<Vec<(String, String)>, StorageError> {
        let cf = self
            .db
            .cf_handle(CF_DEAD_LETTER)
            .expect("dead letter column family was created on open");
        let mut out = Vec::new();
        for item in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            let (key, value) = item.map_err(StorageError::new)?;
            out.push((
                String::from_utf8_lossy(&key).into_owned(),
                String::from_utf8_lossy(&value).into_owned(),
            ));
        }
        Ok(out)
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod test_util {
    use super::*;
    use std::collections::BTreeMap;
    use parking_lot::Mutex;

    /// An in-memory [`PersistedState`], for unit and streaming-loop
    /// tests that don't need an on-disk database.
    #[derive(Default)]
    pub struct InMemoryPersistedState {
        processed: Mutex<BTreeMap<String, ()>>,
        dead_letters: Mutex<Vec<(String, String)>>,
    }

    impl InMemoryPersistedState {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl PersistedState for InMemoryPersistedState {
        fn is_processed(&self, key: &str) -> Result<bool, StorageError> {
            Ok(self.processed.lock().contains_key(key))
        }

        fn mark_processed(&self, key: &str) -> Result<(), StorageError> {
            self.processed.lock().insert(key.to_string(), ());
            Ok(())
        }

        fn push_dead_letter(&self, key: &str, reason: &str) -> Result<(), StorageError> {
            self.dead_letters
                .lock()
                .push((key.to_string(), reason.to_string()));
            Ok(())
        }

        fn list_dead_letters(&self) -> Result<Vec<(String, String)>, StorageError> {
            Ok(self.dead_letters.lock().clone())
        }
    }
}
