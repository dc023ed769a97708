//! Content-addressed object store and persisted-state driver for the
//! telemetry pipeline (§6): how chunks are laid out as blobs, framed on
//! the wire, and how the indexer's idempotency and dead-letter state
//! outlives a single process.

pub mod framing;
pub mod object_store;
pub mod path;
pub mod persisted;

pub use object_store::{FilesystemObjectStore, ObjectStore};
pub use persisted::{PersistedState, RocksDbPersistedState};

#[cfg(any(test, feature = "test-util"))]
pub use object_store::test_util::InMemoryObjectStore;
#[cfg(any(test, feature = "test-util"))]
pub use persisted::test_util::InMemoryPersistedState;
