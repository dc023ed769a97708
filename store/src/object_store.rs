//! The content-addressed object store seam (§6): paths are the
//! idempotency key, blobs are written once and read many.

use crate::framing::{read_chunk_record, read_raw_chunk_record, write_chunk_record};
use crate::path;
use evochora_error::StorageError;
use evochora_types::{ChunkFieldFilter, TickDataChunk};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::PathBuf;

/// Drops the fields a [`ChunkFieldFilter`] doesn't want, after
/// deserializing. Bounds what's *retained* rather than what's *read*;
/// `for_each_raw_chunk` is the path that skips parsing entirely.
fn apply_filter(mut chunk: TickDataChunk, filter: ChunkFieldFilter) -> TickDataChunk {
    if !filter.wants_deltas() {
        chunk.deltas.clear();
    }
    if !filter.wants_organisms() {
        chunk.snapshot.organisms.clear();
        for delta in &mut chunk.deltas {
            delta.organisms.clear();
        }
    }
    if !filter.wants_cell_columns() {
        chunk.snapshot.cell_columns = Default::default();
        for delta in &mut chunk.deltas {
            delta.changed_cells = Default::default();
        }
    }
    chunk
}

/// The object store contract the core talks to (§6). A concrete driver
/// (filesystem, an actual cloud object store) is an external
/// collaborator; this trait is the seam.
pub trait ObjectStore: Send + Sync {
    fn write_message(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError>;
    fn read_message(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    /// `None` if no metadata blob has been written for `run_id` yet.
    fn find_metadata_path(&self, run_id: &str) -> Result<Option<String>, StorageError>;

    /// The lexically-last batch file under the run's raw-data prefix —
    /// lexical order equals tick order because names embed zero-padded
    /// tick ranges (§4.5, §6).
    fn find_last_batch_file(&self, run_id: &str) -> Result<Option<String>, StorageError>;

    /// Appends one or more chunks, back-to-back in length-delimited
    /// framing, to a new blob at `path`.
    fn write_chunk_batch(&self, path: &str, chunks: &[TickDataChunk]) -> Result<(), StorageError>;

    /// Streams the chunks at `path`, applying `filter`, calling
    /// `consumer` once per chunk in file order.
    fn for_each_chunk(
        &self,
        path: &str,
        filter: ChunkFieldFilter,
        consumer: &mut dyn FnMut(TickDataChunk) -> Result<(), StorageError>,
    ) -> Result<(), StorageError>;

    /// Streams the raw (decompressed, still-serialized) bytes of each
    /// chunk at `path`, skipping deserialization entirely — for
    /// pass-through indexers (§4.3, §6).
    fn for_each_raw_chunk(
        &self,
        path: &str,
        consumer: &mut dyn FnMut(Vec<u8>) -> Result<(), StorageError>,
    ) -> Result<(), StorageError>;
}

/// A filesystem-backed object store rooted at a base directory. Blobs
/// are plain files; directory fan-out follows `path::batch_path`.
pub struct FilesystemObjectStore {
    root: PathBuf,
}

impl FilesystemObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    fn open_for_read(&self, rel: &str) -> Result<BufReader<File>, StorageError> {
        let file = File::open(self.resolve(rel)).map_err(StorageError::new)?;
        Ok(BufReader::new(file))
    }
}

impl ObjectStore for FilesystemObjectStore {
    fn write_message(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(StorageError::new)?;
        }
        let mut file = BufWriter::new(File::create(full).map_err(StorageError::new)?);
        file.write_all(bytes).map_err(StorageError::new)?;
        Ok(())
    }

    fn read_message(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let mut buf = Vec::new();
        self.open_for_read(path)?
            .read_to_end(&mut buf)
            .map_err(StorageError::new)?;
        Ok(buf)
    }

    fn find_metadata_path(&self, run_id: &str) -> Result<Option<String>, StorageError> {
        let rel = path::metadata_path(run_id);
        if self.resolve(&rel).is_file() {
            Ok(Some(rel))
        } else {
            Ok(None)
        }
    }

    fn find_last_batch_file(&self, run_id: &str) -> Result<Option<String>, StorageError> {
        let prefix = self.resolve(path::raw_prefix(run_id));
        if !prefix.is_dir() {
            return Ok(None);
        }
        let mut relatives = Vec::new();
        for entry in walkdir::WalkDir::new(&prefix)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.file_type().is_file() {
                if let Ok(rel) = entry.path().strip_prefix(&self.root) {
                    relatives.push(rel.to_string_lossy().replace('\\', "/"));
                }
            }
        }
        Ok(relatives.into_iter().max())
    }

    fn write_chunk_batch(&self, path: &str, chunks: &[TickDataChunk]) -> Result<(), StorageError> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(StorageError::new)?;
        }
        let mut out = BufWriter::new(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(full)
                .map_err(StorageError::new)?,
        );
        for chunk in chunks {
            write_chunk_record(&mut out, chunk)?;
        }
        out.flush().map_err(StorageError::new)?;
        Ok(())
    }

    fn for_each_chunk(
        &self,
        path: &str,
        filter: ChunkFieldFilter,
        consumer: &mut dyn FnMut(TickDataChunk) -> Result<(), StorageError>,
    ) -> Result<(), StorageError> {
        let mut reader = self.open_for_read(path)?;
        while let Some(chunk) = read_chunk_record(&mut reader)? {
            consumer(apply_filter(chunk, filter))?;
        }
        Ok(())
    }

    fn for_each_raw_chunk(
        &self,
        path: &str,
        consumer: &mut dyn FnMut(Vec<u8>) -> Result<(), StorageError>,
    ) -> Result<(), StorageError> {
        let mut reader = self.open_for_read(path)?;
        while let Some(raw) = read_raw_chunk_record(&mut reader)? {
            consumer(raw)?;
        }
        Ok(())
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod test_util {
    use super::*;
    use std::collections::BTreeMap;
    use parking_lot::Mutex;

    /// An in-memory object store, for exercising the indexer framework
    /// and resume loader without a real disk or broker.
    #[derive(Default)]
    pub struct InMemoryObjectStore {
        blobs: Mutex<BTreeMap<String, Vec<u8>>>,
    }

    impl InMemoryObjectStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl ObjectStore for InMemoryObjectStore {
        fn write_message(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError> {
            self.blobs
                .lock()
                .insert(path.to_string(), bytes.to_vec());
            Ok(())
        }

        fn read_message(&self, path: &str) -> Result<Vec<u8>, StorageError> {
            self.blobs
                .lock()
                .get(path)
                .cloned()
                .ok_or_else(|| StorageError::new(std::io::Error::new(std::io::ErrorKind::NotFound, path)))
        }

        fn find_metadata_path(&self, run_id: &str) -> Result<Option<String>, StorageError> {
            let rel = path::metadata_path(run_id);
            Ok(self.blobs.lock().contains_key(&rel).then_some(rel))
        }

        fn find_last_batch_file(&self, run_id: &str) -> Result<Option<String>, StorageError> {
            let prefix = path::raw_prefix(run_id);
            Ok(self
                .blobs
                .lock()
                .keys()
                .filter(|k| k.starts_with(&prefix))
                .max()
                .cloned())
        }

        fn write_chunk_batch(&self, path: &str, chunks: &[TickDataChunk]) -> Result<(), StorageError> {
            let mut buf = Vec::new();
            for chunk in chunks {
                write_chunk_record(&mut buf, chunk)?;
            }
            self.blobs.lock().insert(path.to_string(), buf);
            Ok(())
        }

        fn for_each_chunk(
            &self,
            path: &str,
            filter: ChunkFieldFilter,
            consumer: &mut dyn FnMut(TickDataChunk) -> Result<(), StorageError>,
        ) -> Result<(), StorageError> {
            let bytes = self.read_message(path)?;
            let mut cursor = std::io::Cursor::new(bytes);
            while let Some(chunk) = read_chunk_record(&mut cursor)? {
                consumer(apply_filter(chunk, filter))?;
            }
            Ok(())
        }

        fn for_each_raw_chunk(
            &self,
            path: &str,
            consumer: &mut dyn FnMut(Vec<u8>) -> Result<(), StorageError>,
        ) -> Result<(), StorageError> {
            let bytes = self.read_message(path)?;
            let mut cursor = std::io::Cursor::new(bytes);
            while let Some(raw) = read_raw_chunk_record(&mut cursor)? {
                consumer(raw)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::InMemoryObjectStore;
    use super::*;
    use evochora_types::{CellColumnBatch, TickData};
    use std::collections::BTreeMap;

    fn chunk(first_tick: u64) -> TickDataChunk {
        TickDataChunk {
            run_id: "run-1".to_string(),
            first_tick,
            last_tick: first_tick,
            tick_count: 1,
            snapshot: TickData {
                run_id: "run-1".to_string(),
                tick_number: first_tick,
                capture_time_ms: 0,
                cell_columns: CellColumnBatch::default(),
                organisms: vec![],
                total_organisms_created: 0,
                total_unique_genomes: 0,
                genome_hashes_ever_seen: vec![],
                rng_state: vec![],
                plugin_states: BTreeMap::new(),
            },
            deltas: vec![],
        }
    }

    #[test]
    fn filesystem_store_round_trips_a_batch() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemObjectStore::new(dir.path());
        let batch_path = path::batch_path("run-1", 0, 1, &path::DEFAULT_FOLDER_LEVELS);
        store
            .write_chunk_batch(&batch_path, &[chunk(0), chunk(1)])
            .unwrap();

        let mut seen = Vec::new();
        store
            .for_each_chunk(&batch_path, ChunkFieldFilter::All, &mut |c| {
                seen.push(c.first_tick);
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![0, 1]);

        let last = store.find_last_batch_file("run-1").unwrap();
        assert_eq!(last, Some(batch_path));
    }

    #[test]
    fn in_memory_store_supports_raw_pass_through() {
        let store = InMemoryObjectStore::new();
        store.write_chunk_batch("b1", &[chunk(7)]).unwrap();
        let mut raws = Vec::new();
        store
            .for_each_raw_chunk("b1", &mut |raw| {
                raws.push(raw);
                Ok(())
            })
            .unwrap();
        assert_eq!(raws.len(), 1);
        let decoded: TickDataChunk = bincode::deserialize(&raws[0]).unwrap();
        assert_eq!(decoded.first_tick, 7);
    }
}
