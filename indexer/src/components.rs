//! Pluggable indexer components (§4.4). Each concrete indexer declares
//! which of these it requires; required components that can't find
//! their backing resource fail construction, optional ones are simply
//! omitted.

use evochora_error::StorageError;
use evochora_store::{ObjectStore, PersistedState};
use evochora_types::SimulationMetadata;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Polls the metadata store for `(run_id, metadata)` until found or a
/// maximum wait elapses (§4.4.a). `prepare_tables` and
/// `chunk_field_filter` may call `get_metadata()`; by the time
/// `process_chunk` runs, metadata is assumed present.
pub struct MetadataReadiness {
    metadata: SimulationMetadata,
}

impl MetadataReadiness {
    /// Blocks, polling `store` at `poll_interval`, until a metadata
    /// blob for `run_id` appears or `max_wait` elapses.
    pub fn wait_for(
        store: &dyn ObjectStore,
        run_id: &str,
        poll_interval: Duration,
        max_wait: Duration,
    ) -> Result<Self, StorageError> {
        let deadline = Instant::now() + max_wait;
        loop {
            if let Some(path) = store.find_metadata_path(run_id)? {
                let bytes = store.read_message(&path)?;
                let metadata: SimulationMetadata =
                    bincode::deserialize(&bytes).map_err(StorageError::new)?;
                return Ok(Self { metadata });
            }
            if Instant::now() >= deadline {
                return Err(StorageError::new(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("metadata for run {run_id} did not appear within {max_wait:?}"),
                )));
            }
            std::thread::sleep(poll_interval);
        }
    }

    pub fn get_metadata(&self) -> &SimulationMetadata {
        &self.metadata
    }
}

/// The idempotency gate (§4.4.b): a monotone `set<batch_id>` backed by
/// [`PersistedState`]. Spurious membership is tolerated — a false
/// positive only means a batch is skipped and redelivery catches it.
pub struct IdempotencyGate {
    state: Arc<dyn PersistedState>,
}

impl IdempotencyGate {
    pub fn new(state: Arc<dyn PersistedState>) -> Self {
        Self { state }
    }

    pub fn is_processed(&self, batch_id: &str) -> Result<bool, StorageError> {
        self.state.is_processed(batch_id)
    }

    pub fn mark_processed(&self, batch_id: &str) -> Result<(), StorageError> {
        self.state.mark_processed(batch_id)
    }
}

/// The dead-letter gate (§4.4.c): counts retries per batch id and
/// decides when a batch's retry budget is exhausted.
pub struct DeadLetterGate {
    state: Arc<dyn PersistedState>,
    retry_counts: Mutex<std::collections::HashMap<String, u32>>,
    max_retries: u32,
}

impl DeadLetterGate {
    pub fn new(state: Arc<dyn PersistedState>, max_retries: u32) -> Self {
        Self {
            state,
            retry_counts: Mutex::new(std::collections::HashMap::new()),
            max_retries,
        }
    }

    /// True once `batch_id` has failed `max_retries` times already.
    pub fn should_move_to_dlq(&self, batch_id: &str) -> bool {
        let mut counts = self.retry_counts.lock();
        let count = counts.entry(batch_id.to_string()).or_insert(0);
        *count += 1;
        *count > self.max_retries
    }

    pub fn move_to_dlq(&self, batch_id: &str, cause: &str) -> Result<(), StorageError> {
        self.state.push_dead_letter(batch_id, cause)?;
        self.retry_counts.lock().remove(batch_id);
        Ok(())
    }

    pub fn reset_retry_count(&self, batch_id: &str) {
        self.retry_counts.lock().remove(batch_id);
    }
}

/// Chunk buffering for indexers that cannot stream-commit per chunk
/// (§4.4.d): accumulates chunks from multiple batches in parallel, and
/// reports which batch ids become fully flushed. A batch id is ready
/// only once every chunk it ever contributes has left the buffer,
/// which can span more than one `flush()` call — the same
/// complete-flag-plus-counts shape `StreamingAckTracker` uses to decide
/// when a batch is ackable.
pub struct ChunkBuffer<C> {
    chunks: Vec<C>,
    batch_id_of_each_chunk: Vec<String>,
    flush_size: usize,
    flush_timeout: Duration,
    last_flush: Instant,
    contributed: HashMap<String, usize>,
    flushed: HashMap<String, usize>,
    complete: HashSet<String>,
}

impl<C> ChunkBuffer<C> {
    pub fn new(flush_size: usize, flush_timeout: Duration) -> Self {
        Self {
            chunks: Vec::new(),
            batch_id_of_each_chunk: Vec::new(),
            flush_size,
            flush_timeout,
            last_flush: Instant::now(),
            contributed: HashMap::new(),
            flushed: HashMap::new(),
            complete: HashSet::new(),
        }
    }

    pub fn push(&mut self, batch_id: String, chunk: C) {
        *self.contributed.entry(batch_id.clone()).or_insert(0) += 1;
        self.chunks.push(chunk);
        self.batch_id_of_each_chunk.push(batch_id);
    }

    /// Marks `batch_id` as having had every one of its chunks pushed;
    /// `flush()` will only report it ready once all of them have also
    /// been popped out of the buffer.
    pub fn mark_batch_complete(&mut self, batch_id: &str) {
        self.complete.insert(batch_id.to_string());
    }

    pub fn should_flush(&self) -> bool {
        self.chunks.len() >= self.flush_size || self.last_flush.elapsed() >= self.flush_timeout
    }

    /// Pops the whole buffer, destructively: once returned, the
    /// caller owns these chunks and the batches must be redelivered on
    /// failure to persist them. Returns the chunks, the ids of batches
    /// whose full chunk set has now left the buffer (ready to ACK),
    /// and how many chunks each touched batch id contributed to this
    /// flush, in first-seen order.
    pub fn flush(&mut self) -> (Vec<C>, Vec<String>, Vec<(String, usize)>) {
        self.last_flush = Instant::now();
        let chunks = std::mem::take(&mut self.chunks);
        let ids = std::mem::take(&mut self.batch_id_of_each_chunk);

        let mut counts: Vec<(String, usize)> = Vec::new();
        for id in ids {
            match counts.iter_mut().find(|(existing, _)| *existing == id) {
                Some((_, count)) => *count += 1,
                None => counts.push((id, 1)),
            }
        }

        let mut ready = Vec::new();
        for (id, count) in &counts {
            let flushed_total = self.flushed.entry(id.clone()).or_insert(0);
            *flushed_total += count;
            let contributed_total = *self.contributed.get(id).unwrap_or(&0);
            if self.complete.contains(id) && *flushed_total >= contributed_total {
                ready.push(id.clone());
            }
        }
        for id in &ready {
            self.complete.remove(id);
            self.contributed.remove(id);
            self.flushed.remove(id);
        }

        (chunks, ready, counts)
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evochora_store::InMemoryPersistedState;

    #[test]
    fn dead_letter_gate_moves_after_exhausting_retries() {
        let state = Arc::new(InMemoryPersistedState::new());
        let gate = DeadLetterGate::new(state.clone(), 2);

        assert!(!gate.should_move_to_dlq("b1"));
        assert!(!gate.should_move_to_dlq("b1"));
        assert!(gate.should_move_to_dlq("b1"));

        gate.move_to_dlq("b1", "poison").unwrap();
        let letters = state.list_dead_letters().unwrap();
        assert_eq!(letters, vec![("b1".to_string(), "poison".to_string())]);
    }

    #[test]
    fn chunk_buffer_flushes_by_size_and_reports_batch_counts() {
        let mut buffer: ChunkBuffer<u32> = ChunkBuffer::new(2, Duration::from_secs(60));
        buffer.push("b1".into(), 1);
        assert!(!buffer.should_flush());
        buffer.push("b1".into(), 2);
        buffer.mark_batch_complete("b1");
        assert!(buffer.should_flush());

        let (chunks, ready, counts) = buffer.flush();
        assert_eq!(chunks, vec![1, 2]);
        assert_eq!(ready, vec!["b1".to_string()]);
        assert_eq!(counts, vec![("b1".to_string(), 2)]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn batch_spanning_two_flushes_is_not_ready_until_the_second() {
        let mut buffer: ChunkBuffer<u32> = ChunkBuffer::new(1, Duration::from_secs(60));
        buffer.push("b1".into(), 1);
        let (chunks, ready, counts) = buffer.flush();
        assert_eq!(chunks, vec![1]);
        assert!(ready.is_empty(), "b1 has more chunks still to come");
        assert_eq!(counts, vec![("b1".to_string(), 1)]);

        buffer.push("b1".into(), 2);
        buffer.mark_batch_complete("b1");
        let (chunks, ready, counts) = buffer.flush();
        assert_eq!(chunks, vec![2]);
        assert_eq!(ready, vec!["b1".to_string()], "all of b1's chunks have now left the buffer");
        assert_eq!(counts, vec![("b1".to_string(), 1)]);
    }

    #[test]
    fn incomplete_batch_is_never_reported_ready() {
        let mut buffer: ChunkBuffer<u32> = ChunkBuffer::new(1, Duration::from_secs(60));
        buffer.push("b1".into(), 1);
        let (_, ready, _) = buffer.flush();
        assert!(ready.is_empty(), "b1 was never marked complete");
    }
}
