//! The processor contract a concrete indexer implements (§4.3).

use evochora_error::Error;
use evochora_types::{ChunkFieldFilter, TickDataChunk};

/// What a concrete indexer plugs into the streaming worker loop.
/// `process_chunk` only stages work; `commit_processed_chunks` is the
/// one place a transaction actually lands.
pub trait BatchProcessor: Send {
    /// Called once, after metadata is known, before any chunk is
    /// processed. Must tolerate reruns and concurrent calls across
    /// workers.
    fn prepare_tables(&mut self, run_id: &str) -> Result<(), Error>;

    /// Called once per chunk, in order within a batch. Must not
    /// commit.
    fn process_chunk(&mut self, chunk: &TickDataChunk) -> Result<(), Error>;

    /// Called when the uncommitted-chunk count reaches
    /// `insert_batch_size` or the per-flush timeout elapses. Must
    /// atomically persist all staged work across every pending batch.
    fn commit_processed_chunks(&mut self) -> Result<(), Error>;

    /// Lets the framework skip heavy fields during deserialization.
    /// Defaults to retaining everything.
    fn chunk_field_filter(&self) -> ChunkFieldFilter {
        ChunkFieldFilter::All
    }

    /// Final hook after the last commit.
    fn on_shutdown(&mut self) {}
}

/// A processor that stages nothing and commits trivially — for
/// exercising the worker loop's ACK/commit/DLQ machinery without a
/// real backing store.
#[derive(Default)]
pub struct NullProcessor {
    pub prepared_for: Vec<String>,
    pub chunks_seen: Vec<u64>,
    pub commit_count: u32,
    pub shutdown_called: bool,
    pub fail_next_commit: bool,
    pub fail_chunk_first_tick: Option<u64>,
    /// Fails exactly the commit attempt at this 1-based ordinal
    /// (counting both successful and failed attempts), then behaves
    /// normally after — for tests that need a specific commit in a
    /// longer sequence to fail once.
    pub fail_commit_attempt_number: Option<u32>,
    commit_attempts: u32,
}

impl NullProcessor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BatchProcessor for NullProcessor {
    fn prepare_tables(&mut self, run_id: &str) -> Result<(), Error> {
        self.prepared_for.push(run_id.to_string());
        Ok(())
    }

    fn process_chunk(&mut self, chunk: &TickDataChunk) -> Result<(), Error> {
        if self.fail_chunk_first_tick == Some(chunk.first_tick) {
            return Err(evochora_error::IndexerError(format!(
                "simulated processing failure at tick {}",
                chunk.first_tick
            ))
            .into());
        }
        self.chunks_seen.push(chunk.first_tick);
        Ok(())
    }

    fn commit_processed_chunks(&mut self) -> Result<(), Error> {
        self.commit_attempts += 1;
        if self.fail_next_commit || self.fail_commit_attempt_number == Some(self.commit_attempts) {
            self.fail_next_commit = false;
            return Err(evochora_error::IndexerError("simulated commit failure".into()).into());
        }
        self.commit_count += 1;
        Ok(())
    }

    fn on_shutdown(&mut self) {
        self.shutdown_called = true;
    }
}
