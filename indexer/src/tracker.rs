//! `StreamingAckTracker` (§4.3.a): per-worker bookkeeping that maps
//! in-flight batches to their streaming/commit progress and governs
//! ACK order. Never shared across workers.

use evochora_topic::BatchMessage;
use std::collections::VecDeque;

struct PendingBatch {
    id: String,
    message: BatchMessage,
    chunks_processed: u64,
    chunks_committed: u64,
    ticks_processed: u64,
    complete: bool,
}

/// Tracks batches from registration through ACK, in arrival order.
/// A batch is eligible to drain once it is both `complete` (every
/// chunk has streamed) and fully committed (`committed >= processed`).
#[derive(Default)]
pub struct StreamingAckTracker {
    pending: VecDeque<PendingBatch>,
}

impl StreamingAckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_batch(&mut self, id: String, message: BatchMessage) {
        self.pending.push_back(PendingBatch {
            id,
            message,
            chunks_processed: 0,
            chunks_committed: 0,
            ticks_processed: 0,
            complete: false,
        });
    }

    /// Records that one more chunk of `id` has been streamed and
    /// staged via `process_chunk`.
    pub fn on_chunk_streamed(&mut self, id: &str, tick_count: u64) {
        if let Some(batch) = self.pending.iter_mut().find(|b| b.id == id) {
            batch.chunks_processed += 1;
            batch.ticks_processed += tick_count;
        }
    }

    /// Marks `id` as having had every chunk streamed.
    pub fn complete_batch(&mut self, id: &str) {
        if let Some(batch) = self.pending.iter_mut().find(|b| b.id == id) {
            batch.complete = true;
        }
    }

    /// Removes `id` from tracking without draining it — used only on
    /// streaming failure (§4.3 error policy), never on success.
    pub fn remove_batch(&mut self, id: &str) {
        self.pending.retain(|b| b.id != id);
    }

    /// Advances every pending batch's committed-count to its
    /// processed-count. Called once per successful commit.
    pub fn advance_committed(&mut self) {
        for batch in &mut self.pending {
            batch.chunks_committed = batch.chunks_processed;
        }
    }

    /// Drains every batch from the head that is both complete and
    /// fully committed, stopping at the first that is not. Returns the
    /// drained batches' ids and messages, in arrival order, for the
    /// caller to ACK.
    pub fn drain_ackable(&mut self) -> Vec<(String, BatchMessage)> {
        let mut drained = Vec::new();
        while let Some(front) = self.pending.front() {
            if front.complete && front.chunks_committed >= front.chunks_processed {
                let batch = self.pending.pop_front().unwrap();
                drained.push((batch.id, batch.message));
            } else {
                break;
            }
        }
        drained
    }

    /// Clears all tracked state wholesale, as required after a commit
    /// failure — redelivery from the topic repopulates it.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}
