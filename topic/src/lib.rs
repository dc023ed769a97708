//! The work topic abstraction (§4.3, §6): a reliable queue with
//! visibility/claim timeout and explicit ACK, payload `BatchInfo`. The
//! framework never depends on *which* broker backs this — only on
//! `poll`/`ack` — the same seam `notify`'s register/poll channel pair
//! draws between producers and the worker loop that owns them.

pub mod file_topic;

use crossbeam_channel::{Receiver, Sender};
use evochora_error::StorageError;
use evochora_types::BatchInfo;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use parking_lot::Mutex;
use std::time::{Duration, Instant};

pub use file_topic::FileWorkTopic;

/// Identifies one claimed delivery to a specific backing implementation,
/// so `ack` knows what to release without every backend agreeing on a
/// single token shape.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DeliveryToken {
    Sequence(u64),
    File(String),
}

/// One delivery of a `BatchInfo`, carrying the token `ack` needs to
/// confirm it.
#[derive(Debug, Clone)]
pub struct BatchMessage {
    pub info: BatchInfo,
    delivery_tag: DeliveryToken,
}

impl BatchMessage {
    pub fn info(&self) -> &BatchInfo {
        &self.info
    }
}

/// Operations the indexer worker loop uses against its topic (§4.3,
/// §6). No ordering across partitions is assumed; within one worker,
/// delivery order is preserved for ACK.
pub trait WorkTopic: Send + Sync {
    /// Blocks up to `timeout` for the next message; `Ok(None)` on
    /// timeout with nothing available.
    fn poll(&self, timeout: Duration) -> Result<Option<BatchMessage>, StorageError>;

    /// Confirms durable processing of `message`; it will not be
    /// redelivered.
    fn ack(&self, message: &BatchMessage) -> Result<(), StorageError>;
}

struct InFlight {
    message: BatchMessage,
    claimed_at: Instant,
}

/// An in-process work topic for tests and single-box deployments:
/// a bounded channel of ready messages plus a claim-timeout map that
/// requeues anything left unacknowledged too long — standing in for a
/// broker's visibility timeout.
pub struct InMemoryWorkTopic {
    ready_tx: Sender<BatchInfo>,
    ready_rx: Receiver<BatchInfo>,
    in_flight: Mutex<VecDeque<InFlight>>,
    next_tag: AtomicU64,
    claim_timeout: Duration,
}

impl InMemoryWorkTopic {
    pub fn new(claim_timeout: Duration) -> Self {
        let (ready_tx, ready_rx) = crossbeam_channel::unbounded();
        Self {
            ready_tx,
            ready_rx,
            in_flight: Mutex::new(VecDeque::new()),
            next_tag: AtomicU64::new(0),
            claim_timeout,
        }
    }

    /// Publishes a batch for delivery. Used by producers (or test
    /// setup) to put work on the topic.
    pub fn publish(&self, info: BatchInfo) {
        let _ = self.ready_tx.send(info);
    }

    fn requeue_expired(&self) {
        let mut in_flight = self.in_flight.lock();
        let now = Instant::now();
        let mut still_in_flight = VecDeque::with_capacity(in_flight.len());
        while let Some(entry) = in_flight.pop_front() {
            if now.duration_since(entry.claimed_at) >= self.claim_timeout {
                tracing::debug!(delivery_tag = ?entry.message.delivery_tag, "claim timeout expired, redelivering");
                let _ = self.ready_tx.send(entry.message.info);
            } else {
                still_in_flight.push_back(entry);
            }
        }
        *in_flight = still_in_flight;
    }
}

impl WorkTopic for InMemoryWorkTopic {
    fn poll(&self, timeout: Duration) -> Result<Option<BatchMessage>, StorageError> {
        self.requeue_expired();
        match self.ready_rx.recv_timeout(timeout) {
            Ok(info) => {
                let tag = self.next_tag.fetch_add(1, Ordering::SeqCst);
                let message = BatchMessage {
                    info,
                    delivery_tag: DeliveryToken::Sequence(tag),
                };
                self.in_flight.lock().push_back(InFlight {
                    message: message.clone(),
                    claimed_at: Instant::now(),
                });
                Ok(Some(message))
            }
            Err(_) => Ok(None),
        }
    }

    fn ack(&self, message: &BatchMessage) -> Result<(), StorageError> {
        self.in_flight
            .lock()
            .retain(|entry| entry.message.delivery_tag != message.delivery_tag);
        Ok(())
    }
}
