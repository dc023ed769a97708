//! Streaming batch indexer framework (§4.2–§4.4): a worker loop generic
//! over a [`processor::BatchProcessor`], with the bounded-commit-window
//! tracker and the readiness/idempotency/dead-letter components it
//! drives.

pub mod components;
pub mod processor;
pub mod tracker;
pub mod worker;

pub use components::{ChunkBuffer, DeadLetterGate, IdempotencyGate, MetadataReadiness};
pub use processor::{BatchProcessor, NullProcessor};
pub use tracker::StreamingAckTracker;
pub use worker::StreamingWorker;
