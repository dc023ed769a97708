//! `SimulationMetadata` (§3): written once per run before any chunk.

use crate::environment::Shape;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationMetadata {
    pub run_id: String,
    pub initial_seed: u64,
    pub start_time_ms: u64,
    pub environment: Shape,
    pub resolved_config_json: String,
    pub sampling_interval: u32,
    pub accumulated_delta_interval: u32,
    pub snapshot_interval: u32,
    pub chunk_interval: u32,
}
