//! `TickData` and `TickDelta` (§3): the full-world and per-tick-change
//! shapes the delta codec produces and consumes.

use crate::environment::CellColumnBatch;
use crate::organism::{GenomeHash, OrganismState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Full world state at a given tick — the head of every chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickData {
    pub run_id: String,
    pub tick_number: u64,
    pub capture_time_ms: u64,
    pub cell_columns: CellColumnBatch,
    pub organisms: Vec<OrganismState>,
    pub total_organisms_created: u64,
    pub total_unique_genomes: u64,
    pub genome_hashes_ever_seen: Vec<GenomeHash>,
    pub rng_state: Vec<u8>,
    pub plugin_states: BTreeMap<String, Vec<u8>>,
}

/// Whether a delta lists cells changed since the previous sample
/// (`Incremental`) or every cell changed since the chunk's head snapshot
/// (`Accumulated`).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum DeltaType {
    Incremental,
    Accumulated,
}

/// Same shape as [`TickData`] minus `cell_columns` (replaced by
/// `changed_cells`) plus a `delta_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickDelta {
    pub run_id: String,
    pub tick_number: u64,
    pub capture_time_ms: u64,
    pub changed_cells: CellColumnBatch,
    pub delta_type: DeltaType,
    pub organisms: Vec<OrganismState>,
    pub total_organisms_created: u64,
    pub total_unique_genomes: u64,
    pub genome_hashes_ever_seen: Vec<GenomeHash>,
    pub rng_state: Vec<u8>,
    pub plugin_states: BTreeMap<String, Vec<u8>>,
}
