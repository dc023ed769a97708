//! Per-organism state (§3). Opaque to the pipeline beyond the fields the
//! renderer and indexers read directly: `id`, `is_dead`, `genome_hash`,
//! `ip`, and `data_pointers`.

use serde::{Deserialize, Serialize};

pub type OrganismId = u64;
pub type GenomeHash = [u8; 32];

/// A scalar or vector register value. Organisms carry a mix of both kinds
/// across their data and procedure register banks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RegisterValue {
    Scalar(i64),
    Vector(Vec<i64>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganismState {
    pub id: OrganismId,
    pub parent_id: Option<OrganismId>,
    pub birth_tick: u64,
    pub program_id: u64,
    pub energy: i64,
    pub entropy: f64,
    pub ip: Vec<i64>,
    pub direction: Vec<i64>,
    pub data_pointers: Vec<Vec<i64>>,
    pub active_pointer_index: usize,
    pub data_registers: Vec<RegisterValue>,
    pub procedure_registers: Vec<RegisterValue>,
    pub is_dead: bool,
    pub genome_hash: GenomeHash,
}
