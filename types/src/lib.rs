//! Core data model for the evochora telemetry pipeline (§3): the opaque
//! cell value, the N-dimensional grid, per-organism state, the
//! snapshot/delta/chunk hierarchy the delta codec produces, and the
//! external pointers (`BatchInfo`, `SimulationMetadata`) the storage
//! layer and indexer framework pass around.

pub mod chunk;
pub mod environment;
pub mod filter;
pub mod metadata;
pub mod molecule;
pub mod organism;
pub mod tick;

pub use chunk::{BatchInfo, TickDataChunk};
pub use environment::{CellColumnBatch, Environment, OwnerId, Shape};
pub use filter::ChunkFieldFilter;
pub use metadata::SimulationMetadata;
pub use molecule::{Molecule, MoleculeKind};
pub use organism::{GenomeHash, OrganismId, OrganismState, RegisterValue};
pub use tick::{DeltaType, TickData, TickDelta};
