//! The encoder side of the delta codec (§4.1).

use evochora_config::EncoderConfig;
use evochora_error::ConfigError;
use evochora_types::{
    CellColumnBatch, DeltaType, Environment, GenomeHash, OrganismState, TickData, TickDataChunk,
    TickDelta,
};
use std::collections::{BTreeMap, HashMap};
use tracing::instrument;

/// Everything about a tick the encoder needs beyond the environment
/// itself. Bundled so `capture_tick` doesn't take half a dozen loose
/// parameters.
#[derive(Debug, Clone)]
pub struct TickSample {
    pub tick_number: u64,
    pub capture_time_ms: u64,
    pub organisms: Vec<OrganismState>,
    pub total_organisms_created: u64,
    pub total_unique_genomes: u64,
    pub genome_hashes_ever_seen: Vec<GenomeHash>,
    pub rng_state: Vec<u8>,
    pub plugin_states: BTreeMap<String, Vec<u8>>,
}

/// In-progress chunk state: the head snapshot, the deltas captured so
/// far, and the sparse "changed since head" map the ACCUMULATED deltas
/// are built from. Cleared at every chunk boundary (§3 Ownership).
struct ChunkBuilder {
    snapshot: TickData,
    deltas: Vec<TickDelta>,
    accumulated_since_head: HashMap<u64, (evochora_types::Molecule, evochora_types::OwnerId)>,
    last_tick: u64,
}

/// Turns a per-tick stream into a stream of chunks satisfying the
/// invariants in §3.
pub struct Encoder {
    run_id: String,
    config: EncoderConfig,
    builder: Option<ChunkBuilder>,
}

impl Encoder {
    /// Configuration errors are fatal at construction (§4.1, §7).
    pub fn new(run_id: impl Into<String>, config: EncoderConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            run_id: run_id.into(),
            config,
            builder: None,
        })
    }

    /// Position of `sample_index` within its chunk (0 at the head
    /// snapshot), per the inclusive-counting convention the open
    /// question in §9 resolves toward (see `DESIGN.md`).
    fn is_accumulated_position(&self, sample_index: u64) -> bool {
        sample_index != 0 && sample_index % u64::from(self.config.accumulated_delta_interval) == 0
    }

    #[instrument(skip(self, env, sample), fields(run_id = %self.run_id, tick = sample.tick_number))]
    pub fn capture_tick(&mut self, env: &mut Environment, sample: TickSample) -> Option<TickDataChunk> {
        let changed = env.take_changed();

        let chunk_complete = match self.builder.as_mut() {
            None => {
                let snapshot = TickData {
                    run_id: self.run_id.clone(),
                    tick_number: sample.tick_number,
                    capture_time_ms: sample.capture_time_ms,
                    cell_columns: env.dense_snapshot(),
                    organisms: sample.organisms,
                    total_organisms_created: sample.total_organisms_created,
                    total_unique_genomes: sample.total_unique_genomes,
                    genome_hashes_ever_seen: sample.genome_hashes_ever_seen,
                    rng_state: sample.rng_state,
                    plugin_states: sample.plugin_states,
                };
                self.builder = Some(ChunkBuilder {
                    last_tick: snapshot.tick_number,
                    snapshot,
                    deltas: Vec::new(),
                    accumulated_since_head: HashMap::new(),
                });
                self.config.samples_per_chunk() == 1
            }
            Some(builder) => {
                for (flat, molecule, owner) in changed.iter() {
                    builder.accumulated_since_head.insert(flat, (molecule, owner));
                }

                let sample_index = builder.deltas.len() as u64 + 1;
                let delta_type = if self.is_accumulated_position(sample_index) {
                    DeltaType::Accumulated
                } else {
                    DeltaType::Incremental
                };
                let changed_cells = match delta_type {
                    DeltaType::Accumulated => {
                        let mut batch = CellColumnBatch::with_capacity(builder.accumulated_since_head.len());
                        for (&flat, &(molecule, owner)) in &builder.accumulated_since_head {
                            batch.push(flat, molecule, owner);
                        }
                        batch
                    }
                    DeltaType::Incremental => changed,
                };

                builder.last_tick = sample.tick_number;
                builder.deltas.push(TickDelta {
                    run_id: self.run_id.clone(),
                    tick_number: sample.tick_number,
                    capture_time_ms: sample.capture_time_ms,
                    changed_cells,
                    delta_type,
                    organisms: sample.organisms,
                    total_organisms_created: sample.total_organisms_created,
                    total_unique_genomes: sample.total_unique_genomes,
                    genome_hashes_ever_seen: sample.genome_hashes_ever_seen,
                    rng_state: sample.rng_state,
                    plugin_states: sample.plugin_states,
                });

                sample_index + 1 == self.config.samples_per_chunk()
            }
        };

        if chunk_complete {
            self.finish_chunk()
        } else {
            None
        }
    }

    /// Emits the current chunk if it has at least the head snapshot;
    /// discards encoder state. Used on graceful shutdown (§4.1).
    pub fn flush_partial_chunk(&mut self) -> Option<TickDataChunk> {
        self.finish_chunk()
    }

    fn finish_chunk(&mut self) -> Option<TickDataChunk> {
        let builder = self.builder.take()?;
        let tick_count = 1 + builder.deltas.len() as u64;
        Some(TickDataChunk {
            run_id: self.run_id.clone(),
            first_tick: builder.snapshot.tick_number,
            last_tick: builder.last_tick,
            tick_count,
            snapshot: builder.snapshot,
            deltas: builder.deltas,
        })
    }
}
