//! Resume-from-checkpoint loader (§4.5): locates the last snapshot
//! chunk for a run and restores a simulation positioned to continue
//! from it without gap or unexpected overlap.

use evochora_error::{Error, ResumeError};
use evochora_store::ObjectStore;
use evochora_types::{ChunkFieldFilter, Environment, GenomeHash, OrganismState, SimulationMetadata, TickData};
use std::collections::BTreeSet;
use tracing::{info, instrument};

/// What `SnapshotLoader::load` finds: the run's metadata and the
/// snapshot at the head of the last chunk in the last batch file.
pub struct Checkpoint {
    pub metadata: SimulationMetadata,
    pub snapshot: TickData,
}

/// Locates the latest usable checkpoint for a run (§4.5 "Finding the
/// checkpoint").
pub struct SnapshotLoader<'a> {
    store: &'a dyn ObjectStore,
}

impl<'a> SnapshotLoader<'a> {
    pub fn new(store: &'a dyn ObjectStore) -> Self {
        Self { store }
    }

    /// Finds the run's metadata blob, then the lexically-last batch
    /// file under its raw-data prefix (lexical order equals tick order,
    /// §4.5 step 2), and streams it with the `snapshot-only` filter,
    /// retaining only the last chunk's snapshot (§4.5 step 3).
    #[instrument(skip(self), fields(run_id))]
    pub fn load(&self, run_id: &str) -> Result<Checkpoint, Error> {
        let metadata_path = self
            .store
            .find_metadata_path(run_id)
            .map_err(Error::from)?
            .ok_or_else(|| ResumeError::MetadataNotFound {
                run_id: run_id.to_string(),
            })?;
        let metadata_bytes = self.store.read_message(&metadata_path).map_err(Error::from)?;
        let metadata: SimulationMetadata =
            bincode::deserialize(&metadata_bytes).map_err(|e| wrap_storage(run_id, e))?;

        if metadata.run_id != run_id {
            return Err(ResumeError::RunIdMismatch {
                expected: run_id.to_string(),
                found: metadata.run_id,
            }
            .into());
        }

        let batch_path = self
            .store
            .find_last_batch_file(run_id)
            .map_err(Error::from)?
            .ok_or_else(|| ResumeError::EmptyBatchFile {
                path: format!("{run_id}/raw/"),
            })?;

        let mut last_snapshot: Option<TickData> = None;
        self.store
            .for_each_chunk(&batch_path, ChunkFieldFilter::SnapshotOnly, &mut |chunk| {
                last_snapshot = Some(chunk.snapshot);
                Ok(())
            })
            .map_err(Error::from)?;

        let snapshot = last_snapshot.ok_or_else(|| ResumeError::EmptyBatchFile {
            path: batch_path.clone(),
        })?;

        info!(run_id, tick = snapshot.tick_number, path = %batch_path, "found resume checkpoint");

        Ok(Checkpoint { metadata, snapshot })
    }
}

fn wrap_storage(run_id: &str, e: bincode::Error) -> Error {
    evochora_error::StorageError::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("run {run_id}: {e}"),
    ))
    .into()
}

/// The in-memory simulation state a resumed run needs before it can
/// take its next step. The execution engine itself is an external
/// collaborator (§1); this is only the state it needs handed to it.
pub struct RestoredSimulation {
    pub environment: Environment,
    pub organisms: Vec<OrganismState>,
    pub total_organisms_created: u64,
    pub total_unique_genomes: u64,
    pub genome_hashes_ever_seen: Vec<GenomeHash>,
    pub current_tick: u64,
}

pub struct ResumeOutcome {
    pub simulation: RestoredSimulation,
    pub run_id: String,
    pub resume_from_tick: u64,
}

/// Rebuilds a simulation from a [`Checkpoint`] (§4.5 "Restoring").
pub struct SimulationRestorer;

impl SimulationRestorer {
    /// Constructs a fresh environment of the checkpoint's declared
    /// shape, applies the snapshot's cells, recreates every non-dead
    /// organism verbatim, and positions the run to continue at
    /// `snapshot.tick_number + 1`.
    #[instrument(skip(checkpoint), fields(run_id = %checkpoint.metadata.run_id, tick = checkpoint.snapshot.tick_number))]
    pub fn restore(checkpoint: Checkpoint) -> ResumeOutcome {
        let Checkpoint { metadata, snapshot } = checkpoint;

        let mut environment = Environment::new(metadata.environment.clone());
        environment.apply_batch(&snapshot.cell_columns);

        let organisms: Vec<OrganismState> = snapshot
            .organisms
            .into_iter()
            .filter(|o| !o.is_dead)
            .collect();

        // Old-format tolerance (§4.5): fall back to the union of living
        // organisms' genome hashes if the snapshot carries none.
        let genome_hashes_ever_seen = if snapshot.genome_hashes_ever_seen.is_empty() {
            let mut seen: BTreeSet<GenomeHash> = BTreeSet::new();
            for organism in &organisms {
                seen.insert(organism.genome_hash);
            }
            seen.into_iter().collect()
        } else {
            snapshot.genome_hashes_ever_seen
        };

        let resume_from_tick = snapshot.tick_number + 1;

        ResumeOutcome {
            simulation: RestoredSimulation {
                environment,
                organisms,
                total_organisms_created: snapshot.total_organisms_created,
                total_unique_genomes: snapshot.total_unique_genomes,
                genome_hashes_ever_seen,
                current_tick: snapshot.tick_number,
            },
            run_id: metadata.run_id,
            resume_from_tick,
        }
    }
}

/// Either a config error (resume disabled with no run id) or a resume
/// failure are fatal at startup (§7): this is the single entry point a
/// binary calls before it decides whether to run a fresh simulation or
/// continue one.
#[instrument(skip(store))]
pub fn resume_run(store: &dyn ObjectStore, run_id: &str) -> Result<ResumeOutcome, Error> {
    let checkpoint = SnapshotLoader::new(store).load(run_id)?;
    Ok(SimulationRestorer::restore(checkpoint))
}

#[cfg(test)]
mod tests {
    use super::*;
    use evochora_codec::encoder::{Encoder, TickSample};
    use evochora_config::EncoderConfig;
    use evochora_error::ErrorKind;
    use evochora_store::path;
    use evochora_store::InMemoryObjectStore;
    use evochora_types::{Molecule, MoleculeKind, OrganismState, RegisterValue, Shape};
    use std::collections::BTreeMap;

    fn metadata(run_id: &str, shape: Shape) -> SimulationMetadata {
        SimulationMetadata {
            run_id: run_id.to_string(),
            initial_seed: 7,
            start_time_ms: 0,
            environment: shape,
            resolved_config_json: "{}".to_string(),
            sampling_interval: 1,
            accumulated_delta_interval: 2,
            snapshot_interval: 2,
            chunk_interval: 1,
        }
    }

    fn organism(id: u64, dead: bool) -> OrganismState {
        OrganismState {
            id,
            parent_id: None,
            birth_tick: 0,
            program_id: 1,
            energy: 100,
            entropy: 0.0,
            ip: vec![0, 0],
            direction: vec![1, 0],
            data_pointers: vec![vec![0, 0]],
            active_pointer_index: 0,
            data_registers: vec![RegisterValue::Scalar(0)],
            procedure_registers: vec![],
            is_dead: dead,
            genome_hash: [id as u8; 32],
        }
    }

    fn sample(tick: u64, organisms: Vec<OrganismState>) -> TickSample {
        TickSample {
            tick_number: tick,
            capture_time_ms: tick,
            organisms,
            total_organisms_created: 2,
            total_unique_genomes: 1,
            genome_hashes_ever_seen: vec![],
            rng_state: vec![1, 2, 3],
            plugin_states: BTreeMap::new(),
        }
    }

    fn seed_run(store: &InMemoryObjectStore, run_id: &str, shape: &Shape) {
        let meta = metadata(run_id, shape.clone());
        store
            .write_message(&path::metadata_path(run_id), &bincode::serialize(&meta).unwrap())
            .unwrap();

        let config = EncoderConfig {
            accumulated_delta_interval: 2,
            snapshot_interval: 2,
            chunk_interval: 1,
        };
        let mut encoder = Encoder::new(run_id, config).unwrap();
        let mut env = Environment::new(shape.clone());
        let f = |x: u64, y: u64| shape.flat_index(&[x, y]);

        env.set(f(0, 0), Molecule::new(MoleculeKind::Code, 1), 1);
        encoder.capture_tick(&mut env, sample(0, vec![organism(1, false), organism(2, true)]));
        env.set(f(1, 1), Molecule::new(MoleculeKind::Code, 2), 1);
        encoder.capture_tick(&mut env, sample(1, vec![organism(1, false), organism(2, true)]));
        env.set(f(2, 2), Molecule::new(MoleculeKind::Code, 3), 1);
        encoder.capture_tick(&mut env, sample(2, vec![organism(1, false), organism(2, true)]));
        env.set(f(3, 3), Molecule::new(MoleculeKind::Code, 4), 1);
        let chunk = encoder
            .capture_tick(&mut env, sample(3, vec![organism(1, false), organism(2, true)]))
            .expect("chunk emitted at sample boundary");

        let batch_path = path::batch_path(run_id, chunk.first_tick, chunk.last_tick, &path::DEFAULT_FOLDER_LEVELS);
        store.write_chunk_batch(&batch_path, &[chunk]).unwrap();
    }

    #[test]
    fn loads_last_snapshot_and_restores_non_dead_organisms() {
        let store = InMemoryObjectStore::new();
        let shape = Shape::new(vec![4, 4], vec![false, false]);
        seed_run(&store, "run-1", &shape);

        let outcome = resume_run(&store, "run-1").unwrap();
        assert_eq!(outcome.run_id, "run-1");
        assert_eq!(outcome.resume_from_tick, outcome.simulation.current_tick + 1);
        assert_eq!(outcome.simulation.organisms.len(), 1, "dead organism dropped");
        assert_eq!(outcome.simulation.organisms[0].id, 1);
    }

    #[test]
    fn falls_back_to_living_genomes_when_snapshot_list_is_empty() {
        let store = InMemoryObjectStore::new();
        let shape = Shape::new(vec![4, 4], vec![false, false]);
        seed_run(&store, "run-2", &shape);

        let outcome = resume_run(&store, "run-2").unwrap();
        assert_eq!(outcome.simulation.genome_hashes_ever_seen, vec![[1u8; 32]]);
    }

    #[test]
    fn missing_metadata_is_a_resume_error() {
        let store = InMemoryObjectStore::new();
        let err = resume_run(&store, "ghost-run").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resume);
    }

    #[test]
    fn run_id_mismatch_is_rejected() {
        let store = InMemoryObjectStore::new();
        let shape = Shape::new(vec![2], vec![false]);
        let meta = metadata("run-a", shape);
        store
            .write_message(&path::metadata_path("run-b"), &bincode::serialize(&meta).unwrap())
            .unwrap();

        let err = resume_run(&store, "run-b").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resume);
    }
}
