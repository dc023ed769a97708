//! The decoder side of the delta codec (§4.2).

use evochora_error::CodecError;
use evochora_types::{CellColumnBatch, Molecule, OwnerId, TickData, TickDataChunk};
use tracing::instrument;

/// Reconstructs any tick inside a chunk, or iterates all of them in
/// order. Owns a mutable cell-state buffer sized to the world's cell
/// count, reused across calls — the decoder is exclusive-owned and not
/// shareable (§3 Ownership, §4.2).
pub struct Decoder {
    cell_count: usize,
    cells: Vec<(Molecule, OwnerId)>,
    /// `(run_id, first_tick)` of the chunk the buffer currently reflects.
    loaded_chunk: Option<(String, u64)>,
    applied_tick: Option<u64>,
}

impl Decoder {
    pub fn new(cell_count: usize) -> Self {
        Self {
            cell_count,
            cells: vec![(Molecule::EMPTY, 0); cell_count],
            loaded_chunk: None,
            applied_tick: None,
        }
    }

    fn reset_from_snapshot(&mut self, chunk: &TickDataChunk) {
        self.cells = vec![(Molecule::EMPTY, 0); self.cell_count];
        Self::apply_overwrite(&mut self.cells, &chunk.snapshot.cell_columns);
    }

    fn apply_overwrite(cells: &mut [(Molecule, OwnerId)], batch: &CellColumnBatch) {
        for (flat, molecule, owner) in batch.iter() {
            cells[flat as usize] = (molecule, owner);
        }
    }

    fn cells_as_batch(&self) -> CellColumnBatch {
        let mut batch = CellColumnBatch::with_capacity(self.cells.len());
        for (flat, &(molecule, owner)) in self.cells.iter().enumerate() {
            batch.push(flat as u64, molecule, owner);
        }
        batch
    }

    /// Reconstructs the tick `tick` inside `chunk`.
    ///
    /// Sequential forward calls on the same chunk reuse the buffer and
    /// apply only the intervening deltas. A non-sequential call (a
    /// different chunk, or a tick at or before the last one applied)
    /// rewinds by reapplying the snapshot plus the nearest preceding
    /// ACCUMULATED delta plus the intermediate INCREMENTAL deltas,
    /// bounding the work at one accumulated pass plus up to
    /// `accumulated_delta_interval - 1` incrementals (§4.2).
    #[instrument(skip(self, chunk), fields(run_id = %chunk.run_id, tick))]
    pub fn decompress_tick(&mut self, chunk: &TickDataChunk, tick: u64) -> Result<TickData, CodecError> {
        chunk.validate()?;
        if tick < chunk.first_tick || tick > chunk.last_tick {
            return Err(CodecError::TickNotInChunk {
                requested: tick,
                first_tick: chunk.first_tick,
                last_tick: chunk.last_tick,
            });
        }

        let identity = (chunk.run_id.clone(), chunk.first_tick);
        let sequential_forward =
            self.loaded_chunk.as_ref() == Some(&identity) && self.applied_tick.is_some_and(|t| t < tick);

        if tick == chunk.first_tick {
            self.reset_from_snapshot(chunk);
            self.loaded_chunk = Some(identity);
            self.applied_tick = Some(tick);
            return Ok(TickData {
                cell_columns: self.cells_as_batch(),
                ..chunk.snapshot.clone()
            });
        }

        let apply_from = if sequential_forward {
            self.applied_tick.expect("sequential_forward implies Some")
        } else {
            self.reset_from_snapshot(chunk);
            match chunk.last_accumulated_at_or_before(tick) {
                Some(acc) => {
                    Self::apply_overwrite(&mut self.cells, &acc.changed_cells);
                    acc.tick_number
                }
                None => chunk.first_tick,
            }
        };

        for delta in chunk
            .deltas
            .iter()
            .filter(|d| d.tick_number > apply_from && d.tick_number <= tick)
        {
            Self::apply_overwrite(&mut self.cells, &delta.changed_cells);
        }

        self.loaded_chunk = Some(identity);
        self.applied_tick = Some(tick);

        let target = chunk
            .deltas
            .iter()
            .find(|d| d.tick_number == tick)
            .ok_or_else(|| CodecError::ChunkCorrupt(format!("no delta recorded for tick {tick}")))?;

        Ok(TickData {
            run_id: target.run_id.clone(),
            tick_number: tick,
            capture_time_ms: target.capture_time_ms,
            cell_columns: self.cells_as_batch(),
            organisms: target.organisms.clone(),
            total_organisms_created: target.total_organisms_created,
            total_unique_genomes: target.total_unique_genomes,
            genome_hashes_ever_seen: target.genome_hashes_ever_seen.clone(),
            rng_state: target.rng_state.clone(),
            plugin_states: target.plugin_states.clone(),
        })
    }

    /// Emits every tick in `chunk`, in strictly increasing order,
    /// starting with the snapshot, reusing the buffer sequentially.
    pub fn decompress_chunk<'a>(&'a mut self, chunk: &'a TickDataChunk) -> ChunkIter<'a> {
        ChunkIter {
            decoder: self,
            chunk,
            remaining: chunk.tick_numbers().collect::<Vec<_>>().into_iter(),
        }
    }
}

pub struct ChunkIter<'a> {
    decoder: &'a mut Decoder,
    chunk: &'a TickDataChunk,
    remaining: std::vec::IntoIter<u64>,
}

impl<'a> Iterator for ChunkIter<'a> {
    type Item = Result<TickData, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        let tick = self.remaining.next()?;
        Some(self.decoder.decompress_tick(self.chunk, tick))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{Encoder, TickSample};
    use evochora_config::EncoderConfig;
    use evochora_types::{DeltaType, Environment, MoleculeKind, Shape};
    use std::collections::BTreeMap;

    fn sample(tick: u64) -> TickSample {
        TickSample {
            tick_number: tick,
            capture_time_ms: tick * 10,
            organisms: vec![],
            total_organisms_created: 0,
            total_unique_genomes: 0,
            genome_hashes_ever_seen: vec![],
            rng_state: vec![],
            plugin_states: BTreeMap::new(),
        }
    }

    fn build_scenario_one_chunk() -> (TickDataChunk, Shape) {
        let config = EncoderConfig {
            accumulated_delta_interval: 2,
            snapshot_interval: 2,
            chunk_interval: 1,
        };
        let mut encoder = Encoder::new("run-1", config).unwrap();
        let shape = Shape::new(vec![4, 4], vec![false, false]);
        let mut env = Environment::new(shape.clone());

        let f = |x: u64, y: u64| shape.flat_index(&[x, y]);

        env.set(f(0, 0), Molecule::new(MoleculeKind::Code, 1), 1);
        encoder.capture_tick(&mut env, sample(0));
        env.set(f(1, 1), Molecule::new(MoleculeKind::Code, 2), 1);
        encoder.capture_tick(&mut env, sample(1));
        env.set(f(2, 2), Molecule::new(MoleculeKind::Code, 3), 1);
        encoder.capture_tick(&mut env, sample(2));
        env.set(f(3, 3), Molecule::new(MoleculeKind::Code, 4), 1);
        let chunk = encoder.capture_tick(&mut env, sample(3)).unwrap();
        (chunk, shape)
    }

    /// Scenario 2 from §8: random access at tick 3 sees all four cells.
    #[test]
    fn scenario_two_decoder_random_access() {
        let (chunk, shape) = build_scenario_one_chunk();
        let mut decoder = Decoder::new(shape.cell_count() as usize);
        let tick3 = decoder.decompress_tick(&chunk, 3).unwrap();
        assert_eq!(tick3.cell_columns.len(), 16);
        let nonzero: Vec<_> = tick3
            .cell_columns
            .iter()
            .filter(|(_, m, _)| !m.is_empty())
            .collect();
        assert_eq!(nonzero.len(), 4);
    }

    #[test]
    fn accumulated_delta_lists_all_changes_since_head() {
        let (chunk, _shape) = build_scenario_one_chunk();
        let accumulated = chunk
            .deltas
            .iter()
            .find(|d| d.delta_type == DeltaType::Accumulated)
            .unwrap();
        assert_eq!(accumulated.changed_cells.len(), 2);
    }

    #[test]
    fn sequential_forward_matches_random_access() {
        let (chunk, shape) = build_scenario_one_chunk();
        let mut forward = Decoder::new(shape.cell_count() as usize);
        let forward_ticks: Vec<TickData> = forward
            .decompress_chunk(&chunk)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        let mut random = Decoder::new(shape.cell_count() as usize);
        for tick in [0u64, 3, 1, 2] {
            let direct = random.decompress_tick(&chunk, tick).unwrap();
            let via_forward = &forward_ticks[tick as usize];
            assert_eq!(direct.cell_columns, via_forward.cell_columns);
        }
    }

    #[test]
    fn tick_out_of_range_is_an_error() {
        let (chunk, shape) = build_scenario_one_chunk();
        let mut decoder = Decoder::new(shape.cell_count() as usize);
        assert!(matches!(
            decoder.decompress_tick(&chunk, 99),
            Err(CodecError::TickNotInChunk { .. })
        ));
    }
}
