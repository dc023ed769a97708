//! `TickDataChunk` (§3): a self-contained snapshot plus a bounded run of
//! deltas, and `BatchInfo` (§3), the pointer into the object store that
//! references one or more serialized chunks.

use crate::tick::{DeltaType, TickData, TickDelta};
use evochora_error::CodecError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickDataChunk {
    pub run_id: String,
    pub first_tick: u64,
    pub last_tick: u64,
    pub tick_count: u64,
    pub snapshot: TickData,
    pub deltas: Vec<TickDelta>,
}

impl TickDataChunk {
    /// Checks the invariants §3 and §8 require of every chunk the
    /// encoder produces, and every chunk the decoder is asked to read.
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.snapshot.tick_number != self.first_tick {
            return Err(CodecError::ChunkCorrupt(format!(
                "snapshot tick {} != first_tick {}",
                self.snapshot.tick_number, self.first_tick
            )));
        }
        if self.tick_count != 1 + self.deltas.len() as u64 {
            return Err(CodecError::ChunkCorrupt(format!(
                "tick_count {} != 1 + {} deltas",
                self.tick_count,
                self.deltas.len()
            )));
        }
        let mut previous = self.first_tick;
        for delta in &self.deltas {
            if delta.tick_number <= previous {
                return Err(CodecError::ChunkCorrupt(format!(
                    "delta tick {} not strictly increasing after {}",
                    delta.tick_number, previous
                )));
            }
            previous = delta.tick_number;
        }
        match self.deltas.last() {
            Some(last) if last.tick_number != self.last_tick => {
                return Err(CodecError::ChunkCorrupt(format!(
                    "last delta tick {} != last_tick {}",
                    last.tick_number, self.last_tick
                )));
            }
            None if self.first_tick != self.last_tick => {
                return Err(CodecError::ChunkCorrupt(
                    "chunk with no deltas must have first_tick == last_tick".to_string(),
                ));
            }
            _ => {}
        }
        Ok(())
    }

    /// The largest accumulated delta with `tick_number <= tick`, if any.
    pub fn last_accumulated_at_or_before(&self, tick: u64) -> Option<&TickDelta> {
        self.deltas
            .iter()
            .rev()
            .find(|d| d.delta_type == DeltaType::Accumulated && d.tick_number <= tick)
    }

    /// Every tick value a chunk covers, in order, snapshot first.
    pub fn tick_numbers(&self) -> impl Iterator<Item = u64> + '_ {
        std::iter::once(self.first_tick).chain(self.deltas.iter().map(|d| d.tick_number))
    }
}

/// Pointer into the object store for a file containing one or more
/// chunks serialized back-to-back in length-delimited framing (§3, §6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchInfo {
    pub storage_path: String,
    pub tick_start: u64,
    pub tick_end: u64,
}
