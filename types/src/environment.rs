//! The N-dimensional cell grid (§3 "Environment") and the wire form of a
//! set of cell mutations (§3 "Cell column batch").

use crate::molecule::Molecule;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub type OwnerId = u64;

/// Declared shape of the grid plus, per dimension, whether it wraps
/// (toroidal topology).
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    pub dims: Vec<u64>,
    pub toroidal: Vec<bool>,
}

impl Shape {
    pub fn new(dims: Vec<u64>, toroidal: Vec<bool>) -> Self {
        assert_eq!(dims.len(), toroidal.len(), "dims/toroidal length mismatch");
        Self { dims, toroidal }
    }

    pub fn cell_count(&self) -> u64 {
        self.dims.iter().product()
    }

    /// Row-major flat index: `flat = x0*(d1*d2..) + x1*(d2..) + ... + x_{N-1}`.
    pub fn flat_index(&self, coords: &[u64]) -> u64 {
        assert_eq!(coords.len(), self.dims.len(), "coordinate rank mismatch");
        let mut flat = 0u64;
        for (axis, &coord) in coords.iter().enumerate() {
            flat = flat * self.dims[axis] + coord;
        }
        flat
    }
}

/// The three parallel arrays a set of cell mutations is carried in:
/// `(flat_index[], molecule_data[], owner_id[])`, equal length, no index
/// repeated within a single batch.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct CellColumnBatch {
    pub flat_index: Vec<u64>,
    pub molecule_data: Vec<u32>,
    pub owner_id: Vec<OwnerId>,
}

impl CellColumnBatch {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            flat_index: Vec::with_capacity(capacity),
            molecule_data: Vec::with_capacity(capacity),
            owner_id: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, flat: u64, molecule: Molecule, owner: OwnerId) {
        self.flat_index.push(flat);
        self.molecule_data.push(molecule.raw());
        self.owner_id.push(owner);
    }

    pub fn len(&self) -> usize {
        self.flat_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flat_index.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, Molecule, OwnerId)> + '_ {
        self.flat_index
            .iter()
            .zip(self.molecule_data.iter())
            .zip(self.owner_id.iter())
            .map(|((&flat, &mol), &owner)| (flat, Molecule(mol), owner))
    }

    /// `true` if every array has equal length and no flat index repeats.
    /// Violating this is a programming error in the encoder, not a
    /// runtime fault the decoder needs to recover from.
    pub fn is_well_formed(&self) -> bool {
        if self.molecule_data.len() != self.flat_index.len()
            || self.owner_id.len() != self.flat_index.len()
        {
            return false;
        }
        let mut seen = BTreeSet::new();
        self.flat_index.iter().all(|idx| seen.insert(*idx))
    }
}

/// The dense in-memory world: a molecule plus owner id per cell, and the
/// set of flat indices changed since the simulation last reported them to
/// the encoder.
pub struct Environment {
    shape: Shape,
    cells: Vec<(Molecule, OwnerId)>,
    changed_since_capture: BTreeSet<u64>,
}

impl Environment {
    pub fn new(shape: Shape) -> Self {
        let count = shape.cell_count() as usize;
        Self {
            shape,
            cells: vec![(Molecule::EMPTY, 0); count],
            changed_since_capture: BTreeSet::new(),
        }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn get(&self, flat: u64) -> (Molecule, OwnerId) {
        self.cells[flat as usize]
    }

    /// Sets a cell and records it as changed since the last capture.
    pub fn set(&mut self, flat: u64, molecule: Molecule, owner: OwnerId) {
        self.cells[flat as usize] = (molecule, owner);
        self.changed_since_capture.insert(flat);
    }

    /// Applies a cell column batch verbatim (used by the decoder and by
    /// the restorer), without touching the change-tracking set.
    pub fn apply_batch(&mut self, batch: &CellColumnBatch) {
        for (flat, molecule, owner) in batch.iter() {
            self.cells[flat as usize] = (molecule, owner);
        }
    }

    /// Dense snapshot of the whole grid as a cell column batch.
    pub fn dense_snapshot(&self) -> CellColumnBatch {
        let mut batch = CellColumnBatch::with_capacity(self.cells.len());
        for (flat, &(molecule, owner)) in self.cells.iter().enumerate() {
            batch.push(flat as u64, molecule, owner);
        }
        batch
    }

    /// Returns the cells changed since the last call, as a column batch,
    /// and clears the tracked set (§4.1: "Always clear the environment's
    /// change-index set after reading it").
    pub fn take_changed(&mut self) -> CellColumnBatch {
        let mut batch = CellColumnBatch::with_capacity(self.changed_since_capture.len());
        for &flat in &self.changed_since_capture {
            let (molecule, owner) = self.cells[flat as usize];
            batch.push(flat, molecule, owner);
        }
        self.changed_since_capture.clear();
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_index_is_row_major() {
        let shape = Shape::new(vec![2, 3, 4], vec![false, false, false]);
        assert_eq!(shape.flat_index(&[0, 0, 0]), 0);
        assert_eq!(shape.flat_index(&[0, 0, 1]), 1);
        assert_eq!(shape.flat_index(&[0, 1, 0]), 4);
        assert_eq!(shape.flat_index(&[1, 0, 0]), 12);
    }

    #[test]
    fn take_changed_clears_tracking() {
        let shape = Shape::new(vec![4], vec![false]);
        let mut env = Environment::new(shape);
        env.set(1, Molecule::new(crate::molecule::MoleculeKind::Data, 7), 9);
        let batch = env.take_changed();
        assert_eq!(batch.len(), 1);
        assert!(env.take_changed().is_empty());
    }

    #[test]
    fn batch_well_formed_rejects_duplicates() {
        let mut batch = CellColumnBatch::with_capacity(2);
        batch.push(1, Molecule::EMPTY, 0);
        batch.push(1, Molecule::EMPTY, 0);
        assert!(!batch.is_well_formed());
    }
}
