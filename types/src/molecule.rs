//! The opaque 32-bit cell value (§3 "Molecule").
//!
//! The pipeline only ever needs the type tag and the empty flag; the
//! remaining payload bits are meaningless to it and are carried through
//! verbatim.

use serde::{Deserialize, Serialize};

/// Top three bits select the kind; the low 29 bits are opaque payload.
const KIND_SHIFT: u32 = 29;
const KIND_MASK: u32 = 0b111 << KIND_SHIFT;
const PAYLOAD_MASK: u32 = !KIND_MASK;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MoleculeKind {
    Code = 0,
    Data = 1,
    Energy = 2,
    Structure = 3,
    Label = 4,
    LabelReference = 5,
    Register = 6,
    Empty = 7,
}

impl MoleculeKind {
    fn from_tag(tag: u8) -> Self {
        match tag {
            0 => MoleculeKind::Code,
            1 => MoleculeKind::Data,
            2 => MoleculeKind::Energy,
            3 => MoleculeKind::Structure,
            4 => MoleculeKind::Label,
            5 => MoleculeKind::LabelReference,
            6 => MoleculeKind::Register,
            _ => MoleculeKind::Empty,
        }
    }
}

/// An opaque, closed-world-typed 32-bit cell value.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct Molecule(pub u32);

impl Molecule {
    pub const EMPTY: Molecule = Molecule((MoleculeKind::Empty as u32) << KIND_SHIFT);

    pub fn new(kind: MoleculeKind, payload: u32) -> Self {
        Molecule(((kind as u32) << KIND_SHIFT) | (payload & PAYLOAD_MASK))
    }

    pub fn kind(&self) -> MoleculeKind {
        MoleculeKind::from_tag(((self.0 & KIND_MASK) >> KIND_SHIFT) as u8)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.kind(), MoleculeKind::Empty)
    }

    pub fn payload(&self) -> u32 {
        self.0 & PAYLOAD_MASK
    }

    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl Default for Molecule {
    fn default() -> Self {
        Molecule::EMPTY
    }
}
