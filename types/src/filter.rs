//! Predicate over chunk fields (§4.3 `chunk_field_filter`), letting the
//! framework skip heavy fields during deserialization.

/// Which parts of a chunk a consumer actually needs materialized.
///
/// `SnapshotOnly` and `OrganismsOnly` let the decoder skip allocating and
/// parsing fields the caller will never read — the resume loader, for
/// example, only ever needs the last chunk's snapshot.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum ChunkFieldFilter {
    #[default]
    All,
    SnapshotOnly,
    OrganismsOnly,
}

impl ChunkFieldFilter {
    pub fn wants_deltas(&self) -> bool {
        matches!(self, ChunkFieldFilter::All)
    }

    pub fn wants_organisms(&self) -> bool {
        matches!(self, ChunkFieldFilter::All | ChunkFieldFilter::OrganismsOnly)
    }

    pub fn wants_cell_columns(&self) -> bool {
        matches!(self, ChunkFieldFilter::All | ChunkFieldFilter::SnapshotOnly)
    }
}
