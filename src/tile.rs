//! The tile container (§3): a contiguous run of up to `capacity` cells,
//! stored and (de)compressed independently. Generalizes the teacher
//! library's `chunks::Block` (a generic container for one block of pixel
//! bytes, with compression handled by a separate layer) from "a block of
//! scan lines or one image tile" to "a run of cells of one attribute, or of
//! sparse coordinates".

use crate::math::{Coord, Subarray};

/// Zero-based position of a tile within one attribute's tile stream inside
/// a fragment.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct TileId(pub u64);

/// The decompressed contents of one tile, already split by the variable-size
/// flag the schema carries for this attribute (§3).
#[derive(Debug, Clone, PartialEq)]
pub enum TileData {
    /// Exactly `capacity` fixed-size values, back to back.
    Fixed(Vec<u8>),

    /// `capacity` fixed-width `u64` offsets into `values`, plus the
    /// concatenated variable-length value bytes themselves.
    Variable { offsets: Vec<u64>, values: Vec<u8> },
}

impl TileData {
    pub fn byte_size(&self) -> usize {
        match self {
            TileData::Fixed(bytes) => bytes.len(),
            TileData::Variable { offsets, values } => offsets.len() * crate::schema::VAR_OFFSET_SIZE + values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            TileData::Fixed(bytes) => bytes.is_empty(),
            TileData::Variable { offsets, .. } => offsets.is_empty(),
        }
    }
}

/// One attribute's value for a single cell, the unit the fragment writer
/// accumulates into tiles (§4.2).
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Fixed(Vec<u8>),
    Variable(Vec<u8>),
}

/// The minimum bounding rectangle of a set of sparse coordinates (§3, §6.3).
pub type Mbr = Subarray;

/// The coordinates of the first and last cell written into a sparse tile,
/// in the order they were written — distinct from the MBR, which is an
/// axis-aligned envelope rather than two real points (§6.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundingCoords {
    pub first: Coord,
    pub last: Coord,
}

/// Accumulates the MBR and bounding coordinates of a sparse tile as cells
/// are appended, the way the fragment writer does during accumulation
/// (§4.2: "For sparse writes it additionally updates the per-tile MBR and
/// bounding-coords during accumulation").
#[derive(Debug, Clone)]
pub struct MbrAccumulator {
    lo: Coord,
    hi: Coord,
    first: Option<Coord>,
    last: Option<Coord>,
}

impl MbrAccumulator {
    pub fn new(dimensions: usize) -> Self {
        Self {
            lo: std::iter::repeat(i64::MAX).take(dimensions).collect(),
            hi: std::iter::repeat(i64::MIN).take(dimensions).collect(),
            first: None,
            last: None,
        }
    }

    pub fn push(&mut self, point: &[i64]) {
        for (axis, &value) in point.iter().enumerate() {
            self.lo[axis] = self.lo[axis].min(value);
            self.hi[axis] = self.hi[axis].max(value);
        }

        if self.first.is_none() {
            self.first = Some(point.iter().copied().collect());
        }
        self.last = Some(point.iter().copied().collect());
    }

    pub fn is_empty(&self) -> bool { self.first.is_none() }

    pub fn finish(self) -> Option<(Mbr, BoundingCoords)> {
        let first = self.first?;
        let last = self.last?;
        Some((Mbr::new(self.lo, self.hi), BoundingCoords { first, last }))
    }
}
