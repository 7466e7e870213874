//! The cell buffer contract (§6.5): one slice per fixed-size attribute, an
//! offsets/values pair per variable-size attribute, and an optional
//! coordinates slice. Sizes are tracked in place as bytes are consumed
//! (write) or produced (read), mirroring the source's in/out size-pointer
//! convention but as ordinary Rust slices plus a `used` counter instead of
//! raw pointers.

use std::collections::HashMap;

use crate::math::Coord;
use crate::tile::CellValue;

enum Slot<'a> {
    Fixed { data: &'a mut [u8], used: usize },
    Variable { offsets: &'a mut [u8], values: &'a mut [u8], offsets_used: usize, values_used: usize },
}

struct CoordsSlot<'a> {
    data: &'a mut [u8],
    used: usize,
}

/// Caller-owned buffers a query reads from (write) or fills (read). Built
/// with a small builder so a client only wires up the attributes it cares
/// about. Not `Clone`: buffers are borrowed exclusively for one submission.
pub struct QueryBuffers<'a> {
    attributes: HashMap<String, Slot<'a>>,
    coords: Option<CoordsSlot<'a>>,
}

impl<'a> QueryBuffers<'a> {
    pub fn new() -> Self {
        Self { attributes: HashMap::new(), coords: None }
    }

    pub fn fixed(mut self, name: impl Into<String>, data: &'a mut [u8]) -> Self {
        self.attributes.insert(name.into(), Slot::Fixed { data, used: 0 });
        self
    }

    pub fn variable(mut self, name: impl Into<String>, offsets: &'a mut [u8], values: &'a mut [u8]) -> Self {
        self.attributes.insert(name.into(), Slot::Variable { offsets, values, offsets_used: 0, values_used: 0 });
        self
    }

    pub fn coords(mut self, data: &'a mut [u8]) -> Self {
        self.coords = Some(CoordsSlot { data, used: 0 });
        self
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn wants_coords(&self) -> bool {
        self.coords.is_some()
    }

    /// Bytes written into (read) or consumed from (write) attribute `name`'s
    /// values buffer so far this submission.
    pub fn used(&self, name: &str) -> usize {
        match &self.attributes[name] {
            Slot::Fixed { used, .. } => *used,
            Slot::Variable { values_used, .. } => *values_used,
        }
    }

    pub fn offsets_used(&self, name: &str) -> usize {
        match &self.attributes[name] {
            Slot::Fixed { used, .. } => *used,
            Slot::Variable { offsets_used, .. } => *offsets_used,
        }
    }

    pub fn coords_used(&self) -> usize {
        self.coords.as_ref().map_or(0, |slot| slot.used)
    }

    /// True if every selected attribute (and the coordinates slot, if
    /// requested) has room for `cell` without partially committing any of
    /// them (§4.4 step 4: a cell is never split across an overflow).
    pub fn fits(&self, cell: &HashMap<String, CellValue>, attributes: &[String], coord: Option<&Coord>) -> bool {
        for name in attributes {
            let value = match cell.get(name) {
                Some(value) => value,
                None => return false,
            };
            match (&self.attributes[name], value) {
                (Slot::Fixed { data, used }, CellValue::Fixed(bytes)) => {
                    if used + bytes.len() > data.len() { return false; }
                }
                (Slot::Variable { offsets, values, offsets_used, values_used }, CellValue::Variable(bytes)) => {
                    if offsets_used + 8 > offsets.len() || values_used + bytes.len() > values.len() { return false; }
                }
                _ => return false,
            }
        }

        if let Some(coord) = coord {
            match &self.coords {
                Some(slot) => if slot.used + coord.len() * 8 > slot.data.len() { return false },
                None => return false,
            }
        }

        true
    }

    /// Appends `cell`'s selected-attribute bytes (and coordinates, if
    /// requested) into the buffers. Caller must have already checked `fits`.
    pub fn commit(&mut self, cell: &HashMap<String, CellValue>, attributes: &[String], coord: Option<&Coord>) {
        for name in attributes {
            let value = &cell[name];
            match (self.attributes.get_mut(name).unwrap(), value) {
                (Slot::Fixed { data, used }, CellValue::Fixed(bytes)) => {
                    data[*used..*used + bytes.len()].copy_from_slice(bytes);
                    *used += bytes.len();
                }
                (Slot::Variable { offsets, values, offsets_used, values_used }, CellValue::Variable(bytes)) => {
                    offsets[*offsets_used..*offsets_used + 8].copy_from_slice(&(*values_used as u64).to_le_bytes());
                    *offsets_used += 8;
                    values[*values_used..*values_used + bytes.len()].copy_from_slice(bytes);
                    *values_used += bytes.len();
                }
                _ => unreachable!("buffer kind does not match attribute's variable-sized flag"),
            }
        }

        if let Some(coord) = coord {
            if let Some(slot) = &mut self.coords {
                let bytes: Vec<u8> = coord.iter().flat_map(|value| value.to_le_bytes()).collect();
                slot.data[slot.used..slot.used + bytes.len()].copy_from_slice(&bytes);
                slot.used += bytes.len();
            }
        }
    }

    /// Reads back attribute `name`'s fixed-size value for cell `index`
    /// (`cell_byte_size` bytes each), for the write path pulling cells out
    /// of a caller-populated buffer.
    pub fn read_fixed_cell(&self, name: &str, index: usize, cell_byte_size: usize) -> CellValue {
        match &self.attributes[name] {
            Slot::Fixed { data, .. } => {
                let start = index * cell_byte_size;
                CellValue::Fixed(data[start..start + cell_byte_size].to_vec())
            }
            Slot::Variable { .. } => unreachable!("attribute '{}' is variable-sized", name),
        }
    }

    pub fn read_variable_cell(&self, name: &str, index: usize, written_cells: usize) -> CellValue {
        match &self.attributes[name] {
            Slot::Variable { offsets, values, .. } => {
                let read_offset = |i: usize| u64::from_le_bytes(offsets[i * 8..i * 8 + 8].try_into().unwrap()) as usize;
                let start = read_offset(index);
                let end = if index + 1 < written_cells { read_offset(index + 1) } else { self.used(name) };
                CellValue::Variable(values[start..end].to_vec())
            }
            Slot::Fixed { .. } => unreachable!("attribute '{}' is fixed-size", name),
        }
    }

    pub fn read_coord(&self, index: usize, dimensions: usize) -> Coord {
        let slot = self.coords.as_ref().expect("coordinates buffer not provided");
        let start = index * dimensions * 8;
        (0..dimensions)
            .map(|axis| i64::from_le_bytes(slot.data[start + axis * 8..start + axis * 8 + 8].try_into().unwrap()))
            .collect()
    }
}

impl<'a> Default for QueryBuffers<'a> {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod test {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn fits_rejects_when_fixed_buffer_is_too_small() {
        let mut data = [0u8; 4];
        let buffers = QueryBuffers::new().fixed("a1", &mut data);

        let mut cell = HashMap::new();
        cell.insert("a1".to_string(), CellValue::Fixed(vec![1, 2, 3, 4, 5]));

        assert!(!buffers.fits(&cell, &["a1".to_string()], None));
    }

    #[test]
    fn commit_writes_fixed_bytes_and_tracks_used() {
        let mut data = [0u8; 8];
        let mut buffers = QueryBuffers::new().fixed("a1", &mut data);

        let mut cell = HashMap::new();
        cell.insert("a1".to_string(), CellValue::Fixed(vec![1, 2, 3, 4]));
        let attrs = vec!["a1".to_string()];

        assert!(buffers.fits(&cell, &attrs, None));
        buffers.commit(&cell, &attrs, None);
        assert_eq!(buffers.used("a1"), 4);
    }

    #[test]
    fn commit_writes_coords() {
        let mut attribute_data = [0u8; 4];
        let mut coord_data = [0u8; 16];
        let mut buffers = QueryBuffers::new().fixed("a1", &mut attribute_data).coords(&mut coord_data);

        let mut cell = HashMap::new();
        cell.insert("a1".to_string(), CellValue::Fixed(vec![9, 9, 9, 9]));
        let coord: Coord = smallvec![1i64, 2];
        let attrs = vec!["a1".to_string()];

        assert!(buffers.fits(&cell, &attrs, Some(&coord)));
        buffers.commit(&cell, &attrs, Some(&coord));
        assert_eq!(buffers.coords_used(), 16);
    }
}
