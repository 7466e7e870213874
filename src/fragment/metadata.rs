//! The fragment metadata footer (§6.3): a single binary blob, written once
//! at finalize and read once when a fragment is opened. Layout mirrors the
//! teacher library's own versioned meta-data block (`meta::Header`'s
//! `write`/`read` pair over a `PeekRead`), generalized from "one image
//! attribute list" to "tile offsets, MBRs, and bounding coordinates".

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::io::Data;
use crate::math::{Coord, Subarray};
use crate::schema::ArrayMode;
use crate::tile::BoundingCoords;

/// Footer format version. Readers reject a footer whose major component
/// differs from this crate's (§6.3).
pub const FOOTER_VERSION: (u8, u8, u8) = (1, 0, 0);

/// Where one compressed tile lives within its attribute's data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileLocation {
    pub offset: u64,
    pub compressed_size: u64,
    pub decompressed_size: u64,
}

/// Everything needed to randomly access a fragment's tiles and to prune it
/// against a subarray without opening a single data file.
#[derive(Debug, Clone)]
pub struct FragmentMetadata {
    pub mode: ArrayMode,

    /// Attribute name -> one `TileLocation` per tile, in tile-id order.
    /// The sparse coordinates stream is stored under the key `"__coords"`.
    pub attribute_tiles: HashMap<String, Vec<TileLocation>>,

    pub tile_count: u64,

    /// Per-tile MBR, sparse arrays only; empty for dense fragments.
    pub mbrs: Vec<Subarray>,

    /// Per-tile bounding coordinates, sparse arrays only.
    pub bounding_coords: Vec<BoundingCoords>,

    /// The MBR of every cell in the fragment; `None` for an empty fragment
    /// or a dense one (dense fragments are pruned by subarray, not MBR).
    pub global_mbr: Option<Subarray>,

    /// For a dense fragment, the domain tile id each stored tile (in storage
    /// order) corresponds to — a dense write query may cover only part of
    /// the domain, so storage order and domain tile-grid order can differ.
    /// Empty for sparse fragments.
    pub dense_tile_ids: Vec<u64>,
}

impl FragmentMetadata {
    pub fn empty(mode: ArrayMode) -> Self {
        Self {
            mode,
            attribute_tiles: HashMap::new(),
            tile_count: 0,
            mbrs: Vec::new(),
            bounding_coords: Vec::new(),
            global_mbr: None,
            dense_tile_ids: Vec::new(),
        }
    }

    /// Maps a domain tile id to its position in this fragment's storage
    /// order, if this fragment covers it. Dense reads use this to locate
    /// the stored tile for a logical tile-grid position (§4.4 step 2).
    pub fn dense_storage_index(&self, domain_tile_id: u64) -> Option<u64> {
        self.dense_tile_ids.iter().position(|&id| id == domain_tile_id).map(|index| index as u64)
    }

    /// Candidate tile indices for attribute `attribute_name` whose MBR
    /// intersects `subarray` (§4.4 step 1, "overlap filter"). Dense
    /// fragments have no per-tile MBR to test against and so are never
    /// pruned here; the caller prunes them by tile-index arithmetic instead.
    pub fn candidate_tiles(&self, subarray: &Subarray) -> Vec<u64> {
        match self.mode {
            ArrayMode::Dense => (0..self.tile_count).collect(),
            ArrayMode::Sparse => {
                self.mbrs.iter().enumerate()
                    .filter(|(_, mbr)| mbr.intersects(subarray))
                    .map(|(index, _)| index as u64)
                    .collect()
            }
        }
    }

    pub fn intersects(&self, subarray: &Subarray) -> bool {
        match &self.global_mbr {
            Some(mbr) => mbr.intersects(subarray),
            None => matches!(self.mode, ArrayMode::Dense),
        }
    }

    pub fn write(&self) -> Result<Vec<u8>> {
        use bit_field::BitField;

        let mut body = Vec::new();

        // Footer version and the handful of footer-wide booleans share one
        // word: version in the low 24 bits, array mode and the presence of
        // a global MBR as individual flag bits above that.
        let mut version_and_flags: u32 = 0;
        version_and_flags.set_bits(0..8, u32::from(FOOTER_VERSION.0));
        version_and_flags.set_bits(8..16, u32::from(FOOTER_VERSION.1));
        version_and_flags.set_bits(16..24, u32::from(FOOTER_VERSION.2));
        version_and_flags.set_bit(24, matches!(self.mode, ArrayMode::Sparse));
        version_and_flags.set_bit(25, self.global_mbr.is_some());
        version_and_flags.write(&mut body)?;

        (self.attribute_tiles.len() as u64).write(&mut body)?;

        let mut attribute_names: Vec<&String> = self.attribute_tiles.keys().collect();
        attribute_names.sort(); // deterministic footer bytes

        for name in attribute_names {
            let tiles = &self.attribute_tiles[name];
            write_string(&mut body, name)?;
            (tiles.len() as u64).write(&mut body)?;
            for tile in tiles {
                tile.offset.write(&mut body)?;
                tile.compressed_size.write(&mut body)?;
                tile.decompressed_size.write(&mut body)?;
            }
        }

        self.tile_count.write(&mut body)?;

        (self.mbrs.len() as u64).write(&mut body)?;
        for mbr in &self.mbrs {
            write_coord(&mut body, &mbr.lo)?;
            write_coord(&mut body, &mbr.hi)?;
        }

        (self.bounding_coords.len() as u64).write(&mut body)?;
        for bounds in &self.bounding_coords {
            write_coord(&mut body, &bounds.first)?;
            write_coord(&mut body, &bounds.last)?;
        }

        if let Some(mbr) = &self.global_mbr {
            write_coord(&mut body, &mbr.lo)?;
            write_coord(&mut body, &mbr.hi)?;
        }

        (self.dense_tile_ids.len() as u64).write(&mut body)?;
        for &id in &self.dense_tile_ids {
            id.write(&mut body)?;
        }

        let checksum = crc32fast::hash(&body);
        checksum.write(&mut body)?;

        Ok(body)
    }

    pub fn read(mut bytes: &[u8]) -> Result<Self> {
        let checksum_offset = bytes.len().checked_sub(4)
            .ok_or_else(|| Error::tile("fragment metadata footer is too short to contain a checksum"))?;

        let expected_checksum = u32::from_le_bytes(bytes[checksum_offset..].try_into().unwrap());
        let actual_checksum = crc32fast::hash(&bytes[..checksum_offset]);
        if expected_checksum != actual_checksum {
            return Err(Error::tile("fragment metadata footer failed its checksum"));
        }
        bytes = &bytes[..checksum_offset];

        use bit_field::BitField;

        let version_and_flags = u32::read(&mut bytes)?;
        let major = version_and_flags.get_bits(0..8) as u8;
        let _minor = version_and_flags.get_bits(8..16) as u8;
        let _revision = version_and_flags.get_bits(16..24) as u8;
        if major != FOOTER_VERSION.0 {
            return Err(Error::tile(format!("fragment metadata footer version {} is unsupported (expected major version {})", major, FOOTER_VERSION.0)));
        }

        let mode = if version_and_flags.get_bit(24) { ArrayMode::Sparse } else { ArrayMode::Dense };
        let has_global_mbr = version_and_flags.get_bit(25);

        let attribute_count = u64::read(&mut bytes)?;
        let mut attribute_tiles = HashMap::with_capacity(attribute_count as usize);

        for _ in 0..attribute_count {
            let name = read_string(&mut bytes)?;
            let tile_count = u64::read(&mut bytes)?;
            let mut tiles = Vec::with_capacity(tile_count as usize);

            for _ in 0..tile_count {
                tiles.push(TileLocation {
                    offset: u64::read(&mut bytes)?,
                    compressed_size: u64::read(&mut bytes)?,
                    decompressed_size: u64::read(&mut bytes)?,
                });
            }

            attribute_tiles.insert(name, tiles);
        }

        let tile_count = u64::read(&mut bytes)?;

        let mbr_count = u64::read(&mut bytes)?;
        let mut mbrs = Vec::with_capacity(mbr_count as usize);
        for _ in 0..mbr_count {
            let lo = read_coord(&mut bytes)?;
            let hi = read_coord(&mut bytes)?;
            mbrs.push(Subarray::new(lo, hi));
        }

        let bounding_count = u64::read(&mut bytes)?;
        let mut bounding_coords = Vec::with_capacity(bounding_count as usize);
        for _ in 0..bounding_count {
            let first = read_coord(&mut bytes)?;
            let last = read_coord(&mut bytes)?;
            bounding_coords.push(BoundingCoords { first, last });
        }

        let global_mbr = if has_global_mbr {
            let lo = read_coord(&mut bytes)?;
            let hi = read_coord(&mut bytes)?;
            Some(Subarray::new(lo, hi))
        } else {
            None
        };

        let dense_tile_id_count = u64::read(&mut bytes)?;
        let mut dense_tile_ids = Vec::with_capacity(dense_tile_id_count as usize);
        for _ in 0..dense_tile_id_count {
            dense_tile_ids.push(u64::read(&mut bytes)?);
        }

        Ok(Self { mode, attribute_tiles, tile_count, mbrs, bounding_coords, global_mbr, dense_tile_ids })
    }
}

fn write_string(out: &mut Vec<u8>, value: &str) -> Result<()> {
    u8::write_u64_sized_slice(out, value.as_bytes())
}

fn read_string(bytes: &mut &[u8]) -> Result<String> {
    let raw = u8::read_u64_sized_vec(bytes, 4096, true)?;
    String::from_utf8(raw).map_err(|_| Error::tile("fragment metadata attribute name is not valid utf-8"))
}

fn write_coord(out: &mut Vec<u8>, coord: &Coord) -> Result<()> {
    i64::write_u64_sized_slice(out, coord.as_slice())
}

fn read_coord(bytes: &mut &[u8]) -> Result<Coord> {
    Ok(i64::read_u64_sized_vec(bytes, crate::math::INLINE_DIMS * 4, true)?.into())
}
