//! Assembles one fragment (§4.2). Cells accumulate in memory, tile by tile;
//! each full tile is compressed and appended to its attribute's in-memory
//! stream immediately (so offsets are known as soon as a tile is produced),
//! and the whole fragment is committed in one atomic directory rename at
//! `finalize`, mirroring the teacher library's own "write to a temp file,
//! rename on success" commit discipline.

use std::collections::HashMap;
use std::mem;
use std::sync::Arc;

use crate::codec::{self, encode_coords_tile, resolve};
use crate::error::Result;
use crate::math::{Coord, Subarray};
use crate::schema::{ArrayMode, Schema};
use crate::tile::{BoundingCoords, CellValue, MbrAccumulator, TileData};
use crate::vfs::Vfs;

use super::metadata::{FragmentMetadata, TileLocation};
use super::FragmentId;

const STAGING_PREFIX: &str = "__writing_";
const COORDS_ATTRIBUTE: &str = "__coords";

#[derive(Default)]
struct AttributeStream {
    buffer: Vec<u8>,
    tiles: Vec<TileLocation>,
}

impl AttributeStream {
    fn append(&mut self, framed: Vec<u8>, decompressed_size: usize) {
        let offset = self.buffer.len() as u64;
        let compressed_size = framed.len() as u64;
        self.buffer.extend_from_slice(&framed);
        self.tiles.push(TileLocation { offset, compressed_size, decompressed_size: decompressed_size as u64 });
    }
}

struct PendingCell {
    coords: Coord,
    values: HashMap<String, CellValue>,
}

/// One attribute's compressed tile, ready to be appended to its stream.
/// Kept separate from the compression step so that step can run in
/// parallel across attributes (see `compress_tiles`) while the append
/// itself stays a sequential borrow of `self`.
enum CompressedTile {
    Fixed { framed: Vec<u8>, decompressed_size: usize },
    Variable { framed_offsets: Vec<u8>, offset_bytes_len: usize, framed_values: Vec<u8>, values_len: usize },
}

fn compress_tile(codec_kind: crate::schema::Codec, tile: &TileData) -> Result<CompressedTile> {
    let codec = resolve(codec_kind);

    match tile {
        TileData::Fixed(bytes) => {
            let framed = codec::encode_chunked(codec.as_ref(), bytes, codec::DEFAULT_CHUNK_SIZE)?;
            Ok(CompressedTile::Fixed { framed, decompressed_size: bytes.len() })
        }
        TileData::Variable { offsets, values } => {
            let offset_bytes: Vec<u8> = offsets.iter().flat_map(|value| value.to_le_bytes()).collect();
            let framed_offsets = codec::encode_chunked(codec.as_ref(), &offset_bytes, codec::DEFAULT_CHUNK_SIZE)?;
            let framed_values = codec::encode_chunked(codec.as_ref(), values, codec::DEFAULT_CHUNK_SIZE)?;
            Ok(CompressedTile::Variable {
                framed_offsets,
                offset_bytes_len: offset_bytes.len(),
                framed_values,
                values_len: values.len(),
            })
        }
    }
}

/// Compresses every attribute's tile, one codec invocation per attribute.
/// Attributes are independent of one another, so with the `rayon` feature
/// enabled this fans out across a thread pool exactly as the teacher
/// library's DWA compressor parallelizes over independent byte planes;
/// without it, the same work runs on the calling thread.
fn compress_tiles(tiles: Vec<(String, crate::schema::Codec, TileData)>) -> Result<Vec<(String, CompressedTile)>> {
    #[cfg(feature = "rayon")]
    {
        use rayon::iter::{IntoParallelIterator, ParallelIterator};

        tiles.into_par_iter()
            .map(|(name, codec_kind, tile)| compress_tile(codec_kind, &tile).map(|compressed| (name, compressed)))
            .collect()
    }

    #[cfg(not(feature = "rayon"))]
    {
        tiles.into_iter()
            .map(|(name, codec_kind, tile)| compress_tile(codec_kind, &tile).map(|compressed| (name, compressed)))
            .collect()
    }
}

/// Builds one fragment directory under `array_dir`, staged so that nothing
/// under the final fragment name is visible until `finalize` succeeds.
pub struct FragmentWriter {
    schema: Arc<Schema>,
    vfs: Arc<dyn Vfs>,
    array_dir: String,
    fragment_id: FragmentId,
    staging_dir: String,

    fixed_streams: HashMap<String, AttributeStream>,
    variable_streams: HashMap<String, (AttributeStream, AttributeStream)>,
    coords_stream: AttributeStream,

    pending_cells: Vec<PendingCell>,
    capacity: u64,

    tile_count: u64,
    per_tile_mbrs: Vec<Subarray>,
    per_tile_bounds: Vec<BoundingCoords>,
    global_mbr: Option<MbrAccumulator>,
    dense_tile_ids: Vec<u64>,

    finished: bool,
}

impl FragmentWriter {
    pub fn create(schema: Arc<Schema>, vfs: Arc<dyn Vfs>, array_dir: impl Into<String>, host: &str) -> Result<Self> {
        let array_dir = array_dir.into();
        let fragment_id = FragmentId::generate(host);
        let staging_dir = format!("{}/{}{}", array_dir, STAGING_PREFIX, fragment_id.as_str());
        vfs.create_dir(&staging_dir)?;

        let mut fixed_streams = HashMap::new();
        let mut variable_streams = HashMap::new();

        for attribute in &schema.attributes {
            if attribute.is_variable_sized() {
                variable_streams.insert(attribute.name.clone(), (AttributeStream::default(), AttributeStream::default()));
            } else {
                fixed_streams.insert(attribute.name.clone(), AttributeStream::default());
            }
        }

        let dimensions = schema.dimension_count();
        let capacity = match schema.mode {
            ArrayMode::Sparse => schema.capacity,
            ArrayMode::Dense => 0, // write_dense_tile supplies whole tiles; per-cell capacity is unused
        };

        Ok(Self {
            schema,
            vfs,
            array_dir,
            fragment_id,
            staging_dir,
            fixed_streams,
            variable_streams,
            coords_stream: AttributeStream::default(),
            pending_cells: Vec::new(),
            capacity,
            tile_count: 0,
            per_tile_mbrs: Vec::new(),
            per_tile_bounds: Vec::new(),
            global_mbr: if matches!(schema.mode, ArrayMode::Sparse) { Some(MbrAccumulator::new(dimensions)) } else { None },
            dense_tile_ids: Vec::new(),
            finished: false,
        })
    }

    pub fn fragment_id(&self) -> &FragmentId { &self.fragment_id }

    /// Appends one sparse cell, flushing a tile the moment `capacity` cells
    /// have accumulated (§4.2).
    pub fn write_cell(&mut self, coords: Coord, values: HashMap<String, CellValue>) -> Result<()> {
        debug_assert!(matches!(self.schema.mode, ArrayMode::Sparse), "write_cell is only valid for sparse fragments");

        self.pending_cells.push(PendingCell { coords, values });
        if self.pending_cells.len() as u64 >= self.capacity {
            self.flush_tile()?;
        }

        Ok(())
    }

    /// Appends one whole dense tile, already laid out in tile-local cell
    /// order by the caller (§4.5's sorted-write adapter). `domain_tile_id`
    /// is this tile's position in the full domain's tile grid (§3's tile
    /// order), recorded so a reader can locate it even though a dense write
    /// may cover only part of the domain.
    pub fn write_dense_tile(&mut self, domain_tile_id: u64, mut values: HashMap<String, TileData>) -> Result<()> {
        debug_assert!(matches!(self.schema.mode, ArrayMode::Dense), "write_dense_tile is only valid for dense fragments");

        let mut tiles = Vec::with_capacity(self.schema.attributes.len());
        for attribute in self.schema.attributes.clone() {
            let tile = values.remove(&attribute.name)
                .ok_or_else(|| crate::error::Error::tile(format!("missing tile data for attribute '{}'", attribute.name)))?;
            tiles.push((attribute.name.clone(), attribute.codec, tile));
        }

        for (name, compressed) in compress_tiles(tiles)? {
            self.append_compressed_tile(&name, compressed)?;
        }

        self.dense_tile_ids.push(domain_tile_id);
        self.tile_count += 1;
        Ok(())
    }

    fn flush_tile(&mut self) -> Result<()> {
        if self.pending_cells.is_empty() {
            return Ok(());
        }

        let cells = mem::take(&mut self.pending_cells);

        let mut tiles = Vec::with_capacity(self.schema.attributes.len());
        for attribute in self.schema.attributes.clone() {
            let tile = if attribute.is_variable_sized() {
                let mut offsets = Vec::with_capacity(cells.len());
                let mut values = Vec::new();

                for cell in &cells {
                    offsets.push(values.len() as u64);
                    match cell.values.get(&attribute.name) {
                        Some(CellValue::Variable(bytes)) => values.extend_from_slice(bytes),
                        _ => return Err(crate::error::Error::tile(format!("cell missing variable value for attribute '{}'", attribute.name))),
                    }
                }

                TileData::Variable { offsets, values }
            } else {
                let mut bytes = Vec::with_capacity(cells.len() * attribute.fixed_cell_byte_size());
                for cell in &cells {
                    match cell.values.get(&attribute.name) {
                        Some(CellValue::Fixed(cell_bytes)) => bytes.extend_from_slice(cell_bytes),
                        _ => return Err(crate::error::Error::tile(format!("cell missing fixed value for attribute '{}'", attribute.name))),
                    }
                }

                TileData::Fixed(bytes)
            };

            tiles.push((attribute.name.clone(), attribute.codec, tile));
        }

        for (name, compressed) in compress_tiles(tiles)? {
            self.append_compressed_tile(&name, compressed)?;
        }

        let points: Vec<Coord> = cells.iter().map(|cell| cell.coords.clone()).collect();
        let coords_codec = resolve(self.schema.coordinates_codec());
        let framed = encode_coords_tile(coords_codec.as_ref(), &points, self.schema.dimension_count(), codec::DEFAULT_CHUNK_SIZE)?;
        let decompressed_size = points.len() * self.schema.dimension_count() * 8;
        self.coords_stream.append(framed, decompressed_size);

        let mut tile_accumulator = MbrAccumulator::new(self.schema.dimension_count());
        for point in &points {
            tile_accumulator.push(point);
            if let Some(global) = &mut self.global_mbr {
                global.push(point);
            }
        }

        if let Some((mbr, bounds)) = tile_accumulator.finish() {
            self.per_tile_mbrs.push(mbr);
            self.per_tile_bounds.push(bounds);
        }

        self.tile_count += 1;
        Ok(())
    }

    fn append_compressed_tile(&mut self, name: &str, compressed: CompressedTile) -> Result<()> {
        match compressed {
            CompressedTile::Fixed { framed, decompressed_size } => {
                let stream = self.fixed_streams.get_mut(name)
                    .ok_or_else(|| crate::error::Error::tile(format!("no fixed-size stream open for attribute '{}'", name)))?;
                stream.append(framed, decompressed_size);
            }
            CompressedTile::Variable { framed_offsets, offset_bytes_len, framed_values, values_len } => {
                let (offsets_stream, values_stream) = self.variable_streams.get_mut(name)
                    .ok_or_else(|| crate::error::Error::tile(format!("no variable-size stream open for attribute '{}'", name)))?;

                offsets_stream.append(framed_offsets, offset_bytes_len);
                values_stream.append(framed_values, values_len);
            }
        }

        Ok(())
    }

    /// Seals the fragment. Returns `None` if no cells were ever submitted
    /// (Property 4: idempotent finalize produces no fragment), otherwise
    /// commits the staging directory under its final name and returns its id.
    pub fn finalize(mut self) -> Result<Option<FragmentId>> {
        self.flush_tile()?;

        if self.tile_count == 0 {
            self.vfs.delete_dir(&self.staging_dir)?;
            self.finished = true;
            return Ok(None);
        }

        let mut attribute_tiles = HashMap::new();
        for (name, stream) in self.fixed_streams.drain() {
            self.vfs.write(&format!("{}/{}.tdb", self.staging_dir, name), &stream.buffer, false)?;
            attribute_tiles.insert(name, stream.tiles);
        }

        for (name, (offsets_stream, values_stream)) in self.variable_streams.drain() {
            self.vfs.write(&format!("{}/{}.tdb", self.staging_dir, name), &offsets_stream.buffer, false)?;
            self.vfs.write(&format!("{}/{}_var.tdb", self.staging_dir, name), &values_stream.buffer, false)?;
            attribute_tiles.insert(name.clone(), offsets_stream.tiles);
            attribute_tiles.insert(format!("{}_var", name), values_stream.tiles);
        }

        if matches!(self.schema.mode, ArrayMode::Sparse) {
            self.vfs.write(&format!("{}/{}.tdb", self.staging_dir, COORDS_ATTRIBUTE), &self.coords_stream.buffer, false)?;
            attribute_tiles.insert(COORDS_ATTRIBUTE.to_string(), mem::take(&mut self.coords_stream.tiles));
        }

        let global_mbr = self.global_mbr.take().and_then(|accumulator| accumulator.finish()).map(|(mbr, _)| mbr);

        let metadata = FragmentMetadata {
            mode: self.schema.mode,
            attribute_tiles,
            tile_count: self.tile_count,
            mbrs: mem::take(&mut self.per_tile_mbrs),
            bounding_coords: mem::take(&mut self.per_tile_bounds),
            global_mbr,
            dense_tile_ids: mem::take(&mut self.dense_tile_ids),
        };

        self.vfs.write(&format!("{}/__fragment_metadata.tdb", self.staging_dir), &metadata.write()?, false)?;

        let final_dir = format!("{}/{}", self.array_dir, self.fragment_id.as_str());
        self.vfs.move_dir(&self.staging_dir, &final_dir)?;
        self.finished = true;

        Ok(Some(self.fragment_id.clone()))
    }

    /// Deletes everything written so far. Callers invoke this explicitly on
    /// a mid-write error (§4.2: "failure at any point leaves no visible
    /// fragment"); `Drop` also calls it as a last resort so an early return
    /// via `?` can't leak a staging directory.
    pub fn abort(mut self) -> Result<()> {
        self.finished = true;
        self.vfs.delete_dir(&self.staging_dir)
    }
}

impl Drop for FragmentWriter {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.vfs.delete_dir(&self.staging_dir);
        }
    }
}
