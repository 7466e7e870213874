//! Random tile access into a committed fragment (§4.3): open the attribute
//! file, seek to the recorded offset, read the compressed bytes, decompress.
//! Callers (the tile cache, and the read query's merge loop) are expected to
//! memoize calls through `crate::cache::TileCache`; this reader does not
//! cache anything itself.

use std::sync::Arc;

use crate::codec::{self, decode_coords_tile, resolve};
use crate::error::{Error, Result};
use crate::math::Coord;
use crate::schema::Schema;
use crate::tile::TileData;
use crate::vfs::Vfs;

use super::metadata::FragmentMetadata;

const COORDS_ATTRIBUTE: &str = "__coords";

pub struct FragmentReader {
    schema: Arc<Schema>,
    vfs: Arc<dyn Vfs>,
    fragment_dir: String,
    pub metadata: FragmentMetadata,
}

impl FragmentReader {
    pub fn open(schema: Arc<Schema>, vfs: Arc<dyn Vfs>, fragment_dir: impl Into<String>) -> Result<Self> {
        let fragment_dir = fragment_dir.into();
        let metadata = super::read_footer(vfs.as_ref(), &fragment_dir)?;

        Ok(Self { schema, vfs, fragment_dir, metadata })
    }

    /// Reads and decompresses tile `tile_id` of fixed-size attribute `attribute_name`.
    pub fn read_fixed_tile(&self, attribute_name: &str, tile_id: u64) -> Result<TileData> {
        let attribute = self.schema.attribute(attribute_name)
            .ok_or_else(|| Error::tile(format!("no such attribute '{}'", attribute_name)))?;
        debug_assert!(!attribute.is_variable_sized());

        let bytes = self.read_compressed_tile(attribute_name, tile_id)?;
        let location = self.tile_location(attribute_name, tile_id)?;

        let codec = resolve(attribute.codec);
        let decoded = codec::decode_chunked(codec.as_ref(), &bytes, location.decompressed_size as usize)?;
        Ok(TileData::Fixed(decoded))
    }

    /// Reads and decompresses tile `tile_id` of variable-size attribute `attribute_name`.
    pub fn read_variable_tile(&self, attribute_name: &str, tile_id: u64) -> Result<TileData> {
        let attribute = self.schema.attribute(attribute_name)
            .ok_or_else(|| Error::tile(format!("no such attribute '{}'", attribute_name)))?;
        debug_assert!(attribute.is_variable_sized());

        let codec = resolve(attribute.codec);

        let offsets_location = self.tile_location(attribute_name, tile_id)?;
        let offsets_bytes = self.read_compressed_tile(attribute_name, tile_id)?;
        let decoded_offsets = codec::decode_chunked(codec.as_ref(), &offsets_bytes, offsets_location.decompressed_size as usize)?;
        let offsets: Vec<u64> = decoded_offsets.chunks_exact(8)
            .map(|word| u64::from_le_bytes(word.try_into().unwrap()))
            .collect();

        let values_name = format!("{}_var", attribute_name);
        let values_location = self.tile_location(&values_name, tile_id)?;
        let values_bytes = self.read_compressed_tile(&values_name, tile_id)?;
        let values = codec::decode_chunked(codec.as_ref(), &values_bytes, values_location.decompressed_size as usize)?;

        Ok(TileData::Variable { offsets, values })
    }

    /// Reads and decompresses sparse coordinates tile `tile_id`.
    pub fn read_coords_tile(&self, tile_id: u64) -> Result<Vec<Coord>> {
        let location = self.tile_location(COORDS_ATTRIBUTE, tile_id)?;
        let bytes = self.read_compressed_tile(COORDS_ATTRIBUTE, tile_id)?;

        let dimensions = self.schema.dimension_count();
        let cell_count = location.decompressed_size as usize / (dimensions * 8);

        let codec = resolve(self.schema.coordinates_codec());
        decode_coords_tile(codec.as_ref(), &bytes, dimensions, cell_count)
    }

    pub fn tile_count(&self) -> u64 { self.metadata.tile_count }

    /// Reads fixed-size attribute tile for domain tile id `domain_tile_id`,
    /// or `None` if this fragment never wrote that tile (§4.4 step 3: dense
    /// reads fall back to the schema's empty sentinel in that case).
    pub fn read_dense_fixed_tile(&self, attribute_name: &str, domain_tile_id: u64) -> Result<Option<TileData>> {
        match self.metadata.dense_storage_index(domain_tile_id) {
            Some(storage_index) => self.read_fixed_tile(attribute_name, storage_index).map(Some),
            None => Ok(None),
        }
    }

    pub fn read_dense_variable_tile(&self, attribute_name: &str, domain_tile_id: u64) -> Result<Option<TileData>> {
        match self.metadata.dense_storage_index(domain_tile_id) {
            Some(storage_index) => self.read_variable_tile(attribute_name, storage_index).map(Some),
            None => Ok(None),
        }
    }

    fn tile_location(&self, attribute_name: &str, tile_id: u64) -> Result<crate::fragment::metadata::TileLocation> {
        self.metadata.attribute_tiles.get(attribute_name)
            .and_then(|tiles| tiles.get(tile_id as usize))
            .copied()
            .ok_or_else(|| Error::tile(format!("tile {} of attribute '{}' does not exist in fragment '{}'", tile_id, attribute_name, self.fragment_dir)))
    }

    fn read_compressed_tile(&self, attribute_name: &str, tile_id: u64) -> Result<Vec<u8>> {
        let location = self.tile_location(attribute_name, tile_id)?;
        let path = format!("{}/{}.tdb", self.fragment_dir, attribute_name);
        self.vfs.read(&path, location.offset, location.compressed_size)
    }
}
