//! The write query state machine (§4.5). `WRITE`/`GlobalOrder` streams
//! cells straight into a `FragmentWriter` as they arrive, trusting the
//! client's promise that they're already in global cell order.
//! `WRITE_UNORDERED` accumulates every submitted cell in memory and only
//! sorts (stably, later-submitted wins on a duplicate coordinate) at
//! `finalize`. The two sorted-write adapters accumulate into whole dense
//! tiles keyed by domain tile id and hand each complete tile to
//! `FragmentWriter::write_dense_tile` at `finalize`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::fragment::{FragmentId, FragmentWriter};
use crate::math::{AxisOrder, Coord, Subarray};
use crate::schema::{ArrayMode, Attribute, Schema};
use crate::tile::{CellValue, TileData};
use crate::vfs::Vfs;

use super::buffers::QueryBuffers;
use super::layout::{self, subarray_points_in_order};
use super::{QueryStatus, WriteLayout};

struct DenseTileBuilder {
    fixed: HashMap<String, Vec<u8>>,
    variable: HashMap<String, Vec<Option<Vec<u8>>>>,
}

impl DenseTileBuilder {
    fn new(schema: &Schema, tile_capacity: usize) -> Self {
        let mut fixed = HashMap::new();
        let mut variable = HashMap::new();

        for attribute in &schema.attributes {
            if attribute.is_variable_sized() {
                variable.insert(attribute.name.clone(), vec![None; tile_capacity]);
            } else {
                fixed.insert(attribute.name.clone(), vec![0u8; tile_capacity * attribute.fixed_cell_byte_size()]);
            }
        }

        Self { fixed, variable }
    }

    fn set(&mut self, attribute: &Attribute, local_index: usize, value: CellValue) {
        match value {
            CellValue::Fixed(bytes) => {
                let size = attribute.fixed_cell_byte_size();
                let slot = self.fixed.get_mut(&attribute.name).expect("attribute registered at construction");
                slot[local_index * size..(local_index + 1) * size].copy_from_slice(&bytes);
            }
            CellValue::Variable(bytes) => {
                let slot = self.variable.get_mut(&attribute.name).expect("attribute registered at construction");
                slot[local_index] = Some(bytes);
            }
        }
    }

    fn finish(self, schema: &Schema) -> Result<HashMap<String, TileData>> {
        let mut out = HashMap::with_capacity(schema.attributes.len());

        for (name, bytes) in self.fixed {
            out.insert(name, TileData::Fixed(bytes));
        }

        for (name, slots) in self.variable {
            let mut offsets = Vec::with_capacity(slots.len());
            let mut values = Vec::new();

            for slot in slots {
                let bytes = slot.ok_or_else(|| Error::query(format!(
                    "dense write left a gap in attribute '{}' — the write's subarray must be tile-aligned and fully submitted", name
                )))?;
                offsets.push(values.len() as u64);
                values.extend_from_slice(&bytes);
            }

            out.insert(name, TileData::Variable { offsets, values });
        }

        Ok(out)
    }
}

struct DenseAccumulator {
    points: Vec<Coord>,
    cursor: usize,
    tile_counts: Vec<u64>,
    tile_extents: Vec<u64>,
    tiles: HashMap<u64, DenseTileBuilder>,
}

enum Body {
    /// `WRITE`: the client promises global cell order; cells stream straight
    /// into the fragment writer, one `submit` at a time.
    GlobalOrder(FragmentWriter),
    /// `WRITE_UNORDERED`: accumulated until `finalize` sorts and dedups.
    Unordered(Vec<(Coord, HashMap<String, CellValue>)>),
    /// `WRITE_SORTED_ROW` / `WRITE_SORTED_COL`.
    Dense(DenseAccumulator),
}

/// A write against one array, in one of the four submission modes of §4.5.
/// Constructed only by `StorageManager::new_write_query`.
pub struct WriteQuery {
    schema: Arc<Schema>,
    vfs: Arc<dyn Vfs>,
    array_uri: String,
    host: String,
    status: QueryStatus,
    body: Body,
}

impl WriteQuery {
    pub(crate) fn init(
        schema: Arc<Schema>,
        vfs: Arc<dyn Vfs>,
        array_uri: String,
        host: String,
        layout: WriteLayout,
        subarray: Option<Subarray>,
    ) -> Result<Self> {
        let body = match layout {
            WriteLayout::GlobalOrder | WriteLayout::Unordered => {
                if !matches!(schema.mode, ArrayMode::Sparse) {
                    return Err(Error::query("global-order/unordered writes apply only to sparse arrays"));
                }

                match layout {
                    WriteLayout::GlobalOrder => {
                        let writer = FragmentWriter::create(schema.clone(), vfs.clone(), array_uri.as_str(), host.as_str())?;
                        Body::GlobalOrder(writer)
                    }
                    _ => Body::Unordered(Vec::new()),
                }
            }

            WriteLayout::SortedRow | WriteLayout::SortedCol => {
                if !matches!(schema.mode, ArrayMode::Dense) {
                    return Err(Error::query("sorted-row/sorted-col writes apply only to dense arrays"));
                }

                let subarray = subarray.ok_or_else(|| Error::query("a dense write requires a subarray"))?;
                schema.validate_subarray(&subarray)?;
                validate_tile_aligned(&schema, &subarray)?;

                let axis = match layout {
                    WriteLayout::SortedRow => AxisOrder::RowMajor,
                    _ => AxisOrder::ColumnMajor,
                };

                let tile_counts: Vec<u64> = schema.dense_tile_counts()?.into_vec();
                let tile_extents = layout::tile_extents(&schema)?;
                let points = subarray_points_in_order(&subarray, axis);

                Body::Dense(DenseAccumulator {
                    points, cursor: 0, tile_counts, tile_extents, tiles: HashMap::new(),
                })
            }
        };

        Ok(Self { schema, vfs, array_uri, host, status: QueryStatus::InProgress, body })
    }

    /// Consumes `cell_count` cells from `buffers` — starting at index 0 of
    /// this submission, not a running total — and either streams them to
    /// disk (global order) or appends them to the in-memory accumulator
    /// (unordered, dense). May be called more than once; sorting/tiling/
    /// commit all happen once, at `finalize`.
    pub fn submit(&mut self, buffers: &QueryBuffers<'_>, cell_count: usize) -> Result<QueryStatus> {
        match self.apply(buffers, cell_count) {
            Ok(()) => {
                self.status = QueryStatus::Completed;
                Ok(self.status)
            }
            Err(error) => {
                self.status = QueryStatus::Failed;
                Err(error)
            }
        }
    }

    fn apply(&mut self, buffers: &QueryBuffers<'_>, cell_count: usize) -> Result<()> {
        for attribute in &self.schema.attributes {
            if !buffers.has_attribute(&attribute.name) {
                return Err(Error::query(format!("write is missing a buffer for attribute '{}'", attribute.name)));
            }
        }

        match &mut self.body {
            Body::GlobalOrder(writer) => {
                if !buffers.wants_coords() {
                    return Err(Error::query("a sparse write requires a coordinates buffer"));
                }

                for index in 0..cell_count {
                    let coord = buffers.read_coord(index, self.schema.dimension_count());
                    self.schema.validate_point(coord.as_slice())?;
                    let values = read_cell(&self.schema, buffers, index, cell_count);
                    writer.write_cell(coord, values)?;
                }
            }

            Body::Unordered(pending) => {
                if !buffers.wants_coords() {
                    return Err(Error::query("a sparse write requires a coordinates buffer"));
                }

                for index in 0..cell_count {
                    let coord = buffers.read_coord(index, self.schema.dimension_count());
                    self.schema.validate_point(coord.as_slice())?;
                    let values = read_cell(&self.schema, buffers, index, cell_count);
                    pending.push((coord, values));
                }
            }

            Body::Dense(accumulator) => {
                if accumulator.cursor + cell_count > accumulator.points.len() {
                    return Err(Error::query("dense write submitted more cells than its subarray covers"));
                }

                for offset in 0..cell_count {
                    let point = accumulator.points[accumulator.cursor + offset].clone();
                    let domain_tile_id = layout::tile_id(&self.schema, point.as_slice(), &accumulator.tile_counts);
                    let local_index = layout::cell_index(&self.schema, point.as_slice(), &accumulator.tile_extents);

                    let tile_capacity = accumulator.tile_extents.iter().product::<u64>() as usize;
                    let schema = &self.schema;
                    let builder = accumulator.tiles.entry(domain_tile_id)
                        .or_insert_with(|| DenseTileBuilder::new(schema, tile_capacity));

                    for attribute in &self.schema.attributes {
                        let value = if attribute.is_variable_sized() {
                            buffers.read_variable_cell(&attribute.name, offset, cell_count)
                        } else {
                            buffers.read_fixed_cell(&attribute.name, offset, attribute.fixed_cell_byte_size())
                        };
                        builder.set(attribute, local_index, value);
                    }
                }

                accumulator.cursor += cell_count;
            }
        }

        Ok(())
    }

    pub fn status(&self) -> QueryStatus { self.status }

    /// Commits everything submitted so far as one fragment (§4.2, §4.5).
    /// Returns `None` if nothing was ever submitted (Property 4).
    pub fn finalize(self) -> Result<Option<FragmentId>> {
        match self.body {
            Body::GlobalOrder(writer) => writer.finalize(),

            Body::Unordered(mut pending) => {
                if pending.is_empty() {
                    return Ok(None);
                }

                let axis = self.schema.cell_order_axis();
                // Stable sort: among equal coordinates, the later-submitted
                // entry (originally later in `pending`) stays later (§4.5).
                pending.sort_by(|a, b| axis.compare(a.0.as_slice(), b.0.as_slice()));

                let mut deduped: Vec<(Coord, HashMap<String, CellValue>)> = Vec::with_capacity(pending.len());
                for (coord, values) in pending {
                    if let Some((last_coord, last_values)) = deduped.last_mut() {
                        if axis.compare(last_coord.as_slice(), coord.as_slice()) == std::cmp::Ordering::Equal {
                            *last_values = values;
                            continue;
                        }
                    }
                    deduped.push((coord, values));
                }

                let mut writer = FragmentWriter::create(self.schema.clone(), self.vfs.clone(), self.array_uri.as_str(), self.host.as_str())?;
                for (coord, values) in deduped {
                    writer.write_cell(coord, values)?;
                }
                writer.finalize()
            }

            Body::Dense(accumulator) => {
                if accumulator.tiles.is_empty() {
                    return Ok(None);
                }

                let mut tile_ids: Vec<u64> = accumulator.tiles.keys().copied().collect();
                tile_ids.sort_unstable();

                let mut writer = FragmentWriter::create(self.schema.clone(), self.vfs.clone(), self.array_uri.as_str(), self.host.as_str())?;
                let mut tiles = accumulator.tiles;
                for tile_id in tile_ids {
                    let builder = tiles.remove(&tile_id).expect("just collected from this map");
                    let values = builder.finish(&self.schema)?;
                    writer.write_dense_tile(tile_id, values)?;
                }
                writer.finalize()
            }
        }
    }
}

fn read_cell(schema: &Schema, buffers: &QueryBuffers<'_>, index: usize, cell_count: usize) -> HashMap<String, CellValue> {
    let mut values = HashMap::with_capacity(schema.attributes.len());
    for attribute in &schema.attributes {
        let value = if attribute.is_variable_sized() {
            buffers.read_variable_cell(&attribute.name, index, cell_count)
        } else {
            buffers.read_fixed_cell(&attribute.name, index, attribute.fixed_cell_byte_size())
        };
        values.insert(attribute.name.clone(), value);
    }
    values
}

/// A dense write's subarray must begin and end on tile boundaries (except
/// possibly at the domain's own edge), so every tile it touches is fully
/// covered by the submitted cells — partial tiles have no single fragment
/// that could stand as "the" data for the rest of the tile.
fn validate_tile_aligned(schema: &Schema, subarray: &Subarray) -> Result<()> {
    for (dimension, (&lo, &hi)) in schema.dimensions.iter().zip(subarray.lo.iter().zip(subarray.hi.iter())) {
        let extent = dimension.tile_extent.ok_or_else(|| Error::query("dense array is missing a tile extent"))? as i64;

        if (lo - dimension.domain_lo) % extent != 0 {
            return Err(Error::query(format!("dense write subarray does not start on a tile boundary for dimension '{}'", dimension.name)));
        }

        let covers_to_domain_edge = hi == dimension.domain_hi;
        if !covers_to_domain_edge && (hi - dimension.domain_lo + 1) % extent != 0 {
            return Err(Error::query(format!("dense write subarray does not end on a tile boundary for dimension '{}'", dimension.name)));
        }
    }

    Ok(())
}
