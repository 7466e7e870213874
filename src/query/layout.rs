//! Maps between global domain coordinates and dense tile/cell addressing,
//! and enumerates a subarray's points in a requested row-/column-major
//! order (§4.4 "sorted-read adapter", §4.5 "sorted-write adapter"). Kept
//! separate from `read`/`write` since both sides need the same addressing
//! math, the way the teacher library's `meta::attribute::LineOrder` is used
//! by both the block reader and writer.

use crate::error::{Error, Result};
use crate::math::{AxisOrder, Coord, Subarray};
use crate::schema::Schema;

/// Per-dimension tile extents, required on every dimension for a dense array.
pub fn tile_extents(schema: &Schema) -> Result<Vec<u64>> {
    schema.dimensions.iter()
        .map(|dimension| dimension.tile_extent.ok_or_else(|| Error::query("dense layout requires a tile extent on every dimension")))
        .collect()
}

/// The domain tile id containing `point`, under the schema's tile order (§3).
pub fn tile_id(schema: &Schema, point: &[i64], tile_counts: &[u64]) -> u64 {
    let coords: Vec<i64> = schema.dimensions.iter().zip(point.iter())
        .map(|(dimension, &value)| (value - dimension.domain_lo) / dimension.tile_extent.unwrap() as i64)
        .collect();

    linear_index(&coords, tile_counts, schema.tile_order_axis())
}

/// `point`'s in-tile cell index, under the schema's cell order (§3).
pub fn cell_index(schema: &Schema, point: &[i64], tile_extents: &[u64]) -> usize {
    let local: Vec<i64> = schema.dimensions.iter().zip(point.iter())
        .map(|(dimension, &value)| (value - dimension.domain_lo) % dimension.tile_extent.unwrap() as i64)
        .collect();

    linear_index(&local, tile_extents, schema.cell_order_axis()) as usize
}

fn linear_index(coords: &[i64], extents: &[u64], order: AxisOrder) -> u64 {
    let major_to_minor: Vec<usize> = match order {
        AxisOrder::RowMajor => (0..coords.len()).collect(),
        AxisOrder::ColumnMajor => (0..coords.len()).rev().collect(),
    };

    let mut index = 0u64;
    for axis in major_to_minor {
        index = index * extents[axis] + coords[axis] as u64;
    }
    index
}

/// Every point of `subarray`, ordered so that `order`'s minor axis varies
/// fastest. Materializes the whole subarray; fine at the scale this engine
/// targets (one array's worth of cells resident for one query), but not
/// suited to a subarray spanning a large fraction of a huge dense domain.
pub fn subarray_points_in_order(subarray: &Subarray, order: AxisOrder) -> Vec<Coord> {
    if subarray.is_empty() {
        return Vec::new();
    }

    let dims = subarray.dimensions();
    let extents: Vec<i64> = subarray.lo.iter().zip(subarray.hi.iter()).map(|(lo, hi)| hi - lo + 1).collect();
    let total: i64 = extents.iter().product();

    let minor_to_major: Vec<usize> = match order {
        AxisOrder::RowMajor => (0..dims).rev().collect(),
        AxisOrder::ColumnMajor => (0..dims).collect(),
    };

    let mut points = Vec::with_capacity(total as usize);
    for flat in 0..total {
        let mut remaining = flat;
        let mut local = vec![0i64; dims];
        for &axis in &minor_to_major {
            let extent = extents[axis];
            local[axis] = remaining % extent;
            remaining /= extent;
        }
        points.push((0..dims).map(|axis| subarray.lo[axis] + local[axis]).collect());
    }
    points
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::schema::{ArrayMode, CellOrder, Dimension, ScalarType, TileOrder};
    use smallvec::smallvec;

    fn dense_schema() -> Schema {
        Schema {
            coordinate_type: ScalarType::Int64,
            dimensions: smallvec![
                Dimension::new("row", 1, 4, Some(2)).unwrap(),
                Dimension::new("col", 1, 4, Some(2)).unwrap(),
            ],
            cell_order: CellOrder::RowMajor,
            tile_order: TileOrder::ColumnMajor,
            capacity: 0,
            mode: ArrayMode::Dense,
            attributes: vec![],
        }
    }

    #[test]
    fn tile_and_cell_addressing() {
        let schema = dense_schema();
        let tile_counts = [2u64, 2];
        let extents = [2u64, 2];

        // (1,1) is the first cell of tile (0,0), which under column-major
        // tile order is domain tile id 0.
        assert_eq!(tile_id(&schema, &[1, 1], &tile_counts), 0);
        assert_eq!(cell_index(&schema, &[1, 1], &extents), 0);

        // (3,1) is in tile-grid row 1, col 0; column-major tile order makes
        // column the most significant axis, so this is domain tile id 1.
        assert_eq!(tile_id(&schema, &[3, 1], &tile_counts), 1);
    }

    #[test]
    fn subarray_row_major_enumeration_order() {
        let subarray = Subarray::new(smallvec![1, 1], smallvec![2, 2]);
        let points = subarray_points_in_order(&subarray, AxisOrder::RowMajor);
        assert_eq!(points, vec![
            smallvec![1i64, 1], smallvec![1i64, 2],
            smallvec![2i64, 1], smallvec![2i64, 2],
        ]);
    }

    #[test]
    fn subarray_column_major_enumeration_order() {
        let subarray = Subarray::new(smallvec![1, 1], smallvec![2, 2]);
        let points = subarray_points_in_order(&subarray, AxisOrder::ColumnMajor);
        assert_eq!(points, vec![
            smallvec![1i64, 1], smallvec![2i64, 1],
            smallvec![1i64, 2], smallvec![2i64, 2],
        ]);
    }
}
