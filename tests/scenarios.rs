//! End-to-end scenarios (§8), each one a small concrete story run against
//! the public API only — no internals, no test framework beyond plain
//! `#[test]`, matching `tests/properties.rs` and the teacher library's own
//! from-scratch integration-style tests.

use std::collections::HashMap;
use std::sync::Arc;

use smallvec::smallvec;

use tesserae::fragment::FragmentWriter;
use tesserae::math::{AxisOrder, Subarray};
use tesserae::query::layout::subarray_points_in_order;
use tesserae::query::{QueryBuffers, QueryStatus, ReadLayout, WriteLayout};
use tesserae::schema::{ArrayMode, Attribute, CellOrder, Codec, Dimension, Schema, ScalarType, TileOrder};
use tesserae::storage::{StorageManager, StorageManagerConfig};
use tesserae::tile::CellValue;
use tesserae::vfs::{MemVfs, Vfs};

fn manager() -> StorageManager {
    let vfs: Arc<dyn Vfs> = Arc::new(MemVfs::new());
    StorageManager::new(vfs, StorageManagerConfig::default())
}

fn sparse_a1_schema() -> Schema {
    Schema {
        coordinate_type: ScalarType::Int64,
        dimensions: smallvec![
            Dimension::new("d0", 1, 4, None).unwrap(),
            Dimension::new("d1", 1, 4, None).unwrap(),
        ],
        cell_order: CellOrder::RowMajor,
        tile_order: TileOrder::RowMajor,
        capacity: 2,
        mode: ArrayMode::Sparse,
        attributes: vec![Attribute::fixed("a1", ScalarType::Int32, 1, Codec::Uncompressed)],
    }
}

fn write_a1_cell(writer: &mut FragmentWriter, coord: [i64; 2], a1: i32) {
    let mut values = HashMap::new();
    values.insert("a1".to_string(), CellValue::Fixed(a1.to_le_bytes().to_vec()));
    writer.write_cell(coord.into_iter().collect(), values).unwrap();
}

/// S1: a global-order sparse write of eight cells across three attributes
/// (fixed, variable, and two-values-per-cell), read back over the full
/// domain, returns the same cells in the same order.
#[test]
fn s1_sparse_global_write_then_full_read() {
    let manager = manager();

    let schema = Schema {
        coordinate_type: ScalarType::Uint64,
        dimensions: smallvec![
            Dimension::new("d0", 1, 4, None).unwrap(),
            Dimension::new("d1", 1, 4, None).unwrap(),
        ],
        cell_order: CellOrder::RowMajor,
        tile_order: TileOrder::RowMajor,
        capacity: 2,
        mode: ArrayMode::Sparse,
        attributes: vec![
            Attribute::fixed("a1", ScalarType::Int32, 1, Codec::Uncompressed),
            Attribute::variable("a2", ScalarType::Char, Codec::Uncompressed),
            Attribute::fixed("a3", ScalarType::Float32, 2, Codec::Uncompressed),
        ],
    };
    manager.create_array("array", schema).unwrap();

    // Already in row-major global order.
    let cells: Vec<([i64; 2], i32, &str, [f32; 2])> = vec![
        ([1, 1], 0, "a", [0.1, 0.2]),
        ([1, 2], 1, "bb", [1.1, 1.2]),
        ([1, 4], 2, "ccc", [2.1, 2.2]),
        ([2, 3], 3, "dddd", [3.1, 3.2]),
        ([3, 1], 4, "e", [4.1, 4.2]),
        ([3, 3], 5, "ff", [5.1, 5.2]),
        ([3, 4], 6, "ggg", [6.1, 6.2]),
        ([4, 2], 7, "hhhh", [7.1, 7.2]),
    ];
    let cell_count = cells.len();

    let mut coords = vec![0u8; cell_count * 16];
    let mut a1 = vec![0u8; cell_count * 4];
    let mut a2_offsets = vec![0u8; cell_count * 8];
    let total_a2: usize = cells.iter().map(|c| c.2.len()).sum();
    let mut a2_values = vec![0u8; total_a2];
    let mut a3 = vec![0u8; cell_count * 8];

    let mut a2_cursor = 0usize;
    for (i, (coord, a1v, a2v, a3v)) in cells.iter().enumerate() {
        coords[i * 16..i * 16 + 8].copy_from_slice(&coord[0].to_le_bytes());
        coords[i * 16 + 8..i * 16 + 16].copy_from_slice(&coord[1].to_le_bytes());
        a1[i * 4..i * 4 + 4].copy_from_slice(&a1v.to_le_bytes());
        a2_offsets[i * 8..i * 8 + 8].copy_from_slice(&(a2_cursor as u64).to_le_bytes());
        a2_values[a2_cursor..a2_cursor + a2v.len()].copy_from_slice(a2v.as_bytes());
        a2_cursor += a2v.len();
        a3[i * 8..i * 8 + 4].copy_from_slice(&a3v[0].to_le_bytes());
        a3[i * 8 + 4..i * 8 + 8].copy_from_slice(&a3v[1].to_le_bytes());
    }

    let write_buffers = QueryBuffers::new()
        .coords(&mut coords)
        .fixed("a1", &mut a1)
        .variable("a2", &mut a2_offsets, &mut a2_values)
        .fixed("a3", &mut a3);

    let mut write = manager.new_write_query("array", WriteLayout::GlobalOrder, None).unwrap();
    write.submit(&write_buffers, cell_count).unwrap();
    write.finalize().unwrap();
    manager.refresh("array").unwrap();

    let schema = manager.schema("array").unwrap();
    let mut read = manager.new_read_query(
        "array", schema.domain(), vec!["a1".to_string(), "a2".to_string(), "a3".to_string()], true, ReadLayout::Global,
    ).unwrap();

    let mut read_coords = vec![0u8; cell_count * 16];
    let mut read_a1 = vec![0u8; cell_count * 4];
    let mut read_a2_offsets = vec![0u8; cell_count * 8];
    let mut read_a2_values = vec![0u8; total_a2];
    let mut read_a3 = vec![0u8; cell_count * 8];
    let mut buffers = QueryBuffers::new()
        .coords(&mut read_coords)
        .fixed("a1", &mut read_a1)
        .variable("a2", &mut read_a2_offsets, &mut read_a2_values)
        .fixed("a3", &mut read_a3);

    assert_eq!(read.submit(&mut buffers).unwrap(), QueryStatus::Completed);

    for (i, (coord, a1v, a2v, a3v)) in cells.iter().enumerate() {
        let read_coord = buffers.read_coord(i, 2);
        assert_eq!([read_coord[0], read_coord[1]], *coord);

        match buffers.read_fixed_cell("a1", i, 4) {
            CellValue::Fixed(bytes) => assert_eq!(i32::from_le_bytes(bytes.try_into().unwrap()), *a1v),
            _ => panic!("a1 is fixed-size"),
        }

        match buffers.read_variable_cell("a2", i, cell_count) {
            CellValue::Variable(bytes) => assert_eq!(String::from_utf8(bytes).unwrap(), *a2v),
            _ => panic!("a2 is variable-size"),
        }

        match buffers.read_fixed_cell("a3", i, 8) {
            CellValue::Fixed(bytes) => {
                let x = f32::from_le_bytes(bytes[0..4].try_into().unwrap());
                let y = f32::from_le_bytes(bytes[4..8].try_into().unwrap());
                assert_eq!([x, y], *a3v);
            }
            _ => panic!("a3 is fixed-size"),
        }
    }
}

/// S2: two unordered batches submitted on one write query; the second
/// batch's value for a coordinate the first batch also wrote wins.
#[test]
fn s2_unordered_write_second_batch_overwrites_duplicate_coordinate() {
    let manager = manager();
    manager.create_array("array", sparse_a1_schema()).unwrap();

    let mut query = manager.new_write_query("array", WriteLayout::Unordered, None).unwrap();

    let first_batch = [[1i64, 1], [1, 2], [1, 4], [2, 3], [3, 1], [4, 2], [3, 3], [3, 4]];
    let mut coords = vec![0u8; first_batch.len() * 16];
    let mut a1 = vec![0u8; first_batch.len() * 4];
    for (i, coord) in first_batch.iter().enumerate() {
        coords[i * 16..i * 16 + 8].copy_from_slice(&coord[0].to_le_bytes());
        coords[i * 16 + 8..i * 16 + 16].copy_from_slice(&coord[1].to_le_bytes());
        a1[i * 4..i * 4 + 4].copy_from_slice(&(i as i32).to_le_bytes());
    }
    let buffers = QueryBuffers::new().coords(&mut coords).fixed("a1", &mut a1);
    query.submit(&buffers, first_batch.len()).unwrap();

    let mut second_coords = [0u8; 16];
    second_coords[0..8].copy_from_slice(&3i64.to_le_bytes());
    second_coords[8..16].copy_from_slice(&3i64.to_le_bytes());
    let mut second_a1 = 99i32.to_le_bytes();
    let second_buffers = QueryBuffers::new().coords(&mut second_coords).fixed("a1", &mut second_a1);
    query.submit(&second_buffers, 1).unwrap();

    query.finalize().unwrap();
    manager.refresh("array").unwrap();

    let point = Subarray::new(smallvec![3, 3], smallvec![3, 3]);
    let mut read = manager.new_read_query("array", point, vec!["a1".to_string()], false, ReadLayout::Global).unwrap();
    let mut out = [0u8; 4];
    let mut buffers = QueryBuffers::new().fixed("a1", &mut out);
    assert_eq!(read.submit(&mut buffers).unwrap(), QueryStatus::Completed);
    assert_eq!(i32::from_le_bytes(out), 99);
}

/// S3: eight fixed 4-byte cells read through a 12-byte buffer complete in
/// three submissions with the exact per-submission sizes and contents.
#[test]
fn s3_overflow_completes_in_three_submissions_with_expected_sizes() {
    let manager = manager();
    manager.create_array("array", sparse_a1_schema()).unwrap();

    let mut writer = manager.new_fragment_writer("array").unwrap();
    for (i, coord) in [[1i64, 1], [1, 2], [1, 3], [1, 4], [2, 1], [2, 2], [2, 3], [2, 4]].into_iter().enumerate() {
        write_a1_cell(&mut writer, coord, i as i32);
    }
    writer.finalize().unwrap();
    manager.refresh("array").unwrap();

    let schema = manager.schema("array").unwrap();
    let mut query = manager.new_read_query(
        "array", schema.domain(), vec!["a1".to_string()], false, ReadLayout::Global,
    ).unwrap();

    let expected_sizes = [12usize, 12, 8];
    let expected_groups: [Vec<i32>; 3] = [vec![0, 1, 2], vec![3, 4, 5], vec![6, 7]];
    let expected_statuses = [QueryStatus::Overflowed, QueryStatus::Overflowed, QueryStatus::Completed];

    for round in 0..3 {
        let mut buffer = [0u8; 12];
        let mut buffers = QueryBuffers::new().fixed("a1", &mut buffer);
        let status = query.submit(&mut buffers).unwrap();
        let used = buffers.used("a1");

        assert_eq!(used, expected_sizes[round], "submission {} used unexpected byte count", round + 1);
        assert_eq!(status, expected_statuses[round]);

        let values: Vec<i32> = buffer[..used].chunks_exact(4).map(|w| i32::from_le_bytes(w.try_into().unwrap())).collect();
        assert_eq!(values, expected_groups[round]);
    }
}

/// S4: a dense array tiled column-major, written through the sorted-column
/// adapter, read back row-major over the whole domain.
#[test]
fn s4_row_major_read_over_column_major_tiled_dense_array() {
    let manager = manager();

    let schema = Schema {
        coordinate_type: ScalarType::Int64,
        dimensions: smallvec![
            Dimension::new("row", 1, 4, Some(2)).unwrap(),
            Dimension::new("col", 1, 4, Some(2)).unwrap(),
        ],
        cell_order: CellOrder::RowMajor,
        tile_order: TileOrder::ColumnMajor,
        capacity: 0,
        mode: ArrayMode::Dense,
        attributes: vec![Attribute::fixed("a1", ScalarType::Int32, 1, Codec::Uncompressed)],
    };
    manager.create_array("array", schema).unwrap();

    let domain = Subarray::new(smallvec![1, 1], smallvec![4, 4]);
    let mut write = manager.new_write_query("array", WriteLayout::SortedCol, Some(domain.clone())).unwrap();

    let points = subarray_points_in_order(&domain, AxisOrder::ColumnMajor);
    let mut a1 = vec![0u8; points.len() * 4];
    for (i, point) in points.iter().enumerate() {
        let row_major_value = ((point[0] - 1) * 4 + (point[1] - 1)) as i32;
        a1[i * 4..i * 4 + 4].copy_from_slice(&row_major_value.to_le_bytes());
    }
    let write_buffers = QueryBuffers::new().fixed("a1", &mut a1);
    write.submit(&write_buffers, points.len()).unwrap();
    write.finalize().unwrap();
    manager.refresh("array").unwrap();

    let mut read = manager.new_read_query("array", domain, vec!["a1".to_string()], false, ReadLayout::RowMajor).unwrap();
    let mut out = vec![0u8; 16 * 4];
    let mut buffers = QueryBuffers::new().fixed("a1", &mut out);
    assert_eq!(read.submit(&mut buffers).unwrap(), QueryStatus::Completed);

    let values: Vec<i32> = out.chunks_exact(4).map(|w| i32::from_le_bytes(w.try_into().unwrap())).collect();
    assert_eq!(values, (0..16).collect::<Vec<i32>>());
}

/// S5: a KV put of four differently-typed keys, point-get of the
/// `FLOAT64`-array key returns exactly the value put under it.
#[test]
fn s5_kv_put_then_point_get() {
    use tesserae::kv::{Key, KvStore};

    let vfs: Arc<dyn Vfs> = Arc::new(MemVfs::new());
    let manager = Arc::new(StorageManager::new(vfs, StorageManagerConfig::default()));
    let kv = KvStore::create(manager, "kv", vec![
        Attribute::fixed("a1", ScalarType::Int32, 1, Codec::Uncompressed),
    ]).unwrap();

    let fixed = |value: i32| CellValue::Fixed(value.to_le_bytes().to_vec());

    let items: Vec<(Key, HashMap<String, CellValue>)> = vec![
        (Key::int32(100), HashMap::from([("a1".to_string(), fixed(0))])),
        (Key::float32(200.0), HashMap::from([("a1".to_string(), fixed(1))])),
        (Key::float64_array(&[300.0, 300.1]), HashMap::from([("a1".to_string(), fixed(2))])),
        (Key::string("key_4"), HashMap::from([("a1".to_string(), fixed(3))])),
    ];
    kv.put_batch(&items).unwrap();

    let result = kv.get(&Key::float64_array(&[300.0, 300.1]), &["a1".to_string()]).unwrap().unwrap();
    assert_eq!(result["a1"], fixed(2));
}

/// S6: two fragments with disjoint MBRs; a read intersecting only one of
/// them never touches the other's attribute file.
#[test]
fn s6_sparse_read_prunes_io_to_the_intersecting_fragment() {
    let mem = Arc::new(MemVfs::new());
    let vfs: Arc<dyn Vfs> = mem.clone();
    let manager = StorageManager::new(vfs, StorageManagerConfig::default());

    let schema = Schema {
        coordinate_type: ScalarType::Int64,
        dimensions: smallvec![
            Dimension::new("d0", 1, 10, None).unwrap(),
            Dimension::new("d1", 1, 10, None).unwrap(),
        ],
        cell_order: CellOrder::RowMajor,
        tile_order: TileOrder::RowMajor,
        capacity: 8,
        mode: ArrayMode::Sparse,
        attributes: vec![Attribute::fixed("a1", ScalarType::Int32, 1, Codec::Uncompressed)],
    };
    manager.create_array("array", schema).unwrap();

    let mut writer_a = manager.new_fragment_writer("array").unwrap();
    for (i, coord) in [[1i64, 1], [1, 2], [2, 1], [2, 2]].into_iter().enumerate() {
        write_a1_cell(&mut writer_a, coord, i as i32);
    }
    let fragment_a = writer_a.finalize().unwrap().unwrap();
    manager.refresh("array").unwrap();

    let mut writer_b = manager.new_fragment_writer("array").unwrap();
    for (i, coord) in [[8i64, 8], [8, 9], [9, 8], [9, 9]].into_iter().enumerate() {
        write_a1_cell(&mut writer_b, coord, 100 + i as i32);
    }
    let fragment_b = writer_b.finalize().unwrap().unwrap();
    manager.refresh("array").unwrap();

    let fragment_a_file = format!("array/{}/a1.tdb", fragment_a.as_str());
    let fragment_b_file = format!("array/{}/a1.tdb", fragment_b.as_str());

    mem.reset_call_log();

    let subarray = Subarray::new(smallvec![1, 1], smallvec![2, 2]); // intersects only fragment A
    let mut query = manager.new_read_query("array", subarray, vec!["a1".to_string()], false, ReadLayout::Global).unwrap();
    let mut out = [0u8; 16];
    let mut buffers = QueryBuffers::new().fixed("a1", &mut out);
    assert_eq!(query.submit(&mut buffers).unwrap(), QueryStatus::Completed);

    assert!(mem.read_call_count_for(&fragment_a_file) > 0);
    assert_eq!(mem.read_call_count_for(&fragment_b_file), 0);
}
