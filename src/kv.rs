//! The key-value facade (§4.6): a thin layer over the query core that
//! rewrites a typed key into a synthetic 2-dimensional hashed coordinate
//! (§3 "Keys"), then turns a put into an unordered sparse write and a get
//! into a degenerate point subarray read. Composes with the query core
//! rather than reimplementing any part of it, the way the teacher
//! library's `rgba` convenience layer composes with its generic `image`
//! reader/writer instead of duplicating them.

use std::collections::HashMap;
use std::sync::Arc;

use md5::{Digest, Md5};

use crate::error::{Error, Result};
use crate::math::{Coord, Subarray};
use crate::query::{QueryBuffers, QueryStatus, ReadLayout, WriteLayout};
use crate::schema::{ArrayMode, Attribute, CellOrder, Codec, Dimension, Schema, ScalarType, TileOrder};
use crate::storage::StorageManager;
use crate::tile::CellValue;

/// The raw key bytes, holding the reconstructed key (§4.6: "persists enough
/// information to reconstruct keys").
pub const KEY_ATTRIBUTE: &str = "__key";
/// The key's scalar type tag, one byte per key.
pub const KEY_TYPE_ATTRIBUTE: &str = "__key_type";

const KEY_DIM_1: &str = "__key_dim_1";
const KEY_DIM_2: &str = "__key_dim_2";

/// Default sparse tile capacity for a KV store's backing array. Keys land
/// at effectively random coordinates, so this has no locality benefit — it
/// just bounds how many pending cells a fragment writer buffers before
/// flushing a tile (§4.2).
const DEFAULT_CAPACITY: u64 = 4096;

/// Starting size of a `get`'s variable-value scratch buffer; doubled on
/// overflow (§4.4's overflow/resume contract is what makes this safe: a
/// failed submission leaves the read query's cursor untouched).
const INITIAL_VARIABLE_BUFFER: usize = 256;

/// A typed key (§3): a scalar type tag plus its raw little-endian bytes.
/// Two keys with the same type and bytes hash to the same coordinate and
/// are therefore the same key.
#[derive(Debug, Clone, PartialEq)]
pub struct Key {
    pub scalar_type: ScalarType,
    pub bytes: Vec<u8>,
}

impl Key {
    pub fn new(scalar_type: ScalarType, bytes: Vec<u8>) -> Self {
        Self { scalar_type, bytes }
    }

    pub fn int32(value: i32) -> Self { Self::new(ScalarType::Int32, value.to_le_bytes().to_vec()) }
    pub fn uint64(value: u64) -> Self { Self::new(ScalarType::Uint64, value.to_le_bytes().to_vec()) }
    pub fn float32(value: f32) -> Self { Self::new(ScalarType::Float32, value.to_le_bytes().to_vec()) }
    pub fn float64(value: f64) -> Self { Self::new(ScalarType::Float64, value.to_le_bytes().to_vec()) }

    /// A key whose value is itself an array of `FLOAT64`s (S5's `[300.0,
    /// 300.1]:FLOAT64`).
    pub fn float64_array(values: &[f64]) -> Self {
        let bytes = values.iter().flat_map(|value| value.to_le_bytes()).collect();
        Self::new(ScalarType::Float64, bytes)
    }

    pub fn string(value: &str) -> Self {
        Self::new(ScalarType::Char, value.as_bytes().to_vec())
    }

    /// The 128-bit MD5 digest of `type_tag ‖ size(u64 LE) ‖ bytes`,
    /// interpreted as two `uint64` dimensions (§3). Collisions are
    /// considered astronomically unlikely and are not detected — a
    /// colliding put silently overwrites whatever key hashed there first
    /// (documented limitation, see DESIGN.md).
    pub fn coordinate(&self) -> Coord {
        let mut hasher = Md5::new();
        hasher.update([self.scalar_type.to_discriminant()]);
        hasher.update((self.bytes.len() as u64).to_le_bytes());
        hasher.update(&self.bytes);
        let digest = hasher.finalize();

        let d1 = u64::from_le_bytes(digest[0..8].try_into().unwrap());
        let d2 = u64::from_le_bytes(digest[8..16].try_into().unwrap());
        smallvec::smallvec![d1 as i64, d2 as i64]
    }
}

/// A key-value store: an array whose two dimensions are a key's hashed
/// coordinate, with `__key`/`__key_type` carried alongside the user's own
/// attributes so a key can be reconstructed from a scan (§4.6).
pub struct KvStore {
    manager: Arc<StorageManager>,
    array_uri: String,
    schema: Arc<Schema>,
}

impl KvStore {
    /// Creates the backing array for a new KV store with `attributes` as
    /// the value columns alongside the reserved key-reconstruction ones.
    pub fn create(manager: Arc<StorageManager>, array_uri: &str, attributes: Vec<Attribute>) -> Result<Self> {
        let mut all_attributes = vec![
            Attribute::variable(KEY_ATTRIBUTE, ScalarType::Uint8, Codec::Uncompressed),
            Attribute::fixed(KEY_TYPE_ATTRIBUTE, ScalarType::Uint8, 1, Codec::Uncompressed),
        ];
        all_attributes.extend(attributes);

        let schema = Schema {
            coordinate_type: ScalarType::Uint64,
            dimensions: smallvec::smallvec![
                Dimension::new(KEY_DIM_1, i64::MIN, i64::MAX, None)?,
                Dimension::new(KEY_DIM_2, i64::MIN, i64::MAX, None)?,
            ],
            cell_order: CellOrder::Global,
            tile_order: TileOrder::RowMajor,
            capacity: DEFAULT_CAPACITY,
            mode: ArrayMode::Sparse,
            attributes: all_attributes,
        };

        manager.create_array_with_reserved(array_uri, schema, &[KEY_ATTRIBUTE, KEY_TYPE_ATTRIBUTE])?;
        let schema = manager.schema(array_uri)?;
        Ok(Self { manager, array_uri: array_uri.to_string(), schema })
    }

    /// Opens a KV store previously created with `create`.
    pub fn open(manager: Arc<StorageManager>, array_uri: &str) -> Result<Self> {
        let schema = manager.open_array(array_uri)?;
        Ok(Self { manager, array_uri: array_uri.to_string(), schema })
    }

    /// Puts one (key, values) pair. `values` must have one entry per
    /// non-reserved attribute this store was created with.
    pub fn put(&self, key: &Key, values: HashMap<String, CellValue>) -> Result<()> {
        self.put_batch(&[(key.clone(), values)])
    }

    /// Puts many (key, values) pairs as one unordered write, one fragment
    /// (§4.5 `WRITE_UNORDERED`; §8 property 6's "bulk put").
    pub fn put_batch(&self, items: &[(Key, HashMap<String, CellValue>)]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        let cell_count = items.len();
        let dims = self.schema.dimension_count();

        let mut coords = vec![0u8; cell_count * dims * 8];
        let mut fixed_buffers: HashMap<String, Vec<u8>> = HashMap::new();
        let mut variable_offsets: HashMap<String, Vec<u8>> = HashMap::new();
        let mut variable_values: HashMap<String, Vec<u8>> = HashMap::new();

        for attribute in &self.schema.attributes {
            if attribute.is_variable_sized() {
                variable_offsets.insert(attribute.name.clone(), vec![0u8; cell_count * 8]);
                variable_values.insert(attribute.name.clone(), Vec::new());
            } else {
                fixed_buffers.insert(attribute.name.clone(), vec![0u8; cell_count * attribute.fixed_cell_byte_size()]);
            }
        }

        for (attribute_name, buffer) in variable_values.iter_mut() {
            let total: usize = items.iter()
                .map(|(key, values)| self.cell_value(attribute_name, key, values))
                .collect::<Result<Vec<_>>>()?
                .into_iter()
                .map(|value| match value {
                    CellValue::Variable(bytes) => bytes.len(),
                    CellValue::Fixed(_) => unreachable!("attribute '{}' is variable-sized", attribute_name),
                })
                .sum();
            buffer.resize(total, 0);
        }

        let mut variable_cursors: HashMap<String, usize> = HashMap::new();
        for (index, (key, values)) in items.iter().enumerate() {
            let coordinate = key.coordinate();
            for (axis, value) in coordinate.iter().enumerate() {
                let start = (index * dims + axis) * 8;
                coords[start..start + 8].copy_from_slice(&value.to_le_bytes());
            }

            for attribute in &self.schema.attributes {
                let value = self.cell_value(&attribute.name, key, values)?;
                match value {
                    CellValue::Fixed(bytes) => {
                        let size = attribute.fixed_cell_byte_size();
                        let slot = fixed_buffers.get_mut(&attribute.name).expect("attribute registered above");
                        slot[index * size..(index + 1) * size].copy_from_slice(&bytes);
                    }
                    CellValue::Variable(bytes) => {
                        let cursor = variable_cursors.entry(attribute.name.clone()).or_insert(0);
                        let offsets = variable_offsets.get_mut(&attribute.name).expect("attribute registered above");
                        offsets[index * 8..index * 8 + 8].copy_from_slice(&(*cursor as u64).to_le_bytes());
                        let values_buffer = variable_values.get_mut(&attribute.name).expect("attribute registered above");
                        values_buffer[*cursor..*cursor + bytes.len()].copy_from_slice(&bytes);
                        *cursor += bytes.len();
                    }
                }
            }
        }

        let mut builder = QueryBuffers::new().coords(&mut coords);
        for (name, data) in fixed_buffers.iter_mut() {
            builder = builder.fixed(name.clone(), data);
        }
        for attribute in &self.schema.attributes {
            if let Some(values) = variable_values.get_mut(&attribute.name) {
                let offsets = variable_offsets.get_mut(&attribute.name).expect("attribute registered above");
                builder = builder.variable(attribute.name.clone(), offsets, values);
            }
        }

        let mut query = self.manager.new_write_query(&self.array_uri, WriteLayout::Unordered, None)?;
        query.submit(&builder, cell_count)?;
        query.finalize()?;
        Ok(())
    }

    /// Refreshes the backing array and looks up `key`'s current value for
    /// every attribute named in `attributes`, or `None` if no put ever
    /// wrote that key (§4.6: "a degenerate subarray `[d1, d1] x [d2, d2]`,
    /// a global-order read").
    pub fn get(&self, key: &Key, attributes: &[String]) -> Result<Option<HashMap<String, CellValue>>> {
        self.manager.refresh(&self.array_uri)?;

        for name in attributes {
            self.schema.attribute(name)
                .ok_or_else(|| Error::kv_query(format!("kv store has no attribute '{}'", name)))?;
        }

        let coordinate = key.coordinate();
        let subarray = Subarray::new(coordinate.clone(), coordinate);
        let dims = self.schema.dimension_count();

        let mut variable_capacity = INITIAL_VARIABLE_BUFFER;
        loop {
            let mut read = self.manager.new_read_query(
                &self.array_uri, subarray.clone(), attributes.to_vec(), true, ReadLayout::Global,
            )?;

            let mut coords = vec![0u8; dims * 8];
            let mut fixed_buffers: HashMap<String, Vec<u8>> = HashMap::new();
            let mut variable_offsets: HashMap<String, Vec<u8>> = HashMap::new();
            let mut variable_values: HashMap<String, Vec<u8>> = HashMap::new();

            for name in attributes {
                let attribute = self.schema.attribute(name).expect("checked above");
                if attribute.is_variable_sized() {
                    variable_offsets.insert(name.clone(), vec![0u8; 8]);
                    variable_values.insert(name.clone(), vec![0u8; variable_capacity]);
                } else {
                    fixed_buffers.insert(name.clone(), vec![0u8; attribute.fixed_cell_byte_size()]);
                }
            }

            let mut builder = QueryBuffers::new().coords(&mut coords);
            for (name, data) in fixed_buffers.iter_mut() {
                builder = builder.fixed(name.clone(), data);
            }
            for name in attributes {
                if let Some(values) = variable_values.get_mut(name) {
                    let offsets = variable_offsets.get_mut(name).expect("attribute registered above");
                    builder = builder.variable(name.clone(), offsets, values);
                }
            }

            match read.submit(&mut builder)? {
                QueryStatus::Overflowed => {
                    variable_capacity *= 2;
                    continue;
                }
                QueryStatus::Completed => {
                    let found = builder.coords_used() > 0;

                    // Pull everything out of `builder` before dropping it — it
                    // holds the mutable borrows of `fixed_buffers`/`variable_values`.
                    let mut variable_lengths: HashMap<String, usize> = HashMap::new();
                    for name in attributes {
                        if self.schema.attribute(name).expect("checked above").is_variable_sized() {
                            variable_lengths.insert(name.clone(), builder.used(name));
                        }
                    }
                    drop(builder);

                    if !found {
                        return Ok(None);
                    }

                    let mut out = HashMap::with_capacity(attributes.len());
                    for name in attributes {
                        let attribute = self.schema.attribute(name).expect("checked above");
                        let value = if attribute.is_variable_sized() {
                            let used = variable_lengths[name];
                            CellValue::Variable(variable_values[name][..used].to_vec())
                        } else {
                            CellValue::Fixed(fixed_buffers[name].clone())
                        };
                        out.insert(name.clone(), value);
                    }
                    return Ok(Some(out));
                }
                other => return Err(Error::kv_query(format!("unexpected kv read status {:?}", other))),
            }
        }
    }

    fn cell_value(&self, attribute_name: &str, key: &Key, values: &HashMap<String, CellValue>) -> Result<CellValue> {
        if attribute_name == KEY_ATTRIBUTE {
            return Ok(CellValue::Variable(key.bytes.clone()));
        }
        if attribute_name == KEY_TYPE_ATTRIBUTE {
            return Ok(CellValue::Fixed(vec![key.scalar_type.to_discriminant()]));
        }

        values.get(attribute_name).cloned()
            .ok_or_else(|| Error::kv_query(format!("put is missing a value for attribute '{}'", attribute_name)))
    }
}
