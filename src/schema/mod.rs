//! Describes all metadata needed to interpret an array: its dimensions,
//! attributes, cell layout, and tiling. Mirrors the role the teacher
//! library's `meta::Header` plays for a single EXR layer, generalized from
//! "one image layer" to "one N-dimensional array".

pub mod attribute;

use std::collections::HashSet;
use smallvec::SmallVec;

use crate::error::{Error, Result};
pub use attribute::{ScalarType, Codec, CellOrder, TileOrder, ArrayMode};
use crate::math::Coord;

/// Reserved attribute names that a user-declared attribute must never collide with
/// (§3). `__coords` backs the implicit sparse coordinates attribute; the
/// `__key*` names back the KV facade (§4.6).
pub const RESERVED_ATTRIBUTE_NAMES: &[&str] = &["__coords", "__key", "__key_type", "__key_dim_1", "__key_dim_2"];

/// The fixed width, in bytes, of each entry in a variable-sized attribute's
/// offsets stream (§6.4: `cell_var_offset_type = UINT64`).
pub const VAR_OFFSET_SIZE: usize = 8;

/// Number of cells-per-tile sentinel meaning "this attribute is variable-sized".
pub const VARIABLE_VALUES_PER_CELL: u32 = 0;

/// One named value stream over cells (§3).
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,

    pub scalar_type: ScalarType,

    /// A fixed `k >= 1`, or `VARIABLE_VALUES_PER_CELL` for an unbounded run of values per cell.
    pub values_per_cell: u32,

    pub codec: Codec,
}

impl Attribute {
    pub fn fixed(name: impl Into<String>, scalar_type: ScalarType, values_per_cell: u32, codec: Codec) -> Self {
        Self { name: name.into(), scalar_type, values_per_cell, codec }
    }

    pub fn variable(name: impl Into<String>, scalar_type: ScalarType, codec: Codec) -> Self {
        Self { name: name.into(), scalar_type, values_per_cell: VARIABLE_VALUES_PER_CELL, codec }
    }

    pub fn is_variable_sized(&self) -> bool {
        self.values_per_cell == VARIABLE_VALUES_PER_CELL
    }

    /// Number of bytes one cell's fixed-size value occupies. Meaningless
    /// (and not called) for variable-sized attributes.
    pub fn fixed_cell_byte_size(&self) -> usize {
        debug_assert!(!self.is_variable_sized());
        self.scalar_type.byte_size() * self.values_per_cell as usize
    }
}

/// One dimension of an array's domain: a closed coordinate range plus an
/// optional tile extent (required for dense arrays, optional but
/// recommended for sparse arrays per the teacher-adjacent convention of
/// sizing sparse R-tree fan-out off the same extent).
#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    pub name: String,
    pub domain_lo: i64,
    pub domain_hi: i64,
    pub tile_extent: Option<u64>,
}

impl Dimension {
    pub fn new(name: impl Into<String>, domain_lo: i64, domain_hi: i64, tile_extent: Option<u64>) -> Result<Self> {
        if domain_lo > domain_hi {
            return Err(Error::schema(format!("dimension domain [{}, {}] is inverted", domain_lo, domain_hi)));
        }

        Ok(Self { name: name.into(), domain_lo, domain_hi, tile_extent })
    }

    pub fn extent(&self) -> u64 {
        (self.domain_hi - self.domain_lo + 1) as u64
    }
}

/// The complete typed description of an array (§3).
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub coordinate_type: ScalarType,
    pub dimensions: SmallVec<[Dimension; crate::math::INLINE_DIMS]>,
    pub cell_order: CellOrder,
    pub tile_order: TileOrder,

    /// Number of cells per tile for a sparse array. Dense arrays derive
    /// tile capacity from each dimension's `tile_extent` instead.
    pub capacity: u64,

    pub mode: ArrayMode,
    pub attributes: Vec<Attribute>,
}

impl Schema {
    pub fn dimension_count(&self) -> usize { self.dimensions.len() }

    /// Validates the invariants from §3: attribute names are unique and
    /// disjoint from the reserved set, dense arrays have a tile extent on
    /// every dimension, sparse arrays have a positive capacity.
    pub fn validate(&self) -> Result<()> {
        self.validate_allowing(&[])
    }

    /// Same as `validate`, but `allowed_reserved` names are permitted to
    /// appear in `self.attributes` without tripping the reserved-name check.
    /// Used by the KV facade (§4.6), whose schema legitimately carries
    /// `__key`/`__key_type` as real attributes.
    pub(crate) fn validate_allowing(&self, allowed_reserved: &[&str]) -> Result<()> {
        if self.dimensions.is_empty() {
            return Err(Error::schema("array must have at least one dimension"));
        }

        let mut seen = HashSet::with_capacity(self.attributes.len());
        for attribute in &self.attributes {
            let is_reserved = RESERVED_ATTRIBUTE_NAMES.contains(&attribute.name.as_str());
            if is_reserved && !allowed_reserved.contains(&attribute.name.as_str()) {
                return Err(Error::schema(format!("attribute name '{}' is reserved", attribute.name)));
            }

            if !seen.insert(attribute.name.as_str()) {
                return Err(Error::schema(format!("duplicate attribute name '{}'", attribute.name)));
            }
        }

        match self.mode {
            ArrayMode::Dense => {
                if self.dimensions.iter().any(|dimension| dimension.tile_extent.is_none()) {
                    return Err(Error::schema("dense array requires a tile extent on every dimension"));
                }
            }
            ArrayMode::Sparse => {
                if self.capacity == 0 {
                    return Err(Error::schema("sparse array requires a positive tile capacity"));
                }
            }
        }

        Ok(())
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|attribute| attribute.name == name)
    }

    pub fn domain(&self) -> crate::math::Subarray {
        crate::math::Subarray::new(
            self.dimensions.iter().map(|dimension| dimension.domain_lo).collect(),
            self.dimensions.iter().map(|dimension| dimension.domain_hi).collect(),
        )
    }

    /// The coordinates attribute is always present for a sparse array and
    /// compressed with `DoubleDelta` by default (§3 invariant).
    pub fn coordinates_codec(&self) -> Codec {
        Codec::DoubleDelta
    }

    /// Number of tiles a dense domain is divided into, per dimension.
    pub fn dense_tile_counts(&self) -> Result<SmallVec<[u64; crate::math::INLINE_DIMS]>> {
        debug_assert!(matches!(self.mode, ArrayMode::Dense));

        self.dimensions.iter().map(|dimension| {
            let extent = dimension.tile_extent.ok_or_else(|| Error::schema("missing tile extent on dense dimension"))?;
            Ok(crate::math::compute_tile_count(dimension.extent(), extent))
        }).collect()
    }

    /// Validates that `point` lies within this array's domain.
    pub fn validate_point(&self, point: &[i64]) -> Result<()> {
        if point.len() != self.dimensions.len() {
            return Err(Error::query(format!("coordinate has {} dimensions, schema has {}", point.len(), self.dimensions.len())));
        }

        for (dimension, &value) in self.dimensions.iter().zip(point.iter()) {
            if value < dimension.domain_lo || value > dimension.domain_hi {
                return Err(Error::query(format!(
                    "coordinate {} is out of domain [{}, {}] for dimension '{}'",
                    value, dimension.domain_lo, dimension.domain_hi, dimension.name
                )));
            }
        }

        Ok(())
    }

    pub fn validate_subarray(&self, subarray: &crate::math::Subarray) -> Result<()> {
        if subarray.dimensions() != self.dimensions.len() {
            return Err(Error::query(format!(
                "subarray has {} dimensions, schema has {}", subarray.dimensions(), self.dimensions.len()
            )));
        }

        if !subarray.is_empty() {
            self.validate_point(&subarray.lo)?;
            self.validate_point(&subarray.hi)?;
        }

        Ok(())
    }

    /// Converts a logical cell position within the domain to its index
    /// under the schema's `cell_order` (row-major or column-major), used to
    /// locate a cell within a dense tile and to rank cells for the sorted-
    /// write adapter.
    pub fn cell_order_axis(&self) -> crate::math::AxisOrder {
        match self.cell_order {
            CellOrder::RowMajor => crate::math::AxisOrder::RowMajor,
            CellOrder::ColumnMajor => crate::math::AxisOrder::ColumnMajor,
            // Global order for a dense array still needs a concrete per-tile
            // axis order to lay out cells inside one tile; row-major is used,
            // matching common column-major-tiles/row-major-cells conventions.
            CellOrder::Global => crate::math::AxisOrder::RowMajor,
        }
    }

    pub fn tile_order_axis(&self) -> crate::math::AxisOrder {
        match self.tile_order {
            TileOrder::RowMajor => crate::math::AxisOrder::RowMajor,
            TileOrder::ColumnMajor => crate::math::AxisOrder::ColumnMajor,
        }
    }

    pub fn coord_as_i64(coord: &Coord) -> &[i64] {
        coord.as_slice()
    }

    /// Serializes this schema for `__array_metadata.tdb` (§6.4). Format is
    /// the footer-style "fields in declared order, `Data`-trait primitives"
    /// convention used throughout this crate's binary layouts.
    pub fn write(&self) -> Result<Vec<u8>> {
        use crate::io::Data;
        use bit_field::BitField;

        let mut out = Vec::new();
        self.coordinate_type.to_discriminant().write(&mut out)?;

        (self.dimensions.len() as u64).write(&mut out)?;
        for dimension in &self.dimensions {
            write_string(&mut out, &dimension.name)?;
            dimension.domain_lo.write(&mut out)?;
            dimension.domain_hi.write(&mut out)?;
            match dimension.tile_extent {
                None => 0u8.write(&mut out)?,
                Some(extent) => { 1u8.write(&mut out)?; extent.write(&mut out)?; }
            }
        }

        // cell order, tile order and array mode are each a two-state-or-less
        // enum; pack all three into one flags byte rather than spending a
        // whole byte apiece.
        let mut flags: u8 = 0;
        let cell_order_bits: u8 = match self.cell_order { CellOrder::RowMajor => 0, CellOrder::ColumnMajor => 1, CellOrder::Global => 2 };
        flags.set_bits(0..2, cell_order_bits);
        flags.set_bit(2, matches!(self.tile_order, TileOrder::ColumnMajor));
        flags.set_bit(3, matches!(self.mode, ArrayMode::Sparse));
        flags.write(&mut out)?;

        self.capacity.write(&mut out)?;

        (self.attributes.len() as u64).write(&mut out)?;
        for attribute in &self.attributes {
            write_string(&mut out, &attribute.name)?;
            attribute.scalar_type.to_discriminant().write(&mut out)?;
            attribute.values_per_cell.write(&mut out)?;
            attribute.codec.write(&mut out)?;
        }

        Ok(out)
    }

    pub fn read(mut bytes: &[u8]) -> Result<Self> {
        use crate::io::Data;
        use bit_field::BitField;

        let coordinate_type = ScalarType::from_discriminant(u8::read(&mut bytes)?)
            .ok_or_else(|| Error::schema("unknown coordinate scalar type discriminant in array metadata"))?;

        let dimension_count = u64::read(&mut bytes)?;
        let mut dimensions = SmallVec::with_capacity(dimension_count as usize);
        for _ in 0..dimension_count {
            let name = read_string(&mut bytes)?;
            let domain_lo = i64::read(&mut bytes)?;
            let domain_hi = i64::read(&mut bytes)?;
            let tile_extent = match u8::read(&mut bytes)? {
                0 => None,
                1 => Some(u64::read(&mut bytes)?),
                other => return Err(Error::schema(format!("unknown tile extent presence byte {} in array metadata", other))),
            };
            dimensions.push(Dimension::new(name, domain_lo, domain_hi, tile_extent)?);
        }

        let flags = u8::read(&mut bytes)?;
        let cell_order = match flags.get_bits(0..2) {
            0 => CellOrder::RowMajor, 1 => CellOrder::ColumnMajor, 2 => CellOrder::Global,
            other => return Err(Error::schema(format!("unknown cell order bits {} in array metadata", other))),
        };
        let tile_order = if flags.get_bit(2) { TileOrder::ColumnMajor } else { TileOrder::RowMajor };
        let mode = if flags.get_bit(3) { ArrayMode::Sparse } else { ArrayMode::Dense };

        let capacity = u64::read(&mut bytes)?;

        let attribute_count = u64::read(&mut bytes)?;
        let mut attributes = Vec::with_capacity(attribute_count as usize);
        for _ in 0..attribute_count {
            let name = read_string(&mut bytes)?;
            let scalar_type = ScalarType::from_discriminant(u8::read(&mut bytes)?)
                .ok_or_else(|| Error::schema("unknown attribute scalar type discriminant in array metadata"))?;
            let values_per_cell = u32::read(&mut bytes)?;
            let codec = Codec::read(&mut bytes)?;
            attributes.push(Attribute { name, scalar_type, values_per_cell, codec });
        }

        let schema = Self { coordinate_type, dimensions, cell_order, tile_order, capacity, mode, attributes };
        // A schema that made it to disk already passed its creation-time
        // reserved-name check (possibly the KV facade's relaxed one, see
        // `validate_allowing`); re-validate structure only, not that check.
        schema.validate_allowing(RESERVED_ATTRIBUTE_NAMES)?;
        Ok(schema)
    }
}

fn write_string(out: &mut Vec<u8>, value: &str) -> Result<()> {
    use crate::io::Data;
    u8::write_u64_sized_slice(out, value.as_bytes())
}

fn read_string(bytes: &mut &[u8]) -> Result<String> {
    use crate::io::Data;
    let raw = u8::read_u64_sized_vec(bytes, 4096, true)?;
    String::from_utf8(raw).map_err(|_| Error::schema("array metadata string is not valid utf-8"))
}

#[cfg(test)]
mod test {
    use super::*;

    fn simple_sparse_schema() -> Schema {
        Schema {
            coordinate_type: ScalarType::Uint64,
            dimensions: smallvec::smallvec![
                Dimension::new("d0", 1, 4, None).unwrap(),
                Dimension::new("d1", 1, 4, None).unwrap(),
            ],
            cell_order: CellOrder::Global,
            tile_order: TileOrder::RowMajor,
            capacity: 2,
            mode: ArrayMode::Sparse,
            attributes: vec![
                Attribute::fixed("a1", ScalarType::Int32, 1, Codec::Uncompressed),
            ],
        }
    }

    #[test]
    fn rejects_reserved_attribute_name() {
        let mut schema = simple_sparse_schema();
        schema.attributes.push(Attribute::fixed("__coords", ScalarType::Int32, 1, Codec::Uncompressed));
        assert!(schema.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_attribute_name() {
        let mut schema = simple_sparse_schema();
        schema.attributes.push(Attribute::fixed("a1", ScalarType::Float32, 1, Codec::Uncompressed));
        assert!(schema.validate().is_err());
    }

    #[test]
    fn accepts_valid_sparse_schema() {
        assert!(simple_sparse_schema().validate().is_ok());
    }

    #[test]
    fn dense_requires_tile_extent() {
        let mut schema = simple_sparse_schema();
        schema.mode = ArrayMode::Dense;
        assert!(schema.validate().is_err());
    }

    #[test]
    fn array_metadata_roundtrips() {
        let schema = simple_sparse_schema();
        let bytes = schema.write().unwrap();
        let round_tripped = Schema::read(&bytes).unwrap();
        assert_eq!(round_tripped, schema);
    }
}
