//! Small, `Copy`-able enums describing scalar types and layout choices.
//! Split out of `schema::mod` the way the teacher library splits its
//! `Compression` and `LineOrder` enums into `meta::attribute`.

/// The scalar type of a coordinate or an attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Int8, Uint8,
    Int16, Uint16,
    Int32, Uint32,
    Int64, Uint64,
    Float32,
    Float64,
    Char,
}

impl ScalarType {
    pub fn byte_size(self) -> usize {
        match self {
            ScalarType::Int8 | ScalarType::Uint8 | ScalarType::Char => 1,
            ScalarType::Int16 | ScalarType::Uint16 => 2,
            ScalarType::Int32 | ScalarType::Uint32 | ScalarType::Float32 => 4,
            ScalarType::Int64 | ScalarType::Uint64 | ScalarType::Float64 => 8,
        }
    }

    /// The type-max "empty" sentinel a dense array reports for a logical
    /// cell no fragment wrote (§9 Design Notes: "Dense empty sentinel").
    /// Clients must not write this value as meaningful data.
    pub fn empty_sentinel_bytes(self) -> Vec<u8> {
        match self {
            ScalarType::Int8 => i8::MAX.to_le_bytes().to_vec(),
            ScalarType::Uint8 => u8::MAX.to_le_bytes().to_vec(),
            ScalarType::Char => u8::MAX.to_le_bytes().to_vec(),
            ScalarType::Int16 => i16::MAX.to_le_bytes().to_vec(),
            ScalarType::Uint16 => u16::MAX.to_le_bytes().to_vec(),
            ScalarType::Int32 => i32::MAX.to_le_bytes().to_vec(),
            ScalarType::Uint32 => u32::MAX.to_le_bytes().to_vec(),
            ScalarType::Int64 => i64::MAX.to_le_bytes().to_vec(),
            ScalarType::Uint64 => u64::MAX.to_le_bytes().to_vec(),
            ScalarType::Float32 => f32::MAX.to_le_bytes().to_vec(),
            ScalarType::Float64 => f64::MAX.to_le_bytes().to_vec(),
        }
    }

    fn discriminant(self) -> u8 {
        match self {
            ScalarType::Int8 => 0, ScalarType::Uint8 => 1,
            ScalarType::Int16 => 2, ScalarType::Uint16 => 3,
            ScalarType::Int32 => 4, ScalarType::Uint32 => 5,
            ScalarType::Int64 => 6, ScalarType::Uint64 => 7,
            ScalarType::Float32 => 8, ScalarType::Float64 => 9,
            ScalarType::Char => 10,
        }
    }

    pub fn from_discriminant(value: u8) -> Option<Self> {
        Some(match value {
            0 => ScalarType::Int8, 1 => ScalarType::Uint8,
            2 => ScalarType::Int16, 3 => ScalarType::Uint16,
            4 => ScalarType::Int32, 5 => ScalarType::Uint32,
            6 => ScalarType::Int64, 7 => ScalarType::Uint64,
            8 => ScalarType::Float32, 9 => ScalarType::Float64,
            10 => ScalarType::Char,
            _ => return None,
        })
    }

    pub fn to_discriminant(self) -> u8 { self.discriminant() }
}

/// Which codec an attribute's tiles are compressed with (§4.1). Concrete
/// (de)compression lives in `crate::codec`; this enum is the schema-facing
/// descriptor, exactly as `meta::attribute::Compression` is to the teacher's
/// `compression` module.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Codec {
    /// Store values uncompressed. Fastest, largest on disk.
    Uncompressed,

    /// Run-length encoding. Good for runs of repeated values.
    Rle,

    /// Delta-of-deltas over the tile's typed values. The sparse coordinates
    /// attribute's default codec (§3).
    DoubleDelta,

    /// Deflate via `miniz_oxide`/`zune-inflate`.
    Gzip { level: u8 },

    /// __Not implemented by this crate.__ Recognized as a schema value so
    /// that array metadata written by a system with Zstd support round-trips
    /// structurally, but compressing or decompressing with it fails.
    Zstd { level: i32 },

    /// __Not implemented by this crate.__
    Lz4,

    /// __Not implemented by this crate.__
    BloscLz4,

    /// __Not implemented by this crate.__
    BloscZstd,

    /// __Not implemented by this crate.__
    BitPacking,
}

impl Codec {
    /// Serializes this descriptor for the array metadata footer (§6.4).
    pub fn write(self, out: &mut Vec<u8>) -> crate::error::Result<()> {
        use crate::io::Data;

        match self {
            Codec::Uncompressed => 0u8.write(out),
            Codec::Rle => 1u8.write(out),
            Codec::DoubleDelta => 2u8.write(out),
            Codec::Gzip { level } => { 3u8.write(out)?; level.write(out) }
            Codec::Zstd { level } => { 4u8.write(out)?; level.write(out) }
            Codec::Lz4 => 5u8.write(out),
            Codec::BloscLz4 => 6u8.write(out),
            Codec::BloscZstd => 7u8.write(out),
            Codec::BitPacking => 8u8.write(out),
        }
    }

    pub fn read(bytes: &mut &[u8]) -> crate::error::Result<Self> {
        use crate::io::Data;
        use crate::error::Error;

        Ok(match u8::read(bytes)? {
            0 => Codec::Uncompressed,
            1 => Codec::Rle,
            2 => Codec::DoubleDelta,
            3 => Codec::Gzip { level: u8::read(bytes)? },
            4 => Codec::Zstd { level: i32::read(bytes)? },
            5 => Codec::Lz4,
            6 => Codec::BloscLz4,
            7 => Codec::BloscZstd,
            8 => Codec::BitPacking,
            other => return Err(Error::schema(format!("unknown codec discriminant {} in array metadata", other))),
        })
    }
}

/// In what order cells within a tile (or, for `Global`, across the whole
/// array) are visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellOrder {
    RowMajor,
    ColumnMajor,
    Global,
}

/// In what order tiles occur relative to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileOrder {
    RowMajor,
    ColumnMajor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayMode {
    Dense,
    Sparse,
}
