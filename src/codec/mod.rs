//! The tile codec pipeline (§4.1): a tile is compressed as a sequence of
//! fixed-size chunks, each chunk framed with its original and compressed
//! lengths so a reader can decompress one chunk at a time without decoding
//! the whole tile. Generalizes the teacher library's per-scan-line/per-block
//! `compress_bytes`/`decompress_bytes` functions (`compression::zip`,
//! `compression::rle`) from pixel rows to arbitrary tile byte containers.

mod rle;
mod double_delta;
mod gzip;

use crate::error::{CodecErrorKind, Error, Result};
use crate::schema::attribute::Codec as CodecKind;
use crate::io::Data;

/// A byte vector, named the way the teacher library names its `ByteVec`.
pub type ByteVec = Vec<u8>;
pub type Bytes<'s> = &'s [u8];

/// Default chunk size: in practice a tile never exceeds this, so a tile is
/// compressed as exactly one chunk unless a caller configures something
/// smaller (mirrors the spec's `tile_chunk_size = INT_MAX` default).
pub const DEFAULT_CHUNK_SIZE: usize = i32::MAX as usize;

/// The pluggable compressor/decompressor interface (§4.1's "Codec
/// contract"). Implementations must be deterministic and lossless.
pub trait TileCodec: Send + Sync {
    fn compress(&self, input: Bytes<'_>) -> Result<ByteVec>;

    /// Returns exactly `out_capacity` bytes or fails; a codec that produced
    /// fewer or more bytes than declared is treated as malformed input.
    fn decompress(&self, input: Bytes<'_>, out_capacity: usize) -> Result<ByteVec>;
}

struct Uncompressed;
impl TileCodec for Uncompressed {
    fn compress(&self, input: Bytes<'_>) -> Result<ByteVec> { Ok(input.to_vec()) }
    fn decompress(&self, input: Bytes<'_>, out_capacity: usize) -> Result<ByteVec> {
        if input.len() != out_capacity {
            return Err(Error::codec(CodecErrorKind::SizeMismatch, "uncompressed chunk length mismatch"));
        }
        Ok(input.to_vec())
    }
}

struct NotSupported(&'static str);
impl TileCodec for NotSupported {
    fn compress(&self, _input: Bytes<'_>) -> Result<ByteVec> {
        Err(Error::codec(CodecErrorKind::NotSupported, format!("{} is not yet implemented by this crate", self.0)))
    }
    fn decompress(&self, _input: Bytes<'_>, _out_capacity: usize) -> Result<ByteVec> {
        Err(Error::codec(CodecErrorKind::NotSupported, format!("{} is not yet implemented by this crate", self.0)))
    }
}

/// Resolves a schema-level codec descriptor to its concrete implementation.
pub fn resolve(kind: CodecKind) -> Box<dyn TileCodec> {
    match kind {
        CodecKind::Uncompressed => Box::new(Uncompressed),
        CodecKind::Rle => Box::new(rle::Rle),
        CodecKind::DoubleDelta => Box::new(double_delta::DoubleDelta),
        CodecKind::Gzip { level } => Box::new(gzip::Gzip { level }),
        CodecKind::Zstd { .. } => Box::new(NotSupported("ZSTD")),
        CodecKind::Lz4 => Box::new(NotSupported("LZ4")),
        CodecKind::BloscLz4 => Box::new(NotSupported("BLOSC_LZ4")),
        CodecKind::BloscZstd => Box::new(NotSupported("BLOSC_ZSTD")),
        CodecKind::BitPacking => Box::new(NotSupported("BIT_PACKING")),
    }
}

/// One on-disk chunk record: `(original_len: u32, compressed_len: u32, compressed bytes)`.
fn write_chunk_record(out: &mut ByteVec, original_len: u32, compressed: &[u8]) -> Result<()> {
    original_len.write(out)?;
    (compressed.len() as u32).write(out)?;
    out.extend_from_slice(compressed);
    Ok(())
}

/// Splits `bytes` into chunks of at most `chunk_size`, compresses each with
/// `codec`, and frames them per §4.1. Falls back to storing a chunk
/// uncompressed-verbatim-but-still-framed is not performed here: callers
/// that want "only write compressed if smaller" do that comparison
/// themselves (the fragment writer does, mirroring the teacher's
/// `compress_image_section`).
pub fn encode_chunked(codec: &dyn TileCodec, bytes: Bytes<'_>, chunk_size: usize) -> Result<ByteVec> {
    let mut out = Vec::with_capacity(bytes.len() / 2 + 16);

    if bytes.is_empty() {
        return Ok(out);
    }

    for chunk in bytes.chunks(chunk_size.max(1)) {
        let compressed = codec.compress(chunk)?;
        write_chunk_record(&mut out, chunk.len() as u32, &compressed)?;
    }

    Ok(out)
}

/// Inverse of `encode_chunked`. `expected_total_len` is the decompressed
/// tile size recorded in fragment metadata, used to pre-size the output
/// buffer and as a final sanity check.
pub fn decode_chunked(codec: &dyn TileCodec, mut framed: Bytes<'_>, expected_total_len: usize) -> Result<ByteVec> {
    let mut out = Vec::with_capacity(expected_total_len);

    while !framed.is_empty() {
        if framed.len() < 8 {
            return Err(Error::tile("truncated chunk record"));
        }

        let original_len = u32::from_le_bytes(framed[0..4].try_into().unwrap()) as usize;
        let compressed_len = u32::from_le_bytes(framed[4..8].try_into().unwrap()) as usize;
        framed = &framed[8..];

        if framed.len() < compressed_len {
            return Err(Error::tile("truncated chunk payload"));
        }

        let compressed = &framed[..compressed_len];
        framed = &framed[compressed_len..];

        let decompressed = codec.decompress(compressed, original_len)?;
        if decompressed.len() != original_len {
            return Err(Error::codec(CodecErrorKind::SizeMismatch, "chunk decompressed to an unexpected length"));
        }

        out.extend_from_slice(&decompressed);
    }

    if out.len() != expected_total_len {
        return Err(Error::tile(format!(
            "decoded tile size {} does not match recorded size {}", out.len(), expected_total_len
        )));
    }

    Ok(out)
}

/// Encodes a sparse coordinates tile: `points` (cell-major, `dimensions`
/// values per point) is transposed into `dimensions` homogeneous i64
/// sub-streams, each compressed independently with `codec` (§4.1: "the
/// coordinates tile treats each dimension as its own chunked sub-stream").
/// Each sub-stream's framed byte length is u64-prefixed so `decode_coords_tile`
/// can split them back apart without re-parsing chunk records itself.
pub fn encode_coords_tile(codec: &dyn TileCodec, points: &[crate::math::Coord], dimensions: usize, chunk_size: usize) -> Result<ByteVec> {
    let mut out = Vec::new();

    for axis in 0..dimensions {
        let column: ByteVec = points.iter().flat_map(|point| point[axis].to_le_bytes()).collect();
        let framed = encode_chunked(codec, &column, chunk_size)?;
        (framed.len() as u64).write(&mut out)?;
        out.extend_from_slice(&framed);
    }

    Ok(out)
}

/// Inverse of `encode_coords_tile`. `cell_count` is the number of points the
/// tile declares (from its `decompressed_size / (dimensions * 8)`).
pub fn decode_coords_tile(codec: &dyn TileCodec, mut bytes: Bytes<'_>, dimensions: usize, cell_count: usize) -> Result<Vec<crate::math::Coord>> {
    let mut columns: Vec<Vec<i64>> = Vec::with_capacity(dimensions);

    for _ in 0..dimensions {
        let framed_len = u64::read(&mut bytes)? as usize;
        if bytes.len() < framed_len {
            return Err(Error::tile("coordinates tile sub-stream length exceeds remaining bytes"));
        }

        let (framed, rest) = bytes.split_at(framed_len);
        bytes = rest;

        let column_bytes = decode_chunked(codec, framed, cell_count * 8)?;
        let column: Vec<i64> = column_bytes.chunks_exact(8)
            .map(|word| i64::from_le_bytes(word.try_into().unwrap()))
            .collect();
        columns.push(column);
    }

    Ok((0..cell_count)
        .map(|cell| columns.iter().map(|column| column[cell]).collect())
        .collect())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn uncompressed_roundtrips() {
        let codec = resolve(CodecKind::Uncompressed);
        let data = b"hello tile world".to_vec();
        let framed = encode_chunked(codec.as_ref(), &data, DEFAULT_CHUNK_SIZE).unwrap();
        let decoded = decode_chunked(codec.as_ref(), &framed, data.len()).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn chunking_splits_into_multiple_records() {
        let codec = resolve(CodecKind::Uncompressed);
        let data: Vec<u8> = (0..100u32).flat_map(|v| v.to_le_bytes()).collect();
        let framed = encode_chunked(codec.as_ref(), &data, 37).unwrap();
        let decoded = decode_chunked(codec.as_ref(), &framed, data.len()).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn empty_tile_encodes_to_no_bytes() {
        let codec = resolve(CodecKind::Uncompressed);
        let framed = encode_chunked(codec.as_ref(), &[], DEFAULT_CHUNK_SIZE).unwrap();
        assert!(framed.is_empty());
    }

    #[test]
    fn unsupported_codec_reports_not_supported() {
        let codec = resolve(CodecKind::Zstd { level: 3 });
        let error = codec.compress(b"data").unwrap_err();
        assert!(matches!(error, Error::Codec(CodecErrorKind::NotSupported, _)));
    }

    #[test]
    fn coords_tile_roundtrips_per_dimension() {
        use smallvec::smallvec;

        let codec = resolve(CodecKind::DoubleDelta);
        let points: Vec<crate::math::Coord> = vec![
            smallvec![1, 4], smallvec![1, 2], smallvec![2, 3], smallvec![4, 1],
        ];

        let encoded = encode_coords_tile(codec.as_ref(), &points, 2, DEFAULT_CHUNK_SIZE).unwrap();
        let decoded = decode_coords_tile(codec.as_ref(), &encoded, 2, points.len()).unwrap();
        assert_eq!(decoded, points);
    }
}
