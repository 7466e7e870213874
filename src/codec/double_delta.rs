//! Delta-of-deltas codec, the default for the sparse coordinates attribute
//! (§3). Operates on a tile already split into homogeneous per-dimension
//! sub-streams of 8-byte signed integers (the fragment writer is
//! responsible for that per-dimension chunking, §4.1: "the coordinates tile
//! treats each dimension as its own chunked sub-stream so that delta-style
//! codecs see homogeneous runs").
//!
//! Encodes the first value and first delta verbatim, then the second
//! differences as zigzag varints: real coordinate sequences are usually
//! near-linear (sorted or clustered), so second differences cluster near
//! zero and compress well under a varint.

use super::{TileCodec, ByteVec, Bytes};
use crate::error::{CodecErrorKind, Error, Result};

const WORD_SIZE: usize = 8;

pub struct DoubleDelta;

fn read_i64_le(bytes: &[u8]) -> i64 {
    i64::from_le_bytes(bytes.try_into().unwrap())
}

fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

fn write_varint(out: &mut ByteVec, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

fn read_varint(input: &mut Bytes<'_>) -> Result<u64> {
    let mut result: u64 = 0;
    let mut shift = 0;

    loop {
        let (&byte, rest) = input.split_first()
            .ok_or_else(|| Error::codec(CodecErrorKind::Malformed, "double-delta varint truncated"))?;
        *input = rest;

        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 { break }
        shift += 7;
    }

    Ok(result)
}

impl TileCodec for DoubleDelta {
    fn compress(&self, input: Bytes<'_>) -> Result<ByteVec> {
        if input.len() % WORD_SIZE != 0 {
            return Err(Error::codec(CodecErrorKind::Malformed, "double-delta input is not a whole number of 8-byte words"));
        }

        let values: Vec<i64> = input.chunks_exact(WORD_SIZE).map(read_i64_le).collect();
        let mut out = Vec::with_capacity(input.len() / 2);

        if values.is_empty() {
            return Ok(out);
        }

        out.extend_from_slice(&values[0].to_le_bytes());

        if values.len() == 1 {
            return Ok(out);
        }

        let mut previous_delta = values[1] - values[0];
        out.extend_from_slice(&previous_delta.to_le_bytes());

        for window in values.windows(2).skip(1) {
            let delta = window[1] - window[0];
            let second_difference = delta.wrapping_sub(previous_delta);
            write_varint(&mut out, zigzag_encode(second_difference));
            previous_delta = delta;
        }

        Ok(out)
    }

    fn decompress(&self, input: Bytes<'_>, out_capacity: usize) -> Result<ByteVec> {
        if out_capacity % WORD_SIZE != 0 {
            return Err(Error::codec(CodecErrorKind::SizeMismatch, "double-delta output capacity is not a whole number of 8-byte words"));
        }

        let count = out_capacity / WORD_SIZE;
        let mut out = Vec::with_capacity(out_capacity);

        if count == 0 {
            return Ok(out);
        }

        let mut remaining = input;
        if remaining.len() < WORD_SIZE {
            return Err(Error::codec(CodecErrorKind::Malformed, "double-delta stream missing first value"));
        }

        let first = read_i64_le(&remaining[..WORD_SIZE]);
        remaining = &remaining[WORD_SIZE..];
        out.extend_from_slice(&first.to_le_bytes());

        if count == 1 {
            return Ok(out);
        }

        if remaining.len() < WORD_SIZE {
            return Err(Error::codec(CodecErrorKind::Malformed, "double-delta stream missing first delta"));
        }

        let mut previous_delta = read_i64_le(&remaining[..WORD_SIZE]);
        remaining = &remaining[WORD_SIZE..];

        let mut previous_value = first.wrapping_add(previous_delta);
        out.extend_from_slice(&previous_value.to_le_bytes());

        for _ in 2..count {
            let second_difference = zigzag_decode(read_varint(&mut remaining)?);
            let delta = previous_delta.wrapping_add(second_difference);
            previous_value = previous_value.wrapping_add(delta);
            out.extend_from_slice(&previous_value.to_le_bytes());
            previous_delta = delta;
        }

        Ok(out)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn encode_i64s(values: &[i64]) -> ByteVec {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn roundtrips_linear_sequence() {
        let values: Vec<i64> = (0..20).map(|i| i * 3 + 1).collect();
        let input = encode_i64s(&values);

        let codec = DoubleDelta;
        let compressed = codec.compress(&input).unwrap();
        assert!(compressed.len() < input.len());

        let decompressed = codec.decompress(&compressed, input.len()).unwrap();
        assert_eq!(decompressed, input);
    }

    #[test]
    fn roundtrips_irregular_sequence() {
        let values: Vec<i64> = vec![1, 1, 2, 4, 3, -100, 0, 17, 17, 17];
        let input = encode_i64s(&values);

        let codec = DoubleDelta;
        let compressed = codec.compress(&input).unwrap();
        let decompressed = codec.decompress(&compressed, input.len()).unwrap();
        assert_eq!(decompressed, input);
    }

    #[test]
    fn roundtrips_single_value() {
        let input = encode_i64s(&[42]);
        let codec = DoubleDelta;
        let compressed = codec.compress(&input).unwrap();
        let decompressed = codec.decompress(&compressed, input.len()).unwrap();
        assert_eq!(decompressed, input);
    }

    #[test]
    fn roundtrips_empty() {
        let codec = DoubleDelta;
        let compressed = codec.compress(&[]).unwrap();
        let decompressed = codec.decompress(&compressed, 0).unwrap();
        assert!(decompressed.is_empty());
    }
}
