//! Run-length encoding over an arbitrary byte tile. The run/literal framing
//! is the teacher library's own RLE scheme (`compression::rle`), stripped of
//! the pixel-channel byte-interleaving steps that scheme applies around it:
//! here the codec operates directly on the tile's raw bytes, since the
//! merge loop works in bytes regardless of cell type (§9 Design Notes).

use super::{TileCodec, ByteVec, Bytes};
use crate::error::{CodecErrorKind, Error, Result};

const MIN_RUN_LENGTH: usize = 3;
const MAX_RUN_LENGTH: usize = 127;

pub struct Rle;

impl TileCodec for Rle {
    fn compress(&self, input: Bytes<'_>) -> Result<ByteVec> {
        let mut compressed = Vec::with_capacity(input.len());
        let mut run_start = 0;

        while run_start < input.len() {
            let mut run_end = run_start + 1;
            while run_end < input.len()
                && input[run_start] == input[run_end]
                && (run_end - run_start) < MAX_RUN_LENGTH
            {
                run_end += 1;
            }

            if run_end - run_start >= MIN_RUN_LENGTH {
                compressed.push(((run_end - run_start) as i32 - 1) as u8);
                compressed.push(input[run_start]);
                run_start = run_end;
            }
            else {
                let literal_start = run_start;
                let mut literal_end = run_start + 1;

                while literal_end < input.len() && literal_end - literal_start < MAX_RUN_LENGTH {
                    let next_is_run =
                        literal_end + 2 < input.len()
                            && input[literal_end] == input[literal_end + 1]
                            && input[literal_end + 1] == input[literal_end + 2];

                    if next_is_run { break }
                    literal_end += 1;
                }

                compressed.push((literal_start as i32 - literal_end as i32) as u8);
                compressed.extend_from_slice(&input[literal_start..literal_end]);
                run_start = literal_end;
            }
        }

        Ok(compressed)
    }

    fn decompress(&self, input: Bytes<'_>, out_capacity: usize) -> Result<ByteVec> {
        let mut remaining = input;
        let mut decompressed = Vec::with_capacity(out_capacity);

        while !remaining.is_empty() && decompressed.len() < out_capacity {
            let count = take_1(&mut remaining)? as i8 as i32;

            if count < 0 {
                let values = take_n(&mut remaining, (-count) as usize)?;
                decompressed.extend_from_slice(values);
            }
            else {
                let value = take_1(&mut remaining)?;
                decompressed.resize(decompressed.len() + count as usize + 1, value);
            }
        }

        if decompressed.len() != out_capacity {
            return Err(Error::codec(CodecErrorKind::Malformed, "rle stream ended before filling the tile"));
        }

        Ok(decompressed)
    }
}

fn take_1(slice: &mut &[u8]) -> Result<u8> {
    if let Some((&first, rest)) = slice.split_first() {
        *slice = rest;
        Ok(first)
    } else {
        Err(Error::codec(CodecErrorKind::Malformed, "rle stream truncated"))
    }
}

fn take_n<'s>(slice: &mut &'s [u8], n: usize) -> Result<&'s [u8]> {
    if n <= slice.len() {
        let (front, back) = slice.split_at(n);
        *slice = back;
        Ok(front)
    } else {
        Err(Error::codec(CodecErrorKind::Malformed, "rle stream truncated"))
    }
}
