//! Deflate-backed codec. Uses `miniz_oxide` to compress and `zune-inflate`
//! to decompress, the same asymmetric pairing the teacher library uses for
//! its own DWA codec's zlib stage (`compression::dwa::all::deflate_compress`
//! / `deflate_decompress`): `miniz_oxide` gives a simple one-shot encoder,
//! `zune-inflate` is the faster of the two at decoding.

use super::{TileCodec, ByteVec, Bytes};
use crate::error::{CodecErrorKind, Error, Result};

pub struct Gzip {
    pub level: u8,
}

impl TileCodec for Gzip {
    fn compress(&self, input: Bytes<'_>) -> Result<ByteVec> {
        Ok(miniz_oxide::deflate::compress_to_vec_zlib(input, self.level))
    }

    fn decompress(&self, input: Bytes<'_>, out_capacity: usize) -> Result<ByteVec> {
        let options = zune_inflate::DeflateOptions::default().set_size_hint(out_capacity);
        let mut decoder = zune_inflate::DeflateDecoder::new_with_options(input, options);

        decoder.decode_zlib()
            .map_err(|_| Error::codec(CodecErrorKind::Malformed, "zlib-compressed tile is malformed"))
    }
}
