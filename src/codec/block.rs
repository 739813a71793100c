use serde::{Deserialize, Serialize};

use crate::core::error::{Error, Result};

/// Block compression codecs treated as opaque by the rest of the engine
/// (§4.1): each guarantees output no larger than `MAX_EXPANSION` times the
/// input, so callers can pre-allocate. A compression failure is always
/// fatal and propagated — never silently downgraded to storing the block
/// uncompressed, since a reader has no way to tell the difference and would
/// mis-parse the bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockCodec {
    None,
    Lz4,
    Zstd,
    Snappy,
}

impl BlockCodec {
    /// Bounded expansion factor the caller must pre-allocate for (§4.1).
    pub const MAX_EXPANSION: usize = 2;

    pub fn compress(self, data: &[u8]) -> Result<Vec<u8>> {
        let out = match self {
            BlockCodec::None => data.to_vec(),
            BlockCodec::Lz4 => lz4::block::compress(data, None, false)
                .map_err(|e| Error::corruption(format!("lz4 compress failed: {e}")))?,
            BlockCodec::Zstd => zstd::encode_all(data, 3)
                .map_err(|e| Error::corruption(format!("zstd compress failed: {e}")))?,
            BlockCodec::Snappy => {
                use snap::raw::Encoder;
                Encoder::new()
                    .compress_vec(data)
                    .map_err(|e| Error::corruption(format!("snappy compress failed: {e}")))?
            }
        };
        if out.len() > data.len().saturating_mul(Self::MAX_EXPANSION) + 64 {
            return Err(Error::corruption(
                "block codec exceeded its bounded expansion factor",
            ));
        }
        Ok(out)
    }

    pub fn decompress(self, data: &[u8], original_len: usize) -> Result<Vec<u8>> {
        match self {
            BlockCodec::None => Ok(data.to_vec()),
            BlockCodec::Lz4 => lz4::block::decompress(data, Some(original_len as i32))
                .map_err(|e| Error::corruption(format!("lz4 decompress failed: {e}"))),
            BlockCodec::Zstd => zstd::decode_all(data)
                .map_err(|e| Error::corruption(format!("zstd decompress failed: {e}"))),
            BlockCodec::Snappy => {
                use snap::raw::Decoder;
                Decoder::new()
                    .decompress_vec(data)
                    .map_err(|e| Error::corruption(format!("snappy decompress failed: {e}")))
            }
        }
    }
}

/// A compressed block plus the metadata needed to invert it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressedBlock {
    pub codec: BlockCodec,
    pub original_len: usize,
    pub data: Vec<u8>,
}

impl CompressedBlock {
    pub fn compress(data: &[u8], codec: BlockCodec) -> Result<Self> {
        Ok(CompressedBlock {
            codec,
            original_len: data.len(),
            data: codec.compress(data)?,
        })
    }

    pub fn decompress(&self) -> Result<Vec<u8>> {
        self.codec.decompress(&self.data, self.original_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_every_codec() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(8);
        for codec in [
            BlockCodec::None,
            BlockCodec::Lz4,
            BlockCodec::Zstd,
            BlockCodec::Snappy,
        ] {
            let block = CompressedBlock::compress(&data, codec).unwrap();
            let restored = block.decompress().unwrap();
            assert_eq!(restored, data, "codec {codec:?} round trip failed");
        }
    }
}
