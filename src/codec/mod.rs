pub mod block;
pub mod vbyte;

pub use block::{BlockCodec, CompressedBlock};
pub use vbyte::{VByte, VByteReader};
