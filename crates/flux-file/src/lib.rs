//! flux-file: WAV codec boundary
//!
//! Streaming WAV decode/encode (via hound) used by the disk streamer:
//! - `WavReader` - header validation, random seek, block reads
//! - `WavWriter` - streaming append, header patched on flush/finalize
//!
//! Supported PCM layouts: 16/24/32-bit integer and 32-bit float, mono or stereo.

mod error;
mod reader;
mod wav;
mod writer;

pub use error::*;
pub use reader::*;
pub use wav::*;
pub use writer::*;
