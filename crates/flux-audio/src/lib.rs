//! flux-audio: Device I/O using cpal
//!
//! Opens the output (and optional input) device and drives the engine's block
//! callback on the device thread.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ AudioEngine  │────▶│ AudioStream │────▶│ cpal Device │
//! │ (flux-engine)│     │             │     │             │
//! │ - graph      │     │ - callback  │     │ - output    │
//! │ - transport  │     │ - input ring│     │ - input     │
//! │ - metering   │     │ - fault flag│     │             │
//! └──────────────┘     └─────────────┘     └─────────────┘
//! ```

mod device;
mod error;
mod meter;
mod stream;

pub use device::*;
pub use error::*;
pub use meter::*;
pub use stream::*;

use flux_core::{BufferSize, SampleRate};

/// Device stream configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub sample_rate: SampleRate,
    pub buffer_size: BufferSize,
    pub input_channels: u16,
    pub output_channels: u16,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: SampleRate::Hz44100,
            buffer_size: BufferSize::Samples512,
            input_channels: 2,
            output_channels: 2,
        }
    }
}
