//! WAV stream description shared by reader and writer

use serde::{Deserialize, Serialize};

use crate::{FileError, FileResult};

/// Maximum channel count accepted by the codec (engine tracks are stereo)
pub const MAX_WAV_CHANNELS: u16 = 2;

/// Sample encoding of a WAV data chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BitDepth {
    Int16,
    Int24,
    Int32,
    Float32,
}

impl BitDepth {
    pub const ALL: [BitDepth; 4] = [Self::Int16, Self::Int24, Self::Int32, Self::Float32];

    pub fn bits(&self) -> u16 {
        match self {
            Self::Int16 => 16,
            Self::Int24 => 24,
            Self::Int32 => 32,
            Self::Float32 => 32,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float32)
    }

    /// Full-scale magnitude for integer encodings
    #[inline]
    pub(crate) fn int_scale(&self) -> f64 {
        (1u64 << (self.bits() - 1)) as f64
    }

    fn from_hound(spec: &hound::WavSpec) -> FileResult<Self> {
        match (spec.sample_format, spec.bits_per_sample) {
            (hound::SampleFormat::Int, 16) => Ok(Self::Int16),
            (hound::SampleFormat::Int, 24) => Ok(Self::Int24),
            (hound::SampleFormat::Int, 32) => Ok(Self::Int32),
            (hound::SampleFormat::Float, 32) => Ok(Self::Float32),
            (format, bits) => Err(FileError::Format(format!(
                "unsupported bit depth: {} bit {:?}",
                bits, format
            ))),
        }
    }
}

impl Default for BitDepth {
    fn default() -> Self {
        Self::Int16
    }
}

/// Channel count, sample rate and encoding of a WAV stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WavSpec {
    pub channels: u16,
    pub sample_rate: u32,
    pub bit_depth: BitDepth,
}

impl WavSpec {
    pub fn stereo(sample_rate: u32, bit_depth: BitDepth) -> Self {
        Self {
            channels: 2,
            sample_rate,
            bit_depth,
        }
    }

    /// Check channel count and sample rate
    pub fn validate(&self) -> FileResult<()> {
        if self.channels == 0 || self.channels > MAX_WAV_CHANNELS {
            return Err(FileError::Format(format!(
                "unsupported channel count: {}",
                self.channels
            )));
        }
        if self.sample_rate == 0 {
            return Err(FileError::Format("sample rate is zero".to_string()));
        }
        Ok(())
    }

    pub(crate) fn from_hound(spec: hound::WavSpec) -> FileResult<Self> {
        let parsed = Self {
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            bit_depth: BitDepth::from_hound(&spec)?,
        };
        parsed.validate()?;
        Ok(parsed)
    }

    pub(crate) fn to_hound(self) -> hound::WavSpec {
        hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: self.bit_depth.bits(),
            sample_format: if self.bit_depth.is_float() {
                hound::SampleFormat::Float
            } else {
                hound::SampleFormat::Int
            },
        }
    }
}

impl Default for WavSpec {
    fn default() -> Self {
        Self::stereo(44100, BitDepth::Int16)
    }
}
