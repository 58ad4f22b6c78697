//! Streaming WAV writer

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use flux_core::Sample;

use crate::{BitDepth, FileError, FileResult, WavSpec};

/// WAV encoder that appends interleaved blocks as they arrive.
///
/// The RIFF and `data` size fields are rewritten on every `flush` and on
/// `finalize`, so a file interrupted after a flush is still readable.
pub struct WavWriter {
    inner: Option<hound::WavWriter<BufWriter<File>>>,
    spec: WavSpec,
    path: PathBuf,
    frames_written: u64,
}

impl WavWriter {
    /// Create (or truncate) a WAV file
    pub fn create<P: AsRef<Path>>(path: P, spec: WavSpec) -> FileResult<Self> {
        spec.validate()?;
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let inner = hound::WavWriter::create(path, spec.to_hound())?;

        Ok(Self {
            inner: Some(inner),
            spec,
            path: path.to_path_buf(),
            frames_written: 0,
        })
    }

    pub fn spec(&self) -> WavSpec {
        self.spec
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Append interleaved samples. Trailing samples that do not form a whole
    /// frame are ignored.
    pub fn write(&mut self, samples: &[Sample]) -> FileResult<usize> {
        let writer = self.inner.as_mut().ok_or(FileError::WriterClosed)?;
        let channels = self.spec.channels as usize;
        let frames = samples.len() / channels;
        let samples = &samples[..frames * channels];

        match self.spec.bit_depth {
            BitDepth::Float32 => {
                for &s in samples {
                    writer.write_sample(s)?;
                }
            }
            depth => {
                let scale = depth.int_scale();
                for &s in samples {
                    let v = (s as f64 * scale).round().clamp(-scale, scale - 1.0);
                    writer.write_sample(v as i32)?;
                }
            }
        }

        self.frames_written += frames as u64;
        Ok(frames)
    }

    /// Append `frames` frames of digital silence
    pub fn write_silence(&mut self, frames: u64) -> FileResult<()> {
        let writer = self.inner.as_mut().ok_or(FileError::WriterClosed)?;
        let count = frames * self.spec.channels as u64;

        for _ in 0..count {
            if self.spec.bit_depth.is_float() {
                writer.write_sample(0.0f32)?;
            } else {
                writer.write_sample(0i32)?;
            }
        }

        self.frames_written += frames;
        Ok(())
    }

    /// Flush buffered samples and patch the header sizes written so far
    pub fn flush(&mut self) -> FileResult<()> {
        let writer = self.inner.as_mut().ok_or(FileError::WriterClosed)?;
        writer.flush()?;
        Ok(())
    }

    /// Patch the header and close the file. Returns total frames written.
    pub fn finalize(&mut self) -> FileResult<u64> {
        let writer = self.inner.take().ok_or(FileError::WriterClosed)?;
        writer.finalize()?;
        log::debug!(
            "Finalized {} ({} frames)",
            self.path.display(),
            self.frames_written
        );
        Ok(self.frames_written)
    }

    pub fn is_finalized(&self) -> bool {
        self.inner.is_none()
    }
}

impl Drop for WavWriter {
    fn drop(&mut self) {
        if let Some(writer) = self.inner.take() {
            if let Err(e) = writer.finalize() {
                log::error!("Failed to finalize {}: {}", self.path.display(), e);
            }
        }
    }
}

impl std::fmt::Debug for WavWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WavWriter")
            .field("path", &self.path)
            .field("spec", &self.spec)
            .field("frames_written", &self.frames_written)
            .field("finalized", &self.is_finalized())
            .finish()
    }
}
