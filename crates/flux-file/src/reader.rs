//! Streaming WAV reader with random seek

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use flux_core::Sample;

use crate::{BitDepth, FileError, FileResult, WavSpec};

/// WAV decoder positioned at a frame inside the data chunk.
///
/// All reads return interleaved `f32` samples in the file's own channel layout;
/// `read_stereo` adapts mono files for the engine's stereo tracks.
pub struct WavReader {
    inner: hound::WavReader<BufReader<File>>,
    spec: WavSpec,
    path: PathBuf,
    len_frames: u64,
    position: u64,
    /// Interleaved decode scratch for `read_stereo`
    scratch: Vec<Sample>,
}

impl WavReader {
    /// Open and validate a WAV file (RIFF header, `fmt` and `data` chunks)
    pub fn open<P: AsRef<Path>>(path: P) -> FileResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(FileError::NotFound(path.display().to_string()));
        }

        let inner = hound::WavReader::open(path).map_err(|e| match e {
            hound::Error::IoError(io) if io.kind() == ErrorKind::UnexpectedEof => {
                FileError::Format("truncated WAV header".to_string())
            }
            other => other.into(),
        })?;
        let spec = WavSpec::from_hound(inner.spec())?;
        let len_frames = inner.duration() as u64;
        check_data_fits(path)?;

        log::debug!(
            "Opened {} ({} ch, {} Hz, {:?}, {} frames)",
            path.display(),
            spec.channels,
            spec.sample_rate,
            spec.bit_depth,
            len_frames
        );

        Ok(Self {
            inner,
            spec,
            path: path.to_path_buf(),
            len_frames,
            position: 0,
            scratch: Vec::new(),
        })
    }

    pub fn spec(&self) -> WavSpec {
        self.spec
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total frames in the data chunk
    pub fn len_frames(&self) -> u64 {
        self.len_frames
    }

    /// Current frame position
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn remaining_frames(&self) -> u64 {
        self.len_frames - self.position
    }

    pub fn is_at_end(&self) -> bool {
        self.position >= self.len_frames
    }

    /// Seek to an absolute frame. Seeking exactly to the end is allowed.
    pub fn seek(&mut self, frame: u64) -> FileResult<()> {
        if frame > self.len_frames {
            return Err(FileError::Format(format!(
                "seek to frame {} beyond end of data ({} frames)",
                frame, self.len_frames
            )));
        }
        let target = u32::try_from(frame)
            .map_err(|_| FileError::Format(format!("seek position {} out of range", frame)))?;
        self.inner.seek(target)?;
        self.position = frame;
        Ok(())
    }

    /// Read interleaved samples into `out` (native channel count).
    /// Returns the number of whole frames decoded; 0 at end of data.
    pub fn read(&mut self, out: &mut [Sample]) -> FileResult<usize> {
        let channels = self.spec.channels as usize;
        let wanted = (out.len() / channels) as u64;
        let frames = wanted.min(self.remaining_frames()) as usize;
        let count = frames * channels;

        match self.spec.bit_depth {
            BitDepth::Float32 => {
                for (dst, sample) in out[..count].iter_mut().zip(self.inner.samples::<f32>()) {
                    *dst = sample?;
                }
            }
            depth => {
                let scale = 1.0 / depth.int_scale();
                for (dst, sample) in out[..count].iter_mut().zip(self.inner.samples::<i32>()) {
                    *dst = (sample? as f64 * scale) as Sample;
                }
            }
        }

        self.position += frames as u64;
        Ok(frames)
    }

    /// Read into an interleaved stereo slice, duplicating mono input.
    pub fn read_stereo(&mut self, out: &mut [Sample]) -> FileResult<usize> {
        if self.spec.channels == 2 {
            return self.read(out);
        }

        let frames = out.len() / 2;
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.resize(frames, 0.0);
        let result = self.read(&mut scratch[..frames]);
        if let Ok(read) = result {
            for (i, &s) in scratch[..read].iter().enumerate() {
                out[i * 2] = s;
                out[i * 2 + 1] = s;
            }
        }
        self.scratch = scratch;
        result
    }

    /// Decode the whole data chunk from the start
    pub fn read_all(&mut self) -> FileResult<Vec<Sample>> {
        self.seek(0)?;
        let mut samples = vec![0.0; self.len_frames as usize * self.spec.channels as usize];
        let frames = self.read(&mut samples)?;
        samples.truncate(frames * self.spec.channels as usize);
        Ok(samples)
    }

    /// Per-bucket absolute peaks over the whole file, for waveform overviews.
    /// The read position is restored afterwards.
    pub fn peak_data(&mut self, num_points: usize) -> FileResult<Vec<f32>> {
        if num_points == 0 || self.len_frames == 0 {
            return Ok(Vec::new());
        }

        let saved = self.position;
        let channels = self.spec.channels as usize;
        let frames_per_point = (self.len_frames as usize).div_ceil(num_points).max(1);
        let mut peaks = Vec::with_capacity(num_points);
        let mut block = vec![0.0; frames_per_point * channels];

        self.seek(0)?;
        while !self.is_at_end() && peaks.len() < num_points {
            let frames = self.read(&mut block)?;
            if frames == 0 {
                break;
            }
            let peak = block[..frames * channels]
                .iter()
                .fold(0.0f32, |acc, s| acc.max(s.abs()));
            peaks.push(peak);
        }

        self.seek(saved)?;
        Ok(peaks)
    }
}

impl std::fmt::Debug for WavReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WavReader")
            .field("path", &self.path)
            .field("spec", &self.spec)
            .field("len_frames", &self.len_frames)
            .field("position", &self.position)
            .finish()
    }
}

/// Reject a `data` chunk whose declared size runs past the end of the file
fn check_data_fits(path: &Path) -> FileResult<()> {
    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();

    // RIFF/WAVE preamble, already validated by hound
    file.seek(SeekFrom::Start(12))?;
    let mut header = [0u8; 8];
    loop {
        file.read_exact(&mut header)?;
        let size = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as u64;
        let start = file.stream_position()?;

        if &header[..4] == b"data" {
            if start + size > file_len {
                return Err(FileError::Format(format!(
                    "data chunk declares {} bytes but only {} remain",
                    size,
                    file_len - start
                )));
            }
            return Ok(());
        }
        // Chunks are word aligned
        file.seek(SeekFrom::Start(start + size + (size & 1)))?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file() {
        let err = WavReader::open("/definitely/not/here.wav").unwrap_err();
        assert!(matches!(err, FileError::NotFound(_)));
    }

    #[test]
    fn test_garbage_header_is_format_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("garbage.wav");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"this is not a riff file at all, just text")
            .unwrap();

        let err = WavReader::open(&path).unwrap_err();
        assert!(err.is_format(), "unexpected error: {err}");
    }

    #[test]
    fn test_truncated_header_is_format_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.wav");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"RIFF\x24\x00\x00\x00WAVEfmt ")
            .unwrap();

        assert!(WavReader::open(&path).unwrap_err().is_format());
    }
}
