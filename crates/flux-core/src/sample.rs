//! Sample and buffer types

/// Audio sample type used throughout the engine
pub type Sample = f32;

/// Maximum channel count a single buffer may carry
pub const MAX_CHANNELS: usize = 8;

/// Fixed-capacity planar block of audio.
///
/// Storage is allocated once; `set_frames` only changes the active length, so a
/// buffer can be reused for shorter device periods without touching the heap.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    data: Vec<Sample>,
    channels: usize,
    capacity: usize,
    frames: usize,
}

impl SampleBuffer {
    /// Create a zeroed buffer with `channels` channels of `frames` samples
    pub fn new(channels: usize, frames: usize) -> Self {
        let channels = channels.clamp(1, MAX_CHANNELS);
        Self {
            data: vec![0.0; channels * frames],
            channels,
            capacity: frames,
            frames,
        }
    }

    /// Stereo convenience constructor
    pub fn stereo(frames: usize) -> Self {
        Self::new(2, frames)
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Active frame count
    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change the active frame count (clamped to capacity)
    #[inline]
    pub fn set_frames(&mut self, frames: usize) {
        self.frames = frames.min(self.capacity);
    }

    #[inline]
    pub fn channel(&self, ch: usize) -> &[Sample] {
        let start = ch * self.capacity;
        &self.data[start..start + self.frames]
    }

    #[inline]
    pub fn channel_mut(&mut self, ch: usize) -> &mut [Sample] {
        let start = ch * self.capacity;
        &mut self.data[start..start + self.frames]
    }

    /// Left/right views of a stereo buffer (right aliases left for mono)
    pub fn stereo_mut(&mut self) -> (&mut [Sample], &mut [Sample]) {
        let frames = self.frames;
        if self.channels < 2 {
            let len = self.data.len();
            let (left, right) = self.data.split_at_mut(frames.min(len));
            // Mono buffers expose an empty right channel.
            return (left, &mut right[..0]);
        }
        let (left, right) = self.data.split_at_mut(self.capacity);
        (&mut left[..frames], &mut right[..frames])
    }

    /// Zero the active region
    pub fn clear(&mut self) {
        for ch in 0..self.channels {
            self.channel_mut(ch).fill(0.0);
        }
    }

    /// Copy `other` into this buffer. Channels are matched by index; a mono source
    /// is spread over every destination channel.
    pub fn copy_from(&mut self, other: &SampleBuffer) {
        let frames = self.frames.min(other.frames);
        for ch in 0..self.channels {
            let src_ch = if other.channels == 1 { 0 } else { ch };
            if src_ch >= other.channels {
                self.channel_mut(ch).fill(0.0);
                continue;
            }
            let src = &other.channel(src_ch)[..frames];
            self.channel_mut(ch)[..frames].copy_from_slice(src);
        }
    }

    /// Sum `other × gain` into this buffer
    pub fn mix_from(&mut self, other: &SampleBuffer, gain: f32) {
        let frames = self.frames.min(other.frames);
        let channels = self.channels.min(other.channels);
        for ch in 0..channels {
            let start = ch * self.capacity;
            let dst = &mut self.data[start..start + frames];
            for (d, s) in dst.iter_mut().zip(other.channel(ch)) {
                *d += *s * gain;
            }
        }
    }

    /// Multiply every active sample by `gain`
    pub fn apply_gain(&mut self, gain: f32) {
        for ch in 0..self.channels {
            for s in self.channel_mut(ch) {
                *s *= gain;
            }
        }
    }

    /// Absolute peak over all channels
    pub fn peak(&self) -> f32 {
        (0..self.channels)
            .flat_map(|ch| self.channel(ch).iter())
            .fold(0.0f32, |acc, s| acc.max(s.abs()))
    }

    /// RMS of one channel
    pub fn rms(&self, ch: usize) -> f32 {
        if self.frames == 0 || ch >= self.channels {
            return 0.0;
        }
        let sum: f32 = self.channel(ch).iter().map(|s| s * s).sum();
        (sum / self.frames as f32).sqrt()
    }

    /// True when every active sample is exactly zero
    pub fn is_silent(&self) -> bool {
        (0..self.channels).all(|ch| self.channel(ch).iter().all(|&s| s == 0.0))
    }

    /// Fill from an interleaved slice, returning frames consumed.
    /// Missing frames are zeroed.
    pub fn read_interleaved(&mut self, src: &[Sample], src_channels: usize) -> usize {
        let src_channels = src_channels.max(1);
        let frames = self.frames.min(src.len() / src_channels);
        for ch in 0..self.channels {
            let src_ch = ch.min(src_channels - 1);
            let capacity = self.capacity;
            let active = self.frames;
            let dst = &mut self.data[ch * capacity..ch * capacity + active];
            for (i, d) in dst.iter_mut().enumerate() {
                *d = if i < frames {
                    src[i * src_channels + src_ch]
                } else {
                    0.0
                };
            }
        }
        frames
    }

    /// Write to an interleaved slice, returning frames written.
    /// Destination channels beyond this buffer's count are zeroed.
    pub fn write_interleaved(&self, dst: &mut [Sample], dst_channels: usize) -> usize {
        let dst_channels = dst_channels.max(1);
        let frames = self.frames.min(dst.len() / dst_channels);
        for (i, frame) in dst.chunks_mut(dst_channels).take(frames).enumerate() {
            for (ch, out) in frame.iter_mut().enumerate() {
                *out = if ch < self.channels {
                    self.data[ch * self.capacity + i]
                } else {
                    0.0
                };
            }
        }
        frames
    }
}

/// Flush denormal values to zero
#[inline]
pub fn flush_denormal(x: f32) -> f32 {
    if x.abs() < 1.0e-15 { 0.0 } else { x }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_layout() {
        let mut buf = SampleBuffer::stereo(4);
        buf.channel_mut(0).copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        buf.channel_mut(1).fill(-1.0);

        assert_eq!(buf.channels(), 2);
        assert_eq!(buf.frames(), 4);
        assert_eq!(buf.peak(), 4.0);

        let mut interleaved = [0.0; 8];
        assert_eq!(buf.write_interleaved(&mut interleaved, 2), 4);
        assert_eq!(interleaved, [1.0, -1.0, 2.0, -1.0, 3.0, -1.0, 4.0, -1.0]);
    }

    #[test]
    fn test_mix_from_sums_with_gain() {
        let mut a = SampleBuffer::stereo(3);
        let mut b = SampleBuffer::stereo(3);
        b.channel_mut(0).fill(1.0);
        b.channel_mut(1).fill(2.0);

        a.mix_from(&b, 0.5);
        a.mix_from(&b, 0.5);

        assert_eq!(a.channel(0), &[1.0, 1.0, 1.0]);
        assert_eq!(a.channel(1), &[2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_set_frames_keeps_capacity() {
        let mut buf = SampleBuffer::stereo(256);
        buf.set_frames(64);
        assert_eq!(buf.channel(1).len(), 64);
        buf.set_frames(1024);
        assert_eq!(buf.frames(), 256);
    }

    #[test]
    fn test_read_interleaved_mono_source() {
        let mut buf = SampleBuffer::stereo(4);
        let read = buf.read_interleaved(&[0.1, 0.2], 1);
        assert_eq!(read, 2);
        assert_eq!(buf.channel(0), &[0.1, 0.2, 0.0, 0.0]);
        assert_eq!(buf.channel(1), &[0.1, 0.2, 0.0, 0.0]);
    }

    #[test]
    fn test_copy_from_mono_spreads() {
        let mut mono = SampleBuffer::new(1, 2);
        mono.channel_mut(0).copy_from_slice(&[0.25, 0.5]);
        let mut stereo = SampleBuffer::stereo(2);
        stereo.copy_from(&mono);
        assert_eq!(stereo.channel(1), &[0.25, 0.5]);
        assert!(!stereo.is_silent());
    }
}
