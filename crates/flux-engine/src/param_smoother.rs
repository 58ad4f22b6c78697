//! Block-rate parameter ramps
//!
//! Nodes read their `Parameter` once per block, hand it to a [`ParamSmoother`]
//! as the new target and then pull per-sample (or per-sub-block) values from
//! the ramp. The ramp is a one-pole approach: each sample covers a fixed
//! fraction of the remaining distance.

use flux_core::SampleBuffer;

/// Ramp time used for gains
pub const DEFAULT_RAMP_MS: f64 = 1.5;

/// Distance below which a ramp snaps onto its target
const SETTLE_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct ParamSmoother {
    value: f64,
    target: f64,
    /// Fraction of the remaining distance covered per sample
    coeff: f64,
    ramp_ms: f64,
}

impl ParamSmoother {
    /// Settled ramp at `value`; call [`prepare`](Self::prepare) before use
    pub fn new(ramp_ms: f64, value: f64) -> Self {
        Self {
            value,
            target: value,
            coeff: 1.0,
            ramp_ms: ramp_ms.max(0.0),
        }
    }

    /// Recompute the per-sample coefficient and jump to `value`
    pub fn prepare(&mut self, sample_rate: f64, value: f64) {
        let samples = self.ramp_ms * 0.001 * sample_rate;
        self.coeff = if samples > 1.0 {
            1.0 - (-1.0 / samples).exp()
        } else {
            1.0
        };
        self.snap(value);
    }

    #[inline]
    pub fn snap(&mut self, value: f64) {
        self.value = value;
        self.target = value;
    }

    #[inline]
    pub fn retarget(&mut self, target: f64) {
        self.target = target;
    }

    #[inline]
    pub fn value(&self) -> f64 {
        self.value
    }

    #[inline]
    pub fn is_settled(&self) -> bool {
        self.value == self.target
    }

    #[inline]
    pub fn tick(&mut self) -> f64 {
        if !self.is_settled() {
            self.value += self.coeff * (self.target - self.value);
            self.settle();
        }
        self.value
    }

    /// Jump `frames` samples ahead; returns the value reached
    pub fn advance(&mut self, frames: usize) -> f64 {
        if !self.is_settled() && frames > 0 {
            let remaining = (1.0 - self.coeff).powi(frames.min(i32::MAX as usize) as i32);
            self.value = self.target + (self.value - self.target) * remaining;
            self.settle();
        }
        self.value
    }

    #[inline]
    fn settle(&mut self) {
        if (self.value - self.target).abs() < SETTLE_EPSILON {
            self.value = self.target;
        }
    }

    /// Multiply the first `frames` frames of `buffer` by the ramp, one step per
    /// frame shared by every channel
    pub fn apply_gain(&mut self, buffer: &mut SampleBuffer, frames: usize) {
        let frames = frames.min(buffer.frames());

        if self.is_settled() {
            let g = self.value as f32;
            if g != 1.0 {
                for ch in 0..buffer.channels() {
                    for s in buffer.channel_mut(ch)[..frames].iter_mut() {
                        *s *= g;
                    }
                }
            }
            return;
        }

        for i in 0..frames {
            let g = self.tick() as f32;
            for ch in 0..buffer.channels() {
                buffer.channel_mut(ch)[i] *= g;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prepared(value: f64) -> ParamSmoother {
        let mut ramp = ParamSmoother::new(DEFAULT_RAMP_MS, value);
        ramp.prepare(48000.0, value);
        ramp
    }

    #[test]
    fn test_ramp_is_monotonic_and_settles() {
        let mut ramp = prepared(0.0);
        ramp.retarget(1.0);

        let mut last = 0.0;
        for _ in 0..2000 {
            let v = ramp.tick();
            assert!(v >= last && v <= 1.0);
            last = v;
        }
        assert!(ramp.is_settled());
        assert_eq!(ramp.value(), 1.0);
    }

    #[test]
    fn test_advance_matches_ticks() {
        let mut stepped = prepared(0.2);
        let mut jumped = prepared(0.2);
        stepped.retarget(0.9);
        jumped.retarget(0.9);

        for _ in 0..16 {
            stepped.tick();
        }
        assert!((jumped.advance(16) - stepped.value()).abs() < 1e-9);
    }

    #[test]
    fn test_zero_ramp_time_jumps() {
        let mut ramp = ParamSmoother::new(0.0, 0.0);
        ramp.prepare(44100.0, 0.0);
        ramp.retarget(0.75);
        assert_eq!(ramp.tick(), 0.75);
    }

    #[test]
    fn test_apply_gain_ramps_all_channels_together() {
        let mut ramp = prepared(1.0);
        ramp.retarget(0.0);

        let mut buffer = SampleBuffer::stereo(8);
        for ch in 0..2 {
            buffer.channel_mut(ch).fill(1.0);
        }
        ramp.apply_gain(&mut buffer, 8);

        assert_eq!(buffer.channel(0), buffer.channel(1));
        assert!(buffer.channel(0).windows(2).all(|w| w[1] < w[0]));
        assert!(buffer.channel(0)[0] < 1.0);
    }
}
