//! RBJ biquad low/high pass

use std::f64::consts::PI;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use flux_core::{ParamRange, Parameter, SampleBuffer, flush_denormal};

use crate::node::{NodeConfig, NodeKind, NodeProcessor, PortSpec, ProcessContext};
use crate::param_smoother::ParamSmoother;

/// Frames between coefficient redesigns while cutoff or resonance glide
pub const FILTER_SUB_BLOCK: usize = 16;

/// Glide time for cutoff (log domain) and resonance
const FILTER_RAMP_MS: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterMode {
    LowPass,
    HighPass,
}

impl FilterMode {
    fn as_param(self) -> f32 {
        match self {
            FilterMode::LowPass => 0.0,
            FilterMode::HighPass => 1.0,
        }
    }

    fn from_param(value: f32) -> Self {
        if value < 0.5 {
            FilterMode::LowPass
        } else {
            FilterMode::HighPass
        }
    }
}

/// Normalized biquad coefficients (a0 = 1)
#[derive(Debug, Clone, Copy, PartialEq)]
struct BiquadCoeffs {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl BiquadCoeffs {
    fn design(mode: FilterMode, cutoff: f64, q: f64, sample_rate: f64) -> Self {
        // Keep the pole pair stable near Nyquist
        let cutoff = cutoff.clamp(1.0, sample_rate * 0.49);
        let omega = 2.0 * PI * cutoff / sample_rate;
        let cos_omega = omega.cos();
        let alpha = omega.sin() / (2.0 * q.max(1e-3));

        let (b0, b1, b2) = match mode {
            FilterMode::LowPass => {
                let b = (1.0 - cos_omega) / 2.0;
                (b, 1.0 - cos_omega, b)
            }
            FilterMode::HighPass => {
                let b = (1.0 + cos_omega) / 2.0;
                (b, -(1.0 + cos_omega), b)
            }
        };
        let a0 = 1.0 + alpha;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: -2.0 * cos_omega / a0,
            a2: (1.0 - alpha) / a0,
        }
    }
}

/// Direct form I history for one channel
#[derive(Debug, Clone, Copy, Default)]
struct BiquadState {
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl BiquadState {
    #[inline]
    fn tick(&mut self, c: &BiquadCoeffs, x: f64) -> f64 {
        let y = c.b0 * x + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
        let y = flush_denormal(y as f32) as f64;

        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }
}

pub struct FilterNode {
    cutoff: Arc<Parameter>,
    resonance: Arc<Parameter>,
    mode: Arc<Parameter>,
    sample_rate: f64,
    /// Cutoff ramp runs on ln(Hz) so sweeps glide evenly per octave
    log_cutoff: ParamSmoother,
    q: ParamSmoother,
    /// (mode, ln cutoff, q) the coefficients were designed for
    designed: (FilterMode, f64, f64),
    coeffs: BiquadCoeffs,
    state: [BiquadState; 2],
}

impl FilterNode {
    pub fn new(mode: FilterMode, cutoff: f32, resonance: f32) -> Self {
        let cutoff_param = Parameter::new("Cutoff", ParamRange::logarithmic(20.0, 20000.0, 1000.0))
            .with_unit("Hz");
        cutoff_param.set_value(cutoff);
        let resonance_param = Parameter::new("Resonance", ParamRange::linear(0.1, 10.0, 0.707));
        resonance_param.set_value(resonance);
        let mode_param = Parameter::new("Mode", ParamRange::linear(0.0, 1.0, 0.0));
        mode_param.set_value(mode.as_param());

        let log_cutoff = (cutoff_param.value() as f64).ln();
        let q = resonance_param.value() as f64;

        let mut node = Self {
            cutoff: Arc::new(cutoff_param),
            resonance: Arc::new(resonance_param),
            mode: Arc::new(mode_param),
            sample_rate: 44100.0,
            log_cutoff: ParamSmoother::new(FILTER_RAMP_MS, log_cutoff),
            q: ParamSmoother::new(FILTER_RAMP_MS, q),
            designed: (mode, f64::NAN, f64::NAN),
            coeffs: BiquadCoeffs::design(mode, cutoff as f64, q, 44100.0),
            state: [BiquadState::default(); 2],
        };
        node.redesign();
        node
    }

    pub fn mode(&self) -> FilterMode {
        FilterMode::from_param(self.mode.value())
    }

    pub fn set_mode(&self, mode: FilterMode) {
        self.mode.set_value(mode.as_param());
    }

    pub fn config(&self) -> NodeConfig {
        NodeConfig::Filter {
            mode: self.mode(),
            cutoff: self.cutoff.value(),
            resonance: self.resonance.value(),
        }
    }

    /// Hand the current parameter values to the ramps
    fn retarget(&mut self) {
        self.log_cutoff.retarget((self.cutoff.value() as f64).ln());
        self.q.retarget(self.resonance.value() as f64);
    }

    /// Redesign when the mode or either ramp moved since the last design
    fn redesign(&mut self) {
        let current = (self.mode(), self.log_cutoff.value(), self.q.value());
        if current == self.designed {
            return;
        }
        self.coeffs = BiquadCoeffs::design(current.0, current.1.exp(), current.2, self.sample_rate);
        self.designed = current;
    }
}

impl NodeProcessor for FilterNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Filter
    }

    fn inputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::stereo("In")]
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::stereo("Out")]
    }

    fn parameters(&self) -> Vec<Arc<Parameter>> {
        vec![
            Arc::clone(&self.cutoff),
            Arc::clone(&self.resonance),
            Arc::clone(&self.mode),
        ]
    }

    fn reset(&mut self, sample_rate: f64, _block_size: usize) {
        self.sample_rate = sample_rate;
        self.state = [BiquadState::default(); 2];
        self.log_cutoff.prepare(sample_rate, (self.cutoff.value() as f64).ln());
        self.q.prepare(sample_rate, self.resonance.value() as f64);
        // Force a redesign at the new rate
        self.designed.1 = f64::NAN;
        self.redesign();
    }

    fn process(
        &mut self,
        _ctx: &ProcessContext<'_>,
        inputs: &[SampleBuffer],
        outputs: &mut [SampleBuffer],
    ) {
        let (Some(input), Some(output)) = (inputs.first(), outputs.first_mut()) else {
            return;
        };

        self.retarget();
        let frames = output.frames().min(input.frames());
        let channels = output.channels().min(input.channels()).min(self.state.len());

        let mut start = 0;
        while start < frames {
            let len = (frames - start).min(FILTER_SUB_BLOCK);
            self.log_cutoff.advance(len);
            self.q.advance(len);
            self.redesign();

            let coeffs = self.coeffs;
            for ch in 0..channels {
                let state = &mut self.state[ch];
                let src = &input.channel(ch)[start..start + len];
                let dst = &mut output.channel_mut(ch)[start..start + len];
                for (o, &x) in dst.iter_mut().zip(src) {
                    *o = state.tick(&coeffs, x as f64) as f32;
                }
            }
            start += len;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(node: &mut FilterNode, signal: impl Fn(usize) -> f32, frames: usize) -> SampleBuffer {
        let mut input = SampleBuffer::stereo(frames);
        for ch in 0..2 {
            for (i, s) in input.channel_mut(ch).iter_mut().enumerate() {
                *s = signal(i);
            }
        }
        let mut output = [SampleBuffer::stereo(frames)];
        node.process(&ProcessContext::new(44100.0, frames), &[input], &mut output);
        let [out] = output;
        out
    }

    #[test]
    fn test_low_pass_passes_dc() {
        let mut node = FilterNode::new(FilterMode::LowPass, 1000.0, 0.707);
        node.reset(44100.0, 4096);

        let out = run(&mut node, |_| 1.0, 4096);
        assert!((out.channel(0)[4095] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_high_pass_blocks_dc() {
        let mut node = FilterNode::new(FilterMode::HighPass, 1000.0, 0.707);
        node.reset(44100.0, 4096);

        let out = run(&mut node, |_| 1.0, 4096);
        assert!(out.channel(0)[4095].abs() < 1e-3);
    }

    #[test]
    fn test_low_pass_attenuates_near_nyquist() {
        let mut node = FilterNode::new(FilterMode::LowPass, 200.0, 0.707);
        node.reset(44100.0, 2048);

        let out = run(&mut node, |i| if i % 2 == 0 { 1.0 } else { -1.0 }, 2048);
        let tail_peak = out.channel(0)[1024..]
            .iter()
            .fold(0.0f32, |acc, s| acc.max(s.abs()));
        assert!(tail_peak < 0.01);
    }

    #[test]
    fn test_mode_change_redesigns() {
        let mut node = FilterNode::new(FilterMode::LowPass, 1000.0, 0.707);
        node.reset(44100.0, 64);
        let before = node.coeffs;

        node.set_mode(FilterMode::HighPass);
        run(&mut node, |_| 0.0, 16);
        assert_ne!(before, node.coeffs);
        assert_eq!(node.mode(), FilterMode::HighPass);
    }

    fn assert_coeffs_close(a: BiquadCoeffs, b: BiquadCoeffs) {
        let pairs = [(a.b0, b.b0), (a.b1, b.b1), (a.b2, b.b2), (a.a1, b.a1), (a.a2, b.a2)];
        for (x, y) in pairs {
            assert!((x - y).abs() < 1e-9, "{:?} vs {:?}", a, b);
        }
    }

    #[test]
    fn test_cutoff_change_glides_then_redesigns() {
        let mut node = FilterNode::new(FilterMode::LowPass, 1000.0, 0.707);
        node.reset(44100.0, 64);
        let before = node.coeffs;

        node.cutoff.set_value(4000.0);
        run(&mut node, |_| 0.0, 64);
        let target = BiquadCoeffs::design(FilterMode::LowPass, 4000.0, 0.707f32 as f64, 44100.0);
        assert_ne!(node.coeffs, before);
        // Still gliding after one block
        assert!((node.coeffs.b0 - target.b0).abs() > 1e-6);

        run(&mut node, |_| 0.0, 8192);
        assert_coeffs_close(node.coeffs, target);
    }

    #[test]
    fn test_resonance_change_alone_redesigns() {
        let mut node = FilterNode::new(FilterMode::HighPass, 2000.0, 0.707);
        node.reset(44100.0, 64);
        let before = node.coeffs;

        node.resonance.set_value(4.0);
        run(&mut node, |_| 0.0, 8192);
        let target = BiquadCoeffs::design(FilterMode::HighPass, 2000.0, 4.0, 44100.0);
        assert_ne!(node.coeffs, before);
        assert_coeffs_close(node.coeffs, target);
    }
}
