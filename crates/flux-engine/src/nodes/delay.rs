//! Feedback delay line

use std::sync::Arc;

use flux_core::{ParamRange, Parameter, Sample, SampleBuffer, flush_denormal};

use crate::node::{NodeConfig, NodeKind, NodeProcessor, PortSpec, ProcessContext};

/// Longest delay a node allocates for unless configured otherwise
pub const DEFAULT_MAX_DELAY_SECONDS: f32 = 2.0;

pub const DEFAULT_DELAY_FEEDBACK: f32 = 0.3;

/// Length of the crossfade between the old and new read tap on a Time change
pub const DELAY_CROSSFADE_MS: f64 = 10.0;

/// Stereo delay: out = dry·in + wet·delayed, line ← in + delayed·feedback.
///
/// A time of zero is an exact pass-through and leaves the line untouched.
/// Time changes crossfade from the old read tap to the new one.
pub struct DelayNode {
    time: Arc<Parameter>,
    feedback: Arc<Parameter>,
    dry: Arc<Parameter>,
    wet: Arc<Parameter>,
    max_time: f32,
    sample_rate: f64,
    lines: [Vec<Sample>; 2],
    write_pos: usize,
    /// Tap the output currently reads from (samples)
    tap: usize,
    fade: Option<TapFade>,
    fade_frames: usize,
}

/// Sample `delay` frames behind the write head; tap 0 is the incoming sample
#[inline]
fn read_tap(line: &[Sample], write_pos: usize, delay: usize, x: Sample) -> Sample {
    if delay == 0 {
        x
    } else {
        line[(write_pos + line.len() - delay) % line.len()]
    }
}

/// In-progress move from `from` to the node's current tap
#[derive(Debug, Clone, Copy)]
struct TapFade {
    from: usize,
    done: usize,
}

impl DelayNode {
    pub fn new(time: f32, feedback: f32, max_time: f32) -> Self {
        let max_time = if max_time > 0.0 {
            max_time
        } else {
            DEFAULT_MAX_DELAY_SECONDS
        };

        let time_param = Parameter::new("Time", ParamRange::linear(0.0, max_time, 0.5_f32.min(max_time)))
            .with_unit("s");
        time_param.set_value(time);
        let feedback_param = Parameter::new(
            "Feedback",
            ParamRange::linear(0.0, 0.95, DEFAULT_DELAY_FEEDBACK),
        );
        feedback_param.set_value(feedback);

        Self {
            time: Arc::new(time_param),
            feedback: Arc::new(feedback_param),
            dry: Arc::new(Parameter::new("Dry", ParamRange::linear(0.0, 1.0, 1.0))),
            wet: Arc::new(Parameter::new("Wet", ParamRange::linear(0.0, 1.0, 1.0))),
            max_time,
            sample_rate: 0.0,
            lines: [Vec::new(), Vec::new()],
            write_pos: 0,
            tap: 0,
            fade: None,
            fade_frames: 1,
        }
    }

    pub fn config(&self) -> NodeConfig {
        NodeConfig::Delay {
            time: self.time.value(),
            feedback: self.feedback.value(),
            max_time: self.max_time,
        }
    }

    /// Current delay in whole samples, bounded by the line length
    fn delay_samples(&self) -> usize {
        let len = self.lines[0].len();
        if len == 0 {
            return 0;
        }
        let samples = (self.time.value() as f64 * self.sample_rate).round() as usize;
        samples.min(len - 1)
    }
}

impl NodeProcessor for DelayNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Delay
    }

    fn inputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::stereo("In")]
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::stereo("Out")]
    }

    fn parameters(&self) -> Vec<Arc<Parameter>> {
        vec![
            Arc::clone(&self.time),
            Arc::clone(&self.feedback),
            Arc::clone(&self.dry),
            Arc::clone(&self.wet),
        ]
    }

    fn reset(&mut self, sample_rate: f64, _block_size: usize) {
        let len = (self.max_time as f64 * sample_rate).ceil() as usize + 1;
        if self.sample_rate != sample_rate || self.lines[0].len() != len {
            self.lines = [vec![0.0; len], vec![0.0; len]];
        } else {
            for line in self.lines.iter_mut() {
                line.fill(0.0);
            }
        }
        self.sample_rate = sample_rate;
        self.write_pos = 0;
        self.tap = self.delay_samples();
        self.fade = None;
        self.fade_frames = ((DELAY_CROSSFADE_MS * 0.001 * sample_rate).round() as usize).max(1);
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

        let target = self.delay_samples();
        if self.fade.is_none() && target != self.tap {
            self.fade = Some(TapFade {
                from: self.tap,
                done: 0,
            });
            self.tap = target;
        }

        if self.tap == 0 && self.fade.is_none() {
            output.copy_from(input);
            return;
        }

        let feedback = self.feedback.value();
        let dry = self.dry.value();
        let wet = self.wet.value();
        let len = self.lines[0].len();
        let channels = output.channels().min(input.channels()).min(self.lines.len());
        let (tap, fade_frames) = (self.tap, self.fade_frames);

        let (mut write_pos, mut fade) = (self.write_pos, self.fade);
        for ch in 0..channels {
            let line = &mut self.lines[ch];
            // Every channel walks the same positions and fade
            write_pos = self.write_pos;
            fade = self.fade;
            for (o, &x) in output.channel_mut(ch).iter_mut().zip(input.channel(ch)) {
                let delayed = match fade {
                    Some(TapFade { from, done }) => {
                        let t = (done + 1) as Sample / fade_frames as Sample;
                        let old = read_tap(line, write_pos, from, x);
                        let new = read_tap(line, write_pos, tap, x);
                        fade = (done + 1 < fade_frames).then_some(TapFade {
                            from,
                            done: done + 1,
                        });
                        old * (1.0 - t) + new * t
                    }
                    None => read_tap(line, write_pos, tap, x),
                };

                *o = dry * x + wet * delayed;
                line[write_pos] = flush_denormal(x + delayed * feedback);
                write_pos = (write_pos + 1) % len;
            }
        }
        self.write_pos = write_pos;
        self.fade = fade;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn impulse(frames: usize) -> SampleBuffer {
        let mut buf = SampleBuffer::stereo(frames);
        buf.channel_mut(0)[0] = 1.0;
        buf.channel_mut(1)[0] = 1.0;
        buf
    }

    #[test]
    fn test_zero_time_is_identity() {
        let mut node = DelayNode::new(0.0, 0.9, 1.0);
        node.reset(44100.0, 16);

        let mut input = SampleBuffer::stereo(16);
        for (i, s) in input.channel_mut(0).iter_mut().enumerate() {
            *s = (i as f32 * 0.37).sin();
        }
        let mut output = [SampleBuffer::stereo(16)];
        node.process(&ProcessContext::new(44100.0, 16), std::slice::from_ref(&input), &mut output);
        assert_eq!(output[0], input);
    }

    #[test]
    fn test_impulse_echoes_with_feedback() {
        // 4 samples of delay at 1 kHz
        let mut node = DelayNode::new(0.004, 0.5, 0.01);
        node.reset(1000.0, 16);
        node.dry.set_value(0.0);

        let input = [impulse(16)];
        let mut output = [SampleBuffer::stereo(16)];
        node.process(&ProcessContext::new(1000.0, 16), &input, &mut output);

        let left = output[0].channel(0);
        assert_eq!(left[4], 1.0);
        assert_eq!(left[8], 0.5);
        assert_eq!(left[12], 0.25);
        assert_eq!(left[5], 0.0);
    }

    #[test]
    fn test_echo_spans_blocks() {
        let mut node = DelayNode::new(0.006, 0.0, 0.01);
        node.reset(1000.0, 4);
        node.dry.set_value(0.0);

        let ctx = ProcessContext::new(1000.0, 4);
        let mut output = [SampleBuffer::stereo(4)];
        node.process(&ctx, &[impulse(4)], &mut output);
        assert!(output[0].is_silent());

        node.process(&ctx, &[SampleBuffer::stereo(4)], &mut output);
        assert_eq!(output[0].channel(1)[2], 1.0);
    }

    #[test]
    fn test_time_change_has_no_step() {
        let sr = 44100.0;
        let mut node = DelayNode::new(0.01, 0.0, 0.1);
        node.reset(sr, 64);
        node.dry.set_value(0.0);

        let ctx = ProcessContext::new(sr, 64);
        let mut n = 0usize;
        let mut next_block = |node: &mut DelayNode| {
            let mut input = SampleBuffer::stereo(64);
            for ch in 0..2 {
                for (i, s) in input.channel_mut(ch).iter_mut().enumerate() {
                    *s = (std::f64::consts::TAU * 440.0 * (n + i) as f64 / sr).sin() as f32;
                }
            }
            n += 64;
            let mut output = [SampleBuffer::stereo(64)];
            node.process(&ctx, &[input], &mut output);
            let [out] = output;
            out.channel(0).to_vec()
        };

        // Fill the line well past both taps
        let mut rendered = Vec::new();
        for _ in 0..40 {
            rendered = next_block(&mut node);
        }

        node.time.set_value(0.0137);
        for _ in 0..20 {
            rendered.extend(next_block(&mut node));
        }

        // A 440 Hz sine moves at most ~0.063 per sample; the jump between taps
        // is spread over the crossfade
        let max_step = rendered
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .fold(0.0f32, f32::max);
        assert!(max_step < 0.08, "step {}", max_step);

        // Settled on the new tap
        assert_eq!(node.tap, (0.0137f32 as f64 * sr).round() as usize);
        assert!(node.fade.is_none());
    }

    #[test]
    fn test_fade_to_zero_ends_in_pass_through() {
        let mut node = DelayNode::new(0.004, 0.5, 0.01);
        node.reset(1000.0, 16);
        node.time.set_value(0.0);

        let ctx = ProcessContext::new(1000.0, 16);
        let mut output = [SampleBuffer::stereo(16)];
        node.process(&ctx, &[impulse(16)], &mut output);
        assert!(node.fade.is_none());

        let input = impulse(16);
        node.process(&ctx, std::slice::from_ref(&input), &mut output);
        assert_eq!(output[0], input);
    }
}
