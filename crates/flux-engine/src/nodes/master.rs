//! Master sink: the final mix of a graph

use std::sync::Arc;

use flux_audio::{MeterData, MeterSnapshot};
use flux_core::{ParamRange, Parameter, Sample, SampleBuffer};

use crate::node::{NodeKind, NodeProcessor, PortSpec, ProcessContext};
use crate::param_smoother::{DEFAULT_RAMP_MS, ParamSmoother};

/// Transformer-style soft saturation: y = x − drive·0.1·x³
#[inline]
fn saturate(x: Sample, drive: Sample) -> Sample {
    x - drive * 0.1 * x * x * x
}

/// Sums every inbound connection, then applies crosstalk, gain, saturation and a
/// hard clip to [-1, 1]. Has no routable outputs; the render plan keeps its mix.
pub struct MasterSinkNode {
    gain: Arc<Parameter>,
    crosstalk: Arc<Parameter>,
    drive: Arc<Parameter>,
    smoother: ParamSmoother,
    meter: Arc<MeterData>,
}

impl MasterSinkNode {
    pub fn new() -> Self {
        let gain = Arc::new(Parameter::new("Master Gain", ParamRange::linear(0.0, 1.5, 1.0)));
        let initial = gain.value() as f64;

        Self {
            gain,
            crosstalk: Arc::new(Parameter::new("Crosstalk", ParamRange::linear(0.0, 0.1, 0.0))),
            drive: Arc::new(Parameter::new("Drive", ParamRange::linear(0.0, 1.0, 0.0))),
            smoother: ParamSmoother::new(DEFAULT_RAMP_MS, initial),
            meter: Arc::new(MeterData::default()),
        }
    }

    /// Post-clip level meter (peak decays by 0.95 per block)
    pub fn meter(&self) -> Arc<MeterData> {
        Arc::clone(&self.meter)
    }

    pub fn peak_level(&self) -> MeterSnapshot {
        self.meter.snapshot()
    }
}

impl Default for MasterSinkNode {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeProcessor for MasterSinkNode {
    fn kind(&self) -> NodeKind {
        NodeKind::MasterSink
    }

    fn inputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::stereo("Stereo In")]
    }

    fn outputs(&self) -> Vec<PortSpec> {
        Vec::new()
    }

    fn parameters(&self) -> Vec<Arc<Parameter>> {
        vec![
            Arc::clone(&self.gain),
            Arc::clone(&self.crosstalk),
            Arc::clone(&self.drive),
        ]
    }

    fn reset(&mut self, sample_rate: f64, _block_size: usize) {
        self.smoother.prepare(sample_rate, self.gain.value() as f64);
        self.meter.reset();
    }

    fn process(
        &mut self,
        ctx: &ProcessContext<'_>,
        inputs: &[SampleBuffer],
        outputs: &mut [SampleBuffer],
    ) {
        let (Some(input), Some(output)) = (inputs.first(), outputs.first_mut()) else {
            return;
        };
        output.copy_from(input);

        let crosstalk = self.crosstalk.value();
        let drive = self.drive.value();

        if crosstalk > 0.0 {
            let (left, right) = output.stereo_mut();
            for (l, r) in left.iter_mut().zip(right.iter_mut()) {
                let (dry_l, dry_r) = (*l, *r);
                *l = dry_l * (1.0 - crosstalk) + dry_r * crosstalk;
                *r = dry_r * (1.0 - crosstalk) + dry_l * crosstalk;
            }
        }

        self.smoother.retarget(self.gain.value() as f64);
        self.smoother.apply_gain(output, ctx.frames);

        for ch in 0..output.channels() {
            for s in output.channel_mut(ch).iter_mut() {
                let shaped = if drive > 0.0 { saturate(*s, drive) } else { *s };
                *s = shaped.clamp(-1.0, 1.0);
            }
        }

        let right = if output.channels() > 1 { 1 } else { 0 };
        self.meter.update(output.channel(0), output.channel(right));
    }
}
