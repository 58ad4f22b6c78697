//! Smoothed gain stage

use std::sync::Arc;

use flux_core::{ParamRange, Parameter, SampleBuffer};

use crate::node::{ChannelLayout, NodeConfig, NodeKind, NodeProcessor, PortSpec, ProcessContext};
use crate::param_smoother::{DEFAULT_RAMP_MS, ParamSmoother};

pub struct GainNode {
    gain: Arc<Parameter>,
    layout: ChannelLayout,
    smoother: ParamSmoother,
}

impl GainNode {
    pub fn new(gain: f32, layout: ChannelLayout) -> Self {
        let param = Parameter::new("Gain", ParamRange::linear(0.0, 2.0, 1.0));
        param.set_value(gain);
        let initial = param.value() as f64;

        Self {
            gain: Arc::new(param),
            layout,
            smoother: ParamSmoother::new(DEFAULT_RAMP_MS, initial),
        }
    }

    pub fn gain(&self) -> &Arc<Parameter> {
        &self.gain
    }

    pub fn config(&self) -> NodeConfig {
        NodeConfig::Gain {
            gain: self.gain.value(),
            layout: self.layout,
        }
    }
}

impl NodeProcessor for GainNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Gain
    }

    fn inputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::new("In", self.layout)]
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::new("Out", self.layout)]
    }

    fn parameters(&self) -> Vec<Arc<Parameter>> {
        vec![Arc::clone(&self.gain)]
    }

    fn reset(&mut self, sample_rate: f64, _block_size: usize) {
        self.smoother.prepare(sample_rate, self.gain.value() as f64);
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
        self.smoother.retarget(self.gain.value() as f64);
        self.smoother.apply_gain(output, ctx.frames);
    }
}
