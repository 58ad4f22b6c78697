//! Sine source

use std::f64::consts::TAU;
use std::sync::Arc;

use flux_core::{ParamRange, Parameter, SampleBuffer};

use crate::node::{ChannelLayout, NodeConfig, NodeKind, NodeProcessor, PortSpec, ProcessContext};

/// Sine generator. Sample n of a fresh oscillator is `level · sin(2π·f·n / sr)`.
pub struct SineOscillator {
    frequency: Arc<Parameter>,
    level: Arc<Parameter>,
    layout: ChannelLayout,
    phase: f64,
}

impl SineOscillator {
    pub fn new(frequency: f32, layout: ChannelLayout) -> Self {
        let freq_param = Parameter::new("Frequency", ParamRange::logarithmic(20.0, 20000.0, 440.0))
            .with_unit("Hz");
        freq_param.set_value(frequency);

        Self {
            frequency: Arc::new(freq_param),
            level: Arc::new(Parameter::new("Level", ParamRange::linear(0.0, 1.0, 1.0))),
            layout,
            phase: 0.0,
        }
    }

    pub fn config(&self) -> NodeConfig {
        NodeConfig::Oscillator {
            frequency: self.frequency.value(),
            layout: self.layout,
        }
    }
}

impl NodeProcessor for SineOscillator {
    fn kind(&self) -> NodeKind {
        NodeKind::Oscillator
    }

    fn inputs(&self) -> Vec<PortSpec> {
        Vec::new()
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::new("Out", self.layout)]
    }

    fn parameters(&self) -> Vec<Arc<Parameter>> {
        vec![Arc::clone(&self.frequency), Arc::clone(&self.level)]
    }

    fn reset(&mut self, _sample_rate: f64, _block_size: usize) {
        self.phase = 0.0;
    }

    fn process(
        &mut self,
        ctx: &ProcessContext<'_>,
        _inputs: &[SampleBuffer],
        outputs: &mut [SampleBuffer],
    ) {
        let Some(output) = outputs.first_mut() else {
            return;
        };

        let increment = TAU * self.frequency.value() as f64 / ctx.sample_rate;
        let level = self.level.value() as f64;

        let mut phase = self.phase;
        for s in output.channel_mut(0).iter_mut() {
            *s = (level * phase.sin()) as f32;
            phase += increment;
            if phase >= TAU {
                phase -= TAU;
            }
        }
        self.phase = phase;

        if output.channels() > 1 {
            let (left, right) = output.stereo_mut();
            right.copy_from_slice(left);
        }
    }
}
