//! Live input capture

use std::sync::Arc;

use flux_core::{AtomicParam, Parameter, SampleBuffer};

use crate::node::{NodeKind, NodeProcessor, PortSpec, ProcessContext};

/// Visual decay of the input peak per block
const INPUT_PEAK_DECAY: f32 = 0.92;

/// Exposes the engine's captured input block as a graph source
pub struct InputNode {
    peak: Arc<AtomicParam>,
}

impl InputNode {
    pub fn new() -> Self {
        Self {
            peak: Arc::new(AtomicParam::new(0.0)),
        }
    }

    /// Decaying peak of the captured signal, readable from any thread
    pub fn peak_level(&self) -> Arc<AtomicParam> {
        Arc::clone(&self.peak)
    }
}

impl Default for InputNode {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeProcessor for InputNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Input
    }

    fn inputs(&self) -> Vec<PortSpec> {
        Vec::new()
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::stereo("Out")]
    }

    fn parameters(&self) -> Vec<Arc<Parameter>> {
        Vec::new()
    }

    fn reset(&mut self, _sample_rate: f64, _block_size: usize) {
        self.peak.set(0.0);
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

        let peak = match ctx.input {
            Some(input) => {
                output.copy_from(input);
                output.peak()
            }
            None => 0.0,
        };

        let held = self.peak.get() * INPUT_PEAK_DECAY;
        self.peak.set(peak.max(held));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copies_live_input() {
        let mut node = InputNode::new();
        let mut live = SampleBuffer::stereo(4);
        live.channel_mut(0).copy_from_slice(&[0.1, 0.2, 0.3, -0.8]);

        let mut ctx = ProcessContext::new(44100.0, 4);
        ctx.input = Some(&live);

        let mut out = [SampleBuffer::stereo(4)];
        node.process(&ctx, &[], &mut out);
        assert_eq!(out[0], live);
        assert_eq!(node.peak_level().get(), 0.8);

        // No input: silence and a decaying peak
        let mut out = [SampleBuffer::stereo(4)];
        node.process(&ProcessContext::new(44100.0, 4), &[], &mut out);
        assert!(out[0].is_silent());
        assert!((node.peak_level().get() - 0.8 * INPUT_PEAK_DECAY).abs() < 1e-6);
    }
}
