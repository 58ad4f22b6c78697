//! Graph node types
//!
//! Every node kind implements [`NodeProcessor`]; [`FluxNode`] is the closed set of
//! kinds the graph stores, dispatched with a plain `match`.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use flux_core::{FluxError, FluxResult, Parameter, SampleBuffer};

use crate::nodes::{
    DelayNode, FilterMode, FilterNode, GainNode, InputNode, MasterSinkNode, SineOscillator,
    TrackSourceNode,
};
use crate::plugin::PluginNode;
use crate::track::TrackId;

// ═══════════════════════════════════════════════════════════════════════════════
// IDENTIFIERS & PORTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Stable node handle, never reused within a graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Channel layout carried by a port
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelLayout {
    Mono,
    #[default]
    Stereo,
}

impl ChannelLayout {
    pub fn channels(self) -> usize {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    pub name: &'static str,
    pub layout: ChannelLayout,
}

impl PortSpec {
    pub const fn new(name: &'static str, layout: ChannelLayout) -> Self {
        Self { name, layout }
    }

    pub const fn stereo(name: &'static str) -> Self {
        Self::new(name, ChannelLayout::Stereo)
    }
}

/// One port of one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortRef {
    pub node: NodeId,
    pub port: usize,
}

impl PortRef {
    pub fn new(node: NodeId, port: usize) -> Self {
        Self { node, port }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROCESS CONTEXT
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-block information handed to every node
#[derive(Debug, Clone, Copy)]
pub struct ProcessContext<'a> {
    pub sample_rate: f64,
    pub frames: usize,
    /// Transport position of the first frame in the block
    pub position: u64,
    pub playing: bool,
    /// Live input block, when the engine captures one
    pub input: Option<&'a SampleBuffer>,
}

impl<'a> ProcessContext<'a> {
    pub fn new(sample_rate: f64, frames: usize) -> Self {
        Self {
            sample_rate,
            frames,
            position: 0,
            playing: false,
            input: None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NODE CONTRACT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Gain,
    Filter,
    Delay,
    Oscillator,
    Input,
    TrackSource,
    MasterSink,
    Plugin,
}

/// Processing interface shared by every node kind
pub trait NodeProcessor: Send {
    fn kind(&self) -> NodeKind;

    fn inputs(&self) -> Vec<PortSpec>;

    fn outputs(&self) -> Vec<PortSpec>;

    /// Shared handles to the node's parameters
    fn parameters(&self) -> Vec<Arc<Parameter>>;

    /// Prepare for `sample_rate`, clearing DSP history
    fn reset(&mut self, sample_rate: f64, block_size: usize);

    /// Render one block. `inputs` and `outputs` hold one buffer per port, already
    /// sized to `ctx.frames`; outputs arrive cleared.
    fn process(
        &mut self,
        ctx: &ProcessContext<'_>,
        inputs: &[SampleBuffer],
        outputs: &mut [SampleBuffer],
    );
}

/// Construction recipe for built-in nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeConfig {
    Gain {
        gain: f32,
        layout: ChannelLayout,
    },
    Filter {
        mode: FilterMode,
        cutoff: f32,
        resonance: f32,
    },
    Delay {
        time: f32,
        feedback: f32,
        max_time: f32,
    },
    Oscillator {
        frequency: f32,
        layout: ChannelLayout,
    },
    Input,
    TrackSource {
        track: TrackId,
    },
    MasterSink,
}

impl NodeConfig {
    pub fn gain(gain: f32) -> Self {
        NodeConfig::Gain {
            gain,
            layout: ChannelLayout::Stereo,
        }
    }

    pub fn low_pass(cutoff: f32) -> Self {
        NodeConfig::Filter {
            mode: FilterMode::LowPass,
            cutoff,
            resonance: std::f32::consts::FRAC_1_SQRT_2,
        }
    }

    pub fn high_pass(cutoff: f32) -> Self {
        NodeConfig::Filter {
            mode: FilterMode::HighPass,
            cutoff,
            resonance: std::f32::consts::FRAC_1_SQRT_2,
        }
    }

    pub fn delay(time: f32) -> Self {
        NodeConfig::Delay {
            time,
            feedback: crate::nodes::DEFAULT_DELAY_FEEDBACK,
            max_time: crate::nodes::DEFAULT_MAX_DELAY_SECONDS,
        }
    }

    pub fn oscillator(frequency: f32) -> Self {
        NodeConfig::Oscillator {
            frequency,
            layout: ChannelLayout::Stereo,
        }
    }
}

/// How a node can be recreated from a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeSource {
    Builtin(NodeConfig),
    Plugin { type_name: String },
}

// ═══════════════════════════════════════════════════════════════════════════════
// FLUX NODE
// ═══════════════════════════════════════════════════════════════════════════════

/// Closed set of node kinds stored by the graph
pub enum FluxNode {
    Gain(GainNode),
    Filter(FilterNode),
    Delay(DelayNode),
    Oscillator(SineOscillator),
    Input(InputNode),
    TrackSource(TrackSourceNode),
    MasterSink(MasterSinkNode),
    Plugin(PluginNode),
}

macro_rules! dispatch {
    ($node:expr, $inner:ident => $body:expr) => {
        match $node {
            FluxNode::Gain($inner) => $body,
            FluxNode::Filter($inner) => $body,
            FluxNode::Delay($inner) => $body,
            FluxNode::Oscillator($inner) => $body,
            FluxNode::Input($inner) => $body,
            FluxNode::TrackSource($inner) => $body,
            FluxNode::MasterSink($inner) => $body,
            FluxNode::Plugin($inner) => $body,
        }
    };
}

impl FluxNode {
    /// Build a built-in node prepared for `sample_rate`
    pub fn from_config(config: &NodeConfig, sample_rate: f64, block_size: usize) -> Self {
        let mut node = match *config {
            NodeConfig::Gain { gain, layout } => FluxNode::Gain(GainNode::new(gain, layout)),
            NodeConfig::Filter {
                mode,
                cutoff,
                resonance,
            } => FluxNode::Filter(FilterNode::new(mode, cutoff, resonance)),
            NodeConfig::Delay {
                time,
                feedback,
                max_time,
            } => FluxNode::Delay(DelayNode::new(time, feedback, max_time)),
            NodeConfig::Oscillator { frequency, layout } => {
                FluxNode::Oscillator(SineOscillator::new(frequency, layout))
            }
            NodeConfig::Input => FluxNode::Input(InputNode::new()),
            NodeConfig::TrackSource { track } => {
                FluxNode::TrackSource(TrackSourceNode::new(track))
            }
            NodeConfig::MasterSink => FluxNode::MasterSink(MasterSinkNode::new()),
        };
        node.reset(sample_rate, block_size);
        node
    }

    /// Recipe for recreating this node
    pub fn source(&self) -> NodeSource {
        match self {
            FluxNode::Gain(n) => NodeSource::Builtin(n.config()),
            FluxNode::Filter(n) => NodeSource::Builtin(n.config()),
            FluxNode::Delay(n) => NodeSource::Builtin(n.config()),
            FluxNode::Oscillator(n) => NodeSource::Builtin(n.config()),
            FluxNode::Input(_) => NodeSource::Builtin(NodeConfig::Input),
            FluxNode::TrackSource(n) => NodeSource::Builtin(NodeConfig::TrackSource {
                track: n.track(),
            }),
            FluxNode::MasterSink(_) => NodeSource::Builtin(NodeConfig::MasterSink),
            FluxNode::Plugin(n) => NodeSource::Plugin {
                type_name: n.type_name().to_string(),
            },
        }
    }

    /// Find a parameter by name
    pub fn parameter(&self, name: &str) -> Option<Arc<Parameter>> {
        self.parameters().into_iter().find(|p| p.name() == name)
    }

    pub fn set_parameter(&self, name: &str, value: f32) -> FluxResult<()> {
        let param = self
            .parameter(name)
            .ok_or_else(|| FluxError::UnknownParameter(name.to_string()))?;
        param.set_value(value);
        Ok(())
    }

    /// Layouts of the buffers the render plan allocates for this node's output.
    /// Nodes without routable outputs still get one stereo buffer for their mix.
    pub fn output_buffer_layouts(&self) -> Vec<ChannelLayout> {
        let outputs = self.outputs();
        if outputs.is_empty() {
            vec![ChannelLayout::Stereo]
        } else {
            outputs.into_iter().map(|p| p.layout).collect()
        }
    }

    pub fn as_track_source_mut(&mut self) -> Option<&mut TrackSourceNode> {
        match self {
            FluxNode::TrackSource(node) => Some(node),
            _ => None,
        }
    }

    pub fn as_master(&self) -> Option<&MasterSinkNode> {
        match self {
            FluxNode::MasterSink(node) => Some(node),
            _ => None,
        }
    }
}

impl NodeProcessor for FluxNode {
    fn kind(&self) -> NodeKind {
        dispatch!(self, n => n.kind())
    }

    fn inputs(&self) -> Vec<PortSpec> {
        dispatch!(self, n => n.inputs())
    }

    fn outputs(&self) -> Vec<PortSpec> {
        dispatch!(self, n => n.outputs())
    }

    fn parameters(&self) -> Vec<Arc<Parameter>> {
        dispatch!(self, n => n.parameters())
    }

    fn reset(&mut self, sample_rate: f64, block_size: usize) {
        dispatch!(self, n => n.reset(sample_rate, block_size))
    }

    #[inline]
    fn process(
        &mut self,
        ctx: &ProcessContext<'_>,
        inputs: &[SampleBuffer],
        outputs: &mut [SampleBuffer],
    ) {
        dispatch!(self, n => n.process(ctx, inputs, outputs))
    }
}

impl fmt::Debug for FluxNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FluxNode")
            .field("kind", &self.kind())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_gets_a_mix_buffer() {
        let master = FluxNode::from_config(&NodeConfig::MasterSink, 44100.0, 64);
        assert!(master.outputs().is_empty());
        assert_eq!(master.output_buffer_layouts(), vec![ChannelLayout::Stereo]);
    }

    #[test]
    fn test_set_unknown_parameter() {
        let gain = FluxNode::from_config(&NodeConfig::gain(1.0), 44100.0, 64);
        assert!(gain.set_parameter("Gain", 0.25).is_ok());
        assert_eq!(gain.parameter("Gain").map(|p| p.value()), Some(0.25));
        assert!(matches!(
            gain.set_parameter("Nope", 1.0),
            Err(FluxError::UnknownParameter(_))
        ));
    }

    #[test]
    fn test_source_reflects_current_config() {
        let node = FluxNode::from_config(&NodeConfig::low_pass(500.0), 48000.0, 64);
        match node.source() {
            NodeSource::Builtin(NodeConfig::Filter { mode, .. }) => {
                assert_eq!(mode, FilterMode::LowPass)
            }
            other => panic!("unexpected source {:?}", other),
        }
    }
}
