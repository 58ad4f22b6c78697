//! Plugin extension point
//!
//! External processors implement [`FluxPlugin`] and are hosted by a
//! [`PluginNode`]. A [`PluginRegistry`] maps type names to factories so saved
//! graphs can be rebuilt.

use std::collections::BTreeMap;
use std::sync::Arc;

use flux_core::{ParamRange, Parameter, SampleBuffer, flush_denormal};

use crate::node::{ChannelLayout, NodeKind, NodeProcessor, PortSpec, ProcessContext};
use crate::param_smoother::{DEFAULT_RAMP_MS, ParamSmoother};

/// Contract for user-supplied processors
pub trait FluxPlugin: Send {
    /// Registry type name
    fn name(&self) -> &str;

    /// Called before processing and whenever the sample rate or block size changes
    fn init(&mut self, sample_rate: f64, block_size: usize);

    /// Render one block; `output` arrives cleared and sized like `input`
    fn process(&mut self, input: &SampleBuffer, output: &mut SampleBuffer);

    /// Shared handles to every automatable parameter
    fn enumerate_parameters(&self) -> Vec<Arc<Parameter>>;

    /// Clear DSP history
    fn reset(&mut self) {}

    /// Port layout for both input and output
    fn layout(&self) -> ChannelLayout {
        ChannelLayout::Stereo
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PLUGIN NODE
// ═══════════════════════════════════════════════════════════════════════════════

/// Graph node hosting one plugin instance
pub struct PluginNode {
    plugin: Box<dyn FluxPlugin>,
    type_name: String,
    layout: ChannelLayout,
}

impl PluginNode {
    pub fn new(plugin: Box<dyn FluxPlugin>) -> Self {
        let type_name = plugin.name().to_string();
        let layout = plugin.layout();
        Self {
            plugin,
            type_name,
            layout,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn plugin(&self) -> &dyn FluxPlugin {
        self.plugin.as_ref()
    }
}

impl NodeProcessor for PluginNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Plugin
    }

    fn inputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::new("In", self.layout)]
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::new("Out", self.layout)]
    }

    fn parameters(&self) -> Vec<Arc<Parameter>> {
        self.plugin.enumerate_parameters()
    }

    fn reset(&mut self, sample_rate: f64, block_size: usize) {
        self.plugin.init(sample_rate, block_size);
        self.plugin.reset();
    }

    fn process(
        &mut self,
        _ctx: &ProcessContext<'_>,
        inputs: &[SampleBuffer],
        outputs: &mut [SampleBuffer],
    ) {
        if let (Some(input), Some(output)) = (inputs.first(), outputs.first_mut()) {
            self.plugin.process(input, output);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REGISTRY
// ═══════════════════════════════════════════════════════════════════════════════

pub type PluginFactory = Box<dyn Fn() -> Box<dyn FluxPlugin> + Send + Sync>;

/// Type name → factory
#[derive(Default)]
pub struct PluginRegistry {
    factories: BTreeMap<String, PluginFactory>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the bundled plugins
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(OnePoleFilter::TYPE_NAME, || Box::new(OnePoleFilter::new()));
        registry.register(TubeCompressor::TYPE_NAME, || Box::new(TubeCompressor::new()));
        registry
    }

    /// Register (or replace) a factory
    pub fn register<F>(&mut self, type_name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn FluxPlugin> + Send + Sync + 'static,
    {
        self.factories.insert(type_name.into(), Box::new(factory));
    }

    pub fn create(&self, type_name: &str) -> Option<Box<dyn FluxPlugin>> {
        self.factories.get(type_name).map(|factory| factory())
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ONE-POLE FILTER
// ═══════════════════════════════════════════════════════════════════════════════

/// Bundled example plugin: one-pole low pass with a resonance-style overshoot.
///
/// z ← z + cutoff·(x − z); y = z + (z − y_prev)·resonance
pub struct OnePoleFilter {
    cutoff: Arc<Parameter>,
    resonance: Arc<Parameter>,
    cutoff_ramp: ParamSmoother,
    resonance_ramp: ParamSmoother,
    z1: [f32; 2],
    last_out: [f32; 2],
}

impl OnePoleFilter {
    pub const TYPE_NAME: &'static str = "OnePoleFilter";

    pub fn new() -> Self {
        let cutoff = Parameter::new("Cutoff", ParamRange::linear(0.0, 1.0, 0.5));
        let resonance = Parameter::new("Resonance", ParamRange::linear(0.0, 0.95, 0.0));
        Self {
            cutoff_ramp: ParamSmoother::new(DEFAULT_RAMP_MS, cutoff.value() as f64),
            resonance_ramp: ParamSmoother::new(DEFAULT_RAMP_MS, resonance.value() as f64),
            cutoff: Arc::new(cutoff),
            resonance: Arc::new(resonance),
            z1: [0.0; 2],
            last_out: [0.0; 2],
        }
    }
}

impl Default for OnePoleFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl FluxPlugin for OnePoleFilter {
    fn name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn init(&mut self, sample_rate: f64, _block_size: usize) {
        self.cutoff_ramp.prepare(sample_rate, self.cutoff.value() as f64);
        self.resonance_ramp.prepare(sample_rate, self.resonance.value() as f64);
    }

    fn process(&mut self, input: &SampleBuffer, output: &mut SampleBuffer) {
        self.cutoff_ramp.retarget(self.cutoff.value() as f64);
        self.resonance_ramp.retarget(self.resonance.value() as f64);
        let channels = input.channels().min(output.channels()).min(self.z1.len());
        let frames = input.frames().min(output.frames());

        for i in 0..frames {
            let cutoff = self.cutoff_ramp.tick() as f32;
            let resonance = self.resonance_ramp.tick() as f32;
            for ch in 0..channels {
                let x = input.channel(ch)[i];
                let z1 = self.z1[ch] + cutoff * (x - self.z1[ch]);
                let y = z1 + (z1 - self.last_out[ch]) * resonance;
                output.channel_mut(ch)[i] = y;
                self.z1[ch] = flush_denormal(z1);
                self.last_out[ch] = flush_denormal(y);
            }
        }
    }

    fn enumerate_parameters(&self) -> Vec<Arc<Parameter>> {
        vec![Arc::clone(&self.cutoff), Arc::clone(&self.resonance)]
    }

    fn reset(&mut self) {
        self.z1 = [0.0; 2];
        self.last_out = [0.0; 2];
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TUBE COMPRESSOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Bundled feed-forward compressor with a tanh saturation stage.
///
/// One peak envelope is shared by both channels. Above the threshold the gain
/// drops by (threshold − env)·(1 − 1/ratio) dB; the result is driven into tanh.
pub struct TubeCompressor {
    threshold: Arc<Parameter>,
    ratio: Arc<Parameter>,
    attack: Arc<Parameter>,
    release: Arc<Parameter>,
    drive: Arc<Parameter>,
    /// Linear drive gain
    drive_ramp: ParamSmoother,
    sample_rate: f64,
    envelope: f32,
}

impl TubeCompressor {
    pub const TYPE_NAME: &'static str = "TubeCompressor";

    pub fn new() -> Self {
        Self {
            threshold: Arc::new(
                Parameter::new("Threshold", ParamRange::linear(-60.0, 0.0, -20.0)).with_unit("dB"),
            ),
            ratio: Arc::new(Parameter::new("Ratio", ParamRange::linear(1.0, 20.0, 4.0))),
            attack: Arc::new(
                Parameter::new("Attack", ParamRange::linear(1.0, 100.0, 10.0)).with_unit("ms"),
            ),
            release: Arc::new(
                Parameter::new("Release", ParamRange::linear(10.0, 500.0, 100.0)).with_unit("ms"),
            ),
            drive: Arc::new(
                Parameter::new("Drive", ParamRange::linear(0.0, 12.0, 0.0)).with_unit("dB"),
            ),
            drive_ramp: ParamSmoother::new(DEFAULT_RAMP_MS, 1.0),
            sample_rate: 44100.0,
            envelope: 0.0,
        }
    }

    pub fn envelope(&self) -> f32 {
        self.envelope
    }

    fn drive_gain(&self) -> f64 {
        10f64.powf(self.drive.value() as f64 / 20.0)
    }

    /// Per-sample smoothing coefficient for a time constant in milliseconds
    fn ballistics(&self, ms: f32) -> f32 {
        (-1.0 / (self.sample_rate * ms as f64 * 0.001)).exp() as f32
    }
}

impl Default for TubeCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl FluxPlugin for TubeCompressor {
    fn name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn init(&mut self, sample_rate: f64, _block_size: usize) {
        self.sample_rate = sample_rate;
        self.drive_ramp.prepare(sample_rate, self.drive_gain());
    }

    fn process(&mut self, input: &SampleBuffer, output: &mut SampleBuffer) {
        let threshold = self.threshold.value();
        let slope = 1.0 - 1.0 / self.ratio.value();
        let att = self.ballistics(self.attack.value());
        let rel = self.ballistics(self.release.value());
        self.drive_ramp.retarget(self.drive_gain());

        let channels = input.channels().min(output.channels());
        let frames = input.frames().min(output.frames());
        let mut env = self.envelope;

        for i in 0..frames {
            let level = (0..channels).fold(0.0f32, |acc, ch| acc.max(input.channel(ch)[i].abs()));
            let coeff = if level > env { att } else { rel };
            env = flush_denormal(coeff * env + (1.0 - coeff) * level);

            let env_db = 20.0 * (env + 1e-9).log10();
            let gain_db = if env_db > threshold {
                (threshold - env_db) * slope
            } else {
                0.0
            };
            let gain = 10f32.powf(gain_db / 20.0) * self.drive_ramp.tick() as f32;

            for ch in 0..channels {
                let out = (input.channel(ch)[i] * gain).tanh();
                output.channel_mut(ch)[i] = flush_denormal(out);
            }
        }
        self.envelope = env;
    }

    fn enumerate_parameters(&self) -> Vec<Arc<Parameter>> {
        vec![
            Arc::clone(&self.threshold),
            Arc::clone(&self.ratio),
            Arc::clone(&self.attack),
            Arc::clone(&self.release),
            Arc::clone(&self.drive),
        ]
    }

    fn reset(&mut self) {
        self.envelope = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_creates_builtin() {
        let registry = PluginRegistry::with_builtin();
        assert!(registry.contains("OnePoleFilter"));
        assert!(registry.contains("TubeCompressor"));
        assert!(registry.create("Missing").is_none());

        let plugin = registry.create("OnePoleFilter").unwrap();
        assert_eq!(plugin.name(), "OnePoleFilter");
        let names: Vec<_> = plugin
            .enumerate_parameters()
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(names, ["Cutoff", "Resonance"]);
    }

    #[test]
    fn test_one_pole_step_response() {
        let mut filter = OnePoleFilter::new();
        filter.init(44100.0, 4);

        let mut input = SampleBuffer::stereo(4);
        input.channel_mut(0).fill(1.0);
        let mut output = SampleBuffer::stereo(4);
        filter.process(&input, &mut output);

        // cutoff 0.5, no resonance: 1 - 0.5^n
        assert_eq!(output.channel(0), &[0.5, 0.75, 0.875, 0.9375]);
        assert!(output.channel(1).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_node_exposes_plugin_parameters() {
        let node = PluginNode::new(Box::new(OnePoleFilter::new()));
        assert_eq!(node.type_name(), "OnePoleFilter");
        assert_eq!(node.parameters().len(), 2);
        assert_eq!(node.inputs()[0].layout, ChannelLayout::Stereo);
    }

    #[test]
    fn test_one_pole_cutoff_change_glides() {
        let mut filter = OnePoleFilter::new();
        filter.init(44100.0, 64);

        let mut input = SampleBuffer::stereo(64);
        input.channel_mut(0).fill(1.0);
        let mut output = SampleBuffer::stereo(64);
        filter.cutoff.set_value(0.0);
        filter.process(&input, &mut output);

        // A hard jump to 0 would hold the output at 0
        assert!(output.channel(0)[0] > 0.4);
        assert!(output.channel(0).windows(2).all(|w| w[1] >= w[0]));
    }

    fn dc(level: f32, frames: usize) -> SampleBuffer {
        let mut buffer = SampleBuffer::stereo(frames);
        for ch in 0..2 {
            buffer.channel_mut(ch).fill(level);
        }
        buffer
    }

    fn compress(comp: &mut TubeCompressor, level: f32, frames: usize) -> SampleBuffer {
        let mut output = SampleBuffer::stereo(frames);
        comp.process(&dc(level, frames), &mut output);
        output
    }

    #[test]
    fn test_compressor_is_near_unity_below_threshold() {
        let mut comp = TubeCompressor::new();
        comp.init(44100.0, 512);

        // -40 dB sits well under the -20 dB default threshold
        let out = compress(&mut comp, 0.01, 512);
        for &s in out.channel(0).iter().chain(out.channel(1)) {
            assert!((s - 0.0099997).abs() < 1e-6, "{}", s);
        }
    }

    #[test]
    fn test_compressor_reduces_gain_above_threshold() {
        let mut comp = TubeCompressor::new();
        comp.init(44100.0, 4410);

        let mut out = SampleBuffer::stereo(4410);
        for _ in 0..10 {
            out = compress(&mut comp, 0.5, 4410);
        }
        assert!((comp.envelope() - 0.5).abs() < 1e-3);

        // -6 dB in, 4:1 above -20 dB
        let env_db = 20.0 * 0.5f64.log10();
        let gain_db = (-20.0 - env_db) * 0.75;
        let expected = (0.5 * 10f64.powf(gain_db / 20.0)).tanh() as f32;
        let last = out.channel(0)[4409];
        assert!((last - expected).abs() < 1e-3, "{} vs {}", last, expected);
        assert!(last < 0.2);
        assert_eq!(out.channel(0), out.channel(1));
    }

    #[test]
    fn test_compressor_releases_after_loud_passage() {
        let mut comp = TubeCompressor::new();
        comp.init(44100.0, 44100);
        compress(&mut comp, 0.5, 44100);

        // Envelope still high right after the drop
        let out = compress(&mut comp, 0.01, 64);
        assert!(out.channel(0)[0] < 0.005);

        let out = compress(&mut comp, 0.01, 88200);
        assert!((out.channel(0)[88199] - 0.0099997).abs() < 1e-6);
    }

    #[test]
    fn test_compressor_drive_saturates() {
        let mut comp = TubeCompressor::new();
        comp.drive.set_value(12.0);
        comp.threshold.set_value(0.0);
        comp.init(44100.0, 256);

        let out = compress(&mut comp, 0.5, 256);
        // 0.5 · 10^(12/20) ≈ 1.99 before tanh
        let expected = (0.5f64 * 10f64.powf(0.6)).tanh() as f32;
        assert!((out.channel(0)[255] - expected).abs() < 1e-4);
        assert!(out.channel(0).iter().all(|&s| s < 1.0));
    }
}
