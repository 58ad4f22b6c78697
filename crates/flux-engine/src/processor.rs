//! Realtime side of the engine
//!
//! [`EngineProcessor`] runs inside the device callback. It owns the active
//! [`RenderPlan`] and receives everything else through a lock-free command
//! queue. Anything it lets go of (old plans, detached recorders, lanes) is
//! handed back through a second queue so deallocation happens on the control
//! thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use rtrb::{Consumer, Producer};
use serde::{Deserialize, Serialize};

use flux_audio::MeterData;
use flux_core::{Parameter, Sample, SampleBuffer};

use crate::automation::BoundLane;
use crate::node::ProcessContext;
use crate::plan::{LockMode, RenderPlan};
use crate::streaming::RecordStream;
use crate::track::{TrackId, TrackShared, TrackState};

/// Interleaved channel count of the engine's device buffers
pub const ENGINE_CHANNELS: usize = 2;

/// Preallocated slots on the audio thread
pub const MAX_TRACKS: usize = 64;
pub const MAX_AUTOMATION_LANES: usize = 256;

// ═══════════════════════════════════════════════════════════════════════════════
// MODE & LEGACY CHAIN
// ═══════════════════════════════════════════════════════════════════════════════

/// Which renderer feeds the device
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EngineMode {
    #[default]
    Flux = 0,
    Legacy = 1,
}

impl EngineMode {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => EngineMode::Legacy,
            _ => EngineMode::Flux,
        }
    }
}

/// Fixed processing chain rendered instead of the graph in legacy mode
pub trait LegacyChain: Send {
    /// Prepare for a sample rate
    fn prepare(&mut self, _sample_rate: f64) {}

    /// `output` arrives cleared and sized like `input` (stereo)
    fn process(&mut self, input: &SampleBuffer, output: &mut SampleBuffer);
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMMANDS
// ═══════════════════════════════════════════════════════════════════════════════

/// Control → audio thread
pub enum EngineCommand {
    SwapPlan(Box<RenderPlan>),
    Play,
    Stop,
    Seek(u64),
    AttachTrack(Arc<TrackShared>),
    DetachTrack(TrackId),
    AttachRecorder(Box<RecordStream>),
    DetachRecorder(TrackId),
    SetMode(EngineMode),
    SetLegacyChain(Option<Box<dyn LegacyChain>>),
    AddAutomation(Box<BoundLane>),
    ClearAutomation,
    /// Stop transport, idle every track and release recorders
    Abort,
}

/// Audio → control thread: items to drop off the audio thread
pub enum Garbage {
    Plan(Box<RenderPlan>),
    Recorder(Box<RecordStream>),
    Track(Arc<TrackShared>),
    Lane(Box<BoundLane>),
    Legacy(Box<dyn LegacyChain>),
}

// ═══════════════════════════════════════════════════════════════════════════════
// SHARED STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Transport mirror written by the audio thread
#[derive(Debug, Default)]
pub struct TransportShared {
    playing: AtomicBool,
    position: AtomicU64,
    mode: AtomicU8,
}

impl TransportShared {
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    pub fn mode(&self) -> EngineMode {
        EngineMode::from_u8(self.mode.load(Ordering::Acquire))
    }
}

/// Block timing counters
#[derive(Debug, Default)]
pub struct EngineStats {
    blocks: AtomicU64,
    deadline_misses: AtomicU64,
    skipped_nodes: AtomicU64,
    last_load: AtomicU32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EngineStatsSnapshot {
    pub blocks: u64,
    pub deadline_misses: u64,
    /// Node renders skipped because a control thread held the node
    pub skipped_nodes: u64,
    /// Processing time of the last callback / its real-time budget
    pub last_load: f32,
}

impl EngineStats {
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            blocks: self.blocks.load(Ordering::Relaxed),
            deadline_misses: self.deadline_misses.load(Ordering::Relaxed),
            skipped_nodes: self.skipped_nodes.load(Ordering::Relaxed),
            last_load: f32::from_bits(self.last_load.load(Ordering::Relaxed)),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROCESSOR
// ═══════════════════════════════════════════════════════════════════════════════

pub struct EngineProcessor {
    sample_rate: f64,
    block_size: usize,
    plan: Option<Box<RenderPlan>>,
    commands: Consumer<EngineCommand>,
    garbage: Producer<Garbage>,
    tracks: Vec<Arc<TrackShared>>,
    recorders: Vec<Box<RecordStream>>,
    lanes: Vec<Box<BoundLane>>,
    legacy: Option<Box<dyn LegacyChain>>,
    mode: EngineMode,
    playing: bool,
    position: u64,
    input: SampleBuffer,
    scratch: SampleBuffer,
    master_volume: Arc<Parameter>,
    transport: Arc<TransportShared>,
    stats: Arc<EngineStats>,
    meter: Arc<MeterData>,
}

/// Handles the processor shares with the control side
pub(crate) struct ProcessorShared {
    pub master_volume: Arc<Parameter>,
    pub transport: Arc<TransportShared>,
    pub stats: Arc<EngineStats>,
    pub meter: Arc<MeterData>,
}

impl EngineProcessor {
    pub(crate) fn new(
        sample_rate: f64,
        block_size: usize,
        commands: Consumer<EngineCommand>,
        garbage: Producer<Garbage>,
        shared: ProcessorShared,
    ) -> Self {
        let block_size = block_size.max(1);
        Self {
            sample_rate,
            block_size,
            plan: None,
            commands,
            garbage,
            tracks: Vec::with_capacity(MAX_TRACKS),
            recorders: Vec::with_capacity(MAX_TRACKS),
            lanes: Vec::with_capacity(MAX_AUTOMATION_LANES),
            legacy: None,
            mode: EngineMode::Flux,
            playing: false,
            position: 0,
            input: SampleBuffer::stereo(block_size),
            scratch: SampleBuffer::stereo(block_size),
            master_volume: shared.master_volume,
            transport: shared.transport,
            stats: shared.stats,
            meter: shared.meter,
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Render interleaved stereo. `output` is fully overwritten; a missing or
    /// short `input` reads as silence. Never blocks or allocates.
    pub fn process(&mut self, input: &[Sample], output: &mut [Sample]) {
        let started = Instant::now();
        self.apply_commands();

        let total = output.len() / ENGINE_CHANNELS;
        let max_block = self
            .plan
            .as_ref()
            .map_or(self.block_size, |p| p.block_size())
            .min(self.block_size);
        let mut offset = 0;
        let mut skipped = 0;

        while offset < total {
            let frames = (total - offset).min(max_block);
            let range = offset * ENGINE_CHANNELS..(offset + frames) * ENGINE_CHANNELS;
            let block_input = input.get(range.clone()).unwrap_or(&[]);
            skipped += self.render_block(block_input, &mut output[range], frames);
            offset += frames;
        }

        self.transport.playing.store(self.playing, Ordering::Release);
        self.transport.position.store(self.position, Ordering::Release);

        let budget = total as f64 / self.sample_rate;
        let elapsed = started.elapsed().as_secs_f64();
        let stats = &self.stats;
        stats.blocks.fetch_add(1, Ordering::Relaxed);
        stats.skipped_nodes.fetch_add(skipped as u64, Ordering::Relaxed);
        if budget > 0.0 {
            stats
                .last_load
                .store(((elapsed / budget) as f32).to_bits(), Ordering::Relaxed);
            if elapsed > budget {
                stats.deadline_misses.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn render_block(&mut self, input: &[Sample], output: &mut [Sample], frames: usize) -> usize {
        for track in &self.tracks {
            track.apply_pending();
        }
        if self.playing {
            for lane in &self.lanes {
                lane.apply(self.position);
            }
        }

        self.input.set_frames(frames);
        self.input.read_interleaved(input, ENGINE_CHANNELS);

        let mut skipped = 0;
        match (self.mode, self.plan.as_mut(), self.legacy.as_mut()) {
            (EngineMode::Flux, Some(plan), _) => {
                let ctx = ProcessContext {
                    sample_rate: self.sample_rate,
                    frames,
                    position: self.position,
                    playing: self.playing,
                    input: Some(&self.input),
                };
                plan.render(&ctx, LockMode::Realtime).write_interleaved(output, ENGINE_CHANNELS);
                skipped = plan.skipped_nodes();
            }
            (EngineMode::Legacy, _, Some(chain)) => {
                self.scratch.set_frames(frames);
                self.scratch.clear();
                chain.process(&self.input, &mut self.scratch);
                self.scratch.write_interleaved(output, ENGINE_CHANNELS);
            }
            _ => output.fill(0.0),
        }

        let volume = self.master_volume.value();
        if volume != 1.0 {
            for s in output.iter_mut() {
                *s *= volume;
            }
        }

        self.scratch.set_frames(frames);
        self.scratch.read_interleaved(output, ENGINE_CHANNELS);
        self.meter.update(self.scratch.channel(0), self.scratch.channel(1));

        for recorder in self.recorders.iter_mut() {
            if recorder.shared().state() == TrackState::Recording {
                recorder.write_block(&self.input);
            }
        }

        if self.playing {
            self.position += frames as u64;
        }
        skipped
    }

    /// Drain the command queue (block boundary)
    pub(crate) fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            self.apply(command);
        }
    }

    fn apply(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::SwapPlan(plan) => {
                if let Some(old) = self.plan.replace(plan) {
                    self.discard(Garbage::Plan(old));
                }
            }
            EngineCommand::Play => self.playing = true,
            EngineCommand::Stop => self.playing = false,
            EngineCommand::Seek(frame) => self.position = frame,
            EngineCommand::AttachTrack(track) => {
                if self.tracks.len() < self.tracks.capacity() {
                    self.tracks.push(track);
                } else {
                    self.discard(Garbage::Track(track));
                }
            }
            EngineCommand::DetachTrack(id) => {
                if let Some(idx) = self.tracks.iter().position(|t| t.id() == id) {
                    let track = self.tracks.swap_remove(idx);
                    self.discard(Garbage::Track(track));
                }
            }
            EngineCommand::AttachRecorder(recorder) => {
                if let Some(idx) = self.recorders.iter().position(|r| r.track() == recorder.track()) {
                    let old = std::mem::replace(&mut self.recorders[idx], recorder);
                    self.discard(Garbage::Recorder(old));
                } else if self.recorders.len() < self.recorders.capacity() {
                    self.recorders.push(recorder);
                } else {
                    self.discard(Garbage::Recorder(recorder));
                }
            }
            EngineCommand::DetachRecorder(id) => {
                if let Some(idx) = self.recorders.iter().position(|r| r.track() == id) {
                    let recorder = self.recorders.swap_remove(idx);
                    self.discard(Garbage::Recorder(recorder));
                }
            }
            EngineCommand::SetMode(mode) => {
                self.mode = mode;
                self.transport.mode.store(mode as u8, Ordering::Release);
            }
            EngineCommand::SetLegacyChain(chain) => {
                let old = std::mem::replace(&mut self.legacy, chain);
                if let Some(old) = old {
                    self.discard(Garbage::Legacy(old));
                }
            }
            EngineCommand::AddAutomation(lane) => {
                if self.lanes.len() < self.lanes.capacity() {
                    self.lanes.push(lane);
                } else {
                    self.discard(Garbage::Lane(lane));
                }
            }
            EngineCommand::ClearAutomation => {
                while let Some(lane) = self.lanes.pop() {
                    self.discard(Garbage::Lane(lane));
                }
            }
            EngineCommand::Abort => {
                self.playing = false;
                for track in &self.tracks {
                    track.force_state(TrackState::Idle);
                }
                while let Some(recorder) = self.recorders.pop() {
                    self.discard(Garbage::Recorder(recorder));
                }
            }
        }
    }

    fn discard(&mut self, item: Garbage) {
        // A full queue means the control side stopped collecting; dropping here
        // is the only option left
        let _ = self.garbage.push(item);
    }
}

impl std::fmt::Debug for EngineProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineProcessor")
            .field("sample_rate", &self.sample_rate)
            .field("block_size", &self.block_size)
            .field("mode", &self.mode)
            .field("playing", &self.playing)
            .field("position", &self.position)
            .field("tracks", &self.tracks.len())
            .field("recorders", &self.recorders.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::FluxGraph;
    use crate::node::{NodeConfig, PortRef};
    use flux_core::ParamRange;
    use rtrb::RingBuffer;

    struct Harness {
        processor: EngineProcessor,
        commands: Producer<EngineCommand>,
        garbage: Consumer<Garbage>,
        volume: Arc<Parameter>,
        stats: Arc<EngineStats>,
    }

    fn harness(block: usize) -> Harness {
        let (commands, command_rx) = RingBuffer::new(64);
        let (garbage_tx, garbage) = RingBuffer::new(128);
        let volume = Arc::new(Parameter::new("Master Volume", ParamRange::linear(0.0, 1.5, 1.0)));
        let stats = Arc::new(EngineStats::default());
        let processor = EngineProcessor::new(
            44100.0,
            block,
            command_rx,
            garbage_tx,
            ProcessorShared {
                master_volume: Arc::clone(&volume),
                transport: Arc::new(TransportShared::default()),
                stats: Arc::clone(&stats),
                meter: Arc::new(MeterData::default()),
            },
        );
        Harness {
            processor,
            commands,
            garbage,
            volume,
            stats,
        }
    }

    fn dc_plan(block: usize, level: f32) -> Box<RenderPlan> {
        let (mut graph, master) = FluxGraph::with_master(44100.0, block);
        let input = graph.add_node(NodeConfig::Input);
        let gain = graph.add_node(NodeConfig::gain(level));
        graph.connect(PortRef::new(input, 0), PortRef::new(gain, 0), 1.0).unwrap();
        graph.connect(PortRef::new(gain, 0), PortRef::new(master, 0), 1.0).unwrap();
        Box::new(graph.compile().unwrap())
    }

    struct Invert;

    impl LegacyChain for Invert {
        fn process(&mut self, input: &SampleBuffer, output: &mut SampleBuffer) {
            output.copy_from(input);
            output.apply_gain(-1.0);
        }
    }

    #[test]
    fn test_silence_without_plan() {
        let mut h = harness(4);
        let mut out = [1.0; 8];
        h.processor.process(&[0.5; 8], &mut out);
        assert_eq!(out, [0.0; 8]);
        assert_eq!(h.stats.snapshot().blocks, 1);
    }

    #[test]
    fn test_plan_swap_returns_old_plan() {
        let mut h = harness(4);
        let mut out = [0.0; 8];

        h.commands.push(EngineCommand::SwapPlan(dc_plan(4, 0.5))).ok().unwrap();
        h.processor.process(&[0.5; 8], &mut out);
        assert_eq!(out, [0.25; 8]);

        h.commands.push(EngineCommand::SwapPlan(dc_plan(4, 1.0))).ok().unwrap();
        h.processor.process(&[0.5; 8], &mut out);
        assert_eq!(out, [0.5; 8]);
        assert!(matches!(h.garbage.pop(), Ok(Garbage::Plan(_))));
    }

    #[test]
    fn test_large_period_is_sub_blocked() {
        let mut h = harness(4);
        h.commands.push(EngineCommand::SwapPlan(dc_plan(4, 1.0))).ok().unwrap();
        h.commands.push(EngineCommand::Play).ok().unwrap();

        let mut out = [0.0; 22];
        h.processor.process(&[0.3; 22], &mut out);
        assert!(out.iter().all(|&s| (s - 0.3).abs() < 1e-6));
        assert_eq!(h.processor.position(), 11);
    }

    #[test]
    fn test_master_volume_and_legacy_mode() {
        let mut h = harness(4);
        let mut out = [0.0; 8];
        h.commands.push(EngineCommand::SetMode(EngineMode::Legacy)).ok().unwrap();
        h.processor.process(&[0.5; 8], &mut out);
        assert_eq!(out, [0.0; 8]);

        h.commands.push(EngineCommand::SetLegacyChain(Some(Box::new(Invert)))).ok().unwrap();
        h.volume.set_value(0.5);
        h.processor.process(&[0.5; 8], &mut out);
        assert_eq!(out, [-0.25; 8]);
    }

    #[test]
    fn test_transport_commands_apply_at_block_boundary() {
        let mut h = harness(4);
        let mut out = [0.0; 8];
        h.commands.push(EngineCommand::Play).ok().unwrap();
        h.processor.process(&[], &mut out);
        assert!(h.processor.is_playing());
        assert_eq!(h.processor.position(), 4);

        h.commands.push(EngineCommand::Seek(1000)).ok().unwrap();
        h.commands.push(EngineCommand::Stop).ok().unwrap();
        h.processor.process(&[], &mut out);
        assert!(!h.processor.is_playing());
        assert_eq!(h.processor.position(), 1000);
    }

    #[test]
    fn test_abort_idles_tracks() {
        let mut h = harness(4);
        let track = Arc::new(TrackShared::new(TrackId(1)));
        h.commands.push(EngineCommand::AttachTrack(Arc::clone(&track))).ok().unwrap();
        track.request(TrackState::Playing).unwrap();
        h.processor.process(&[], &mut [0.0; 8]);
        assert_eq!(track.state(), TrackState::Playing);

        h.commands.push(EngineCommand::Abort).ok().unwrap();
        h.processor.apply_commands();
        assert_eq!(track.state(), TrackState::Idle);
    }
}
