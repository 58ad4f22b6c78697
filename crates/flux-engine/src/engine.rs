//! Audio engine: control-side owner of the project, the disk streamer and the
//! device stream
//!
//! The control thread edits a [`FluxProject`] model under a mutex and publishes
//! compiled plans to the [`EngineProcessor`] through a lock-free queue. The
//! processor lives behind an `Arc<Mutex<_>>`: the device callback only ever
//! `try_lock`s it, offline callers lock it directly.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rtrb::{Consumer, Producer, RingBuffer};
use serde::{Deserialize, Serialize};

use flux_audio::{
    AudioCallback, AudioConfig, AudioStream, DeviceStatus, MeterData, get_default_input_device,
    get_default_output_device, get_input_device_by_name, get_output_device_by_name,
};
use flux_core::{BufferSize, ParamInfo, Sample, SampleRate};
use flux_file::WavSpec;

use crate::automation::{AutomationLane, BoundLane};
use crate::error::{EngineError, EngineResult};
use crate::graph::FluxGraph;
use crate::node::NodeId;
use crate::plugin::PluginRegistry;
use crate::processor::{
    EngineCommand, EngineMode, EngineProcessor, EngineStats, EngineStatsSnapshot, Garbage,
    LegacyChain, ProcessorShared, TransportShared,
};
use crate::project::{FluxProject, ProjectSnapshot};
use crate::streaming::{DiskStreamer, StreamFault, StreamerConfig};
use crate::track::{TrackId, TrackState};

/// Default command queue depth
pub const COMMAND_QUEUE_SIZE: usize = 1024;

/// How long control calls wait for the audio thread to hand something back
const AUDIO_THREAD_TIMEOUT: Duration = Duration::from_secs(2);

// ═══════════════════════════════════════════════════════════════════════════════
// CONFIG
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: SampleRate,
    pub buffer_size: BufferSize,
    /// Output device name (default device when `None`)
    pub output_device: Option<String>,
    /// Input device name (default device when `None`)
    pub input_device: Option<String>,
    /// Open a capture stream for Input nodes and recording
    pub enable_input: bool,
    pub command_queue_size: usize,
    /// Playback lookahead per track, in frames
    pub playback_ring_frames: usize,
    /// Pending record writes per track, in frames
    pub record_ring_frames: usize,
    pub disk_chunk_frames: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let streamer = StreamerConfig::default();
        Self {
            sample_rate: SampleRate::default(),
            buffer_size: BufferSize::default(),
            output_device: None,
            input_device: None,
            enable_input: false,
            command_queue_size: COMMAND_QUEUE_SIZE,
            playback_ring_frames: streamer.ring_frames,
            record_ring_frames: streamer.record_ring_frames,
            disk_chunk_frames: streamer.chunk_frames,
        }
    }
}

impl EngineConfig {
    /// Small device buffer for live monitoring
    pub fn low_latency() -> Self {
        Self {
            buffer_size: BufferSize::Samples128,
            sample_rate: SampleRate::Hz48000,
            ..Self::default()
        }
    }

    pub fn streamer_config(&self) -> StreamerConfig {
        StreamerConfig {
            ring_frames: self.playback_ring_frames,
            record_ring_frames: self.record_ring_frames,
            chunk_frames: self.disk_chunk_frames,
        }
    }

    pub fn audio_config(&self) -> AudioConfig {
        AudioConfig {
            sample_rate: self.sample_rate,
            buffer_size: self.buffer_size,
            ..AudioConfig::default()
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENGINE
// ═══════════════════════════════════════════════════════════════════════════════

pub struct AudioEngine {
    config: EngineConfig,
    project: Mutex<FluxProject>,
    registry: PluginRegistry,
    processor: Arc<Mutex<EngineProcessor>>,
    commands: Mutex<Producer<EngineCommand>>,
    garbage: Mutex<Consumer<Garbage>>,
    transport: Arc<TransportShared>,
    stats: Arc<EngineStats>,
    meter: Arc<MeterData>,
    streamer: DiskStreamer,
    stream: Mutex<Option<AudioStream>>,
    /// Health of the open device; checked by [`poll`](AudioEngine::poll)
    device_status: Mutex<Option<Arc<DeviceStatus>>>,
    shut_down: AtomicBool,
}

impl AudioEngine {
    /// Build an engine with an empty project (master sink only)
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        Self::with_registry(config, PluginRegistry::with_builtin())
    }

    pub fn with_registry(config: EngineConfig, registry: PluginRegistry) -> EngineResult<Self> {
        let sample_rate = config.sample_rate.as_f64();
        let block_size = config.buffer_size.as_usize();
        let project = FluxProject::new("Untitled", sample_rate, block_size);

        let queue_size = config.command_queue_size.max(16);
        let (command_tx, command_rx) = RingBuffer::new(queue_size);
        let (garbage_tx, garbage_rx) = RingBuffer::new(queue_size * 2);

        let transport = Arc::new(TransportShared::default());
        let stats = Arc::new(EngineStats::default());
        let meter = Arc::new(MeterData::default());
        let processor = EngineProcessor::new(
            sample_rate,
            block_size,
            command_rx,
            garbage_tx,
            ProcessorShared {
                master_volume: Arc::clone(project.master_volume()),
                transport: Arc::clone(&transport),
                stats: Arc::clone(&stats),
                meter: Arc::clone(&meter),
            },
        );

        let streamer = DiskStreamer::new(config.streamer_config())?;

        let engine = Self {
            config,
            project: Mutex::new(project),
            registry,
            processor: Arc::new(Mutex::new(processor)),
            commands: Mutex::new(command_tx),
            garbage: Mutex::new(garbage_rx),
            transport,
            stats,
            meter,
            streamer,
            stream: Mutex::new(None),
            device_status: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        };
        engine.commit_graph()?;

        log::info!(
            "Audio engine created: {} Hz, {} frames",
            engine.config.sample_rate.as_u32(),
            block_size
        );
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sample_rate(&self) -> f64 {
        self.config.sample_rate.as_f64()
    }

    pub fn block_size(&self) -> usize {
        self.config.buffer_size.as_usize()
    }

    pub fn streamer(&self) -> &DiskStreamer {
        &self.streamer
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.registry
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // COMMAND PLUMBING
    // ═══════════════════════════════════════════════════════════════════════════

    fn send(&self, command: EngineCommand) -> EngineResult<()> {
        self.collect_garbage();
        self.commands
            .lock()
            .push(command)
            .map_err(|_| EngineError::QueueFull)
    }

    /// Release everything the audio thread handed back. Returns items dropped.
    pub fn collect_garbage(&self) -> usize {
        let mut queue = self.garbage.lock();
        let mut count = 0;
        while queue.pop().is_ok() {
            count += 1;
        }
        count
    }

    fn is_streaming(&self) -> bool {
        self.stream.lock().as_ref().is_some_and(|s| s.is_running())
    }

    /// Without a running device nobody drains the queue; apply commands here
    fn pump_if_idle(&self) {
        if !self.is_streaming() {
            self.processor.lock().apply_commands();
        }
    }

    /// Wait for the audio thread to return the recorder of `track`
    fn wait_for_recorder(&self, track: TrackId) -> EngineResult<()> {
        let deadline = Instant::now() + AUDIO_THREAD_TIMEOUT;
        loop {
            while let Ok(item) = self.garbage.lock().pop() {
                if let Garbage::Recorder(recorder) = item {
                    if recorder.track() == track {
                        return Ok(());
                    }
                }
            }
            if Instant::now() >= deadline {
                return Err(EngineError::Timeout);
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // GRAPH
    // ═══════════════════════════════════════════════════════════════════════════

    /// Edit the control-side graph. Structural edits take effect on the audio
    /// thread after [`commit_graph`](Self::commit_graph).
    pub fn with_graph<R>(&self, f: impl FnOnce(&mut FluxGraph) -> R) -> R {
        f(self.project.lock().graph_mut())
    }

    pub fn with_project<R>(&self, f: impl FnOnce(&mut FluxProject) -> R) -> R {
        f(&mut self.project.lock())
    }

    /// Validate the graph and hand a fresh plan to the audio thread.
    /// A graph error leaves the running plan untouched.
    pub fn commit_graph(&self) -> EngineResult<()> {
        let plan = self.project.lock().graph_mut().compile()?;
        log::debug!("Committing plan with {} nodes", plan.len());
        self.send(EngineCommand::SwapPlan(Box::new(plan)))
    }

    pub fn master(&self) -> NodeId {
        self.project.lock().master()
    }

    /// Atomic parameter write; no commit needed
    pub fn set_parameter(&self, node: NodeId, name: &str, value: f32) -> EngineResult<()> {
        Ok(self.project.lock().graph().set_parameter(node, name, value)?)
    }

    /// Current value of every node parameter
    pub fn parameter_snapshot(&self) -> BTreeMap<NodeId, Vec<ParamInfo>> {
        let project = self.project.lock();
        let graph = project.graph();
        graph
            .node_ids()
            .into_iter()
            .filter_map(|id| {
                let params = graph.parameters(id).ok()?;
                Some((id, params.iter().map(|p| p.info()).collect()))
            })
            .collect()
    }

    /// Project-level parameters (master volume, tempo)
    pub fn project_parameters(&self) -> Vec<ParamInfo> {
        self.project.lock().parameters().iter().map(|p| p.info()).collect()
    }

    pub fn set_master_volume(&self, volume: f32) {
        self.project.lock().master_volume().set_value(volume);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PROJECT
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn project_snapshot(&self) -> ProjectSnapshot {
        self.project.lock().snapshot()
    }

    /// Replace the project. Running tracks are stopped, recordings finalized;
    /// tracks of the new project start idle and unarmed.
    pub fn load_project(&self, snapshot: &ProjectSnapshot) -> EngineResult<()> {
        let mut project = FluxProject::rebuild(snapshot, &self.registry)?;
        // Snapshots keep the rate they were saved at; render at the device's
        project.graph_mut().prepare(self.sample_rate(), self.block_size());

        self.send(EngineCommand::Abort)?;
        self.pump_if_idle();
        let old_tracks: Vec<TrackId> = self.project.lock().tracks().iter().map(|t| t.id()).collect();
        for id in old_tracks {
            self.send(EngineCommand::DetachTrack(id))?;
            let _ = self.streamer.close_playback(id);
        }
        self.finish_all_recordings();

        let new_tracks: Vec<_> = project.tracks().iter().map(|t| Arc::clone(t.shared())).collect();
        {
            let mut current = self.project.lock();
            // The processor keeps reading the existing volume handle
            project.share_master_volume(current.master_volume());
            *current = project;
        }
        for shared in new_tracks {
            self.send(EngineCommand::AttachTrack(shared))?;
        }
        self.commit_graph()?;
        log::info!("Loaded project '{}'", snapshot.name);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TRACKS
    // ═══════════════════════════════════════════════════════════════════════════

    /// New idle track with a TrackSource node routed to the master
    pub fn add_track(&self, name: &str) -> EngineResult<TrackId> {
        let (id, shared) = {
            let mut project = self.project.lock();
            let id = project.add_track(name)?;
            (id, Arc::clone(project.track(id)?.shared()))
        };
        self.send(EngineCommand::AttachTrack(shared))?;
        self.commit_graph()?;
        Ok(id)
    }

    /// Bind `path` to the track's source node, starting at the transport position
    pub fn arm_playback<P: AsRef<Path>>(&self, track: TrackId, path: P) -> EngineResult<()> {
        let path = path.as_ref();
        let mut project = self.project.lock();
        let (shared, node) = {
            let t = project.track(track)?;
            let node = t.source_node().ok_or(EngineError::TrackNotBound(track))?;
            (Arc::clone(t.shared()), node)
        };

        let stream = self
            .streamer
            .open_playback(shared, path, self.transport.position())?;
        let previous = project.graph().with_node_mut(node, |n| {
            n.as_track_source_mut().map(|source| source.bind(stream))
        })?;
        if previous.is_none() {
            return Err(EngineError::TrackNotBound(track));
        }

        project.track_mut(track)?.playback_file = Some(path.to_path_buf());
        log::info!("Track {} armed for playback: {}", track, path.display());
        Ok(())
    }

    /// Create `path` and attach a recorder; recording starts once the track is
    /// moved to [`TrackState::Recording`]
    pub fn arm_recording<P: AsRef<Path>>(&self, track: TrackId, path: P, spec: WavSpec) -> EngineResult<()> {
        let path = path.as_ref();
        let shared = {
            let project = self.project.lock();
            let t = project.track(track)?;
            if t.state() == TrackState::Recording {
                return Err(EngineError::InvalidTransition {
                    track,
                    from: TrackState::Recording,
                    to: TrackState::Recording,
                });
            }
            Arc::clone(t.shared())
        };

        let recorder = self.streamer.open_recording(shared, path, spec)?;
        self.send(EngineCommand::AttachRecorder(Box::new(recorder)))?;
        self.project.lock().track_mut(track)?.record_file = Some(path.to_path_buf());
        log::info!("Track {} armed for recording: {}", track, path.display());
        Ok(())
    }

    /// Ask for a state change, applied at the next block boundary
    pub fn request_track_state(&self, track: TrackId, state: TrackState) -> EngineResult<()> {
        let project = self.project.lock();
        let t = project.track(track)?;
        let armed = match state {
            TrackState::Playing => t.playback_file().is_some(),
            TrackState::Recording => t.record_file().is_some(),
            TrackState::Idle => true,
        };
        if !armed {
            return Err(EngineError::TrackNotBound(track));
        }
        t.request_state(state)
    }

    pub fn track_state(&self, track: TrackId) -> EngineResult<TrackState> {
        Ok(self.project.lock().track(track)?.state())
    }

    /// Underrun and overrun counters of a track
    pub fn track_faults(&self, track: TrackId) -> EngineResult<(u64, u64)> {
        let project = self.project.lock();
        let shared = project.track(track)?.shared();
        Ok((shared.underruns(), shared.overruns()))
    }

    /// Stop recording, flush pending writes and finalize the file.
    /// Returns the number of frames in the file.
    pub fn finish_recording(&self, track: TrackId) -> EngineResult<u64> {
        let shared = {
            let project = self.project.lock();
            let t = project.track(track)?;
            if t.record_file().is_none() {
                return Err(EngineError::TrackNotBound(track));
            }
            Arc::clone(t.shared())
        };
        if shared.state() == TrackState::Recording {
            shared.request(TrackState::Idle)?;
        }

        self.send(EngineCommand::DetachRecorder(track))?;
        self.pump_if_idle();
        self.wait_for_recorder(track)?;

        let frames = self.streamer.finish_recording(track)?;
        log::info!("Track {} recording finished: {} frames", track, frames);
        Ok(frames)
    }

    fn finish_all_recordings(&self) {
        match self.streamer.finish_all_recordings() {
            Ok(results) => {
                for (track, result) in results {
                    if let Err(e) = result {
                        log::error!("Failed to finalize recording of track {}: {}", track, e);
                    }
                }
            }
            Err(e) => log::error!("Failed to finalize recordings: {}", e),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TRANSPORT
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn play(&self) -> EngineResult<()> {
        self.send(EngineCommand::Play)
    }

    /// Stops at the next block boundary
    pub fn stop_transport(&self) -> EngineResult<()> {
        self.send(EngineCommand::Stop)
    }

    pub fn rewind(&self) -> EngineResult<()> {
        self.seek(0)
    }

    /// Move the transport and restart every armed playback stream at `frame`
    pub fn seek(&self, frame: u64) -> EngineResult<()> {
        self.send(EngineCommand::Seek(frame))?;

        let project = self.project.lock();
        for track in project.tracks() {
            let (Some(path), Some(node)) = (track.playback_file(), track.source_node()) else {
                continue;
            };
            let stream = self
                .streamer
                .open_playback(Arc::clone(track.shared()), path, frame)?;
            project.graph().with_node_mut(node, |n| {
                n.as_track_source_mut().map(|source| source.bind(stream))
            })?;
        }
        Ok(())
    }

    pub fn is_playing(&self) -> bool {
        self.transport.is_playing()
    }

    /// Transport position in frames, as of the last processed block
    pub fn position(&self) -> u64 {
        self.transport.position()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // MODE & AUTOMATION
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn set_mode(&self, mode: EngineMode) -> EngineResult<()> {
        log::info!("Engine mode → {:?}", mode);
        self.send(EngineCommand::SetMode(mode))
    }

    pub fn mode(&self) -> EngineMode {
        self.transport.mode()
    }

    pub fn set_legacy_chain(&self, chain: Option<Box<dyn LegacyChain>>) -> EngineResult<()> {
        let chain = chain.map(|mut c| {
            c.prepare(self.sample_rate());
            c
        });
        self.send(EngineCommand::SetLegacyChain(chain))
    }

    /// Resolve `lane` against the graph and hand it to the audio thread
    pub fn add_automation(&self, lane: AutomationLane) -> EngineResult<()> {
        let target = self.project.lock().graph().parameter(lane.node, &lane.param)?;
        self.send(EngineCommand::AddAutomation(Box::new(BoundLane::new(lane, target))))
    }

    pub fn clear_automation(&self) -> EngineResult<()> {
        self.send(EngineCommand::ClearAutomation)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PROCESSING & DEVICE
    // ═══════════════════════════════════════════════════════════════════════════

    /// Render one callback's worth of interleaved stereo on the calling thread
    pub fn process_block(&self, input: &[Sample], output: &mut [Sample]) {
        self.processor.lock().process(input, output);
    }

    /// Open the device stream and start rendering
    pub fn start(&self) -> EngineResult<()> {
        let mut slot = self.stream.lock();
        if slot.is_some() {
            return Ok(());
        }

        let output = match &self.config.output_device {
            Some(name) => get_output_device_by_name(name)?,
            None => get_default_output_device()?,
        };
        let input = if self.config.enable_input {
            Some(match &self.config.input_device {
                Some(name) => get_input_device_by_name(name)?,
                None => get_default_input_device()?,
            })
        } else {
            None
        };

        let processor = Arc::clone(&self.processor);
        let callback: AudioCallback = Box::new(move |input, output| {
            // Output arrives zeroed: a contended processor plays silence
            if let Some(mut processor) = processor.try_lock() {
                processor.process(input, output);
            }
        });

        let stream = AudioStream::new(&output, input.as_ref(), self.config.audio_config(), callback)?;
        stream.start()?;
        *self.device_status.lock() = Some(stream.status());
        *slot = Some(stream);

        log::info!("Audio stream started");
        Ok(())
    }

    /// Close the device stream. Transport and tracks keep their state.
    pub fn stop(&self) -> EngineResult<()> {
        if let Some(stream) = self.stream.lock().take() {
            self.device_status.lock().take();
            stream.stop()?;
            log::info!("Audio stream stopped");
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.is_streaming()
    }

    pub fn meter(&self) -> Arc<MeterData> {
        Arc::clone(&self.meter)
    }

    pub fn stats(&self) -> EngineStatsSnapshot {
        self.stats.snapshot()
    }

    /// Control-thread housekeeping: release garbage, drain streaming faults and
    /// check the device. A device failure aborts the session and is returned.
    pub fn poll(&self) -> EngineResult<Vec<StreamFault>> {
        self.collect_garbage();
        let faults = self.streamer.drain_faults();

        let failure = self
            .device_status
            .lock()
            .as_ref()
            .and_then(|status| status.error());
        if let Some(error) = failure {
            log::error!("Audio device failed: {}", error);
            self.abort_session();
            return Err(error.into());
        }

        Ok(faults)
    }

    /// Drop the stream, idle every track and finalize recordings
    fn abort_session(&self) {
        self.device_status.lock().take();
        if let Some(stream) = self.stream.lock().take() {
            let _ = stream.stop();
        }
        if self.send(EngineCommand::Abort).is_err() {
            log::warn!("Command queue full while aborting; forcing tracks idle");
            for track in self.project.lock().tracks() {
                track.shared().force_state(TrackState::Idle);
            }
        }
        self.pump_if_idle();
        self.collect_garbage();
        self.finish_all_recordings();
    }

    /// Watch `status` as if it belonged to an open device
    #[cfg(test)]
    fn attach_device_status(&self, status: Arc<DeviceStatus>) {
        *self.device_status.lock() = Some(status);
    }

    /// Stop the device, finalize recordings and join the disk worker. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.abort_session();
        self.streamer.shutdown();
        log::info!("Audio engine shut down");
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for AudioEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioEngine")
            .field("config", &self.config)
            .field("playing", &self.is_playing())
            .field("position", &self.position())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeConfig, PortRef};
    use approx::assert_relative_eq;
    use flux_audio::AudioError;
    use flux_file::{BitDepth, WavReader};

    fn engine(block: BufferSize) -> AudioEngine {
        AudioEngine::new(EngineConfig {
            buffer_size: block,
            ..EngineConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_config_serde_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"enable_input": true}"#).unwrap();
        assert!(config.enable_input);
        assert_eq!(config.buffer_size, BufferSize::default());
        assert_eq!(EngineConfig::low_latency().buffer_size, BufferSize::Samples128);
    }

    #[test]
    fn test_commit_graph_takes_effect_next_block() {
        let engine = engine(BufferSize::Samples64);
        let master = engine.master();
        engine.with_graph(|g| {
            let input = g.add_node(NodeConfig::Input);
            g.connect(PortRef::new(input, 0), PortRef::new(master, 0), 0.5).unwrap();
        });

        let mut out = vec![0.0; 128];
        engine.process_block(&[0.8; 128], &mut out);
        assert!(out.iter().all(|&s| s == 0.0));

        engine.commit_graph().unwrap();
        engine.process_block(&[0.8; 128], &mut out);
        assert!(out.iter().all(|&s| (s - 0.4).abs() < 1e-6));
        assert_eq!(engine.collect_garbage(), 1);
    }

    #[test]
    fn test_failed_commit_keeps_running_plan() {
        let engine = engine(BufferSize::Samples64);
        engine.with_graph(|g| g.add_node(NodeConfig::MasterSink));
        assert!(matches!(
            engine.commit_graph(),
            Err(EngineError::Graph(crate::error::GraphError::MultipleSinks(2)))
        ));
        let mut out = vec![1.0; 128];
        engine.process_block(&[], &mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_deferred_stop() {
        let engine = engine(BufferSize::Samples64);
        let mut out = vec![0.0; 128];

        engine.play().unwrap();
        assert!(!engine.is_playing());
        engine.process_block(&[], &mut out);
        assert!(engine.is_playing());
        assert_eq!(engine.position(), 64);

        engine.stop_transport().unwrap();
        assert!(engine.is_playing());
        engine.process_block(&[], &mut out);
        assert!(!engine.is_playing());
        assert_eq!(engine.position(), 64);

        engine.rewind().unwrap();
        engine.process_block(&[], &mut out);
        assert_eq!(engine.position(), 0);
    }

    #[test]
    fn test_automation_drives_parameter() {
        let engine = engine(BufferSize::Samples64);
        let master = engine.master();
        let gain = engine.with_graph(|g| {
            let gain = g.add_node(NodeConfig::gain(1.0));
            g.connect(PortRef::new(gain, 0), PortRef::new(master, 0), 1.0).unwrap();
            gain
        });
        engine.commit_graph().unwrap();
        engine
            .add_automation(AutomationLane::new(gain, "Gain").with_point(0, 0.0).with_point(128, 2.0))
            .unwrap();
        engine.play().unwrap();

        let mut out = vec![0.0; 128];
        engine.process_block(&[], &mut out);
        engine.process_block(&[], &mut out);
        let value = engine.parameter_snapshot()[&gain][0].value;
        assert_relative_eq!(value, 1.0);

        assert!(matches!(
            engine.add_automation(AutomationLane::new(gain, "Nope")),
            Err(EngineError::Graph(_))
        ));
    }

    #[test]
    fn test_track_requests_need_armed_files() {
        let engine = engine(BufferSize::Samples64);
        let track = engine.add_track("Drums").unwrap();
        assert!(matches!(
            engine.request_track_state(track, TrackState::Playing),
            Err(EngineError::TrackNotBound(_))
        ));
        assert!(matches!(
            engine.track_state(TrackId(99)),
            Err(EngineError::UnknownTrack(TrackId(99)))
        ));
        assert_eq!(engine.track_state(track).unwrap(), TrackState::Idle);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let engine = engine(BufferSize::Samples64);
        engine.shutdown();
        engine.shutdown();
        assert!(!engine.is_running());
    }

    #[test]
    fn test_device_failure_aborts_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");

        let engine = engine(BufferSize::Samples64);
        let track = engine.add_track("Mic").unwrap();
        engine
            .arm_recording(track, &path, WavSpec::stereo(44100, BitDepth::Float32))
            .unwrap();
        engine.request_track_state(track, TrackState::Recording).unwrap();

        let mut out = vec![0.0; 128];
        for _ in 0..4 {
            engine.process_block(&[0.25; 128], &mut out);
        }
        assert_eq!(engine.track_state(track).unwrap(), TrackState::Recording);

        let status = Arc::new(DeviceStatus::default());
        engine.attach_device_status(Arc::clone(&status));
        assert!(engine.poll().unwrap().is_empty());

        status.report_failure("output device not available");
        match engine.poll() {
            Err(EngineError::Audio(AudioError::Device(message))) => {
                assert_eq!(message, "output device not available");
            }
            other => panic!("expected device error, got {:?}", other),
        }
        assert_eq!(engine.track_state(track).unwrap(), TrackState::Idle);

        // Finalized with everything captured before the failure
        let mut reader = WavReader::open(&path).unwrap();
        assert_eq!(reader.len_frames(), 256);
        assert!(reader.read_all().unwrap().iter().all(|&s| s == 0.25));

        // Reported once
        assert!(engine.poll().unwrap().is_empty());
    }
}
