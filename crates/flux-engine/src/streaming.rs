//! Disk streaming for track playback and recording
//!
//! Architecture:
//! ```text
//! ┌───────────────────┐  rtrb (interleaved)  ┌────────────────────┐
//! │ disk worker       │ ───────────────────▶ │ PlaybackStream     │
//! │ "flux-disk-io"    │                      │ (audio thread)     │
//! │  WavReader        │ ◀─────────────────── │ RecordStream       │
//! │  WavWriter        │  rtrb (interleaved)  │                    │
//! └───────────────────┘                      └────────────────────┘
//!          ▲ crossbeam commands                    │ rtrb faults
//!          │                                       ▼
//!     DiskStreamer (control thread) ◀── drain_faults() / log::warn!
//! ```
//!
//! The audio thread never blocks: a short ring means silence and one underrun
//! fault for the block, a full ring means a gap that is written as silence ahead
//! of the next accepted block.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use parking_lot::Mutex;
use rtrb::{Consumer, Producer, RingBuffer};

use flux_core::{Sample, SampleBuffer};
use flux_file::{FileError, FileResult, WavReader, WavSpec, WavWriter};

use crate::track::{TrackId, TrackShared};

// ═══════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════

/// Default playback lookahead per track (~0.75 s @ 44.1kHz)
pub const DEFAULT_RING_BUFFER_FRAMES: usize = 32768;

/// Default record ring per track
pub const DEFAULT_RECORD_RING_FRAMES: usize = 65536;

/// Frames decoded per worker read
pub const DISK_READ_CHUNK_FRAMES: usize = 4096;

/// Faults buffered per stream before the control thread drains them
const FAULT_QUEUE_CAPACITY: usize = 256;

/// Worker poll interval when no commands arrive
const WORKER_IDLE: Duration = Duration::from_millis(2);

/// How long control calls wait for the worker to finish a recording
const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Channel count of playback rings
const PLAYBACK_CHANNELS: usize = 2;

// ═══════════════════════════════════════════════════════════════════════════
// CONFIG & FAULTS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamerConfig {
    pub ring_frames: usize,
    pub record_ring_frames: usize,
    pub chunk_frames: usize,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            ring_frames: DEFAULT_RING_BUFFER_FRAMES,
            record_ring_frames: DEFAULT_RECORD_RING_FRAMES,
            chunk_frames: DISK_READ_CHUNK_FRAMES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamFaultKind {
    /// Playback ring ran dry; the block was filled with silence
    Underrun,
    /// Record ring was full; the block becomes a silent gap in the file
    Overrun,
}

/// One recoverable streaming fault, reported once per affected block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFault {
    pub track: TrackId,
    pub kind: StreamFaultKind,
    /// Track position of the affected block
    pub frame: u64,
}

/// Audio-thread side of a per-stream fault queue
struct FaultSink {
    producer: Producer<StreamFault>,
}

impl FaultSink {
    #[inline]
    fn report(&mut self, fault: StreamFault) {
        // A full queue only loses the report; the track counters still move
        let _ = self.producer.push(fault);
    }
}

/// Worker statistics
#[derive(Debug, Default)]
pub struct StreamerStats {
    pub frames_read: AtomicU64,
    pub frames_written: AtomicU64,
}

struct StreamerShared {
    suspended: AtomicBool,
    stats: StreamerStats,
}

// ═══════════════════════════════════════════════════════════════════════════
// PLAYBACK STREAM (audio thread)
// ═══════════════════════════════════════════════════════════════════════════

/// Outcome of pulling one block from a playback ring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The whole block came from the file
    Full,
    /// Ring ran dry before end of file; missing frames are silent
    Underrun,
    /// File exhausted; the remainder of the block is silent
    EndOfFile,
}

/// Audio-thread reader of one track's playback ring
pub struct PlaybackStream {
    consumer: Consumer<Sample>,
    end_of_file: Arc<AtomicBool>,
    track: Arc<TrackShared>,
    faults: FaultSink,
}

impl PlaybackStream {
    pub fn track(&self) -> TrackId {
        self.track.id()
    }

    pub fn shared(&self) -> &Arc<TrackShared> {
        &self.track
    }

    /// Frames buffered and ready for the audio thread
    pub fn buffered_frames(&self) -> usize {
        self.consumer.slots() / PLAYBACK_CHANNELS
    }

    /// Fill `out` with the next block. Never blocks.
    pub fn read_block(&mut self, out: &mut SampleBuffer) -> ReadOutcome {
        let frames = out.frames();
        // Load before counting slots so data written ahead of the flag is seen
        let end_of_file = self.end_of_file.load(Ordering::Acquire);
        let available = self.consumer.slots() / PLAYBACK_CHANNELS;
        let take = frames.min(available);

        out.clear();
        if take > 0 {
            if let Ok(chunk) = self.consumer.read_chunk(take * PLAYBACK_CHANNELS) {
                let (first, second) = chunk.as_slices();
                let (left, right) = out.stereo_mut();
                for (i, &s) in first.iter().chain(second.iter()).enumerate() {
                    let frame = i / PLAYBACK_CHANNELS;
                    if i % PLAYBACK_CHANNELS == 0 {
                        left[frame] = s;
                    } else if let Some(r) = right.get_mut(frame) {
                        *r = s;
                    }
                }
                chunk.commit_all();
            }
        }

        let position = self.track.play_position();
        self.track.advance_play_position(take as u64);

        if take == frames {
            return ReadOutcome::Full;
        }
        if end_of_file && self.consumer.is_empty() {
            return ReadOutcome::EndOfFile;
        }

        self.track.count_underrun();
        self.faults.report(StreamFault {
            track: self.track.id(),
            kind: StreamFaultKind::Underrun,
            frame: position,
        });
        ReadOutcome::Underrun
    }
}

impl std::fmt::Debug for PlaybackStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackStream")
            .field("track", &self.track.id())
            .field("buffered_frames", &self.buffered_frames())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// RECORD STREAM (audio thread)
// ═══════════════════════════════════════════════════════════════════════════

/// Audio-thread writer of one track's record ring
pub struct RecordStream {
    producer: Producer<Sample>,
    channels: usize,
    /// Frames lost to overruns that still have to reach the file as silence
    pending_gap: u64,
    track: Arc<TrackShared>,
    faults: FaultSink,
}

impl RecordStream {
    pub fn track(&self) -> TrackId {
        self.track.id()
    }

    pub fn shared(&self) -> &Arc<TrackShared> {
        &self.track
    }

    pub fn pending_gap(&self) -> u64 {
        self.pending_gap
    }

    /// Queue one captured block for the disk worker. Never blocks.
    /// Returns false when the block was dropped (overrun).
    pub fn write_block(&mut self, block: &SampleBuffer) -> bool {
        let frames = block.frames();
        let channels = self.channels;
        let position = self.track.record_position();
        self.track.advance_record_position(frames as u64);

        // Close as much of an earlier gap as the ring allows
        if self.pending_gap > 0 {
            let fit = ((self.producer.slots() / channels) as u64).min(self.pending_gap) as usize;
            if fit > 0 {
                if let Ok(mut chunk) = self.producer.write_chunk(fit * channels) {
                    let (first, second) = chunk.as_mut_slices();
                    first.fill(0.0);
                    second.fill(0.0);
                    chunk.commit_all();
                    self.pending_gap -= fit as u64;
                }
            }
        }

        if self.pending_gap > 0 || self.producer.slots() < frames * channels {
            self.pending_gap += frames as u64;
            self.track.count_overrun();
            self.faults.report(StreamFault {
                track: self.track.id(),
                kind: StreamFaultKind::Overrun,
                frame: position,
            });
            return false;
        }

        let Ok(mut chunk) = self.producer.write_chunk(frames * channels) else {
            return false;
        };
        let right = if block.channels() > 1 { 1 } else { 0 };
        let (left_in, right_in) = (block.channel(0), block.channel(right));
        let (first, second) = chunk.as_mut_slices();
        for (i, dst) in first.iter_mut().chain(second.iter_mut()).enumerate() {
            let frame = i / channels;
            *dst = match (channels, i % channels) {
                (1, _) => (left_in[frame] + right_in[frame]) * 0.5,
                (_, 0) => left_in[frame],
                _ => right_in[frame],
            };
        }
        chunk.commit_all();
        true
    }
}

impl std::fmt::Debug for RecordStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStream")
            .field("track", &self.track.id())
            .field("pending_gap", &self.pending_gap)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// WORKER JOBS
// ═══════════════════════════════════════════════════════════════════════════

struct PlaybackJob {
    track: TrackId,
    reader: WavReader,
    producer: Producer<Sample>,
    end_of_file: Arc<AtomicBool>,
    scratch: Vec<Sample>,
}

impl PlaybackJob {
    /// Top up the ring. Returns frames decoded.
    fn fill(&mut self, chunk_frames: usize) -> FileResult<usize> {
        let mut total = 0;

        while !self.end_of_file.load(Ordering::Relaxed) {
            let free = self.producer.slots() / PLAYBACK_CHANNELS;
            if free == 0 {
                break;
            }

            let frames = free.min(chunk_frames);
            self.scratch.resize(frames * PLAYBACK_CHANNELS, 0.0);
            let read = self.reader.read_stereo(&mut self.scratch[..frames * PLAYBACK_CHANNELS])?;

            if read > 0 {
                let samples = read * PLAYBACK_CHANNELS;
                if let Ok(mut chunk) = self.producer.write_chunk(samples) {
                    let (first, second) = chunk.as_mut_slices();
                    let split = first.len();
                    first.copy_from_slice(&self.scratch[..split]);
                    second.copy_from_slice(&self.scratch[split..samples]);
                    chunk.commit_all();
                }
                total += read;
            }

            if read < frames {
                self.end_of_file.store(true, Ordering::Release);
            }
        }

        Ok(total)
    }
}

struct RecordJob {
    track: TrackId,
    consumer: Consumer<Sample>,
    writer: WavWriter,
    scratch: Vec<Sample>,
}

impl RecordJob {
    /// Move everything queued so far into the file. Returns frames written.
    fn drain(&mut self) -> FileResult<usize> {
        let available = self.consumer.slots();
        if available == 0 {
            return Ok(0);
        }

        let Ok(chunk) = self.consumer.read_chunk(available) else {
            return Ok(0);
        };
        let (first, second) = chunk.as_slices();
        self.scratch.clear();
        self.scratch.extend_from_slice(first);
        self.scratch.extend_from_slice(second);
        chunk.commit_all();

        self.writer.write(&self.scratch)
    }

    fn finish(mut self) -> FileResult<u64> {
        self.drain()?;
        let frames = self.writer.finalize()?;
        log::info!(
            "Recording for track {} finalized: {} frames -> {}",
            self.track,
            frames,
            self.writer.path().display()
        );
        Ok(frames)
    }
}

enum WorkerCommand {
    AddPlayback(PlaybackJob),
    ClosePlayback(TrackId),
    AddRecording(RecordJob),
    FinishRecording {
        track: TrackId,
        reply: Sender<FileResult<u64>>,
    },
    FinishAll {
        reply: Sender<Vec<(TrackId, FileResult<u64>)>>,
    },
    Shutdown,
}

struct Worker {
    commands: Receiver<WorkerCommand>,
    shared: Arc<StreamerShared>,
    chunk_frames: usize,
    playback: HashMap<TrackId, PlaybackJob>,
    recording: HashMap<TrackId, RecordJob>,
}

impl Worker {
    fn run(mut self) {
        log::debug!("Disk worker started");

        loop {
            match self.commands.recv_timeout(WORKER_IDLE) {
                Ok(cmd) => {
                    if !self.handle(cmd) {
                        break;
                    }
                    // Handle the rest of the burst before doing I/O
                    let mut running = true;
                    while let Ok(cmd) = self.commands.try_recv() {
                        if !self.handle(cmd) {
                            running = false;
                            break;
                        }
                    }
                    if !running {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if !self.shared.suspended.load(Ordering::Acquire) {
                self.service();
            }
        }

        // Jobs queued behind the shutdown request still get finalized
        while let Ok(cmd) = self.commands.try_recv() {
            self.handle(cmd);
        }

        // Pending writes always reach the disk
        for (_, result) in self.finish_all() {
            if let Err(e) = result {
                log::error!("Failed to finalize recording on shutdown: {}", e);
            }
        }
        log::debug!("Disk worker stopped");
    }

    /// Returns false on shutdown
    fn handle(&mut self, cmd: WorkerCommand) -> bool {
        match cmd {
            WorkerCommand::AddPlayback(job) => {
                self.playback.insert(job.track, job);
            }
            WorkerCommand::ClosePlayback(track) => {
                self.playback.remove(&track);
            }
            WorkerCommand::AddRecording(job) => {
                if let Some(previous) = self.recording.insert(job.track, job) {
                    if let Err(e) = previous.finish() {
                        log::error!("Failed to finalize replaced recording: {}", e);
                    }
                }
            }
            WorkerCommand::FinishRecording { track, reply } => {
                let result = match self.recording.remove(&track) {
                    Some(job) => job.finish(),
                    None => Err(FileError::WriterClosed),
                };
                let _ = reply.send(result);
            }
            WorkerCommand::FinishAll { reply } => {
                let results = self.finish_all();
                let _ = reply.send(results);
            }
            WorkerCommand::Shutdown => return false,
        }
        true
    }

    fn service(&mut self) {
        let chunk_frames = self.chunk_frames;

        self.playback.retain(|track, job| match job.fill(chunk_frames) {
            Ok(read) => {
                self.shared
                    .stats
                    .frames_read
                    .fetch_add(read as u64, Ordering::Relaxed);
                // Keep finished jobs until the audio side lets go of the ring
                !(job.end_of_file.load(Ordering::Relaxed) && job.producer.is_abandoned())
            }
            Err(e) => {
                log::error!("Playback read failed on track {}: {}", track, e);
                job.end_of_file.store(true, Ordering::Release);
                false
            }
        });

        for (track, job) in self.recording.iter_mut() {
            match job.drain() {
                Ok(written) => {
                    self.shared
                        .stats
                        .frames_written
                        .fetch_add(written as u64, Ordering::Relaxed);
                }
                Err(e) => log::error!("Record write failed on track {}: {}", track, e),
            }
        }
    }

    fn finish_all(&mut self) -> Vec<(TrackId, FileResult<u64>)> {
        let mut results: Vec<_> = self
            .recording
            .drain()
            .map(|(track, job)| (track, job.finish()))
            .collect();
        results.sort_by_key(|(track, _)| *track);
        results
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// DISK STREAMER (control thread)
// ═══════════════════════════════════════════════════════════════════════════

/// Owner of the disk worker and the per-track rings
pub struct DiskStreamer {
    config: StreamerConfig,
    commands: Sender<WorkerCommand>,
    shared: Arc<StreamerShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    faults: Mutex<Vec<Consumer<StreamFault>>>,
}

impl DiskStreamer {
    /// Spawn the disk worker
    pub fn new(config: StreamerConfig) -> FileResult<Self> {
        let (commands, receiver) = unbounded();
        let shared = Arc::new(StreamerShared {
            suspended: AtomicBool::new(false),
            stats: StreamerStats::default(),
        });

        let worker = Worker {
            commands: receiver,
            shared: Arc::clone(&shared),
            chunk_frames: config.chunk_frames.max(1),
            playback: HashMap::new(),
            recording: HashMap::new(),
        };

        let handle = thread::Builder::new()
            .name("flux-disk-io".into())
            .spawn(move || worker.run())?;

        Ok(Self {
            config,
            commands,
            shared,
            worker: Mutex::new(Some(handle)),
            faults: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &StreamerConfig {
        &self.config
    }

    pub fn stats(&self) -> &StreamerStats {
        &self.shared.stats
    }

    /// Open `path` for playback from `start_frame`. The ring is primed before
    /// returning, so format problems surface here.
    pub fn open_playback<P: AsRef<Path>>(
        &self,
        track: Arc<TrackShared>,
        path: P,
        start_frame: u64,
    ) -> FileResult<PlaybackStream> {
        let mut reader = WavReader::open(path)?;
        reader.seek(start_frame.min(reader.len_frames()))?;

        let (producer, consumer) = RingBuffer::new(self.config.ring_frames * PLAYBACK_CHANNELS);
        let end_of_file = Arc::new(AtomicBool::new(false));

        let mut job = PlaybackJob {
            track: track.id(),
            reader,
            producer,
            end_of_file: Arc::clone(&end_of_file),
            scratch: Vec::with_capacity(self.config.chunk_frames * PLAYBACK_CHANNELS),
        };
        let primed = job.fill(self.config.chunk_frames.max(1))?;
        log::debug!(
            "Playback primed for track {}: {} frames from {}",
            track.id(),
            primed,
            job.reader.path().display()
        );

        self.send(WorkerCommand::AddPlayback(job))?;
        track.set_play_position(start_frame);

        Ok(PlaybackStream {
            consumer,
            end_of_file,
            faults: self.fault_sink(),
            track,
        })
    }

    /// Stop refilling a track's playback ring
    pub fn close_playback(&self, track: TrackId) -> FileResult<()> {
        self.send(WorkerCommand::ClosePlayback(track))
    }

    /// Create `path` and start accepting record blocks for `track`
    pub fn open_recording<P: AsRef<Path>>(
        &self,
        track: Arc<TrackShared>,
        path: P,
        spec: WavSpec,
    ) -> FileResult<RecordStream> {
        let writer = WavWriter::create(path, spec)?;
        let channels = spec.channels as usize;
        let (producer, consumer) = RingBuffer::new(self.config.record_ring_frames * channels);

        self.send(WorkerCommand::AddRecording(RecordJob {
            track: track.id(),
            consumer,
            writer,
            scratch: Vec::new(),
        }))?;
        track.reset_record_position();

        Ok(RecordStream {
            producer,
            channels,
            pending_gap: 0,
            faults: self.fault_sink(),
            track,
        })
    }

    /// Drain and finalize one recording; returns frames in the file.
    /// The caller must have detached the track's `RecordStream` first.
    pub fn finish_recording(&self, track: TrackId) -> FileResult<u64> {
        let (reply, response) = bounded(1);
        self.send(WorkerCommand::FinishRecording { track, reply })?;
        wait_reply(&response)?
    }

    /// Drain and finalize every open recording
    pub fn finish_all_recordings(&self) -> FileResult<Vec<(TrackId, FileResult<u64>)>> {
        let (reply, response) = bounded(1);
        self.send(WorkerCommand::FinishAll { reply })?;
        wait_reply(&response)
    }

    /// Stall all disk I/O (rings keep their contents)
    pub fn suspend_io(&self) {
        self.shared.suspended.store(true, Ordering::Release);
        log::debug!("Disk I/O suspended");
    }

    pub fn resume_io(&self) {
        self.shared.suspended.store(false, Ordering::Release);
        log::debug!("Disk I/O resumed");
    }

    pub fn is_suspended(&self) -> bool {
        self.shared.suspended.load(Ordering::Acquire)
    }

    /// Collect faults reported by the audio thread, logging each one
    pub fn drain_faults(&self) -> Vec<StreamFault> {
        let mut drained = Vec::new();
        let mut queues = self.faults.lock();

        for queue in queues.iter_mut() {
            while let Ok(fault) = queue.pop() {
                log::warn!(
                    "Stream {:?} on track {} at frame {}",
                    fault.kind,
                    fault.track,
                    fault.frame
                );
                drained.push(fault);
            }
        }
        queues.retain(|q| !q.is_abandoned());

        drained
    }

    /// Finalize every writer and join the worker. Idempotent.
    pub fn shutdown(&self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };

        let _ = self.commands.send(WorkerCommand::Shutdown);
        if handle.join().is_err() {
            log::error!("Disk worker panicked during shutdown");
        }
        log::info!("Disk streamer shut down");
    }

    fn fault_sink(&self) -> FaultSink {
        let (producer, consumer) = RingBuffer::new(FAULT_QUEUE_CAPACITY);
        self.faults.lock().push(consumer);
        FaultSink { producer }
    }

    fn send(&self, cmd: WorkerCommand) -> FileResult<()> {
        self.commands.send(cmd).map_err(|_| {
            FileError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "disk worker is not running",
            ))
        })
    }
}

impl Drop for DiskStreamer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn wait_reply<T>(response: &Receiver<T>) -> FileResult<T> {
    response.recv_timeout(REPLY_TIMEOUT).map_err(|e| {
        FileError::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("disk worker did not reply: {}", e),
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flux_file::BitDepth;
    use std::time::Instant;
    use tempfile::tempdir;

    fn write_ramp(path: &Path, frames: usize) {
        let spec = WavSpec::stereo(44100, BitDepth::Float32);
        let mut writer = WavWriter::create(path, spec).unwrap();
        let samples: Vec<Sample> = (0..frames)
            .flat_map(|i| [i as Sample / 65536.0, -(i as Sample) / 65536.0])
            .collect();
        writer.write(&samples).unwrap();
        writer.finalize().unwrap();
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_playback_reads_file_then_eof() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ramp.wav");
        write_ramp(&path, 100);

        let streamer = DiskStreamer::new(StreamerConfig::default()).unwrap();
        let track = Arc::new(TrackShared::new(TrackId(1)));
        let mut stream = streamer.open_playback(Arc::clone(&track), &path, 0).unwrap();

        let mut block = SampleBuffer::stereo(64);
        assert_eq!(stream.read_block(&mut block), ReadOutcome::Full);
        assert_eq!(block.channel(0)[10], 10.0 / 65536.0);
        assert_eq!(block.channel(1)[10], -10.0 / 65536.0);

        assert_eq!(stream.read_block(&mut block), ReadOutcome::EndOfFile);
        assert_eq!(block.channel(0)[35], 99.0 / 65536.0);
        assert_eq!(block.channel(0)[36], 0.0);
        assert_eq!(track.play_position(), 100);
        assert_eq!(track.underruns(), 0);
    }

    #[test]
    fn test_open_playback_format_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.wav");
        std::fs::write(&path, b"RIFFnope").unwrap();

        let streamer = DiskStreamer::new(StreamerConfig::default()).unwrap();
        let track = Arc::new(TrackShared::new(TrackId(1)));
        let err = streamer.open_playback(track, &path, 0).unwrap_err();
        assert!(err.is_format());
    }

    #[test]
    fn test_underrun_reports_once_per_block() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("long.wav");
        write_ramp(&path, 4096);

        let streamer = DiskStreamer::new(StreamerConfig {
            ring_frames: 256,
            ..StreamerConfig::default()
        })
        .unwrap();
        streamer.suspend_io();

        let track = Arc::new(TrackShared::new(TrackId(7)));
        let mut stream = streamer.open_playback(Arc::clone(&track), &path, 0).unwrap();

        let mut block = SampleBuffer::stereo(128);
        assert_eq!(stream.read_block(&mut block), ReadOutcome::Full);
        assert_eq!(stream.read_block(&mut block), ReadOutcome::Full);
        for _ in 0..3 {
            assert_eq!(stream.read_block(&mut block), ReadOutcome::Underrun);
            assert!(block.is_silent());
        }

        assert_eq!(track.underruns(), 3);
        let faults = streamer.drain_faults();
        assert_eq!(faults.len(), 3);
        assert!(faults.iter().all(|f| f.kind == StreamFaultKind::Underrun));

        streamer.resume_io();
        wait_for(|| stream.buffered_frames() >= 128);
        assert_eq!(stream.read_block(&mut block), ReadOutcome::Full);
    }

    #[test]
    fn test_recording_overrun_keeps_alignment() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rec.wav");

        let streamer = DiskStreamer::new(StreamerConfig {
            record_ring_frames: 8,
            ..StreamerConfig::default()
        })
        .unwrap();
        streamer.suspend_io();

        let track = Arc::new(TrackShared::new(TrackId(2)));
        let spec = WavSpec::stereo(44100, BitDepth::Float32);
        let mut rec = streamer.open_recording(Arc::clone(&track), &path, spec).unwrap();

        let mut block = SampleBuffer::stereo(4);
        block.channel_mut(0).fill(0.5);
        block.channel_mut(1).fill(0.25);

        assert!(rec.write_block(&block));
        assert!(rec.write_block(&block));
        // Ring is full: this block becomes a gap
        assert!(!rec.write_block(&block));
        assert_eq!(rec.pending_gap(), 4);
        assert_eq!(track.overruns(), 1);

        streamer.resume_io();
        wait_for(|| streamer.stats().frames_written.load(Ordering::Relaxed) >= 8);

        // Gap is closed first, then the block lands
        assert!(rec.write_block(&block));
        assert_eq!(rec.pending_gap(), 0);
        drop(rec);

        assert_eq!(streamer.finish_recording(TrackId(2)).unwrap(), 16);
        let samples = WavReader::open(&path).unwrap().read_all().unwrap();
        assert_eq!(&samples[..2], &[0.5, 0.25]);
        assert_eq!(&samples[16..24], &[0.0; 8]);
        assert_eq!(&samples[24..26], &[0.5, 0.25]);
        assert_eq!(track.record_position(), 16);
    }

    #[test]
    fn test_shutdown_drains_pending_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("drain.wav");

        let streamer = DiskStreamer::new(StreamerConfig::default()).unwrap();
        streamer.suspend_io();

        let track = Arc::new(TrackShared::new(TrackId(4)));
        let spec = WavSpec::stereo(48000, BitDepth::Int16);
        let mut rec = streamer.open_recording(track, &path, spec).unwrap();

        let block = SampleBuffer::stereo(100);
        for _ in 0..5 {
            assert!(rec.write_block(&block));
        }
        drop(rec);
        drop(streamer);

        let reader = WavReader::open(&path).unwrap();
        assert_eq!(reader.len_frames(), 500);
    }
}
