//! Track playback, disk stalls and recording through the AudioEngine

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use flux_core::BufferSize;
use flux_file::{BitDepth, WavReader, WavSpec, WavWriter};
use flux_engine::{
    AudioEngine, EngineConfig, FluxProject, NodeConfig, PortRef, StreamFaultKind, TrackState,
};
use tempfile::tempdir;

const BLOCK: usize = 64;

fn engine(playback_ring_frames: usize) -> AudioEngine {
    AudioEngine::new(EngineConfig {
        buffer_size: BufferSize::Samples64,
        playback_ring_frames,
        ..EngineConfig::default()
    })
    .unwrap()
}

fn write_dc(path: &Path, frames: usize, level: f32) {
    let mut writer = WavWriter::create(path, WavSpec::stereo(44100, BitDepth::Float32)).unwrap();
    writer.write(&vec![level; frames * 2]).unwrap();
    writer.finalize().unwrap();
}

fn block() -> Vec<f32> {
    vec![0.0; BLOCK * 2]
}

#[test]
fn test_playback_runs_to_end_of_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("dc.wav");
    write_dc(&path, 300, 0.25);

    let engine = engine(32768);
    let track = engine.add_track("Bass").unwrap();
    engine.arm_playback(track, &path).unwrap();
    engine.request_track_state(track, TrackState::Playing).unwrap();
    engine.play().unwrap();

    let mut out = block();
    for _ in 0..4 {
        engine.process_block(&[], &mut out);
        assert!(out.iter().all(|&s| (s - 0.25).abs() < 1e-6));
    }
    assert_eq!(engine.track_state(track).unwrap(), TrackState::Playing);

    // 44 frames left in the file
    engine.process_block(&[], &mut out);
    assert!(out[..88].iter().all(|&s| (s - 0.25).abs() < 1e-6));
    assert!(out[88..].iter().all(|&s| s == 0.0));
    assert_eq!(engine.track_state(track).unwrap(), TrackState::Idle);

    engine.process_block(&[], &mut out);
    assert!(out.iter().all(|&s| s == 0.0));
    assert_eq!(engine.track_faults(track).unwrap(), (0, 0));
    assert!(engine.poll().unwrap().is_empty());
}

#[test]
fn test_stalled_disk_yields_silence_and_one_underrun_per_block() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("long.wav");
    write_dc(&path, 10_000, 0.5);

    // Four blocks of lookahead
    let engine = engine(256);
    let track = engine.add_track("Vox").unwrap();
    engine.arm_playback(track, &path).unwrap();
    engine.streamer().suspend_io();
    engine.request_track_state(track, TrackState::Playing).unwrap();
    engine.play().unwrap();

    let mut out = block();
    for _ in 0..4 {
        engine.process_block(&[], &mut out);
        assert!(out.iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    for _ in 0..3 {
        let started = Instant::now();
        engine.process_block(&[], &mut out);
        // Never waits on the stalled worker
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(out.iter().all(|&s| s == 0.0));
    }

    assert_eq!(engine.track_faults(track).unwrap(), (3, 0));
    let faults = engine.poll().unwrap();
    assert_eq!(faults.len(), 3);
    assert!(faults.iter().all(|f| f.track == track && f.kind == StreamFaultKind::Underrun));
    assert_eq!(engine.track_state(track).unwrap(), TrackState::Playing);

    // Refill resumes once the disk comes back
    engine.streamer().resume_io();
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        engine.process_block(&[], &mut out);
        if out.iter().all(|&s| (s - 0.5).abs() < 1e-6) {
            break;
        }
        assert!(Instant::now() < deadline, "playback never recovered");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_recording_captures_input() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("take.wav");

    let engine = engine(32768);
    let track = engine.add_track("Guitar").unwrap();
    engine
        .arm_recording(track, &path, WavSpec::stereo(44100, BitDepth::Float32))
        .unwrap();
    engine.request_track_state(track, TrackState::Recording).unwrap();

    let mut recorded = Vec::new();
    let mut out = block();
    for b in 0..10 {
        let input: Vec<f32> = (0..BLOCK * 2)
            .map(|i| ((b * BLOCK * 2 + i) as f32 * 0.01).sin() * 0.5)
            .collect();
        engine.process_block(&input, &mut out);
        recorded.extend_from_slice(&input);
    }
    assert_eq!(engine.track_state(track).unwrap(), TrackState::Recording);

    let frames = engine.finish_recording(track).unwrap();
    assert_eq!(frames, 10 * BLOCK as u64);

    engine.process_block(&[], &mut out);
    assert_eq!(engine.track_state(track).unwrap(), TrackState::Idle);

    let mut reader = WavReader::open(&path).unwrap();
    assert_eq!(reader.len_frames(), 640);
    assert_eq!(reader.read_all().unwrap(), recorded);
}

#[test]
fn test_load_project_restores_graph_and_tracks() {
    let source = engine(32768);
    source.add_track("One").unwrap();
    source.add_track("Two").unwrap();
    source.set_master_volume(0.5);
    let snapshot = source.project_snapshot();

    let target = engine(32768);
    target.load_project(&snapshot).unwrap();
    assert_eq!(target.project_snapshot(), snapshot);

    // Restored tracks are live on the audio side
    let mut out = block();
    target.process_block(&[], &mut out);
    assert_eq!(target.collect_garbage(), 1);
}

#[test]
fn test_loaded_project_renders_at_engine_rate() {
    // Input → 1 ms echo → master, saved from a 48 kHz session
    let mut project = FluxProject::new("Echo", 48000.0, BLOCK);
    let master = project.master();
    let graph = project.graph_mut();
    let input = graph.add_node(NodeConfig::Input);
    let echo = graph.add_node(NodeConfig::Delay {
        time: 0.001,
        feedback: 0.0,
        max_time: 0.01,
    });
    graph.set_parameter(echo, "Dry", 0.0).unwrap();
    graph.connect(PortRef::new(input, 0), PortRef::new(echo, 0), 1.0).unwrap();
    graph.connect(PortRef::new(echo, 0), PortRef::new(master, 0), 1.0).unwrap();
    let snapshot = project.snapshot();

    let engine = engine(32768);
    engine.load_project(&snapshot).unwrap();

    let mut input_block = block();
    input_block[0] = 1.0;
    input_block[1] = 1.0;
    let mut out = block();
    engine.process_block(&input_block, &mut out);

    // 1 ms at 44.1 kHz, not 48 samples
    let left: Vec<f32> = out.iter().step_by(2).copied().collect();
    assert_eq!(left[44], 1.0);
    assert!(left.iter().enumerate().all(|(i, &s)| i == 44 || s == 0.0));
    assert_eq!(engine.project_snapshot().graph.sample_rate, 44100.0);
}
