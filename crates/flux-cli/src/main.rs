//! Flux command-line front end
//!
//! Usage:
//!   flux devices                     - List output devices
//!   flux render out.wav              - Render the demo graph (or a project) offline
//!   flux play --seconds 5            - Play the demo graph on the default device
//!   flux play --file take.wav        - Stream a WAV file through a track

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};

use flux_audio::list_output_devices;
use flux_core::SampleRate;
use flux_engine::{
    AudioEngine, EngineConfig, FluxGraph, FluxProject, NodeConfig, NodeId, OfflineRender,
    PluginRegistry, PortRef, ProjectSnapshot, TrackState, render_to_wav,
};
use flux_file::BitDepth;

/// Meter and fault polling interval while playing
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "flux", about = "Flux graph audio engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List output devices
    Devices,
    /// Render offline to a WAV file
    Render {
        /// Output file
        output: PathBuf,
        /// Project snapshot (JSON); the demo graph is used when omitted
        #[arg(short, long)]
        project: Option<PathBuf>,
        #[arg(short, long, default_value_t = 5.0)]
        seconds: f64,
        #[arg(long, default_value_t = 440.0)]
        frequency: f32,
        #[arg(long, default_value_t = 44100)]
        sample_rate: u32,
        #[arg(long, value_enum, default_value_t = Depth::Float32)]
        bit_depth: Depth,
    },
    /// Play through the default output device
    Play {
        #[arg(short, long, default_value_t = 5.0)]
        seconds: f64,
        #[arg(long, default_value_t = 440.0)]
        frequency: f32,
        /// Stream this WAV file through a track instead of the demo tone
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Output device name
        #[arg(short, long)]
        device: Option<String>,
        /// 128-frame buffer at 48 kHz
        #[arg(long)]
        low_latency: bool,
    },
    /// Write the demo project as JSON
    Export {
        output: PathBuf,
        #[arg(long, default_value_t = 440.0)]
        frequency: f32,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Depth {
    Int16,
    Int24,
    Int32,
    Float32,
}

impl From<Depth> for BitDepth {
    fn from(depth: Depth) -> Self {
        match depth {
            Depth::Int16 => BitDepth::Int16,
            Depth::Int24 => BitDepth::Int24,
            Depth::Int32 => BitDepth::Int32,
            Depth::Float32 => BitDepth::Float32,
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Devices => list_devices(),
        Commands::Render {
            output,
            project,
            seconds,
            frequency,
            sample_rate,
            bit_depth,
        } => render(&output, project.as_deref(), seconds, frequency, sample_rate, bit_depth),
        Commands::Play {
            seconds,
            frequency,
            file,
            device,
            low_latency,
        } => play(seconds, frequency, file.as_deref(), device, low_latency),
        Commands::Export { output, frequency } => export(&output, frequency),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DEMO GRAPH
// ═══════════════════════════════════════════════════════════════════════════════

/// sine → gain → low-pass → master, with a short echo send
fn build_demo(graph: &mut FluxGraph, master: NodeId, frequency: f32) -> Result<()> {
    let osc = graph.add_node(NodeConfig::oscillator(frequency));
    let gain = graph.add_node(NodeConfig::gain(0.5));
    let filter = graph.add_node(NodeConfig::low_pass(4000.0));
    let echo = graph.add_node(NodeConfig::delay(0.25));

    let port = |node| PortRef::new(node, 0);
    graph.connect(port(osc), port(gain), 1.0)?;
    graph.connect(port(gain), port(filter), 1.0)?;
    graph.connect(port(filter), port(master), 1.0)?;
    graph.connect(port(filter), port(echo), 0.3)?;
    graph.connect(port(echo), port(master), 1.0)?;
    Ok(())
}

fn demo_project(sample_rate: f64, block_size: usize, frequency: f32) -> Result<FluxProject> {
    let mut project = FluxProject::new("Demo", sample_rate, block_size);
    let master = project.master();
    build_demo(project.graph_mut(), master, frequency)?;
    Ok(project)
}

fn load_project(path: &Path) -> Result<FluxProject> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read project {}", path.display()))?;
    let snapshot: ProjectSnapshot = serde_json::from_str(&json)
        .with_context(|| format!("Invalid project file {}", path.display()))?;
    Ok(FluxProject::rebuild(&snapshot, &PluginRegistry::with_builtin())?)
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMMANDS
// ═══════════════════════════════════════════════════════════════════════════════

fn list_devices() -> Result<()> {
    let devices = list_output_devices()?;
    if devices.is_empty() {
        println!("No output devices found");
        return Ok(());
    }

    for device in devices {
        let marker = if device.is_default { "*" } else { " " };
        let rates: Vec<String> = device.sample_rates.iter().map(|r| r.to_string()).collect();
        println!(
            "{} {} ({} ch, {} Hz)",
            marker,
            device.name,
            device.output_channels,
            rates.join("/")
        );
    }
    Ok(())
}

fn render(
    output: &Path,
    project: Option<&Path>,
    seconds: f64,
    frequency: f32,
    sample_rate: u32,
    bit_depth: Depth,
) -> Result<()> {
    let Some(rate) = SampleRate::from_u32(sample_rate) else {
        bail!("Unsupported sample rate: {} Hz", sample_rate);
    };

    let mut project = match project {
        Some(path) => load_project(path)?,
        None => demo_project(rate.as_f64(), 512, frequency)?,
    };
    let graph = project.graph_mut();
    let rate = graph.sample_rate();

    let mut options = OfflineRender::seconds(seconds, rate);
    options.bit_depth = bit_depth.into();

    let started = Instant::now();
    let frames = render_to_wav(graph, output, options)?;
    let elapsed = started.elapsed().as_secs_f64();
    println!(
        "Rendered {:.2} s to {} in {:.3} s ({:.0}x realtime)",
        frames as f64 / rate,
        output.display(),
        elapsed,
        (frames as f64 / rate) / elapsed.max(1e-9)
    );
    Ok(())
}

fn play(
    seconds: f64,
    frequency: f32,
    file: Option<&Path>,
    device: Option<String>,
    low_latency: bool,
) -> Result<()> {
    let mut config = if low_latency {
        EngineConfig::low_latency()
    } else {
        EngineConfig::default()
    };
    config.output_device = device;

    let engine = AudioEngine::new(config)?;
    match file {
        Some(path) => {
            let track = engine.add_track("File")?;
            engine.arm_playback(track, path)?;
            engine.request_track_state(track, TrackState::Playing)?;
        }
        None => {
            let master = engine.master();
            engine.with_graph(|graph| build_demo(graph, master, frequency))?;
            engine.commit_graph()?;
        }
    }

    engine.start()?;
    engine.play()?;
    log::info!("Playing for {:.1} s", seconds);

    let deadline = Instant::now() + Duration::from_secs_f64(seconds.max(0.0));
    while Instant::now() < deadline {
        thread::sleep(POLL_INTERVAL);
        let faults = engine.poll()?;
        let meter = engine.meter().snapshot();
        let stats = engine.stats();
        println!(
            "pos {:>9}  peak {:>6.1} dB  load {:>5.1}%  misses {}  faults {}",
            engine.position(),
            meter.peak_db().0,
            stats.last_load * 100.0,
            stats.deadline_misses,
            faults.len()
        );
    }

    engine.stop_transport()?;
    engine.shutdown();
    Ok(())
}

fn export(output: &Path, frequency: f32) -> Result<()> {
    let project = demo_project(44100.0, 512, frequency)?;
    let json = serde_json::to_string_pretty(&project.snapshot())?;
    fs::write(output, json).with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Wrote {}", output.display());
    Ok(())
}
