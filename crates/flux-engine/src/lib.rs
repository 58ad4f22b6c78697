//! flux-engine: Flux graph realtime engine
//!
//! Provides:
//! - Node graph with cached topological order and compiled render plans
//! - Built-in nodes (gain, biquad filter, delay, sine, input, track source, master)
//! - Plugin extension point with a type-name registry
//! - Tracks with deferred state changes and disk streaming
//! - Parameter smoothing and automation
//! - AudioEngine tying the graph to a cpal device stream
//! - Offline render to WAV
//!
//! # Threads
//!
//! ```text
//! control thread ──commands (rtrb)──▶ audio thread ──faults (rtrb)──▶ control thread
//!       │                                 │
//!       └──────── crossbeam ──────▶ flux-disk-io ◀── rtrb rings ──┘
//! ```

// Audio code uses explicit indexing over channel buffers
#![allow(clippy::needless_range_loop)]

// Core model
mod error;
pub mod graph;
pub mod node;
pub mod nodes;
pub mod plan;
pub mod plugin;

// Parameters
pub mod automation;
pub mod param_smoother;

// Tracks & disk
pub mod streaming;
pub mod track;

// Engine
pub mod engine;
pub mod offline;
pub mod processor;
pub mod project;
pub mod snapshot;

pub use automation::{AutomationLane, AutomationPoint, BoundLane};
pub use engine::{AudioEngine, EngineConfig};
pub use error::*;
pub use graph::{ConnectionId, FluxConnection, FluxGraph};
pub use node::{
    ChannelLayout, FluxNode, NodeConfig, NodeId, NodeKind, NodeProcessor, NodeSource,
    PortRef, PortSpec, ProcessContext,
};
pub use offline::{OfflineRender, render_to_wav};
pub use plan::{LockMode, RenderPlan};
pub use plugin::{FluxPlugin, OnePoleFilter, PluginNode, PluginRegistry};
pub use processor::{EngineMode, EngineProcessor, EngineStatsSnapshot, LegacyChain};
pub use project::{FluxProject, ProjectSnapshot, TrackDescriptor};
pub use snapshot::{ConnectionDescriptor, GraphSnapshot, NodeDescriptor};
pub use streaming::{
    DiskStreamer, PlaybackStream, ReadOutcome, RecordStream, StreamFault, StreamFaultKind,
    StreamerConfig,
};
pub use track::{Track, TrackId, TrackShared, TrackState};
