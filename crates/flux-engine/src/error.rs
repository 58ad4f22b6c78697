//! Engine error types

use thiserror::Error;

use flux_audio::AudioError;
use flux_core::FluxError;
use flux_file::FileError;

use crate::graph::ConnectionId;
use crate::node::NodeId;
use crate::track::{TrackId, TrackState};

/// Structural errors, raised synchronously by the edit that caused them.
/// A rejected edit leaves the graph untouched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Cycle detected at node {0}")]
    GraphCycle(NodeId),

    #[error("Graph has no master sink")]
    NoSink,

    #[error("Graph has {0} master sinks, expected exactly one")]
    MultipleSinks(usize),

    #[error("Port mismatch: {0}")]
    PortMismatch(String),

    #[error("Node {node} still has {connections} connection(s)")]
    NodeInUse { node: NodeId, connections: usize },

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Connection not found: {0}")]
    ConnectionNotFound(ConnectionId),

    #[error("Unknown plugin type: {0}")]
    UnknownPlugin(String),

    #[error("Node {node} has no parameter named '{name}'")]
    UnknownParameter { node: NodeId, name: String },
}

pub type GraphResult<T> = Result<T, GraphError>;

/// Top-level engine error
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    File(#[from] FileError),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Core(#[from] FluxError),

    #[error("Track {track}: cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        track: TrackId,
        from: TrackState,
        to: TrackState,
    },

    #[error("Unknown track: {0}")]
    UnknownTrack(TrackId),

    #[error("Track {0} has no bound stream")]
    TrackNotBound(TrackId),

    #[error("Engine command queue is full")]
    QueueFull,

    #[error("Timed out waiting for the audio thread")]
    Timeout,
}

impl EngineError {
    /// Device failures end the session; everything else is recoverable
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Audio(e) if e.is_fatal())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
