//! Project aggregate: graph, tracks and top-level parameters

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use flux_core::{ParamInfo, ParamRange, Parameter};

use crate::error::{EngineError, EngineResult, GraphResult};
use crate::graph::FluxGraph;
use crate::node::{NodeConfig, NodeId, PortRef};
use crate::plugin::PluginRegistry;
use crate::snapshot::GraphSnapshot;
use crate::track::{Track, TrackId};

pub const MASTER_VOLUME: &str = "Master Volume";
pub const TEMPO: &str = "Tempo";

/// Persisted track binding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackDescriptor {
    pub id: TrackId,
    pub name: String,
    pub source_node: Option<NodeId>,
    pub playback_file: Option<PathBuf>,
    pub record_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub name: String,
    pub graph: GraphSnapshot,
    pub tracks: Vec<TrackDescriptor>,
    pub parameters: Vec<ParamInfo>,
}

pub struct FluxProject {
    pub name: String,
    graph: FluxGraph,
    master: NodeId,
    tracks: Vec<Track>,
    master_volume: Arc<Parameter>,
    tempo: Arc<Parameter>,
    next_track_id: u32,
}

impl FluxProject {
    /// Empty project whose graph holds only the master sink
    pub fn new(name: impl Into<String>, sample_rate: f64, block_size: usize) -> Self {
        let (graph, master) = FluxGraph::with_master(sample_rate, block_size);
        Self {
            name: name.into(),
            graph,
            master,
            tracks: Vec::new(),
            master_volume: Arc::new(Parameter::new(
                MASTER_VOLUME,
                ParamRange::linear(0.0, 1.5, 1.0),
            )),
            tempo: Arc::new(
                Parameter::new(TEMPO, ParamRange::linear(20.0, 999.0, 120.0)).with_unit("BPM"),
            ),
            next_track_id: 1,
        }
    }

    pub fn graph(&self) -> &FluxGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut FluxGraph {
        &mut self.graph
    }

    /// Master sink created with the project
    pub fn master(&self) -> NodeId {
        self.master
    }

    pub fn master_volume(&self) -> &Arc<Parameter> {
        &self.master_volume
    }

    pub fn tempo(&self) -> &Arc<Parameter> {
        &self.tempo
    }

    /// Adopt an existing master volume handle, carrying over this project's value
    pub(crate) fn share_master_volume(&mut self, param: &Arc<Parameter>) {
        param.set_value(self.master_volume.value());
        self.master_volume = Arc::clone(param);
    }

    /// Top-level parameters
    pub fn parameters(&self) -> [&Arc<Parameter>; 2] {
        [&self.master_volume, &self.tempo]
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TRACKS
    // ═══════════════════════════════════════════════════════════════════════════

    /// New idle track with a TrackSource node routed to the master
    pub fn add_track(&mut self, name: impl Into<String>) -> GraphResult<TrackId> {
        let id = TrackId(self.next_track_id);
        let node = self.graph.add_node(NodeConfig::TrackSource { track: id });
        if let Err(e) = self
            .graph
            .connect(PortRef::new(node, 0), PortRef::new(self.master, 0), 1.0)
        {
            let _ = self.graph.remove_node(node);
            return Err(e);
        }

        self.next_track_id += 1;
        let mut track = Track::new(id, name);
        track.source_node = Some(node);
        log::info!("Added track {} '{}'", id, track.name);
        self.tracks.push(track);
        Ok(id)
    }

    pub fn track(&self, id: TrackId) -> EngineResult<&Track> {
        self.tracks
            .iter()
            .find(|t| t.id() == id)
            .ok_or(EngineError::UnknownTrack(id))
    }

    pub fn track_mut(&mut self, id: TrackId) -> EngineResult<&mut Track> {
        self.tracks
            .iter_mut()
            .find(|t| t.id() == id)
            .ok_or(EngineError::UnknownTrack(id))
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PERSISTENCE
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn snapshot(&self) -> ProjectSnapshot {
        ProjectSnapshot {
            name: self.name.clone(),
            graph: self.graph.snapshot(),
            tracks: self
                .tracks
                .iter()
                .map(|t| TrackDescriptor {
                    id: t.id(),
                    name: t.name.clone(),
                    source_node: t.source_node,
                    playback_file: t.playback_file.clone(),
                    record_file: t.record_file.clone(),
                })
                .collect(),
            parameters: self.parameters().iter().map(|p| p.info()).collect(),
        }
    }

    /// Rebuild from a snapshot. Tracks come back idle; playback files are
    /// remembered but must be re-armed.
    pub fn rebuild(snapshot: &ProjectSnapshot, registry: &PluginRegistry) -> EngineResult<Self> {
        let graph = FluxGraph::rebuild(&snapshot.graph, registry)?;
        let master = graph.master().ok_or(crate::error::GraphError::NoSink)?;

        let mut project = Self::new(snapshot.name.clone(), graph.sample_rate(), graph.block_size());
        project.graph = graph;
        project.master = master;

        for desc in &snapshot.tracks {
            let mut track = Track::new(desc.id, desc.name.clone());
            track.source_node = desc.source_node;
            track.playback_file = desc.playback_file.clone();
            track.record_file = desc.record_file.clone();
            project.next_track_id = project.next_track_id.max(desc.id.0 + 1);
            project.tracks.push(track);
        }

        for info in &snapshot.parameters {
            if let Some(param) = project.parameters().into_iter().find(|p| p.name() == info.name) {
                param.set_value(info.value);
            }
        }

        Ok(project)
    }
}

impl std::fmt::Debug for FluxProject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FluxProject")
            .field("name", &self.name)
            .field("graph", &self.graph)
            .field("tracks", &self.tracks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeKind;

    #[test]
    fn test_add_track_routes_to_master() {
        let mut project = FluxProject::new("Demo", 48000.0, 128);
        let id = project.add_track("Vocals").unwrap();
        let node = project.track(id).unwrap().source_node().unwrap();

        assert_eq!(project.graph().node_kind(node), Some(NodeKind::TrackSource));
        assert!(project
            .graph()
            .connections()
            .any(|c| c.source.node == node && c.dest.node == project.master()));
        assert!(matches!(
            project.track(TrackId(42)),
            Err(EngineError::UnknownTrack(TrackId(42)))
        ));
    }

    #[test]
    fn test_snapshot_rebuild() {
        let mut project = FluxProject::new("Session", 44100.0, 64);
        let a = project.add_track("A").unwrap();
        project.track_mut(a).unwrap().playback_file = Some(PathBuf::from("a.wav"));
        project.tempo().set_value(96.0);

        let snapshot = project.snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: ProjectSnapshot = serde_json::from_str(&json).unwrap();

        let mut rebuilt = FluxProject::rebuild(&back, &PluginRegistry::with_builtin()).unwrap();
        assert_eq!(rebuilt.snapshot(), snapshot);
        assert_eq!(rebuilt.tempo().value(), 96.0);

        let b = rebuilt.add_track("B").unwrap();
        assert!(b > a);
    }
}
