//! Flux graph: nodes, connections and execution order
//!
//! The graph is the control-side model. Edits are validated synchronously and a
//! rejected edit leaves the graph untouched. [`FluxGraph::compile`] turns the
//! current structure into a [`RenderPlan`] for the audio thread.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use flux_audio::MeterData;
use flux_core::{AtomicParam, Parameter, SampleBuffer};

use crate::error::{GraphError, GraphResult};
use crate::node::{
    ChannelLayout, FluxNode, NodeConfig, NodeId, NodeKind, NodeProcessor, PortRef, PortSpec,
    ProcessContext,
};
use crate::plan::{LockMode, PlanStep, RenderPlan, Route, SharedNode};
use crate::plugin::{FluxPlugin, PluginNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Directed edge from an output port to an input port
#[derive(Debug, Clone)]
pub struct FluxConnection {
    pub id: ConnectionId,
    pub source: PortRef,
    pub dest: PortRef,
    gain: Arc<AtomicParam>,
}

impl FluxConnection {
    pub fn gain(&self) -> f32 {
        self.gain.get()
    }
}

/// Cached node metadata, readable without locking the node
struct NodeEntry {
    node: SharedNode,
    kind: NodeKind,
    inputs: Vec<PortSpec>,
    outputs: Vec<PortSpec>,
    output_layouts: Vec<ChannelLayout>,
    params: Vec<Arc<Parameter>>,
    bypass: Arc<AtomicBool>,
}

impl NodeEntry {
    fn new(node: FluxNode) -> Self {
        Self {
            kind: node.kind(),
            inputs: node.inputs(),
            outputs: node.outputs(),
            output_layouts: node.output_buffer_layouts(),
            params: node.parameters(),
            bypass: Arc::new(AtomicBool::new(false)),
            node: Arc::new(Mutex::new(node)),
        }
    }
}

pub struct FluxGraph {
    nodes: BTreeMap<NodeId, NodeEntry>,
    connections: BTreeMap<ConnectionId, FluxConnection>,
    order: Option<Vec<NodeId>>,
    plan: Option<RenderPlan>,
    sample_rate: f64,
    block_size: usize,
    playing: bool,
    position: u64,
    next_node_id: u32,
    next_connection_id: u32,
}

impl FluxGraph {
    /// Empty graph (no master sink yet)
    pub fn new(sample_rate: f64, block_size: usize) -> Self {
        Self {
            nodes: BTreeMap::new(),
            connections: BTreeMap::new(),
            order: None,
            plan: None,
            sample_rate,
            block_size: block_size.max(1),
            playing: false,
            position: 0,
            next_node_id: 0,
            next_connection_id: 0,
        }
    }

    /// Graph containing only a master sink
    pub fn with_master(sample_rate: f64, block_size: usize) -> (Self, NodeId) {
        let mut graph = Self::new(sample_rate, block_size);
        let master = graph.add_node(NodeConfig::MasterSink);
        (graph, master)
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // NODES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Add a built-in node. Always succeeds; the node starts unconnected.
    pub fn add_node(&mut self, config: NodeConfig) -> NodeId {
        let node = FluxNode::from_config(&config, self.sample_rate, self.block_size);
        self.insert(node)
    }

    pub fn add_plugin(&mut self, plugin: Box<dyn FluxPlugin>) -> NodeId {
        self.add_node_instance(FluxNode::Plugin(PluginNode::new(plugin)))
    }

    /// Add a pre-built node, prepared for this graph's rate
    pub fn add_node_instance(&mut self, mut node: FluxNode) -> NodeId {
        node.reset(self.sample_rate, self.block_size);
        self.insert(node)
    }

    fn insert(&mut self, node: FluxNode) -> NodeId {
        let id = NodeId(self.next_node_id);
        self.insert_with_id(id, node);
        id
    }

    pub(crate) fn insert_with_id(&mut self, id: NodeId, node: FluxNode) {
        self.next_node_id = self.next_node_id.max(id.0 + 1);
        self.nodes.insert(id, NodeEntry::new(node));
        self.invalidate();
    }

    /// Remove a node together with every connection touching it
    pub fn remove_node(&mut self, id: NodeId) -> GraphResult<()> {
        if !self.nodes.contains_key(&id) {
            return Err(GraphError::NodeNotFound(id));
        }
        self.connections
            .retain(|_, c| c.source.node != id && c.dest.node != id);
        self.nodes.remove(&id);
        self.invalidate();
        log::debug!("Removed node {}", id);
        Ok(())
    }

    /// Remove a node only if nothing is connected to it
    pub fn remove_node_strict(&mut self, id: NodeId) -> GraphResult<()> {
        if !self.nodes.contains_key(&id) {
            return Err(GraphError::NodeNotFound(id));
        }
        let connections = self
            .connections
            .values()
            .filter(|c| c.source.node == id || c.dest.node == id)
            .count();
        if connections > 0 {
            return Err(GraphError::NodeInUse {
                node: id,
                connections,
            });
        }
        self.remove_node(id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Node ids in ascending order
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    /// Shared handle to a node
    pub fn node(&self, id: NodeId) -> Option<SharedNode> {
        self.nodes.get(&id).map(|e| Arc::clone(&e.node))
    }

    pub fn node_kind(&self, id: NodeId) -> Option<NodeKind> {
        self.nodes.get(&id).map(|e| e.kind)
    }

    /// Lock a node and run `f` on it (control thread)
    pub fn with_node_mut<R>(&self, id: NodeId, f: impl FnOnce(&mut FluxNode) -> R) -> GraphResult<R> {
        let entry = self.entry(id)?;
        let mut node = entry.node.lock();
        Ok(f(&mut node))
    }

    pub fn inputs(&self, id: NodeId) -> GraphResult<&[PortSpec]> {
        Ok(&self.entry(id)?.inputs)
    }

    pub fn outputs(&self, id: NodeId) -> GraphResult<&[PortSpec]> {
        Ok(&self.entry(id)?.outputs)
    }

    /// The unique master sink, if there is one
    pub fn master(&self) -> Option<NodeId> {
        let mut sinks = self
            .nodes
            .iter()
            .filter(|(_, e)| e.kind == NodeKind::MasterSink)
            .map(|(id, _)| *id);
        match (sinks.next(), sinks.next()) {
            (Some(id), None) => Some(id),
            _ => None,
        }
    }

    /// Post-clip meter of the master sink
    pub fn master_meter(&self) -> Option<Arc<MeterData>> {
        let master = self.master()?;
        let node = self.nodes.get(&master)?.node.lock();
        node.as_master().map(|m| m.meter())
    }

    fn entry(&self, id: NodeId) -> GraphResult<&NodeEntry> {
        self.nodes.get(&id).ok_or(GraphError::NodeNotFound(id))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PARAMETERS & BYPASS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn parameters(&self, id: NodeId) -> GraphResult<&[Arc<Parameter>]> {
        Ok(&self.entry(id)?.params)
    }

    pub fn parameter(&self, id: NodeId, name: &str) -> GraphResult<Arc<Parameter>> {
        self.entry(id)?
            .params
            .iter()
            .find(|p| p.name() == name)
            .cloned()
            .ok_or_else(|| GraphError::UnknownParameter {
                node: id,
                name: name.to_string(),
            })
    }

    /// Atomic write, picked up by the node on its next block
    pub fn set_parameter(&self, id: NodeId, name: &str, value: f32) -> GraphResult<()> {
        self.parameter(id, name)?.set_value(value);
        Ok(())
    }

    /// Bypassed nodes pass their first input through (silence if layouts differ).
    /// The master sink ignores the flag.
    pub fn set_bypass(&self, id: NodeId, bypass: bool) -> GraphResult<()> {
        self.entry(id)?.bypass.store(bypass, Ordering::Relaxed);
        Ok(())
    }

    pub fn is_bypassed(&self, id: NodeId) -> GraphResult<bool> {
        Ok(self.entry(id)?.bypass.load(Ordering::Relaxed))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CONNECTIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Connect an output port to an input port
    pub fn connect(&mut self, source: PortRef, dest: PortRef, gain: f32) -> GraphResult<ConnectionId> {
        let id = ConnectionId(self.next_connection_id);
        self.connect_with_id(id, source, dest, gain)?;
        Ok(id)
    }

    pub(crate) fn connect_with_id(
        &mut self,
        id: ConnectionId,
        source: PortRef,
        dest: PortRef,
        gain: f32,
    ) -> GraphResult<()> {
        self.validate_connection(source, dest)?;

        self.next_connection_id = self.next_connection_id.max(id.0 + 1);
        self.connections.insert(
            id,
            FluxConnection {
                id,
                source,
                dest,
                gain: Arc::new(AtomicParam::new(gain)),
            },
        );
        self.invalidate();
        Ok(())
    }

    fn validate_connection(&self, source: PortRef, dest: PortRef) -> GraphResult<()> {
        let src = self.entry(source.node)?;
        let dst = self.entry(dest.node)?;

        let src_port = src.outputs.get(source.port).ok_or_else(|| {
            GraphError::PortMismatch(format!(
                "node {} has no output port {}",
                source.node, source.port
            ))
        })?;
        let dst_port = dst.inputs.get(dest.port).ok_or_else(|| {
            GraphError::PortMismatch(format!(
                "node {} has no input port {}",
                dest.node, dest.port
            ))
        })?;
        if src_port.layout != dst_port.layout {
            return Err(GraphError::PortMismatch(format!(
                "{:?} output '{}' cannot feed {:?} input '{}'",
                src_port.layout, src_port.name, dst_port.layout, dst_port.name
            )));
        }
        if self
            .connections
            .values()
            .any(|c| c.source == source && c.dest == dest)
        {
            return Err(GraphError::PortMismatch(format!(
                "{}:{} is already connected to {}:{}",
                source.node, source.port, dest.node, dest.port
            )));
        }
        if source.node == dest.node || self.reaches(dest.node, source.node) {
            return Err(GraphError::GraphCycle(source.node));
        }
        Ok(())
    }

    /// Whether a path `from → … → to` exists
    fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::from([from]);

        while let Some(id) = queue.pop_front() {
            if id == to {
                return true;
            }
            if !visited.insert(id) {
                continue;
            }
            queue.extend(
                self.connections
                    .values()
                    .filter(|c| c.source.node == id)
                    .map(|c| c.dest.node),
            );
        }
        false
    }

    pub fn disconnect(&mut self, id: ConnectionId) -> GraphResult<()> {
        self.connections
            .remove(&id)
            .ok_or(GraphError::ConnectionNotFound(id))?;
        self.invalidate();
        Ok(())
    }

    /// Atomic gain change; no recompile needed
    pub fn set_connection_gain(&self, id: ConnectionId, gain: f32) -> GraphResult<()> {
        self.connections
            .get(&id)
            .ok_or(GraphError::ConnectionNotFound(id))?
            .gain
            .set(gain);
        Ok(())
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&FluxConnection> {
        self.connections.get(&id)
    }

    pub fn connections(&self) -> impl Iterator<Item = &FluxConnection> {
        self.connections.values()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ORDERING & COMPILATION
    // ═══════════════════════════════════════════════════════════════════════════

    /// True when the cached order needs recomputing
    pub fn is_dirty(&self) -> bool {
        self.order.is_none()
    }

    fn invalidate(&mut self) {
        self.order = None;
        self.plan = None;
    }

    /// Topological order (Kahn, ties by ascending id) with the master sink last
    pub fn compute_order(&mut self) -> GraphResult<&[NodeId]> {
        if self.order.is_none() {
            self.order = Some(self.kahn_order()?);
        }
        Ok(self.order.as_deref().unwrap_or_default())
    }

    fn kahn_order(&self) -> GraphResult<Vec<NodeId>> {
        let sinks: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(_, e)| e.kind == NodeKind::MasterSink)
            .map(|(id, _)| *id)
            .collect();
        let master = match sinks.as_slice() {
            [] => return Err(GraphError::NoSink),
            [master] => *master,
            many => return Err(GraphError::MultipleSinks(many.len())),
        };

        let mut in_degree: BTreeMap<NodeId, usize> = self.nodes.keys().map(|&id| (id, 0)).collect();
        let mut outgoing: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
        for c in self.connections.values() {
            *in_degree.entry(c.dest.node).or_default() += 1;
            outgoing.entry(c.source.node).or_default().push(c.dest.node);
        }

        // The sink is held back so it is always emitted last
        let mut ready: BTreeSet<NodeId> = in_degree
            .iter()
            .filter(|&(&id, &deg)| deg == 0 && id != master)
            .map(|(&id, _)| id)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(id) = ready.pop_first() {
            order.push(id);
            for &next in outgoing.get(&id).map(Vec::as_slice).unwrap_or_default() {
                if let Some(deg) = in_degree.get_mut(&next) {
                    *deg -= 1;
                    if *deg == 0 && next != master {
                        ready.insert(next);
                    }
                }
            }
        }

        if in_degree.get(&master).copied() == Some(0) {
            order.push(master);
        }

        if order.len() != self.nodes.len() {
            let stuck = self
                .nodes
                .keys()
                .find(|id| !order.contains(id))
                .copied()
                .unwrap_or(master);
            return Err(GraphError::GraphCycle(stuck));
        }
        if order.last() != Some(&master) {
            return Err(GraphError::NoSink);
        }
        Ok(order)
    }

    /// Validate the graph and build a render plan with fresh buffers
    pub fn compile(&mut self) -> GraphResult<RenderPlan> {
        let order = self.compute_order()?.to_vec();
        let block = self.block_size;
        let index: HashMap<NodeId, usize> = order.iter().enumerate().map(|(i, &id)| (id, i)).collect();

        let mut steps = Vec::with_capacity(order.len());
        for &id in &order {
            let entry = self.entry(id)?;
            let routes = self
                .connections
                .values()
                .filter(|c| c.dest.node == id)
                .filter_map(|c| {
                    Some(Route {
                        src_step: *index.get(&c.source.node)?,
                        src_port: c.source.port,
                        dst_port: c.dest.port,
                        gain: Arc::clone(&c.gain),
                    })
                })
                .collect();

            steps.push(PlanStep {
                id,
                node: Arc::clone(&entry.node),
                bypass: Arc::clone(&entry.bypass),
                is_master: entry.kind == NodeKind::MasterSink,
                inputs: entry
                    .inputs
                    .iter()
                    .map(|p| SampleBuffer::new(p.layout.channels(), block))
                    .collect(),
                outputs: entry
                    .output_layouts
                    .iter()
                    .map(|l| SampleBuffer::new(l.channels(), block))
                    .collect(),
                routes,
            });
        }

        log::debug!("Compiled render plan: {} nodes, block {}", steps.len(), block);
        Ok(RenderPlan::new(steps, self.sample_rate, block))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PROCESSING
    // ═══════════════════════════════════════════════════════════════════════════

    /// Change sample rate / block size; clears every node's DSP state
    pub fn prepare(&mut self, sample_rate: f64, block_size: usize) {
        self.sample_rate = sample_rate;
        self.block_size = block_size.max(1);
        self.plan = None;
        self.reset();
    }

    /// Clear DSP state of every node
    pub fn reset(&mut self) {
        for entry in self.nodes.values() {
            entry.node.lock().reset(self.sample_rate, self.block_size);
        }
        self.position = 0;
    }

    /// Transport state seen by nodes during [`process`](Self::process)
    pub fn set_transport(&mut self, playing: bool, position: u64) {
        self.playing = playing;
        self.position = position;
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Render one block on the calling thread; returns the master sink's mix
    pub fn process(&mut self, frames: usize) -> GraphResult<&SampleBuffer> {
        self.render(frames, None)
    }

    /// Like [`process`](Self::process) with a live input block for Input nodes
    pub fn process_with_input(&mut self, frames: usize, input: &SampleBuffer) -> GraphResult<&SampleBuffer> {
        self.render(frames, Some(input))
    }

    fn render(&mut self, frames: usize, input: Option<&SampleBuffer>) -> GraphResult<&SampleBuffer> {
        if frames > self.block_size {
            self.block_size = frames;
            self.plan = None;
        }
        if self.plan.is_none() {
            self.plan = Some(self.compile()?);
        }

        let ctx = ProcessContext {
            sample_rate: self.sample_rate,
            frames,
            position: self.position,
            playing: self.playing,
            input,
        };
        if self.playing {
            self.position += frames as u64;
        }

        match self.plan.as_mut() {
            Some(plan) => Ok(plan.render(&ctx, LockMode::Blocking)),
            None => Err(GraphError::NoSink),
        }
    }
}

impl fmt::Debug for FluxGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FluxGraph")
            .field("nodes", &self.nodes.len())
            .field("connections", &self.connections.len())
            .field("sample_rate", &self.sample_rate)
            .field("block_size", &self.block_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::FilterMode;

    fn out(node: NodeId) -> PortRef {
        PortRef::new(node, 0)
    }

    fn inp(node: NodeId) -> PortRef {
        PortRef::new(node, 0)
    }

    #[test]
    fn test_order_is_topological_with_master_last() {
        let (mut graph, master) = FluxGraph::with_master(44100.0, 64);
        let osc = graph.add_node(NodeConfig::oscillator(440.0));
        let filter = graph.add_node(NodeConfig::low_pass(800.0));
        let gain = graph.add_node(NodeConfig::gain(0.5));

        graph.connect(out(osc), inp(filter), 1.0).unwrap();
        graph.connect(out(filter), inp(gain), 1.0).unwrap();
        graph.connect(out(gain), inp(master), 1.0).unwrap();

        assert_eq!(graph.compute_order().unwrap(), &[osc, filter, gain, master]);
    }

    #[test]
    fn test_ties_break_by_ascending_id() {
        let (mut graph, master) = FluxGraph::with_master(44100.0, 64);
        let a = graph.add_node(NodeConfig::oscillator(100.0));
        let b = graph.add_node(NodeConfig::oscillator(200.0));
        let dangling = graph.add_node(NodeConfig::gain(1.0));
        graph.connect(out(b), inp(master), 1.0).unwrap();
        graph.connect(out(a), inp(master), 1.0).unwrap();

        assert_eq!(graph.compute_order().unwrap(), &[a, b, dangling, master]);
    }

    #[test]
    fn test_cycle_rejected_without_mutation() {
        let (mut graph, master) = FluxGraph::with_master(44100.0, 64);
        let g1 = graph.add_node(NodeConfig::gain(1.0));
        let g2 = graph.add_node(NodeConfig::gain(1.0));
        graph.connect(out(g1), inp(g2), 1.0).unwrap();
        graph.connect(out(g2), inp(master), 1.0).unwrap();
        graph.compute_order().unwrap();

        assert_eq!(graph.connect(out(g2), inp(g1), 1.0), Err(GraphError::GraphCycle(g2)));
        assert_eq!(graph.connect(out(g1), inp(g1), 1.0), Err(GraphError::GraphCycle(g1)));
        assert_eq!(graph.connections().count(), 2);
        assert!(!graph.is_dirty());
    }

    #[test]
    fn test_port_mismatch_cases() {
        let (mut graph, master) = FluxGraph::with_master(44100.0, 64);
        let mono = graph.add_node(NodeConfig::Oscillator {
            frequency: 440.0,
            layout: ChannelLayout::Mono,
        });
        let gain = graph.add_node(NodeConfig::gain(1.0));

        // Layout
        assert!(matches!(
            graph.connect(out(mono), inp(gain), 1.0),
            Err(GraphError::PortMismatch(_))
        ));
        // Master has no outputs
        assert!(matches!(
            graph.connect(out(master), inp(gain), 1.0),
            Err(GraphError::PortMismatch(_))
        ));
        // Oscillator has no inputs
        assert!(matches!(
            graph.connect(out(gain), inp(mono), 1.0),
            Err(GraphError::PortMismatch(_))
        ));
        // Duplicate
        graph.connect(out(gain), inp(master), 1.0).unwrap();
        assert!(matches!(
            graph.connect(out(gain), inp(master), 1.0),
            Err(GraphError::PortMismatch(_))
        ));
        assert_eq!(
            graph.connect(out(gain), inp(NodeId(99)), 1.0),
            Err(GraphError::NodeNotFound(NodeId(99)))
        );
    }

    #[test]
    fn test_sink_errors() {
        let mut graph = FluxGraph::new(44100.0, 64);
        graph.add_node(NodeConfig::gain(1.0));
        assert_eq!(graph.compute_order().unwrap_err(), GraphError::NoSink);

        graph.add_node(NodeConfig::MasterSink);
        graph.add_node(NodeConfig::MasterSink);
        assert_eq!(graph.compute_order().unwrap_err(), GraphError::MultipleSinks(2));
        assert!(graph.process(64).is_err());
    }

    #[test]
    fn test_remove_node_cascades() {
        let (mut graph, master) = FluxGraph::with_master(44100.0, 64);
        let osc = graph.add_node(NodeConfig::oscillator(440.0));
        let gain = graph.add_node(NodeConfig::gain(1.0));
        graph.connect(out(osc), inp(gain), 1.0).unwrap();
        graph.connect(out(gain), inp(master), 1.0).unwrap();

        assert_eq!(
            graph.remove_node_strict(gain),
            Err(GraphError::NodeInUse {
                node: gain,
                connections: 2
            })
        );
        graph.remove_node(gain).unwrap();
        assert_eq!(graph.connections().count(), 0);
        assert!(!graph.contains(gain));
        assert_eq!(graph.remove_node(gain), Err(GraphError::NodeNotFound(gain)));

        // Ids are never reused
        let next = graph.add_node(NodeConfig::gain(1.0));
        assert!(next > gain);
    }

    #[test]
    fn test_connection_gain_and_disconnect() {
        let (mut graph, master) = FluxGraph::with_master(44100.0, 4);
        let osc = graph.add_node(NodeConfig::oscillator(440.0));
        let conn = graph.connect(out(osc), inp(master), 1.0).unwrap();

        let full = graph.process(4).unwrap().channel(0)[1];
        graph.set_connection_gain(conn, 0.5).unwrap();
        graph.reset();
        let half = graph.process(4).unwrap().channel(0)[1];
        assert!((half - full * 0.5).abs() < 1e-6);

        graph.disconnect(conn).unwrap();
        assert!(graph.process(4).unwrap().is_silent());
        assert_eq!(graph.disconnect(conn), Err(GraphError::ConnectionNotFound(conn)));
    }

    #[test]
    fn test_bypass_passes_input_through() {
        let (mut graph, master) = FluxGraph::with_master(44100.0, 16);
        let osc = graph.add_node(NodeConfig::oscillator(1000.0));
        let filter = graph.add_node(NodeConfig::Filter {
            mode: FilterMode::HighPass,
            cutoff: 20000.0,
            resonance: 0.707,
        });
        graph.connect(out(osc), inp(filter), 1.0).unwrap();
        graph.connect(out(filter), inp(master), 1.0).unwrap();

        graph.set_bypass(filter, true).unwrap();
        let bypassed = graph.process(16).unwrap().clone();
        graph.reset();
        graph.set_bypass(filter, false).unwrap();
        let filtered = graph.process(16).unwrap().clone();

        let expected = (std::f64::consts::TAU * 1000.0 * 3.0 / 44100.0).sin() as f32;
        assert!((bypassed.channel(0)[3] - expected).abs() < 1e-6);
        assert_ne!(bypassed, filtered);
    }

    #[test]
    fn test_unknown_parameter() {
        let (mut graph, _) = FluxGraph::with_master(44100.0, 16);
        let gain = graph.add_node(NodeConfig::gain(1.0));
        graph.set_parameter(gain, "Gain", 0.3).unwrap();
        assert_eq!(graph.parameter(gain, "Gain").unwrap().value(), 0.3);
        assert!(matches!(
            graph.set_parameter(gain, "Cutoff", 1.0),
            Err(GraphError::UnknownParameter { .. })
        ));
    }

    #[test]
    fn test_input_node_reads_live_block() {
        let (mut graph, master) = FluxGraph::with_master(44100.0, 4);
        let input = graph.add_node(NodeConfig::Input);
        graph.connect(out(input), inp(master), 1.0).unwrap();

        let mut live = SampleBuffer::stereo(4);
        live.channel_mut(0).copy_from_slice(&[0.1, 0.2, 0.3, 0.4]);
        let mix = graph.process_with_input(4, &live).unwrap();
        assert_eq!(mix.channel(0), &[0.1, 0.2, 0.3, 0.4]);
    }
}
