//! Compiled render plans
//!
//! A [`RenderPlan`] is an immutable snapshot of the graph's structure: execution
//! order, routing table and every buffer the block needs. The engine swaps plans
//! at block boundaries; rendering one never allocates.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use flux_core::{AtomicParam, SampleBuffer};

use crate::node::{FluxNode, NodeId, NodeProcessor, ProcessContext};

/// Node cell shared between the graph model and compiled plans
pub type SharedNode = Arc<Mutex<FluxNode>>;

/// One inbound connection of a step
#[derive(Debug)]
pub(crate) struct Route {
    pub src_step: usize,
    pub src_port: usize,
    pub dst_port: usize,
    pub gain: Arc<AtomicParam>,
}

pub(crate) struct PlanStep {
    pub id: NodeId,
    pub node: SharedNode,
    pub bypass: Arc<AtomicBool>,
    pub is_master: bool,
    pub inputs: Vec<SampleBuffer>,
    pub outputs: Vec<SampleBuffer>,
    pub routes: Vec<Route>,
}

/// How a plan acquires node locks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// `try_lock`; a contended node renders silence for the block
    Realtime,
    /// Wait for the lock (control thread / offline rendering)
    Blocking,
}

pub struct RenderPlan {
    steps: Vec<PlanStep>,
    sample_rate: f64,
    block_size: usize,
    skipped: usize,
}

impl RenderPlan {
    pub(crate) fn new(steps: Vec<PlanStep>, sample_rate: f64, block_size: usize) -> Self {
        Self {
            steps,
            sample_rate,
            block_size,
            skipped: 0,
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Largest block the plan's buffers hold
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn order(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.steps.iter().map(|s| s.id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Nodes skipped in the last render because their lock was held
    pub fn skipped_nodes(&self) -> usize {
        self.skipped
    }

    /// The master sink's mix from the last render
    pub fn output(&self) -> &SampleBuffer {
        // A compiled plan always ends with the master sink, which owns one buffer
        &self.steps[self.steps.len() - 1].outputs[0]
    }

    /// Render one block of `ctx.frames` (≤ `block_size`) frames
    pub fn render(&mut self, ctx: &ProcessContext<'_>, mode: LockMode) -> &SampleBuffer {
        let frames = ctx.frames.min(self.block_size);
        let ctx = &ProcessContext { frames, ..*ctx };
        self.skipped = 0;

        for index in 0..self.steps.len() {
            let (done, rest) = self.steps.split_at_mut(index);
            let step = &mut rest[0];

            for buf in step.inputs.iter_mut() {
                buf.set_frames(frames);
                buf.clear();
            }
            for route in &step.routes {
                let source = &done[route.src_step].outputs[route.src_port];
                step.inputs[route.dst_port].mix_from(source, route.gain.get());
            }
            for buf in step.outputs.iter_mut() {
                buf.set_frames(frames);
                buf.clear();
            }

            let guard = match mode {
                LockMode::Realtime => step.node.try_lock(),
                LockMode::Blocking => Some(step.node.lock()),
            };
            let Some(mut node) = guard else {
                self.skipped += 1;
                continue;
            };

            if !step.is_master && step.bypass.load(Ordering::Relaxed) {
                // Pass-through where the first ports line up, silence otherwise
                if let (Some(input), Some(output)) = (step.inputs.first(), step.outputs.first_mut())
                {
                    if input.channels() == output.channels() {
                        output.copy_from(input);
                    }
                }
                continue;
            }

            node.process(ctx, &step.inputs, &mut step.outputs);
        }

        self.output()
    }
}

impl std::fmt::Debug for RenderPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPlan")
            .field("order", &self.order().collect::<Vec<_>>())
            .field("block_size", &self.block_size)
            .finish()
    }
}
