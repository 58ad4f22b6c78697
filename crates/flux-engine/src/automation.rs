//! Parameter automation
//!
//! Lanes hold breakpoints in frames and plain parameter units. The engine
//! samples each lane at every block boundary while the transport plays.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use flux_core::Parameter;

use crate::node::NodeId;

/// Single breakpoint
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AutomationPoint {
    /// Timeline position in frames
    pub frame: u64,
    /// Plain parameter value
    pub value: f32,
}

impl AutomationPoint {
    pub fn new(frame: u64, value: f32) -> Self {
        Self { frame, value }
    }
}

/// Breakpoint lane targeting one node parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationLane {
    pub node: NodeId,
    pub param: String,
    /// Sorted by frame
    points: Vec<AutomationPoint>,
    pub enabled: bool,
}

impl AutomationLane {
    pub fn new(node: NodeId, param: impl Into<String>) -> Self {
        Self {
            node,
            param: param.into(),
            points: Vec::new(),
            enabled: true,
        }
    }

    /// Builder form of [`add_point`](Self::add_point)
    pub fn with_point(mut self, frame: u64, value: f32) -> Self {
        self.add_point(AutomationPoint::new(frame, value));
        self
    }

    /// Insert keeping frame order; a point at an existing frame replaces it
    pub fn add_point(&mut self, point: AutomationPoint) {
        match self.points.binary_search_by_key(&point.frame, |p| p.frame) {
            Ok(idx) => self.points[idx] = point,
            Err(idx) => self.points.insert(idx, point),
        }
    }

    pub fn remove_point_at(&mut self, frame: u64) -> bool {
        match self.points.binary_search_by_key(&frame, |p| p.frame) {
            Ok(idx) => {
                self.points.remove(idx);
                true
            }
            Err(_) => false,
        }
    }

    pub fn points(&self) -> &[AutomationPoint] {
        &self.points
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Linear interpolation; held flat before the first and after the last point
    pub fn value_at(&self, frame: u64) -> Option<f32> {
        let first = self.points.first()?;
        let last = self.points.last()?;
        if frame <= first.frame {
            return Some(first.value);
        }
        if frame >= last.frame {
            return Some(last.value);
        }

        let idx = self.points.partition_point(|p| p.frame <= frame);
        let (a, b) = (self.points[idx - 1], self.points[idx]);
        let t = (frame - a.frame) as f64 / (b.frame - a.frame) as f64;
        Some(a.value + (b.value - a.value) * t as f32)
    }
}

/// Lane resolved against a live parameter, owned by the audio thread
#[derive(Debug)]
pub struct BoundLane {
    pub(crate) lane: AutomationLane,
    pub(crate) target: Arc<Parameter>,
}

impl BoundLane {
    pub fn new(lane: AutomationLane, target: Arc<Parameter>) -> Self {
        Self { lane, target }
    }

    pub fn lane(&self) -> &AutomationLane {
        &self.lane
    }

    /// Write the lane's value at `frame` into the parameter
    pub fn apply(&self, frame: u64) {
        if !self.lane.enabled {
            return;
        }
        if let Some(value) = self.lane.value_at(frame) {
            self.target.set_value(value);
        }
    }
}
