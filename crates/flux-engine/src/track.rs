//! Tracks and their lock-free state machine
//!
//! Control threads *request* a state; the audio thread applies requests at the
//! next block boundary. Only Idle↔Playing and Idle↔Recording are legal.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::node::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(pub u32);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackState {
    Idle = 0,
    Playing = 1,
    Recording = 2,
}

/// Marker for "no pending request"
const NO_REQUEST: u8 = u8::MAX;

impl TrackState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => TrackState::Playing,
            2 => TrackState::Recording,
            _ => TrackState::Idle,
        }
    }

    /// Whether `self → next` is a legal move (staying put always is)
    pub fn can_transition_to(self, next: TrackState) -> bool {
        use TrackState::*;
        self == next
            || matches!(
                (self, next),
                (Idle, Playing) | (Playing, Idle) | (Idle, Recording) | (Recording, Idle)
            )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SHARED STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-track atomics shared by the control thread, the audio thread and the
/// disk worker
#[derive(Debug)]
pub struct TrackShared {
    id: TrackId,
    state: AtomicU8,
    requested: AtomicU8,
    play_position: AtomicU64,
    record_position: AtomicU64,
    underruns: AtomicU64,
    overruns: AtomicU64,
    end_of_file: AtomicBool,
}

impl TrackShared {
    pub fn new(id: TrackId) -> Self {
        Self {
            id,
            state: AtomicU8::new(TrackState::Idle as u8),
            requested: AtomicU8::new(NO_REQUEST),
            play_position: AtomicU64::new(0),
            record_position: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            end_of_file: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn id(&self) -> TrackId {
        self.id
    }

    #[inline]
    pub fn state(&self) -> TrackState {
        TrackState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// State the track will have after the next block boundary
    pub fn pending_state(&self) -> Option<TrackState> {
        match self.requested.load(Ordering::Acquire) {
            NO_REQUEST => None,
            value => Some(TrackState::from_u8(value)),
        }
    }

    /// Ask for `next`; validated against the current state, applied later by
    /// [`apply_pending`](Self::apply_pending).
    pub fn request(&self, next: TrackState) -> EngineResult<()> {
        let current = self.state();
        if !current.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                track: self.id,
                from: current,
                to: next,
            });
        }
        self.requested.store(next as u8, Ordering::Release);
        Ok(())
    }

    /// Apply a pending request (audio thread, block boundary).
    /// Returns the new state when it changed.
    pub fn apply_pending(&self) -> Option<TrackState> {
        let requested = self.requested.swap(NO_REQUEST, Ordering::AcqRel);
        if requested == NO_REQUEST {
            return None;
        }
        let next = TrackState::from_u8(requested);
        let current = self.state();
        // The track may have hit end of file since the request was validated
        if current == next || !current.can_transition_to(next) {
            return None;
        }
        if next == TrackState::Playing {
            self.end_of_file.store(false, Ordering::Release);
        }
        self.state.store(next as u8, Ordering::Release);
        Some(next)
    }

    /// Force a state without validation (transport stop, end of file, abort)
    pub(crate) fn force_state(&self, state: TrackState) {
        self.requested.store(NO_REQUEST, Ordering::Release);
        self.state.store(state as u8, Ordering::Release);
    }

    /// End of file reached while playing (audio thread)
    pub(crate) fn mark_end_of_file(&self) {
        self.end_of_file.store(true, Ordering::Release);
        self.state.store(TrackState::Idle as u8, Ordering::Release);
    }

    pub fn is_end_of_file(&self) -> bool {
        self.end_of_file.load(Ordering::Acquire)
    }

    pub fn play_position(&self) -> u64 {
        self.play_position.load(Ordering::Acquire)
    }

    pub(crate) fn set_play_position(&self, frame: u64) {
        self.play_position.store(frame, Ordering::Release);
    }

    pub(crate) fn advance_play_position(&self, frames: u64) {
        self.play_position.fetch_add(frames, Ordering::AcqRel);
    }

    pub fn record_position(&self) -> u64 {
        self.record_position.load(Ordering::Acquire)
    }

    pub(crate) fn advance_record_position(&self, frames: u64) {
        self.record_position.fetch_add(frames, Ordering::AcqRel);
    }

    pub(crate) fn reset_record_position(&self) {
        self.record_position.store(0, Ordering::Release);
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    pub(crate) fn count_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    pub(crate) fn count_overrun(&self) {
        self.overruns.fetch_add(1, Ordering::Relaxed);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRACK
// ═══════════════════════════════════════════════════════════════════════════════

/// Control-side track record
#[derive(Debug, Clone)]
pub struct Track {
    pub name: String,
    shared: Arc<TrackShared>,
    pub(crate) source_node: Option<NodeId>,
    pub(crate) playback_file: Option<PathBuf>,
    pub(crate) record_file: Option<PathBuf>,
}

impl Track {
    pub fn new(id: TrackId, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shared: Arc::new(TrackShared::new(id)),
            source_node: None,
            playback_file: None,
            record_file: None,
        }
    }

    pub fn id(&self) -> TrackId {
        self.shared.id()
    }

    pub fn state(&self) -> TrackState {
        self.shared.state()
    }

    pub fn request_state(&self, state: TrackState) -> EngineResult<()> {
        self.shared.request(state)
    }

    pub fn shared(&self) -> &Arc<TrackShared> {
        &self.shared
    }

    /// TrackSource node feeding this track's audio into the graph
    pub fn source_node(&self) -> Option<NodeId> {
        self.source_node
    }

    pub fn playback_file(&self) -> Option<&PathBuf> {
        self.playback_file.as_ref()
    }

    pub fn record_file(&self) -> Option<&PathBuf> {
        self.record_file.as_ref()
    }
}
