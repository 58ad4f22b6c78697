//! Disk-streamed track playback as a graph source

use std::sync::Arc;

use flux_core::{Parameter, SampleBuffer};

use crate::node::{NodeKind, NodeProcessor, PortSpec, ProcessContext};
use crate::streaming::{PlaybackStream, ReadOutcome};
use crate::track::{TrackId, TrackState};

/// Pulls the bound track's next block from its playback ring.
///
/// Silent while the track is idle, the transport is stopped or no stream is
/// bound. While the track records, the live input is passed through for
/// monitoring.
pub struct TrackSourceNode {
    track: TrackId,
    stream: Option<PlaybackStream>,
}

impl TrackSourceNode {
    pub fn new(track: TrackId) -> Self {
        Self {
            track,
            stream: None,
        }
    }

    pub fn track(&self) -> TrackId {
        self.track
    }

    pub fn is_bound(&self) -> bool {
        self.stream.is_some()
    }

    /// Attach a playback stream, returning the previous one
    pub fn bind(&mut self, stream: PlaybackStream) -> Option<PlaybackStream> {
        self.stream.replace(stream)
    }

    pub fn unbind(&mut self) -> Option<PlaybackStream> {
        self.stream.take()
    }
}

impl NodeProcessor for TrackSourceNode {
    fn kind(&self) -> NodeKind {
        NodeKind::TrackSource
    }

    fn inputs(&self) -> Vec<PortSpec> {
        Vec::new()
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::stereo("Out")]
    }

    fn parameters(&self) -> Vec<Arc<Parameter>> {
        Vec::new()
    }

    fn reset(&mut self, _sample_rate: f64, _block_size: usize) {}

    fn process(
        &mut self,
        ctx: &ProcessContext<'_>,
        _inputs: &[SampleBuffer],
        outputs: &mut [SampleBuffer],
    ) {
        let (Some(output), Some(stream)) = (outputs.first_mut(), self.stream.as_mut()) else {
            return;
        };

        match stream.shared().state() {
            TrackState::Recording => {
                if let Some(input) = ctx.input {
                    output.copy_from(input);
                }
            }
            TrackState::Playing if ctx.playing => {
                if stream.read_block(output) == ReadOutcome::EndOfFile {
                    stream.shared().mark_end_of_file();
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::{DiskStreamer, StreamerConfig};
    use crate::track::TrackShared;
    use flux_file::{BitDepth, WavSpec, WavWriter};
    use tempfile::tempdir;

    #[test]
    fn test_plays_only_while_playing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dc.wav");
        let mut writer = WavWriter::create(&path, WavSpec::stereo(44100, BitDepth::Float32)).unwrap();
        writer.write(&[0.5; 20]).unwrap();
        writer.finalize().unwrap();

        let streamer = DiskStreamer::new(StreamerConfig::default()).unwrap();
        let shared = Arc::new(TrackShared::new(TrackId(1)));
        let mut node = TrackSourceNode::new(TrackId(1));
        assert!(node.bind(streamer.open_playback(Arc::clone(&shared), &path, 0).unwrap()).is_none());

        let mut ctx = ProcessContext::new(44100.0, 4);
        ctx.playing = true;
        let mut out = [SampleBuffer::stereo(4)];

        // Idle: nothing consumed
        node.process(&ctx, &[], &mut out);
        assert!(out[0].is_silent());
        assert_eq!(shared.play_position(), 0);

        shared.request(TrackState::Playing).unwrap();
        shared.apply_pending();
        node.process(&ctx, &[], &mut out);
        assert_eq!(out[0].channel(0), &[0.5; 4]);

        // 10 frames in the file: 4 + 4 + 2, then end of file
        node.process(&ctx, &[], &mut out);
        out[0].clear();
        node.process(&ctx, &[], &mut out);
        assert_eq!(out[0].channel(1), &[0.5, 0.5, 0.0, 0.0]);
        assert_eq!(shared.state(), TrackState::Idle);
        assert!(shared.is_end_of_file());
        assert_eq!(shared.underruns(), 0);
    }
}
