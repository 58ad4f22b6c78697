//! Offline (faster than realtime) rendering of a graph to a WAV file

use std::path::Path;

use flux_file::{BitDepth, WavSpec, WavWriter};

use crate::error::EngineResult;
use crate::graph::FluxGraph;

/// Render options
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OfflineRender {
    /// Frames to render
    pub frames: u64,
    pub bit_depth: BitDepth,
    /// Transport start position
    pub start: u64,
}

impl OfflineRender {
    pub fn new(frames: u64) -> Self {
        Self {
            frames,
            bit_depth: BitDepth::Float32,
            start: 0,
        }
    }

    pub fn seconds(seconds: f64, sample_rate: f64) -> Self {
        Self::new((seconds * sample_rate).round().max(0.0) as u64)
    }
}

/// Render `options.frames` frames of the graph's master mix into a stereo WAV
/// file. The graph is reset first, so repeated renders are identical.
/// Returns frames written.
pub fn render_to_wav<P: AsRef<Path>>(
    graph: &mut FluxGraph,
    path: P,
    options: OfflineRender,
) -> EngineResult<u64> {
    let spec = WavSpec::stereo(graph.sample_rate().round() as u32, options.bit_depth);
    let mut writer = WavWriter::create(path.as_ref(), spec)?;

    graph.reset();
    graph.set_transport(true, options.start);

    let block = graph.block_size();
    let mut interleaved = vec![0.0; block * 2];
    let mut remaining = options.frames;

    while remaining > 0 {
        let frames = (remaining as usize).min(block);
        let mix = graph.process(frames)?;
        let written = mix.write_interleaved(&mut interleaved[..frames * 2], 2);
        writer.write(&interleaved[..written * 2])?;
        remaining -= frames as u64;
    }

    graph.set_transport(false, graph.position());
    let frames = writer.finalize()?;
    log::info!(
        "Rendered {} frames to {}",
        frames,
        path.as_ref().display()
    );
    Ok(frames)
}
