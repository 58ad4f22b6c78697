//! Lock-free level metering for control surfaces

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use flux_core::{Decibels, Sample};

/// Peak hold decay applied once per block
pub const PEAK_DECAY: f32 = 0.95;

/// Peak/RMS values written by the audio thread once per block
#[derive(Debug)]
pub struct MeterData {
    left_peak: AtomicU32,
    right_peak: AtomicU32,
    left_rms: AtomicU32,
    right_rms: AtomicU32,
    clipped: AtomicBool,
}

/// Plain copy of the meter values
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MeterSnapshot {
    pub left_peak: f32,
    pub right_peak: f32,
    pub left_rms: f32,
    pub right_rms: f32,
    pub clipped: bool,
}

impl MeterSnapshot {
    pub fn peak_db(&self) -> Decibels {
        Decibels::from_gain(self.left_peak.max(self.right_peak) as f64)
    }
}

impl Default for MeterData {
    fn default() -> Self {
        Self {
            left_peak: AtomicU32::new(0),
            right_peak: AtomicU32::new(0),
            left_rms: AtomicU32::new(0),
            right_rms: AtomicU32::new(0),
            clipped: AtomicBool::new(false),
        }
    }
}

impl MeterData {
    /// Update from one stereo block (audio thread)
    pub fn update(&self, left: &[Sample], right: &[Sample]) {
        let (peak_l, rms_l) = measure(left);
        let (peak_r, rms_r) = measure(right);

        let held_l = (load(&self.left_peak) * PEAK_DECAY).max(peak_l);
        let held_r = (load(&self.right_peak) * PEAK_DECAY).max(peak_r);

        store(&self.left_peak, held_l);
        store(&self.right_peak, held_r);
        store(&self.left_rms, rms_l);
        store(&self.right_rms, rms_r);

        if peak_l > 1.0 || peak_r > 1.0 {
            self.clipped.store(true, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MeterSnapshot {
        MeterSnapshot {
            left_peak: load(&self.left_peak),
            right_peak: load(&self.right_peak),
            left_rms: load(&self.left_rms),
            right_rms: load(&self.right_rms),
            clipped: self.clipped.load(Ordering::Relaxed),
        }
    }

    pub fn is_clipped(&self) -> bool {
        self.clipped.load(Ordering::Relaxed)
    }

    pub fn reset_clip(&self) {
        self.clipped.store(false, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        for meter in [&self.left_peak, &self.right_peak, &self.left_rms, &self.right_rms] {
            store(meter, 0.0);
        }
        self.reset_clip();
    }
}

#[inline]
fn load(cell: &AtomicU32) -> f32 {
    f32::from_bits(cell.load(Ordering::Relaxed))
}

#[inline]
fn store(cell: &AtomicU32, value: f32) {
    cell.store(value.to_bits(), Ordering::Relaxed);
}

fn measure(block: &[Sample]) -> (f32, f32) {
    if block.is_empty() {
        return (0.0, 0.0);
    }
    let mut peak = 0.0f32;
    let mut sum_sq = 0.0f32;
    for &s in block {
        peak = peak.max(s.abs());
        sum_sq += s * s;
    }
    (peak, (sum_sq / block.len() as f32).sqrt())
}
