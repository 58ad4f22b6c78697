//! Parameter types for graph nodes and plugins

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

/// Atomic f32 for lock-free parameter access
#[derive(Debug)]
pub struct AtomicParam {
    bits: AtomicU32,
}

impl AtomicParam {
    pub fn new(value: f32) -> Self {
        Self {
            bits: AtomicU32::new(value.to_bits()),
        }
    }

    #[inline]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set(&self, value: f32) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl Default for AtomicParam {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Parameter skew type
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ParamSkew {
    Linear,
    Logarithmic,
}

/// Parameter range specification
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamRange {
    pub min: f32,
    pub max: f32,
    pub default: f32,
    pub skew: ParamSkew,
}

impl ParamRange {
    pub fn linear(min: f32, max: f32, default: f32) -> Self {
        Self {
            min,
            max,
            default,
            skew: ParamSkew::Linear,
        }
    }

    /// Logarithmic mapping; `min` must be positive
    pub fn logarithmic(min: f32, max: f32, default: f32) -> Self {
        Self {
            min,
            max,
            default,
            skew: ParamSkew::Logarithmic,
        }
    }

    #[inline]
    pub fn clamp(&self, value: f32) -> f32 {
        if value.is_nan() {
            return self.default;
        }
        value.clamp(self.min, self.max)
    }

    /// Denormalize a 0-1 value to the actual range
    pub fn denormalize(&self, normalized: f32) -> f32 {
        let n = normalized.clamp(0.0, 1.0);
        match self.skew {
            ParamSkew::Linear => self.min + n * (self.max - self.min),
            ParamSkew::Logarithmic => {
                let log_min = self.min.ln();
                let log_max = self.max.ln();
                (log_min + n * (log_max - log_min)).exp()
            }
        }
    }

    /// Normalize an actual value to 0-1
    pub fn normalize(&self, value: f32) -> f32 {
        if self.max <= self.min {
            return 0.0;
        }
        let clamped = self.clamp(value);
        match self.skew {
            ParamSkew::Linear => (clamped - self.min) / (self.max - self.min),
            ParamSkew::Logarithmic => {
                let log_min = self.min.ln();
                let log_max = self.max.ln();
                (clamped.ln() - log_min) / (log_max - log_min)
            }
        }
    }
}

/// Named, range-bounded, automatable value.
///
/// Nodes own their parameters behind `Arc`; UI bindings and automation lanes hold
/// clones of the same `Arc` and write through the atomic value.
#[derive(Debug)]
pub struct Parameter {
    name: String,
    unit: &'static str,
    range: ParamRange,
    value: AtomicParam,
}

impl Parameter {
    pub fn new(name: impl Into<String>, range: ParamRange) -> Self {
        Self {
            name: name.into(),
            unit: "",
            value: AtomicParam::new(range.default),
            range,
        }
    }

    pub fn with_unit(mut self, unit: &'static str) -> Self {
        self.unit = unit;
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn unit(&self) -> &'static str {
        self.unit
    }

    #[inline]
    pub fn range(&self) -> &ParamRange {
        &self.range
    }

    #[inline]
    pub fn value(&self) -> f32 {
        self.value.get()
    }

    /// Store a new value, clamped to the range
    #[inline]
    pub fn set_value(&self, value: f32) {
        self.value.set(self.range.clamp(value));
    }

    #[inline]
    pub fn normalized(&self) -> f32 {
        self.range.normalize(self.value())
    }

    #[inline]
    pub fn set_normalized(&self, normalized: f32) {
        self.set_value(self.range.denormalize(normalized));
    }

    pub fn reset(&self) {
        self.value.set(self.range.default);
    }

    pub fn info(&self) -> ParamInfo {
        ParamInfo {
            name: self.name.clone(),
            unit: self.unit.to_string(),
            min: self.range.min,
            max: self.range.max,
            default: self.range.default,
            value: self.value(),
        }
    }
}

/// Read-only parameter snapshot for control surfaces and persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamInfo {
    pub name: String,
    pub unit: String,
    pub min: f32,
    pub max: f32,
    pub default: f32,
    pub value: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_parameter_clamps() {
        let p = Parameter::new("Gain", ParamRange::linear(0.0, 2.0, 1.0));
        assert_eq!(p.value(), 1.0);

        p.set_value(5.0);
        assert_eq!(p.value(), 2.0);

        p.set_value(-1.0);
        assert_eq!(p.value(), 0.0);

        p.set_value(f32::NAN);
        assert_eq!(p.value(), 1.0);
    }

    #[test]
    fn test_normalized_round_trip() {
        let p = Parameter::new("Cutoff", ParamRange::logarithmic(20.0, 20000.0, 1000.0))
            .with_unit("Hz");
        p.set_normalized(0.5);
        assert_relative_eq!(p.value(), 632.455, epsilon = 0.01);
        assert_relative_eq!(p.normalized(), 0.5, epsilon = 1e-5);
        assert_eq!(p.info().unit, "Hz");
    }

    #[test]
    fn test_reset_restores_default() {
        let p = Parameter::new("Feedback", ParamRange::linear(0.0, 0.95, 0.3));
        p.set_value(0.9);
        p.reset();
        assert_relative_eq!(p.value(), 0.3);
    }
}
