use serde::{Deserialize, Serialize};

/// Scalar parameter with a range. The value is clamped to `[min, max]` on
/// every write; setting an out-of-range value still counts as success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloatParam {
    val: f64,
    default: f64,
    max: f64,
    min: f64,
}

impl FloatParam {
    pub fn new(val: f64, default: f64, max: f64, min: f64) -> Self {
        let mut p = Self {
            val,
            default,
            max,
            min,
        };
        p.clamp();
        p
    }

    /// A unit-range scalar (`[0, 1]`, default 0). The common case for
    /// intensity-style parameters.
    pub fn unit(val: f64) -> Self {
        Self::new(val, 0.0, 1.0, 0.0)
    }

    pub fn val(&self) -> f64 {
        self.val
    }

    pub fn default(&self) -> f64 {
        self.default
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn set_val(&mut self, val: f64) {
        self.val = val;
        self.clamp();
    }

    pub fn set_default(&mut self, default: f64) {
        self.default = default;
    }

    /// Callers changing both bounds must order the calls so the range stays
    /// non-empty; the setters do not reorder for them.
    pub fn set_max(&mut self, max: f64) {
        self.max = max;
        self.clamp();
    }

    pub fn set_min(&mut self, min: f64) {
        self.min = min;
        self.clamp();
    }

    pub fn is_default(&self) -> bool {
        self.val == self.default
    }

    pub fn reset(&mut self) {
        self.val = self.default;
        self.clamp();
    }

    /// Value normalized to `[0, 1]` over the range. A degenerate range
    /// reads as 0.
    pub fn as_percent(&self) -> f64 {
        if self.max - self.min == 0.0 {
            return 0.0;
        }
        (self.val - self.min) / (self.max - self.min)
    }

    pub fn set_as_percent(&mut self, pct: f64) {
        self.val = pct * (self.max - self.min) + self.min;
        self.clamp();
    }

    pub fn add(&mut self, rhs: f64) {
        self.val += rhs;
        self.clamp();
    }

    pub fn scale(&mut self, factor: f64) {
        self.val *= factor;
        self.clamp();
    }

    /// Linear interpolation of the value; range metadata comes from `self`.
    pub fn lerp(&self, rhs: &FloatParam, t: f64) -> FloatParam {
        let mut out = self.clone();
        out.set_val(self.val * (1.0 - t) + rhs.val * t);
        out
    }

    fn clamp(&mut self) {
        if self.val < self.min {
            self.val = self.min;
        } else if self.val > self.max {
            self.val = self.max;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn writes_clamp_to_range() {
        let mut p = FloatParam::new(0.5, 0.0, 1.0, 0.0);
        p.set_val(2.0);
        assert_eq!(p.val(), 1.0);
        p.set_val(-1.0);
        assert_eq!(p.val(), 0.0);
    }

    #[test]
    fn shrinking_range_reclamps_value() {
        let mut p = FloatParam::new(8.0, 0.0, 10.0, 0.0);
        p.set_max(5.0);
        assert_eq!(p.val(), 5.0);
        p.set_min(6.0);
        assert_eq!(p.val(), 6.0);
    }

    #[test]
    fn percent_round_trip() {
        let mut p = FloatParam::new(0.0, 0.0, 20.0, 10.0);
        p.set_as_percent(0.5);
        assert_eq!(p.val(), 15.0);
        assert!((p.as_percent() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn degenerate_range_percent_is_zero() {
        let p = FloatParam::new(3.0, 3.0, 3.0, 3.0);
        assert_eq!(p.as_percent(), 0.0);
    }

    #[test]
    fn lerp_endpoints() {
        let a = FloatParam::unit(0.2);
        let b = FloatParam::unit(0.8);
        assert_eq!(a.lerp(&b, 0.0).val(), 0.2);
        assert_eq!(a.lerp(&b, 1.0).val(), 0.8);
        assert!((a.lerp(&b, 0.5).val() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn reset_restores_default() {
        let mut p = FloatParam::new(0.7, 0.25, 1.0, 0.0);
        p.reset();
        assert_eq!(p.val(), 0.25);
        assert!(p.is_default());
    }
}
