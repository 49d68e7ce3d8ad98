use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Unit an orientation value is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AngleUnit {
    Degree,
    Radian,
}

/// Angle parameter with a range and a unit. Arithmetic against another
/// orientation converts the right-hand side into this value's unit first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrientationParam {
    unit: AngleUnit,
    val: f64,
    default: f64,
    max: f64,
    min: f64,
}

impl OrientationParam {
    pub fn new(val: f64, unit: AngleUnit, default: f64, max: f64, min: f64) -> Self {
        let mut p = Self {
            unit,
            val,
            default,
            max,
            min,
        };
        p.clamp();
        p
    }

    /// Full-circle degree orientation, range `[0, 360]`.
    pub fn degrees(val: f64) -> Self {
        Self::new(val, AngleUnit::Degree, 0.0, 360.0, 0.0)
    }

    pub fn val(&self) -> f64 {
        self.val
    }

    pub fn unit(&self) -> AngleUnit {
        self.unit
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

    pub fn set_max(&mut self, max: f64) {
        self.max = max;
        self.clamp();
    }

    pub fn set_min(&mut self, min: f64) {
        self.min = min;
        self.clamp();
    }

    /// The value converted into the requested unit. Does not mutate.
    pub fn as_unit(&self, unit: AngleUnit) -> f64 {
        match (self.unit, unit) {
            (AngleUnit::Degree, AngleUnit::Radian) => self.val * PI / 180.0,
            (AngleUnit::Radian, AngleUnit::Degree) => self.val * 180.0 / PI,
            _ => self.val,
        }
    }

    pub fn is_default(&self) -> bool {
        self.val == self.default
    }

    pub fn reset(&mut self) {
        self.val = self.default;
        self.clamp();
    }

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

    /// Adds another orientation, converting it into this unit first.
    pub fn add_angle(&mut self, rhs: &OrientationParam) {
        self.val += rhs.as_unit(self.unit);
        self.clamp();
    }

    /// Compares two orientations in this value's unit.
    pub fn cmp_val(&self, rhs: &OrientationParam) -> std::cmp::Ordering {
        self.val.total_cmp(&rhs.as_unit(self.unit))
    }

    pub fn lerp(&self, rhs: &OrientationParam, t: f64) -> OrientationParam {
        let mut out = self.clone();
        out.set_val(self.val * (1.0 - t) + rhs.as_unit(self.unit) * t);
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
