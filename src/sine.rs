use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::param::Param;

/// How the wave is applied to the parameter it animates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SineMode {
    /// The wave value becomes the parameter's percent.
    Abs,
    /// The wave value is added to the parameter's current percent.
    Rel,
}

/// Procedural timeline producing a sine wave over a parameter's
/// normalized range. Works on any parameter with a percent mapping
/// (floats, orientations, enums); colors are skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SineWave {
    /// Period in seconds.
    period: f64,
    magnitude: f64,
    /// Phase in seconds.
    phase: f64,
    offset: f64,
    mode: SineMode,
    #[serde(default = "default_loops")]
    loops: i32,
}

fn default_loops() -> i32 {
    -1
}

impl SineWave {
    pub fn new(period: f64, magnitude: f64, phase: f64, offset: f64, mode: SineMode) -> Self {
        Self {
            period: if period > 0.0 { period } else { 1.0 },
            magnitude,
            phase,
            offset,
            mode,
            loops: -1,
        }
    }

    pub fn loops(&self) -> i32 {
        self.loops
    }

    pub fn set_loops(&mut self, loops: i32) {
        self.loops = loops;
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn loop_length(&self) -> u64 {
        (self.period * 1000.0) as u64
    }

    pub fn length(&self) -> u64 {
        if self.loops == -1 {
            return u64::MAX;
        }
        self.loop_length().saturating_mul(self.loops.max(0) as u64)
    }

    pub fn is_done(&self, time: u64) -> bool {
        self.loops != -1 && time > self.length()
    }

    /// Wave value at a time (already in percent space).
    #[allow(clippy::cast_precision_loss)]
    pub fn wave(&self, time: u64) -> f64 {
        // Past the final loop the wave freezes at its end value.
        let clamped = if self.loops != -1 && time > self.length() {
            self.length()
        } else {
            time
        };
        let t = clamped as f64 / 1000.0;
        self.magnitude * (PI * 2.0 * (1.0 / self.period) * (t + self.phase)).sin() + self.offset
    }

    /// Applies the wave to the layer's current value for the animated
    /// parameter. Parameters without a percent mapping are left alone.
    pub fn value_at(&self, time: u64, current: Option<&Param>) -> Option<Param> {
        let current = current?;
        let wave = self.wave(time);
        let mut out = current.clone();
        let ok = match self.mode {
            SineMode::Abs => out.set_as_percent(wave),
            SineMode::Rel => match out.as_percent() {
                Some(pct) => out.set_as_percent(pct + wave),
                None => false,
            },
        };
        if !ok {
            warn!("unsupported type for sine wave timeline: {}", current.type_name());
            return None;
        }
        Some(out)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::model::float::FloatParam;

    fn level(v: f64) -> Param {
        Param::Float(FloatParam::unit(v))
    }

    #[test]
    fn abs_mode_sets_percent_from_wave() {
        // 2 s period, centered at 0.5 with amplitude 0.5.
        let s = SineWave::new(2.0, 0.5, 0.0, 0.5, SineMode::Abs);
        let v = s.value_at(500, Some(&level(0.0))).unwrap();
        // Quarter period: sin = 1 -> percent 1.0.
        assert!((v.as_float().unwrap().val() - 1.0).abs() < 1e-9);
        let v = s.value_at(1000, Some(&level(0.0))).unwrap();
        assert!((v.as_float().unwrap().val() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn rel_mode_adds_to_current_percent() {
        let s = SineWave::new(2.0, 0.25, 0.0, 0.0, SineMode::Rel);
        let v = s.value_at(500, Some(&level(0.5))).unwrap();
        assert!((v.as_float().unwrap().val() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn loop_length_follows_period() {
        let s = SineWave::new(2.5, 1.0, 0.0, 0.0, SineMode::Abs);
        assert_eq!(s.loop_length(), 2500);
        assert!(!s.is_done(u64::MAX - 1));
    }

    #[test]
    fn bounded_loops_freeze_at_end() {
        let mut s = SineWave::new(1.0, 0.5, 0.0, 0.5, SineMode::Abs);
        s.set_loops(2);
        assert_eq!(s.length(), 2000);
        assert!(s.is_done(2001));
        let end = s.wave(2000);
        assert!((s.wave(10_000) - end).abs() < 1e-12);
    }

    #[test]
    fn color_parameters_are_skipped() {
        let s = SineWave::new(1.0, 0.5, 0.0, 0.5, SineMode::Abs);
        let c = Param::Color(crate::model::color::ColorParam::new(
            crate::model::color::ColorMode::BasicRgb,
        ));
        assert!(s.value_at(100, Some(&c)).is_none());
        assert!(s.value_at(100, None).is_none());
    }

    #[test]
    fn serde_round_trip() {
        let s = SineWave::new(2.0, 0.5, 0.25, 0.5, SineMode::Rel);
        let json = serde_json::to_string(&s).unwrap();
        let back: SineWave = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
