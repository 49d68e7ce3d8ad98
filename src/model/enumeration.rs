use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Where the tweak lands when an option is selected by name alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnumMode {
    First,
    Center,
    Last,
}

impl EnumMode {
    /// Tweak value implied by the mode.
    pub fn tweak(self) -> f64 {
        match self {
            EnumMode::First => 0.0,
            EnumMode::Center => 0.5,
            EnumMode::Last => 1.0,
        }
    }
}

/// How an enum interpolates between two values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnumInterp {
    /// Jump straight to the target for any t > 0.
    Snap,
    /// Lerp the tweak when both sides sit on the same option, else snap.
    SmoothWithinOption,
    /// Lerp the numeric value and decode it back into option + tweak.
    Smooth,
}

/// Named-option parameter. Options map a name onto the start of a numeric
/// range; the active value is `start + tweak * (end - start)` where an
/// option's range ends one short of the next option's start (the last
/// option ends at `range_max`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "EnumParamRaw", into = "EnumParamRaw")]
pub struct EnumParam {
    active: String,
    tweak: f64,
    mode: EnumMode,
    default: String,
    range_max: i64,
    interp_mode: EnumInterp,
    keys: BTreeMap<String, i64>,
    // Rebuilt from `keys`; ordered by range start.
    starts: BTreeMap<i64, String>,
}

/// Serialized shape; `starts` is derived from `keys` on load.
#[derive(Serialize, Deserialize)]
struct EnumParamRaw {
    active: String,
    tweak: f64,
    mode: EnumMode,
    default: String,
    #[serde(rename = "rangeMax")]
    range_max: i64,
    #[serde(rename = "interpMode")]
    interp_mode: EnumInterp,
    keys: BTreeMap<String, i64>,
}

impl TryFrom<EnumParamRaw> for EnumParam {
    type Error = String;
    fn try_from(raw: EnumParamRaw) -> Result<Self, String> {
        if raw.keys.is_empty() {
            return Err("enum parameter needs at least one option".to_string());
        }
        let starts = raw.keys.iter().map(|(k, v)| (*v, k.clone())).collect();
        Ok(Self {
            active: raw.active,
            tweak: raw.tweak.clamp(0.0, 1.0),
            mode: raw.mode,
            default: raw.default,
            range_max: raw.range_max,
            interp_mode: raw.interp_mode,
            keys: raw.keys,
            starts,
        })
    }
}

impl From<EnumParam> for EnumParamRaw {
    fn from(p: EnumParam) -> Self {
        Self {
            active: p.active,
            tweak: p.tweak,
            mode: p.mode,
            default: p.default,
            range_max: p.range_max,
            interp_mode: p.interp_mode,
            keys: p.keys,
        }
    }
}

impl EnumParam {
    /// Builds an enum from `(name, range start)` pairs. The active and
    /// default option start out as the option with the lowest range start
    /// unless `default` names another one.
    pub fn new(
        options: impl IntoIterator<Item = (String, i64)>,
        mode: EnumMode,
        range_max: i64,
        default: Option<String>,
        interp_mode: EnumInterp,
    ) -> Self {
        let keys: BTreeMap<String, i64> = options.into_iter().collect();
        let starts: BTreeMap<i64, String> = keys.iter().map(|(k, v)| (*v, k.clone())).collect();
        let active = starts
            .values()
            .next()
            .cloned()
            .unwrap_or_default();
        let default = match default {
            Some(d) if !d.is_empty() => d,
            _ => active.clone(),
        };
        Self {
            active,
            tweak: mode.tweak(),
            mode,
            default,
            range_max,
            interp_mode,
            keys,
            starts,
        }
    }

    pub fn active(&self) -> &str {
        &self.active
    }

    pub fn tweak(&self) -> f64 {
        self.tweak
    }

    pub fn mode(&self) -> EnumMode {
        self.mode
    }

    pub fn interp_mode(&self) -> EnumInterp {
        self.interp_mode
    }

    pub fn default(&self) -> &str {
        &self.default
    }

    pub fn range_max(&self) -> i64 {
        self.range_max
    }

    /// Option names in range-start order.
    pub fn options(&self) -> impl Iterator<Item = &str> {
        self.starts.values().map(String::as_str)
    }

    /// Adds an option, replacing an existing one with the same name.
    pub fn add_option(&mut self, name: &str, start: i64) {
        if let Some(old) = self.keys.remove(name) {
            self.starts.remove(&old);
        }
        self.keys.insert(name.to_string(), start);
        self.starts.insert(start, name.to_string());
    }

    pub fn remove_option(&mut self, name: &str) {
        if let Some(start) = self.keys.remove(name) {
            self.starts.remove(&start);
        }
    }

    pub fn set_mode(&mut self, mode: EnumMode) {
        self.mode = mode;
    }

    pub fn set_interp_mode(&mut self, interp: EnumInterp) {
        self.interp_mode = interp;
    }

    pub fn set_default(&mut self, name: &str) -> bool {
        if !self.keys.contains_key(name) {
            return false;
        }
        self.default = name.to_string();
        true
    }

    /// Selects an option by name; the tweak follows the mode. Unknown names
    /// fail and leave the value unchanged.
    pub fn set_name(&mut self, name: &str) -> bool {
        if !self.keys.contains_key(name) {
            warn!("enum has no option {name}");
            return false;
        }
        self.active = name.to_string();
        self.tweak = self.mode.tweak();
        true
    }

    /// Selects an option by name with an explicit tweak.
    pub fn set_name_tweak(&mut self, name: &str, tweak: f64) -> bool {
        if !self.set_name(name) {
            return false;
        }
        self.set_tweak(tweak);
        true
    }

    pub fn set_tweak(&mut self, tweak: f64) {
        self.tweak = tweak.clamp(0.0, 1.0);
    }

    /// Sets the value numerically, inverting the range encoding. Values
    /// below the first range start clamp to the first option at tweak 0;
    /// values above `range_max` clamp to the last option at tweak 1. A
    /// value equal to an option's start belongs to that option.
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn set_numeric(&mut self, val: f64) -> bool {
        let Some((&first_start, first_name)) = self.starts.iter().next() else {
            return false;
        };
        if val < first_start as f64 {
            let name = first_name.clone();
            return self.set_name_tweak(&name, 0.0);
        }
        if val > self.range_max as f64 {
            if let Some((_, last_name)) = self.starts.iter().next_back() {
                let name = last_name.clone();
                return self.set_name_tweak(&name, 1.0);
            }
            return false;
        }

        // Greatest start <= val; equality at a start belongs to the option
        // starting there.
        let Some((&start, name)) = self.starts.range(..=(val.floor() as i64)).next_back() else {
            return false;
        };
        let end = self.end_of(start);
        let tweak = if end == start {
            0.0
        } else {
            (val - start as f64) / (end - start) as f64
        };
        let name = name.clone();
        self.set_name_tweak(&name, tweak)
    }

    /// Numeric value of the active option + tweak.
    #[allow(clippy::cast_precision_loss)]
    pub fn numeric(&self) -> f64 {
        let Some(&start) = self.keys.get(&self.active) else {
            return 0.0;
        };
        let end = self.end_of(start);
        start as f64 + (end - start) as f64 * self.tweak
    }

    fn end_of(&self, start: i64) -> i64 {
        self.starts
            .range((start + 1)..)
            .next()
            .map_or(self.range_max, |(&next, _)| next - 1)
    }

    pub fn lowest_start(&self) -> i64 {
        self.starts.keys().next().copied().unwrap_or(0)
    }

    pub fn highest_start(&self) -> i64 {
        self.starts.keys().next_back().copied().unwrap_or(-1)
    }

    /// Numeric value as a fraction of `[lowest_start, range_max]`.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_percent(&self) -> f64 {
        let low = self.lowest_start() as f64;
        let span = self.range_max as f64 - low;
        if span == 0.0 {
            return 0.0;
        }
        (self.numeric() - low) / span
    }

    pub fn set_as_percent(&mut self, pct: f64) -> bool {
        let low = self.lowest_start() as f64;
        self.set_numeric(pct * (self.range_max as f64 - low) + low)
    }

    /// Default means the default option is active with the tweak the mode
    /// implies.
    pub fn is_default(&self) -> bool {
        self.active == self.default && self.tweak == self.mode.tweak()
    }

    pub fn reset(&mut self) {
        let name = self.default.clone();
        self.set_name(&name);
    }

    /// Interpolates toward `rhs` under this value's interpolation policy.
    /// SNAP (and SMOOTH_WITHIN_OPTION across options) jumps to `rhs` for
    /// any t > 0; t = 0 is always this value.
    pub fn lerp(&self, rhs: &EnumParam, t: f64) -> EnumParam {
        if t <= 0.0 {
            return self.clone();
        }
        let mut out = rhs.clone();
        match self.interp_mode {
            EnumInterp::Snap => {}
            EnumInterp::SmoothWithinOption => {
                if rhs.active == self.active {
                    out.set_tweak(self.tweak * (1.0 - t) + rhs.tweak * t);
                }
            }
            EnumInterp::Smooth => {
                out.set_numeric(self.numeric() * (1.0 - t) + rhs.numeric() * t);
            }
        }
        out
    }

    /// Orders enums by numeric value.
    pub fn cmp_val(&self, rhs: &EnumParam) -> std::cmp::Ordering {
        self.numeric().total_cmp(&rhs.numeric())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn gobo() -> EnumParam {
        EnumParam::new(
            [
                ("Red".to_string(), 0),
                ("Blue".to_string(), 101),
                ("Green".to_string(), 201),
            ],
            EnumMode::Center,
            255,
            None,
            EnumInterp::Smooth,
        )
    }

    #[test]
    fn numeric_encoding_uses_mode_tweak() {
        let e = gobo();
        // Red spans [0, 100], CENTER puts the tweak at 0.5.
        assert_eq!(e.active(), "Red");
        assert!((e.numeric() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn numeric_round_trip_within_one_unit() {
        let mut e = gobo();
        for (name, tweak) in [("Red", 0.3), ("Blue", 0.75), ("Green", 0.0)] {
            assert!(e.set_name_tweak(name, tweak));
            let n = e.numeric();
            let mut back = gobo();
            assert!(back.set_numeric(n));
            assert_eq!(back.active(), name);
            // One-unit round-off over the option's span.
            assert!((back.numeric() - n).abs() <= 1.0);
        }
    }

    #[test]
    fn numeric_clamps_at_both_ends() {
        let mut e = gobo();
        assert!(e.set_numeric(-20.0));
        assert_eq!(e.active(), "Red");
        assert_eq!(e.tweak(), 0.0);
        assert!(e.set_numeric(400.0));
        assert_eq!(e.active(), "Green");
        assert_eq!(e.tweak(), 1.0);
    }

    #[test]
    fn start_equality_belongs_to_that_option() {
        let mut e = gobo();
        assert!(e.set_numeric(101.0));
        assert_eq!(e.active(), "Blue");
        assert_eq!(e.tweak(), 0.0);
    }

    #[test]
    fn unknown_name_fails_without_change() {
        let mut e = gobo();
        assert!(!e.set_name("Purple"));
        assert_eq!(e.active(), "Red");
    }

    #[test]
    fn adding_existing_name_replaces_start() {
        let mut e = gobo();
        e.add_option("Blue", 150);
        assert!(e.set_numeric(120.0));
        // [101, 149] now belongs to Red's successor-free gap... Blue moved,
        // so 120 falls in Red's widened range.
        assert_eq!(e.active(), "Red");
        assert!(e.set_numeric(150.0));
        assert_eq!(e.active(), "Blue");
    }

    #[test]
    fn snap_lerp_returns_target() {
        let mut a = gobo();
        a.set_interp_mode(EnumInterp::Snap);
        let mut b = gobo();
        b.set_name("Blue");
        let out = a.lerp(&b, 0.001);
        assert_eq!(out.active(), "Blue");
    }

    #[test]
    fn smooth_within_option_lerps_tweak_when_same() {
        let mut a = gobo();
        a.set_interp_mode(EnumInterp::SmoothWithinOption);
        a.set_name_tweak("Red", 0.0);
        let mut b = gobo();
        b.set_name_tweak("Red", 1.0);
        let out = a.lerp(&b, 0.5);
        assert_eq!(out.active(), "Red");
        assert!((out.tweak() - 0.5).abs() < 1e-9);

        // Different options snap.
        let mut c = gobo();
        c.set_name("Blue");
        assert_eq!(a.lerp(&c, 0.25).active(), "Blue");
    }

    #[test]
    fn smooth_lerp_crosses_options_numerically() {
        let a = gobo(); // Red @ center = 50
        let mut b = gobo();
        b.set_name("Blue"); // Blue @ center = 101 + (200 - 101) * 0.5 = 150.5
        let out = a.lerp(&b, 0.5);
        // Interpolant 100.25 falls in the gap between Red's span (ends at
        // 100) and Blue's start (101); decoding clamps it into Red at
        // tweak 1.0, so the re-encoded numeric value is 100.
        assert!((out.numeric() - 100.0).abs() < 1e-6);
        assert_eq!(out.active(), "Red");
    }

    #[test]
    fn percent_round_trip() {
        let mut e = gobo();
        assert!(e.set_as_percent(0.5));
        assert!((e.as_percent() - 0.5).abs() < 0.01);
    }

    #[test]
    fn default_tracks_mode_tweak() {
        let mut e = gobo();
        assert!(e.is_default());
        e.set_tweak(0.9);
        assert!(!e.is_default());
        e.reset();
        assert!(e.is_default());
    }

    #[test]
    fn serde_round_trip() {
        let mut e = gobo();
        e.set_name_tweak("Blue", 0.25);
        let json = serde_json::to_string(&e).unwrap();
        let back: EnumParam = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }
}
