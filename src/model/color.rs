use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use super::chroma::match_chroma;
use super::colorspace::{
    lab_to_lchab, rgb_to_xyz, xyz_to_lab, xyz_to_rgb, ReferenceWhite, RgbColorSpace,
};

/// Hue angles closer than this compare as equal.
const HUE_EPS: f64 = 1e-6;

/// How a color parameter maps channels to light.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ColorMode {
    /// Fixed Red/Green/Blue channel set, no basis.
    BasicRgb,
    /// Fixed Cyan/Magenta/Yellow channel set, no basis.
    BasicCmy,
    /// Arbitrary emitter channels, optionally with XYZ basis vectors.
    Additive,
    /// Filter-based fixtures (scrollers, CMY mixing heads).
    Subtractive,
}

/// Spectral color parameter: named channels in `[0, 1]`, an optional XYZ
/// basis per channel, and a master weight. With a basis, the emitted
/// tristimulus is `weight · Σ channel · basis(channel)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorParam {
    channels: BTreeMap<String, f64>,
    #[serde(default)]
    basis: BTreeMap<String, [f64; 3]>,
    weight: f64,
    mode: ColorMode,
}

impl ColorParam {
    pub fn new(mode: ColorMode) -> Self {
        let mut c = Self {
            channels: BTreeMap::new(),
            basis: BTreeMap::new(),
            weight: 1.0,
            mode,
        };
        c.init_mode();
        c
    }

    /// Additive color with emitter basis vectors; channels are created from
    /// the basis names, set to 0.
    pub fn with_basis(basis: BTreeMap<String, [f64; 3]>, mode: ColorMode) -> Self {
        let channels = basis.keys().map(|k| (k.clone(), 0.0)).collect();
        Self {
            channels,
            basis,
            weight: 1.0,
            mode,
        }
    }

    fn init_mode(&mut self) {
        match self.mode {
            ColorMode::BasicRgb => {
                for name in ["Red", "Green", "Blue"] {
                    self.channels.insert(name.to_string(), 0.0);
                }
            }
            ColorMode::BasicCmy => {
                for name in ["Cyan", "Magenta", "Yellow"] {
                    self.channels.insert(name.to_string(), 0.0);
                }
            }
            ColorMode::Additive | ColorMode::Subtractive => {}
        }
    }

    pub fn mode(&self) -> ColorMode {
        self.mode
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn set_weight(&mut self, weight: f64) {
        self.weight = weight.clamp(0.0, 1.0);
    }

    pub fn channel(&self, name: &str) -> Option<f64> {
        self.channels.get(name).copied()
    }

    pub fn channels(&self) -> &BTreeMap<String, f64> {
        &self.channels
    }

    /// Sets a channel, clamped to `[0, 1]`. Fails if the channel is not
    /// mapped.
    pub fn set_channel(&mut self, name: &str, val: f64) -> bool {
        match self.channels.get_mut(name) {
            Some(c) => {
                *c = val.clamp(0.0, 1.0);
                true
            }
            None => {
                warn!("color has no mapped channel named {name}");
                false
            }
        }
    }

    /// Adds a channel initialized to 0. Fails if it already exists.
    pub fn add_channel(&mut self, name: &str) -> bool {
        if self.channels.contains_key(name) {
            warn!("color already has a channel named {name}");
            return false;
        }
        self.channels.insert(name.to_string(), 0.0);
        true
    }

    pub fn remove_channel(&mut self, name: &str) -> bool {
        self.channels.remove(name).is_some()
    }

    pub fn set_basis_vector(&mut self, channel: &str, x: f64, y: f64, z: f64) {
        self.basis.insert(channel.to_string(), [x, y, z]);
    }

    pub fn basis_vector(&self, channel: &str) -> Option<[f64; 3]> {
        self.basis.get(channel).copied()
    }

    // ── Tristimulus ────────────────────────────────────────────────

    /// Emitted XYZ. In BASIC_RGB the channels are interpreted through sRGB;
    /// otherwise the basis vectors are summed. A basis-less non-RGB color
    /// reads as black.
    pub fn xyz(&self) -> [f64; 3] {
        if self.mode == ColorMode::BasicRgb {
            let r = self.channel("Red").unwrap_or(0.0) * self.weight;
            let g = self.channel("Green").unwrap_or(0.0) * self.weight;
            let b = self.channel("Blue").unwrap_or(0.0) * self.weight;
            return rgb_to_xyz(r, g, b, RgbColorSpace::Srgb);
        }
        if self.basis.is_empty() {
            error!("cannot compute XYZ: no color basis defined");
            return [0.0; 3];
        }
        let mut out = [0.0; 3];
        for (name, level) in &self.channels {
            let Some(bv) = self.basis.get(name) else {
                warn!("no basis component named {name}; ignoring");
                continue;
            };
            for (acc, component) in out.iter_mut().zip(bv) {
                *acc += level * component * self.weight;
            }
        }
        out
    }

    /// Chromaticity (x, y). Black reads as (0, 0).
    pub fn xy(&self) -> (f64, f64) {
        let xyz = self.xyz();
        let s = xyz[0] + xyz[1] + xyz[2];
        if s == 0.0 {
            return (0.0, 0.0);
        }
        (xyz[0] / s, xyz[1] / s)
    }

    pub fn lab(&self, white: ReferenceWhite) -> [f64; 3] {
        xyz_to_lab(self.xyz(), white)
    }

    pub fn lchab(&self, white: ReferenceWhite) -> [f64; 3] {
        lab_to_lchab(self.lab(white))
    }

    // ── RGB setters / getters ──────────────────────────────────────

    /// Sets the color from an RGB triple in the given working space.
    ///
    /// BASIC_RGB writes the channels directly (clamped; the working space
    /// is irrelevant for raw channel fixtures). Other modes convert to XYZ
    /// and solve for channel levels matching the target chromaticity,
    /// maximizing output. Out-of-gamut targets are clamped to the nearest
    /// achievable chromaticity and reported with a false return; the color
    /// still changes.
    pub fn set_rgb(&mut self, r: f64, g: f64, b: f64, weight: f64, cs: RgbColorSpace) -> bool {
        if self.mode == ColorMode::BasicRgb {
            return self.set_rgb_raw(r, g, b, weight);
        }
        let xyz = rgb_to_xyz(r, g, b, cs);
        let s = xyz[0] + xyz[1] + xyz[2];
        if s == 0.0 {
            // Black: chromaticity is undefined, zero the channels instead.
            for c in self.channels.values_mut() {
                *c = 0.0;
            }
            self.set_weight(weight);
            return true;
        }
        self.match_chroma_channels(xyz[0] / s, xyz[1] / s, weight)
    }

    /// Writes Red/Green/Blue channels directly, clamped. Fails when the
    /// channel set lacks the RGB primaries.
    pub fn set_rgb_raw(&mut self, r: f64, g: f64, b: f64, weight: f64) -> bool {
        if !["Red", "Green", "Blue"]
            .iter()
            .all(|c| self.channels.contains_key(*c))
        {
            error!("color lacks Red/Green/Blue channels required by set_rgb_raw");
            return false;
        }
        self.set_channel("Red", r);
        self.set_channel("Green", g);
        self.set_channel("Blue", b);
        self.set_weight(weight);
        true
    }

    /// RGB view of the color. BASIC_RGB returns the raw channels; other
    /// modes convert the emitted XYZ.
    pub fn rgb(&self, cs: RgbColorSpace) -> [f64; 3] {
        if self.mode == ColorMode::BasicRgb {
            return [
                self.channel("Red").unwrap_or(0.0),
                self.channel("Green").unwrap_or(0.0),
                self.channel("Blue").unwrap_or(0.0),
            ];
        }
        xyz_to_rgb(self.xyz(), cs)
    }

    /// Sets the target chromaticity directly. Not available in BASIC_RGB.
    pub fn set_xy(&mut self, x: f64, y: f64, weight: f64) -> bool {
        if self.mode == ColorMode::BasicRgb {
            error!("set_xy() is not supported in BASIC_RGB mode; use set_rgb()");
            return false;
        }
        self.match_chroma_channels(x, y, weight)
    }

    fn match_chroma_channels(&mut self, x: f64, y: f64, weight: f64) -> bool {
        if self.basis.is_empty() {
            error!("chromaticity match needs basis vectors");
            return false;
        }
        let order: Vec<String> = self.basis.keys().cloned().collect();
        let vectors: Vec<[f64; 3]> = order.iter().filter_map(|k| self.basis.get(k).copied()).collect();
        let sol = match_chroma(&vectors, x, y);
        for (name, level) in order.iter().zip(sol.channels.iter()) {
            self.channels.insert(name.clone(), *level);
        }
        self.set_weight(weight);
        if !sol.in_gamut {
            warn!("non-optimal color solution; color may be out of gamut");
        }
        sol.in_gamut
    }

    // ── Capability set ─────────────────────────────────────────────

    /// Channel-wise lerp; a channel missing on the right-hand side reads
    /// as 0. The weight lerps too.
    pub fn lerp(&self, rhs: &ColorParam, t: f64) -> ColorParam {
        let mut out = self.clone();
        for (name, level) in &self.channels {
            let r = rhs.channel(name).unwrap_or(0.0);
            out.channels
                .insert(name.clone(), (level * (1.0 - t) + r * t).clamp(0.0, 1.0));
        }
        out.set_weight(self.weight * (1.0 - t) + rhs.weight * t);
        out
    }

    /// Orders colors by LCHab hue; hues within a tight epsilon are equal.
    pub fn cmp_hue(&self, rhs: &ColorParam, white: ReferenceWhite) -> std::cmp::Ordering {
        let a = self.lchab(white)[2];
        let b = rhs.lchab(white)[2];
        if (a - b).abs() < HUE_EPS {
            std::cmp::Ordering::Equal
        } else {
            a.total_cmp(&b)
        }
    }

    /// Default means every channel at 0 with full weight.
    pub fn is_default(&self) -> bool {
        self.channels.values().all(|&c| c == 0.0) && self.weight == 1.0
    }

    pub fn reset(&mut self) {
        self.weight = 1.0;
        for c in self.channels.values_mut() {
            *c = 0.0;
        }
    }

    /// Grandmaster scaling: the weight scales, the chromaticity stays.
    pub fn scale(&mut self, factor: f64) {
        self.set_weight(self.weight * factor);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn additive_rgb() -> ColorParam {
        let mut basis = BTreeMap::new();
        basis.insert(
            "Red".to_string(),
            rgb_to_xyz(1.0, 0.0, 0.0, RgbColorSpace::SrgbLinear),
        );
        basis.insert(
            "Green".to_string(),
            rgb_to_xyz(0.0, 1.0, 0.0, RgbColorSpace::SrgbLinear),
        );
        basis.insert(
            "Blue".to_string(),
            rgb_to_xyz(0.0, 0.0, 1.0, RgbColorSpace::SrgbLinear),
        );
        ColorParam::with_basis(basis, ColorMode::Additive)
    }

    #[test]
    fn basic_rgb_writes_channels_clamped() {
        let mut c = ColorParam::new(ColorMode::BasicRgb);
        assert!(c.set_rgb(1.5, 0.25, -0.5, 1.0, RgbColorSpace::Srgb));
        assert_eq!(c.channel("Red"), Some(1.0));
        assert_eq!(c.channel("Green"), Some(0.25));
        assert_eq!(c.channel("Blue"), Some(0.0));
    }

    #[test]
    fn unknown_channel_set_fails() {
        let mut c = ColorParam::new(ColorMode::BasicRgb);
        assert!(!c.set_channel("Amber", 0.5));
    }

    #[test]
    fn additive_rgb_set_matches_chromaticity() {
        let mut c = additive_rgb();
        assert!(c.set_rgb(1.0, 0.0, 0.0, 1.0, RgbColorSpace::Srgb));
        let (x, y) = c.xy();
        let red = rgb_to_xyz(1.0, 0.0, 0.0, RgbColorSpace::Srgb);
        let s = red[0] + red[1] + red[2];
        assert!((x - red[0] / s).abs() < 1e-6);
        assert!((y - red[1] / s).abs() < 1e-6);
    }

    #[test]
    fn set_xy_rejected_in_basic_mode() {
        let mut c = ColorParam::new(ColorMode::BasicRgb);
        assert!(!c.set_xy(0.3, 0.3, 1.0));
    }

    #[test]
    fn out_of_gamut_reports_false_but_changes_color() {
        let mut c = additive_rgb();
        assert!(!c.set_xy(0.73, 0.26, 1.0));
        assert!(c.channels().values().sum::<f64>() > 0.0);
    }

    #[test]
    fn lerp_is_channel_wise() {
        let mut a = ColorParam::new(ColorMode::BasicRgb);
        a.set_rgb_raw(0.0, 0.5, 1.0, 1.0);
        let mut b = ColorParam::new(ColorMode::BasicRgb);
        b.set_rgb_raw(1.0, 0.5, 0.0, 0.5);
        let mid = a.lerp(&b, 0.5);
        assert!((mid.channel("Red").unwrap() - 0.5).abs() < 1e-12);
        assert!((mid.channel("Green").unwrap() - 0.5).abs() < 1e-12);
        assert!((mid.channel("Blue").unwrap() - 0.5).abs() < 1e-12);
        assert!((mid.weight() - 0.75).abs() < 1e-12);
        assert_eq!(a.lerp(&b, 0.0), a);
        assert_eq!(a.lerp(&b, 1.0), b);
    }

    #[test]
    fn default_requires_full_weight() {
        let mut c = ColorParam::new(ColorMode::BasicRgb);
        assert!(c.is_default());
        c.scale(0.5);
        assert!(!c.is_default());
        c.reset();
        assert!(c.is_default());
    }

    #[test]
    fn hue_ordering() {
        let mut red = ColorParam::new(ColorMode::BasicRgb);
        red.set_rgb_raw(1.0, 0.0, 0.0, 1.0);
        let mut green = ColorParam::new(ColorMode::BasicRgb);
        green.set_rgb_raw(0.0, 1.0, 0.0, 1.0);
        // Red hue (~40) sorts below green hue (~136).
        assert_eq!(
            red.cmp_hue(&green, ReferenceWhite::D65),
            std::cmp::Ordering::Less
        );
        assert_eq!(
            red.cmp_hue(&red.clone(), ReferenceWhite::D65),
            std::cmp::Ordering::Equal
        );
    }

    #[test]
    fn serde_round_trip_keeps_basis() {
        let mut c = additive_rgb();
        c.set_xy(0.35, 0.35, 0.8);
        let json = serde_json::to_string(&c).unwrap();
        let back: ColorParam = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }
}
