use std::collections::BTreeMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::color::ColorParam;
use super::colorspace::RgbColorSpace;
use super::param::Param;

/// Callback invoked after a successful device mutation.
pub type DeviceObserver = Arc<dyn Fn(&Device) + Send + Sync>;

/// A single controllable fixture: unique id, patch channel, fixture type
/// string, typed parameters, and free-form metadata.
///
/// Typed setters succeed only when the parameter exists and has the
/// expected variant; they refuse silently (returning false) otherwise.
/// Only the generic [`Device::set_param`] may create parameters.
#[derive(Serialize, Deserialize)]
pub struct Device {
    #[serde(skip)]
    id: String,
    channel: u32,
    #[serde(rename = "type")]
    kind: String,
    parameters: IndexMap<String, Param>,
    #[serde(default)]
    metadata: IndexMap<String, String>,
    #[serde(skip)]
    param_observers: BTreeMap<usize, DeviceObserver>,
    #[serde(skip)]
    metadata_observers: BTreeMap<usize, DeviceObserver>,
    #[serde(skip)]
    next_observer_id: usize,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .field("kind", &self.kind)
            .field("parameters", &self.parameters)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Observers are deliberately not cloned: copies live in layers and the
/// programmer, and their writes must not reach transport hooks.
impl Clone for Device {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            channel: self.channel,
            kind: self.kind.clone(),
            parameters: self.parameters.clone(),
            metadata: self.metadata.clone(),
            param_observers: BTreeMap::new(),
            metadata_observers: BTreeMap::new(),
            next_observer_id: 0,
        }
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.channel == other.channel
            && self.kind == other.kind
            && self.parameters == other.parameters
            && self.metadata == other.metadata
    }
}

impl Device {
    pub fn new(id: impl Into<String>, channel: u32, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            channel,
            kind: kind.into(),
            parameters: IndexMap::new(),
            metadata: IndexMap::new(),
            param_observers: BTreeMap::new(),
            metadata_observers: BTreeMap::new(),
            next_observer_id: 0,
        }
    }

    /// Rebinds the id. Used by loaders, where the id is the map key rather
    /// than a field of the device node.
    pub(crate) fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn channel(&self) -> u32 {
        self.channel
    }

    pub fn set_channel(&mut self, channel: u32) {
        self.channel = channel;
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    // ── Parameters ─────────────────────────────────────────────────

    pub fn param_exists(&self, name: &str) -> bool {
        self.parameters.contains_key(name)
    }

    pub fn param(&self, name: &str) -> Option<&Param> {
        self.parameters.get(name)
    }

    /// Raw mutable access. Mutations through this handle do not fire
    /// observers; prefer the typed setters.
    pub fn param_mut(&mut self, name: &str) -> Option<&mut Param> {
        self.parameters.get_mut(name)
    }

    pub fn params(&self) -> &IndexMap<String, Param> {
        &self.parameters
    }

    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.parameters.keys().map(String::as_str)
    }

    /// Generic setter: creates the parameter if absent, replaces it
    /// (including a variant change) if present. Takes ownership.
    pub fn set_param(&mut self, name: &str, value: Param) {
        self.parameters.insert(name.to_string(), value);
        self.notify_param();
    }

    pub fn remove_param(&mut self, name: &str) -> bool {
        let removed = self.parameters.shift_remove(name).is_some();
        if removed {
            self.notify_param();
        }
        removed
    }

    /// Copies a parameter value in from `src` if the named parameter
    /// exists here with the same variant.
    pub fn copy_param_value(&mut self, name: &str, src: &Param) -> bool {
        let Some(p) = self.parameters.get_mut(name) else {
            return false;
        };
        if !p.copy_from(src) {
            return false;
        }
        self.notify_param();
        true
    }

    pub fn set_float(&mut self, name: &str, val: f64) -> bool {
        let Some(p) = self.parameters.get_mut(name).and_then(Param::as_float_mut) else {
            return false;
        };
        p.set_val(val);
        self.notify_param();
        true
    }

    pub fn set_orientation(&mut self, name: &str, val: f64) -> bool {
        let Some(p) = self
            .parameters
            .get_mut(name)
            .and_then(Param::as_orientation_mut)
        else {
            return false;
        };
        p.set_val(val);
        self.notify_param();
        true
    }

    /// Selects an enum option; the tweak follows the option's mode unless
    /// given explicitly.
    pub fn set_enum(&mut self, name: &str, option: &str, tweak: Option<f64>) -> bool {
        let Some(p) = self.parameters.get_mut(name).and_then(Param::as_enum_mut) else {
            return false;
        };
        let ok = match tweak {
            Some(t) => p.set_name_tweak(option, t),
            None => p.set_name(option),
        };
        if ok {
            self.notify_param();
        }
        ok
    }

    pub fn set_enum_numeric(&mut self, name: &str, val: f64) -> bool {
        let Some(p) = self.parameters.get_mut(name).and_then(Param::as_enum_mut) else {
            return false;
        };
        let ok = p.set_numeric(val);
        if ok {
            self.notify_param();
        }
        ok
    }

    pub fn set_color_channel(&mut self, name: &str, channel: &str, val: f64) -> bool {
        let Some(p) = self.parameters.get_mut(name).and_then(Param::as_color_mut) else {
            return false;
        };
        let ok = p.set_channel(channel, val);
        if ok {
            self.notify_param();
        }
        ok
    }

    pub fn set_color_rgb(
        &mut self,
        name: &str,
        r: f64,
        g: f64,
        b: f64,
        weight: f64,
        cs: RgbColorSpace,
    ) -> bool {
        let Some(p) = self.parameters.get_mut(name).and_then(Param::as_color_mut) else {
            return false;
        };
        // Out-of-gamut still mutates; the setter only fails on a missing
        // channel set, which leaves the value untouched.
        p.set_rgb(r, g, b, weight, cs);
        self.notify_param();
        true
    }

    pub fn set_color_rgb_raw(&mut self, name: &str, r: f64, g: f64, b: f64, weight: f64) -> bool {
        let Some(p) = self.parameters.get_mut(name).and_then(Param::as_color_mut) else {
            return false;
        };
        let ok = p.set_rgb_raw(r, g, b, weight);
        if ok {
            self.notify_param();
        }
        ok
    }

    pub fn set_color_xy(&mut self, name: &str, x: f64, y: f64, weight: f64) -> bool {
        let Some(p) = self.parameters.get_mut(name).and_then(Param::as_color_mut) else {
            return false;
        };
        p.set_xy(x, y, weight);
        self.notify_param();
        true
    }

    pub fn set_color_weight(&mut self, name: &str, weight: f64) -> bool {
        let Some(p) = self.parameters.get_mut(name).and_then(Param::as_color_mut) else {
            return false;
        };
        p.set_weight(weight);
        self.notify_param();
        true
    }

    /// Convenience view of a color parameter.
    pub fn color(&self, name: &str) -> Option<&ColorParam> {
        self.param(name).and_then(Param::as_color)
    }

    pub fn float_val(&self, name: &str) -> Option<f64> {
        self.param(name).and_then(Param::as_float).map(|p| p.val())
    }

    /// Grandmaster scaling across all parameters; each variant decides
    /// what (if anything) scales.
    pub fn scale_params(&mut self, factor: f64) {
        for p in self.parameters.values_mut() {
            p.scale(factor);
        }
    }

    /// Restores every parameter to its type-defined default.
    pub fn reset(&mut self) {
        for p in self.parameters.values_mut() {
            p.reset();
        }
        self.notify_param();
    }

    // ── Metadata ───────────────────────────────────────────────────

    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn metadata_map(&self) -> &IndexMap<String, String> {
        &self.metadata
    }

    pub fn set_metadata(&mut self, key: &str, val: impl Into<String>) {
        self.metadata.insert(key.to_string(), val.into());
        self.notify_metadata();
    }

    pub fn remove_metadata(&mut self, key: &str) -> bool {
        let removed = self.metadata.shift_remove(key).is_some();
        if removed {
            self.notify_metadata();
        }
        removed
    }

    // ── Observers ──────────────────────────────────────────────────

    pub fn add_param_observer(&mut self, f: DeviceObserver) -> usize {
        let id = self.next_observer_id;
        self.next_observer_id += 1;
        self.param_observers.insert(id, f);
        id
    }

    pub fn add_metadata_observer(&mut self, f: DeviceObserver) -> usize {
        let id = self.next_observer_id;
        self.next_observer_id += 1;
        self.metadata_observers.insert(id, f);
        id
    }

    pub fn remove_observer(&mut self, id: usize) -> bool {
        self.param_observers.remove(&id).is_some() || self.metadata_observers.remove(&id).is_some()
    }

    fn notify_param(&self) {
        for obs in self.param_observers.values() {
            obs(self);
        }
    }

    fn notify_metadata(&self) {
        for obs in self.metadata_observers.values() {
            obs(self);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::model::float::FloatParam;
    use crate::model::orientation::OrientationParam;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn dimmer() -> Device {
        let mut d = Device::new("dim1", 1, "Dimmer");
        d.set_param("intensity", Param::Float(FloatParam::unit(0.0)));
        d
    }

    #[test]
    fn typed_setter_refuses_missing_param() {
        let mut d = dimmer();
        assert!(!d.set_float("pan", 0.5));
        assert!(d.set_float("intensity", 0.5));
        assert_eq!(d.float_val("intensity"), Some(0.5));
    }

    #[test]
    fn typed_setter_refuses_variant_mismatch() {
        let mut d = dimmer();
        assert!(!d.set_orientation("intensity", 90.0));
        assert_eq!(d.float_val("intensity"), Some(0.0));
    }

    #[test]
    fn generic_setter_creates_and_replaces() {
        let mut d = dimmer();
        d.set_param("pan", Param::Orientation(OrientationParam::degrees(10.0)));
        assert!(d.param_exists("pan"));
        // Replacing with a different variant is allowed here.
        d.set_param("pan", Param::Float(FloatParam::unit(1.0)));
        assert_eq!(d.float_val("pan"), Some(1.0));
    }

    #[test]
    fn observers_fire_on_success_only() {
        let mut d = dimmer();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        d.add_param_observer(Arc::new(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(d.set_float("intensity", 0.3));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(!d.set_float("missing", 0.3));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn metadata_observer_separate_from_param_observer() {
        let mut d = dimmer();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        d.add_metadata_observer(Arc::new(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        d.set_float("intensity", 1.0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        d.set_metadata("gel", "R80");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(d.metadata("gel"), Some("R80"));
    }

    #[test]
    fn clone_drops_observers() {
        let mut d = dimmer();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        d.add_param_observer(Arc::new(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        let mut copy = d.clone();
        copy.set_float("intensity", 1.0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn reset_restores_defaults() {
        let mut d = dimmer();
        d.set_float("intensity", 0.9);
        d.reset();
        assert_eq!(d.float_val("intensity"), Some(0.0));
        assert!(d.param("intensity").unwrap().is_default());
    }

    #[test]
    fn serde_round_trip_skips_id() {
        let mut d = dimmer();
        d.set_metadata("position", "FOH");
        let json = serde_json::to_string(&d).unwrap();
        let back: Device = serde_json::from_str(&json).unwrap();
        let back = back.with_id("dim1");
        assert_eq!(back, d);
    }
}
