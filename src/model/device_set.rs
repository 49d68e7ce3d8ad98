use std::cmp::Ordering;
use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::device::Device;
use super::param::Param;

/// String comparison operator for metadata predicates. Negation (`!` and
/// the `!=` operator) is carried as a polarity flag by the caller, so it
/// composes identically for every operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataOp {
    Equals,
    Contains,
    Prefix,
    Suffix,
}

impl MetadataOp {
    pub fn matches(self, value: &str, arg: &str) -> bool {
        match self {
            MetadataOp::Equals => value == arg,
            MetadataOp::Contains => value.contains(arg),
            MetadataOp::Prefix => value.starts_with(arg),
            MetadataOp::Suffix => value.ends_with(arg),
        }
    }
}

/// Numeric comparison operator for parameter predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumOp {
    Lt,
    Le,
    Gt,
    Ge,
    Ne,
    Eq,
}

impl NumOp {
    pub fn matches(self, ord: Ordering) -> bool {
        match self {
            NumOp::Lt => ord == Ordering::Less,
            NumOp::Le => ord != Ordering::Greater,
            NumOp::Gt => ord == Ordering::Greater,
            NumOp::Ge => ord != Ordering::Less,
            NumOp::Ne => ord != Ordering::Equal,
            NumOp::Eq => ord == Ordering::Equal,
        }
    }
}

/// An ordered set of device ids with immutable-view combinators: every
/// operation returns a new set and shares nothing mutable. Sets carry ids,
/// not devices; callers resolve them against the rig that produced them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceSet {
    ids: BTreeSet<String>,
}

impl DeviceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ids<I: IntoIterator<Item = String>>(ids: I) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    /// Every device in the map.
    pub fn all(devices: &IndexMap<String, Device>) -> Self {
        Self {
            ids: devices.keys().cloned().collect(),
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Resolves the member devices, skipping ids the map no longer has.
    pub fn devices<'a>(&self, devices: &'a IndexMap<String, Device>) -> Vec<&'a Device> {
        self.ids.iter().filter_map(|id| devices.get(id)).collect()
    }

    // ── Combinators ────────────────────────────────────────────────

    /// Adds a device by id if it exists in the map.
    pub fn add_id(&self, devices: &IndexMap<String, Device>, id: &str) -> Self {
        let mut out = self.clone();
        if devices.contains_key(id) {
            out.ids.insert(id.to_string());
        }
        out
    }

    pub fn remove_id(&self, id: &str) -> Self {
        let mut out = self.clone();
        out.ids.remove(id);
        out
    }

    /// Union with devices satisfying the predicate.
    pub fn add_where<F>(&self, devices: &IndexMap<String, Device>, pred: F) -> Self
    where
        F: Fn(&Device) -> bool,
    {
        let mut out = self.clone();
        for (id, d) in devices {
            if pred(d) {
                out.ids.insert(id.clone());
            }
        }
        out
    }

    /// Keeps only members satisfying the predicate. Members missing from
    /// the map are dropped.
    pub fn retain_where<F>(&self, devices: &IndexMap<String, Device>, pred: F) -> Self
    where
        F: Fn(&Device) -> bool,
    {
        let ids = self
            .ids
            .iter()
            .filter(|id| devices.get(*id).is_some_and(&pred))
            .cloned()
            .collect();
        Self { ids }
    }

    pub fn add_channel(&self, devices: &IndexMap<String, Device>, channel: u32) -> Self {
        self.add_where(devices, |d| d.channel() == channel)
    }

    pub fn add_channel_range(
        &self,
        devices: &IndexMap<String, Device>,
        lower: u32,
        upper: u32,
    ) -> Self {
        self.add_where(devices, |d| (lower..=upper).contains(&d.channel()))
    }

    /// Metadata predicate. `eq` is the match polarity after folding any
    /// leading `!` and the `!=` operator; devices lacking the key never
    /// match regardless of polarity.
    pub fn add_metadata_match(
        &self,
        devices: &IndexMap<String, Device>,
        key: &str,
        op: MetadataOp,
        arg: &str,
        eq: bool,
    ) -> Self {
        self.add_where(devices, |d| {
            d.metadata(key).is_some_and(|v| op.matches(v, arg) == eq)
        })
    }

    pub fn retain_metadata_match(
        &self,
        devices: &IndexMap<String, Device>,
        key: &str,
        op: MetadataOp,
        arg: &str,
        eq: bool,
    ) -> Self {
        self.retain_where(devices, |d| {
            d.metadata(key).is_some_and(|v| op.matches(v, arg) == eq)
        })
    }

    /// Parameter predicate against a probe value using the typed
    /// comparator. Devices lacking the parameter, or holding an
    /// incomparable variant, never match.
    pub fn add_param_match(
        &self,
        devices: &IndexMap<String, Device>,
        param: &str,
        op: NumOp,
        probe: &Param,
        eq: bool,
    ) -> Self {
        self.add_where(devices, |d| {
            d.param(param)
                .and_then(|p| p.compare(probe))
                .is_some_and(|ord| op.matches(ord) == eq)
        })
    }

    pub fn retain_param_match(
        &self,
        devices: &IndexMap<String, Device>,
        param: &str,
        op: NumOp,
        probe: &Param,
        eq: bool,
    ) -> Self {
        self.retain_where(devices, |d| {
            d.param(param)
                .and_then(|p| p.compare(probe))
                .is_some_and(|ord| op.matches(ord) == eq)
        })
    }

    pub fn union(&self, other: &DeviceSet) -> Self {
        let mut out = self.clone();
        out.ids.extend(other.ids.iter().cloned());
        out
    }

    pub fn difference(&self, other: &DeviceSet) -> Self {
        let ids = self.ids.difference(&other.ids).cloned().collect();
        Self { ids }
    }

    // ── Broadcast setters ──────────────────────────────────────────
    // Devices without the named parameter are silently skipped.

    pub fn set_float(&self, devices: &mut IndexMap<String, Device>, param: &str, val: f64) {
        for id in &self.ids {
            if let Some(d) = devices.get_mut(id) {
                if d.param_exists(param) {
                    d.set_float(param, val);
                }
            }
        }
    }

    pub fn set_enum(
        &self,
        devices: &mut IndexMap<String, Device>,
        param: &str,
        option: &str,
        tweak: Option<f64>,
    ) {
        for id in &self.ids {
            if let Some(d) = devices.get_mut(id) {
                if d.param_exists(param) {
                    d.set_enum(param, option, tweak);
                }
            }
        }
    }

    pub fn reset(&self, devices: &mut IndexMap<String, Device>) {
        for id in &self.ids {
            if let Some(d) = devices.get_mut(id) {
                d.reset();
            }
        }
    }

    /// Human-readable membership summary.
    pub fn info(&self) -> String {
        let ids: Vec<&str> = self.ids().collect();
        format!("Device set contains {} devices. IDs: {}", ids.len(), ids.join(", "))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::model::float::FloatParam;

    fn rig_devices() -> IndexMap<String, Device> {
        let mut out = IndexMap::new();
        for (id, ch, gel) in [("d1", 1, "R80"), ("d2", 2, "R02"), ("d3", 3, "R80")] {
            let mut d = Device::new(id, ch, "Par");
            d.set_param("intensity", Param::Float(FloatParam::unit(0.0)));
            d.set_metadata("gel", gel);
            out.insert(id.to_string(), d);
        }
        out
    }

    #[test]
    fn combinators_return_new_sets() {
        let devices = rig_devices();
        let base = DeviceSet::new();
        let with_d1 = base.add_id(&devices, "d1");
        assert!(base.is_empty());
        assert!(with_d1.contains("d1"));
    }

    #[test]
    fn unknown_id_is_not_added() {
        let devices = rig_devices();
        let s = DeviceSet::new().add_id(&devices, "nope");
        assert!(s.is_empty());
    }

    #[test]
    fn channel_range_is_inclusive() {
        let devices = rig_devices();
        let s = DeviceSet::new().add_channel_range(&devices, 1, 2);
        assert_eq!(s.len(), 2);
        assert!(s.contains("d1") && s.contains("d2"));
    }

    #[test]
    fn metadata_lacking_key_never_matches() {
        let mut devices = rig_devices();
        devices.get_mut("d2").unwrap().remove_metadata("gel");
        // Polarity false = "does not equal", but d2 lacks the key entirely.
        let s = DeviceSet::new().add_metadata_match(&devices, "gel", MetadataOp::Equals, "R80", false);
        assert!(!s.contains("d2"));
        assert!(s.is_empty());
    }

    #[test]
    fn param_predicate_uses_typed_comparator() {
        let mut devices = rig_devices();
        devices.get_mut("d1").unwrap().set_float("intensity", 0.8);
        let probe = Param::Float(FloatParam::unit(0.5));
        let s = DeviceSet::new().add_param_match(&devices, "intensity", NumOp::Gt, &probe, true);
        assert_eq!(s.len(), 1);
        assert!(s.contains("d1"));
    }

    #[test]
    fn union_and_difference() {
        let devices = rig_devices();
        let a = DeviceSet::new().add_id(&devices, "d1").add_id(&devices, "d2");
        let b = DeviceSet::new().add_id(&devices, "d2").add_id(&devices, "d3");
        assert_eq!(a.union(&b).len(), 3);
        let diff = a.difference(&b);
        assert_eq!(diff.len(), 1);
        assert!(diff.contains("d1"));
    }

    #[test]
    fn broadcast_skips_devices_without_param() {
        let mut devices = rig_devices();
        devices.get_mut("d3").unwrap().remove_param("intensity");
        let s = DeviceSet::all(&devices);
        s.set_float(&mut devices, "intensity", 0.5);
        assert_eq!(devices["d1"].float_val("intensity"), Some(0.5));
        assert_eq!(devices["d3"].float_val("intensity"), None);
    }
}
