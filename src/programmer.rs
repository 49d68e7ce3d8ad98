use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::cue::Cue;
use crate::model::colorspace::RgbColorSpace;
use crate::model::device::Device;
use crate::model::device_set::DeviceSet;
use crate::model::param::Param;

/// Live-edit overlay: a device-shaped state separate from any layer, with
/// overwrite blend semantics for every captured device.
///
/// Any setter captures the devices it touches. The captured set and the
/// device map share one mutex so operator edits can race the tick safely;
/// the blend step takes the same lock.
pub struct Programmer {
    inner: Mutex<ProgrammerState>,
}

struct ProgrammerState {
    devices: IndexMap<String, Device>,
    captured: DeviceSet,
}

impl Programmer {
    /// Copies the rig's devices as the programmer's editing state.
    pub fn new(rig_devices: &IndexMap<String, Device>) -> Self {
        Self {
            inner: Mutex::new(ProgrammerState {
                devices: rig_devices
                    .iter()
                    .map(|(id, d)| (id.clone(), d.clone()))
                    .collect(),
                captured: DeviceSet::new(),
            }),
        }
    }

    // ── Setters (each captures the touched selection) ──────────────

    pub fn set_float(&self, selection: &DeviceSet, param: &str, val: f64) {
        let mut inner = self.inner.lock();
        inner.captured = inner.captured.union(selection);
        for id in selection.ids() {
            if let Some(d) = inner.devices.get_mut(id) {
                d.set_float(param, val);
            }
        }
    }

    pub fn set_orientation(&self, selection: &DeviceSet, param: &str, val: f64) {
        let mut inner = self.inner.lock();
        inner.captured = inner.captured.union(selection);
        for id in selection.ids() {
            if let Some(d) = inner.devices.get_mut(id) {
                d.set_orientation(param, val);
            }
        }
    }

    pub fn set_enum(&self, selection: &DeviceSet, param: &str, option: &str, tweak: Option<f64>) {
        let mut inner = self.inner.lock();
        inner.captured = inner.captured.union(selection);
        for id in selection.ids() {
            if let Some(d) = inner.devices.get_mut(id) {
                d.set_enum(param, option, tweak);
            }
        }
    }

    pub fn set_color_rgb(
        &self,
        selection: &DeviceSet,
        param: &str,
        r: f64,
        g: f64,
        b: f64,
        weight: f64,
        cs: RgbColorSpace,
    ) {
        let mut inner = self.inner.lock();
        inner.captured = inner.captured.union(selection);
        for id in selection.ids() {
            if let Some(d) = inner.devices.get_mut(id) {
                d.set_color_rgb(param, r, g, b, weight, cs);
            }
        }
    }

    pub fn set_color_rgb_raw(
        &self,
        selection: &DeviceSet,
        param: &str,
        r: f64,
        g: f64,
        b: f64,
        weight: f64,
    ) {
        let mut inner = self.inner.lock();
        inner.captured = inner.captured.union(selection);
        for id in selection.ids() {
            if let Some(d) = inner.devices.get_mut(id) {
                d.set_color_rgb_raw(param, r, g, b, weight);
            }
        }
    }

    pub fn set_color_channel(&self, selection: &DeviceSet, param: &str, channel: &str, val: f64) {
        let mut inner = self.inner.lock();
        inner.captured = inner.captured.union(selection);
        for id in selection.ids() {
            if let Some(d) = inner.devices.get_mut(id) {
                d.set_color_channel(param, channel, val);
            }
        }
    }

    pub fn set_color_xy(&self, selection: &DeviceSet, param: &str, x: f64, y: f64, weight: f64) {
        let mut inner = self.inner.lock();
        inner.captured = inner.captured.union(selection);
        for id in selection.ids() {
            if let Some(d) = inner.devices.get_mut(id) {
                d.set_color_xy(param, x, y, weight);
            }
        }
    }

    /// Generic setter; may create the parameter on the programmer's copy.
    pub fn set_param(&self, selection: &DeviceSet, param: &str, val: &Param) {
        let mut inner = self.inner.lock();
        inner.captured = inner.captured.union(selection);
        for id in selection.ids() {
            if let Some(d) = inner.devices.get_mut(id) {
                d.set_param(param, val.clone());
            }
        }
    }

    /// Edits one device through a closure, capturing it.
    pub fn with_device<R>(&self, id: &str, f: impl FnOnce(&mut Device) -> R) -> Option<R> {
        let mut inner = self.inner.lock();
        if !inner.devices.contains_key(id) {
            return None;
        }
        inner.captured = DeviceSet::from_ids([id.to_string()]).union(&inner.captured);
        inner.devices.get_mut(id).map(f)
    }

    /// Reads one device without capturing it.
    pub fn read_device<R>(&self, id: &str, f: impl FnOnce(&Device) -> R) -> Option<R> {
        let inner = self.inner.lock();
        inner.devices.get(id).map(f)
    }

    // ── Capture management ─────────────────────────────────────────

    /// Captures devices without changing any value.
    pub fn capture(&self, selection: &DeviceSet) {
        let mut inner = self.inner.lock();
        inner.captured = inner.captured.union(selection);
    }

    /// Pulls live values from the rig into the programmer for the given
    /// devices ("steal from current output"), capturing them.
    pub fn capture_from_rig(&self, rig_devices: &IndexMap<String, Device>, selection: &DeviceSet) {
        let mut inner = self.inner.lock();
        inner.captured = inner.captured.union(selection);
        for id in selection.ids() {
            let Some(live) = rig_devices.get(id) else {
                continue;
            };
            if let Some(mine) = inner.devices.get_mut(id) {
                for (name, param) in live.params() {
                    mine.copy_param_value(name, param);
                }
            }
        }
    }

    pub fn captured(&self) -> DeviceSet {
        self.inner.lock().captured.clone()
    }

    pub fn is_captured(&self, id: &str) -> bool {
        self.inner.lock().captured.contains(id)
    }

    /// Empties the captured set; values stay.
    pub fn clear_captured(&self) {
        self.inner.lock().captured = DeviceSet::new();
    }

    /// Restores programmer values to defaults; the captured set stays.
    pub fn reset(&self) {
        for d in self.inner.lock().devices.values_mut() {
            d.reset();
        }
    }

    pub fn clear_and_reset(&self) {
        let mut inner = self.inner.lock();
        inner.captured = DeviceSet::new();
        for d in inner.devices.values_mut() {
            d.reset();
        }
    }

    // ── Output ─────────────────────────────────────────────────────

    /// Overwrites `target` with the programmer's values for every captured
    /// device and every parameter present on both sides. Runs after all
    /// layers.
    pub fn blend(&self, target: &mut IndexMap<String, Device>) {
        let inner = self.inner.lock();
        for id in inner.captured.ids() {
            let Some(src) = inner.devices.get(id) else {
                continue;
            };
            let Some(dst) = target.get_mut(id) else {
                continue;
            };
            for (name, param) in src.params() {
                dst.copy_param_value(name, param);
            }
        }
    }

    /// Snapshots the programmer state into a new cue covering all devices.
    pub fn get_cue(&self, upfade: f64, downfade: f64, delay: f64) -> Cue {
        let inner = self.inner.lock();
        Cue::from_state(&inner.devices, upfade, downfade, delay)
    }
}

impl Serialize for Programmer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let inner = self.inner.lock();
        let mut node = serializer.serialize_struct("Programmer", 2)?;
        node.serialize_field("devices", &inner.devices)?;
        node.serialize_field("captured", &inner.captured)?;
        node.end()
    }
}

impl<'de> Deserialize<'de> for Programmer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Node {
            devices: IndexMap<String, Device>,
            #[serde(default)]
            captured: DeviceSet,
        }
        let node = Node::deserialize(deserializer)?;
        let devices = node
            .devices
            .into_iter()
            .map(|(id, d)| {
                let d = d.with_id(id.clone());
                (id, d)
            })
            .collect();
        Ok(Self {
            inner: Mutex::new(ProgrammerState {
                devices,
                captured: node.captured,
            }),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::model::float::FloatParam;

    fn rig_devices() -> IndexMap<String, Device> {
        let mut out = IndexMap::new();
        for (id, ch) in [("d1", 1), ("d2", 2)] {
            let mut d = Device::new(id, ch, "Dimmer");
            d.set_param("intensity", Param::Float(FloatParam::unit(0.0)));
            out.insert(id.to_string(), d);
        }
        out
    }

    fn one(ids: &[&str]) -> DeviceSet {
        DeviceSet::from_ids(ids.iter().map(|s| (*s).to_string()))
    }

    #[test]
    fn setters_capture_touched_devices() {
        let prog = Programmer::new(&rig_devices());
        assert!(!prog.is_captured("d1"));
        prog.set_float(&one(&["d1"]), "intensity", 0.4);
        assert!(prog.is_captured("d1"));
        assert!(!prog.is_captured("d2"));
    }

    #[test]
    fn blend_overwrites_captured_only() {
        let prog = Programmer::new(&rig_devices());
        prog.set_float(&one(&["d1"]), "intensity", 0.2);

        let mut target = rig_devices();
        target.get_mut("d1").unwrap().set_float("intensity", 1.0);
        target.get_mut("d2").unwrap().set_float("intensity", 1.0);
        prog.blend(&mut target);
        assert!((target["d1"].float_val("intensity").unwrap() - 0.2).abs() < 1e-9);
        assert!((target["d2"].float_val("intensity").unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn blend_is_idempotent() {
        let prog = Programmer::new(&rig_devices());
        prog.set_float(&one(&["d1"]), "intensity", 0.3);

        let mut once = rig_devices();
        prog.blend(&mut once);
        let mut twice = rig_devices();
        prog.blend(&mut twice);
        prog.blend(&mut twice);
        assert_eq!(once, twice);
    }

    #[test]
    fn clear_captured_keeps_values() {
        let prog = Programmer::new(&rig_devices());
        prog.set_float(&one(&["d1"]), "intensity", 0.7);
        prog.clear_captured();
        assert!(!prog.is_captured("d1"));
        let v = prog.read_device("d1", |d| d.float_val("intensity")).flatten();
        assert_eq!(v, Some(0.7));
    }

    #[test]
    fn reset_keeps_captured() {
        let prog = Programmer::new(&rig_devices());
        prog.set_float(&one(&["d1"]), "intensity", 0.7);
        prog.reset();
        assert!(prog.is_captured("d1"));
        let v = prog.read_device("d1", |d| d.float_val("intensity")).flatten();
        assert_eq!(v, Some(0.0));
    }

    #[test]
    fn clear_and_reset_does_both() {
        let prog = Programmer::new(&rig_devices());
        prog.set_float(&one(&["d1"]), "intensity", 0.7);
        prog.clear_and_reset();
        assert!(!prog.is_captured("d1"));
        let v = prog.read_device("d1", |d| d.float_val("intensity")).flatten();
        assert_eq!(v, Some(0.0));
    }

    #[test]
    fn capture_from_rig_steals_live_values() {
        let prog = Programmer::new(&rig_devices());
        let mut rig = rig_devices();
        rig.get_mut("d2").unwrap().set_float("intensity", 0.9);
        prog.capture_from_rig(&rig, &one(&["d2"]));
        assert!(prog.is_captured("d2"));
        let v = prog.read_device("d2", |d| d.float_val("intensity")).flatten();
        assert_eq!(v, Some(0.9));
    }

    #[test]
    fn get_cue_snapshots_all_devices() {
        let prog = Programmer::new(&rig_devices());
        prog.set_float(&one(&["d1"]), "intensity", 0.5);
        let cue = prog.get_cue(2.0, 2.0, 0.0);
        assert!(cue.timeline().track("d1:intensity").is_some());
        assert!(cue.timeline().track("d2:intensity").is_some());
        assert!((cue.upfade() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn with_device_captures() {
        let prog = Programmer::new(&rig_devices());
        prog.with_device("d1", |d| d.set_float("intensity", 0.6));
        assert!(prog.is_captured("d1"));
        assert!(prog.with_device("ghost", |_| ()).is_none());
    }

    #[test]
    fn serde_round_trip() {
        let prog = Programmer::new(&rig_devices());
        prog.set_float(&one(&["d1"]), "intensity", 0.5);
        let json = serde_json::to_string(&prog).unwrap();
        let back: Programmer = serde_json::from_str(&json).unwrap();
        assert!(back.is_captured("d1"));
        let v = back.read_device("d1", |d| d.float_val("intensity")).flatten();
        assert_eq!(v, Some(0.5));
        assert_eq!(back.read_device("d1", |d| d.id().to_string()).unwrap(), "d1");
    }
}
