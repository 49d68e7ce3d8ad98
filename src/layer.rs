use std::collections::BTreeSet;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::model::device::Device;
use crate::model::device_set::DeviceSet;
use crate::timeline::{TimelineEntry, TimelineMap};

/// How a layer's state combines into the flattened output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlendMode {
    /// Blend every parameter of every device.
    #[serde(rename = "BLEND_OPAQUE")]
    Opaque,
    /// Ignore parameters still at their default value.
    #[serde(rename = "NULL_DEFAULT")]
    NullDefault,
    /// Ignore devices whose intensity is exactly 0.
    #[serde(rename = "NULL_INTENSITY")]
    NullIntensity,
    /// Blend only the layer's selected devices.
    #[serde(rename = "SELECTED_ONLY")]
    SelectedOnly,
}

/// Progress of one playing timeline. The timeline is a prepared copy made
/// at enqueue time, so registry edits cannot tear a running fade; nested
/// references still resolve by id through the registry.
#[derive(Debug)]
pub struct PlaybackData {
    timeline: TimelineEntry,
    source_id: Option<String>,
    start: u64,
    prev_t: u64,
}

impl PlaybackData {
    pub fn new(timeline: TimelineEntry, source_id: Option<String>) -> Self {
        Self {
            timeline,
            source_id,
            start: 0,
            prev_t: 0,
        }
    }
}

/// A prioritized, blendable copy of the rig's state, animated by playing
/// timelines from the Playback registry.
///
/// A layer runs one timeline at a time; one more may sit queued and is
/// promoted at a tick boundary (latest enqueue wins the slot). The layer's
/// state is written only by the tick.
#[derive(Serialize, Deserialize)]
pub struct Layer {
    name: String,
    priority: i32,
    mode: BlendMode,
    opacity: f64,
    active: bool,
    #[serde(rename = "invertFilter")]
    invert_filter: bool,
    #[serde(rename = "paramFilter", default, skip_serializing_if = "BTreeSet::is_empty")]
    param_filter: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "DeviceSet::is_empty")]
    selected: DeviceSet,
    #[serde(rename = "cueList", default, skip_serializing_if = "Option::is_none")]
    cue_list: Option<String>,
    #[serde(rename = "currentCue", default = "no_cue")]
    current_cue: f64,
    state: IndexMap<String, Device>,
    // Playback progress is never persisted.
    #[serde(skip)]
    queued: Mutex<Option<PlaybackData>>,
    #[serde(skip)]
    playback: Option<PlaybackData>,
    #[serde(skip)]
    paused: bool,
    #[serde(skip)]
    pause_started: Option<u64>,
    #[serde(skip)]
    paused_accum: u64,
    #[serde(skip)]
    last_played: Option<String>,
}

fn no_cue() -> f64 {
    -1.0
}

impl std::fmt::Debug for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layer")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("mode", &self.mode)
            .field("opacity", &self.opacity)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl Layer {
    /// Copies every rig device into the layer, reset to defaults. Layers
    /// start inactive.
    pub fn new(
        rig_devices: &IndexMap<String, Device>,
        name: impl Into<String>,
        priority: i32,
        mode: BlendMode,
    ) -> Self {
        let mut state: IndexMap<String, Device> = rig_devices
            .iter()
            .map(|(id, d)| (id.clone(), d.clone()))
            .collect();
        for d in state.values_mut() {
            d.reset();
        }
        Self {
            name: name.into(),
            priority,
            mode,
            opacity: 1.0,
            active: false,
            invert_filter: false,
            param_filter: BTreeSet::new(),
            selected: DeviceSet::new(),
            cue_list: None,
            current_cue: -1.0,
            state,
            queued: Mutex::new(None),
            playback: None,
            paused: false,
            pause_started: None,
            paused_accum: 0,
            last_played: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn set_priority(&mut self, priority: i32) {
        self.priority = priority;
    }

    pub fn mode(&self) -> BlendMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: BlendMode) {
        self.mode = mode;
    }

    pub fn opacity(&self) -> f64 {
        self.opacity
    }

    pub fn set_opacity(&mut self, opacity: f64) {
        self.opacity = opacity.clamp(0.0, 1.0);
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    // ── Parameter filter ───────────────────────────────────────────

    pub fn add_param_filter(&mut self, param: &str) {
        self.param_filter.insert(param.to_string());
    }

    pub fn remove_param_filter(&mut self, param: &str) {
        self.param_filter.remove(param);
    }

    pub fn clear_param_filter(&mut self) {
        self.param_filter.clear();
    }

    pub fn invert_filter(&mut self) {
        self.invert_filter = !self.invert_filter;
    }

    // ── Selection ──────────────────────────────────────────────────

    pub fn set_selected_devices(&mut self, set: DeviceSet) {
        self.selected = set;
    }

    pub fn add_selected_devices(&mut self, set: &DeviceSet) {
        self.selected = self.selected.union(set);
    }

    pub fn remove_selected_devices(&mut self, set: &DeviceSet) {
        self.selected = self.selected.difference(set);
    }

    pub fn clear_selected_devices(&mut self) {
        self.selected = DeviceSet::new();
    }

    pub fn selected_devices(&self) -> &DeviceSet {
        &self.selected
    }

    // ── Cue list assignment ────────────────────────────────────────

    pub fn cue_list(&self) -> Option<&str> {
        self.cue_list.as_deref()
    }

    pub fn set_cue_list(&mut self, name: Option<String>, reset_current: bool) {
        self.cue_list = name;
        if reset_current {
            self.current_cue = -1.0;
        }
    }

    /// Current cue number; negative means none.
    pub fn current_cue(&self) -> f64 {
        self.current_cue
    }

    pub fn set_current_cue(&mut self, num: f64) {
        self.current_cue = num;
    }

    // ── State access ───────────────────────────────────────────────

    pub fn state(&self) -> &IndexMap<String, Device> {
        &self.state
    }

    pub(crate) fn state_mut(&mut self) -> &mut IndexMap<String, Device> {
        &mut self.state
    }

    /// Resets the layer state to defaults and forgets the current cue.
    pub fn reset(&mut self) {
        for d in self.state.values_mut() {
            d.reset();
        }
        self.current_cue = -1.0;
    }

    /// The most recently completed or started timeline id.
    pub fn recent_timeline(&self) -> Option<&str> {
        self.playback
            .as_ref()
            .and_then(|p| p.source_id.as_deref())
            .or(self.last_played.as_deref())
    }

    // ── Playback control ───────────────────────────────────────────

    /// Queues a registry timeline for playback. The queue holds one entry;
    /// enqueueing again before promotion replaces it.
    pub fn play(&self, id: &str, registry: &TimelineMap) -> bool {
        let Some(entry) = registry.get(id) else {
            warn!("layer {} cannot play unknown timeline {id}", self.name);
            return false;
        };
        self.enqueue(PlaybackData::new(entry.clone(), Some(id.to_string())));
        true
    }

    /// Queues an already prepared playback entry (cue transitions).
    pub fn enqueue(&self, pb: PlaybackData) {
        debug!("layer {} queued a playback", self.name);
        *self.queued.lock() = Some(pb);
    }

    /// Freezes elapsed time. Frozen layers keep blending their last state.
    pub fn pause(&mut self, now: u64) {
        if self.playback.is_some() && !self.paused {
            self.paused = true;
            self.pause_started = Some(now);
        }
    }

    pub fn resume(&mut self, now: u64) {
        if self.paused {
            if let Some(started) = self.pause_started.take() {
                self.paused_accum += now.saturating_sub(started);
            }
            self.paused = false;
        }
    }

    /// Drops queued and active playback. The layer state stays wherever
    /// the last update left it.
    pub fn stop(&mut self) {
        self.queued.lock().take();
        if let Some(pb) = self.playback.take() {
            self.last_played = pb.source_id;
        }
        self.paused = false;
        self.pause_started = None;
        self.paused_accum = 0;
    }

    /// Advances playback to `now` (milliseconds on the tick clock):
    /// promotes the queued timeline if none is active, copies animated
    /// values into the layer state, fires events in the elapsed window,
    /// and finalizes completed timelines.
    pub fn update(&mut self, now: u64, registry: &TimelineMap) {
        // Promote under the queue lock, then release it before evaluating.
        if self.playback.is_none() {
            let queued = self.queued.lock().take();
            if let Some(mut pb) = queued {
                pb.timeline.set_current_state(&self.state);
                pb.start = now;
                pb.prev_t = 0;
                self.paused = false;
                self.pause_started = None;
                self.paused_accum = 0;
                self.playback = Some(pb);
            }
        }

        if self.paused {
            return;
        }
        let Some(mut pb) = self.playback.take() else {
            return;
        };

        let t_rel = now.saturating_sub(pb.start).saturating_sub(self.paused_accum);
        self.apply_values(&pb.timeline, t_rel, registry);
        pb.timeline.execute_events(pb.prev_t, t_rel, registry);
        pb.prev_t = t_rel;

        if pb.timeline.is_done(t_rel, registry) {
            // Terminal clamp, then end events, exactly once.
            let end = pb.timeline.length();
            self.apply_values(&pb.timeline, end, registry);
            pb.timeline.execute_end_events();
            self.last_played = pb.source_id.take();
            self.paused_accum = 0;
            // A queued timeline may start this same tick.
            if self.queued.lock().is_some() {
                self.update(now, registry);
            }
        } else {
            self.playback = Some(pb);
        }
    }

    /// Copies every animated parameter's value at `t` into the layer
    /// state. Nil values leave the parameter untouched.
    fn apply_values(&mut self, timeline: &TimelineEntry, t: u64, registry: &TimelineMap) {
        match timeline.identifiers() {
            Some(keys) => {
                for key in keys {
                    let Some((dev, param)) = key.split_once(':') else {
                        continue;
                    };
                    let Some(val) = timeline.value_at(&key, t, registry, None) else {
                        continue;
                    };
                    if let Some(d) = self.state.get_mut(dev) {
                        d.copy_param_value(param, &val);
                    }
                }
            }
            // Procedural timelines animate everything in the layer state,
            // modulating each parameter's current value.
            None => {
                let targets: Vec<(String, String)> = self
                    .state
                    .iter()
                    .flat_map(|(id, d)| {
                        d.param_names()
                            .map(|p| (id.clone(), p.to_string()))
                            .collect::<Vec<_>>()
                    })
                    .collect();
                for (dev, param) in targets {
                    let current = self
                        .state
                        .get(&dev)
                        .and_then(|d| d.param(&param))
                        .cloned();
                    let key = crate::timeline::timeline_key(&dev, &param);
                    let Some(val) = timeline.value_at(&key, t, registry, current.as_ref()) else {
                        continue;
                    };
                    if let Some(d) = self.state.get_mut(&dev) {
                        d.copy_param_value(&param, &val);
                    }
                }
            }
        }
    }

    // ── Blending ───────────────────────────────────────────────────

    /// Blends this layer's state onto `target` under the layer's blend
    /// mode, parameter filter, and opacity.
    pub fn blend(&self, target: &mut IndexMap<String, Device>) {
        let selected_ids: Vec<&str> = match self.mode {
            BlendMode::SelectedOnly => self.selected.ids().collect(),
            _ => self.state.keys().map(String::as_str).collect(),
        };

        for id in selected_ids {
            let Some(src_dev) = self.state.get(id) else {
                continue;
            };
            let Some(dst_dev) = target.get_mut(id) else {
                warn!(
                    "state given to layer {} does not contain a device with id {id}",
                    self.name
                );
                continue;
            };

            if self.mode == BlendMode::NullIntensity {
                if let Some(intensity) = src_dev.float_val("intensity") {
                    if intensity == 0.0 {
                        continue;
                    }
                }
            }

            for (pname, src) in src_dev.params() {
                let Some(dst) = dst_dev.param_mut(pname) else {
                    continue;
                };

                // Filter empty, OR (name in filter AND not inverted),
                // OR (name not in filter AND inverted).
                let in_filter = self.param_filter.contains(pname);
                if !(self.param_filter.is_empty() || (in_filter != self.invert_filter)) {
                    continue;
                }

                if self.mode == BlendMode::NullDefault && src.is_default() {
                    continue;
                }

                // res = dst * (1 - opacity) + src * opacity
                if let Some(res) = dst.lerp(src, self.opacity) {
                    *dst = res;
                }
            }
        }
    }

    /// Rebinds device ids after deserialization, where ids live in map
    /// keys rather than device nodes.
    pub(crate) fn restore_ids(&mut self) {
        let state = std::mem::take(&mut self.state);
        self.state = state
            .into_iter()
            .map(|(id, d)| {
                let d = d.with_id(id.clone());
                (id, d)
            })
            .collect();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::cue::Cue;
    use crate::model::float::FloatParam;
    use crate::model::param::Param;
    use crate::sine::{SineMode, SineWave};
    use crate::timeline::{Keyframe, Timeline};

    fn rig_devices() -> IndexMap<String, Device> {
        let mut out = IndexMap::new();
        for (id, ch) in [("d1", 1), ("d2", 2)] {
            let mut d = Device::new(id, ch, "Dimmer");
            d.set_param("intensity", Param::Float(FloatParam::unit(0.0)));
            d.set_param("frost", Param::Float(FloatParam::unit(0.0)));
            out.insert(id.to_string(), d);
        }
        out
    }

    fn fade_timeline(from: f64, to: f64, ms: u64) -> TimelineEntry {
        let mut tl = Timeline::new();
        tl.set_keyframe(
            "d1:intensity",
            Keyframe::value(0, Param::Float(FloatParam::unit(from))),
        );
        tl.set_keyframe(
            "d1:intensity",
            Keyframe::value(ms, Param::Float(FloatParam::unit(to))),
        );
        TimelineEntry::Timeline(tl)
    }

    fn intensity(state: &IndexMap<String, Device>, id: &str) -> f64 {
        state[id].float_val("intensity").unwrap()
    }

    #[test]
    fn queued_timeline_promotes_on_update() {
        let devices = rig_devices();
        let mut layer = Layer::new(&devices, "main", 0, BlendMode::Opaque);
        let mut reg: TimelineMap = IndexMap::new();
        reg.insert("fade".to_string(), fade_timeline(0.0, 1.0, 2000));

        assert!(layer.play("fade", &reg));
        layer.update(1000, &reg); // promoted here, t_rel = 0
        assert!((intensity(layer.state(), "d1") - 0.0).abs() < 1e-9);
        layer.update(2000, &reg); // t_rel = 1000, halfway
        assert!((intensity(layer.state(), "d1") - 0.5).abs() < 1e-9);
        layer.update(3000, &reg); // done, clamped
        assert!((intensity(layer.state(), "d1") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_timeline_refused() {
        let devices = rig_devices();
        let layer = Layer::new(&devices, "main", 0, BlendMode::Opaque);
        let reg: TimelineMap = IndexMap::new();
        assert!(!layer.play("ghost", &reg));
    }

    #[test]
    fn latest_enqueue_wins_the_slot() {
        let devices = rig_devices();
        let mut layer = Layer::new(&devices, "main", 0, BlendMode::Opaque);
        let mut reg: TimelineMap = IndexMap::new();
        reg.insert("a".to_string(), fade_timeline(0.0, 0.25, 1000));
        reg.insert("b".to_string(), fade_timeline(0.0, 0.75, 1000));

        layer.play("a", &reg);
        layer.play("b", &reg);
        layer.update(0, &reg);
        layer.update(5000, &reg);
        assert!((intensity(layer.state(), "d1") - 0.75).abs() < 1e-9);
    }

    #[test]
    fn pause_freezes_elapsed_time() {
        let devices = rig_devices();
        let mut layer = Layer::new(&devices, "main", 0, BlendMode::Opaque);
        let mut reg: TimelineMap = IndexMap::new();
        reg.insert("fade".to_string(), fade_timeline(0.0, 1.0, 2000));

        layer.play("fade", &reg);
        layer.update(0, &reg);
        layer.update(500, &reg);
        assert!((intensity(layer.state(), "d1") - 0.25).abs() < 1e-9);

        layer.pause(500);
        layer.update(10_000, &reg);
        assert!((intensity(layer.state(), "d1") - 0.25).abs() < 1e-9);

        layer.resume(10_000);
        layer.update(10_500, &reg); // 1000 ms of unpaused time total
        assert!((intensity(layer.state(), "d1") - 0.5).abs() < 1e-9);
    }

    #[test]
    fn stop_clears_playback_and_keeps_state() {
        let devices = rig_devices();
        let mut layer = Layer::new(&devices, "main", 0, BlendMode::Opaque);
        let mut reg: TimelineMap = IndexMap::new();
        reg.insert("fade".to_string(), fade_timeline(0.0, 1.0, 2000));

        layer.play("fade", &reg);
        layer.update(0, &reg);
        layer.update(1000, &reg);
        layer.stop();
        layer.update(5000, &reg);
        assert!((intensity(layer.state(), "d1") - 0.5).abs() < 1e-9);
        assert_eq!(layer.recent_timeline(), Some("fade"));
    }

    #[test]
    fn completion_promotes_next_queued_same_tick() {
        let devices = rig_devices();
        let mut layer = Layer::new(&devices, "main", 0, BlendMode::Opaque);
        let mut reg: TimelineMap = IndexMap::new();
        reg.insert("a".to_string(), fade_timeline(0.0, 1.0, 100));

        layer.play("a", &reg);
        layer.update(0, &reg);
        // Finish "a"; then queue "b" and let the same tick promote it.
        reg.insert("b".to_string(), fade_timeline(1.0, 0.0, 100));
        layer.play("b", &reg);
        layer.update(200, &reg);
        // "b" was promoted at t=200; its fade runs from there.
        layer.update(300, &reg);
        assert!((intensity(layer.state(), "d1") - 0.0).abs() < 1e-9);
    }

    #[test]
    fn cue_transition_uses_layer_state_as_start() {
        let devices = rig_devices();
        let mut layer = Layer::new(&devices, "main", 0, BlendMode::Opaque);
        layer.state_mut().get_mut("d1").unwrap().set_float("intensity", 0.5);

        let mut target = rig_devices();
        target.get_mut("d1").unwrap().set_float("intensity", 1.0);
        let cue = Cue::from_state(&target, 2.0, 2.0, 0.0);
        let prepared = cue.prepare_transition(layer.state());
        let reg: TimelineMap = IndexMap::new();

        layer.enqueue(PlaybackData::new(TimelineEntry::Cue(prepared), None));
        layer.update(0, &reg);
        layer.update(1000, &reg);
        // Halfway from 0.5 to 1.0.
        assert!((intensity(layer.state(), "d1") - 0.75).abs() < 1e-9);
    }

    #[test]
    fn sine_wave_modulates_current_state() {
        let devices = rig_devices();
        let mut layer = Layer::new(&devices, "main", 0, BlendMode::Opaque);
        let mut reg: TimelineMap = IndexMap::new();
        reg.insert(
            "wave".to_string(),
            TimelineEntry::SineWave(SineWave::new(2.0, 0.5, 0.0, 0.5, SineMode::Abs)),
        );
        layer.play("wave", &reg);
        layer.update(0, &reg);
        layer.update(500, &reg); // quarter period: percent 1.0
        assert!((intensity(layer.state(), "d1") - 1.0).abs() < 1e-9);
        assert!((intensity(layer.state(), "d2") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn blend_opacity_zero_leaves_target_unchanged() {
        let devices = rig_devices();
        let mut layer = Layer::new(&devices, "main", 0, BlendMode::Opaque);
        layer.state_mut().get_mut("d1").unwrap().set_float("intensity", 1.0);
        layer.set_opacity(0.0);

        let mut target = rig_devices();
        layer.blend(&mut target);
        assert!((intensity(&target, "d1") - 0.0).abs() < 1e-9);
    }

    #[test]
    fn blend_opaque_full_opacity_copies_layer_state() {
        let devices = rig_devices();
        let mut layer = Layer::new(&devices, "main", 0, BlendMode::Opaque);
        layer.state_mut().get_mut("d1").unwrap().set_float("intensity", 0.8);

        let mut target = rig_devices();
        layer.blend(&mut target);
        assert!((intensity(&target, "d1") - 0.8).abs() < 1e-9);
    }

    #[test]
    fn blend_partial_opacity_lerps() {
        let devices = rig_devices();
        let mut layer = Layer::new(&devices, "main", 0, BlendMode::Opaque);
        layer.state_mut().get_mut("d1").unwrap().set_float("intensity", 0.0);
        layer.set_opacity(0.25);

        let mut target = rig_devices();
        target.get_mut("d1").unwrap().set_float("intensity", 1.0);
        layer.blend(&mut target);
        assert!((intensity(&target, "d1") - 0.75).abs() < 1e-9);
    }

    #[test]
    fn null_default_skips_untouched_params() {
        let devices = rig_devices();
        let mut layer = Layer::new(&devices, "main", 0, BlendMode::NullDefault);
        layer.state_mut().get_mut("d1").unwrap().set_float("intensity", 0.6);
        // frost stays at its default and must not overwrite the target.

        let mut target = rig_devices();
        target.get_mut("d1").unwrap().set_float("frost", 0.9);
        layer.blend(&mut target);
        assert!((intensity(&target, "d1") - 0.6).abs() < 1e-9);
        assert!((target["d1"].float_val("frost").unwrap() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn null_intensity_skips_dark_devices() {
        let devices = rig_devices();
        let mut layer = Layer::new(&devices, "main", 0, BlendMode::NullIntensity);
        layer.state_mut().get_mut("d1").unwrap().set_float("frost", 1.0);
        // d1 intensity is 0, so the whole device is skipped.

        let mut target = rig_devices();
        layer.blend(&mut target);
        assert!((target["d1"].float_val("frost").unwrap() - 0.0).abs() < 1e-9);
    }

    #[test]
    fn selected_only_touches_selection() {
        let devices = rig_devices();
        let mut layer = Layer::new(&devices, "main", 0, BlendMode::SelectedOnly);
        layer.set_selected_devices(DeviceSet::from_ids(["d1".to_string()]));
        for d in layer.state_mut().values_mut() {
            d.set_float("intensity", 1.0);
        }

        let mut target = rig_devices();
        layer.blend(&mut target);
        assert!((intensity(&target, "d1") - 1.0).abs() < 1e-9);
        assert!((intensity(&target, "d2") - 0.0).abs() < 1e-9);
    }

    #[test]
    fn param_filter_and_inversion() {
        let devices = rig_devices();
        let mut layer = Layer::new(&devices, "main", 0, BlendMode::Opaque);
        for d in layer.state_mut().values_mut() {
            d.set_float("intensity", 1.0);
            d.set_float("frost", 1.0);
        }
        layer.add_param_filter("intensity");

        let mut target = rig_devices();
        layer.blend(&mut target);
        assert!((intensity(&target, "d1") - 1.0).abs() < 1e-9);
        assert!((target["d1"].float_val("frost").unwrap() - 0.0).abs() < 1e-9);

        // Inverting the filter swaps which parameters blend.
        layer.invert_filter();
        let mut target = rig_devices();
        layer.blend(&mut target);
        assert!((intensity(&target, "d1") - 0.0).abs() < 1e-9);
        assert!((target["d1"].float_val("frost").unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn serde_round_trip_preserves_settings() {
        let devices = rig_devices();
        let mut layer = Layer::new(&devices, "main", 5, BlendMode::NullDefault);
        layer.set_opacity(0.5);
        layer.set_active(true);
        layer.add_param_filter("intensity");
        layer.set_cue_list(Some("act1".to_string()), true);

        let json = serde_json::to_string(&layer).unwrap();
        let mut back: Layer = serde_json::from_str(&json).unwrap();
        back.restore_ids();
        assert_eq!(back.name(), "main");
        assert_eq!(back.priority(), 5);
        assert_eq!(back.mode(), BlendMode::NullDefault);
        assert!((back.opacity() - 0.5).abs() < 1e-12);
        assert!(back.is_active());
        assert_eq!(back.cue_list(), Some("act1"));
        assert_eq!(back.state()["d1"].id(), "d1");
    }
}
