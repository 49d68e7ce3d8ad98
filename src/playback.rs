use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::cue::CueList;
use crate::error::ShowError;
use crate::layer::{Layer, PlaybackData};
use crate::model::device::Device;
use crate::model::device_set::DeviceSet;
use crate::programmer::Programmer;
use crate::rig::{set_all_devices, Rig};
use crate::timeline::{TimelineEntry, TimelineMap};
use crate::SHOW_FORMAT_VERSION;

pub(crate) struct PlaybackCore {
    layers: IndexMap<String, Layer>,
    timelines: TimelineMap,
    cue_lists: IndexMap<String, CueList>,
    groups: IndexMap<String, DeviceSet>,
    dynamic_groups: IndexMap<String, String>,
    programmer: Arc<Programmer>,
    grandmaster: f64,
    // Flatten scratch; reset to defaults at the top of every tick.
    state: IndexMap<String, Device>,
    running: bool,
    epoch: Instant,
}

impl PlaybackCore {
    #[allow(clippy::cast_possible_truncation)]
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// One playback tick: advance layers, flatten bottom-up by priority,
    /// overlay the programmer, apply the grandmaster, write to the rig's
    /// devices.
    fn tick(&mut self, now: u64, rig_devices: &mut IndexMap<String, Device>) {
        if !self.running {
            return;
        }
        let Self {
            layers,
            timelines,
            state,
            programmer,
            grandmaster,
            ..
        } = self;

        for layer in layers.values_mut() {
            layer.update(now, timelines);
        }

        for d in state.values_mut() {
            d.reset();
        }

        // Ascending priority; equal priorities keep insertion order
        // (stable sort over the name-ordered map).
        let mut active: Vec<&Layer> = layers.values().filter(|l| l.is_active()).collect();
        active.sort_by_key(|l| l.priority());
        for layer in active {
            layer.blend(state);
        }

        programmer.blend(state);

        if *grandmaster < 1.0 {
            for d in state.values_mut() {
                d.scale_params(*grandmaster);
            }
        }

        set_all_devices(rig_devices, state);
    }

    fn go_to_cue(&mut self, layer_name: &str, num: f64, time_override: Option<(f64, f64, f64)>) -> bool {
        let prepared = {
            let Some(layer) = self.layers.get(layer_name) else {
                warn!("no layer named {layer_name}");
                return false;
            };
            let Some(list_name) = layer.cue_list() else {
                error!("layer {layer_name} cannot go to cue because it has no assigned cue list");
                return false;
            };
            let Some(list) = self.cue_lists.get(list_name) else {
                error!("layer {layer_name} references unknown cue list {list_name}");
                return false;
            };
            let Some(id) = list.id_for(num) else {
                error!("layer {layer_name} cannot go to cue {num}");
                return false;
            };
            let Some(cue) = self.timelines.get(id).and_then(TimelineEntry::as_cue) else {
                error!("cue {num} on layer {layer_name} does not name a cue timeline");
                return false;
            };

            let prepared = match time_override {
                Some((up, down, delay)) => {
                    let mut cue = cue.clone();
                    cue.set_time(up, down, delay);
                    cue.prepare_transition(layer.state())
                }
                None => cue.prepare_transition(layer.state()),
            };
            (prepared, id.to_string())
        };

        // A go takes over the layer: any running fade stops where it is
        // and the new transition starts from that state.
        if let Some(layer) = self.layers.get_mut(layer_name) {
            let (cue, id) = prepared;
            layer.stop();
            layer.enqueue(PlaybackData::new(TimelineEntry::Cue(cue), Some(id)));
            layer.set_current_cue(num);
            true
        } else {
            false
        }
    }

    fn go(&mut self, layer_name: &str) -> bool {
        let target = {
            let Some(layer) = self.layers.get(layer_name) else {
                warn!("no layer named {layer_name}");
                return false;
            };
            let Some(list_name) = layer.cue_list() else {
                error!("layer {layer_name} cannot go to next cue because it has no assigned cue list");
                return false;
            };
            let Some(list) = self.cue_lists.get(list_name) else {
                error!("layer {layer_name} references unknown cue list {list_name}");
                return false;
            };
            let current = layer.current_cue();
            if current < 0.0 {
                list.first_num()
            } else {
                list.next_num(current)
            }
        };
        match target {
            Some(num) => self.go_to_cue(layer_name, num, None),
            None => {
                error!("layer {layer_name} has no next cue");
                false
            }
        }
    }

    fn back(&mut self, layer_name: &str) -> bool {
        let target = {
            let Some(layer) = self.layers.get(layer_name) else {
                warn!("no layer named {layer_name}");
                return false;
            };
            let Some(list_name) = layer.cue_list() else {
                error!("layer {layer_name} cannot go back because it has no assigned cue list");
                return false;
            };
            let Some(list) = self.cue_lists.get(list_name) else {
                error!("layer {layer_name} references unknown cue list {list_name}");
                return false;
            };
            let current = layer.current_cue();
            if current < 0.0 {
                None
            } else {
                list.prev_num(current)
            }
        };
        match target {
            Some(num) => self.go_to_cue(layer_name, num, None),
            None => {
                error!("layer {layer_name} has no previous cue");
                false
            }
        }
    }
}

/// Orchestrates layers, timelines, cue lists, groups, the programmer, and
/// the grandmaster, and flattens everything into the rig each tick.
///
/// The playback installs itself as a rig update function; all per-tick
/// work happens on the rig's tick thread under the playback lock.
pub struct Playback {
    core: Arc<Mutex<PlaybackCore>>,
    func_id: Option<i32>,
}

impl Playback {
    /// Builds a playback over the rig's current devices. Copies of every
    /// device (reset to defaults) seed the flatten state and programmer.
    pub fn new(rig: &Rig) -> Self {
        let (state, programmer) = rig.with_devices(|devices| {
            let mut state: IndexMap<String, Device> = devices
                .iter()
                .map(|(id, d)| (id.clone(), d.clone()))
                .collect();
            for d in state.values_mut() {
                d.reset();
            }
            (state, Arc::new(Programmer::new(devices)))
        });
        Self {
            core: Arc::new(Mutex::new(PlaybackCore {
                layers: IndexMap::new(),
                timelines: IndexMap::new(),
                cue_lists: IndexMap::new(),
                groups: IndexMap::new(),
                dynamic_groups: IndexMap::new(),
                programmer,
                grandmaster: 1.0,
                state,
                running: false,
                epoch: Instant::now(),
            })),
            func_id: None,
        }
    }

    pub fn start(&self) {
        self.core.lock().running = true;
        info!("started playback update loop");
    }

    pub fn stop(&self) {
        let mut core = self.core.lock();
        if core.running {
            core.running = false;
            info!("stopped playback update loop");
        }
    }

    pub fn is_running(&self) -> bool {
        self.core.lock().running
    }

    pub fn grandmaster(&self) -> f64 {
        self.core.lock().grandmaster
    }

    pub fn set_grandmaster(&self, val: f64) {
        self.core.lock().grandmaster = val.clamp(0.0, 1.0);
    }

    /// Shared handle to the programmer overlay.
    pub fn programmer(&self) -> Arc<Programmer> {
        Arc::clone(&self.core.lock().programmer)
    }

    // ── Layers ─────────────────────────────────────────────────────

    /// Adds a layer; refuses a duplicate name.
    pub fn add_layer(&self, layer: Layer) -> bool {
        let mut core = self.core.lock();
        if core.layers.contains_key(layer.name()) {
            return false;
        }
        core.layers.insert(layer.name().to_string(), layer);
        true
    }

    pub fn delete_layer(&self, name: &str) -> bool {
        self.core.lock().layers.shift_remove(name).is_some()
    }

    pub fn layer_names(&self) -> Vec<String> {
        self.core.lock().layers.keys().cloned().collect()
    }

    pub fn with_layer<R>(&self, name: &str, f: impl FnOnce(&Layer) -> R) -> Option<R> {
        self.core.lock().layers.get(name).map(f)
    }

    pub fn with_layer_mut<R>(&self, name: &str, f: impl FnOnce(&mut Layer) -> R) -> Option<R> {
        self.core.lock().layers.get_mut(name).map(f)
    }

    // ── Timelines ──────────────────────────────────────────────────

    /// Registers a timeline under an id; refuses duplicates.
    pub fn add_timeline(&self, id: impl Into<String>, timeline: TimelineEntry) -> bool {
        let mut core = self.core.lock();
        let id = id.into();
        if core.timelines.contains_key(&id) {
            return false;
        }
        core.timelines.insert(id, timeline);
        true
    }

    pub fn delete_timeline(&self, id: &str) -> bool {
        self.core.lock().timelines.shift_remove(id).is_some()
    }

    pub fn timeline_names(&self) -> Vec<String> {
        self.core.lock().timelines.keys().cloned().collect()
    }

    pub fn with_timeline<R>(&self, id: &str, f: impl FnOnce(&TimelineEntry) -> R) -> Option<R> {
        self.core.lock().timelines.get(id).map(f)
    }

    pub fn with_timeline_mut<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut TimelineEntry) -> R,
    ) -> Option<R> {
        self.core.lock().timelines.get_mut(id).map(f)
    }

    /// Queues a registry timeline on a layer.
    pub fn play(&self, layer_name: &str, timeline_id: &str) -> bool {
        let core = self.core.lock();
        match core.layers.get(layer_name) {
            Some(layer) => layer.play(timeline_id, &core.timelines),
            None => {
                warn!("no layer named {layer_name}");
                false
            }
        }
    }

    pub fn pause_layer(&self, layer_name: &str) -> bool {
        let mut core = self.core.lock();
        let now = core.now_ms();
        core.layers
            .get_mut(layer_name)
            .map(|l| l.pause(now))
            .is_some()
    }

    pub fn resume_layer(&self, layer_name: &str) -> bool {
        let mut core = self.core.lock();
        let now = core.now_ms();
        core.layers
            .get_mut(layer_name)
            .map(|l| l.resume(now))
            .is_some()
    }

    pub fn stop_layer(&self, layer_name: &str) -> bool {
        self.core
            .lock()
            .layers
            .get_mut(layer_name)
            .map(Layer::stop)
            .is_some()
    }

    // ── Cue lists ──────────────────────────────────────────────────

    pub fn add_cue_list(&self, name: impl Into<String>) -> bool {
        let mut core = self.core.lock();
        let name = name.into();
        if core.cue_lists.contains_key(&name) {
            return false;
        }
        core.cue_lists.insert(name, CueList::new());
        true
    }

    pub fn delete_cue_list(&self, name: &str) -> bool {
        self.core.lock().cue_lists.shift_remove(name).is_some()
    }

    pub fn with_cue_list<R>(&self, name: &str, f: impl FnOnce(&CueList) -> R) -> Option<R> {
        self.core.lock().cue_lists.get(name).map(f)
    }

    /// Maps a cue number onto an existing timeline id in a cue list.
    pub fn store_cue(&self, list: &str, num: f64, timeline_id: &str, overwrite: bool) -> bool {
        let mut core = self.core.lock();
        if !core.timelines.contains_key(timeline_id) {
            error!("specified cue does not exist: {timeline_id}");
            return false;
        }
        match core.cue_lists.get_mut(list) {
            Some(l) => l.store(num, timeline_id, overwrite),
            None => {
                error!("no cue list named {list}");
                false
            }
        }
    }

    /// Snapshots the programmer into a new cue, registers it under
    /// `timeline_id`, and stores it in the list.
    pub fn record_cue(
        &self,
        list: &str,
        num: f64,
        timeline_id: &str,
        upfade: f64,
        downfade: f64,
        delay: f64,
    ) -> bool {
        let cue = {
            let core = self.core.lock();
            if !core.cue_lists.contains_key(list) {
                error!("no cue list named {list}");
                return false;
            }
            core.programmer.get_cue(upfade, downfade, delay)
        };
        if !self.add_timeline(timeline_id, TimelineEntry::Cue(cue)) {
            error!("timeline id {timeline_id} already exists");
            return false;
        }
        self.store_cue(list, num, timeline_id, false)
    }

    /// Deletes a cue from a list; with `total`, the backing timeline is
    /// deleted from the registry as well.
    pub fn delete_cue(&self, list: &str, num: f64, total: bool) -> bool {
        let mut core = self.core.lock();
        let Some(l) = core.cue_lists.get_mut(list) else {
            return false;
        };
        let Some(id) = l.delete(num) else {
            return false;
        };
        if total {
            core.timelines.shift_remove(&id);
        }
        true
    }

    /// Advances the layer to its next cue (or the first, if none played
    /// yet), with per-parameter up/down fade selection.
    pub fn go(&self, layer_name: &str) -> bool {
        self.core.lock().go(layer_name)
    }

    /// Returns to the previous cue in the layer's list.
    pub fn back(&self, layer_name: &str) -> bool {
        self.core.lock().back(layer_name)
    }

    pub fn go_to_cue(&self, layer_name: &str, num: f64) -> bool {
        self.core.lock().go_to_cue(layer_name, num, None)
    }

    /// Asserts a cue with override timing.
    pub fn go_to_cue_timed(
        &self,
        layer_name: &str,
        num: f64,
        upfade: f64,
        downfade: f64,
        delay: f64,
    ) -> bool {
        self.core
            .lock()
            .go_to_cue(layer_name, num, Some((upfade, downfade, delay)))
    }

    // ── Groups ─────────────────────────────────────────────────────

    pub fn store_group(&self, name: impl Into<String>, group: DeviceSet, overwrite: bool) -> bool {
        let mut core = self.core.lock();
        let name = name.into();
        if !overwrite && core.groups.contains_key(&name) {
            error!("group with name {name} already exists");
            return false;
        }
        core.groups.insert(name, group);
        true
    }

    /// Stores a query string re-evaluated against the rig on lookup.
    pub fn store_dynamic_group(
        &self,
        name: impl Into<String>,
        query: impl Into<String>,
        overwrite: bool,
    ) -> bool {
        let mut core = self.core.lock();
        let name = name.into();
        if !overwrite && core.dynamic_groups.contains_key(&name) {
            error!("group with name {name} already exists");
            return false;
        }
        core.dynamic_groups.insert(name, query.into());
        true
    }

    pub fn group(&self, name: &str) -> Option<DeviceSet> {
        let core = self.core.lock();
        let group = core.groups.get(name).cloned();
        if group.is_none() {
            warn!("group {name} not found");
        }
        group
    }

    /// Evaluates a dynamic group's query against the rig.
    pub fn dynamic_group(&self, name: &str, rig: &Rig) -> Option<DeviceSet> {
        let query = self.core.lock().dynamic_groups.get(name).cloned();
        match query {
            Some(q) => Some(rig.select(&q)),
            None => {
                warn!("dynamic group {name} not found");
                None
            }
        }
    }

    pub fn delete_group(&self, name: &str) -> bool {
        self.core.lock().groups.shift_remove(name).is_some()
    }

    pub fn delete_dynamic_group(&self, name: &str) -> bool {
        self.core.lock().dynamic_groups.shift_remove(name).is_some()
    }

    pub fn group_exists(&self, name: &str) -> bool {
        self.core.lock().groups.contains_key(name)
    }

    pub fn dynamic_group_exists(&self, name: &str) -> bool {
        self.core.lock().dynamic_groups.contains_key(name)
    }

    // ── Tick wiring ────────────────────────────────────────────────

    /// Installs the playback tick into the rig's update functions at the
    /// given id. The rig must be stopped.
    pub fn attach_to_rig(&mut self, pid: i32, rig: &Rig) -> Result<(), ShowError> {
        if pid <= 0 {
            return Err(ShowError::Validation {
                message: "playback function ids must be positive".to_string(),
            });
        }
        let core = Arc::clone(&self.core);
        rig.add_function(
            pid,
            Box::new(move |devices| {
                let mut core = core.lock();
                let now = core.now_ms();
                core.tick(now, devices);
            }),
        )?;
        self.func_id = Some(pid);
        Ok(())
    }

    /// Removes the playback tick from the rig.
    pub fn detach_from_rig(&mut self, rig: &Rig) -> Result<(), ShowError> {
        match self.func_id.take() {
            Some(pid) => rig.remove_function(pid),
            None => Err(ShowError::NotFound {
                what: "attached playback function".to_string(),
            }),
        }
    }

    /// Runs one playback tick at an explicit clock value against a device
    /// map. Deterministic entry point used by tests and offline tools.
    pub fn update_at(&self, now_ms: u64, devices: &mut IndexMap<String, Device>) {
        self.core.lock().tick(now_ms, devices);
    }

    // ── Serialization ──────────────────────────────────────────────

    /// Serializes everything except in-flight playback positions.
    pub fn to_node(&self) -> Result<Value, ShowError> {
        #[derive(Serialize)]
        struct NodeRef<'a> {
            version: &'a str,
            grandmaster: f64,
            timelines: &'a TimelineMap,
            layers: &'a IndexMap<String, Layer>,
            #[serde(rename = "cueLists")]
            cue_lists: &'a IndexMap<String, CueList>,
            groups: &'a IndexMap<String, DeviceSet>,
            dynamic_groups: &'a IndexMap<String, String>,
            programmer: &'a Programmer,
        }
        let core = self.core.lock();
        let node = NodeRef {
            version: SHOW_FORMAT_VERSION,
            grandmaster: core.grandmaster,
            timelines: &core.timelines,
            layers: &core.layers,
            cue_lists: &core.cue_lists,
            groups: &core.groups,
            dynamic_groups: &core.dynamic_groups,
            programmer: &core.programmer,
        };
        Ok(serde_json::to_value(node)?)
    }

    /// Loads playback data into this instance, replacing layers,
    /// timelines, cue lists, groups, and the programmer.
    pub fn load_node(&self, node: &Value) -> Result<(), ShowError> {
        #[derive(Deserialize)]
        struct Node {
            version: Option<String>,
            #[serde(default = "default_gm")]
            grandmaster: f64,
            #[serde(default)]
            timelines: TimelineMap,
            #[serde(default)]
            layers: IndexMap<String, Layer>,
            #[serde(rename = "cueLists", default)]
            cue_lists: IndexMap<String, CueList>,
            #[serde(default)]
            groups: IndexMap<String, DeviceSet>,
            #[serde(default)]
            dynamic_groups: IndexMap<String, String>,
            programmer: Option<Programmer>,
        }
        fn default_gm() -> f64 {
            1.0
        }

        let parsed: Node = serde_json::from_value(node.clone())?;
        match parsed.version.as_deref() {
            None => warn!("loading playback data with no version; load may not complete correctly"),
            Some(v) => {
                // Compare on "major.minor"; any further components are
                // ignored.
                let mut parts = v.splitn(3, '.');
                let maj = parts.next().unwrap_or_default();
                let min = parts.next().unwrap_or("0");
                let major: f64 =
                    format!("{maj}.{min}")
                        .parse()
                        .map_err(|_| ShowError::Validation {
                            message: format!("invalid playback version {v:?}"),
                        })?;
                if major < 2.0 {
                    return Err(ShowError::VersionSkew {
                        file: v.to_string(),
                        library: SHOW_FORMAT_VERSION.to_string(),
                    });
                }
                if v != SHOW_FORMAT_VERSION {
                    warn!(
                        "playback data written by version {v}, library is {SHOW_FORMAT_VERSION}; \
                         loading best-effort"
                    );
                }
            }
        }

        let mut core = self.core.lock();
        core.grandmaster = parsed.grandmaster.clamp(0.0, 1.0);
        core.timelines = parsed.timelines;
        core.layers = parsed.layers;
        for layer in core.layers.values_mut() {
            layer.restore_ids();
        }
        core.cue_lists = parsed.cue_lists;
        core.groups = parsed.groups;
        core.dynamic_groups = parsed.dynamic_groups;
        if let Some(programmer) = parsed.programmer {
            core.programmer = Arc::new(programmer);
        }
        Ok(())
    }
}
