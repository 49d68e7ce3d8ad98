use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cue::Cue;
use crate::model::device::Device;
use crate::model::param::Param;
use crate::sine::SineWave;

/// Nested timeline references deeper than this are treated as missing.
/// Guards against reference cycles in show data.
pub const MAX_TIMELINE_DEPTH: usize = 32;

/// Registry of timelines addressable by id. Sub-timeline references are
/// resolved through this map by name, never by pointer.
pub type TimelineMap = IndexMap<String, TimelineEntry>;

/// Identifier for a device parameter track: `"<device-id>:<param-name>"`.
pub fn timeline_key(device_id: &str, param: &str) -> String {
    format!("{device_id}:{param}")
}

// ── Events ─────────────────────────────────────────────────────────

type EventAction = Arc<Mutex<dyn FnMut() + Send>>;

/// A scheduled side effect. The action is process-local and registered in
/// code; only the id survives serialization. Actions run synchronously on
/// the tick thread and must return promptly.
#[derive(Clone, Serialize, Deserialize)]
pub struct Event {
    id: String,
    #[serde(skip)]
    action: Option<EventAction>,
}

impl Event {
    pub fn new(id: impl Into<String>, action: impl FnMut() + Send + 'static) -> Self {
        Self {
            id: id.into(),
            action: Some(Arc::new(Mutex::new(action))),
        }
    }

    /// An event with no attached action; still serialized by id.
    pub fn marker(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            action: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn execute(&self) {
        if let Some(action) = &self.action {
            let mut f = action.lock();
            (&mut *f)();
        }
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.id)
            .field("has_action", &self.action.is_some())
            .finish()
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

// ── Keyframes ──────────────────────────────────────────────────────

/// A point on a parameter track: either a static value (optionally marked
/// "use current state"), or a reference into another timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    pub time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val: Option<Param>,
    #[serde(rename = "useCurrentState", default, skip_serializing_if = "std::ops::Not::not")]
    pub use_current_state: bool,
    #[serde(rename = "timelineID", default, skip_serializing_if = "Option::is_none")]
    pub timeline_id: Option<String>,
    #[serde(rename = "timelineOffset", default, skip_serializing_if = "is_zero")]
    pub timeline_offset: u64,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

impl Keyframe {
    pub fn value(time: u64, val: Param) -> Self {
        Self {
            time,
            val: Some(val),
            use_current_state: false,
            timeline_id: None,
            timeline_offset: 0,
        }
    }

    /// A keyframe whose value is filled from the owning layer's state when
    /// playback starts. `val` holds the recorded value until then.
    pub fn current_state(time: u64, val: Option<Param>) -> Self {
        Self {
            time,
            val,
            use_current_state: true,
            timeline_id: None,
            timeline_offset: 0,
        }
    }

    /// A keyframe deferring to another timeline starting at `offset`.
    pub fn nested(time: u64, timeline_id: impl Into<String>, offset: u64) -> Self {
        Self {
            time,
            val: None,
            use_current_state: false,
            timeline_id: Some(timeline_id.into()),
            timeline_offset: offset,
        }
    }

    /// A keyframe with no value at all; reads as nil until linked or
    /// resolved.
    pub fn nil(time: u64) -> Self {
        Self {
            time,
            val: None,
            use_current_state: false,
            timeline_id: None,
            timeline_offset: 0,
        }
    }
}

// ── Timeline ───────────────────────────────────────────────────────

/// JSON object keys are strings, so millisecond map keys cross the serde
/// boundary as decimal strings. Done explicitly (rather than relying on
/// serde_json's integer-key coercion) because these maps also pass through
/// tagged-enum and flatten buffering, which only sees string keys.
mod ms_keys {
    use std::collections::BTreeMap;

    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<V: Serialize, S: Serializer>(
        map: &BTreeMap<u64, V>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_map(map.iter().map(|(k, v)| (k.to_string(), v)))
    }

    pub fn deserialize<'de, V: Deserialize<'de>, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<u64, V>, D::Error> {
        let raw = BTreeMap::<String, V>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(k, v)| {
                k.parse::<u64>()
                    .map(|k| (k, v))
                    .map_err(|_| D::Error::custom(format!("invalid time key {k:?}")))
            })
            .collect()
    }
}

/// Same string-keyed encoding for the nested per-identifier keyframe maps.
mod track_keys {
    use std::collections::BTreeMap;

    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::Keyframe;

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<String, BTreeMap<u64, Keyframe>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_map(map.iter().map(|(id, track)| {
            (
                id,
                track
                    .iter()
                    .map(|(t, kf)| (t.to_string(), kf))
                    .collect::<BTreeMap<String, &Keyframe>>(),
            )
        }))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, BTreeMap<u64, Keyframe>>, D::Error> {
        let raw = BTreeMap::<String, BTreeMap<String, Keyframe>>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(id, track)| {
                let track = track
                    .into_iter()
                    .map(|(t, kf)| {
                        t.parse::<u64>()
                            .map(|t| (t, kf))
                            .map_err(|_| D::Error::custom(format!("invalid time key {t:?}")))
                    })
                    .collect::<Result<BTreeMap<u64, Keyframe>, D::Error>>()?;
                Ok((id, track))
            })
            .collect()
    }
}

/// Keyframed, optionally looping, nestable animation data: per-identifier
/// ordered keyframes plus scheduled events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeline {
    #[serde(default = "default_loops")]
    loops: i32,
    #[serde(with = "track_keys")]
    keyframes: BTreeMap<String, BTreeMap<u64, Keyframe>>,
    #[serde(with = "ms_keys", default, skip_serializing_if = "BTreeMap::is_empty")]
    events: BTreeMap<u64, Vec<Event>>,
    #[serde(rename = "endEvents", default, skip_serializing_if = "IndexMap::is_empty")]
    end_events: IndexMap<String, Event>,
    // Length caches; rebuilt on demand after structural mutation.
    #[serde(skip)]
    cached_length: Cell<Option<u64>>,
    #[serde(skip)]
    cached_loop_length: Cell<Option<u64>>,
}

fn default_loops() -> i32 {
    1
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Timeline {
    fn eq(&self, other: &Self) -> bool {
        self.loops == other.loops
            && self.keyframes == other.keyframes
            && self.events == other.events
            && self.end_events == other.end_events
    }
}

impl Timeline {
    pub fn new() -> Self {
        Self {
            loops: 1,
            keyframes: BTreeMap::new(),
            events: BTreeMap::new(),
            end_events: IndexMap::new(),
            cached_length: Cell::new(None),
            cached_loop_length: Cell::new(None),
        }
    }

    pub fn loops(&self) -> i32 {
        self.loops
    }

    /// −1 means loop forever.
    pub fn set_loops(&mut self, loops: i32) {
        self.loops = loops;
        self.invalidate();
    }

    fn invalidate(&self) {
        self.cached_length.set(None);
        self.cached_loop_length.set(None);
    }

    // ── Keyframe editing ───────────────────────────────────────────

    pub fn set_keyframe(&mut self, identifier: &str, kf: Keyframe) {
        self.keyframes
            .entry(identifier.to_string())
            .or_default()
            .insert(kf.time, kf);
        self.invalidate();
    }

    /// Keyframes every parameter of the device at `time` with its current
    /// value.
    pub fn set_device_keyframes(&mut self, d: &Device, time: u64, ucs: bool) {
        for (name, param) in d.params() {
            let kf = if ucs {
                Keyframe::current_state(time, Some(param.clone()))
            } else {
                Keyframe::value(time, param.clone())
            };
            self.set_keyframe(&timeline_key(d.id(), name), kf);
        }
    }

    pub fn delete_keyframe(&mut self, identifier: &str, time: u64) {
        if let Some(track) = self.keyframes.get_mut(identifier) {
            track.remove(&time);
            if track.is_empty() {
                self.keyframes.remove(identifier);
            }
        }
        self.invalidate();
    }

    /// Moves a keyframe to a new time, replacing anything already there.
    pub fn move_keyframe(&mut self, identifier: &str, from: u64, to: u64) -> bool {
        let Some(track) = self.keyframes.get_mut(identifier) else {
            return false;
        };
        let Some(mut kf) = track.remove(&from) else {
            return false;
        };
        kf.time = to;
        track.insert(to, kf);
        self.invalidate();
        true
    }

    pub fn keyframe(&self, identifier: &str, time: u64) -> Option<&Keyframe> {
        self.keyframes.get(identifier).and_then(|t| t.get(&time))
    }

    pub fn track(&self, identifier: &str) -> Option<&BTreeMap<u64, Keyframe>> {
        self.keyframes.get(identifier)
    }

    pub fn tracks(&self) -> &BTreeMap<String, BTreeMap<u64, Keyframe>> {
        &self.keyframes
    }

    pub fn tracks_mut(&mut self) -> &mut BTreeMap<String, BTreeMap<u64, Keyframe>> {
        self.invalidate();
        &mut self.keyframes
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.keyframes.keys().map(String::as_str)
    }

    // ── Events ─────────────────────────────────────────────────────

    pub fn add_event(&mut self, time: u64, e: Event) {
        self.events.entry(time).or_default().push(e);
    }

    /// Deletes events at `time`; with an id, only matching ones.
    pub fn delete_events(&mut self, time: u64, id: Option<&str>) {
        match id {
            Some(id) => {
                if let Some(list) = self.events.get_mut(&time) {
                    list.retain(|e| e.id() != id);
                    if list.is_empty() {
                        self.events.remove(&time);
                    }
                }
            }
            None => {
                self.events.remove(&time);
            }
        }
    }

    pub fn events(&self) -> &BTreeMap<u64, Vec<Event>> {
        &self.events
    }

    /// Registers an end event; refuses duplicates by id.
    pub fn add_end_event(&mut self, id: &str, e: Event) -> bool {
        if self.end_events.contains_key(id) {
            return false;
        }
        self.end_events.insert(id.to_string(), e);
        true
    }

    pub fn delete_end_event(&mut self, id: &str) {
        self.end_events.shift_remove(id);
    }

    pub fn end_events(&self) -> &IndexMap<String, Event> {
        &self.end_events
    }

    // ── Timing ─────────────────────────────────────────────────────

    /// Longest last-keyframe time across identifiers.
    pub fn loop_length(&self) -> u64 {
        if let Some(cached) = self.cached_loop_length.get() {
            return cached;
        }
        let len = self
            .keyframes
            .values()
            .filter_map(|track| track.keys().next_back().copied())
            .max()
            .unwrap_or(0);
        self.cached_loop_length.set(Some(len));
        len
    }

    /// Total play length; unbounded when looping forever.
    pub fn length(&self) -> u64 {
        if self.loops == -1 {
            return u64::MAX;
        }
        if let Some(cached) = self.cached_length.get() {
            return cached;
        }
        let len = self.loop_length().saturating_mul(self.loops.max(0) as u64);
        self.cached_length.set(Some(len));
        len
    }

    /// Maps absolute time into loop-local time. Past the final loop the
    /// time passes through unchanged so lookups clamp to the last keyframe.
    pub fn loop_time(&self, time: u64) -> u64 {
        let ll = self.loop_length();
        if ll == 0 {
            return time;
        }
        let loop_num = time / ll;
        if self.loops != -1 && loop_num >= self.loops.max(0) as u64 {
            time
        } else {
            time - loop_num * ll
        }
    }

    // ── Evaluation ─────────────────────────────────────────────────

    /// Value of an identifier at a time, interpolating between surrounding
    /// keyframes and recursing through nested timeline references. `None`
    /// means "do not touch this parameter".
    #[allow(clippy::cast_precision_loss)]
    pub fn value_at(
        &self,
        identifier: &str,
        time: u64,
        registry: &TimelineMap,
        depth: usize,
    ) -> Option<Param> {
        if depth > MAX_TIMELINE_DEPTH {
            warn!("timeline reference depth limit hit for {identifier}");
            return None;
        }
        let track = self.keyframes.get(identifier)?;
        let time = self.loop_time(time);

        let next = track.range(time.saturating_add(1)..).next().map(|(_, kf)| kf);
        let first = track.range(..=time).next_back().map(|(_, kf)| kf);

        match (first, next) {
            (None, None) => None,
            // Before the first keyframe: clamp to it.
            (None, Some(kf)) => self.resolve(kf, time, identifier, registry, depth),
            // Past the last keyframe: terminal clamp.
            (Some(kf), None) => self.resolve(kf, time, identifier, registry, depth),
            (Some(k1), Some(k2)) => {
                let span = (k2.time - k1.time) as f64;
                let alpha = (time - k1.time) as f64 / span;
                let x = self.resolve(k1, time, identifier, registry, depth)?;
                let y = self.resolve(k2, time, identifier, registry, depth)?;
                x.lerp(&y, alpha)
            }
        }
    }

    /// Resolves a keyframe to a concrete value, recursing into nested
    /// timelines. Unresolved UCS keyframes and missing references are nil.
    fn resolve(
        &self,
        kf: &Keyframe,
        time: u64,
        identifier: &str,
        registry: &TimelineMap,
        depth: usize,
    ) -> Option<Param> {
        if let Some(tid) = &kf.timeline_id {
            let sub = registry.get(tid)?;
            // A reference evaluated ahead of its keyframe clamps to the
            // sub-timeline's start.
            let sub_time = time.saturating_sub(kf.time).saturating_add(kf.timeline_offset);
            return sub.value_at_depth(identifier, sub_time, registry, depth + 1, None);
        }
        kf.val.clone()
    }

    /// Fires events in the half-open window `(prev, cur]`, both mapped into
    /// loop time. A window that wraps the loop boundary fires the tail and
    /// the head. Recurses into referenced sub-timelines with the window
    /// remapped into their coordinates.
    pub fn execute_events(&self, prev: u64, cur: u64, registry: &TimelineMap, depth: usize) {
        if depth > MAX_TIMELINE_DEPTH {
            return;
        }
        let lp = self.loop_time(prev);
        let lc = self.loop_time(cur);

        if lp <= lc {
            self.fire_range(lp, lc);
        } else {
            // Wrapped around the loop boundary.
            self.fire_range(lp, u64::MAX);
            self.fire_range(0, lc);
            if let Some(list) = self.events.get(&0) {
                for e in list {
                    e.execute();
                }
            }
        }

        // Recurse into sub-timelines referenced by active keyframes.
        let mut visited: BTreeSet<(&str, u64, u64)> = BTreeSet::new();
        for track in self.keyframes.values() {
            for kf in track.values() {
                let Some(tid) = &kf.timeline_id else { continue };
                if lc < kf.time {
                    continue;
                }
                if !visited.insert((tid.as_str(), kf.time, kf.timeline_offset)) {
                    continue;
                }
                let Some(sub) = registry.get(tid) else { continue };
                let sub_prev = lp.saturating_sub(kf.time).saturating_add(kf.timeline_offset);
                let sub_cur = lc.saturating_sub(kf.time).saturating_add(kf.timeline_offset);
                sub.execute_events_depth(sub_prev, sub_cur, registry, depth + 1);
            }
        }
    }

    /// Fires events with `lo < time <= hi`, in time order, insertion order
    /// within a time.
    fn fire_range(&self, lo: u64, hi: u64) {
        if lo == hi {
            return;
        }
        for (_, list) in self.events.range(lo.saturating_add(1)..=hi) {
            for e in list {
                e.execute();
            }
        }
    }

    /// Fires every end event, in insertion order.
    pub fn execute_end_events(&self) {
        for e in self.end_events.values() {
            e.execute();
        }
    }

    /// Done when the play length is bounded, exceeded, and every nested
    /// timeline referenced by a final keyframe is itself done.
    pub fn is_done(&self, time: u64, registry: &TimelineMap, depth: usize) -> bool {
        if self.loops == -1 {
            return false;
        }
        if depth > MAX_TIMELINE_DEPTH {
            return true;
        }
        if time <= self.length() {
            return false;
        }
        for track in self.keyframes.values() {
            let Some(last) = track.values().next_back() else {
                continue;
            };
            if let Some(tid) = &last.timeline_id {
                if let Some(sub) = registry.get(tid) {
                    let sub_time = time.saturating_sub(last.time).saturating_add(last.timeline_offset);
                    if !sub.is_done_depth(sub_time, registry, depth + 1) {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Replaces the value of every use-current-state keyframe with a copy
    /// of the matching parameter from the layer state. Keyframes whose
    /// identifier is absent stay unresolved.
    pub fn set_current_state(&mut self, state: &IndexMap<String, Device>) {
        for (id, device) in state {
            for (name, param) in device.params() {
                let key = timeline_key(id, name);
                if let Some(track) = self.keyframes.get_mut(&key) {
                    for kf in track.values_mut() {
                        if kf.use_current_state {
                            kf.val = Some(param.clone());
                        }
                    }
                }
            }
        }
    }
}

// ── Registry entry ─────────────────────────────────────────────────

/// A timeline in the Playback registry. Closed set of timeline flavors,
/// discriminated as `timeline`, `cue`, or `sinewave` in show documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TimelineEntry {
    #[serde(rename = "timeline")]
    Timeline(Timeline),
    #[serde(rename = "cue")]
    Cue(Cue),
    #[serde(rename = "sinewave")]
    SineWave(SineWave),
}

impl TimelineEntry {
    /// Value of an identifier at a time. `current` carries the owning
    /// layer's present value for procedural timelines that modulate it.
    pub fn value_at(
        &self,
        identifier: &str,
        time: u64,
        registry: &TimelineMap,
        current: Option<&Param>,
    ) -> Option<Param> {
        self.value_at_depth(identifier, time, registry, 0, current)
    }

    pub(crate) fn value_at_depth(
        &self,
        identifier: &str,
        time: u64,
        registry: &TimelineMap,
        depth: usize,
        current: Option<&Param>,
    ) -> Option<Param> {
        match self {
            TimelineEntry::Timeline(t) => t.value_at(identifier, time, registry, depth),
            TimelineEntry::Cue(c) => c.timeline().value_at(identifier, time, registry, depth),
            TimelineEntry::SineWave(s) => s.value_at(time, current),
        }
    }

    /// Identifiers this timeline animates; `None` means every identifier
    /// in the layer's state (procedural timelines).
    pub fn identifiers(&self) -> Option<Vec<String>> {
        match self {
            TimelineEntry::Timeline(t) => {
                Some(t.identifiers().map(str::to_string).collect())
            }
            TimelineEntry::Cue(c) => {
                Some(c.timeline().identifiers().map(str::to_string).collect())
            }
            TimelineEntry::SineWave(_) => None,
        }
    }

    pub fn execute_events(&self, prev: u64, cur: u64, registry: &TimelineMap) {
        self.execute_events_depth(prev, cur, registry, 0);
    }

    pub(crate) fn execute_events_depth(
        &self,
        prev: u64,
        cur: u64,
        registry: &TimelineMap,
        depth: usize,
    ) {
        match self {
            TimelineEntry::Timeline(t) => t.execute_events(prev, cur, registry, depth),
            TimelineEntry::Cue(c) => c.timeline().execute_events(prev, cur, registry, depth),
            TimelineEntry::SineWave(_) => {}
        }
    }

    pub fn execute_end_events(&self) {
        match self {
            TimelineEntry::Timeline(t) => t.execute_end_events(),
            TimelineEntry::Cue(c) => c.timeline().execute_end_events(),
            TimelineEntry::SineWave(_) => {}
        }
    }

    pub fn is_done(&self, time: u64, registry: &TimelineMap) -> bool {
        self.is_done_depth(time, registry, 0)
    }

    pub(crate) fn is_done_depth(&self, time: u64, registry: &TimelineMap, depth: usize) -> bool {
        match self {
            TimelineEntry::Timeline(t) => t.is_done(time, registry, depth),
            TimelineEntry::Cue(c) => c.timeline().is_done(time, registry, depth),
            TimelineEntry::SineWave(s) => s.is_done(time),
        }
    }

    pub fn set_current_state(&mut self, state: &IndexMap<String, Device>) {
        match self {
            TimelineEntry::Timeline(t) => t.set_current_state(state),
            TimelineEntry::Cue(c) => c.timeline_mut().set_current_state(state),
            TimelineEntry::SineWave(_) => {}
        }
    }

    /// Length in milliseconds used for terminal clamping.
    pub fn length(&self) -> u64 {
        match self {
            TimelineEntry::Timeline(t) => t.length(),
            TimelineEntry::Cue(c) => c.timeline().length(),
            TimelineEntry::SineWave(s) => s.length(),
        }
    }

    pub fn as_cue(&self) -> Option<&Cue> {
        match self {
            TimelineEntry::Cue(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_cue_mut(&mut self) -> Option<&mut Cue> {
        match self {
            TimelineEntry::Cue(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_timeline(&self) -> Option<&Timeline> {
        match self {
            TimelineEntry::Timeline(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_timeline_mut(&mut self) -> Option<&mut Timeline> {
        match self {
            TimelineEntry::Timeline(t) => Some(t),
            _ => None,
        }
    }
}
