use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound::{Excluded, Unbounded};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::model::device::Device;
use crate::timeline::{timeline_key, Keyframe, Timeline};

/// How a cue's end keyframes relate to the next cue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CueType {
    /// Every end value is nil; the look is deferred to the next cue.
    Linked,
    /// Some end values are nil.
    Hybrid,
    /// Every end value is recorded in this cue.
    Standalone,
}

/// A timed look: a timeline whose tracks all run from a start keyframe at
/// t = 0 to an end keyframe at `max(up, down) · 1000` ms, with fade
/// durations chosen per parameter when the cue is played.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cue {
    #[serde(flatten)]
    timeline: Timeline,
    upfade: f64,
    downfade: f64,
    delay: f64,
    #[serde(skip)]
    cached_type: Cell<Option<CueType>>,
}

impl PartialEq for Cue {
    fn eq(&self, other: &Self) -> bool {
        self.timeline == other.timeline
            && self.upfade == other.upfade
            && self.downfade == other.downfade
            && self.delay == other.delay
    }
}

impl Cue {
    pub fn new(upfade: f64, downfade: f64, delay: f64) -> Self {
        Self {
            timeline: Timeline::new(),
            upfade: upfade.max(0.0),
            downfade: downfade.max(0.0),
            delay: delay.max(0.0),
            cached_type: Cell::new(None),
        }
    }

    /// Records a cue from a device-state map: a use-current-state keyframe
    /// at t = 0 and the recorded look at the end time, for every parameter.
    pub fn from_state(
        state: &IndexMap<String, Device>,
        upfade: f64,
        downfade: f64,
        delay: f64,
    ) -> Self {
        let mut cue = Self::new(upfade, downfade, delay);
        cue.record_state(state);
        cue
    }

    pub fn upfade(&self) -> f64 {
        self.upfade
    }

    pub fn downfade(&self) -> f64 {
        self.downfade
    }

    pub fn delay(&self) -> f64 {
        self.delay
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn timeline_mut(&mut self) -> &mut Timeline {
        self.cached_type.set(None);
        &mut self.timeline
    }

    /// End-keyframe time before any go-to-cue retiming.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn end_time(&self) -> u64 {
        (self.upfade.max(self.downfade) * 1000.0) as u64
    }

    /// Re-records every parameter in `state`, replacing the standard
    /// keyframes and leaving any intermediate ones alone.
    pub fn update_from_state(&mut self, state: &IndexMap<String, Device>) {
        let end = self.end_time();
        for (id, device) in state {
            for name in device.param_names() {
                let key = timeline_key(id, name);
                self.timeline.delete_keyframe(&key, 0);
                self.timeline.delete_keyframe(&key, end);
            }
        }
        self.record_state(state);
    }

    fn record_state(&mut self, state: &IndexMap<String, Device>) {
        let end = self.end_time();
        for (id, device) in state {
            for (name, param) in device.params() {
                let key = timeline_key(id, name);
                self.timeline
                    .set_keyframe(&key, Keyframe::current_state(0, Some(param.clone())));
                self.timeline
                    .set_keyframe(&key, Keyframe::value(end, param.clone()));
            }
        }
        self.cached_type.set(None);
    }

    /// Changes fade timing, retiming every track's end keyframe.
    pub fn set_time(&mut self, upfade: f64, downfade: f64, delay: f64) {
        let old_end = self.end_time();
        self.upfade = upfade.max(0.0);
        self.downfade = downfade.max(0.0);
        self.delay = delay.max(0.0);
        let new_end = self.end_time();
        if old_end != new_end {
            let keys: Vec<String> = self.timeline.identifiers().map(str::to_string).collect();
            for key in keys {
                self.timeline.move_keyframe(&key, old_end, new_end);
            }
        }
        self.cached_type.set(None);
    }

    pub fn set_delay(&mut self, delay: f64) {
        self.set_time(self.upfade, self.downfade, delay);
    }

    /// Play length in seconds.
    pub fn length_secs(&self) -> f64 {
        self.delay + self.upfade.max(self.downfade)
    }

    /// Classification by end keyframes, cached until the cue changes.
    pub fn cue_type(&self) -> CueType {
        if let Some(t) = self.cached_type.get() {
            return t;
        }
        let mut nil = 0usize;
        let mut total = 0usize;
        for track in self.timeline.tracks().values() {
            if let Some(last) = track.values().next_back() {
                total += 1;
                if last.val.is_none() && last.timeline_id.is_none() {
                    nil += 1;
                }
            }
        }
        let t = if total == 0 || nil == 0 {
            CueType::Standalone
        } else if nil == total {
            CueType::Linked
        } else {
            CueType::Hybrid
        };
        self.cached_type.set(Some(t));
        t
    }

    /// Prepares this cue for a go-to-cue transition from `state`.
    ///
    /// Start keyframes resolve against the current state; each identifier
    /// then picks its up- or down-fade by comparing the current value to
    /// the end keyframe (increasing values fade up; equal or incomparable
    /// values complete in the down-fade). End keyframes move to
    /// `(fade + delay) · 1000` and a hold keyframe at `delay · 1000` keeps
    /// the parameter still through the delay.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn prepare_transition(&self, state: &IndexMap<String, Device>) -> Cue {
        let mut prepared = self.clone();
        prepared.timeline.set_current_state(state);

        for (id, device) in state {
            for (name, param) in device.params() {
                let key = timeline_key(id, name);
                let Some(track) = prepared.timeline.track(&key) else {
                    continue;
                };
                let Some(last) = track.values().next_back() else {
                    continue;
                };
                let last_time = last.time;

                let increasing = last
                    .val
                    .as_ref()
                    .and_then(|end| param.compare(end))
                    .is_some_and(|ord| ord == std::cmp::Ordering::Less);
                let fade = if increasing { self.upfade } else { self.downfade };

                if self.delay > 0.0 {
                    prepared.timeline.set_keyframe(
                        &key,
                        Keyframe::current_state((self.delay * 1000.0) as u64, Some(param.clone())),
                    );
                }
                prepared.timeline.move_keyframe(
                    &key,
                    last_time,
                    ((fade + self.delay) * 1000.0) as u64,
                );
            }
        }
        prepared.cached_type.set(None);
        prepared
    }
}

// ── Cue numbers ────────────────────────────────────────────────────

/// Real-valued cue number with a total order. Non-negative and finite.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CueNumber(f64);

impl CueNumber {
    /// Rejects negative, NaN, and infinite numbers.
    pub fn new(num: f64) -> Option<Self> {
        if num.is_finite() && num >= 0.0 {
            Some(Self(num))
        } else {
            None
        }
    }

    pub fn get(self) -> f64 {
        self.0
    }
}

impl PartialEq for CueNumber {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == std::cmp::Ordering::Equal
    }
}

impl Eq for CueNumber {}

impl PartialOrd for CueNumber {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CueNumber {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for CueNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Cue list ───────────────────────────────────────────────────────

/// Ordered mapping of cue numbers onto timeline ids in the Playback
/// registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CueListRaw", into = "CueListRaw")]
pub struct CueList {
    cues: BTreeMap<CueNumber, String>,
}

#[derive(Serialize, Deserialize)]
struct CueListRaw {
    cues: BTreeMap<String, String>,
}

impl TryFrom<CueListRaw> for CueList {
    type Error = String;
    fn try_from(raw: CueListRaw) -> Result<Self, String> {
        let mut cues = BTreeMap::new();
        for (num, id) in raw.cues {
            let parsed: f64 = num
                .parse()
                .map_err(|_| format!("invalid cue number {num:?}"))?;
            let key =
                CueNumber::new(parsed).ok_or_else(|| format!("invalid cue number {num:?}"))?;
            cues.insert(key, id);
        }
        Ok(Self { cues })
    }
}

impl From<CueList> for CueListRaw {
    fn from(list: CueList) -> Self {
        Self {
            cues: list
                .cues
                .into_iter()
                .map(|(num, id)| (num.to_string(), id))
                .collect(),
        }
    }
}

impl CueList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }

    /// Stores a cue number → timeline-id mapping. Refuses to overwrite an
    /// existing number without the flag.
    pub fn store(&mut self, num: f64, timeline_id: impl Into<String>, overwrite: bool) -> bool {
        let Some(key) = CueNumber::new(num) else {
            warn!("cue numbers must be finite and non-negative (got {num})");
            return false;
        };
        if !overwrite && self.cues.contains_key(&key) {
            info!("cue {num} already exists in cue list");
            return false;
        }
        self.cues.insert(key, timeline_id.into());
        info!("recorded cue {num}");
        true
    }

    /// Removes a cue, returning the timeline id it pointed at.
    pub fn delete(&mut self, num: f64) -> Option<String> {
        let key = CueNumber::new(num)?;
        self.cues.remove(&key)
    }

    pub fn id_for(&self, num: f64) -> Option<&str> {
        let key = CueNumber::new(num)?;
        self.cues.get(&key).map(String::as_str)
    }

    pub fn first_num(&self) -> Option<f64> {
        self.cues.keys().next().map(|n| n.get())
    }

    pub fn last_num(&self) -> Option<f64> {
        self.cues.keys().next_back().map(|n| n.get())
    }

    /// The next cue number strictly after `num`, or nil past the end.
    pub fn next_num(&self, num: f64) -> Option<f64> {
        let key = CueNumber::new(num)?;
        self.cues
            .range((Excluded(key), Unbounded))
            .next()
            .map(|(n, _)| n.get())
    }

    /// The previous cue number strictly before `num`, or nil past the
    /// start.
    pub fn prev_num(&self, num: f64) -> Option<f64> {
        let key = CueNumber::new(num)?;
        self.cues.range(..key).next_back().map(|(n, _)| n.get())
    }

    /// The i-th cue number in order.
    pub fn number_at(&self, index: usize) -> Option<f64> {
        self.cues.keys().nth(index).map(|n| n.get())
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, &str)> {
        self.cues.iter().map(|(n, id)| (n.get(), id.as_str()))
    }
}
