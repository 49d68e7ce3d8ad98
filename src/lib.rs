//! Stage-lighting show-control engine.
//!
//! Drives a rig of lighting devices over time: prioritized animation
//! layers play keyframed timelines and cues, a programmer overlay
//! captures live edits, and every tick the stack flattens into a single
//! device state pushed out to transport backends.
//!
//! The pieces, bottom up:
//! - [`model`]: the typed parameter algebra (scalars, angles, enums,
//!   spectral colors), devices, and device-set selection.
//! - [`select`]: the device selector query grammar.
//! - [`timeline`], [`sine`], [`cue`]: keyframed and procedural animation,
//!   plus cue fade semantics and numbered cue lists.
//! - [`layer`], [`programmer`], [`playback`]: the blending stack.
//! - [`rig`], [`transport`], [`show`]: device ownership, the tick loop,
//!   output backends, and show-document persistence.

pub mod cue;
pub mod error;
pub mod layer;
pub mod model;
pub mod playback;
pub mod programmer;
pub mod rig;
pub mod select;
pub mod show;
pub mod sine;
pub mod timeline;
pub mod transport;

pub use cue::{Cue, CueList, CueType};
pub use error::ShowError;
pub use layer::{BlendMode, Layer};
pub use model::{Device, DeviceSet, Param};
pub use playback::Playback;
pub use programmer::Programmer;
pub use rig::Rig;
pub use show::{load_show, save_show};
pub use sine::{SineMode, SineWave};
pub use timeline::{Event, Keyframe, Timeline, TimelineEntry};
pub use transport::{MonitorHandle, MonitorTransport, Transport};

/// Show document format version ("major.minor"). Documents older than
/// major version 2 are refused; other mismatches load best-effort with a
/// warning.
pub const SHOW_FORMAT_VERSION: &str = "2.1";
