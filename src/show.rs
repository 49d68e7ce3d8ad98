//! Show document load and save.
//!
//! A show document is a single JSON file holding the rig (devices and
//! patches), the refresh rate, and the playback data (timelines, layers,
//! cue lists, groups, programmer, grandmaster). Load order is devices,
//! then patches, then playback; save writes the reverse view of the same
//! structure.

use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::ShowError;
use crate::model::device::Device;
use crate::playback::Playback;
use crate::rig::Rig;
use crate::transport::transport_from_node;
use crate::SHOW_FORMAT_VERSION;

#[derive(Deserialize)]
struct ShowDoc {
    version: Option<String>,
    #[serde(rename = "refreshRate", default = "default_rate")]
    refresh_rate: u32,
    #[serde(default)]
    devices: IndexMap<String, Device>,
    #[serde(default)]
    patches: IndexMap<String, Value>,
    #[serde(default)]
    playback: Option<Value>,
}

fn default_rate() -> u32 {
    40
}

#[derive(Serialize)]
struct ShowDocRef<'a> {
    version: &'a str,
    #[serde(rename = "refreshRate")]
    refresh_rate: u32,
    devices: &'a IndexMap<String, Device>,
    patches: IndexMap<String, Value>,
    playback: Value,
}

/// Loads a show document, constructing the rig (devices in declaration
/// order, then patches) and its playback. Version skew warns and
/// proceeds; a missing version aborts the load.
pub fn load_show(path: impl AsRef<Path>) -> Result<(Rig, Playback), ShowError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    info!("loading {} bytes from {}", text.len(), path.display());
    let doc: ShowDoc = serde_json::from_str(&text)?;

    match doc.version.as_deref() {
        None => {
            return Err(ShowError::Validation {
                message: "no version specified for input file; aborting load".to_string(),
            });
        }
        Some(v) if v != SHOW_FORMAT_VERSION => {
            warn!(
                "show file version {v} differs from library version {SHOW_FORMAT_VERSION}; \
                 check logs for any load problems"
            );
        }
        Some(_) => {}
    }

    let rig = Rig::new();
    rig.set_refresh_rate(doc.refresh_rate);

    for (id, device) in doc.devices {
        rig.add_device(device.with_id(id))?;
    }
    info!("device load complete");

    for (name, node) in &doc.patches {
        match transport_from_node(node) {
            Some(t) => {
                info!("loading patch {name}");
                rig.add_transport(name.clone(), t)?;
            }
            None => warn!("patch {name} not loaded"),
        }
    }
    info!("patch load complete");

    let playback = Playback::new(&rig);
    if let Some(node) = doc.playback {
        playback.load_node(&node)?;
    }

    Ok((rig, playback))
}

/// Saves the show document. Refuses to overwrite an existing file unless
/// asked.
pub fn save_show(
    rig: &Rig,
    playback: &Playback,
    path: impl AsRef<Path>,
    overwrite: bool,
) -> Result<(), ShowError> {
    let path = path.as_ref();
    if path.exists() && !overwrite {
        return Err(ShowError::InvariantViolation {
            message: format!("{} already exists; pass overwrite to replace it", path.display()),
        });
    }

    let playback_node = playback.to_node()?;
    let patches = rig.transport_nodes();
    let json = rig.with_devices(|devices| {
        serde_json::to_string_pretty(&ShowDocRef {
            version: SHOW_FORMAT_VERSION,
            refresh_rate: rig.refresh_rate(),
            devices,
            patches,
            playback: playback_node,
        })
    })?;

    // Write-to-temp-then-rename so a crash never leaves a torn document.
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::cue::Cue;
    use crate::layer::{BlendMode, Layer};
    use crate::model::color::{ColorMode, ColorParam};
    use crate::model::enumeration::{EnumInterp, EnumMode, EnumParam};
    use crate::model::float::FloatParam;
    use crate::model::orientation::OrientationParam;
    use crate::model::param::Param;
    use crate::timeline::TimelineEntry;
    use crate::transport::MonitorTransport;

    fn build_show() -> (Rig, Playback) {
        let rig = Rig::new();
        rig.set_refresh_rate(30);

        let mut mover = Device::new("mover1", 1, "MovingHead");
        mover.set_param("intensity", Param::Float(FloatParam::unit(0.0)));
        mover.set_param("pan", Param::Orientation(OrientationParam::degrees(180.0)));
        mover.set_param(
            "gobo",
            Param::Enum(EnumParam::new(
                [("Open".to_string(), 0), ("Stars".to_string(), 128)],
                EnumMode::Center,
                255,
                None,
                EnumInterp::Snap,
            )),
        );
        mover.set_param("color", Param::Color(ColorParam::new(ColorMode::BasicRgb)));
        mover.set_metadata("position", "FOH");
        rig.add_device(mover).unwrap();

        let mut dimmer = Device::new("dim1", 2, "Dimmer");
        dimmer.set_param("intensity", Param::Float(FloatParam::unit(0.0)));
        rig.add_device(dimmer).unwrap();

        let (transport, _) = MonitorTransport::new();
        rig.add_transport("monitor", Box::new(transport)).unwrap();

        let pb = Playback::new(&rig);
        let mut layer = rig.with_devices(|d| Layer::new(d, "main", 0, BlendMode::Opaque));
        layer.set_active(true);
        layer.set_cue_list(Some("act1".to_string()), true);
        pb.add_layer(layer);
        pb.add_cue_list("act1");
        let look = rig.with_devices(|d| Cue::from_state(d, 3.0, 3.0, 0.0));
        pb.add_timeline("look1", TimelineEntry::Cue(look));
        pb.store_cue("act1", 1.0, "look1", false);
        pb.set_grandmaster(0.9);
        pb.store_group("front", rig.select("$position=FOH"), false);
        pb.store_dynamic_group("dimmers", "#2", false);

        (rig, pb)
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("show.json");
        let (rig, pb) = build_show();
        save_show(&rig, &pb, &path, false).unwrap();

        let (rig2, pb2) = load_show(&path).unwrap();
        assert_eq!(rig2.refresh_rate(), 30);
        assert_eq!(rig2.device_count(), 2);
        assert_eq!(rig2.transport_names(), vec!["monitor".to_string()]);
        // Devices keep their typed parameters.
        let pan = rig2
            .with_device("mover1", |d| {
                d.param("pan").and_then(|p| p.as_orientation().cloned())
            })
            .flatten()
            .unwrap();
        assert_eq!(pan.val(), 180.0);
        // Playback structure survives.
        assert_eq!(pb2.layer_names(), vec!["main".to_string()]);
        assert!((pb2.grandmaster() - 0.9).abs() < 1e-12);
        assert!(pb2.group_exists("front"));
        assert!(pb2.dynamic_group_exists("dimmers"));
        assert_eq!(
            pb2.with_cue_list("act1", |l| l.id_for(1.0).map(str::to_string))
                .flatten()
                .as_deref(),
            Some("look1")
        );

        // And the loaded show is equivalent when saved again.
        let path2 = dir.path().join("show2.json");
        save_show(&rig2, &pb2, &path2, false).unwrap();
        let a: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let b: Value = serde_json::from_str(&fs::read_to_string(&path2).unwrap()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn save_refuses_silent_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("show.json");
        let (rig, pb) = build_show();
        save_show(&rig, &pb, &path, false).unwrap();
        assert!(matches!(
            save_show(&rig, &pb, &path, false),
            Err(ShowError::InvariantViolation { .. })
        ));
        assert!(save_show(&rig, &pb, &path, true).is_ok());
    }

    #[test]
    fn missing_version_aborts_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no-version.json");
        fs::write(&path, r#"{"devices": {}}"#).unwrap();
        assert!(matches!(
            load_show(&path),
            Err(ShowError::Validation { .. })
        ));
    }

    #[test]
    fn version_skew_warns_but_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skew.json");
        fs::write(
            &path,
            r#"{"version": "9.9", "refreshRate": 25, "devices": {}}"#,
        )
        .unwrap();
        let (rig, _) = load_show(&path).unwrap();
        assert_eq!(rig.refresh_rate(), 25);
    }

    #[test]
    fn unknown_patch_types_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patches.json");
        fs::write(
            &path,
            r#"{
                "version": "2.1",
                "devices": {},
                "patches": { "art": { "type": "hologram" } }
            }"#,
        )
        .unwrap();
        let (rig, _) = load_show(&path).unwrap();
        assert!(rig.transport_names().is_empty());
    }

    #[test]
    fn devices_load_in_declaration_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("order.json");
        fs::write(
            &path,
            r#"{
                "version": "2.1",
                "devices": {
                    "zeta": { "channel": 1, "type": "Dimmer", "parameters": {} },
                    "alpha": { "channel": 2, "type": "Dimmer", "parameters": {} }
                }
            }"#,
        )
        .unwrap();
        let (rig, _) = load_show(&path).unwrap();
        let order = rig.with_devices(|d| d.keys().cloned().collect::<Vec<_>>());
        assert_eq!(order, vec!["zeta".to_string(), "alpha".to_string()]);
    }
}
