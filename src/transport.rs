use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::warn;

use crate::error::ShowError;
use crate::model::device::Device;
use crate::model::param::Param;

/// Output backend contract. The rig calls `update` with the full device
/// map once per tick; implementations encode and ship the state. `update`
/// must be non-blocking or short.
pub trait Transport: Send {
    /// Discriminator written into the show document's patch node.
    fn kind(&self) -> &'static str;

    fn init(&mut self) -> Result<(), ShowError>;

    fn update(&mut self, devices: &IndexMap<String, Device>);

    fn close(&mut self);

    /// Serialized patch node, including the `type` discriminator.
    fn to_node(&self) -> Value {
        json!({ "type": self.kind() })
    }
}

/// Constructs a transport from a patch node. Unknown discriminators yield
/// `None`; the caller logs and skips them.
pub fn transport_from_node(node: &Value) -> Option<Box<dyn Transport>> {
    match node.get("type").and_then(Value::as_str) {
        Some("monitor") => Some(Box::new(MonitorTransport::new().0)),
        Some(other) => {
            warn!("unknown patch type {other}; patch not loaded");
            None
        }
        None => {
            warn!("patch node has no type discriminator; patch not loaded");
            None
        }
    }
}

/// Snapshot of one tick's output, as seen by a transport.
pub type Frame = IndexMap<String, IndexMap<String, Param>>;

#[derive(Default)]
struct MonitorShared {
    last_frame: Option<Frame>,
    updates: usize,
    initialized: bool,
    closed: bool,
}

/// In-memory transport that records the frames it is handed. Used by the
/// CLI monitor mode and by tests that assert on rig output.
pub struct MonitorTransport {
    shared: Arc<Mutex<MonitorShared>>,
}

/// Read side of a [`MonitorTransport`], valid after the transport moves
/// into the rig.
#[derive(Clone)]
pub struct MonitorHandle {
    shared: Arc<Mutex<MonitorShared>>,
}

impl MonitorTransport {
    pub fn new() -> (Self, MonitorHandle) {
        let shared = Arc::new(Mutex::new(MonitorShared::default()));
        (
            Self {
                shared: Arc::clone(&shared),
            },
            MonitorHandle { shared },
        )
    }
}

impl Transport for MonitorTransport {
    fn kind(&self) -> &'static str {
        "monitor"
    }

    fn init(&mut self) -> Result<(), ShowError> {
        self.shared.lock().initialized = true;
        Ok(())
    }

    fn update(&mut self, devices: &IndexMap<String, Device>) {
        let frame: Frame = devices
            .iter()
            .map(|(id, d)| (id.clone(), d.params().clone()))
            .collect();
        let mut shared = self.shared.lock();
        shared.last_frame = Some(frame);
        shared.updates += 1;
    }

    fn close(&mut self) {
        self.shared.lock().closed = true;
    }
}

impl MonitorHandle {
    pub fn last_frame(&self) -> Option<Frame> {
        self.shared.lock().last_frame.clone()
    }

    pub fn update_count(&self) -> usize {
        self.shared.lock().updates
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.lock().initialized
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Float value of one parameter in the last frame.
    pub fn float_val(&self, device: &str, param: &str) -> Option<f64> {
        let shared = self.shared.lock();
        shared
            .last_frame
            .as_ref()?
            .get(device)?
            .get(param)?
            .as_float()
            .map(|f| f.val())
    }
}
