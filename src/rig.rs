use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::error::ShowError;
use crate::model::device::Device;
use crate::model::device_set::{DeviceSet, MetadataOp};
use crate::select;
use crate::transport::Transport;

/// Update function run each tick before the transports, keyed by an
/// integer id. Receives the live device map.
pub type UpdateFn = Box<dyn FnMut(&mut IndexMap<String, Device>) + Send>;

pub(crate) struct RigState {
    devices: IndexMap<String, Device>,
    by_channel: BTreeMap<u32, BTreeSet<String>>,
    transports: IndexMap<String, Box<dyn Transport>>,
    update_fns: BTreeMap<i32, UpdateFn>,
}

impl RigState {
    /// One tick: update functions in id order, then every transport.
    fn tick(&mut self) {
        for f in self.update_fns.values_mut() {
            f(&mut self.devices);
        }
        for t in self.transports.values_mut() {
            t.update(&self.devices);
        }
    }
}

/// Owns the devices, their indexes, and the transport backends, and runs
/// the periodic tick loop on its own thread.
///
/// Structural mutation (devices, transports, update functions) is refused
/// while the loop runs; value mutation through the device accessors is
/// always allowed.
pub struct Rig {
    state: Arc<Mutex<RigState>>,
    running: Arc<AtomicBool>,
    slow: Arc<AtomicBool>,
    refresh_rate: Arc<AtomicU32>,
    handle: Option<JoinHandle<()>>,
}

impl Default for Rig {
    fn default() -> Self {
        Self::new()
    }
}

impl Rig {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RigState {
                devices: IndexMap::new(),
                by_channel: BTreeMap::new(),
                transports: IndexMap::new(),
                update_fns: BTreeMap::new(),
            })),
            running: Arc::new(AtomicBool::new(false)),
            slow: Arc::new(AtomicBool::new(false)),
            refresh_rate: Arc::new(AtomicU32::new(40)),
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// True while ticks exceed the refresh budget.
    pub fn is_slow(&self) -> bool {
        self.slow.load(Ordering::Acquire)
    }

    pub fn refresh_rate(&self) -> u32 {
        self.refresh_rate.load(Ordering::Acquire)
    }

    /// Target tick rate in Hz. Takes effect on the next iteration.
    pub fn set_refresh_rate(&self, hz: u32) {
        self.refresh_rate.store(hz.max(1), Ordering::Release);
    }

    fn refuse_while_running(&self, what: &str) -> Result<(), ShowError> {
        if self.is_running() {
            let message = format!("can't {what} while the rig is running");
            error!("{message}");
            return Err(ShowError::InvariantViolation { message });
        }
        Ok(())
    }

    // ── Devices ────────────────────────────────────────────────────

    pub fn add_device(&self, device: Device) -> Result<(), ShowError> {
        self.refuse_while_running("add devices to the rig")?;
        if device.id().is_empty() {
            return Err(ShowError::Validation {
                message: "device ids must be non-empty".to_string(),
            });
        }
        let mut state = self.state.lock();
        if state.devices.contains_key(device.id()) {
            let message = format!("device id {} already exists in rig", device.id());
            error!("{message}");
            return Err(ShowError::InvariantViolation { message });
        }
        state
            .by_channel
            .entry(device.channel())
            .or_default()
            .insert(device.id().to_string());
        state.devices.insert(device.id().to_string(), device);
        Ok(())
    }

    pub fn delete_device(&self, id: &str) -> Result<(), ShowError> {
        self.refuse_while_running("delete devices")?;
        let mut state = self.state.lock();
        let Some(device) = state.devices.shift_remove(id) else {
            return Err(ShowError::NotFound {
                what: format!("device {id}"),
            });
        };
        if let Some(ids) = state.by_channel.get_mut(&device.channel()) {
            ids.remove(id);
            if ids.is_empty() {
                state.by_channel.remove(&device.channel());
            }
        }
        Ok(())
    }

    pub fn device_count(&self) -> usize {
        self.state.lock().devices.len()
    }

    pub fn has_device(&self, id: &str) -> bool {
        self.state.lock().devices.contains_key(id)
    }

    /// Read access to one device.
    pub fn with_device<R>(&self, id: &str, f: impl FnOnce(&Device) -> R) -> Option<R> {
        self.state.lock().devices.get(id).map(f)
    }

    /// Mutating access to one device. Value mutation is fine while
    /// running; the tick reads the same lock.
    pub fn with_device_mut<R>(&self, id: &str, f: impl FnOnce(&mut Device) -> R) -> Option<R> {
        self.state.lock().devices.get_mut(id).map(f)
    }

    /// Read access to the whole device map.
    pub fn with_devices<R>(&self, f: impl FnOnce(&IndexMap<String, Device>) -> R) -> R {
        f(&self.state.lock().devices)
    }

    pub fn with_devices_mut<R>(&self, f: impl FnOnce(&mut IndexMap<String, Device>) -> R) -> R {
        f(&mut self.state.lock().devices)
    }

    /// Copies parameter values (not identity) into the rig's devices by
    /// id. Unknown ids are reported once at WARN.
    pub fn set_all_devices(&self, state: &IndexMap<String, Device>) {
        let mut rig_state = self.state.lock();
        set_all_devices(&mut rig_state.devices, state);
    }

    // ── Queries ────────────────────────────────────────────────────

    /// Evaluates a selector query (grammar in [`crate::select`]).
    pub fn select(&self, query: &str) -> DeviceSet {
        let state = self.state.lock();
        select::select(&state.devices, query)
    }

    pub fn all_devices(&self) -> DeviceSet {
        DeviceSet::all(&self.state.lock().devices)
    }

    pub fn channel(&self, channel: u32) -> DeviceSet {
        let state = self.state.lock();
        DeviceSet::new().add_channel(&state.devices, channel)
    }

    pub fn channel_range(&self, lower: u32, upper: u32) -> DeviceSet {
        let state = self.state.lock();
        DeviceSet::new().add_channel_range(&state.devices, lower, upper)
    }

    pub fn devices_with_metadata(&self, key: &str, val: &str, eq: bool) -> DeviceSet {
        let state = self.state.lock();
        DeviceSet::new().add_metadata_match(&state.devices, key, MetadataOp::Equals, val, eq)
    }

    /// Distinct values of a metadata key across all devices.
    pub fn metadata_values(&self, key: &str) -> BTreeSet<String> {
        let state = self.state.lock();
        state
            .devices
            .values()
            .filter_map(|d| d.metadata(key).map(str::to_string))
            .collect()
    }

    /// Every parameter name used by any device.
    pub fn all_used_params(&self) -> BTreeSet<String> {
        let state = self.state.lock();
        state
            .devices
            .values()
            .flat_map(|d| d.param_names().map(str::to_string))
            .collect()
    }

    // ── Transports & update functions ──────────────────────────────

    pub fn add_transport(
        &self,
        name: impl Into<String>,
        transport: Box<dyn Transport>,
    ) -> Result<(), ShowError> {
        self.refuse_while_running("add transports")?;
        let name = name.into();
        let mut state = self.state.lock();
        if state.transports.contains_key(&name) {
            return Err(ShowError::InvariantViolation {
                message: format!("transport {name} already exists"),
            });
        }
        state.transports.insert(name, transport);
        Ok(())
    }

    pub fn delete_transport(&self, name: &str) -> Result<(), ShowError> {
        self.refuse_while_running("remove transports")?;
        let mut state = self.state.lock();
        match state.transports.shift_remove(name) {
            Some(mut t) => {
                t.close();
                Ok(())
            }
            None => Err(ShowError::NotFound {
                what: format!("transport {name}"),
            }),
        }
    }

    pub fn transport_names(&self) -> Vec<String> {
        self.state.lock().transports.keys().cloned().collect()
    }

    pub(crate) fn transport_nodes(&self) -> IndexMap<String, serde_json::Value> {
        let state = self.state.lock();
        state
            .transports
            .iter()
            .map(|(name, t)| (name.clone(), t.to_node()))
            .collect()
    }

    /// Initializes every transport.
    pub fn init(&self) -> Result<(), ShowError> {
        let mut state = self.state.lock();
        for t in state.transports.values_mut() {
            t.init()?;
        }
        Ok(())
    }

    /// Registers an update function. Refused while running or when the id
    /// is taken.
    pub fn add_function(&self, id: i32, f: UpdateFn) -> Result<(), ShowError> {
        self.refuse_while_running("add update functions")?;
        let mut state = self.state.lock();
        if state.update_fns.contains_key(&id) {
            return Err(ShowError::InvariantViolation {
                message: format!("update function id {id} already exists"),
            });
        }
        state.update_fns.insert(id, f);
        Ok(())
    }

    pub fn remove_function(&self, id: i32) -> Result<(), ShowError> {
        self.refuse_while_running("remove update functions")?;
        let mut state = self.state.lock();
        match state.update_fns.remove(&id) {
            Some(_) => Ok(()),
            None => Err(ShowError::NotFound {
                what: format!("update function {id}"),
            }),
        }
    }

    // ── Tick loop ──────────────────────────────────────────────────

    /// Runs one tick on the calling thread.
    pub fn tick_once(&self) {
        self.state.lock().tick();
    }

    /// Starts the periodic tick loop on its own thread.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        self.running.store(true, Ordering::Release);
        self.slow.store(false, Ordering::Release);

        let state = Arc::clone(&self.state);
        let running = Arc::clone(&self.running);
        let slow = Arc::clone(&self.slow);
        let refresh_rate = Arc::clone(&self.refresh_rate);

        self.handle = Some(std::thread::spawn(move || {
            info!("rig update loop started");
            while running.load(Ordering::Acquire) {
                let start = Instant::now();
                state.lock().tick();

                let hz = refresh_rate.load(Ordering::Acquire).max(1);
                let period = Duration::from_secs_f64(1.0 / f64::from(hz));
                let elapsed = start.elapsed();
                if elapsed < period {
                    slow.store(false, Ordering::Release);
                    std::thread::sleep(period - elapsed);
                } else {
                    slow.store(true, Ordering::Release);
                }
            }
            info!("rig update loop stopped");
        }));
    }

    /// Requests a stop and joins the loop thread. In-flight transport
    /// writes complete first.
    pub fn stop(&mut self) {
        if !self.is_running() {
            return;
        }
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("rig update loop thread panicked");
            }
        }
    }

    /// Stops the loop and closes every transport, in that order.
    pub fn close(&mut self) {
        self.stop();
        let mut state = self.state.lock();
        for t in state.transports.values_mut() {
            t.close();
        }
    }
}

impl Drop for Rig {
    fn drop(&mut self) {
        self.close();
    }
}

/// Copy-by-value of parameter state between device maps, keyed by id.
pub(crate) fn set_all_devices(
    target: &mut IndexMap<String, Device>,
    source: &IndexMap<String, Device>,
) {
    for (id, src) in source {
        let Some(dst) = target.get_mut(id) else {
            warn!("rig does not contain a device with id {id}");
            continue;
        };
        for (name, param) in src.params() {
            dst.copy_param_value(name, param);
        }
    }
}
