//! Hot-plug detection by periodic enumeration polling.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

use crate::{
    event::Event,
    hid::HidBackend,
    info::{DeviceFilter, DeviceInfo},
    Result,
};

const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_millis(100);

/// Watches the bus for devices matching a [`DeviceFilter`].
///
/// The background loop started by [`start_async_scan`](Self::start_async_scan)
/// enumerates once per interval, diffs the snapshot against the previous one
/// by device path, and emits [`device_arrived`](Self::device_arrived) /
/// [`device_removed`](Self::device_removed) events for the difference. The
/// first cycle reports every present device as an arrival.
///
/// Events are emitted after the tracked set has been replaced and its lock
/// released, so a handler that queries [`connected_devices`](Self::connected_devices)
/// may already observe a snapshot newer than the event it is handling.
pub struct DeviceScanner {
    backend: Arc<dyn HidBackend>,
    filter: DeviceFilter,
    state: Arc<ScanState>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

struct ScanState {
    devices: Mutex<Vec<DeviceInfo>>,
    interval: Mutex<Duration>,
    scanning: AtomicBool,
    generation: AtomicU64,
    device_arrived: Event<DeviceInfo>,
    device_removed: Event<DeviceInfo>,
}

impl DeviceScanner {
    pub fn new(backend: Arc<dyn HidBackend>, filter: DeviceFilter) -> DeviceScanner {
        DeviceScanner {
            backend,
            filter,
            state: Arc::new(ScanState {
                devices: Mutex::new(Vec::new()),
                interval: Mutex::new(DEFAULT_SCAN_INTERVAL),
                scanning: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                device_arrived: Event::new(),
                device_removed: Event::new(),
            }),
            thread: Mutex::new(None),
        }
    }

    /// One synchronous enumeration with the configured filter.
    ///
    /// Returns the raw snapshot without touching the tracked device set;
    /// native failures propagate to the caller.
    pub fn scan_once(&self) -> Result<Vec<DeviceInfo>> {
        self.scan_once_with(&self.filter)
    }

    /// Like [`scan_once`](Self::scan_once) with a one-off filter.
    pub fn scan_once_with(&self, filter: &DeviceFilter) -> Result<Vec<DeviceInfo>> {
        let (vendor_id, product_id) = filter.raw_ids();
        self.backend.enumerate(vendor_id, product_id)
    }

    /// Starts the polling loop. No-op while one is already running.
    pub fn start_async_scan(&self) {
        if self.state.scanning.swap(true, Ordering::SeqCst) {
            return;
        }
        // A loop left over from a previous start exits on the generation
        // check even if it never observed the cleared flag.
        let generation = self.state.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let backend = self.backend.clone();
        let filter = self.filter;
        let state = self.state.clone();
        let handle = thread::spawn(move || scan_loop(backend, filter, state, generation));
        *self.thread.lock().unwrap() = Some(handle);
    }

    /// Signals the polling loop to exit after its current cycle; does not
    /// wait for it. Safe when no loop is running.
    pub fn stop_async_scan(&self) {
        self.state.scanning.store(false, Ordering::SeqCst);
    }

    /// True while the polling loop runs. Turns false on
    /// [`stop_async_scan`](Self::stop_async_scan) and when the loop exits
    /// on its own, after a failed cycle or a panicking handler.
    pub fn is_scanning(&self) -> bool {
        self.state.scanning.load(Ordering::SeqCst)
    }

    /// Snapshot of the devices seen by the last completed scan cycle.
    pub fn connected_devices(&self) -> Vec<DeviceInfo> {
        self.state.devices.lock().unwrap().clone()
    }

    pub fn is_device_connected(&self) -> bool {
        !self.state.devices.lock().unwrap().is_empty()
    }

    pub fn filter(&self) -> DeviceFilter {
        self.filter
    }

    pub fn scan_interval(&self) -> Duration {
        *self.state.interval.lock().unwrap()
    }

    /// Applies from the next cycle; callable while the loop runs.
    pub fn set_scan_interval(&self, interval: Duration) {
        *self.state.interval.lock().unwrap() = interval;
    }

    /// Fired once per device that appeared since the previous cycle.
    pub fn device_arrived(&self) -> &Event<DeviceInfo> {
        &self.state.device_arrived
    }

    /// Fired once per device that disappeared since the previous cycle.
    pub fn device_removed(&self) -> &Event<DeviceInfo> {
        &self.state.device_removed
    }
}

impl Drop for DeviceScanner {
    fn drop(&mut self) {
        self.stop_async_scan();
    }
}

/// Clears the scanning flag when its loop exits by any path, a panicking
/// event handler included, unless a newer loop owns the flag by then.
struct ScanGuard<'a> {
    state: &'a ScanState,
    generation: u64,
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        if self.state.generation.load(Ordering::SeqCst) == self.generation {
            self.state.scanning.store(false, Ordering::SeqCst);
        }
    }
}

fn scan_loop(
    backend: Arc<dyn HidBackend>,
    filter: DeviceFilter,
    state: Arc<ScanState>,
    generation: u64,
) {
    let _guard = ScanGuard {
        state: &state,
        generation,
    };
    let (vendor_id, product_id) = filter.raw_ids();
    while state.scanning.load(Ordering::SeqCst)
        && state.generation.load(Ordering::SeqCst) == generation
    {
        match backend.enumerate(vendor_id, product_id) {
            Ok(devices) => publish(&state, devices),
            Err(e) => {
                log::error!("device scan failed: {}", e);
                break;
            }
        }
        let interval = *state.interval.lock().unwrap();
        thread::sleep(interval);
    }
}

/// Replaces the tracked set with `devices` and emits the difference,
/// arrivals before removals, outside the set lock.
fn publish(state: &ScanState, devices: Vec<DeviceInfo>) {
    let (added, removed) = {
        let mut current = state.devices.lock().unwrap();
        let added: Vec<DeviceInfo> = devices
            .iter()
            .filter(|device| !current.contains(device))
            .cloned()
            .collect();
        let removed: Vec<DeviceInfo> = current
            .iter()
            .filter(|device| !devices.contains(device))
            .cloned()
            .collect();
        *current = devices;
        (added, removed)
    };
    for device in &added {
        log::trace!("device arrived: {}", device);
        state.device_arrived.emit(device);
    }
    for device in &removed {
        log::trace!("device removed: {}", device);
        state.device_removed.emit(device);
    }
}
