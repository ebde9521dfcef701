//! Scriptable in-memory backend for tests.
//!
//! [`MockBackend`] simulates the bus: attach and detach devices between scan
//! cycles, inject enumeration failures, and script each device's I/O through
//! the [`MockDevice`] returned by [`attach`](MockBackend::attach).

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use super::{HidBackend, HidHandle};
use crate::{error::Error, info::DeviceInfo, Result};

/// [`DeviceInfo`] with the given identity and test-friendly defaults.
pub fn device_info(path: &str, vendor_id: u16, product_id: u16) -> DeviceInfo {
    DeviceInfo {
        path: path.to_string(),
        vendor_id,
        product_id,
        serial_number: None,
        release_number: 0x0100,
        manufacturer_string: None,
        product_string: None,
        usage_page: 0,
        usage: 0,
        interface_number: 0,
    }
}

#[derive(Default)]
pub struct MockBackend {
    devices: Mutex<Vec<(DeviceInfo, Arc<MockDeviceState>)>>,
    fail_enumeration: AtomicBool,
    enumerations: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(MockBackend::default())
    }

    /// Puts a device on the simulated bus and returns its scriptable state.
    pub fn attach(&self, info: DeviceInfo) -> MockDevice {
        let state = Arc::new(MockDeviceState::default());
        let device = MockDevice {
            info: info.clone(),
            state: state.clone(),
        };
        self.devices.lock().unwrap().push((info, state));
        device
    }

    /// Takes a device off the simulated bus. Open handles keep working;
    /// only enumeration and future opens are affected.
    pub fn detach(&self, path: &str) -> bool {
        let mut devices = self.devices.lock().unwrap();
        let before = devices.len();
        devices.retain(|(info, _)| info.path != path);
        devices.len() != before
    }

    /// Makes every subsequent enumeration fail until called with `false`.
    pub fn fail_enumeration(&self, fail: bool) {
        self.fail_enumeration.store(fail, Ordering::SeqCst);
    }

    /// Number of enumeration calls served (failed ones included).
    pub fn enumeration_count(&self) -> usize {
        self.enumerations.load(Ordering::SeqCst)
    }
}

impl HidBackend for MockBackend {
    fn enumerate(&self, vendor_id: u16, product_id: u16) -> Result<Vec<DeviceInfo>> {
        self.enumerations.fetch_add(1, Ordering::SeqCst);
        if self.fail_enumeration.load(Ordering::SeqCst) {
            return Err(Error::Backend("injected enumeration failure".to_string()));
        }
        Ok(self
            .devices
            .lock()
            .unwrap()
            .iter()
            .filter(|(info, _)| vendor_id == 0 || info.vendor_id == vendor_id)
            .filter(|(info, _)| product_id == 0 || info.product_id == product_id)
            .map(|(info, _)| info.clone())
            .collect())
    }

    fn open(
        &self,
        vendor_id: u16,
        product_id: u16,
        serial: Option<&str>,
    ) -> Result<Box<dyn HidHandle>> {
        let devices = self.devices.lock().unwrap();
        devices
            .iter()
            .find(|(info, _)| {
                info.vendor_id == vendor_id
                    && info.product_id == product_id
                    && serial.map_or(true, |serial| {
                        info.serial_number.as_deref() == Some(serial)
                    })
            })
            .map(|(info, state)| {
                Box::new(MockHandle {
                    info: info.clone(),
                    state: state.clone(),
                }) as Box<dyn HidHandle>
            })
            .ok_or(Error::DeviceNotFound)
    }

    fn open_path(&self, path: &str) -> Result<Box<dyn HidHandle>> {
        let devices = self.devices.lock().unwrap();
        devices
            .iter()
            .find(|(info, _)| info.path == path)
            .map(|(info, state)| {
                Box::new(MockHandle {
                    info: info.clone(),
                    state: state.clone(),
                }) as Box<dyn HidHandle>
            })
            .ok_or(Error::DeviceNotFound)
    }
}

#[derive(Default)]
struct MockDeviceState {
    input_reports: Mutex<VecDeque<Vec<u8>>>,
    written: Mutex<Vec<Vec<u8>>>,
    read_requests: Mutex<Vec<usize>>,
    feature_report: Mutex<Option<Vec<u8>>>,
    sent_features: Mutex<Vec<Vec<u8>>>,
    indexed_strings: Mutex<HashMap<i32, String>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

/// Test-side control over one simulated device. Cloneable; all clones and
/// every handle opened through the backend share the same state.
#[derive(Clone)]
pub struct MockDevice {
    info: DeviceInfo,
    state: Arc<MockDeviceState>,
}

impl MockDevice {
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Queues one input report for delivery on a future read.
    pub fn queue_input_report(&self, report: impl Into<Vec<u8>>) {
        self.state
            .input_reports
            .lock()
            .unwrap()
            .push_back(report.into());
    }

    /// Every buffer written to the device, oldest first.
    pub fn written_reports(&self) -> Vec<Vec<u8>> {
        self.state.written.lock().unwrap().clone()
    }

    /// Buffer length of every read request, oldest first.
    pub fn read_request_lengths(&self) -> Vec<usize> {
        self.state.read_requests.lock().unwrap().clone()
    }

    /// Scripts the payload served by subsequent `get_feature_report` calls.
    pub fn set_feature_report(&self, data: impl Into<Vec<u8>>) {
        *self.state.feature_report.lock().unwrap() = Some(data.into());
    }

    pub fn sent_feature_reports(&self) -> Vec<Vec<u8>> {
        self.state.sent_features.lock().unwrap().clone()
    }

    pub fn set_indexed_string(&self, index: i32, value: &str) {
        self.state
            .indexed_strings
            .lock()
            .unwrap()
            .insert(index, value.to_string());
    }

    /// Makes subsequent reads fail, as a yanked cable would.
    pub fn fail_reads(&self, fail: bool) {
        self.state.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.fail_writes.store(fail, Ordering::SeqCst);
    }
}

struct MockHandle {
    info: DeviceInfo,
    state: Arc<MockDeviceState>,
}

impl HidHandle for MockHandle {
    fn read_timeout(&self, buf: &mut [u8], _timeout_ms: i32) -> Result<usize> {
        self.state.read_requests.lock().unwrap().push(buf.len());
        if self.state.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::Backend("injected read failure".to_string()));
        }
        match self.state.input_reports.lock().unwrap().pop_front() {
            Some(report) => {
                let n = report.len().min(buf.len());
                buf[..n].copy_from_slice(&report[..n]);
                Ok(n)
            }
            // Nothing queued behaves like an expired timeout.
            None => Ok(0),
        }
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        if self.state.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Backend("injected write failure".to_string()));
        }
        self.state.written.lock().unwrap().push(data.to_vec());
        Ok(data.len())
    }

    fn get_feature_report(&self, buf: &mut [u8]) -> Result<usize> {
        match self.state.feature_report.lock().unwrap().as_ref() {
            Some(report) => {
                let n = report.len().min(buf.len());
                buf[..n].copy_from_slice(&report[..n]);
                Ok(n)
            }
            None => Err(Error::Backend("no feature report scripted".to_string())),
        }
    }

    fn send_feature_report(&self, data: &[u8]) -> Result<()> {
        self.state.sent_features.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    fn manufacturer_string(&self) -> Result<Option<String>> {
        Ok(self.info.manufacturer_string.clone())
    }

    fn product_string(&self) -> Result<Option<String>> {
        Ok(self.info.product_string.clone())
    }

    fn serial_number_string(&self) -> Result<Option<String>> {
        Ok(self.info.serial_number.clone())
    }

    fn indexed_string(&self, index: i32) -> Result<Option<String>> {
        Ok(self.state.indexed_strings.lock().unwrap().get(&index).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumerate_honors_wildcards() {
        let backend = MockBackend::new();
        backend.attach(device_info("usb:1", 0x04d8, 0x003f));
        backend.attach(device_info("usb:2", 0x04d8, 0x0040));
        backend.attach(device_info("usb:3", 0x1234, 0x003f));

        assert_eq!(backend.enumerate(0, 0).unwrap().len(), 3);
        assert_eq!(backend.enumerate(0x04d8, 0).unwrap().len(), 2);
        assert_eq!(backend.enumerate(0, 0x003f).unwrap().len(), 2);
        assert_eq!(backend.enumerate(0x04d8, 0x003f).unwrap().len(), 1);
        assert_eq!(backend.enumerate(0x9999, 0).unwrap().len(), 0);
    }

    #[test]
    fn open_requires_exact_ids_and_optional_serial() {
        let backend = MockBackend::new();
        let mut with_serial = device_info("usb:1", 0x04d8, 0x003f);
        with_serial.serial_number = Some("A1".to_string());
        backend.attach(with_serial);

        assert!(backend.open(0x04d8, 0x003f, None).is_ok());
        assert!(backend.open(0x04d8, 0x003f, Some("A1")).is_ok());
        assert!(matches!(
            backend.open(0x04d8, 0x003f, Some("B2")),
            Err(Error::DeviceNotFound)
        ));
        assert!(matches!(
            backend.open(0, 0, None),
            Err(Error::DeviceNotFound)
        ));
    }

    #[test]
    fn handle_serves_queued_reports_then_times_out() {
        let backend = MockBackend::new();
        let device = backend.attach(device_info("usb:1", 1, 2));
        device.queue_input_report(vec![0xaa, 0xbb]);

        let handle = backend.open_path("usb:1").unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(handle.read_timeout(&mut buf, 100).unwrap(), 2);
        assert_eq!(&buf[..2], &[0xaa, 0xbb]);
        assert_eq!(handle.read_timeout(&mut buf, 100).unwrap(), 0);
        assert_eq!(device.read_request_lengths(), vec![8, 8]);
    }

    #[test]
    fn detach_hides_device_from_enumeration_but_not_open_handles() {
        let backend = MockBackend::new();
        let device = backend.attach(device_info("usb:1", 1, 2));
        let handle = backend.open_path("usb:1").unwrap();

        assert!(backend.detach("usb:1"));
        assert!(!backend.detach("usb:1"));
        assert!(backend.enumerate(0, 0).unwrap().is_empty());
        assert!(matches!(
            backend.open_path("usb:1"),
            Err(Error::DeviceNotFound)
        ));

        device.queue_input_report(vec![1]);
        let mut buf = [0u8; 4];
        assert_eq!(handle.read_timeout(&mut buf, 100).unwrap(), 1);
    }
}
