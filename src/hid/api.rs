//! hidapi-backed implementation of the backend traits.

use std::{
    ffi::CString,
    ops::Deref,
    sync::{Arc, Mutex},
};

use atomic_refcell::AtomicRefCell;
use hidapi::{HidApi, HidDevice};

use super::{HidBackend, HidHandle};
use crate::{error::Error, info::DeviceInfo, Result};

static HIDAPI_INSTANCE: AtomicRefCell<Option<Arc<HidApiBackend>>> = AtomicRefCell::new(None);

/// Gets or initializes the process-wide backend. hidapi can only be
/// instantiated once per process.
pub(super) fn instance() -> Result<Arc<HidApiBackend>> {
    if let Some(backend) = HIDAPI_INSTANCE.borrow().deref() {
        return Ok(backend.clone());
    }

    let backend = Arc::new(HidApiBackend::new()?);
    HIDAPI_INSTANCE.borrow_mut().replace(backend.clone());
    Ok(backend)
}

pub(super) struct HidApiBackend {
    api: Mutex<HidApi>,
}

impl HidApiBackend {
    fn new() -> Result<Self> {
        Ok(HidApiBackend {
            api: Mutex::new(HidApi::new()?),
        })
    }
}

impl HidBackend for HidApiBackend {
    fn enumerate(&self, vendor_id: u16, product_id: u16) -> Result<Vec<DeviceInfo>> {
        let mut api = self.api.lock().unwrap();
        api.refresh_devices()?;
        Ok(api
            .device_list()
            .filter(|device| vendor_id == 0 || device.vendor_id() == vendor_id)
            .filter(|device| product_id == 0 || device.product_id() == product_id)
            .map(DeviceInfo::from)
            .collect())
    }

    fn open(
        &self,
        vendor_id: u16,
        product_id: u16,
        serial: Option<&str>,
    ) -> Result<Box<dyn HidHandle>> {
        let api = self.api.lock().unwrap();
        let device = match serial {
            Some(serial) => api.open_serial(vendor_id, product_id, serial),
            None => api.open(vendor_id, product_id),
        }
        .map_err(|e| {
            log::debug!("open {:04x}:{:04x} failed: {}", vendor_id, product_id, e);
            Error::DeviceNotFound
        })?;
        Ok(Box::new(HidApiHandle { device }))
    }

    fn open_path(&self, path: &str) -> Result<Box<dyn HidHandle>> {
        let api = self.api.lock().unwrap();
        let path = CString::new(path).map_err(|_| Error::DeviceNotFound)?;
        let device = api.open_path(&path).map_err(|e| {
            log::debug!("open {:?} failed: {}", path, e);
            Error::DeviceNotFound
        })?;
        Ok(Box::new(HidApiHandle { device }))
    }
}

/// Closing happens in [`HidDevice`]'s drop.
struct HidApiHandle {
    device: HidDevice,
}

impl HidHandle for HidApiHandle {
    fn read_timeout(&self, buf: &mut [u8], timeout_ms: i32) -> Result<usize> {
        Ok(self.device.read_timeout(buf, timeout_ms)?)
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        Ok(self.device.write(data)?)
    }

    fn get_feature_report(&self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.device.get_feature_report(buf)?)
    }

    fn send_feature_report(&self, data: &[u8]) -> Result<()> {
        Ok(self.device.send_feature_report(data)?)
    }

    fn manufacturer_string(&self) -> Result<Option<String>> {
        Ok(self.device.get_manufacturer_string()?)
    }

    fn product_string(&self) -> Result<Option<String>> {
        Ok(self.device.get_product_string()?)
    }

    fn serial_number_string(&self) -> Result<Option<String>> {
        Ok(self.device.get_serial_number_string()?)
    }

    fn indexed_string(&self, index: i32) -> Result<Option<String>> {
        Ok(self.device.get_indexed_string(index)?)
    }
}
