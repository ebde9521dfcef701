//! The seam between the managed layer and native HID access.
//!
//! [`HidBackend`] covers what the native library does process-wide
//! (enumeration, opening); [`HidHandle`] is one open device. The `hid`
//! feature provides the hidapi-backed implementation behind
//! [`default_backend`]; the `mock` feature provides a scriptable one for
//! tests.

#[cfg(feature = "hid")]
use std::sync::Arc;

use crate::{info::DeviceInfo, Result};

#[cfg(feature = "hid")]
mod api;

#[cfg(feature = "mock")]
pub mod mock;

/// Enumerates and opens devices.
pub trait HidBackend: Send + Sync {
    /// Lists attached devices matching `vendor_id`/`product_id`, `0` acting
    /// as a wildcard for either field.
    fn enumerate(&self, vendor_id: u16, product_id: u16) -> Result<Vec<DeviceInfo>>;

    /// Opens the first device with exactly these ids, and this serial number
    /// when one is given.
    fn open(
        &self,
        vendor_id: u16,
        product_id: u16,
        serial: Option<&str>,
    ) -> Result<Box<dyn HidHandle>>;

    /// Opens the device at a platform path from a previous enumeration.
    fn open_path(&self, path: &str) -> Result<Box<dyn HidHandle>>;
}

/// One open device. Dropping the handle closes it.
///
/// Implementations need no internal synchronization: [`Device`] serializes
/// every call, including the closing drop, behind its I/O lock.
///
/// [`Device`]: crate::Device
pub trait HidHandle: Send {
    /// Reads one input report, waiting up to `timeout_ms`. Returns `Ok(0)`
    /// when the timeout elapses without data.
    fn read_timeout(&self, buf: &mut [u8], timeout_ms: i32) -> Result<usize>;

    /// Writes one output report, byte 0 carrying the report id.
    fn write(&self, data: &[u8]) -> Result<usize>;

    fn get_feature_report(&self, buf: &mut [u8]) -> Result<usize>;

    fn send_feature_report(&self, data: &[u8]) -> Result<()>;

    fn manufacturer_string(&self) -> Result<Option<String>>;

    fn product_string(&self) -> Result<Option<String>>;

    fn serial_number_string(&self) -> Result<Option<String>>;

    fn indexed_string(&self, index: i32) -> Result<Option<String>>;
}

/// The shared hidapi-backed backend.
///
/// hidapi supports a single live instance per process, so the underlying
/// handle is initialized once and reused by every caller.
#[cfg(feature = "hid")]
pub fn default_backend() -> Result<Arc<dyn HidBackend>> {
    let backend = api::instance()?;
    Ok(backend)
}
