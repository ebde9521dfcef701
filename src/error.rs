//! Crate-wide error type.

use thiserror::Error;

#[cfg(feature = "hid")]
use hidapi::HidError;

#[derive(Error, Debug)]
pub enum Error {
    #[cfg(feature = "hid")]
    #[error("An HID error has occurred: {0}")]
    Hid(#[from] HidError),

    /// The native open call yielded no handle, or nothing matched.
    #[error("no matching device was found, or it could not be opened")]
    DeviceNotFound,

    /// Operation attempted on a disposed device.
    #[error("the device is not open")]
    DeviceClosed,

    #[error("payload is {len} bytes but the device report length is {max}")]
    PayloadTooLarge { len: usize, max: usize },

    /// Failure reported by a non-hidapi backend.
    #[error("backend error: {0}")]
    Backend(String),
}
