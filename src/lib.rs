//! This crate provides managed access to USB HID devices: hot-plug detection
//! through a polling [`DeviceScanner`], and per-device I/O through [`Device`],
//! which serializes all native calls behind one lock and can stream input
//! reports from a background read loop.
//!
//! The native layer sits behind the [`hid::HidBackend`] trait. Production
//! code uses [`hid::default_backend`] (the `hidapi` crate); tests script a
//! [`hid::mock::MockBackend`].
//!
//! ```no_run
//! use std::time::Duration;
//! use anyhow::Result;
//! use hidlink::{hid, Device, DeviceConfig, DeviceFilter, DeviceScanner};
//!
//! fn main() -> Result<()> {
//!     let backend = hid::default_backend()?;
//!
//!     // Watch the bus for one vendor/product pair
//!     let scanner = DeviceScanner::new(backend.clone(), DeviceFilter::new(0x16c0, 0x0486));
//!     scanner.device_arrived().subscribe(|info| println!("arrived: {}", info));
//!     scanner.device_removed().subscribe(|info| println!("removed: {}", info));
//!     scanner.start_async_scan();
//!
//!     // Open the first matching device and stream its input reports
//!     let device = Device::open(&*backend, 0x16c0, 0x0486, None, DeviceConfig::new(64))?;
//!     println!("{}", device.description()?);
//!     device.input_reports().subscribe(|report| println!("read: {}", hex::encode(report)));
//!     device.disconnected().subscribe(|_| println!("device disconnected"));
//!     device.start_async_read()?;
//!
//!     std::thread::sleep(Duration::from_secs(30));
//!     Ok(())
//! }
//! ```

pub type Result<T, E = Error> = core::result::Result<T, E>;

pub mod device;
pub mod error;
pub mod event;
pub mod hid;
pub mod info;
pub mod scanner;

pub use device::{Device, DeviceConfig};
pub use error::Error;
pub use event::{Event, HandlerId};
pub use info::{DeviceFilter, DeviceInfo};
pub use scanner::DeviceScanner;
