//! Device identity types produced by enumeration.

use std::{
    fmt,
    hash::{Hash, Hasher},
    num::ParseIntError,
    str::FromStr,
};

use serde::{Deserialize, Serialize};

/// Immutable snapshot of one enumerated device.
///
/// The path is the native library's stable identifier for the attached
/// interface, and it alone defines equality and hashing; the scanner's
/// arrival/removal diffing keys on it. Every other field is descriptive.
/// Snapshots are never mutated; the next enumeration supersedes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Platform-specific device path, unique per attached interface.
    pub path: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial_number: Option<String>,
    /// Device release number in binary-coded decimal.
    pub release_number: u16,
    pub manufacturer_string: Option<String>,
    pub product_string: Option<String>,
    pub usage_page: u16,
    pub usage: u16,
    pub interface_number: i32,
}

impl PartialEq for DeviceInfo {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for DeviceInfo {}

impl Hash for DeviceInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} {}",
            self.vendor_id, self.product_id, self.path
        )?;
        if let Some(product) = &self.product_string {
            write!(f, " ({})", product)?;
        }
        Ok(())
    }
}

#[cfg(feature = "hid")]
impl From<&hidapi::DeviceInfo> for DeviceInfo {
    fn from(info: &hidapi::DeviceInfo) -> Self {
        DeviceInfo {
            path: info.path().to_string_lossy().into_owned(),
            vendor_id: info.vendor_id(),
            product_id: info.product_id(),
            serial_number: info.serial_number().map(str::to_string),
            release_number: info.release_number(),
            manufacturer_string: info.manufacturer_string().map(str::to_string),
            product_string: info.product_string().map(str::to_string),
            usage_page: info.usage_page(),
            usage: info.usage(),
            interface_number: info.interface_number(),
        }
    }
}

/// Vendor/product filter where `None` matches anything.
///
/// The native layer treats `0` as the wildcard id, so `0` normalizes to
/// `None` on the way in and [`raw_ids`](Self::raw_ids) maps `None` back to
/// `0` on the way out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFilter {
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
}

impl DeviceFilter {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        DeviceFilter {
            vendor_id: normalize(vendor_id),
            product_id: normalize(product_id),
        }
    }

    /// Matches every device.
    pub fn any() -> Self {
        DeviceFilter::default()
    }

    pub fn with_vendor_id(mut self, vendor_id: u16) -> Self {
        self.vendor_id = normalize(vendor_id);
        self
    }

    pub fn with_product_id(mut self, product_id: u16) -> Self {
        self.product_id = normalize(product_id);
        self
    }

    /// The raw `(vendor_id, product_id)` pair, `0` meaning wildcard.
    pub fn raw_ids(&self) -> (u16, u16) {
        (self.vendor_id.unwrap_or(0), self.product_id.unwrap_or(0))
    }

    pub fn matches(&self, info: &DeviceInfo) -> bool {
        self.vendor_id.map_or(true, |vid| vid == info.vendor_id)
            && self.product_id.map_or(true, |pid| pid == info.product_id)
    }
}

fn normalize(id: u16) -> Option<u16> {
    (id != 0).then_some(id)
}

impl fmt::Display for DeviceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.vendor_id {
            Some(vid) => write!(f, "{:04x}", vid)?,
            None => f.write_str("*")?,
        }
        f.write_str(":")?;
        match self.product_id {
            Some(pid) => write!(f, "{:04x}", pid)?,
            None => f.write_str("*")?,
        }
        Ok(())
    }
}

impl FromStr for DeviceFilter {
    type Err = ParseIntError;

    /// Parses `vid:pid` in hex, either side `*` (or empty) for wildcard.
    /// A bare `vid` is shorthand for `vid:*`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (vendor, product) = match s.split_once(':') {
            Some((vendor, product)) => (vendor, product),
            None => (s, "*"),
        };
        Ok(DeviceFilter {
            vendor_id: parse_id(vendor)?,
            product_id: parse_id(product)?,
        })
    }
}

fn parse_id(s: &str) -> Result<Option<u16>, ParseIntError> {
    match s {
        "" | "*" => Ok(None),
        _ => {
            let digits = s.trim_start_matches("0x");
            u16::from_str_radix(digits, 16).map(normalize)
        }
    }
}
