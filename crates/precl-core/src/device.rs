//! Platform and device descriptions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque handle to a device, as handed out by a backend.
///
/// Ids are only meaningful within the backend that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Class of compute device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// GPU or other accelerator.
    Accelerator,
    /// General-purpose processor.
    Cpu,
}

impl DeviceKind {
    /// Context creation order: accelerator first, then CPU.
    pub const PREFERENCE: [DeviceKind; 2] = [DeviceKind::Accelerator, DeviceKind::Cpu];
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Accelerator => write!(f, "GPU"),
            DeviceKind::Cpu => write!(f, "CPU"),
        }
    }
}

/// Descriptive information about a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Backend handle.
    pub id: DeviceId,
    /// Device class.
    pub kind: DeviceKind,
    /// Marketing name.
    pub name: String,
    /// Vendor string.
    pub vendor: String,
    /// Driver version string.
    pub driver_version: String,
}

impl DeviceInfo {
    /// Filesystem-safe identifier derived from the device name.
    ///
    /// Used to key cached binaries per device.
    pub fn slug(&self) -> String {
        let mut slug = String::with_capacity(self.name.len());
        let mut last_dash = true;
        for c in self.name.chars() {
            if c.is_ascii_alphanumeric() {
                slug.push(c.to_ascii_lowercase());
                last_dash = false;
            } else if !last_dash {
                slug.push('-');
                last_dash = true;
            }
        }
        while slug.ends_with('-') {
            slug.pop();
        }
        if slug.is_empty() {
            slug.push_str("device");
        }
        slug
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] ({})", self.name, self.kind, self.vendor)
    }
}

/// A platform and the devices it exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformInfo {
    /// Position in the backend's platform list.
    pub index: usize,
    /// Platform name.
    pub name: String,
    /// Platform vendor.
    pub vendor: String,
    /// Platform version string.
    pub version: String,
    /// Devices on this platform.
    pub devices: Vec<DeviceInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str) -> DeviceInfo {
        DeviceInfo {
            id: DeviceId(1),
            kind: DeviceKind::Accelerator,
            name: name.to_string(),
            vendor: "Acme".to_string(),
            driver_version: "1.0".to_string(),
        }
    }

    #[test]
    fn test_slug() {
        assert_eq!(info("GeForce RTX 4090").slug(), "geforce-rtx-4090");
        assert_eq!(info("  Intel(R) UHD  ").slug(), "intel-r-uhd");
        assert_eq!(info("***").slug(), "device");
    }

    #[test]
    fn test_preference_order() {
        assert_eq!(DeviceKind::PREFERENCE[0], DeviceKind::Accelerator);
        assert_eq!(DeviceKind::PREFERENCE[1], DeviceKind::Cpu);
        assert_eq!(DeviceKind::Cpu.to_string(), "CPU");
    }
}
