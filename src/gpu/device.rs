//! Physical device identifiers and compute-capability values.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A physical GPU identifier.
///
/// NVML addresses a device either by its zero-based index over all installed
/// devices or by its stable UUID string. MIG slices only have the latter.
/// The two forms never compare equal: `Index(0)` and `Uuid("0")` are distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceIdentifier {
    /// Physical device index.
    Index(u32),

    /// Device UUID (e.g. "GPU-5e3c..." or "MIG-1f2a...").
    Uuid(String),
}

impl DeviceIdentifier {
    /// Whether this identifier names a partitioned sub-device, i.e. it is a
    /// UUID containing `marker`.
    pub fn is_partitioned(&self, marker: &str) -> bool {
        match self {
            DeviceIdentifier::Index(_) => false,
            DeviceIdentifier::Uuid(uuid) => uuid.contains(marker),
        }
    }
}

impl fmt::Display for DeviceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceIdentifier::Index(index) => write!(f, "{index}"),
            DeviceIdentifier::Uuid(uuid) => f.write_str(uuid),
        }
    }
}

impl From<u32> for DeviceIdentifier {
    fn from(index: u32) -> Self {
        DeviceIdentifier::Index(index)
    }
}

impl From<&str> for DeviceIdentifier {
    fn from(uuid: &str) -> Self {
        DeviceIdentifier::Uuid(uuid.to_string())
    }
}

impl From<String> for DeviceIdentifier {
    fn from(uuid: String) -> Self {
        DeviceIdentifier::Uuid(uuid)
    }
}

/// CUDA compute capability (major, minor).
///
/// Ordering is lexicographic, so `8.0 < 8.6 < 9.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ComputeCapability {
    pub major: u32,
    pub minor: u32,
}

impl ComputeCapability {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Integer form used by kernel selection tables: `8.6` → `86`.
    /// `None` if the result does not fit in a `u32`.
    pub fn to_int(&self) -> Option<u32> {
        self.major.checked_mul(10)?.checked_add(self.minor)
    }
}

impl fmt::Display for ComputeCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl From<(u32, u32)> for ComputeCapability {
    fn from((major, minor): (u32, u32)) -> Self {
        Self { major, minor }
    }
}

impl From<ComputeCapability> for (u32, u32) {
    fn from(cap: ComputeCapability) -> Self {
        (cap.major, cap.minor)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_index_and_uuid_are_distinct() {
        let mut set = HashSet::new();
        set.insert(DeviceIdentifier::Index(0));
        set.insert(DeviceIdentifier::from("0"));
        assert_eq!(set.len(), 2);
        assert_ne!(DeviceIdentifier::Index(0), DeviceIdentifier::from("0"));
    }

    #[test]
    fn test_partitioned_marker() {
        assert!(DeviceIdentifier::from("MIG-abc").is_partitioned("MIG"));
        assert!(!DeviceIdentifier::from("GPU-abc").is_partitioned("MIG"));
        assert!(!DeviceIdentifier::Index(7).is_partitioned("MIG"));
    }

    #[test]
    fn test_capability_ordering() {
        let ampere = ComputeCapability::new(8, 6);
        assert!(ampere > ComputeCapability::new(8, 0));
        assert!(ampere < ComputeCapability::new(9, 0));
        assert!(ComputeCapability::new(10, 0) > ComputeCapability::new(9, 9));
        assert_eq!(ampere.to_int(), Some(86));
        assert_eq!(ampere.to_string(), "8.6");
    }

    #[test]
    fn test_to_int_overflow() {
        assert_eq!(ComputeCapability::new(u32::MAX, 0).to_int(), None);
        assert_eq!(ComputeCapability::new(429_496_729, 6).to_int(), None);
        assert_eq!(ComputeCapability::new(429_496_729, 5).to_int(), Some(u32::MAX));
    }

    #[test]
    fn test_identifier_json_is_untagged() {
        let json = serde_json::to_string(&DeviceIdentifier::Index(3)).unwrap();
        assert_eq!(json, "3");
        let json = serde_json::to_string(&DeviceIdentifier::from("MIG-abc")).unwrap();
        assert_eq!(json, "\"MIG-abc\"");
    }
}
