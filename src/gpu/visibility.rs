//! Logical → physical device mapping under `CUDA_VISIBLE_DEVICES`.
//!
//! When the variable is unset every logical index maps to the same physical
//! index. When set, it is a comma-separated list whose N-th token names the
//! physical device behind logical index N, either by index or by UUID.

use thiserror::Error;

use crate::gpu::device::DeviceIdentifier;

/// Default environment variable holding the visibility list.
pub const CUDA_VISIBLE_DEVICES: &str = "CUDA_VISIBLE_DEVICES";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Logical device {index} out of range: {len} device(s) visible")]
pub struct IndexOutOfRange {
    pub index: u32,
    pub len: usize,
}

/// A parsed visibility list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibleDevices {
    devices: Vec<DeviceIdentifier>,
}

impl VisibleDevices {
    /// Parse a comma-separated visibility value.
    ///
    /// Tokens are kept in order and never dropped, so an empty value yields
    /// one empty UUID token.
    pub fn parse(value: &str) -> Self {
        let devices = value.split(',').map(parse_token).collect();
        Self { devices }
    }

    /// Read and parse the visibility list from `var`. `None` when unset.
    ///
    /// A value that is not valid UTF-8 is still a set variable; invalid bytes
    /// are replaced, so numeric tokens keep mapping and the rest become UUIDs.
    pub fn from_env(var: &str) -> Option<Self> {
        read_env(var).map(|value| Self::parse(&value))
    }

    /// Physical identifier at logical position `index`.
    pub fn get(&self, index: u32) -> Result<&DeviceIdentifier, IndexOutOfRange> {
        self.devices
            .get(index as usize)
            .ok_or(IndexOutOfRange {
                index,
                len: self.devices.len(),
            })
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceIdentifier> {
        self.devices.iter()
    }
}

fn parse_token(token: &str) -> DeviceIdentifier {
    match token.trim().parse::<u32>() {
        Ok(index) => DeviceIdentifier::Index(index),
        // Anything non-numeric is a UUID; NVML validates it on lookup.
        Err(_) => DeviceIdentifier::Uuid(token.to_string()),
    }
}

fn read_env(var: &str) -> Option<String> {
    std::env::var_os(var).map(|value| value.to_string_lossy().into_owned())
}

/// Map `logical_index` through an optional visibility value.
pub fn translate(
    visible: Option<&str>,
    logical_index: u32,
) -> Result<DeviceIdentifier, IndexOutOfRange> {
    match visible {
        None => Ok(DeviceIdentifier::Index(logical_index)),
        Some(value) => VisibleDevices::parse(value).get(logical_index).cloned(),
    }
}

/// Map `logical_index` to a physical identifier using the current value of
/// `var`. The environment is read on every call.
pub fn to_physical_identifier(
    var: &str,
    logical_index: u32,
) -> Result<DeviceIdentifier, IndexOutOfRange> {
    let visible = read_env(var);
    translate(visible.as_deref(), logical_index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_without_visibility() {
        for i in [0, 1, 3, 17] {
            assert_eq!(translate(None, i).unwrap(), DeviceIdentifier::Index(i));
        }
    }

    #[test]
    fn test_mixed_tokens() {
        let value = "2,MIG-abc,1";
        assert_eq!(translate(Some(value), 0).unwrap(), DeviceIdentifier::Index(2));
        assert_eq!(
            translate(Some(value), 1).unwrap(),
            DeviceIdentifier::Uuid("MIG-abc".to_string())
        );
        assert_eq!(translate(Some(value), 2).unwrap(), DeviceIdentifier::Index(1));
    }

    #[test]
    fn test_out_of_range() {
        let err = translate(Some("5,7"), 2).unwrap_err();
        assert_eq!(err, IndexOutOfRange { index: 2, len: 2 });
    }

    #[test]
    fn test_empty_value_is_one_token() {
        let visible = VisibleDevices::parse("");
        assert_eq!(visible.len(), 1);
        assert_eq!(visible.get(0).unwrap(), &DeviceIdentifier::Uuid(String::new()));
        assert!(visible.get(1).is_err());
    }

    #[test]
    fn test_padded_numeric_token() {
        assert_eq!(translate(Some("0, 3"), 1).unwrap(), DeviceIdentifier::Index(3));
    }

    #[test]
    fn test_negative_token_is_not_an_index() {
        assert_eq!(
            translate(Some("-1"), 0).unwrap(),
            DeviceIdentifier::Uuid("-1".to_string())
        );
    }
}
