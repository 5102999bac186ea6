//! Accelerator platform abstraction.
//!
//! Every accelerator backend answers the same set of device questions through
//! the [`Platform`] trait. This crate provides the CUDA backend and a fallback
//! for hosts where no supported accelerator library is present.
//!
//! - [`cuda`]: NVML-backed CUDA platform with a capability cache
//! - [`cache`]: Bounded LRU capability cache

pub mod cache;
pub mod cuda;

use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::CapabilityConfig;
use crate::gpu::device::{ComputeCapability, DeviceIdentifier};
use crate::gpu::nvml::{with_session, LibraryError, NvmlLibrary};
use crate::gpu::visibility::IndexOutOfRange;
use crate::metrics::Metrics;

pub use cuda::CudaPlatform;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("Management library unavailable: {0}")]
    LibraryInit(String),

    #[error("Device {identifier} not found")]
    DeviceNotFound { identifier: DeviceIdentifier },

    #[error(transparent)]
    IndexOutOfRange(#[from] IndexOutOfRange),

    #[error("Query for device {identifier} failed: {reason}")]
    Query {
        identifier: DeviceIdentifier,
        reason: String,
    },

    #[error("Operation not supported on the {0} platform")]
    Unsupported(PlatformKind),

    #[error("Metrics registration failed: {0}")]
    Metrics(String),
}

impl PlatformError {
    /// Attach the identifier being looked up to a management-library error.
    pub fn from_library(err: LibraryError, identifier: &DeviceIdentifier) -> Self {
        match err {
            LibraryError::Init(reason) => PlatformError::LibraryInit(reason),
            LibraryError::NotFound(_) => PlatformError::DeviceNotFound {
                identifier: identifier.clone(),
            },
            LibraryError::Query(reason) | LibraryError::Shutdown(reason) => PlatformError::Query {
                identifier: identifier.clone(),
                reason,
            },
        }
    }
}

impl From<prometheus::Error> for PlatformError {
    fn from(err: prometheus::Error) -> Self {
        PlatformError::Metrics(err.to_string())
    }
}

/// Accelerator platform variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    Cuda,
    Rocm,
    Tpu,
    Cpu,
    Unspecified,
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlatformKind::Cuda => "cuda",
            PlatformKind::Rocm => "rocm",
            PlatformKind::Tpu => "tpu",
            PlatformKind::Cpu => "cpu",
            PlatformKind::Unspecified => "unspecified",
        };
        f.write_str(name)
    }
}

/// Device questions every accelerator backend can answer.
///
/// `device_id` is always a logical index, i.e. the position as seen by this
/// process after any visibility restriction.
pub trait Platform: Send + Sync {
    fn kind(&self) -> PlatformKind;

    fn is_cuda(&self) -> bool {
        self.kind() == PlatformKind::Cuda
    }

    fn is_rocm(&self) -> bool {
        self.kind() == PlatformKind::Rocm
    }

    fn is_tpu(&self) -> bool {
        self.kind() == PlatformKind::Tpu
    }

    fn is_cpu(&self) -> bool {
        self.kind() == PlatformKind::Cpu
    }

    /// Physical identifier behind a logical device.
    fn physical_device_id(&self, device_id: u32) -> Result<DeviceIdentifier, PlatformError>;

    fn get_device_capability(&self, device_id: u32) -> Result<ComputeCapability, PlatformError>;

    fn get_device_name(&self, device_id: u32) -> Result<String, PlatformError>;

    /// Compute capability of an already translated physical device.
    fn physical_device_capability(
        &self,
        id: &DeviceIdentifier,
    ) -> Result<ComputeCapability, PlatformError>;

    /// Product name of an already translated physical device.
    fn physical_device_name(&self, id: &DeviceIdentifier) -> Result<String, PlatformError>;

    /// Whether the device's capability is at least `required`.
    fn has_device_capability(
        &self,
        required: ComputeCapability,
        device_id: u32,
    ) -> Result<bool, PlatformError> {
        Ok(self.get_device_capability(device_id)? >= required)
    }

    fn metrics(&self) -> Option<&Metrics> {
        None
    }
}

/// Fallback platform when no accelerator library is available.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnspecifiedPlatform;

impl Platform for UnspecifiedPlatform {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Unspecified
    }

    fn physical_device_id(&self, _device_id: u32) -> Result<DeviceIdentifier, PlatformError> {
        Err(PlatformError::Unsupported(self.kind()))
    }

    fn get_device_capability(&self, _device_id: u32) -> Result<ComputeCapability, PlatformError> {
        Err(PlatformError::Unsupported(self.kind()))
    }

    fn get_device_name(&self, _device_id: u32) -> Result<String, PlatformError> {
        Err(PlatformError::Unsupported(self.kind()))
    }

    fn physical_device_capability(
        &self,
        _id: &DeviceIdentifier,
    ) -> Result<ComputeCapability, PlatformError> {
        Err(PlatformError::Unsupported(self.kind()))
    }

    fn physical_device_name(&self, _id: &DeviceIdentifier) -> Result<String, PlatformError> {
        Err(PlatformError::Unsupported(self.kind()))
    }
}

/// Pick the platform for this host: CUDA if NVML can be opened, otherwise
/// the unspecified fallback. Does not create a CUDA context.
pub fn detect_platform(config: &CapabilityConfig) -> Arc<dyn Platform> {
    if let Err(e) = with_session(&NvmlLibrary, |_| Ok(())) {
        info!(reason = %e, "NVML not available, using unspecified platform");
        return Arc::new(UnspecifiedPlatform);
    }

    match CudaPlatform::new(NvmlLibrary, config.clone()) {
        Ok(platform) => {
            info!("Detected CUDA platform");
            Arc::new(platform)
        }
        Err(e) => {
            warn!(error = %e, "Failed to set up CUDA platform");
            Arc::new(UnspecifiedPlatform)
        }
    }
}

static CUDA: OnceLock<Result<CudaPlatform<NvmlLibrary>, PlatformError>> = OnceLock::new();

/// Compute capability of logical device `device_id` on the process-wide CUDA
/// platform. The capability cache is shared by all callers in the process.
pub fn get_device_capability(device_id: u32) -> Result<ComputeCapability, PlatformError> {
    CUDA.get_or_init(|| CudaPlatform::new(NvmlLibrary, CapabilityConfig::default()))
        .as_ref()
        .map_err(Clone::clone)?
        .get_device_capability(device_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unspecified_platform_is_unsupported() {
        let platform = UnspecifiedPlatform;
        assert!(!platform.is_cuda());
        assert_eq!(
            platform.get_device_capability(0).unwrap_err(),
            PlatformError::Unsupported(PlatformKind::Unspecified)
        );
        assert!(platform.has_device_capability(ComputeCapability::new(7, 0), 0).is_err());
        assert!(platform.metrics().is_none());
    }

    #[test]
    fn test_library_error_mapping() {
        let id = DeviceIdentifier::from("GPU-deadbeef");
        assert_eq!(
            PlatformError::from_library(LibraryError::NotFound("uuid".into()), &id),
            PlatformError::DeviceNotFound { identifier: id.clone() }
        );
        assert!(matches!(
            PlatformError::from_library(LibraryError::Init("no driver".into()), &id),
            PlatformError::LibraryInit(_)
        ));
        assert!(matches!(
            PlatformError::from_library(LibraryError::Shutdown("busy".into()), &id),
            PlatformError::Query { .. }
        ));
    }

    #[test]
    fn test_index_out_of_range_message() {
        let err = PlatformError::from(IndexOutOfRange { index: 2, len: 2 });
        assert_eq!(
            err.to_string(),
            "Logical device 2 out of range: 2 device(s) visible"
        );
    }

    #[cfg(not(feature = "nvml"))]
    #[test]
    fn test_detect_without_nvml() {
        let platform = detect_platform(&CapabilityConfig::default());
        assert_eq!(platform.kind(), PlatformKind::Unspecified);
    }
}
