//! CUDA platform backed by NVML.
//!
//! Nothing here creates a CUDA context: device information comes from the
//! management library only, so it is safe to call before any worker process
//! has picked its device.

use tracing::{debug, info};

use crate::config::CapabilityConfig;
use crate::gpu::device::{ComputeCapability, DeviceIdentifier};
use crate::gpu::nvml::{with_session, ManagementLibrary, ManagementSession, NvmlLibrary};
use crate::gpu::visibility;
use crate::metrics::Metrics;
use crate::platform::cache::{CapabilityCache, Lookup};
use crate::platform::{Platform, PlatformError, PlatformKind};

/// The CUDA platform.
///
/// Owns its capability cache. Integer and UUID identifiers for the same
/// physical GPU are cached as separate entries.
pub struct CudaPlatform<L: ManagementLibrary = NvmlLibrary> {
    library: L,
    config: CapabilityConfig,
    cache: CapabilityCache,
    metrics: Metrics,
}

impl<L: ManagementLibrary> CudaPlatform<L> {
    pub fn new(library: L, config: CapabilityConfig) -> Result<Self, PlatformError> {
        let metrics = Metrics::new()?;
        let cache = CapabilityCache::with_gauge(config.cache_capacity, metrics.cache_entries.clone());
        Ok(Self {
            library,
            config,
            cache,
            metrics,
        })
    }

    /// Map a logical index to a physical identifier using the visibility
    /// variable's current value.
    pub fn to_physical_identifier(
        &self,
        logical_index: u32,
    ) -> Result<DeviceIdentifier, PlatformError> {
        let id = visibility::to_physical_identifier(&self.config.visible_devices_env, logical_index)?;
        Ok(id)
    }

    /// Compute capability of a physical device.
    ///
    /// MIG devices cannot be opened by handle and are answered with the
    /// configured partitioned capability without touching the library.
    /// Everything else is served from the cache or queried in a fresh session.
    pub fn get_physical_device_capability(
        &self,
        id: &DeviceIdentifier,
    ) -> Result<ComputeCapability, PlatformError> {
        if id.is_partitioned(&self.config.partitioned_marker) {
            debug!(device = %id, "MIG device, using fixed capability");
            return Ok(self.config.partitioned_capability);
        }

        let result = self.cache.get_or_try_insert(id, || {
            self.metrics.sessions.inc();
            with_session(&self.library, |session| {
                let device = session.device(id)?;
                session.cuda_compute_capability(&device)
            })
            .map_err(|e| PlatformError::from_library(e, id))
        });

        match result {
            Ok((cap, Lookup::Hit)) => {
                self.metrics.cache_hits.inc();
                Ok(cap)
            }
            Ok((cap, Lookup::Miss)) => {
                self.metrics.cache_misses.inc();
                info!(device = %id, capability = %cap, "Resolved compute capability");
                Ok(cap)
            }
            Err(e) => {
                self.metrics.cache_misses.inc();
                self.metrics.errors.inc();
                Err(e)
            }
        }
    }

    /// Product name of a physical device. Not cached.
    pub fn get_physical_device_name(&self, id: &DeviceIdentifier) -> Result<String, PlatformError> {
        self.metrics.sessions.inc();
        with_session(&self.library, |session| {
            let device = session.device(id)?;
            session.name(&device)
        })
        .map_err(|e| {
            self.metrics.errors.inc();
            PlatformError::from_library(e, id)
        })
    }

    pub fn cache(&self) -> &CapabilityCache {
        &self.cache
    }

    pub fn config(&self) -> &CapabilityConfig {
        &self.config
    }

    pub fn library(&self) -> &L {
        &self.library
    }
}

impl<L: ManagementLibrary> Platform for CudaPlatform<L> {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Cuda
    }

    fn physical_device_id(&self, device_id: u32) -> Result<DeviceIdentifier, PlatformError> {
        self.to_physical_identifier(device_id)
    }

    fn get_device_capability(&self, device_id: u32) -> Result<ComputeCapability, PlatformError> {
        let physical = self.to_physical_identifier(device_id)?;
        self.get_physical_device_capability(&physical)
    }

    fn get_device_name(&self, device_id: u32) -> Result<String, PlatformError> {
        let physical = self.to_physical_identifier(device_id)?;
        self.get_physical_device_name(&physical)
    }

    fn physical_device_capability(
        &self,
        id: &DeviceIdentifier,
    ) -> Result<ComputeCapability, PlatformError> {
        self.get_physical_device_capability(id)
    }

    fn physical_device_name(&self, id: &DeviceIdentifier) -> Result<String, PlatformError> {
        self.get_physical_device_name(id)
    }

    fn metrics(&self) -> Option<&Metrics> {
        Some(&self.metrics)
    }
}
