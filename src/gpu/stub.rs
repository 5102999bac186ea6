//! In-memory management library for tests and GPU-less hosts.
//!
//! Simulates the hardware available in the target cluster:
//! - Molly: 2x GTX 1070 (compute 6.1)
//! - Wintermute: 2x Quadro M6000 (compute 5.2)
//!
//! Every session and query is counted so callers can assert how often the
//! library was actually touched.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::gpu::device::ComputeCapability;
use crate::gpu::nvml::{LibraryError, ManagementLibrary, ManagementSession};

/// A simulated physical GPU.
#[derive(Debug, Clone)]
pub struct StubDevice {
    pub uuid: String,
    pub name: String,
    pub compute_capability: ComputeCapability,
}

impl StubDevice {
    pub fn new(uuid: &str, name: &str, compute_capability: (u32, u32)) -> Self {
        Self {
            uuid: uuid.to_string(),
            name: name.to_string(),
            compute_capability: compute_capability.into(),
        }
    }
}

#[derive(Debug, Default)]
struct StubState {
    devices: Vec<StubDevice>,
    fail_init: AtomicBool,
    fail_shutdown: AtomicBool,
    init_calls: AtomicUsize,
    shutdown_calls: AtomicUsize,
    capability_queries: AtomicUsize,
}

/// Stub management library. Clones share devices and call counters.
#[derive(Debug, Clone, Default)]
pub struct StubLibrary {
    state: Arc<StubState>,
}

impl StubLibrary {
    pub fn new(devices: Vec<StubDevice>) -> Self {
        Self {
            state: Arc::new(StubState {
                devices,
                ..Default::default()
            }),
        }
    }

    pub fn molly() -> Self {
        Self::new(vec![
            StubDevice::new(
                "GPU-3f6c2a10-8c1e-4b7d-9a55-1070a0000000",
                "NVIDIA GeForce GTX 1070",
                (6, 1),
            ),
            StubDevice::new(
                "GPU-3f6c2a10-8c1e-4b7d-9a55-1070a0000001",
                "NVIDIA GeForce GTX 1070",
                (6, 1),
            ),
        ])
    }

    pub fn wintermute() -> Self {
        Self::new(vec![
            StubDevice::new(
                "GPU-b2d94e77-51a0-4c3e-8f12-6000m0000000",
                "NVIDIA Quadro M6000",
                (5, 2),
            ),
            StubDevice::new(
                "GPU-b2d94e77-51a0-4c3e-8f12-6000m0000001",
                "NVIDIA Quadro M6000",
                (5, 2),
            ),
        ])
    }

    /// Make every subsequent `init` fail.
    pub fn failing_init(self) -> Self {
        self.state.fail_init.store(true, Ordering::SeqCst);
        self
    }

    /// Make every subsequent `shutdown` fail after it has been counted.
    pub fn failing_shutdown(self) -> Self {
        self.state.fail_shutdown.store(true, Ordering::SeqCst);
        self
    }

    pub fn devices(&self) -> &[StubDevice] {
        &self.state.devices
    }

    pub fn init_calls(&self) -> usize {
        self.state.init_calls.load(Ordering::SeqCst)
    }

    pub fn shutdown_calls(&self) -> usize {
        self.state.shutdown_calls.load(Ordering::SeqCst)
    }

    pub fn capability_queries(&self) -> usize {
        self.state.capability_queries.load(Ordering::SeqCst)
    }
}

pub struct StubSession {
    state: Arc<StubState>,
}

impl ManagementLibrary for StubLibrary {
    type Session = StubSession;

    fn init(&self) -> Result<StubSession, LibraryError> {
        self.state.init_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_init.load(Ordering::SeqCst) {
            return Err(LibraryError::Init("stub library configured to fail".to_string()));
        }
        Ok(StubSession {
            state: self.state.clone(),
        })
    }
}

impl ManagementSession for StubSession {
    type Device<'s> = &'s StubDevice;

    fn device_by_index(&self, index: u32) -> Result<&StubDevice, LibraryError> {
        self.state
            .devices
            .get(index as usize)
            .ok_or_else(|| LibraryError::NotFound(format!("index {index}")))
    }

    fn device_by_uuid(&self, uuid: &str) -> Result<&StubDevice, LibraryError> {
        self.state
            .devices
            .iter()
            .find(|d| d.uuid == uuid)
            .ok_or_else(|| LibraryError::NotFound(format!("uuid {uuid}")))
    }

    fn cuda_compute_capability(
        &self,
        device: &&StubDevice,
    ) -> Result<ComputeCapability, LibraryError> {
        self.state.capability_queries.fetch_add(1, Ordering::SeqCst);
        Ok(device.compute_capability)
    }

    fn name(&self, device: &&StubDevice) -> Result<String, LibraryError> {
        Ok(device.name.clone())
    }

    fn shutdown(self) -> Result<(), LibraryError> {
        self.state.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_shutdown.load(Ordering::SeqCst) {
            return Err(LibraryError::Shutdown("stub library configured to fail".to_string()));
        }
        Ok(())
    }
}
