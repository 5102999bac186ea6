//! NVIDIA management library (NVML) access.
//!
//! NVML is used through short-lived sessions: every query opens the library,
//! resolves a device handle, asks one question and shuts the library down
//! again, so its global handle table is never left initialized between calls.
//! [`with_session`] is the only way callers should open one.
//!
//! With the `nvml` feature the real library is loaded through `nvml-wrapper`.
//! Without it, [`NvmlLibrary::init`] always fails (CPU-only mode).

use thiserror::Error;
use tracing::{debug, warn};

use crate::gpu::device::{ComputeCapability, DeviceIdentifier};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LibraryError {
    #[error("Management library initialization failed: {0}")]
    Init(String),

    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Management library query failed: {0}")]
    Query(String),

    #[error("Management library shutdown failed: {0}")]
    Shutdown(String),
}

/// An initialized management-library session.
///
/// Device handles borrow the session and cannot outlive it.
pub trait ManagementSession: Sized {
    type Device<'s>
    where
        Self: 's;

    fn device_by_index(&self, index: u32) -> Result<Self::Device<'_>, LibraryError>;

    fn device_by_uuid(&self, uuid: &str) -> Result<Self::Device<'_>, LibraryError>;

    fn cuda_compute_capability(
        &self,
        device: &Self::Device<'_>,
    ) -> Result<ComputeCapability, LibraryError>;

    fn name(&self, device: &Self::Device<'_>) -> Result<String, LibraryError>;

    /// Release the library. Consumes the session.
    fn shutdown(self) -> Result<(), LibraryError>;

    /// Resolve a handle by index or by UUID, depending on the identifier.
    fn device(&self, id: &DeviceIdentifier) -> Result<Self::Device<'_>, LibraryError> {
        match id {
            DeviceIdentifier::Index(index) => self.device_by_index(*index),
            DeviceIdentifier::Uuid(uuid) => self.device_by_uuid(uuid),
        }
    }
}

/// A management library that can open sessions.
pub trait ManagementLibrary: Send + Sync {
    type Session: ManagementSession;

    fn init(&self) -> Result<Self::Session, LibraryError>;
}

/// Shuts the session down if it is dropped without an explicit close
/// (i.e. the closure panicked).
struct SessionGuard<S: ManagementSession> {
    session: Option<S>,
}

impl<S: ManagementSession> SessionGuard<S> {
    fn close(mut self) -> Result<(), LibraryError> {
        match self.session.take() {
            Some(session) => session.shutdown(),
            None => Ok(()),
        }
    }
}

impl<S: ManagementSession> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.shutdown() {
                warn!(error = %e, "Management library shutdown failed during unwind");
            }
        }
    }
}

/// Open a session, run `f` against it, and shut the session down on every
/// exit path.
///
/// An error from `f` takes precedence over a shutdown error, which is then
/// only logged. If `f` succeeds, a shutdown error is returned.
pub fn with_session<L, T, F>(library: &L, f: F) -> Result<T, LibraryError>
where
    L: ManagementLibrary + ?Sized,
    F: FnOnce(&L::Session) -> Result<T, LibraryError>,
{
    let guard = SessionGuard {
        session: Some(library.init()?),
    };
    debug!("Management library session opened");

    let result = match guard.session.as_ref() {
        Some(session) => f(session),
        None => unreachable!("session is present until close"),
    };
    let closed = guard.close();
    debug!("Management library session closed");

    match (result, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(shutdown)) => {
            warn!(error = %shutdown, "Management library shutdown failed after query error");
            Err(e)
        }
    }
}

/// The system NVML library.
#[derive(Debug, Default, Clone, Copy)]
pub struct NvmlLibrary;

#[cfg(feature = "nvml")]
pub use backend::NvmlSession;

#[cfg(feature = "nvml")]
mod backend {
    use nvml_wrapper::error::NvmlError;
    use nvml_wrapper::{Device, Nvml};

    use super::{LibraryError, ManagementLibrary, ManagementSession, NvmlLibrary};
    use crate::gpu::device::ComputeCapability;

    pub struct NvmlSession {
        nvml: Nvml,
    }

    impl ManagementLibrary for NvmlLibrary {
        type Session = NvmlSession;

        fn init(&self) -> Result<NvmlSession, LibraryError> {
            Nvml::init()
                .map(|nvml| NvmlSession { nvml })
                .map_err(|e| LibraryError::Init(e.to_string()))
        }
    }

    fn lookup_error(err: NvmlError, what: String) -> LibraryError {
        match err {
            NvmlError::NotFound | NvmlError::InvalidArg => LibraryError::NotFound(what),
            other => LibraryError::Query(format!("{what}: {other}")),
        }
    }

    impl ManagementSession for NvmlSession {
        type Device<'s> = Device<'s>;

        fn device_by_index(&self, index: u32) -> Result<Device<'_>, LibraryError> {
            self.nvml
                .device_by_index(index)
                .map_err(|e| lookup_error(e, format!("index {index}")))
        }

        fn device_by_uuid(&self, uuid: &str) -> Result<Device<'_>, LibraryError> {
            self.nvml
                .device_by_uuid(uuid)
                .map_err(|e| lookup_error(e, format!("uuid {uuid}")))
        }

        fn cuda_compute_capability(
            &self,
            device: &Device<'_>,
        ) -> Result<ComputeCapability, LibraryError> {
            let cap = device
                .cuda_compute_capability()
                .map_err(|e| LibraryError::Query(e.to_string()))?;
            let major = u32::try_from(cap.major)
                .map_err(|_| LibraryError::Query(format!("negative major version {}", cap.major)))?;
            let minor = u32::try_from(cap.minor)
                .map_err(|_| LibraryError::Query(format!("negative minor version {}", cap.minor)))?;
            Ok(ComputeCapability::new(major, minor))
        }

        fn name(&self, device: &Device<'_>) -> Result<String, LibraryError> {
            device.name().map_err(|e| LibraryError::Query(e.to_string()))
        }

        fn shutdown(self) -> Result<(), LibraryError> {
            self.nvml
                .shutdown()
                .map_err(|e| LibraryError::Shutdown(e.to_string()))
        }
    }
}

/// Placeholder session for builds without NVML. It cannot be constructed.
#[cfg(not(feature = "nvml"))]
pub enum NvmlSession {}

#[cfg(not(feature = "nvml"))]
impl ManagementLibrary for NvmlLibrary {
    type Session = NvmlSession;

    fn init(&self) -> Result<NvmlSession, LibraryError> {
        Err(LibraryError::Init(
            "built without the `nvml` feature".to_string(),
        ))
    }
}

#[cfg(not(feature = "nvml"))]
impl ManagementSession for NvmlSession {
    type Device<'s> = std::convert::Infallible;

    fn device_by_index(&self, _index: u32) -> Result<Self::Device<'_>, LibraryError> {
        match *self {}
    }

    fn device_by_uuid(&self, _uuid: &str) -> Result<Self::Device<'_>, LibraryError> {
        match *self {}
    }

    fn cuda_compute_capability(
        &self,
        _device: &Self::Device<'_>,
    ) -> Result<ComputeCapability, LibraryError> {
        match *self {}
    }

    fn name(&self, _device: &Self::Device<'_>) -> Result<String, LibraryError> {
        match *self {}
    }

    fn shutdown(self) -> Result<(), LibraryError> {
        match self {}
    }
}
