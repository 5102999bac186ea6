//! cuda-platform: CUDA device capability resolution for LLM inference.
//!
//! Maps the logical device indices a worker process sees (after
//! `CUDA_VISIBLE_DEVICES`) to physical GPUs and reports their compute
//! capability through NVML, without ever creating a CUDA context.
//! Capabilities are cached per physical identifier.

pub mod config;
pub mod gpu;
pub mod metrics;
pub mod platform;
pub mod server;

pub use gpu::device::{ComputeCapability, DeviceIdentifier};
pub use platform::{get_device_capability, CudaPlatform, Platform, PlatformError, PlatformKind};
