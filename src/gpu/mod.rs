//! GPU device identity and the NVIDIA management library.
//!
//! - [`device`]: Physical device identifiers and compute capabilities
//! - [`visibility`]: `CUDA_VISIBLE_DEVICES` logical → physical mapping
//! - [`nvml`]: Scoped management-library sessions
//! - [`stub`]: In-memory library for tests and GPU-less hosts

pub mod device;
pub mod nvml;
pub mod stub;
pub mod visibility;
