//! Integration tests for cached capability resolution.

use std::sync::Arc;
use std::thread;

use cuda_platform::config::CapabilityConfig;
use cuda_platform::gpu::stub::{StubDevice, StubLibrary};
use cuda_platform::{ComputeCapability, CudaPlatform, DeviceIdentifier, PlatformError};

fn node_with_gpus(count: u32) -> StubLibrary {
    let devices = (0..count)
        .map(|i| {
            StubDevice::new(
                &format!("GPU-0000a100-0000-4000-8000-{i:012}"),
                "NVIDIA A100-SXM4-80GB",
                (8, 0),
            )
        })
        .collect();
    StubLibrary::new(devices)
}

fn config() -> CapabilityConfig {
    CapabilityConfig {
        visible_devices_env: "CUDA_PLATFORM_CAPABILITY_TEST_UNSET".to_string(),
        ..Default::default()
    }
}

#[test]
fn test_repeat_lookups_query_once() {
    let lib = node_with_gpus(4);
    let platform = CudaPlatform::new(lib.clone(), config()).unwrap();

    for _ in 0..5 {
        for i in 0..4 {
            let cap = platform
                .get_physical_device_capability(&DeviceIdentifier::Index(i))
                .unwrap();
            assert_eq!(cap, ComputeCapability::new(8, 0));
        }
    }

    assert_eq!(lib.capability_queries(), 4);
    assert_eq!(lib.init_calls(), 4);
    assert_eq!(lib.shutdown_calls(), 4);
}

#[test]
fn test_ninth_identifier_evicts_least_recent() {
    let lib = node_with_gpus(9);
    let platform = CudaPlatform::new(lib.clone(), config()).unwrap();

    for i in 0..9 {
        platform
            .get_physical_device_capability(&DeviceIdentifier::Index(i))
            .unwrap();
    }

    assert_eq!(platform.cache().len(), 8);
    assert!(!platform.cache().contains(&DeviceIdentifier::Index(0)));
    assert!(platform.cache().contains(&DeviceIdentifier::Index(8)));

    // The evicted device is queried again on its next lookup.
    platform
        .get_physical_device_capability(&DeviceIdentifier::Index(0))
        .unwrap();
    assert_eq!(lib.capability_queries(), 10);
    assert!(!platform.cache().contains(&DeviceIdentifier::Index(1)));
}

#[test]
fn test_configured_capacity() {
    let lib = node_with_gpus(4);
    let platform = CudaPlatform::new(
        lib,
        CapabilityConfig {
            cache_capacity: 2,
            ..config()
        },
    )
    .unwrap();

    for i in 0..4 {
        platform
            .get_physical_device_capability(&DeviceIdentifier::Index(i))
            .unwrap();
    }
    assert_eq!(platform.cache().capacity(), 2);
    assert_eq!(platform.cache().len(), 2);
}

#[test]
fn test_mig_uuids_never_reach_library() {
    let lib = node_with_gpus(1);
    let platform = CudaPlatform::new(lib.clone(), config()).unwrap();

    for uuid in [
        "MIG-abc",
        "MIG-GPU-0000a100-0000-4000-8000-000000000000/1/0",
        "prefix-MIG-suffix",
    ] {
        let cap = platform
            .get_physical_device_capability(&DeviceIdentifier::from(uuid))
            .unwrap();
        assert_eq!(cap, ComputeCapability::new(9, 0));
    }

    assert_eq!(lib.init_calls(), 0);
    assert_eq!(lib.capability_queries(), 0);
}

#[test]
fn test_custom_partitioned_capability() {
    let lib = node_with_gpus(1);
    let platform = CudaPlatform::new(
        lib,
        CapabilityConfig {
            partitioned_capability: ComputeCapability::new(10, 0),
            ..config()
        },
    )
    .unwrap();

    let cap = platform
        .get_physical_device_capability(&DeviceIdentifier::from("MIG-b200"))
        .unwrap();
    assert_eq!(cap, ComputeCapability::new(10, 0));
}

#[test]
fn test_failures_are_not_cached() {
    let lib = node_with_gpus(1);
    let platform = CudaPlatform::new(lib.clone(), config()).unwrap();
    let missing = DeviceIdentifier::Index(3);

    for _ in 0..3 {
        let err = platform.get_physical_device_capability(&missing).unwrap_err();
        assert_eq!(
            err,
            PlatformError::DeviceNotFound {
                identifier: missing.clone()
            }
        );
    }

    // Every attempt opened and closed its own session.
    assert_eq!(lib.init_calls(), 3);
    assert_eq!(lib.shutdown_calls(), 3);
    assert!(platform.cache().is_empty());
}

#[test]
fn test_concurrent_lookups_query_once() {
    let lib = node_with_gpus(2);
    let platform = Arc::new(CudaPlatform::new(lib.clone(), config()).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let platform = platform.clone();
            thread::spawn(move || {
                platform
                    .get_physical_device_capability(&DeviceIdentifier::Index(1))
                    .unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), ComputeCapability::new(8, 0));
    }

    assert_eq!(lib.capability_queries(), 1);
}

#[cfg(not(feature = "nvml"))]
#[test]
fn test_process_wide_lookup_without_nvml() {
    temp_env::with_var_unset("CUDA_VISIBLE_DEVICES", || {
        let err = cuda_platform::get_device_capability(0).unwrap_err();
        assert!(matches!(err, PlatformError::LibraryInit(_)));
    });
}
