//! Runtime configuration for cuda-platform.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! Capability-resolution knobs (cache size, visibility variable, MIG handling)
//! live here.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::gpu::device::ComputeCapability;
use crate::gpu::visibility::CUDA_VISIBLE_DEVICES;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "cuda-platform", about = "CUDA device capability resolver")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json", global = true)]
    pub config: PathBuf,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Use a simulated cluster instead of the system NVML library.
    #[arg(long, value_enum, global = true)]
    pub stub: Option<StubCluster>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the compute capability of a logical device.
    Capability {
        /// Logical device index (as seen through CUDA_VISIBLE_DEVICES).
        #[arg(short, long, default_value_t = 0)]
        device: u32,

        /// Print JSON instead of `major.minor`.
        #[arg(long)]
        json: bool,
    },

    /// Print the physical identifier behind a logical device.
    Resolve {
        #[arg(short, long, default_value_t = 0)]
        device: u32,
    },

    /// Serve device information over HTTP.
    Serve {
        /// HTTP listen address (overrides the config file).
        #[arg(long)]
        listen: Option<String>,
    },
}

/// Simulated clusters available through `--stub`.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubCluster {
    Molly,
    Wintermute,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,

    /// Capability resolution settings.
    pub capability: CapabilityConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "0.0.0.0:8080").
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Capability resolver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityConfig {
    /// Maximum number of distinct device identifiers kept in the cache.
    pub cache_capacity: usize,

    /// Environment variable holding the visibility list.
    pub visible_devices_env: String,

    /// Substring identifying a MIG (partitioned) device UUID.
    pub partitioned_marker: String,

    /// Capability reported for MIG devices, which NVML cannot query by handle.
    pub partitioned_capability: ComputeCapability,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 8,
            visible_devices_env: CUDA_VISIBLE_DEVICES.to_string(),
            partitioned_marker: "MIG".to_string(),
            // All MIG-capable parts report 9.0 (MIG user guide, table 1).
            partitioned_capability: ComputeCapability::new(9, 0),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }
}
