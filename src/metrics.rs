//! Prometheus counters for capability resolution.
//!
//! Each platform instance owns its own registry so that independent
//! instances (and tests) never collide on metric names.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    pub cache_hits: IntCounter,
    pub cache_misses: IntCounter,
    pub cache_entries: IntGauge,
    pub sessions: IntCounter,
    pub errors: IntCounter,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let cache_hits = IntCounter::new(
            "capability_cache_hits_total",
            "Capability lookups served from the cache",
        )?;
        let cache_misses = IntCounter::new(
            "capability_cache_misses_total",
            "Capability lookups that queried the management library",
        )?;
        let cache_entries = IntGauge::new(
            "capability_cache_entries",
            "Device identifiers currently cached",
        )?;
        let sessions = IntCounter::new(
            "nvml_sessions_total",
            "Management library sessions opened",
        )?;
        let errors = IntCounter::new(
            "capability_errors_total",
            "Failed device capability or name lookups",
        )?;

        registry.register(Box::new(cache_hits.clone()))?;
        registry.register(Box::new(cache_misses.clone()))?;
        registry.register(Box::new(cache_entries.clone()))?;
        registry.register(Box::new(sessions.clone()))?;
        registry.register(Box::new(errors.clone()))?;

        Ok(Self {
            registry,
            cache_hits,
            cache_misses,
            cache_entries,
            sessions,
            errors,
        })
    }

    /// Render all metrics in the Prometheus text exposition format.
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}
