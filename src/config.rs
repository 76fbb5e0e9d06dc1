//! Runtime configuration with JSON loading and per-field defaults.
use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

/// Ingest configuration. Every field has a default, so a config file only
/// needs to name what it changes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UdpConfig {
    pub listen_ip: String,
    /// Inclusive port range drivers allocate from.
    pub listen_port_range: (u16, u16),
    /// Socket receive buffer size in bytes.
    pub buffer_size: usize,
    /// Decode worker pool size.
    pub max_workers: usize,
    /// Bounded decode queue length.
    pub queue_size: usize,
    pub static_cache_entries: usize,
    pub static_cache_bytes: usize,
    pub stream_cache_entries: usize,
    pub stream_cache_bytes: usize,
    /// Reserved for the node liveness sweeper; not exercised by the ingest
    /// core.
    pub clean_interval: u64,
    pub node_timeout: u64,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            listen_ip: "0.0.0.0".to_string(),
            listen_port_range: (1025, 2048),
            buffer_size: 1024,
            max_workers: 10,
            queue_size: 100,
            static_cache_entries: 50,
            static_cache_bytes: 4 * 1024 * 1024,
            stream_cache_entries: 8,
            stream_cache_bytes: 16 * 1024 * 1024,
            clean_interval: 5,
            node_timeout: 30,
        }
    }
}

impl UdpConfig {
    /// Load a JSON config file, filling unnamed fields with defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let cfg = serde_json::from_str(&raw)
            .with_context(|| format!("parse config {}", path.display()))?;
        Ok(cfg)
    }

    /// Whether a port falls inside the configured listen range.
    pub fn validate_port(&self, port: u16) -> bool {
        self.listen_port_range.0 <= port && port <= self.listen_port_range.1
    }
}
