//! Agent configuration.
//!
//! Loaded from an optional TOML file, then overridden by environment
//! variables prefixed with `MTCONNECT_` (nested keys separated by `__`, e.g.
//! `MTCONNECT_BUFFER__SIZE=4096`).
//!
//! ```toml
//! [http]
//! listen_addr = "0.0.0.0:5000"
//!
//! [buffer]
//! size = 131072
//! max_assets = 1024
//! max_assets_per_type = { CuttingTool = 256 }
//!
//! [[devices]]
//! uuid = "mill-1"
//! name = "mill"
//!
//! [[devices.data_items]]
//! id = "x"
//! category = "SAMPLE"
//! type = "POSITION"
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use config::{Config, Environment, File};
use mtconnect_buffer::{AgentBuilder, QueryLimits, StreamOptions};
use mtconnect_types::DeviceDescription;
use serde::Deserialize;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "MTCONNECT";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub listen_addr: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:5000".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Address accepting JSON-lines adapter connections.
    pub listen_addr: String,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:7878".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Observation buffer capacity.
    pub size: usize,
    pub max_assets: usize,
    pub max_assets_per_type: HashMap<String, usize>,
    pub default_count: u64,
    pub max_count: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            size: mtconnect_buffer::DEFAULT_BUFFER_SIZE,
            max_assets: mtconnect_buffer::DEFAULT_MAX_ASSETS,
            max_assets_per_type: HashMap::new(),
            default_count: mtconnect_buffer::DEFAULT_COUNT,
            max_count: mtconnect_buffer::DEFAULT_MAX_COUNT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Heartbeat used when a client does not request one.
    pub heartbeat_ms: u64,
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            heartbeat_ms: mtconnect_buffer::DEFAULT_HEARTBEAT.as_millis() as u64,
            channel_capacity: mtconnect_buffer::DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// How often rates are recomputed.
    pub interval_ms: u64,
    /// EWMA smoothing factor in (0, 1].
    pub smoothing: f64,
    /// Prefix for exported metric names.
    pub namespace: Option<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
            smoothing: mtconnect_buffer::DEFAULT_SMOOTHING,
            namespace: None,
        }
    }
}

/// Complete agent configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub http: HttpConfig,
    pub adapters: AdapterConfig,
    pub buffer: BufferConfig,
    pub stream: StreamConfig,
    pub metrics: MetricsConfig,
    pub devices: Vec<DeviceDescription>,
}

impl AgentConfig {
    /// Load configuration from an optional file plus the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("failed to read configuration")?;

        let parsed: AgentConfig = config
            .try_deserialize()
            .context("invalid configuration")?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Check values the agent cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.http
            .listen_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid http.listen_addr {:?}", self.http.listen_addr))?;
        self.adapters
            .listen_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid adapters.listen_addr {:?}", self.adapters.listen_addr))?;

        ensure!(self.buffer.size > 0, "buffer.size must be positive");
        ensure!(self.buffer.max_assets > 0, "buffer.max_assets must be positive");
        ensure!(
            self.buffer.default_count > 0 && self.buffer.default_count <= self.buffer.max_count,
            "buffer.default_count must be in 1..=buffer.max_count"
        );
        ensure!(self.stream.heartbeat_ms > 0, "stream.heartbeat_ms must be positive");
        ensure!(self.metrics.interval_ms > 0, "metrics.interval_ms must be positive");
        ensure!(
            self.metrics.smoothing > 0.0 && self.metrics.smoothing <= 1.0,
            "metrics.smoothing must be in (0, 1]"
        );

        let mut seen = std::collections::HashSet::new();
        for device in &self.devices {
            ensure!(
                seen.insert(device.uuid.as_str()),
                "duplicate device uuid {:?}",
                device.uuid
            );
        }
        Ok(())
    }

    /// An agent builder reflecting this configuration.
    pub fn agent_builder(&self) -> AgentBuilder {
        let mut builder = AgentBuilder::new()
            .devices(self.devices.clone())
            .buffer_size(self.buffer.size)
            .max_assets(self.buffer.max_assets)
            .limits(QueryLimits {
                default_count: self.buffer.default_count,
                max_count: self.buffer.max_count,
            })
            .smoothing(self.metrics.smoothing);
        for (asset_type, max) in &self.buffer.max_assets_per_type {
            builder = builder.max_assets_of_type(asset_type.clone(), *max);
        }
        builder
    }

    /// Stream options before request parameters are applied.
    pub fn stream_defaults(&self) -> StreamOptions {
        StreamOptions::new()
            .heartbeat(Duration::from_millis(self.stream.heartbeat_ms))
            .channel_capacity(self.stream.channel_capacity)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics.interval_ms)
    }
}
