//! Adapter ingestion over TCP.
//!
//! Adapters connect to the adapter port and send newline-delimited JSON
//! records, one per line:
//!
//! ```text
//! {"kind":"observation","device":"mill","data_item":"x","value":"12.5"}
//! {"kind":"observation","device":"mill","data_item":"system","values":{"level":"FAULT","nativeCode":"E1"}}
//! {"kind":"unavailable","device":"mill","data_item":"x"}
//! {"kind":"asset","device":"mill","asset_id":"T1","asset_type":"CuttingTool","payload":"<CuttingTool/>"}
//! ```
//!
//! `timestamp` (milliseconds since the epoch) is optional on every record and
//! defaults to the agent clock. When a connection closes, every device it
//! reported on is marked unavailable.

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use mtconnect_buffer::{Agent, BufferError};
use mtconnect_types::{Timestamp, VALUE_KEY};
use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpListener;
use tokio::sync::watch;

/// One line of adapter input.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdapterRecord {
    Observation {
        device: String,
        data_item: String,
        /// Shorthand for a single `value` entry.
        #[serde(default)]
        value: Option<String>,
        #[serde(default)]
        values: BTreeMap<String, String>,
        #[serde(default)]
        timestamp: Option<u64>,
    },
    Unavailable {
        device: String,
        /// Omitted to mark the whole device unavailable.
        #[serde(default)]
        data_item: Option<String>,
        #[serde(default)]
        timestamp: Option<u64>,
    },
    Asset {
        device: String,
        asset_id: String,
        asset_type: String,
        #[serde(default)]
        payload: String,
        #[serde(default)]
        removed: bool,
        #[serde(default)]
        timestamp: Option<u64>,
    },
}

impl AdapterRecord {
    pub fn device(&self) -> &str {
        match self {
            AdapterRecord::Observation { device, .. }
            | AdapterRecord::Unavailable { device, .. }
            | AdapterRecord::Asset { device, .. } => device,
        }
    }

    fn timestamp(&self) -> Option<Timestamp> {
        match self {
            AdapterRecord::Observation { timestamp, .. }
            | AdapterRecord::Unavailable { timestamp, .. }
            | AdapterRecord::Asset { timestamp, .. } => timestamp.map(Timestamp::from_millis),
        }
    }
}

/// Errors from processing adapter input.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Malformed record: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error("Read error: {0}")]
    Io(#[from] std::io::Error),
}

impl AdapterError {
    /// Check if ingestion must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AdapterError::Buffer(e) if e.is_fatal())
    }
}

/// Parse one line and feed it to the agent.
///
/// Returns the record's device so the caller can track what a connection
/// reports on, or `None` for a blank line.
pub fn process_line(agent: &Agent, line: &str) -> Result<Option<String>, AdapterError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let record: AdapterRecord = serde_json::from_str(line)?;
    let device = record.device().to_string();
    apply(agent, record)?;
    Ok(Some(device))
}

/// Feed a parsed record to the agent.
pub fn apply(agent: &Agent, record: AdapterRecord) -> Result<(), BufferError> {
    let timestamp = record.timestamp().unwrap_or_else(|| agent.clock().now());
    let gateway = agent.gateway();

    match record {
        AdapterRecord::Observation {
            device,
            data_item,
            value,
            mut values,
            ..
        } => {
            if let Some(value) = value {
                values.insert(VALUE_KEY.to_string(), value);
            }
            if values.is_empty() {
                return Err(BufferError::InvalidRequest(format!(
                    "observation for {}/{} has no value",
                    device, data_item
                )));
            }
            gateway.append(&device, &data_item, values, timestamp)?;
        }
        AdapterRecord::Unavailable {
            device,
            data_item: Some(data_item),
            ..
        } => {
            gateway.unavailable(&device, &data_item, timestamp)?;
        }
        AdapterRecord::Unavailable { device, .. } => {
            gateway.set_device_unavailable(&device, timestamp)?;
        }
        AdapterRecord::Asset {
            device,
            asset_id,
            asset_type,
            payload,
            removed,
            ..
        } => {
            gateway.upsert_asset(&device, &asset_id, &asset_type, payload, removed, timestamp)?;
        }
    }
    Ok(())
}

/// Read records until end of input, then mark every device seen on this
/// connection unavailable. Returns the number of records applied.
///
/// Malformed lines are logged and skipped. Only fatal buffer errors end
/// ingestion early.
pub async fn ingest<R>(reader: R, agent: &Agent, source: &str) -> Result<usize, AdapterError>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut devices = HashSet::new();
    let mut applied = 0;

    let result = loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break Ok(applied),
            Ok(_) => {
                let line = match std::str::from_utf8(&buf) {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::warn!(source, "skipping non-UTF-8 adapter line: {}", e);
                        continue;
                    }
                };
                match process_line(agent, line) {
                    Ok(Some(device)) => {
                        devices.insert(device);
                        applied += 1;
                    }
                    Ok(None) => {}
                    Err(e) if e.is_fatal() => break Err(e),
                    Err(e) => tracing::warn!(source, "skipping adapter record: {}", e),
                }
            }
            Err(e) => break Err(AdapterError::Io(e)),
        }
    };

    let now = agent.clock().now();
    for device in &devices {
        if let Err(e) = agent.gateway().set_device_unavailable(device, now) {
            tracing::error!(source, device = %device, "failed to mark device unavailable: {}", e);
        }
    }
    tracing::info!(source, applied, devices = devices.len(), "adapter disconnected");
    result
}

/// Accepts adapter connections, one ingestion task per connection.
#[derive(Debug)]
pub struct AdapterListener {
    listener: TcpListener,
    agent: Arc<Agent>,
}

impl AdapterListener {
    pub async fn bind(addr: &str, agent: Arc<Agent>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, agent })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> std::io::Result<()> {
        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!(%addr, "adapter listener ready");
        }

        loop {
            let (stream, peer) = tokio::select! {
                accepted = self.listener.accept() => accepted?,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("adapter listener stopping");
                        return Ok(());
                    }
                    continue;
                }
            };
            tracing::info!(%peer, "adapter connected");

            let agent = self.agent.clone();
            tokio::spawn(async move {
                let source = peer.to_string();
                if let Err(e) = ingest(stream, &agent, &source).await {
                    tracing::error!(source, "adapter ingestion stopped: {}", e);
                }
            });
        }
    }
}
