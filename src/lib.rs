//! # mtconnect-agent
//!
//! An MTConnect agent: adapters push observations over TCP, clients read
//! them back over HTTP.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  JSON lines  ┌──────────────────────────────┐  HTTP  ┌────────┐
//! │ adapters │─────────────▶│ adapter ─▶ IngestionGateway   │        │        │
//! └──────────┘              │              │                │        │ client │
//!                           │              ▼                │        │        │
//!                           │   ObservationBuffer  Assets   │        │        │
//!                           │              │                │        │        │
//!                           │              ▼                │        │        │
//!                           │   QueryEngine / StreamSession ├───────▶│        │
//!                           │            http + format      │        │        │
//!                           └──────────────────────────────┘        └────────┘
//! ```
//!
//! - **[`adapter`]**: the JSON-lines ingestion listener
//! - **[`http`]**: the HTTP routes, including multipart streaming
//! - **[`format`]**: the [`Formatter`] trait, JSON rendering and stream parts
//! - **[`config`]**: file and environment configuration
//!
//! The buffers, queries and streams themselves live in [`mtconnect_buffer`].
//!
//! ## Usage
//!
//! ```bash
//! # Run with a device file
//! mtconnect-agent --config agent.toml
//!
//! # Override listen addresses
//! mtconnect-agent --config agent.toml --http-addr 0.0.0.0:5000 --adapter-addr 0.0.0.0:7878
//!
//! # Follow a device
//! curl 'http://localhost:5000/mill/sample?interval=1000'
//! ```

pub mod adapter;
pub mod config;
pub mod format;
pub mod http;

pub use adapter::{AdapterError, AdapterListener, AdapterRecord};
pub use config::AgentConfig;
pub use format::{Formatter, JsonFormatter};
pub use http::{HttpState, Route};
