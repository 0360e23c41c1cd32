//! # mtconnect-buffer
//!
//! The observation and asset buffers of an MTConnect agent, and the query
//! and streaming engine built on them.
//!
//! Observations are appended through an [`IngestionGateway`], stamped with
//! strictly increasing sequence numbers and kept in a bounded
//! [`ObservationBuffer`]. The [`QueryEngine`] answers probe, current, sample
//! and asset requests against consistent snapshots, and a [`StreamSession`]
//! follows the buffer for long-polling clients.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mtconnect_buffer::{Agent, SampleRequest, StreamFrame, StreamOptions};
//! use mtconnect_types::{Category, DataItemDescription, DeviceDescription};
//! use std::collections::BTreeMap;
//!
//! #[tokio::main]
//! async fn main() {
//!     let agent = Agent::builder()
//!         .devices(vec![DeviceDescription {
//!             uuid: "mill-1".to_string(),
//!             name: "mill".to_string(),
//!             data_items: vec![DataItemDescription {
//!                 id: "x".to_string(),
//!                 name: None,
//!                 category: Category::Sample,
//!                 kind: "POSITION".to_string(),
//!                 sub_type: None,
//!                 units: None,
//!             }],
//!         }])
//!         .build();
//!
//!     let now = agent.clock().now();
//!     let values = BTreeMap::from([("value".to_string(), "12.5".to_string())]);
//!     agent.gateway().append("mill", "x", values, now).unwrap();
//!
//!     let doc = agent.query().sample(&SampleRequest::new().from(1)).unwrap();
//!     assert_eq!(doc.end_sequence, 2);
//!
//!     let (_session, mut frames) = agent.stream(StreamOptions::new().from(doc.end_sequence));
//!     while let Some(frame) = frames.recv().await {
//!         if let StreamFrame::Data(doc) = frame {
//!             println!("{} new observations", doc.observations.len());
//!         }
//!     }
//! }
//! ```

mod agent;
mod assets;
mod clock;
mod error;
mod filter;
mod gateway;
mod instance;
mod metrics;
mod model;
mod observations;
mod path;
mod query;
mod sequence;
mod stream;

pub mod prometheus;

pub use agent::{Agent, AgentBuilder, DEFAULT_BUFFER_SIZE, DEFAULT_MAX_ASSETS};
pub use assets::{AssetBuffer, AssetQuery};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{BufferError, Result};
pub use filter::ObservationFilter;
pub use gateway::{IngestionGateway, ASSET_CHANGED, ASSET_REMOVED};
pub use instance::AgentInstance;
pub use metrics::{MetricsCollector, MetricsHandle, DEFAULT_SMOOTHING};
pub use model::{DataItemRef, DeviceModel, StaticDeviceModel};
pub use observations::{LatestSnapshot, ObservationBuffer, RangeResult};
pub use path::{PathExpr, PathTerm, Predicate};
pub use query::{
    AssetRequest, CurrentRequest, QueryEngine, QueryLimits, SampleRequest, DEFAULT_COUNT,
    DEFAULT_MAX_COUNT,
};
pub use sequence::SequenceAllocator;
pub use stream::{
    SessionState, StreamFrame, StreamOptions, StreamSession, DEFAULT_CHANNEL_CAPACITY,
    DEFAULT_HEARTBEAT,
};

// Re-export types for convenience
pub use mtconnect_types::{
    AssetRecord, BufferWindow, Category, ErrorCode, Header, MetricsSnapshot, Observation,
    Timestamp,
};
