//! # mtconnect-types
//!
//! Core protocol types for the MTConnect agent. This crate defines the records
//! that flow through the agent's buffers and the documents its query engine
//! returns to clients.
//!
//! ## Design Goals
//!
//! - **Zero required dependencies**: Core types work without any serialization framework
//! - **Optional serialization**: Enable the `serde` feature to render documents as JSON
//! - **Schema agnostic**: Observations carry only a device key, data item id and
//!   category; the device model stays outside the buffer
//! - **Ergonomic builders**: Fluent API for constructing observations and assets
//!
//! ## Features
//!
//! - `std` (default): Standard library support (wall-clock timestamps)
//! - `serde`: Serialization via serde
//!
//! ## Example
//!
//! ```rust
//! use mtconnect_types::{Category, Observation, Timestamp};
//!
//! let pending = Observation::builder("mill-1", "Xact")
//!     .category(Category::Sample)
//!     .timestamp(Timestamp::from_millis(1703160000000))
//!     .value("12.5")
//!     .build();
//!
//! // Sequence numbers are assigned by the buffer, never by the caller.
//! let observation = pending.with_sequence(42);
//! assert_eq!(observation.sequence, 42);
//! assert_eq!(observation.value(), Some("12.5"));
//! ```

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod asset;
mod device;
mod document;
mod metrics;
mod observation;
mod timestamp;
mod version;
mod window;

pub use asset::*;
pub use device::*;
pub use document::*;
pub use metrics::*;
pub use observation::*;
pub use timestamp::*;
pub use version::*;
pub use window::*;

/// Major MTConnect schema version emitted in every header.
pub const SCHEMA_VERSION: u32 = 2;

/// Minor MTConnect schema version emitted in every header.
pub const SCHEMA_MINOR_VERSION: u32 = 2;

/// Observation value used when a data item has no known value.
pub const UNAVAILABLE: &str = "UNAVAILABLE";
