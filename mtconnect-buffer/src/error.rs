//! Error types for buffer and query operations.

use mtconnect_types::ErrorCode;
use thiserror::Error;

/// Errors returned by the buffers, the ingestion gateway and the query engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    /// Requested sequence lies outside the retained window.
    ///
    /// Clients must resynchronize from a fresh `current` request.
    #[error("Sequence {requested} is outside the buffer window [{first}, {next}]")]
    OutOfRange { requested: u64, first: u64, next: u64 },

    /// A resumed request presented an instance id the agent no longer has.
    ///
    /// History before the current instance is gone; clients must start over from probe.
    #[error("Instance id {presented} does not match agent instance {current}")]
    InstanceMismatch { presented: u64, current: u64 },

    /// Device name or UUID not present in the device model.
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// Data item not present on the device.
    #[error("Unknown data item {data_item} on device {device}")]
    UnknownDataItem { device: String, data_item: String },

    /// Asset id not present in the asset buffer.
    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    /// Malformed request parameters.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The sequence space is used up. The process must restart.
    #[error("Sequence numbers exhausted")]
    SequenceExhausted,
}

impl BufferError {
    /// Protocol error code used when rendering this error for clients.
    pub fn code(&self) -> ErrorCode {
        match self {
            BufferError::OutOfRange { .. } => ErrorCode::OutOfRange,
            BufferError::InstanceMismatch { .. } => ErrorCode::InstanceMismatch,
            BufferError::UnknownDevice(_) | BufferError::UnknownDataItem { .. } => {
                ErrorCode::NoDevice
            }
            BufferError::AssetNotFound(_) => ErrorCode::AssetNotFound,
            BufferError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            BufferError::SequenceExhausted => ErrorCode::InternalError,
        }
    }

    /// Check if the error requires a process restart.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BufferError::SequenceExhausted)
    }
}

/// Result alias for buffer operations.
pub type Result<T> = std::result::Result<T, BufferError>;
