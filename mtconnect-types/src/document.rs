//! Response documents produced by the query engine.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::{AssetRecord, DeviceDescription, Header, Observation};

/// Device metadata (probe response).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProbeDocument {
    pub header: Header,
    pub devices: Vec<DeviceDescription>,
}

/// Point-in-time snapshot of the latest value per data item (current response).
///
/// Every observation in `observations` has a sequence no greater than
/// `header.last_sequence`, and each (device, data item) appears at most once.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CurrentDocument {
    pub header: Header,
    pub observations: Vec<Observation>,
}

impl CurrentDocument {
    /// Look up the current observation for a data item.
    pub fn get(&self, device: &str, data_item: &str) -> Option<&Observation> {
        self.observations
            .iter()
            .find(|o| o.device == device && o.data_item == data_item)
    }
}

/// A range of observations ordered by sequence (sample response).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SampleDocument {
    pub header: Header,

    /// Sequence to pass as `from` to continue reading without gaps or repeats.
    pub end_sequence: u64,

    pub observations: Vec<Observation>,
}

impl SampleDocument {
    /// Check if the range matched no observations.
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Sequence of the newest observation in the document.
    pub fn last_observed(&self) -> Option<u64> {
        self.observations.last().map(|o| o.sequence)
    }
}

/// Assets (asset response), newest first.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AssetDocument {
    pub header: Header,
    pub assets: Vec<AssetRecord>,
}

/// Protocol error codes rendered in error documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum ErrorCode {
    /// Requested sequence lies outside the retained window.
    OutOfRange,
    /// Presented instance id no longer matches the agent's.
    InstanceMismatch,
    /// Device name or UUID is unknown.
    NoDevice,
    /// Asset id is unknown.
    AssetNotFound,
    /// Malformed request parameters.
    InvalidRequest,
    /// Anything else.
    InternalError,
}

impl ErrorCode {
    /// The protocol spelling of this code.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::OutOfRange => "OUT_OF_RANGE",
            ErrorCode::InstanceMismatch => "INSTANCE_MISMATCH",
            ErrorCode::NoDevice => "NO_DEVICE",
            ErrorCode::AssetNotFound => "ASSET_NOT_FOUND",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single error entry in an error document.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProtocolError {
    pub code: ErrorCode,
    pub message: String,
}

/// Structured error response.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ErrorDocument {
    pub header: Header,
    pub errors: Vec<ProtocolError>,
}

impl ErrorDocument {
    /// Create an error document with a single error.
    pub fn single(header: Header, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            header,
            errors: alloc::vec![ProtocolError {
                code,
                message: message.into(),
            }],
        }
    }

    /// The code of the first error, if any.
    pub fn code(&self) -> Option<ErrorCode> {
        self.errors.first().map(|e| e.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Category, SchemaVersion, Timestamp};

    fn header() -> Header {
        Header {
            instance_id: 1,
            version: SchemaVersion::current(),
            creation_time: Timestamp::from_millis(0),
            buffer_size: 8,
            first_sequence: 1,
            last_sequence: 2,
            next_sequence: 3,
            asset_buffer_size: 4,
            asset_count: 0,
        }
    }

    #[test]
    fn current_lookup() {
        let obs = Observation::builder("dev", "mode")
            .category(Category::Event)
            .value("AUTOMATIC")
            .build()
            .with_sequence(2);
        let doc = CurrentDocument {
            header: header(),
            observations: alloc::vec![obs],
        };

        assert_eq!(doc.get("dev", "mode").and_then(|o| o.value()), Some("AUTOMATIC"));
        assert!(doc.get("dev", "other").is_none());
    }

    #[test]
    fn error_document_single() {
        let doc = ErrorDocument::single(header(), ErrorCode::OutOfRange, "from 0 precedes 1");
        assert_eq!(doc.code(), Some(ErrorCode::OutOfRange));
        assert_eq!(doc.errors.len(), 1);
        assert_eq!(ErrorCode::OutOfRange.to_string(), "OUT_OF_RANGE");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn sample_document_serializes() {
        let doc = SampleDocument {
            header: header(),
            end_sequence: 3,
            observations: alloc::vec::Vec::new(),
        };
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["end_sequence"], 3);
        assert_eq!(json["header"]["instance_id"], 1);
    }
}
