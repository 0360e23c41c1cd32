//! Observations - the immutable records stored in the observation buffer.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use core::fmt;
use core::str::FromStr;

use crate::{Timestamp, UNAVAILABLE};

/// Value key holding the result of a simple sample or event.
pub const VALUE_KEY: &str = "value";

/// Value key holding a condition's level (NORMAL, WARNING, FAULT, UNAVAILABLE).
pub const LEVEL_KEY: &str = "level";

/// The MTConnect category of a data item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum Category {
    /// Continuously variable or analog data.
    Sample,
    /// Discrete state or message.
    Event,
    /// Health and fault status.
    Condition,
}

impl Category {
    /// The protocol spelling of this category.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Category::Sample => "SAMPLE",
            Category::Event => "EVENT",
            Category::Condition => "CONDITION",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown category name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCategory(pub String);

impl fmt::Display for UnknownCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown data item category: {}", self.0)
    }
}

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Category::Sample, Category::Event, Category::Condition]
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// A single reported value for a data item, tagged with its buffer sequence.
///
/// Observations are immutable once stored. The `values` map carries the
/// result in whatever shape the data item needs: a single `value` entry for
/// simple samples and events, `level`/`nativeCode`/`message` entries for
/// conditions, or one entry per key for data sets and tables.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Observation {
    /// Device UUID or name this observation belongs to.
    pub device: String,

    /// Id of the data item within the device.
    pub data_item: String,

    /// Category of the data item.
    pub category: Category,

    /// Position in the buffer's sequence space.
    pub sequence: u64,

    /// When the adapter observed the value.
    pub timestamp: Timestamp,

    /// The observed values keyed by value name.
    pub values: BTreeMap<String, String>,
}

impl Observation {
    /// Create a builder for a new observation.
    pub fn builder(device: impl Into<String>, data_item: impl Into<String>) -> ObservationBuilder {
        ObservationBuilder::new(device, data_item)
    }

    /// The simple result, if this observation has one.
    pub fn value(&self) -> Option<&str> {
        self.values.get(VALUE_KEY).map(String::as_str)
    }

    /// Check if this observation marks the data item unavailable.
    pub fn is_unavailable(&self) -> bool {
        match self.category {
            Category::Condition => self.values.get(LEVEL_KEY).map(String::as_str) == Some(UNAVAILABLE),
            _ => self.value() == Some(UNAVAILABLE),
        }
    }

    /// The (device, data item) pair identifying the data item this observation reports.
    pub fn key(&self) -> (&str, &str) {
        (&self.device, &self.data_item)
    }
}

/// An observation that has not yet been assigned a sequence number.
///
/// Only the buffer turns a `PendingObservation` into an [`Observation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingObservation {
    /// Device UUID or name.
    pub device: String,
    /// Data item id.
    pub data_item: String,
    /// Data item category.
    pub category: Category,
    /// When the value was observed.
    pub timestamp: Timestamp,
    /// The observed values.
    pub values: BTreeMap<String, String>,
}

impl PendingObservation {
    /// Seal this observation with the sequence number assigned by the buffer.
    pub fn with_sequence(self, sequence: u64) -> Observation {
        Observation {
            device: self.device,
            data_item: self.data_item,
            category: self.category,
            sequence,
            timestamp: self.timestamp,
            values: self.values,
        }
    }
}

/// Builder for [`PendingObservation`].
#[derive(Debug)]
pub struct ObservationBuilder {
    device: String,
    data_item: String,
    category: Category,
    timestamp: Timestamp,
    values: BTreeMap<String, String>,
}

impl ObservationBuilder {
    /// Create a new builder. The category defaults to `Event`.
    pub fn new(device: impl Into<String>, data_item: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            data_item: data_item.into(),
            category: Category::Event,
            timestamp: Timestamp::EPOCH,
            values: BTreeMap::new(),
        }
    }

    /// Set the category.
    pub fn category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    /// Set the observation timestamp.
    pub fn timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Set the simple result.
    pub fn value(self, value: impl Into<String>) -> Self {
        self.entry(VALUE_KEY, value)
    }

    /// Add a named value entry.
    pub fn entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Replace all values at once.
    pub fn values(mut self, values: BTreeMap<String, String>) -> Self {
        self.values = values;
        self
    }

    /// Build the pending observation.
    pub fn build(self) -> PendingObservation {
        PendingObservation {
            device: self.device,
            data_item: self.data_item,
            category: self.category,
            timestamp: self.timestamp,
            values: self.values,
        }
    }
}
