//! Assets - identity-addressed records with upsert/remove semantics.

use alloc::string::String;

use crate::Timestamp;

/// An asset (cutting tool, file, raw material, ...) held in the asset buffer.
///
/// The payload is opaque to the agent: it is produced by the device model and
/// handed back to clients unchanged. Removal is recorded as a tombstone
/// (`removed = true`) rather than deleting the record.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AssetRecord {
    /// Agent-wide unique asset id.
    pub asset_id: String,

    /// Asset type (e.g. `CuttingTool`).
    pub asset_type: String,

    /// UUID of the device the asset is associated with.
    pub device_uuid: String,

    /// When the asset was last changed.
    pub timestamp: Timestamp,

    /// Tombstone flag.
    pub removed: bool,

    /// Serialized asset body owned by the device model.
    pub payload: String,
}

impl AssetRecord {
    /// Create a builder for an asset record.
    pub fn builder(asset_id: impl Into<String>, asset_type: impl Into<String>) -> AssetRecordBuilder {
        AssetRecordBuilder::new(asset_id, asset_type)
    }

    /// A copy of this record marked removed at `timestamp`.
    pub fn tombstone(&self, timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            removed: true,
            ..self.clone()
        }
    }
}

/// Builder for [`AssetRecord`].
#[derive(Debug)]
pub struct AssetRecordBuilder {
    asset_id: String,
    asset_type: String,
    device_uuid: String,
    timestamp: Timestamp,
    removed: bool,
    payload: String,
}

impl AssetRecordBuilder {
    /// Create a new builder.
    pub fn new(asset_id: impl Into<String>, asset_type: impl Into<String>) -> Self {
        Self {
            asset_id: asset_id.into(),
            asset_type: asset_type.into(),
            device_uuid: String::new(),
            timestamp: Timestamp::EPOCH,
            removed: false,
            payload: String::new(),
        }
    }

    /// Set the owning device UUID.
    pub fn device(mut self, device_uuid: impl Into<String>) -> Self {
        self.device_uuid = device_uuid.into();
        self
    }

    /// Set the timestamp.
    pub fn timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Set the tombstone flag.
    pub fn removed(mut self, removed: bool) -> Self {
        self.removed = removed;
        self
    }

    /// Set the opaque payload.
    pub fn payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Build the record.
    pub fn build(self) -> AssetRecord {
        AssetRecord {
            asset_id: self.asset_id,
            asset_type: self.asset_type,
            device_uuid: self.device_uuid,
            timestamp: self.timestamp,
            removed: self.removed,
            payload: self.payload,
        }
    }
}
