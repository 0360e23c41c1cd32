//! The single funnel for writes into the buffers.

use std::collections::BTreeMap;
use std::sync::Arc;

use mtconnect_types::{
    AssetRecord, Category, DeviceDescription, Observation, Timestamp, LEVEL_KEY, UNAVAILABLE,
    VALUE_KEY,
};

use crate::assets::AssetBuffer;
use crate::error::{BufferError, Result};
use crate::metrics::MetricsCollector;
use crate::model::DeviceModel;
use crate::observations::ObservationBuffer;

/// MTConnect type of the event announcing a changed asset.
pub const ASSET_CHANGED: &str = "ASSET_CHANGED";

/// MTConnect type of the event announcing a removed asset.
pub const ASSET_REMOVED: &str = "ASSET_REMOVED";

/// Validates adapter writes against the device model and forwards them to
/// the buffers.
///
/// Writes for unknown devices or data items are logged and dropped without
/// consuming a sequence number.
#[derive(Debug, Clone)]
pub struct IngestionGateway {
    model: Arc<dyn DeviceModel>,
    observations: Arc<ObservationBuffer>,
    assets: Arc<AssetBuffer>,
    metrics: Arc<MetricsCollector>,
}

impl IngestionGateway {
    pub fn new(
        model: Arc<dyn DeviceModel>,
        observations: Arc<ObservationBuffer>,
        assets: Arc<AssetBuffer>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            model,
            observations,
            assets,
            metrics,
        }
    }

    /// Append an observation. Returns the assigned sequence, or `None` if the
    /// key is unknown.
    pub fn append(
        &self,
        device: &str,
        data_item: &str,
        values: BTreeMap<String, String>,
        timestamp: Timestamp,
    ) -> Result<Option<u64>> {
        let resolved = match self.model.resolve(device, data_item) {
            Ok(resolved) => resolved,
            Err(e @ (BufferError::UnknownDevice(_) | BufferError::UnknownDataItem { .. })) => {
                tracing::warn!(device, data_item, "dropping observation: {}", e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let pending = Observation::builder(&resolved.device, &resolved.data_item)
            .category(resolved.category)
            .timestamp(timestamp)
            .values(values)
            .build();
        let sequence = self.observations.append(pending)?;

        self.metrics
            .record_observation(&resolved.device, &resolved.data_item);
        tracing::trace!(
            device = %resolved.device,
            data_item = %resolved.data_item,
            sequence,
            "appended observation"
        );
        Ok(Some(sequence))
    }

    /// Mark a data item unavailable.
    ///
    /// Conditions carry the marker in their level, everything else in the
    /// value.
    pub fn unavailable(&self, device: &str, data_item: &str, timestamp: Timestamp) -> Result<Option<u64>> {
        let key = match self.model.resolve(device, data_item) {
            Ok(resolved) if resolved.category == Category::Condition => LEVEL_KEY,
            _ => VALUE_KEY,
        };
        let values = BTreeMap::from([(key.to_string(), UNAVAILABLE.to_string())]);
        self.append(device, data_item, values, timestamp)
    }

    /// Mark every data item of a device unavailable, e.g. when its adapter
    /// disconnects. Returns the number of observations appended.
    pub fn set_device_unavailable(&self, device: &str, timestamp: Timestamp) -> Result<usize> {
        let Some(found) = self.model.device(device) else {
            tracing::warn!(device, "cannot mark unknown device unavailable");
            return Ok(0);
        };

        let mut appended = 0;
        for item in &found.data_items {
            if self.unavailable(&found.uuid, &item.id, timestamp)?.is_some() {
                appended += 1;
            }
        }
        tracing::info!(device = %found.uuid, appended, "device marked unavailable");
        Ok(appended)
    }

    /// Insert, replace or tombstone an asset.
    ///
    /// If the device declares an `ASSET_CHANGED` (or, for removals,
    /// `ASSET_REMOVED`) data item, an event carrying the asset id is appended
    /// as well.
    pub fn upsert_asset(
        &self,
        device: &str,
        asset_id: &str,
        asset_type: &str,
        payload: impl Into<String>,
        removed: bool,
        timestamp: Timestamp,
    ) -> Result<Option<Arc<AssetRecord>>> {
        let Some(found) = self.model.device(device) else {
            tracing::warn!(device, asset_id, "dropping asset for unknown device");
            return Ok(None);
        };

        let record = AssetRecord::builder(asset_id, asset_type)
            .device(&found.uuid)
            .timestamp(timestamp)
            .removed(removed)
            .payload(payload)
            .build();
        let stored = self.assets.upsert(record);
        self.metrics.record_asset(asset_type);
        tracing::debug!(device = %found.uuid, asset_id, asset_type, removed, "stored asset");

        let kind = if removed { ASSET_REMOVED } else { ASSET_CHANGED };
        self.announce(found, kind, asset_id, timestamp)?;
        Ok(Some(stored))
    }

    /// Tombstone an asset.
    pub fn remove_asset(&self, asset_id: &str, timestamp: Timestamp) -> Result<Arc<AssetRecord>> {
        let removed = self.assets.remove(asset_id, timestamp)?;
        self.metrics.record_asset(&removed.asset_type);

        if let Some(found) = self.model.device(&removed.device_uuid) {
            self.announce(found, ASSET_REMOVED, asset_id, timestamp)?;
        }
        Ok(removed)
    }

    /// Tombstone every live asset matching the filters.
    pub fn remove_all_assets(
        &self,
        asset_type: Option<&str>,
        device: Option<&str>,
        timestamp: Timestamp,
    ) -> Result<Vec<Arc<AssetRecord>>> {
        let device_uuid = match device {
            Some(key) => match self.model.device(key) {
                Some(found) => Some(found.uuid.clone()),
                None => {
                    tracing::warn!(device = key, "cannot remove assets of unknown device");
                    return Ok(Vec::new());
                }
            },
            None => None,
        };

        let removed = self
            .assets
            .remove_all(asset_type, device_uuid.as_deref(), timestamp);
        for record in &removed {
            self.metrics.record_asset(&record.asset_type);
            if let Some(found) = self.model.device(&record.device_uuid) {
                self.announce(found, ASSET_REMOVED, &record.asset_id, timestamp)?;
            }
        }
        Ok(removed)
    }

    fn announce(
        &self,
        device: &DeviceDescription,
        kind: &str,
        asset_id: &str,
        timestamp: Timestamp,
    ) -> Result<()> {
        if let Some(item) = device.data_item_of_kind(kind) {
            let values = BTreeMap::from([(VALUE_KEY.to_string(), asset_id.to_string())]);
            self.append(&device.uuid, &item.id, values, timestamp)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::filter::ObservationFilter;
    use crate::model::tests::sample_model;

    struct Fixture {
        gateway: IngestionGateway,
        observations: Arc<ObservationBuffer>,
        assets: Arc<AssetBuffer>,
        metrics: Arc<MetricsCollector>,
    }

    fn fixture() -> Fixture {
        let observations = Arc::new(ObservationBuffer::new(100));
        let assets = Arc::new(AssetBuffer::new(10));
        let clock = Arc::new(ManualClock::new(Timestamp::from_secs(1)));
        let metrics = Arc::new(MetricsCollector::new(clock, 0.5));
        let gateway = IngestionGateway::new(
            Arc::new(sample_model()),
            observations.clone(),
            assets.clone(),
            metrics.clone(),
        );
        Fixture {
            gateway,
            observations,
            assets,
            metrics,
        }
    }

    fn value(v: &str) -> BTreeMap<String, String> {
        BTreeMap::from([(VALUE_KEY.to_string(), v.to_string())])
    }

    #[test]
    fn append_resolves_canonical_keys() {
        let f = fixture();
        let seq = f
            .gateway
            .append("mill", "Xact", value("1.5"), Timestamp::from_millis(5))
            .unwrap();
        assert_eq!(seq, Some(1));

        let latest = f.observations.latest(&ObservationFilter::all());
        let obs = &latest.observations[0];
        assert_eq!(obs.device, "mill-uuid");
        assert_eq!(obs.data_item, "x");
        assert_eq!(obs.category, Category::Sample);
        assert_eq!(f.metrics.snapshot().devices["mill-uuid"].observations.count, 1);
    }

    #[test]
    fn unknown_keys_consume_no_sequence() {
        let f = fixture();
        assert_eq!(
            f.gateway.append("drill", "x", value("1"), Timestamp::EPOCH),
            Ok(None)
        );
        assert_eq!(
            f.gateway.append("mill", "nope", value("1"), Timestamp::EPOCH),
            Ok(None)
        );
        assert_eq!(f.observations.window().next_sequence, 1);
        assert_eq!(
            f.gateway.append("mill", "x", value("1"), Timestamp::EPOCH),
            Ok(Some(1))
        );
    }

    #[test]
    fn unavailable_uses_level_for_conditions() {
        let f = fixture();
        f.gateway.unavailable("mill", "system", Timestamp::EPOCH).unwrap();
        f.gateway.unavailable("mill", "avail", Timestamp::EPOCH).unwrap();

        let latest = f.observations.latest(&ObservationFilter::all());
        assert!(latest.observations.iter().all(|o| o.is_unavailable()));
        let system = latest
            .observations
            .iter()
            .find(|o| o.data_item == "system")
            .unwrap();
        assert_eq!(system.values.get(LEVEL_KEY).map(String::as_str), Some(UNAVAILABLE));
    }

    #[test]
    fn device_unavailable_marks_every_item() {
        let f = fixture();
        assert_eq!(f.gateway.set_device_unavailable("mill", Timestamp::EPOCH), Ok(4));
        assert_eq!(f.gateway.set_device_unavailable("drill", Timestamp::EPOCH), Ok(0));
        assert_eq!(f.observations.len(), 4);
    }

    #[test]
    fn asset_upsert_announces_change() {
        let f = fixture();
        let stored = f
            .gateway
            .upsert_asset("mill", "T1", "CuttingTool", "<CuttingTool/>", false, Timestamp::from_millis(9))
            .unwrap()
            .unwrap();
        assert_eq!(stored.device_uuid, "mill-uuid");

        let latest = f
            .observations
            .latest(&ObservationFilter::all().data_item("mill-uuid", "asset_chg"));
        assert_eq!(latest.observations[0].value(), Some("T1"));
        assert_eq!(f.metrics.snapshot().assets["CuttingTool"].updates.count, 1);
    }

    #[test]
    fn asset_on_device_without_event_item_appends_nothing() {
        let f = fixture();
        f.gateway
            .upsert_asset("lathe", "T2", "CuttingTool", "", false, Timestamp::EPOCH)
            .unwrap();
        assert!(f.observations.is_empty());
        assert_eq!(f.assets.count(), 1);
    }

    #[test]
    fn asset_for_unknown_device_is_dropped() {
        let f = fixture();
        assert_eq!(
            f.gateway
                .upsert_asset("drill", "T3", "CuttingTool", "", false, Timestamp::EPOCH),
            Ok(None)
        );
        assert!(f.assets.is_empty());
    }

    #[test]
    fn remove_asset_tombstones() {
        let f = fixture();
        f.gateway
            .upsert_asset("mill", "T1", "CuttingTool", "", false, Timestamp::EPOCH)
            .unwrap();
        let removed = f.gateway.remove_asset("T1", Timestamp::from_millis(3)).unwrap();
        assert!(removed.removed);
        assert!(matches!(
            f.gateway.remove_asset("T9", Timestamp::EPOCH),
            Err(BufferError::AssetNotFound(_))
        ));

        f.gateway
            .upsert_asset("lathe", "T2", "CuttingTool", "", false, Timestamp::EPOCH)
            .unwrap();
        let all = f
            .gateway
            .remove_all_assets(None, Some("lathe"), Timestamp::from_millis(4))
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(f.assets.count(), 0);
    }
}
