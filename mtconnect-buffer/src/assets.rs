//! Bounded store of assets keyed by asset id.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use mtconnect_types::{AssetRecord, Timestamp};
use parking_lot::RwLock;

use crate::error::{BufferError, Result};

/// Selection for [`AssetBuffer::list`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetQuery {
    /// Only assets of this type.
    pub asset_type: Option<String>,

    /// Only assets of this device UUID.
    pub device: Option<String>,

    /// Include tombstoned assets.
    pub include_removed: bool,

    /// Maximum number of assets to return.
    pub count: Option<usize>,
}

impl AssetQuery {
    /// Query matching every live asset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to an asset type.
    pub fn asset_type(mut self, asset_type: impl Into<String>) -> Self {
        self.asset_type = Some(asset_type.into());
        self
    }

    /// Restrict to a device.
    pub fn device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    /// Include or exclude tombstones.
    pub fn include_removed(mut self, include: bool) -> Self {
        self.include_removed = include;
        self
    }

    /// Limit the number of results.
    pub fn count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    fn matches(&self, record: &AssetRecord) -> bool {
        (self.include_removed || !record.removed)
            && self
                .asset_type
                .as_deref()
                .map_or(true, |t| t == record.asset_type)
            && self
                .device
                .as_deref()
                .map_or(true, |d| d == record.device_uuid)
    }
}

#[derive(Debug)]
struct Slot {
    stamp: u64,
    record: Arc<AssetRecord>,
}

#[derive(Debug, Default)]
struct Inner {
    next_stamp: u64,
    slots: HashMap<String, Slot>,
    // Insertion stamp -> asset id, oldest first.
    order: BTreeMap<u64, String>,
    by_type: HashMap<String, BTreeSet<u64>>,
}

impl Inner {
    fn detach(&mut self, asset_id: &str) -> Option<Slot> {
        let slot = self.slots.remove(asset_id)?;
        self.order.remove(&slot.stamp);
        if let Some(stamps) = self.by_type.get_mut(&slot.record.asset_type) {
            stamps.remove(&slot.stamp);
            if stamps.is_empty() {
                self.by_type.remove(&slot.record.asset_type);
            }
        }
        Some(slot)
    }

    fn evict_stamp(&mut self, stamp: u64) {
        if let Some(asset_id) = self.order.get(&stamp).cloned() {
            if let Some(slot) = self.detach(&asset_id) {
                tracing::debug!(
                    asset_id = %asset_id,
                    asset_type = %slot.record.asset_type,
                    "evicted asset"
                );
            }
        }
    }
}

/// Bounded FIFO of assets.
///
/// Global capacity evicts the oldest inserted asset. A per-type limit evicts
/// the oldest asset of that type first. Removal leaves a tombstone in place
/// until it is evicted.
#[derive(Debug)]
pub struct AssetBuffer {
    capacity: usize,
    per_type: HashMap<String, usize>,
    inner: RwLock<Inner>,
}

impl AssetBuffer {
    /// Create a buffer holding at most `capacity` assets (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self::with_type_limits(capacity, HashMap::new())
    }

    /// Create a buffer with additional per-type limits.
    pub fn with_type_limits(capacity: usize, per_type: HashMap<String, usize>) -> Self {
        Self {
            capacity: capacity.max(1),
            per_type,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Maximum number of assets, tombstones included.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert or replace an asset.
    ///
    /// The asset moves to the newest insertion position, so a replaced or
    /// un-removed asset is the last to be evicted.
    pub fn upsert(&self, record: AssetRecord) -> Arc<AssetRecord> {
        let record = Arc::new(record);
        let mut inner = self.inner.write();

        inner.detach(&record.asset_id);

        let stamp = inner.next_stamp;
        inner.next_stamp += 1;
        inner.order.insert(stamp, record.asset_id.clone());
        inner
            .by_type
            .entry(record.asset_type.clone())
            .or_default()
            .insert(stamp);
        inner.slots.insert(
            record.asset_id.clone(),
            Slot {
                stamp,
                record: record.clone(),
            },
        );

        if let Some(&limit) = self.per_type.get(&record.asset_type) {
            loop {
                let oldest = match inner.by_type.get(&record.asset_type) {
                    Some(stamps) if stamps.len() > limit.max(1) => stamps.first().copied(),
                    _ => None,
                };
                match oldest {
                    Some(stamp) => inner.evict_stamp(stamp),
                    None => break,
                }
            }
        }

        while inner.slots.len() > self.capacity {
            match inner.order.first_key_value().map(|(stamp, _)| *stamp) {
                Some(stamp) => inner.evict_stamp(stamp),
                None => break,
            }
        }

        record
    }

    /// Tombstone an asset. It keeps its position in the eviction order.
    ///
    /// Removing an asset that is already removed returns the existing
    /// tombstone.
    pub fn remove(&self, asset_id: &str, timestamp: Timestamp) -> Result<Arc<AssetRecord>> {
        let mut inner = self.inner.write();
        let slot = inner
            .slots
            .get_mut(asset_id)
            .ok_or_else(|| BufferError::AssetNotFound(asset_id.to_string()))?;

        if !slot.record.removed {
            slot.record = Arc::new(slot.record.tombstone(timestamp));
        }
        Ok(slot.record.clone())
    }

    /// Tombstone every live asset matching the type and device filters.
    pub fn remove_all(
        &self,
        asset_type: Option<&str>,
        device: Option<&str>,
        timestamp: Timestamp,
    ) -> Vec<Arc<AssetRecord>> {
        let mut inner = self.inner.write();
        let Inner { slots, order, .. } = &mut *inner;

        let mut removed = Vec::new();
        for asset_id in order.values() {
            let Some(slot) = slots.get_mut(asset_id) else {
                continue;
            };
            let record = &slot.record;
            if record.removed
                || asset_type.is_some_and(|t| t != record.asset_type)
                || device.is_some_and(|d| d != record.device_uuid)
            {
                continue;
            }
            let tombstone = Arc::new(record.tombstone(timestamp));
            slot.record = tombstone.clone();
            removed.push(tombstone);
        }
        removed
    }

    /// Look up an asset, removed or not.
    pub fn get(&self, asset_id: &str) -> Result<Arc<AssetRecord>> {
        self.inner
            .read()
            .slots
            .get(asset_id)
            .map(|slot| slot.record.clone())
            .ok_or_else(|| BufferError::AssetNotFound(asset_id.to_string()))
    }

    /// Assets matching `query`, newest first.
    pub fn list(&self, query: &AssetQuery) -> Vec<Arc<AssetRecord>> {
        let inner = self.inner.read();
        let limit = query.count.unwrap_or(usize::MAX);

        inner
            .order
            .values()
            .rev()
            .filter_map(|id| inner.slots.get(id))
            .map(|slot| &slot.record)
            .filter(|record| query.matches(record))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Number of live (non-removed) assets.
    pub fn count(&self) -> usize {
        self.inner
            .read()
            .slots
            .values()
            .filter(|slot| !slot.record.removed)
            .count()
    }

    /// Number of stored assets, tombstones included.
    pub fn len(&self) -> usize {
        self.inner.read().slots.len()
    }

    /// Check if no assets are stored.
    pub fn is_empty(&self) -> bool {
        self.inner.read().slots.is_empty()
    }

    /// Live asset count per type.
    pub fn count_by_type(&self) -> BTreeMap<String, usize> {
        let inner = self.inner.read();
        let mut counts = BTreeMap::new();
        for slot in inner.slots.values().filter(|slot| !slot.record.removed) {
            *counts.entry(slot.record.asset_type.clone()).or_insert(0) += 1;
        }
        counts
    }
}
