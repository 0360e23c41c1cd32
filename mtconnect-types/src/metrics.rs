//! Update-rate statistics for devices, data items and asset types.

use alloc::collections::BTreeMap;
use alloc::string::String;

use crate::Timestamp;

/// Exponentially-weighted moving average of an update rate.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RateMetric {
    /// Total updates since the agent started.
    pub count: u64,

    /// Smoothed updates per second.
    pub rate: f64,
}

impl RateMetric {
    /// Create a metric with a count and rate.
    pub fn new(count: u64, rate: f64) -> Self {
        Self { count, rate }
    }

    /// Fold a new reading into the average.
    ///
    /// `alpha` is the smoothing factor in `(0, 1]`; `elapsed_secs` is the time
    /// since the previous reading. Counts never decrease.
    pub fn update(&mut self, count: u64, elapsed_secs: f64, alpha: f64) {
        if elapsed_secs <= 0.0 {
            return;
        }
        let delta = count.saturating_sub(self.count) as f64;
        let instant = delta / elapsed_secs;
        self.rate = alpha * instant + (1.0 - alpha) * self.rate;
        self.count = self.count.max(count);
    }
}

/// Update rate of a single data item.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ObservationMetric {
    pub observations: RateMetric,
}

/// Update rate of a device and each of its data items.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceMetric {
    /// All observations for the device.
    pub observations: RateMetric,

    /// Per data item, keyed by data item id.
    pub data_items: BTreeMap<String, ObservationMetric>,
}

impl DeviceMetric {
    /// Total observations across all data items.
    pub fn total(&self) -> u64 {
        self.observations.count
    }
}

/// Update rate of an asset type.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AssetMetric {
    pub updates: RateMetric,
}

/// All metrics at one instant.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetricsSnapshot {
    /// When the rates were last recomputed.
    pub timestamp: Timestamp,

    /// Per device, keyed by device key.
    pub devices: BTreeMap<String, DeviceMetric>,

    /// Per asset type.
    pub assets: BTreeMap<String, AssetMetric>,
}

impl MetricsSnapshot {
    /// Check if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty() && self.assets.is_empty()
    }

    /// Total observations across all devices.
    pub fn total_observations(&self) -> u64 {
        self.devices.values().map(DeviceMetric::total).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_update_from_zero() {
        let mut m = RateMetric::default();
        m.update(100, 10.0, 1.0);
        assert_eq!(m.count, 100);
        assert!((m.rate - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn smoothing_blends_previous_rate() {
        let mut m = RateMetric::new(100, 10.0);
        // 20/s instantaneous, alpha 0.5 => 15/s
        m.update(300, 10.0, 0.5);
        assert!((m.rate - 15.0).abs() < 1e-9);
        assert_eq!(m.count, 300);
    }

    #[test]
    fn idle_interval_decays_rate() {
        let mut m = RateMetric::new(100, 10.0);
        m.update(100, 1.0, 0.25);
        assert!((m.rate - 7.5).abs() < 1e-9);
    }

    #[test]
    fn zero_elapsed_is_ignored() {
        let mut m = RateMetric::new(5, 2.0);
        m.update(50, 0.0, 0.5);
        assert_eq!(m, RateMetric::new(5, 2.0));
    }

    #[test]
    fn snapshot_totals() {
        let mut snapshot = MetricsSnapshot::default();
        assert!(snapshot.is_empty());

        snapshot.devices.insert(
            "mill-1".into(),
            DeviceMetric {
                observations: RateMetric::new(40, 1.0),
                data_items: BTreeMap::new(),
            },
        );
        snapshot.devices.insert(
            "lathe-1".into(),
            DeviceMetric {
                observations: RateMetric::new(2, 0.1),
                data_items: BTreeMap::new(),
            },
        );
        assert_eq!(snapshot.total_observations(), 42);
    }
}
