//! Update-rate metrics for devices, data items and asset types.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mtconnect_types::{
    AssetMetric, DeviceMetric, MetricsSnapshot, ObservationMetric, RateMetric, Timestamp,
};
use parking_lot::RwLock;
use tokio::sync::watch;

use crate::clock::Clock;

/// Default EWMA smoothing factor.
pub const DEFAULT_SMOOTHING: f64 = 0.3;

/// Counters for one device.
#[derive(Debug, Default)]
struct DeviceCounters {
    count: AtomicU64,
    data_items: RwLock<BTreeMap<String, Arc<AtomicU64>>>,
}

impl DeviceCounters {
    fn get_or_create(&self, data_item: &str) -> Arc<AtomicU64> {
        {
            let items = self.data_items.read();
            if let Some(counter) = items.get(data_item) {
                return counter.clone();
            }
        }

        let mut items = self.data_items.write();
        items.entry(data_item.to_string()).or_default().clone()
    }
}

#[derive(Debug, Default)]
struct Rates {
    last_tick: Option<Timestamp>,
    snapshot: MetricsSnapshot,
}

/// Collects update counts and turns them into smoothed rates.
///
/// Recording is lock-free once a counter exists. Rates are recomputed by
/// [`tick`](Self::tick), either manually or from the task spawned by
/// [`start`](Self::start).
#[derive(Debug)]
pub struct MetricsCollector {
    clock: Arc<dyn Clock>,
    alpha: f64,
    devices: RwLock<BTreeMap<String, Arc<DeviceCounters>>>,
    assets: RwLock<BTreeMap<String, Arc<AtomicU64>>>,
    rates: RwLock<Rates>,
}

impl MetricsCollector {
    /// Create a collector. `alpha` is clamped to `(0, 1]`.
    pub fn new(clock: Arc<dyn Clock>, alpha: f64) -> Self {
        let alpha = if alpha.is_finite() && alpha > 0.0 {
            alpha.min(1.0)
        } else {
            DEFAULT_SMOOTHING
        };
        Self {
            clock,
            alpha,
            devices: RwLock::new(BTreeMap::new()),
            assets: RwLock::new(BTreeMap::new()),
            rates: RwLock::new(Rates::default()),
        }
    }

    fn device(&self, device: &str) -> Arc<DeviceCounters> {
        {
            let devices = self.devices.read();
            if let Some(counters) = devices.get(device) {
                return counters.clone();
            }
        }

        let mut devices = self.devices.write();
        devices.entry(device.to_string()).or_default().clone()
    }

    /// Count an accepted observation.
    pub fn record_observation(&self, device: &str, data_item: &str) {
        let counters = self.device(device);
        counters.count.fetch_add(1, Ordering::Relaxed);
        counters
            .get_or_create(data_item)
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Count an asset change.
    pub fn record_asset(&self, asset_type: &str) {
        let counter = {
            let assets = self.assets.read();
            assets.get(asset_type).cloned()
        };
        let counter = match counter {
            Some(counter) => counter,
            None => self
                .assets
                .write()
                .entry(asset_type.to_string())
                .or_default()
                .clone(),
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Recompute rates from the current counts.
    pub fn tick(&self) {
        let now = self.clock.now();
        let mut rates = self.rates.write();
        let elapsed = rates
            .last_tick
            .map(|last| now.saturating_duration_since(last).as_secs_f64());
        let alpha = self.alpha;

        let fold = |metric: &mut RateMetric, count: u64| match elapsed {
            Some(secs) => metric.update(count, secs, alpha),
            None => metric.count = count,
        };

        let snapshot = &mut rates.snapshot;
        for (name, counters) in self.devices.read().iter() {
            let device = snapshot.devices.entry(name.clone()).or_default();
            fold(&mut device.observations, counters.count.load(Ordering::Relaxed));
            for (item, counter) in counters.data_items.read().iter() {
                let metric = device.data_items.entry(item.clone()).or_default();
                fold(&mut metric.observations, counter.load(Ordering::Relaxed));
            }
        }
        for (asset_type, counter) in self.assets.read().iter() {
            let metric = snapshot.assets.entry(asset_type.clone()).or_default();
            fold(&mut metric.updates, counter.load(Ordering::Relaxed));
        }

        snapshot.timestamp = now;
        rates.last_tick = Some(now);
    }

    /// Current counts with the rates computed at the last tick.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let rates = self.rates.read();
        let last = &rates.snapshot;

        let devices = self
            .devices
            .read()
            .iter()
            .map(|(name, counters)| {
                let previous = last.devices.get(name);
                let data_items = counters
                    .data_items
                    .read()
                    .iter()
                    .map(|(item, counter)| {
                        let rate = previous
                            .and_then(|d| d.data_items.get(item))
                            .map_or(0.0, |m| m.observations.rate);
                        (
                            item.clone(),
                            ObservationMetric {
                                observations: RateMetric::new(counter.load(Ordering::Relaxed), rate),
                            },
                        )
                    })
                    .collect();

                let rate = previous.map_or(0.0, |d| d.observations.rate);
                (
                    name.clone(),
                    DeviceMetric {
                        observations: RateMetric::new(counters.count.load(Ordering::Relaxed), rate),
                        data_items,
                    },
                )
            })
            .collect();

        let assets = self
            .assets
            .read()
            .iter()
            .map(|(asset_type, counter)| {
                let rate = last.assets.get(asset_type).map_or(0.0, |m| m.updates.rate);
                (
                    asset_type.clone(),
                    AssetMetric {
                        updates: RateMetric::new(counter.load(Ordering::Relaxed), rate),
                    },
                )
            })
            .collect();

        MetricsSnapshot {
            timestamp: last.timestamp,
            devices,
            assets,
        }
    }

    /// Spawn a task that calls [`tick`](Self::tick) every `interval`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self: &Arc<Self>, interval: Duration) -> MetricsHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let collector = self.clone();

        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = timer.tick() => collector.tick(),
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("metrics timer stopped");
        });

        MetricsHandle { stop_tx }
    }
}

/// Handle for stopping the metrics timer.
#[derive(Debug)]
pub struct MetricsHandle {
    stop_tx: watch::Sender<bool>,
}

impl MetricsHandle {
    /// Stop recomputing rates.
    pub fn stop(self) {
        let _ = self.stop_tx.send(true);
    }
}
