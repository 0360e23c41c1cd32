//! The device model seam.
//!
//! The buffers only ever see device keys, data item ids and categories. The
//! schema hierarchy behind them lives behind [`DeviceModel`].

use std::fmt::Debug;

use mtconnect_types::{Category, DeviceDescription};

use crate::error::{BufferError, Result};
use crate::filter::ObservationFilter;
use crate::path::PathExpr;

/// A data item resolved to its canonical keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataItemRef {
    /// Device UUID.
    pub device: String,

    /// Data item id.
    pub data_item: String,

    pub category: Category,
}

/// Device metadata provider.
pub trait DeviceModel: Send + Sync + Debug {
    /// All known devices.
    fn devices(&self) -> &[DeviceDescription];

    /// Find a device by UUID or name.
    fn device(&self, key: &str) -> Option<&DeviceDescription> {
        self.devices().iter().find(|d| d.matches_key(key))
    }

    /// Resolve an adapter-supplied device and data item key.
    fn resolve(&self, device: &str, data_item: &str) -> Result<DataItemRef> {
        let found = self
            .device(device)
            .ok_or_else(|| BufferError::UnknownDevice(device.to_string()))?;
        let item = found
            .data_item(data_item)
            .ok_or_else(|| BufferError::UnknownDataItem {
                device: device.to_string(),
                data_item: data_item.to_string(),
            })?;

        Ok(DataItemRef {
            device: found.uuid.clone(),
            data_item: item.id.clone(),
            category: item.category,
        })
    }

    /// Build an observation filter from an optional device key and path.
    ///
    /// An unknown device is `UnknownDevice`; a path that is malformed or
    /// selects nothing is `InvalidRequest`.
    fn select(&self, device: Option<&str>, path: Option<&str>) -> Result<ObservationFilter> {
        let scoped: Vec<&DeviceDescription> = match device {
            Some(key) => vec![self
                .device(key)
                .ok_or_else(|| BufferError::UnknownDevice(key.to_string()))?],
            None => self.devices().iter().collect(),
        };

        let Some(path) = path else {
            return Ok(match device {
                Some(_) => scoped
                    .iter()
                    .fold(ObservationFilter::all(), |f, d| f.device(d.uuid.clone())),
                None => ObservationFilter::all(),
            });
        };

        let expr = PathExpr::parse(path)?;
        let selected: Vec<(String, String)> = scoped
            .iter()
            .flat_map(|d| {
                d.data_items
                    .iter()
                    .filter(|item| expr.matches(d, item))
                    .map(|item| (d.uuid.clone(), item.id.clone()))
            })
            .collect();

        if selected.is_empty() {
            return Err(BufferError::InvalidRequest(format!(
                "path {:?} matches no data items",
                path
            )));
        }
        Ok(ObservationFilter::all().data_items(selected))
    }
}

/// A device model fixed at construction, typically loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticDeviceModel {
    devices: Vec<DeviceDescription>,
}

impl StaticDeviceModel {
    /// Create a model. Lookups return the first device or data item matching a key.
    pub fn new(devices: Vec<DeviceDescription>) -> Self {
        Self { devices }
    }
}

impl DeviceModel for StaticDeviceModel {
    fn devices(&self) -> &[DeviceDescription] {
        &self.devices
    }
}
