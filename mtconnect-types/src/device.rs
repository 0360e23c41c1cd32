//! Device metadata returned by probe requests.

use alloc::string::String;
use alloc::vec::Vec;

use crate::Category;

/// Metadata describing a single data item of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DataItemDescription {
    /// Unique id of the data item.
    pub id: String,

    /// Optional human-readable name, also accepted as a key by adapters.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub name: Option<String>,

    /// Data item category.
    pub category: Category,

    /// MTConnect type (e.g. `POSITION`, `AVAILABILITY`, `ASSET_CHANGED`).
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub kind: String,

    /// Optional sub type.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub sub_type: Option<String>,

    /// Optional engineering units.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub units: Option<String>,
}

impl DataItemDescription {
    /// Check whether `key` addresses this data item by id or name.
    pub fn matches_key(&self, key: &str) -> bool {
        self.id == key || self.name.as_deref() == Some(key)
    }
}

/// Metadata describing a device and its data items.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceDescription {
    /// Device UUID.
    pub uuid: String,

    /// Device name.
    pub name: String,

    /// Data items exposed by the device.
    #[cfg_attr(feature = "serde", serde(default))]
    pub data_items: Vec<DataItemDescription>,
}

impl DeviceDescription {
    /// Check whether `key` addresses this device by UUID or name.
    pub fn matches_key(&self, key: &str) -> bool {
        self.uuid == key || self.name == key
    }

    /// Find a data item by id or name.
    pub fn data_item(&self, key: &str) -> Option<&DataItemDescription> {
        self.data_items.iter().find(|d| d.matches_key(key))
    }

    /// Find the first data item of an MTConnect type.
    pub fn data_item_of_kind(&self, kind: &str) -> Option<&DataItemDescription> {
        self.data_items.iter().find(|d| d.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;
    use alloc::vec;

    fn device() -> DeviceDescription {
        DeviceDescription {
            uuid: "mill-1-uuid".to_string(),
            name: "mill-1".to_string(),
            data_items: vec![DataItemDescription {
                id: "x1".to_string(),
                name: Some("Xact".to_string()),
                category: Category::Sample,
                kind: "POSITION".to_string(),
                sub_type: Some("ACTUAL".to_string()),
                units: Some("MILLIMETER".to_string()),
            }],
        }
    }

    #[test]
    fn device_matches_uuid_or_name() {
        let d = device();
        assert!(d.matches_key("mill-1"));
        assert!(d.matches_key("mill-1-uuid"));
        assert!(!d.matches_key("lathe"));
    }

    #[test]
    fn data_item_lookup_by_id_or_name() {
        let d = device();
        assert_eq!(d.data_item("x1").map(|i| i.id.as_str()), Some("x1"));
        assert_eq!(d.data_item("Xact").map(|i| i.id.as_str()), Some("x1"));
        assert!(d.data_item("y1").is_none());
        assert!(d.data_item_of_kind("POSITION").is_some());
    }
}
