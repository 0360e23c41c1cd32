//! Observation predicates pushed down into buffer scans.

use std::collections::{HashMap, HashSet};

use mtconnect_types::{Category, Observation};

/// Selects observations by device, data item and category.
///
/// An unset dimension matches everything. Device keys are the canonical keys
/// stored on observations (the device UUID).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservationFilter {
    devices: Option<HashSet<String>>,
    data_items: Option<HashMap<String, HashSet<String>>>,
    categories: Option<HashSet<Category>>,
}

impl ObservationFilter {
    /// A filter that matches every observation.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to a device.
    pub fn device(mut self, device: impl Into<String>) -> Self {
        self.devices
            .get_or_insert_with(HashSet::new)
            .insert(device.into());
        self
    }

    /// Restrict to a single data item.
    pub fn data_item(mut self, device: impl Into<String>, data_item: impl Into<String>) -> Self {
        self.data_items
            .get_or_insert_with(HashMap::new)
            .entry(device.into())
            .or_default()
            .insert(data_item.into());
        self
    }

    /// Restrict to a set of data items. An empty set matches nothing.
    pub fn data_items<I>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let map = self.data_items.get_or_insert_with(HashMap::new);
        for (device, data_item) in items {
            map.entry(device).or_default().insert(data_item);
        }
        self
    }

    /// Restrict to a category.
    pub fn category(mut self, category: Category) -> Self {
        self.categories
            .get_or_insert_with(HashSet::new)
            .insert(category);
        self
    }

    /// Check if this filter matches everything.
    pub fn is_unrestricted(&self) -> bool {
        self.devices.is_none() && self.data_items.is_none() && self.categories.is_none()
    }

    /// Test an observation against the filter.
    pub fn matches(&self, observation: &Observation) -> bool {
        if let Some(devices) = &self.devices {
            if !devices.contains(&observation.device) {
                return false;
            }
        }

        if let Some(items) = &self.data_items {
            if !items
                .get(&observation.device)
                .is_some_and(|ids| ids.contains(&observation.data_item))
            {
                return false;
            }
        }

        if let Some(categories) = &self.categories {
            if !categories.contains(&observation.category) {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(device: &str, item: &str, category: Category) -> Observation {
        Observation::builder(device, item)
            .category(category)
            .value("1")
            .build()
            .with_sequence(1)
    }

    #[test]
    fn all_matches_everything() {
        let f = ObservationFilter::all();
        assert!(f.is_unrestricted());
        assert!(f.matches(&obs("a", "x", Category::Sample)));
    }

    #[test]
    fn device_restriction() {
        let f = ObservationFilter::all().device("a");
        assert!(f.matches(&obs("a", "x", Category::Sample)));
        assert!(!f.matches(&obs("b", "x", Category::Sample)));
    }

    #[test]
    fn data_item_restriction() {
        let f = ObservationFilter::all().data_item("a", "x");
        assert!(f.matches(&obs("a", "x", Category::Event)));
        assert!(!f.matches(&obs("a", "y", Category::Event)));
        assert!(!f.matches(&obs("b", "x", Category::Event)));
    }

    #[test]
    fn empty_data_item_set_matches_nothing() {
        let f = ObservationFilter::all().data_items(Vec::new());
        assert!(!f.is_unrestricted());
        assert!(!f.matches(&obs("a", "x", Category::Event)));
    }

    #[test]
    fn dimensions_combine() {
        let f = ObservationFilter::all()
            .device("a")
            .category(Category::Condition);
        assert!(f.matches(&obs("a", "sys", Category::Condition)));
        assert!(!f.matches(&obs("a", "x", Category::Sample)));
    }
}
