//! Prometheus exposition format support.
//!
//! Renders a [`MetricsSnapshot`] together with the buffer [`Header`] in the
//! Prometheus text format, ready to be served from a `/metrics` endpoint.

use std::fmt::Write;

use mtconnect_types::{Header, MetricsSnapshot};

/// Content type of the text exposition format.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Options for rendering.
#[derive(Debug, Clone, Default)]
pub struct PrometheusConfig {
    /// Optional namespace prefix for all metrics.
    pub namespace: Option<String>,
}

impl PrometheusConfig {
    /// Create a new builder for PrometheusConfig.
    pub fn builder() -> PrometheusConfigBuilder {
        PrometheusConfigBuilder::default()
    }
}

/// Builder for PrometheusConfig.
#[derive(Debug, Default)]
pub struct PrometheusConfigBuilder {
    namespace: Option<String>,
}

impl PrometheusConfigBuilder {
    /// Set the namespace prefix for all metrics.
    pub fn namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = Some(ns.into());
        self
    }

    /// Build the PrometheusConfig.
    pub fn build(self) -> PrometheusConfig {
        PrometheusConfig {
            namespace: self.namespace,
        }
    }
}

struct Family<'a> {
    out: &'a mut String,
    prefix: &'a str,
}

impl Family<'_> {
    fn describe(&mut self, name: &str, kind: &str, help: &str) {
        let _ = writeln!(self.out, "# HELP {}{} {}", self.prefix, name, help);
        let _ = writeln!(self.out, "# TYPE {}{} {}", self.prefix, name, kind);
    }

    fn sample(&mut self, name: &str, labels: &str, value: impl std::fmt::Display) {
        if labels.is_empty() {
            let _ = writeln!(self.out, "{}{} {}", self.prefix, name, value);
        } else {
            let _ = writeln!(self.out, "{}{}{{{}}} {}", self.prefix, name, labels, value);
        }
    }
}

/// Format metrics and buffer state in the Prometheus exposition format.
pub fn format_prometheus(snapshot: &MetricsSnapshot, header: &Header, config: &PrometheusConfig) -> String {
    let mut output = String::new();
    let prefix = config
        .namespace
        .as_deref()
        .map(|n| format!("{}_", n))
        .unwrap_or_default();
    let mut f = Family {
        out: &mut output,
        prefix: &prefix,
    };

    f.describe(
        "mtconnect_observations_total",
        "counter",
        "Observations accepted per device",
    );
    for (device, metric) in &snapshot.devices {
        let labels = format!("device=\"{}\"", escape_label_value(device));
        f.sample("mtconnect_observations_total", &labels, metric.observations.count);
    }

    f.describe(
        "mtconnect_observation_rate_per_second",
        "gauge",
        "Smoothed observations per second per device",
    );
    for (device, metric) in &snapshot.devices {
        let labels = format!("device=\"{}\"", escape_label_value(device));
        f.sample(
            "mtconnect_observation_rate_per_second",
            &labels,
            format_args!("{:.2}", metric.observations.rate),
        );
    }

    f.describe(
        "mtconnect_data_item_observations_total",
        "counter",
        "Observations accepted per data item",
    );
    f.describe(
        "mtconnect_data_item_rate_per_second",
        "gauge",
        "Smoothed observations per second per data item",
    );
    for (device, metric) in &snapshot.devices {
        let device_label = escape_label_value(device);
        for (item, item_metric) in &metric.data_items {
            let labels = format!(
                "device=\"{}\",data_item=\"{}\"",
                device_label,
                escape_label_value(item)
            );
            f.sample(
                "mtconnect_data_item_observations_total",
                &labels,
                item_metric.observations.count,
            );
            f.sample(
                "mtconnect_data_item_rate_per_second",
                &labels,
                format_args!("{:.2}", item_metric.observations.rate),
            );
        }
    }

    f.describe(
        "mtconnect_asset_updates_total",
        "counter",
        "Asset changes per asset type",
    );
    f.describe(
        "mtconnect_asset_update_rate_per_second",
        "gauge",
        "Smoothed asset changes per second per asset type",
    );
    for (asset_type, metric) in &snapshot.assets {
        let labels = format!("asset_type=\"{}\"", escape_label_value(asset_type));
        f.sample("mtconnect_asset_updates_total", &labels, metric.updates.count);
        f.sample(
            "mtconnect_asset_update_rate_per_second",
            &labels,
            format_args!("{:.2}", metric.updates.rate),
        );
    }

    f.describe(
        "mtconnect_buffer_size",
        "gauge",
        "Observation buffer capacity",
    );
    f.sample("mtconnect_buffer_size", "", header.buffer_size);
    f.describe(
        "mtconnect_first_sequence",
        "gauge",
        "First sequence retained in the buffer",
    );
    f.sample("mtconnect_first_sequence", "", header.first_sequence);
    f.describe(
        "mtconnect_next_sequence",
        "gauge",
        "Sequence the next observation will receive",
    );
    f.sample("mtconnect_next_sequence", "", header.next_sequence);
    f.describe("mtconnect_asset_count", "gauge", "Live assets");
    f.sample("mtconnect_asset_count", "", header.asset_count);
    f.describe("mtconnect_instance_id", "gauge", "Current agent instance id");
    f.sample("mtconnect_instance_id", "", header.instance_id);

    f.describe(
        "mtconnect_metrics_timestamp_seconds",
        "gauge",
        "Unix timestamp of the last rate computation",
    );
    f.sample(
        "mtconnect_metrics_timestamp_seconds",
        "",
        format_args!("{:.3}", snapshot.timestamp.as_millis() as f64 / 1000.0),
    );

    output
}

/// Escape a label value for Prometheus format.
/// Backslash, double-quote, and newline must be escaped.
pub fn escape_label_value(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtconnect_types::{
        AssetMetric, DeviceMetric, ObservationMetric, RateMetric, SchemaVersion, Timestamp,
    };
    use std::collections::BTreeMap;

    fn header() -> Header {
        Header {
            instance_id: 1_700_000_000,
            version: SchemaVersion::current(),
            creation_time: Timestamp::from_secs(1_700_000_000),
            buffer_size: 131_072,
            first_sequence: 1,
            last_sequence: 41,
            next_sequence: 42,
            asset_buffer_size: 1024,
            asset_count: 3,
        }
    }

    fn create_test_snapshot() -> MetricsSnapshot {
        let mut data_items = BTreeMap::new();
        data_items.insert(
            "x".to_string(),
            ObservationMetric {
                observations: RateMetric::new(30, 2.5),
            },
        );

        let mut devices = BTreeMap::new();
        devices.insert(
            "mill-1".to_string(),
            DeviceMetric {
                observations: RateMetric::new(41, 3.25),
                data_items,
            },
        );

        let mut assets = BTreeMap::new();
        assets.insert(
            "CuttingTool".to_string(),
            AssetMetric {
                updates: RateMetric::new(3, 0.5),
            },
        );

        MetricsSnapshot {
            timestamp: Timestamp::from_millis(1_703_160_000_000),
            devices,
            assets,
        }
    }

    #[test]
    fn test_format_prometheus_basic() {
        let output = format_prometheus(&create_test_snapshot(), &header(), &PrometheusConfig::default());

        assert!(output.contains("mtconnect_observations_total{device=\"mill-1\"} 41"));
        assert!(output.contains("mtconnect_observation_rate_per_second{device=\"mill-1\"} 3.25"));
        assert!(output.contains(
            "mtconnect_data_item_observations_total{device=\"mill-1\",data_item=\"x\"} 30"
        ));
        assert!(output.contains(
            "mtconnect_data_item_rate_per_second{device=\"mill-1\",data_item=\"x\"} 2.50"
        ));
        assert!(output.contains("mtconnect_asset_updates_total{asset_type=\"CuttingTool\"} 3"));
        assert!(output.contains("mtconnect_next_sequence 42"));
        assert!(output.contains("mtconnect_asset_count 3"));
    }

    #[test]
    fn test_format_prometheus_with_namespace() {
        let config = PrometheusConfig::builder().namespace("shop").build();
        let output = format_prometheus(&create_test_snapshot(), &header(), &config);

        assert!(output.contains("shop_mtconnect_observations_total"));
        assert!(output.contains("# HELP shop_mtconnect_buffer_size"));
    }

    #[test]
    fn test_format_includes_help_and_type() {
        let output = format_prometheus(&create_test_snapshot(), &header(), &PrometheusConfig::default());

        assert!(output.contains("# TYPE mtconnect_observations_total counter"));
        assert!(output.contains("# TYPE mtconnect_observation_rate_per_second gauge"));
        assert!(output.contains("# TYPE mtconnect_asset_updates_total counter"));
    }

    #[test]
    fn test_format_includes_timestamp() {
        let output = format_prometheus(&create_test_snapshot(), &header(), &PrometheusConfig::default());
        assert!(output.contains("mtconnect_metrics_timestamp_seconds 1703160000.000"));
    }

    #[test]
    fn test_empty_snapshot() {
        let output = format_prometheus(&MetricsSnapshot::default(), &header(), &PrometheusConfig::default());

        assert!(output.contains("# HELP mtconnect_observations_total"));
        assert!(!output.contains("device=\""));
        assert!(output.contains("mtconnect_buffer_size 131072"));
    }

    #[test]
    fn test_escape_label_value() {
        assert_eq!(escape_label_value("simple"), "simple");
        assert_eq!(escape_label_value("with\"quote"), "with\\\"quote");
        assert_eq!(escape_label_value("with\\backslash"), "with\\\\backslash");
        assert_eq!(escape_label_value("with\nnewline"), "with\\nnewline");
    }
}
