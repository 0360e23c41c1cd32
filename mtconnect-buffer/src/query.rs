//! Probe, current, sample and asset queries.
//!
//! Every document carries a [`Header`] built from the same window the data
//! was read against, so clients can always tell which sequences a response
//! covers.

use std::sync::Arc;

use mtconnect_types::{
    AssetDocument, BufferWindow, CurrentDocument, ErrorDocument, Header, ProbeDocument,
    SampleDocument, SchemaVersion,
};
use tokio::sync::watch;

use crate::assets::{AssetBuffer, AssetQuery};
use crate::clock::Clock;
use crate::error::{BufferError, Result};
use crate::filter::ObservationFilter;
use crate::instance::AgentInstance;
use crate::model::DeviceModel;
use crate::observations::ObservationBuffer;

/// Default number of observations returned by a sample request.
pub const DEFAULT_COUNT: u64 = 100;

/// Default upper bound on `|count|`.
pub const DEFAULT_MAX_COUNT: u64 = 10_000;

/// Bounds applied to sample requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryLimits {
    pub default_count: u64,
    pub max_count: u64,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            default_count: DEFAULT_COUNT,
            max_count: DEFAULT_MAX_COUNT,
        }
    }
}

/// Parameters of a current request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CurrentRequest {
    pub device: Option<String>,
    pub path: Option<String>,
    pub at: Option<u64>,
}

impl CurrentRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn at(mut self, at: u64) -> Self {
        self.at = Some(at);
        self
    }
}

/// Parameters of a sample request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleRequest {
    pub device: Option<String>,
    pub path: Option<String>,
    pub from: Option<u64>,
    pub to: Option<u64>,
    pub count: Option<i64>,
}

impl SampleRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn from(mut self, from: u64) -> Self {
        self.from = Some(from);
        self
    }

    pub fn to(mut self, to: u64) -> Self {
        self.to = Some(to);
        self
    }

    pub fn count(mut self, count: i64) -> Self {
        self.count = Some(count);
        self
    }
}

/// Parameters of an assets request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetRequest {
    pub asset_type: Option<String>,
    pub device: Option<String>,
    pub removed: bool,
    pub count: Option<usize>,
}

/// Answers protocol queries against the buffers.
#[derive(Debug, Clone)]
pub struct QueryEngine {
    clock: Arc<dyn Clock>,
    model: Arc<dyn DeviceModel>,
    instance: Arc<AgentInstance>,
    observations: Arc<ObservationBuffer>,
    assets: Arc<AssetBuffer>,
    limits: QueryLimits,
}

impl QueryEngine {
    pub fn new(
        clock: Arc<dyn Clock>,
        model: Arc<dyn DeviceModel>,
        instance: Arc<AgentInstance>,
        observations: Arc<ObservationBuffer>,
        assets: Arc<AssetBuffer>,
        limits: QueryLimits,
    ) -> Self {
        Self {
            clock,
            model,
            instance,
            observations,
            assets,
            limits,
        }
    }

    /// The sample bounds in effect.
    pub fn limits(&self) -> QueryLimits {
        self.limits
    }

    /// Current instance id.
    pub fn instance_id(&self) -> u64 {
        self.instance.id()
    }

    /// Verify a client-presented instance id.
    pub fn check_instance(&self, presented: u64) -> Result<()> {
        self.instance.check(presented)
    }

    /// Watch the buffer's next sequence.
    pub fn subscribe_appends(&self) -> watch::Receiver<u64> {
        self.observations.subscribe()
    }

    /// Watch the instance id.
    pub fn subscribe_instance(&self) -> watch::Receiver<u64> {
        self.instance.subscribe()
    }

    /// The current buffer window.
    pub fn window(&self) -> BufferWindow {
        self.observations.window()
    }

    /// Build a header for `window`.
    pub fn header_for(&self, window: BufferWindow) -> Header {
        Header {
            instance_id: self.instance.id(),
            version: SchemaVersion::current(),
            creation_time: self.clock.now(),
            buffer_size: self.observations.capacity() as u64,
            first_sequence: window.first_sequence,
            last_sequence: window.last_sequence,
            next_sequence: window.next_sequence,
            asset_buffer_size: self.assets.capacity() as u64,
            asset_count: self.assets.count() as u64,
        }
    }

    /// Header for the current window. The instance id is read together with
    /// the window, so it never pairs a new id with old sequences.
    pub fn header(&self) -> Header {
        self.observations.with_window(|window| self.header_for(window))
    }

    /// Device metadata, for one device or all.
    pub fn probe(&self, device: Option<&str>) -> Result<ProbeDocument> {
        let devices = match device {
            Some(key) => vec![self
                .model
                .device(key)
                .cloned()
                .ok_or_else(|| BufferError::UnknownDevice(key.to_string()))?],
            None => self.model.devices().to_vec(),
        };

        Ok(ProbeDocument {
            header: self.header(),
            devices,
        })
    }

    /// Resolve device and path parameters into a filter.
    pub fn resolve_filter(&self, device: Option<&str>, path: Option<&str>) -> Result<ObservationFilter> {
        self.model.select(device, path)
    }

    /// Latest value per data item, now or as of `at`.
    pub fn current(&self, request: &CurrentRequest) -> Result<CurrentDocument> {
        let filter = self.resolve_filter(request.device.as_deref(), request.path.as_deref())?;
        let snapshot = match request.at {
            Some(at) => self.observations.latest_at(at, &filter)?,
            None => self.observations.latest(&filter),
        };

        Ok(CurrentDocument {
            header: self.header_for(snapshot.window),
            observations: snapshot
                .observations
                .iter()
                .map(|o| o.as_ref().clone())
                .collect(),
        })
    }

    /// Observations in a sequence range.
    pub fn sample(&self, request: &SampleRequest) -> Result<SampleDocument> {
        let filter = self.resolve_filter(request.device.as_deref(), request.path.as_deref())?;
        let count = self.checked_count(request.count)?;
        self.sample_filtered(request.from, request.to, count, &filter)
    }

    /// Validate a requested count against the limits, applying the default.
    pub fn checked_count(&self, count: Option<i64>) -> Result<i64> {
        let count = count.unwrap_or(self.limits.default_count as i64);
        if count == 0 {
            return Err(BufferError::InvalidRequest("count must not be zero".to_string()));
        }
        if count.unsigned_abs() > self.limits.max_count {
            return Err(BufferError::InvalidRequest(format!(
                "count {} exceeds the maximum of {}",
                count, self.limits.max_count
            )));
        }
        Ok(count)
    }

    /// Sample with an already resolved filter and validated count.
    ///
    /// `from` defaults to the first retained sequence.
    pub fn sample_filtered(
        &self,
        from: Option<u64>,
        to: Option<u64>,
        count: i64,
        filter: &ObservationFilter,
    ) -> Result<SampleDocument> {
        if let (Some(from), Some(to)) = (from, to) {
            if to < from {
                return Err(BufferError::InvalidRequest(format!(
                    "to ({}) must not precede from ({})",
                    to, from
                )));
            }
        }

        let defaulted = from.is_none();
        let from = match from {
            Some(from) => from,
            None => self.observations.window().first_sequence,
        };
        let result = match self.observations.range(from, to, count, filter) {
            // The window moved between reading `first` and the range.
            Err(BufferError::OutOfRange { first, .. }) if defaulted && from < first => {
                self.observations.range(first, to, count, filter)?
            }
            other => other?,
        };

        Ok(SampleDocument {
            header: self.header_for(result.window),
            end_sequence: result.end_sequence,
            observations: result
                .observations
                .iter()
                .map(|o| o.as_ref().clone())
                .collect(),
        })
    }

    /// Assets matching the request, newest first.
    pub fn assets(&self, request: &AssetRequest) -> Result<AssetDocument> {
        let device = match request.device.as_deref() {
            Some(key) => Some(
                self.model
                    .device(key)
                    .map(|d| d.uuid.clone())
                    .ok_or_else(|| BufferError::UnknownDevice(key.to_string()))?,
            ),
            None => None,
        };

        let query = AssetQuery {
            asset_type: request.asset_type.clone(),
            device,
            include_removed: request.removed,
            count: request.count,
        };

        Ok(AssetDocument {
            header: self.header(),
            assets: self
                .assets
                .list(&query)
                .iter()
                .map(|a| a.as_ref().clone())
                .collect(),
        })
    }

    /// Specific assets by id, in the requested order. Any unknown id fails
    /// the whole request.
    pub fn asset(&self, ids: &[&str]) -> Result<AssetDocument> {
        if ids.is_empty() {
            return Err(BufferError::InvalidRequest("no asset ids given".to_string()));
        }
        let assets = ids
            .iter()
            .map(|id| self.assets.get(id).map(|a| a.as_ref().clone()))
            .collect::<Result<Vec<_>>>()?;

        Ok(AssetDocument {
            header: self.header(),
            assets,
        })
    }

    /// Render an error for clients.
    pub fn error_document(&self, error: &BufferError) -> ErrorDocument {
        ErrorDocument::single(self.header(), error.code(), error.to_string())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::tests::sample_model;
    use mtconnect_types::{AssetRecord, Category, ErrorCode, Observation, Timestamp};

    pub(crate) struct Fixture {
        pub clock: Arc<ManualClock>,
        pub instance: Arc<AgentInstance>,
        pub observations: Arc<ObservationBuffer>,
        pub assets: Arc<AssetBuffer>,
        pub engine: QueryEngine,
    }

    pub(crate) fn fixture(capacity: usize) -> Fixture {
        let clock = Arc::new(ManualClock::new(Timestamp::from_secs(1_000)));
        let instance = Arc::new(AgentInstance::new(clock.clone()));
        let observations = Arc::new(ObservationBuffer::new(capacity));
        let assets = Arc::new(AssetBuffer::new(8));
        let engine = QueryEngine::new(
            clock.clone(),
            Arc::new(sample_model()),
            instance.clone(),
            observations.clone(),
            assets.clone(),
            QueryLimits::default(),
        );
        Fixture {
            clock,
            instance,
            observations,
            assets,
            engine,
        }
    }

    pub(crate) fn push(f: &Fixture, device: &str, item: &str, value: &str) -> u64 {
        f.observations
            .append(
                Observation::builder(device, item)
                    .category(Category::Sample)
                    .value(value)
                    .build(),
            )
            .unwrap()
    }

    #[test]
    fn header_reflects_buffer_state() {
        let f = fixture(5);
        for i in 0..7 {
            push(&f, "mill-uuid", "x", &i.to_string());
        }
        f.assets.upsert(AssetRecord::builder("T1", "CuttingTool").build());

        let header = f.engine.header();
        assert_eq!(header.instance_id, 1_000);
        assert_eq!(header.buffer_size, 5);
        assert_eq!(header.first_sequence, 3);
        assert_eq!(header.last_sequence, 7);
        assert_eq!(header.next_sequence, 8);
        assert_eq!(header.asset_buffer_size, 8);
        assert_eq!(header.asset_count, 1);
        assert_eq!(header.creation_time, Timestamp::from_secs(1_000));

        f.clock.advance(2_500);
        let later = f.engine.header();
        assert_eq!(later.creation_time, Timestamp::from_millis(1_002_500));
        assert_eq!(later.instance_id, 1_000);
    }

    #[test]
    fn probe_all_and_one() {
        let f = fixture(5);
        assert_eq!(f.engine.probe(None).unwrap().devices.len(), 2);
        assert_eq!(f.engine.probe(Some("lathe")).unwrap().devices[0].uuid, "lathe-uuid");
        assert_eq!(
            f.engine.probe(Some("drill")).unwrap_err().code(),
            ErrorCode::NoDevice
        );
    }

    #[test]
    fn sample_out_of_range_and_count() {
        let f = fixture(5);
        for i in 1..=10 {
            push(&f, "mill-uuid", "x", &i.to_string());
        }

        let err = f.engine.sample(&SampleRequest::new().from(3)).unwrap_err();
        assert_eq!(
            err,
            BufferError::OutOfRange {
                requested: 3,
                first: 6,
                next: 11
            }
        );

        let doc = f.engine.sample(&SampleRequest::new().from(7).count(2)).unwrap();
        let seqs: Vec<_> = doc.observations.iter().map(|o| o.sequence).collect();
        assert_eq!(seqs, vec![7, 8]);
        assert_eq!(doc.end_sequence, 9);
        assert_eq!(doc.header.first_sequence, 6);
    }

    #[test]
    fn sample_defaults_from_to_first() {
        let f = fixture(5);
        for i in 1..=8 {
            push(&f, "mill-uuid", "x", &i.to_string());
        }
        let doc = f.engine.sample(&SampleRequest::new()).unwrap();
        assert_eq!(doc.observations.first().map(|o| o.sequence), Some(4));
        assert_eq!(doc.end_sequence, 9);
    }

    #[test]
    fn sample_rejects_bad_parameters() {
        let f = fixture(5);
        push(&f, "mill-uuid", "x", "1");

        for request in [
            SampleRequest::new().count(0),
            SampleRequest::new().count(DEFAULT_MAX_COUNT as i64 + 1),
            SampleRequest::new().from(3).to(1),
            SampleRequest::new().path("not a path"),
        ] {
            assert!(
                matches!(f.engine.sample(&request), Err(BufferError::InvalidRequest(_))),
                "{:?}",
                request
            );
        }
        assert!(matches!(
            f.engine.sample(&SampleRequest::new().device("drill")),
            Err(BufferError::UnknownDevice(_))
        ));
    }

    #[test]
    fn sample_filters_by_device() {
        let f = fixture(10);
        push(&f, "mill-uuid", "x", "1");
        push(&f, "lathe-uuid", "z", "2");
        push(&f, "mill-uuid", "x", "3");

        let doc = f
            .engine
            .sample(&SampleRequest::new().device("lathe"))
            .unwrap();
        assert_eq!(doc.observations.len(), 1);
        assert_eq!(doc.observations[0].data_item, "z");
        assert_eq!(doc.end_sequence, 4);
    }

    #[test]
    fn current_with_at_clamps_header() {
        let f = fixture(10);
        push(&f, "mill-uuid", "x", "1");
        push(&f, "mill-uuid", "x", "2");
        push(&f, "mill-uuid", "x", "3");

        let doc = f.engine.current(&CurrentRequest::new().at(2)).unwrap();
        assert_eq!(doc.header.last_sequence, 2);
        assert_eq!(doc.get("mill-uuid", "x").and_then(|o| o.value()), Some("2"));

        let now = f.engine.current(&CurrentRequest::new()).unwrap();
        assert_eq!(now.header.last_sequence, 3);
        assert_eq!(now.get("mill-uuid", "x").and_then(|o| o.value()), Some("3"));

        assert!(matches!(
            f.engine.current(&CurrentRequest::new().at(9)),
            Err(BufferError::OutOfRange { .. })
        ));
    }

    #[test]
    fn current_with_path() {
        let f = fixture(10);
        push(&f, "mill-uuid", "x", "1");
        push(&f, "mill-uuid", "avail", "AVAILABLE");

        let doc = f
            .engine
            .current(&CurrentRequest::new().path(r#"//DataItem[@type="AVAILABILITY"]"#))
            .unwrap();
        assert_eq!(doc.observations.len(), 1);
        assert_eq!(doc.observations[0].data_item, "avail");
    }

    #[test]
    fn asset_queries() {
        let f = fixture(5);
        f.assets.upsert(
            AssetRecord::builder("T1", "CuttingTool")
                .device("mill-uuid")
                .build(),
        );
        f.assets
            .upsert(AssetRecord::builder("F1", "File").device("lathe-uuid").build());

        let doc = f
            .engine
            .assets(&AssetRequest {
                device: Some("mill".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(doc.assets.len(), 1);
        assert_eq!(doc.assets[0].asset_id, "T1");

        let both = f.engine.asset(&["F1", "T1"]).unwrap();
        assert_eq!(both.assets[0].asset_id, "F1");
        assert_eq!(
            f.engine.asset(&["T1", "nope"]).unwrap_err().code(),
            ErrorCode::AssetNotFound
        );
    }

    #[test]
    fn error_document_carries_header() {
        let f = fixture(5);
        let doc = f
            .engine
            .error_document(&BufferError::InvalidRequest("bad".to_string()));
        assert_eq!(doc.code(), Some(ErrorCode::InvalidRequest));
        assert_eq!(doc.header.instance_id, f.instance.id());
    }
}
