//! The agent: owns the buffers and wires the components together.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mtconnect_types::DeviceDescription;
use tokio::sync::mpsc;

use crate::assets::AssetBuffer;
use crate::clock::{Clock, SystemClock};
use crate::gateway::IngestionGateway;
use crate::instance::AgentInstance;
use crate::metrics::{MetricsCollector, MetricsHandle, DEFAULT_SMOOTHING};
use crate::model::{DeviceModel, StaticDeviceModel};
use crate::observations::ObservationBuffer;
use crate::query::{QueryEngine, QueryLimits};
use crate::stream::{StreamFrame, StreamOptions, StreamSession};

/// Default observation buffer capacity.
pub const DEFAULT_BUFFER_SIZE: usize = 131_072;

/// Default asset buffer capacity.
pub const DEFAULT_MAX_ASSETS: usize = 1024;

/// An MTConnect agent's in-memory state.
///
/// Constructed once at startup and shared behind an `Arc`.
///
/// # Example
///
/// ```rust
/// use mtconnect_buffer::{Agent, CurrentRequest};
///
/// let agent = Agent::builder().buffer_size(1024).build();
/// let doc = agent.query().current(&CurrentRequest::new()).unwrap();
/// assert!(doc.observations.is_empty());
/// ```
#[derive(Debug)]
pub struct Agent {
    clock: Arc<dyn Clock>,
    instance: Arc<AgentInstance>,
    observations: Arc<ObservationBuffer>,
    assets: Arc<AssetBuffer>,
    metrics: Arc<MetricsCollector>,
    gateway: IngestionGateway,
    query: QueryEngine,
}

impl Agent {
    /// Create a builder for an agent.
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    /// The ingestion side.
    pub fn gateway(&self) -> &IngestionGateway {
        &self.gateway
    }

    /// The query side.
    pub fn query(&self) -> &QueryEngine {
        &self.query
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn instance(&self) -> &Arc<AgentInstance> {
        &self.instance
    }

    pub fn observations(&self) -> &Arc<ObservationBuffer> {
        &self.observations
    }

    pub fn assets(&self) -> &Arc<AssetBuffer> {
        &self.assets
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Open a sample stream.
    pub fn stream(&self, options: StreamOptions) -> (StreamSession, mpsc::Receiver<StreamFrame>) {
        StreamSession::start(self.query.clone(), options)
    }

    /// Start recomputing metric rates every `interval`.
    pub fn start_metrics(&self, interval: Duration) -> MetricsHandle {
        self.metrics.start(interval)
    }

    /// Invalidate all history: new instance id, empty buffer, sequences from 1.
    ///
    /// Active streams end with an instance mismatch. Assets are kept.
    pub fn reset(&self) -> u64 {
        let instance_id = self.observations.reset_with(|| self.instance.regenerate());
        tracing::info!(instance_id, "buffer reset");
        instance_id
    }
}

/// Builder for [`Agent`].
#[derive(Debug)]
pub struct AgentBuilder {
    clock: Option<Arc<dyn Clock>>,
    model: Option<Arc<dyn DeviceModel>>,
    buffer_size: usize,
    max_assets: usize,
    max_assets_per_type: HashMap<String, usize>,
    limits: QueryLimits,
    smoothing: f64,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            clock: None,
            model: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_assets: DEFAULT_MAX_ASSETS,
            max_assets_per_type: HashMap::new(),
            limits: QueryLimits::default(),
            smoothing: DEFAULT_SMOOTHING,
        }
    }

    /// Use a specific time source. Defaults to the system clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use a device model.
    pub fn model(mut self, model: Arc<dyn DeviceModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Use a fixed list of devices.
    pub fn devices(self, devices: Vec<DeviceDescription>) -> Self {
        self.model(Arc::new(StaticDeviceModel::new(devices)))
    }

    /// Set the observation buffer capacity.
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Set the asset buffer capacity.
    pub fn max_assets(mut self, max: usize) -> Self {
        self.max_assets = max;
        self
    }

    /// Limit the number of assets of one type.
    pub fn max_assets_of_type(mut self, asset_type: impl Into<String>, max: usize) -> Self {
        self.max_assets_per_type.insert(asset_type.into(), max);
        self
    }

    /// Set sample count bounds.
    pub fn limits(mut self, limits: QueryLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the metrics smoothing factor.
    pub fn smoothing(mut self, alpha: f64) -> Self {
        self.smoothing = alpha;
        self
    }

    /// Build the agent.
    pub fn build(self) -> Agent {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let model = self
            .model
            .unwrap_or_else(|| Arc::new(StaticDeviceModel::default()));

        let instance = Arc::new(AgentInstance::new(clock.clone()));
        let observations = Arc::new(ObservationBuffer::new(self.buffer_size));
        let assets = Arc::new(AssetBuffer::with_type_limits(
            self.max_assets,
            self.max_assets_per_type,
        ));
        let metrics = Arc::new(MetricsCollector::new(clock.clone(), self.smoothing));

        let gateway = IngestionGateway::new(
            model.clone(),
            observations.clone(),
            assets.clone(),
            metrics.clone(),
        );
        let query = QueryEngine::new(
            clock.clone(),
            model,
            instance.clone(),
            observations.clone(),
            assets.clone(),
            self.limits,
        );

        tracing::info!(
            instance_id = instance.id(),
            buffer_size = observations.capacity(),
            max_assets = assets.capacity(),
            "agent created"
        );

        Agent {
            clock,
            instance,
            observations,
            assets,
            metrics,
            gateway,
            query,
        }
    }
}
