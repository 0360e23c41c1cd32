//! Long-lived sample streams with heartbeats.
//!
//! A [`StreamSession`] owns a cursor into the observation buffer and pushes
//! [`StreamFrame`]s into a bounded channel. It suspends only while waiting
//! for new data, so an idle stream costs one parked task and a timer.
//!
//! ```text
//! INIT -> STREAMING -> HEARTBEAT_WAIT -> DATA_READY -> STREAMING -> ...
//!                           |   ^
//!                           +---+ heartbeat
//! any state -> STOPPED (stop, client gone, instance change, query error)
//! ```

use std::time::Duration;

use mtconnect_types::{ErrorDocument, Header, SampleDocument};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::error::{BufferError, Result};
use crate::filter::ObservationFilter;
use crate::query::QueryEngine;

/// Heartbeat used when none is requested.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(10);

/// Frames buffered per session before the producer waits.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// One unit of output for a streaming client.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    /// New observations. Never empty.
    Data(SampleDocument),

    /// Nothing new within the heartbeat interval.
    ///
    /// `end_sequence` is the session cursor: the resume point covering
    /// everything sent so far, never past an unsent observation.
    Heartbeat { header: Header, end_sequence: u64 },

    /// The session failed. Always the last frame.
    Error(ErrorDocument),
}

impl StreamFrame {
    /// Check if this frame ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamFrame::Error(_))
    }
}

/// Lifecycle of a stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Streaming,
    HeartbeatWait,
    DataReady,
    Stopped,
}

/// Parameters of a stream session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOptions {
    pub device: Option<String>,
    pub path: Option<String>,

    /// Resume point. Defaults to the first retained sequence.
    pub from: Option<u64>,

    /// Instance id the resume point belongs to.
    pub instance_id: Option<u64>,

    /// Maximum observations per data frame. Must be positive.
    pub count: Option<i64>,

    /// Minimum delay between data frames.
    pub interval: Duration,

    /// Maximum silence before a heartbeat frame.
    pub heartbeat: Duration,

    pub channel_capacity: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            device: None,
            path: None,
            from: None,
            instance_id: None,
            count: None,
            interval: Duration::ZERO,
            heartbeat: DEFAULT_HEARTBEAT,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl StreamOptions {
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

    pub fn instance_id(mut self, instance_id: u64) -> Self {
        self.instance_id = Some(instance_id);
        self
    }

    pub fn count(mut self, count: i64) -> Self {
        self.count = Some(count);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the heartbeat. Zero is replaced by the default.
    pub fn heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = if heartbeat.is_zero() {
            DEFAULT_HEARTBEAT
        } else {
            heartbeat
        };
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }
}

struct Start {
    filter: ObservationFilter,
    count: i64,
    from: u64,
}

fn prepare(engine: &QueryEngine, options: &StreamOptions) -> Result<Start> {
    if let Some(presented) = options.instance_id {
        engine.check_instance(presented)?;
    }
    let filter = engine.resolve_filter(options.device.as_deref(), options.path.as_deref())?;
    let count = engine.checked_count(options.count)?;
    if count < 0 {
        // A tail read would move the cursor past the records it skipped.
        return Err(BufferError::InvalidRequest(format!(
            "stream count must be positive, got {}",
            count
        )));
    }

    let window = engine.window();
    let from = options.from.unwrap_or(window.first_sequence);
    if !window.accepts_cursor(from) {
        return Err(BufferError::OutOfRange {
            requested: from,
            first: window.first_sequence,
            next: window.next_sequence,
        });
    }

    Ok(Start { filter, count, from })
}

/// Handle to a running stream.
///
/// Dropping the handle stops the session, as does dropping the frame
/// receiver.
#[derive(Debug)]
pub struct StreamSession {
    state: watch::Receiver<SessionState>,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl StreamSession {
    /// Check that a session with these options would start.
    ///
    /// Lets a server answer with a plain error response instead of opening
    /// a stream that immediately fails.
    pub fn validate(engine: &QueryEngine, options: &StreamOptions) -> Result<()> {
        prepare(engine, options).map(|_| ())
    }

    /// Spawn a session. Must be called from within a tokio runtime.
    ///
    /// Start-up failures (instance mismatch, out of range resume point,
    /// bad filter) are delivered as a single error frame.
    pub fn start(engine: QueryEngine, options: StreamOptions) -> (Self, mpsc::Receiver<StreamFrame>) {
        let (tx, rx) = mpsc::channel(options.channel_capacity.max(1));
        let (state_tx, state) = watch::channel(SessionState::Init);
        let (stop_tx, stop_rx) = watch::channel(false);

        let runner = Runner {
            engine,
            options,
            tx,
            state: state_tx,
            stop: stop_rx,
        };
        let task = tokio::spawn(runner.run());

        (
            Self {
                state,
                stop_tx,
                task,
            },
            rx,
        )
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Ask the session to stop. It finishes without an error frame.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Wait for the session task to finish.
    pub async fn join(self) {
        let Self { task, stop_tx, .. } = self;
        if let Err(e) = task.await {
            tracing::error!("stream session task failed: {}", e);
        }
        drop(stop_tx);
    }
}

enum Wake {
    Data,
    Heartbeat,
    Stop,
    InstanceChanged(u64),
}

struct Runner {
    engine: QueryEngine,
    options: StreamOptions,
    tx: mpsc::Sender<StreamFrame>,
    state: watch::Sender<SessionState>,
    stop: watch::Receiver<bool>,
}

impl Runner {
    async fn run(mut self) {
        // Subscribe before reading the window so no append is missed.
        let mut appends = self.engine.subscribe_appends();
        let mut instance_rx = self.engine.subscribe_instance();
        let instance_id = *instance_rx.borrow_and_update();

        let start = match prepare(&self.engine, &self.options) {
            Ok(start) => start,
            Err(e) => {
                tracing::debug!("stream rejected: {}", e);
                self.fail(&e).await;
                return;
            }
        };
        tracing::debug!(from = start.from, instance_id, "stream started");

        let heartbeat = self.options.heartbeat;
        let interval = self.options.interval;
        let mut cursor = start.from;
        let mut last_emit = Instant::now();
        let mut last_data: Option<Instant> = None;

        'session: loop {
            self.set_state(SessionState::Streaming);

            if let Some(previous) = last_data.filter(|_| !interval.is_zero()) {
                if !self.pause_until(previous + interval).await {
                    break;
                }
            }

            let current = *instance_rx.borrow_and_update();
            if current != instance_id {
                self.instance_changed(instance_id, current).await;
                break;
            }

            appends.borrow_and_update();
            match self
                .engine
                .sample_filtered(Some(cursor), None, start.count, &start.filter)
            {
                Ok(doc) => {
                    cursor = doc.end_sequence;
                    if !doc.is_empty() {
                        if !self.emit(StreamFrame::Data(doc)).await {
                            break;
                        }
                        let now = Instant::now();
                        last_emit = now;
                        last_data = Some(now);
                        continue;
                    }
                }
                Err(e) => {
                    tracing::debug!(cursor, "stream failed: {}", e);
                    self.fail(&e).await;
                    break;
                }
            }

            self.set_state(SessionState::HeartbeatWait);
            loop {
                let wake = tokio::select! {
                    biased;
                    _ = self.stop.changed() => Wake::Stop,
                    _ = self.tx.closed() => Wake::Stop,
                    changed = instance_rx.changed() => match changed {
                        Ok(()) => Wake::InstanceChanged(*instance_rx.borrow_and_update()),
                        Err(_) => Wake::Stop,
                    },
                    changed = appends.changed() => match changed {
                        Ok(()) => Wake::Data,
                        Err(_) => Wake::Stop,
                    },
                    _ = sleep_until(last_emit + heartbeat) => Wake::Heartbeat,
                };

                match wake {
                    Wake::Data => {
                        self.set_state(SessionState::DataReady);
                        continue 'session;
                    }
                    Wake::Heartbeat => {
                        let frame = StreamFrame::Heartbeat {
                            header: self.engine.header(),
                            end_sequence: cursor,
                        };
                        if !self.emit(frame).await {
                            break 'session;
                        }
                        last_emit = Instant::now();
                    }
                    Wake::InstanceChanged(current) if current != instance_id => {
                        self.instance_changed(instance_id, current).await;
                        break 'session;
                    }
                    Wake::InstanceChanged(_) => {}
                    Wake::Stop => break 'session,
                }
            }
        }

        self.set_state(SessionState::Stopped);
        tracing::debug!(cursor, "stream stopped");
    }

    fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    /// Send a frame, waiting for capacity. Returns false if the session
    /// should stop.
    async fn emit(&mut self, frame: StreamFrame) -> bool {
        tokio::select! {
            biased;
            _ = self.stop.changed() => false,
            sent = self.tx.send(frame) => sent.is_ok(),
        }
    }

    /// Sleep until `deadline`. Returns false if the session should stop.
    async fn pause_until(&mut self, deadline: Instant) -> bool {
        tokio::select! {
            biased;
            _ = self.stop.changed() => false,
            _ = self.tx.closed() => false,
            _ = sleep_until(deadline) => true,
        }
    }

    async fn instance_changed(&mut self, presented: u64, current: u64) {
        tracing::info!(presented, current, "agent instance changed, ending stream");
        self.fail(&BufferError::InstanceMismatch { presented, current })
            .await;
    }

    async fn fail(&mut self, error: &BufferError) {
        let doc = self.engine.error_document(error);
        self.emit(StreamFrame::Error(doc)).await;
        self.set_state(SessionState::Stopped);
    }
}
