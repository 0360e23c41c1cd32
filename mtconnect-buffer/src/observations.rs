//! The bounded, sequence-numbered observation log.
//!
//! Observations are appended under a single write lock that also allocates
//! their sequence numbers, so the log is always contiguous:
//! `log[i].sequence == first_sequence + i`. Readers take the read lock and
//! therefore always see one consistent window.
//!
//! Besides the log the buffer keeps two checkpoint indexes of shared
//! pointers, never copies:
//!
//! - `latest`: newest observation per data item over the whole history, which
//!   answers `current` without scanning and survives eviction;
//! - `evicted`: newest *evicted* observation per data item, the state just
//!   before `first_sequence`, used to rebuild `current` as of a past sequence.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use mtconnect_types::{BufferWindow, Observation, PendingObservation};
use parking_lot::RwLock;
use tokio::sync::watch;

use crate::error::{BufferError, Result};
use crate::filter::ObservationFilter;
use crate::sequence::SequenceAllocator;

type DataItemKey = (String, String);

fn key_of(observation: &Observation) -> DataItemKey {
    let (device, data_item) = observation.key();
    (device.to_string(), data_item.to_string())
}

/// Result of a range read.
#[derive(Debug, Clone)]
pub struct RangeResult {
    /// Matching observations in ascending sequence order.
    pub observations: Vec<Arc<Observation>>,

    /// Sequence following the last scanned record.
    ///
    /// Resuming from here never skips and never repeats an observation, even
    /// when the filter rejected everything that was scanned.
    pub end_sequence: u64,

    /// The window at the time of the read.
    pub window: BufferWindow,
}

/// Latest value per data item, consistent with `window.last_sequence`.
#[derive(Debug, Clone)]
pub struct LatestSnapshot {
    /// One observation per (device, data item), ordered by device then data item.
    pub observations: Vec<Arc<Observation>>,

    /// Window the snapshot was taken against. For a historical snapshot
    /// `last_sequence` is the requested sequence.
    pub window: BufferWindow,
}

#[derive(Debug)]
struct Inner {
    log: VecDeque<Arc<Observation>>,
    first_sequence: u64,
    latest: HashMap<DataItemKey, Arc<Observation>>,
    evicted: HashMap<DataItemKey, Arc<Observation>>,
}

/// Bounded circular log of observations keyed by sequence number.
#[derive(Debug)]
pub struct ObservationBuffer {
    capacity: usize,
    sequences: SequenceAllocator,
    inner: RwLock<Inner>,
    appended: watch::Sender<u64>,
}

impl ObservationBuffer {
    /// Create a buffer retaining at most `capacity` observations (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self::with_allocator(capacity, SequenceAllocator::new())
    }

    /// Create a buffer drawing sequence numbers from `sequences`.
    pub fn with_allocator(capacity: usize, sequences: SequenceAllocator) -> Self {
        let next = sequences.peek();
        let capacity = capacity.max(1);
        let (appended, _) = watch::channel(next);
        Self {
            capacity,
            sequences,
            inner: RwLock::new(Inner {
                log: VecDeque::with_capacity(capacity.min(4096)),
                first_sequence: next,
                latest: HashMap::new(),
                evicted: HashMap::new(),
            }),
            appended,
        }
    }

    /// Maximum number of retained observations.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of retained observations.
    pub fn len(&self) -> usize {
        self.inner.read().log.len()
    }

    /// Check if nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.inner.read().log.is_empty()
    }

    /// The current window.
    pub fn window(&self) -> BufferWindow {
        let inner = self.inner.read();
        self.window_locked(&inner)
    }

    /// Run `f` on the current window while holding the read lock, so a
    /// concurrent [`reset_with`](Self::reset_with) is either fully before
    /// or fully after it.
    pub fn with_window<T>(&self, f: impl FnOnce(BufferWindow) -> T) -> T {
        let inner = self.inner.read();
        f(self.window_locked(&inner))
    }

    // Callers must hold the lock so `peek` agrees with the log.
    fn window_locked(&self, inner: &Inner) -> BufferWindow {
        BufferWindow::new(inner.first_sequence, self.sequences.peek())
    }

    /// Watch the next sequence number. Changes on every append and reset.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.appended.subscribe()
    }

    /// Append an observation and return the sequence it was assigned.
    ///
    /// Evicts the oldest observation once the buffer is over capacity. A
    /// failed allocation leaves the buffer untouched.
    pub fn append(&self, pending: PendingObservation) -> Result<u64> {
        let sequence = {
            let mut inner = self.inner.write();
            let sequence = self.sequences.next()?;

            let observation = Arc::new(pending.with_sequence(sequence));
            inner.latest.insert(key_of(&observation), observation.clone());
            inner.log.push_back(observation);

            while inner.log.len() > self.capacity {
                if let Some(oldest) = inner.log.pop_front() {
                    inner.evicted.insert(key_of(&oldest), oldest);
                }
            }
            inner.first_sequence = inner
                .log
                .front()
                .map(|o| o.sequence)
                .unwrap_or(sequence + 1);

            sequence
        };

        self.appended.send_replace(sequence + 1);
        Ok(sequence)
    }

    /// Read observations with sequence in `[from, to]`.
    ///
    /// `to` defaults to, and is clamped at, the last sequence. A positive
    /// `count` returns at most that many matches starting at `from`; a negative
    /// `count` returns the last `|count|` matches ending at `to`. A `count` of
    /// zero returns nothing.
    ///
    /// Fails with [`BufferError::OutOfRange`] if `from` precedes the first
    /// retained sequence or lies beyond the next sequence.
    pub fn range(
        &self,
        from: u64,
        to: Option<u64>,
        count: i64,
        filter: &ObservationFilter,
    ) -> Result<RangeResult> {
        let inner = self.inner.read();
        let window = self.window_locked(&inner);

        if !window.accepts_cursor(from) {
            return Err(BufferError::OutOfRange {
                requested: from,
                first: window.first_sequence,
                next: window.next_sequence,
            });
        }

        let last = to
            .map(|t| t.min(window.last_sequence))
            .unwrap_or(window.last_sequence);

        if from > last || count == 0 || window.is_empty() {
            return Ok(RangeResult {
                observations: Vec::new(),
                end_sequence: from,
                window,
            });
        }

        let start = (from - window.first_sequence) as usize;
        let end = (last - window.first_sequence) as usize;
        let limit = count.unsigned_abs() as usize;
        let scanned = inner.log.range(start..=end);

        let mut observations = Vec::new();
        let mut end_sequence = last + 1;

        if count > 0 {
            for observation in scanned {
                if filter.matches(observation) {
                    observations.push(observation.clone());
                    if observations.len() == limit {
                        end_sequence = observation.sequence + 1;
                        break;
                    }
                }
            }
        } else {
            for observation in scanned.rev() {
                if filter.matches(observation) {
                    observations.push(observation.clone());
                    if observations.len() == limit {
                        break;
                    }
                }
            }
            observations.reverse();
        }

        Ok(RangeResult {
            observations,
            end_sequence,
            window,
        })
    }

    /// The newest observation per data item matching `filter`.
    pub fn latest(&self, filter: &ObservationFilter) -> LatestSnapshot {
        let inner = self.inner.read();
        let window = self.window_locked(&inner);

        let mut observations: Vec<_> = inner
            .latest
            .values()
            .filter(|o| filter.matches(o))
            .cloned()
            .collect();
        sort_by_key(&mut observations);

        LatestSnapshot {
            observations,
            window,
        }
    }

    /// The newest observation per data item as of sequence `at`.
    ///
    /// `at` must lie within `[first_sequence, next_sequence]`.
    pub fn latest_at(&self, at: u64, filter: &ObservationFilter) -> Result<LatestSnapshot> {
        let inner = self.inner.read();
        let mut window = self.window_locked(&inner);

        if !window.accepts_cursor(at) {
            return Err(BufferError::OutOfRange {
                requested: at,
                first: window.first_sequence,
                next: window.next_sequence,
            });
        }

        let mut state: HashMap<DataItemKey, &Arc<Observation>> = inner
            .evicted
            .iter()
            .filter(|(_, o)| filter.matches(o))
            .map(|(k, o)| (k.clone(), o))
            .collect();

        for observation in inner.log.iter().take_while(|o| o.sequence <= at) {
            if filter.matches(observation) {
                state.insert(key_of(observation), observation);
            }
        }

        let mut observations: Vec<_> = state.into_values().cloned().collect();
        sort_by_key(&mut observations);

        window.last_sequence = at.min(window.last_sequence);
        Ok(LatestSnapshot {
            observations,
            window,
        })
    }

    /// Discard all history and reseed sequences at 1.
    ///
    /// Only valid together with an agent instance change.
    pub fn reset(&self) {
        self.reset_with(|| ());
    }

    /// Discard all history and run `during` before releasing the write lock.
    ///
    /// `during` must not touch this buffer.
    pub fn reset_with<T>(&self, during: impl FnOnce() -> T) -> T {
        let result = {
            let mut inner = self.inner.write();
            inner.log.clear();
            inner.latest.clear();
            inner.evicted.clear();
            self.sequences.reset();
            inner.first_sequence = self.sequences.peek();
            during()
        };
        self.appended.send_replace(self.sequences.peek());
        result
    }
}

fn sort_by_key(observations: &mut [Arc<Observation>]) {
    observations.sort_by(|a, b| {
        a.device
            .cmp(&b.device)
            .then_with(|| a.data_item.cmp(&b.data_item))
    });
}
