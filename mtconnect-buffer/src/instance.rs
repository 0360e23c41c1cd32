//! Agent instance identity.

use std::sync::Arc;

use mtconnect_types::Timestamp;
use parking_lot::RwLock;
use tokio::sync::watch;

use crate::clock::Clock;
use crate::error::{BufferError, Result};

/// Identity of the running agent's buffer history.
///
/// The instance id is derived from the start time in seconds and changes
/// whenever the buffer history is invalidated. Any change means every
/// sequence number handed out before it is meaningless.
#[derive(Debug)]
pub struct AgentInstance {
    clock: Arc<dyn Clock>,
    start_time: RwLock<Timestamp>,
    id: watch::Sender<u64>,
}

impl AgentInstance {
    /// Create an instance whose id is the clock's current time in seconds.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        let (id, _) = watch::channel(now.as_secs().max(1));
        Self {
            clock,
            start_time: RwLock::new(now),
            id,
        }
    }

    /// The current instance id.
    pub fn id(&self) -> u64 {
        *self.id.borrow()
    }

    /// When the current instance started.
    pub fn start_time(&self) -> Timestamp {
        *self.start_time.read()
    }

    /// Watch for instance id changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.id.subscribe()
    }

    /// Verify a client-presented instance id.
    pub fn check(&self, presented: u64) -> Result<()> {
        let current = self.id();
        if presented == current {
            Ok(())
        } else {
            Err(BufferError::InstanceMismatch { presented, current })
        }
    }

    /// Start a new instance and return its id.
    ///
    /// The new id is the current time in seconds, or the old id plus one if
    /// the clock has not moved past it, so it always differs.
    pub fn regenerate(&self) -> u64 {
        let now = self.clock.now();
        *self.start_time.write() = now;

        let mut new_id = 0;
        self.id.send_modify(|id| {
            *id = now.as_secs().max(*id + 1);
            new_id = *id;
        });
        new_id
    }
}
