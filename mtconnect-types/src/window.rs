//! Buffer window and the header every document carries.

use crate::{SchemaVersion, Timestamp};

/// The contiguous range of sequence numbers currently retained by the buffer.
///
/// Derived on demand, never stored. `first_sequence == next_sequence` means
/// the buffer is empty; `last_sequence` is `next_sequence - 1` (0 before the
/// first append).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BufferWindow {
    /// Oldest retained sequence.
    pub first_sequence: u64,
    /// Newest assigned sequence.
    pub last_sequence: u64,
    /// Sequence the next append will receive.
    pub next_sequence: u64,
}

impl BufferWindow {
    /// Build a window from the first retained and next unassigned sequence.
    pub const fn new(first_sequence: u64, next_sequence: u64) -> Self {
        Self {
            first_sequence,
            last_sequence: next_sequence.saturating_sub(1),
            next_sequence,
        }
    }

    /// Check if no observation is retained.
    pub const fn is_empty(&self) -> bool {
        self.first_sequence >= self.next_sequence
    }

    /// Number of retained observations.
    pub const fn len(&self) -> u64 {
        self.next_sequence.saturating_sub(self.first_sequence)
    }

    /// Check if `sequence` is a retained observation.
    pub const fn contains(&self, sequence: u64) -> bool {
        sequence >= self.first_sequence && sequence < self.next_sequence
    }

    /// Check if `sequence` is a valid resume point (retained or the next to come).
    pub const fn accepts_cursor(&self, sequence: u64) -> bool {
        sequence >= self.first_sequence && sequence <= self.next_sequence
    }
}

/// Tagging attached to every query result so callers can detect rollover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Header {
    /// Identifier of the agent instance that produced the document.
    pub instance_id: u64,

    /// Schema version of the document.
    pub version: SchemaVersion,

    /// When the document was created.
    pub creation_time: Timestamp,

    /// Capacity of the observation buffer.
    pub buffer_size: u64,

    /// Oldest retained sequence at query time.
    pub first_sequence: u64,

    /// Newest sequence covered by the document.
    pub last_sequence: u64,

    /// Sequence the next append will receive.
    pub next_sequence: u64,

    /// Capacity of the asset buffer.
    pub asset_buffer_size: u64,

    /// Number of live (non-removed) assets.
    pub asset_count: u64,
}

impl Header {
    /// The buffer window this header describes.
    pub const fn window(&self) -> BufferWindow {
        BufferWindow {
            first_sequence: self.first_sequence,
            last_sequence: self.last_sequence,
            next_sequence: self.next_sequence,
        }
    }
}
