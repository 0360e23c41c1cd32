//! Wall-clock timestamps for observations and assets.
//!
//! All timestamps are milliseconds since the Unix epoch, matching what
//! adapters report and what clients expect in documents.

use core::time::Duration;

/// Milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// The Unix epoch.
    pub const EPOCH: Timestamp = Timestamp(0);

    /// Create from milliseconds since the epoch.
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Create from seconds since the epoch.
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs * 1000)
    }

    /// Get the value in milliseconds.
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Get the value in seconds (truncated).
    pub const fn as_secs(&self) -> u64 {
        self.0 / 1000
    }

    /// Time elapsed from `earlier` to `self`, saturating at zero.
    pub fn saturating_duration_since(&self, earlier: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }

    /// The current wall-clock time.
    #[cfg(feature = "std")]
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| Self(d.as_millis() as u64))
            .unwrap_or(Self::EPOCH)
    }
}

impl From<Duration> for Timestamp {
    fn from(since_epoch: Duration) -> Self {
        Self(since_epoch.as_millis() as u64)
    }
}

impl From<u64> for Timestamp {
    fn from(millis: u64) -> Self {
        Self(millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions() {
        let t = Timestamp::from_secs(5);
        assert_eq!(t.as_millis(), 5000);
        assert_eq!(t.as_secs(), 5);

        let d = Timestamp::from(Duration::from_millis(1500));
        assert_eq!(d.as_millis(), 1500);
        assert_eq!(d.as_secs(), 1);
    }

    #[test]
    fn duration_since_saturates() {
        let a = Timestamp::from_millis(1000);
        let b = Timestamp::from_millis(1750);
        assert_eq!(b.saturating_duration_since(a), Duration::from_millis(750));
        assert_eq!(a.saturating_duration_since(b), Duration::ZERO);
    }

    #[test]
    fn ordering() {
        assert!(Timestamp::from_millis(1) < Timestamp::from_millis(2));
        assert_eq!(Timestamp::default(), Timestamp::EPOCH);
    }

    #[cfg(feature = "std")]
    #[test]
    fn now_is_after_2020() {
        assert!(Timestamp::now().as_secs() > 1_577_836_800);
    }
}
