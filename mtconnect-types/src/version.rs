//! Schema versioning reported in response headers.

use core::fmt;

use crate::{SCHEMA_MINOR_VERSION, SCHEMA_VERSION};

/// MTConnect schema version information embedded in document headers.
///
/// Clients use this to decide how to interpret the documents they receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SchemaVersion {
    /// Major version - breaking changes increment this.
    pub major: u32,

    /// Minor version - backwards-compatible additions increment this.
    pub minor: u32,
}

impl SchemaVersion {
    /// Create a new schema version.
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// The schema version served by this agent.
    pub const fn current() -> Self {
        Self {
            major: SCHEMA_VERSION,
            minor: SCHEMA_MINOR_VERSION,
        }
    }
}

impl Default for SchemaVersion {
    fn default() -> Self {
        Self::current()
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_dotted() {
        assert_eq!(SchemaVersion::new(2, 2).to_string(), "2.2");
    }
}
