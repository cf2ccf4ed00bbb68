//! Wire protocol versioning
//!
//! Every framed message carries the sender's protocol version. Only
//! the major number is breaking; minor and patch levels track additive
//! changes and are tolerated in both directions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic version stamped on every wire message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

/// Version spoken by this build
pub const CURRENT_VERSION: ProtocolVersion = ProtocolVersion::new(1, 0, 0);

impl ProtocolVersion {
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Whether two versions can talk to each other
    pub fn interoperates_with(&self, other: &ProtocolVersion) -> bool {
        self.major == other.major
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
