use std::fmt;

use serde::{Deserialize, Serialize};

/// A destination on the chat platform: a channel inside a community.
///
/// Two addresses match only when both components are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    pub community: u64,
    pub channel: u64,
}

impl Address {
    pub fn new(community: u64, channel: u64) -> Self {
        Self { community, channel }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.community, self.channel)
    }
}
