//! Extensions bridge configuration.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Capacity of the observer broadcast channel.
    pub event_capacity: usize,
    /// Inbound frames larger than this are rejected before parsing.
    pub max_frame_bytes: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            event_capacity: 256,
            max_frame_bytes: 1024 * 1024,
        }
    }
}
