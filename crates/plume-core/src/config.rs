use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_RELAYS, DISCOVERY_RELAYS};

/// Relay configuration for the timeline core.
///
/// `relays` is the primary set used for timeline queries and publishes;
/// `discovery_relays` is only consulted as a fallback when a follow list
/// cannot be found on the primary set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    pub relays: Vec<String>,
    pub discovery_relays: Vec<String>,
}

impl CoreConfig {
    pub fn new(relays: Vec<String>, discovery_relays: Vec<String>) -> Self {
        Self {
            relays,
            discovery_relays,
        }
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            relays: DEFAULT_RELAYS.iter().map(|s| s.to_string()).collect(),
            discovery_relays: DISCOVERY_RELAYS.iter().map(|s| s.to_string()).collect(),
        }
    }
}
