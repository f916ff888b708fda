use std::sync::Arc;

use nostr::Timestamp;
use parking_lot::RwLock;

use crate::relay::transport::RelayTransport;

/// Connection state of a single relay, as last observed by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayLiveness {
    Connected,
    Connecting,
    Disconnected,
    Error,
}

/// Traffic bookkeeping for a single relay.
///
/// Mutated only by the executor after observing traffic; everyone else
/// reads snapshots.
#[derive(Debug, Clone)]
pub struct RelayEndpointInfo {
    pub url: String,
    pub liveness: RelayLiveness,
    /// Unix seconds of the last operation that touched this relay
    pub last_used_at: Option<u64>,
    pub events_received: u64,
    /// Unix seconds when this endpoint entered the set
    pub first_observed: u64,
    /// Unix seconds of the last bookkeeping update
    pub last_updated: u64,
}

impl RelayEndpointInfo {
    fn new(url: String) -> Self {
        let now = Timestamp::now().as_u64();
        Self {
            url,
            liveness: RelayLiveness::Connecting,
            last_used_at: None,
            events_received: 0,
            first_observed: now,
            last_updated: now,
        }
    }
}

/// One relay in a [`RelaySet`]: its transport plus shared bookkeeping.
#[derive(Clone)]
pub struct RelayEndpoint {
    info: Arc<RwLock<RelayEndpointInfo>>,
    transport: Arc<dyn RelayTransport>,
}

impl RelayEndpoint {
    pub fn new(transport: Arc<dyn RelayTransport>) -> Self {
        let info = RelayEndpointInfo::new(transport.url().to_string());
        Self {
            info: Arc::new(RwLock::new(info)),
            transport,
        }
    }

    pub fn url(&self) -> String {
        self.info.read().url.clone()
    }

    pub fn transport(&self) -> Arc<dyn RelayTransport> {
        self.transport.clone()
    }

    pub fn snapshot(&self) -> RelayEndpointInfo {
        self.info.read().clone()
    }

    /// Record that an operation is about to use this relay.
    pub fn touch_used(&self) {
        let now = Timestamp::now().as_u64();
        let mut info = self.info.write();
        info.last_used_at = Some(now);
        info.last_updated = now;
    }

    /// Record one event received from this relay.
    pub fn record_event(&self) {
        let mut info = self.info.write();
        info.events_received += 1;
        info.liveness = RelayLiveness::Connected;
        info.last_updated = Timestamp::now().as_u64();
    }

    pub fn set_liveness(&self, liveness: RelayLiveness) {
        let mut info = self.info.write();
        info.liveness = liveness;
        info.last_updated = Timestamp::now().as_u64();
    }
}

/// Ordered set of relays used for one operation. May be empty, in which
/// case every operation short-circuits to its empty result.
#[derive(Clone, Default)]
pub struct RelaySet {
    endpoints: Vec<RelayEndpoint>,
}

impl RelaySet {
    pub fn new(transports: Vec<Arc<dyn RelayTransport>>) -> Self {
        Self {
            endpoints: transports.into_iter().map(RelayEndpoint::new).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RelayEndpoint> {
        self.endpoints.iter()
    }

    /// Read-only stats snapshot for every endpoint, in set order.
    pub fn endpoint_infos(&self) -> Vec<RelayEndpointInfo> {
        self.endpoints.iter().map(|e| e.snapshot()).collect()
    }
}
