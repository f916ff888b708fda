use anyhow::Result;
use async_trait::async_trait;
use nostr::{Event, Filter};
use tokio::sync::mpsc;

/// One message from a single relay's feed.
///
/// `EndOfStoredEvents` marks the end of the historical replay for the
/// filters the feed was opened with; only live pushes follow it.
#[derive(Debug)]
pub enum RelayUnit {
    Event(Box<Event>),
    EndOfStoredEvents,
}

/// Per-relay stream of [`RelayUnit`]s. Dropping the feed closes the
/// underlying subscription.
pub type RelayFeed = mpsc::Receiver<RelayUnit>;

/// Outcome of broadcasting one event to one relay. Publishes are
/// best-effort and never atomic across the set, so partial success stays
/// visible to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    pub url: String,
    pub status: PublishStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishStatus {
    Accepted,
    Rejected(String),
    TimedOut,
}

/// Wire-level collaborator for a single relay.
///
/// Implementations own framing, subscription identifiers, and the
/// stored-data replay signal; this crate only consumes the resulting feed.
/// Every feed must deliver at most one `EndOfStoredEvents`, after the
/// replay of stored events matching the filters.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    fn url(&self) -> &str;

    /// Open a subscription for `filters` and stream its results.
    async fn open(&self, filters: Vec<Filter>) -> Result<RelayFeed>;

    /// Submit one signed event. `Ok` means the relay accepted it.
    async fn publish(&self, event: &Event) -> Result<()>;
}
