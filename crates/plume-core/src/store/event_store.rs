use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use nostr::{Event, EventId, Kind, PublicKey};
use parking_lot::RwLock;

/// Persistence collaborator for previously seen events.
///
/// The timeline reads the cache before touching the network and writes
/// every live event back, so content renders instantly on the next
/// activation. Engine internals live below this boundary.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// All cached events authored by `pubkey`, any kind, unsorted.
    async fn events_by_pubkey(&self, pubkey: &PublicKey) -> Result<Vec<Event>>;

    /// Newest cached event of `kind` authored by `pubkey`, if any.
    async fn event_by_pubkey_and_kind(
        &self,
        pubkey: &PublicKey,
        kind: Kind,
    ) -> Result<Option<Event>>;

    /// Persist one event. Saving an already-known id is a no-op.
    async fn save_event(&self, event: &Event) -> Result<()>;
}

/// In-process [`EventStore`] keyed by event id.
///
/// Used before a persistent backend is wired in, and by every test.
#[derive(Default)]
pub struct MemoryEventStore {
    events: RwLock<HashMap<EventId, Event>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn events_by_pubkey(&self, pubkey: &PublicKey) -> Result<Vec<Event>> {
        let events = self.events.read();
        Ok(events
            .values()
            .filter(|e| e.pubkey == *pubkey)
            .cloned()
            .collect())
    }

    async fn event_by_pubkey_and_kind(
        &self,
        pubkey: &PublicKey,
        kind: Kind,
    ) -> Result<Option<Event>> {
        let events = self.events.read();
        Ok(events
            .values()
            .filter(|e| e.pubkey == *pubkey && e.kind == kind)
            .max_by_key(|e| e.created_at)
            .cloned())
    }

    async fn save_event(&self, event: &Event) -> Result<()> {
        self.events.write().entry(event.id).or_insert_with(|| event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr::{EventBuilder, Keys, Timestamp};

    fn note(keys: &Keys, created_at: u64, content: &str) -> Event {
        EventBuilder::text_note(content)
            .custom_created_at(Timestamp::from(created_at))
            .sign_with_keys(keys)
            .unwrap()
    }

    #[tokio::test]
    async fn test_save_and_query_by_pubkey() {
        let store = MemoryEventStore::new();
        let keys = Keys::generate();
        let other = Keys::generate();

        store.save_event(&note(&keys, 100, "mine")).await.unwrap();
        store.save_event(&note(&other, 100, "theirs")).await.unwrap();

        let mine = store.events_by_pubkey(&keys.public_key()).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].content, "mine");
    }

    #[tokio::test]
    async fn test_save_is_idempotent_per_id() {
        let store = MemoryEventStore::new();
        let keys = Keys::generate();
        let event = note(&keys, 100, "once");

        store.save_event(&event).await.unwrap();
        store.save_event(&event).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_kind_lookup_returns_newest() {
        let store = MemoryEventStore::new();
        let keys = Keys::generate();
        store.save_event(&note(&keys, 100, "old")).await.unwrap();
        store.save_event(&note(&keys, 200, "new")).await.unwrap();

        let found = store
            .event_by_pubkey_and_kind(&keys.public_key(), nostr::Kind::TextNote)
            .await
            .unwrap();
        assert_eq!(found.map(|e| e.content), Some("new".to_string()));
    }
}
