pub mod config;
pub mod constants;
pub mod error;
pub mod relay;
pub mod store;
pub mod timeline;
pub mod tracing_setup;

// Re-export the main entry points at crate root for convenience
pub use config::CoreConfig;
pub use error::CoreError;
pub use relay::{
    PublishOutcome, PublishStatus, RelayExecutor, RelayFeed, RelayLiveness, RelaySet,
    RelayTransport, RelayUnit, SubscriptionHandle, SubscriptionUpdate,
};
pub use store::{EventStore, MemoryEventStore, NoteCategory};
pub use timeline::{TimelineAggregator, TimelineFilter, TimelineFilterUpdate};
