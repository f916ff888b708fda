pub mod categories;
pub mod event_store;

pub use categories::{classify, CategoryCollection, CategoryStore, NoteCategory};
pub use event_store::{EventStore, MemoryEventStore};
