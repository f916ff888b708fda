pub mod aggregator;
pub mod filter;

pub use aggregator::TimelineAggregator;
pub use filter::{TimelineFilter, TimelineFilterUpdate};
