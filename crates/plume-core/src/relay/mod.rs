pub mod endpoint;
pub mod executor;
pub mod transport;

pub use endpoint::{RelayEndpoint, RelayEndpointInfo, RelayLiveness, RelaySet};
pub use executor::{RelayExecutor, SubscriptionHandle, SubscriptionUpdate};
pub use transport::{PublishOutcome, PublishStatus, RelayFeed, RelayTransport, RelayUnit};
