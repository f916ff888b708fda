//! Application-wide constants
//!
//! Centralized location for magic values and tunables that are used
//! across multiple modules.

use std::time::Duration;

/// Default primary relays queried for profile timelines
pub const DEFAULT_RELAYS: &[&str] = &[
    "wss://relay.damus.io",
    "wss://nos.lol",
    "wss://relay.primal.net",
];

/// Fallback relays used to discover follow lists when the primary set has none
pub const DISCOVERY_RELAYS: &[&str] = &["wss://purplepag.es", "wss://relay.nostr.band"];

/// Maximum number of one-shot queries allowed in flight at once
pub const MAX_CONCURRENT_QUERIES: usize = 2;

/// Bounded wait for get/get_many; on expiry the call resolves with
/// whatever was collected so far
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-relay wait when broadcasting an event
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

/// Page size for the first live fetch after a profile switch
pub const INITIAL_PAGE_SIZE: usize = 30;

/// Page size for backward pagination
pub const LOAD_MORE_PAGE_SIZE: usize = 50;

/// Minimum gap between consecutive scroll-triggered load_more calls
pub const LOAD_MORE_COOLDOWN: Duration = Duration::from_secs(2);

/// How many timeline entries are rendered before the first "show more"
pub const INITIAL_DISPLAY_LIMIT: usize = 10;

/// How many entries each display-limit increase adds
pub const DISPLAY_LIMIT_STEP: usize = 10;

/// Upper bound on automatic load_more attempts when the enabled filter
/// yields fewer items than the display window
pub const AUTO_LOAD_MAX_ATTEMPTS: usize = 5;

/// Pause between automatic load_more attempts
pub const AUTO_LOAD_RETRY_DELAY: Duration = Duration::from_millis(300);

/// Wait before falling back to the discovery relays for a follow list
pub const DISCOVERY_FALLBACK_DELAY: Duration = Duration::from_millis(500);

/// Channel capacity for per-relay and merged subscription feeds
pub const FEED_BUFFER: usize = 256;

// Nostr event kinds bucketed by the timeline
pub mod kinds {
    /// Text note (or reply, when it carries an `e` tag)
    pub const TEXT_NOTE: u16 = 1;
    /// Follow list (contact list)
    pub const FOLLOW_LIST: u16 = 3;
    /// Repost of a text note
    pub const REPOST: u16 = 6;
    /// Reaction
    pub const REACTION: u16 = 7;
    /// Generic repost (non-kind-1 target)
    pub const GENERIC_REPOST: u16 = 16;
    /// Short video
    pub const VIDEO: u16 = 21;
    /// Short portrait video
    pub const VIDEO_PORTRAIT: u16 = 22;
    /// Voice message
    pub const VOICE_MESSAGE: u16 = 1222;
    /// Long-form article
    pub const ARTICLE: u16 = 30023;
    /// Audio track
    pub const AUDIO_TRACK: u16 = 31337;
}
