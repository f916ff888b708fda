use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use nostr::{Event, Filter, Kind, PublicKey, Timestamp};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::constants::{
    AUTO_LOAD_MAX_ATTEMPTS, AUTO_LOAD_RETRY_DELAY, DISCOVERY_FALLBACK_DELAY, DISPLAY_LIMIT_STEP,
    INITIAL_DISPLAY_LIMIT, INITIAL_PAGE_SIZE, LOAD_MORE_COOLDOWN, LOAD_MORE_PAGE_SIZE,
};
use crate::error::CoreError;
use crate::relay::RelayExecutor;
use crate::store::{classify, CategoryStore, EventStore, NoteCategory};
use crate::timeline::filter::{TimelineFilter, TimelineFilterUpdate};

const ALL_CATEGORIES: [NoteCategory; 7] = [
    NoteCategory::Note,
    NoteCategory::Reply,
    NoteCategory::Repost,
    NoteCategory::Article,
    NoteCategory::Video,
    NoteCategory::Audio,
    NoteCategory::Reaction,
];

/// Everything that belongs to one activated subject. Created empty on
/// activation, mutated only by the aggregator's own continuations, thrown
/// away wholesale on subject switch or reset.
struct TimelineState {
    subject: Option<PublicKey>,
    categories: CategoryStore,
    filter: TimelineFilter,
    /// Oldest created_at confirmed by a live batch. Never increases.
    cursor: Option<u64>,
    has_more: bool,
    display_limit: usize,
    loading_more: bool,
    initially_loading: bool,
    last_load_more: Option<Instant>,
    follow_list: Option<Event>,
}

impl TimelineState {
    fn fresh(filter: TimelineFilter) -> Self {
        Self {
            subject: None,
            categories: CategoryStore::new(),
            filter,
            cursor: None,
            has_more: true,
            display_limit: INITIAL_DISPLAY_LIMIT,
            loading_more: false,
            initially_loading: false,
            last_load_more: None,
            follow_list: None,
        }
    }

    /// Count of events in enabled categories.
    fn filtered_len(&self) -> usize {
        ALL_CATEGORIES
            .iter()
            .filter(|c| self.filter.allows(**c))
            .map(|c| self.categories.collection(*c).len())
            .sum()
    }

    /// Union of enabled categories, newest first. Ties broken by event id
    /// so the order is stable across relays and reloads.
    fn sorted_timeline(&self) -> Vec<Event> {
        let mut merged: Vec<Event> = Vec::with_capacity(self.filtered_len());
        for category in ALL_CATEGORIES {
            if self.filter.allows(category) {
                merged.extend(self.categories.collection(category).iter().cloned());
            }
        }
        merged.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        merged
    }
}

/// Merges cached and live events for one profile into a deduplicated,
/// windowed timeline, and pages backward through relay history.
///
/// All network results are committed through a generation check: switching
/// the subject bumps the generation, so a fetch issued for the previous
/// subject finds its generation stale on arrival and drops its results.
/// In-flight queries cannot be aborted, only ignored.
pub struct TimelineAggregator {
    store: Arc<dyn EventStore>,
    executor: Arc<RelayExecutor>,
    discovery: Arc<RelayExecutor>,
    state: Mutex<TimelineState>,
    generation: AtomicU64,
}

impl TimelineAggregator {
    pub fn new(
        store: Arc<dyn EventStore>,
        executor: Arc<RelayExecutor>,
        discovery: Arc<RelayExecutor>,
    ) -> Self {
        Self {
            store,
            executor,
            discovery,
            state: Mutex::new(TimelineState::fresh(TimelineFilter::default())),
            generation: AtomicU64::new(0),
        }
    }

    // ===== Read-only state =====

    pub fn sorted_timeline(&self) -> Vec<Event> {
        self.state.lock().sorted_timeline()
    }

    pub fn displayed_timeline(&self) -> Vec<Event> {
        let state = self.state.lock();
        let mut timeline = state.sorted_timeline();
        timeline.truncate(state.display_limit);
        timeline
    }

    /// Whether already-loaded items exist beyond the display window.
    pub fn has_more_to_display(&self) -> bool {
        let state = self.state.lock();
        state.display_limit < state.filtered_len()
    }

    pub fn is_loading_more_notes(&self) -> bool {
        self.state.lock().loading_more
    }

    pub fn has_more_notes(&self) -> bool {
        self.state.lock().has_more
    }

    pub fn is_initially_loading(&self) -> bool {
        self.state.lock().initially_loading
    }

    pub fn current_profile_pubkey(&self) -> Option<PublicKey> {
        self.state.lock().subject
    }

    pub fn timeline_filter(&self) -> TimelineFilter {
        self.state.lock().filter
    }

    pub fn follow_list(&self) -> Option<Event> {
        self.state.lock().follow_list.clone()
    }

    pub fn pagination_cursor(&self) -> Option<Timestamp> {
        self.state.lock().cursor.map(Timestamp::from)
    }

    // ===== Mutators =====

    /// Switch the timeline to a new profile and load it.
    ///
    /// Rejects malformed keys before any network activity; that is the
    /// only hard failure this layer produces.
    pub async fn set_current_profile_pubkey(&self, input: &str) -> Result<(), CoreError> {
        let subject = PublicKey::parse(input).map_err(|_| CoreError::InvalidSubjectKey {
            input: input.to_string(),
        })?;
        self.activate(subject).await;
        Ok(())
    }

    /// Re-run the full load protocol for the active profile.
    pub async fn reload_current_profile(&self) {
        let subject = self.state.lock().subject;
        if let Some(subject) = subject {
            self.activate(subject).await;
        }
    }

    /// Drop all per-subject state. Filter preferences survive.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        self.generation.fetch_add(1, Ordering::SeqCst);
        let filter = state.filter;
        *state = TimelineState::fresh(filter);
    }

    /// Page backward through relay history.
    ///
    /// No-op (returning 0) while a page is already in flight, after the
    /// history is exhausted, or within the scroll cooldown window. Pass
    /// `before` to page from an explicit timestamp instead of the cursor.
    pub async fn load_more_notes(&self, before: Option<Timestamp>) -> usize {
        // Read the generation under the same lock that flips
        // `loading_more`, so a subject switch landing in between cannot
        // leave the flag stranded on the new subject's state.
        let (generation, subject, until) = {
            let mut state = self.state.lock();
            let generation = self.generation.load(Ordering::SeqCst);
            let Some(subject) = state.subject else {
                debug!("load_more skipped: no active profile");
                return 0;
            };
            if state.loading_more {
                debug!("load_more skipped: page already in flight");
                return 0;
            }
            if !state.has_more {
                debug!("load_more skipped: history exhausted");
                return 0;
            }
            if let Some(last) = state.last_load_more {
                if last.elapsed() < LOAD_MORE_COOLDOWN {
                    debug!("load_more skipped: cooldown");
                    return 0;
                }
            }
            state.loading_more = true;
            state.last_load_more = Some(Instant::now());
            let until = before
                .map(|t| t.as_u64())
                .or(state.cursor)
                .map(|c| c.saturating_sub(1));
            (generation, subject, until)
        };

        let added = self
            .fetch_older(subject, generation, until, LOAD_MORE_PAGE_SIZE)
            .await;
        if generation == self.generation.load(Ordering::SeqCst) {
            self.state.lock().loading_more = false;
        }
        added
    }

    /// Apply a partial filter change, reset the display window, and
    /// refresh from relays with the kinds the new filter implies.
    /// Collections for still-relevant kinds are preserved as-is.
    pub async fn update_timeline_filter(&self, update: TimelineFilterUpdate) {
        let (generation, subject) = {
            let mut state = self.state.lock();
            let generation = self.generation.load(Ordering::SeqCst);
            state.filter.apply(&update);
            state.display_limit = INITIAL_DISPLAY_LIMIT;
            (generation, state.subject)
        };
        let Some(subject) = subject else {
            return;
        };
        self.refresh_live(subject, generation).await;
        self.backfill(generation).await;
    }

    /// Restore the default filter and refresh.
    pub async fn reset_timeline_filter(&self) {
        let (generation, subject) = {
            let mut state = self.state.lock();
            let generation = self.generation.load(Ordering::SeqCst);
            state.filter = TimelineFilter::default();
            state.display_limit = INITIAL_DISPLAY_LIMIT;
            (generation, state.subject)
        };
        let Some(subject) = subject else {
            return;
        };
        self.refresh_live(subject, generation).await;
        self.backfill(generation).await;
    }

    /// Grow the display window by one step, capped at the loaded count.
    /// Returns whether the window grew. Callers surface loaded-but-hidden
    /// items this way before asking the network for more.
    pub fn increase_display_limit(&self) -> bool {
        let mut state = self.state.lock();
        let total = state.filtered_len();
        if state.display_limit >= total {
            return false;
        }
        state.display_limit = (state.display_limit + DISPLAY_LIMIT_STEP).min(total);
        true
    }

    // ===== Load protocol =====

    async fn activate(&self, subject: PublicKey) {
        // Bump and replace under one lock so concurrent callers always
        // observe a matching (generation, state) pair.
        let generation = {
            let mut state = self.state.lock();
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let filter = state.filter;
            *state = TimelineState::fresh(filter);
            state.subject = Some(subject);
            state.initially_loading = true;
            generation
        };

        // Cache phase: render previously seen content before any network
        // round-trip. Failures degrade to an empty cache.
        match self.store.events_by_pubkey(&subject).await {
            Ok(cached) => {
                if self.is_stale(generation, "cached events") {
                    return;
                }
                let mut state = self.state.lock();
                let mut skipped = 0usize;
                for event in cached {
                    if classify(&event).is_none() {
                        skipped += 1;
                        continue;
                    }
                    state.categories.insert(event);
                }
                if skipped > 0 {
                    debug!(skipped, "cache load: skipped unclassifiable events");
                }
            }
            Err(e) => warn!(error = %e, "cache load failed, continuing without it"),
        }
        if let Ok(Some(cached_follows)) = self
            .store
            .event_by_pubkey_and_kind(&subject, Kind::ContactList)
            .await
        {
            if self.is_stale(generation, "cached follow list") {
                return;
            }
            self.state.lock().follow_list = Some(cached_follows);
        }

        // Live phase: one bounded query for the enabled kinds. The cursor
        // comes from this batch only, never from the cache.
        let kinds = self.state.lock().filter.enabled_kinds();
        let filter = Filter::new()
            .author(subject)
            .kinds(kinds)
            .limit(INITIAL_PAGE_SIZE);
        let batch = self.executor.get_many(filter, None).await;
        if self.is_stale(generation, "initial live batch") {
            return;
        }
        self.commit_batch(batch, INITIAL_PAGE_SIZE).await;
        self.state.lock().initially_loading = false;

        self.fetch_follow_list(subject, generation).await;
        self.backfill(generation).await;
    }

    /// Live refresh without touching collections that are still relevant;
    /// used after filter changes.
    async fn refresh_live(&self, subject: PublicKey, generation: u64) {
        let kinds = self.state.lock().filter.enabled_kinds();
        let filter = Filter::new()
            .author(subject)
            .kinds(kinds)
            .limit(INITIAL_PAGE_SIZE);
        let batch = self.executor.get_many(filter, None).await;
        if self.is_stale(generation, "filter refresh batch") {
            return;
        }
        self.commit_batch(batch, INITIAL_PAGE_SIZE).await;
    }

    /// One backward page: `get_many` with `until` below the cursor.
    /// Returns how many events were new.
    async fn fetch_older(
        &self,
        subject: PublicKey,
        generation: u64,
        until: Option<u64>,
        page_size: usize,
    ) -> usize {
        let kinds = self.state.lock().filter.enabled_kinds();
        let mut filter = Filter::new().author(subject).kinds(kinds).limit(page_size);
        if let Some(until) = until {
            filter = filter.until(Timestamp::from(until));
        }
        let batch = self.executor.get_many(filter, None).await;
        if self.is_stale(generation, "pagination batch") {
            return 0;
        }
        self.commit_batch(batch, page_size).await
    }

    /// Merge a live batch into the collections and persist the newcomers.
    ///
    /// Cursor moves only downward, and only from live data. `has_more`
    /// flips off when the relay set returned fewer events than asked for;
    /// it never flips back on without a full reset.
    async fn commit_batch(&self, batch: Vec<Event>, requested: usize) -> usize {
        let batch_len = batch.len();
        let batch_min = batch.iter().map(|e| e.created_at.as_u64()).min();

        let mut fresh = Vec::new();
        {
            let mut state = self.state.lock();
            for event in batch {
                let candidate = event.clone();
                if state.categories.insert(event).is_some() {
                    fresh.push(candidate);
                }
            }
            if batch_len < requested {
                state.has_more = false;
            }
            if let Some(min) = batch_min {
                if state.cursor.map_or(true, |cursor| min < cursor) {
                    state.cursor = Some(min);
                }
            }
        }

        let added = fresh.len();
        for event in fresh {
            if let Err(e) = self.store.save_event(&event).await {
                debug!(error = %e, "failed to persist live event");
            }
        }
        added
    }

    /// Best-effort follow-list lookup: primary set first, discovery set
    /// after a short delay if the primary came back empty.
    async fn fetch_follow_list(&self, subject: PublicKey, generation: u64) {
        let filter = Filter::new()
            .author(subject)
            .kind(Kind::ContactList)
            .limit(1);
        let mut follows = self.executor.get(filter.clone(), None).await;
        if follows.is_none() {
            tokio::time::sleep(DISCOVERY_FALLBACK_DELAY).await;
            if self.is_stale(generation, "follow list fallback") {
                return;
            }
            follows = self.discovery.get(filter, None).await;
        }
        let Some(event) = follows else {
            return;
        };
        if self.is_stale(generation, "follow list") {
            return;
        }
        self.state.lock().follow_list = Some(event.clone());
        if let Err(e) = self.store.save_event(&event).await {
            debug!(error = %e, "failed to persist follow list");
        }
    }

    /// When the enabled filter leaves fewer items than the display window,
    /// keep paging until content appears, the history runs out, or the
    /// attempt budget is spent.
    async fn backfill(&self, generation: u64) {
        for _ in 0..AUTO_LOAD_MAX_ATTEMPTS {
            let (subject, until) = {
                let mut state = self.state.lock();
                let Some(subject) = state.subject else {
                    return;
                };
                if !state.has_more || state.loading_more {
                    return;
                }
                if state.filtered_len() >= state.display_limit {
                    return;
                }
                state.loading_more = true;
                (subject, state.cursor.map(|c| c.saturating_sub(1)))
            };

            self.fetch_older(subject, generation, until, LOAD_MORE_PAGE_SIZE)
                .await;
            if self.is_stale(generation, "backfill page") {
                return;
            }
            self.state.lock().loading_more = false;

            tokio::time::sleep(AUTO_LOAD_RETRY_DELAY).await;
            if self.is_stale(generation, "backfill loop") {
                return;
            }
        }
    }

    fn is_stale(&self, generation: u64, what: &str) -> bool {
        if generation != self.generation.load(Ordering::SeqCst) {
            info!(what, "profile changed mid-fetch, discarding result");
            true
        } else {
            false
        }
    }
}
