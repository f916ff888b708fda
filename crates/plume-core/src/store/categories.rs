use std::collections::HashSet;

use nostr::{Alphabet, Event, EventId, SingleLetterTag, TagKind};

use crate::constants::kinds;

/// Content bucket an event lands in on a profile timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoteCategory {
    Note,
    Reply,
    Repost,
    Article,
    Video,
    Audio,
    Reaction,
}

fn is_reply(event: &Event) -> bool {
    let e_tag = TagKind::SingleLetter(SingleLetterTag::lowercase(Alphabet::E));
    event.tags.iter().any(|tag| tag.kind() == e_tag)
}

/// Bucket an event by kind. Kind 1 splits into note vs. reply on the
/// presence of an `e` tag. Returns `None` for kinds the timeline does not
/// render; callers skip those and move on.
pub fn classify(event: &Event) -> Option<NoteCategory> {
    match event.kind.as_u16() {
        kinds::TEXT_NOTE => {
            if is_reply(event) {
                Some(NoteCategory::Reply)
            } else {
                Some(NoteCategory::Note)
            }
        }
        kinds::REPOST | kinds::GENERIC_REPOST => Some(NoteCategory::Repost),
        kinds::ARTICLE => Some(NoteCategory::Article),
        kinds::VIDEO | kinds::VIDEO_PORTRAIT => Some(NoteCategory::Video),
        kinds::AUDIO_TRACK | kinds::VOICE_MESSAGE => Some(NoteCategory::Audio),
        kinds::REACTION => Some(NoteCategory::Reaction),
        _ => None,
    }
}

/// Uniqueness-enforced event collection for one category.
///
/// Insertion order is cross-relay arrival order and means nothing;
/// consumers read through the aggregator's sorted view.
#[derive(Default, Clone)]
pub struct CategoryCollection {
    ids: HashSet<EventId>,
    events: Vec<Event>,
}

impl CategoryCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert if the id is new. Returns whether the event was added.
    pub fn insert(&mut self, event: Event) -> bool {
        if !self.ids.insert(event.id) {
            return false;
        }
        self.events.push(event);
        true
    }

    pub fn contains(&self, id: &EventId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
        self.events.clear();
    }
}

/// Per-subject store: one deduplicated collection per category.
#[derive(Default, Clone)]
pub struct CategoryStore {
    pub notes: CategoryCollection,
    pub replies: CategoryCollection,
    pub reposts: CategoryCollection,
    pub articles: CategoryCollection,
    pub video: CategoryCollection,
    pub audio: CategoryCollection,
    pub reactions: CategoryCollection,
}

impl CategoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.notes.clear();
        self.replies.clear();
        self.reposts.clear();
        self.articles.clear();
        self.video.clear();
        self.audio.clear();
        self.reactions.clear();
    }

    pub fn collection(&self, category: NoteCategory) -> &CategoryCollection {
        match category {
            NoteCategory::Note => &self.notes,
            NoteCategory::Reply => &self.replies,
            NoteCategory::Repost => &self.reposts,
            NoteCategory::Article => &self.articles,
            NoteCategory::Video => &self.video,
            NoteCategory::Audio => &self.audio,
            NoteCategory::Reaction => &self.reactions,
        }
    }

    fn collection_mut(&mut self, category: NoteCategory) -> &mut CategoryCollection {
        match category {
            NoteCategory::Note => &mut self.notes,
            NoteCategory::Reply => &mut self.replies,
            NoteCategory::Repost => &mut self.reposts,
            NoteCategory::Article => &mut self.articles,
            NoteCategory::Video => &mut self.video,
            NoteCategory::Audio => &mut self.audio,
            NoteCategory::Reaction => &mut self.reactions,
        }
    }

    /// Classify and insert one event. Returns the category it landed in,
    /// or `None` when the kind is unclassifiable or the id already known.
    pub fn insert(&mut self, event: Event) -> Option<NoteCategory> {
        let category = classify(&event)?;
        if self.collection_mut(category).insert(event) {
            Some(category)
        } else {
            None
        }
    }

    pub fn total_len(&self) -> usize {
        self.notes.len()
            + self.replies.len()
            + self.reposts.len()
            + self.articles.len()
            + self.video.len()
            + self.audio.len()
            + self.reactions.len()
    }
}
