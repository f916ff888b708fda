use nostr::Kind;

use crate::constants::kinds;
use crate::store::NoteCategory;

/// Which content categories the timeline renders and requests from relays.
///
/// Long-form articles ride along with notes; they have no toggle of their
/// own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineFilter {
    pub show_notes: bool,
    pub show_replies: bool,
    pub show_reposts: bool,
    pub show_audio: bool,
    pub show_video: bool,
    pub show_reactions: bool,
}

impl Default for TimelineFilter {
    fn default() -> Self {
        Self {
            show_notes: true,
            show_replies: true,
            show_reposts: true,
            show_audio: false,
            show_video: false,
            show_reactions: false,
        }
    }
}

impl TimelineFilter {
    /// Whether events in `category` merge into the timeline view.
    pub fn allows(&self, category: NoteCategory) -> bool {
        match category {
            NoteCategory::Note | NoteCategory::Article => self.show_notes,
            NoteCategory::Reply => self.show_replies,
            NoteCategory::Repost => self.show_reposts,
            NoteCategory::Audio => self.show_audio,
            NoteCategory::Video => self.show_video,
            NoteCategory::Reaction => self.show_reactions,
        }
    }

    /// Union of event kinds to request from relays for the enabled
    /// categories. Notes and replies share kind 1, so either toggle pulls
    /// it in.
    pub fn enabled_kinds(&self) -> Vec<Kind> {
        let mut result = Vec::new();
        if self.show_notes || self.show_replies {
            result.push(Kind::Custom(kinds::TEXT_NOTE));
        }
        if self.show_notes {
            result.push(Kind::Custom(kinds::ARTICLE));
        }
        if self.show_reposts {
            result.push(Kind::Custom(kinds::REPOST));
            result.push(Kind::Custom(kinds::GENERIC_REPOST));
        }
        if self.show_audio {
            result.push(Kind::Custom(kinds::AUDIO_TRACK));
            result.push(Kind::Custom(kinds::VOICE_MESSAGE));
        }
        if self.show_video {
            result.push(Kind::Custom(kinds::VIDEO));
            result.push(Kind::Custom(kinds::VIDEO_PORTRAIT));
        }
        if self.show_reactions {
            result.push(Kind::Custom(kinds::REACTION));
        }
        result
    }

    pub fn apply(&mut self, update: &TimelineFilterUpdate) {
        if let Some(v) = update.show_notes {
            self.show_notes = v;
        }
        if let Some(v) = update.show_replies {
            self.show_replies = v;
        }
        if let Some(v) = update.show_reposts {
            self.show_reposts = v;
        }
        if let Some(v) = update.show_audio {
            self.show_audio = v;
        }
        if let Some(v) = update.show_video {
            self.show_video = v;
        }
        if let Some(v) = update.show_reactions {
            self.show_reactions = v;
        }
    }
}

/// Partial update for [`TimelineFilter`]; `None` fields keep their value.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimelineFilterUpdate {
    pub show_notes: Option<bool>,
    pub show_replies: Option<bool>,
    pub show_reposts: Option<bool>,
    pub show_audio: Option<bool>,
    pub show_video: Option<bool>,
    pub show_reactions: Option<bool>,
}

impl TimelineFilterUpdate {
    pub fn notes_only() -> Self {
        Self {
            show_notes: Some(true),
            show_replies: Some(false),
            show_reposts: Some(false),
            show_audio: Some(false),
            show_video: Some(false),
            show_reactions: Some(false),
        }
    }
}
