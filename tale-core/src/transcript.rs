//! The session transcript.
//!
//! Entries are appended in order and never removed or reordered. At most one
//! entry is "open" at a time: a narrator entry that is still receiving
//! streamed text. Once closed, an entry is immutable.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Text shown in place of narration when a turn could not be resolved.
pub const TURN_ERROR_MARKER: &str = "[error fetching turn]";

/// Unique identifier for transcript entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(pub Uuid);

impl EntryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Speaker {
    Player,
    Narrator,
}

/// One line of the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub id: EntryId,
    pub speaker: Speaker,
    pub text: String,
    /// Set when the entry stands in for a turn that failed.
    pub is_error: bool,
}

/// Append-only record of a session.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
    open: Option<EntryId>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a finished entry.
    pub fn push(&mut self, speaker: Speaker, text: impl Into<String>) -> EntryId {
        self.push_entry(speaker, text.into(), false)
    }

    /// Append a narrator entry carrying the turn error marker.
    pub fn push_error(&mut self) -> EntryId {
        self.push_entry(Speaker::Narrator, TURN_ERROR_MARKER.to_string(), true)
    }

    /// Append an empty entry that will receive streamed text.
    ///
    /// Returns `None` if another entry is already open.
    pub fn open(&mut self, speaker: Speaker) -> Option<EntryId> {
        if self.open.is_some() {
            return None;
        }
        let id = self.push_entry(speaker, String::new(), false);
        self.open = Some(id);
        Some(id)
    }

    /// Append text to the open entry. Closed entries are left untouched.
    pub fn append(&mut self, id: EntryId, text: &str) -> bool {
        match self.open_entry_mut(id) {
            Some(entry) => {
                entry.text.push_str(text);
                true
            }
            None => false,
        }
    }

    /// Replace the open entry's text with the error marker and close it.
    pub fn fail(&mut self, id: EntryId) -> bool {
        match self.open_entry_mut(id) {
            Some(entry) => {
                entry.text = TURN_ERROR_MARKER.to_string();
                entry.is_error = true;
                self.open = None;
                true
            }
            None => false,
        }
    }

    /// Close the open entry, freezing its text.
    pub fn close(&mut self, id: EntryId) -> bool {
        if self.open == Some(id) {
            self.open = None;
            true
        } else {
            false
        }
    }

    /// The entry currently receiving streamed text, if any.
    pub fn open_entry(&self) -> Option<EntryId> {
        self.open
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn get(&self, id: EntryId) -> Option<&TranscriptEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn last(&self) -> Option<&TranscriptEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push_entry(&mut self, speaker: Speaker, text: String, is_error: bool) -> EntryId {
        let id = EntryId::new();
        self.entries.push(TranscriptEntry {
            id,
            speaker,
            text,
            is_error,
        });
        id
    }

    fn open_entry_mut(&mut self, id: EntryId) -> Option<&mut TranscriptEntry> {
        if self.open != Some(id) {
            return None;
        }
        // The open entry is always the most recent one.
        self.entries.last_mut().filter(|e| e.id == id)
    }
}
