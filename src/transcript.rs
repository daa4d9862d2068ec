//! Conversation transcript
//!
//! Append-only history of one voice session. Assistant speech arrives as
//! partial fragments; consecutive fragments are coalesced into the most
//! recent assistant entry (space-joined) until the turn completes.

use chrono::{DateTime, Utc};

/// Who produced a transcript entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// The local user's speech, as transcribed by the service
    User,
    /// The remote assistant
    Assistant,
    /// A client-generated notice (connection events, hints)
    System,
}

/// One line of conversation history
#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    /// Who produced this entry
    pub origin: Origin,
    /// Entry text; grows for assistant entries while fragments coalesce
    pub text: String,
    /// When the entry was first appended
    pub created_at: DateTime<Utc>,
}

impl TranscriptEntry {
    fn new(origin: Origin, text: String) -> Self {
        Self {
            origin,
            text,
            created_at: Utc::now(),
        }
    }
}

/// Append-only conversation history with assistant-fragment coalescing
#[derive(Debug, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
    /// Whether the latest assistant entry still accepts fragments
    assistant_open: bool,
}

impl Transcript {
    /// Create an empty transcript
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries, oldest first
    #[must_use]
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the transcript is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a user entry
    pub fn push_user(&mut self, text: impl Into<String>) {
        self.entries.push(TranscriptEntry::new(Origin::User, text.into()));
    }

    /// Append a system notice
    pub fn push_system(&mut self, text: impl Into<String>) {
        self.entries
            .push(TranscriptEntry::new(Origin::System, text.into()));
    }

    /// Append a standalone assistant entry (not extended by later fragments
    /// unless it is still the latest entry)
    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.entries
            .push(TranscriptEntry::new(Origin::Assistant, text.into()));
        self.assistant_open = true;
    }

    /// Coalesce an assistant speech fragment.
    ///
    /// Extends the latest entry when it is an assistant entry still open for
    /// fragments, joining with a single space; otherwise starts a new
    /// assistant entry.
    pub fn extend_assistant(&mut self, fragment: &str) {
        match self.entries.last_mut() {
            Some(last) if last.origin == Origin::Assistant && self.assistant_open => {
                last.text.push(' ');
                last.text.push_str(fragment);
            }
            _ => self.push_assistant(fragment),
        }
    }

    /// Close the current assistant entry; the next fragment starts a new one.
    ///
    /// Called when the assistant's turn completes.
    pub fn seal_assistant(&mut self) {
        self.assistant_open = false;
    }

    /// Discard all entries (session teardown)
    pub fn clear(&mut self) {
        self.entries.clear();
        self.assistant_open = false;
    }
}
