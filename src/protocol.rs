//! Wire protocol for the assistant service connection
//!
//! The service speaks a message-oriented duplex protocol over one websocket:
//! UTF-8 JSON control messages tagged by a `type` field, plus raw binary
//! frames carrying 16-bit little-endian PCM audio. Frame kind distinguishes
//! control from audio; content is never sniffed.

use serde::{Deserialize, Serialize};

/// Messages sent from the client to the assistant service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Identification, sent once as the first message after connect.
    ///
    /// An empty `user_id` asks the service to assign one.
    Hello {
        /// Persisted owner id, or empty string
        user_id: String,
    },

    /// Signals the end of one utterance
    AudioEnd,
}

/// Messages received from the assistant service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Server-generated owner id to persist and reuse
    AssignUserId {
        /// The assigned identifier
        user_id: String,
    },

    /// Onboarding state for the identified owner
    UserStatus {
        /// Whether the owner is known to the service
        status: UserStatusKind,
        /// Remembered profile fields, when the owner is known
        #[serde(default)]
        user_data: Option<UserProfile>,
    },

    /// Onboarding conversation has finished
    OnboardingComplete {
        /// Human-readable completion message
        message: String,
        /// The profile collected during onboarding
        #[serde(default)]
        user_data: Option<UserProfile>,
    },

    /// Informational: the service has a live session for us
    SessionReady {
        /// Server-side session identifier
        session_id: String,
    },

    /// Partial or complete transcript of the user's speech
    InputTranscription {
        /// Transcribed text
        text: String,
    },

    /// Partial assistant speech transcript fragment (coalesced client-side)
    OutputTranscription {
        /// Fragment text
        text: String,
    },

    /// The assistant has finished responding
    TurnComplete,

    /// Standalone assistant text message
    Text {
        /// Message text
        text: String,
    },

    /// Error to surface to the user
    Error {
        /// Error description
        message: String,
    },
}

/// Onboarding status reported by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatusKind {
    /// First contact; the service will run onboarding
    NewUser,
    /// Known owner with a remembered profile
    ExistingUser,
}

/// Profile fields the service remembers about an owner
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Owner's name
    #[serde(default)]
    pub name: Option<String>,
    /// Owner's village
    #[serde(default)]
    pub village: Option<String>,
    /// Crops the owner grows, as free text
    #[serde(default)]
    pub crops: Option<String>,
}

impl UserProfile {
    /// Format the profile for a system notice, skipping absent fields.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if let Some(name) = &self.name {
            parts.push(name.clone());
        }
        if let Some(village) = &self.village {
            parts.push(format!("from {village}"));
        }
        if let Some(crops) = &self.crops {
            parts.push(format!("growing {crops}"));
        }
        parts.join(", ")
    }
}
