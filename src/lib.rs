//! Ally Voice - push-to-talk voice client for the Kisan Ally farming assistant
//!
//! This library provides the building blocks for a terminal voice client:
//! - Microphone capture and streaming (16 kHz mono PCM)
//! - Synthesized speech playback (24 kHz mono PCM, strict arrival order)
//! - The duplex websocket transport and its JSON control protocol
//! - Conversation transcript with assistant fragment coalescing
//! - Persisted owner identity across sessions
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  Terminal UI                     │
//! │        push-to-talk  │  transcript view          │
//! └──────────────────────┬──────────────────────────┘
//!                        │
//! ┌──────────────────────▼──────────────────────────┐
//! │              VoiceSessionClient                  │
//! │  capture │ playback queue │ transcript │ store   │
//! └──────────────────────┬──────────────────────────┘
//!                        │ websocket (JSON + PCM)
//! ┌──────────────────────▼──────────────────────────┐
//! │            Kisan Ally assistant service          │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod store;
pub mod transcript;
pub mod transport;

pub use config::Config;
pub use error::{Error, Result};
pub use session::{MIN_UTTERANCE, SessionEvent, SessionState, VoiceSessionClient};
pub use store::ProfileRepo;
pub use transcript::{Origin, Transcript, TranscriptEntry};
pub use transport::{Connection, ConnectionHandle, Connector, WsConnector};
