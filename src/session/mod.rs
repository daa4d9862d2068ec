//! Voice session client
//!
//! Mediates one push-to-talk conversation at a time between the local audio
//! hardware and the assistant service connection. The connection opens
//! lazily on the first capture and is reused across utterances; unexpected
//! closure folds back to the disconnected state and the next capture
//! reconnects transparently.
//!
//! Everything here runs single-threaded-cooperative: inbound frames are
//! processed one at a time in delivery order, and mutual exclusion is
//! enforced by the state checks in [`SessionState`], not by locks.

mod state;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::audio::{
    CAPTURE_SAMPLE_RATE, CaptureSource, PlaybackSink, SpeechPlaybackQueue, StreamResampler, pcm,
};
use crate::config::Config;
use crate::protocol::{ClientMessage, ServerMessage, UserStatusKind};
use crate::store::ProfileRepo;
use crate::transcript::Transcript;
use crate::transport::{ConnectionHandle, Connector, InboundFrame};
use crate::{Error, Result};

pub use state::{CaptureState, ConnectionState, OwnerStatus, SessionState};

/// Recordings shorter than this are treated as cancellations: no
/// end-of-utterance is sent and no response becomes pending.
pub const MIN_UTTERANCE: Duration = Duration::from_secs(1);

/// What one processed inbound frame meant for the UI
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// One or more transcript entries were appended
    TranscriptAppended,
    /// The latest assistant entry was extended by this fragment
    AssistantFragment(String),
    /// The assistant finished its turn
    TurnComplete,
    /// A speech buffer was queued for playback
    SpeechQueued,
    /// The service reported an error to surface
    RemoteError(String),
    /// The connection closed
    Disconnected,
    /// Nothing user-visible happened
    Quiet,
}

/// Client for one push-to-talk voice conversation
pub struct VoiceSessionClient {
    config: Config,
    connector: Box<dyn Connector>,
    profile: ProfileRepo,
    capture: Box<dyn CaptureSource>,
    playback: SpeechPlaybackQueue,
    transcript: Transcript,
    state: SessionState,
    conn: Option<ConnectionHandle>,
    inbound: Option<mpsc::UnboundedReceiver<InboundFrame>>,
    /// Read by the frame-forwarding task; cleared the instant capture disarms
    /// so stale frames are dropped rather than queued
    armed: Arc<AtomicBool>,
    forward: Option<JoinHandle<()>>,
    capture_started: Option<Instant>,
}

impl VoiceSessionClient {
    /// Assemble a session over injected transport, store, and audio devices
    #[must_use]
    pub fn new(
        config: Config,
        connector: Box<dyn Connector>,
        profile: ProfileRepo,
        capture: Box<dyn CaptureSource>,
        sink: Box<dyn PlaybackSink>,
    ) -> Self {
        Self {
            config,
            connector,
            profile,
            capture,
            playback: SpeechPlaybackQueue::new(sink),
            transcript: Transcript::new(),
            state: SessionState::default(),
            conn: None,
            inbound: None,
            armed: Arc::new(AtomicBool::new(false)),
            forward: None,
            capture_started: None,
        }
    }

    /// Current session state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Conversation history
    #[must_use]
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Seconds the current capture has been armed, if any
    #[must_use]
    pub fn recording_elapsed(&self) -> Option<f32> {
        self.capture_started.map(|t| t.elapsed().as_secs_f32())
    }

    /// Whether a connection is currently held
    #[must_use]
    pub fn has_connection(&self) -> bool {
        self.conn.is_some()
    }

    /// Number of playback buffers queued but not yet played
    #[must_use]
    pub fn playback_pending(&self) -> usize {
        self.playback.pending()
    }

    /// Begin one push-to-talk recording.
    ///
    /// Connects lazily when no connection is open, sending the `hello`
    /// identification as the first message. On any failure the capture is
    /// left idle and no partial state remains armed.
    ///
    /// # Errors
    ///
    /// Returns error if a capture is already armed, a response is pending,
    /// the connection cannot be established, or the microphone cannot start
    pub async fn start_capture(&mut self) -> Result<()> {
        if let Some(reason) = self.state.arm_blocker() {
            return Err(Error::Capture(reason.to_string()));
        }

        if self.conn.is_none() {
            self.connect().await?;
        }
        let Some(handle) = self.conn.clone() else {
            return Err(Error::Connection("no open connection".to_string()));
        };

        // Device rates other than 16 kHz go through a streaming resampler
        let device_rate = self.capture.sample_rate();
        let resampler = if device_rate == CAPTURE_SAMPLE_RATE {
            None
        } else {
            Some(StreamResampler::new(device_rate, CAPTURE_SAMPLE_RATE)?)
        };

        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        self.capture.start(frame_tx)?;

        self.armed.store(true, Ordering::SeqCst);
        self.forward = Some(spawn_frame_forwarder(
            frame_rx,
            resampler,
            handle,
            Arc::clone(&self.armed),
        ));

        self.state.capture = CaptureState::Armed;
        self.capture_started = Some(Instant::now());
        self.transcript
            .push_system("listening, speak now and press enter when done");
        tracing::info!("capture armed");
        Ok(())
    }

    /// Finish the current recording.
    ///
    /// Always disarms capture and releases the microphone. Recordings
    /// shorter than [`MIN_UTTERANCE`] are cancelled: no end-of-utterance is
    /// sent and no response becomes pending. Otherwise exactly one
    /// `audio_end` goes out and a response becomes pending.
    ///
    /// # Errors
    ///
    /// Returns error if no capture is armed, the recording was too short,
    /// or the end-of-utterance cannot be sent
    pub fn stop_capture(&mut self) -> Result<()> {
        if self.state.capture != CaptureState::Armed {
            return Err(Error::Capture("no recording in progress".to_string()));
        }

        let elapsed = self
            .capture_started
            .take()
            .map(|t| t.elapsed())
            .unwrap_or_default();
        self.disarm();

        if elapsed < MIN_UTTERANCE {
            return Err(Error::Capture(
                "recording too short, speak for at least a second".to_string(),
            ));
        }

        let Some(conn) = &self.conn else {
            return Err(Error::Connection("no open connection".to_string()));
        };
        conn.send_control(ClientMessage::AudioEnd)?;
        self.state.response_pending = true;
        self.transcript.push_system(format!(
            "recorded {:.1}s, waiting for the assistant",
            elapsed.as_secs_f32()
        ));
        tracing::info!(elapsed_secs = elapsed.as_secs_f32(), "utterance sent");
        Ok(())
    }

    /// Wait for and process the next inbound frame.
    ///
    /// Pends forever while no connection is held, so it can sit in a select
    /// loop alongside user input. Returns [`SessionEvent::Disconnected`]
    /// when the connection closes unexpectedly.
    pub async fn pump(&mut self) -> SessionEvent {
        let Some(inbound) = self.inbound.as_mut() else {
            return std::future::pending().await;
        };
        match inbound.recv().await {
            Some(frame) => self.process_frame(frame),
            None => {
                self.handle_unexpected_close();
                SessionEvent::Disconnected
            }
        }
    }

    /// Tear the session down.
    ///
    /// Idempotent: closes the connection, disarms capture, releases the
    /// microphone, discards queued playback, and resets all state. Safe to
    /// call from a shutdown path any number of times.
    pub fn teardown(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.state.connection = ConnectionState::Closed;
            conn.close();
        }
        self.inbound = None;
        self.disarm();
        self.playback.clear();
        self.capture_started = None;
        self.transcript.clear();
        self.state.reset();
        tracing::debug!("session torn down");
    }

    async fn connect(&mut self) -> Result<()> {
        self.state.connection = ConnectionState::Connecting;
        tracing::info!(url = %self.config.server_url, "connecting to assistant service");

        let connected =
            tokio::time::timeout(self.config.connect_timeout, self.connector.connect(&self.config.server_url))
                .await
                .map_err(|_| Error::Connection("connection attempt timed out".to_string()))
                .and_then(|result| result);

        let connection = match connected {
            Ok(connection) => connection,
            Err(e) => {
                self.state.connection = ConnectionState::Disconnected;
                return Err(e);
            }
        };

        // Identification must be the first message after open; an empty id
        // asks the service to assign one
        let user_id = self.profile.owner_id()?.unwrap_or_default();
        if let Err(e) = connection.handle.send_control(ClientMessage::Hello { user_id }) {
            self.state.connection = ConnectionState::Disconnected;
            return Err(e);
        }

        self.conn = Some(connection.handle);
        self.inbound = Some(connection.inbound);
        self.state.connection = ConnectionState::Open;
        Ok(())
    }

    fn process_frame(&mut self, frame: InboundFrame) -> SessionEvent {
        match frame {
            InboundFrame::Audio(buffer) => {
                self.playback.enqueue(buffer);
                SessionEvent::SpeechQueued
            }
            InboundFrame::Control(msg) => self.dispatch(msg),
        }
    }

    fn dispatch(&mut self, msg: ServerMessage) -> SessionEvent {
        match msg {
            ServerMessage::AssignUserId { user_id } => {
                if let Err(e) = self.profile.set_owner_id(&user_id) {
                    tracing::warn!(error = %e, "failed to persist assigned owner id");
                }
                self.transcript
                    .push_system(format!("assigned user id {user_id}"));
                SessionEvent::TranscriptAppended
            }
            ServerMessage::UserStatus { status, user_data } => {
                match status {
                    UserStatusKind::NewUser => {
                        self.state.owner_status = OwnerStatus::New;
                        self.transcript
                            .push_system("new user, starting onboarding conversation");
                    }
                    UserStatusKind::ExistingUser => {
                        self.state.owner_status = OwnerStatus::Returning;
                        let summary = user_data.map(|p| p.summary()).unwrap_or_default();
                        if summary.is_empty() {
                            self.transcript.push_system("welcome back");
                        } else {
                            self.transcript
                                .push_system(format!("welcome back, {summary}"));
                        }
                    }
                }
                SessionEvent::TranscriptAppended
            }
            ServerMessage::OnboardingComplete { message, user_data } => {
                self.state.owner_status = OwnerStatus::Returning;
                let summary = user_data.map(|p| p.summary()).unwrap_or_default();
                if summary.is_empty() {
                    self.transcript.push_system(message);
                } else {
                    self.transcript
                        .push_system(format!("{message} ({summary})"));
                }
                SessionEvent::TranscriptAppended
            }
            ServerMessage::SessionReady { session_id } => {
                tracing::debug!(%session_id, "session ready");
                SessionEvent::Quiet
            }
            ServerMessage::InputTranscription { text } => {
                // The service detected end-of-utterance itself; the reply is
                // on its way, so release the microphone without audio_end
                self.transcript.push_user(text);
                self.state.response_pending = true;
                if self.state.capture == CaptureState::Armed {
                    self.disarm();
                    self.capture_started = None;
                }
                SessionEvent::TranscriptAppended
            }
            ServerMessage::OutputTranscription { text } => {
                self.transcript.extend_assistant(&text);
                SessionEvent::AssistantFragment(text)
            }
            ServerMessage::TurnComplete => {
                self.state.response_pending = false;
                self.transcript.seal_assistant();
                tracing::debug!("turn complete");
                SessionEvent::TurnComplete
            }
            ServerMessage::Text { text } => {
                self.transcript.push_assistant(text);
                SessionEvent::TranscriptAppended
            }
            ServerMessage::Error { message } => {
                tracing::warn!(%message, "assistant service reported an error");
                SessionEvent::RemoteError(message)
            }
        }
    }

    fn handle_unexpected_close(&mut self) {
        tracing::warn!("connection closed unexpectedly");
        self.conn = None;
        self.inbound = None;
        self.disarm();
        self.capture_started = None;
        self.state.response_pending = false;
        self.state.connection = ConnectionState::Disconnected;
        self.transcript
            .push_system("connection lost, the next recording will reconnect");
    }

    /// Stop frame production and release the microphone. Idempotent.
    fn disarm(&mut self) {
        self.armed.store(false, Ordering::SeqCst);
        self.capture.stop();
        if let Some(task) = self.forward.take() {
            task.abort();
        }
        self.state.capture = CaptureState::Idle;
    }
}

/// Forward captured chunks to the connection as encoded PCM frames.
///
/// Frames produced while not armed are dropped, never queued: stale audio
/// has no value once capture has ended.
fn spawn_frame_forwarder(
    mut frames: mpsc::UnboundedReceiver<Vec<f32>>,
    mut resampler: Option<StreamResampler>,
    handle: ConnectionHandle,
    armed: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(chunk) = frames.recv().await {
            if !armed.load(Ordering::SeqCst) {
                continue;
            }
            let samples = match resampler.as_mut() {
                Some(resampler) => match resampler.process(&chunk) {
                    Ok(samples) => samples,
                    Err(e) => {
                        tracing::warn!(error = %e, "resample failed, dropping chunk");
                        continue;
                    }
                },
                None => chunk,
            };
            if samples.is_empty() {
                continue;
            }
            if handle.send_audio(pcm::encode_i16le(&samples)).is_err() {
                // Connection gone; the session will observe the closure
                break;
            }
        }
        tracing::trace!("frame forwarder finished");
    })
}
