//! Shared fakes for session tests: an in-process connector, a scripted
//! microphone, and playback sinks, so sessions run with no network or
//! audio hardware.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use ally_voice::audio::{CAPTURE_SAMPLE_RATE, CaptureSource, PlaybackSink};
use ally_voice::protocol::ServerMessage;
use ally_voice::store::{self, ProfileRepo};
use ally_voice::transport::{Connection, ConnectionHandle, InboundFrame, OutboundCommand};
use ally_voice::{Config, Connector, Error, Result, VoiceSessionClient};

/// Connector that hands out in-process channel pairs instead of sockets.
///
/// Each accepted connect appends its outbound receiver to `outbound` and
/// replaces the inbound sender, so tests can inspect what the session sent
/// per connection and inject server frames.
#[derive(Clone, Default)]
pub struct FakeConnector {
    refuse: Arc<AtomicBool>,
    connects: Arc<AtomicUsize>,
    outbound: Arc<Mutex<Vec<mpsc::UnboundedReceiver<OutboundCommand>>>>,
    server: Arc<Mutex<Option<mpsc::UnboundedSender<InboundFrame>>>>,
}

impl FakeConnector {
    /// Make subsequent connection attempts fail
    pub fn refuse_connections(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    /// How many connections have been accepted
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Deliver a control message on the current connection
    pub fn push(&self, msg: ServerMessage) {
        let guard = self.server.lock().unwrap();
        let sender = guard.as_ref().expect("no open connection");
        sender.send(InboundFrame::Control(msg)).unwrap();
    }

    /// Deliver an audio buffer on the current connection
    pub fn push_audio(&self, buffer: Vec<u8>) {
        let guard = self.server.lock().unwrap();
        let sender = guard.as_ref().expect("no open connection");
        sender.send(InboundFrame::Audio(buffer)).unwrap();
    }

    /// Drop the server end of the current connection, as a crashed or
    /// unreachable service would
    pub fn close_server(&self) {
        *self.server.lock().unwrap() = None;
    }

    /// Everything the session has sent on connection `index` so far
    pub fn sent(&self, index: usize) -> Vec<OutboundCommand> {
        let mut guard = self.outbound.lock().unwrap();
        let rx = guard.get_mut(index).expect("no such connection");
        let mut commands = Vec::new();
        while let Ok(cmd) = rx.try_recv() {
            commands.push(cmd);
        }
        commands
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, _url: &str) -> Result<Connection> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(Error::Connection("connection refused".to_string()));
        }

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();

        self.outbound.lock().unwrap().push(cmd_rx);
        *self.server.lock().unwrap() = Some(frame_tx);
        self.connects.fetch_add(1, Ordering::SeqCst);

        Ok(Connection {
            handle: ConnectionHandle::new(cmd_tx),
            inbound: frame_rx,
        })
    }
}

/// Microphone fake producing chunks only when the test feeds them
#[derive(Clone, Default)]
pub struct FakeMic {
    frames: Arc<Mutex<Option<mpsc::UnboundedSender<Vec<f32>>>>>,
}

impl FakeMic {
    /// Emit one capture chunk, as the device callback would
    pub fn feed(&self, chunk: Vec<f32>) {
        if let Some(tx) = self.frames.lock().unwrap().as_ref() {
            let _ = tx.send(chunk);
        }
    }

    /// Whether the session currently holds the device
    pub fn is_capturing(&self) -> bool {
        self.frames.lock().unwrap().is_some()
    }
}

impl CaptureSource for FakeMic {
    fn start(&mut self, frames: mpsc::UnboundedSender<Vec<f32>>) -> Result<()> {
        *self.frames.lock().unwrap() = Some(frames);
        Ok(())
    }

    fn stop(&mut self) {
        *self.frames.lock().unwrap() = None;
    }

    fn sample_rate(&self) -> u32 {
        CAPTURE_SAMPLE_RATE
    }

    fn is_capturing(&self) -> bool {
        self.frames.lock().unwrap().is_some()
    }
}

/// Sink that discards samples instantly
pub struct NullSink;

impl PlaybackSink for NullSink {
    fn play(&mut self, _samples: Vec<f32>) -> Result<()> {
        Ok(())
    }
}

/// Sink that holds each buffer for a fixed delay, keeping later buffers
/// visibly queued
pub struct SlowSink(pub Duration);

impl PlaybackSink for SlowSink {
    fn play(&mut self, _samples: Vec<f32>) -> Result<()> {
        std::thread::sleep(self.0);
        Ok(())
    }
}

/// Config pointing at nothing real; the fake connector ignores the URL
pub fn test_config() -> Config {
    Config {
        server_url: "ws://ally.test/ws".to_string(),
        data_dir: std::env::temp_dir(),
        connect_timeout: Duration::from_secs(5),
    }
}

/// Session over the given fakes with a fresh in-memory profile store
pub fn new_session(connector: &FakeConnector, mic: &FakeMic) -> VoiceSessionClient {
    let profile = ProfileRepo::new(store::init_memory().unwrap());
    new_session_with_profile(connector, mic, profile)
}

pub fn new_session_with_profile(
    connector: &FakeConnector,
    mic: &FakeMic,
    profile: ProfileRepo,
) -> VoiceSessionClient {
    VoiceSessionClient::new(
        test_config(),
        Box::new(connector.clone()),
        profile,
        Box::new(mic.clone()),
        Box::new(NullSink),
    )
}

/// Session with a custom playback sink, for tests that watch the queue
pub fn new_session_with_sink(
    connector: &FakeConnector,
    mic: &FakeMic,
    sink: Box<dyn PlaybackSink>,
) -> VoiceSessionClient {
    let profile = ProfileRepo::new(store::init_memory().unwrap());
    VoiceSessionClient::new(
        test_config(),
        Box::new(connector.clone()),
        profile,
        Box::new(mic.clone()),
        sink,
    )
}

/// Let spawned tasks (the frame forwarder) catch up
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
