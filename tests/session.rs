//! End-to-end session behavior over in-process fakes: push-to-talk flow,
//! transcript coalescing, playback queueing, reconnection, and owner id
//! persistence.

mod common;

use std::time::Duration;

use common::{
    FakeConnector, FakeMic, SlowSink, new_session, new_session_with_profile,
    new_session_with_sink, settle,
};

use ally_voice::protocol::{ClientMessage, ServerMessage, UserProfile, UserStatusKind};
use ally_voice::session::{CaptureState, ConnectionState, OwnerStatus};
use ally_voice::store::{self, ProfileRepo};
use ally_voice::transcript::Origin;
use ally_voice::transport::OutboundCommand;
use ally_voice::{Error, SessionEvent};

fn fragment(text: &str) -> ServerMessage {
    ServerMessage::OutputTranscription {
        text: text.to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn first_capture_connects_and_identifies() {
    let connector = FakeConnector::default();
    let mic = FakeMic::default();
    let mut session = new_session(&connector, &mic);

    assert!(!session.has_connection());
    session.start_capture().await.unwrap();

    assert_eq!(session.state().connection, ConnectionState::Open);
    assert_eq!(session.state().capture, CaptureState::Armed);
    assert!(mic.is_capturing());

    // A fresh client identifies with an empty user id
    let sent = connector.sent(0);
    assert_eq!(
        sent.first(),
        Some(&OutboundCommand::Control(ClientMessage::Hello {
            user_id: String::new()
        }))
    );
}

#[tokio::test(start_paused = true)]
async fn utterance_streams_frames_then_audio_end() {
    let connector = FakeConnector::default();
    let mic = FakeMic::default();
    let mut session = new_session(&connector, &mic);

    session.start_capture().await.unwrap();
    mic.feed(vec![0.25; 160]);
    mic.feed(vec![-0.25; 160]);
    settle().await;

    tokio::time::advance(Duration::from_millis(1500)).await;
    session.stop_capture().unwrap();

    assert_eq!(session.state().capture, CaptureState::Idle);
    assert!(session.state().response_pending);
    assert!(!mic.is_capturing());

    let sent = connector.sent(0);
    let audio_frames: Vec<_> = sent
        .iter()
        .filter_map(|cmd| match cmd {
            OutboundCommand::Audio(frame) => Some(frame),
            _ => None,
        })
        .collect();
    assert_eq!(audio_frames.len(), 2);
    // 160 samples encode to 320 bytes of 16-bit PCM
    assert_eq!(audio_frames[0].len(), 320);

    let ends = sent
        .iter()
        .filter(|cmd| matches!(cmd, OutboundCommand::Control(ClientMessage::AudioEnd)))
        .count();
    assert_eq!(ends, 1);
    assert!(matches!(
        sent.last(),
        Some(OutboundCommand::Control(ClientMessage::AudioEnd))
    ));
}

#[tokio::test(start_paused = true)]
async fn recording_elapsed_is_live_while_armed() {
    let connector = FakeConnector::default();
    let mic = FakeMic::default();
    let mut session = new_session(&connector, &mic);

    // Nothing to display while idle
    assert!(session.recording_elapsed().is_none());

    session.start_capture().await.unwrap();
    tokio::time::advance(Duration::from_millis(1300)).await;

    // Drives the in-place recording status line
    let elapsed = session.recording_elapsed().unwrap();
    assert!((elapsed - 1.3).abs() < 0.05, "{elapsed}");

    session.stop_capture().unwrap();
    assert!(session.recording_elapsed().is_none());
}

#[tokio::test(start_paused = true)]
async fn short_recording_is_cancelled() {
    let connector = FakeConnector::default();
    let mic = FakeMic::default();
    let mut session = new_session(&connector, &mic);

    session.start_capture().await.unwrap();
    tokio::time::advance(Duration::from_millis(400)).await;

    let err = session.stop_capture().unwrap_err();
    assert!(matches!(err, Error::Capture(_)));

    // Capture released, but nothing was committed
    assert_eq!(session.state().capture, CaptureState::Idle);
    assert!(!session.state().response_pending);
    assert!(!mic.is_capturing());

    let sent = connector.sent(0);
    assert!(
        !sent
            .iter()
            .any(|cmd| matches!(cmd, OutboundCommand::Control(ClientMessage::AudioEnd)))
    );
}

#[tokio::test(start_paused = true)]
async fn frames_after_disarm_are_dropped() {
    let connector = FakeConnector::default();
    let mic = FakeMic::default();
    let mut session = new_session(&connector, &mic);

    session.start_capture().await.unwrap();
    tokio::time::advance(Duration::from_millis(1500)).await;
    session.stop_capture().unwrap();
    let _ = connector.sent(0);

    // Device callbacks can race the stop; late chunks must not go out
    mic.feed(vec![0.5; 160]);
    settle().await;

    assert!(
        !connector
            .sent(0)
            .iter()
            .any(|cmd| matches!(cmd, OutboundCommand::Audio(_)))
    );
}

#[tokio::test(start_paused = true)]
async fn capture_is_mutually_exclusive_with_itself_and_pending_response() {
    let connector = FakeConnector::default();
    let mic = FakeMic::default();
    let mut session = new_session(&connector, &mic);

    session.start_capture().await.unwrap();
    assert!(matches!(
        session.start_capture().await,
        Err(Error::Capture(_))
    ));

    tokio::time::advance(Duration::from_millis(1500)).await;
    session.stop_capture().unwrap();

    // Blocked until the assistant finishes its turn
    assert!(matches!(
        session.start_capture().await,
        Err(Error::Capture(_))
    ));

    connector.push(ServerMessage::TurnComplete);
    assert_eq!(session.pump().await, SessionEvent::TurnComplete);

    session.start_capture().await.unwrap();
    // The open connection is reused, not re-established
    assert_eq!(connector.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn assistant_fragments_coalesce_until_turn_complete() {
    let connector = FakeConnector::default();
    let mic = FakeMic::default();
    let mut session = new_session(&connector, &mic);
    session.start_capture().await.unwrap();

    connector.push(fragment("the rice"));
    assert_eq!(
        session.pump().await,
        SessionEvent::AssistantFragment("the rice".to_string())
    );
    connector.push(fragment("needs more water"));
    session.pump().await;

    let last = session.transcript().entries().last().unwrap();
    assert_eq!(last.origin, Origin::Assistant);
    assert_eq!(last.text, "the rice needs more water");

    connector.push(ServerMessage::TurnComplete);
    session.pump().await;
    connector.push(fragment("anything else?"));
    session.pump().await;

    let assistant_entries: Vec<_> = session
        .transcript()
        .entries()
        .iter()
        .filter(|e| e.origin == Origin::Assistant)
        .collect();
    assert_eq!(assistant_entries.len(), 2);
    assert_eq!(assistant_entries[1].text, "anything else?");
}

#[tokio::test(start_paused = true)]
async fn input_transcription_releases_capture_and_marks_pending() {
    let connector = FakeConnector::default();
    let mic = FakeMic::default();
    let mut session = new_session(&connector, &mic);
    session.start_capture().await.unwrap();

    // The service detected end-of-utterance on its own
    connector.push(ServerMessage::InputTranscription {
        text: "when should I water the chilli".to_string(),
    });
    assert_eq!(session.pump().await, SessionEvent::TranscriptAppended);

    assert_eq!(session.state().capture, CaptureState::Idle);
    assert!(!mic.is_capturing());
    assert!(session.state().response_pending);

    let user_entry = session
        .transcript()
        .entries()
        .iter()
        .find(|e| e.origin == Origin::User)
        .unwrap();
    assert_eq!(user_entry.text, "when should I water the chilli");
}

#[tokio::test(start_paused = true)]
async fn inbound_speech_buffers_are_queued() {
    let connector = FakeConnector::default();
    let mic = FakeMic::default();
    let mut session =
        new_session_with_sink(&connector, &mic, Box::new(SlowSink(Duration::from_millis(300))));
    session.start_capture().await.unwrap();

    connector.push_audio(vec![0; 320]);
    connector.push_audio(vec![0; 640]);
    connector.push_audio(vec![0; 960]);
    assert_eq!(session.pump().await, SessionEvent::SpeechQueued);
    assert_eq!(session.pump().await, SessionEvent::SpeechQueued);
    assert_eq!(session.pump().await, SessionEvent::SpeechQueued);

    // The worker holds the first buffer; later ones wait their turn
    assert!(session.playback_pending() >= 1);
}

#[tokio::test(start_paused = true)]
async fn teardown_resets_everything_and_is_idempotent() {
    let connector = FakeConnector::default();
    let mic = FakeMic::default();
    let mut session =
        new_session_with_sink(&connector, &mic, Box::new(SlowSink(Duration::from_millis(300))));

    session.start_capture().await.unwrap();
    connector.push_audio(vec![0; 320]);
    connector.push_audio(vec![0; 320]);
    session.pump().await;
    session.pump().await;

    session.teardown();

    assert!(!session.has_connection());
    assert!(!mic.is_capturing());
    assert!(session.transcript().is_empty());
    assert_eq!(session.playback_pending(), 0);
    assert_eq!(session.state().connection, ConnectionState::Disconnected);
    assert_eq!(session.state().capture, CaptureState::Idle);
    assert!(!session.state().response_pending);

    // A close went out on the wire
    assert!(
        connector
            .sent(0)
            .iter()
            .any(|cmd| matches!(cmd, OutboundCommand::Close))
    );

    session.teardown();
}

#[tokio::test(start_paused = true)]
async fn unexpected_close_releases_capture_and_next_capture_reconnects() {
    let connector = FakeConnector::default();
    let mic = FakeMic::default();
    let mut session = new_session(&connector, &mic);

    session.start_capture().await.unwrap();
    connector.close_server();

    assert_eq!(session.pump().await, SessionEvent::Disconnected);
    assert!(!session.has_connection());
    assert_eq!(session.state().capture, CaptureState::Idle);
    assert!(!mic.is_capturing());
    assert!(!session.state().response_pending);

    let last = session.transcript().entries().last().unwrap();
    assert_eq!(last.origin, Origin::System);
    assert!(last.text.contains("connection lost"));

    session.start_capture().await.unwrap();
    assert_eq!(connector.connect_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_connect_leaves_session_disconnected() {
    let connector = FakeConnector::default();
    connector.refuse_connections();
    let mic = FakeMic::default();
    let mut session = new_session(&connector, &mic);

    assert!(matches!(
        session.start_capture().await,
        Err(Error::Connection(_))
    ));
    assert_eq!(session.state().connection, ConnectionState::Disconnected);
    assert_eq!(session.state().capture, CaptureState::Idle);
    assert!(!mic.is_capturing());
}

#[tokio::test(start_paused = true)]
async fn assigned_owner_id_is_persisted_and_replayed() {
    let connector = FakeConnector::default();
    let mic = FakeMic::default();
    let profile = ProfileRepo::new(store::init_memory().unwrap());
    let mut session = new_session_with_profile(&connector, &mic, profile.clone());

    session.start_capture().await.unwrap();
    connector.push(ServerMessage::AssignUserId {
        user_id: "farmer-7".to_string(),
    });
    assert_eq!(session.pump().await, SessionEvent::TranscriptAppended);
    assert_eq!(profile.owner_id().unwrap().as_deref(), Some("farmer-7"));

    session.teardown();
    session.start_capture().await.unwrap();

    // The remembered id goes out verbatim on the next connection
    let sent = connector.sent(1);
    assert_eq!(
        sent.first(),
        Some(&OutboundCommand::Control(ClientMessage::Hello {
            user_id: "farmer-7".to_string()
        }))
    );
}

#[tokio::test(start_paused = true)]
async fn user_status_updates_owner_and_transcript() {
    let connector = FakeConnector::default();
    let mic = FakeMic::default();
    let mut session = new_session(&connector, &mic);
    session.start_capture().await.unwrap();

    connector.push(ServerMessage::UserStatus {
        status: UserStatusKind::ExistingUser,
        user_data: Some(UserProfile {
            name: Some("Ravi".to_string()),
            village: Some("Nellore".to_string()),
            crops: Some("rice".to_string()),
        }),
    });
    session.pump().await;

    assert_eq!(session.state().owner_status, OwnerStatus::Returning);
    let last = session.transcript().entries().last().unwrap();
    assert!(last.text.contains("Ravi"));
    assert!(last.text.contains("Nellore"));
}

#[tokio::test(start_paused = true)]
async fn remote_error_is_surfaced_without_breaking_the_session() {
    let connector = FakeConnector::default();
    let mic = FakeMic::default();
    let mut session = new_session(&connector, &mic);
    session.start_capture().await.unwrap();

    connector.push(ServerMessage::Error {
        message: "speech model unavailable".to_string(),
    });
    assert_eq!(
        session.pump().await,
        SessionEvent::RemoteError("speech model unavailable".to_string())
    );

    // The connection is still usable afterwards
    connector.push(fragment("sorry, try again"));
    assert!(matches!(
        session.pump().await,
        SessionEvent::AssistantFragment(_)
    ));
}
