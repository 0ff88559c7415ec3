// Integration tests for the voice session lifecycle
//
// These tests drive a `VoiceSession` end to end against the in-memory
// microphone, speaker and Live API endpoint from `sufra_voice::testing`.

use std::sync::Arc;
use std::time::Duration;

use sufra_voice::audio::codec;
use sufra_voice::live::messages::ServerContent;
use sufra_voice::live::{ServerMessage, TransportEvent};
use sufra_voice::session::{SessionConfig, SessionSnapshot, SessionStatus, VoiceSession};
use sufra_voice::testing::{FakeDevices, FakeTransport};
use sufra_voice::{ApiKey, Credentials, VoiceError};

const REPLY_MIME: &str = "audio/pcm;rate=24000";

fn session(devices: &FakeDevices, transport: &FakeTransport) -> VoiceSession {
    session_with(devices, transport, SessionConfig::default())
}

fn session_with(
    devices: &FakeDevices,
    transport: &FakeTransport,
    config: SessionConfig,
) -> VoiceSession {
    VoiceSession::new(
        config,
        Credentials::Static(ApiKey::new("test-key")),
        Arc::new(devices.clone()),
        Arc::new(transport.clone()),
    )
}

/// One reply chunk of `seconds` of 24kHz audio
fn reply(seconds: f64) -> ServerMessage {
    let samples = vec![0.25f32; (seconds * 24000.0).round() as usize];
    ServerMessage::audio(REPLY_MIME, codec::text_encode(&codec::encode(&samples)))
}

fn interrupted() -> ServerMessage {
    ServerMessage {
        server_content: Some(ServerContent {
            interrupted: true,
            ..ServerContent::default()
        }),
        ..ServerMessage::default()
    }
}

async fn wait_until(
    session: &VoiceSession,
    condition: impl FnMut(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    let mut rx = session.subscribe();
    let snapshot = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(condition))
        .await
        .expect("timed out waiting for session state")
        .expect("session dropped");
    *snapshot
}

#[tokio::test]
async fn test_connect_streams_microphone_frames() {
    let devices = FakeDevices::new();
    let transport = FakeTransport::new();
    let session = session(&devices, &transport);

    session.connect().await.unwrap();
    assert_eq!(session.status(), SessionStatus::Connected);
    assert!(devices.mic().is_capturing());
    assert_eq!(transport.last_key().as_deref(), Some("test-key"));
    assert_eq!(transport.last_setup().unwrap().voice, "Zephyr");

    assert!(devices.mic().speak(&[0.5; 4096]));
    assert!(transport.wait_sent(1).await);

    let sent = transport.sent();
    assert_eq!(sent[0].mime_type, "audio/pcm;rate=16000");
    let bytes = codec::text_decode(&sent[0].data).unwrap();
    assert_eq!(bytes.len(), 8192);
    assert_eq!(&bytes[..2], &[0x00, 0x40]);

    // Loud input drives the visual level to the top
    let snapshot = wait_until(&session, |s| s.volume > 0.9).await;
    assert!(!snapshot.is_ai_speaking);

    session.disconnect().await;
}

#[tokio::test]
async fn test_frames_are_sent_in_capture_order() {
    let devices = FakeDevices::new();
    let transport = FakeTransport::new();
    let session = session(&devices, &transport);
    session.connect().await.unwrap();

    for i in 0..5 {
        assert!(devices.mic().speak(&[i as f32 / 10.0; 16]));
    }
    assert!(transport.wait_sent(5).await);

    let firsts: Vec<i16> = transport
        .sent()
        .iter()
        .map(|blob| {
            let bytes = codec::text_decode(&blob.data).unwrap();
            i16::from_le_bytes([bytes[0], bytes[1]])
        })
        .collect();
    let mut sorted = firsts.clone();
    sorted.sort();
    assert_eq!(firsts, sorted);

    session.disconnect().await;
}

#[tokio::test]
async fn test_reply_chunks_play_back_to_back() {
    let devices = FakeDevices::new();
    let transport = FakeTransport::new();
    let speaker = devices.speaker();
    speaker.set_time(3.25);

    let session = session(&devices, &transport);
    session.connect().await.unwrap();

    for _ in 0..3 {
        assert!(transport.emit(TransportEvent::Message(reply(0.5))));
    }
    assert!(speaker.wait_scheduled(3).await);

    let starts: Vec<f64> = speaker.scheduled().iter().map(|s| s.start_at).collect();
    assert_eq!(starts, vec![3.25, 3.75, 4.25]);
    for pair in speaker.scheduled().windows(2) {
        assert!((pair[0].end() - pair[1].start_at).abs() < 1e-9);
    }

    let snapshot = wait_until(&session, |s| s.is_ai_speaking).await;
    assert_eq!(snapshot.status, SessionStatus::Connected);

    session.disconnect().await;
}

#[tokio::test]
async fn test_late_chunk_starts_now_instead_of_in_the_past() {
    let devices = FakeDevices::new();
    let transport = FakeTransport::new();
    let speaker = devices.speaker();
    let session = session(&devices, &transport);
    session.connect().await.unwrap();

    transport.emit(TransportEvent::Message(reply(0.5)));
    assert!(speaker.wait_scheduled(1).await);

    speaker.advance(2.0);
    transport.emit(TransportEvent::Message(reply(0.5)));
    assert!(speaker.wait_scheduled(2).await);

    let scheduled = speaker.scheduled();
    assert_eq!(scheduled[0].start_at, 0.0);
    assert_eq!(scheduled[1].start_at, 2.0);

    session.disconnect().await;
}

#[tokio::test]
async fn test_turn_complete_clears_speaking() {
    let devices = FakeDevices::new();
    let transport = FakeTransport::new();
    let session = session(&devices, &transport);
    session.connect().await.unwrap();

    transport.emit(TransportEvent::Message(reply(2.0)));
    wait_until(&session, |s| s.is_ai_speaking).await;

    transport.emit(TransportEvent::Message(ServerMessage::turn_complete_marker()));
    let snapshot = wait_until(&session, |s| !s.is_ai_speaking).await;
    assert_eq!(snapshot.status, SessionStatus::Connected);

    session.disconnect().await;
}

#[tokio::test]
async fn test_speaking_clears_when_playback_ends() {
    let devices = FakeDevices::new();
    let transport = FakeTransport::new();
    let session = session(&devices, &transport);
    session.connect().await.unwrap();

    transport.emit(TransportEvent::Message(reply(0.05)));
    assert!(devices.speaker().wait_scheduled(1).await);
    assert!(session.snapshot().is_ai_speaking);

    devices.speaker().advance(0.1);
    let snapshot = wait_until(&session, |s| !s.is_ai_speaking).await;
    assert_eq!(snapshot.status, SessionStatus::Connected);

    session.disconnect().await;
}

#[tokio::test]
async fn test_speaking_follows_device_clock_not_wall_clock() {
    let devices = FakeDevices::new();
    let transport = FakeTransport::new();
    let speaker = devices.speaker();
    let session = session(&devices, &transport);
    session.connect().await.unwrap();

    transport.emit(TransportEvent::Message(reply(0.05)));
    assert!(speaker.wait_scheduled(1).await);

    // The wall-clock deadline passes while the speaker has rendered nothing
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(session.snapshot().is_ai_speaking);

    speaker.advance(0.02);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(session.snapshot().is_ai_speaking);

    speaker.advance(0.05);
    let snapshot = wait_until(&session, |s| !s.is_ai_speaking).await;
    assert_eq!(snapshot.status, SessionStatus::Connected);

    session.disconnect().await;
}

#[tokio::test]
async fn test_interruption_drops_queued_reply() {
    let devices = FakeDevices::new();
    let transport = FakeTransport::new();
    let speaker = devices.speaker();
    let session = session(&devices, &transport);
    session.connect().await.unwrap();

    transport.emit(TransportEvent::Message(reply(1.0)));
    transport.emit(TransportEvent::Message(reply(1.0)));
    assert!(speaker.wait_scheduled(2).await);
    assert_eq!(speaker.pending(), 2);

    transport.emit(TransportEvent::Message(interrupted()));
    let snapshot = wait_until(&session, |s| !s.is_ai_speaking).await;
    assert_eq!(snapshot.status, SessionStatus::Connected);
    assert_eq!(speaker.cleared(), 1);
    assert_eq!(speaker.pending(), 0);

    // The next reply starts from the device clock, not after the dropped audio
    transport.emit(TransportEvent::Message(reply(0.5)));
    assert!(speaker.wait_scheduled(3).await);
    assert_eq!(speaker.scheduled()[2].start_at, 0.0);

    session.disconnect().await;
}

#[tokio::test]
async fn test_corrupt_chunks_are_dropped() {
    let devices = FakeDevices::new();
    let transport = FakeTransport::new();
    let speaker = devices.speaker();
    let session = session(&devices, &transport);
    session.connect().await.unwrap();

    transport.emit(TransportEvent::Message(ServerMessage::audio(REPLY_MIME, "%%% not base64")));
    transport.emit(TransportEvent::Message(ServerMessage::audio(
        REPLY_MIME,
        codec::text_encode(&[1, 2, 3]),
    )));
    transport.emit(TransportEvent::Message(reply(0.5)));
    assert!(speaker.wait_scheduled(1).await);

    assert_eq!(session.status(), SessionStatus::Connected);
    assert_eq!(speaker.scheduled().len(), 1);
    assert_eq!(speaker.scheduled()[0].start_at, 0.0);

    let stats = session.stats().await;
    assert_eq!(stats.chunks_dropped, 2);
    assert_eq!(stats.chunks_played, 1);
    assert!((stats.reply_audio_secs - 0.5).abs() < 1e-6);

    session.disconnect().await;
}

#[tokio::test]
async fn test_missing_credentials_fail_before_touching_devices() {
    let devices = FakeDevices::new();
    let transport = FakeTransport::new();
    let session = VoiceSession::new(
        SessionConfig::default(),
        Credentials::Missing,
        Arc::new(devices.clone()),
        Arc::new(transport.clone()),
    );

    let result = session.connect().await;
    assert!(matches!(result, Err(VoiceError::Configuration { .. })));
    assert_eq!(session.status(), SessionStatus::Error);
    assert_eq!(devices.mic().opened(), 0);
    assert_eq!(devices.speaker().opened(), 0);
    assert_eq!(transport.opened(), 0);
}

#[tokio::test]
async fn test_denied_microphone_releases_playback() {
    let devices = FakeDevices::new().deny_microphone("NotAllowedError");
    let transport = FakeTransport::new();
    let session = session(&devices, &transport);

    let result = session.connect().await;
    assert!(matches!(result, Err(VoiceError::DeviceUnavailable { .. })));
    assert_eq!(session.status(), SessionStatus::Error);
    assert_eq!(devices.speaker().closed(), 1);
    assert_eq!(transport.opened(), 0);
}

#[tokio::test]
async fn test_rejected_handshake_is_an_error() {
    let devices = FakeDevices::new();
    let transport = FakeTransport::rejecting("API key not valid");
    let session = session(&devices, &transport);

    let result = session.connect().await;
    assert!(matches!(result, Err(VoiceError::Handshake { .. })));
    assert_eq!(session.status(), SessionStatus::Error);
    assert!(!devices.mic().is_capturing());
    assert_eq!(devices.speaker().closed(), 1);

    // Retrying from Error goes through Connecting again
    let result = session.connect().await;
    assert!(result.is_err());
    assert_eq!(session.status(), SessionStatus::Error);
}

#[tokio::test]
async fn test_handshake_times_out() {
    let devices = FakeDevices::new();
    let transport = FakeTransport::stalling();
    let config = SessionConfig {
        handshake_timeout: Duration::from_millis(100),
        ..SessionConfig::default()
    };
    let session = session_with(&devices, &transport, config);

    let result = session.connect().await;
    assert!(matches!(result, Err(VoiceError::Handshake { .. })));
    assert_eq!(session.status(), SessionStatus::Error);
    assert_eq!(transport.closed(), 1);
    assert_eq!(devices.speaker().closed(), 1);
}

#[tokio::test]
async fn test_disconnect_during_handshake_cancels_connect() {
    let devices = FakeDevices::new();
    let transport = FakeTransport::stalling();
    let session = Arc::new(session(&devices, &transport));

    let connecting = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.connect().await })
    };

    wait_until(&session, |s| s.status == SessionStatus::Connecting).await;
    while transport.opened() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    session.disconnect().await;

    let result = connecting.await.unwrap();
    assert!(matches!(result, Err(VoiceError::Cancelled)));
    assert_eq!(session.status(), SessionStatus::Disconnected);
    assert_eq!(transport.closed(), 1);
    assert_eq!(devices.speaker().closed(), 1);
    assert!(!devices.mic().is_capturing());
}

#[tokio::test]
async fn test_disconnect_releases_everything() {
    let devices = FakeDevices::new();
    let transport = FakeTransport::new();
    let speaker = devices.speaker();
    let session = session(&devices, &transport);
    session.connect().await.unwrap();

    transport.emit(TransportEvent::Message(reply(1.0)));
    assert!(speaker.wait_scheduled(1).await);
    assert_eq!(speaker.pending(), 1);

    session.disconnect().await;

    let snapshot = session.snapshot();
    assert_eq!(snapshot.status, SessionStatus::Disconnected);
    assert_eq!(snapshot.volume, 0.0);
    assert!(!snapshot.is_ai_speaking);
    assert!(!devices.mic().is_capturing());
    assert_eq!(devices.mic().stopped(), 1);
    assert_eq!(speaker.pending(), 0);
    assert_eq!(speaker.closed(), 1);
    assert_eq!(transport.closed(), 1);
    assert!(session.session_id().await.is_none());

    // Idempotent
    session.disconnect().await;
    assert_eq!(session.status(), SessionStatus::Disconnected);
    assert_eq!(speaker.closed(), 1);
}

#[tokio::test]
async fn test_disconnect_when_idle_is_a_no_op() {
    let devices = FakeDevices::new();
    let transport = FakeTransport::new();
    let session = session(&devices, &transport);

    session.disconnect().await;
    assert_eq!(session.status(), SessionStatus::Disconnected);
    assert_eq!(transport.opened(), 0);
}

#[tokio::test]
async fn test_second_connect_is_ignored() {
    let devices = FakeDevices::new();
    let transport = FakeTransport::new();
    let session = session(&devices, &transport);

    session.connect().await.unwrap();
    let first = session.session_id().await;
    session.connect().await.unwrap();

    assert_eq!(transport.opened(), 1);
    assert_eq!(session.session_id().await, first);
    assert_eq!(session.status(), SessionStatus::Connected);

    session.disconnect().await;
}

#[tokio::test]
async fn test_remote_close_returns_to_disconnected() {
    let devices = FakeDevices::new();
    let transport = FakeTransport::new();
    let session = session(&devices, &transport);
    session.connect().await.unwrap();

    transport.emit(TransportEvent::Closed {
        reason: Some("session expired".to_string()),
    });
    wait_until(&session, |s| s.status == SessionStatus::Disconnected).await;
    assert!(!devices.mic().is_capturing());

    // A fresh session can be opened afterwards
    session.connect().await.unwrap();
    assert_eq!(transport.opened(), 2);
    assert_eq!(session.status(), SessionStatus::Connected);

    session.disconnect().await;
}

#[tokio::test]
async fn test_transport_error_mid_stream() {
    let devices = FakeDevices::new();
    let transport = FakeTransport::new();
    let session = session(&devices, &transport);
    session.connect().await.unwrap();

    transport.emit(TransportEvent::Error("connection reset".to_string()));
    let snapshot = wait_until(&session, |s| s.status == SessionStatus::Error).await;
    assert_eq!(snapshot.volume, 0.0);
    assert!(!devices.mic().is_capturing());
    assert_eq!(transport.closed(), 1);

    session.connect().await.unwrap();
    assert_eq!(session.status(), SessionStatus::Connected);

    session.disconnect().await;
}

#[tokio::test]
async fn test_full_conversation() {
    let devices = FakeDevices::new();
    let transport = FakeTransport::new();
    let speaker = devices.speaker();
    let session = session(&devices, &transport);
    session.connect().await.unwrap();

    // The user speaks: three silent frames go out in order
    for ts in [0u64, 256, 512] {
        assert!(devices.mic().push(sufra_voice::AudioFrame::silence(4096, 16000, ts)));
    }
    assert!(transport.wait_sent(3).await);
    assert!(transport
        .sent()
        .iter()
        .all(|blob| codec::text_decode(&blob.data).unwrap() == vec![0u8; 8192]));
    assert_eq!(session.snapshot().volume, 0.0);

    // The model answers with two chunks, then ends its turn
    transport.emit(TransportEvent::Message(reply(1.0)));
    transport.emit(TransportEvent::Message(reply(1.0)));
    assert!(speaker.wait_scheduled(2).await);
    assert!(session.snapshot().is_ai_speaking);
    assert_eq!(speaker.scheduled()[1].start_at, 1.0);

    transport.emit(TransportEvent::Message(ServerMessage::turn_complete_marker()));
    wait_until(&session, |s| !s.is_ai_speaking).await;

    let stats = session.stats().await;
    assert_eq!(stats.frames_sent, 3);
    assert_eq!(stats.chunks_played, 2);

    session.disconnect().await;
    assert_eq!(speaker.pending(), 0);
    assert_eq!(session.status(), SessionStatus::Disconnected);
}
