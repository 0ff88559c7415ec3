// Integration tests for the WebSocket Live API transport
//
// A local tokio-tungstenite server plays the remote model so the real wire
// format is exercised without network access.

use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use sufra_voice::audio::codec;
use sufra_voice::live::{Blob, LiveSetup, LiveSink, LiveTransport, ServerMessage, TransportEvent};
use sufra_voice::session::{SessionConfig, SessionStatus, VoiceSession};
use sufra_voice::testing::FakeDevices;
use sufra_voice::{ApiKey, Credentials, VoiceError, WebSocketTransport};

/// How the fake server behaves after reading the setup message
#[derive(Clone, Copy)]
enum Script {
    /// Accept, wait for one audio chunk, answer with a reply and turnComplete
    Converse,
    /// Refuse the setup with a close frame
    Refuse,
}

/// Start a one-connection server; returns its endpoint and every text frame it received
async fn serve(script: Script) -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let Some(Ok(Message::Text(setup))) = ws.next().await else {
            return;
        };
        let _ = seen_tx.send(setup.to_string());

        match script {
            Script::Refuse => {
                let _ = ws.close(None).await;
            }
            Script::Converse => {
                ws.send(Message::Text(r#"{"setupComplete":{}}"#.into()))
                    .await
                    .unwrap();

                let mut replied = false;
                while let Some(Ok(msg)) = ws.next().await {
                    match msg {
                        Message::Text(text) => {
                            let _ = seen_tx.send(text.to_string());
                            if !replied {
                                replied = true;
                                let samples = vec![0.1f32; 2400];
                                let reply = ServerMessage::audio(
                                    "audio/pcm;rate=24000",
                                    codec::text_encode(&codec::encode(&samples)),
                                );
                                let done = ServerMessage::turn_complete_marker();
                                for msg in [reply, done] {
                                    let json = serde_json::to_string(&msg).unwrap();
                                    ws.send(Message::Text(json.into())).await.unwrap();
                                }
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
            }
        }
    });

    (format!("ws://{}/live", addr), seen_rx)
}

async fn next_seen(seen: &mut mpsc::UnboundedReceiver<String>) -> serde_json::Value {
    let text = tokio::time::timeout(Duration::from_secs(5), seen.recv())
        .await
        .expect("server saw nothing")
        .expect("server gone");
    serde_json::from_str(&text).unwrap()
}

async fn next_event(events: &mut mpsc::Receiver<TransportEvent>) -> TransportEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no event")
        .expect("event stream ended")
}

#[tokio::test]
async fn test_transport_speaks_live_protocol() {
    let (endpoint, mut seen) = serve(Script::Converse).await;
    let transport = WebSocketTransport::new(endpoint);

    let mut connection = transport
        .open(&ApiKey::new("test-key"), &LiveSetup::default())
        .await
        .unwrap();

    let setup = next_seen(&mut seen).await;
    assert_eq!(
        setup["setup"]["generationConfig"]["responseModalities"][0],
        "AUDIO"
    );
    assert_eq!(
        setup["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
            ["voiceName"],
        "Zephyr"
    );
    assert!(setup["setup"]["systemInstruction"]["parts"][0]["text"]
        .as_str()
        .unwrap()
        .contains("Sufra"));

    assert_eq!(next_event(&mut connection.events).await, TransportEvent::Opened);

    connection
        .sink
        .send_audio(Blob {
            mime_type: "audio/pcm;rate=16000".to_string(),
            data: codec::text_encode(&codec::encode(&[0.5; 8])),
        })
        .await
        .unwrap();

    let input = next_seen(&mut seen).await;
    let chunk = &input["realtimeInput"]["mediaChunks"][0];
    assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
    assert_eq!(
        codec::text_decode(chunk["data"].as_str().unwrap()).unwrap().len(),
        16
    );

    match next_event(&mut connection.events).await {
        TransportEvent::Message(msg) => assert_eq!(msg.audio_chunks().count(), 1),
        other => panic!("expected audio reply, got {:?}", other),
    }
    match next_event(&mut connection.events).await {
        TransportEvent::Message(msg) => assert!(msg.turn_complete()),
        other => panic!("expected turnComplete, got {:?}", other),
    }

    connection.sink.close().await.unwrap();
    connection.sink.close().await.unwrap();
    assert!(connection
        .sink
        .send_audio(Blob {
            mime_type: "audio/pcm;rate=16000".to_string(),
            data: String::new(),
        })
        .await
        .is_err());
}

#[tokio::test]
async fn test_session_over_websocket() {
    let (endpoint, mut seen) = serve(Script::Converse).await;
    let devices = FakeDevices::new();
    let session = VoiceSession::new(
        SessionConfig::default(),
        Credentials::Static(ApiKey::new("test-key")),
        Arc::new(devices.clone()),
        Arc::new(WebSocketTransport::new(endpoint)),
    );

    session.connect().await.unwrap();
    assert_eq!(session.status(), SessionStatus::Connected);
    next_seen(&mut seen).await;

    assert!(devices.mic().speak(&[0.2; 4096]));
    let input = next_seen(&mut seen).await;
    assert!(input["realtimeInput"].is_object());

    // 2400 samples at 24kHz
    assert!(devices.speaker().wait_scheduled(1).await);
    let scheduled = devices.speaker().scheduled();
    assert!((scheduled[0].duration - 0.1).abs() < 1e-9);

    session.disconnect().await;
    assert_eq!(session.status(), SessionStatus::Disconnected);
    assert_eq!(devices.speaker().closed(), 1);
}

#[tokio::test]
async fn test_refused_setup_is_a_handshake_error() {
    let (endpoint, _seen) = serve(Script::Refuse).await;
    let devices = FakeDevices::new();
    let session = VoiceSession::new(
        SessionConfig::default(),
        Credentials::Static(ApiKey::new("bad-key")),
        Arc::new(devices.clone()),
        Arc::new(WebSocketTransport::new(endpoint)),
    );

    let result = session.connect().await;
    assert!(matches!(result, Err(VoiceError::Handshake { .. })));
    assert_eq!(session.status(), SessionStatus::Error);
    assert!(!devices.mic().is_capturing());
}

#[tokio::test]
async fn test_unreachable_endpoint_is_a_handshake_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = WebSocketTransport::new(format!("ws://{}/live", addr));
    let result = transport
        .open(&ApiKey::new("test-key"), &LiveSetup::default())
        .await;

    assert!(matches!(result, Err(VoiceError::Handshake { .. })));
}
