// Live API over WebSocket
//
// The client sends JSON text frames (setup, realtime input). The server
// answers with JSON in text or binary frames; `setupComplete` marks the
// stream as open. A reader task turns incoming frames into
// `TransportEvent`s for the session.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::messages::{Blob, ClientMessage, RealtimeInput, ServerMessage};
use super::transport::{LiveConnection, LiveSetup, LiveSink, LiveTransport, TransportEvent};
use crate::config::ApiKey;
use crate::error::{Result, VoiceError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WebSocketTransport {
    endpoint: String,
}

impl WebSocketTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    fn url(&self, api_key: &ApiKey) -> String {
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{}key={}", self.endpoint, separator, api_key.expose())
    }
}

#[async_trait]
impl LiveTransport for WebSocketTransport {
    async fn open(&self, api_key: &ApiKey, setup: &LiveSetup) -> Result<LiveConnection> {
        info!("Connecting to Live API at {}", self.endpoint);

        let (ws, _response) = connect_async(self.url(api_key))
            .await
            .map_err(VoiceError::handshake)?;
        let (mut write, read) = ws.split();

        let setup_json =
            serde_json::to_string(&setup.to_message()).map_err(VoiceError::handshake)?;
        write
            .send(Message::Text(setup_json))
            .await
            .map_err(VoiceError::handshake)?;

        info!(
            "Live API socket open, setup sent (model={}, voice={})",
            setup.model, setup.voice
        );

        let (tx, rx) = mpsc::channel(64);
        let reader = tokio::spawn(read_events(read, tx));

        Ok(LiveConnection {
            sink: Box::new(WebSocketSink {
                write,
                reader: Some(reader),
                closed: false,
            }),
            events: rx,
        })
    }
}

async fn read_events(mut read: SplitStream<WsStream>, tx: mpsc::Sender<TransportEvent>) {
    while let Some(msg) = read.next().await {
        let event = match msg {
            Ok(Message::Text(text)) => parse_server_message(text.as_bytes()),
            Ok(Message::Binary(bytes)) => parse_server_message(&bytes),
            Ok(Message::Close(frame)) => {
                let reason = frame.map(|f| format!("{} {}", u16::from(f.code), f.reason));
                debug!("Live API sent close frame: {:?}", reason);
                let _ = tx.send(TransportEvent::Closed { reason }).await;
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                let _ = tx.send(TransportEvent::Error(e.to_string())).await;
                return;
            }
        };

        if let Some(event) = event {
            if tx.send(event).await.is_err() {
                return;
            }
        }
    }

    let _ = tx.send(TransportEvent::Closed { reason: None }).await;
}

/// Map one server frame to an event; unparseable frames are skipped
pub(crate) fn parse_server_message(bytes: &[u8]) -> Option<TransportEvent> {
    match serde_json::from_slice::<ServerMessage>(bytes) {
        Ok(msg) if msg.setup_complete.is_some() => Some(TransportEvent::Opened),
        Ok(msg) => Some(TransportEvent::Message(msg)),
        Err(e) => {
            warn!("Failed to parse Live API message: {}", e);
            None
        }
    }
}

struct WebSocketSink {
    write: SplitSink<WsStream, Message>,
    reader: Option<JoinHandle<()>>,
    closed: bool,
}

#[async_trait]
impl LiveSink for WebSocketSink {
    async fn send_audio(&mut self, chunk: Blob) -> Result<()> {
        if self.closed {
            return Err(VoiceError::transport("stream is closed"));
        }

        let msg = ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![chunk],
        });
        let json = serde_json::to_string(&msg).map_err(VoiceError::transport)?;

        self.write
            .send(Message::Text(json))
            .await
            .map_err(VoiceError::transport)
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Err(e) = self.write.close().await {
            debug!("WebSocket already closed: {}", e);
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }

        info!("Live API stream closed");
        Ok(())
    }
}
