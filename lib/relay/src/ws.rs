//! WebSocket upstream connector.

use crate::error::ConnectError;
use crate::link::{Endpoint, LinkCommand, LinkEvent, UpstreamConnector, UpstreamLink};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

const DEFAULT_BUFFER: usize = 256;

/// Connects to the upstream agent over WebSocket.
///
/// Each link runs a reader pump and a writer pump. Protocol-level pings
/// from the peer are answered by tungstenite itself and surface as
/// [`LinkEvent::Alive`].
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    buffer: usize,
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

impl WebSocketConnector {
    #[must_use]
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
        }
    }
}

#[async_trait]
impl UpstreamConnector for WebSocketConnector {
    async fn connect(&self, endpoint: Endpoint) -> Result<UpstreamLink, ConnectError> {
        let (socket, _response) = tokio_tungstenite::connect_async(endpoint.into_url())
            .await
            .map_err(|e| ConnectError::Handshake {
                message: e.to_string(),
            })?;

        let (mut sink, mut stream) = socket.split();
        let (outbound, mut commands) = mpsc::channel::<LinkCommand>(self.buffer);
        let (events, inbound) = mpsc::channel::<LinkEvent>(self.buffer);

        let writer_events = events.clone();
        tokio::spawn(async move {
            while let Some(command) = commands.recv().await {
                let result = match command {
                    LinkCommand::Send(text) => sink.send(Message::Text(text)).await,
                    LinkCommand::Probe => sink.send(Message::Ping(Vec::new())).await,
                    LinkCommand::Close => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                };
                if let Err(e) = result {
                    let _ = writer_events.send(LinkEvent::Error(e.to_string())).await;
                    break;
                }
            }
            let _ = sink.close().await;
            debug!("upstream writer stopped");
        });

        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let event = match message {
                    Ok(Message::Text(text)) => LinkEvent::Frame(text),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => LinkEvent::Frame(text),
                        Err(_) => {
                            debug!("dropping non-utf8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Ping(_) | Message::Pong(_)) => LinkEvent::Alive,
                    Ok(Message::Close(frame)) => {
                        let (code, reason) = frame
                            .map(|f| (Some(u16::from(f.code)), f.reason.into_owned()))
                            .unwrap_or((None, String::new()));
                        let _ = events.send(LinkEvent::Closed { code, reason }).await;
                        break;
                    }
                    Ok(Message::Frame(_)) => continue,
                    Err(e) => {
                        let _ = events.send(LinkEvent::Error(e.to_string())).await;
                        break;
                    }
                };
                if events.send(event).await.is_err() {
                    break;
                }
            }
            debug!("upstream reader stopped");
        });

        Ok(UpstreamLink { outbound, inbound })
    }
}
