use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use shared::{
    domain::ParticipantId,
    protocol::{ClientRequest, ServerEvent},
};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use super::{endpoint, parse_server_url, SessionTransport, TransportEvent};

const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

type Outbound = Arc<Mutex<Option<mpsc::Sender<Message>>>>;

/// Persistent WebSocket connection that reconnects until shut down.
///
/// Writes are fire-and-forget: the confirmation is the broadcast every
/// connection receives, this one included.
pub struct WebSocketTransport {
    ws_url: Url,
    reconnect_delay: Duration,
    outbound: Outbound,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketTransport {
    pub fn new(server_url: &str) -> Result<Self> {
        Ok(Self {
            ws_url: websocket_url(server_url)?,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            outbound: Arc::new(Mutex::new(None)),
            task: Mutex::new(None),
        })
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

#[async_trait]
impl SessionTransport for WebSocketTransport {
    async fn start(
        &self,
        _participant_id: ParticipantId,
        inbound: mpsc::Sender<TransportEvent>,
    ) -> Result<()> {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return Err(anyhow!("websocket transport already started"));
        }
        *task = Some(tokio::spawn(run_connection_loop(
            self.ws_url.clone(),
            self.reconnect_delay,
            Arc::clone(&self.outbound),
            inbound,
        )));
        Ok(())
    }

    async fn send(&self, request: ClientRequest) -> Result<Option<ServerEvent>> {
        let text = serde_json::to_string(&request)?;
        let sender = self
            .outbound
            .lock()
            .await
            .clone()
            .ok_or_else(|| anyhow!("websocket is not connected"))?;
        sender
            .send(Message::Text(text))
            .await
            .map_err(|_| anyhow!("websocket closed while sending {}", request.kind()))?;
        Ok(None)
    }

    async fn shutdown(&self) {
        // Dropping the writer closes the socket, which the server treats as a disconnect.
        self.outbound.lock().await.take();
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
        }
    }
}

pub(crate) fn websocket_url(server_url: &str) -> Result<Url> {
    let mut ws_url = endpoint(&parse_server_url(server_url)?, "/ws")?;
    let scheme = if ws_url.scheme() == "https" { "wss" } else { "ws" };
    ws_url
        .set_scheme(scheme)
        .map_err(|_| anyhow!("cannot derive websocket url from {server_url}"))?;
    Ok(ws_url)
}

async fn run_connection_loop(
    ws_url: Url,
    reconnect_delay: Duration,
    outbound: Outbound,
    inbound: mpsc::Sender<TransportEvent>,
) {
    loop {
        match connect_async(ws_url.as_str()).await {
            Ok((ws_stream, _)) => {
                info!(url = %ws_url, "websocket connected");
                let (mut ws_writer, mut ws_reader) = ws_stream.split();
                let (tx, mut rx) = mpsc::channel::<Message>(64);
                *outbound.lock().await = Some(tx);

                let writer = tokio::spawn(async move {
                    while let Some(msg) = rx.recv().await {
                        if ws_writer.send(msg).await.is_err() {
                            break;
                        }
                    }
                    let _ = ws_writer.close().await;
                });

                if inbound.send(TransportEvent::Connected).await.is_err() {
                    outbound.lock().await.take();
                    return;
                }

                while let Some(msg) = ws_reader.next().await {
                    match msg {
                        Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                            Ok(event) => {
                                if inbound.send(TransportEvent::Payload(event)).await.is_err() {
                                    outbound.lock().await.take();
                                    return;
                                }
                            }
                            Err(err) => warn!(%err, "invalid server event"),
                        },
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(err) => {
                            warn!(%err, "websocket receive failed");
                            break;
                        }
                    }
                }

                outbound.lock().await.take();
                writer.abort();
                debug!(url = %ws_url, "websocket disconnected");
                if inbound.send(TransportEvent::Disconnected).await.is_err() {
                    return;
                }
            }
            Err(err) => warn!(url = %ws_url, %err, "websocket connect failed"),
        }
        tokio::time::sleep(reconnect_delay).await;
    }
}
