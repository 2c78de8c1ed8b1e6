use std::{fmt, pin::pin, time::Duration};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use reqwest::Client;
use shared::{
    domain::ParticipantId,
    protocol::{ClientRequest, ServerEvent},
};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use url::Url;

use super::{endpoint, parse_server_url, post_event, SessionTransport, TransportEvent};

const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// One-way server push over `text/event-stream`, writes over HTTP POST.
///
/// The open stream carries the participant id, so the server sees the
/// participant leave when the stream drops.
pub struct PushStreamTransport {
    http: Client,
    stream_url: Url,
    events_url: Url,
    reconnect_delay: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PushStreamTransport {
    pub fn new(server_url: &str) -> Result<Self> {
        let base = parse_server_url(server_url)?;
        Ok(Self {
            http: Client::new(),
            stream_url: endpoint(&base, "/session/stream")?,
            events_url: endpoint(&base, "/session/events")?,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            task: Mutex::new(None),
        })
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

#[async_trait]
impl SessionTransport for PushStreamTransport {
    async fn start(
        &self,
        participant_id: ParticipantId,
        inbound: mpsc::Sender<TransportEvent>,
    ) -> Result<()> {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return Err(anyhow!("push stream transport already started"));
        }
        let mut stream_url = self.stream_url.clone();
        stream_url
            .query_pairs_mut()
            .append_pair("participant_id", participant_id.as_str());
        *task = Some(tokio::spawn(run_stream_loop(
            self.http.clone(),
            stream_url,
            self.reconnect_delay,
            inbound,
        )));
        Ok(())
    }

    async fn send(&self, request: ClientRequest) -> Result<Option<ServerEvent>> {
        let snapshot = post_event(&self.http, &self.events_url, &request).await?;
        match request {
            // Reactions reach us through the stream like everyone else's.
            ClientRequest::React(_) => Ok(None),
            _ => Ok(Some(ServerEvent::SessionState(snapshot))),
        }
    }

    async fn shutdown(&self) {
        // Aborting drops the response body, which closes the stream.
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
        }
    }
}

async fn run_stream_loop(
    http: Client,
    stream_url: Url,
    reconnect_delay: Duration,
    inbound: mpsc::Sender<TransportEvent>,
) {
    loop {
        match open_stream(&http, &stream_url).await {
            Ok(response) => {
                info!(url = %stream_url, "event stream connected");
                if inbound.send(TransportEvent::Connected).await.is_err() {
                    return;
                }
                if !pump_events(response.bytes_stream(), &inbound).await {
                    return;
                }
                debug!(url = %stream_url, "event stream ended");
                if inbound.send(TransportEvent::Disconnected).await.is_err() {
                    return;
                }
            }
            Err(err) => warn!(url = %stream_url, %err, "event stream connect failed"),
        }
        tokio::time::sleep(reconnect_delay).await;
    }
}

async fn open_stream(http: &Client, stream_url: &Url) -> Result<reqwest::Response> {
    http.get(stream_url.clone())
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .send()
        .await
        .context("failed to open event stream")?
        .error_for_status()
        .context("event stream rejected")
}

/// Forwards events until the stream ends. Returns false once nobody listens.
pub(crate) async fn pump_events<S, B, E>(body: S, inbound: &mpsc::Sender<TransportEvent>) -> bool
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: fmt::Display,
{
    let mut events = pin!(body.eventsource());
    while let Some(item) = events.next().await {
        let event = match item {
            Ok(event) => event,
            Err(err) => {
                warn!(%err, "event stream read failed");
                return true;
            }
        };
        if event.data.is_empty() {
            continue;
        }
        match serde_json::from_str::<ServerEvent>(&event.data) {
            Ok(event) => {
                if inbound.send(TransportEvent::Payload(event)).await.is_err() {
                    return false;
                }
            }
            Err(err) => warn!(%err, "invalid server event"),
        }
    }
    true
}
