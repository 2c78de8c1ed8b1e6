use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use shared::{
    domain::ParticipantId,
    protocol::{ClientRequest, ServerEvent},
};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, warn};
use url::Url;

use super::{endpoint, fetch_snapshot, parse_server_url, post_event, SessionTransport, TransportEvent};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Request/response transport: reads the session on a fixed interval and
/// writes through the shared events endpoint.
///
/// The server cannot tell when a polling client goes away, so the client
/// must send an explicit leave.
pub struct PollingTransport {
    http: Client,
    session_url: Url,
    events_url: Url,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PollingTransport {
    pub fn new(server_url: &str) -> Result<Self> {
        let base = parse_server_url(server_url)?;
        Ok(Self {
            http: Client::new(),
            session_url: endpoint(&base, "/session")?,
            events_url: endpoint(&base, "/session/events")?,
            interval: DEFAULT_POLL_INTERVAL,
            task: Mutex::new(None),
        })
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

#[async_trait]
impl SessionTransport for PollingTransport {
    async fn start(
        &self,
        participant_id: ParticipantId,
        inbound: mpsc::Sender<TransportEvent>,
    ) -> Result<()> {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return Err(anyhow!("polling transport already started"));
        }
        *task = Some(tokio::spawn(run_poll_loop(
            self.http.clone(),
            self.session_url.clone(),
            self.interval,
            participant_id,
            inbound,
        )));
        Ok(())
    }

    async fn send(&self, request: ClientRequest) -> Result<Option<ServerEvent>> {
        let snapshot = post_event(&self.http, &self.events_url, &request).await?;
        // Nothing pushes reactions to a polling client, so echo our own.
        match request {
            ClientRequest::React(reaction) => Ok(Some(ServerEvent::Reaction(reaction))),
            _ => Ok(Some(ServerEvent::SessionState(snapshot))),
        }
    }

    async fn shutdown(&self) {
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
        }
    }

    fn detects_disconnect(&self) -> bool {
        false
    }
}

async fn run_poll_loop(
    http: Client,
    session_url: Url,
    period: Duration,
    participant_id: ParticipantId,
    inbound: mpsc::Sender<TransportEvent>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut healthy = false;

    loop {
        ticker.tick().await;
        match fetch_snapshot(&http, &session_url).await {
            Ok(snapshot) => {
                // A restarted server forgets us; announcing Connected triggers a re-join.
                let rejoin = !healthy || snapshot.participant(&participant_id).is_none();
                if inbound
                    .send(TransportEvent::Payload(ServerEvent::SessionState(snapshot)))
                    .await
                    .is_err()
                {
                    return;
                }
                if rejoin {
                    debug!(participant_id = %participant_id, "poll reached server; joining");
                    if inbound.send(TransportEvent::Connected).await.is_err() {
                        return;
                    }
                }
                healthy = true;
            }
            Err(err) => {
                if healthy {
                    warn!(%err, "session poll failed");
                    if inbound.send(TransportEvent::Disconnected).await.is_err() {
                        return;
                    }
                } else {
                    debug!(%err, "session poll failed");
                }
                healthy = false;
            }
        }
    }
}
