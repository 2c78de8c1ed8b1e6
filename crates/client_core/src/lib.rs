use std::sync::{Arc, Weak};

use anyhow::{anyhow, Result};
use shared::{
    domain::{Participant, ParticipantId, Role},
    protocol::{ClientRequest, Reaction, ServerEvent, SessionSnapshot, VoteBoard},
    summary::Summary,
};
use tokio::{
    sync::{broadcast, mpsc, Mutex, RwLock},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

pub mod identity;
pub mod transport;
mod view;

pub use identity::{FileIdentityStore, IdentityStore, IDENTITY_FILE_NAME};
pub use transport::{
    PollingTransport, PushStreamTransport, SessionTransport, TransportEvent, WebSocketTransport,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const INBOUND_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    StateChanged(SessionSnapshot),
    Reaction(Reaction),
    Connected,
    Disconnected,
    Error(String),
}

/// Changes to the local identity. `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityUpdate {
    pub name: Option<String>,
    pub role: Option<Role>,
}

/// Client-side view of the shared session.
///
/// Mirrors whatever the transport delivers and joins again every time the
/// transport (re)connects.
pub struct SessionClient {
    transport: Arc<dyn SessionTransport>,
    identity: RwLock<Participant>,
    view: RwLock<SessionSnapshot>,
    events: broadcast::Sender<ClientEvent>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl SessionClient {
    pub async fn connect(
        transport: Arc<dyn SessionTransport>,
        identity: Participant,
    ) -> Result<Arc<Self>> {
        if identity.id.is_blank() {
            return Err(anyhow!("participant id must not be blank"));
        }
        let participant_id = identity.id.clone();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let client = Arc::new(Self {
            transport,
            identity: RwLock::new(identity),
            view: RwLock::new(SessionSnapshot::default()),
            events,
            pump: Mutex::new(None),
        });

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        client.transport.start(participant_id, inbound_tx).await?;
        let pump = tokio::spawn(run_pump(Arc::downgrade(&client), inbound_rx));
        *client.pump.lock().await = Some(pump);
        Ok(client)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub async fn identity(&self) -> Participant {
        self.identity.read().await.clone()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.view.read().await.clone()
    }

    pub async fn current_participants(&self) -> Vec<Participant> {
        self.view.read().await.participants.clone()
    }

    pub async fn current_votes(&self) -> VoteBoard {
        self.view.read().await.votes.clone()
    }

    pub async fn currently_revealed(&self) -> bool {
        self.view.read().await.revealed
    }

    pub async fn summary(&self) -> Option<Summary> {
        self.view.read().await.summary()
    }

    pub async fn vote(&self, value: i64) -> Result<()> {
        let participant_id = self.identity.read().await.id.clone();
        self.request(ClientRequest::Vote {
            participant_id,
            value,
        })
        .await
    }

    pub async fn reveal(&self) -> Result<()> {
        self.request(ClientRequest::Reveal).await
    }

    pub async fn reset(&self) -> Result<()> {
        self.request(ClientRequest::Reset).await
    }

    /// Joins again under the same id and keeps the update once the join went out.
    pub async fn update_self(&self, update: IdentityUpdate) -> Result<Participant> {
        let mut updated = self.identity().await;
        if let Some(name) = update.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(anyhow!("name must not be blank"));
            }
            updated.name = name.to_string();
        }
        if let Some(role) = update.role {
            updated.role = role;
        }
        self.request(ClientRequest::Join(updated.clone())).await?;
        *self.identity.write().await = updated.clone();
        Ok(updated)
    }

    pub async fn throw_reaction(
        &self,
        target_participant_id: ParticipantId,
        emoji: impl Into<String>,
        origin_x: f64,
        origin_y: f64,
    ) -> Result<()> {
        self.request(ClientRequest::React(Reaction {
            target_participant_id,
            emoji: emoji.into(),
            origin_x,
            origin_y,
        }))
        .await
    }

    /// Stops every background task, then leaves the session.
    ///
    /// Nothing may re-join once the leave is out, so the pump and the
    /// transport go first.
    pub async fn shutdown(&self) {
        if let Some(pump) = self.pump.lock().await.take() {
            pump.abort();
            let _ = pump.await;
        }
        self.transport.shutdown().await;
        if !self.transport.detects_disconnect() {
            let participant_id = self.identity.read().await.id.clone();
            if let Err(err) = self
                .transport
                .send(ClientRequest::Leave { participant_id })
                .await
            {
                warn!(%err, "failed to send leave");
            }
        }
        info!("session client shut down");
    }

    async fn request(&self, request: ClientRequest) -> Result<()> {
        if let Some(reply) = self.transport.send(request).await? {
            self.apply(&reply).await;
        }
        Ok(())
    }

    async fn join(&self) {
        let identity = self.identity().await;
        debug!(participant_id = %identity.id, "joining session");
        if let Err(err) = self.request(ClientRequest::Join(identity)).await {
            warn!(%err, "join failed");
            let _ = self.events.send(ClientEvent::Error(err.to_string()));
        }
    }

    async fn apply(&self, event: &ServerEvent) {
        let changed = {
            let mut view = self.view.write().await;
            view::apply_event(&mut view, event).then(|| view.clone())
        };
        if let Some(snapshot) = changed {
            let _ = self.events.send(ClientEvent::StateChanged(snapshot));
            return;
        }
        match event {
            ServerEvent::Reaction(reaction) => {
                let _ = self.events.send(ClientEvent::Reaction(reaction.clone()));
            }
            ServerEvent::Error(error) => {
                warn!(code = ?error.code, message = %error.message, "server rejected request");
                let _ = self.events.send(ClientEvent::Error(error.message.clone()));
            }
            _ => {}
        }
    }
}

async fn run_pump(client: Weak<SessionClient>, mut inbound: mpsc::Receiver<TransportEvent>) {
    while let Some(event) = inbound.recv().await {
        let Some(client) = client.upgrade() else {
            break;
        };
        match event {
            TransportEvent::Connected => {
                let _ = client.events.send(ClientEvent::Connected);
                client.join().await;
            }
            TransportEvent::Payload(payload) => client.apply(&payload).await,
            TransportEvent::Disconnected => {
                let _ = client.events.send(ClientEvent::Disconnected);
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
