use std::collections::HashMap;

use session::{BroadcastStyle, Outcome, ProtocolHandler, SessionStore};
use shared::{
    domain::ParticipantId,
    error::ApiError,
    protocol::{ClientRequest, ServerEvent, SessionSnapshot},
};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

/// Owns the process-wide session and fans every applied event out to all
/// subscribers.
///
/// Dispatch holds the lock across mutation and publish, so subscribers see
/// payloads in the order the session applied them.
pub(crate) struct SessionHub {
    state: Mutex<HubState>,
    events: broadcast::Sender<ServerEvent>,
    style: BroadcastStyle,
}

struct HubState {
    handler: ProtocolHandler,
    /// Live connections per participant. Only connection-backed transports
    /// register here.
    presence: HashMap<ParticipantId, usize>,
}

impl SessionHub {
    pub(crate) fn new(style: BroadcastStyle, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            state: Mutex::new(HubState {
                handler: ProtocolHandler::new(SessionStore::new()),
                presence: HashMap::new(),
            }),
            events,
            style,
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    pub(crate) async fn snapshot(&self) -> SessionSnapshot {
        self.state.lock().await.handler.snapshot()
    }

    /// Applies one client event. Rejections are returned to the caller and
    /// never published.
    pub(crate) async fn dispatch(&self, request: ClientRequest) -> Result<Outcome, ApiError> {
        let mut state = self.state.lock().await;
        let outcome = state.handler.handle(request)?;
        self.publish(&outcome);
        Ok(outcome)
    }

    /// Registers one more live connection for the participant.
    pub(crate) async fn attach(&self, participant_id: &ParticipantId) {
        let mut state = self.state.lock().await;
        *state.presence.entry(participant_id.clone()).or_insert(0) += 1;
        debug!(participant_id = %participant_id, "connection attached");
    }

    /// Drops one live connection; the participant leaves the session with its
    /// last connection.
    pub(crate) async fn release(&self, participant_id: &ParticipantId) -> Option<Outcome> {
        let mut state = self.state.lock().await;
        match state.presence.get_mut(participant_id) {
            Some(count) if *count > 1 => {
                *count -= 1;
                return None;
            }
            Some(_) => {
                state.presence.remove(participant_id);
            }
            None => return None,
        }

        let outcome = state.handler.handle_disconnect(participant_id);
        if outcome.mutated {
            info!(participant_id = %participant_id, "participant disconnected");
            self.publish(&outcome);
        }
        Some(outcome)
    }

    fn publish(&self, outcome: &Outcome) {
        // No subscribers is fine; polling clients read snapshots instead.
        let _ = self.events.send(outcome.payload(self.style));
    }
}

#[cfg(test)]
#[path = "tests/hub_tests.rs"]
mod tests;
