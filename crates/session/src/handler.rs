use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::{
    domain::ParticipantId,
    error::ApiError,
    protocol::{ClientRequest, Reaction, ServerEvent, SessionSnapshot, CLIENT_REQUEST_KINDS},
};
use tracing::debug;

use crate::store::SessionStore;

/// How applied events are fanned out to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastStyle {
    /// Only the fields the event touched.
    #[default]
    Delta,
    /// The whole session after every state-changing event.
    Snapshot,
}

impl FromStr for BroadcastStyle {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "delta" => Ok(BroadcastStyle::Delta),
            "snapshot" => Ok(BroadcastStyle::Snapshot),
            other => Err(format!("unknown broadcast style '{other}'")),
        }
    }
}

/// Result of applying one event.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// Session state right after the event.
    pub snapshot: SessionSnapshot,
    /// Field-specific payload for the event.
    pub delta: ServerEvent,
    /// False for events that never touch the store, and for no-op removals.
    pub mutated: bool,
}

impl Outcome {
    pub fn payload(&self, style: BroadcastStyle) -> ServerEvent {
        match style {
            BroadcastStyle::Snapshot if self.mutated => {
                ServerEvent::SessionState(self.snapshot.clone())
            }
            _ => self.delta.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ProtocolHandler {
    store: SessionStore,
}

impl ProtocolHandler {
    pub fn new(store: SessionStore) -> Self {
        Self { store }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.store.snapshot()
    }

    pub fn handle(&mut self, request: ClientRequest) -> Result<Outcome, ApiError> {
        validate(&request)?;
        debug!(kind = request.kind(), "applying session event");

        let outcome = match request {
            ClientRequest::Join(participant) => {
                let snapshot = self.store.apply_join(participant);
                Outcome {
                    delta: ServerEvent::SessionState(snapshot.clone()),
                    snapshot,
                    mutated: true,
                }
            }
            ClientRequest::Vote {
                participant_id,
                value,
            } => {
                let snapshot = self.store.apply_vote(participant_id, value);
                Outcome {
                    delta: ServerEvent::VotesUpdated {
                        votes: snapshot.votes.clone(),
                    },
                    snapshot,
                    mutated: true,
                }
            }
            ClientRequest::Reveal => {
                let snapshot = self.store.apply_reveal();
                Outcome {
                    delta: ServerEvent::Revealed {
                        revealed: snapshot.revealed,
                        votes: snapshot.votes.clone(),
                    },
                    snapshot,
                    mutated: true,
                }
            }
            ClientRequest::Reset => {
                let snapshot = self.store.apply_reset();
                Outcome {
                    delta: ServerEvent::RoundReset {
                        votes: snapshot.votes.clone(),
                        revealed: snapshot.revealed,
                    },
                    snapshot,
                    mutated: true,
                }
            }
            ClientRequest::React(reaction) => Outcome {
                snapshot: self.store.snapshot(),
                delta: ServerEvent::Reaction(reaction),
                mutated: false,
            },
            ClientRequest::Leave { participant_id } => self.handle_disconnect(&participant_id),
        };
        Ok(outcome)
    }

    /// Removal detected by a transport, e.g. a closed connection.
    pub fn handle_disconnect(&mut self, participant_id: &ParticipantId) -> Outcome {
        let mutated = self.store.has_entry(participant_id);
        let snapshot = self.store.apply_disconnect(participant_id);
        Outcome {
            delta: ServerEvent::ParticipantsUpdated {
                participants: snapshot.participants.clone(),
                votes: snapshot.votes.clone(),
            },
            snapshot,
            mutated,
        }
    }
}

fn validate(request: &ClientRequest) -> Result<(), ApiError> {
    match request {
        ClientRequest::Join(participant) => {
            require_id(&participant.id, "id")?;
            if participant.name.trim().is_empty() {
                return Err(ApiError::validation("join requires a non-empty name"));
            }
        }
        ClientRequest::Vote { participant_id, .. } => require_id(participant_id, "participant_id")?,
        ClientRequest::Reveal | ClientRequest::Reset => {}
        ClientRequest::React(reaction) => validate_reaction(reaction)?,
        ClientRequest::Leave { participant_id } => require_id(participant_id, "participant_id")?,
    }
    Ok(())
}

fn validate_reaction(reaction: &Reaction) -> Result<(), ApiError> {
    require_id(&reaction.target_participant_id, "target_participant_id")?;
    if reaction.emoji.trim().is_empty() {
        return Err(ApiError::validation("react requires a non-empty emoji"));
    }
    if !reaction.origin_x.is_finite() || !reaction.origin_y.is_finite() {
        return Err(ApiError::validation("react origin must be finite"));
    }
    Ok(())
}

fn require_id(id: &ParticipantId, field: &str) -> Result<(), ApiError> {
    if id.is_blank() {
        return Err(ApiError::validation(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Decodes one `{"type": .., "payload": ..}` envelope.
///
/// Unknown types and malformed payloads are reported separately so the sender
/// can tell them apart.
pub fn decode_request(text: &str) -> Result<ClientRequest, ApiError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| ApiError::validation(format!("malformed request: {e}")))?;
    decode_request_value(value)
}

pub fn decode_request_bytes(bytes: &[u8]) -> Result<ClientRequest, ApiError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| ApiError::validation("request body must be UTF-8"))?;
    decode_request(text)
}

pub fn decode_request_value(mut value: Value) -> Result<ClientRequest, ApiError> {
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::validation("request is missing a string 'type'"))?
        .to_string();
    if !CLIENT_REQUEST_KINDS.contains(&kind.as_str()) {
        return Err(ApiError::unknown_event(&kind));
    }
    if matches!(kind.as_str(), "reveal" | "reset") {
        if let Some(object) = value.as_object_mut() {
            object.remove("payload");
        }
    }
    serde_json::from_value(value)
        .map_err(|e| ApiError::validation(format!("invalid {kind} request: {e}")))
}

#[cfg(test)]
#[path = "tests/handler_tests.rs"]
mod tests;
