use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    domain::{Participant, ParticipantId},
    error::ApiError,
    summary::{summarize, Summary},
};

/// Vote per participant; `None` means no vote cast this round.
pub type VoteBoard = BTreeMap<ParticipantId, Option<i64>>;

/// Every `type` tag a client may send.
pub const CLIENT_REQUEST_KINDS: [&str; 6] = ["join", "vote", "reveal", "reset", "react", "leave"];

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub participants: Vec<Participant>,
    pub votes: VoteBoard,
    pub revealed: bool,
}

impl SessionSnapshot {
    pub fn participant(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|participant| &participant.id == id)
    }

    pub fn has_voted(&self, id: &ParticipantId) -> bool {
        matches!(self.votes.get(id), Some(Some(_)))
    }

    pub fn estimators(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter().filter(|p| p.is_estimator())
    }

    /// Reveal precondition enforced by callers; the session itself never checks it.
    pub fn all_estimators_voted(&self) -> bool {
        self.estimators().all(|estimator| self.has_voted(&estimator.id))
    }

    /// Only available once votes are revealed.
    pub fn summary(&self) -> Option<Summary> {
        if !self.revealed {
            return None;
        }
        summarize(&self.participants, &self.votes)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    pub target_participant_id: ParticipantId,
    pub emoji: String,
    pub origin_x: f64,
    pub origin_y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientRequest {
    Join(Participant),
    Vote {
        participant_id: ParticipantId,
        value: i64,
    },
    Reveal,
    Reset,
    React(Reaction),
    /// Explicit departure for transports without a connection-close signal.
    Leave {
        participant_id: ParticipantId,
    },
}

impl ClientRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientRequest::Join(_) => "join",
            ClientRequest::Vote { .. } => "vote",
            ClientRequest::Reveal => "reveal",
            ClientRequest::Reset => "reset",
            ClientRequest::React(_) => "react",
            ClientRequest::Leave { .. } => "leave",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    SessionState(SessionSnapshot),
    VotesUpdated {
        votes: VoteBoard,
    },
    Revealed {
        revealed: bool,
        votes: VoteBoard,
    },
    RoundReset {
        votes: VoteBoard,
        revealed: bool,
    },
    ParticipantsUpdated {
        participants: Vec<Participant>,
        votes: VoteBoard,
    },
    Reaction(Reaction),
    Error(ApiError),
}
