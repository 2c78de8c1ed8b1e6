use shared::{
    domain::{Participant, ParticipantId},
    protocol::{SessionSnapshot, VoteBoard},
};

/// Participants, their votes and the reveal flag of one session.
///
/// Every mutation returns the resulting snapshot so callers can broadcast
/// exactly the state they produced.
#[derive(Debug, Default)]
pub struct SessionStore {
    participants: Vec<Participant>,
    votes: VoteBoard,
    revealed: bool,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the participant, or replaces the fields of an existing one with the
    /// same id. An existing vote survives the re-join.
    pub fn apply_join(&mut self, participant: Participant) -> SessionSnapshot {
        self.votes.entry(participant.id.clone()).or_insert(None);
        match self
            .participants
            .iter_mut()
            .find(|existing| existing.id == participant.id)
        {
            Some(existing) => *existing = participant,
            None => self.participants.push(participant),
        }
        self.snapshot()
    }

    /// Unknown ids get an entry; the board does not require a prior join.
    pub fn apply_vote(&mut self, participant_id: ParticipantId, value: i64) -> SessionSnapshot {
        self.votes.insert(participant_id, Some(value));
        self.snapshot()
    }

    pub fn apply_reveal(&mut self) -> SessionSnapshot {
        self.revealed = true;
        self.snapshot()
    }

    pub fn apply_reset(&mut self) -> SessionSnapshot {
        for vote in self.votes.values_mut() {
            *vote = None;
        }
        self.revealed = false;
        self.snapshot()
    }

    pub fn apply_disconnect(&mut self, participant_id: &ParticipantId) -> SessionSnapshot {
        self.participants
            .retain(|participant| &participant.id != participant_id);
        self.votes.remove(participant_id);
        self.snapshot()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            participants: self.participants.clone(),
            votes: self.votes.clone(),
            revealed: self.revealed,
        }
    }

    pub fn contains(&self, participant_id: &ParticipantId) -> bool {
        self.participants
            .iter()
            .any(|participant| &participant.id == participant_id)
    }

    /// True when the id is a participant or still holds a board entry.
    pub fn has_entry(&self, participant_id: &ParticipantId) -> bool {
        self.contains(participant_id) || self.votes.contains_key(participant_id)
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
