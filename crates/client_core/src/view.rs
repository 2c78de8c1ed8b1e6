use shared::protocol::{ServerEvent, SessionSnapshot};

/// Folds a state-bearing server payload into the local view.
///
/// Returns false for payloads that carry no session state.
pub(crate) fn apply_event(view: &mut SessionSnapshot, event: &ServerEvent) -> bool {
    match event {
        ServerEvent::SessionState(snapshot) => *view = snapshot.clone(),
        ServerEvent::VotesUpdated { votes } => view.votes = votes.clone(),
        ServerEvent::Revealed { revealed, votes } | ServerEvent::RoundReset { votes, revealed } => {
            view.revealed = *revealed;
            view.votes = votes.clone();
        }
        ServerEvent::ParticipantsUpdated {
            participants,
            votes,
        } => {
            view.participants = participants.clone();
            view.votes = votes.clone();
        }
        ServerEvent::Reaction(_) | ServerEvent::Error(_) => return false,
    }
    true
}
