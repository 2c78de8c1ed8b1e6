//! One-way push stream, paired with `POST /session/events` for writes.

use std::{sync::Arc, time::Duration};

use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{stream, Stream, StreamExt};
use serde::Deserialize;
use shared::{domain::ParticipantId, protocol::ServerEvent};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

use crate::{app_state::AppState, hub::SessionHub};

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
pub(crate) struct StreamQuery {
    participant_id: Option<String>,
}

/// Removes the participant once the stream that carried it is dropped.
struct PresenceGuard {
    hub: Arc<SessionHub>,
    participant_id: ParticipantId,
}

impl Drop for PresenceGuard {
    fn drop(&mut self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let hub = Arc::clone(&self.hub);
        let participant_id = self.participant_id.clone();
        runtime.spawn(async move {
            if hub.release(&participant_id).await.is_some() {
                info!(participant_id = %participant_id, "push stream closed");
            }
        });
    }
}

struct StreamState {
    events_rx: broadcast::Receiver<ServerEvent>,
    hub: Arc<SessionHub>,
    pending: Option<ServerEvent>,
    _presence: Option<PresenceGuard>,
}

pub(crate) async fn session_stream(
    State(state): State<Arc<AppState>>,
    Query(q): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let hub = Arc::clone(&state.hub);
    let events_rx = hub.subscribe();

    let presence = match q
        .participant_id
        .map(ParticipantId::new)
        .filter(|id| !id.is_blank())
    {
        Some(participant_id) => {
            hub.attach(&participant_id).await;
            info!(participant_id = %participant_id, "push stream opened");
            Some(PresenceGuard {
                hub: Arc::clone(&hub),
                participant_id,
            })
        }
        None => None,
    };

    let initial = ServerEvent::SessionState(hub.snapshot().await);
    let stream_state = StreamState {
        events_rx,
        hub,
        pending: Some(initial),
        _presence: presence,
    };

    let events = stream::unfold(stream_state, |mut st| async move {
        if let Some(first) = st.pending.take() {
            return Some((first, st));
        }
        let event = match st.events_rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "push stream subscriber lagged; sending full state");
                ServerEvent::SessionState(st.hub.snapshot().await)
            }
            Err(RecvError::Closed) => return None,
        };
        Some((event, st))
    })
    .map(|event| Event::default().json_data(event));

    Sse::new(events).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}
