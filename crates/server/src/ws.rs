//! Persistent full-duplex transport.
//!
//! Every applied event goes to every connection, the sender included.
//! Rejections go back to the sender only. A connection becomes a participant
//! with its first successful join and leaves the session when it closes.

use std::{sync::Arc, time::Duration};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use session::decode_request;
use shared::{
    domain::ParticipantId,
    protocol::{ClientRequest, ServerEvent},
};
use tokio::{
    sync::{broadcast::error::RecvError, mpsc},
    time::{interval_at, Instant, Interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{app_state::AppState, hub::SessionHub};

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket))
}

async fn ws_connection(state: Arc<AppState>, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    // Subscribe before anything is dispatched so this connection sees its own join.
    let mut events_rx = state.hub.subscribe();
    let (direct_tx, mut direct_rx) = mpsc::channel::<ServerEvent>(16);
    debug!("websocket connected");

    let hub = Arc::clone(&state.hub);
    let mut resync = state.resync_interval.map(resync_timer);
    let send_task = tokio::spawn(async move {
        // Current state first, so a fresh connection can render before joining.
        let mut next = Some(ServerEvent::SessionState(hub.snapshot().await));
        loop {
            if let Some(event) = next.take() {
                if send_event(&mut sender, &event).await.is_err() {
                    break;
                }
            }

            next = Some(tokio::select! {
                direct = direct_rx.recv() => match direct {
                    Some(event) => event,
                    None => break,
                },
                broadcast = events_rx.recv() => match broadcast {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "websocket subscriber lagged; sending full state");
                        ServerEvent::SessionState(hub.snapshot().await)
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = next_tick(&mut resync) => ServerEvent::SessionState(hub.snapshot().await),
            });
        }
    });

    let mut joined: Option<ParticipantId> = None;
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                handle_text(&state.hub, &text, &mut joined, &direct_tx).await;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(error) => {
                debug!(%error, "websocket receive failed");
                break;
            }
        }
    }

    send_task.abort();
    if let Some(participant_id) = joined {
        state.hub.release(&participant_id).await;
    }
    debug!("websocket closed");
}

async fn handle_text(
    hub: &SessionHub,
    text: &str,
    joined: &mut Option<ParticipantId>,
    direct_tx: &mpsc::Sender<ServerEvent>,
) {
    let request = match decode_request(text) {
        Ok(request) => request,
        Err(error) => {
            warn!(code = ?error.code, message = %error.message, "rejected websocket request");
            let _ = direct_tx.send(ServerEvent::Error(error)).await;
            return;
        }
    };
    let joining = match &request {
        ClientRequest::Join(participant) => Some(participant.id.clone()),
        _ => None,
    };

    match hub.dispatch(request).await {
        Ok(_) => {
            if let Some(participant_id) = joining {
                track_join(hub, joined, participant_id).await;
            }
        }
        Err(error) => {
            warn!(code = ?error.code, message = %error.message, "rejected websocket request");
            let _ = direct_tx.send(ServerEvent::Error(error)).await;
        }
    }
}

async fn track_join(
    hub: &SessionHub,
    joined: &mut Option<ParticipantId>,
    participant_id: ParticipantId,
) {
    if joined.as_ref() == Some(&participant_id) {
        return;
    }
    hub.attach(&participant_id).await;
    info!(participant_id = %participant_id, "participant joined over websocket");
    if let Some(previous) = joined.replace(participant_id) {
        hub.release(&previous).await;
    }
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(v) => v,
        Err(_) => return Ok(()),
    };
    sender.send(Message::Text(text)).await
}

fn resync_timer(period: Duration) -> Interval {
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
