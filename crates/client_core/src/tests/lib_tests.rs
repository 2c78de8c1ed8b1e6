use super::*;
use async_trait::async_trait;
use shared::error::ApiError;
use std::{collections::VecDeque, future::Future, time::Duration};

struct FakeTransport {
    inbound: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    started_for: Mutex<Option<ParticipantId>>,
    sent: Mutex<Vec<ClientRequest>>,
    replies: Mutex<VecDeque<ServerEvent>>,
    detects_disconnect: bool,
    shutdowns: Mutex<u32>,
    sent_at_shutdown: Mutex<Option<usize>>,
    offline: Mutex<bool>,
}

impl FakeTransport {
    fn new(detects_disconnect: bool) -> Arc<Self> {
        Arc::new(Self {
            inbound: Mutex::new(None),
            started_for: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            replies: Mutex::new(VecDeque::new()),
            detects_disconnect,
            shutdowns: Mutex::new(0),
            sent_at_shutdown: Mutex::new(None),
            offline: Mutex::new(false),
        })
    }

    async fn push(&self, event: TransportEvent) {
        let inbound = self
            .inbound
            .lock()
            .await
            .clone()
            .expect("transport started");
        inbound.send(event).await.expect("pump alive");
    }

    async fn queue_reply(&self, event: ServerEvent) {
        self.replies.lock().await.push_back(event);
    }

    async fn sent(&self) -> Vec<ClientRequest> {
        self.sent.lock().await.clone()
    }

    async fn joins_sent(&self) -> usize {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|request| matches!(request, ClientRequest::Join(_)))
            .count()
    }
}

#[async_trait]
impl SessionTransport for FakeTransport {
    async fn start(
        &self,
        participant_id: ParticipantId,
        inbound: mpsc::Sender<TransportEvent>,
    ) -> Result<()> {
        *self.started_for.lock().await = Some(participant_id);
        *self.inbound.lock().await = Some(inbound);
        Ok(())
    }

    async fn send(&self, request: ClientRequest) -> Result<Option<ServerEvent>> {
        if *self.offline.lock().await {
            return Err(anyhow!("server unreachable"));
        }
        self.sent.lock().await.push(request);
        Ok(self.replies.lock().await.pop_front())
    }

    async fn shutdown(&self) {
        *self.shutdowns.lock().await += 1;
        *self.sent_at_shutdown.lock().await = Some(self.sent.lock().await.len());
    }

    fn detects_disconnect(&self) -> bool {
        self.detects_disconnect
    }
}

fn alice() -> Participant {
    Participant::new("alice-id", "Alice", Role::Estimator)
}

fn bob() -> Participant {
    Participant::new("bob-id", "Bob", Role::Estimator)
}

async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

async fn next_matching(
    events: &mut broadcast::Receiver<ClientEvent>,
    matches: impl Fn(&ClientEvent) -> bool,
) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let event = events.recv().await.expect("event channel open");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for client event")
}

#[tokio::test]
async fn connect_starts_transport_for_the_identity() {
    let transport = FakeTransport::new(true);
    let _client = SessionClient::connect(transport.clone(), alice())
        .await
        .expect("connect");

    assert_eq!(
        transport.started_for.lock().await.clone(),
        Some(ParticipantId::from("alice-id"))
    );
    assert!(transport.sent().await.is_empty());
}

#[tokio::test]
async fn connect_rejects_blank_identity_id() {
    let transport = FakeTransport::new(true);
    let result = SessionClient::connect(transport, Participant::new("  ", "Alice", Role::Estimator)).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn joins_again_on_every_connected_event() {
    let transport = FakeTransport::new(true);
    let client = SessionClient::connect(transport.clone(), alice())
        .await
        .expect("connect");
    let mut events = client.subscribe_events();

    let fake = &transport;
    transport.push(TransportEvent::Connected).await;
    next_matching(&mut events, |event| *event == ClientEvent::Connected).await;
    assert!(eventually(|| async move { fake.joins_sent().await == 1 }).await);

    transport.push(TransportEvent::Disconnected).await;
    next_matching(&mut events, |event| *event == ClientEvent::Disconnected).await;
    transport.push(TransportEvent::Connected).await;
    assert!(eventually(|| async move { fake.joins_sent().await == 2 }).await);

    for request in transport.sent().await {
        assert_eq!(request, ClientRequest::Join(alice()));
    }
}

#[tokio::test]
async fn delivered_payloads_update_the_local_view() {
    let transport = FakeTransport::new(true);
    let client = SessionClient::connect(transport.clone(), alice())
        .await
        .expect("connect");
    let mut events = client.subscribe_events();

    let mut snapshot = SessionSnapshot {
        participants: vec![alice(), bob()],
        ..SessionSnapshot::default()
    };
    snapshot.votes.insert(ParticipantId::from("alice-id"), None);
    snapshot.votes.insert(ParticipantId::from("bob-id"), None);
    transport
        .push(TransportEvent::Payload(ServerEvent::SessionState(
            snapshot.clone(),
        )))
        .await;
    let event = next_matching(&mut events, |event| {
        matches!(event, ClientEvent::StateChanged(_))
    })
    .await;
    assert_eq!(event, ClientEvent::StateChanged(snapshot.clone()));

    let mut votes = snapshot.votes.clone();
    votes.insert(ParticipantId::from("bob-id"), Some(8));
    transport
        .push(TransportEvent::Payload(ServerEvent::VotesUpdated {
            votes: votes.clone(),
        }))
        .await;
    next_matching(&mut events, |event| {
        matches!(event, ClientEvent::StateChanged(_))
    })
    .await;

    assert_eq!(client.current_participants().await, vec![alice(), bob()]);
    assert_eq!(client.current_votes().await, votes);
    assert!(!client.currently_revealed().await);
    assert_eq!(client.summary().await, None);
}

#[tokio::test]
async fn summary_appears_once_revealed() {
    let transport = FakeTransport::new(true);
    let client = SessionClient::connect(transport.clone(), alice())
        .await
        .expect("connect");
    let mut events = client.subscribe_events();

    let mut votes = VoteBoard::new();
    votes.insert(ParticipantId::from("alice-id"), Some(3));
    votes.insert(ParticipantId::from("bob-id"), Some(8));
    transport
        .push(TransportEvent::Payload(ServerEvent::ParticipantsUpdated {
            participants: vec![alice(), bob()],
            votes: votes.clone(),
        }))
        .await;
    transport
        .push(TransportEvent::Payload(ServerEvent::Revealed {
            revealed: true,
            votes,
        }))
        .await;
    let view = &client;
    assert!(eventually(|| async move { view.currently_revealed().await }).await);
    next_matching(&mut events, |event| {
        matches!(event, ClientEvent::StateChanged(snapshot) if snapshot.revealed)
    })
    .await;

    let summary = client.summary().await.expect("summary");
    assert_eq!(summary.lowest, 3);
    assert_eq!(summary.lowest_names, vec!["Alice".to_string()]);
    assert_eq!(summary.highest, 8);
    assert_eq!(summary.highest_names, vec!["Bob".to_string()]);
    assert_eq!(summary.average, 5.5);
}

#[tokio::test]
async fn synchronous_reply_is_applied_before_vote_returns() {
    let transport = FakeTransport::new(false);
    let client = SessionClient::connect(transport.clone(), alice())
        .await
        .expect("connect");

    let mut snapshot = SessionSnapshot {
        participants: vec![alice()],
        ..SessionSnapshot::default()
    };
    snapshot
        .votes
        .insert(ParticipantId::from("alice-id"), Some(5));
    transport
        .queue_reply(ServerEvent::SessionState(snapshot.clone()))
        .await;

    client.vote(5).await.expect("vote");

    assert_eq!(client.snapshot().await, snapshot);
    assert_eq!(
        transport.sent().await,
        vec![ClientRequest::Vote {
            participant_id: ParticipantId::from("alice-id"),
            value: 5,
        }]
    );
}

#[tokio::test]
async fn reveal_and_reset_send_bare_requests() {
    let transport = FakeTransport::new(true);
    let client = SessionClient::connect(transport.clone(), alice())
        .await
        .expect("connect");

    client.reveal().await.expect("reveal");
    client.reset().await.expect("reset");

    assert_eq!(
        transport.sent().await,
        vec![ClientRequest::Reveal, ClientRequest::Reset]
    );
}

#[tokio::test]
async fn update_self_keeps_id_and_rejoins() {
    let transport = FakeTransport::new(true);
    let client = SessionClient::connect(transport.clone(), alice())
        .await
        .expect("connect");

    let updated = client
        .update_self(IdentityUpdate {
            name: Some("  Alicia ".to_string()),
            role: Some(Role::Observer),
        })
        .await
        .expect("update");

    let expected = Participant::new("alice-id", "Alicia", Role::Observer);
    assert_eq!(updated, expected);
    assert_eq!(client.identity().await, expected);
    assert_eq!(transport.sent().await, vec![ClientRequest::Join(expected)]);
}

#[tokio::test]
async fn update_self_rejects_blank_name_without_sending() {
    let transport = FakeTransport::new(true);
    let client = SessionClient::connect(transport.clone(), alice())
        .await
        .expect("connect");

    let result = client
        .update_self(IdentityUpdate {
            name: Some("   ".to_string()),
            role: None,
        })
        .await;

    assert!(result.is_err());
    assert_eq!(client.identity().await, alice());
    assert!(transport.sent().await.is_empty());
}

#[tokio::test]
async fn failed_update_leaves_identity_untouched() {
    let transport = FakeTransport::new(true);
    let client = SessionClient::connect(transport.clone(), alice())
        .await
        .expect("connect");
    *transport.offline.lock().await = true;

    let result = client
        .update_self(IdentityUpdate {
            name: Some("Alicia".to_string()),
            role: Some(Role::Observer),
        })
        .await;

    assert!(result.is_err());
    assert_eq!(client.identity().await, alice());

    // A reconnect after the failure still joins under the old identity.
    *transport.offline.lock().await = false;
    transport.push(TransportEvent::Connected).await;
    let fake = &transport;
    assert!(eventually(|| async move { fake.joins_sent().await == 1 }).await);
    assert_eq!(transport.sent().await, vec![ClientRequest::Join(alice())]);
}

#[tokio::test]
async fn reactions_are_published_without_touching_state() {
    let transport = FakeTransport::new(true);
    let client = SessionClient::connect(transport.clone(), alice())
        .await
        .expect("connect");
    let mut events = client.subscribe_events();

    client
        .throw_reaction(ParticipantId::from("bob-id"), "🎉", 0.25, 0.75)
        .await
        .expect("react");
    let reaction = Reaction {
        target_participant_id: ParticipantId::from("bob-id"),
        emoji: "🎉".to_string(),
        origin_x: 0.25,
        origin_y: 0.75,
    };
    assert_eq!(
        transport.sent().await,
        vec![ClientRequest::React(reaction.clone())]
    );

    transport
        .push(TransportEvent::Payload(ServerEvent::Reaction(
            reaction.clone(),
        )))
        .await;
    let event = next_matching(&mut events, |event| {
        matches!(event, ClientEvent::Reaction(_))
    })
    .await;
    assert_eq!(event, ClientEvent::Reaction(reaction));
    assert_eq!(client.snapshot().await, SessionSnapshot::default());
}

#[tokio::test]
async fn server_errors_are_published_as_client_errors() {
    let transport = FakeTransport::new(true);
    let client = SessionClient::connect(transport.clone(), alice())
        .await
        .expect("connect");
    let mut events = client.subscribe_events();

    transport
        .push(TransportEvent::Payload(ServerEvent::Error(
            ApiError::unknown_event("shuffle"),
        )))
        .await;

    match next_matching(&mut events, |event| matches!(event, ClientEvent::Error(_))).await {
        ClientEvent::Error(message) => assert!(message.contains("shuffle")),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn shutdown_sends_leave_when_server_cannot_detect_disconnects() {
    let transport = FakeTransport::new(false);
    let client = SessionClient::connect(transport.clone(), alice())
        .await
        .expect("connect");

    client.shutdown().await;

    assert_eq!(
        transport.sent().await,
        vec![ClientRequest::Leave {
            participant_id: ParticipantId::from("alice-id"),
        }]
    );
    assert_eq!(*transport.shutdowns.lock().await, 1);
}

#[tokio::test]
async fn shutdown_relies_on_connection_close_when_detected() {
    let transport = FakeTransport::new(true);
    let client = SessionClient::connect(transport.clone(), alice())
        .await
        .expect("connect");

    client.shutdown().await;

    assert!(transport.sent().await.is_empty());
    assert_eq!(*transport.shutdowns.lock().await, 1);
}

#[tokio::test]
async fn shutdown_stops_rejoining_before_leaving() {
    let transport = FakeTransport::new(false);
    let client = SessionClient::connect(transport.clone(), alice())
        .await
        .expect("connect");
    transport.push(TransportEvent::Connected).await;
    let fake = &transport;
    assert!(eventually(|| async move { fake.joins_sent().await == 1 }).await);

    client.shutdown().await;

    // The transport is stopped before the leave goes out.
    assert_eq!(*transport.sent_at_shutdown.lock().await, Some(1));
    let leave = ClientRequest::Leave {
        participant_id: ParticipantId::from("alice-id"),
    };
    assert_eq!(transport.sent().await.last(), Some(&leave));

    // A late poll result finds no pump to re-join with.
    let inbound = transport
        .inbound
        .lock()
        .await
        .clone()
        .expect("transport started");
    assert!(inbound.send(TransportEvent::Connected).await.is_err());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.joins_sent().await, 1);
    assert_eq!(transport.sent().await.last(), Some(&leave));
}
