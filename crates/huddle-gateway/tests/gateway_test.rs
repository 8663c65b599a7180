/// Integration tests: drive the gateway the way the WebSocket loop does and
/// check what every connection observes.
///
/// Room commands are answered after the room actor has queued its broadcasts,
/// so once `dispatch` returns every resulting event is already sitting in the
/// recipients' queues and can be drained with `try_recv`.
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use huddle_gateway::dispatcher::Dispatcher;
use huddle_gateway::room::RoomInfo;
use huddle_gateway::{AdmissionPolicy, CodeSource, ConnectionHandle, Gateway, HubConfig, Registry};
use huddle_types::error::ErrorCode;
use huddle_types::events::{ClientCommand, ServerEvent};
use huddle_types::models::{CallType, EndReason, PresenceAction, Privacy, UserPublic};

struct Fixed(&'static str);

impl CodeSource for Fixed {
    fn next_code(&self, _len: usize) -> String {
        self.0.to_string()
    }
}

struct InviteOnly;

impl AdmissionPolicy for InviteOnly {
    fn admit(&self, _room: &RoomInfo, _user: &UserPublic) -> bool {
        false
    }
}

fn registry(config: HubConfig) -> Registry {
    let config = Arc::new(config);
    let dispatcher = Dispatcher::new(config.outbound_queue);
    Registry::with_code_source(dispatcher, config, Fixed("ABC123"))
}

fn hub(config: HubConfig) -> Gateway {
    Gateway::new(registry(config))
}

struct Client {
    gateway: Gateway,
    handle: ConnectionHandle,
    rx: mpsc::Receiver<ServerEvent>,
}

impl Client {
    async fn connect(gateway: &Gateway, id: &str) -> Self {
        let user = UserPublic {
            id: id.to_string(),
            name: id.trim_start_matches("uid_").to_string(),
            avatar_url: None,
            is_private: false,
        };
        let (handle, mut rx) = gateway.connect(user).await.unwrap();
        assert!(matches!(rx.try_recv(), Ok(ServerEvent::Ready { .. })));
        Self {
            gateway: gateway.clone(),
            handle,
            rx,
        }
    }

    fn id(&self) -> String {
        self.handle.user.id.clone()
    }

    async fn send(&self, command: ClientCommand) {
        self.gateway.dispatch(&self.handle, command).await;
    }

    async fn send_json(&self, frame: serde_json::Value) {
        self.gateway.dispatch_text(&self.handle, &frame.to_string()).await;
    }

    fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn next(&mut self) -> ServerEvent {
        match self.rx.try_recv() {
            Ok(event) => event,
            Err(e) => panic!("{} expected an event: {e:?}", self.handle.user.id),
        }
    }

    async fn create(&mut self, privacy: Privacy) -> Uuid {
        self.send(ClientCommand::CreateRoom {
            name: Some("Design Team".into()),
            privacy,
            user: None,
        })
        .await;
        match self.next() {
            ServerEvent::CreateRoomResponse(response) => {
                assert!(response.success);
                assert_eq!(response.room_code.as_deref(), Some("ABC123"));
                response.room_id.unwrap()
            }
            other => panic!("expected createRoomResponse, got {other:?}"),
        }
    }

    /// Join and return the participant ids in the snapshot.
    async fn join(&mut self, code: &str) -> Vec<String> {
        self.send_json(json!({ "type": "joinRoom", "data": { "roomCode": code } }))
            .await;
        match self.next() {
            ServerEvent::JoinRoomResponse(response) => {
                assert!(response.success, "join failed: {:?}", response.error);
                response.room.unwrap().participants
            }
            other => panic!("expected joinRoomResponse, got {other:?}"),
        }
    }

    async fn say(&self, room_id: Uuid, text: &str, temp_id: Option<&str>) {
        self.send(ClientCommand::Message {
            room_id,
            text: Some(text.into()),
            file: None,
            reply_to: None,
            temp_id: temp_id.map(str::to_string),
        })
        .await;
    }

    async fn disconnect(&self) {
        self.gateway.disconnect(&self.handle).await;
    }
}

fn error_code(event: &ServerEvent) -> Option<ErrorCode> {
    match event {
        ServerEvent::Error { code, .. } => Some(*code),
        _ => None,
    }
}

/// Room of three: alice created it; everyone has drained the join chatter.
async fn room_of_three(gateway: &Gateway) -> (Uuid, Client, Client, Client) {
    let mut alice = Client::connect(gateway, "uid_alice").await;
    let mut bob = Client::connect(gateway, "uid_bob").await;
    let mut carol = Client::connect(gateway, "uid_carol").await;
    let room_id = alice.create(Privacy::Public).await;
    alice.join("ABC123").await;
    bob.join("abc123").await;
    carol.join("ABC123").await;
    alice.drain();
    bob.drain();
    (room_id, alice, bob, carol)
}

#[tokio::test]
async fn join_snapshot_and_presence() {
    let gateway = hub(HubConfig::default());
    let mut alice = Client::connect(&gateway, "uid_alice").await;
    let mut bob = Client::connect(&gateway, "uid_bob").await;
    let room_id = alice.create(Privacy::Public).await;

    assert_eq!(alice.join("ABC123").await, vec!["uid_alice".to_string()]);
    assert_eq!(bob.join("ABC123").await, vec!["uid_alice".to_string(), "uid_bob".to_string()]);

    match alice.next() {
        ServerEvent::Presence {
            room_id: id,
            users,
            action,
        } => {
            assert_eq!(id, room_id);
            assert_eq!(action, PresenceAction::Joined);
            assert_eq!(users.len(), 1);
            assert_eq!(users[0].user.id, "uid_bob");
            assert!(users[0].is_online);
        }
        other => panic!("expected presence, got {other:?}"),
    }
    assert!(bob.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn full_room_rejects_and_stays_unchanged() {
    let gateway = hub(HubConfig {
        room_capacity: 2,
        ..HubConfig::default()
    });
    let mut alice = Client::connect(&gateway, "uid_alice").await;
    let mut bob = Client::connect(&gateway, "uid_bob").await;
    let mut carol = Client::connect(&gateway, "uid_carol").await;
    alice.create(Privacy::Public).await;
    alice.join("ABC123").await;
    bob.join("ABC123").await;
    alice.drain();

    carol.send_json(json!({ "type": "joinRoom", "data": { "roomCode": "ABC123" } })).await;
    match carol.next() {
        ServerEvent::JoinRoomResponse(response) => {
            assert!(!response.success);
            assert_eq!(response.error.as_deref(), Some("RoomFull"));
            assert!(response.room.is_none());
        }
        other => panic!("expected joinRoomResponse, got {other:?}"),
    }
    assert!(alice.drain().is_empty());
    assert!(bob.drain().is_empty());

    tokio::time::sleep(Duration::from_millis(1)).await;
    let summary = gateway.registry().lookup("ABC123").await.unwrap().summary();
    assert_eq!(summary.participant_count, 2);
    assert_eq!(summary.max_participants, 2);
}

#[tokio::test]
async fn join_errors_use_the_response_envelope() {
    let gateway = hub(HubConfig::default());
    let mut bob = Client::connect(&gateway, "uid_bob").await;

    bob.send_json(json!({ "type": "joinRoom", "data": { "roomCode": "AB" } })).await;
    match bob.next() {
        ServerEvent::JoinRoomResponse(response) => assert_eq!(response.error.as_deref(), Some("InvalidRoomCode")),
        other => panic!("unexpected {other:?}"),
    }

    bob.send_json(json!({ "type": "joinRoom", "data": { "roomCode": "NOPE99" } })).await;
    match bob.next() {
        ServerEvent::JoinRoomResponse(response) => assert_eq!(response.error.as_deref(), Some("RoomNotFound")),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn private_rooms_follow_admission_policy() {
    let gateway = Gateway::with_admission(registry(HubConfig::default()), InviteOnly);
    let mut alice = Client::connect(&gateway, "uid_alice").await;
    let mut bob = Client::connect(&gateway, "uid_bob").await;
    alice.create(Privacy::Private).await;

    bob.send_json(json!({ "type": "joinRoom", "data": { "roomCode": "ABC123" } })).await;
    match bob.next() {
        ServerEvent::JoinRoomResponse(response) => assert_eq!(response.error.as_deref(), Some("Forbidden")),
        other => panic!("unexpected {other:?}"),
    }
    // The creator gets in regardless of the policy.
    assert_eq!(alice.join("ABC123").await, vec!["uid_alice".to_string()]);
    assert!(gateway.registry().list_public().await.is_empty());
}

#[tokio::test]
async fn every_member_sees_the_same_order() {
    let gateway = hub(HubConfig::default());
    let (room_id, mut alice, mut bob, mut carol) = room_of_three(&gateway).await;

    alice.say(room_id, "A", None).await;
    bob.say(room_id, "B", None).await;
    carol.say(room_id, "C", None).await;

    for client in [&mut alice, &mut bob, &mut carol] {
        let seen: Vec<(u64, String)> = client
            .drain()
            .into_iter()
            .filter_map(|event| match event {
                ServerEvent::MessageReceived(envelope) => {
                    Some((envelope.message.seq, envelope.message.text.unwrap_or_default()))
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            seen,
            vec![(1, "A".to_string()), (2, "B".to_string()), (3, "C".to_string())],
            "order seen by {}",
            client.id()
        );
    }
}

#[tokio::test]
async fn resubmitted_temp_id_stores_once() {
    let gateway = hub(HubConfig::default());
    let (room_id, mut alice, mut bob, _carol) = room_of_three(&gateway).await;

    alice.say(room_id, "hello", Some("tmp-1")).await;
    alice.say(room_id, "hello", Some("tmp-1")).await;

    let ids: Vec<Uuid> = alice
        .drain()
        .into_iter()
        .filter_map(|event| match event {
            ServerEvent::MessageReceived(envelope) => {
                assert_eq!(envelope.temp_id.as_deref(), Some("tmp-1"));
                Some(envelope.message.id)
            }
            _ => None,
        })
        .collect();
    assert_eq!(ids.len(), 2);
    assert_eq!(ids[0], ids[1]);

    let at_bob = bob.drain();
    assert_eq!(at_bob.len(), 1);

    alice.send(ClientCommand::FetchHistory {
        room_id,
        before_seq: None,
        limit: None,
    })
    .await;
    match alice.next() {
        ServerEvent::History { messages, .. } => assert_eq!(messages.len(), 1),
        other => panic!("expected history, got {other:?}"),
    }
}

#[tokio::test]
async fn bad_messages_are_refused_with_temp_id() {
    let gateway = hub(HubConfig::default());
    let (room_id, mut alice, mut bob, _carol) = room_of_three(&gateway).await;

    alice.say(room_id, &"x".repeat(2001), Some("tmp-long")).await;
    match alice.next() {
        ServerEvent::Error { code, temp_id, .. } => {
            assert_eq!(code, ErrorCode::MessageTooLong);
            assert_eq!(temp_id.as_deref(), Some("tmp-long"));
        }
        other => panic!("unexpected {other:?}"),
    }

    alice.send_json(json!({ "type": "message", "data": { "roomId": room_id, "text": "  " } })).await;
    assert_eq!(error_code(&alice.next()), Some(ErrorCode::EmptyMessage));

    alice.send_json(json!({ "type": "message", "data": { "roomId": room_id, "text": 42 } })).await;
    assert_eq!(error_code(&alice.next()), Some(ErrorCode::InvalidPayload));

    assert!(bob.drain().is_empty());
}

#[tokio::test]
async fn read_receipts_only_report_growth() {
    let gateway = hub(HubConfig::default());
    let (room_id, mut alice, mut bob, mut carol) = room_of_three(&gateway).await;
    alice.say(room_id, "read me", None).await;
    let message_id = match bob.next() {
        ServerEvent::MessageReceived(envelope) => envelope.message.id,
        other => panic!("unexpected {other:?}"),
    };
    alice.drain();
    carol.drain();

    let receipt = ClientCommand::ReadReceipt {
        room_id,
        message_ids: vec![message_id, Uuid::new_v4()],
        user_id: bob.id(),
    };
    bob.send(receipt.clone()).await;
    match alice.next() {
        ServerEvent::ReadReceipt { user_id, message_ids, .. } => {
            assert_eq!(user_id, "uid_bob");
            assert_eq!(message_ids, vec![message_id]);
        }
        other => panic!("unexpected {other:?}"),
    }

    bob.send(receipt).await;
    assert!(alice.drain().is_empty());
    assert!(bob.drain().into_iter().all(|e| !matches!(e, ServerEvent::Error { .. })));
}

#[tokio::test]
async fn identity_fields_must_match() {
    let gateway = hub(HubConfig::default());
    let (room_id, mut alice, mut bob, _carol) = room_of_three(&gateway).await;

    alice.send(ClientCommand::Typing {
        room_id,
        user_id: "uid_bob".into(),
        typing: true,
    })
    .await;
    assert_eq!(error_code(&alice.next()), Some(ErrorCode::IdentityMismatch));
    assert!(bob.drain().is_empty());
}

#[tokio::test]
async fn creator_cannot_be_removed() {
    let gateway = hub(HubConfig::default());
    let (room_id, mut alice, mut bob, mut carol) = room_of_three(&gateway).await;
    carol.drain();

    bob.send(ClientCommand::RemoveUser {
        room_id,
        user_id: alice.id(),
    })
    .await;
    assert_eq!(error_code(&bob.next()), Some(ErrorCode::CannotRemoveCreator));

    alice.send(ClientCommand::RemoveUser {
        room_id,
        user_id: alice.id(),
    })
    .await;
    assert_eq!(error_code(&alice.next()), Some(ErrorCode::CannotRemoveCreator));

    bob.send(ClientCommand::RemoveUser {
        room_id,
        user_id: carol.id(),
    })
    .await;
    assert_eq!(error_code(&bob.next()), Some(ErrorCode::Forbidden));
    assert!(carol.drain().is_empty());

    alice.send(ClientCommand::RemoveUser {
        room_id,
        user_id: carol.id(),
    })
    .await;
    assert!(matches!(carol.next(), ServerEvent::UserRemoved { user_id, .. } if user_id == "uid_carol"));
    assert!(matches!(bob.next(), ServerEvent::UserRemoved { .. }));
    match bob.next() {
        ServerEvent::Presence { users, action, .. } => {
            assert_eq!(action, PresenceAction::Left);
            assert_eq!(users[0].user.id, "uid_carol");
        }
        other => panic!("unexpected {other:?}"),
    }

    carol.say(room_id, "still here?", None).await;
    assert_eq!(error_code(&carol.next()), Some(ErrorCode::NotAMember));
}

#[tokio::test(start_paused = true)]
async fn typing_expires_and_grace_drops_participant() {
    let gateway = hub(HubConfig::default());
    let (room_id, mut alice, bob, mut carol) = room_of_three(&gateway).await;
    carol.drain();

    bob.send(ClientCommand::Typing {
        room_id,
        user_id: bob.id(),
        typing: true,
    })
    .await;
    match alice.next() {
        ServerEvent::Presence { users, action, .. } => {
            assert_eq!(action, PresenceAction::Updated);
            assert!(users[0].is_typing);
        }
        other => panic!("unexpected {other:?}"),
    }

    tokio::time::sleep(Duration::from_millis(3300)).await;
    match alice.next() {
        ServerEvent::Presence { users, action, .. } => {
            assert_eq!(action, PresenceAction::Updated);
            assert_eq!(users[0].user.id, "uid_bob");
            assert!(!users[0].is_typing);
        }
        other => panic!("unexpected {other:?}"),
    }

    // Back inside the grace window: no left/joined pair.
    bob.disconnect().await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    let mut bob = Client::connect(&gateway, "uid_bob").await;
    let participants = bob.join("ABC123").await;
    assert_eq!(participants.iter().filter(|id| *id == "uid_bob").count(), 1);
    assert!(alice.drain().is_empty());

    // Gone for good after the grace window.
    bob.disconnect().await;
    tokio::time::sleep(Duration::from_secs(6)).await;
    match alice.next() {
        ServerEvent::Presence { users, action, .. } => {
            assert_eq!(action, PresenceAction::Left);
            assert_eq!(users[0].user.id, "uid_bob");
            assert!(!users[0].is_online);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn direct_call_glare_resolves_to_one_session() {
    let gateway = hub(HubConfig::default());
    let mut alice = Client::connect(&gateway, "uid_alice").await;
    let mut bob = Client::connect(&gateway, "uid_bob").await;

    alice.send(ClientCommand::CallRequest {
        from: alice.id(),
        to: Some(bob.id()),
        room_id: None,
        call_type: CallType::Video,
    })
    .await;
    bob.send(ClientCommand::CallRequest {
        from: bob.id(),
        to: Some(alice.id()),
        room_id: None,
        call_type: CallType::Video,
    })
    .await;

    let session_id = match alice.next() {
        ServerEvent::CallRequest { session_id, to, .. } => {
            assert_eq!(to.as_deref(), Some("uid_bob"));
            session_id
        }
        other => panic!("unexpected {other:?}"),
    };
    assert!(alice.drain().is_empty());

    let at_bob = bob.drain();
    assert!(matches!(&at_bob[0], ServerEvent::CallRequest { session_id: id, .. } if *id == session_id));
    assert_eq!(error_code(&at_bob[1]), Some(ErrorCode::GlareLost));

    bob.send(ClientCommand::CallResponse {
        session_id,
        from: bob.id(),
        accepted: true,
    })
    .await;
    assert!(matches!(alice.next(), ServerEvent::CallResponse { accepted: true, .. }));

    let sdp = json!({ "type": "offer", "sdp": "v=0" });
    alice.send(ClientCommand::CallOffer {
        session_id,
        to: bob.id(),
        sdp: sdp.clone(),
    })
    .await;
    match bob.next() {
        ServerEvent::CallOffer { from, sdp: relayed, .. } => {
            assert_eq!(from, "uid_alice");
            assert_eq!(relayed, sdp);
        }
        other => panic!("unexpected {other:?}"),
    }

    bob.disconnect().await;
    match alice.next() {
        ServerEvent::CallEnd { reason, .. } => assert_eq!(reason, EndReason::ConnectionLost),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn unanswered_call_times_out() {
    let gateway = hub(HubConfig::default());
    let mut alice = Client::connect(&gateway, "uid_alice").await;
    let mut bob = Client::connect(&gateway, "uid_bob").await;

    alice.send(ClientCommand::CallRequest {
        from: alice.id(),
        to: Some(bob.id()),
        room_id: None,
        call_type: CallType::Audio,
    })
    .await;
    let session_id = match alice.next() {
        ServerEvent::CallRequest { session_id, .. } => session_id,
        other => panic!("unexpected {other:?}"),
    };
    bob.drain();

    tokio::time::sleep(Duration::from_secs(31)).await;
    for client in [&mut alice, &mut bob] {
        match client.next() {
            ServerEvent::CallEnd { session_id: id, reason, .. } => {
                assert_eq!(id, session_id);
                assert_eq!(reason, EndReason::TimedOut);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    alice.send(ClientCommand::CallOffer {
        session_id,
        to: bob.id(),
        sdp: json!({ "type": "offer" }),
    })
    .await;
    assert_eq!(error_code(&alice.next()), Some(ErrorCode::NoActiveSession));

    alice.send(ClientCommand::CallHistory).await;
    match alice.next() {
        ServerEvent::CallHistory { calls } => {
            assert_eq!(calls.len(), 1);
            assert_eq!(calls[0].id, session_id);
            assert_eq!(calls[0].end_reason, Some(EndReason::TimedOut));
        }
        other => panic!("unexpected {other:?}"),
    }

    // The callee never picked up but still sees the missed call.
    bob.send(ClientCommand::CallHistory).await;
    match bob.next() {
        ServerEvent::CallHistory { calls } => {
            assert_eq!(calls.len(), 1);
            assert_eq!(calls[0].id, session_id);
            assert_eq!(calls[0].invited, vec!["uid_bob".to_string()]);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn calling_an_offline_user_is_unreachable() {
    let gateway = hub(HubConfig::default());
    let mut alice = Client::connect(&gateway, "uid_alice").await;

    alice.send(ClientCommand::CallRequest {
        from: alice.id(),
        to: Some("uid_ghost".into()),
        room_id: None,
        call_type: CallType::Audio,
    })
    .await;
    assert_eq!(error_code(&alice.next()), Some(ErrorCode::PeerUnreachable));
}

#[tokio::test]
async fn room_call_rings_every_connected_member() {
    let gateway = hub(HubConfig::default());
    let (room_id, mut alice, mut bob, mut carol) = room_of_three(&gateway).await;
    carol.drain();

    alice.send(ClientCommand::CallRequest {
        from: alice.id(),
        to: None,
        room_id: Some(room_id),
        call_type: CallType::Video,
    })
    .await;
    let session_id = match alice.next() {
        ServerEvent::CallRequest { session_id, room_id: id, .. } => {
            assert_eq!(id, Some(room_id));
            session_id
        }
        other => panic!("unexpected {other:?}"),
    };
    assert!(matches!(bob.next(), ServerEvent::CallRequest { .. }));
    assert!(matches!(carol.next(), ServerEvent::CallRequest { .. }));

    bob.send(ClientCommand::CallResponse {
        session_id,
        from: bob.id(),
        accepted: true,
    })
    .await;
    assert!(matches!(alice.next(), ServerEvent::CallResponse { accepted: true, .. }));

    carol.send(ClientCommand::CallResponse {
        session_id,
        from: carol.id(),
        accepted: true,
    })
    .await;
    assert!(matches!(alice.next(), ServerEvent::CallResponse { .. }));
    assert!(matches!(bob.next(), ServerEvent::CallResponse { .. }));

    bob.send(ClientCommand::CallEnd {
        session_id,
        reason: None,
    })
    .await;
    assert!(matches!(alice.next(), ServerEvent::CallEnd { reason: EndReason::UserEnded, .. }));
    assert!(matches!(carol.next(), ServerEvent::CallEnd { .. }));
    assert!(bob.drain().is_empty());
}

#[tokio::test]
async fn slow_consumer_is_evicted() {
    let gateway = hub(HubConfig {
        outbound_queue: 4,
        ..HubConfig::default()
    });
    let (room_id, alice, mut bob, _carol) = room_of_three(&gateway).await;

    for n in 0..10 {
        alice.say(room_id, &format!("msg {n}"), None).await;
    }

    // Whatever was queued still drains, then the queue is closed.
    let mut received = 0;
    while let Some(event) = bob.rx.recv().await {
        assert!(matches!(event, ServerEvent::MessageReceived(_)));
        received += 1;
    }
    assert_eq!(received, 4);
}

#[tokio::test]
async fn edits_and_pins_reach_every_member() {
    let gateway = hub(HubConfig::default());
    let (room_id, mut alice, mut bob, mut carol) = room_of_three(&gateway).await;
    carol.drain();

    alice.say(room_id, "draft", None).await;
    let message_id = match bob.next() {
        ServerEvent::MessageReceived(envelope) => envelope.message.id,
        other => panic!("unexpected {other:?}"),
    };
    alice.drain();
    carol.drain();

    bob.send(ClientCommand::EditMessage {
        room_id,
        message_id,
        text: "hijacked".into(),
    })
    .await;
    assert_eq!(error_code(&bob.next()), Some(ErrorCode::Forbidden));
    assert!(alice.drain().is_empty());

    alice.send(ClientCommand::EditMessage {
        room_id,
        message_id,
        text: "final".into(),
    })
    .await;
    for client in [&mut alice, &mut bob, &mut carol] {
        match client.next() {
            ServerEvent::MessageEdited { message_id: id, text, .. } => {
                assert_eq!(id, message_id);
                assert_eq!(text, "final");
            }
            other => panic!("{} expected messageEdited, got {other:?}", client.id()),
        }
    }

    let pin = ClientCommand::PinMessage {
        room_id,
        message_id,
        pinned: true,
    };
    bob.send(pin.clone()).await;
    for client in [&mut alice, &mut bob, &mut carol] {
        assert!(matches!(
            client.next(),
            ServerEvent::MessagePinned { message_id: id, pinned: true, .. } if id == message_id
        ));
    }

    // Pinning an already pinned message changes nothing and says nothing.
    bob.send(pin).await;
    assert!(alice.drain().is_empty());
    assert!(bob.drain().is_empty());

    carol.send(ClientCommand::PinMessage {
        room_id,
        message_id: Uuid::new_v4(),
        pinned: true,
    })
    .await;
    assert_eq!(error_code(&carol.next()), Some(ErrorCode::MessageNotFound));
}

#[tokio::test]
async fn leaving_acks_and_ends_the_leavers_call() {
    let gateway = hub(HubConfig::default());
    let (room_id, mut alice, mut bob, mut carol) = room_of_three(&gateway).await;
    carol.drain();

    alice.send(ClientCommand::CallRequest {
        from: alice.id(),
        to: None,
        room_id: Some(room_id),
        call_type: CallType::Audio,
    })
    .await;
    let session_id = match alice.next() {
        ServerEvent::CallRequest { session_id, .. } => session_id,
        other => panic!("unexpected {other:?}"),
    };
    bob.send(ClientCommand::CallResponse {
        session_id,
        from: bob.id(),
        accepted: true,
    })
    .await;
    alice.drain();
    bob.drain();
    carol.drain();

    bob.send(ClientCommand::LeaveRoom {
        room_id,
        user_id: bob.id(),
    })
    .await;
    assert_eq!(bob.drain(), vec![ServerEvent::LeaveRoomAck { room_id }]);

    for client in [&mut alice, &mut carol] {
        let events = client.drain();
        assert!(
            events.iter().any(|event| matches!(
                event,
                ServerEvent::CallEnd { session_id: id, reason: EndReason::UserEnded, .. } if *id == session_id
            )),
            "{} saw {events:?}",
            client.id()
        );
        match events.last() {
            Some(ServerEvent::Presence { users, action, .. }) => {
                assert_eq!(*action, PresenceAction::Left);
                assert_eq!(users[0].user.id, "uid_bob");
            }
            other => panic!("{} expected presence left, got {other:?}", client.id()),
        }
    }

    bob.say(room_id, "anyone?", None).await;
    assert_eq!(error_code(&bob.next()), Some(ErrorCode::NotAMember));
}

#[tokio::test]
async fn relay_to_a_peer_without_a_live_queue_is_unreachable() {
    let gateway = hub(HubConfig {
        outbound_queue: 4,
        ..HubConfig::default()
    });
    let mut alice = Client::connect(&gateway, "uid_alice").await;
    let mut bob = Client::connect(&gateway, "uid_bob").await;

    alice.send(ClientCommand::CallRequest {
        from: alice.id(),
        to: Some(bob.id()),
        room_id: None,
        call_type: CallType::Video,
    })
    .await;
    let session_id = match alice.next() {
        ServerEvent::CallRequest { session_id, .. } => session_id,
        other => panic!("unexpected {other:?}"),
    };
    bob.drain();
    bob.send(ClientCommand::CallResponse {
        session_id,
        from: bob.id(),
        accepted: true,
    })
    .await;
    alice.drain();

    // Bob never reads: his queue fills, the next candidate evicts him.
    for n in 0..4 {
        alice.send(ClientCommand::IceCandidate {
            session_id,
            to: bob.id(),
            candidate: json!({ "candidate": format!("c{n}") }),
        })
        .await;
        assert!(alice.drain().is_empty());
    }
    alice.send(ClientCommand::IceCandidate {
        session_id,
        to: bob.id(),
        candidate: json!({ "candidate": "c4" }),
    })
    .await;
    assert_eq!(error_code(&alice.next()), Some(ErrorCode::PeerUnreachable));

    // The session itself is still up until bob's disconnect path runs.
    alice.send(ClientCommand::CallOffer {
        session_id,
        to: bob.id(),
        sdp: json!({ "type": "offer" }),
    })
    .await;
    assert_eq!(error_code(&alice.next()), Some(ErrorCode::PeerUnreachable));

    let mut relayed = 0;
    while let Some(event) = bob.rx.recv().await {
        assert!(matches!(event, ServerEvent::IceCandidate { .. }));
        relayed += 1;
    }
    assert_eq!(relayed, 4);
}
