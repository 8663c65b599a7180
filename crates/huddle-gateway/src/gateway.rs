//! Connection gateway: the entry point for every client command.
//!
//! Transport-agnostic. The WebSocket loop in [`crate::connection`] feeds raw
//! frames to [`Gateway::dispatch_text`] and drains the outbound receiver
//! returned by [`Gateway::connect`]; tests drive the same API directly.

use std::sync::{Arc, Weak};

use tokio::sync::{Mutex, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use huddle_types::api::{CreateRoomResponse, JoinRoomResponse};
use huddle_types::events::{ClientCommand, ServerEvent};
use huddle_types::models::{CallRecord, CallType, EndReason, Privacy, UserPublic};

use crate::calls::{CallRelay, CallTarget, Notices, Signal};
use crate::config::HubConfig;
use crate::dispatcher::{ConnId, Dispatcher};
use crate::error::HubError;
use crate::messages::MessageDraft;
use crate::registry::Registry;
use crate::room::{RoomHandle, RoomInfo};
use crate::validate;

/// Decides who may enter a private room. The room creator is always admitted.
pub trait AdmissionPolicy: Send + Sync + 'static {
    fn admit(&self, room: &RoomInfo, user: &UserPublic) -> bool;
}

/// Anyone holding the code gets in.
pub struct AllowAll;

impl AdmissionPolicy for AllowAll {
    fn admit(&self, _room: &RoomInfo, _user: &UserPublic) -> bool {
        true
    }
}

/// One live transport session of an authenticated user.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub conn_id: ConnId,
    pub user: UserPublic,
}

#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    registry: Registry,
    dispatcher: Dispatcher,
    config: Arc<HubConfig>,
    admission: Box<dyn AdmissionPolicy>,
    /// Direct (1:1) calls. Room calls live in their room actor.
    desk: Mutex<CallRelay>,
}

/// How a failed command is reported back.
enum ReplyShape {
    CreateRoom,
    JoinRoom,
    Message(Option<String>),
    Plain,
}

#[derive(Clone)]
enum CallOp {
    Respond(bool),
    Relay {
        to: String,
        signal: Signal,
        payload: serde_json::Value,
    },
    End(EndReason),
}

impl Gateway {
    pub fn new(registry: Registry) -> Self {
        Self::with_admission(registry, AllowAll)
    }

    /// Must be called inside a tokio runtime: starts the direct-call sweep.
    pub fn with_admission(registry: Registry, admission: impl AdmissionPolicy) -> Self {
        let config = registry.config().clone();
        let inner = Arc::new(GatewayInner {
            dispatcher: registry.dispatcher().clone(),
            desk: Mutex::new(CallRelay::new(
                config.ring_timeout,
                config.call_history_retention,
                config.call_history_capacity,
            )),
            admission: Box::new(admission),
            config,
            registry,
        });
        spawn_desk_sweep(Arc::downgrade(&inner));
        Self { inner }
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Register a connection for an authenticated identity and queue `ready`.
    pub async fn connect(&self, user: UserPublic) -> Result<(ConnectionHandle, mpsc::Receiver<ServerEvent>), HubError> {
        if !user.is_well_formed() {
            return Err(HubError::InvalidPayload("malformed identity".into()));
        }

        let (conn_id, rx) = self.inner.dispatcher.register(user.clone()).await;
        info!("{} ({}) connected to gateway as {}", user.name, user.id, conn_id);
        self.inner
            .dispatcher
            .send_to_connection(conn_id, ServerEvent::Ready { user: user.clone() })
            .await;
        Ok((ConnectionHandle { conn_id, user }, rx))
    }

    /// Parse, validate and run one raw text frame.
    pub async fn dispatch_text(&self, handle: &ConnectionHandle, raw: &str) {
        match validate::parse(raw, &self.inner.config) {
            Ok(command) => self.dispatch(handle, command).await,
            Err(e) => {
                debug!("raw frame from {}: {}", handle.conn_id, raw.chars().take(200).collect::<String>());
                self.reject(handle, e).await;
            }
        }
    }

    /// Report a frame-level failure that never became a command.
    pub async fn reject(&self, handle: &ConnectionHandle, err: HubError) {
        warn!("{} ({}) frame rejected: {}", handle.user.name, handle.user.id, err);
        self.reply(handle, err.to_event()).await;
    }

    /// Validate and run one parsed command. Failures go back to the sender only.
    pub async fn dispatch(&self, handle: &ConnectionHandle, command: ClientCommand) {
        let name = command.name();
        let shape = match &command {
            ClientCommand::CreateRoom { .. } => ReplyShape::CreateRoom,
            ClientCommand::JoinRoom { .. } => ReplyShape::JoinRoom,
            ClientCommand::Message { temp_id, .. } => ReplyShape::Message(temp_id.clone()),
            _ => ReplyShape::Plain,
        };

        let result = match validate::check(&command, &handle.user, &self.inner.config) {
            Ok(()) => self.execute(handle, command).await,
            Err(e) => Err(e),
        };

        let Err(e) = result else {
            return;
        };
        if e.code().is_validation() {
            warn!("{} ({}) {} rejected: {}", handle.user.name, handle.user.id, name, e);
        } else {
            debug!("{} ({}) {} refused: {}", handle.user.name, handle.user.id, name, e);
        }

        let event = match shape {
            ReplyShape::CreateRoom => ServerEvent::CreateRoomResponse(CreateRoomResponse::failed(e.code().as_str())),
            ReplyShape::JoinRoom => ServerEvent::JoinRoomResponse(JoinRoomResponse::failed(e.code().as_str())),
            ReplyShape::Message(temp_id) => ServerEvent::Error {
                code: e.code(),
                message: e.to_string(),
                temp_id,
            },
            ReplyShape::Plain => e.to_event(),
        };
        self.reply(handle, event).await;
    }

    /// Tear a connection down: rooms start their grace window, and direct
    /// calls end if this was the user's last connection.
    pub async fn disconnect(&self, handle: &ConnectionHandle) {
        let Some(departed) = self.inner.dispatcher.unregister(handle.conn_id).await else {
            return;
        };

        for room_id in &departed.rooms {
            if let Some(room) = self.inner.registry.room(*room_id).await {
                room.connection_lost(handle.conn_id).await;
            }
        }

        if departed.last_for_user {
            let mut desk = self.inner.desk.lock().await;
            let notices = desk.drop_member(&departed.user.id, EndReason::ConnectionLost, Instant::now());
            self.deliver(notices).await;
        }

        info!(
            "{} ({}) disconnected from gateway ({} rooms)",
            departed.user.name,
            departed.user.id,
            departed.rooms.len()
        );
    }

    async fn execute(&self, handle: &ConnectionHandle, command: ClientCommand) -> Result<(), HubError> {
        let user_id = handle.user.id.clone();
        match command {
            ClientCommand::CreateRoom { name, privacy, .. } => {
                let room = self.inner.registry.create_room(&handle.user, name, privacy).await?;
                let response = CreateRoomResponse::created(room.id(), room.info.code.clone());
                self.reply(handle, ServerEvent::CreateRoomResponse(response)).await;
            }

            ClientCommand::JoinRoom { room_code, .. } => {
                let code = validate::room_code(&room_code)?;
                let room = self
                    .inner
                    .registry
                    .lookup(&code)
                    .await
                    .ok_or(HubError::RoomNotFound(code))?;
                let admitted = room.info.privacy == Privacy::Public || self.inner.admission.admit(&room.info, &handle.user);

                // Tracked first so fan-out reaches this connection from the join step on.
                self.inner.dispatcher.track_room(handle.conn_id, room.id()).await;
                if let Err(e) = room.join(handle.user.clone(), handle.conn_id, admitted).await {
                    self.inner.dispatcher.untrack_room(handle.conn_id, room.id()).await;
                    return Err(e);
                }
            }

            ClientCommand::LeaveRoom { room_id, .. } => {
                self.room(room_id).await?.leave(user_id.clone()).await?;
                self.inner.dispatcher.untrack_user(&user_id, room_id).await;
            }

            ClientCommand::Message {
                room_id,
                text,
                file,
                reply_to,
                temp_id,
            } => {
                let draft = MessageDraft {
                    text,
                    file,
                    reply_to,
                    temp_id,
                };
                self.room(room_id)
                    .await?
                    .send_message(user_id, handle.conn_id, draft)
                    .await?;
            }

            ClientCommand::EditMessage {
                room_id,
                message_id,
                text,
            } => {
                self.room(room_id).await?.edit_message(user_id, message_id, text).await?;
            }

            ClientCommand::PinMessage {
                room_id,
                message_id,
                pinned,
            } => {
                self.room(room_id).await?.set_pinned(user_id, message_id, pinned).await?;
            }

            ClientCommand::Typing { room_id, typing, .. } => {
                self.room(room_id).await?.set_typing(user_id, typing).await?;
            }

            ClientCommand::ReadReceipt {
                room_id, message_ids, ..
            } => {
                self.room(room_id).await?.mark_read(user_id, message_ids).await?;
            }

            ClientCommand::FetchHistory {
                room_id,
                before_seq,
                limit,
            } => {
                let messages = self.room(room_id).await?.history(user_id, before_seq, limit).await?;
                self.reply(handle, ServerEvent::History { room_id, messages }).await;
            }

            ClientCommand::RemoveUser { room_id, user_id: target } => {
                self.room(room_id).await?.remove(target.clone(), user_id).await?;
                self.inner.dispatcher.untrack_user(&target, room_id).await;
            }

            ClientCommand::CallRequest {
                to: Some(to), call_type, ..
            } => self.request_direct_call(handle, to, call_type).await?,

            ClientCommand::CallRequest {
                room_id: Some(room_id),
                call_type,
                ..
            } => {
                let session_id = self.room(room_id).await?.request_call(user_id.clone(), call_type).await?;
                let echo = ServerEvent::CallRequest {
                    session_id,
                    from: user_id,
                    to: None,
                    room_id: Some(room_id),
                    call_type,
                };
                self.reply(handle, echo).await;
            }

            ClientCommand::CallRequest { .. } => {
                return Err(HubError::InvalidPayload("callRequest needs `to` or `roomId`".into()));
            }

            ClientCommand::CallResponse {
                session_id, accepted, ..
            } => self.call_op(handle, session_id, CallOp::Respond(accepted)).await?,

            ClientCommand::CallOffer { session_id, to, sdp } => {
                let op = CallOp::Relay {
                    to,
                    signal: Signal::Offer,
                    payload: sdp,
                };
                self.call_op(handle, session_id, op).await?;
            }

            ClientCommand::CallAnswer { session_id, to, sdp } => {
                let op = CallOp::Relay {
                    to,
                    signal: Signal::Answer,
                    payload: sdp,
                };
                self.call_op(handle, session_id, op).await?;
            }

            ClientCommand::IceCandidate {
                session_id,
                to,
                candidate,
            } => {
                let op = CallOp::Relay {
                    to,
                    signal: Signal::IceCandidate,
                    payload: candidate,
                };
                self.call_op(handle, session_id, op).await?;
            }

            ClientCommand::CallEnd { session_id, reason } => {
                let reason = reason.unwrap_or(EndReason::UserEnded);
                self.call_op(handle, session_id, CallOp::End(reason)).await?;
            }

            ClientCommand::CallHistory => {
                let calls = self.call_history(handle).await;
                self.reply(handle, ServerEvent::CallHistory { calls }).await;
            }
        }
        Ok(())
    }

    async fn room(&self, room_id: Uuid) -> Result<RoomHandle, HubError> {
        self.inner
            .registry
            .room(room_id)
            .await
            .ok_or(HubError::RoomNotFound(room_id.to_string()))
    }

    async fn reply(&self, handle: &ConnectionHandle, event: ServerEvent) {
        if !self.inner.dispatcher.send_to_connection(handle.conn_id, event).await {
            debug!("reply to {} dropped: connection gone", handle.conn_id);
        }
    }

    /// Deliver desk notices. Callers hold the desk lock so notices from
    /// consecutive transitions stay in order.
    async fn deliver(&self, notices: Notices) {
        deliver_notices(&self.inner.dispatcher, notices).await;
    }

    async fn request_direct_call(&self, handle: &ConnectionHandle, to: String, call_type: CallType) -> Result<(), HubError> {
        if to != handle.user.id && !self.inner.dispatcher.is_user_online(&to).await {
            return Err(HubError::PeerUnreachable(to));
        }

        let mut desk = self.inner.desk.lock().await;
        let (session_id, notices) = desk.request(&handle.user.id, CallTarget::User(to.clone()), call_type, Instant::now())?;
        self.deliver(notices).await;
        drop(desk);

        let echo = ServerEvent::CallRequest {
            session_id,
            from: handle.user.id.clone(),
            to: Some(to),
            room_id: None,
            call_type,
        };
        self.reply(handle, echo).await;
        Ok(())
    }

    /// Route a session-scoped operation to whichever relay owns the session.
    async fn call_op(&self, handle: &ConnectionHandle, session_id: Uuid, op: CallOp) -> Result<(), HubError> {
        let user_id = handle.user.id.as_str();
        {
            let mut desk = self.inner.desk.lock().await;
            if desk.state_of(session_id).is_some() {
                let now = Instant::now();
                match op {
                    CallOp::Respond(accepted) => {
                        let notices = desk.respond(session_id, user_id, accepted, now)?;
                        self.deliver(notices).await;
                    }
                    CallOp::End(reason) => {
                        let notices = desk.end(session_id, user_id, reason, now)?;
                        self.deliver(notices).await;
                    }
                    CallOp::Relay { to, signal, payload } => {
                        let (to, event) = desk.relay(session_id, user_id, &to, signal, payload)?;
                        if self.inner.dispatcher.send_to_user(&to, event).await == 0 {
                            return Err(HubError::PeerUnreachable(to));
                        }
                    }
                }
                return Ok(());
            }
        }

        for room_id in self.inner.dispatcher.rooms_of(handle.conn_id).await {
            let Some(room) = self.inner.registry.room(room_id).await else {
                continue;
            };
            let user_id = user_id.to_string();
            let result = match op.clone() {
                CallOp::Respond(accepted) => room.respond_call(session_id, user_id, accepted).await,
                CallOp::End(reason) => room.end_call(session_id, user_id, reason).await,
                CallOp::Relay { to, signal, payload } => room.relay(session_id, user_id, to, signal, payload).await,
            };
            match result {
                Err(HubError::NoActiveSession(_)) => continue,
                other => return other,
            }
        }
        Err(HubError::NoActiveSession(session_id))
    }

    /// Finished direct calls plus room calls of every room this connection joined.
    async fn call_history(&self, handle: &ConnectionHandle) -> Vec<CallRecord> {
        let mut calls = self.inner.desk.lock().await.history_for(&handle.user.id);
        for room_id in self.inner.dispatcher.rooms_of(handle.conn_id).await {
            if let Some(room) = self.inner.registry.room(room_id).await {
                match room.call_history(handle.user.id.clone()).await {
                    Ok(records) => calls.extend(records),
                    Err(e) => debug!("call history of room {} unavailable: {}", room_id, e),
                }
            }
        }
        calls.sort_by(|a, b| b.ended_at.cmp(&a.ended_at));
        calls
    }
}

async fn deliver_notices(dispatcher: &Dispatcher, notices: Notices) {
    for (user_id, event) in notices {
        if dispatcher.send_to_user(&user_id, event).await == 0 {
            debug!("call notice for {} not delivered: no live connection", user_id);
        }
    }
}

/// Ring timeouts and history retention for direct calls. Stops once the
/// gateway is dropped.
fn spawn_desk_sweep(inner: Weak<GatewayInner>) {
    tokio::spawn(async move {
        let period = match inner.upgrade() {
            Some(inner) => inner.config.sweep_interval,
            None => return,
        };
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let Some(inner) = inner.upgrade() else {
                debug!("gateway dropped, stopping direct-call sweep");
                return;
            };
            let mut desk = inner.desk.lock().await;
            let notices = desk.sweep(Instant::now());
            deliver_notices(&inner.dispatcher, notices).await;
        }
    });
}
