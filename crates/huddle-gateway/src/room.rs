//! The room actor: the single serialization point for one room.
//!
//! Every membership, message, presence and room-call mutation is a
//! [`RoomCommand`] processed one at a time by the actor task, which owns the
//! authoritative [`RoomState`]. Fan-out goes through the [`Dispatcher`]
//! without ever waiting on client I/O. Timers (typing expiry, reconnect grace,
//! ring timeout, dedup window) are evaluated on a periodic sweep.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use huddle_types::api::JoinRoomResponse;
use huddle_types::events::{MessageEnvelope, ServerEvent};
use huddle_types::models::{
    CallRecord, CallType, EndReason, Message, PresenceAction, PresenceUser, Privacy, Room,
    RoomPublic, UserId, UserPublic,
};

use crate::calls::{CallRelay, CallTarget, Notices, Signal};
use crate::config::HubConfig;
use crate::dispatcher::{ConnId, Dispatcher};
use crate::error::HubError;
use crate::messages::{Appended, MessageDraft, MessageLog};
use crate::presence::{Attach, PresenceEngine};

const PREVIEW_CHARS: usize = 80;

/// Immutable room metadata. Survives an actor restart.
#[derive(Debug, Clone)]
pub struct RoomInfo {
    pub id: Uuid,
    pub code: String,
    pub name: Option<String>,
    pub privacy: Privacy,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub capacity: usize,
}

type Reply<T> = oneshot::Sender<Result<T, HubError>>;

pub enum RoomCommand {
    Join {
        user: UserPublic,
        conn_id: ConnId,
        /// Admission decision for private rooms, made by the gateway's policy.
        admitted: bool,
        reply: Reply<()>,
    },
    Leave {
        user_id: UserId,
        reply: Reply<()>,
    },
    Remove {
        target: UserId,
        acting: UserId,
        reply: Reply<()>,
    },
    ConnectionLost {
        conn_id: ConnId,
    },
    Send {
        sender: UserId,
        conn_id: ConnId,
        draft: MessageDraft,
        reply: Reply<Message>,
    },
    Edit {
        user_id: UserId,
        message_id: Uuid,
        text: String,
        reply: Reply<()>,
    },
    MarkRead {
        user_id: UserId,
        message_ids: Vec<Uuid>,
        reply: Reply<Vec<Uuid>>,
    },
    SetPinned {
        user_id: UserId,
        message_id: Uuid,
        pinned: bool,
        reply: Reply<bool>,
    },
    SetTyping {
        user_id: UserId,
        typing: bool,
        reply: Reply<()>,
    },
    History {
        user_id: UserId,
        before: Option<u64>,
        limit: Option<usize>,
        reply: Reply<Vec<Message>>,
    },
    RequestCall {
        from: UserId,
        call_type: CallType,
        reply: Reply<Uuid>,
    },
    RespondCall {
        session_id: Uuid,
        user_id: UserId,
        accepted: bool,
        reply: Reply<()>,
    },
    Relay {
        session_id: Uuid,
        from: UserId,
        to: UserId,
        signal: Signal,
        payload: serde_json::Value,
        reply: Reply<()>,
    },
    EndCall {
        session_id: Uuid,
        user_id: UserId,
        reason: EndReason,
        reply: Reply<()>,
    },
    CallHistory {
        user_id: UserId,
        reply: Reply<Vec<CallRecord>>,
    },
    /// Fault injection for supervisor tests.
    #[cfg(test)]
    Crash,
}

impl RoomCommand {
    /// Answer a command that will never be processed.
    fn reject(self, err: HubError) {
        match self {
            Self::Join { reply, .. }
            | Self::Leave { reply, .. }
            | Self::Remove { reply, .. }
            | Self::Edit { reply, .. }
            | Self::SetTyping { reply, .. }
            | Self::RespondCall { reply, .. }
            | Self::Relay { reply, .. }
            | Self::EndCall { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Self::Send { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Self::MarkRead { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Self::SetPinned { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Self::History { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Self::RequestCall { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Self::CallHistory { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Self::ConnectionLost { .. } => {}
            #[cfg(test)]
            Self::Crash => {}
        }
    }
}

/// Why an actor stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomExit {
    /// Empty for longer than the idle TTL.
    Idle,
    /// Every handle was dropped.
    Detached,
}

/// Cloneable address of a room actor.
#[derive(Clone)]
pub struct RoomHandle {
    pub info: Arc<RoomInfo>,
    tx: mpsc::Sender<RoomCommand>,
    summary: watch::Receiver<RoomPublic>,
}

impl RoomHandle {
    pub fn id(&self) -> Uuid {
        self.info.id
    }

    /// Last snapshot the actor published. Never blocks the actor.
    pub fn summary(&self) -> RoomPublic {
        self.summary.borrow().clone()
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> RoomCommand) -> Result<T, HubError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| HubError::RoomNotFound(self.info.code.clone()))?;
        rx.await
            .map_err(|_| HubError::Internal(format!("room {} stopped mid-request", self.info.code)))?
    }

    pub async fn join(&self, user: UserPublic, conn_id: ConnId, admitted: bool) -> Result<(), HubError> {
        self.request(|reply| RoomCommand::Join {
            user,
            conn_id,
            admitted,
            reply,
        })
        .await
    }

    pub async fn leave(&self, user_id: UserId) -> Result<(), HubError> {
        self.request(|reply| RoomCommand::Leave { user_id, reply }).await
    }

    pub async fn remove(&self, target: UserId, acting: UserId) -> Result<(), HubError> {
        self.request(|reply| RoomCommand::Remove { target, acting, reply })
            .await
    }

    /// Fire-and-forget: the connection is already gone.
    pub async fn connection_lost(&self, conn_id: ConnId) {
        if self.tx.send(RoomCommand::ConnectionLost { conn_id }).await.is_err() {
            debug!("room {} already closed, ignoring lost connection", self.info.code);
        }
    }

    pub async fn send_message(&self, sender: UserId, conn_id: ConnId, draft: MessageDraft) -> Result<Message, HubError> {
        self.request(|reply| RoomCommand::Send {
            sender,
            conn_id,
            draft,
            reply,
        })
        .await
    }

    pub async fn edit_message(&self, user_id: UserId, message_id: Uuid, text: String) -> Result<(), HubError> {
        self.request(|reply| RoomCommand::Edit {
            user_id,
            message_id,
            text,
            reply,
        })
        .await
    }

    pub async fn mark_read(&self, user_id: UserId, message_ids: Vec<Uuid>) -> Result<Vec<Uuid>, HubError> {
        self.request(|reply| RoomCommand::MarkRead {
            user_id,
            message_ids,
            reply,
        })
        .await
    }

    pub async fn set_pinned(&self, user_id: UserId, message_id: Uuid, pinned: bool) -> Result<bool, HubError> {
        self.request(|reply| RoomCommand::SetPinned {
            user_id,
            message_id,
            pinned,
            reply,
        })
        .await
    }

    pub async fn set_typing(&self, user_id: UserId, typing: bool) -> Result<(), HubError> {
        self.request(|reply| RoomCommand::SetTyping { user_id, typing, reply })
            .await
    }

    pub async fn history(&self, user_id: UserId, before: Option<u64>, limit: Option<usize>) -> Result<Vec<Message>, HubError> {
        self.request(|reply| RoomCommand::History {
            user_id,
            before,
            limit,
            reply,
        })
        .await
    }

    pub async fn request_call(&self, from: UserId, call_type: CallType) -> Result<Uuid, HubError> {
        self.request(|reply| RoomCommand::RequestCall { from, call_type, reply })
            .await
    }

    pub async fn respond_call(&self, session_id: Uuid, user_id: UserId, accepted: bool) -> Result<(), HubError> {
        self.request(|reply| RoomCommand::RespondCall {
            session_id,
            user_id,
            accepted,
            reply,
        })
        .await
    }

    pub async fn relay(
        &self,
        session_id: Uuid,
        from: UserId,
        to: UserId,
        signal: Signal,
        payload: serde_json::Value,
    ) -> Result<(), HubError> {
        self.request(|reply| RoomCommand::Relay {
            session_id,
            from,
            to,
            signal,
            payload,
            reply,
        })
        .await
    }

    pub async fn end_call(&self, session_id: Uuid, user_id: UserId, reason: EndReason) -> Result<(), HubError> {
        self.request(|reply| RoomCommand::EndCall {
            session_id,
            user_id,
            reason,
            reply,
        })
        .await
    }

    pub async fn call_history(&self, user_id: UserId) -> Result<Vec<CallRecord>, HubError> {
        self.request(|reply| RoomCommand::CallHistory { user_id, reply })
            .await
    }

    #[cfg(test)]
    pub(crate) async fn crash(&self) {
        let _ = self.tx.send(RoomCommand::Crash).await;
    }
}

struct Participant {
    user: UserPublic,
}

/// Authoritative state of one room. Only the actor touches it.
pub struct RoomState {
    info: Arc<RoomInfo>,
    config: Arc<HubConfig>,
    dispatcher: Dispatcher,
    participants: Vec<Participant>,
    presence: PresenceEngine,
    messages: MessageLog,
    calls: CallRelay,
    last_activity: DateTime<Utc>,
    empty_since: Option<Instant>,
}

/// Start an actor for `info` with fresh state.
pub fn spawn(info: Arc<RoomInfo>, dispatcher: Dispatcher, config: Arc<HubConfig>) -> (RoomHandle, JoinHandle<RoomExit>) {
    let state = RoomState::new(info.clone(), dispatcher, config.clone());
    let (summary_tx, summary) = watch::channel(state.summary());
    let (tx, rx) = mpsc::channel(config.room_queue.max(1));
    let task = tokio::spawn(run(state, rx, summary_tx));
    (RoomHandle { info, tx, summary }, task)
}

async fn run(mut state: RoomState, mut rx: mpsc::Receiver<RoomCommand>, summary_tx: watch::Sender<RoomPublic>) -> RoomExit {
    let mut sweep = tokio::time::interval(state.config.sweep_interval);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let exit = loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(cmd) => state.handle(cmd).await,
                None => break RoomExit::Detached,
            },
            _ = sweep.tick() => {
                let now = Instant::now();
                state.sweep(now).await;
                if state.is_idle(now) {
                    break RoomExit::Idle;
                }
            }
        }
        summary_tx.send_replace(state.summary());
    };

    // Anything still queued raced with the close.
    rx.close();
    while let Some(cmd) = rx.recv().await {
        cmd.reject(HubError::RoomNotFound(state.info.code.clone()));
    }
    info!("room {} ({}) closed: {:?}", state.info.code, state.info.id, exit);
    exit
}

impl RoomState {
    fn new(info: Arc<RoomInfo>, dispatcher: Dispatcher, config: Arc<HubConfig>) -> Self {
        Self {
            presence: PresenceEngine::new(config.typing_timeout, config.reconnect_grace),
            messages: MessageLog::new(info.id, config.max_message_len, config.dedup_window, config.dedup_capacity),
            calls: CallRelay::new(config.ring_timeout, config.call_history_retention, config.call_history_capacity),
            participants: Vec::new(),
            last_activity: info.created_at,
            empty_since: Some(Instant::now()),
            info,
            config,
            dispatcher,
        }
    }

    async fn handle(&mut self, cmd: RoomCommand) {
        match cmd {
            RoomCommand::Join {
                user,
                conn_id,
                admitted,
                reply,
            } => {
                let _ = reply.send(self.join(user, conn_id, admitted).await);
            }
            RoomCommand::Leave { user_id, reply } => {
                let _ = reply.send(self.leave(&user_id).await);
            }
            RoomCommand::Remove { target, acting, reply } => {
                let _ = reply.send(self.remove(&target, &acting).await);
            }
            RoomCommand::ConnectionLost { conn_id } => self.connection_lost(conn_id).await,
            RoomCommand::Send {
                sender,
                conn_id,
                draft,
                reply,
            } => {
                let _ = reply.send(self.send_message(&sender, conn_id, draft).await);
            }
            RoomCommand::Edit {
                user_id,
                message_id,
                text,
                reply,
            } => {
                let _ = reply.send(self.edit(&user_id, message_id, text).await);
            }
            RoomCommand::MarkRead {
                user_id,
                message_ids,
                reply,
            } => {
                let _ = reply.send(self.mark_read(&user_id, &message_ids).await);
            }
            RoomCommand::SetPinned {
                user_id,
                message_id,
                pinned,
                reply,
            } => {
                let _ = reply.send(self.set_pinned(&user_id, message_id, pinned).await);
            }
            RoomCommand::SetTyping { user_id, typing, reply } => {
                let _ = reply.send(self.set_typing(&user_id, typing).await);
            }
            RoomCommand::History {
                user_id,
                before,
                limit,
                reply,
            } => {
                let result = self.require_member(&user_id).map(|()| {
                    let limit = limit
                        .unwrap_or(self.config.history_page_default)
                        .clamp(1, self.config.history_page_max);
                    self.messages.page(before, limit)
                });
                let _ = reply.send(result);
            }
            RoomCommand::RequestCall { from, call_type, reply } => {
                let _ = reply.send(self.request_call(&from, call_type).await);
            }
            RoomCommand::RespondCall {
                session_id,
                user_id,
                accepted,
                reply,
            } => {
                let result = match self.require_member(&user_id) {
                    Ok(()) => self.calls.respond(session_id, &user_id, accepted, Instant::now()),
                    Err(e) => Err(e),
                };
                let _ = reply.send(match result {
                    Ok(notices) => {
                        self.deliver(notices).await;
                        Ok(())
                    }
                    Err(e) => Err(e),
                });
            }
            RoomCommand::Relay {
                session_id,
                from,
                to,
                signal,
                payload,
                reply,
            } => {
                let _ = reply.send(self.relay(session_id, &from, &to, signal, payload).await);
            }
            RoomCommand::EndCall {
                session_id,
                user_id,
                reason,
                reply,
            } => {
                let result = self.calls.end(session_id, &user_id, reason, Instant::now());
                let _ = reply.send(match result {
                    Ok(notices) => {
                        self.deliver(notices).await;
                        Ok(())
                    }
                    Err(e) => Err(e),
                });
            }
            RoomCommand::CallHistory { user_id, reply } => {
                let _ = reply.send(Ok(self.calls.history_for(&user_id)));
            }
            #[cfg(test)]
            RoomCommand::Crash => panic!("injected room fault"),
        }
    }

    // -- Membership --

    async fn join(&mut self, user: UserPublic, conn_id: ConnId, admitted: bool) -> Result<(), HubError> {
        if let Some(pos) = self.position(&user.id) {
            // Rejoin from another device, or back inside the grace window.
            match self.presence.attach(&user.id, conn_id) {
                Attach::Reconnected => info!("{} ({}) reconnected to room {}", user.name, user.id, self.info.code),
                Attach::AnotherDevice | Attach::New => {}
            }
            self.participants[pos].user = user;
            self.send_join_response(conn_id).await;
            return Ok(());
        }

        if self.info.privacy == Privacy::Private && !admitted && user.id != self.info.created_by {
            return Err(HubError::Forbidden("private room: admission denied"));
        }
        if self.participants.len() >= self.info.capacity {
            return Err(HubError::RoomFull(self.info.capacity));
        }

        info!("{} ({}) joined room {}", user.name, user.id, self.info.code);
        self.presence.attach(&user.id, conn_id);
        self.participants.push(Participant { user: user.clone() });
        self.empty_since = None;
        self.last_activity = Utc::now();

        // Existing members hear about the joiner; the joiner gets a snapshot
        // that already contains itself. Both happen in this one actor step.
        let joined = self.presence_user(&user);
        self.broadcast_except(&user.id, ServerEvent::Presence {
            room_id: self.info.id,
            users: vec![joined],
            action: PresenceAction::Joined,
        })
        .await;
        self.send_join_response(conn_id).await;
        Ok(())
    }

    async fn leave(&mut self, user_id: &str) -> Result<(), HubError> {
        self.require_member(user_id)?;
        let ack = ServerEvent::LeaveRoomAck { room_id: self.info.id };
        let conns = self.presence.connections_of(user_id);
        self.dispatcher.send_to_connections(&conns, ack).await;

        info!("{} left room {}", user_id, self.info.code);
        self.drop_participant(user_id, EndReason::UserEnded).await;
        Ok(())
    }

    async fn remove(&mut self, target: &str, acting: &str) -> Result<(), HubError> {
        if target == self.info.created_by {
            return Err(HubError::CannotRemoveCreator);
        }
        if acting != self.info.created_by {
            return Err(HubError::Forbidden("only the room creator can remove participants"));
        }
        self.require_member(target)?;

        info!("{} removed {} from room {}", acting, target, self.info.code);
        self.broadcast(ServerEvent::UserRemoved {
            room_id: self.info.id,
            user_id: target.to_string(),
        })
        .await;
        self.drop_participant(target, EndReason::UserEnded).await;
        Ok(())
    }

    async fn connection_lost(&mut self, conn_id: ConnId) {
        let Some(detached) = self.presence.detach(conn_id, Instant::now()) else {
            return;
        };
        if !detached.went_offline {
            return;
        }

        debug!("{} lost its last connection to room {}, grace started", detached.user_id, self.info.code);
        if detached.typing_cleared {
            self.broadcast_updated(&detached.user_id).await;
        }
        let notices = self
            .calls
            .drop_member(&detached.user_id, EndReason::ConnectionLost, Instant::now());
        self.deliver(notices).await;
    }

    /// Remove a participant and tell the others it left.
    async fn drop_participant(&mut self, user_id: &str, reason: EndReason) {
        let Some(pos) = self.position(user_id) else {
            return;
        };
        let participant = self.participants.remove(pos);
        self.presence.remove(user_id);

        let notices = self.calls.drop_member(user_id, reason, Instant::now());
        self.deliver(notices).await;

        self.broadcast(ServerEvent::Presence {
            room_id: self.info.id,
            users: vec![PresenceUser {
                user: participant.user,
                is_online: false,
                is_typing: false,
            }],
            action: PresenceAction::Left,
        })
        .await;

        if self.participants.is_empty() {
            self.empty_since = Some(Instant::now());
        }
    }

    // -- Messages --

    async fn send_message(&mut self, sender: &str, conn_id: ConnId, draft: MessageDraft) -> Result<Message, HubError> {
        self.require_member(sender)?;
        let temp_id = draft.temp_id.clone();
        let now = Instant::now();

        match self.messages.append(sender, draft, now)? {
            Appended::New(message) => {
                debug!("room {} seq {} from {}", self.info.code, message.seq, sender);
                self.last_activity = message.created_at;
                self.broadcast(ServerEvent::MessageReceived(MessageEnvelope {
                    message: message.clone(),
                    temp_id,
                }))
                .await;
                if self.presence.set_typing(sender, false, now) {
                    self.broadcast_updated(sender).await;
                }
                Ok(message)
            }
            Appended::Duplicate(message) => {
                debug!("room {} duplicate tempId from {}, re-sending seq {}", self.info.code, sender, message.seq);
                self.dispatcher
                    .send_to_connection(
                        conn_id,
                        ServerEvent::MessageReceived(MessageEnvelope {
                            message: message.clone(),
                            temp_id,
                        }),
                    )
                    .await;
                Ok(message)
            }
        }
    }

    async fn edit(&mut self, user_id: &str, message_id: Uuid, text: String) -> Result<(), HubError> {
        self.require_member(user_id)?;
        let message = self.messages.edit(user_id, message_id, text)?;
        let (Some(text), Some(edited_at)) = (message.text, message.edited_at) else {
            return Err(HubError::Internal("edited message lost its text".into()));
        };
        self.broadcast(ServerEvent::MessageEdited {
            room_id: self.info.id,
            message_id,
            text,
            edited_at,
        })
        .await;
        Ok(())
    }

    async fn mark_read(&mut self, user_id: &str, message_ids: &[Uuid]) -> Result<Vec<Uuid>, HubError> {
        self.require_member(user_id)?;
        let grew = self.messages.mark_read(user_id, message_ids);
        if !grew.is_empty() {
            self.broadcast(ServerEvent::ReadReceipt {
                room_id: self.info.id,
                user_id: user_id.to_string(),
                message_ids: grew.clone(),
            })
            .await;
        }
        Ok(grew)
    }

    async fn set_pinned(&mut self, user_id: &str, message_id: Uuid, pinned: bool) -> Result<bool, HubError> {
        self.require_member(user_id)?;
        let changed = self.messages.set_pinned(message_id, pinned)?;
        if changed {
            self.broadcast(ServerEvent::MessagePinned {
                room_id: self.info.id,
                message_id,
                pinned,
            })
            .await;
        }
        Ok(changed)
    }

    // -- Presence --

    async fn set_typing(&mut self, user_id: &str, typing: bool) -> Result<(), HubError> {
        self.require_member(user_id)?;
        if self.presence.set_typing(user_id, typing, Instant::now()) {
            self.broadcast_updated(user_id).await;
        }
        Ok(())
    }

    async fn sweep(&mut self, now: Instant) {
        let sweep = self.presence.sweep(now);
        if !sweep.typing_expired.is_empty() {
            let users = sweep
                .typing_expired
                .iter()
                .filter_map(|id| self.participant(id))
                .map(|user| self.presence_user(user))
                .collect();
            self.broadcast(ServerEvent::Presence {
                room_id: self.info.id,
                users,
                action: PresenceAction::Updated,
            })
            .await;
        }
        for user_id in &sweep.grace_expired {
            info!("{} did not reconnect to room {}, dropping", user_id, self.info.code);
            self.drop_participant(user_id, EndReason::ConnectionLost).await;
        }

        let notices = self.calls.sweep(now);
        self.deliver(notices).await;
        self.messages.prune(now);
    }

    fn is_idle(&self, now: Instant) -> bool {
        self.empty_since
            .is_some_and(|since| now.duration_since(since) >= self.config.idle_room_ttl)
    }

    // -- Calls --

    async fn request_call(&mut self, from: &str, call_type: CallType) -> Result<Uuid, HubError> {
        self.require_member(from)?;
        let members = self
            .participants
            .iter()
            .map(|p| p.user.id.clone())
            .filter(|id| self.presence.is_connected(id))
            .collect();
        let target = CallTarget::Room {
            room_id: self.info.id,
            members,
        };
        let (session_id, notices) = self.calls.request(from, target, call_type, Instant::now())?;
        self.deliver(notices).await;
        Ok(session_id)
    }

    async fn relay(
        &mut self,
        session_id: Uuid,
        from: &str,
        to: &str,
        signal: Signal,
        payload: serde_json::Value,
    ) -> Result<(), HubError> {
        let (to, event) = self.calls.relay(session_id, from, to, signal, payload)?;
        let conns = self.presence.connections_of(&to);
        if self.dispatcher.send_to_connections(&conns, event).await == 0 {
            return Err(HubError::PeerUnreachable(to));
        }
        Ok(())
    }

    async fn deliver(&self, notices: Notices) {
        for (user_id, event) in notices {
            let conns = self.presence.connections_of(&user_id);
            if self.dispatcher.send_to_connections(&conns, event).await == 0 {
                debug!("call notice for {} in room {} not delivered", user_id, self.info.code);
            }
        }
    }

    // -- Snapshots & fan-out --

    fn position(&self, user_id: &str) -> Option<usize> {
        self.participants.iter().position(|p| p.user.id == user_id)
    }

    fn participant(&self, user_id: &str) -> Option<&UserPublic> {
        self.participants
            .iter()
            .find(|p| p.user.id == user_id)
            .map(|p| &p.user)
    }

    fn require_member(&self, user_id: &str) -> Result<(), HubError> {
        match self.position(user_id) {
            Some(_) => Ok(()),
            None => Err(HubError::NotAMember(user_id.to_string())),
        }
    }

    fn presence_user(&self, user: &UserPublic) -> PresenceUser {
        PresenceUser {
            user: user.clone(),
            is_online: self.presence.is_online(&user.id),
            is_typing: self.presence.is_typing(&user.id),
        }
    }

    pub fn snapshot(&self) -> Room {
        Room {
            id: self.info.id,
            code: self.info.code.clone(),
            name: self.info.name.clone(),
            privacy: self.info.privacy,
            created_by: self.info.created_by.clone(),
            created_at: self.info.created_at,
            participants: self.participants.iter().map(|p| p.user.id.clone()).collect(),
            max_participants: self.info.capacity,
            pinned_messages: self.messages.pinned().to_vec(),
            last_activity: self.last_activity,
        }
    }

    pub fn summary(&self) -> RoomPublic {
        let preview = self.messages.last().and_then(|m| {
            m.text
                .as_deref()
                .map(|text| text.chars().take(PREVIEW_CHARS).collect())
                .or_else(|| m.file.as_ref().map(|f| f.name.clone()))
        });
        RoomPublic {
            id: self.info.id,
            code: self.info.code.clone(),
            name: self.info.name.clone(),
            privacy: self.info.privacy,
            participant_count: self.participants.len(),
            max_participants: self.info.capacity,
            last_activity: self.last_activity,
            preview,
        }
    }

    async fn send_join_response(&self, conn_id: ConnId) {
        let participants = self
            .participants
            .iter()
            .map(|p| self.presence_user(&p.user))
            .collect();
        let response = JoinRoomResponse::joined(self.snapshot(), participants);
        if !self
            .dispatcher
            .send_to_connection(conn_id, ServerEvent::JoinRoomResponse(response))
            .await
        {
            warn!("join response for room {} not delivered to {}", self.info.code, conn_id);
        }
    }

    async fn broadcast(&self, event: ServerEvent) {
        let conns = self.presence.all_connections();
        self.dispatcher.send_to_connections(&conns, event).await;
    }

    async fn broadcast_except(&self, user_id: &str, event: ServerEvent) {
        let conns: Vec<ConnId> = self
            .presence
            .all_connections()
            .into_iter()
            .filter(|conn| self.presence.owner_of(*conn).is_none_or(|owner| owner != user_id))
            .collect();
        self.dispatcher.send_to_connections(&conns, event).await;
    }

    async fn broadcast_updated(&self, user_id: &str) {
        let Some(user) = self.participant(user_id) else {
            return;
        };
        let users = vec![self.presence_user(user)];
        self.broadcast(ServerEvent::Presence {
            room_id: self.info.id,
            users,
            action: PresenceAction::Updated,
        })
        .await;
    }
}
