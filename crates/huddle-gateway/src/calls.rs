//! Call signaling relay.
//!
//! A state machine over call sessions plus a verbatim relay for SDP and ICE
//! payloads. Media never passes through here. The relay is plain data: its
//! owner (a room actor for room calls, the gateway's direct-call desk for 1:1
//! calls) serializes access, delivers the returned notices and drives
//! [`CallRelay::sweep`] for ring timeouts.
//!
//! ```text
//! ringing --accept--> connected --end--> ended
//!    |--decline--> declined
//!    |--timeout--> timed_out
//!    '--end------> ended
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::info;
use uuid::Uuid;

use huddle_types::error::ErrorCode;
use huddle_types::events::ServerEvent;
use huddle_types::models::{CallKind, CallRecord, CallState, CallType, EndReason, UserId};

use crate::error::HubError;

/// Events the owner must deliver, addressed by user.
pub type Notices = Vec<(UserId, ServerEvent)>;

/// At most one active session exists per scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CallScope {
    /// Unordered pair, stored sorted.
    Pair(UserId, UserId),
    Room(Uuid),
}

impl CallScope {
    pub fn pair(a: &str, b: &str) -> Self {
        if a <= b {
            Self::Pair(a.to_string(), b.to_string())
        } else {
            Self::Pair(b.to_string(), a.to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub enum CallTarget {
    User(UserId),
    /// Every other participant currently connected to the room.
    Room { room_id: Uuid, members: Vec<UserId> },
}

/// Which signaling payload is being relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Offer,
    Answer,
    IceCandidate,
}

#[derive(Debug)]
struct Session {
    id: Uuid,
    kind: CallKind,
    call_type: CallType,
    room_id: Option<Uuid>,
    scope: CallScope,
    initiator: UserId,
    invited: Vec<UserId>,
    /// Everyone rung at request time; `invited` shrinks as room invitees drop.
    rung: Vec<UserId>,
    declined: HashSet<UserId>,
    /// Initiator plus everyone who accepted.
    joined: Vec<UserId>,
    state: CallState,
    started_at: DateTime<Utc>,
    answered_at: Option<DateTime<Utc>>,
    ring_deadline: Instant,
}

impl Session {
    fn is_member(&self, user_id: &str) -> bool {
        self.initiator == user_id
            || self.invited.iter().any(|u| u == user_id)
            || self.joined.iter().any(|u| u == user_id)
    }

    fn members(&self) -> Vec<UserId> {
        let mut members = vec![self.initiator.clone()];
        for user in self.invited.iter().chain(&self.joined) {
            if !members.contains(user) && !self.declined.contains(user) {
                members.push(user.clone());
            }
        }
        members
    }

    fn pending(&self) -> impl Iterator<Item = &UserId> {
        self.invited
            .iter()
            .filter(|u| !self.declined.contains(*u) && !self.joined.contains(*u))
    }

    fn record(&self, state: CallState, reason: EndReason) -> CallRecord {
        CallRecord {
            id: self.id,
            kind: self.kind,
            call_type: self.call_type,
            room_id: self.room_id,
            initiator: self.initiator.clone(),
            invited: self.rung.clone(),
            participants: self.joined.clone(),
            state,
            started_at: self.started_at,
            answered_at: self.answered_at,
            ended_at: Some(Utc::now()),
            end_reason: Some(reason),
        }
    }
}

#[derive(Debug)]
pub struct CallRelay {
    ring_timeout: Duration,
    retention: Duration,
    capacity: usize,
    sessions: HashMap<Uuid, Session>,
    active: HashMap<CallScope, Uuid>,
    history: VecDeque<(Instant, CallRecord)>,
}

impl CallRelay {
    pub fn new(ring_timeout: Duration, retention: Duration, capacity: usize) -> Self {
        Self {
            ring_timeout,
            retention,
            capacity: capacity.max(1),
            sessions: HashMap::new(),
            active: HashMap::new(),
            history: VecDeque::new(),
        }
    }

    /// Start ringing `target`. Resolves glare when the other side is already
    /// ringing us: the initiator whose id sorts lower wins.
    pub fn request(
        &mut self,
        from: &str,
        target: CallTarget,
        call_type: CallType,
        now: Instant,
    ) -> Result<(Uuid, Notices), HubError> {
        let (kind, scope, room_id, invited) = match target {
            CallTarget::User(to) => {
                if to == from {
                    return Err(HubError::Forbidden("cannot call yourself"));
                }
                (CallKind::Direct, CallScope::pair(from, &to), None, vec![to])
            }
            CallTarget::Room { room_id, members } => {
                let invited: Vec<UserId> = members.into_iter().filter(|u| u != from).collect();
                (CallKind::Room, CallScope::Room(room_id), Some(room_id), invited)
            }
        };
        if invited.is_empty() {
            return Err(HubError::PeerUnreachable("every other participant".into()));
        }

        let mut notices = Notices::new();
        if let Some(existing) = self.active.get(&scope).and_then(|id| self.sessions.get(id)) {
            if existing.state == CallState::Connected || existing.initiator == from {
                return Err(HubError::CallInProgress);
            }
            if existing.initiator.as_str() < from {
                return Err(HubError::GlareLost {
                    winner: existing.initiator.clone(),
                });
            }

            // The incoming request wins; the ringing session is withdrawn.
            let loser = existing.initiator.clone();
            let existing_id = existing.id;
            let mut closed = self.finish(existing_id, CallState::Ended, EndReason::GlareLost, now, None);
            closed.retain(|(user, _)| *user != loser);
            notices.extend(closed);
            notices.push((
                loser,
                ServerEvent::Error {
                    code: ErrorCode::GlareLost,
                    message: format!("simultaneous call resolved in favour of {from}"),
                    temp_id: None,
                },
            ));
        }

        let id = Uuid::new_v4();
        let to = match kind {
            CallKind::Direct => invited.first().cloned(),
            CallKind::Room => None,
        };
        for user in &invited {
            notices.push((
                user.clone(),
                ServerEvent::CallRequest {
                    session_id: id,
                    from: from.to_string(),
                    to: to.clone(),
                    room_id,
                    call_type,
                },
            ));
        }

        info!("call {} ringing: {} -> {:?} ({:?})", id, from, scope, call_type);
        self.active.insert(scope.clone(), id);
        self.sessions.insert(
            id,
            Session {
                id,
                kind,
                call_type,
                room_id,
                scope,
                initiator: from.to_string(),
                rung: invited.clone(),
                invited,
                declined: HashSet::new(),
                joined: vec![from.to_string()],
                state: CallState::Ringing,
                started_at: Utc::now(),
                answered_at: None,
                ring_deadline: now + self.ring_timeout,
            },
        );
        Ok((id, notices))
    }

    /// An invited user accepts or declines.
    pub fn respond(&mut self, session_id: Uuid, user_id: &str, accepted: bool, now: Instant) -> Result<Notices, HubError> {
        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(HubError::NoActiveSession(session_id))?;
        if !session.invited.iter().any(|u| u == user_id) {
            return Err(HubError::Forbidden("not invited to this call"));
        }
        let open = match session.kind {
            CallKind::Direct => session.state == CallState::Ringing,
            CallKind::Room => !session.joined.iter().any(|u| u == user_id) && !session.declined.contains(user_id),
        };
        if !open {
            return Err(HubError::NoActiveSession(session_id));
        }

        let response = |to: &UserId| {
            (
                to.clone(),
                ServerEvent::CallResponse {
                    session_id,
                    from: user_id.to_string(),
                    to: to.clone(),
                    accepted,
                },
            )
        };

        if accepted {
            let notices: Notices = session.joined.iter().map(response).collect();
            session.joined.push(user_id.to_string());
            if session.state == CallState::Ringing {
                session.state = CallState::Connected;
                session.answered_at = Some(Utc::now());
                info!("call {} connected", session_id);
            }
            return Ok(notices);
        }

        session.declined.insert(user_id.to_string());
        let mut notices = vec![response(&session.initiator)];
        let all_declined = session.state == CallState::Ringing && session.pending().next().is_none();
        if all_declined {
            let mut ended = self.finish(session_id, CallState::Declined, EndReason::Declined, now, None);
            ended.retain(|(user, _)| user != user_id);
            notices.extend(ended);
        }
        Ok(notices)
    }

    /// Check and address a signaling payload. The owner delivers it and
    /// reports `PeerUnreachable` if the addressee has no live connection.
    pub fn relay(
        &self,
        session_id: Uuid,
        from: &str,
        to: &str,
        signal: Signal,
        payload: serde_json::Value,
    ) -> Result<(UserId, ServerEvent), HubError> {
        let session = self
            .sessions
            .get(&session_id)
            .filter(|s| matches!(s.state, CallState::Ringing | CallState::Connected))
            .ok_or(HubError::NoActiveSession(session_id))?;
        if from == to || !session.is_member(from) || !session.is_member(to) {
            return Err(HubError::NoActiveSession(session_id));
        }

        let (from, to_user) = (from.to_string(), to.to_string());
        let event = match signal {
            Signal::Offer => ServerEvent::CallOffer {
                session_id,
                from,
                to: to_user.clone(),
                sdp: payload,
            },
            Signal::Answer => ServerEvent::CallAnswer {
                session_id,
                from,
                to: to_user.clone(),
                sdp: payload,
            },
            Signal::IceCandidate => ServerEvent::IceCandidate {
                session_id,
                from,
                to: to_user.clone(),
                candidate: payload,
            },
        };
        Ok((to_user, event))
    }

    /// A member hangs up; the session ends for everyone.
    pub fn end(&mut self, session_id: Uuid, user_id: &str, reason: EndReason, now: Instant) -> Result<Notices, HubError> {
        let session = self
            .sessions
            .get(&session_id)
            .ok_or(HubError::NoActiveSession(session_id))?;
        if !session.is_member(user_id) {
            return Err(HubError::NoActiveSession(session_id));
        }
        let mut notices = self.finish(session_id, CallState::Ended, reason, now, Some(user_id));
        notices.retain(|(user, _)| user != user_id);
        Ok(notices)
    }

    /// A member is gone (disconnected with no other connection, or left the
    /// room). Sessions it was part of end; a room call only loses the user if
    /// it was merely invited and others are still ringing.
    pub fn drop_member(&mut self, user_id: &str, reason: EndReason, now: Instant) -> Notices {
        let affected: Vec<Uuid> = self
            .sessions
            .values()
            .filter(|s| s.is_member(user_id))
            .map(|s| s.id)
            .collect();

        let mut notices = Notices::new();
        for session_id in affected {
            let Some(session) = self.sessions.get_mut(&session_id) else {
                continue;
            };
            let only_invited = session.kind == CallKind::Room
                && session.initiator != user_id
                && !session.joined.iter().any(|u| u == user_id);
            if only_invited {
                session.invited.retain(|u| u != user_id);
                let still_ringing = session.pending().next().is_some();
                if session.state == CallState::Connected || still_ringing {
                    continue;
                }
            }
            let mut ended = self.finish(session_id, CallState::Ended, reason, now, Some(user_id));
            ended.retain(|(user, _)| user != user_id);
            notices.extend(ended);
        }
        notices
    }

    /// Time out unanswered calls and drop expired history.
    pub fn sweep(&mut self, now: Instant) -> Notices {
        let expired: Vec<Uuid> = self
            .sessions
            .values()
            .filter(|s| s.state == CallState::Ringing && s.ring_deadline <= now)
            .map(|s| s.id)
            .collect();

        let mut notices = Notices::new();
        for session_id in expired {
            info!("call {} timed out", session_id);
            notices.extend(self.finish(session_id, CallState::TimedOut, EndReason::TimedOut, now, None));
        }

        while let Some((finished, _)) = self.history.front() {
            if now.duration_since(*finished) < self.retention {
                break;
            }
            self.history.pop_front();
        }
        notices
    }

    /// Finished calls involving `user_id`, newest first.
    pub fn history_for(&self, user_id: &str) -> Vec<CallRecord> {
        self.history
            .iter()
            .rev()
            .map(|(_, record)| record)
            .filter(|record| {
                record.initiator == user_id
                    || record.invited.iter().chain(&record.participants).any(|u| u == user_id)
            })
            .cloned()
            .collect()
    }

    pub fn state_of(&self, session_id: Uuid) -> Option<CallState> {
        self.sessions.get(&session_id).map(|s| s.state)
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// Close a session and tell every remaining member.
    fn finish(&mut self, session_id: Uuid, state: CallState, reason: EndReason, now: Instant, from: Option<&str>) -> Notices {
        let Some(session) = self.sessions.remove(&session_id) else {
            return Notices::new();
        };
        self.active.remove(&session.scope);
        info!("call {} finished: {:?} ({:?})", session_id, state, reason);

        let notices = session
            .members()
            .into_iter()
            .map(|user| {
                (
                    user,
                    ServerEvent::CallEnd {
                        session_id,
                        from: from.map(str::to_string),
                        reason,
                    },
                )
            })
            .collect();

        self.history.push_back((now, session.record(state, reason)));
        while self.history.len() > self.capacity {
            self.history.pop_front();
        }
        notices
    }
}
