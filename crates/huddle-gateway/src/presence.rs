//! Per-room online/typing tracking.
//!
//! A participant is online while it has at least one live connection in the
//! room, and stays listed for a grace window after its last connection drops
//! so a quick reconnect does not produce a `left`/`joined` pair. Typing flags
//! carry a server-side deadline; the room's sweep clears stale ones, so a
//! crashed client cannot leave a permanent "is typing" behind.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::time::Instant;

use huddle_types::models::UserId;

use crate::dispatcher::ConnId;

#[derive(Debug, Default)]
struct PresenceState {
    connections: HashSet<ConnId>,
    /// Set when the last connection dropped; the grace window runs from here.
    offline_since: Option<Instant>,
    typing_until: Option<Instant>,
}

/// Outcome of attaching a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attach {
    /// First time this user is seen in the room.
    New,
    /// The user was inside the grace window and is back.
    Reconnected,
    /// The user was already online from another connection.
    AnotherDevice,
}

/// Outcome of detaching a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detached {
    pub user_id: UserId,
    /// The user's last connection in this room is gone; the grace window started.
    pub went_offline: bool,
    /// A typing flag was cleared as a consequence.
    pub typing_cleared: bool,
}

/// Deadlines that passed during a sweep.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Sweep {
    pub typing_expired: Vec<UserId>,
    /// Users dropped because their grace window ran out.
    pub grace_expired: Vec<UserId>,
}

#[cfg(test)]
impl Sweep {
    pub fn is_empty(&self) -> bool {
        self.typing_expired.is_empty() && self.grace_expired.is_empty()
    }
}

#[derive(Debug)]
pub struct PresenceEngine {
    typing_timeout: Duration,
    grace: Duration,
    users: HashMap<UserId, PresenceState>,
    owners: HashMap<ConnId, UserId>,
}

impl PresenceEngine {
    pub fn new(typing_timeout: Duration, grace: Duration) -> Self {
        Self {
            typing_timeout,
            grace,
            users: HashMap::new(),
            owners: HashMap::new(),
        }
    }

    pub fn attach(&mut self, user_id: &str, conn_id: ConnId) -> Attach {
        self.owners.insert(conn_id, user_id.to_string());
        match self.users.get_mut(user_id) {
            None => {
                let mut state = PresenceState::default();
                state.connections.insert(conn_id);
                self.users.insert(user_id.to_string(), state);
                Attach::New
            }
            Some(state) => {
                let was_offline = state.connections.is_empty();
                state.connections.insert(conn_id);
                state.offline_since = None;
                if was_offline {
                    Attach::Reconnected
                } else {
                    Attach::AnotherDevice
                }
            }
        }
    }

    /// Drop one connection. `None` if the connection is unknown to this room.
    pub fn detach(&mut self, conn_id: ConnId, now: Instant) -> Option<Detached> {
        let user_id = self.owners.remove(&conn_id)?;
        let state = self.users.get_mut(&user_id)?;
        state.connections.remove(&conn_id);

        let went_offline = state.connections.is_empty();
        let mut typing_cleared = false;
        if went_offline {
            state.offline_since = Some(now);
            typing_cleared = state.typing_until.take().is_some();
        }

        Some(Detached {
            user_id,
            went_offline,
            typing_cleared,
        })
    }

    /// Set or clear the typing flag. Returns true if the visible state changed.
    pub fn set_typing(&mut self, user_id: &str, typing: bool, now: Instant) -> bool {
        let Some(state) = self.users.get_mut(user_id) else {
            return false;
        };
        if typing {
            if state.connections.is_empty() {
                return false;
            }
            let was_typing = state.typing_until.is_some();
            state.typing_until = Some(now + self.typing_timeout);
            !was_typing
        } else {
            state.typing_until.take().is_some()
        }
    }

    /// Forget a user entirely. Returns the connections it still had.
    pub fn remove(&mut self, user_id: &str) -> Vec<ConnId> {
        let Some(state) = self.users.remove(user_id) else {
            return Vec::new();
        };
        for conn_id in &state.connections {
            self.owners.remove(conn_id);
        }
        state.connections.into_iter().collect()
    }

    #[cfg(test)]
    pub fn contains(&self, user_id: &str) -> bool {
        self.users.contains_key(user_id)
    }

    /// Online while connected or inside the grace window.
    pub fn is_online(&self, user_id: &str) -> bool {
        self.users.contains_key(user_id)
    }

    /// True only while the user has a live connection in the room.
    pub fn is_connected(&self, user_id: &str) -> bool {
        self.users
            .get(user_id)
            .is_some_and(|state| !state.connections.is_empty())
    }

    pub fn is_typing(&self, user_id: &str) -> bool {
        self.users
            .get(user_id)
            .is_some_and(|state| state.typing_until.is_some())
    }

    pub fn owner_of(&self, conn_id: ConnId) -> Option<&UserId> {
        self.owners.get(&conn_id)
    }

    pub fn connections_of(&self, user_id: &str) -> Vec<ConnId> {
        self.users
            .get(user_id)
            .map(|state| state.connections.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn all_connections(&self) -> Vec<ConnId> {
        self.owners.keys().copied().collect()
    }

    /// Expire typing flags and grace windows whose deadline passed.
    pub fn sweep(&mut self, now: Instant) -> Sweep {
        let mut sweep = Sweep::default();

        for (user_id, state) in &mut self.users {
            if state.typing_until.is_some_and(|deadline| deadline <= now) {
                state.typing_until = None;
                sweep.typing_expired.push(user_id.clone());
            }
            if state
                .offline_since
                .is_some_and(|since| now.duration_since(since) >= self.grace)
            {
                sweep.grace_expired.push(user_id.clone());
            }
        }

        for user_id in &sweep.grace_expired {
            self.users.remove(user_id);
        }
        // A user whose grace ran out is reported as gone, not as "stopped typing".
        sweep
            .typing_expired
            .retain(|user_id| !sweep.grace_expired.contains(user_id));
        sweep.typing_expired.sort();
        sweep.grace_expired.sort();
        sweep
    }
}
