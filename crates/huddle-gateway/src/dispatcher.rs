use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use huddle_types::events::ServerEvent;
use huddle_types::models::{UserId, UserPublic};

/// Connection ids are minted per transport session.
pub type ConnId = Uuid;

/// A live connection: identity snapshot, outbound queue and joined rooms.
struct ConnectionEntry {
    user: UserPublic,
    /// `None` once the connection was evicted as a slow consumer.
    tx: Option<mpsc::Sender<ServerEvent>>,
    rooms: HashSet<Uuid>,
}

/// What `unregister` hands back so the gateway can clean up after it.
#[derive(Debug, Clone)]
pub struct Departed {
    pub user: UserPublic,
    pub rooms: HashSet<Uuid>,
    /// True if the user has no other live connection.
    pub last_for_user: bool,
}

enum Delivery {
    Sent,
    Gone,
    Full,
}

/// Owns every live connection and delivers outbound events to them.
///
/// Each connection has one bounded FIFO queue drained by a single writer, so
/// events to the same socket are never reordered. Sends never wait: a full
/// queue drops the event and evicts the connection.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// conn_id -> connection. Lock order: `connections` before `user_connections`.
    connections: RwLock<HashMap<ConnId, ConnectionEntry>>,

    /// user_id -> live conn_ids (multi-device)
    user_connections: RwLock<HashMap<UserId, HashSet<ConnId>>>,

    queue_depth: usize,
}

impl Dispatcher {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                connections: RwLock::new(HashMap::new()),
                user_connections: RwLock::new(HashMap::new()),
                queue_depth: queue_depth.max(1),
            }),
        }
    }

    /// Register a connection for `user`. Returns (conn_id, outbound receiver).
    pub async fn register(&self, user: UserPublic) -> (ConnId, mpsc::Receiver<ServerEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.inner.queue_depth);
        let user_id = user.id.clone();

        self.inner.connections.write().await.insert(
            conn_id,
            ConnectionEntry {
                user,
                tx: Some(tx),
                rooms: HashSet::new(),
            },
        );
        self.inner
            .user_connections
            .write()
            .await
            .entry(user_id)
            .or_default()
            .insert(conn_id);

        (conn_id, rx)
    }

    /// Remove a connection. Returns `None` if it was already gone.
    pub async fn unregister(&self, conn_id: ConnId) -> Option<Departed> {
        let entry = self.inner.connections.write().await.remove(&conn_id)?;

        let mut users = self.inner.user_connections.write().await;
        let last_for_user = match users.get_mut(&entry.user.id) {
            Some(conns) => {
                conns.remove(&conn_id);
                if conns.is_empty() {
                    users.remove(&entry.user.id);
                    true
                } else {
                    false
                }
            }
            None => true,
        };

        Some(Departed {
            user: entry.user,
            rooms: entry.rooms,
            last_for_user,
        })
    }

    /// Record that `conn_id` joined `room_id`. Returns false for unknown connections.
    pub async fn track_room(&self, conn_id: ConnId, room_id: Uuid) -> bool {
        match self.inner.connections.write().await.get_mut(&conn_id) {
            Some(entry) => {
                entry.rooms.insert(room_id);
                true
            }
            None => false,
        }
    }

    pub async fn untrack_room(&self, conn_id: ConnId, room_id: Uuid) {
        if let Some(entry) = self.inner.connections.write().await.get_mut(&conn_id) {
            entry.rooms.remove(&room_id);
        }
    }

    /// Forget `room_id` on every connection of `user_id`.
    pub async fn untrack_user(&self, user_id: &str, room_id: Uuid) {
        let conn_ids: Vec<ConnId> = self
            .inner
            .user_connections
            .read()
            .await
            .get(user_id)
            .map(|conns| conns.iter().copied().collect())
            .unwrap_or_default();

        let mut connections = self.inner.connections.write().await;
        for conn_id in conn_ids {
            if let Some(entry) = connections.get_mut(&conn_id) {
                entry.rooms.remove(&room_id);
            }
        }
    }

    /// Forget `room_id` on every connection that joined it. Returns those connections.
    pub async fn drop_room(&self, room_id: Uuid) -> Vec<ConnId> {
        let mut connections = self.inner.connections.write().await;
        connections
            .iter_mut()
            .filter_map(|(conn_id, entry)| entry.rooms.remove(&room_id).then_some(*conn_id))
            .collect()
    }

    pub async fn rooms_of(&self, conn_id: ConnId) -> HashSet<Uuid> {
        self.inner
            .connections
            .read()
            .await
            .get(&conn_id)
            .map(|entry| entry.rooms.clone())
            .unwrap_or_default()
    }

    pub async fn is_connected(&self, conn_id: ConnId) -> bool {
        self.inner
            .connections
            .read()
            .await
            .get(&conn_id)
            .is_some_and(|entry| entry.tx.is_some())
    }

    /// True if the user has at least one live connection.
    pub async fn is_user_online(&self, user_id: &str) -> bool {
        self.inner
            .user_connections
            .read()
            .await
            .get(user_id)
            .is_some_and(|conns| !conns.is_empty())
    }

    /// Send an event to one connection. Returns whether it was queued.
    pub async fn send_to_connection(&self, conn_id: ConnId, event: ServerEvent) -> bool {
        self.send_to_connections(&[conn_id], event).await > 0
    }

    /// Fan an event out to several connections. Returns how many queued it.
    pub async fn send_to_connections(&self, conn_ids: &[ConnId], event: ServerEvent) -> usize {
        if conn_ids.is_empty() {
            return 0;
        }

        let mut delivered = 0;
        let mut lagging = Vec::new();
        {
            let connections = self.inner.connections.read().await;
            for conn_id in conn_ids {
                let Some(entry) = connections.get(conn_id) else {
                    continue;
                };
                match deliver(entry, event.clone()) {
                    Delivery::Sent => delivered += 1,
                    Delivery::Full => lagging.push(*conn_id),
                    Delivery::Gone => {}
                }
            }
        }

        for conn_id in lagging {
            self.evict(conn_id).await;
        }
        delivered
    }

    /// Send an event to every live connection of a user. Returns how many queued it.
    pub async fn send_to_user(&self, user_id: &str, event: ServerEvent) -> usize {
        let conn_ids: Vec<ConnId> = self
            .inner
            .user_connections
            .read()
            .await
            .get(user_id)
            .map(|conns| conns.iter().copied().collect())
            .unwrap_or_default();
        self.send_to_connections(&conn_ids, event).await
    }

    /// Close a connection's queue so its writer shuts the socket down.
    /// The entry stays until the gateway's disconnect path unregisters it.
    async fn evict(&self, conn_id: ConnId) {
        if let Some(entry) = self.inner.connections.write().await.get_mut(&conn_id) {
            if entry.tx.take().is_some() {
                warn!(
                    "{} ({}) outbound queue full, evicting slow connection {}",
                    entry.user.name, entry.user.id, conn_id
                );
            }
        }
    }
}

fn deliver(entry: &ConnectionEntry, event: ServerEvent) -> Delivery {
    let Some(tx) = &entry.tx else {
        return Delivery::Gone;
    };
    match tx.try_send(event) {
        Ok(()) => Delivery::Sent,
        Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("outbound queue of {} already closed", entry.user.id);
            Delivery::Gone
        }
    }
}
