use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use rand::distr::Alphanumeric;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use huddle_types::events::ServerEvent;
use huddle_types::models::{Privacy, RoomPublic, UserPublic};

use crate::config::HubConfig;
use crate::dispatcher::Dispatcher;
use crate::error::HubError;
use crate::room::{self, RoomExit, RoomHandle, RoomInfo};

/// Where fresh room codes come from.
pub trait CodeSource: Send + Sync + 'static {
    fn next_code(&self, len: usize) -> String;
}

/// Upper-case alphanumeric codes from the thread-local RNG.
pub struct RandomCodes;

impl CodeSource for RandomCodes {
    fn next_code(&self, len: usize) -> String {
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(|b| char::from(b).to_ascii_uppercase())
            .collect()
    }
}

/// Live rooms, addressable by id and by join code.
///
/// The registry only holds handles; room state lives in the actors. Each room
/// gets a supervisor task that forgets the room when its actor closes and
/// restarts the actor with fresh state if it panics.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    /// Lock order: `codes` before `rooms`.
    codes: RwLock<HashMap<String, Uuid>>,
    rooms: RwLock<HashMap<Uuid, RoomHandle>>,
    dispatcher: Dispatcher,
    config: Arc<HubConfig>,
    code_source: Box<dyn CodeSource>,
}

impl Registry {
    pub fn new(dispatcher: Dispatcher, config: Arc<HubConfig>) -> Self {
        Self::with_code_source(dispatcher, config, RandomCodes)
    }

    pub fn with_code_source(dispatcher: Dispatcher, config: Arc<HubConfig>, source: impl CodeSource) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                codes: RwLock::new(HashMap::new()),
                rooms: RwLock::new(HashMap::new()),
                dispatcher,
                config,
                code_source: Box::new(source),
            }),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn config(&self) -> &Arc<HubConfig> {
        &self.inner.config
    }

    /// Create a room under a fresh code and start its actor.
    pub async fn create_room(
        &self,
        creator: &UserPublic,
        name: Option<String>,
        privacy: Privacy,
    ) -> Result<RoomHandle, HubError> {
        let config = &self.inner.config;
        let name = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        for attempt in 0..config.code_attempts {
            let code = self
                .inner
                .code_source
                .next_code(config.code_len)
                .to_ascii_uppercase();

            {
                let mut codes = self.inner.codes.write().await;
                if !codes.contains_key(&code) {
                    let info = Arc::new(RoomInfo {
                        id: Uuid::new_v4(),
                        code: code.clone(),
                        name,
                        privacy,
                        created_by: creator.id.clone(),
                        created_at: Utc::now(),
                        capacity: config.room_capacity,
                    });
                    let (handle, task) = room::spawn(info.clone(), self.inner.dispatcher.clone(), config.clone());
                    codes.insert(code, info.id);
                    self.inner.rooms.write().await.insert(info.id, handle.clone());
                    drop(codes);

                    self.supervise(info.clone(), task);
                    info!(
                        "{} ({}) created {:?} room {} ({})",
                        creator.name, creator.id, privacy, info.code, info.id
                    );
                    return Ok(handle);
                }
            }

            if attempt + 1 < config.code_attempts {
                let backoff = config.code_backoff * 2u32.saturating_pow(attempt);
                warn!("room code {} collided (attempt {}), retrying in {:?}", code, attempt + 1, backoff);
                tokio::time::sleep(backoff).await;
            }
        }

        error!("gave up creating a room after {} code collisions", config.code_attempts);
        Err(HubError::CodeGenerationExhausted(config.code_attempts))
    }

    /// Find a room by join code, case-insensitively.
    pub async fn lookup(&self, code: &str) -> Option<RoomHandle> {
        let id = *self.inner.codes.read().await.get(&code.to_ascii_uppercase())?;
        self.room(id).await
    }

    pub async fn room(&self, room_id: Uuid) -> Option<RoomHandle> {
        self.inner.rooms.read().await.get(&room_id).cloned()
    }

    /// Public rooms, most recently active first.
    pub async fn list_public(&self) -> Vec<RoomPublic> {
        let mut rooms: Vec<RoomPublic> = self
            .inner
            .rooms
            .read()
            .await
            .values()
            .map(RoomHandle::summary)
            .filter(|summary| summary.privacy == Privacy::Public)
            .collect();
        rooms.sort_by(|a, b| b.last_activity.cmp(&a.last_activity).then_with(|| a.code.cmp(&b.code)));
        rooms
    }

    pub async fn len(&self) -> usize {
        self.inner.rooms.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn forget(&self, room_id: Uuid) {
        let mut codes = self.inner.codes.write().await;
        if let Some(handle) = self.inner.rooms.write().await.remove(&room_id) {
            codes.remove(&handle.info.code);
        }
    }

    fn supervise(&self, info: Arc<RoomInfo>, task: JoinHandle<RoomExit>) {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut task = task;
            loop {
                match task.await {
                    Ok(exit) => {
                        info!("room {} stopped ({:?}), forgetting it", info.code, exit);
                        registry.forget(info.id).await;
                        return;
                    }
                    Err(e) if e.is_panic() => {
                        error!("room {} actor panicked, restarting with fresh state", info.code);
                        let dispatcher = registry.inner.dispatcher.clone();
                        let (handle, next) = room::spawn(info.clone(), dispatcher.clone(), registry.inner.config.clone());
                        registry.inner.rooms.write().await.insert(info.id, handle);

                        let joined = dispatcher.drop_room(info.id).await;
                        dispatcher
                            .send_to_connections(&joined, ServerEvent::RoomReset { room_id: info.id })
                            .await;
                        task = next;
                    }
                    Err(e) => {
                        warn!("room {} actor cancelled: {}", info.code, e);
                        registry.forget(info.id).await;
                        return;
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Hands out a fixed sequence of codes, then repeats the last one.
    struct Scripted(Mutex<VecDeque<String>>);

    impl Scripted {
        fn new(codes: &[&str]) -> Self {
            Self(Mutex::new(codes.iter().map(|c| c.to_string()).collect()))
        }
    }

    impl CodeSource for Scripted {
        fn next_code(&self, _len: usize) -> String {
            let mut codes = self.0.lock().unwrap();
            if codes.len() > 1 {
                codes.pop_front().unwrap()
            } else {
                codes.front().cloned().unwrap()
            }
        }
    }

    fn alice() -> UserPublic {
        UserPublic {
            id: "uid_alice".into(),
            name: "Alice".into(),
            avatar_url: None,
            is_private: false,
        }
    }

    fn registry(codes: &[&str]) -> Registry {
        Registry::with_code_source(Dispatcher::new(16), Arc::new(HubConfig::default()), Scripted::new(codes))
    }

    #[test]
    fn random_codes_are_upper_alphanumeric() {
        let code = RandomCodes.next_code(6);
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[tokio::test]
    async fn lookup_is_case_insensitive() {
        let registry = registry(&["ABC123"]);
        let handle = registry.create_room(&alice(), Some("  Design  ".into()), Privacy::Public).await.unwrap();

        assert_eq!(handle.info.code, "ABC123");
        assert_eq!(handle.info.name.as_deref(), Some("Design"));
        assert_eq!(registry.lookup("abc123").await.map(|h| h.id()), Some(handle.id()));
        assert!(registry.lookup("ZZZ999").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn collision_retries_then_succeeds() {
        let registry = registry(&["ABC123", "ABC123", "XYZ789"]);
        registry.create_room(&alice(), None, Privacy::Public).await.unwrap();

        let started = tokio::time::Instant::now();
        let second = registry.create_room(&alice(), None, Privacy::Public).await.unwrap();
        assert_eq!(second.info.code, "XYZ789");
        assert_eq!(started.elapsed(), Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn collision_exhaustion() {
        let registry = registry(&["ABC123"]);
        registry.create_room(&alice(), None, Privacy::Public).await.unwrap();

        match registry.create_room(&alice(), None, Privacy::Public).await {
            Err(err) => assert_eq!(err, HubError::CodeGenerationExhausted(5)),
            Ok(room) => panic!("expected exhaustion, got room {}", room.info.code),
        }
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn directory_hides_private_rooms() {
        let registry = registry(&["PUB001", "PRV001"]);
        registry.create_room(&alice(), None, Privacy::Public).await.unwrap();
        registry.create_room(&alice(), None, Privacy::Private).await.unwrap();

        let listed: Vec<String> = registry.list_public().await.into_iter().map(|r| r.code).collect();
        assert_eq!(listed, vec!["PUB001".to_string()]);
        assert!(registry.lookup("PRV001").await.is_some());
    }

    #[tokio::test]
    async fn panicking_room_is_restarted_and_members_reset() {
        let registry = registry(&["ABC123"]);
        let handle = registry.create_room(&alice(), None, Privacy::Public).await.unwrap();
        let dispatcher = registry.dispatcher().clone();

        let (conn, mut rx) = dispatcher.register(alice()).await;
        dispatcher.track_room(conn, handle.id()).await;
        handle.join(alice(), conn, false).await.unwrap();
        assert!(matches!(rx.recv().await, Some(ServerEvent::JoinRoomResponse(_))));

        handle.crash().await;
        assert_eq!(rx.recv().await, Some(ServerEvent::RoomReset { room_id: handle.id() }));
        assert!(dispatcher.rooms_of(conn).await.is_empty());

        // Same metadata, empty membership.
        let restarted = registry.lookup("ABC123").await.unwrap();
        assert_eq!(restarted.id(), handle.id());
        assert_eq!(restarted.summary().participant_count, 0);
        assert!(restarted.join(alice(), conn, false).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_rooms_are_forgotten() {
        let registry = registry(&["ABC123"]);
        registry.create_room(&alice(), None, Privacy::Public).await.unwrap();
        assert!(!registry.is_empty().await);

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert!(registry.lookup("ABC123").await.is_none());
        assert!(registry.is_empty().await);
    }
}
