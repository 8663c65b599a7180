//! Realtime core: connection gateway, room registry and per-room actors,
//! message pipeline, presence and call signaling.

pub mod calls;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod messages;
pub mod presence;
pub mod registry;
pub mod room;
pub mod validate;

pub use config::HubConfig;
pub use error::HubError;
pub use gateway::{AdmissionPolicy, AllowAll, ConnectionHandle, Gateway};
pub use registry::{CodeSource, RandomCodes, Registry};
