//! Wire protocol and shared models for the Huddle realtime backend.

pub mod api;
pub mod error;
pub mod events;
pub mod models;
