//! HTTP surface next to the gateway: identity tokens, the auth middleware
//! and the public room directory.

pub mod auth;
pub mod middleware;
pub mod rooms;
