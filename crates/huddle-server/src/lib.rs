pub mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use huddle_api::auth::{self, AppState, AppStateInner, decode_identity};
use huddle_api::middleware::{bearer_token, require_auth};
use huddle_api::rooms;
use huddle_gateway::dispatcher::Dispatcher;
use huddle_gateway::{Gateway, HubConfig, Registry, connection};

pub use config::ServerConfig;

/// Wire up the realtime core. Must run inside the tokio runtime.
pub fn build_state(hub: HubConfig, jwt_secret: String) -> AppState {
    let hub = Arc::new(hub);
    let dispatcher = Dispatcher::new(hub.outbound_queue);
    let gateway = Gateway::new(Registry::new(dispatcher, hub));
    Arc::new(AppStateInner { gateway, jwt_secret })
}

pub fn build_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/guest", post(auth::guest))
        .route("/health", get(health))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/rooms", get(rooms::list_rooms))
        .route("/rooms/{code}", get(rooms::get_room))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
struct GatewayParams {
    token: Option<String>,
}

/// Browsers cannot set headers on a WebSocket handshake, so the token may
/// also come as `?token=`.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<GatewayParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    let token = params
        .token
        .as_deref()
        .or_else(|| bearer_token(&headers))
        .ok_or(StatusCode::UNAUTHORIZED)?;
    let user = decode_identity(&state.jwt_secret, token)?.user();

    // Moderately oversized frames get a PayloadTooLarge reply; far larger ones
    // are cut off by the transport.
    let hard_limit = state.gateway.config().max_frame_bytes * 4;
    let gateway = state.gateway.clone();
    Ok(ws
        .max_message_size(hard_limit)
        .on_upgrade(move |socket| connection::handle_connection(socket, gateway, user)))
}
