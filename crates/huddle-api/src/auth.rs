use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::{info, warn};
use uuid::Uuid;

use huddle_gateway::Gateway;
use huddle_types::api::{Claims, GuestRequest, GuestResponse};
use huddle_types::models::{GUEST_PREFIX, UserPublic};

/// Guest tokens are short-lived; registered accounts come from the auth service.
const GUEST_TOKEN_HOURS: i64 = 12;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub gateway: Gateway,
    pub jwt_secret: String,
}

/// Issue a guest identity so a visitor can join by code without an account.
pub async fn guest(
    State(state): State<AppState>,
    Json(req): Json<GuestRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let user = UserPublic {
        id: format!("{}{}", GUEST_PREFIX, Uuid::new_v4().simple()),
        name: req.name.trim().to_string(),
        avatar_url: req.avatar_url,
        is_private: false,
    };
    if !user.is_well_formed() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let token = create_token(&state.jwt_secret, &user, chrono::Duration::hours(GUEST_TOKEN_HOURS))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    info!("issued guest identity {} ({})", user.name, user.id);
    Ok((StatusCode::CREATED, Json(GuestResponse { user, token })))
}

/// Sign an identity token in the shape the auth service issues.
pub fn create_token(secret: &str, user: &UserPublic, ttl: chrono::Duration) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user.id.clone(),
        name: user.name.clone(),
        avatar_url: user.avatar_url.clone(),
        is_private: user.is_private,
        exp: (chrono::Utc::now() + ttl).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

/// Verify a token and return its claims. Expired or forged tokens are refused.
pub fn decode_identity(secret: &str, token: &str) -> Result<Claims, StatusCode> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| {
        warn!("rejected identity token: {}", e);
        StatusCode::UNAUTHORIZED
    })?;

    if !token_data.claims.user().is_well_formed() {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(token_data.claims)
}
