use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{PresenceUser, Room, UserPublic};

// -- Identity claims --

/// Claims of the identity token issued by the auth service. Shared by the
/// REST middleware and the WebSocket upgrade so both decode the same shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub sub: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub is_private: bool,
    pub exp: usize,
}

impl Claims {
    pub fn user(&self) -> UserPublic {
        UserPublic {
            id: self.sub.clone(),
            name: self.name.clone(),
            avatar_url: self.avatar_url.clone(),
            is_private: self.is_private,
        }
    }
}

// -- Guest sessions --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestRequest {
    pub name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestResponse {
    pub user: UserPublic,
    pub token: String,
}

// -- Room responses --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CreateRoomResponse {
    pub fn created(room_id: Uuid, room_code: String) -> Self {
        Self {
            success: true,
            room_code: Some(room_code),
            room_id: Some(room_id),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            room_code: None,
            room_id: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<Room>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participants: Option<Vec<PresenceUser>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JoinRoomResponse {
    pub fn joined(room: Room, participants: Vec<PresenceUser>) -> Self {
        Self {
            success: true,
            room: Some(room),
            participants: Some(participants),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            room: None,
            participants: None,
            error: Some(error.into()),
        }
    }
}
