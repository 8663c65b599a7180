use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User ids are opaque strings issued by the auth service.
pub type UserId = String;

/// Id prefix the auth service uses for guest accounts.
pub const GUEST_PREFIX: &str = "temp_";
/// Id prefix the auth service uses for registered accounts.
pub const REGISTERED_PREFIX: &str = "uid_";

pub const MAX_USER_ID_LEN: usize = 128;
pub const MAX_DISPLAY_NAME_LEN: usize = 64;

/// Read-only identity snapshot attached to a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPublic {
    pub id: UserId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub is_private: bool,
}

impl UserPublic {
    pub fn is_guest(&self) -> bool {
        self.id.starts_with(GUEST_PREFIX)
    }

    /// Shape check only: credentials are the auth service's business.
    pub fn is_well_formed(&self) -> bool {
        !self.id.trim().is_empty()
            && self.id.len() <= MAX_USER_ID_LEN
            && !self.name.trim().is_empty()
            && self.name.chars().count() <= MAX_DISPLAY_NAME_LEN
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privacy {
    Public,
    Private,
}

/// Full room state as handed to a member on join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: Uuid,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub privacy: Privacy,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub participants: Vec<UserId>,
    pub max_participants: usize,
    pub pinned_messages: Vec<Uuid>,
    pub last_activity: DateTime<Utc>,
}

/// Directory entry for a room; safe to show to non-members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPublic {
    pub id: Uuid,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub privacy: Privacy,
    pub participant_count: usize,
    pub max_participants: usize,
    pub last_activity: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

/// File reference produced by the storage service. Carried verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub mime: String,
    pub storage_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub room_id: Uuid,
    pub from: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Uuid>,
    #[serde(default)]
    pub is_pinned: bool,
    pub seq: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub read_by: Vec<UserId>,
}

/// A participant as seen in presence diffs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUser {
    #[serde(flatten)]
    pub user: UserPublic,
    pub is_online: bool,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceAction {
    Joined,
    Left,
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Room,
    Direct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Ringing,
    Connected,
    Declined,
    TimedOut,
    Ended,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Declined | Self::TimedOut | Self::Ended)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    UserEnded,
    ConnectionLost,
    Error,
    Declined,
    TimedOut,
    GlareLost,
}

impl EndReason {
    /// Reasons a client may state when hanging up.
    pub fn is_client_reason(self) -> bool {
        matches!(self, Self::UserEnded | Self::ConnectionLost | Self::Error)
    }
}

/// History entry for a finished call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub id: Uuid,
    pub kind: CallKind,
    pub call_type: CallType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<Uuid>,
    pub initiator: UserId,
    /// Everyone who was rung, whether or not they picked up.
    #[serde(default)]
    pub invited: Vec<UserId>,
    pub participants: Vec<UserId>,
    pub state: CallState,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answered_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<EndReason>,
}
