use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{CreateRoomResponse, JoinRoomResponse};
use crate::error::ErrorCode;
use crate::models::{
    CallRecord, CallType, EndReason, FileMeta, Message, Privacy, PresenceAction, PresenceUser,
    UserId, UserPublic,
};

/// Events sent FROM server TO client over the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// Connection accepted; echoes the identity the server will act as
    Ready { user: UserPublic },

    CreateRoomResponse(CreateRoomResponse),

    JoinRoomResponse(JoinRoomResponse),

    LeaveRoomAck { room_id: Uuid },

    /// Authoritative message, delivered to every room connection in `seq` order
    MessageReceived(MessageEnvelope),

    MessageEdited {
        room_id: Uuid,
        message_id: Uuid,
        text: String,
        edited_at: chrono::DateTime<chrono::Utc>,
    },

    MessagePinned {
        room_id: Uuid,
        message_id: Uuid,
        pinned: bool,
    },

    /// Only the ids whose read-by set grew
    ReadReceipt {
        room_id: Uuid,
        user_id: UserId,
        message_ids: Vec<Uuid>,
    },

    /// Presence diff: only the users whose state changed
    Presence {
        room_id: Uuid,
        users: Vec<PresenceUser>,
        action: PresenceAction,
    },

    History {
        room_id: Uuid,
        messages: Vec<Message>,
    },

    CallRequest {
        session_id: Uuid,
        from: UserId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<UserId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<Uuid>,
        call_type: CallType,
    },

    CallResponse {
        session_id: Uuid,
        from: UserId,
        to: UserId,
        accepted: bool,
    },

    CallOffer {
        session_id: Uuid,
        from: UserId,
        to: UserId,
        sdp: serde_json::Value,
    },

    CallAnswer {
        session_id: Uuid,
        from: UserId,
        to: UserId,
        sdp: serde_json::Value,
    },

    IceCandidate {
        session_id: Uuid,
        from: UserId,
        to: UserId,
        candidate: serde_json::Value,
    },

    CallEnd {
        session_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<UserId>,
        reason: EndReason,
    },

    CallHistory { calls: Vec<CallRecord> },

    UserRemoved { room_id: Uuid, user_id: UserId },

    /// The room's state was rebuilt after an internal fault; rejoin to continue
    RoomReset { room_id: Uuid },

    Error {
        code: ErrorCode,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        temp_id: Option<String>,
    },
}

impl ServerEvent {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
            temp_id: None,
        }
    }

    /// Returns the room this event is scoped to, if any.
    pub fn room_id(&self) -> Option<Uuid> {
        match self {
            Self::LeaveRoomAck { room_id }
            | Self::MessageEdited { room_id, .. }
            | Self::MessagePinned { room_id, .. }
            | Self::ReadReceipt { room_id, .. }
            | Self::Presence { room_id, .. }
            | Self::History { room_id, .. }
            | Self::UserRemoved { room_id, .. }
            | Self::RoomReset { room_id } => Some(*room_id),
            Self::MessageReceived(envelope) => Some(envelope.message.room_id),
            Self::CallRequest { room_id, .. } => *room_id,
            _ => None,
        }
    }
}

/// `messageReceived` payload: the message plus the sender's optimistic id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    #[serde(flatten)]
    pub message: Message,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
}

/// Commands sent FROM client TO server over the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientCommand {
    CreateRoom {
        #[serde(default, alias = "roomName")]
        name: Option<String>,
        privacy: Privacy,
        #[serde(default)]
        user: Option<UserPublic>,
    },

    JoinRoom {
        room_code: String,
        #[serde(default)]
        user: Option<UserPublic>,
    },

    LeaveRoom { room_id: Uuid, user_id: UserId },

    Message {
        room_id: Uuid,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        file: Option<FileMeta>,
        #[serde(default)]
        reply_to: Option<Uuid>,
        #[serde(default)]
        temp_id: Option<String>,
    },

    EditMessage {
        room_id: Uuid,
        message_id: Uuid,
        text: String,
    },

    PinMessage {
        room_id: Uuid,
        message_id: Uuid,
        pinned: bool,
    },

    Typing {
        room_id: Uuid,
        user_id: UserId,
        typing: bool,
    },

    ReadReceipt {
        room_id: Uuid,
        message_ids: Vec<Uuid>,
        user_id: UserId,
    },

    FetchHistory {
        room_id: Uuid,
        #[serde(default)]
        before_seq: Option<u64>,
        #[serde(default)]
        limit: Option<usize>,
    },

    /// Admin action: remove another participant
    RemoveUser { room_id: Uuid, user_id: UserId },

    CallRequest {
        from: UserId,
        #[serde(default)]
        to: Option<UserId>,
        #[serde(default)]
        room_id: Option<Uuid>,
        call_type: CallType,
    },

    CallResponse {
        session_id: Uuid,
        from: UserId,
        accepted: bool,
    },

    CallOffer {
        session_id: Uuid,
        to: UserId,
        sdp: serde_json::Value,
    },

    CallAnswer {
        session_id: Uuid,
        to: UserId,
        sdp: serde_json::Value,
    },

    IceCandidate {
        session_id: Uuid,
        to: UserId,
        candidate: serde_json::Value,
    },

    CallEnd {
        session_id: Uuid,
        #[serde(default)]
        reason: Option<EndReason>,
    },

    CallHistory,
}

impl ClientCommand {
    /// Event name as it appears on the wire, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateRoom { .. } => "createRoom",
            Self::JoinRoom { .. } => "joinRoom",
            Self::LeaveRoom { .. } => "leaveRoom",
            Self::Message { .. } => "message",
            Self::EditMessage { .. } => "editMessage",
            Self::PinMessage { .. } => "pinMessage",
            Self::Typing { .. } => "typing",
            Self::ReadReceipt { .. } => "readReceipt",
            Self::FetchHistory { .. } => "fetchHistory",
            Self::RemoveUser { .. } => "removeUser",
            Self::CallRequest { .. } => "callRequest",
            Self::CallResponse { .. } => "callResponse",
            Self::CallOffer { .. } => "callOffer",
            Self::CallAnswer { .. } => "callAnswer",
            Self::IceCandidate { .. } => "iceCandidate",
            Self::CallEnd { .. } => "callEnd",
            Self::CallHistory => "callHistory",
        }
    }
}
