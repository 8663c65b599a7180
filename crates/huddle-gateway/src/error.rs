use thiserror::Error;
use uuid::Uuid;

use huddle_types::error::ErrorCode;
use huddle_types::events::ServerEvent;

/// Every way a request can be refused. A failed operation never changes room
/// state; the error goes back to the requesting connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    #[error("malformed event: {0}")]
    InvalidPayload(String),

    #[error("frame of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("message is {len} characters, limit is {limit}")]
    MessageTooLong { len: usize, limit: usize },

    #[error("message needs text or a file")]
    EmptyMessage,

    #[error("room code must be 6-8 letters or digits")]
    InvalidRoomCode,

    #[error("room name is longer than {0} characters")]
    RoomNameTooLong(usize),

    #[error("payload names user {claimed} but the connection belongs to {actual}")]
    IdentityMismatch { claimed: String, actual: String },

    #[error("no room with code or id {0}")]
    RoomNotFound(String),

    #[error("room is full ({0} participants)")]
    RoomFull(usize),

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("{0} is not a member of this room")]
    NotAMember(String),

    #[error("no active call session {0}")]
    NoActiveSession(Uuid),

    #[error("simultaneous call resolved in favour of {winner}")]
    GlareLost { winner: String },

    #[error("the room creator cannot be removed")]
    CannotRemoveCreator,

    #[error("a call is already in progress")]
    CallInProgress,

    #[error("message {0} not found in this room")]
    MessageNotFound(Uuid),

    #[error("could not find a free room code after {0} attempts")]
    CodeGenerationExhausted(u32),

    #[error("{0} has no live connection")]
    PeerUnreachable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl HubError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidPayload(_) => ErrorCode::InvalidPayload,
            Self::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            Self::MessageTooLong { .. } => ErrorCode::MessageTooLong,
            Self::EmptyMessage => ErrorCode::EmptyMessage,
            Self::InvalidRoomCode => ErrorCode::InvalidRoomCode,
            Self::RoomNameTooLong(_) => ErrorCode::RoomNameTooLong,
            Self::IdentityMismatch { .. } => ErrorCode::IdentityMismatch,
            Self::RoomNotFound(_) => ErrorCode::RoomNotFound,
            Self::RoomFull(_) => ErrorCode::RoomFull,
            Self::Forbidden(_) => ErrorCode::Forbidden,
            Self::NotAMember(_) => ErrorCode::NotAMember,
            Self::NoActiveSession(_) => ErrorCode::NoActiveSession,
            Self::GlareLost { .. } => ErrorCode::GlareLost,
            Self::CannotRemoveCreator => ErrorCode::CannotRemoveCreator,
            Self::CallInProgress => ErrorCode::CallInProgress,
            Self::MessageNotFound(_) => ErrorCode::MessageNotFound,
            Self::CodeGenerationExhausted(_) => ErrorCode::CodeGenerationExhausted,
            Self::PeerUnreachable(_) => ErrorCode::PeerUnreachable,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// The generic `error` envelope for this failure.
    pub fn to_event(&self) -> ServerEvent {
        ServerEvent::error(self.code(), self.to_string())
    }
}
