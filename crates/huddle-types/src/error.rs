use std::fmt;

use serde::{Deserialize, Serialize};

/// Reason codes carried by `error` events and failed responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    // -- Validation --
    InvalidPayload,
    PayloadTooLarge,
    MessageTooLong,
    EmptyMessage,
    InvalidRoomCode,
    RoomNameTooLong,
    IdentityMismatch,

    // -- Admission --
    RoomNotFound,
    RoomFull,
    Forbidden,
    NotAMember,

    // -- State conflict --
    NoActiveSession,
    GlareLost,
    CannotRemoveCreator,
    CallInProgress,
    MessageNotFound,
    CodeGenerationExhausted,

    // -- Delivery --
    PeerUnreachable,

    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidPayload => "InvalidPayload",
            Self::PayloadTooLarge => "PayloadTooLarge",
            Self::MessageTooLong => "MessageTooLong",
            Self::EmptyMessage => "EmptyMessage",
            Self::InvalidRoomCode => "InvalidRoomCode",
            Self::RoomNameTooLong => "RoomNameTooLong",
            Self::IdentityMismatch => "IdentityMismatch",
            Self::RoomNotFound => "RoomNotFound",
            Self::RoomFull => "RoomFull",
            Self::Forbidden => "Forbidden",
            Self::NotAMember => "NotAMember",
            Self::NoActiveSession => "NoActiveSession",
            Self::GlareLost => "GlareLost",
            Self::CannotRemoveCreator => "CannotRemoveCreator",
            Self::CallInProgress => "CallInProgress",
            Self::MessageNotFound => "MessageNotFound",
            Self::CodeGenerationExhausted => "CodeGenerationExhausted",
            Self::PeerUnreachable => "PeerUnreachable",
            Self::Internal => "Internal",
        }
    }

    /// Malformed or oversized input, rejected before any room sees it.
    pub fn is_validation(self) -> bool {
        matches!(
            self,
            Self::InvalidPayload
                | Self::PayloadTooLarge
                | Self::MessageTooLong
                | Self::EmptyMessage
                | Self::InvalidRoomCode
                | Self::RoomNameTooLong
                | Self::IdentityMismatch
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
