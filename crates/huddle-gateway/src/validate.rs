//! Inbound frame checks. Nothing reaches a room or the call desk before it
//! passes through here.

use huddle_types::events::ClientCommand;
use huddle_types::models::UserPublic;

use crate::config::HubConfig;
use crate::error::HubError;

const MIN_CODE_LEN: usize = 6;
const MAX_CODE_LEN: usize = 8;
const MAX_TEMP_ID_LEN: usize = 128;

/// Parse one text frame into a command.
pub fn parse(raw: &str, config: &HubConfig) -> Result<ClientCommand, HubError> {
    check_frame_size(raw.len(), config)?;
    serde_json::from_str(raw).map_err(|e| HubError::InvalidPayload(e.to_string()))
}

pub fn check_frame_size(size: usize, config: &HubConfig) -> Result<(), HubError> {
    if size > config.max_frame_bytes {
        return Err(HubError::PayloadTooLarge {
            size,
            limit: config.max_frame_bytes,
        });
    }
    Ok(())
}

/// Normalize a join code: trimmed, upper-cased, 6-8 letters or digits.
pub fn room_code(code: &str) -> Result<String, HubError> {
    let code = code.trim();
    let valid = (MIN_CODE_LEN..=MAX_CODE_LEN).contains(&code.len())
        && code.chars().all(|c| c.is_ascii_alphanumeric());
    if !valid {
        return Err(HubError::InvalidRoomCode);
    }
    Ok(code.to_ascii_uppercase())
}

/// Shape and identity checks for a parsed command sent by `identity`.
pub fn check(command: &ClientCommand, identity: &UserPublic, config: &HubConfig) -> Result<(), HubError> {
    match command {
        ClientCommand::CreateRoom { name, user, .. } => {
            if let Some(name) = name {
                if name.trim().chars().count() > config.max_room_name_len {
                    return Err(HubError::RoomNameTooLong(config.max_room_name_len));
                }
            }
            if let Some(user) = user {
                same_user(&user.id, identity)?;
            }
        }
        ClientCommand::JoinRoom { room_code: code, user } => {
            room_code(code)?;
            if let Some(user) = user {
                same_user(&user.id, identity)?;
            }
        }
        ClientCommand::LeaveRoom { user_id, .. } | ClientCommand::Typing { user_id, .. } => {
            same_user(user_id, identity)?;
        }
        ClientCommand::Message { text, file, temp_id, .. } => {
            let blank = text.as_deref().is_none_or(|t| t.trim().is_empty());
            if blank && file.is_none() {
                return Err(HubError::EmptyMessage);
            }
            if let Some(text) = text {
                text_length(text, config)?;
            }
            if temp_id.as_ref().is_some_and(|t| t.len() > MAX_TEMP_ID_LEN) {
                return Err(HubError::InvalidPayload(format!("tempId longer than {MAX_TEMP_ID_LEN} bytes")));
            }
        }
        ClientCommand::EditMessage { text, .. } => {
            if text.trim().is_empty() {
                return Err(HubError::EmptyMessage);
            }
            text_length(text, config)?;
        }
        ClientCommand::ReadReceipt { user_id, message_ids, .. } => {
            same_user(user_id, identity)?;
            if message_ids.len() > config.max_read_receipt_ids {
                return Err(HubError::InvalidPayload(format!(
                    "at most {} message ids per read receipt",
                    config.max_read_receipt_ids
                )));
            }
        }
        ClientCommand::CallRequest { from, to, room_id, .. } => {
            same_user(from, identity)?;
            if to.is_some() == room_id.is_some() {
                return Err(HubError::InvalidPayload("callRequest needs exactly one of `to` or `roomId`".into()));
            }
        }
        ClientCommand::CallResponse { from, .. } => same_user(from, identity)?,
        ClientCommand::CallOffer { sdp: payload, .. }
        | ClientCommand::CallAnswer { sdp: payload, .. }
        | ClientCommand::IceCandidate {
            candidate: payload, ..
        } => {
            let size = payload.to_string().len();
            if size > config.max_signal_bytes {
                return Err(HubError::PayloadTooLarge {
                    size,
                    limit: config.max_signal_bytes,
                });
            }
        }
        ClientCommand::CallEnd { reason, .. } => {
            if reason.is_some_and(|r| !r.is_client_reason()) {
                return Err(HubError::InvalidPayload("callEnd reason must be user_ended, connection_lost or error".into()));
            }
        }
        ClientCommand::PinMessage { .. }
        | ClientCommand::FetchHistory { .. }
        | ClientCommand::RemoveUser { .. }
        | ClientCommand::CallHistory => {}
    }
    Ok(())
}

fn same_user(claimed: &str, identity: &UserPublic) -> Result<(), HubError> {
    if claimed != identity.id {
        return Err(HubError::IdentityMismatch {
            claimed: claimed.to_string(),
            actual: identity.id.clone(),
        });
    }
    Ok(())
}

fn text_length(text: &str, config: &HubConfig) -> Result<(), HubError> {
    let len = text.chars().count();
    if len > config.max_message_len {
        return Err(HubError::MessageTooLong {
            len,
            limit: config.max_message_len,
        });
    }
    Ok(())
}
