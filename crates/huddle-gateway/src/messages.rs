//! Per-room message log: sequencing, deduplication, read receipts, pins.
//!
//! The log is owned by the room actor, so sequence numbers are assigned one
//! message at a time and are strictly increasing with no gaps. Messages are
//! never removed; only `read_by`, the pin flag and edits mutate them.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use uuid::Uuid;

use huddle_types::models::{FileMeta, Message, UserId};

use crate::error::HubError;

/// Client-supplied content of a new message.
#[derive(Debug, Clone, Default)]
pub struct MessageDraft {
    pub text: Option<String>,
    pub file: Option<FileMeta>,
    pub reply_to: Option<Uuid>,
    pub temp_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Appended {
    /// Stored under a fresh sequence number.
    New(Message),
    /// `(sender, tempId)` was seen inside the dedup window; nothing was stored.
    Duplicate(Message),
}

type DedupKey = (UserId, String);

#[derive(Debug)]
pub struct MessageLog {
    room_id: Uuid,
    max_len: usize,
    dedup_window: Duration,
    dedup_capacity: usize,

    messages: Vec<Message>,
    index: HashMap<Uuid, usize>,
    next_seq: u64,
    pinned: Vec<Uuid>,

    recent: HashMap<DedupKey, Uuid>,
    recent_order: VecDeque<(DedupKey, Instant)>,
}

impl MessageLog {
    pub fn new(room_id: Uuid, max_len: usize, dedup_window: Duration, dedup_capacity: usize) -> Self {
        Self {
            room_id,
            max_len,
            dedup_window,
            dedup_capacity: dedup_capacity.max(1),
            messages: Vec::new(),
            index: HashMap::new(),
            next_seq: 1,
            pinned: Vec::new(),
            recent: HashMap::new(),
            recent_order: VecDeque::new(),
        }
    }

    pub fn append(&mut self, sender: &str, draft: MessageDraft, now: Instant) -> Result<Appended, HubError> {
        self.prune(now);

        if let Some(temp_id) = &draft.temp_id {
            let key = (sender.to_string(), temp_id.clone());
            if let Some(existing) = self.recent.get(&key).and_then(|id| self.get(*id)) {
                return Ok(Appended::Duplicate(existing.clone()));
            }
        }

        let text = draft.text.filter(|text| !text.trim().is_empty());
        if text.is_none() && draft.file.is_none() {
            return Err(HubError::EmptyMessage);
        }
        if let Some(text) = &text {
            self.check_len(text)?;
        }
        if let Some(reply_to) = draft.reply_to {
            if !self.index.contains_key(&reply_to) {
                return Err(HubError::MessageNotFound(reply_to));
            }
        }

        let message = Message {
            id: Uuid::new_v4(),
            room_id: self.room_id,
            from: sender.to_string(),
            text,
            file: draft.file,
            reply_to: draft.reply_to,
            is_pinned: false,
            seq: self.next_seq,
            created_at: Utc::now(),
            edited_at: None,
            read_by: Vec::new(),
        };
        self.next_seq += 1;

        self.index.insert(message.id, self.messages.len());
        self.messages.push(message.clone());

        if let Some(temp_id) = draft.temp_id {
            let key = (sender.to_string(), temp_id);
            self.recent.insert(key.clone(), message.id);
            self.recent_order.push_back((key, now));
            while self.recent_order.len() > self.dedup_capacity {
                if let Some((key, _)) = self.recent_order.pop_front() {
                    self.recent.remove(&key);
                }
            }
        }

        Ok(Appended::New(message))
    }

    /// Add `user_id` to each known message's read-by set. Returns the ids whose
    /// set grew; unknown and already-read ids are skipped.
    pub fn mark_read(&mut self, user_id: &str, message_ids: &[Uuid]) -> Vec<Uuid> {
        let mut grew = Vec::new();
        for id in message_ids {
            let Some(&pos) = self.index.get(id) else {
                continue;
            };
            let message = &mut self.messages[pos];
            if !message.read_by.iter().any(|reader| reader == user_id) {
                message.read_by.push(user_id.to_string());
                grew.push(*id);
            }
        }
        grew
    }

    /// Last write wins. Returns whether the pin state changed.
    pub fn set_pinned(&mut self, message_id: Uuid, pinned: bool) -> Result<bool, HubError> {
        let pos = *self
            .index
            .get(&message_id)
            .ok_or(HubError::MessageNotFound(message_id))?;
        let message = &mut self.messages[pos];
        if message.is_pinned == pinned {
            return Ok(false);
        }
        message.is_pinned = pinned;
        if pinned {
            self.pinned.push(message_id);
        } else {
            self.pinned.retain(|id| *id != message_id);
        }
        Ok(true)
    }

    /// Replace the text of a message. Only its sender may edit it.
    pub fn edit(&mut self, user_id: &str, message_id: Uuid, text: String) -> Result<Message, HubError> {
        let pos = *self
            .index
            .get(&message_id)
            .ok_or(HubError::MessageNotFound(message_id))?;
        if self.messages[pos].from != user_id {
            return Err(HubError::Forbidden("only the sender can edit a message"));
        }
        if text.trim().is_empty() {
            return Err(HubError::EmptyMessage);
        }
        self.check_len(&text)?;

        let message = &mut self.messages[pos];
        message.text = Some(text);
        message.edited_at = Some(Utc::now());
        Ok(message.clone())
    }

    /// Up to `limit` messages with `seq < before`, oldest first.
    pub fn page(&self, before: Option<u64>, limit: usize) -> Vec<Message> {
        let end = match before {
            Some(before) => self.messages.partition_point(|m| m.seq < before),
            None => self.messages.len(),
        };
        let start = end.saturating_sub(limit);
        self.messages[start..end].to_vec()
    }

    pub fn get(&self, message_id: Uuid) -> Option<&Message> {
        self.index.get(&message_id).map(|&pos| &self.messages[pos])
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn pinned(&self) -> &[Uuid] {
        &self.pinned
    }

    /// Forget dedup keys older than the window.
    pub fn prune(&mut self, now: Instant) {
        while let Some((key, seen)) = self.recent_order.front() {
            if now.duration_since(*seen) < self.dedup_window {
                break;
            }
            self.recent.remove(key);
            self.recent_order.pop_front();
        }
    }

    fn check_len(&self, text: &str) -> Result<(), HubError> {
        let len = text.chars().count();
        if len > self.max_len {
            return Err(HubError::MessageTooLong {
                len,
                limit: self.max_len,
            });
        }
        Ok(())
    }
}
