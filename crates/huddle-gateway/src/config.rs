use std::time::Duration;

/// Tunables for the realtime core. The binary fills this from the
/// environment; tests shrink the timers.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Hard cap on participants per room.
    pub room_capacity: usize,
    pub max_message_len: usize,
    pub max_room_name_len: usize,
    /// Largest accepted inbound frame, in bytes.
    pub max_frame_bytes: usize,
    /// Largest serialized SDP or ICE payload, in bytes.
    pub max_signal_bytes: usize,
    pub max_read_receipt_ids: usize,
    pub history_page_default: usize,
    pub history_page_max: usize,

    /// A typing flag not refreshed within this window is cleared.
    pub typing_timeout: Duration,
    /// How long a participant with no live connection stays in the room.
    pub reconnect_grace: Duration,
    /// Unanswered calls time out after this long.
    pub ring_timeout: Duration,
    /// Window in which `(sender, tempId)` resubmissions are deduplicated.
    pub dedup_window: Duration,
    pub dedup_capacity: usize,
    /// Finished calls stay queryable for this long.
    pub call_history_retention: Duration,
    pub call_history_capacity: usize,
    /// Empty rooms are closed after this long.
    pub idle_room_ttl: Duration,
    pub sweep_interval: Duration,

    /// Per-connection outbound queue depth. A full queue evicts the connection.
    pub outbound_queue: usize,
    /// Per-room command queue depth.
    pub room_queue: usize,

    pub code_len: usize,
    pub code_attempts: u32,
    pub code_backoff: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            room_capacity: 100,
            max_message_len: 2000,
            max_room_name_len: 50,
            max_frame_bytes: 256 * 1024,
            max_signal_bytes: 64 * 1024,
            max_read_receipt_ids: 500,
            history_page_default: 50,
            history_page_max: 100,
            typing_timeout: Duration::from_secs(3),
            reconnect_grace: Duration::from_secs(5),
            ring_timeout: Duration::from_secs(30),
            dedup_window: Duration::from_secs(120),
            dedup_capacity: 1024,
            call_history_retention: Duration::from_secs(3600),
            call_history_capacity: 256,
            idle_room_ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_millis(250),
            outbound_queue: 256,
            room_queue: 1024,
            code_len: 6,
            code_attempts: 5,
            code_backoff: Duration::from_millis(10),
        }
    }
}
