use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a chat message as reported by the API.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Regular user-authored text message.
    Text,
    /// A member joined the room's event.
    Join,
    /// A member left the room's event.
    Leave,
    /// A member was confirmed for the room's event.
    Confirm,
    /// Server-generated informational message.
    System,
}

/// Single chat message. Immutable once created; identity is `id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Server-assigned message ID.
    pub id: String,
    /// Room the message belongs to.
    pub room_id: String,
    /// Authoring user ID.
    pub sender_id: String,
    /// Display-ready text body.
    pub body: String,
    /// Message kind.
    pub message_type: MessageType,
    /// Server-assigned creation timestamp; the ordering key.
    pub created_at: DateTime<Utc>,
}

/// Chat room bound 1:1 to an event. Fetched, never created client-side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Room {
    /// Room ID.
    pub id: String,
    /// Owning event ID.
    pub event_id: String,
}

/// Event detail used for room headers and notification titles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventDetail {
    /// Event ID.
    pub id: String,
    /// Event title.
    pub title: String,
    /// Maximum member capacity.
    pub capacity: u32,
    /// Current member count.
    pub member_count: u32,
}

/// Host application lifecycle state as reported by the OS.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppLifecycle {
    /// App is foregrounded and receiving input.
    Active,
    /// App is visible but not focused (transition state).
    Inactive,
    /// App is backgrounded.
    Background,
}

/// Poller lifecycle state reported through `ChatEvent::PollerStatus`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PollerState {
    /// Poller has been created but not started.
    Idle,
    /// Poller is waiting for its next tick.
    Scheduled,
    /// A tick is currently executing.
    Running,
    /// Poller has terminated and will not tick again.
    Stopped,
}

/// Why a poller reached `PollerState::Stopped`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StopReason {
    /// `stop()` was called (view blur, unmount, room switch).
    Requested,
    /// Consecutive-failure threshold crossed with a non-auth error.
    Failed,
    /// Consecutive-failure threshold crossed with an auth error (401/403).
    AuthExpired,
}

/// Optional runtime tuning values supplied with `ChatCommand::Init`.
///
/// Every field falls back to an engine default when `None`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SyncTuning {
    /// Base poll interval in milliseconds.
    pub poll_base_ms: Option<u64>,
    /// Fixed widening step applied after the idle threshold.
    pub poll_step_ms: Option<u64>,
    /// Poll interval cap in milliseconds.
    pub poll_max_ms: Option<u64>,
    /// Quiet duration after which the interval starts widening.
    pub poll_idle_after_ms: Option<u64>,
    /// Consecutive poll failures tolerated before the poller stops.
    pub poll_failure_threshold: Option<u32>,
    /// Interval between full unread sweeps across all rooms.
    pub unread_sweep_interval_ms: Option<u64>,
    /// Recent-message window size used for unread computation.
    pub unread_window: Option<u16>,
    /// Page size for room message fetches.
    pub page_size: Option<u16>,
    /// In-memory message log retention cap per room.
    pub log_max_items: Option<usize>,
    /// Per-request HTTP timeout in milliseconds.
    pub request_timeout_ms: Option<u64>,
}

/// Command channel input accepted by the sync runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatCommand {
    /// Initialize the engine with API endpoint and viewer identity.
    Init {
        /// API base URL, for example `https://api.example.org`.
        base_url: String,
        /// Bearer token attached to every request.
        auth_token: String,
        /// User ID of the local viewer; own messages never count unread.
        viewer_id: String,
        /// Optional runtime tuning overrides.
        config: Option<SyncTuning>,
    },
    /// Fetch the room list and emit `RoomListUpdated`.
    RefreshRooms,
    /// Open a room: initial load, mark read, start its poller.
    OpenRoom {
        /// Target room ID.
        room_id: String,
    },
    /// Close the open room and stop its poller. No-op when none is open.
    CloseRoom,
    /// Acknowledge everything currently known in a room as read.
    MarkRead {
        /// Target room ID.
        room_id: String,
    },
    /// Run one unread sweep across all rooms immediately.
    RefreshUnread,
    /// Send a message to a room.
    SendMessage {
        /// Target room ID.
        room_id: String,
        /// Frontend-provided transaction ID echoed in `SendAck`.
        client_txn_id: String,
        /// Message body.
        body: String,
        /// Message kind.
        message_type: MessageType,
    },
    /// Fetch detail for an event and emit `EventDetailLoaded`.
    FetchEventDetail {
        /// Target event ID.
        event_id: String,
    },
    /// Report a host app lifecycle transition.
    AppStateChanged {
        /// New lifecycle state.
        state: AppLifecycle,
    },
}

/// Acknowledgement for `ChatCommand::SendMessage`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendAck {
    /// Original frontend transaction ID.
    pub client_txn_id: String,
    /// Server-assigned message ID on success.
    pub message_id: Option<String>,
    /// Stable engine error code on failure.
    pub error_code: Option<String>,
}

/// Event channel output emitted by the sync runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatEvent {
    /// Engine accepted `Init` and is ready for room commands.
    Ready {
        /// Viewer the engine was initialized for.
        viewer_id: String,
    },
    /// Full room list replacement.
    RoomListUpdated {
        /// Latest known rooms.
        rooms: Vec<Room>,
    },
    /// Initial chronological message snapshot for a freshly opened room.
    RoomSnapshot {
        /// Target room ID.
        room_id: String,
        /// Snapshot messages in chronological order.
        messages: Vec<Message>,
    },
    /// Incremental merge result for the open room.
    RoomDelta {
        /// Target room ID.
        room_id: String,
        /// Messages appended to the tail, chronological.
        appended: Vec<Message>,
        /// Previously known messages whose content changed.
        updated: Vec<Message>,
    },
    /// Unread counts changed.
    UnreadChanged {
        /// Per-room unread counts.
        counts: HashMap<String, u64>,
        /// Global badge total.
        total: u64,
    },
    /// Poller lifecycle transition for a room.
    PollerStatus {
        /// Room the poller belongs to.
        room_id: String,
        /// New poller state.
        state: PollerState,
        /// Current poll interval in milliseconds.
        interval_ms: u64,
        /// Populated when `state` is `Stopped`.
        stop_reason: Option<StopReason>,
    },
    /// Polling hit the failure threshold with an auth error; the session
    /// is presumed invalid and the user should re-authenticate.
    SessionExpired,
    /// Send acknowledgement.
    SendAck(SendAck),
    /// Event detail fetch completed.
    EventDetailLoaded {
        /// Fetched event detail.
        event: EventDetail,
    },
    /// Operation failed at the engine boundary.
    FatalError {
        /// Stable engine error code.
        code: String,
        /// Human-readable error message.
        message: String,
        /// Indicates whether retrying may recover.
        recoverable: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_api_message_json() {
        let raw = r#"{
            "id": "msg-1",
            "room_id": "room-1",
            "sender_id": "user-2",
            "body": "see you at the trailhead",
            "message_type": "text",
            "created_at": "2025-11-07T18:40:00Z"
        }"#;

        let message: Message = serde_json::from_str(raw).expect("message should deserialize");
        assert_eq!(message.id, "msg-1");
        assert_eq!(message.message_type, MessageType::Text);
        assert_eq!(message.created_at.timestamp(), 1_762_540_800);
    }

    #[test]
    fn message_type_uses_snake_case_wire_names() {
        for (value, expected) in [
            (MessageType::Text, "\"text\""),
            (MessageType::Join, "\"join\""),
            (MessageType::Leave, "\"leave\""),
            (MessageType::Confirm, "\"confirm\""),
            (MessageType::System, "\"system\""),
        ] {
            let encoded = serde_json::to_string(&value).expect("type should serialize");
            assert_eq!(encoded, expected);
        }
    }
}
