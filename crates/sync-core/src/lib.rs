//! Core sync contract shared between the runtime and frontend consumers.
//!
//! This crate defines the command/event protocol, the poller state
//! machine and its adaptive interval policy, the message merge/dedup
//! engine, unread/watermark arithmetic, lifecycle gating, and common
//! error/channel abstractions. It performs no I/O and never reads the
//! clock; callers pass time in as milliseconds.

/// Async command/event channel primitives.
pub mod channel;
/// Stable engine error types and HTTP classification helpers.
pub mod error;
/// Adaptive poll interval policy.
pub mod interval;
/// App lifecycle gating for notifications and read-on-arrival.
pub mod lifecycle;
/// Message merge/dedup engine.
pub mod merge;
/// Event normalization helpers (for example send acknowledgements).
pub mod normalization;
/// Poller lifecycle state machine.
pub mod poller;
/// Frontend-facing protocol types (commands, events, payloads).
pub mod types;
/// Unread counting over watermarked fetch windows.
pub mod unread;

pub use channel::{EventStream, SyncChannelError, SyncChannels};
pub use error::{SyncError, SyncErrorCategory, classify_http_status};
pub use interval::PollPolicy;
pub use lifecycle::{reads_on_arrival, should_notify};
pub use merge::{MergeReport, MessageLog};
pub use normalization::{SendOutcome, normalize_fatal_error, normalize_send_outcome};
pub use poller::{PollDirective, PollerStateMachine, TickOutcome};
pub use types::{
    AppLifecycle, ChatCommand, ChatEvent, EventDetail, Message, MessageType, PollerState, Room,
    SendAck, StopReason, SyncTuning,
};
pub use unread::{UnreadIndex, unread_in_window};
