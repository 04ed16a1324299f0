use crate::{
    error::{SyncError, SyncErrorCategory},
    types::{ChatEvent, SendAck},
};

/// Internal helper describing send command success/failure before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Send succeeded and produced a server-assigned message ID.
    Success { message_id: String },
    /// Send failed with engine error details.
    Failure { error: SyncError },
}

/// Convert a send command outcome to a stable `ChatEvent::SendAck`.
pub fn normalize_send_outcome(
    client_txn_id: impl Into<String>,
    outcome: SendOutcome,
) -> ChatEvent {
    let client_txn_id = client_txn_id.into();
    match outcome {
        SendOutcome::Success { message_id } => ChatEvent::SendAck(SendAck {
            client_txn_id,
            message_id: Some(message_id),
            error_code: None,
        }),
        SendOutcome::Failure { error } => ChatEvent::SendAck(SendAck {
            client_txn_id,
            message_id: None,
            error_code: Some(error.code),
        }),
    }
}

/// Convert an error into a `FatalError` engine event.
pub fn normalize_fatal_error(error: SyncError, recoverable: bool) -> ChatEvent {
    ChatEvent::FatalError {
        code: error.code,
        message: error.message,
        recoverable,
    }
}

/// Convert a generic send failure message to a default network-classified error.
pub fn classify_send_error_message(message: impl Into<String>) -> SyncError {
    SyncError::new(SyncErrorCategory::Network, "send_failed", message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_success_to_send_ack() {
        let event = normalize_send_outcome(
            "txn-1",
            SendOutcome::Success {
                message_id: "msg-42".into(),
            },
        );

        match event {
            ChatEvent::SendAck(ack) => {
                assert_eq!(ack.client_txn_id, "txn-1");
                assert_eq!(ack.message_id.as_deref(), Some("msg-42"));
                assert_eq!(ack.error_code, None);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn maps_failure_to_send_ack_with_stable_error_code() {
        let event = normalize_send_outcome(
            "txn-2",
            SendOutcome::Failure {
                error: SyncError::new(
                    SyncErrorCategory::RateLimited,
                    "rate_limited",
                    "slow down",
                ),
            },
        );

        match event {
            ChatEvent::SendAck(ack) => {
                assert_eq!(ack.client_txn_id, "txn-2");
                assert_eq!(ack.message_id, None);
                assert_eq!(ack.error_code.as_deref(), Some("rate_limited"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn fatal_error_carries_recoverability() {
        let event = normalize_fatal_error(
            SyncError::new(SyncErrorCategory::Network, "initial_load_failed", "offline"),
            true,
        );

        match event {
            ChatEvent::FatalError {
                code, recoverable, ..
            } => {
                assert_eq!(code, "initial_load_failed");
                assert!(recoverable);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
