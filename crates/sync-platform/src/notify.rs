use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("notification service unavailable: {0}")]
    Unavailable(String),
    #[error("notification service backend failure: {0}")]
    Backend(String),
}

/// One-shot local notification sink plus badge-count setter.
///
/// Implementations wrap whatever the host platform offers; failures are
/// reported but the engine treats them as non-fatal.
pub trait Notifier: Send + Sync {
    /// Show a notification now. `room_id` travels as the tap payload.
    fn notify(&self, title: &str, body: &str, room_id: &str) -> Result<(), NotifyError>;

    /// Set the app badge to the global unread total.
    fn set_badge(&self, count: u64) -> Result<(), NotifyError>;
}

/// Notifier that drops everything; for headless hosts and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _title: &str, _body: &str, _room_id: &str) -> Result<(), NotifyError> {
        Ok(())
    }

    fn set_badge(&self, _count: u64) -> Result<(), NotifyError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Default, Clone)]
    struct RecordingNotifier {
        shown: Arc<Mutex<Vec<(String, String, String)>>>,
        badge: Arc<Mutex<Option<u64>>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, title: &str, body: &str, room_id: &str) -> Result<(), NotifyError> {
            self.shown
                .lock()
                .expect("lock should not be poisoned")
                .push((title.to_owned(), body.to_owned(), room_id.to_owned()));
            Ok(())
        }

        fn set_badge(&self, count: u64) -> Result<(), NotifyError> {
            *self.badge.lock().expect("lock should not be poisoned") = Some(count);
            Ok(())
        }
    }

    #[test]
    fn noop_notifier_accepts_everything() {
        let notifier = NoopNotifier;
        notifier
            .notify("New message", "hello", "room-1")
            .expect("notify should work");
        notifier.set_badge(3).expect("badge should work");
    }

    #[test]
    fn recording_fake_captures_payloads() {
        let notifier = RecordingNotifier::default();
        notifier
            .notify("Hiking trip", "see you there", "room-1")
            .expect("notify should work");
        notifier.set_badge(2).expect("badge should work");

        let shown = notifier.shown.lock().expect("lock should not be poisoned");
        assert_eq!(
            shown.as_slice(),
            &[(
                "Hiking trip".to_owned(),
                "see you there".to_owned(),
                "room-1".to_owned()
            )]
        );
        assert_eq!(
            *notifier.badge.lock().expect("lock should not be poisoned"),
            Some(2)
        );
    }
}
