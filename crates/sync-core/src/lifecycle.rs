use crate::types::AppLifecycle;

impl AppLifecycle {
    /// Whether the app is foregrounded and presumed visible to the user.
    pub fn is_foreground(self) -> bool {
        matches!(self, AppLifecycle::Active)
    }
}

/// Notification gate for a merged message.
///
/// A local notification fires only when the app is not foregrounded
/// (the user is not presumed to be reading the open room) and the
/// message was authored by someone else. Evaluated at merge time, so a
/// fetch that completes after the app backgrounds still notifies.
pub fn should_notify(state: AppLifecycle, sender_id: &str, viewer_id: &str) -> bool {
    !state.is_foreground() && sender_id != viewer_id
}

/// Read-on-arrival gate: while the open room is visible in a
/// foregrounded app, newly merged messages advance the watermark
/// immediately instead of waiting for an explicit mark-read.
pub fn reads_on_arrival(state: AppLifecycle) -> bool {
    state.is_foreground()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_active_counts_as_foreground() {
        assert!(AppLifecycle::Active.is_foreground());
        assert!(!AppLifecycle::Inactive.is_foreground());
        assert!(!AppLifecycle::Background.is_foreground());
    }

    #[test]
    fn notifications_are_suppressed_while_foregrounded() {
        assert!(!should_notify(AppLifecycle::Active, "user-other", "user-me"));
        assert!(should_notify(AppLifecycle::Background, "user-other", "user-me"));
        assert!(should_notify(AppLifecycle::Inactive, "user-other", "user-me"));
    }

    #[test]
    fn own_messages_never_notify() {
        assert!(!should_notify(AppLifecycle::Background, "user-me", "user-me"));
        assert!(!should_notify(AppLifecycle::Active, "user-me", "user-me"));
    }

    #[test]
    fn arrival_reads_track_foreground_state() {
        assert!(reads_on_arrival(AppLifecycle::Active));
        assert!(!reads_on_arrival(AppLifecycle::Inactive));
        assert!(!reads_on_arrival(AppLifecycle::Background));
    }
}
