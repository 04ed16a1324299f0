use std::collections::{HashMap, HashSet};

use crate::types::Message;

/// Count unread messages in a bounded newest-first fetch window.
///
/// Messages authored by `viewer_id` never count. With no watermark,
/// every other-user message in the window counts. With a watermark
/// present in the window, only other-user messages strictly newer than
/// it count. A watermark that fell outside the window counts every
/// other-user message in the window — a conservative undercount of the
/// real backlog, bounded by the window size. Older unread messages
/// beyond the window are not discoverable by this design.
pub fn unread_in_window(
    window_newest_first: &[Message],
    watermark: Option<&str>,
    viewer_id: &str,
) -> u64 {
    let newer_than_mark = match watermark {
        Some(mark) => match window_newest_first.iter().position(|msg| msg.id == mark) {
            Some(pos) => &window_newest_first[..pos],
            None => window_newest_first,
        },
        None => window_newest_first,
    };

    newer_than_mark
        .iter()
        .filter(|msg| msg.sender_id != viewer_id)
        .count() as u64
}

/// Derived per-room unread counts plus the global badge total.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnreadIndex {
    counts: HashMap<String, u64>,
}

impl UnreadIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-room counts.
    pub fn counts(&self) -> &HashMap<String, u64> {
        &self.counts
    }

    /// Count for one room; unknown rooms read as 0.
    pub fn count_for(&self, room_id: &str) -> u64 {
        self.counts.get(room_id).copied().unwrap_or(0)
    }

    /// Global badge total.
    pub fn total(&self) -> u64 {
        self.counts.values().fold(0u64, |acc, n| acc.saturating_add(*n))
    }

    /// Set one room's count. Returns whether the value changed.
    pub fn set_room(&mut self, room_id: impl Into<String>, count: u64) -> bool {
        let room_id = room_id.into();
        if self.counts.get(&room_id) == Some(&count) {
            return false;
        }
        self.counts.insert(room_id, count);
        true
    }

    /// Zero one room's count (mark-read). Returns whether it changed.
    pub fn clear_room(&mut self, room_id: &str) -> bool {
        match self.counts.get_mut(room_id) {
            Some(count) if *count != 0 => {
                *count = 0;
                true
            }
            Some(_) => false,
            None => {
                self.counts.insert(room_id.to_owned(), 0);
                false
            }
        }
    }

    /// Merge one sweep's results. `None` marks a room whose fetch
    /// failed: its previous count is kept so a partial failure never
    /// corrupts the other rooms. Returns whether anything changed.
    pub fn apply_sweep<I>(&mut self, results: I) -> bool
    where
        I: IntoIterator<Item = (String, Option<u64>)>,
    {
        let mut changed = false;
        for (room_id, count) in results {
            if let Some(count) = count {
                changed |= self.set_room(room_id, count);
            }
        }
        changed
    }

    /// Drop rooms no longer present in the room list.
    pub fn retain_rooms(&mut self, live: &HashSet<String>) -> bool {
        let before = self.counts.len();
        self.counts.retain(|room_id, _| live.contains(room_id));
        before != self.counts.len()
    }
}
