use std::collections::HashSet;

use crate::types::Message;

/// Outcome of merging one fetched page into a `MessageLog`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Previously unseen messages, in the chronological order they were
    /// appended.
    pub appended: Vec<Message>,
    /// Known messages whose content changed (newest fetch wins).
    pub updated: Vec<Message>,
}

impl MergeReport {
    /// Whether the merge changed nothing.
    pub fn is_empty(&self) -> bool {
        self.appended.is_empty() && self.updated.is_empty()
    }
}

/// In-memory chronological message log with bounded retention.
///
/// Pages arrive from the API newest-first; the log normalizes them to
/// chronological order and keeps exactly one occurrence of each id.
#[derive(Debug, Clone)]
pub struct MessageLog {
    messages: Vec<Message>,
    known_ids: HashSet<String>,
    max_items: usize,
}

impl MessageLog {
    /// Create a log with an item cap (`max_items >= 1`).
    pub fn new(max_items: usize) -> Self {
        Self {
            messages: Vec::new(),
            known_ids: HashSet::new(),
            max_items: max_items.max(1),
        }
    }

    /// Current messages in chronological order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// ID of the newest message in the log.
    pub fn latest_id(&self) -> Option<&str> {
        self.messages.last().map(|msg| msg.id.as_str())
    }

    /// Replace the log with the first fetched page of a freshly opened
    /// room.
    ///
    /// The page is deduplicated within itself (duplicate server
    /// delivery) and normalized from newest-first to chronological
    /// order. Returns the number of retained messages.
    pub fn load_initial(&mut self, page_newest_first: Vec<Message>) -> usize {
        self.messages.clear();
        self.known_ids.clear();

        for incoming in page_newest_first.into_iter().rev() {
            if self.known_ids.insert(incoming.id.clone()) {
                self.messages.push(incoming);
            }
        }
        self.messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        self.trim_to_max();

        self.messages.len()
    }

    /// Merge a newly fetched newest-first page into the log.
    ///
    /// Unseen messages are appended to the tail in chronological order;
    /// the steady-state fetch contract guarantees recent/tail-appended
    /// pages, so no mid-sequence insertion happens. A known id whose
    /// content differs replaces the stored message in place.
    pub fn merge_page(&mut self, page_newest_first: &[Message]) -> MergeReport {
        let mut report = MergeReport::default();
        let mut fresh: Vec<Message> = Vec::new();
        let mut fresh_ids: HashSet<String> = HashSet::new();

        for incoming in page_newest_first.iter().rev() {
            if self.known_ids.contains(&incoming.id) {
                if let Some(existing) = self
                    .messages
                    .iter_mut()
                    .find(|msg| msg.id == incoming.id)
                    && *existing != *incoming
                {
                    *existing = incoming.clone();
                    report.updated.push(incoming.clone());
                }
            } else if fresh_ids.insert(incoming.id.clone()) {
                fresh.push(incoming.clone());
            }
        }

        fresh.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        for msg in fresh {
            self.known_ids.insert(msg.id.clone());
            report.appended.push(msg.clone());
            self.messages.push(msg);
        }
        self.trim_to_max();

        report
    }

    fn trim_to_max(&mut self) {
        if self.messages.len() <= self.max_items {
            return;
        }

        let excess = self.messages.len() - self.max_items;
        for dropped in self.messages.drain(0..excess) {
            self.known_ids.remove(&dropped.id);
        }
    }
}
