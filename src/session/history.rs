use std::collections::VecDeque;

use super::types::ChatMessage;

/// Ordered, length-capped message sequence for one conversation.
///
/// Appends always succeed; when the cap would be exceeded the oldest entries
/// drop first, so exactly the most recent `cap` messages survive.
#[derive(Debug, Clone)]
pub struct MessageHistory {
    entries: VecDeque<ChatMessage>,
    cap: usize,
}

impl MessageHistory {
    #[must_use]
    pub fn new(cap: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(cap),
            cap,
        }
    }

    pub fn append(&mut self, message: ChatMessage) {
        self.entries.push_back(message);
        while self.entries.len() > self.cap {
            self.entries.pop_front();
        }
    }

    /// Current ordered contents, oldest first. Suitable for assembling a
    /// completion request without holding a borrow on the history.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.entries.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
