//! Bounded conversation history.
//!
//! Entries are append-only. Only the most recent `max_images` observations
//! keep their screenshot; older ones are rewritten in place to a text-only
//! summary so the request payload stays bounded over long sessions.

use std::collections::VecDeque;
use tracing::debug;

use droidloop_core::message::ConversationEntry;

/// Ordered history with a sliding image window.
#[derive(Debug, Clone)]
pub struct ConversationState {
    entries: Vec<ConversationEntry>,

    /// Indices of image-bearing entries, oldest first
    images: VecDeque<usize>,

    max_images: usize,
}

impl ConversationState {
    /// `max_images` is clamped to at least 1.
    pub fn new(max_images: usize) -> Self {
        let max_images = max_images.max(1);
        Self {
            entries: Vec::new(),
            images: VecDeque::with_capacity(max_images + 1),
            max_images,
        }
    }

    pub fn max_images(&self) -> usize {
        self.max_images
    }

    /// Append an entry, evicting the oldest image if the window overflows.
    pub fn append(&mut self, entry: ConversationEntry) {
        if entry.has_image() {
            self.images.push_back(self.entries.len());
        }
        self.entries.push(entry);

        while self.images.len() > self.max_images {
            if let Some(oldest) = self.images.pop_front() {
                self.replace_with_text(oldest);
            }
        }
    }

    /// Drop the image of the entry at `index`.
    ///
    /// Returns `false` (and changes nothing) if the entry has no image or the
    /// index is out of range.
    pub fn evict(&mut self, index: usize) -> bool {
        if !self.replace_with_text(index) {
            return false;
        }
        self.images.retain(|&i| i != index);
        true
    }

    fn replace_with_text(&mut self, index: usize) -> bool {
        let Some(text_only) = self.entries.get(index).and_then(ConversationEntry::to_evicted) else {
            return false;
        };
        debug!(index, step = text_only.step(), "Evicting screenshot from history");
        self.entries[index] = text_only;
        true
    }

    /// The full ordered history. Observations are shared, not copied.
    pub fn snapshot(&self) -> Vec<ConversationEntry> {
        self.entries.clone()
    }

    pub fn entries(&self) -> &[ConversationEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries that still carry a screenshot.
    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new(8)
    }
}
