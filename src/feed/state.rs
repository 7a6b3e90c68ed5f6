use std::collections::HashSet;

use super::normalize::ListingPage;
use super::types::{FeedError, FeedItem};

/// Observable state of a [`FeedStore`](super::FeedStore).
///
/// Holds one topic at a time. `generation` increases on every topic switch or
/// reset; a page response is only merged if it was requested under the
/// current generation.
#[derive(Debug, Clone, Default)]
pub struct FeedState {
    pub topic: String,
    /// Items in arrival order, unique by id
    pub items: Vec<FeedItem>,
    /// Continuation cursor for the next page; `None` before the first page
    pub after: Option<String>,
    /// Set once the server answered with a null cursor for this topic
    pub exhausted: bool,
    pub is_loading: bool,
    pub error: Option<String>,
    pub(crate) generation: u64,
    pub(crate) in_flight: Option<u64>,
    seen: HashSet<String>,
}

/// What `fetch_next_page` should do after claiming the state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PageStart {
    Fetch {
        generation: u64,
        topic: String,
        after: Option<String>,
    },
    Exhausted,
    Busy,
}

impl FeedState {
    pub(crate) fn new(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            ..Self::default()
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// Linear scan by id; unknown ids miss without scanning.
    pub fn find(&self, id: &str) -> Option<&FeedItem> {
        if !self.contains(id) {
            return None;
        }
        self.items.iter().find(|item| item.id == id)
    }

    /// Drop everything accumulated for the current topic.
    pub(crate) fn reset(&mut self) {
        self.items.clear();
        self.seen.clear();
        self.after = None;
        self.exhausted = false;
        self.is_loading = false;
        self.in_flight = None;
        self.error = None;
        self.generation = self.generation.wrapping_add(1);
    }

    pub(crate) fn begin_page(&mut self, topic: &str) -> PageStart {
        if topic != self.topic {
            tracing::debug!(from = %self.topic, to = %topic, "Switching topic, dropping feed state");
            self.reset();
            self.topic = topic.to_string();
        }

        if self.in_flight == Some(self.generation) {
            return PageStart::Busy;
        }
        if self.exhausted {
            return PageStart::Exhausted;
        }

        self.in_flight = Some(self.generation);
        self.is_loading = true;
        self.error = None;
        PageStart::Fetch {
            generation: self.generation,
            topic: self.topic.clone(),
            after: self.after.clone(),
        }
    }

    /// Merge a page fetched under `generation`, skipping known ids.
    ///
    /// Returns the number of items actually added.
    pub(crate) fn finish_page(
        &mut self,
        generation: u64,
        page: ListingPage,
    ) -> Result<usize, FeedError> {
        if generation != self.generation {
            return Err(FeedError::Superseded);
        }

        let mut added = 0;
        let mut skipped_blank = 0;
        for item in page.items {
            if item.id.is_empty() {
                skipped_blank += 1;
                continue;
            }
            if self.seen.insert(item.id.clone()) {
                self.items.push(item);
                added += 1;
            }
        }
        if skipped_blank > 0 {
            tracing::warn!(topic = %self.topic, skipped = skipped_blank, "Items without id skipped");
        }

        self.exhausted = page.after.is_none();
        self.after = page.after;
        self.in_flight = None;
        self.is_loading = false;
        Ok(added)
    }

    /// Record a failed page fetch. Collection and cursor stay as they were.
    pub(crate) fn fail_page(&mut self, generation: u64, error: &FeedError) {
        if generation != self.generation {
            return;
        }
        self.in_flight = None;
        self.is_loading = false;
        self.error = Some(format!("Error fetching posts for {}: {}", self.topic, error));
    }
}
