//! Process-wide shared counters.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Number of active subscribers.
///
/// Written only by the subscriber registry while it holds its transition
/// lock; everyone else reads it to decide whether work has an audience.
#[derive(Debug, Clone, Default)]
pub struct SubscriberCount(Arc<AtomicUsize>);

impl SubscriberCount {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    pub fn has_audience(&self) -> bool {
        self.get() > 0
    }

    pub(crate) fn set(&self, count: usize) {
        self.0.store(count, Ordering::Release);
    }
}
