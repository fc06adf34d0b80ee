//! Queue of pause/unpause events arriving while enumeration is in progress.
//!
//! Enumeration (`list` + `inspect` per container) is not atomic: a pause or
//! unpause event for a container already visited (or not yet visited) during
//! that window must not be applied directly to the in-progress build, since
//! whichever snapshot wins the race could silently lose it. Instead it is
//! recorded here and replayed against the freshly-built `Portfolio` right
//! after enumeration completes and before the snapshot is published.

/// At most one entry per container id: a later pause/unpause for the same
/// id overwrites the earlier one rather than queuing both.
#[derive(Default)]
pub struct PendingPauseQueue {
    entries: Vec<(String, bool)>,
}

impl PendingPauseQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts the pending pause state for `id`.
    pub fn add(&mut self, id: impl Into<String>, paused: bool) {
        let id = id.into();
        match self.entries.iter_mut().find(|(entry_id, _)| *entry_id == id) {
            Some(entry) => entry.1 = paused,
            None => self.entries.push((id, paused)),
        }
    }

    /// Removes and returns the pending state for `id`, if any. Does not
    /// preserve order among remaining entries.
    pub fn remove(&mut self, id: &str) -> Option<bool> {
        let index = self.entries.iter().position(|(entry_id, _)| entry_id == id)?;
        Some(self.entries.swap_remove(index).1)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Drains all entries for replay, leaving the queue empty.
    pub fn drain(&mut self) -> Vec<(String, bool)> {
        std::mem::take(&mut self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_upsert_per_id() {
        let mut q = PendingPauseQueue::new();
        q.add("a", true);
        q.add("a", false);
        assert_eq!(q.len(), 1);
        assert_eq!(q.remove("a"), Some(false));
    }

    #[test]
    fn remove_missing_is_none() {
        let mut q = PendingPauseQueue::new();
        assert_eq!(q.remove("missing"), None);
    }

    #[test]
    fn drain_empties_and_returns_all() {
        let mut q = PendingPauseQueue::new();
        q.add("a", true);
        q.add("b", false);
        let drained = q.drain();
        assert_eq!(drained.len(), 2);
        assert!(q.is_empty());
    }

    #[test]
    fn distinct_ids_coexist() {
        let mut q = PendingPauseQueue::new();
        q.add("a", true);
        q.add("b", true);
        assert_eq!(q.len(), 2);
    }
}
