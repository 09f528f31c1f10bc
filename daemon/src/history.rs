use std::collections::VecDeque;

/// Number of entries retained per hook for both text and pattern history.
pub const MAX_STORE_COUNT: usize = 16;

/// Fixed-capacity FIFO history.
///
/// Holds at most `capacity` entries. When full, the oldest entry is evicted to
/// make room for the newest, so iteration always yields arrival order.
#[derive(Debug, Clone)]
pub struct BoundedHistory<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedHistory<T> {
    /// Creates an empty history. A capacity of zero is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Pushes a new entry, evicting the oldest if the history is at capacity.
    pub fn push(&mut self, entry: T) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Most recent entry, if any.
    pub fn last(&self) -> Option<&T> {
        self.entries.back()
    }

    /// All entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> Default for BoundedHistory<T> {
    fn default() -> Self {
        Self::new(MAX_STORE_COUNT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── push / eviction ───────────────────────────────────────────────────────

    #[test]
    fn push_into_empty_history() {
        let mut h = BoundedHistory::new(4);
        assert!(h.is_empty());
        h.push("a");
        assert_eq!(h.len(), 1);
        assert_eq!(h.last(), Some(&"a"));
    }

    #[test]
    fn push_does_not_exceed_capacity() {
        let mut h = BoundedHistory::default();
        for i in 0..MAX_STORE_COUNT * 3 {
            h.push(i);
        }
        assert_eq!(h.len(), MAX_STORE_COUNT);
    }

    #[test]
    fn overflow_keeps_most_recent_in_arrival_order() {
        let mut h = BoundedHistory::default();
        for i in 0..MAX_STORE_COUNT + 5 {
            h.push(i);
        }
        let kept: Vec<usize> = h.iter().copied().collect();
        let expected: Vec<usize> = (5..MAX_STORE_COUNT + 5).collect();
        assert_eq!(kept, expected);
    }

    #[test]
    fn exactly_at_capacity_evicts_nothing() {
        let mut h = BoundedHistory::new(3);
        h.push(1);
        h.push(2);
        h.push(3);
        assert_eq!(h.iter().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    // ── capacity ──────────────────────────────────────────────────────────────

    #[test]
    fn zero_capacity_is_bumped_to_one() {
        let mut h = BoundedHistory::new(0);
        assert_eq!(h.capacity(), 1);
        h.push('x');
        h.push('y');
        assert_eq!(h.len(), 1);
        assert_eq!(h.last(), Some(&'y'));
    }

    #[test]
    fn default_uses_store_count() {
        let h: BoundedHistory<String> = BoundedHistory::default();
        assert_eq!(h.capacity(), MAX_STORE_COUNT);
        assert!(h.last().is_none());
    }
}
