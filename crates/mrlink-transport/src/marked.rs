//! Packet-boundary bookkeeping for buffered byte streams.
//!
//! A [`MarkedQueue`] mirrors a byte buffer item-for-item without storing the
//! bytes. Items are either marked (the first byte of a packet) or unmarked.
//! Transports that know where packets begin use it to answer
//! [`crate::Transport::might_be_at_packet_start`] and to implement
//! [`crate::Transport::skip_to_likely_packet_start`].

use std::collections::VecDeque;

/// A queue of indistinguishable items, some of which are marked.
///
/// Internally each entry of `counts_to_marks` is the number of items up to
/// and including the next mark; `unmarked_at_end` counts trailing unmarked
/// items.
#[derive(Debug, Clone, Default)]
pub struct MarkedQueue {
    counts_to_marks: VecDeque<usize>,
    unmarked_at_end: usize,
    len: usize,
}

impl MarkedQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of items, marked or not.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.counts_to_marks.is_empty() && self.unmarked_at_end == 0
    }

    /// Whether any marked item remains.
    pub fn has_marked_item(&self) -> bool {
        !self.counts_to_marks.is_empty()
    }

    /// Whether the head item is marked.
    pub fn is_at_marked_item(&self) -> bool {
        self.counts_to_marks.front() == Some(&1)
    }

    pub fn clear(&mut self) {
        self.counts_to_marks.clear();
        self.unmarked_at_end = 0;
        self.len = 0;
    }

    /// Append one marked item.
    pub fn add_marked_item(&mut self) {
        self.counts_to_marks.push_back(self.unmarked_at_end + 1);
        self.unmarked_at_end = 0;
        self.len += 1;
    }

    /// Append `count` unmarked items.
    pub fn add_unmarked_items(&mut self, count: usize) {
        self.unmarked_at_end += count;
        self.len += count;
    }

    /// Remove items from the head until the head is marked, or everything if
    /// no mark remains. Returns the number of items removed.
    pub fn remove_up_to_next_marked_item_or_end(&mut self) -> usize {
        let removed = match self.counts_to_marks.front_mut() {
            Some(count) => {
                let removed = *count - 1;
                *count = 1;
                removed
            }
            None => std::mem::take(&mut self.unmarked_at_end),
        };
        self.len -= removed;
        removed
    }

    /// Remove `count` items from the head.
    ///
    /// # Panics
    ///
    /// Panics if `count` exceeds [`len`](Self::len).
    pub fn remove_items(&mut self, mut count: usize) {
        assert!(
            count <= self.len,
            "remove count must be <= len: count={count}, len={}",
            self.len
        );

        while count > 0 {
            let Some(next) = self.counts_to_marks.pop_front() else {
                break;
            };
            if count >= next {
                count -= next;
                self.len -= next;
            } else {
                self.counts_to_marks.push_front(next - count);
                self.len -= count;
                return;
            }
        }

        let trailing = self.unmarked_at_end.min(count);
        self.unmarked_at_end -= trailing;
        self.len -= trailing;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(queue: &mut MarkedQueue, len: usize) {
        queue.add_marked_item();
        queue.add_unmarked_items(len - 1);
    }

    #[test]
    fn empty_queue() {
        let queue = MarkedQueue::new();
        assert!(queue.is_empty());
        assert!(!queue.has_marked_item());
        assert!(!queue.is_at_marked_item());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn head_of_packet_is_marked() {
        let mut queue = MarkedQueue::new();
        packet(&mut queue, 5);
        assert!(queue.is_at_marked_item());
        assert_eq!(queue.len(), 5);

        queue.remove_items(1);
        assert!(!queue.is_at_marked_item());
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn skip_to_next_packet() {
        let mut queue = MarkedQueue::new();
        packet(&mut queue, 5);
        packet(&mut queue, 7);

        queue.remove_items(2);
        let removed = queue.remove_up_to_next_marked_item_or_end();
        assert_eq!(removed, 3);
        assert!(queue.is_at_marked_item());
        assert_eq!(queue.len(), 7);
    }

    #[test]
    fn skip_with_no_marks_eats_everything() {
        let mut queue = MarkedQueue::new();
        queue.add_unmarked_items(9);
        assert_eq!(queue.remove_up_to_next_marked_item_or_end(), 9);
        assert!(queue.is_empty());
    }

    #[test]
    fn skip_when_already_at_mark_removes_nothing() {
        let mut queue = MarkedQueue::new();
        packet(&mut queue, 3);
        assert_eq!(queue.remove_up_to_next_marked_item_or_end(), 0);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn remove_across_packets() {
        let mut queue = MarkedQueue::new();
        packet(&mut queue, 5);
        packet(&mut queue, 5);
        queue.add_unmarked_items(2);

        queue.remove_items(5);
        assert!(queue.is_at_marked_item());

        queue.remove_items(7);
        assert!(queue.is_empty());
    }

    #[test]
    #[should_panic(expected = "remove count must be <= len")]
    fn remove_more_than_len_panics() {
        let mut queue = MarkedQueue::new();
        queue.add_unmarked_items(1);
        queue.remove_items(2);
    }
}
