//! Multilevel priority queue
//!
//! One FIFO per priority level plus a bitmap of non-empty levels, so that
//! finding the highest priority runnable entry is a find-last-set over two
//! words regardless of how many entries are queued.

use alloc::collections::VecDeque;
use core::array;

use evl_api::sched::CORE_MAX_PRIO;

use crate::thread::ThreadId;

/// Number of priority levels: 0..=CORE_MAX_PRIO
pub const PRIO_LEVELS: usize = CORE_MAX_PRIO as usize + 1;
const MAP_WORDS: usize = PRIO_LEVELS.div_ceil(64);

#[derive(Debug)]
pub struct MultiLevelQueue<T = ThreadId> {
    levels: [VecDeque<T>; PRIO_LEVELS],
    bitmap: [u64; MAP_WORDS],
    len: usize,
}

impl<T: Copy + PartialEq> Default for MultiLevelQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy + PartialEq> MultiLevelQueue<T> {
    pub fn new() -> Self {
        Self {
            levels: array::from_fn(|_| VecDeque::new()),
            bitmap: [0; MAP_WORDS],
            len: 0,
        }
    }

    #[inline]
    fn level(prio: i32) -> usize {
        prio.clamp(0, CORE_MAX_PRIO) as usize
    }

    #[inline]
    fn mark(&mut self, level: usize) {
        self.bitmap[level / 64] |= 1u64 << (level % 64);
    }

    #[inline]
    fn unmark_if_empty(&mut self, level: usize) {
        if self.levels[level].is_empty() {
            self.bitmap[level / 64] &= !(1u64 << (level % 64));
        }
    }

    /// Highest non-empty level
    #[inline]
    fn highest_level(&self) -> Option<usize> {
        self.bitmap
            .iter()
            .enumerate()
            .rev()
            .find(|(_, word)| **word != 0)
            .map(|(i, word)| i * 64 + 63 - word.leading_zeros() as usize)
    }

    /// Queues `item` behind its equals
    pub fn add_tail(&mut self, item: T, prio: i32) {
        let level = Self::level(prio);
        self.levels[level].push_back(item);
        self.mark(level);
        self.len += 1;
    }

    /// Queues `item` ahead of its equals (preempted thread keeps its turn)
    pub fn add_head(&mut self, item: T, prio: i32) {
        let level = Self::level(prio);
        self.levels[level].push_front(item);
        self.mark(level);
        self.len += 1;
    }

    /// Unlinks `item` from level `prio`; false if it was not there
    pub fn remove(&mut self, item: T, prio: i32) -> bool {
        let level = Self::level(prio);
        let queue = &mut self.levels[level];
        let Some(pos) = queue.iter().position(|&x| x == item) else {
            return false;
        };
        queue.remove(pos);
        self.unmark_if_empty(level);
        self.len -= 1;
        true
    }

    pub fn peek_highest(&self) -> Option<T> {
        let level = self.highest_level()?;
        self.levels[level].front().copied()
    }

    pub fn pop_highest(&mut self) -> Option<T> {
        let level = self.highest_level()?;
        let item = self.levels[level].pop_front();
        self.unmark_if_empty(level);
        if item.is_some() {
            self.len -= 1;
        }
        item
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Entries from highest to lowest priority, FIFO within a level
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        self.levels.iter().rev().flat_map(|q| q.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_highest_fifo_among_equals() {
        let mut q = MultiLevelQueue::new();
        q.add_tail(1u32, 10);
        q.add_tail(2u32, 99);
        q.add_tail(3u32, 10);
        q.add_tail(4u32, 100);
        assert_eq!(q.pop_highest(), Some(4));
        assert_eq!(q.pop_highest(), Some(2));
        assert_eq!(q.pop_highest(), Some(1));
        assert_eq!(q.pop_highest(), Some(3));
        assert_eq!(q.pop_highest(), None);
        assert!(q.is_empty());
    }

    #[test]
    fn test_add_head_and_remove() {
        let mut q = MultiLevelQueue::new();
        q.add_tail(1u32, 5);
        q.add_head(2u32, 5);
        assert_eq!(q.peek_highest(), Some(2));
        assert!(q.remove(2, 5));
        assert!(!q.remove(2, 5));
        assert_eq!(q.len(), 1);
        assert!(q.remove(1, 5));
        assert_eq!(q.peek_highest(), None);
    }

    #[test]
    fn test_level_zero_and_word_boundary() {
        let mut q = MultiLevelQueue::new();
        q.add_tail(1u32, 0);
        q.add_tail(2u32, 63);
        q.add_tail(3u32, 64);
        assert_eq!(q.iter().collect::<alloc::vec::Vec<_>>(), [3, 2, 1]);
    }

    mod props {
        use super::*;
        use alloc::vec::Vec;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn pops_by_priority_then_arrival(prios in proptest::collection::vec(0i32..=CORE_MAX_PRIO, 0..200)) {
                let mut q = MultiLevelQueue::new();
                for (seq, &prio) in prios.iter().enumerate() {
                    q.add_tail(seq, prio);
                }
                prop_assert_eq!(q.len(), prios.len());

                let mut expected: Vec<usize> = (0..prios.len()).collect();
                expected.sort_by_key(|&seq| (core::cmp::Reverse(prios[seq]), seq));
                let popped: Vec<usize> = core::iter::from_fn(|| q.pop_highest()).collect();
                prop_assert_eq!(popped, expected);
                prop_assert!(q.is_empty());
            }
        }
    }
}
