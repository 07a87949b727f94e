//! Shared state heap
//!
//! Element state that clients read or update without entering the core (the
//! mutex fast-lock word, the semaphore count, monitor flags) lives in a block
//! of atomic words. Element creation hands the byte offset of its state to the
//! client, which runs its lock-free fast paths directly on those words.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use evl_api::{Error, Result};

const WORD_BYTES: u32 = 4;

/// Byte offset of an allocation inside the [`SharedHeap`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapOffset(u32);

impl HeapOffset {
    pub const fn from_bytes(bytes: u32) -> Self {
        HeapOffset(bytes)
    }

    pub const fn bytes(self) -> u32 {
        self.0
    }

    const fn word(self) -> usize {
        (self.0 / WORD_BYTES) as usize
    }
}

/// First-fit word allocator over a fixed block of atomic words
pub struct SharedHeap {
    words: Box<[AtomicU32]>,
    // free extents as (first word, length), sorted and coalesced
    free: spin::Mutex<Vec<(usize, usize)>>,
}

impl SharedHeap {
    pub fn new(nr_words: usize) -> Self {
        let words = (0..nr_words).map(|_| AtomicU32::new(0)).collect();
        Self {
            words,
            free: spin::Mutex::new(alloc::vec![(0, nr_words)]),
        }
    }

    /// Total size in words
    pub fn capacity(&self) -> usize {
        self.words.len()
    }

    /// Number of words still available
    pub fn available(&self) -> usize {
        self.free.lock().iter().map(|&(_, len)| len).sum()
    }

    /// Allocates `nr` zeroed words
    pub fn alloc(&self, nr: usize) -> Result<HeapOffset> {
        if nr == 0 {
            return Err(Error::InvalidArgument);
        }
        let mut free = self.free.lock();
        let slot = free
            .iter()
            .position(|&(_, len)| len >= nr)
            .ok_or(Error::NoSpace)?;
        let (start, len) = free[slot];
        if len == nr {
            free.remove(slot);
        } else {
            free[slot] = (start + nr, len - nr);
        }
        drop(free);
        for word in &self.words[start..start + nr] {
            word.store(0, Ordering::Relaxed);
        }
        Ok(HeapOffset((start as u32) * WORD_BYTES))
    }

    pub fn free(&self, offset: HeapOffset, nr: usize) {
        let start = offset.word();
        if evl_warn_on!(start + nr > self.words.len()) {
            return;
        }
        let mut free = self.free.lock();
        let pos = free.partition_point(|&(s, _)| s < start);
        free.insert(pos, (start, nr));
        // merge with the following extent, then with the preceding one
        if pos + 1 < free.len() && free[pos].0 + free[pos].1 == free[pos + 1].0 {
            free[pos].1 += free[pos + 1].1;
            free.remove(pos + 1);
        }
        if pos > 0 && free[pos - 1].0 + free[pos - 1].1 == free[pos].0 {
            free[pos - 1].1 += free[pos].1;
            free.remove(pos);
        }
    }

    /// Word `index` of the allocation at `offset`, `None` past the heap end
    pub fn word(&self, offset: HeapOffset, index: usize) -> Option<&AtomicU32> {
        self.words.get(offset.word() + index)
    }

    pub(crate) fn load(&self, offset: HeapOffset, index: usize) -> u32 {
        self.word(offset, index)
            .map_or(0, |w| w.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, offset: HeapOffset, index: usize, value: u32) {
        if let Some(w) = self.word(offset, index) {
            w.store(value, Ordering::Release);
        }
    }
}
