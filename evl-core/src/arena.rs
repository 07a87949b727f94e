//! Generation-checked object arena
//!
//! Core objects (threads, wait queues, timers, synchronization elements) live
//! in arenas and refer to each other through [`Key`]s. A key carries the stamp
//! of the object it was issued for, so a key kept past the object's removal is
//! rejected instead of aliasing whatever reuses the slot.

use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;
use core::ops::{Index, IndexMut};

use slab::Slab;

/// Typed, generation-checked reference into an [`Arena`]
pub struct Key<T> {
    index: u32,
    stamp: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Key<T> {
    const fn new(index: u32, stamp: u32) -> Self {
        Self {
            index,
            stamp,
            _marker: PhantomData,
        }
    }

    /// Slot index, stable for the lifetime of the object
    pub const fn index(&self) -> u32 {
        self.index
    }
}

impl<T> Clone for Key<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Key<T> {}

impl<T> PartialEq for Key<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.stamp == other.stamp
    }
}

impl<T> Eq for Key<T> {}

impl<T> PartialOrd for Key<T> {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Key<T> {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        (self.index, self.stamp).cmp(&(other.index, other.stamp))
    }
}

impl<T> Hash for Key<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.stamp.hash(state);
    }
}

impl<T> fmt::Debug for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.stamp)
    }
}

struct Entry<T> {
    stamp: u32,
    value: T,
}

/// Slot map over a [`Slab`]
pub struct Arena<T> {
    slots: Slab<Entry<T>>,
    next_stamp: u32,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub const fn new() -> Self {
        Self {
            slots: Slab::new(),
            next_stamp: 1,
        }
    }

    fn bump_stamp(&mut self) -> u32 {
        let stamp = self.next_stamp;
        self.next_stamp = self.next_stamp.wrapping_add(1).max(1);
        stamp
    }

    pub fn insert(&mut self, value: T) -> Key<T> {
        self.insert_with(|_| value)
    }

    /// Inserts a value built from its own key
    pub fn insert_with(&mut self, make: impl FnOnce(Key<T>) -> T) -> Key<T> {
        let stamp = self.bump_stamp();
        let entry = self.slots.vacant_entry();
        let key = Key::new(entry.key() as u32, stamp);
        entry.insert(Entry {
            stamp,
            value: make(key),
        });
        key
    }

    pub fn get(&self, key: Key<T>) -> Option<&T> {
        match self.slots.get(key.index as usize) {
            Some(entry) if entry.stamp == key.stamp => Some(&entry.value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, key: Key<T>) -> Option<&mut T> {
        match self.slots.get_mut(key.index as usize) {
            Some(entry) if entry.stamp == key.stamp => Some(&mut entry.value),
            _ => None,
        }
    }

    pub fn contains(&self, key: Key<T>) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: Key<T>) -> Option<T> {
        if !self.contains(key) {
            return None;
        }
        Some(self.slots.remove(key.index as usize).value)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = Key<T>> + '_ {
        self.slots
            .iter()
            .map(|(index, entry)| Key::new(index as u32, entry.stamp))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Key<T>, &T)> + '_ {
        self.slots
            .iter()
            .map(|(index, entry)| (Key::new(index as u32, entry.stamp), &entry.value))
    }
}

/// Internal access on keys known to be live; a stale key is a core bug
impl<T> Index<Key<T>> for Arena<T> {
    type Output = T;

    fn index(&self, key: Key<T>) -> &T {
        match self.get(key) {
            Some(value) => value,
            None => panic!("stale arena key {:?}", key),
        }
    }
}

impl<T> IndexMut<Key<T>> for Arena<T> {
    fn index_mut(&mut self, key: Key<T>) -> &mut T {
        match self.get_mut(key) {
            Some(value) => value,
            None => panic!("stale arena key {:?}", key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_key_rejected() {
        let mut arena = Arena::new();
        let a = arena.insert(1u32);
        assert_eq!(arena.remove(a), Some(1));
        let b = arena.insert(2u32);
        // same slot, new stamp
        assert_eq!(a.index(), b.index());
        assert!(arena.get(a).is_none());
        assert_eq!(arena.get(b), Some(&2));
        assert_eq!(arena.remove(a), None);
    }

    #[test]
    fn test_insert_with_sees_own_key() {
        struct Node {
            me: Key<Node>,
        }
        let mut arena = Arena::new();
        let k = arena.insert_with(|me| Node { me });
        assert_eq!(arena[k].me, k);
        assert_eq!(arena.keys().count(), 1);
    }
}
