//! Mutexes with priority inheritance or priority protection
//!
//! The lock state is a single word in the shared heap holding the owner's
//! handle plus two control bits. An uncontended lock or unlock is a single
//! CAS on that word, which clients may run on their own with [`fast_lock`]
//! and [`fast_unlock`]. Contention moves to the core: the contender sets
//! `FLCLAIM`, so the owner has to come back through [`Core::mutex_unlock`],
//! which hands the lock over to the best waiter.
//!
//! An owner that took the lock through the fast path is unknown to the core
//! until someone contends; it is then resolved from the handle found in the
//! lock word.

use core::sync::atomic::{AtomicU32, Ordering};

use evl_api::abi::{MUTEX_FLCEIL, MUTEX_FLCLAIM, fastlock_owner, state};
use evl_api::sched::{FIFO_MAX_PRIO, FIFO_MIN_PRIO};
use evl_api::{Error, FundleT, NO_HANDLE, Result, Timeout, TimeoutMode};

use crate::arena::Key;
use crate::clock::ClockId;
use crate::heap::HeapOffset;
use crate::kernel::Core;
use crate::sched::{SchedClass, weighted_prio};
use crate::thread::{ThreadId, ThreadInfo};
use crate::wait::{Outcome, WaitFlags, WaitOwner, WaitQueueId};

pub type MutexId = Key<Mutex>;

/// Longest chain of lock owners walked for inheritance and cycle detection
pub const MAX_CHAIN_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexProtocol {
    /// The owner inherits the priority of its best waiter
    Inherit,
    /// The owner runs at `ceiling` in the FIFO class while holding the lock
    Protect { ceiling: i32 },
}

pub struct Mutex {
    pub(crate) wq: WaitQueueId,
    /// Location of the lock word
    pub(crate) fastlock: HeapOffset,
    /// State block released with the mutex, if it owns one
    pub(crate) block: Option<HeapOffset>,
    pub(crate) protocol: MutexProtocol,
    pub(crate) owner: Option<ThreadId>,
}

impl Mutex {
    pub fn protocol(&self) -> MutexProtocol {
        self.protocol
    }

    pub fn fastlock_offset(&self) -> HeapOffset {
        self.fastlock
    }

    pub fn wait_queue(&self) -> WaitQueueId {
        self.wq
    }
}

/// Tries to grab a free lock word for `handle`
///
/// Fails with [`Error::Deadlock`] if `handle` already owns it, and with
/// [`Error::Busy`] if the caller has to go through the core.
pub fn fast_lock(word: &AtomicU32, handle: FundleT) -> Result<()> {
    match word.compare_exchange(NO_HANDLE, handle, Ordering::Acquire, Ordering::Relaxed) {
        Ok(_) => Ok(()),
        Err(cur) if fastlock_owner(cur) == handle => Err(Error::Deadlock),
        Err(_) => Err(Error::Busy),
    }
}

/// Releases an uncontended lock word held by `handle`
///
/// Returns false when waiters may be queued or a ceiling is in effect; the
/// owner must then unlock through the core.
pub fn fast_unlock(word: &AtomicU32, handle: FundleT) -> bool {
    word.compare_exchange(handle, NO_HANDLE, Ordering::Release, Ordering::Relaxed)
        .is_ok()
}

pub(crate) fn check_protocol(protocol: MutexProtocol) -> Result<()> {
    match protocol {
        MutexProtocol::Protect { ceiling } if !(FIFO_MIN_PRIO..=FIFO_MAX_PRIO).contains(&ceiling) => {
            Err(Error::InvalidArgument)
        }
        _ => Ok(()),
    }
}

impl Core {
    pub fn create_mutex(&mut self, protocol: MutexProtocol, clock: ClockId) -> Result<MutexId> {
        self.check_running()?;
        check_protocol(protocol)?;
        let block = self.heap.alloc(state::MUTEX_WORDS)?;
        if let MutexProtocol::Protect { ceiling } = protocol {
            self.heap.store(block, state::MUTEX_CEILING, ceiling as u32);
        }
        let fastlock = HeapOffset::from_bytes(block.bytes() + 4 * state::MUTEX_FASTLOCK as u32);
        Ok(self.new_mutex(fastlock, Some(block), protocol, clock))
    }

    /// Sets up a mutex over a lock word living in someone else's state
    pub(crate) fn new_mutex(
        &mut self,
        fastlock: HeapOffset,
        block: Option<HeapOffset>,
        protocol: MutexProtocol,
        clock: ClockId,
    ) -> MutexId {
        let wq = self.new_wait_queue(clock, WaitFlags::PRIO, WaitOwner::Plain);
        let mutex = self.mutexes.insert(Mutex {
            wq,
            fastlock,
            block,
            protocol,
            owner: None,
        });
        self.wait_queues[wq].owner = WaitOwner::Mutex(mutex);
        evl_debug!("evl: mutex {:?} created, {:?}", mutex, protocol);
        mutex
    }

    pub fn mutex(&self, m: MutexId) -> Result<&Mutex> {
        self.mutexes.get(m).ok_or(Error::NotFound)
    }

    /// Deletes a mutex; its waiters wake up with [`Error::Deleted`]
    pub fn destroy_mutex(&mut self, m: MutexId) -> Result<()> {
        self.mutex(m)?;
        self.drop_mutex(m);
        self.schedule();
        Ok(())
    }

    pub(crate) fn drop_mutex(&mut self, m: MutexId) {
        let Some(mutex) = self.mutexes.remove(m) else {
            return;
        };
        self.flush_wait_queue(mutex.wq, ThreadInfo::RMID);
        self.wait_queues.remove(mutex.wq);
        if let Some(owner) = mutex.owner {
            if let Some(t) = self.threads.get_mut(owner) {
                t.owned.retain(|&x| x != m);
                self.adjust_priority(owner);
            }
        }
        if let Some(block) = mutex.block {
            self.heap.free(block, state::MUTEX_WORDS);
        }
        evl_debug!("evl: mutex {:?} destroyed", m);
    }

    /// Current owner as seen in the lock word
    pub fn mutex_owner(&self, m: MutexId) -> Result<Option<ThreadId>> {
        let mutex = self.mutex(m)?;
        let handle = fastlock_owner(self.heap.load(mutex.fastlock, 0));
        if handle == NO_HANDLE {
            return Ok(None);
        }
        self.resolve_owner(mutex, handle).map(Some)
    }

    /// Locks `m` for `caller`, sleeping until it is handed over if busy
    ///
    /// On [`Outcome::Blocked`], the caller owns the lock once
    /// [`wait_result`](Core::wait_result) reports success.
    pub fn mutex_lock(
        &mut self,
        m: MutexId,
        caller: ThreadId,
        timeout: Timeout,
        mode: TimeoutMode,
    ) -> Result<Outcome> {
        self.check_oob_caller(caller)?;
        self.lock_mutex(m, caller, timeout, mode)
    }

    /// Locks `m` if free, fails with [`Error::Busy`] otherwise
    pub fn mutex_trylock(&mut self, m: MutexId, caller: ThreadId) -> Result<()> {
        self.check_oob_caller(caller)?;
        match self.lock_mutex(m, caller, Timeout::NONBLOCK, TimeoutMode::Relative) {
            Ok(_) => Ok(()),
            Err(Error::WouldBlock) => Err(Error::Busy),
            Err(e) => Err(e),
        }
    }

    pub fn mutex_unlock(&mut self, m: MutexId, caller: ThreadId) -> Result<()> {
        self.check_oob_caller(caller)?;
        self.unlock_mutex(m, caller)?;
        self.schedule();
        Ok(())
    }

    pub(crate) fn lock_mutex(
        &mut self,
        m: MutexId,
        caller: ThreadId,
        timeout: Timeout,
        mode: TimeoutMode,
    ) -> Result<Outcome> {
        let mutex = self.mutex(m)?;
        let (wq, fastlock) = (mutex.wq, mutex.fastlock);
        let handle = self.threads[caller].handle;
        let heap = self.heap.clone();
        let word = heap.word(fastlock, 0).ok_or(Error::InvalidArgument)?;

        match fast_lock(word, handle) {
            Ok(()) => {
                self.commit_owner(m, caller);
                self.adjust_priority(caller);
                return Ok(Outcome::Completed);
            }
            Err(Error::Busy) => {}
            Err(e) => return Err(e),
        }
        if timeout.is_nonblock() {
            return Err(Error::WouldBlock);
        }

        let owner_handle = fastlock_owner(word.load(Ordering::Acquire));
        let owner = self.resolve_owner(&self.mutexes[m], owner_handle)?;
        if self.closes_cycle(owner, caller) {
            return Err(Error::Deadlock);
        }
        if self.mutexes[m].owner != Some(owner) {
            self.commit_owner(m, owner);
        }

        // from now on the owner must unlock through the core
        word.fetch_or(MUTEX_FLCLAIM, Ordering::AcqRel);
        self.block_on(wq, caller, timeout, mode)?;
        self.adjust_priority(owner);
        self.schedule();
        Ok(Outcome::Blocked)
    }

    pub(crate) fn unlock_mutex(&mut self, m: MutexId, caller: ThreadId) -> Result<()> {
        let mutex = self.mutex(m)?;
        let recorded = mutex.owner == Some(caller);
        let fastlock = mutex.fastlock;
        let handle = self.threads[caller].handle;
        let heap = self.heap.clone();
        let word = heap.word(fastlock, 0).ok_or(Error::InvalidArgument)?;

        if fastlock_owner(word.load(Ordering::Acquire)) != handle {
            return Err(Error::NotOwner);
        }
        if !recorded {
            if fast_unlock(word, handle) {
                return Ok(());
            }
            self.commit_owner(m, caller);
        }
        self.release_mutex(m, caller);
        Ok(())
    }

    /// Finds the thread behind an owner handle
    ///
    /// The recorded owner is trusted only while its handle still matches the
    /// lock word.
    fn resolve_owner(&self, mutex: &Mutex, handle: FundleT) -> Result<ThreadId> {
        if let Some(owner) = mutex.owner {
            if self.threads.get(owner).is_some_and(|t| t.handle == handle) {
                return Ok(owner);
            }
        }
        self.handles.get(&handle).copied().ok_or(Error::OwnerDead)
    }

    /// Records `owner` as holding `m`
    fn commit_owner(&mut self, m: MutexId, owner: ThreadId) {
        let mutex = &mut self.mutexes[m];
        if let Some(prev) = mutex.owner.replace(owner) {
            if let Some(t) = self.threads.get_mut(prev) {
                t.owned.retain(|&x| x != m);
            }
        }
        if let MutexProtocol::Protect { .. } = mutex.protocol {
            if let Some(word) = self.heap.word(mutex.fastlock, 0) {
                word.fetch_or(MUTEX_FLCEIL, Ordering::AcqRel);
            }
        }
        let owned = &mut self.threads[owner].owned;
        if !owned.contains(&m) {
            owned.push(m);
        }
    }

    /// Gives up `m` on behalf of `owner`, handing it to the top waiter
    pub(crate) fn release_mutex(&mut self, m: MutexId, owner: ThreadId) {
        self.threads[owner].owned.retain(|&x| x != m);
        let Some(mutex) = self.mutexes.get(m) else {
            self.adjust_priority(owner);
            return;
        };
        let (wq, fastlock, protocol) = (mutex.wq, mutex.fastlock, mutex.protocol);

        let next = self.top_waiter(wq);
        let value = match next {
            Some(next) => {
                self.wake_waiter(wq, Some(next), ThreadInfo::WAKEN);
                self.mutexes[m].owner = Some(next);
                self.threads[next].owned.push(m);
                let mut value = self.threads[next].handle;
                if !self.wait_queues[wq].is_empty() {
                    value |= MUTEX_FLCLAIM;
                }
                if let MutexProtocol::Protect { .. } = protocol {
                    value |= MUTEX_FLCEIL;
                }
                value
            }
            None => {
                self.mutexes[m].owner = None;
                NO_HANDLE
            }
        };
        self.heap.store(fastlock, 0, value);

        if let Some(next) = next {
            self.adjust_priority(next);
        }
        self.adjust_priority(owner);
    }

    /// Priority a thread should run at given the mutexes it holds
    ///
    /// `None` when no held mutex calls for more than the base priority. An
    /// inherited priority keeps the owner in its base class when the waiter
    /// runs in that class too, otherwise the owner moves to Fifo.
    fn boost_target(&self, tid: ThreadId) -> Option<(SchedClass, i32)> {
        let t = &self.threads[tid];
        let base = weighted_prio(t.base_class, t.bprio);
        let mut best: Option<(i32, SchedClass, i32)> = None;
        for &m in &t.owned {
            let Some(mutex) = self.mutexes.get(m) else {
                continue;
            };
            if fastlock_owner(self.heap.load(mutex.fastlock, 0)) != t.handle {
                continue;
            }
            let candidate = match mutex.protocol {
                MutexProtocol::Protect { ceiling } => {
                    let prio = SchedClass::Fifo.ceilprio(ceiling);
                    Some((weighted_prio(SchedClass::Fifo, prio), SchedClass::Fifo, prio))
                }
                MutexProtocol::Inherit => self.top_waiter(mutex.wq).map(|w| {
                    let w = &self.threads[w];
                    let class = if w.sched_class == t.base_class {
                        t.base_class
                    } else {
                        SchedClass::Fifo
                    };
                    (w.wprio(), class, w.cprio)
                }),
            };
            if let Some(candidate) = candidate {
                if best.is_none_or(|(wprio, _, _)| candidate.0 > wprio) {
                    best = Some(candidate);
                }
            }
        }
        best.filter(|&(wprio, _, _)| wprio > base)
            .map(|(_, class, prio)| (class, prio))
    }

    /// Re-evaluates the effective priority of `tid`, then of the owners it
    /// waits for as long as something changes
    pub(crate) fn adjust_priority(&mut self, tid: ThreadId) {
        let mut tid = tid;
        for _ in 0..MAX_CHAIN_DEPTH {
            if !self.threads.contains(tid) {
                return;
            }
            let boost = self.boost_target(tid);
            if !self.class_trackprio(tid, boost) {
                return;
            }
            match self.waited_mutex_owner(tid) {
                Some(owner) => tid = owner,
                None => return,
            }
        }
        evl_warn!("evl: lock chain deeper than {} threads", MAX_CHAIN_DEPTH);
    }

    /// Forwards a priority change of a lock waiter to the lock owner
    pub(crate) fn propagate_priority(&mut self, waiter: ThreadId) {
        if let Some(owner) = self.waited_mutex_owner(waiter) {
            self.adjust_priority(owner);
        }
    }

    /// Owner of the mutex `tid` sleeps on, if any
    fn waited_mutex_owner(&self, tid: ThreadId) -> Option<ThreadId> {
        let wq = self.threads.get(tid)?.wchan?;
        match self.wait_queues.get(wq)?.owner {
            WaitOwner::Mutex(m) => self.mutexes.get(m)?.owner,
            WaitOwner::Plain => None,
        }
    }

    /// Tells whether `caller` waiting for `owner` would close a wait cycle
    fn closes_cycle(&self, owner: ThreadId, caller: ThreadId) -> bool {
        let mut tid = owner;
        for _ in 0..MAX_CHAIN_DEPTH {
            if tid == caller {
                return true;
            }
            match self.waited_mutex_owner(tid) {
                Some(next) => tid = next,
                None => return false,
            }
        }
        false
    }

    /// A waiter left `m` early: the owner may no longer need its boost
    pub(crate) fn mutex_waiter_left(&mut self, m: MutexId) {
        if let Some(owner) = self.mutexes.get(m).and_then(|mutex| mutex.owner) {
            self.adjust_priority(owner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_lock_word() {
        let word = AtomicU32::new(NO_HANDLE);
        assert_eq!(fast_lock(&word, 7), Ok(()));
        assert_eq!(fast_lock(&word, 7), Err(Error::Deadlock));
        assert_eq!(fast_lock(&word, 9), Err(Error::Busy));
        assert!(!fast_unlock(&word, 9));
        assert!(fast_unlock(&word, 7));
        assert_eq!(word.load(Ordering::Relaxed), NO_HANDLE);
    }

    #[test]
    fn test_claimed_word_needs_slow_unlock() {
        let word = AtomicU32::new(7 | MUTEX_FLCLAIM);
        assert_eq!(fast_lock(&word, 7), Err(Error::Deadlock));
        assert!(!fast_unlock(&word, 7));
    }

    #[test]
    fn test_ceiling_range() {
        assert!(check_protocol(MutexProtocol::Inherit).is_ok());
        assert!(check_protocol(MutexProtocol::Protect { ceiling: 99 }).is_ok());
        assert_eq!(
            check_protocol(MutexProtocol::Protect { ceiling: 0 }),
            Err(Error::InvalidArgument)
        );
        assert_eq!(
            check_protocol(MutexProtocol::Protect { ceiling: 100 }),
            Err(Error::InvalidArgument)
        );
    }
}
