//! Wait queues
//!
//! A wait queue keeps blocked threads in arrival order, or by weighted
//! priority when created with [`WaitFlags::PRIO`]. The queue's owner decides
//! what happens when a waiter leaves abnormally (timeout, forced break): for
//! a mutex, the priority of the lock owner is re-evaluated.
//!
//! Blocking never suspends the caller in place. [`Core::wait_timeout`]
//! returns [`Outcome::Blocked`] once the caller is off its run queue, and the
//! reason it was later woken is read back with [`Core::wait_result`].

use alloc::collections::VecDeque;

use bitflags::bitflags;
use evl_api::{Error, Result, Timeout, TimeoutMode};

use crate::arena::Key;
use crate::clock::ClockId;
use crate::kernel::Core;
use crate::sync::mutex::MutexId;
use crate::thread::{ThreadId, ThreadInfo, ThreadState};

pub type WaitQueueId = Key<WaitQueue>;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct WaitFlags: u32 {
        /// Order waiters by weighted priority instead of arrival
        const PRIO = 1 << 0;
    }
}

/// Object a wait queue belongs to, selecting its abort and reorder hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOwner {
    Plain,
    Mutex(MutexId),
}

/// Immediate result of a blocking service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Done without sleeping
    Completed,
    /// The caller sleeps; see [`Core::wait_result`] once it runs again
    Blocked,
}

pub struct WaitQueue {
    pub(crate) flags: WaitFlags,
    pub(crate) clock: ClockId,
    pub(crate) waiters: VecDeque<ThreadId>,
    pub(crate) owner: WaitOwner,
}

impl WaitQueue {
    pub fn flags(&self) -> WaitFlags {
        self.flags
    }

    pub fn clock(&self) -> ClockId {
        self.clock
    }

    pub fn waiters(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.waiters.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }
}

impl Core {
    pub fn create_wait_queue(&mut self, clock: ClockId, flags: WaitFlags) -> WaitQueueId {
        self.new_wait_queue(clock, flags, WaitOwner::Plain)
    }

    pub(crate) fn new_wait_queue(&mut self, clock: ClockId, flags: WaitFlags, owner: WaitOwner) -> WaitQueueId {
        self.wait_queues.insert(WaitQueue {
            flags,
            clock,
            waiters: VecDeque::new(),
            owner,
        })
    }

    pub fn wait_queue(&self, wq: WaitQueueId) -> Result<&WaitQueue> {
        self.wait_queues.get(wq).ok_or(Error::NotFound)
    }

    /// Deletes a wait queue, waking its waiters with the deleted reason
    pub fn destroy_wait_queue(&mut self, wq: WaitQueueId) -> Result<()> {
        self.wait_queue(wq)?;
        self.flush_wait_queue(wq, ThreadInfo::RMID);
        self.wait_queues.remove(wq);
        self.schedule();
        Ok(())
    }

    /// Blocks the calling thread on `wq`
    pub fn wait_timeout(
        &mut self,
        wq: WaitQueueId,
        caller: ThreadId,
        timeout: Timeout,
        mode: TimeoutMode,
    ) -> Result<Outcome> {
        self.check_oob_caller(caller)?;
        self.wait_queue(wq)?;
        self.block_on(wq, caller, timeout, mode)?;
        self.schedule();
        Ok(Outcome::Blocked)
    }

    /// Reason the last wait of `tid` ended
    pub fn wait_result(&self, tid: ThreadId) -> Result<()> {
        self.thread(tid)?.info.to_result()
    }

    /// Wakes one waiter: `tid` if given, else the head of the queue
    ///
    /// The woken thread is made runnable; switching to it is left to the
    /// next [`schedule`](Core::schedule).
    pub fn wake_up(&mut self, wq: WaitQueueId, tid: Option<ThreadId>) -> Result<Option<ThreadId>> {
        self.wait_queue(wq)?;
        Ok(self.wake_waiter(wq, tid, ThreadInfo::WAKEN))
    }

    /// Wakes all waiters with `reason`; returns how many were woken
    pub fn flush_wait(&mut self, wq: WaitQueueId, reason: ThreadInfo) -> Result<usize> {
        self.wait_queue(wq)?;
        Ok(self.flush_wait_queue(wq, reason))
    }

    /// Sleeps `tid` on `wq`
    ///
    /// Both timeout sentinels are handled before anything changes: a
    /// non-blocking request fails with `WouldBlock` and a date already in
    /// the past fails with `TimedOut` right away.
    pub(crate) fn block_on(
        &mut self,
        wq: WaitQueueId,
        tid: ThreadId,
        timeout: Timeout,
        mode: TimeoutMode,
    ) -> Result<()> {
        if timeout.is_nonblock() {
            return Err(Error::WouldBlock);
        }
        let clock = self.wait_queues[wq].clock;
        let date = if timeout.is_infinite() {
            None
        } else {
            let date = match mode {
                TimeoutMode::Relative => self.now().saturating_add(timeout.ticks()),
                TimeoutMode::Absolute => self.clock.to_monotonic(clock, timeout.ticks()),
            };
            if date <= self.now() {
                return Err(Error::TimedOut);
            }
            Some(date)
        };

        let t = &mut self.threads[tid];
        t.info = ThreadInfo::empty();
        t.wchan = Some(wq);
        self.insert_waiter(wq, tid);
        self.block_thread(tid, ThreadState::PEND, date);
        Ok(())
    }

    fn insert_waiter(&mut self, wq: WaitQueueId, tid: ThreadId) {
        let wprio = self.threads[tid].wprio();
        let q = &mut self.wait_queues[wq];
        if q.flags.contains(WaitFlags::PRIO) {
            let threads = &self.threads;
            let pos = q
                .waiters
                .iter()
                .position(|&w| threads[w].wprio() < wprio)
                .unwrap_or(q.waiters.len());
            q.waiters.insert(pos, tid);
        } else {
            q.waiters.push_back(tid);
        }
    }

    fn unlink_waiter(&mut self, wq: WaitQueueId, tid: ThreadId) -> bool {
        let Some(q) = self.wait_queues.get_mut(wq) else {
            return false;
        };
        match q.waiters.iter().position(|&w| w == tid) {
            Some(pos) => {
                q.waiters.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Unlinks and readies one waiter
    pub(crate) fn wake_waiter(
        &mut self,
        wq: WaitQueueId,
        tid: Option<ThreadId>,
        info: ThreadInfo,
    ) -> Option<ThreadId> {
        let q = &mut self.wait_queues[wq];
        let tid = match tid {
            Some(tid) => {
                let pos = q.waiters.iter().position(|&w| w == tid)?;
                q.waiters.remove(pos)?
            }
            None => q.waiters.pop_front()?,
        };
        self.threads[tid].wchan = None;
        self.release_thread(tid, ThreadState::PEND | ThreadState::DELAY, info);
        Some(tid)
    }

    pub(crate) fn flush_wait_queue(&mut self, wq: WaitQueueId, reason: ThreadInfo) -> usize {
        let mut count = 0;
        while self.wake_waiter(wq, None, reason).is_some() {
            count += 1;
        }
        if count > 0 {
            evl_debug!("evl: flushed {} waiter(s) with {:?}", count, reason);
        }
        count
    }

    /// Pulls a thread out of the wait queue it sleeps on, if any
    ///
    /// Runs the owner's abort hook. The caller still has to release the
    /// thread with the reason of its choice.
    pub(crate) fn abort_wait(&mut self, tid: ThreadId) {
        let Some(wq) = self.threads[tid].wchan.take() else {
            return;
        };
        if !self.unlink_waiter(wq, tid) {
            return;
        }
        if let WaitOwner::Mutex(mutex) = self.wait_queues[wq].owner {
            self.mutex_waiter_left(mutex);
        }
    }

    /// Moves a waiter whose priority changed to its new rank
    ///
    /// Propagating the change to a lock owner is up to the caller.
    pub(crate) fn requeue_waiter(&mut self, tid: ThreadId) {
        let Some(wq) = self.threads[tid].wchan else {
            return;
        };
        let q = &self.wait_queues[wq];
        if q.flags.contains(WaitFlags::PRIO) && self.unlink_waiter(wq, tid) {
            self.insert_waiter(wq, tid);
        }
    }

    /// Highest ranked waiter of `wq`
    pub(crate) fn top_waiter(&self, wq: WaitQueueId) -> Option<ThreadId> {
        let q = self.wait_queues.get(wq)?;
        if q.flags.contains(WaitFlags::PRIO) {
            q.waiters.front().copied()
        } else {
            // first of the best in arrival order
            q.waiters
                .iter()
                .rev()
                .copied()
                .max_by_key(|&w| self.threads[w].wprio())
        }
    }
}
