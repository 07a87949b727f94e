//! Counting semaphores
//!
//! The count lives in the shared heap so clients can read it. A `put` with
//! sleepers hands the unit straight to the first one instead of raising the
//! count, so a thread woken by `put` never competes for it again.

use evl_api::abi::{SemFlags, state};
use evl_api::{Error, Result, Timeout, TimeoutMode};

use crate::arena::Key;
use crate::clock::ClockId;
use crate::heap::HeapOffset;
use crate::kernel::Core;
use crate::thread::{ThreadId, ThreadInfo};
use crate::wait::{Outcome, WaitFlags, WaitOwner, WaitQueueId};

pub type SemId = Key<Semaphore>;

pub struct Semaphore {
    pub(crate) wq: WaitQueueId,
    pub(crate) state: HeapOffset,
    pub(crate) flags: SemFlags,
}

impl Semaphore {
    pub fn flags(&self) -> SemFlags {
        self.flags
    }

    pub fn state_offset(&self) -> HeapOffset {
        self.state
    }

    pub fn wait_queue(&self) -> WaitQueueId {
        self.wq
    }
}

impl Core {
    pub fn create_semaphore(&mut self, initval: i32, flags: SemFlags, clock: ClockId) -> Result<SemId> {
        self.check_running()?;
        if initval < 0 {
            return Err(Error::InvalidArgument);
        }
        let offset = self.heap.alloc(state::SEM_WORDS)?;
        self.heap.store(offset, state::SEM_VALUE, initval as u32);
        self.heap.store(offset, state::SEM_FLAGS, flags.bits());
        let wq_flags = if flags.contains(SemFlags::PRIO) {
            WaitFlags::PRIO
        } else {
            WaitFlags::empty()
        };
        let wq = self.new_wait_queue(clock, wq_flags, WaitOwner::Plain);
        let sem = self.semaphores.insert(Semaphore { wq, state: offset, flags });
        evl_debug!("evl: semaphore {:?} created, count {}", sem, initval);
        Ok(sem)
    }

    pub fn semaphore(&self, s: SemId) -> Result<&Semaphore> {
        self.semaphores.get(s).ok_or(Error::NotFound)
    }

    /// Deletes a semaphore; sleepers wake up with [`Error::Deleted`]
    pub fn destroy_semaphore(&mut self, s: SemId) -> Result<()> {
        let sem = self.semaphores.remove(s).ok_or(Error::NotFound)?;
        self.flush_wait_queue(sem.wq, ThreadInfo::RMID);
        self.wait_queues.remove(sem.wq);
        self.heap.free(sem.state, state::SEM_WORDS);
        evl_debug!("evl: semaphore {:?} destroyed", s);
        self.schedule();
        Ok(())
    }

    pub fn sem_value(&self, s: SemId) -> Result<i32> {
        let sem = self.semaphore(s)?;
        Ok(self.heap.load(sem.state, state::SEM_VALUE) as i32)
    }

    /// Takes one unit, sleeping while the count is zero
    pub fn sem_down(
        &mut self,
        s: SemId,
        caller: ThreadId,
        timeout: Timeout,
        mode: TimeoutMode,
    ) -> Result<Outcome> {
        self.check_oob_caller(caller)?;
        let sem = self.semaphore(s)?;
        let (wq, offset) = (sem.wq, sem.state);
        let value = self.heap.load(offset, state::SEM_VALUE) as i32;
        if value > 0 {
            self.heap.store(offset, state::SEM_VALUE, (value - 1) as u32);
            return Ok(Outcome::Completed);
        }
        self.block_on(wq, caller, timeout, mode)?;
        self.schedule();
        Ok(Outcome::Blocked)
    }

    /// Takes one unit if available, fails with [`Error::WouldBlock`] otherwise
    pub fn sem_trydown(&mut self, s: SemId, caller: ThreadId) -> Result<()> {
        self.sem_down(s, caller, Timeout::NONBLOCK, TimeoutMode::Relative)
            .map(|_| ())
    }

    /// Releases one unit
    ///
    /// Callable from any context, including interrupt handlers.
    pub fn sem_up(&mut self, s: SemId) -> Result<()> {
        self.check_running()?;
        let sem = self.semaphore(s)?;
        let (wq, offset) = (sem.wq, sem.state);
        if self.wake_waiter(wq, None, ThreadInfo::WAKEN).is_none() {
            let value = self.heap.load(offset, state::SEM_VALUE) as i32;
            let value = value.checked_add(1).ok_or(Error::InvalidArgument)?;
            self.heap.store(offset, state::SEM_VALUE, value as u32);
        }
        self.schedule();
        Ok(())
    }

    /// Wakes every sleeper successfully and resets the count to zero
    pub fn sem_broadcast(&mut self, s: SemId) -> Result<usize> {
        self.check_running()?;
        let sem = self.semaphore(s)?;
        let (wq, offset) = (sem.wq, sem.state);
        let woken = self.flush_wait_queue(wq, ThreadInfo::BCAST);
        self.heap.store(offset, state::SEM_VALUE, 0);
        self.schedule();
        Ok(woken)
    }
}
