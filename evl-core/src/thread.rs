//! Thread control block and thread lifecycle
//!
//! A thread is created dormant on a fixed CPU once its scheduling class has
//! accepted its parameters, becomes runnable when started, and sits in at
//! most one of {its run queue, a wait queue} at any time. The running thread
//! of a CPU is in neither: the dispatcher puts it back on switch-out.

use alloc::string::String;
use alloc::vec::Vec;

use bitflags::bitflags;
use evl_api::sched::SchedParams;
use evl_api::{Error, FundleT, Result, Ticks};

use crate::arena::Key;
use crate::clock::{TimerAction, TimerId};
use crate::kernel::Core;
use crate::sched::SchedClass;
use crate::sync::mutex::MutexId;
use crate::wait::WaitQueueId;

pub type ThreadId = Key<Thread>;

bitflags! {
    /// Thread state bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ThreadState: u32 {
        /// Suspended
        const SUSP = 1 << 0;
        /// Pending on a wait queue
        const PEND = 1 << 1;
        /// Delayed on its resource timer
        const DELAY = 1 << 2;
        /// Linked to its run queue
        const READY = 1 << 3;
        /// Created, not started yet
        const DORMANT = 1 << 4;
        /// Deleted, waiting for the dispatcher to reap it
        const ZOMBIE = 1 << 5;
        /// Running on the in-band side
        const INBAND = 1 << 6;
        /// Priority raised by inheritance or ceiling
        const BOOST = 1 << 7;
        /// Member of the weak class
        const WEAK = 1 << 8;
        /// Round-robin enabled
        const RRB = 1 << 9;
        /// Root (idle) thread of a CPU
        const ROOT = 1 << 10;

        const BLOCK_BITS = Self::SUSP.bits()
            | Self::PEND.bits()
            | Self::DELAY.bits()
            | Self::DORMANT.bits()
            | Self::ZOMBIE.bits()
            | Self::INBAND.bits();
    }
}

bitflags! {
    /// Reason of the last wake-up
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ThreadInfo: u32 {
        /// The timeout elapsed
        const TIMEO = 1 << 0;
        /// The object waited on was deleted
        const RMID = 1 << 1;
        /// The wait was forcibly broken
        const BREAK = 1 << 2;
        /// Explicitly woken
        const WAKEN = 1 << 3;
        /// Woken by a broadcast
        const BCAST = 1 << 4;
        /// Woken by an event signal
        const SIGNAL = 1 << 5;
    }
}

impl ThreadInfo {
    /// Maps a wake reason to the outcome of the wait
    pub fn to_result(self) -> Result<()> {
        if self.contains(ThreadInfo::RMID) {
            Err(Error::Deleted)
        } else if self.contains(ThreadInfo::TIMEO) {
            Err(Error::TimedOut)
        } else if self.contains(ThreadInfo::BREAK) {
            Err(Error::Interrupted)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadStats {
    /// Time spent as the current thread of its CPU
    pub exec_time: Ticks,
    /// Number of times switched in
    pub switches: u64,
    /// Number of waits ended by a timeout
    pub timeouts: u64,
}

pub struct Thread {
    pub(crate) id: ThreadId,
    pub(crate) name: String,
    pub(crate) handle: FundleT,
    pub(crate) cpu: usize,
    pub(crate) state: ThreadState,
    pub(crate) info: ThreadInfo,
    pub(crate) base_class: SchedClass,
    pub(crate) sched_class: SchedClass,
    pub(crate) base_params: SchedParams,
    pub(crate) bprio: i32,
    pub(crate) cprio: i32,
    pub(crate) rrperiod: Option<Ticks>,
    pub(crate) wchan: Option<WaitQueueId>,
    pub(crate) rtimer: Option<TimerId>,
    pub(crate) owned: Vec<MutexId>,
    pub(crate) uses_fpu: bool,
    pub(crate) stats: ThreadStats,
}

impl Thread {
    pub(crate) fn new(id: ThreadId, name: &str, handle: FundleT, cpu: usize) -> Self {
        Self {
            id,
            name: String::from(name),
            handle,
            cpu,
            state: ThreadState::DORMANT,
            info: ThreadInfo::empty(),
            base_class: SchedClass::Idle,
            sched_class: SchedClass::Idle,
            base_params: SchedParams::Idle,
            bprio: evl_api::sched::IDLE_PRIO,
            cprio: evl_api::sched::IDLE_PRIO,
            rrperiod: None,
            wchan: None,
            rtimer: None,
            owned: Vec::new(),
            uses_fpu: false,
            stats: ThreadStats::default(),
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> FundleT {
        self.handle
    }

    pub fn cpu(&self) -> usize {
        self.cpu
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    pub fn info(&self) -> ThreadInfo {
        self.info
    }

    pub fn base_class(&self) -> SchedClass {
        self.base_class
    }

    pub fn sched_class(&self) -> SchedClass {
        self.sched_class
    }

    pub fn bprio(&self) -> i32 {
        self.bprio
    }

    pub fn cprio(&self) -> i32 {
        self.cprio
    }

    /// Weighted priority, comparable across scheduling classes
    pub fn wprio(&self) -> i32 {
        crate::sched::weighted_prio(self.sched_class, self.cprio)
    }

    pub fn wait_channel(&self) -> Option<WaitQueueId> {
        self.wchan
    }

    pub fn owned_mutexes(&self) -> &[MutexId] {
        &self.owned
    }

    pub fn stats(&self) -> &ThreadStats {
        &self.stats
    }

    pub fn is_runnable(&self) -> bool {
        !self.state.intersects(ThreadState::BLOCK_BITS)
    }

    /// Quota group from the base parameters, -1 outside the quota class
    pub(crate) fn quota_group(&self) -> i32 {
        match self.base_params {
            SchedParams::Quota { group, .. } => group,
            _ => -1,
        }
    }

    /// Time partition from the base parameters, -1 outside the TP class
    pub(crate) fn tp_partition(&self) -> i32 {
        match self.base_params {
            SchedParams::Tp { part, .. } => part,
            _ => -1,
        }
    }
}

impl Core {
    pub fn thread(&self, tid: ThreadId) -> Result<&Thread> {
        self.threads.get(tid).ok_or(Error::NotFound)
    }

    /// Looks a thread up by handle
    pub fn thread_by_handle(&self, handle: FundleT) -> Result<ThreadId> {
        self.handles.get(&handle).copied().ok_or(Error::NotFound)
    }

    pub fn nr_threads(&self) -> usize {
        self.threads.len()
    }

    pub(crate) fn alloc_fundle(&mut self) -> FundleT {
        loop {
            let fundle = self.next_fundle & evl_api::abi::FUNDLE_MASK;
            self.next_fundle = self.next_fundle.wrapping_add(1);
            if fundle != evl_api::NO_HANDLE
                && !self.handles.contains_key(&fundle)
                && !self.elements.has_fundle(fundle)
            {
                return fundle;
            }
        }
    }

    /// Inserts the root thread standing for the in-band kernel on `cpu`
    pub(crate) fn create_root_thread(&mut self, cpu: usize) -> ThreadId {
        let handle = self.alloc_fundle();
        let tid = self.threads.insert_with(|id| {
            let mut t = Thread::new(id, "ROOT", handle, cpu);
            t.state = ThreadState::ROOT;
            t
        });
        self.handles.insert(handle, tid);
        tid
    }

    /// Creates a dormant thread on `cpu`
    ///
    /// The target class validates `params` before anything is allocated.
    pub fn create_thread(&mut self, name: &str, cpu: usize, params: SchedParams) -> Result<ThreadId> {
        self.check_running()?;
        if cpu >= self.rqs.len() {
            return Err(Error::InvalidArgument);
        }
        if self.threads.len() >= self.config.max_threads {
            return Err(Error::OutOfMemory);
        }
        self.class_chkparam(cpu, &params)?;

        let handle = self.alloc_fundle();
        let tid = self
            .threads
            .insert_with(|id| Thread::new(id, name, handle, cpu));
        let rtimer = self.create_timer(cpu, TimerAction::Timeout(tid));
        self.threads[tid].rtimer = Some(rtimer);
        self.handles.insert(handle, tid);
        self.class_declare(tid, &params);
        self.class_setparam(tid, params);

        evl_debug!(
            "evl: created thread {} (handle {}) on cpu{}, {:?}",
            name,
            handle,
            cpu,
            params
        );
        Ok(tid)
    }

    /// Makes a dormant thread runnable
    pub fn start_thread(&mut self, tid: ThreadId) -> Result<()> {
        self.check_running()?;
        let t = self.thread(tid)?;
        if !t.state.contains(ThreadState::DORMANT) {
            return Err(Error::Busy);
        }
        self.release_thread(tid, ThreadState::DORMANT, ThreadInfo::empty());
        self.schedule();
        Ok(())
    }

    /// Deletes a thread
    ///
    /// Mutexes it owns are released to their next waiter. A thread deleting
    /// itself (or any current thread) turns into a zombie reaped by the
    /// dispatcher once switched out.
    pub fn delete_thread(&mut self, tid: ThreadId) -> Result<()> {
        let t = self.thread(tid)?;
        if t.state.contains(ThreadState::ROOT) {
            return Err(Error::InvalidArgument);
        }
        if t.state.contains(ThreadState::ZOMBIE) {
            return Err(Error::NotFound);
        }
        let cpu = t.cpu;

        // leave any wait queue, then hand over the mutexes still held
        self.abort_wait(tid);
        while let Some(&mutex) = self.threads[tid].owned.last() {
            self.release_mutex(mutex, tid);
        }

        if self.threads[tid].state.contains(ThreadState::READY) {
            self.class_dequeue(tid);
        }
        if let Some(rtimer) = self.threads[tid].rtimer {
            self.stop_timer(rtimer);
        }
        self.class_forget(tid);

        if self.rqs[cpu].curr == tid {
            self.threads[tid].state.insert(ThreadState::ZOMBIE);
            self.resched(cpu);
        } else {
            self.reap_thread(tid);
        }
        self.schedule();
        Ok(())
    }

    /// Frees a thread which is neither current nor queued anywhere
    pub(crate) fn reap_thread(&mut self, tid: ThreadId) {
        let Some(t) = self.threads.remove(tid) else {
            return;
        };
        if let Some(rtimer) = t.rtimer {
            self.delete_timer(rtimer);
        }
        self.handles.remove(&t.handle);
        let rq = &mut self.rqs[t.cpu];
        if rq.fpu_holder == Some(tid) {
            rq.fpu_holder = None;
        }
        evl_debug!("evl: reaped thread {}", t.name);
    }

    /// Changes the base scheduling parameters of a thread
    ///
    /// Validation happens first; on error nothing has changed. A boosted
    /// thread keeps its boost until the priority tracking finds it unneeded.
    pub fn set_schedparam(&mut self, tid: ThreadId, params: SchedParams) -> Result<()> {
        self.check_running()?;
        let t = self.thread(tid)?;
        if t.state.intersects(ThreadState::ROOT | ThreadState::ZOMBIE) {
            return Err(Error::InvalidArgument);
        }
        self.class_chkparam(t.cpu, &params)?;
        self.change_schedparam(tid, params);
        self.schedule();
        Ok(())
    }

    pub fn get_schedparam(&self, tid: ThreadId) -> Result<SchedParams> {
        let t = self.thread(tid)?;
        Ok(self.class_getparam(t))
    }

    /// Marks a thread as using the FPU, enabling lazy save/restore
    pub fn set_fpu_usage(&mut self, tid: ThreadId, uses_fpu: bool) -> Result<()> {
        self.threads.get_mut(tid).ok_or(Error::NotFound)?.uses_fpu = uses_fpu;
        Ok(())
    }

    /// Suspends a thread until [`resume_thread`](Self::resume_thread)
    pub fn suspend_thread(&mut self, tid: ThreadId) -> Result<()> {
        self.check_running()?;
        let t = self.thread(tid)?;
        if t.state.intersects(ThreadState::ROOT | ThreadState::ZOMBIE) {
            return Err(Error::InvalidArgument);
        }
        self.block_thread(tid, ThreadState::SUSP, None);
        self.schedule();
        Ok(())
    }

    pub fn resume_thread(&mut self, tid: ThreadId) -> Result<()> {
        self.check_running()?;
        if !self.thread(tid)?.state.contains(ThreadState::SUSP) {
            return Ok(());
        }
        self.release_thread(tid, ThreadState::SUSP, ThreadInfo::empty());
        self.schedule();
        Ok(())
    }

    /// Forcibly breaks the wait of a blocked thread
    ///
    /// Returns whether the thread was waiting. The wait ends with
    /// [`Error::Interrupted`].
    pub fn unblock_thread(&mut self, tid: ThreadId) -> Result<bool> {
        self.check_running()?;
        let t = self.thread(tid)?;
        if !t.state.intersects(ThreadState::PEND | ThreadState::DELAY) {
            return Ok(false);
        }
        self.abort_wait(tid);
        self.release_thread(tid, ThreadState::PEND | ThreadState::DELAY, ThreadInfo::BREAK);
        self.schedule();
        Ok(true)
    }

    /// Hands the current out-of-band thread over to the in-band side
    pub fn switch_inband(&mut self, caller: ThreadId) -> Result<()> {
        self.check_oob_caller(caller)?;
        self.block_thread(caller, ThreadState::INBAND, None);
        self.schedule();
        Ok(())
    }

    /// Brings a thread running in-band back under the core's control
    pub fn switch_oob(&mut self, tid: ThreadId) -> Result<()> {
        self.check_running()?;
        let t = self.thread(tid)?;
        if !t.state.contains(ThreadState::INBAND) {
            return Err(Error::InvalidArgument);
        }
        self.local_cpu = t.cpu;
        self.release_thread(tid, ThreadState::INBAND, ThreadInfo::empty());
        self.schedule();
        Ok(())
    }

    /// Resolves the caller of a blocking service
    ///
    /// Only the current out-of-band thread of a CPU may issue one; the
    /// caller's CPU becomes the local CPU.
    pub(crate) fn check_oob_caller(&mut self, caller: ThreadId) -> Result<usize> {
        self.check_running()?;
        let t = self.thread(caller)?;
        if t.state.intersects(ThreadState::ROOT | ThreadState::INBAND | ThreadState::ZOMBIE) {
            return Err(Error::NotOob);
        }
        let cpu = t.cpu;
        if self.rqs[cpu].curr != caller {
            return Err(Error::NotOob);
        }
        self.local_cpu = cpu;
        Ok(cpu)
    }

    /// Takes a thread off the runnable set
    ///
    /// With a `date`, the resource timer is armed and the thread is also
    /// delayed until then.
    pub(crate) fn block_thread(&mut self, tid: ThreadId, mask: ThreadState, date: Option<Ticks>) {
        if self.threads[tid].state.contains(ThreadState::READY) {
            self.class_dequeue(tid);
        }
        let t = &mut self.threads[tid];
        t.state.insert(mask);
        let cpu = t.cpu;
        if let (Some(date), Some(rtimer)) = (date, t.rtimer) {
            t.state.insert(ThreadState::DELAY);
            self.start_timer(rtimer, date, None);
        }
        self.resched(cpu);
    }

    /// Clears block bits and requeues the thread once none remain
    ///
    /// Clearing PEND or DELAY ends the wait as a whole: both bits go and the
    /// resource timer is stopped. Wait queue unlinking is up to the caller.
    pub(crate) fn release_thread(&mut self, tid: ThreadId, mask: ThreadState, info: ThreadInfo) {
        let t = &mut self.threads[tid];
        t.info.insert(info);
        t.state.remove(mask);
        let mut stop = None;
        if mask.intersects(ThreadState::PEND | ThreadState::DELAY) {
            stop = t.rtimer;
            t.state.remove(ThreadState::PEND | ThreadState::DELAY);
        }
        if info.contains(ThreadInfo::TIMEO) {
            t.stats.timeouts += 1;
        }
        let cpu = t.cpu;
        let runnable = t.is_runnable();
        if let Some(rtimer) = stop {
            self.stop_timer(rtimer);
        }
        if runnable && self.rqs[cpu].curr != tid {
            self.class_enqueue(tid);
        }
        self.resched(cpu);
    }

    /// Resource timer expiry
    pub(crate) fn thread_timeout(&mut self, tid: ThreadId) {
        let Some(t) = self.threads.get(tid) else {
            return;
        };
        if !t.state.contains(ThreadState::DELAY) {
            return;
        }
        evl_trace!("evl: thread {} timed out", t.name);
        self.abort_wait(tid);
        self.release_thread(tid, ThreadState::PEND | ThreadState::DELAY, ThreadInfo::TIMEO);
    }
}
