//! Per-CPU run queue

use bitflags::bitflags;

use crate::clock::{TimerBase, TimerId};
use crate::platform::Stage;
use crate::sched::queue::MultiLevelQueue;
use crate::sched::quota::QuotaState;
use crate::sched::tp::TpState;
use crate::thread::ThreadId;

bitflags! {
    /// Run queue status
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RqFlags: u32 {
        /// A reschedule is pending
        const RESCHED = 1 << 0;
        /// Running an interrupt handler
        const IRQ = 1 << 1;
        /// An in-band tick is waiting to be relayed
        const TPROXY = 1 << 2;
        /// Put the current thread at the tail of its level on switch-out
        const PUTBACK = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RqStats {
    pub switches: u64,
    pub irqs: u64,
    /// IPIs sent to this CPU
    pub ipis: u64,
}

pub struct RunQueue {
    pub(crate) cpu: usize,
    pub(crate) curr: ThreadId,
    pub(crate) root: ThreadId,
    pub(crate) flags: RqFlags,
    pub(crate) irq_depth: u32,
    /// Remote CPUs to kick at the next local reschedule
    pub(crate) resched_mask: u64,
    pub(crate) fifo: MultiLevelQueue,
    pub(crate) weak: MultiLevelQueue,
    pub(crate) quota: QuotaState,
    pub(crate) tp: TpState,
    pub(crate) timer_base: TimerBase,
    pub(crate) rr_timer: TimerId,
    pub(crate) inband_timer: TimerId,
    pub(crate) fpu_holder: Option<ThreadId>,
    pub(crate) stage: Stage,
    pub(crate) stats: RqStats,
}

impl RunQueue {
    pub(crate) fn new(
        cpu: usize,
        root: ThreadId,
        rr_timer: TimerId,
        inband_timer: TimerId,
        quota: QuotaState,
        tp: TpState,
    ) -> Self {
        Self {
            cpu,
            curr: root,
            root,
            flags: RqFlags::empty(),
            irq_depth: 0,
            resched_mask: 0,
            fifo: MultiLevelQueue::new(),
            weak: MultiLevelQueue::new(),
            quota,
            tp,
            timer_base: TimerBase::default(),
            rr_timer,
            inband_timer,
            fpu_holder: None,
            stage: Stage::InBand,
            stats: RqStats::default(),
        }
    }

    pub fn cpu(&self) -> usize {
        self.cpu
    }

    pub fn curr(&self) -> ThreadId {
        self.curr
    }

    pub fn root(&self) -> ThreadId {
        self.root
    }

    pub fn flags(&self) -> RqFlags {
        self.flags
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn stats(&self) -> &RqStats {
        &self.stats
    }

    pub fn fpu_holder(&self) -> Option<ThreadId> {
        self.fpu_holder
    }

    /// Number of armed timers on this CPU
    pub fn nr_timers(&self) -> usize {
        self.timer_base.len()
    }

    /// Number of threads linked to the run queue, expired quota members
    /// included
    pub fn nr_ready(&self) -> usize {
        self.fifo.len() + self.weak.len() + self.quota.nr_queued() + self.tp.nr_queued()
    }
}
