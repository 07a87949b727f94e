//! Scheduling classes and the dispatcher
//!
//! Runnable threads of a CPU are spread over one container per scheduling
//! class. Picking walks the classes by descending weight and takes the
//! highest priority thread of the first non-empty one, in O(1) thanks to the
//! multilevel bitmap queues. The set of classes is fixed, so class operations
//! dispatch on a closed enum.
//!
//! Priorities of different classes compare through the weighted priority
//! `weight * 1024 + cprio`, which orders wait queues and drives priority
//! inheritance across classes.

pub mod fifo;
pub mod idle;
pub mod queue;
pub mod quota;
pub mod rq;
pub mod tp;
pub mod weak;

use evl_api::sched::{SchedParams, SchedPolicy};
use evl_api::{Error, Result};

use crate::kernel::Core;
use crate::platform::{IpiKind, Stage};
use crate::thread::{Thread, ThreadId, ThreadState};

use self::rq::{RqFlags, RunQueue};

/// Scale separating class weights in weighted priorities
pub const WEIGHT_SCALE: i32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchedClass {
    Idle,
    Weak,
    Tp,
    Quota,
    Fifo,
}

impl SchedClass {
    /// Classes in picking order
    pub const BY_WEIGHT: [SchedClass; 5] = [
        SchedClass::Fifo,
        SchedClass::Quota,
        SchedClass::Tp,
        SchedClass::Weak,
        SchedClass::Idle,
    ];

    pub const fn weight(self) -> i32 {
        match self {
            SchedClass::Idle => 0,
            SchedClass::Weak => 1,
            SchedClass::Tp => 2,
            SchedClass::Quota => 3,
            SchedClass::Fifo => 4,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            SchedClass::Idle => "idle",
            SchedClass::Weak => "weak",
            SchedClass::Tp => "tp",
            SchedClass::Quota => "quota",
            SchedClass::Fifo => "fifo",
        }
    }

    pub const fn policy(self) -> SchedPolicy {
        match self {
            SchedClass::Idle => SchedPolicy::Idle,
            SchedClass::Weak => SchedPolicy::Weak,
            SchedClass::Tp => SchedPolicy::Tp,
            SchedClass::Quota => SchedPolicy::Quota,
            SchedClass::Fifo => SchedPolicy::Fifo,
        }
    }

    /// Class serving a set of parameters
    pub const fn of(params: &SchedParams) -> Self {
        match params {
            SchedParams::Idle => SchedClass::Idle,
            SchedParams::Weak { .. } => SchedClass::Weak,
            SchedParams::Fifo { .. } => SchedClass::Fifo,
            SchedParams::Quota { .. } => SchedClass::Quota,
            SchedParams::Tp { .. } => SchedClass::Tp,
        }
    }

    /// Clamps a priority inherited or imposed by a ceiling to the class range
    pub fn ceilprio(self, prio: i32) -> i32 {
        match self {
            SchedClass::Idle => idle::ceilprio(prio),
            SchedClass::Weak => weak::ceilprio(prio),
            SchedClass::Fifo | SchedClass::Quota | SchedClass::Tp => fifo::ceilprio(prio),
        }
    }
}

pub const fn weighted_prio(class: SchedClass, prio: i32) -> i32 {
    class.weight() * WEIGHT_SCALE + prio
}

impl Core {
    pub fn run_queue(&self, cpu: usize) -> Result<&RunQueue> {
        self.rqs.get(cpu).ok_or(Error::InvalidArgument)
    }

    /// Current thread of `cpu`
    pub fn current(&self, cpu: usize) -> Result<ThreadId> {
        self.run_queue(cpu).map(|rq| rq.curr)
    }

    /// Links a thread to its run queue, behind its equals
    pub(crate) fn class_enqueue(&mut self, tid: ThreadId) {
        let t = &self.threads[tid];
        let rq = &mut self.rqs[t.cpu];
        match t.sched_class {
            SchedClass::Fifo => fifo::enqueue(rq, t),
            SchedClass::Quota => quota::enqueue(rq, t),
            SchedClass::Tp => tp::enqueue(rq, t),
            SchedClass::Weak => weak::enqueue(rq, t),
            SchedClass::Idle => return,
        }
        self.threads[tid].state.insert(ThreadState::READY);
    }

    /// Links a preempted thread back ahead of its equals
    pub(crate) fn class_requeue(&mut self, tid: ThreadId) {
        let t = &self.threads[tid];
        let rq = &mut self.rqs[t.cpu];
        match t.sched_class {
            SchedClass::Fifo => fifo::requeue(rq, t),
            SchedClass::Quota => quota::requeue(rq, t),
            SchedClass::Tp => tp::requeue(rq, t),
            SchedClass::Weak => weak::requeue(rq, t),
            SchedClass::Idle => return,
        }
        self.threads[tid].state.insert(ThreadState::READY);
    }

    pub(crate) fn class_dequeue(&mut self, tid: ThreadId) {
        let t = &self.threads[tid];
        let rq = &mut self.rqs[t.cpu];
        let found = match t.sched_class {
            SchedClass::Fifo => fifo::dequeue(rq, t),
            SchedClass::Quota => quota::dequeue(rq, t),
            SchedClass::Tp => tp::dequeue(rq, t),
            SchedClass::Weak => weak::dequeue(rq, t),
            SchedClass::Idle => true,
        };
        if evl_warn_on!(!found) {
            return;
        }
        self.threads[tid].state.remove(ThreadState::READY);
    }

    /// Unlinks and returns the next thread to run on `cpu`
    fn class_pick(&mut self, cpu: usize) -> ThreadId {
        let rq = &mut self.rqs[cpu];
        let picked = SchedClass::BY_WEIGHT.iter().find_map(|class| match class {
            SchedClass::Fifo => fifo::pick(rq),
            SchedClass::Quota => quota::pick(rq),
            SchedClass::Tp => tp::pick(rq),
            SchedClass::Weak => weak::pick(rq),
            SchedClass::Idle => idle::pick(rq),
        });
        let next = picked.unwrap_or(rq.root);
        self.threads[next].state.remove(ThreadState::READY);
        next
    }

    /// Round-robin timer expiry on `cpu`
    pub(crate) fn sched_tick(&mut self, cpu: usize) {
        let curr = &self.threads[self.rqs[cpu].curr];
        let rq = &mut self.rqs[cpu];
        let yield_cpu = match curr.sched_class {
            SchedClass::Fifo => fifo::tick(rq, curr),
            _ => false,
        };
        if yield_cpu {
            self.resched(cpu);
        }
    }

    /// Checks parameters against the target class without changing anything
    pub(crate) fn class_chkparam(&self, cpu: usize, params: &SchedParams) -> Result<()> {
        params.validate()?;
        let rq = self.run_queue(cpu)?;
        match SchedClass::of(params) {
            SchedClass::Fifo | SchedClass::Weak => Ok(()),
            SchedClass::Quota => quota::chkparam(rq, params),
            SchedClass::Tp => tp::chkparam(rq, params),
            SchedClass::Idle => Err(Error::InvalidArgument),
        }
    }

    /// Registers a thread with the class of `params`
    pub(crate) fn class_declare(&mut self, tid: ThreadId, params: &SchedParams) {
        let rq = &mut self.rqs[self.threads[tid].cpu];
        if SchedClass::of(params) == SchedClass::Quota {
            quota::declare(rq, params);
        }
    }

    /// Unregisters a thread from its base class
    pub(crate) fn class_forget(&mut self, tid: ThreadId) {
        let t = &self.threads[tid];
        let rq = &mut self.rqs[t.cpu];
        if t.base_class == SchedClass::Quota {
            quota::forget(rq, t);
        }
    }

    /// Applies base parameters to an unlinked thread
    ///
    /// A boosted thread keeps its effective class and priority.
    pub(crate) fn class_setparam(&mut self, tid: ThreadId, params: SchedParams) {
        let t = &mut self.threads[tid];
        let class = SchedClass::of(&params);
        t.base_params = params;
        t.base_class = class;
        t.bprio = params.prio();
        t.state.set(ThreadState::WEAK, class == SchedClass::Weak);
        match params {
            SchedParams::Fifo {
                rr_quantum: Some(quantum),
                ..
            } => {
                t.rrperiod = Some(quantum);
                t.state.insert(ThreadState::RRB);
            }
            _ => {
                t.rrperiod = None;
                t.state.remove(ThreadState::RRB);
            }
        }
        if !t.state.contains(ThreadState::BOOST) {
            t.sched_class = class;
            t.cprio = t.bprio;
        }
    }

    pub(crate) fn class_getparam(&self, t: &Thread) -> SchedParams {
        t.base_params
    }

    /// Moves a thread to new base parameters, keeping every queue consistent
    ///
    /// Parameters must have been checked already.
    pub(crate) fn change_schedparam(&mut self, tid: ThreadId, params: SchedParams) {
        let queued = self.threads[tid].state.contains(ThreadState::READY);
        if queued {
            self.class_dequeue(tid);
        }
        self.class_forget(tid);
        self.class_declare(tid, &params);
        self.class_setparam(tid, params);
        if queued {
            self.class_enqueue(tid);
        }
        self.requeue_waiter(tid);
        self.adjust_priority(tid);
        self.propagate_priority(tid);
        let cpu = self.threads[tid].cpu;
        self.resched(cpu);
    }

    /// Sets the effective class and priority of a thread
    ///
    /// `boost` carries the class and priority inherited from a waiter or
    /// imposed by a ceiling; `None` drops back to the base settings. Returns
    /// whether anything changed.
    pub(crate) fn class_trackprio(&mut self, tid: ThreadId, boost: Option<(SchedClass, i32)>) -> bool {
        let t = &self.threads[tid];
        let (class, prio) = match boost {
            Some((class, prio)) => (class, class.ceilprio(prio)),
            None => (t.base_class, t.bprio),
        };
        if class == t.sched_class
            && prio == t.cprio
            && boost.is_some() == t.state.contains(ThreadState::BOOST)
        {
            return false;
        }
        let queued = t.state.contains(ThreadState::READY);
        let cpu = t.cpu;
        if queued {
            self.class_dequeue(tid);
        }
        let t = &mut self.threads[tid];
        t.sched_class = class;
        t.cprio = prio;
        t.state.set(ThreadState::BOOST, boost.is_some());
        if queued {
            self.class_enqueue(tid);
        }
        self.requeue_waiter(tid);
        self.resched(cpu);
        true
    }

    /// Requests a reschedule of `cpu`
    ///
    /// For a remote CPU, the request is also recorded in the local run
    /// queue and delivered as an IPI at the next local reschedule.
    pub(crate) fn resched(&mut self, cpu: usize) {
        self.rqs[cpu].flags.insert(RqFlags::RESCHED);
        let local = self.local_cpu;
        if cpu != local {
            self.rqs[local].resched_mask |= 1u64 << cpu;
        }
    }

    /// Runs the dispatcher on the local CPU
    pub fn schedule(&mut self) {
        self.schedule_on(self.local_cpu);
    }

    pub(crate) fn schedule_on(&mut self, cpu: usize) {
        let rq = &mut self.rqs[cpu];
        // deferred until the outermost interrupt exits
        if rq.flags.contains(RqFlags::IRQ) {
            return;
        }
        let remote = core::mem::take(&mut rq.resched_mask);
        if remote != 0 {
            self.kick_remote(remote);
        }

        let rq = &mut self.rqs[cpu];
        if !rq.flags.contains(RqFlags::RESCHED) {
            return;
        }
        rq.flags.remove(RqFlags::RESCHED);
        let putback = rq.flags.contains(RqFlags::PUTBACK);
        rq.flags.remove(RqFlags::PUTBACK);
        let prev = rq.curr;

        let p = &self.threads[prev];
        if p.is_runnable() && !p.state.contains(ThreadState::ROOT) {
            if putback {
                self.class_enqueue(prev);
            } else {
                self.class_requeue(prev);
            }
        }
        let next = self.class_pick(cpu);
        if next != prev {
            self.switch_to(cpu, prev, next);
        }
    }

    fn kick_remote(&mut self, mask: u64) {
        for cpu in 0..self.rqs.len() {
            if mask & (1u64 << cpu) != 0 {
                self.rqs[cpu].stats.ipis += 1;
                self.platform.send_ipi(cpu, IpiKind::Reschedule);
            }
        }
    }

    fn switch_to(&mut self, cpu: usize, prev: ThreadId, next: ThreadId) {
        let now = self.now();
        let rq = &mut self.rqs[cpu];
        rq.curr = next;
        rq.stats.switches += 1;
        let root = rq.root;
        let rr_timer = rq.rr_timer;

        let n = &mut self.threads[next];
        n.stats.switches += 1;
        let rr = match n.rrperiod {
            Some(quantum) if n.sched_class == SchedClass::Fifo => Some(quantum),
            _ => None,
        };
        let uses_fpu = n.uses_fpu;
        evl_trace!(
            "evl: cpu{} switching {} -> {}",
            cpu,
            self.threads[prev].name,
            self.threads[next].name
        );

        match rr {
            Some(quantum) => self.start_timer(rr_timer, now.saturating_add(quantum), Some(quantum)),
            None => self.stop_timer(rr_timer),
        }
        self.quota_arm_limit(cpu);

        if next == root {
            self.rqs[cpu].stage = Stage::InBand;
            self.platform.switch_stage(cpu, Stage::InBand);
        } else if prev == root {
            self.rqs[cpu].stage = Stage::OutOfBand;
            self.platform.switch_stage(cpu, Stage::OutOfBand);
        }

        let holder = self.rqs[cpu].fpu_holder;
        if uses_fpu && holder != Some(next) {
            if let Some(holder) = holder {
                self.platform.fpu_save(cpu, holder);
            }
            self.platform.fpu_restore(cpu, next);
            self.rqs[cpu].fpu_holder = Some(next);
        }

        self.platform.switch_context(cpu, prev, next);

        let rq = &mut self.rqs[cpu];
        if next == root && rq.flags.contains(RqFlags::TPROXY) {
            rq.flags.remove(RqFlags::TPROXY);
            self.platform.relay_inband_tick(cpu);
        }
        if self.threads[prev].state.contains(ThreadState::ZOMBIE) {
            self.reap_thread(prev);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evl_api::sched::{FIFO_MAX_PRIO, WEAK_MAX_PRIO};

    #[test]
    fn test_weights_order() {
        let weights: alloc::vec::Vec<_> = SchedClass::BY_WEIGHT.iter().map(|c| c.weight()).collect();
        assert!(weights.windows(2).all(|w| w[0] > w[1]));
        assert!(weighted_prio(SchedClass::Weak, WEAK_MAX_PRIO) < weighted_prio(SchedClass::Tp, 1));
        assert!(weighted_prio(SchedClass::Idle, -1) < weighted_prio(SchedClass::Weak, 0));
    }

    #[test]
    fn test_ceilprio_clamps() {
        assert_eq!(SchedClass::Weak.ceilprio(150), WEAK_MAX_PRIO);
        assert_eq!(SchedClass::Fifo.ceilprio(150), FIFO_MAX_PRIO);
        assert_eq!(SchedClass::Quota.ceilprio(0), 1);
        assert_eq!(SchedClass::Idle.ceilprio(42), -1);
    }

    #[test]
    fn test_class_of_params() {
        assert_eq!(SchedClass::of(&SchedParams::Weak { prio: 3 }), SchedClass::Weak);
        assert_eq!(
            SchedClass::of(&SchedParams::Fifo { prio: 3, rr_quantum: Some(10) }),
            SchedClass::Fifo
        );
        assert_eq!(SchedClass::Fifo.policy(), SchedPolicy::Fifo);
        assert_eq!(SchedClass::Quota.name(), "quota");
    }
}
