//! Quota class: thread groups sharing a CPU budget
//!
//! Every group of a CPU receives `quota` nanoseconds of run time per period.
//! Unused budget carries over as credit, bounded by the group's peak. The
//! running thread's group is charged as time passes; when the budget is
//! gone, the limit timer forces a reschedule and the group's threads park on
//! its expired list until the periodic refill.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;

use evl_api::sched::SchedParams;
use evl_api::{Error, Result, Ticks};

use crate::clock::TimerId;
use crate::kernel::Core;
use crate::sched::SchedClass;
use crate::sched::queue::MultiLevelQueue;
use crate::sched::rq::RunQueue;
use crate::thread::{Thread, ThreadId};

/// Highest number of groups per CPU
pub const MAX_QUOTA_GROUPS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QuotaEntry {
    tid: ThreadId,
    tgid: i32,
    prio: i32,
}

impl QuotaEntry {
    fn of(t: &Thread) -> Self {
        Self {
            tid: t.id,
            tgid: t.quota_group(),
            prio: t.cprio,
        }
    }
}

#[derive(Debug)]
pub(crate) struct QuotaGroup {
    quota_percent: u32,
    peak_percent: u32,
    quota: Ticks,
    quota_peak: Ticks,
    run_budget: Ticks,
    run_credit: Ticks,
    nr_threads: usize,
    expired: VecDeque<QuotaEntry>,
}

impl QuotaGroup {
    fn new(period: Ticks) -> Self {
        Self {
            quota_percent: 100,
            peak_percent: 100,
            quota: period,
            quota_peak: period,
            run_budget: period,
            run_credit: 0,
            nr_threads: 0,
            expired: VecDeque::new(),
        }
    }

    /// Starts a new period: fresh quota plus what was left, up to the peak
    fn replenish(&mut self) {
        let unused = self.run_budget.max(0);
        let budget = (self.quota + unused).min(self.quota_peak);
        self.run_credit = (budget - self.quota).max(0);
        self.run_budget = budget;
    }
}

/// Snapshot of a group's settings and usage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaGroupInfo {
    pub tgid: i32,
    pub quota_percent: u32,
    pub peak_percent: u32,
    /// Budget left in the current period
    pub run_budget: Ticks,
    /// Part of the budget carried over from previous periods
    pub run_credit: Ticks,
    pub nr_threads: usize,
}

pub(crate) struct QuotaState {
    period: Ticks,
    runnable: MultiLevelQueue<QuotaEntry>,
    groups: BTreeMap<i32, QuotaGroup>,
    refill_timer: TimerId,
    limit_timer: TimerId,
}

impl QuotaState {
    pub(crate) fn new(period: Ticks, refill_timer: TimerId, limit_timer: TimerId) -> Self {
        Self {
            period,
            runnable: MultiLevelQueue::new(),
            groups: BTreeMap::new(),
            refill_timer,
            limit_timer,
        }
    }

    fn exhausted(&self, tgid: i32) -> bool {
        self.groups.get(&tgid).is_none_or(|g| g.run_budget <= 0)
    }

    pub(crate) fn charge(&mut self, tgid: i32, elapsed: Ticks) {
        if let Some(g) = self.groups.get_mut(&tgid) {
            g.run_budget = (g.run_budget - elapsed).max(0);
        }
    }

    pub(crate) fn budget(&self, tgid: i32) -> Ticks {
        self.groups.get(&tgid).map_or(0, |g| g.run_budget)
    }

    pub(crate) fn nr_queued(&self) -> usize {
        self.runnable.len() + self.groups.values().map(|g| g.expired.len()).sum::<usize>()
    }

    fn park(&mut self, entry: QuotaEntry) {
        if let Some(g) = self.groups.get_mut(&entry.tgid) {
            g.expired.push_back(entry);
        }
    }

    /// Moves the expired threads of groups with budget back to the runnable set
    fn unpark(&mut self) -> bool {
        let mut moved = false;
        for g in self.groups.values_mut() {
            if g.run_budget <= 0 {
                continue;
            }
            while let Some(entry) = g.expired.pop_front() {
                self.runnable.add_tail(entry, entry.prio);
                moved = true;
            }
        }
        moved
    }
}

pub(super) fn enqueue(rq: &mut RunQueue, t: &Thread) {
    let entry = QuotaEntry::of(t);
    if rq.quota.exhausted(entry.tgid) {
        rq.quota.park(entry);
    } else {
        rq.quota.runnable.add_tail(entry, entry.prio);
    }
}

pub(super) fn requeue(rq: &mut RunQueue, t: &Thread) {
    let entry = QuotaEntry::of(t);
    if rq.quota.exhausted(entry.tgid) {
        rq.quota.park(entry);
    } else {
        rq.quota.runnable.add_head(entry, entry.prio);
    }
}

pub(super) fn dequeue(rq: &mut RunQueue, t: &Thread) -> bool {
    let entry = QuotaEntry::of(t);
    if rq.quota.runnable.remove(entry, entry.prio) {
        return true;
    }
    let Some(g) = rq.quota.groups.get_mut(&entry.tgid) else {
        return false;
    };
    match g.expired.iter().position(|e| e.tid == entry.tid) {
        Some(pos) => {
            g.expired.remove(pos);
            true
        }
        None => false,
    }
}

/// Picks the best thread whose group still has budget
///
/// Threads met on the way whose group ran dry move to their expired list.
pub(super) fn pick(rq: &mut RunQueue) -> Option<ThreadId> {
    loop {
        let entry = rq.quota.runnable.pop_highest()?;
        if !rq.quota.exhausted(entry.tgid) {
            return Some(entry.tid);
        }
        rq.quota.park(entry);
    }
}

pub(super) fn chkparam(rq: &RunQueue, params: &SchedParams) -> Result<()> {
    match *params {
        SchedParams::Quota { group, .. } if rq.quota.groups.contains_key(&group) => Ok(()),
        SchedParams::Quota { .. } => Err(Error::NotFound),
        _ => Err(Error::InvalidArgument),
    }
}

pub(super) fn declare(rq: &mut RunQueue, params: &SchedParams) {
    if let SchedParams::Quota { group, .. } = *params {
        if let Some(g) = rq.quota.groups.get_mut(&group) {
            g.nr_threads += 1;
        }
    }
}

pub(super) fn forget(rq: &mut RunQueue, t: &Thread) {
    if let Some(g) = rq.quota.groups.get_mut(&t.quota_group()) {
        g.nr_threads = g.nr_threads.saturating_sub(1);
    }
}

fn percent_of(period: Ticks, percent: u32) -> Ticks {
    period.saturating_mul(percent as Ticks) / 100
}

impl Core {
    /// Creates a quota group on `cpu`, initially allowed the full period
    pub fn quota_create_group(&mut self, cpu: usize) -> Result<i32> {
        self.check_running()?;
        let now = self.now();
        let rq = self.rqs.get_mut(cpu).ok_or(Error::InvalidArgument)?;
        let qs = &mut rq.quota;
        if qs.groups.len() >= MAX_QUOTA_GROUPS {
            return Err(Error::NoSpace);
        }
        let tgid = (0..).find(|id| !qs.groups.contains_key(id)).unwrap_or(0);
        let first = qs.groups.is_empty();
        let period = qs.period;
        let refill = qs.refill_timer;
        qs.groups.insert(tgid, QuotaGroup::new(period));
        if first {
            self.start_timer(refill, now.saturating_add(period), Some(period));
        }
        evl_debug!("evl: quota group {} created on cpu{}", tgid, cpu);
        Ok(tgid)
    }

    /// Sets the share of each period a group may run, and its peak
    ///
    /// Both values are percentages of the period; the peak bounds how much
    /// unused budget may accumulate and must not be below the quota.
    pub fn quota_set_group(&mut self, cpu: usize, tgid: i32, quota: u32, peak: u32) -> Result<()> {
        self.check_running()?;
        if quota > 100 || peak > 100 || peak < quota {
            return Err(Error::InvalidArgument);
        }
        let rq = self.rqs.get_mut(cpu).ok_or(Error::InvalidArgument)?;
        let period = rq.quota.period;
        let g = rq.quota.groups.get_mut(&tgid).ok_or(Error::NotFound)?;
        g.quota_percent = quota;
        g.peak_percent = peak;
        g.quota = percent_of(period, quota);
        g.quota_peak = percent_of(period, peak);
        g.run_budget = g.quota;
        g.run_credit = 0;
        rq.quota.unpark();
        self.quota_arm_limit(cpu);
        self.resched(cpu);
        self.schedule();
        Ok(())
    }

    /// Removes a group
    ///
    /// A group with members is only removed when `force` is set, in which
    /// case its members move to the FIFO class at their priority.
    pub fn quota_remove_group(&mut self, cpu: usize, tgid: i32, force: bool) -> Result<()> {
        self.check_running()?;
        let rq = self.rqs.get(cpu).ok_or(Error::InvalidArgument)?;
        let g = rq.quota.groups.get(&tgid).ok_or(Error::NotFound)?;
        if g.nr_threads > 0 && !force {
            return Err(Error::Busy);
        }
        let members: Vec<(ThreadId, i32)> = self
            .threads
            .iter()
            .filter(|(_, t)| t.cpu == cpu && t.quota_group() == tgid)
            .map(|(tid, t)| (tid, t.bprio))
            .collect();
        for (tid, prio) in members {
            self.change_schedparam(tid, SchedParams::Fifo { prio, rr_quantum: None });
        }

        let qs = &mut self.rqs[cpu].quota;
        qs.groups.remove(&tgid);
        let (refill, limit) = (qs.refill_timer, qs.limit_timer);
        if qs.groups.is_empty() {
            self.stop_timer(refill);
            self.stop_timer(limit);
        }
        evl_debug!("evl: quota group {} removed from cpu{}", tgid, cpu);
        self.schedule();
        Ok(())
    }

    pub fn quota_group_info(&self, cpu: usize, tgid: i32) -> Result<QuotaGroupInfo> {
        let rq = self.rqs.get(cpu).ok_or(Error::InvalidArgument)?;
        let g = rq.quota.groups.get(&tgid).ok_or(Error::NotFound)?;
        Ok(QuotaGroupInfo {
            tgid,
            quota_percent: g.quota_percent,
            peak_percent: g.peak_percent,
            run_budget: g.run_budget,
            run_credit: g.run_credit,
            nr_threads: g.nr_threads,
        })
    }

    /// Periodic replenishment of every group of `cpu`
    pub(crate) fn quota_refill(&mut self, cpu: usize) {
        let qs = &mut self.rqs[cpu].quota;
        for g in qs.groups.values_mut() {
            g.replenish();
        }
        qs.unpark();
        self.quota_arm_limit(cpu);
        self.resched(cpu);
    }

    /// Arms the limit timer for the group of the running thread, if any
    pub(crate) fn quota_arm_limit(&mut self, cpu: usize) {
        let curr = &self.threads[self.rqs[cpu].curr];
        let limit = self.rqs[cpu].quota.limit_timer;
        if curr.sched_class != SchedClass::Quota {
            self.stop_timer(limit);
            return;
        }
        let budget = self.rqs[cpu].quota.budget(curr.quota_group());
        let date = self.now().saturating_add(budget);
        self.start_timer(limit, date, None);
    }
}
