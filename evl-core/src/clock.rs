//! Clocks and timers
//!
//! The core keeps one monotonic time base; the realtime clock is the same
//! time shifted by a settable offset. Timers are armed on the timer base of
//! the CPU they belong to, ordered by expiry date. Whenever the earliest date
//! of a base changes, the timer hardware of that CPU is reprogrammed through
//! the [`Platform`](crate::platform::Platform), either directly when the base
//! is local or with an IPI asking the owner CPU to do it.
//!
//! There is no wall-clock hardware behind the core: time only moves when the
//! host calls [`Core::advance_clock`], which fires due timers one by one
//! inside interrupt frames of their CPU.

use alloc::collections::BTreeMap;

use evl_api::abi::{CLOCK_MONOTONIC, CLOCK_REALTIME};
use evl_api::{Error, Result, Ticks};

use crate::arena::Key;
use crate::kernel::Core;
use crate::platform::IpiKind;
use crate::sched::SchedClass;
use crate::thread::ThreadId;

pub type TimerId = Key<Timer>;

/// Clock a wait queue interprets absolute timeouts against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ClockId {
    #[default]
    Monotonic,
    Realtime,
}

impl ClockId {
    /// Decodes the clock designator of an attribute structure
    pub fn from_raw(raw: i32) -> Result<Self> {
        match raw {
            CLOCK_MONOTONIC => Ok(ClockId::Monotonic),
            CLOCK_REALTIME => Ok(ClockId::Realtime),
            _ => Err(Error::InvalidArgument),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Clock {
    pub(crate) now: Ticks,
    pub(crate) realtime_offset: Ticks,
}

impl Clock {
    pub(crate) fn read(&self, id: ClockId) -> Ticks {
        match id {
            ClockId::Monotonic => self.now,
            ClockId::Realtime => self.now.saturating_add(self.realtime_offset),
        }
    }

    /// Converts a date on clock `id` to the monotonic time base
    pub(crate) fn to_monotonic(&self, id: ClockId, date: Ticks) -> Ticks {
        match id {
            ClockId::Monotonic => date,
            ClockId::Realtime => date.saturating_sub(self.realtime_offset),
        }
    }
}

/// What a timer does when it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    /// Resource timer of a thread: ends its wait with a timeout
    Timeout(ThreadId),
    /// Round-robin slice expiry on the owner CPU
    RoundRobin,
    /// Quota budget replenishment
    QuotaRefill,
    /// The running quota group exhausted its budget
    QuotaLimit,
    /// Time partition window rotation
    TpRotate,
    /// In-band kernel tick postponed by the out-of-band stage
    InbandTick,
}

pub struct Timer {
    pub(crate) cpu: usize,
    pub(crate) action: TimerAction,
    pub(crate) interval: Option<Ticks>,
    /// Position in the timer base while armed
    pub(crate) slot: Option<(Ticks, u64)>,
    pub(crate) overruns: u64,
}

impl Timer {
    pub fn expiry(&self) -> Option<Ticks> {
        self.slot.map(|(date, _)| date)
    }

    pub fn interval(&self) -> Option<Ticks> {
        self.interval
    }

    pub fn overruns(&self) -> u64 {
        self.overruns
    }
}

/// Per-CPU set of armed timers, ordered by date then arming order
#[derive(Debug, Default)]
pub(crate) struct TimerBase {
    queue: BTreeMap<(Ticks, u64), TimerId>,
    seq: u64,
}

impl TimerBase {
    pub(crate) fn earliest(&self) -> Option<(Ticks, TimerId)> {
        self.queue
            .first_key_value()
            .map(|(&(date, _), &id)| (date, id))
    }

    fn insert(&mut self, date: Ticks, id: TimerId) -> (Ticks, u64) {
        self.seq += 1;
        let slot = (date, self.seq);
        self.queue.insert(slot, id);
        slot
    }

    fn remove(&mut self, slot: (Ticks, u64)) {
        self.queue.remove(&slot);
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }
}

impl Core {
    /// Current monotonic time
    pub fn now(&self) -> Ticks {
        self.clock.now
    }

    pub fn read_clock(&self, id: ClockId) -> Ticks {
        self.clock.read(id)
    }

    /// Sets the realtime clock; monotonic time is unaffected
    pub fn set_realtime(&mut self, date: Ticks) {
        self.clock.realtime_offset = date.saturating_sub(self.clock.now);
    }

    pub fn timer(&self, id: TimerId) -> Result<&Timer> {
        self.timers.get(id).ok_or(Error::NotFound)
    }

    pub(crate) fn create_timer(&mut self, cpu: usize, action: TimerAction) -> TimerId {
        self.timers.insert(Timer {
            cpu,
            action,
            interval: None,
            slot: None,
            overruns: 0,
        })
    }

    pub(crate) fn delete_timer(&mut self, id: TimerId) {
        self.stop_timer(id);
        self.timers.remove(id);
    }

    /// Arms a timer to fire at `date`, then every `interval` if given
    pub(crate) fn start_timer(&mut self, id: TimerId, date: Ticks, interval: Option<Ticks>) {
        let Some(timer) = self.timers.get_mut(id) else {
            return;
        };
        let cpu = timer.cpu;
        let old_slot = timer.slot.take();
        timer.interval = interval.filter(|&i| i > 0);
        let base = &mut self.rqs[cpu].timer_base;
        let before = base.earliest().map(|(d, _)| d);
        if let Some(slot) = old_slot {
            base.remove(slot);
        }
        let slot = base.insert(date, id);
        self.timers[id].slot = Some(slot);
        self.retarget_timer(cpu, before);
    }

    pub(crate) fn stop_timer(&mut self, id: TimerId) {
        let Some(timer) = self.timers.get_mut(id) else {
            return;
        };
        let Some(slot) = timer.slot.take() else {
            return;
        };
        let cpu = timer.cpu;
        let base = &mut self.rqs[cpu].timer_base;
        let before = base.earliest().map(|(d, _)| d);
        base.remove(slot);
        self.retarget_timer(cpu, before);
    }

    /// Reprograms the timer hardware of `cpu` if its earliest date moved
    fn retarget_timer(&mut self, cpu: usize, before: Option<Ticks>) {
        let after = self.rqs[cpu].timer_base.earliest().map(|(d, _)| d);
        if after == before {
            return;
        }
        if cpu == self.local_cpu {
            self.platform.program_timer(cpu, after);
        } else {
            self.rqs[cpu].stats.ipis += 1;
            self.platform.send_ipi(cpu, IpiKind::TimerProgram);
        }
    }

    /// Programs the local timer hardware from the local timer base
    pub(crate) fn program_local_timer(&mut self) {
        let cpu = self.local_cpu;
        let date = self.rqs[cpu].timer_base.earliest().map(|(d, _)| d);
        self.platform.program_timer(cpu, date);
    }

    /// Schedules the next in-band tick of `cpu`
    ///
    /// When the tick fires while an out-of-band thread runs, it is held back
    /// and relayed as soon as the CPU switches back to the in-band stage.
    pub fn program_inband_tick(&mut self, cpu: usize, date: Ticks) -> Result<()> {
        let timer = self.rqs.get(cpu).ok_or(Error::InvalidArgument)?.inband_timer;
        self.start_timer(timer, date, None);
        Ok(())
    }

    /// Moves time forward by `delta`
    ///
    /// Time is charged to the current thread of every CPU, and due timers
    /// fire in date order, each one inside an interrupt frame on its CPU so
    /// that the resulting reschedules happen on interrupt exit.
    pub fn advance_clock(&mut self, delta: Ticks) {
        if delta <= 0 {
            return;
        }
        let target = self.clock.now.saturating_add(delta);
        let saved_cpu = self.local_cpu;
        while let Some((date, cpu, id)) = self.next_due_timer(target) {
            let date = date.max(self.clock.now);
            self.charge_time(date - self.clock.now);
            self.clock.now = date;
            self.enter_irq(cpu);
            self.fire_timer(id);
            self.exit_irq(cpu);
        }
        self.charge_time(target - self.clock.now);
        self.clock.now = target;
        self.local_cpu = saved_cpu;
    }

    fn next_due_timer(&self, limit: Ticks) -> Option<(Ticks, usize, TimerId)> {
        self.rqs
            .iter()
            .filter_map(|rq| rq.timer_base.earliest().map(|(d, id)| (d, rq.cpu, id)))
            .filter(|&(d, _, _)| d <= limit)
            .min_by_key(|&(d, cpu, _)| (d, cpu))
    }

    /// Charges `elapsed` to the running thread of each CPU
    fn charge_time(&mut self, elapsed: Ticks) {
        if elapsed <= 0 {
            return;
        }
        for cpu in 0..self.rqs.len() {
            let curr = self.rqs[cpu].curr;
            let t = &mut self.threads[curr];
            t.stats.exec_time += elapsed;
            if t.sched_class == SchedClass::Quota {
                let group = t.quota_group();
                self.rqs[cpu].quota.charge(group, elapsed);
            }
        }
    }

    fn fire_timer(&mut self, id: TimerId) {
        let Some(timer) = self.timers.get_mut(id) else {
            return;
        };
        let cpu = timer.cpu;
        let action = timer.action;
        let Some(slot) = timer.slot.take() else {
            return;
        };
        let base = &mut self.rqs[cpu].timer_base;
        base.remove(slot);

        if let Some(interval) = timer.interval {
            // skip the periods missed while the date was in the past
            let mut next = slot.0.saturating_add(interval);
            while next <= self.clock.now && next < Ticks::MAX {
                next = next.saturating_add(interval);
                timer.overruns += 1;
            }
            // a period reaching past the end of time never recurs
            if next > self.clock.now {
                timer.slot = Some(base.insert(next, id));
            }
        }
        self.program_local_timer();

        evl_trace!("evl: timer {:?} fired on cpu{}: {:?}", id, cpu, action);
        match action {
            TimerAction::Timeout(tid) => self.thread_timeout(tid),
            TimerAction::RoundRobin => self.sched_tick(cpu),
            TimerAction::QuotaRefill => self.quota_refill(cpu),
            TimerAction::QuotaLimit => self.resched(cpu),
            TimerAction::TpRotate => self.tp_rotate(cpu),
            TimerAction::InbandTick => self.inband_tick(cpu),
        }
    }

    fn inband_tick(&mut self, cpu: usize) {
        let rq = &mut self.rqs[cpu];
        if rq.curr == rq.root {
            self.platform.relay_inband_tick(cpu);
        } else {
            rq.flags.insert(crate::sched::rq::RqFlags::TPROXY);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_realtime_offset() {
        let clock = Clock {
            now: 100,
            realtime_offset: 1_000,
        };
        assert_eq!(clock.read(ClockId::Realtime), 1_100);
        assert_eq!(clock.to_monotonic(ClockId::Realtime, 1_500), 500);
        assert_eq!(clock.to_monotonic(ClockId::Monotonic, 1_500), 1_500);
    }

    #[test]
    fn test_clock_id_from_raw() {
        assert_eq!(ClockId::from_raw(CLOCK_MONOTONIC), Ok(ClockId::Monotonic));
        assert_eq!(ClockId::from_raw(CLOCK_REALTIME), Ok(ClockId::Realtime));
        assert_eq!(ClockId::from_raw(3), Err(Error::InvalidArgument));
    }
}
