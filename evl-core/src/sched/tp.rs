//! Time partitioning class
//!
//! Threads belong to one of the CPU's partitions. An installed schedule
//! splits a repeating time frame into windows, each granting the CPU to one
//! partition or to nobody; only threads of the active window's partition
//! are eligible. A one-shot timer rotates the windows.

use alloc::vec::Vec;

use evl_api::sched::SchedParams;
use evl_api::{Error, Result, Ticks};

use crate::clock::TimerId;
use crate::kernel::Core;
use crate::sched::queue::MultiLevelQueue;
use crate::sched::rq::RunQueue;
use crate::thread::{Thread, ThreadId};

/// One slot of the time frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TpWindow {
    /// Start of the window from the beginning of the frame
    pub offset: Ticks,
    /// Partition granted the CPU, `None` for an idle window
    pub partition: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpSchedule {
    /// Frame length; the last window ends there
    pub duration: Ticks,
    pub windows: Vec<TpWindow>,
}

impl TpSchedule {
    fn validate(&self, nr_partitions: usize) -> Result<()> {
        let first = self.windows.first().ok_or(Error::InvalidArgument)?;
        if first.offset != 0 || self.duration <= 0 {
            return Err(Error::InvalidArgument);
        }
        let ordered = self
            .windows
            .windows(2)
            .all(|pair| pair[0].offset < pair[1].offset);
        let in_frame = self.windows.iter().all(|w| w.offset < self.duration);
        let known = self
            .windows
            .iter()
            .all(|w| w.partition.is_none_or(|p| p < nr_partitions));
        if ordered && in_frame && known {
            Ok(())
        } else {
            Err(Error::InvalidArgument)
        }
    }

    /// End of window `index`, relative to the frame start
    fn window_end(&self, index: usize) -> Ticks {
        self.windows
            .get(index + 1)
            .map_or(self.duration, |w| w.offset)
    }
}

pub(crate) struct TpState {
    partitions: Vec<MultiLevelQueue>,
    schedule: Option<TpSchedule>,
    active: Option<usize>,
    window: usize,
    frame_start: Ticks,
    running: bool,
    timer: TimerId,
}

impl TpState {
    pub(crate) fn new(nr_partitions: usize, timer: TimerId) -> Self {
        Self {
            partitions: (0..nr_partitions).map(|_| MultiLevelQueue::new()).collect(),
            schedule: None,
            active: None,
            window: 0,
            frame_start: 0,
            running: false,
            timer,
        }
    }

    pub(crate) fn nr_queued(&self) -> usize {
        self.partitions.iter().map(|p| p.len()).sum()
    }

    fn queue_of(&mut self, t: &Thread) -> Option<&mut MultiLevelQueue> {
        usize::try_from(t.tp_partition())
            .ok()
            .and_then(|p| self.partitions.get_mut(p))
    }
}

pub(super) fn enqueue(rq: &mut RunQueue, t: &Thread) {
    if let Some(q) = rq.tp.queue_of(t) {
        q.add_tail(t.id, t.cprio);
    }
}

pub(super) fn requeue(rq: &mut RunQueue, t: &Thread) {
    if let Some(q) = rq.tp.queue_of(t) {
        q.add_head(t.id, t.cprio);
    }
}

pub(super) fn dequeue(rq: &mut RunQueue, t: &Thread) -> bool {
    rq.tp.queue_of(t).is_some_and(|q| q.remove(t.id, t.cprio))
}

pub(super) fn pick(rq: &mut RunQueue) -> Option<ThreadId> {
    let active = rq.tp.active?;
    rq.tp.partitions.get_mut(active)?.pop_highest()
}

pub(super) fn chkparam(rq: &RunQueue, params: &SchedParams) -> Result<()> {
    match *params {
        SchedParams::Tp { part, .. } if (part as usize) < rq.tp.partitions.len() => Ok(()),
        _ => Err(Error::InvalidArgument),
    }
}

impl Core {
    /// Installs a schedule on `cpu`, replacing (and stopping) any previous one
    pub fn tp_install(&mut self, cpu: usize, schedule: TpSchedule) -> Result<()> {
        self.check_running()?;
        let rq = self.rqs.get(cpu).ok_or(Error::InvalidArgument)?;
        schedule.validate(rq.tp.partitions.len())?;
        self.tp_stop_frame(cpu);
        self.rqs[cpu].tp.schedule = Some(schedule);
        Ok(())
    }

    pub fn tp_uninstall(&mut self, cpu: usize) -> Result<()> {
        self.check_running()?;
        let rq = self.rqs.get_mut(cpu).ok_or(Error::InvalidArgument)?;
        if rq.tp.schedule.is_none() {
            return Err(Error::NotFound);
        }
        self.tp_stop_frame(cpu);
        self.rqs[cpu].tp.schedule = None;
        self.schedule();
        Ok(())
    }

    /// Starts the installed frame at the current date
    pub fn tp_start(&mut self, cpu: usize) -> Result<()> {
        self.check_running()?;
        let now = self.now();
        let rq = self.rqs.get_mut(cpu).ok_or(Error::InvalidArgument)?;
        let tp = &mut rq.tp;
        let schedule = tp.schedule.as_ref().ok_or(Error::NotFound)?;
        if tp.running {
            return Ok(());
        }
        let first_end = schedule.window_end(0);
        tp.active = schedule.windows[0].partition;
        tp.window = 0;
        tp.frame_start = now;
        tp.running = true;
        let timer = tp.timer;
        self.start_timer(timer, now.saturating_add(first_end), None);
        self.resched(cpu);
        self.schedule();
        Ok(())
    }

    pub fn tp_stop(&mut self, cpu: usize) -> Result<()> {
        self.check_running()?;
        if cpu >= self.rqs.len() {
            return Err(Error::InvalidArgument);
        }
        self.tp_stop_frame(cpu);
        self.schedule();
        Ok(())
    }

    /// Returns a copy of the installed schedule
    pub fn tp_get(&self, cpu: usize) -> Result<TpSchedule> {
        let rq = self.rqs.get(cpu).ok_or(Error::InvalidArgument)?;
        rq.tp.schedule.clone().ok_or(Error::NotFound)
    }

    /// Partition eligible right now on `cpu`
    pub fn tp_active_partition(&self, cpu: usize) -> Option<usize> {
        self.rqs.get(cpu).and_then(|rq| rq.tp.active)
    }

    fn tp_stop_frame(&mut self, cpu: usize) {
        let tp = &mut self.rqs[cpu].tp;
        if !tp.running {
            return;
        }
        tp.running = false;
        tp.active = None;
        let timer = tp.timer;
        self.stop_timer(timer);
        self.resched(cpu);
    }

    /// Window boundary: activate the next window and rearm for its end
    pub(crate) fn tp_rotate(&mut self, cpu: usize) {
        let tp = &mut self.rqs[cpu].tp;
        let Some(schedule) = tp.schedule.as_ref() else {
            return;
        };
        if !tp.running {
            return;
        }
        tp.window += 1;
        if tp.window >= schedule.windows.len() {
            tp.window = 0;
            tp.frame_start = tp.frame_start.saturating_add(schedule.duration);
        }
        tp.active = schedule.windows[tp.window].partition;
        let date = tp.frame_start.saturating_add(schedule.window_end(tp.window));
        let timer = tp.timer;
        evl_trace!("evl: cpu{} tp window {} -> {:?}", cpu, tp.window, tp.active);
        self.start_timer(timer, date, None);
        self.resched(cpu);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(offset: Ticks, partition: Option<usize>) -> TpWindow {
        TpWindow { offset, partition }
    }

    #[test]
    fn test_schedule_validation() {
        let good = TpSchedule {
            duration: 100,
            windows: alloc::vec![window(0, Some(0)), window(40, None), window(60, Some(1))],
        };
        assert!(good.validate(2).is_ok());
        assert_eq!(good.window_end(0), 40);
        assert_eq!(good.window_end(2), 100);
        assert!(good.validate(1).is_err());

        let unordered = TpSchedule {
            duration: 100,
            windows: alloc::vec![window(0, Some(0)), window(50, None), window(50, Some(0))],
        };
        assert!(unordered.validate(2).is_err());

        let late_start = TpSchedule {
            duration: 100,
            windows: alloc::vec![window(10, Some(0))],
        };
        assert!(late_start.validate(2).is_err());
        assert!(TpSchedule { duration: 10, windows: Vec::new() }.validate(1).is_err());
    }
}
