//! Monitors: gates and events
//!
//! A gate is a PI or PP mutex. An event is a condition threads wait on,
//! optionally under a gate which the wait releases before sleeping and which
//! the waiter takes back with `unwait` once woken. The first gated wait binds
//! the event to its gate for good.
//!
//! Signals on a gated event are held until the gate is exited, so a woken
//! waiter never finds the gate still owned by the signaler. An event used
//! without a gate latches a signal sent while nobody waits; the next wait
//! consumes it.

use alloc::vec::Vec;

use evl_api::abi::{MonitorFlags, state};
use evl_api::{Error, Result, Timeout, TimeoutMode};

use crate::arena::Key;
use crate::clock::ClockId;
use crate::heap::HeapOffset;
use crate::kernel::Core;
use crate::sync::mutex::{MutexId, MutexProtocol, check_protocol};
use crate::thread::{ThreadId, ThreadInfo};
use crate::wait::{Outcome, WaitFlags, WaitOwner, WaitQueueId};

pub type MonitorId = Key<Monitor>;

/// Signals recorded on a gated event until its gate is exited
#[derive(Debug, Default)]
struct PendingSignals {
    broadcast: bool,
    /// Untargeted signals, each waking the best waiter
    count: usize,
    targets: Vec<ThreadId>,
}

impl PendingSignals {
    fn is_empty(&self) -> bool {
        !self.broadcast && self.count == 0 && self.targets.is_empty()
    }
}

pub(crate) struct Gate {
    mutex: MutexId,
    events: Vec<MonitorId>,
}

pub(crate) struct Event {
    wq: WaitQueueId,
    gate: Option<MonitorId>,
    raised: bool,
    pending: PendingSignals,
}

pub(crate) enum MonitorKind {
    Gate(Gate),
    Event(Event),
}

pub struct Monitor {
    pub(crate) state: HeapOffset,
    pub(crate) kind: MonitorKind,
}

impl Monitor {
    pub fn is_gate(&self) -> bool {
        matches!(self.kind, MonitorKind::Gate(_))
    }

    pub fn state_offset(&self) -> HeapOffset {
        self.state
    }

    /// Mutex behind a gate
    pub fn gate_mutex(&self) -> Option<MutexId> {
        match &self.kind {
            MonitorKind::Gate(g) => Some(g.mutex),
            MonitorKind::Event(_) => None,
        }
    }

    /// Gate an event is bound to
    pub fn bound_gate(&self) -> Option<MonitorId> {
        match &self.kind {
            MonitorKind::Event(e) => e.gate,
            MonitorKind::Gate(_) => None,
        }
    }
}

impl Core {
    pub fn create_gate(&mut self, protocol: MutexProtocol, clock: ClockId) -> Result<MonitorId> {
        self.check_running()?;
        check_protocol(protocol)?;
        let offset = self.heap.alloc(state::MONITOR_WORDS)?;
        let fastlock = HeapOffset::from_bytes(offset.bytes() + 4 * state::MONITOR_FASTLOCK as u32);
        let mutex = self.new_mutex(fastlock, None, protocol, clock);
        let gate = self.monitors.insert(Monitor {
            state: offset,
            kind: MonitorKind::Gate(Gate {
                mutex,
                events: Vec::new(),
            }),
        });
        evl_debug!("evl: gate {:?} created", gate);
        Ok(gate)
    }

    pub fn create_event(&mut self, clock: ClockId) -> Result<MonitorId> {
        self.check_running()?;
        let offset = self.heap.alloc(state::MONITOR_WORDS)?;
        let wq = self.new_wait_queue(clock, WaitFlags::PRIO, WaitOwner::Plain);
        let event = self.monitors.insert(Monitor {
            state: offset,
            kind: MonitorKind::Event(Event {
                wq,
                gate: None,
                raised: false,
                pending: PendingSignals::default(),
            }),
        });
        evl_debug!("evl: event {:?} created", event);
        Ok(event)
    }

    pub fn monitor(&self, mon: MonitorId) -> Result<&Monitor> {
        self.monitors.get(mon).ok_or(Error::NotFound)
    }

    /// Flags published in the monitor's shared state
    pub fn monitor_flags(&self, mon: MonitorId) -> Result<MonitorFlags> {
        let m = self.monitor(mon)?;
        let raw = self.heap.load(m.state, state::MONITOR_FLAGS);
        Ok(MonitorFlags::from_bits_truncate(raw))
    }

    /// Deletes a gate or an event
    ///
    /// Sleepers wake up with [`Error::Deleted`]. Events bound to a deleted
    /// gate become unbound and lose their pending signals.
    pub fn destroy_monitor(&mut self, mon: MonitorId) -> Result<()> {
        let m = self.monitors.remove(mon).ok_or(Error::NotFound)?;
        match m.kind {
            MonitorKind::Gate(gate) => {
                for ev in gate.events {
                    if let Some(e) = self.event_mut(ev) {
                        e.gate = None;
                        e.pending = PendingSignals::default();
                    }
                    self.publish_event_flags(ev);
                }
                self.drop_mutex(gate.mutex);
            }
            MonitorKind::Event(event) => {
                self.flush_wait_queue(event.wq, ThreadInfo::RMID);
                self.wait_queues.remove(event.wq);
                if let Some(g) = event.gate {
                    if let Some(gate) = self.gate_mut(g) {
                        gate.events.retain(|&e| e != mon);
                    }
                    self.publish_gate_flags(g);
                }
            }
        }
        self.heap.free(m.state, state::MONITOR_WORDS);
        evl_debug!("evl: monitor {:?} destroyed", mon);
        self.schedule();
        Ok(())
    }

    /// Enters a gate, sleeping while another thread holds it
    pub fn monitor_enter(
        &mut self,
        gate: MonitorId,
        caller: ThreadId,
        timeout: Timeout,
        mode: TimeoutMode,
    ) -> Result<Outcome> {
        let mutex = self.gate_mutex_of(gate)?;
        self.mutex_lock(mutex, caller, timeout, mode)
    }

    pub fn monitor_tryenter(&mut self, gate: MonitorId, caller: ThreadId) -> Result<()> {
        let mutex = self.gate_mutex_of(gate)?;
        self.mutex_trylock(mutex, caller)
    }

    /// Leaves a gate, delivering the signals held on its events first
    pub fn monitor_exit(&mut self, gate: MonitorId, caller: ThreadId) -> Result<()> {
        self.check_oob_caller(caller)?;
        let mutex = self.gate_mutex_of(gate)?;
        if self.mutex_owner(mutex)? != Some(caller) {
            return Err(Error::NotOwner);
        }
        self.deliver_pending(gate);
        self.unlock_mutex(mutex, caller)?;
        self.schedule();
        Ok(())
    }

    /// Waits for `event` to be signaled
    ///
    /// With a `gate`, the caller must hold it; the gate is released before
    /// sleeping and has to be taken back with
    /// [`monitor_unwait`](Self::monitor_unwait), whatever the outcome.
    /// Without a gate, a signal latched while nobody waited completes the
    /// wait immediately.
    pub fn monitor_wait(
        &mut self,
        event: MonitorId,
        caller: ThreadId,
        gate: Option<MonitorId>,
        timeout: Timeout,
        mode: TimeoutMode,
    ) -> Result<Outcome> {
        self.check_oob_caller(caller)?;
        let e = self.event(event)?;
        let (wq, bound) = (e.wq, e.gate);

        let Some(gate) = gate else {
            if bound.is_some() {
                return Err(Error::InvalidArgument);
            }
            if let Some(e) = self.event_mut(event) {
                if core::mem::take(&mut e.raised) {
                    self.publish_event_flags(event);
                    return Ok(Outcome::Completed);
                }
            }
            self.block_on(wq, caller, timeout, mode)?;
            self.schedule();
            return Ok(Outcome::Blocked);
        };

        let mutex = self.gate_mutex_of(gate)?;
        if bound.is_some_and(|g| g != gate) {
            return Err(Error::InvalidArgument);
        }
        if self.mutex_owner(mutex)? != Some(caller) {
            return Err(Error::NotOwner);
        }
        if timeout.is_nonblock() {
            return Err(Error::WouldBlock);
        }
        if bound.is_none() {
            if let Some(e) = self.event_mut(event) {
                e.gate = Some(gate);
            }
            if let Some(g) = self.gate_mut(gate) {
                g.events.push(event);
            }
        }

        // signals sent before this wait must not wake us
        self.deliver_pending(gate);
        self.unlock_mutex(mutex, caller)?;
        let blocked = self.block_on(wq, caller, timeout, mode);
        self.schedule();
        blocked.map(|()| Outcome::Blocked)
    }

    /// Takes the gate back after an event wait
    pub fn monitor_unwait(&mut self, gate: Option<MonitorId>, caller: ThreadId) -> Result<Outcome> {
        match gate {
            Some(gate) => self.monitor_enter(gate, caller, Timeout::INFINITE, TimeoutMode::Relative),
            None => {
                self.check_oob_caller(caller)?;
                Ok(Outcome::Completed)
            }
        }
    }

    /// Signals `event`, waking `target` or the best waiter, or every waiter
    /// on `broadcast`
    pub fn monitor_signal(&mut self, event: MonitorId, target: Option<ThreadId>, broadcast: bool) -> Result<()> {
        self.check_running()?;
        if let Some(target) = target {
            self.thread(target)?;
        }
        let e = self.event(event)?;
        let (wq, gate) = (e.wq, e.gate);

        if let Some(gate) = gate {
            if let Some(e) = self.event_mut(event) {
                match (broadcast, target) {
                    (true, _) => e.pending.broadcast = true,
                    (false, Some(target)) => e.pending.targets.push(target),
                    (false, None) => e.pending.count += 1,
                }
            }
            self.publish_event_flags(event);
            self.publish_gate_flags(gate);
            return Ok(());
        }

        let woken = if broadcast {
            self.flush_wait_queue(wq, ThreadInfo::SIGNAL | ThreadInfo::BCAST)
        } else {
            usize::from(self.wake_waiter(wq, target, ThreadInfo::SIGNAL).is_some())
        };
        if woken == 0 && target.is_none() {
            if let Some(e) = self.event_mut(event) {
                e.raised = true;
            }
            self.publish_event_flags(event);
        }
        self.schedule();
        Ok(())
    }

    /// Wakes the waiters signaled while `gate` was held
    fn deliver_pending(&mut self, gate: MonitorId) {
        let events = match self.monitors.get(gate).map(|m| &m.kind) {
            Some(MonitorKind::Gate(g)) => g.events.clone(),
            _ => return,
        };
        for ev in events {
            let Some(e) = self.event_mut(ev) else {
                continue;
            };
            if e.pending.is_empty() {
                continue;
            }
            let pending = core::mem::take(&mut e.pending);
            let wq = e.wq;
            if pending.broadcast {
                self.flush_wait_queue(wq, ThreadInfo::SIGNAL | ThreadInfo::BCAST);
            } else {
                for target in pending.targets {
                    self.wake_waiter(wq, Some(target), ThreadInfo::SIGNAL);
                }
                for _ in 0..pending.count {
                    if self.wake_waiter(wq, None, ThreadInfo::SIGNAL).is_none() {
                        break;
                    }
                }
            }
            self.publish_event_flags(ev);
        }
        self.publish_gate_flags(gate);
    }

    fn publish_event_flags(&self, event: MonitorId) {
        let Some(m) = self.monitors.get(event) else {
            return;
        };
        let MonitorKind::Event(e) = &m.kind else {
            return;
        };
        let mut flags = MonitorFlags::empty();
        flags.set(MonitorFlags::SIGNALED, !e.pending.is_empty());
        flags.set(MonitorFlags::BROADCAST, e.pending.broadcast);
        flags.set(MonitorFlags::RAISED, e.raised);
        self.heap.store(m.state, state::MONITOR_FLAGS, flags.bits());
    }

    fn publish_gate_flags(&self, gate: MonitorId) {
        let Some(m) = self.monitors.get(gate) else {
            return;
        };
        let MonitorKind::Gate(g) = &m.kind else {
            return;
        };
        let mut flags = MonitorFlags::empty();
        for &ev in &g.events {
            if let Ok(e) = self.event(ev) {
                if !e.pending.is_empty() {
                    flags |= MonitorFlags::SIGNALED;
                }
                if e.pending.broadcast {
                    flags |= MonitorFlags::BROADCAST;
                }
            }
        }
        self.heap.store(m.state, state::MONITOR_FLAGS, flags.bits());
    }

    fn gate_mutex_of(&self, gate: MonitorId) -> Result<MutexId> {
        self.monitor(gate)?.gate_mutex().ok_or(Error::InvalidArgument)
    }

    fn event(&self, event: MonitorId) -> Result<&Event> {
        match &self.monitor(event)?.kind {
            MonitorKind::Event(e) => Ok(e),
            MonitorKind::Gate(_) => Err(Error::InvalidArgument),
        }
    }

    fn event_mut(&mut self, event: MonitorId) -> Option<&mut Event> {
        match &mut self.monitors.get_mut(event)?.kind {
            MonitorKind::Event(e) => Some(e),
            MonitorKind::Gate(_) => None,
        }
    }

    fn gate_mut(&mut self, gate: MonitorId) -> Option<&mut Gate> {
        match &mut self.monitors.get_mut(gate)?.kind {
            MonitorKind::Gate(g) => Some(g),
            MonitorKind::Event(_) => None,
        }
    }
}
