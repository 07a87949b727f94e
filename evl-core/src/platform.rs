//! Host environment contract
//!
//! Everything architecture- or board-specific the core needs is reached
//! through [`Platform`]: the actual register-level context switch, handing a
//! CPU between the in-band kernel and the out-of-band stage, programming the
//! per-CPU timer hardware, sending inter-processor interrupts and saving or
//! restoring FPU contexts. All hooks default to no-ops, so a host only
//! implements what it has.

use evl_api::Ticks;

use crate::thread::ThreadId;

/// Execution stage a CPU is running on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Stage {
    /// The general-purpose kernel owns the CPU (root thread current)
    #[default]
    InBand,
    /// An out-of-band thread owns the CPU
    OutOfBand,
}

/// Inter-processor interrupts the core sends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpiKind {
    /// Raise the reschedule flag on the target CPU
    Reschedule,
    /// Reprogram the target CPU's timer hardware after a remote arming
    TimerProgram,
}

pub trait Platform: Send {
    /// Switch the register context of `cpu` from `prev` to `next`
    fn switch_context(&mut self, _cpu: usize, _prev: ThreadId, _next: ThreadId) {}

    /// Hand `cpu` over to `stage`
    fn switch_stage(&mut self, _cpu: usize, _stage: Stage) {}

    /// Program the timer of `cpu` to fire at `date`, or stop it
    fn program_timer(&mut self, _cpu: usize, _date: Option<Ticks>) {}

    fn send_ipi(&mut self, _cpu: usize, _kind: IpiKind) {}

    fn fpu_save(&mut self, _cpu: usize, _thread: ThreadId) {}

    fn fpu_restore(&mut self, _cpu: usize, _thread: ThreadId) {}

    /// Deliver a postponed in-band timer tick to the in-band kernel
    fn relay_inband_tick(&mut self, _cpu: usize) {}
}

/// Platform with no hardware behind it
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPlatform;

impl Platform for NullPlatform {}
