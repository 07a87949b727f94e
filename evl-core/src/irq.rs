//! Interrupt frames and inter-processor interrupts
//!
//! While a CPU runs an interrupt handler, reschedule requests are only
//! recorded. The dispatcher runs once, when the outermost frame exits.

use evl_api::{Error, Result};

use crate::kernel::Core;
use crate::platform::IpiKind;
use crate::sched::rq::RqFlags;

impl Core {
    /// Opens an interrupt frame on `cpu`, which becomes the local CPU
    pub fn irq_enter(&mut self, cpu: usize) -> Result<()> {
        if cpu >= self.rqs.len() {
            return Err(Error::InvalidArgument);
        }
        self.enter_irq(cpu);
        Ok(())
    }

    /// Closes an interrupt frame, rescheduling `cpu` if it was the outermost
    pub fn irq_exit(&mut self, cpu: usize) -> Result<()> {
        let rq = self.rqs.get(cpu).ok_or(Error::InvalidArgument)?;
        if rq.irq_depth == 0 {
            return Err(Error::InvalidArgument);
        }
        self.exit_irq(cpu);
        Ok(())
    }

    /// Handles an IPI received by `cpu`
    ///
    /// The local CPU is restored on return.
    pub fn handle_ipi(&mut self, cpu: usize, kind: IpiKind) -> Result<()> {
        if cpu >= self.rqs.len() {
            return Err(Error::InvalidArgument);
        }
        let saved = self.local_cpu;
        self.enter_irq(cpu);
        match kind {
            // the sender already flagged the run queue
            IpiKind::Reschedule => {}
            IpiKind::TimerProgram => self.program_local_timer(),
        }
        self.exit_irq(cpu);
        self.local_cpu = saved;
        Ok(())
    }

    pub(crate) fn enter_irq(&mut self, cpu: usize) {
        self.local_cpu = cpu;
        let rq = &mut self.rqs[cpu];
        rq.irq_depth += 1;
        rq.flags.insert(RqFlags::IRQ);
        rq.stats.irqs += 1;
    }

    pub(crate) fn exit_irq(&mut self, cpu: usize) {
        let rq = &mut self.rqs[cpu];
        if evl_warn_on!(rq.irq_depth == 0) {
            return;
        }
        rq.irq_depth -= 1;
        if rq.irq_depth > 0 {
            return;
        }
        rq.flags.remove(RqFlags::IRQ);
        if rq.flags.contains(RqFlags::RESCHED) || rq.resched_mask != 0 {
            self.local_cpu = cpu;
            self.schedule_on(cpu);
        }
    }
}
