//! The core context
//!
//! [`Core`] owns every run queue, thread, timer and synchronization object.
//! Each operation takes it by `&mut self`, which stands for holding the
//! single core lock with interrupts off. Hosts driving several CPUs from
//! several host threads share it as a [`SharedCore`].

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use evl_api::{Error, FundleT, Result};
use hashbrown::HashMap;

use crate::arena::Arena;
use crate::clock::{Clock, Timer, TimerAction};
use crate::config::CoreConfig;
use crate::factory::ElementRegistry;
use crate::heap::SharedHeap;
use crate::platform::Platform;
use crate::runstate::{RunState, RunStateControl};
use crate::sched::quota::QuotaState;
use crate::sched::rq::RunQueue;
use crate::sched::tp::TpState;
use crate::sync::monitor::Monitor;
use crate::sync::mutex::Mutex;
use crate::sync::semaphore::Semaphore;
use crate::thread::{Thread, ThreadInfo};
use crate::wait::WaitQueue;

/// A core shared between host threads
pub type SharedCore = spin::Mutex<Core>;

pub struct Core {
    pub(crate) config: CoreConfig,
    pub(crate) run_state: Arc<RunStateControl>,
    pub(crate) clock: Clock,
    pub(crate) timers: Arena<Timer>,
    pub(crate) rqs: Vec<RunQueue>,
    pub(crate) threads: Arena<Thread>,
    pub(crate) handles: HashMap<FundleT, crate::thread::ThreadId>,
    pub(crate) next_fundle: FundleT,
    pub(crate) wait_queues: Arena<WaitQueue>,
    pub(crate) mutexes: Arena<Mutex>,
    pub(crate) semaphores: Arena<Semaphore>,
    pub(crate) monitors: Arena<Monitor>,
    pub(crate) heap: Arc<SharedHeap>,
    pub(crate) elements: ElementRegistry,
    pub(crate) platform: Box<dyn Platform>,
    /// CPU the current operation runs on
    pub(crate) local_cpu: usize,
}

impl Core {
    /// Builds a core with one run queue and root thread per CPU
    ///
    /// The core comes up in [`RunState::Warmup`]; [`start`](Self::start)
    /// opens it to clients.
    pub fn new(config: CoreConfig, platform: Box<dyn Platform>) -> Result<Self> {
        if let Err(e) = config.validate() {
            evl_error!("evl: refusing core configuration {:?}: {}", config, e);
            return Err(e);
        }
        let nr_cpus = config.nr_cpus;
        let mut core = Core {
            run_state: Arc::new(RunStateControl::new()),
            clock: Clock::default(),
            timers: Arena::new(),
            rqs: Vec::with_capacity(nr_cpus),
            threads: Arena::new(),
            handles: HashMap::new(),
            next_fundle: 1,
            wait_queues: Arena::new(),
            mutexes: Arena::new(),
            semaphores: Arena::new(),
            monitors: Arena::new(),
            heap: Arc::new(SharedHeap::new(config.heap_words)),
            elements: ElementRegistry::new(),
            platform,
            local_cpu: 0,
            config,
        };

        for cpu in 0..nr_cpus {
            let root = core.create_root_thread(cpu);
            let rr_timer = core.create_timer(cpu, TimerAction::RoundRobin);
            let inband_timer = core.create_timer(cpu, TimerAction::InbandTick);
            let refill = core.create_timer(cpu, TimerAction::QuotaRefill);
            let limit = core.create_timer(cpu, TimerAction::QuotaLimit);
            let rotate = core.create_timer(cpu, TimerAction::TpRotate);
            let quota = QuotaState::new(core.config.quota_period, refill, limit);
            let tp = TpState::new(core.config.tp_partitions, rotate);
            core.rqs
                .push(RunQueue::new(cpu, root, rr_timer, inband_timer, quota, tp));
        }

        core.run_state.transition(RunState::Warmup)?;
        evl_info!("evl: core ready on {} cpu(s)", nr_cpus);
        Ok(core)
    }

    /// Opens the core to clients
    pub fn start(&mut self) -> Result<()> {
        self.run_state.transition(RunState::Running)?;
        Ok(())
    }

    /// Refuses further client requests; existing objects stay as they are
    pub fn stop(&mut self) -> Result<()> {
        self.run_state.transition(RunState::Stopped)?;
        Ok(())
    }

    /// Begins dismantling: every sleeper wakes up with [`Error::Deleted`]
    pub fn teardown(&mut self) -> Result<()> {
        self.run_state.transition(RunState::Teardown)?;
        let queues: Vec<_> = self.wait_queues.keys().collect();
        let mut woken = 0;
        for wq in queues {
            woken += self.flush_wait_queue(wq, ThreadInfo::RMID);
        }
        evl_info!("evl: teardown released {} waiter(s)", woken);
        for cpu in 0..self.rqs.len() {
            self.local_cpu = cpu;
            self.schedule_on(cpu);
        }
        self.local_cpu = 0;
        Ok(())
    }

    pub fn unload(&mut self) -> Result<()> {
        self.run_state.transition(RunState::Disabled)?;
        Ok(())
    }

    pub fn run_state(&self) -> RunState {
        self.run_state.state()
    }

    /// Run-state control, for registering notifiers
    pub fn run_state_control(&self) -> Arc<RunStateControl> {
        self.run_state.clone()
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Shared state heap; element state offsets point into it
    pub fn heap(&self) -> Arc<SharedHeap> {
        self.heap.clone()
    }

    pub fn nr_cpus(&self) -> usize {
        self.rqs.len()
    }

    pub fn local_cpu(&self) -> usize {
        self.local_cpu
    }

    /// Selects the CPU subsequent operations run on
    pub fn set_local_cpu(&mut self, cpu: usize) -> Result<()> {
        if cpu >= self.rqs.len() {
            return Err(Error::InvalidArgument);
        }
        self.local_cpu = cpu;
        Ok(())
    }

    pub(crate) fn check_running(&self) -> Result<()> {
        if self.run_state.is_running() {
            Ok(())
        } else {
            Err(Error::Unavailable)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::NullPlatform;

    #[test]
    fn test_new_core_is_warming_up() {
        let core = Core::new(CoreConfig::default().with_cpus(2), Box::new(NullPlatform)).unwrap();
        assert_eq!(core.run_state(), RunState::Warmup);
        assert_eq!(core.nr_cpus(), 2);
        assert_eq!(core.nr_threads(), 2);
        assert_eq!(core.check_running(), Err(Error::Unavailable));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = CoreConfig::default().with_cpus(0);
        assert!(Core::new(config, Box::new(NullPlatform)).is_err());
    }

    #[test]
    fn test_lifecycle() {
        let mut core = Core::new(CoreConfig::default(), Box::new(NullPlatform)).unwrap();
        core.start().unwrap();
        assert!(core.check_running().is_ok());
        assert_eq!(core.start(), Err(Error::InvalidArgument));
        core.stop().unwrap();
        core.teardown().unwrap();
        core.unload().unwrap();
        assert_eq!(core.run_state(), RunState::Disabled);
    }
}
