//! Shared helpers for evl-core integration tests

#![allow(dead_code)]

use std::sync::Arc;

use evl_api::{SchedParams, Ticks};
use evl_core::{Core, CoreConfig, IpiKind, Platform, Stage, ThreadId};

/// Everything the core asked the platform to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Switch { cpu: usize, prev: ThreadId, next: ThreadId },
    Stage { cpu: usize, stage: Stage },
    Timer { cpu: usize, date: Option<Ticks> },
    Ipi { cpu: usize, kind: IpiKind },
    FpuSave { cpu: usize, thread: ThreadId },
    FpuRestore { cpu: usize, thread: ThreadId },
    InbandTick { cpu: usize },
}

pub type EventLog = Arc<spin::Mutex<Vec<Event>>>;

/// Platform recording every request into a shared log
#[derive(Default)]
pub struct RecordingPlatform {
    pub log: EventLog,
}

impl Platform for RecordingPlatform {
    fn switch_context(&mut self, cpu: usize, prev: ThreadId, next: ThreadId) {
        self.log.lock().push(Event::Switch { cpu, prev, next });
    }

    fn switch_stage(&mut self, cpu: usize, stage: Stage) {
        self.log.lock().push(Event::Stage { cpu, stage });
    }

    fn program_timer(&mut self, cpu: usize, date: Option<Ticks>) {
        self.log.lock().push(Event::Timer { cpu, date });
    }

    fn send_ipi(&mut self, cpu: usize, kind: IpiKind) {
        self.log.lock().push(Event::Ipi { cpu, kind });
    }

    fn fpu_save(&mut self, cpu: usize, thread: ThreadId) {
        self.log.lock().push(Event::FpuSave { cpu, thread });
    }

    fn fpu_restore(&mut self, cpu: usize, thread: ThreadId) {
        self.log.lock().push(Event::FpuRestore { cpu, thread });
    }

    fn relay_inband_tick(&mut self, cpu: usize) {
        self.log.lock().push(Event::InbandTick { cpu });
    }
}

/// Running core over a recording platform
pub fn setup_core(config: CoreConfig) -> (Core, EventLog) {
    let platform = RecordingPlatform::default();
    let log = platform.log.clone();
    let mut core = Core::new(config, Box::new(platform)).expect("core creation");
    core.start().expect("core start");
    (core, log)
}

pub fn single_cpu_core() -> (Core, EventLog) {
    setup_core(CoreConfig::default())
}

pub fn fifo(prio: i32) -> SchedParams {
    SchedParams::Fifo { prio, rr_quantum: None }
}

/// Creates and starts a thread
pub fn spawn(core: &mut Core, name: &str, cpu: usize, params: SchedParams) -> ThreadId {
    let t = core.create_thread(name, cpu, params).expect("thread creation");
    core.start_thread(t).expect("thread start");
    t
}

/// Context switches recorded so far, as (cpu, next) pairs
pub fn switches(log: &EventLog) -> Vec<(usize, ThreadId)> {
    log.lock()
        .iter()
        .filter_map(|e| match *e {
            Event::Switch { cpu, next, .. } => Some((cpu, next)),
            _ => None,
        })
        .collect()
}

pub fn ipis(log: &EventLog) -> Vec<(usize, IpiKind)> {
    log.lock()
        .iter()
        .filter_map(|e| match *e {
            Event::Ipi { cpu, kind } => Some((cpu, kind)),
            _ => None,
        })
        .collect()
}
