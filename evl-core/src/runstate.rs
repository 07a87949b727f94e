//! Global run-state control
//!
//! The core moves through a one-way state machine:
//!
//! ```text
//! Disabled -> Warmup -> Running -> Stopped -> Teardown -> Disabled
//!                 \________________________/
//! ```
//!
//! Warmup may also go straight to Teardown when bring-up fails. Subsystems
//! depending on the core register a [`RunStateNotifier`] to react to each
//! completed transition.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

use evl_api::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RunState {
    Disabled = 0,
    Warmup = 1,
    Running = 2,
    Stopped = 3,
    Teardown = 4,
}

impl RunState {
    const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => RunState::Warmup,
            2 => RunState::Running,
            3 => RunState::Stopped,
            4 => RunState::Teardown,
            _ => RunState::Disabled,
        }
    }

    /// Tells whether `self -> to` is an allowed transition
    pub const fn can_move_to(self, to: RunState) -> bool {
        matches!(
            (self, to),
            (RunState::Disabled, RunState::Warmup)
                | (RunState::Warmup, RunState::Running)
                | (RunState::Warmup, RunState::Teardown)
                | (RunState::Running, RunState::Stopped)
                | (RunState::Stopped, RunState::Teardown)
                | (RunState::Teardown, RunState::Disabled)
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Disabled => "disabled",
            RunState::Warmup => "warmup",
            RunState::Running => "running",
            RunState::Stopped => "stopped",
            RunState::Teardown => "teardown",
        };
        f.write_str(name)
    }
}

/// Callback run after every successful transition
pub trait RunStateNotifier: Send + Sync {
    fn state_changed(&self, from: RunState, to: RunState);
}

pub struct RunStateControl {
    state: AtomicU8,
    notifiers: spin::Mutex<Vec<Arc<dyn RunStateNotifier>>>,
}

impl Default for RunStateControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStateControl {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(RunState::Disabled as u8),
            notifiers: spin::Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> RunState {
        RunState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state() == RunState::Running
    }

    /// Moves to `to` if allowed from the current state
    ///
    /// Concurrent callers race on a compare-exchange; exactly one of them
    /// performs a given transition and runs the notifier chain.
    pub fn transition(&self, to: RunState) -> Result<RunState> {
        let from = self.state();
        if !from.can_move_to(to) {
            return Err(Error::InvalidArgument);
        }
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::Busy)?;
        evl_info!("evl: run state {} -> {}", from, to);
        // snapshot so a notifier may register others without deadlocking
        let chain: Vec<_> = self.notifiers.lock().clone();
        for notifier in chain {
            notifier.state_changed(from, to);
        }
        Ok(from)
    }

    pub fn register(&self, notifier: Arc<dyn RunStateNotifier>) {
        self.notifiers.lock().push(notifier);
    }

    /// Removes a notifier; returns false if it was not registered
    pub fn unregister(&self, notifier: &Arc<dyn RunStateNotifier>) -> bool {
        let mut chain = self.notifiers.lock();
        let before = chain.len();
        chain.retain(|n| !Arc::ptr_eq(n, notifier));
        chain.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicUsize;

    struct Counter(AtomicUsize);

    impl RunStateNotifier for Counter {
        fn state_changed(&self, _from: RunState, _to: RunState) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_lifecycle() {
        let ctl = RunStateControl::new();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        ctl.register(counter.clone());
        for to in [
            RunState::Warmup,
            RunState::Running,
            RunState::Stopped,
            RunState::Teardown,
            RunState::Disabled,
        ] {
            assert!(ctl.transition(to).is_ok());
        }
        assert_eq!(counter.0.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn test_no_running_stopped_cycle() {
        let ctl = RunStateControl::new();
        ctl.transition(RunState::Warmup).unwrap();
        ctl.transition(RunState::Running).unwrap();
        ctl.transition(RunState::Stopped).unwrap();
        assert_eq!(ctl.transition(RunState::Running), Err(Error::InvalidArgument));
        assert_eq!(ctl.state(), RunState::Stopped);
    }

    #[test]
    fn test_unregister() {
        let ctl = RunStateControl::new();
        let n: Arc<dyn RunStateNotifier> = Arc::new(Counter(AtomicUsize::new(0)));
        ctl.register(n.clone());
        assert!(ctl.unregister(&n));
        assert!(!ctl.unregister(&n));
    }
}
