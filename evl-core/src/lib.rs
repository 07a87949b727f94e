//! EVL Core - out-of-band real-time scheduling core
//!
//! This crate implements the scheduling and synchronization heart of a
//! real-time co-kernel running next to a general purpose kernel. Every CPU
//! has a run queue whose root thread stands for the in-band kernel; the core
//! runs its own threads ahead of it and hands the CPU back when none is
//! runnable.
//!
//! # Architecture
//!
//! - **Sched**: run queues, scheduling classes (FIFO, quota, time
//!   partitioning, weak, idle) and the dispatcher
//! - **Thread**: thread control blocks and lifecycle
//! - **Wait**: wait queues, the single suspension point of the core
//! - **Sync**: semaphores, PI/PP mutexes and monitors
//! - **Clock**: monotonic/realtime clocks and per-CPU timer bases
//! - **Irq**: interrupt frames and IPIs
//! - **Factory**: named elements and the out-of-band request dispatcher
//! - **Platform**: the contract with the hardware or the host
//!
//! # Usage
//!
//! ```rust
//! use evl_core::{Core, CoreConfig, NullPlatform};
//! use evl_api::SchedParams;
//!
//! let mut core = Core::new(CoreConfig::default(), Box::new(NullPlatform)).unwrap();
//! core.start().unwrap();
//! let t = core
//!     .create_thread("worker", 0, SchedParams::Fifo { prio: 10, rr_quantum: None })
//!     .unwrap();
//! core.start_thread(t).unwrap();
//! assert_eq!(core.current(0).unwrap(), t);
//! ```

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

#[macro_use]
mod logging;

pub mod arena;
pub mod clock;
pub mod config;
pub mod factory;
pub mod heap;
pub mod irq;
pub mod kernel;
pub mod platform;
pub mod runstate;
pub mod sched;
pub mod sync;
pub mod thread;
pub mod wait;

// Re-export commonly used types
pub use crate::clock::{ClockId, TimerId};
pub use crate::config::CoreConfig;
pub use crate::factory::{Element, ElementObject};
pub use crate::heap::{HeapOffset, SharedHeap};
pub use crate::kernel::{Core, SharedCore};
pub use crate::platform::{IpiKind, NullPlatform, Platform, Stage};
pub use crate::runstate::{RunState, RunStateControl, RunStateNotifier};
pub use crate::sched::SchedClass;
pub use crate::sched::quota::QuotaGroupInfo;
pub use crate::sched::tp::{TpSchedule, TpWindow};
pub use crate::sync::{MonitorId, MutexId, MutexProtocol, SemId, fast_lock, fast_unlock};
pub use crate::thread::{ThreadId, ThreadInfo, ThreadState, ThreadStats};
pub use crate::wait::{Outcome, WaitFlags, WaitQueueId};
