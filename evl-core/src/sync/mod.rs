//! Synchronization primitives built on wait queues

pub mod monitor;
pub mod mutex;
pub mod semaphore;

pub use self::monitor::{Monitor, MonitorId};
pub use self::mutex::{Mutex, MutexId, MutexProtocol, fast_lock, fast_unlock};
pub use self::semaphore::{SemId, Semaphore};
