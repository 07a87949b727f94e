//! Element ABI: classes, creation attributes, ioctl opcodes and request layouts
//!
//! Elements (mutexes, semaphores, monitors) are created through a factory
//! request carrying a fixed attribute structure. The core answers with an
//! [`ElementIds`] block whose `state_offset` locates the element's state in
//! the shared heap, so clients can run lock-free fast paths on it.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use static_assertions::{assert_eq_size, const_assert};

use crate::time::TimeSpec;

/// Compact handle naming a core element (thread or synchronization object)
pub type FundleT = u32;

/// Fast-lock word value of a free mutex
pub const NO_HANDLE: FundleT = 0;
/// Set in the fast-lock word when waiters may be queued
pub const MUTEX_FLCLAIM: u32 = 0x8000_0000;
/// Set in the fast-lock word while the owner runs at the ceiling priority
pub const MUTEX_FLCEIL: u32 = 0x4000_0000;
/// Bits of the fast-lock word that hold the owner handle
pub const FUNDLE_MASK: u32 = !(MUTEX_FLCLAIM | MUTEX_FLCEIL);

/// Extracts the owner handle from a fast-lock word
#[inline]
pub const fn fastlock_owner(word: u32) -> FundleT {
    word & FUNDLE_MASK
}

/// Marker bit distinguishing out-of-band system calls
pub const OOB_SYSCALL_BIT: u32 = 0x1000_0000;
pub const SYS_OOB_READ: u32 = 0;
pub const SYS_OOB_WRITE: u32 = 1;
pub const SYS_OOB_IOCTL: u32 = 2;

/// Tells whether a system call number must be routed to the core
#[inline]
pub const fn is_oob_syscall(nr: u32) -> bool {
    nr & OOB_SYSCALL_BIT != 0
}

/// Strips the out-of-band marker from a system call number
#[inline]
pub const fn oob_syscall_nr(nr: u32) -> u32 {
    nr & !OOB_SYSCALL_BIT
}

/// Clock designators accepted in attribute structures
pub const CLOCK_MONOTONIC: i32 = -1;
pub const CLOCK_REALTIME: i32 = -2;

/// Element classes served by the factory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementClass {
    Thread,
    Mutex,
    Semaphore,
    Monitor,
}

impl ElementClass {
    pub const fn name(self) -> &'static str {
        match self {
            ElementClass::Thread => "thread",
            ElementClass::Mutex => "mutex",
            ElementClass::Semaphore => "sem",
            ElementClass::Monitor => "monitor",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "thread" => Some(ElementClass::Thread),
            "mutex" => Some(ElementClass::Mutex),
            "sem" => Some(ElementClass::Semaphore),
            "monitor" => Some(ElementClass::Monitor),
            _ => None,
        }
    }
}

/// Identifiers returned by the factory
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct ElementIds {
    pub minor: u32,
    pub fundle: FundleT,
    pub state_offset: u32,
    pub __pad: u32,
}

/// Locking protocol of mutexes and gates
pub const PROTO_PI: u32 = 1;
pub const PROTO_PP: u32 = 2;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct MutexAttrs {
    pub clockfd: i32,
    pub protocol: u32,
    /// Ceiling priority for `PROTO_PP`
    pub ceiling: u32,
    pub __pad: u32,
}

bitflags! {
    /// Semaphore creation flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SemFlags: u32 {
        /// Wake waiters by priority instead of arrival order
        const PRIO = 1 << 0;
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct SemAttrs {
    pub clockfd: i32,
    pub initval: i32,
    pub flags: u32,
    pub __pad: u32,
}

pub const MONITOR_GATE: u32 = 0;
pub const MONITOR_EVENT: u32 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct MonitorAttrs {
    pub clockfd: i32,
    /// `MONITOR_GATE` or `MONITOR_EVENT`
    pub kind: u32,
    /// `PROTO_PI` or `PROTO_PP` for gates, ignored for events
    pub protocol: u32,
    /// Ceiling priority of a PP gate
    pub initval: u32,
}

bitflags! {
    /// Flags published in a monitor's shared state
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MonitorFlags: u32 {
        /// Signals are pending on the event (or on an event bound to the gate)
        const SIGNALED = 1 << 0;
        /// The pending signal is a broadcast
        const BROADCAST = 1 << 1;
        /// Event raised while nobody waited
        const RAISED = 1 << 2;
    }
}

/// Word layout of the shared state of each element class
pub mod state {
    /// Mutex: fast-lock word
    pub const MUTEX_FASTLOCK: usize = 0;
    /// Mutex: ceiling priority (PP only)
    pub const MUTEX_CEILING: usize = 1;
    pub const MUTEX_WORDS: usize = 2;

    /// Semaphore: count, as a signed 32-bit value
    pub const SEM_VALUE: usize = 0;
    /// Semaphore: `SemFlags`
    pub const SEM_FLAGS: usize = 1;
    pub const SEM_WORDS: usize = 2;

    /// Monitor: `MonitorFlags`
    pub const MONITOR_FLAGS: usize = 0;
    /// Monitor: fast-lock word of a gate, unused for events
    pub const MONITOR_FASTLOCK: usize = 1;
    pub const MONITOR_WORDS: usize = 2;
}

const fn ioc(base: u8, nr: u8) -> u32 {
    ((base as u32) << 8) | nr as u32
}

/// Mutex request codes
pub mod mutex_ioc {
    use super::ioc;
    pub const LOCK: u32 = ioc(b'x', 0);
    pub const TRYLOCK: u32 = ioc(b'x', 1);
    pub const UNLOCK: u32 = ioc(b'x', 2);
    pub const BIND: u32 = ioc(b'x', 3);
}

/// Semaphore request codes
pub mod sem_ioc {
    use super::ioc;
    pub const GET: u32 = ioc(b's', 0);
    pub const TRYGET: u32 = ioc(b's', 1);
    pub const PUT: u32 = ioc(b's', 2);
    pub const BROADCAST: u32 = ioc(b's', 3);
    pub const BIND: u32 = ioc(b's', 4);
}

/// Monitor request codes
pub mod monitor_ioc {
    use super::ioc;
    pub const ENTER: u32 = ioc(b'm', 0);
    pub const TRYENTER: u32 = ioc(b'm', 1);
    pub const EXIT: u32 = ioc(b'm', 2);
    pub const WAIT: u32 = ioc(b'm', 3);
    pub const UNWAIT: u32 = ioc(b'm', 4);
    pub const SIGNAL: u32 = ioc(b'm', 5);
    pub const BIND: u32 = ioc(b'm', 6);
}

/// Timed acquisition request (LOCK, GET, ENTER)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct LockReq {
    pub timeout: TimeSpec,
    /// `TimeoutMode` as raw value
    pub mode: u32,
    pub __pad: u32,
}

/// Event wait request
///
/// `gatefd` is the minor of the gate released during the wait, or -1 for an
/// event used without gate. `status` receives 0 or `-errno` once the wait
/// completes synchronously.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct WaitReq {
    pub timeout: TimeSpec,
    pub gatefd: i32,
    pub status: i32,
    pub mode: u32,
    pub __pad: u32,
}

/// Gate re-entry request after an event wait
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct UnwaitReq {
    pub gatefd: i32,
    pub __pad: u32,
}

/// Broadcast signal flag in [`SignalReq::flags`]
pub const SIGNAL_BROADCAST: u32 = 1 << 0;

/// Event signal request; `target` is a thread fundle or `NO_HANDLE`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct SignalReq {
    pub target: FundleT,
    pub flags: u32,
}

assert_eq_size!(TimeSpec, [u8; 16]);
assert_eq_size!(ElementIds, [u8; 16]);
assert_eq_size!(MutexAttrs, [u8; 16]);
assert_eq_size!(SemAttrs, [u8; 16]);
assert_eq_size!(MonitorAttrs, [u8; 16]);
assert_eq_size!(LockReq, [u8; 24]);
assert_eq_size!(WaitReq, [u8; 32]);
assert_eq_size!(UnwaitReq, [u8; 8]);
assert_eq_size!(SignalReq, [u8; 8]);
const_assert!(MUTEX_FLCLAIM & MUTEX_FLCEIL == 0);
