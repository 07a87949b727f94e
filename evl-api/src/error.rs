//! Error handling module for the EVL core

use core::fmt;

/// Common error type used throughout the EVL core
///
/// Every variant maps to a Linux errno value so that the result of an
/// out-of-band request can be handed back to a client as `-errno`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Error {
    /// Invalid argument or scheduling parameter
    InvalidArgument,
    /// A finite timeout elapsed before the wait completed
    TimedOut,
    /// The object waited on was deleted while sleeping
    Deleted,
    /// The wait was forcibly broken
    Interrupted,
    /// The request would block and the caller asked not to
    WouldBlock,
    /// The caller already owns the lock, or waiting would close a cycle
    Deadlock,
    /// The caller does not own the lock it tries to release
    NotOwner,
    /// The caller is not the current out-of-band thread of its CPU
    NotOob,
    /// No such thread, element or group
    NotFound,
    /// An element with the same name already exists
    Exists,
    /// The object is still in use
    Busy,
    /// Out of memory
    OutOfMemory,
    /// The shared state heap is exhausted
    NoSpace,
    /// The lock owner recorded in the fast-lock word no longer exists
    OwnerDead,
    /// The core is not running
    Unavailable,
    /// Unknown request code
    NotSupported,
}

impl Error {
    /// Returns the errno value (positive) matching this error
    pub const fn errno(self) -> i32 {
        match self {
            Error::NotOwner | Error::NotOob => 1,
            Error::NotFound => 3,
            Error::Interrupted => 4,
            Error::WouldBlock => 11,
            Error::OutOfMemory => 12,
            Error::Busy => 16,
            Error::Exists => 17,
            Error::InvalidArgument => 22,
            Error::NotSupported => 25,
            Error::NoSpace => 28,
            Error::Deadlock => 35,
            Error::Unavailable => 38,
            Error::Deleted => 43,
            Error::TimedOut => 110,
            Error::OwnerDead => 130,
        }
    }

    /// Converts an errno value back to an error, when it is one we emit
    ///
    /// EPERM is ambiguous and always decodes as [`Error::NotOwner`].
    pub const fn from_errno(errno: i32) -> Option<Self> {
        let errno = if errno < 0 { -errno } else { errno };
        Some(match errno {
            1 => Error::NotOwner,
            3 => Error::NotFound,
            4 => Error::Interrupted,
            11 => Error::WouldBlock,
            12 => Error::OutOfMemory,
            16 => Error::Busy,
            17 => Error::Exists,
            22 => Error::InvalidArgument,
            25 => Error::NotSupported,
            28 => Error::NoSpace,
            35 => Error::Deadlock,
            38 => Error::Unavailable,
            43 => Error::Deleted,
            110 => Error::TimedOut,
            130 => Error::OwnerDead,
            _ => return None,
        })
    }

    /// Returns true for the outcomes a blocking call may end with
    pub const fn is_wait_outcome(self) -> bool {
        matches!(
            self,
            Error::TimedOut | Error::Deleted | Error::Interrupted | Error::WouldBlock
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::InvalidArgument => "invalid argument",
            Error::TimedOut => "operation timed out",
            Error::Deleted => "object deleted while waiting",
            Error::Interrupted => "wait interrupted",
            Error::WouldBlock => "operation would block",
            Error::Deadlock => "deadlock would occur",
            Error::NotOwner => "caller does not own the lock",
            Error::NotOob => "caller is not running out-of-band",
            Error::NotFound => "no such object",
            Error::Exists => "object already exists",
            Error::Busy => "object busy",
            Error::OutOfMemory => "out of memory",
            Error::NoSpace => "shared heap exhausted",
            Error::OwnerDead => "lock owner vanished",
            Error::Unavailable => "core not running",
            Error::NotSupported => "request not supported",
        };
        write!(f, "{} (errno {})", msg, self.errno())
    }
}

impl core::error::Error for Error {}

/// Result type for operations that can fail
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_roundtrip() {
        for err in [
            Error::TimedOut,
            Error::Deleted,
            Error::Interrupted,
            Error::WouldBlock,
            Error::Deadlock,
            Error::OwnerDead,
        ] {
            assert_eq!(Error::from_errno(err.errno()), Some(err));
            assert_eq!(Error::from_errno(-err.errno()), Some(err));
        }
        assert_eq!(Error::from_errno(9999), None);
    }

    #[test]
    fn test_wait_outcomes() {
        assert!(Error::TimedOut.is_wait_outcome());
        assert!(!Error::Deadlock.is_wait_outcome());
    }
}
