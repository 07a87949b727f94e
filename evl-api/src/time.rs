//! Time representation shared by the core and its clients
//!
//! All durations and dates are signed 64-bit nanosecond counts. A timeout of
//! zero means "wait forever" and a negative timeout means "never block";
//! blocking primitives check both sentinels before arming any timer.

use bytemuck::{Pod, Zeroable};

/// Nanosecond tick count
pub type Ticks = i64;

pub const NSEC_PER_USEC: Ticks = 1_000;
pub const NSEC_PER_MSEC: Ticks = 1_000_000;
pub const NSEC_PER_SEC: Ticks = 1_000_000_000;

/// Timeout value passed to blocking calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timeout(Ticks);

impl Timeout {
    /// Wait until explicitly woken
    pub const INFINITE: Timeout = Timeout(0);
    /// Fail with `WouldBlock` instead of sleeping
    pub const NONBLOCK: Timeout = Timeout(-1);

    pub const fn from_ticks(ticks: Ticks) -> Self {
        Timeout(ticks)
    }

    pub const fn from_millis(ms: i64) -> Self {
        Timeout(ms.saturating_mul(NSEC_PER_MSEC))
    }

    pub const fn ticks(self) -> Ticks {
        self.0
    }

    pub const fn is_infinite(self) -> bool {
        self.0 == 0
    }

    pub const fn is_nonblock(self) -> bool {
        self.0 < 0
    }
}

impl From<TimeSpec> for Timeout {
    fn from(ts: TimeSpec) -> Self {
        Timeout(ts.to_ticks())
    }
}

/// How a finite timeout is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum TimeoutMode {
    /// Relative to the current time
    #[default]
    Relative = 0,
    /// Absolute date on the clock bound to the wait queue
    Absolute = 1,
}

impl TimeoutMode {
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(TimeoutMode::Relative),
            1 => Some(TimeoutMode::Absolute),
            _ => None,
        }
    }
}

/// Fixed-layout time value carried in request structures
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct TimeSpec {
    pub tv_sec: i64,
    pub tv_nsec: i64,
}

impl TimeSpec {
    pub const ZERO: TimeSpec = TimeSpec { tv_sec: 0, tv_nsec: 0 };

    pub const fn new(tv_sec: i64, tv_nsec: i64) -> Self {
        Self { tv_sec, tv_nsec }
    }

    /// Converts to nanoseconds, saturating on overflow
    pub const fn to_ticks(&self) -> Ticks {
        self.tv_sec
            .saturating_mul(NSEC_PER_SEC)
            .saturating_add(self.tv_nsec)
    }

    pub const fn from_ticks(ticks: Ticks) -> Self {
        Self {
            tv_sec: ticks.div_euclid(NSEC_PER_SEC),
            tv_nsec: ticks.rem_euclid(NSEC_PER_SEC),
        }
    }

    /// A normalized value has 0 <= tv_nsec < 1s
    pub const fn is_valid(&self) -> bool {
        self.tv_nsec >= 0 && self.tv_nsec < NSEC_PER_SEC
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timespec_conversion() {
        let ts = TimeSpec::new(2, 500);
        assert_eq!(ts.to_ticks(), 2 * NSEC_PER_SEC + 500);
        assert_eq!(TimeSpec::from_ticks(ts.to_ticks()), ts);
        assert_eq!(TimeSpec::from_ticks(-1), TimeSpec::new(-1, NSEC_PER_SEC - 1));
    }

    #[test]
    fn test_sentinels() {
        assert!(Timeout::INFINITE.is_infinite());
        assert!(!Timeout::INFINITE.is_nonblock());
        assert!(Timeout::NONBLOCK.is_nonblock());
        assert!(!Timeout::from_millis(1).is_infinite());
    }
}
