//! Scheduling policies, priority ranges and attributes

use bytemuck::{Pod, Zeroable};

use crate::error::{Error, Result};
use crate::time::{Ticks, TimeSpec};

/// Real-time FIFO policy
pub const SCHED_FIFO: i32 = 1;
/// Real-time round-robin policy (FIFO class with a time quantum)
pub const SCHED_RR: i32 = 2;
/// Idle policy, reserved to the per-CPU root thread
pub const SCHED_IDLE: i32 = 5;
/// Non real-time band scheduled below every real-time class
pub const SCHED_WEAK: i32 = 43;
/// Budgeted thread groups
pub const SCHED_QUOTA: i32 = 44;
/// Time partitioning
pub const SCHED_TP: i32 = 45;

pub const FIFO_MIN_PRIO: i32 = 1;
pub const FIFO_MAX_PRIO: i32 = 99;
/// Highest priority the core itself may assign, above any user setting
pub const CORE_MAX_PRIO: i32 = FIFO_MAX_PRIO + 1;
pub const WEAK_MIN_PRIO: i32 = 0;
pub const WEAK_MAX_PRIO: i32 = 99;
pub const QUOTA_MIN_PRIO: i32 = FIFO_MIN_PRIO;
pub const QUOTA_MAX_PRIO: i32 = FIFO_MAX_PRIO;
pub const TP_MIN_PRIO: i32 = FIFO_MIN_PRIO;
pub const TP_MAX_PRIO: i32 = FIFO_MAX_PRIO;
pub const IDLE_PRIO: i32 = -1;

/// Policy identifiers understood by the core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchedPolicy {
    Fifo,
    RoundRobin,
    Idle,
    Weak,
    Quota,
    Tp,
}

impl SchedPolicy {
    pub const fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            SCHED_FIFO => Some(SchedPolicy::Fifo),
            SCHED_RR => Some(SchedPolicy::RoundRobin),
            SCHED_IDLE => Some(SchedPolicy::Idle),
            SCHED_WEAK => Some(SchedPolicy::Weak),
            SCHED_QUOTA => Some(SchedPolicy::Quota),
            SCHED_TP => Some(SchedPolicy::Tp),
            _ => None,
        }
    }

    pub const fn raw(self) -> i32 {
        match self {
            SchedPolicy::Fifo => SCHED_FIFO,
            SchedPolicy::RoundRobin => SCHED_RR,
            SchedPolicy::Idle => SCHED_IDLE,
            SchedPolicy::Weak => SCHED_WEAK,
            SchedPolicy::Quota => SCHED_QUOTA,
            SchedPolicy::Tp => SCHED_TP,
        }
    }
}

/// Class-specific scheduling parameters
///
/// This is the parameter union a scheduling class validates before a thread
/// is admitted (`chkparam`) and applies afterwards (`setparam`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchedParams {
    /// Root thread of a CPU
    Idle,
    /// Non real-time band
    Weak { prio: i32 },
    /// Static real-time priority; a quantum turns round-robin on
    Fifo { prio: i32, rr_quantum: Option<Ticks> },
    /// Member of quota group `group` on the thread's CPU
    Quota { prio: i32, group: i32 },
    /// Member of time partition `part` on the thread's CPU
    Tp { prio: i32, part: i32 },
}

impl SchedParams {
    pub const fn policy(&self) -> SchedPolicy {
        match self {
            SchedParams::Idle => SchedPolicy::Idle,
            SchedParams::Weak { .. } => SchedPolicy::Weak,
            SchedParams::Fifo { rr_quantum: Some(_), .. } => SchedPolicy::RoundRobin,
            SchedParams::Fifo { .. } => SchedPolicy::Fifo,
            SchedParams::Quota { .. } => SchedPolicy::Quota,
            SchedParams::Tp { .. } => SchedPolicy::Tp,
        }
    }

    pub const fn prio(&self) -> i32 {
        match *self {
            SchedParams::Idle => IDLE_PRIO,
            SchedParams::Weak { prio }
            | SchedParams::Fifo { prio, .. }
            | SchedParams::Quota { prio, .. }
            | SchedParams::Tp { prio, .. } => prio,
        }
    }

    /// Context-free range checks
    ///
    /// Group and partition existence depend on the target CPU and are
    /// checked by the core.
    pub fn validate(&self) -> Result<()> {
        let in_range = |prio: i32, min: i32, max: i32| {
            if (min..=max).contains(&prio) {
                Ok(())
            } else {
                Err(Error::InvalidArgument)
            }
        };
        match *self {
            SchedParams::Idle => Ok(()),
            SchedParams::Weak { prio } => in_range(prio, WEAK_MIN_PRIO, WEAK_MAX_PRIO),
            SchedParams::Fifo { prio, rr_quantum } => {
                if matches!(rr_quantum, Some(q) if q <= 0) {
                    return Err(Error::InvalidArgument);
                }
                in_range(prio, FIFO_MIN_PRIO, FIFO_MAX_PRIO)
            }
            SchedParams::Quota { prio, group } => {
                if group < 0 {
                    return Err(Error::InvalidArgument);
                }
                in_range(prio, QUOTA_MIN_PRIO, QUOTA_MAX_PRIO)
            }
            SchedParams::Tp { prio, part } => {
                if part < 0 {
                    return Err(Error::InvalidArgument);
                }
                in_range(prio, TP_MIN_PRIO, TP_MAX_PRIO)
            }
        }
    }
}

/// Fixed-layout scheduling attributes
///
/// `extra` carries the quota group id or the time partition id depending on
/// the policy; `quantum` is only meaningful for `SCHED_RR`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct SchedAttrs {
    pub sched_policy: i32,
    pub sched_priority: i32,
    pub quantum: TimeSpec,
    pub extra: i32,
    pub __pad: i32,
}

impl SchedAttrs {
    pub fn to_params(&self) -> Result<SchedParams> {
        let policy = SchedPolicy::from_raw(self.sched_policy).ok_or(Error::InvalidArgument)?;
        let prio = self.sched_priority;
        let params = match policy {
            SchedPolicy::Fifo => SchedParams::Fifo { prio, rr_quantum: None },
            SchedPolicy::RoundRobin => {
                if !self.quantum.is_valid() {
                    return Err(Error::InvalidArgument);
                }
                SchedParams::Fifo {
                    prio,
                    rr_quantum: Some(self.quantum.to_ticks()),
                }
            }
            SchedPolicy::Weak => SchedParams::Weak { prio },
            SchedPolicy::Quota => SchedParams::Quota { prio, group: self.extra },
            SchedPolicy::Tp => SchedParams::Tp { prio, part: self.extra },
            SchedPolicy::Idle => return Err(Error::InvalidArgument),
        };
        params.validate()?;
        Ok(params)
    }

    pub fn from_params(params: &SchedParams) -> Self {
        let mut attrs = SchedAttrs {
            sched_policy: params.policy().raw(),
            sched_priority: params.prio(),
            ..Default::default()
        };
        match *params {
            SchedParams::Fifo { rr_quantum: Some(q), .. } => attrs.quantum = TimeSpec::from_ticks(q),
            SchedParams::Quota { group, .. } => attrs.extra = group,
            SchedParams::Tp { part, .. } => attrs.extra = part,
            _ => {}
        }
        attrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_ranges() {
        assert!(SchedParams::Fifo { prio: 0, rr_quantum: None }.validate().is_err());
        assert!(SchedParams::Fifo { prio: 99, rr_quantum: None }.validate().is_ok());
        assert!(SchedParams::Fifo { prio: 10, rr_quantum: Some(0) }.validate().is_err());
        assert!(SchedParams::Weak { prio: 0 }.validate().is_ok());
        assert!(SchedParams::Quota { prio: 10, group: -1 }.validate().is_err());
    }

    #[test]
    fn test_policy_of_rr() {
        let p = SchedParams::Fifo { prio: 5, rr_quantum: Some(1000) };
        assert_eq!(p.policy(), SchedPolicy::RoundRobin);
        assert_eq!(p.prio(), 5);
    }
}
