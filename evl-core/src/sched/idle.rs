//! Idle class: holds the root thread of each CPU

use evl_api::sched::IDLE_PRIO;

use crate::sched::rq::RunQueue;
use crate::thread::ThreadId;

/// Never empty: the root thread is always eligible
pub(super) fn pick(rq: &RunQueue) -> Option<ThreadId> {
    Some(rq.root)
}

pub(super) fn ceilprio(_prio: i32) -> i32 {
    IDLE_PRIO
}
