//! Weak class: the non real-time band below every real-time class
//!
//! Inheritance and ceiling values applied to a weak thread that stays in
//! this class clamp at the weak maximum; a weak lock owner boosted by a
//! real-time waiter leaves the class for FIFO while the boost lasts.

use evl_api::sched::{WEAK_MAX_PRIO, WEAK_MIN_PRIO};

use crate::sched::rq::RunQueue;
use crate::thread::{Thread, ThreadId};

pub(super) fn enqueue(rq: &mut RunQueue, t: &Thread) {
    rq.weak.add_tail(t.id, t.cprio);
}

pub(super) fn requeue(rq: &mut RunQueue, t: &Thread) {
    rq.weak.add_head(t.id, t.cprio);
}

pub(super) fn dequeue(rq: &mut RunQueue, t: &Thread) -> bool {
    rq.weak.remove(t.id, t.cprio)
}

pub(super) fn pick(rq: &mut RunQueue) -> Option<ThreadId> {
    rq.weak.pop_highest()
}

pub(super) fn ceilprio(prio: i32) -> i32 {
    prio.clamp(WEAK_MIN_PRIO, WEAK_MAX_PRIO)
}
