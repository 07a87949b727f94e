//! Real-time FIFO class, with optional round-robin
//!
//! Static priorities 1..=99, highest first, FIFO among equals. A thread
//! declared with a quantum has `RRB` set: each expiry of the round-robin
//! timer puts it behind its equals.

use evl_api::sched::{FIFO_MAX_PRIO, FIFO_MIN_PRIO};

use crate::sched::rq::{RqFlags, RunQueue};
use crate::thread::{Thread, ThreadId, ThreadState};

pub(super) fn enqueue(rq: &mut RunQueue, t: &Thread) {
    rq.fifo.add_tail(t.id, t.cprio);
}

pub(super) fn requeue(rq: &mut RunQueue, t: &Thread) {
    rq.fifo.add_head(t.id, t.cprio);
}

pub(super) fn dequeue(rq: &mut RunQueue, t: &Thread) -> bool {
    rq.fifo.remove(t.id, t.cprio)
}

pub(super) fn pick(rq: &mut RunQueue) -> Option<ThreadId> {
    rq.fifo.pop_highest()
}

/// Round-robin slice expiry for the running thread
///
/// Returns true when the thread must yield to its equals.
pub(super) fn tick(rq: &mut RunQueue, curr: &Thread) -> bool {
    if !curr.state.contains(ThreadState::RRB) {
        return false;
    }
    rq.flags.insert(RqFlags::PUTBACK);
    true
}

pub(super) fn ceilprio(prio: i32) -> i32 {
    prio.clamp(FIFO_MIN_PRIO, FIFO_MAX_PRIO)
}
