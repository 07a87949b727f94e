//! Semaphore, mutex and monitor tests

mod common;

use std::sync::atomic::Ordering;

use common::*;
use evl_api::abi::{MUTEX_FLCEIL, MUTEX_FLCLAIM, MonitorFlags, SemFlags};
use evl_api::{Error, SchedParams, Timeout, TimeoutMode};
use evl_core::{
    ClockId, Core, MutexId, MutexProtocol, Outcome, SchedClass, ThreadId, ThreadState,
};
use proptest::prelude::*;

const MONO: ClockId = ClockId::Monotonic;

fn lock(core: &mut Core, m: MutexId, caller: ThreadId) -> Result<Outcome, Error> {
    core.mutex_lock(m, caller, Timeout::INFINITE, TimeoutMode::Relative)
}

fn lock_word(core: &Core, m: MutexId) -> u32 {
    let offset = core.mutex(m).unwrap().fastlock_offset();
    core.heap().word(offset, 0).unwrap().load(Ordering::Acquire)
}

#[test]
fn test_semaphore_counts_down() {
    let (mut core, _log) = single_cpu_core();
    let s = core.create_semaphore(2, SemFlags::empty(), MONO).unwrap();
    let a = spawn(&mut core, "a", 0, fifo(10));

    assert_eq!(core.sem_trydown(s, a), Ok(()));
    assert_eq!(core.sem_trydown(s, a), Ok(()));
    assert_eq!(core.sem_trydown(s, a), Err(Error::WouldBlock));
    assert_eq!(core.sem_value(s).unwrap(), 0);
    core.sem_up(s).unwrap();
    assert_eq!(core.sem_value(s).unwrap(), 1);
    assert_eq!(
        core.create_semaphore(-1, SemFlags::empty(), MONO),
        Err(Error::InvalidArgument)
    );
}

#[test]
fn test_semaphore_hands_unit_to_sleeper() {
    let (mut core, _log) = single_cpu_core();
    let s = core.create_semaphore(0, SemFlags::empty(), MONO).unwrap();
    let a = spawn(&mut core, "a", 0, fifo(10));

    let outcome = core
        .sem_down(s, a, Timeout::INFINITE, TimeoutMode::Relative)
        .unwrap();
    assert_eq!(outcome, Outcome::Blocked);
    assert_ne!(core.current(0).unwrap(), a);

    core.sem_up(s).unwrap();
    assert_eq!(core.current(0).unwrap(), a);
    assert_eq!(core.wait_result(a), Ok(()));
    // the unit went straight to the sleeper
    assert_eq!(core.sem_value(s).unwrap(), 0);
}

#[test]
fn test_semaphore_timeout_leaves_count_alone() {
    let (mut core, _log) = single_cpu_core();
    let s = core.create_semaphore(0, SemFlags::empty(), MONO).unwrap();
    let a = spawn(&mut core, "a", 0, fifo(10));
    core.sem_down(s, a, Timeout::from_millis(1), TimeoutMode::Relative)
        .unwrap();
    core.advance_clock(1_000_000);
    assert_eq!(core.current(0).unwrap(), a);
    assert_eq!(core.wait_result(a), Err(Error::TimedOut));
    assert_eq!(core.sem_value(s).unwrap(), 0);
}

#[test]
fn test_semaphore_prio_order() {
    let (mut core, _log) = single_cpu_core();
    let s = core.create_semaphore(0, SemFlags::PRIO, MONO).unwrap();
    let low = spawn(&mut core, "low", 0, fifo(10));
    core.sem_down(s, low, Timeout::INFINITE, TimeoutMode::Relative)
        .unwrap();
    let high = spawn(&mut core, "high", 0, fifo(40));
    core.sem_down(s, high, Timeout::INFINITE, TimeoutMode::Relative)
        .unwrap();

    core.sem_up(s).unwrap();
    assert_eq!(core.current(0).unwrap(), high);
    assert!(core.thread(low).unwrap().state().contains(ThreadState::PEND));
}

#[test]
fn test_semaphore_broadcast_and_destroy() {
    let (mut core, _log) = single_cpu_core();
    let s = core.create_semaphore(0, SemFlags::empty(), MONO).unwrap();
    let a = spawn(&mut core, "a", 0, fifo(10));
    core.sem_down(s, a, Timeout::INFINITE, TimeoutMode::Relative)
        .unwrap();
    let b = spawn(&mut core, "b", 0, fifo(10));
    core.sem_down(s, b, Timeout::INFINITE, TimeoutMode::Relative)
        .unwrap();

    assert_eq!(core.sem_broadcast(s), Ok(2));
    assert_eq!(core.wait_result(a), Ok(()));
    assert_eq!(core.wait_result(b), Ok(()));
    assert_eq!(core.sem_value(s).unwrap(), 0);

    let c = spawn(&mut core, "c", 0, fifo(30));
    core.sem_down(s, c, Timeout::INFINITE, TimeoutMode::Relative)
        .unwrap();
    core.destroy_semaphore(s).unwrap();
    assert_eq!(core.current(0).unwrap(), c);
    assert_eq!(core.wait_result(c), Err(Error::Deleted));
    assert_eq!(core.sem_value(s), Err(Error::NotFound));
}

#[test]
fn test_uncontended_mutex() {
    let (mut core, _log) = single_cpu_core();
    let m = core.create_mutex(MutexProtocol::Inherit, MONO).unwrap();
    let a = spawn(&mut core, "a", 0, fifo(10));

    assert_eq!(lock(&mut core, m, a), Ok(Outcome::Completed));
    assert_eq!(core.mutex_owner(m).unwrap(), Some(a));
    assert_eq!(lock_word(&core, m), core.thread(a).unwrap().handle());
    // recursive locking is refused
    assert_eq!(lock(&mut core, m, a), Err(Error::Deadlock));

    core.mutex_unlock(m, a).unwrap();
    assert_eq!(core.mutex_owner(m).unwrap(), None);
    assert_eq!(core.mutex_unlock(m, a), Err(Error::NotOwner));
}

#[test]
fn test_unlock_by_non_owner_refused() {
    let (mut core, _log) = single_cpu_core();
    let m = core.create_mutex(MutexProtocol::Inherit, MONO).unwrap();
    let a = spawn(&mut core, "a", 0, fifo(10));
    lock(&mut core, m, a).unwrap();
    let b = spawn(&mut core, "b", 0, fifo(20));
    assert_eq!(core.mutex_unlock(m, b), Err(Error::NotOwner));
    assert_eq!(core.mutex_trylock(m, b), Err(Error::Busy));
    assert_eq!(core.mutex_owner(m).unwrap(), Some(a));
}

#[test]
fn test_priority_inheritance() {
    let (mut core, _log) = single_cpu_core();
    let m = core.create_mutex(MutexProtocol::Inherit, MONO).unwrap();
    let low = spawn(&mut core, "low", 0, fifo(10));
    lock(&mut core, m, low).unwrap();

    let high = spawn(&mut core, "high", 0, fifo(90));
    assert_eq!(core.current(0).unwrap(), high);
    assert_eq!(lock(&mut core, m, high), Ok(Outcome::Blocked));

    // the owner runs at the waiter's priority
    assert_eq!(core.current(0).unwrap(), low);
    let l = core.thread(low).unwrap();
    assert_eq!(l.cprio(), 90);
    assert!(l.state().contains(ThreadState::BOOST));
    assert_ne!(lock_word(&core, m) & MUTEX_FLCLAIM, 0);

    // a medium thread cannot preempt the boosted owner
    let medium = spawn(&mut core, "medium", 0, fifo(50));
    assert_eq!(core.current(0).unwrap(), low);

    core.mutex_unlock(m, low).unwrap();
    assert_eq!(core.current(0).unwrap(), high);
    assert_eq!(core.wait_result(high), Ok(()));
    assert_eq!(core.mutex_owner(m).unwrap(), Some(high));
    let l = core.thread(low).unwrap();
    assert_eq!(l.cprio(), 10);
    assert!(!l.state().contains(ThreadState::BOOST));

    core.mutex_unlock(m, high).unwrap();
    assert_eq!(lock_word(&core, m), 0);
    core.suspend_thread(high).unwrap();
    assert_eq!(core.current(0).unwrap(), medium);
}

#[test]
fn test_inheritance_follows_lock_chain() {
    let (mut core, _log) = single_cpu_core();
    let m1 = core.create_mutex(MutexProtocol::Inherit, MONO).unwrap();
    let m2 = core.create_mutex(MutexProtocol::Inherit, MONO).unwrap();

    let a = spawn(&mut core, "a", 0, fifo(10));
    lock(&mut core, m1, a).unwrap();
    let b = spawn(&mut core, "b", 0, fifo(20));
    lock(&mut core, m2, b).unwrap();
    assert_eq!(lock(&mut core, m1, b), Ok(Outcome::Blocked));
    assert_eq!(core.thread(a).unwrap().cprio(), 20);

    let c = spawn(&mut core, "c", 0, fifo(70));
    assert_eq!(lock(&mut core, m2, c), Ok(Outcome::Blocked));
    // c -> m2 (b) -> m1 (a)
    assert_eq!(core.thread(b).unwrap().cprio(), 70);
    assert_eq!(core.thread(a).unwrap().cprio(), 70);
    assert_eq!(core.current(0).unwrap(), a);
}

#[test]
fn test_deadlock_cycle_detected() {
    let (mut core, _log) = single_cpu_core();
    let m1 = core.create_mutex(MutexProtocol::Inherit, MONO).unwrap();
    let m2 = core.create_mutex(MutexProtocol::Inherit, MONO).unwrap();

    let a = spawn(&mut core, "a", 0, fifo(10));
    lock(&mut core, m1, a).unwrap();
    let b = spawn(&mut core, "b", 0, fifo(20));
    lock(&mut core, m2, b).unwrap();
    core.suspend_thread(b).unwrap();

    assert_eq!(lock(&mut core, m2, a), Ok(Outcome::Blocked));
    core.resume_thread(b).unwrap();
    assert_eq!(core.current(0).unwrap(), b);
    assert_eq!(lock(&mut core, m1, b), Err(Error::Deadlock));
}

#[test]
fn test_priority_ceiling() {
    let (mut core, _log) = single_cpu_core();
    let m = core
        .create_mutex(MutexProtocol::Protect { ceiling: 60 }, MONO)
        .unwrap();
    let low = spawn(&mut core, "low", 0, fifo(10));
    lock(&mut core, m, low).unwrap();
    assert_eq!(core.thread(low).unwrap().cprio(), 60);
    assert_ne!(lock_word(&core, m) & MUTEX_FLCEIL, 0);

    let medium = spawn(&mut core, "medium", 0, fifo(50));
    assert_eq!(core.current(0).unwrap(), low);

    core.mutex_unlock(m, low).unwrap();
    assert_eq!(core.thread(low).unwrap().cprio(), 10);
    assert_eq!(core.current(0).unwrap(), medium);
    assert_eq!(
        core.create_mutex(MutexProtocol::Protect { ceiling: 0 }, MONO),
        Err(Error::InvalidArgument)
    );
}

#[test]
fn test_weak_owner_boosted_into_fifo() {
    let (mut core, _log) = single_cpu_core();
    let m = core.create_mutex(MutexProtocol::Inherit, MONO).unwrap();
    let weak = spawn(&mut core, "weak", 0, evl_api::SchedParams::Weak { prio: 0 });
    lock(&mut core, m, weak).unwrap();

    let rt = spawn(&mut core, "rt", 0, fifo(30));
    lock(&mut core, m, rt).unwrap();
    let w = core.thread(weak).unwrap();
    assert_eq!(w.sched_class(), evl_core::SchedClass::Fifo);
    assert_eq!(w.cprio(), 30);
    assert_eq!(core.current(0).unwrap(), weak);

    core.mutex_unlock(m, weak).unwrap();
    let w = core.thread(weak).unwrap();
    assert_eq!(w.sched_class(), evl_core::SchedClass::Weak);
    assert_eq!(w.cprio(), 0);
    assert_eq!(core.current(0).unwrap(), rt);
}

#[test]
fn test_quota_owner_inherits_within_its_class() {
    let (mut core, _log) = single_cpu_core();
    let tgid = core.quota_create_group(0).unwrap();
    let quota = |prio| SchedParams::Quota { prio, group: tgid };
    let m = core.create_mutex(MutexProtocol::Inherit, MONO).unwrap();
    let owner = spawn(&mut core, "owner", 0, quota(50));
    lock(&mut core, m, owner).unwrap();
    core.suspend_thread(owner).unwrap();

    // a lower waiter leaves the owner alone
    let low = spawn(&mut core, "low", 0, quota(40));
    assert_eq!(lock(&mut core, m, low), Ok(Outcome::Blocked));
    let o = core.thread(owner).unwrap();
    assert_eq!(o.sched_class(), SchedClass::Quota);
    assert_eq!(o.cprio(), 50);
    assert!(!o.state().contains(ThreadState::BOOST));

    // a higher one boosts it without leaving the group
    core.resume_thread(owner).unwrap();
    let high = spawn(&mut core, "high", 0, quota(60));
    assert_eq!(lock(&mut core, m, high), Ok(Outcome::Blocked));
    let o = core.thread(owner).unwrap();
    assert_eq!(o.sched_class(), SchedClass::Quota);
    assert_eq!(o.cprio(), 60);
    assert!(o.state().contains(ThreadState::BOOST));
    assert_eq!(core.current(0).unwrap(), owner);

    let budget = core.quota_group_info(0, tgid).unwrap().run_budget;
    core.advance_clock(1_000);
    assert_eq!(core.quota_group_info(0, tgid).unwrap().run_budget, budget - 1_000);

    core.mutex_unlock(m, owner).unwrap();
    assert_eq!(core.current(0).unwrap(), high);
    assert_eq!(core.mutex_owner(m).unwrap(), Some(high));
    let o = core.thread(owner).unwrap();
    assert_eq!(o.cprio(), 50);
    assert!(!o.state().contains(ThreadState::BOOST));
}

#[test]
fn test_waiter_timeout_drops_boost() {
    let (mut core, _log) = single_cpu_core();
    let m = core.create_mutex(MutexProtocol::Inherit, MONO).unwrap();
    let low = spawn(&mut core, "low", 0, fifo(10));
    lock(&mut core, m, low).unwrap();
    let high = spawn(&mut core, "high", 0, fifo(90));
    core.mutex_lock(m, high, Timeout::from_ticks(1_000), TimeoutMode::Relative)
        .unwrap();
    assert_eq!(core.thread(low).unwrap().cprio(), 90);

    core.advance_clock(1_000);
    assert_eq!(core.current(0).unwrap(), high);
    assert_eq!(core.wait_result(high), Err(Error::TimedOut));
    assert_eq!(core.thread(low).unwrap().cprio(), 10);
    assert_eq!(core.mutex_owner(m).unwrap(), Some(low));
}

#[test]
fn test_owner_deletion_hands_mutex_over() {
    let (mut core, _log) = single_cpu_core();
    let m = core.create_mutex(MutexProtocol::Inherit, MONO).unwrap();
    let low = spawn(&mut core, "low", 0, fifo(10));
    lock(&mut core, m, low).unwrap();
    let high = spawn(&mut core, "high", 0, fifo(90));
    lock(&mut core, m, high).unwrap();

    core.delete_thread(low).unwrap();
    assert_eq!(core.current(0).unwrap(), high);
    assert_eq!(core.wait_result(high), Ok(()));
    assert_eq!(core.mutex_owner(m).unwrap(), Some(high));
}

#[test]
fn test_mutex_destroy_wakes_waiters() {
    let (mut core, _log) = single_cpu_core();
    let m = core.create_mutex(MutexProtocol::Inherit, MONO).unwrap();
    let low = spawn(&mut core, "low", 0, fifo(10));
    lock(&mut core, m, low).unwrap();
    let high = spawn(&mut core, "high", 0, fifo(90));
    lock(&mut core, m, high).unwrap();

    core.destroy_mutex(m).unwrap();
    assert_eq!(core.current(0).unwrap(), high);
    assert_eq!(core.wait_result(high), Err(Error::Deleted));
    assert_eq!(core.thread(low).unwrap().cprio(), 10);
    assert!(core.thread(low).unwrap().owned_mutexes().is_empty());
}

#[test]
fn test_gated_signal_waits_for_gate_exit() {
    let (mut core, _log) = single_cpu_core();
    let gate = core.create_gate(MutexProtocol::Inherit, MONO).unwrap();
    let event = core.create_event(MONO).unwrap();
    let producer = spawn(&mut core, "producer", 0, fifo(10));
    let consumer = spawn(&mut core, "consumer", 0, fifo(20));

    let infinite = (Timeout::INFINITE, TimeoutMode::Relative);
    core.monitor_enter(gate, consumer, infinite.0, infinite.1)
        .unwrap();
    let outcome = core
        .monitor_wait(event, consumer, Some(gate), infinite.0, infinite.1)
        .unwrap();
    assert_eq!(outcome, Outcome::Blocked);
    assert_eq!(core.monitor(event).unwrap().bound_gate(), Some(gate));
    assert_eq!(core.current(0).unwrap(), producer);

    core.monitor_enter(gate, producer, infinite.0, infinite.1)
        .unwrap();
    core.monitor_signal(event, None, false).unwrap();
    assert!(core.monitor_flags(event).unwrap().contains(MonitorFlags::SIGNALED));
    assert!(core.monitor_flags(gate).unwrap().contains(MonitorFlags::SIGNALED));
    assert!(core.thread(consumer).unwrap().state().contains(ThreadState::PEND));

    core.monitor_exit(gate, producer).unwrap();
    assert_eq!(core.current(0).unwrap(), consumer);
    assert_eq!(core.wait_result(consumer), Ok(()));
    assert!(core.monitor_flags(event).unwrap().is_empty());
    assert!(core.monitor_flags(gate).unwrap().is_empty());
    assert_eq!(
        core.monitor_unwait(Some(gate), consumer),
        Ok(Outcome::Completed)
    );
    core.monitor_exit(gate, consumer).unwrap();
}

#[test]
fn test_gated_wait_checks() {
    let (mut core, _log) = single_cpu_core();
    let gate = core.create_gate(MutexProtocol::Inherit, MONO).unwrap();
    let other = core.create_gate(MutexProtocol::Inherit, MONO).unwrap();
    let event = core.create_event(MONO).unwrap();
    let a = spawn(&mut core, "a", 0, fifo(10));
    let inf = Timeout::INFINITE;
    let rel = TimeoutMode::Relative;

    assert_eq!(
        core.monitor_wait(event, a, Some(gate), inf, rel),
        Err(Error::NotOwner)
    );
    core.monitor_enter(gate, a, inf, rel).unwrap();
    assert_eq!(
        core.monitor_wait(event, a, Some(gate), Timeout::NONBLOCK, rel),
        Err(Error::WouldBlock)
    );
    assert_eq!(
        core.monitor_wait(event, a, Some(gate), Timeout::from_ticks(100), rel),
        Ok(Outcome::Blocked)
    );
    core.advance_clock(100);
    assert_eq!(core.wait_result(a), Err(Error::TimedOut));
    core.monitor_unwait(Some(gate), a).unwrap();

    // bound for good now
    assert_eq!(
        core.monitor_wait(event, a, None, inf, rel),
        Err(Error::InvalidArgument)
    );
    core.monitor_enter(other, a, inf, rel).unwrap();
    assert_eq!(
        core.monitor_wait(event, a, Some(other), inf, rel),
        Err(Error::InvalidArgument)
    );
    assert_eq!(core.monitor_exit(other, a), Ok(()));
    assert_eq!(core.monitor_exit(other, a), Err(Error::NotOwner));
}

#[test]
fn test_ungated_event_latches_signal() {
    let (mut core, _log) = single_cpu_core();
    let event = core.create_event(MONO).unwrap();
    let waiter = spawn(&mut core, "waiter", 0, fifo(20));
    let inf = Timeout::INFINITE;
    let rel = TimeoutMode::Relative;

    assert_eq!(
        core.monitor_wait(event, waiter, None, inf, rel),
        Ok(Outcome::Blocked)
    );
    core.monitor_signal(event, None, false).unwrap();
    assert_eq!(core.current(0).unwrap(), waiter);
    assert_eq!(core.wait_result(waiter), Ok(()));

    // nobody waits: the signal is kept for the next waiter
    core.monitor_signal(event, None, false).unwrap();
    assert!(core.monitor_flags(event).unwrap().contains(MonitorFlags::RAISED));
    assert_eq!(
        core.monitor_wait(event, waiter, None, inf, rel),
        Ok(Outcome::Completed)
    );
    assert!(core.monitor_flags(event).unwrap().is_empty());
}

#[test]
fn test_event_broadcast_wakes_all() {
    let (mut core, _log) = single_cpu_core();
    let event = core.create_event(MONO).unwrap();
    let a = spawn(&mut core, "a", 0, fifo(10));
    core.monitor_wait(event, a, None, Timeout::INFINITE, TimeoutMode::Relative)
        .unwrap();
    let b = spawn(&mut core, "b", 0, fifo(20));
    core.monitor_wait(event, b, None, Timeout::INFINITE, TimeoutMode::Relative)
        .unwrap();

    core.monitor_signal(event, None, true).unwrap();
    assert_eq!(core.current(0).unwrap(), b);
    assert!(!core.thread(a).unwrap().state().contains(ThreadState::PEND));
    assert!(!core.monitor_flags(event).unwrap().contains(MonitorFlags::RAISED));
}

proptest! {
    #[test]
    fn prop_semaphore_count_matches_model(
        initval in 0i32..8,
        ops in proptest::collection::vec(any::<bool>(), 0..64),
    ) {
        let (mut core, _log) = single_cpu_core();
        let s = core.create_semaphore(initval, SemFlags::empty(), MONO).unwrap();
        let t = spawn(&mut core, "t", 0, fifo(10));
        let mut model = initval;

        for up in ops {
            if up {
                core.sem_up(s).unwrap();
                model += 1;
            } else if model > 0 {
                prop_assert_eq!(core.sem_trydown(s, t), Ok(()));
                model -= 1;
            } else {
                prop_assert_eq!(core.sem_trydown(s, t), Err(Error::WouldBlock));
            }
            prop_assert_eq!(core.sem_value(s).unwrap(), model);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum MutexOp {
    Lock { timed: bool },
    Unlock,
    Suspend(usize),
    Resume(usize),
    Unblock(usize),
    Advance(i64),
}

fn mutex_op() -> impl Strategy<Value = MutexOp> {
    prop_oneof![
        3 => any::<bool>().prop_map(|timed| MutexOp::Lock { timed }),
        2 => Just(MutexOp::Unlock),
        1 => (0usize..5).prop_map(MutexOp::Suspend),
        2 => (0usize..5).prop_map(MutexOp::Resume),
        1 => (0usize..5).prop_map(MutexOp::Unblock),
        1 => (1i64..100).prop_map(MutexOp::Advance),
    ]
}

/// One owner at most, matching the lock word, running at least as high as
/// every waiter and unboosted once nobody waits
fn check_mutex(core: &Core, m: MutexId, threads: &[ThreadId]) -> Result<(), TestCaseError> {
    let word = lock_word(core, m);
    let owner = core.mutex_owner(m).unwrap();
    let wq = core.mutex(m).unwrap().wait_queue();
    let waiters: Vec<ThreadId> = core.wait_queue(wq).unwrap().waiters().collect();

    match owner {
        Some(o) => {
            let o = core.thread(o).unwrap();
            prop_assert_eq!(evl_api::abi::fastlock_owner(word), o.handle());
            prop_assert!(!waiters.contains(&o.id()));
            for &w in &waiters {
                prop_assert!(o.wprio() >= core.thread(w).unwrap().wprio());
            }
        }
        None => {
            prop_assert_eq!(word, 0);
            prop_assert!(waiters.is_empty());
        }
    }
    for &tid in threads {
        let t = core.thread(tid).unwrap();
        if owner == Some(tid) && !waiters.is_empty() {
            continue;
        }
        prop_assert!(!t.state().contains(ThreadState::BOOST));
        prop_assert_eq!(t.sched_class(), t.base_class());
        prop_assert_eq!(t.cprio(), t.bprio());
    }
    Ok(())
}

proptest! {
    #[test]
    fn prop_inherit_mutex_keeps_owner_above_waiters(
        ops in proptest::collection::vec(mutex_op(), 0..64),
    ) {
        let (mut core, _log) = single_cpu_core();
        let tgid = core.quota_create_group(0).unwrap();
        let m = core.create_mutex(MutexProtocol::Inherit, MONO).unwrap();
        let threads = [
            spawn(&mut core, "fifo-lo", 0, fifo(20)),
            spawn(&mut core, "fifo-hi", 0, fifo(60)),
            spawn(&mut core, "weak", 0, SchedParams::Weak { prio: 5 }),
            spawn(&mut core, "quota-lo", 0, SchedParams::Quota { prio: 30, group: tgid }),
            spawn(&mut core, "quota-hi", 0, SchedParams::Quota { prio: 70, group: tgid }),
        ];

        for op in ops {
            let curr = core.current(0).unwrap();
            let curr = threads.contains(&curr).then_some(curr);
            match op {
                MutexOp::Lock { timed } => {
                    if let Some(curr) = curr {
                        let timeout = if timed { Timeout::from_ticks(50) } else { Timeout::INFINITE };
                        let _ = core.mutex_lock(m, curr, timeout, TimeoutMode::Relative);
                    }
                }
                MutexOp::Unlock => {
                    if let Some(curr) = curr {
                        let _ = core.mutex_unlock(m, curr);
                    }
                }
                MutexOp::Suspend(i) => core.suspend_thread(threads[i]).unwrap(),
                MutexOp::Resume(i) => core.resume_thread(threads[i]).unwrap(),
                MutexOp::Unblock(i) => {
                    core.unblock_thread(threads[i]).unwrap();
                }
                MutexOp::Advance(ticks) => core.advance_clock(ticks),
            }
            check_mutex(&core, m, &threads)?;
        }
    }
}
