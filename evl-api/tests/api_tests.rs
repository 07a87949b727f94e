//! ABI tests

use evl_api::abi::{self, mutex_ioc, monitor_ioc, sem_ioc, LockReq, WaitReq};
use evl_api::sched::{SCHED_QUOTA, SCHED_RR, SCHED_TP};
use evl_api::*;

#[test]
fn test_element_class_names() {
    for class in [
        ElementClass::Thread,
        ElementClass::Mutex,
        ElementClass::Semaphore,
        ElementClass::Monitor,
    ] {
        assert_eq!(ElementClass::from_name(class.name()), Some(class));
    }
    assert_eq!(ElementClass::from_name("proxy"), None);
}

#[test]
fn test_opcodes_are_distinct() {
    let codes = [
        mutex_ioc::LOCK,
        mutex_ioc::TRYLOCK,
        mutex_ioc::UNLOCK,
        mutex_ioc::BIND,
        sem_ioc::GET,
        sem_ioc::TRYGET,
        sem_ioc::PUT,
        sem_ioc::BROADCAST,
        sem_ioc::BIND,
        monitor_ioc::ENTER,
        monitor_ioc::TRYENTER,
        monitor_ioc::EXIT,
        monitor_ioc::WAIT,
        monitor_ioc::UNWAIT,
        monitor_ioc::SIGNAL,
        monitor_ioc::BIND,
    ];
    for (i, a) in codes.iter().enumerate() {
        for b in &codes[i + 1..] {
            assert_ne!(a, b);
        }
    }
}

#[test]
fn test_request_bytes_layout() {
    let req = LockReq {
        timeout: TimeSpec::new(1, 2),
        mode: TimeoutMode::Absolute as u32,
        __pad: 0,
    };
    let bytes = bytemuck::bytes_of(&req);
    assert_eq!(bytes.len(), 24);
    let back: LockReq = bytemuck::pod_read_unaligned(bytes);
    assert_eq!(back, req);
    assert_eq!(TimeoutMode::from_raw(back.mode), Some(TimeoutMode::Absolute));

    let wait = WaitReq {
        gatefd: -1,
        ..Default::default()
    };
    assert_eq!(bytemuck::bytes_of(&wait).len(), 32);
}

#[test]
fn test_sched_attrs_conversion() {
    let rr = SchedAttrs {
        sched_policy: SCHED_RR,
        sched_priority: 10,
        quantum: TimeSpec::new(0, 500_000),
        ..Default::default()
    };
    assert_eq!(
        rr.to_params(),
        Ok(SchedParams::Fifo { prio: 10, rr_quantum: Some(500_000) })
    );

    let quota = SchedAttrs {
        sched_policy: SCHED_QUOTA,
        sched_priority: 3,
        extra: 2,
        ..Default::default()
    };
    let params = quota.to_params().unwrap();
    assert_eq!(params, SchedParams::Quota { prio: 3, group: 2 });
    assert_eq!(SchedAttrs::from_params(&params), quota);

    let bad = SchedAttrs {
        sched_policy: SCHED_TP,
        sched_priority: 100,
        ..Default::default()
    };
    assert_eq!(bad.to_params(), Err(Error::InvalidArgument));

    let unknown = SchedAttrs {
        sched_policy: 1234,
        ..Default::default()
    };
    assert_eq!(unknown.to_params(), Err(Error::InvalidArgument));
}

#[test]
fn test_timeout_from_timespec() {
    let t: Timeout = TimeSpec::ZERO.into();
    assert!(t.is_infinite());
    let t: Timeout = TimeSpec::new(-1, 0).into();
    assert!(t.is_nonblock());
    let t: Timeout = TimeSpec::new(0, 10).into();
    assert_eq!(t.ticks(), 10);
}

#[test]
fn test_error_display() {
    let msg = format!("{}", Error::TimedOut);
    assert!(msg.contains("errno 110"));
    assert_eq!(Error::Deleted.errno(), 43);
    assert_eq!(Error::from_errno(-35), Some(Error::Deadlock));
}

#[test]
fn test_fastlock_bits() {
    let word = 7 | abi::MUTEX_FLCLAIM;
    assert_eq!(abi::fastlock_owner(word), 7);
    assert_ne!(word & abi::MUTEX_FLCLAIM, 0);
    assert_eq!(word & abi::MUTEX_FLCEIL, 0);
    assert_eq!(abi::fastlock_owner(NO_HANDLE), NO_HANDLE);
}
