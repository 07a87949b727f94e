//! EVL API - ABI types and error codes for the EVL real-time core
//!
//! This crate carries everything a client of the out-of-band core needs to
//! talk to it without linking the core itself: the error type, timeout
//! encoding, scheduling attributes, element attributes and the fixed-layout
//! request structures exchanged through `oob_ioctl`.
//!
//! # Architecture
//!
//! - **Error**: common error type with errno mapping
//! - **Time**: tick type, timeout sentinels and `TimeSpec`
//! - **Sched**: scheduling policies, priority ranges and attributes
//! - **Abi**: element classes, attributes, ioctl opcodes, shared state layout
//!
//! # Usage
//!
//! ```rust
//! use evl_api::{SchedParams, Timeout};
//!
//! let params = SchedParams::Fifo { prio: 42, rr_quantum: None };
//! assert!(params.validate().is_ok());
//! assert!(Timeout::INFINITE.is_infinite());
//! ```

#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod abi;
pub mod error;
pub mod sched;
pub mod time;

// Re-export commonly used types
pub use crate::abi::{ElementClass, ElementIds, FundleT, NO_HANDLE};
pub use crate::error::{Error, Result};
pub use crate::sched::{SchedAttrs, SchedParams, SchedPolicy};
pub use crate::time::{Ticks, TimeSpec, Timeout, TimeoutMode};
