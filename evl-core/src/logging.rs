//! Logging support for evl-core
//!
//! The core logs through the `log` facade when the `log` feature is on. With
//! the feature off the macros expand to nothing at runtime, but their
//! arguments are still type-checked so call sites never rot.

/// Trace-level logging (context switches, timer events)
macro_rules! evl_trace {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log")]
        log::trace!($($arg)*);
        #[cfg(not(feature = "log"))]
        {
            let _ = format_args!($($arg)*);
        }
    }};
}

/// Debug-level logging (object lifecycle)
macro_rules! evl_debug {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log")]
        log::debug!($($arg)*);
        #[cfg(not(feature = "log"))]
        {
            let _ = format_args!($($arg)*);
        }
    }};
}

/// Info-level logging (run-state transitions)
macro_rules! evl_info {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log")]
        log::info!($($arg)*);
        #[cfg(not(feature = "log"))]
        {
            let _ = format_args!($($arg)*);
        }
    }};
}

/// Warn-level logging
macro_rules! evl_warn {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log")]
        log::warn!($($arg)*);
        #[cfg(not(feature = "log"))]
        {
            let _ = format_args!($($arg)*);
        }
    }};
}

/// Error-level logging
macro_rules! evl_error {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log")]
        log::error!($($arg)*);
        #[cfg(not(feature = "log"))]
        {
            let _ = format_args!($($arg)*);
        }
    }};
}

/// Structural assertion
///
/// In debug builds, evaluates `cond`, reports it when true and yields it so
/// the caller can bail out of the offending operation. Release builds skip
/// the check and always yield `false`.
macro_rules! evl_warn_on {
    ($cond:expr) => {{
        if cfg!(debug_assertions) {
            let hit: bool = $cond;
            if hit {
                evl_warn!(
                    "structural check failed: {} ({}:{})",
                    stringify!($cond),
                    file!(),
                    line!()
                );
            }
            hit
        } else {
            false
        }
    }};
}
