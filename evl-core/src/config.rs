//! Core configuration

use evl_api::time::{NSEC_PER_MSEC, Ticks};
use evl_api::{Error, Result};

/// Highest CPU count a core instance can drive (width of the resched mask)
pub const MAX_CPUS: usize = 64;

/// Static configuration of a [`Core`](crate::Core) instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    /// Number of per-CPU run queues
    pub nr_cpus: usize,
    /// Replenishment period shared by every quota group
    pub quota_period: Ticks,
    /// Number of time partitions per CPU
    pub tp_partitions: usize,
    /// Size of the shared state heap, in 32-bit words
    pub heap_words: usize,
    /// Upper bound on live threads, root threads included
    pub max_threads: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            nr_cpus: 1,
            quota_period: 10 * NSEC_PER_MSEC,
            tp_partitions: 4,
            heap_words: 4096,
            max_threads: 256,
        }
    }
}

impl CoreConfig {
    pub fn with_cpus(mut self, nr_cpus: usize) -> Self {
        self.nr_cpus = nr_cpus;
        self
    }

    pub fn with_quota_period(mut self, period: Ticks) -> Self {
        self.quota_period = period;
        self
    }

    pub fn with_tp_partitions(mut self, nr: usize) -> Self {
        self.tp_partitions = nr;
        self
    }

    pub fn with_heap_words(mut self, words: usize) -> Self {
        self.heap_words = words;
        self
    }

    pub fn with_max_threads(mut self, max: usize) -> Self {
        self.max_threads = max;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.nr_cpus == 0 || self.nr_cpus > MAX_CPUS {
            return Err(Error::InvalidArgument);
        }
        if self.quota_period <= 0 {
            return Err(Error::InvalidArgument);
        }
        if self.tp_partitions == 0 || self.heap_words == 0 {
            return Err(Error::InvalidArgument);
        }
        // one root thread per CPU, plus room for at least one more
        if self.max_threads <= self.nr_cpus {
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }
}
