use std::time::Duration;

/// How strongly the host system is asking for memory to be released.
///
/// The pool trims its caches more aggressively as the pressure rises.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum MemoryPressure {
    /// Memory is plentiful. Only long-idle buffers are released, a few at a time.
    #[default]
    Low,

    /// Memory is getting scarce. Idle buffers are released somewhat faster.
    Medium,

    /// Memory is scarce. Per-thread caches are flushed and shards are drained quickly.
    High,
}

const DEFAULT_SHARD_TRIM_AFTER: Duration = Duration::from_secs(60);
const DEFAULT_SHARD_HIGH_PRESSURE_TRIM_AFTER: Duration = Duration::from_secs(10);
const DEFAULT_LOW_PRESSURE_EVICTIONS: usize = 1;
const DEFAULT_MEDIUM_PRESSURE_EVICTIONS: usize = 2;
const DEFAULT_HIGH_PRESSURE_EVICTIONS: usize = 8;
const DEFAULT_LARGE_BUCKET_LENGTH: usize = 16 * 1024;
const DEFAULT_MODERATE_ELEMENT_SIZE: usize = 16;
const DEFAULT_LARGE_ELEMENT_SIZE: usize = 32;
const DEFAULT_THREAD_CACHE_MEDIUM_PRESSURE_IDLE: Duration = Duration::from_secs(15);
const DEFAULT_THREAD_CACHE_LOW_PRESSURE_IDLE: Duration = Duration::from_secs(30);

/// Tuning constants for trimming cached buffers from a [`ShardedArrayPool`][1].
///
/// Every trim pass visits each shard and each per-thread cache slot:
///
/// * A shard only gives up buffers once it has been holding some for longer than its age
///   threshold. It then evicts a pressure-dependent number of buffers and, if any remain,
///   becomes eligible again after a quarter of the threshold.
/// * A per-thread cache slot is stamped the first time a trim pass sees it occupied and
///   evicted once it has stayed idle for a pressure-dependent window. Under high memory
///   pressure every slot is evicted immediately.
///
/// The defaults are empirically tuned. They are exposed for adjustment, not because there is
/// a known better policy.
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use array_pool::{ShardedArrayPool, TrimPolicy};
///
/// let policy = TrimPolicy::default()
///     .shard_trim_after(Duration::from_secs(30))
///     .high_pressure_evictions(16);
///
/// let pool = ShardedArrayPool::<u8>::builder()
///     .trim_policy(policy)
///     .build()
///     .unwrap();
/// ```
///
/// [1]: crate::ShardedArrayPool
#[derive(Clone, Debug, Eq, PartialEq)]
#[must_use]
pub struct TrimPolicy {
    shard_trim_after: Duration,
    shard_high_pressure_trim_after: Duration,
    low_pressure_evictions: usize,
    medium_pressure_evictions: usize,
    high_pressure_evictions: usize,
    large_bucket_length: usize,
    moderate_element_size: usize,
    large_element_size: usize,
    thread_cache_medium_pressure_idle: Duration,
    thread_cache_low_pressure_idle: Duration,
}

impl TrimPolicy {
    /// How long a shard must have been holding buffers before low or medium pressure
    /// trimming evicts any of them. Default 60 seconds.
    pub fn shard_trim_after(mut self, value: Duration) -> Self {
        self.shard_trim_after = value;
        self
    }

    /// How long a shard must have been holding buffers before high pressure trimming
    /// evicts any of them. Default 10 seconds.
    pub fn shard_high_pressure_trim_after(mut self, value: Duration) -> Self {
        self.shard_high_pressure_trim_after = value;
        self
    }

    /// Buffers evicted from an aged shard per trim pass under low pressure. Default 1.
    pub fn low_pressure_evictions(mut self, value: usize) -> Self {
        self.low_pressure_evictions = value;
        self
    }

    /// Buffers evicted from an aged shard per trim pass under medium pressure. Default 2.
    pub fn medium_pressure_evictions(mut self, value: usize) -> Self {
        self.medium_pressure_evictions = value;
        self
    }

    /// Buffers evicted from an aged shard per trim pass under high pressure, before scaling
    /// for large buckets and large element types. Default 8.
    pub fn high_pressure_evictions(mut self, value: usize) -> Self {
        self.high_pressure_evictions = value;
        self
    }

    /// Buckets with longer buffers than this evict one extra buffer under high pressure.
    /// Default 16384 elements.
    pub fn large_bucket_length(mut self, value: usize) -> Self {
        self.large_bucket_length = value;
        self
    }

    /// Element types larger than this (in bytes) evict one extra buffer under high pressure.
    /// Default 16 bytes.
    pub fn moderate_element_size(mut self, value: usize) -> Self {
        self.moderate_element_size = value;
        self
    }

    /// Element types larger than this (in bytes) evict yet another extra buffer under
    /// high pressure. Default 32 bytes.
    pub fn large_element_size(mut self, value: usize) -> Self {
        self.large_element_size = value;
        self
    }

    /// How long a per-thread cache slot may stay idle under medium pressure. Default 15 seconds.
    pub fn thread_cache_medium_pressure_idle(mut self, value: Duration) -> Self {
        self.thread_cache_medium_pressure_idle = value;
        self
    }

    /// How long a per-thread cache slot may stay idle under low pressure. Default 30 seconds.
    pub fn thread_cache_low_pressure_idle(mut self, value: Duration) -> Self {
        self.thread_cache_low_pressure_idle = value;
        self
    }

    /// Decides how a shard of the given bucket is trimmed under the given pressure.
    pub(crate) fn shard_plan(
        &self,
        pressure: MemoryPressure,
        bucket_length: usize,
        element_size: usize,
    ) -> ShardTrimPlan {
        let (trim_after, evictions) = match pressure {
            MemoryPressure::High => {
                let mut evictions = self.high_pressure_evictions;

                if bucket_length > self.large_bucket_length {
                    evictions = evictions.saturating_add(1);
                }

                if element_size > self.moderate_element_size {
                    evictions = evictions.saturating_add(1);
                }

                if element_size > self.large_element_size {
                    evictions = evictions.saturating_add(1);
                }

                (self.shard_high_pressure_trim_after, evictions)
            }
            MemoryPressure::Medium => (self.shard_trim_after, self.medium_pressure_evictions),
            MemoryPressure::Low => (self.shard_trim_after, self.low_pressure_evictions),
        };

        ShardTrimPlan {
            trim_after_millis: duration_to_millis(trim_after),
            evictions,
        }
    }

    /// How long a per-thread cache slot may stay idle under the given pressure.
    ///
    /// `None` means every slot is evicted immediately.
    pub(crate) fn thread_cache_idle_millis(&self, pressure: MemoryPressure) -> Option<u64> {
        match pressure {
            MemoryPressure::High => None,
            MemoryPressure::Medium => Some(duration_to_millis(
                self.thread_cache_medium_pressure_idle,
            )),
            MemoryPressure::Low => Some(duration_to_millis(self.thread_cache_low_pressure_idle)),
        }
    }
}

impl Default for TrimPolicy {
    fn default() -> Self {
        Self {
            shard_trim_after: DEFAULT_SHARD_TRIM_AFTER,
            shard_high_pressure_trim_after: DEFAULT_SHARD_HIGH_PRESSURE_TRIM_AFTER,
            low_pressure_evictions: DEFAULT_LOW_PRESSURE_EVICTIONS,
            medium_pressure_evictions: DEFAULT_MEDIUM_PRESSURE_EVICTIONS,
            high_pressure_evictions: DEFAULT_HIGH_PRESSURE_EVICTIONS,
            large_bucket_length: DEFAULT_LARGE_BUCKET_LENGTH,
            moderate_element_size: DEFAULT_MODERATE_ELEMENT_SIZE,
            large_element_size: DEFAULT_LARGE_ELEMENT_SIZE,
            thread_cache_medium_pressure_idle: DEFAULT_THREAD_CACHE_MEDIUM_PRESSURE_IDLE,
            thread_cache_low_pressure_idle: DEFAULT_THREAD_CACHE_LOW_PRESSURE_IDLE,
        }
    }
}

/// What a single trim pass does to one shard.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct ShardTrimPlan {
    /// The shard must have been aging for longer than this before anything is evicted.
    pub(crate) trim_after_millis: u64,

    /// Maximum number of buffers to evict in this pass.
    pub(crate) evictions: usize,
}

fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
