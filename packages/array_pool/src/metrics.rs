//! Metrics for the array pools.
//!
//! Every event is a per-thread instance, so recording an observation never contends with
//! other threads. The events are published via the `nm` reporting API.

use nm::{Event, Magnitude};

/// Histogram buckets for requested buffer lengths, in elements.
///
/// Follows the size classes of the pool (powers of two from 16 upward), with a few
/// larger buckets to show how much traffic bypasses pooling entirely.
const REQUESTED_LENGTH_BUCKETS: &[Magnitude] = &[
    0,
    16,
    64,
    256,
    1024,
    4096,
    16 * 1024,
    64 * 1024,
    256 * 1024,
    1024 * 1024,
    16 * 1024 * 1024,
    1024 * 1024 * 1024,
];

/// Histogram buckets for the number of buffers evicted by one trim pass.
const TRIM_EVICTIONS_BUCKETS: &[Magnitude] = &[0, 1, 2, 4, 8, 16, 32, 64, 128, 256, 1024];

thread_local! {
    /// Observes the requested length of every rent call.
    pub(crate) static RENT_REQUESTED_LENGTH: Event = Event::builder()
        .name("array_pool_rent_requested_length")
        .histogram(REQUESTED_LENGTH_BUCKETS)
        .build();

    /// A rent call was satisfied from the calling thread's private cache.
    pub(crate) static RENT_FROM_THREAD_CACHE: Event = Event::builder()
        .name("array_pool_rent_from_thread_cache")
        .build();

    /// A rent call was satisfied from a shared shard or bucket.
    pub(crate) static RENT_FROM_SHARD: Event = Event::builder()
        .name("array_pool_rent_from_shard")
        .build();

    /// A rent call for a poolable length found nothing cached and allocated a new buffer.
    pub(crate) static RENT_ALLOCATED: Event = Event::builder()
        .name("array_pool_rent_allocated")
        .build();

    /// A rent call was for a length too large to pool and allocated an exact-size buffer.
    pub(crate) static RENT_OVERSIZED: Event = Event::builder()
        .name("array_pool_rent_oversized")
        .build();

    /// A returned buffer was accepted into the pool.
    pub(crate) static RETURN_POOLED: Event = Event::builder()
        .name("array_pool_return_pooled")
        .build();

    /// A returned buffer was dropped because every place that could hold it was full.
    pub(crate) static RETURN_DROPPED_FULL: Event = Event::builder()
        .name("array_pool_return_dropped_full")
        .build();

    /// A returned buffer was dropped because its length is beyond what the pool caches.
    pub(crate) static RETURN_DROPPED_OVERSIZED: Event = Event::builder()
        .name("array_pool_return_dropped_oversized")
        .build();

    /// A returned buffer was rejected because its length matches no size class.
    pub(crate) static RETURN_REJECTED: Event = Event::builder()
        .name("array_pool_return_rejected")
        .build();

    /// Observes how many buffers each trim pass evicted.
    pub(crate) static TRIM_EVICTED: Event = Event::builder()
        .name("array_pool_trim_evicted")
        .histogram(TRIM_EVICTIONS_BUCKETS)
        .build();
}

/// Converts a count or length into a metric magnitude, saturating at the largest magnitude.
pub(crate) fn magnitude(value: usize) -> Magnitude {
    Magnitude::try_from(value).unwrap_or(Magnitude::MAX)
}
