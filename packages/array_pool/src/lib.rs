#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Pools of reusable, fixed-length buffers.
//!
//! Hot paths that repeatedly need scratch space (I/O, serialization, formatting) can rent a
//! buffer from a pool instead of allocating one, then hand it back when done so the next
//! caller can reuse the allocation.
//!
//! # Size classes
//!
//! Pooled buffers come in size classes whose lengths start at [`MIN_BUFFER_LENGTH`] and double
//! up to a configurable maximum of at most [`MAX_BUFFER_LENGTH`]. A rent request is rounded up
//! to the smallest size class that can hold it. Requests beyond the largest size class of a
//! pool are served with exactly-sized buffers that the pool does not cache.
//!
//! # Pools
//!
//! * [`ShardedArrayPool`] is built for throughput. Each thread keeps one buffer per size class
//!   in a private cache, backed by per-processor shards that any thread can draw from. Cached
//!   buffers are released over time by trimming, driven by the memory pressure of the system.
//! * [`BucketedArrayPool`] keeps one locked, bounded bucket per size class. It never trims,
//!   and its memory footprint is bounded up front.
//!
//! Both implement the [`ArrayPool`] trait. A process-wide byte pool is available via
//! [`shared_byte_pool()`].
//!
//! # Ownership
//!
//! A rented [`Buffer`] is an owned, move-only value. Returning it to the pool consumes it, so a
//! caller cannot keep using a buffer after giving it back. [`ArrayPool::rent_scoped()`] wraps
//! the buffer in a guard that returns it automatically.
//!
//! # Example
//!
//! ```
//! use array_pool::{ArrayPool, ReturnPolicy, ShardedArrayPool};
//!
//! let pool = ShardedArrayPool::<u8>::new();
//!
//! let mut buffer = pool.rent(1500);
//! assert!(buffer.len() >= 1500);
//!
//! buffer[..4].copy_from_slice(b"ping");
//!
//! // The next renter will see zeroes instead of our data.
//! pool.return_buffer(buffer, ReturnPolicy::ClearContents)
//!     .unwrap();
//! ```
//!
//! # Trimming
//!
//! ```
//! use std::time::Duration;
//!
//! use array_pool::ShardedArrayPool;
//!
//! let pool = ShardedArrayPool::<u8>::new();
//!
//! // Either call `trim()` from a timer the application already has...
//! assert!(pool.trim());
//!
//! // ...or let the pool trim itself on a background thread.
//! let trimmer = pool.start_periodic_trimming(Duration::from_secs(10));
//! # drop(trimmer);
//! ```

mod bucketed_pool;
mod buffer;
mod error;
mod metrics;
mod pal;
mod pool;
mod return_policy;
mod shard;
mod shard_set;
mod sharded_pool;
mod shared;
mod size_class;
mod thread_cache;
mod trim_policy;
mod trimmer;

pub use bucketed_pool::*;
pub use buffer::*;
pub use error::*;
pub(crate) use error::require_positive;
pub use pool::*;
pub(crate) use pool::{RentTarget, classify_rent, classify_return};
pub use return_policy::*;
pub(crate) use shard::*;
pub(crate) use shard_set::*;
pub use sharded_pool::*;
pub use shared::*;
pub use size_class::*;
pub(crate) use size_class::{
    MAX_BUFFER_LENGTH_NZ, MIN_BUFFER_LENGTH_NZ, bucket_count_for, bucket_index,
};
pub(crate) use thread_cache::*;
pub use trim_policy::*;
pub(crate) use trim_policy::ShardTrimPlan;
pub use trimmer::*;
