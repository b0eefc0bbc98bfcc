use std::any::type_name;
use std::fmt;
use std::iter;
use std::marker::PhantomData;
use std::num::NonZero;

use new_zealand::nz;
use nm::Event;
use tracing::{debug, trace};

use crate::metrics::{RENT_ALLOCATED, RENT_FROM_SHARD, RETURN_DROPPED_FULL, RETURN_POOLED};
use crate::{
    ArrayPool, Buffer, RentTarget, Result, ReturnPolicy, Shard, SizeClass, bucket_count_for,
    classify_rent, classify_return, require_positive,
};

const DEFAULT_MAX_BUFFER_LENGTH: NonZero<usize> = nz!(1_048_576);
const DEFAULT_MAX_BUFFERS_PER_BUCKET: NonZero<usize> = nz!(50);

/// A simple array pool with one bounded, locked bucket per size class.
///
/// There are no per-thread caches and no trimming. Every rent and return takes the lock of
/// one bucket, so throughput under heavy contention is lower than that of a
/// [`ShardedArrayPool`][crate::ShardedArrayPool]. In exchange, the memory the pool can hold
/// on to is bounded up front by [`max_cached_elements()`][Self::max_cached_elements].
///
/// # Example
///
/// ```
/// use array_pool::{ArrayPool, BucketedArrayPool, ReturnPolicy};
///
/// let pool = BucketedArrayPool::<u64>::builder()
///     .max_buffer_length(4096)
///     .max_buffers_per_bucket(4)
///     .build()
///     .unwrap();
///
/// let buffer = pool.rent(1000);
/// assert_eq!(buffer.len(), 1024);
///
/// pool.return_buffer(buffer, ReturnPolicy::ClearContents).unwrap();
/// ```
pub struct BucketedArrayPool<T> {
    buckets: Box<[Shard<T>]>,
    max_buffers_per_bucket: NonZero<usize>,
}

impl<T> BucketedArrayPool<T>
where
    T: Default + Send,
{
    /// Creates a pool that caches up to 50 buffers of each size class up to 1 MiB elements.
    ///
    /// Use [`builder()`][Self::builder] to customize the pool.
    #[must_use]
    pub fn new() -> Self {
        BucketedArrayPoolBuilder::build_valid(
            DEFAULT_MAX_BUFFER_LENGTH,
            DEFAULT_MAX_BUFFERS_PER_BUCKET,
        )
    }

    /// Creates a builder for a customized pool.
    pub fn builder() -> BucketedArrayPoolBuilder<T> {
        BucketedArrayPoolBuilder::new()
    }
}

impl<T> BucketedArrayPool<T> {
    /// Length of the buffers in the largest size class this pool caches.
    #[must_use]
    pub fn max_buffer_length(&self) -> usize {
        self.buckets
            .len()
            .checked_sub(1)
            .and_then(SizeClass::from_index)
            .map_or(0, SizeClass::canonical_length)
    }

    /// How many buffers each size class can cache.
    #[must_use]
    pub fn max_buffers_per_bucket(&self) -> usize {
        self.max_buffers_per_bucket.get()
    }

    /// Upper bound on the number of elements held in cached buffers, across all size classes.
    #[must_use]
    pub fn max_cached_elements(&self) -> usize {
        (0..self.buckets.len())
            .filter_map(SizeClass::from_index)
            .map(|class| {
                class
                    .canonical_length()
                    .saturating_mul(self.max_buffers_per_bucket.get())
            })
            .fold(0, usize::saturating_add)
    }

    /// Number of buffers currently cached, across all size classes.
    #[must_use]
    pub fn cached_buffers(&self) -> usize {
        self.buckets.iter().map(Shard::len).sum()
    }
}

impl<T> ArrayPool<T> for BucketedArrayPool<T>
where
    T: Default + Send,
{
    fn rent(&self, minimum_length: usize) -> Buffer<T> {
        let class = match classify_rent(minimum_length, self.buckets.len()) {
            RentTarget::Empty => return Buffer::empty(),
            RentTarget::Unpooled(length) => return Buffer::new_default(length.get()),
            RentTarget::Pooled(class) => class,
        };

        if let Some(buffer) = self
            .buckets
            .get(class.index())
            .and_then(Shard::try_pop)
        {
            RENT_FROM_SHARD.with(Event::observe_once);
            return buffer;
        }

        RENT_ALLOCATED.with(Event::observe_once);
        Buffer::new_default(class.canonical_length())
    }

    fn return_buffer(&self, buffer: Buffer<T>, policy: ReturnPolicy) -> Result<()> {
        let Some(class) = classify_return(&buffer, self.buckets.len())? else {
            return Ok(());
        };

        let Some(bucket) = self.buckets.get(class.index()) else {
            return Ok(());
        };

        let mut buffer = buffer;

        if policy == ReturnPolicy::ClearContents {
            buffer.clear();
        }

        match bucket.try_push(buffer) {
            Ok(()) => RETURN_POOLED.with(Event::observe_once),
            Err(dropped) => {
                RETURN_DROPPED_FULL.with(Event::observe_once);
                trace!(
                    length = dropped.len(),
                    "dropping buffer because its bucket is full"
                );
            }
        }

        Ok(())
    }
}

impl<T> Default for BucketedArrayPool<T>
where
    T: Default + Send,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for BucketedArrayPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("max_buffer_length", &self.max_buffer_length())
            .field("max_buffers_per_bucket", &self.max_buffers_per_bucket)
            .field("cached_buffers", &self.cached_buffers())
            .finish_non_exhaustive()
    }
}

/// Builder for a customized [`BucketedArrayPool`].
///
/// Created via [`BucketedArrayPool::builder()`].
#[must_use]
pub struct BucketedArrayPoolBuilder<T> {
    max_buffer_length: usize,
    max_buffers_per_bucket: usize,

    _element: PhantomData<fn() -> T>,
}

impl<T> BucketedArrayPoolBuilder<T>
where
    T: Default + Send,
{
    fn new() -> Self {
        Self {
            max_buffer_length: DEFAULT_MAX_BUFFER_LENGTH.get(),
            max_buffers_per_bucket: DEFAULT_MAX_BUFFERS_PER_BUCKET.get(),
            _element: PhantomData,
        }
    }

    /// Length of the buffers in the largest size class the pool caches.
    ///
    /// Rounded up to a size class and clamped to
    /// [`MIN_BUFFER_LENGTH`][crate::MIN_BUFFER_LENGTH]..=[`MAX_BUFFER_LENGTH`][crate::MAX_BUFFER_LENGTH].
    /// Default 1 MiB elements.
    pub fn max_buffer_length(mut self, value: usize) -> Self {
        self.max_buffer_length = value;
        self
    }

    /// How many buffers each size class can cache. Default 50.
    pub fn max_buffers_per_bucket(mut self, value: usize) -> Self {
        self.max_buffers_per_bucket = value;
        self
    }

    /// Builds the pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`][crate::Error::InvalidConfiguration] if any of the
    /// settings is zero.
    pub fn build(self) -> Result<BucketedArrayPool<T>> {
        let max_buffer_length = require_positive("max_buffer_length", self.max_buffer_length)?;
        let max_buffers_per_bucket =
            require_positive("max_buffers_per_bucket", self.max_buffers_per_bucket)?;

        Ok(Self::build_valid(
            max_buffer_length,
            max_buffers_per_bucket,
        ))
    }

    fn build_valid(
        max_buffer_length: NonZero<usize>,
        max_buffers_per_bucket: NonZero<usize>,
    ) -> BucketedArrayPool<T> {
        let bucket_count = bucket_count_for(max_buffer_length);

        let buckets = iter::repeat_with(|| Shard::new(max_buffers_per_bucket))
            .take(bucket_count)
            .collect();

        debug!(
            bucket_count,
            max_buffers_per_bucket = max_buffers_per_bucket.get(),
            "created bucketed array pool"
        );

        BucketedArrayPool {
            buckets,
            max_buffers_per_bucket,
        }
    }
}

impl<T> fmt::Debug for BucketedArrayPoolBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("max_buffer_length", &self.max_buffer_length)
            .field("max_buffers_per_bucket", &self.max_buffers_per_bucket)
            .finish_non_exhaustive()
    }
}
