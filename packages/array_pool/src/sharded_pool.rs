use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::num::NonZero;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use new_zealand::nz;
use nm::Event;
use tracing::{debug, trace};

use crate::metrics::{
    RENT_ALLOCATED, RENT_FROM_SHARD, RENT_FROM_THREAD_CACHE, RETURN_DROPPED_FULL, RETURN_POOLED,
    TRIM_EVICTED, magnitude,
};
use crate::pal::{Platform, PlatformFacade};
use crate::{
    ArrayPool, Buffer, MAX_BUFFER_LENGTH_NZ, MemoryPressure, PeriodicTrimmer, RentTarget, Result,
    ReturnPolicy, ShardSet, SizeClass, ThreadCacheRegistry, TrimPolicy, bucket_count_for,
    classify_rent, classify_return, current_thread_hash, require_positive,
};

const DEFAULT_MAX_BUFFER_LENGTH: NonZero<usize> = MAX_BUFFER_LENGTH_NZ;
const DEFAULT_BUFFERS_PER_SHARD: NonZero<usize> = nz!(8);
const DEFAULT_MAX_SHARDS: NonZero<usize> = nz!(64);

/// A high-throughput array pool for buffers shared between many threads.
///
/// Every thread that returns buffers to the pool gets a private cache holding up to one
/// buffer per size class. Renting first checks that cache, so a thread that repeatedly rents
/// and returns the same size of buffer does not touch any shared state. Buffers displaced
/// from a private cache overflow into a set of shards per size class (one shard per
/// processor, up to a limit), which any thread can rent from.
///
/// Cached buffers are only released when the pool is trimmed, either by calling
/// [`trim()`][Self::trim] from a periodic trigger owned by the application or by starting
/// a background trimmer via [`start_periodic_trimming()`][Self::start_periodic_trimming].
/// How aggressively trimming releases buffers depends on the memory pressure of the system
/// and on the [`TrimPolicy`] of the pool.
///
/// The pool is cheap to clone. Clones share the same cached buffers.
///
/// # Example
///
/// ```
/// use array_pool::{ArrayPool, ReturnPolicy, ShardedArrayPool};
///
/// let pool = ShardedArrayPool::<u8>::builder()
///     .max_buffer_length(1024)
///     .build()
///     .unwrap();
///
/// let buffer = pool.rent(100);
/// let address = buffer.as_ptr();
/// assert_eq!(buffer.len(), 128);
///
/// pool.return_buffer(buffer, ReturnPolicy::KeepContents).unwrap();
///
/// // The same thread gets the same buffer back from its private cache.
/// let buffer = pool.rent(100);
/// assert_eq!(buffer.as_ptr(), address);
/// ```
pub struct ShardedArrayPool<T> {
    core: Arc<PoolCore<T>>,
}

struct PoolCore<T> {
    bucket_count: usize,
    shard_count: NonZero<usize>,
    buffers_per_shard: NonZero<usize>,

    /// One slot per configured size class. A slot stays empty until the first buffer of
    /// its size class overflows from a thread cache.
    shard_sets: Box<[ArcSwapOption<ShardSet<T>>]>,

    thread_caches: ThreadCacheRegistry<T>,
    trim_policy: TrimPolicy,
    platform: PlatformFacade,
    shutting_down: AtomicBool,
}

/// How many buffers a [`ShardedArrayPool`] currently caches, by location.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct CachedBuffers {
    /// Buffers held in the private caches of live threads.
    pub thread_caches: usize,

    /// Buffers held in the shared shards.
    pub shards: usize,
}

impl CachedBuffers {
    /// All cached buffers, wherever they are.
    #[must_use]
    pub fn total(&self) -> usize {
        self.thread_caches.saturating_add(self.shards)
    }
}

impl<T> ShardedArrayPool<T>
where
    T: Default + Send + 'static,
{
    /// Creates a pool that caches buffers of up to
    /// [`MAX_BUFFER_LENGTH`][crate::MAX_BUFFER_LENGTH] elements, with default settings.
    ///
    /// Use [`builder()`][Self::builder] to customize the pool.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build_valid(
            DEFAULT_MAX_BUFFER_LENGTH,
            DEFAULT_BUFFERS_PER_SHARD,
            DEFAULT_MAX_SHARDS,
        )
    }

    /// Creates a builder for a customized pool.
    pub fn builder() -> ShardedArrayPoolBuilder<T> {
        ShardedArrayPoolBuilder::new()
    }

    /// Trims the cached buffers according to the current memory pressure of the system.
    ///
    /// Meant to be called periodically. Each call does a bounded amount of work: shards
    /// that are busy at the time of the call are skipped until the next call.
    ///
    /// Returns whether the caller should keep calling this periodically, which is the
    /// case until [`begin_shutdown()`][Self::begin_shutdown] has been called.
    pub fn trim(&self) -> bool {
        self.core.trim(self.core.platform.memory_pressure())
    }

    /// Trims the cached buffers as if the system reported the given memory pressure.
    ///
    /// Returns whether the caller should keep calling this periodically.
    pub fn trim_with_pressure(&self, pressure: MemoryPressure) -> bool {
        self.core.trim(pressure)
    }

    /// Starts a background thread that trims the pool every `interval`.
    ///
    /// The thread stops when the returned [`PeriodicTrimmer`] is dropped, when the pool
    /// begins shutting down or when every handle to the pool has been dropped. The trimmer
    /// does not keep the pool alive.
    pub fn start_periodic_trimming(&self, interval: Duration) -> PeriodicTrimmer {
        let core = Arc::downgrade(&self.core);

        PeriodicTrimmer::start(interval, move || {
            Weak::upgrade(&core).is_some_and(|core| core.trim(core.platform.memory_pressure()))
        })
    }

    #[cfg(test)]
    fn thread_cache_count(&self) -> usize {
        self.core.thread_caches.live_caches().len()
    }
}

impl<T> ShardedArrayPool<T> {
    /// Signals that the process is shutting down.
    ///
    /// Renting and returning keep working. Trimming stops: every later call to
    /// [`trim()`][Self::trim] does nothing and returns `false`.
    pub fn begin_shutdown(&self) {
        self.core.shutting_down.store(true, Ordering::Release);
    }

    /// Whether [`begin_shutdown()`][Self::begin_shutdown] has been called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.core.shutting_down.load(Ordering::Acquire)
    }

    /// Counts the buffers the pool currently caches.
    ///
    /// The count is a snapshot. Other threads may be renting and returning buffers while it is
    /// being taken.
    #[must_use]
    pub fn cached_buffers(&self) -> CachedBuffers {
        let thread_caches = self
            .core
            .thread_caches
            .live_caches()
            .iter()
            .map(|cache| cache.len())
            .sum();

        let shards = self
            .core
            .shard_sets
            .iter()
            .filter_map(|slot| slot.load_full())
            .map(|set| set.len())
            .sum();

        CachedBuffers {
            thread_caches,
            shards,
        }
    }

    /// Length of the buffers in the largest size class this pool caches.
    #[must_use]
    pub fn max_buffer_length(&self) -> usize {
        self.core.max_buffer_length()
    }
}

impl<T> PoolCore<T> {
    fn max_buffer_length(&self) -> usize {
        self.bucket_count
            .checked_sub(1)
            .and_then(SizeClass::from_index)
            .map_or(0, SizeClass::canonical_length)
    }
}

impl<T> PoolCore<T>
where
    T: Default + Send + 'static,
{
    /// Returns the shard set of the size class, creating and publishing it if it does
    /// not exist yet.
    fn shard_set(&self, class: SizeClass) -> Option<Arc<ShardSet<T>>> {
        let slot = self.shard_sets.get(class.index())?;

        let reader = slot.load();

        if let Some(ref set) = *reader {
            return Some(Arc::clone(set));
        }

        let candidate = Arc::new(ShardSet::new(self.shard_count, self.buffers_per_shard));
        let previous = slot.compare_and_swap(&reader, Some(Arc::clone(&candidate)));

        if let Some(ref winner) = *previous {
            // Another thread published first. Our candidate holds no buffers yet,
            // so it is simply discarded.
            trace!(
                size_class = class.index(),
                "lost race to publish shard set"
            );
            return Some(Arc::clone(winner));
        }

        Some(candidate)
    }

    fn trim(&self, pressure: MemoryPressure) -> bool {
        if self.shutting_down.load(Ordering::Acquire) {
            return false;
        }

        let now_millis = self.platform.now_millis();
        let element_size = mem::size_of::<T>();

        let mut shard_evictions = 0_usize;

        for (index, slot) in self.shard_sets.iter().enumerate() {
            let (Some(set), Some(class)) = (slot.load_full(), SizeClass::from_index(index)) else {
                continue;
            };

            let plan = self
                .trim_policy
                .shard_plan(pressure, class.canonical_length(), element_size);

            shard_evictions = shard_evictions.saturating_add(set.trim(now_millis, plan));
        }

        let idle_millis = self.trim_policy.thread_cache_idle_millis(pressure);
        let caches = self.thread_caches.live_caches();

        let cache_evictions = caches
            .iter()
            .map(|cache| cache.trim(now_millis, idle_millis))
            .fold(0_usize, usize::saturating_add);

        TRIM_EVICTED.with(|event| {
            event.observe(magnitude(shard_evictions.saturating_add(cache_evictions)));
        });

        debug!(
            ?pressure,
            shard_evictions,
            cache_evictions,
            thread_caches = caches.len(),
            "trimmed array pool"
        );

        true
    }
}

impl<T> Drop for PoolCore<T> {
    fn drop(&mut self) {
        // Threads may outlive the pool. Their caches must not keep our buffers alive.
        self.thread_caches.detach_all();
    }
}

impl<T> ArrayPool<T> for ShardedArrayPool<T>
where
    T: Default + Send + 'static,
{
    fn rent(&self, minimum_length: usize) -> Buffer<T> {
        let class = match classify_rent(minimum_length, self.core.bucket_count) {
            RentTarget::Empty => return Buffer::empty(),
            RentTarget::Unpooled(length) => return Buffer::new_default(length.get()),
            RentTarget::Pooled(class) => class,
        };

        if let Some(buffer) = self.core.thread_caches.take(class) {
            RENT_FROM_THREAD_CACHE.with(Event::observe_once);
            return buffer;
        }

        // No shard set yet means nothing of this size class ever overflowed into one.
        let shard_set = self
            .core
            .shard_sets
            .get(class.index())
            .and_then(|slot| slot.load_full());

        if let Some(buffer) = shard_set.and_then(|set| set.try_pop(current_thread_hash())) {
            RENT_FROM_SHARD.with(Event::observe_once);
            return buffer;
        }

        RENT_ALLOCATED.with(Event::observe_once);
        Buffer::new_default(class.canonical_length())
    }

    fn return_buffer(&self, buffer: Buffer<T>, policy: ReturnPolicy) -> Result<()> {
        let Some(class) = classify_return(&buffer, self.core.bucket_count)? else {
            return Ok(());
        };

        let mut buffer = buffer;

        if policy == ReturnPolicy::ClearContents {
            buffer.clear();
        }

        RETURN_POOLED.with(Event::observe_once);

        let Some(displaced) = self.core.thread_caches.swap_in(class, buffer) else {
            return Ok(());
        };

        let overflow = match self.core.shard_set(class) {
            Some(set) => set.try_push(displaced, current_thread_hash()).err(),
            None => Some(displaced),
        };

        if let Some(dropped) = overflow {
            RETURN_DROPPED_FULL.with(Event::observe_once);
            trace!(
                length = dropped.len(),
                "dropping buffer because every shard of its size class is full"
            );
        }

        Ok(())
    }
}

impl<T> Default for ShardedArrayPool<T>
where
    T: Default + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for ShardedArrayPool<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> fmt::Debug for ShardedArrayPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("max_buffer_length", &self.core.max_buffer_length())
            .field("shard_count", &self.core.shard_count)
            .field("buffers_per_shard", &self.core.buffers_per_shard)
            .field("trim_policy", &self.core.trim_policy)
            .field("is_shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}

/// Builder for a customized [`ShardedArrayPool`].
///
/// Created via [`ShardedArrayPool::builder()`].
#[must_use]
pub struct ShardedArrayPoolBuilder<T> {
    max_buffer_length: usize,
    buffers_per_shard: usize,
    max_shards: usize,
    trim_policy: TrimPolicy,
    platform: PlatformFacade,

    _element: PhantomData<fn() -> T>,
}

impl<T> ShardedArrayPoolBuilder<T>
where
    T: Default + Send + 'static,
{
    fn new() -> Self {
        Self {
            max_buffer_length: DEFAULT_MAX_BUFFER_LENGTH.get(),
            buffers_per_shard: DEFAULT_BUFFERS_PER_SHARD.get(),
            max_shards: DEFAULT_MAX_SHARDS.get(),
            trim_policy: TrimPolicy::default(),
            platform: PlatformFacade::real(),
            _element: PhantomData,
        }
    }

    /// Length of the buffers in the largest size class the pool caches.
    ///
    /// Rounded up to a size class and clamped to
    /// [`MIN_BUFFER_LENGTH`][crate::MIN_BUFFER_LENGTH]..=[`MAX_BUFFER_LENGTH`][crate::MAX_BUFFER_LENGTH].
    /// Longer rent requests are served with exactly-sized buffers that are never cached.
    /// Default [`MAX_BUFFER_LENGTH`][crate::MAX_BUFFER_LENGTH].
    pub fn max_buffer_length(mut self, value: usize) -> Self {
        self.max_buffer_length = value;
        self
    }

    /// How many buffers each shard caches. Default 8.
    pub fn buffers_per_shard(mut self, value: usize) -> Self {
        self.buffers_per_shard = value;
        self
    }

    /// Upper limit for the number of shards per size class.
    ///
    /// The pool uses one shard per processor available to the process, up to this limit.
    /// Default 64.
    pub fn max_shards(mut self, value: usize) -> Self {
        self.max_shards = value;
        self
    }

    /// Tuning of the trimming behavior.
    pub fn trim_policy(mut self, value: TrimPolicy) -> Self {
        self.trim_policy = value;
        self
    }

    #[cfg(test)]
    pub(crate) fn platform(mut self, value: PlatformFacade) -> Self {
        self.platform = value;
        self
    }

    /// Builds the pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`][crate::Error::InvalidConfiguration] if any of the
    /// numeric settings is zero.
    pub fn build(self) -> Result<ShardedArrayPool<T>> {
        let max_buffer_length = require_positive("max_buffer_length", self.max_buffer_length)?;
        let buffers_per_shard = require_positive("buffers_per_shard", self.buffers_per_shard)?;
        let max_shards = require_positive("max_shards", self.max_shards)?;

        Ok(self.build_valid(max_buffer_length, buffers_per_shard, max_shards))
    }

    fn build_valid(
        self,
        max_buffer_length: NonZero<usize>,
        buffers_per_shard: NonZero<usize>,
        max_shards: NonZero<usize>,
    ) -> ShardedArrayPool<T> {
        let bucket_count = bucket_count_for(max_buffer_length);
        let shard_count = self.platform.processor_count().min(max_shards);

        let shard_sets = (0..bucket_count)
            .map(|_| ArcSwapOption::const_empty())
            .collect();

        debug!(
            bucket_count,
            shard_count = shard_count.get(),
            buffers_per_shard = buffers_per_shard.get(),
            "created sharded array pool"
        );

        ShardedArrayPool {
            core: Arc::new(PoolCore {
                bucket_count,
                shard_count,
                buffers_per_shard,
                shard_sets,
                thread_caches: ThreadCacheRegistry::new(bucket_count),
                trim_policy: self.trim_policy,
                platform: self.platform,
                shutting_down: AtomicBool::new(false),
            }),
        }
    }
}

impl<T> fmt::Debug for ShardedArrayPoolBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("max_buffer_length", &self.max_buffer_length)
            .field("buffers_per_shard", &self.buffers_per_shard)
            .field("max_shards", &self.max_shards)
            .field("trim_policy", &self.trim_policy)
            .finish_non_exhaustive()
    }
}
