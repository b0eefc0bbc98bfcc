use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::iter;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use foldhash::fast::RandomState;
use parking_lot::Mutex;

use crate::{Buffer, SizeClass};

/// Global counter for generating unique pool IDs, used to key per-thread caches.
static POOL_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// The current thread's caches, one per pool the thread has returned buffers to.
    ///
    /// This map holds the only strong references to the caches. When the thread exits, the
    /// map is dropped and the pools' registries are left holding dead weak references.
    static THREAD_CACHES: RefCell<HashMap<u64, Arc<dyn ErasedThreadCache>, RandomState>> =
        RefCell::new(HashMap::default());
}

/// Lets the per-thread map hold caches of different element types side by side.
trait ErasedThreadCache: Any + Send + Sync {
    fn is_detached(&self) -> bool;

    fn as_any(&self) -> &dyn Any;
}

/// One worker thread's private cache for one pool: at most one buffer per size class.
///
/// The owning thread is the only party that puts buffers in. The trimmer may take buffers
/// out from another thread, which is why every slot sits behind its own (almost always
/// uncontended) lock.
#[derive(Debug)]
pub(crate) struct ThreadCache<T> {
    slots: Box<[Mutex<CacheSlot<T>>]>,

    /// Set when the owning pool is dropped. Detached caches are pruned from the
    /// per-thread map the next time the thread registers with a pool.
    detached: AtomicBool,
}

#[derive(Debug)]
struct CacheSlot<T> {
    buffer: Option<Buffer<T>>,

    /// When a trim pass first saw the current buffer sitting in the slot.
    idle_since_millis: Option<u64>,
}

impl<T> ThreadCache<T> {
    fn new(bucket_count: usize) -> Self {
        let slots = iter::repeat_with(|| {
            Mutex::new(CacheSlot {
                buffer: None,
                idle_since_millis: None,
            })
        })
        .take(bucket_count)
        .collect();

        Self {
            slots,
            detached: AtomicBool::new(false),
        }
    }

    /// Takes the cached buffer of the size class, if there is one.
    pub(crate) fn take(&self, class: SizeClass) -> Option<Buffer<T>> {
        self.slots.get(class.index())?.lock().buffer.take()
    }

    /// Caches a buffer, returning the buffer it displaced from the slot.
    ///
    /// A size class this cache has no slot for hands the buffer straight back.
    pub(crate) fn swap_in(&self, class: SizeClass, buffer: Buffer<T>) -> Option<Buffer<T>> {
        let Some(slot) = self.slots.get(class.index()) else {
            return Some(buffer);
        };

        let mut slot = slot.lock();
        slot.idle_since_millis = None;
        slot.buffer.replace(buffer)
    }

    /// Evicts idle buffers, returning how many were evicted.
    ///
    /// With `idle_millis` of `None`, every cached buffer is evicted. Otherwise an occupied slot
    /// is stamped on its first observation and evicted once it has been idle for at least
    /// `idle_millis`.
    pub(crate) fn trim(&self, now_millis: u64, idle_millis: Option<u64>) -> usize {
        let mut evicted = 0_usize;

        for slot in &self.slots {
            let buffer = {
                let mut slot = slot.lock();

                if slot.buffer.is_none() {
                    continue;
                }

                match (idle_millis, slot.idle_since_millis) {
                    (None, _) => slot.buffer.take(),
                    (Some(_), None) => {
                        slot.idle_since_millis = Some(now_millis);
                        None
                    }
                    (Some(idle_millis), Some(idle_since)) => {
                        if now_millis.saturating_sub(idle_since) >= idle_millis {
                            slot.idle_since_millis = None;
                            slot.buffer.take()
                        } else {
                            None
                        }
                    }
                }
            };

            if buffer.is_some() {
                evicted = evicted.saturating_add(1);
            }

            // The evicted buffer is released here, after the slot lock has been dropped.
        }

        evicted
    }

    /// Number of size classes that currently hold a buffer.
    pub(crate) fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.lock().buffer.is_some())
            .count()
    }

    fn detach(&self) {
        self.detached.store(true, Ordering::Release);
    }
}

impl<T> ErasedThreadCache for ThreadCache<T>
where
    T: Send + 'static,
{
    fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Tracks the per-thread caches of one pool so trimming can visit all of them.
///
/// The registry only holds weak references. A thread that exits takes its caches with it and
/// the dead entries are pruned the next time the registry is enumerated or another thread
/// registers.
#[derive(Debug)]
pub(crate) struct ThreadCacheRegistry<T> {
    pool_id: u64,
    bucket_count: usize,
    caches: Mutex<Vec<Weak<ThreadCache<T>>>>,
}

impl<T> ThreadCacheRegistry<T> {
    pub(crate) fn new(bucket_count: usize) -> Self {
        Self {
            pool_id: POOL_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            bucket_count,
            caches: Mutex::new(Vec::new()),
        }
    }

    /// Returns every cache whose thread is still alive, pruning dead entries.
    pub(crate) fn live_caches(&self) -> Vec<Arc<ThreadCache<T>>> {
        let mut caches = self.caches.lock();
        caches.retain(|cache| cache.strong_count() > 0);
        caches.iter().filter_map(Weak::upgrade).collect()
    }

    /// Evicts the contents of every live cache and marks them as belonging to a dropped pool.
    pub(crate) fn detach_all(&self) {
        for cache in self.live_caches() {
            cache.trim(0, None);
            cache.detach();
        }
    }
}

impl<T> ThreadCacheRegistry<T>
where
    T: Send + 'static,
{
    /// Takes the current thread's cached buffer of the size class, if there is one.
    ///
    /// Never creates a cache: threads that have not returned anything have nothing cached.
    pub(crate) fn take(&self, class: SizeClass) -> Option<Buffer<T>> {
        THREAD_CACHES
            .try_with(|caches| {
                let caches = caches.borrow();
                self.lookup(&caches)?.take(class)
            })
            .ok()
            .flatten()
    }

    /// Caches a buffer in the current thread's cache, creating and registering the cache
    /// on first use. Returns the buffer that needs to go elsewhere: either the displaced
    /// previous occupant of the slot or, if the thread is shutting down and its caches are
    /// already gone, the buffer itself.
    pub(crate) fn swap_in(&self, class: SizeClass, buffer: Buffer<T>) -> Option<Buffer<T>> {
        let mut buffer = Some(buffer);

        let displaced = THREAD_CACHES.try_with(|caches| {
            let buffer = buffer.take()?;

            {
                let existing = caches.borrow();

                if let Some(cache) = self.lookup(&existing) {
                    return cache.swap_in(class, buffer);
                }
            }

            let cache = self.register_current_thread();
            let displaced = cache.swap_in(class, buffer);

            let mut caches = caches.borrow_mut();
            caches.retain(|_, cache| !cache.is_detached());
            caches.insert(self.pool_id, cache);

            displaced
        });

        match displaced {
            Ok(displaced) => displaced,
            Err(_) => buffer,
        }
    }

    fn lookup<'a>(
        &self,
        caches: &'a HashMap<u64, Arc<dyn ErasedThreadCache>, RandomState>,
    ) -> Option<&'a ThreadCache<T>> {
        caches
            .get(&self.pool_id)?
            .as_any()
            .downcast_ref::<ThreadCache<T>>()
    }

    fn register_current_thread(&self) -> Arc<ThreadCache<T>> {
        let cache = Arc::new(ThreadCache::new(self.bucket_count));

        // Pools that are never trimmed still see thread churn, so entries of exited threads
        // are also dropped here.
        let mut caches = self.caches.lock();
        caches.retain(|entry| entry.strong_count() > 0);
        caches.push(Arc::downgrade(&cache));

        cache
    }
}
