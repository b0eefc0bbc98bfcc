use std::num::NonZero;

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::{Buffer, ShardTrimPlan};

/// Evictions beyond this many in one pass spill the eviction batch onto the heap.
const INLINE_EVICTIONS: usize = 12;

/// A bounded stack of cached buffers belonging to one size class.
///
/// The shard is a cache, not a queue: once it holds `capacity` buffers, further pushes are
/// refused and the caller drops the buffer. The lock is only ever held for O(1) bookkeeping.
#[derive(Debug)]
pub(crate) struct Shard<T> {
    capacity: usize,
    state: Mutex<ShardState<T>>,
}

#[derive(Debug)]
struct ShardState<T> {
    buffers: Vec<Buffer<T>>,

    /// When a trim pass first saw this shard holding buffers, advanced after each partial
    /// eviction. `None` while the shard is empty or has not been seen by a trim pass since
    /// it last became non-empty.
    aging_since_millis: Option<u64>,
}

impl<T> Shard<T> {
    pub(crate) fn new(capacity: NonZero<usize>) -> Self {
        Self {
            capacity: capacity.get(),
            state: Mutex::new(ShardState {
                buffers: Vec::with_capacity(capacity.get()),
                aging_since_millis: None,
            }),
        }
    }

    /// Stores a buffer, handing it back if the shard is already full.
    pub(crate) fn try_push(&self, buffer: Buffer<T>) -> Result<(), Buffer<T>> {
        let mut state = self.state.lock();

        if state.buffers.len() >= self.capacity {
            return Err(buffer);
        }

        if state.buffers.is_empty() {
            state.aging_since_millis = None;
        }

        state.buffers.push(buffer);
        Ok(())
    }

    /// Takes the most recently stored buffer, if any.
    pub(crate) fn try_pop(&self) -> Option<Buffer<T>> {
        self.state.lock().buffers.pop()
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().buffers.len()
    }

    /// Evicts aged buffers according to the plan, returning how many were evicted.
    ///
    /// If another thread holds the lock, the shard is skipped until the next pass.
    pub(crate) fn trim(&self, now_millis: u64, plan: ShardTrimPlan) -> usize {
        let evicted: SmallVec<[Buffer<T>; INLINE_EVICTIONS]> = {
            let Some(mut state) = self.state.try_lock() else {
                return 0;
            };

            if state.buffers.is_empty() {
                return 0;
            }

            let Some(aging_since) = state.aging_since_millis else {
                state.aging_since_millis = Some(now_millis);
                return 0;
            };

            if now_millis.saturating_sub(aging_since) <= plan.trim_after_millis {
                return 0;
            }

            let keep = state.buffers.len().saturating_sub(plan.evictions);
            let evicted = state.buffers.drain(keep..).collect();

            state.aging_since_millis = if state.buffers.is_empty() {
                None
            } else {
                Some(aging_since.saturating_add(plan.trim_after_millis / 4))
            };

            evicted
        };

        // The evicted buffers are released here, after the lock has been dropped.
        evicted.len()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use new_zealand::nz;
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Shard<u8>: Send, Sync);

    fn plan(trim_after_millis: u64, evictions: usize) -> ShardTrimPlan {
        ShardTrimPlan {
            trim_after_millis,
            evictions,
        }
    }

    fn fill(shard: &Shard<u8>, count: usize) {
        for _ in 0..count {
            shard.try_push(Buffer::new_default(16)).unwrap();
        }
    }

    #[test]
    fn push_refuses_when_full() {
        let shard = Shard::<u8>::new(nz!(2));

        fill(&shard, 2);

        let rejected = shard.try_push(Buffer::new_default(16)).unwrap_err();
        assert_eq!(rejected.len(), 16);
        assert_eq!(shard.len(), 2);
    }

    #[test]
    fn pop_is_lifo() {
        let shard = Shard::<u8>::new(nz!(4));

        let first = Buffer::<u8>::new_default(16);
        let second = Buffer::<u8>::new_default(16);
        let first_ptr = first.as_ptr();
        let second_ptr = second.as_ptr();

        shard.try_push(first).unwrap();
        shard.try_push(second).unwrap();

        assert_eq!(shard.try_pop().unwrap().as_ptr(), second_ptr);
        assert_eq!(shard.try_pop().unwrap().as_ptr(), first_ptr);
        assert!(shard.try_pop().is_none());
    }

    #[test]
    fn first_trim_only_stamps() {
        let shard = Shard::<u8>::new(nz!(8));
        fill(&shard, 4);

        assert_eq!(shard.trim(1_000, plan(10, 8)), 0);
        assert_eq!(shard.len(), 4);
    }

    #[test]
    fn trim_waits_for_threshold() {
        let shard = Shard::<u8>::new(nz!(8));
        fill(&shard, 4);

        shard.trim(1_000, plan(10_000, 8));

        // Exactly at the threshold is not yet past it.
        assert_eq!(shard.trim(11_000, plan(10_000, 8)), 0);
        assert_eq!(shard.trim(11_001, plan(10_000, 8)), 4);
        assert_eq!(shard.len(), 0);
    }

    #[test]
    fn partial_eviction_rebases_stamp() {
        let shard = Shard::<u8>::new(nz!(8));
        fill(&shard, 5);

        shard.trim(0, plan(60_000, 2));
        assert_eq!(shard.trim(60_001, plan(60_000, 2)), 2);
        assert_eq!(shard.len(), 3);

        // The stamp moved forward by a quarter of the threshold (to 15_000), so the shard
        // is eligible again once 75_000 has passed.
        assert_eq!(shard.trim(75_000, plan(60_000, 2)), 0);
        assert_eq!(shard.trim(75_001, plan(60_000, 2)), 2);
        assert_eq!(shard.len(), 1);
    }

    #[test]
    fn push_into_empty_shard_restarts_aging() {
        let shard = Shard::<u8>::new(nz!(8));
        fill(&shard, 1);

        shard.trim(0, plan(100, 8));
        assert_eq!(shard.trim(200, plan(100, 8)), 1);

        fill(&shard, 1);

        // Newly non-empty shard must be observed again before anything is evicted.
        assert_eq!(shard.trim(10_000, plan(100, 8)), 0);
        assert_eq!(shard.trim(10_101, plan(100, 8)), 1);
    }

    #[test]
    fn trim_of_empty_shard_does_nothing() {
        let shard = Shard::<u8>::new(nz!(8));

        assert_eq!(shard.trim(0, plan(0, 8)), 0);
        assert_eq!(shard.trim(1_000_000, plan(0, 8)), 0);
    }

    #[test]
    fn zero_evictions_keep_everything() {
        let shard = Shard::<u8>::new(nz!(8));
        fill(&shard, 3);

        shard.trim(0, plan(0, 0));
        assert_eq!(shard.trim(1, plan(0, 0)), 0);
        assert_eq!(shard.len(), 3);
    }

    #[test]
    fn contended_shard_is_deferred() {
        let shard = Shard::<u8>::new(nz!(8));
        fill(&shard, 3);
        shard.trim(0, plan(0, 8));

        {
            let _held = shard.state.lock();
            assert_eq!(shard.trim(1_000, plan(0, 8)), 0);
        }

        assert_eq!(shard.trim(1_000, plan(0, 8)), 3);
    }
}
