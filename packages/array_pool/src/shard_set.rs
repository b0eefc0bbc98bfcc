use std::cell::Cell;
use std::hash::BuildHasher;
use std::iter;
use std::num::NonZero;
use std::thread;

use foldhash::fast::FixedState;

use crate::{Buffer, Shard, ShardTrimPlan};

thread_local! {
    /// Hash of the current thread's ID, computed on first use.
    static THREAD_HASH: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Returns a cheap, stable per-thread value used to pick a starting shard.
pub(crate) fn current_thread_hash() -> usize {
    THREAD_HASH.with(|cached| {
        if let Some(hash) = cached.get() {
            return hash;
        }

        #[expect(
            clippy::cast_possible_truncation,
            reason = "we only need some well-distributed bits, losing the high half is fine"
        )]
        let hash = FixedState::with_seed(0).hash_one(thread::current().id()) as usize;

        cached.set(Some(hash));
        hash
    })
}

/// The shards caching buffers of one size class, one per processor up to a limit.
///
/// Threads start probing at a shard derived from their thread hash and visit every shard
/// at most once, so contention spreads across shards and a cold starting shard does not
/// cause a false miss.
#[derive(Debug)]
pub(crate) struct ShardSet<T> {
    shards: Box<[Shard<T>]>,
}

impl<T> ShardSet<T> {
    pub(crate) fn new(shard_count: NonZero<usize>, buffers_per_shard: NonZero<usize>) -> Self {
        let shards = iter::repeat_with(|| Shard::new(buffers_per_shard))
            .take(shard_count.get())
            .collect();

        Self { shards }
    }

    /// Stores a buffer in the first shard with room, starting from the shard selected by
    /// `start`. Hands the buffer back if every shard is full.
    pub(crate) fn try_push(&self, buffer: Buffer<T>, start: usize) -> Result<(), Buffer<T>> {
        let mut buffer = buffer;

        for shard in self.probe_order(start) {
            match shard.try_push(buffer) {
                Ok(()) => return Ok(()),
                Err(rejected) => buffer = rejected,
            }
        }

        Err(buffer)
    }

    /// Takes a buffer from the first non-empty shard, starting from the shard selected
    /// by `start`.
    pub(crate) fn try_pop(&self, start: usize) -> Option<Buffer<T>> {
        self.probe_order(start).find_map(Shard::try_pop)
    }

    /// Trims every shard, returning the total number of evicted buffers.
    pub(crate) fn trim(&self, now_millis: u64, plan: ShardTrimPlan) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.trim(now_millis, plan))
            .sum()
    }

    /// Total number of buffers cached across all shards.
    pub(crate) fn len(&self) -> usize {
        self.shards.iter().map(Shard::len).sum()
    }

    #[cfg(test)]
    pub(crate) fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Visits every shard exactly once, wrapping around from the start index.
    fn probe_order(&self, start: usize) -> impl Iterator<Item = &Shard<T>> {
        // Shard count is never zero, guaranteed by the constructor.
        let start = start.checked_rem(self.shards.len()).unwrap_or_default();

        let (before, after) = self.shards.split_at(start);
        after.iter().chain(before.iter())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::Arc;

    use new_zealand::nz;
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(ShardSet<u8>: Send, Sync);

    #[test]
    fn thread_hash_is_stable_per_thread() {
        let first = current_thread_hash();
        let second = current_thread_hash();
        assert_eq!(first, second);
    }

    #[test]
    fn thread_hash_differs_between_threads() {
        let here = current_thread_hash();

        // Hash collisions are possible in principle but we check several threads,
        // so at least one of them must differ from ours.
        let others = (0..4)
            .map(|_| thread::spawn(current_thread_hash).join().unwrap())
            .collect::<Vec<_>>();

        assert!(others.iter().any(|&other| other != here));
    }

    #[test]
    fn creates_requested_shard_count() {
        let set = ShardSet::<u8>::new(nz!(5), nz!(8));
        assert_eq!(set.shard_count(), 5);
    }

    #[test]
    fn push_spills_into_next_shard() {
        let set = ShardSet::<u8>::new(nz!(3), nz!(1));

        set.try_push(Buffer::new_default(16), 1).unwrap();
        set.try_push(Buffer::new_default(16), 1).unwrap();
        set.try_push(Buffer::new_default(16), 1).unwrap();

        assert_eq!(set.len(), 3);

        let rejected = set.try_push(Buffer::new_default(16), 1).unwrap_err();
        assert_eq!(rejected.len(), 16);
    }

    #[test]
    fn pop_finds_buffers_in_other_shards() {
        let set = ShardSet::<u8>::new(nz!(4), nz!(8));

        let buffer = Buffer::<u8>::new_default(16);
        let ptr = buffer.as_ptr();
        set.try_push(buffer, 2).unwrap();

        // Starting from a different shard must still find it.
        assert_eq!(set.try_pop(3).unwrap().as_ptr(), ptr);
        assert!(set.try_pop(0).is_none());
    }

    #[test]
    fn start_index_wraps() {
        let set = ShardSet::<u8>::new(nz!(2), nz!(1));

        set.try_push(Buffer::new_default(16), usize::MAX).unwrap();
        set.try_push(Buffer::new_default(16), 7).unwrap();

        assert_eq!(set.len(), 2);
        assert!(set.try_pop(12_345).is_some());
        assert!(set.try_pop(0).is_some());
        assert!(set.try_pop(1).is_none());
    }

    #[test]
    fn trim_sums_evictions() {
        let set = ShardSet::<u8>::new(nz!(2), nz!(4));

        for start in 0..6 {
            set.try_push(Buffer::new_default(16), start).unwrap();
        }

        let plan = ShardTrimPlan {
            trim_after_millis: 0,
            evictions: 2,
        };

        assert_eq!(set.trim(0, plan), 0);
        assert_eq!(set.trim(1, plan), 4);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn concurrent_push_pop_never_duplicates() {
        testing::with_watchdog(|| {
            let set = Arc::new(ShardSet::<u8>::new(nz!(4), nz!(64)));

            for start in 0..64 {
                set.try_push(Buffer::new_default(16), start).unwrap();
            }

            let handles = (0..4)
                .map(|_| {
                    let set = Arc::clone(&set);
                    thread::spawn(move || {
                        let start = current_thread_hash();

                        for _ in 0..1_000 {
                            if let Some(buffer) = set.try_pop(start) {
                                set.try_push(buffer, start).unwrap();
                            }
                        }
                    })
                })
                .collect::<Vec<_>>();

            for handle in handles {
                handle.join().unwrap();
            }

            let buffers = iter::from_fn(|| set.try_pop(0)).collect::<Vec<_>>();
            let mut pointers = buffers
                .iter()
                .map(|buffer| buffer.as_ptr() as usize)
                .collect::<Vec<_>>();

            pointers.sort_unstable();
            pointers.dedup();
            assert_eq!(pointers.len(), 64);
        });
    }
}
