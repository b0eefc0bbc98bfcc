use std::sync::LazyLock;
use std::time::Duration;

use crate::{PeriodicTrimmer, ShardedArrayPool};

/// How often the shared byte pool trims itself.
const SHARED_TRIM_INTERVAL: Duration = Duration::from_secs(10);

struct SharedBytePool {
    pool: ShardedArrayPool<u8>,

    // Never dropped, the trimmer runs for the lifetime of the process.
    _trimmer: PeriodicTrimmer,
}

static SHARED_BYTE_POOL: LazyLock<SharedBytePool> = LazyLock::new(|| {
    let pool = ShardedArrayPool::new();
    let trimmer = pool.start_periodic_trimming(SHARED_TRIM_INTERVAL);

    SharedBytePool {
        pool,
        _trimmer: trimmer,
    }
});

/// A process-wide pool of byte buffers.
///
/// Created with default settings on first use, together with a background thread that trims
/// the pool every 10 seconds. Use it when there is no natural owner for a dedicated pool.
///
/// # Example
///
/// ```
/// use array_pool::{ArrayPool, ReturnPolicy, shared_byte_pool};
///
/// let mut buffer = shared_byte_pool().rent(4096);
/// buffer[..5].copy_from_slice(b"hello");
///
/// shared_byte_pool()
///     .return_buffer(buffer, ReturnPolicy::ClearContents)
///     .unwrap();
/// ```
#[must_use]
pub fn shared_byte_pool() -> &'static ShardedArrayPool<u8> {
    &SHARED_BYTE_POOL.pool
}
