//! Example of renting scratch buffers from a sharded pool on a few worker threads,
//! trimming the pool and printing the metrics the pool has collected along the way.

use std::thread;

use array_pool::{ArrayPool, MemoryPressure, ReturnPolicy, ShardedArrayPool};
use nm::Report;

const WORKER_COUNT: usize = 4;
const MESSAGES_PER_WORKER: usize = 1000;

fn main() {
    let pool = ShardedArrayPool::<u8>::new();

    thread::scope(|scope| {
        for worker in 0..WORKER_COUNT {
            let pool = &pool;

            scope.spawn(move || {
                for message in 0..MESSAGES_PER_WORKER {
                    // Message sizes vary, so several size classes get exercised.
                    let length = 100 + (message % 7) * 300;

                    let mut buffer = pool.rent(length);
                    buffer[0] = u8::try_from(worker).unwrap_or(u8::MAX);

                    pool.return_buffer(buffer, ReturnPolicy::KeepContents)
                        .expect("the buffer came from this pool");
                }
            });
        }
    });

    println!("Cached after work: {:?}", pool.cached_buffers());

    // The worker threads have exited, so only the shards are left holding buffers. A first
    // trim pass only starts the shards aging, they give up buffers on later passes.
    pool.trim_with_pressure(MemoryPressure::High);

    println!("Cached after trim: {:?}", pool.cached_buffers());

    let report = Report::collect();
    println!("{report}");
}
