use std::any::type_name;
use std::fmt;
use std::panic;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

/// A background thread that trims a pool at a fixed interval.
///
/// Created via [`ShardedArrayPool::start_periodic_trimming()`][crate::ShardedArrayPool::start_periodic_trimming].
/// The thread exits on its own once the pool begins shutting down or is dropped. Dropping the
/// `PeriodicTrimmer` stops the thread and waits for it to exit.
pub struct PeriodicTrimmer {
    stop: Arc<StopSignal>,
    thread: Option<JoinHandle<()>>,
}

#[derive(Debug, Default)]
struct StopSignal {
    requested: Mutex<bool>,
    changed: Condvar,
}

impl StopSignal {
    /// Waits up to `timeout` for a stop request, returning whether one was made.
    fn wait(&self, timeout: Duration) -> bool {
        let mut requested = self.requested.lock();

        self.changed
            .wait_while_for(&mut requested, |requested| !*requested, timeout);

        *requested
    }

    fn request(&self) {
        *self.requested.lock() = true;
        self.changed.notify_all();
    }
}

impl PeriodicTrimmer {
    /// Calls `trim` every `interval` on a background thread until it returns `false`.
    pub(crate) fn start<F>(interval: Duration, mut trim: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let stop = Arc::new(StopSignal::default());
        let thread_stop = Arc::clone(&stop);

        let thread = thread::Builder::new()
            .name("array_pool-trimmer".to_owned())
            .spawn(move || {
                debug!(?interval, "periodic trimmer started");

                while !thread_stop.wait(interval) {
                    if !trim() {
                        break;
                    }
                }

                debug!("periodic trimmer exiting");
            })
            .expect("failed to spawn trimmer thread: thread spawning failure is not supported");

        Self {
            stop,
            thread: Some(thread),
        }
    }

    /// Whether the background thread has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for PeriodicTrimmer {
    fn drop(&mut self) {
        self.stop.request();

        let Some(thread) = self.thread.take() else {
            return;
        };

        if let Err(payload) = thread.join() {
            // The trim function panicked. Surface it instead of losing it with the thread,
            // unless we are already unwinding from another panic.
            if !thread::panicking() {
                panic::resume_unwind(payload);
            }
        }
    }
}

impl fmt::Debug for PeriodicTrimmer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("is_finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}
