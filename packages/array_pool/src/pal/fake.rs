//! Fake platform implementation for testing.

use std::num::NonZero;
use std::sync::Arc;
use std::time::Duration;

use new_zealand::nz;
use parking_lot::Mutex;

use crate::MemoryPressure;
use crate::pal::abstractions::Platform;

/// Test platform whose clock and memory pressure only change when the test says so.
///
/// Clones share state, so a test can keep one clone and hand another to a pool.
#[derive(Clone, Debug)]
pub(crate) struct FakePlatform {
    state: Arc<Mutex<FakeState>>,
}

#[derive(Debug)]
struct FakeState {
    now_millis: u64,
    memory_pressure: MemoryPressure,
    processor_count: NonZero<usize>,
}

impl FakePlatform {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                now_millis: 0,
                memory_pressure: MemoryPressure::Low,
                processor_count: nz!(4),
            })),
        }
    }

    pub(crate) fn set_now_millis(&self, value: u64) {
        self.state.lock().now_millis = value;
    }

    pub(crate) fn advance(&self, duration: Duration) {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);

        let mut state = self.state.lock();
        state.now_millis = state.now_millis.saturating_add(millis);
    }

    pub(crate) fn set_memory_pressure(&self, value: MemoryPressure) {
        self.state.lock().memory_pressure = value;
    }

    pub(crate) fn set_processor_count(&self, value: NonZero<usize>) {
        self.state.lock().processor_count = value;
    }
}

impl Platform for FakePlatform {
    fn now_millis(&self) -> u64 {
        self.state.lock().now_millis
    }

    fn memory_pressure(&self) -> MemoryPressure {
        self.state.lock().memory_pressure
    }

    fn processor_count(&self) -> NonZero<usize> {
        self.state.lock().processor_count
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn starts_at_zero_with_low_pressure() {
        let platform = FakePlatform::new();

        assert_eq!(platform.now_millis(), 0);
        assert_eq!(platform.memory_pressure(), MemoryPressure::Low);
    }

    #[test]
    fn clones_share_state() {
        let platform = FakePlatform::new();
        let clone = platform.clone();

        platform.advance(Duration::from_secs(2));
        platform.set_memory_pressure(MemoryPressure::High);

        assert_eq!(clone.now_millis(), 2_000);
        assert_eq!(clone.memory_pressure(), MemoryPressure::High);
    }
}
