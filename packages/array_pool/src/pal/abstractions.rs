//! Platform abstraction trait definitions.

use std::fmt::Debug;
use std::num::NonZero;

use crate::MemoryPressure;

/// Provides the environmental inputs the pools depend on.
pub(crate) trait Platform: Debug + Send + Sync + 'static {
    /// Milliseconds elapsed on a monotonic clock since some fixed origin.
    fn now_millis(&self) -> u64;

    /// How strongly the system is currently asking for memory to be released.
    fn memory_pressure(&self) -> MemoryPressure;

    /// Number of processors available to the current process.
    fn processor_count(&self) -> NonZero<usize>;
}
