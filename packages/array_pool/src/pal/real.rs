//! Real platform implementation backed by the operating system.

use std::num::NonZero;
use std::sync::LazyLock;
use std::time::Instant;

use many_cpus::SystemHardware;
use new_zealand::nz;

use crate::MemoryPressure;
use crate::pal::abstractions::Platform;

/// Memory load (percent of physical memory in use) at or above which pressure is high.
const HIGH_PRESSURE_LOAD_PERCENT: u64 = 90;

/// Memory load (percent of physical memory in use) at or above which pressure is medium.
const MEDIUM_PRESSURE_LOAD_PERCENT: u64 = 70;

static CLOCK_ORIGIN: LazyLock<Instant> = LazyLock::new(Instant::now);

#[derive(Debug, Clone)]
pub(crate) struct RealPlatform;

impl Platform for RealPlatform {
    fn now_millis(&self) -> u64 {
        u64::try_from(CLOCK_ORIGIN.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    #[cfg_attr(test, mutants::skip)] // Depends on the state of the machine running the tests.
    fn memory_pressure(&self) -> MemoryPressure {
        current_memory_load_percent().map_or(MemoryPressure::Low, pressure_from_load)
    }

    #[cfg_attr(test, mutants::skip)] // Depends on the hardware running the tests.
    fn processor_count(&self) -> NonZero<usize> {
        // Only the processors the process may run on, within its resource quota.
        NonZero::new(SystemHardware::current().processors().len()).unwrap_or(nz!(1))
    }
}

fn pressure_from_load(load_percent: u64) -> MemoryPressure {
    if load_percent >= HIGH_PRESSURE_LOAD_PERCENT {
        MemoryPressure::High
    } else if load_percent >= MEDIUM_PRESSURE_LOAD_PERCENT {
        MemoryPressure::Medium
    } else {
        MemoryPressure::Low
    }
}

#[cfg(target_os = "linux")]
fn current_memory_load_percent() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    load_percent_from_meminfo(&meminfo)
}

// Without a cheap way to ask the system, we assume memory is plentiful.
#[cfg(not(target_os = "linux"))]
fn current_memory_load_percent() -> Option<u64> {
    None
}

/// Parses the contents of `/proc/meminfo` into a memory load percentage.
#[cfg_attr(not(target_os = "linux"), allow(dead_code, reason = "only used on Linux"))]
fn load_percent_from_meminfo(meminfo: &str) -> Option<u64> {
    let field = |name: &str| -> Option<u64> {
        meminfo.lines().find_map(|line| {
            let value = line.strip_prefix(name)?.strip_prefix(':')?;
            value.split_whitespace().next()?.parse().ok()
        })
    };

    let total = field("MemTotal")?;
    let available = field("MemAvailable")?;

    let used = total.saturating_sub(available);
    used.saturating_mul(100).checked_div(total)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    const MEMINFO: &str = "MemTotal:       16000000 kB
MemFree:         1000000 kB
MemAvailable:    4000000 kB
Buffers:          200000 kB
";

    #[test]
    fn parses_meminfo() {
        assert_eq!(load_percent_from_meminfo(MEMINFO), Some(75));
    }

    #[test]
    fn meminfo_without_available_is_unknown() {
        assert_eq!(
            load_percent_from_meminfo("MemTotal:       16000000 kB\n"),
            None
        );
    }

    #[test]
    fn zero_total_is_unknown() {
        assert_eq!(
            load_percent_from_meminfo("MemTotal: 0 kB\nMemAvailable: 0 kB\n"),
            None
        );
    }

    #[test]
    fn load_thresholds() {
        assert_eq!(pressure_from_load(0), MemoryPressure::Low);
        assert_eq!(pressure_from_load(69), MemoryPressure::Low);
        assert_eq!(pressure_from_load(70), MemoryPressure::Medium);
        assert_eq!(pressure_from_load(89), MemoryPressure::Medium);
        assert_eq!(pressure_from_load(90), MemoryPressure::High);
        assert_eq!(pressure_from_load(100), MemoryPressure::High);
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Miri cannot call the platform APIs used to inspect hardware.
    fn processor_count_matches_available_processors() {
        let expected = SystemHardware::current().processors().len();

        assert_eq!(RealPlatform.processor_count().get(), expected);
        assert!(expected <= SystemHardware::current().max_processor_count());
    }
}
