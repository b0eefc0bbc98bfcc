//! Platform facade for switching between real and fake implementations.

use std::num::NonZero;

use crate::MemoryPressure;
use crate::pal::abstractions::Platform;
#[cfg(test)]
use crate::pal::fake::FakePlatform;
use crate::pal::real::RealPlatform;

#[derive(Debug, Clone)]
pub(crate) enum PlatformFacade {
    Real(RealPlatform),

    #[cfg(test)]
    Fake(FakePlatform),
}

impl PlatformFacade {
    pub(crate) fn real() -> Self {
        Self::Real(RealPlatform)
    }

    #[cfg(test)]
    pub(crate) fn fake(fake_platform: FakePlatform) -> Self {
        Self::Fake(fake_platform)
    }
}

impl Platform for PlatformFacade {
    fn now_millis(&self) -> u64 {
        match self {
            Self::Real(platform) => platform.now_millis(),
            #[cfg(test)]
            Self::Fake(platform) => platform.now_millis(),
        }
    }

    fn memory_pressure(&self) -> MemoryPressure {
        match self {
            Self::Real(platform) => platform.memory_pressure(),
            #[cfg(test)]
            Self::Fake(platform) => platform.memory_pressure(),
        }
    }

    fn processor_count(&self) -> NonZero<usize> {
        match self {
            Self::Real(platform) => platform.processor_count(),
            #[cfg(test)]
            Self::Fake(platform) => platform.processor_count(),
        }
    }
}
