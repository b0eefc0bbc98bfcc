//! Platform abstraction layer for the clock, memory pressure and processor count.
//!
//! The pools only talk to the operating system through this module, so tests can substitute
//! a fake platform and drive trimming deterministically.

mod abstractions;
mod facade;
#[cfg(test)]
mod fake;
mod real;

pub(crate) use abstractions::Platform;
pub(crate) use facade::PlatformFacade;
#[cfg(test)]
pub(crate) use fake::FakePlatform;
