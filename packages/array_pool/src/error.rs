use std::num::NonZero;

use thiserror::Error;

/// Errors that can occur when configuring a pool or returning a buffer to it.
///
/// Running out of pooled buffers is never an error - a pool always falls back to allocating
/// a fresh buffer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A pool builder was given a setting value that cannot be used.
    #[error("invalid pool configuration: '{setting}' = {value} is invalid: {problem}")]
    InvalidConfiguration {
        /// Name of the builder setting that was rejected.
        setting: &'static str,

        /// The rejected value.
        value: usize,

        /// A human-readable description of the problem.
        problem: &'static str,
    },

    /// A buffer was returned whose length falls into one of the pool's size classes
    /// but does not match the canonical length of that size class, so it cannot have
    /// been rented from the pool.
    ///
    /// The pool is left unchanged when this error is returned.
    #[error(
        "buffer of length {length} was not rented from this pool: its size class holds buffers of length {expected_length}"
    )]
    BufferNotFromPool {
        /// Length of the returned buffer.
        length: usize,

        /// Canonical length of the size class the returned length falls into.
        expected_length: usize,
    },
}

/// A specialized `Result` type for pool operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;

/// Rejects a zero value for a builder setting that must be positive.
pub(crate) fn require_positive(setting: &'static str, value: usize) -> Result<NonZero<usize>> {
    NonZero::new(value).ok_or(Error::InvalidConfiguration {
        setting,
        value,
        problem: "must be greater than zero",
    })
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn invalid_configuration_names_setting() {
        let error = Error::InvalidConfiguration {
            setting: "max_buffers_per_bucket",
            value: 0,
            problem: "must be greater than zero",
        };

        let message = error.to_string();
        assert!(message.contains("max_buffers_per_bucket"));
        assert!(message.contains("must be greater than zero"));
    }

    #[test]
    fn buffer_not_from_pool_names_both_lengths() {
        let error = Error::BufferNotFromPool {
            length: 100,
            expected_length: 128,
        };

        let message = error.to_string();
        assert!(message.contains("100"));
        assert!(message.contains("128"));
    }

    #[test]
    fn require_positive_rejects_zero() {
        assert_eq!(require_positive("max_shards", 3).unwrap().get(), 3);

        let error = require_positive("max_shards", 0).unwrap_err();
        assert!(matches!(
            error,
            Error::InvalidConfiguration {
                setting: "max_shards",
                value: 0,
                ..
            }
        ));
    }
}
