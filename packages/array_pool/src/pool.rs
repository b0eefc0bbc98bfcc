use std::any::type_name;
use std::fmt;
use std::mem;
use std::num::NonZero;
use std::ops::{Deref, DerefMut};

use nm::Event;
use tracing::{trace, warn};

use crate::metrics::{
    RENT_OVERSIZED, RENT_REQUESTED_LENGTH, RETURN_DROPPED_OVERSIZED, RETURN_REJECTED, magnitude,
};
use crate::{Buffer, Error, Result, ReturnPolicy, SizeClass, bucket_index};

/// Lends out reusable buffers of `T` and takes them back when the caller is done.
///
/// Renting never fails: when nothing suitable is cached, the pool allocates a fresh buffer.
/// The returned buffer is at least as long as requested and may be longer. It may also hold
/// whatever contents the previous renter left in it, unless that renter asked for the
/// contents to be cleared.
///
/// # Example
///
/// ```
/// use array_pool::{ArrayPool, ReturnPolicy, ShardedArrayPool};
///
/// let pool = ShardedArrayPool::<u8>::new();
///
/// let buffer = pool.rent(100);
/// assert_eq!(buffer.len(), 128);
///
/// pool.return_buffer(buffer, ReturnPolicy::KeepContents).unwrap();
/// ```
pub trait ArrayPool<T> {
    /// Rents a buffer that holds at least `minimum_length` elements.
    ///
    /// A `minimum_length` of zero yields an empty buffer that is not tracked by the pool.
    /// Lengths beyond the largest size class of the pool yield an exactly-sized buffer that
    /// is never cached.
    fn rent(&self, minimum_length: usize) -> Buffer<T>;

    /// Hands a buffer back to the pool.
    ///
    /// Empty buffers and buffers longer than the largest size class of the pool are accepted
    /// and simply dropped. The pool may also drop any other buffer if it already caches
    /// enough buffers of the same length.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BufferNotFromPool`] if the length of the buffer falls into one of the
    /// size classes of the pool but is not the canonical length of that size class. The pool
    /// is left unchanged in that case and the buffer is dropped.
    fn return_buffer(&self, buffer: Buffer<T>, policy: ReturnPolicy) -> Result<()>;

    /// Rents a buffer that is automatically returned to the pool when the guard is dropped.
    ///
    /// # Example
    ///
    /// ```
    /// use array_pool::{ArrayPool, BucketedArrayPool};
    ///
    /// let pool = BucketedArrayPool::<u32>::new();
    ///
    /// {
    ///     let mut scratch = pool.rent_scoped(20);
    ///     scratch.clear_on_return();
    ///     scratch[0] = 42;
    /// }
    ///
    /// // The same buffer comes back, cleared.
    /// let buffer = pool.rent(20);
    /// assert_eq!(buffer[0], 0);
    /// ```
    fn rent_scoped(&self, minimum_length: usize) -> Rented<'_, T, Self>
    where
        Self: Sized,
    {
        Rented::new(self, self.rent(minimum_length))
    }
}

/// A rented buffer that goes back to its pool when dropped.
///
/// Returned by [`ArrayPool::rent_scoped()`]. Dereferences to the elements of the buffer.
pub struct Rented<'p, T, P>
where
    P: ArrayPool<T> + ?Sized,
{
    pool: &'p P,
    buffer: Buffer<T>,
    policy: ReturnPolicy,
}

impl<'p, T, P> Rented<'p, T, P>
where
    P: ArrayPool<T> + ?Sized,
{
    fn new(pool: &'p P, buffer: Buffer<T>) -> Self {
        Self {
            pool,
            buffer,
            policy: ReturnPolicy::KeepContents,
        }
    }

    /// Requests that the contents of the buffer be cleared when it goes back to the pool.
    pub fn clear_on_return(&mut self) {
        self.policy = ReturnPolicy::ClearContents;
    }

    /// The policy that will be applied when the buffer goes back to the pool.
    #[must_use]
    pub fn return_policy(&self) -> ReturnPolicy {
        self.policy
    }

    /// Detaches the buffer from the guard, so it is no longer returned automatically.
    ///
    /// The caller may still return it manually via [`ArrayPool::return_buffer()`].
    #[must_use]
    pub fn into_buffer(mut self) -> Buffer<T> {
        // The guard is left holding an empty buffer, which is a no-op to return.
        mem::replace(&mut self.buffer, Buffer::empty())
    }
}

impl<T, P> Deref for Rented<'_, T, P>
where
    P: ArrayPool<T> + ?Sized,
{
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl<T, P> DerefMut for Rented<'_, T, P>
where
    P: ArrayPool<T> + ?Sized,
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buffer
    }
}

impl<T, P> Drop for Rented<'_, T, P>
where
    P: ArrayPool<T> + ?Sized,
{
    fn drop(&mut self) {
        if self.buffer.is_empty() {
            return;
        }

        let buffer = mem::replace(&mut self.buffer, Buffer::empty());

        // Only reachable if a pool hands out buffers it would not take back.
        if let Err(error) = self.pool.return_buffer(buffer, self.policy) {
            warn!(%error, "rented buffer was refused by its own pool");
        }
    }
}

impl<T, P> fmt::Debug for Rented<'_, T, P>
where
    P: ArrayPool<T> + ?Sized,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("len", &self.buffer.len())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Where a rent request of a given length is served from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum RentTarget {
    /// Zero elements requested, the caller gets an untracked empty buffer.
    Empty,

    /// Too long for any configured size class, the caller gets an exactly-sized buffer.
    Unpooled(NonZero<usize>),

    /// Served from the given size class.
    Pooled(SizeClass),
}

/// Decides how a pool with `bucket_count` size classes serves a rent request.
pub(crate) fn classify_rent(minimum_length: usize, bucket_count: usize) -> RentTarget {
    RENT_REQUESTED_LENGTH.with(|event| event.observe(magnitude(minimum_length)));

    let Some(length) = NonZero::new(minimum_length) else {
        return RentTarget::Empty;
    };

    match SizeClass::for_length(length).filter(|class| class.index() < bucket_count) {
        Some(class) => RentTarget::Pooled(class),
        None => {
            RENT_OVERSIZED.with(Event::observe_once);
            RentTarget::Unpooled(length)
        }
    }
}

/// Validates a returned buffer against a pool with `bucket_count` size classes.
///
/// Returns the size class the buffer belongs to, or `None` if the buffer is not to be pooled
/// because it is empty or longer than any configured size class.
pub(crate) fn classify_return<T>(
    buffer: &Buffer<T>,
    bucket_count: usize,
) -> Result<Option<SizeClass>> {
    let Some(length) = NonZero::new(buffer.len()) else {
        return Ok(None);
    };

    let index = bucket_index(length);

    let Some(class) = SizeClass::from_index(index).filter(|_| index < bucket_count) else {
        RETURN_DROPPED_OVERSIZED.with(Event::observe_once);
        trace!(
            length = length.get(),
            "dropping returned buffer longer than any pooled size class"
        );
        return Ok(None);
    };

    if length.get() != class.canonical_length() {
        RETURN_REJECTED.with(Event::observe_once);

        return Err(Error::BufferNotFromPool {
            length: length.get(),
            expected_length: class.canonical_length(),
        });
    }

    Ok(Some(class))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::cell::RefCell;

    use super::*;

    /// Remembers what was returned to it, for observing guard behavior.
    #[derive(Debug, Default)]
    struct RecordingPool {
        returned: RefCell<Vec<(usize, ReturnPolicy)>>,
    }

    impl ArrayPool<u8> for RecordingPool {
        fn rent(&self, minimum_length: usize) -> Buffer<u8> {
            Buffer::new_default(minimum_length)
        }

        fn return_buffer(&self, buffer: Buffer<u8>, policy: ReturnPolicy) -> Result<()> {
            self.returned.borrow_mut().push((buffer.len(), policy));
            Ok(())
        }
    }

    #[test]
    fn rented_returns_on_drop() {
        let pool = RecordingPool::default();

        {
            let mut rented = pool.rent_scoped(32);
            rented[0] = 1;
            assert_eq!(rented.len(), 32);
        }

        assert_eq!(
            *pool.returned.borrow(),
            vec![(32, ReturnPolicy::KeepContents)]
        );
    }

    #[test]
    fn rented_carries_clear_policy() {
        let pool = RecordingPool::default();

        {
            let mut rented = pool.rent_scoped(16);
            rented.clear_on_return();
            assert_eq!(rented.return_policy(), ReturnPolicy::ClearContents);
        }

        assert_eq!(
            *pool.returned.borrow(),
            vec![(16, ReturnPolicy::ClearContents)]
        );
    }

    #[test]
    fn into_buffer_detaches() {
        let pool = RecordingPool::default();

        let buffer = pool.rent_scoped(64).into_buffer();

        assert_eq!(buffer.len(), 64);
        assert!(pool.returned.borrow().is_empty());
    }

    #[test]
    fn empty_rented_is_not_returned() {
        let pool = RecordingPool::default();

        drop(pool.rent_scoped(0));

        assert!(pool.returned.borrow().is_empty());
    }

    #[test]
    fn classify_rent_paths() {
        assert_eq!(classify_rent(0, 7), RentTarget::Empty);
        assert_eq!(
            classify_rent(100, 7),
            RentTarget::Pooled(SizeClass::from_index(3).unwrap())
        );
        assert_eq!(
            classify_rent(1024, 7),
            RentTarget::Pooled(SizeClass::from_index(6).unwrap())
        );
        assert_eq!(
            classify_rent(1025, 7),
            RentTarget::Unpooled(NonZero::new(1025).unwrap())
        );
        assert_eq!(
            classify_rent(usize::MAX, 27),
            RentTarget::Unpooled(NonZero::new(usize::MAX).unwrap())
        );
    }

    #[test]
    fn classify_return_accepts_canonical_lengths() {
        let buffer = Buffer::<u8>::new_default(128);

        assert_eq!(
            classify_return(&buffer, 7).unwrap(),
            SizeClass::from_index(3)
        );
    }

    #[test]
    fn classify_return_ignores_empty_and_oversized() {
        assert_eq!(classify_return(&Buffer::<u8>::empty(), 7).unwrap(), None);
        assert_eq!(
            classify_return(&Buffer::<u8>::new_default(2048), 7).unwrap(),
            None
        );
        assert_eq!(
            classify_return(&Buffer::<u8>::new_default(1500), 7).unwrap(),
            None
        );
    }

    #[test]
    fn classify_return_rejects_non_canonical_lengths() {
        let error = classify_return(&Buffer::<u8>::new_default(100), 7).unwrap_err();

        assert!(matches!(
            error,
            Error::BufferNotFromPool {
                length: 100,
                expected_length: 128
            }
        ));

        assert!(classify_return(&Buffer::<u8>::new_default(5), 7).is_err());
    }
}
