use std::any::type_name;
use std::fmt;
use std::iter;
use std::ops::{Deref, DerefMut};

/// A fixed-length buffer of `T` lent out by an array pool.
///
/// A buffer is owned by exactly one party at any instant: the caller that rented it, or the
/// pool that will hand it out again. Ownership moves to the caller on `rent()` and back to the
/// pool on `return_buffer()`, which consumes the buffer. The type is deliberately neither
/// `Clone` nor `Copy`, so the caller cannot keep using a buffer after giving it back.
///
/// The buffer dereferences to `[T]` for element access. Its length never changes.
///
/// # Example
///
/// ```
/// use array_pool::{ArrayPool, ReturnPolicy, ShardedArrayPool};
///
/// let pool = ShardedArrayPool::<u8>::new();
///
/// let mut buffer = pool.rent(100);
/// assert!(buffer.len() >= 100);
///
/// buffer[0] = 42;
///
/// pool.return_buffer(buffer, ReturnPolicy::KeepContents).unwrap();
/// ```
///
/// Buffers can also be created from existing allocations and donated to a pool, as long as
/// their length matches the canonical length of a size class:
///
/// ```
/// use array_pool::{ArrayPool, Buffer, ReturnPolicy, ShardedArrayPool};
///
/// let pool = ShardedArrayPool::<u8>::new();
///
/// let donated = Buffer::from(vec![0_u8; 256]);
/// pool.return_buffer(donated, ReturnPolicy::KeepContents).unwrap();
/// ```
pub struct Buffer<T> {
    items: Box<[T]>,
}

impl<T> Buffer<T> {
    /// Returns a zero-length buffer.
    ///
    /// Zero-length buffers do not own any memory, so every empty buffer is equivalent to every
    /// other and none of them is ever tracked by a pool.
    #[must_use]
    #[inline]
    pub fn empty() -> Self {
        Self {
            items: Box::default(),
        }
    }

    /// The number of elements in the buffer.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the buffer has zero elements.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Takes the elements out of the buffer, ending its association with any pool.
    #[must_use]
    #[inline]
    pub fn into_boxed_slice(self) -> Box<[T]> {
        self.items
    }

    /// Takes the elements out of the buffer as a `Vec`, ending its association with any pool.
    #[must_use]
    #[inline]
    pub fn into_vec(self) -> Vec<T> {
        self.items.into_vec()
    }
}

impl<T> Buffer<T>
where
    T: Default,
{
    /// Allocates a buffer of `length` default-valued elements.
    #[must_use]
    pub(crate) fn new_default(length: usize) -> Self {
        Self {
            items: iter::repeat_with(T::default).take(length).collect(),
        }
    }

    /// Overwrites every element with the default value of `T`.
    pub(crate) fn clear(&mut self) {
        self.items.fill_with(T::default);
    }
}

impl<T> Deref for Buffer<T> {
    type Target = [T];

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.items
    }
}

impl<T> DerefMut for Buffer<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.items
    }
}

impl<T> AsRef<[T]> for Buffer<T> {
    #[inline]
    fn as_ref(&self) -> &[T] {
        &self.items
    }
}

impl<T> AsMut<[T]> for Buffer<T> {
    #[inline]
    fn as_mut(&mut self) -> &mut [T] {
        &mut self.items
    }
}

impl<T> From<Vec<T>> for Buffer<T> {
    #[inline]
    fn from(value: Vec<T>) -> Self {
        Self {
            items: value.into_boxed_slice(),
        }
    }
}

impl<T> From<Box<[T]>> for Buffer<T> {
    #[inline]
    fn from(value: Box<[T]>) -> Self {
        Self { items: value }
    }
}

impl<T> fmt::Debug for Buffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("len", &self.items.len())
            .finish_non_exhaustive()
    }
}
