/// Determines what happens to the contents of a buffer when it is returned to a pool.
///
/// By default, contents are kept as-is and the next renter may observe them.
///
/// # Examples
///
/// ```
/// use array_pool::{ArrayPool, ReturnPolicy, ShardedArrayPool};
///
/// let pool = ShardedArrayPool::<u8>::new();
///
/// let mut buffer = pool.rent(16);
/// buffer.fill(0xAA);
///
/// // The next renter of this buffer will see only zeroes.
/// pool.return_buffer(buffer, ReturnPolicy::ClearContents).unwrap();
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum ReturnPolicy {
    /// The buffer re-enters the pool with whatever contents it holds. This is the default.
    #[default]
    KeepContents,

    /// Every element is overwritten with `T::default()` before the buffer re-enters the pool.
    ///
    /// Use this when the buffer held data that later renters must not observe.
    ClearContents,
}
