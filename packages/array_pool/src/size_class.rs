use std::num::NonZero;

use new_zealand::nz;

/// Length of the buffers in the smallest size class.
///
/// Requests for fewer elements are rounded up to this length.
pub const MIN_BUFFER_LENGTH: usize = 16;

/// Length of the buffers in the largest size class any pool can be configured with.
///
/// Requests for more elements are served with exactly-sized buffers that are never pooled.
pub const MAX_BUFFER_LENGTH: usize = 1 << 30;

/// [`MIN_BUFFER_LENGTH`] as a non-zero value. `nz!` only accepts literals.
pub(crate) const MIN_BUFFER_LENGTH_NZ: NonZero<usize> = nz!(16);

/// [`MAX_BUFFER_LENGTH`] as a non-zero value. `nz!` only accepts literals.
pub(crate) const MAX_BUFFER_LENGTH_NZ: NonZero<usize> = nz!(1_073_741_824);

/// Number of size classes between [`MIN_BUFFER_LENGTH`] and [`MAX_BUFFER_LENGTH`], inclusive.
pub const BUCKET_COUNT: usize = 27;

/// A discrete buffer length tier. All pooled buffers in the same size class share
/// one canonical length, starting at [`MIN_BUFFER_LENGTH`] and doubling with every index.
///
/// # Example
///
/// ```
/// use std::num::NonZero;
///
/// use array_pool::SizeClass;
///
/// let class = SizeClass::for_length(NonZero::new(100).unwrap()).unwrap();
///
/// assert_eq!(class.index(), 3);
/// assert_eq!(class.canonical_length(), 128);
/// ```
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SizeClass {
    index: usize,
}

impl SizeClass {
    /// Returns the smallest size class whose canonical length is at least `length`.
    ///
    /// Returns `None` if `length` exceeds [`MAX_BUFFER_LENGTH`].
    #[must_use]
    #[inline]
    pub fn for_length(length: NonZero<usize>) -> Option<Self> {
        Self::from_index(bucket_index(length))
    }

    /// Returns the size class with the given index.
    ///
    /// Returns `None` if `index` is not less than [`BUCKET_COUNT`].
    #[must_use]
    #[inline]
    pub fn from_index(index: usize) -> Option<Self> {
        (index < BUCKET_COUNT).then_some(Self { index })
    }

    /// The zero-based index of the size class.
    #[must_use]
    #[inline]
    pub fn index(self) -> usize {
        self.index
    }

    /// The length of every pooled buffer in this size class.
    #[must_use]
    #[inline]
    pub fn canonical_length(self) -> usize {
        // Cannot overflow: index is below BUCKET_COUNT, so the result is at most 2^30.
        MIN_BUFFER_LENGTH << self.index
    }
}

/// Maps a length to the index of the smallest doubling tier that can hold it.
///
/// The result may be [`BUCKET_COUNT`] or greater for lengths above [`MAX_BUFFER_LENGTH`].
#[inline]
pub(crate) fn bucket_index(length: NonZero<usize>) -> usize {
    // Lengths 1..=16 all land in tier 0, so we fold the low bits away before taking the log.
    // The folded value is at least MIN_BUFFER_LENGTH - 1, so the subtraction cannot underflow.
    let rounded = length.get().wrapping_sub(1) | (MIN_BUFFER_LENGTH - 1);

    (rounded.ilog2() - (MIN_BUFFER_LENGTH - 1).ilog2()) as usize
}

/// Number of size classes a pool needs to serve buffers of up to `max_buffer_length` elements.
///
/// The length is clamped to `[MIN_BUFFER_LENGTH, MAX_BUFFER_LENGTH]` first.
pub(crate) fn bucket_count_for(max_buffer_length: NonZero<usize>) -> usize {
    let clamped = max_buffer_length.clamp(MIN_BUFFER_LENGTH_NZ, MAX_BUFFER_LENGTH_NZ);

    bucket_index(clamped).saturating_add(1)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn class_of(length: usize) -> Option<SizeClass> {
        SizeClass::for_length(NonZero::new(length).unwrap())
    }

    #[test]
    fn non_zero_bounds_match_plain_bounds() {
        assert_eq!(MIN_BUFFER_LENGTH_NZ.get(), MIN_BUFFER_LENGTH);
        assert_eq!(MAX_BUFFER_LENGTH_NZ.get(), MAX_BUFFER_LENGTH);
    }

    #[test]
    fn smallest_class_covers_one_through_sixteen() {
        for length in 1..=16 {
            assert_eq!(class_of(length).unwrap().index(), 0, "length {length}");
        }

        assert_eq!(class_of(17).unwrap().index(), 1);
    }

    #[test]
    fn canonical_length_doubles() {
        for index in 0..BUCKET_COUNT {
            let class = SizeClass::from_index(index).unwrap();
            assert_eq!(class.canonical_length(), 16 << index);
        }
    }

    #[test]
    fn largest_class_is_max_buffer_length() {
        let last = SizeClass::from_index(BUCKET_COUNT - 1).unwrap();
        assert_eq!(last.canonical_length(), MAX_BUFFER_LENGTH);

        assert_eq!(class_of(MAX_BUFFER_LENGTH), Some(last));
        assert_eq!(class_of(MAX_BUFFER_LENGTH + 1), None);
        assert_eq!(SizeClass::from_index(BUCKET_COUNT), None);
    }

    #[test]
    fn rounding_is_tight_and_monotonic() {
        let mut previous_index = 0;

        for length in 1..=70_000 {
            let class = class_of(length).unwrap();

            assert!(class.canonical_length() >= length);
            assert!(class.index() >= previous_index);

            if class.index() > 0 {
                let smaller = SizeClass::from_index(class.index() - 1).unwrap();
                assert!(smaller.canonical_length() < length, "length {length}");
            }

            previous_index = class.index();
        }
    }

    #[test]
    fn power_of_two_boundaries() {
        for shift in 4..30 {
            let exact = 1_usize << shift;

            assert_eq!(class_of(exact).unwrap().canonical_length(), exact);
            assert_eq!(class_of(exact + 1).unwrap().canonical_length(), exact * 2);
        }
    }

    #[test]
    fn example_from_documentation() {
        assert_eq!(class_of(100).unwrap().canonical_length(), 128);
    }

    #[test]
    fn huge_lengths_do_not_overflow() {
        assert!(bucket_index(NonZero::new(usize::MAX).unwrap()) >= BUCKET_COUNT);
    }

    #[test]
    fn bucket_count_clamps_configuration() {
        assert_eq!(bucket_count_for(nz!(1)), 1);
        assert_eq!(bucket_count_for(nz!(16)), 1);
        assert_eq!(bucket_count_for(nz!(17)), 2);
        assert_eq!(bucket_count_for(nz!(1024)), 7);
        assert_eq!(bucket_count_for(nz!(1000)), 7);
        assert_eq!(bucket_count_for(nz!(1_048_576)), 17);
        assert_eq!(bucket_count_for(NonZero::new(usize::MAX).unwrap()), BUCKET_COUNT);
    }
}
