//! Helper arithmetic shared by the growth and mapping paths.

/// It aligns `to_be_aligned` up to the next multiple of `aligment`, which
/// must be a power of two. Returns `None` if the result does not fit in a
/// `usize`.
pub fn align(to_be_aligned: usize, aligment: usize) -> Option<usize> {
    debug_assert!(aligment.is_power_of_two());

    to_be_aligned
        .checked_add(aligment - 1)
        .map(|value| value & !(aligment - 1))
}

/// Smallest number of whole pages of `page_size` bytes that covers `len`.
pub fn pages_for(len: usize, page_size: usize) -> usize {
    len.div_ceil(page_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    #[test]
    fn align_pointer_size() {
        let aligments = vec![(1..8, 8), (9..16, 16), (17..24, 24), (25..32, 32)];

        for (sizes, expected) in aligments {
            for size in sizes {
                assert_eq!(Some(expected), align(size, mem::size_of::<u64>()));
            }
        }
    }

    #[test]
    fn align_page_size() {
        let aligments = vec![(1..4096, 4096), (4097..8192, 8192)];

        for (sizes, expected) in aligments {
            for size in sizes {
                assert_eq!(Some(expected), align(size, 4096))
            }
        }
    }

    #[test]
    fn align_overflow() {
        assert_eq!(None, align(usize::MAX, 4096));
    }

    #[test]
    fn whole_pages() {
        assert_eq!(1, pages_for(1, 4096));
        assert_eq!(1, pages_for(4096, 4096));
        assert_eq!(2, pages_for(4224, 4096));
        assert_eq!(3, pages_for(8193, 4096));
    }
}
