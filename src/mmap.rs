//! Large requests, served by anonymous mappings.
//!
//! [`MemorySource::map_anonymous`] gives us memory in whole pages. We cannot
//! afford to waste the tail of the last page on every large request, and we
//! cannot assume mappings are adjacent to anything else. So when the tail is
//! big enough to hold another header plus at least one byte, the mapping is
//! split and the tail goes back into the chain as a free block:
//!
//! ```text
//!  mapping start                                           mapping end
//!  |                                                                 |
//!  +--------+-----------------------+--------+-----------------------+
//!  | header |     s bytes (used)    | header |  leftover (free)      |
//!  +--------+-----------------------+--------+-----------------------+
//!  ^ first block                    ^ second block
//! ```
//!
//! Otherwise the whole mapping is one block of exactly `s` usable bytes and
//! the tail is simply unused.

use log::trace;

use crate::{
    block::{BlockId, HEADER_SIZE, Origin},
    error::{AllocError, Strategy},
    kernel::MemorySource,
    list::Chain,
    utils::{align, pages_for},
};

/// Requests at least a page long (header included) never touch the break
/// region.
#[inline]
pub(crate) fn needs_mapping(size: usize, page_size: usize) -> bool {
    match size.checked_add(HEADER_SIZE) {
        Some(needed) => needed >= page_size,
        None => true,
    }
}

/// Smallest leftover worth turning into its own block.
pub(crate) const MIN_SPLIT: usize = HEADER_SIZE + 1;

/// Maps enough whole pages for `size + HEADER_SIZE` bytes and appends the
/// result to `chain`. Returns the in-use block.
pub(crate) fn allocate_mapped<S: MemorySource>(
    chain: &mut Chain,
    source: &S,
    size: usize,
    page_size: usize,
) -> Result<BlockId, AllocError> {
    let needed = size
        .checked_add(HEADER_SIZE)
        .ok_or(AllocError::RequestTooLarge { size })?;

    let region_size = align(needed, page_size).ok_or(AllocError::RequestTooLarge { size })?;

    let addr = unsafe { source.map_anonymous(region_size) }.map_err(|source| {
        AllocError::SourceExhausted {
            strategy: Strategy::Mapping,
            requested: region_size,
            source,
        }
    })?;

    trace!(
        "mapped {} pages ({region_size} bytes) at {addr:p}",
        pages_for(needed, page_size)
    );

    let leftover = region_size - needed;

    unsafe {
        // SAFETY: `[addr, addr + region_size)` is ours and `needed <= region_size`.
        let block = chain.append(addr, size, false, Origin::Mapped);

        if leftover >= MIN_SPLIT {
            // The second block starts right after the first one's payload.
            let split = addr.add(needed);
            chain.append(split, leftover - HEADER_SIZE, true, Origin::Mapped);
        }

        Ok(block)
    }
}
