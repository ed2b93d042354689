//! Growth of the break region.
//!
//! Small requests are served by moving the break exactly far enough to fit
//! one header and the payload. Nothing is rounded, so consecutive blocks
//! from this path sit back to back in address order.
//!
//! ```text
//!            old break                       new break
//!                |                               |
//! ... prev block | header |     s bytes          |
//!                +--------+----------------------+
//!                        ^
//!                        +-- payload handed out
//! ```

use log::trace;

use crate::{
    block::{BlockId, HEADER_SIZE, Origin},
    error::{AllocError, Strategy},
    kernel::MemorySource,
    list::Chain,
};

/// Grows the break region by `size + HEADER_SIZE` bytes and appends the new
/// region to `chain` as an in-use block of `size` bytes.
pub(crate) fn expand_heap<S: MemorySource>(
    chain: &mut Chain,
    source: &S,
    size: usize,
) -> Result<BlockId, AllocError> {
    let requested = size
        .checked_add(HEADER_SIZE)
        .ok_or(AllocError::RequestTooLarge { size })?;

    let addr = unsafe { source.grow_break(requested) }.map_err(|source| {
        AllocError::SourceExhausted {
            strategy: Strategy::Break,
            requested,
            source,
        }
    })?;

    trace!("break grown by {requested} bytes at {addr:p}");

    // SAFETY: the source handed us `requested` fresh bytes at `addr`.
    Ok(unsafe { chain.append(addr, size, false, Origin::Break) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedSource;

    #[test]
    fn consecutive_blocks_are_adjacent() {
        let source = SimulatedSource::default();
        let mut chain = Chain::new();

        let first = expand_heap(&mut chain, &source, 10).unwrap();
        let second = expand_heap(&mut chain, &source, 32).unwrap();

        let first = chain.get(first).unwrap();
        let second = chain.get(second).unwrap();

        assert_eq!(
            second.header.as_ptr() as usize,
            first.payload().as_ptr() as usize + 10
        );
        assert_eq!(source.break_used(), 10 + 32 + 2 * HEADER_SIZE);
        assert!(!first.free && !second.free);
        assert_eq!(first.origin, Origin::Break);
    }

    #[test]
    fn exhaustion_leaves_the_chain_untouched() {
        let source = SimulatedSource::new(4096, HEADER_SIZE + 8, 0);
        let mut chain = Chain::new();

        expand_heap(&mut chain, &source, 8).unwrap();
        let err = expand_heap(&mut chain, &source, 1).unwrap_err();

        assert!(matches!(
            err,
            AllocError::SourceExhausted {
                strategy: Strategy::Break,
                requested,
                ..
            } if requested == 1 + HEADER_SIZE
        ));
        assert_eq!(chain.len(), 1);
    }
}
