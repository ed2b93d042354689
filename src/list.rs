use std::ptr::NonNull;

use crate::block::{Block, BlockId, Origin};

/// Handle of the next element, if any.
pub(crate) type Link = Option<BlockId>;

/// Singly linked, append-only chain of [`Block`] records.
///
/// The records live in an arena and are linked by [`BlockId`]. Nothing is
/// ever removed from the chain, so a handle stays valid for the lifetime of
/// the allocator and traversal order is creation order.
///
/// ```text
///   head                                              tail
///    |                                                  |
/// +--v----+     +-------+     +--------+     +-------+  |
/// | Block | --> | Block | --> | Block  | --> | Block | <+
/// | (brk) |     | (brk) |     | (mmap) |     | (free)|
/// +-------+     +-------+     +--------+     +-------+
/// ```
///
/// Every append also patches the raw header of the previous tail so the
/// in-memory headers form the same chain.
pub(crate) struct Chain {
    blocks: Vec<Block>,
    head: Link,
    tail: Link,
}

pub(crate) struct Iter<'a> {
    chain: &'a Chain,
    current: Link,
}

impl Chain {
    pub const fn new() -> Self {
        Self {
            blocks: Vec::new(),
            head: None,
            tail: None,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    #[cfg(test)]
    pub fn head(&self) -> Link {
        self.head
    }

    #[cfg(test)]
    pub fn tail(&self) -> Link {
        self.tail
    }

    #[inline]
    pub fn get(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.0)
    }

    /// Payload of a block handed out by [`Chain::append`].
    #[inline]
    pub fn payload(&self, id: BlockId) -> NonNull<u8> {
        self.blocks[id.0].payload()
    }

    /// Flips the `free` flag of `id` in both the arena and the raw header.
    /// Returns the previous value, or `None` for an unknown handle.
    pub fn set_free(&mut self, id: BlockId, free: bool) -> Option<bool> {
        let next_header = self.next_header(id);
        let block = self.blocks.get_mut(id.0)?;
        let was = block.free;

        block.free = free;
        // SAFETY: the header was written by `append` into memory owned by
        // the source for as long as the chain exists.
        unsafe { block.sync_header(next_header) };

        Some(was)
    }

    /// Appends a new block whose header starts at `header`.
    ///
    /// It is very important for us that the chain never allocates the block
    /// itself: the caller hands over the exact place where the header goes.
    ///
    /// **SAFETY**: `header` must point to at least `HEADER_SIZE + size`
    /// writable bytes that stay valid for the lifetime of the chain and are
    /// not covered by any other block.
    pub unsafe fn append(
        &mut self,
        header: NonNull<u8>,
        size: usize,
        free: bool,
        origin: Origin,
    ) -> BlockId {
        let id = BlockId(self.blocks.len());

        let block = Block {
            header,
            size,
            free,
            next: None,
            origin,
        };

        unsafe { block.sync_header(None) };
        self.blocks.push(block);

        if let Some(tail) = self.tail {
            let previous = &mut self.blocks[tail.0];
            previous.next = Some(id);
            unsafe { previous.sync_header(Some(header)) };
        } else {
            self.head = Some(id);
        }

        self.tail = Some(id);

        id
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            chain: self,
            current: self.head,
        }
    }

    fn next_header(&self, id: BlockId) -> Option<NonNull<u8>> {
        let next = self.blocks.get(id.0)?.next?;
        Some(self.blocks[next.0].header)
    }
}

impl<'a> Iterator for Iter<'a> {
    type Item = (BlockId, &'a Block);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.current?;
        let block = self.chain.get(id)?;

        self.current = block.next;

        Some((id, block))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = match self.current {
            Some(id) => self.chain.len() - id.0,
            None => 0,
        };

        (remaining, Some(remaining))
    }
}

impl<'a> IntoIterator for &'a Chain {
    type Item = (BlockId, &'a Block);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// SAFETY: the raw headers are only touched through `&mut Chain`, and the
// memory behind them is owned by the allocator, not by any one thread.
unsafe impl Send for Chain {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::HEADER_SIZE;

    #[test]
    fn new_chain_is_empty() {
        let chain = Chain::new();

        assert_eq!(chain.len(), 0);
        assert!(chain.is_empty());
        assert!(chain.head().is_none());
        assert!(chain.iter().next().is_none());
    }

    #[test]
    fn append_links_arena_and_headers() {
        let mut buf = vec![0u8; 3 * (HEADER_SIZE + 8)];
        let base = buf.as_mut_ptr();
        let mut chain = Chain::new();

        let ids: Vec<_> = (0..3)
            .map(|i| unsafe {
                let header = NonNull::new_unchecked(base.add(i * (HEADER_SIZE + 8)));
                chain.append(header, 8, false, Origin::Break)
            })
            .collect();

        assert_eq!(chain.head(), Some(ids[0]));
        assert_eq!(chain.tail(), Some(ids[2]));
        assert_eq!(chain.iter().map(|(id, _)| id).collect::<Vec<_>>(), ids);
        assert_eq!(chain.iter().size_hint(), (3, Some(3)));

        // Raw headers follow the same chain.
        unsafe {
            let first = chain.get(ids[0]).unwrap().read_header();
            let second = chain.get(ids[1]).unwrap();
            assert_eq!(first.next.map(NonNull::cast::<u8>), Some(second.header));
            assert!(chain.get(ids[2]).unwrap().read_header().next.is_none());
        }
    }

    #[test]
    fn set_free_updates_the_raw_header() {
        let mut buf = vec![0u8; HEADER_SIZE + 16];
        let mut chain = Chain::new();
        let id = unsafe {
            chain.append(NonNull::new(buf.as_mut_ptr()).unwrap(), 16, false, Origin::Break)
        };

        assert_eq!(chain.set_free(id, true), Some(false));
        assert!(chain.get(id).unwrap().free);
        assert!(unsafe { chain.get(id).unwrap().read_header() }.free);

        assert_eq!(chain.set_free(BlockId(7), true), None);
    }
}
