use std::{collections::HashMap, ptr::NonNull};

use crate::{
    block::{BlockId, BlockInfo, HEADER_SIZE, Origin},
    brk,
    error::AllocError,
    kernel::MemorySource,
    list::Chain,
    mmap,
};

/// The block-tracking and placement engine.
///
/// Every block the allocator ever created is in the [`Chain`], free or not.
/// A block is reusable iff its [`free`](crate::block::Block::free) flag is set; nothing else
/// (adjacency, origin) matters.
///
/// ```text
///                          first fit for 40 bytes
///                                   |
/// +---------+    +----------+    +--v-------+    +----------+
/// | 16 used | -> | 24 free  | -> | 64 free  | -> | 128 free |
/// +---------+    +----------+    +----------+    +----------+
///                   too small       reused whole, never split
/// ```
///
/// When nothing fits, a new block is created at the tail, either by growing
/// the break region or, for requests of a page or more, by a fresh mapping.
///
/// Alongside the chain we keep an index from payload address to block, so
/// that recovering a block from a caller's pointer never has to trust the
/// bytes in front of that pointer.
pub(crate) struct FreeList {
    chain: Chain,
    by_payload: HashMap<usize, BlockId>,
}

impl FreeList {
    pub fn new() -> Self {
        Self {
            chain: Chain::new(),
            by_payload: HashMap::new(),
        }
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    #[cfg(test)]
    pub fn head(&self) -> Option<BlockId> {
        self.chain.head()
    }

    #[cfg(test)]
    pub fn get(&self, id: BlockId) -> Option<&crate::block::Block> {
        self.chain.get(id)
    }

    #[inline]
    pub fn payload(&self, id: BlockId) -> NonNull<u8> {
        self.chain.payload(id)
    }

    /// Returns the first free block of at least `size` bytes, in chain order.
    pub fn find_free_block(&self, size: usize) -> Option<BlockId> {
        self.chain
            .iter()
            .find(|(_, block)| block.free && block.size >= size)
            .map(|(id, _)| id)
    }

    /// Hands out a block of at least `size` usable bytes: the first free one
    /// that fits, or a brand new one appended at the tail.
    ///
    /// On an empty chain the created block becomes the head.
    pub fn search_or_grow<S: MemorySource>(
        &mut self,
        source: &S,
        size: usize,
        page_size: usize,
    ) -> Result<BlockId, AllocError> {
        if let Some(id) = self.find_free_block(size) {
            self.chain.set_free(id, false);
            return Ok(id);
        }

        let created_from = self.chain.len();

        let id = if mmap::needs_mapping(size, page_size) {
            mmap::allocate_mapped(&mut self.chain, source, size, page_size)?
        } else {
            brk::expand_heap(&mut self.chain, source, size)?
        };

        // A mapping may have appended a free tail block as well.
        for index in created_from..self.chain.len() {
            let id = BlockId(index);
            if let Some(block) = self.chain.get(id) {
                self.by_payload.insert(block.payload().as_ptr() as usize, id);
            }
        }

        Ok(id)
    }

    /// Finds the block whose payload starts at `ptr`, that is, whose header
    /// sits exactly [`HEADER_SIZE`] bytes before it.
    pub fn lookup(&self, ptr: NonNull<u8>) -> Result<BlockId, AllocError> {
        let addr = ptr.as_ptr() as usize;

        // A pointer this low can not have a header in front of it.
        if addr < HEADER_SIZE {
            return Err(AllocError::InvalidRelease { addr });
        }

        self.by_payload
            .get(&addr)
            .copied()
            .ok_or(AllocError::InvalidRelease { addr })
    }

    /// Marks the block behind `ptr` as free. Returns the block's size.
    pub fn release(&mut self, ptr: NonNull<u8>) -> Result<usize, AllocError> {
        let id = self.lookup(ptr)?;
        let addr = ptr.as_ptr() as usize;

        match self.chain.set_free(id, true) {
            Some(false) => {}
            Some(true) => return Err(AllocError::DoubleRelease { addr }),
            None => return Err(AllocError::InvalidRelease { addr }),
        }

        let block = self.chain.get(id).ok_or(AllocError::InvalidRelease { addr })?;
        let header = unsafe { block.read_header() };
        debug_assert!(header.size == block.size && header.free);

        Ok(block.size)
    }

    /// Snapshot of every block, in chain order.
    pub fn blocks(&self) -> Vec<BlockInfo> {
        self.chain
            .iter()
            .map(|(id, block)| BlockInfo::new(id, block))
            .collect()
    }

    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats::default();

        for (_, block) in &self.chain {
            stats.blocks += 1;

            if block.free {
                stats.free_blocks += 1;
                stats.free_bytes += block.size;
            } else {
                stats.used_bytes += block.size;
            }

            match block.origin {
                Origin::Break => stats.break_bytes += HEADER_SIZE + block.size,
                Origin::Mapped => stats.mapped_bytes += HEADER_SIZE + block.size,
            }
        }

        stats
    }
}

/// Aggregate view of the chain.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    /// Blocks in the chain.
    pub blocks: usize,
    pub free_blocks: usize,
    /// Usable bytes of free blocks.
    pub free_bytes: usize,
    /// Usable bytes of blocks handed out.
    pub used_bytes: usize,
    /// Bytes (headers included) carved from the break region.
    pub break_bytes: usize,
    /// Bytes (headers included) carved from mappings. Unsplit page tails are
    /// not counted.
    pub mapped_bytes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedSource;

    const PAGE: usize = 4096;

    fn payload(list: &FreeList, id: BlockId) -> NonNull<u8> {
        list.get(id).unwrap().payload()
    }

    #[test]
    fn empty_list_finds_nothing() {
        let list = FreeList::new();

        assert!(list.is_empty());
        assert!(list.find_free_block(0).is_none());
    }

    #[test]
    fn first_block_becomes_the_head() {
        let source = SimulatedSource::default();
        let mut list = FreeList::new();

        let id = list.search_or_grow(&source, 10, PAGE).unwrap();

        assert_eq!(list.head(), Some(id));
        assert_eq!(list.get(id).unwrap().size, 10);
    }

    #[test]
    fn space_for_free_block_is_used() {
        let source = SimulatedSource::default();
        let mut list = FreeList::new();

        let first = list.search_or_grow(&source, 4, PAGE).unwrap();
        list.search_or_grow(&source, 8, PAGE).unwrap();
        list.search_or_grow(&source, 8, PAGE).unwrap();

        list.release(payload(&list, first)).unwrap();

        let again = list.search_or_grow(&source, 4, PAGE).unwrap();
        assert_eq!(first, again);
        assert_eq!(source.break_calls(), 3);
    }

    #[test]
    fn earliest_fit_wins_over_best_fit() {
        let source = SimulatedSource::default();
        let mut list = FreeList::new();

        let big = list.search_or_grow(&source, 64, PAGE).unwrap();
        let small = list.search_or_grow(&source, 16, PAGE).unwrap();

        list.release(payload(&list, big)).unwrap();
        list.release(payload(&list, small)).unwrap();

        // The 16 byte block would be a tighter fit, the 64 one comes first.
        let chosen = list.search_or_grow(&source, 16, PAGE).unwrap();
        assert_eq!(chosen, big);
        // Reused whole: capacity unchanged, no split.
        assert_eq!(list.get(chosen).unwrap().size, 64);
        assert_eq!(list.blocks().len(), 2);
    }

    #[test]
    fn too_small_free_block_is_skipped() {
        let source = SimulatedSource::default();
        let mut list = FreeList::new();

        let small = list.search_or_grow(&source, 8, PAGE).unwrap();
        list.release(payload(&list, small)).unwrap();

        let grown = list.search_or_grow(&source, 9, PAGE).unwrap();
        assert_ne!(grown, small);
        assert!(list.get(small).unwrap().free);
    }

    #[test]
    fn strategy_follows_the_page_threshold() {
        let source = SimulatedSource::default();
        let mut list = FreeList::new();

        list.search_or_grow(&source, PAGE - HEADER_SIZE - 1, PAGE).unwrap();
        assert_eq!((source.break_calls(), source.mapping_calls()), (1, 0));

        list.search_or_grow(&source, PAGE - HEADER_SIZE, PAGE).unwrap();
        assert_eq!((source.break_calls(), source.mapping_calls()), (1, 1));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn split_tail_serves_unrelated_requests() {
        let source = SimulatedSource::default();
        let mut list = FreeList::new();

        list.search_or_grow(&source, 4200, PAGE).unwrap();
        let tail = BlockId(1);
        assert_eq!(list.get(tail).unwrap().size, 3944);

        // A small request reuses the mapped leftover instead of growing the break.
        let small = list.search_or_grow(&source, 100, PAGE).unwrap();
        assert_eq!(small, tail);
        assert_eq!(source.break_calls(), 0);

        // And it can be released through its payload pointer.
        assert_eq!(list.release(payload(&list, small)).unwrap(), 3944);
    }

    #[test]
    fn release_rejects_foreign_and_repeated_pointers() {
        let source = SimulatedSource::default();
        let mut list = FreeList::new();

        let id = list.search_or_grow(&source, 32, PAGE).unwrap();
        let ptr = payload(&list, id);

        let inside = NonNull::new(ptr.as_ptr().wrapping_add(1)).unwrap();
        assert!(matches!(list.release(inside), Err(AllocError::InvalidRelease { .. })));

        assert_eq!(list.release(ptr).unwrap(), 32);
        assert!(matches!(list.release(ptr), Err(AllocError::DoubleRelease { .. })));
    }

    #[test]
    fn stats_add_up() {
        let source = SimulatedSource::default();
        let mut list = FreeList::new();

        let a = list.search_or_grow(&source, 10, PAGE).unwrap();
        list.search_or_grow(&source, 20, PAGE).unwrap();
        list.release(payload(&list, a)).unwrap();

        let stats = list.stats();
        assert_eq!(stats.blocks, 2);
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(stats.free_bytes, 10);
        assert_eq!(stats.used_bytes, 20);
        assert_eq!(stats.break_bytes, source.break_used());
        assert_eq!(stats.mapped_bytes, 0);
    }
}
