use std::{mem, ptr::NonNull};

/// Size of the header that precedes every payload. Every size computation
/// of the allocator (growth requests, the mapping threshold, splitting) is
/// expressed in terms of this value.
pub const HEADER_SIZE: usize = mem::size_of::<BlockHeader>();

/// This is the header written in raw memory right before every payload.
///
/// ```text
/// +---------------------+ <------+
/// |        size         |        |
/// +---------------------+        |
/// |        next         |        | -> Header (HEADER_SIZE bytes)
/// +---------------------+        |
/// |     free (1b)       |        |
/// +---------------------+ <------+ <-- pointer handed to the caller
/// |       Content       |        |
/// |         ...         |        | -> `size` addressable bytes
/// |                     |        |
/// +---------------------+ <------+
/// ```
///
/// The authoritative copy of this metadata is the [`Block`] record kept in
/// the allocator's arena. The in-memory header mirrors it so the heap can be
/// walked from raw memory alone.
///
/// Blocks grown from the break region are not rounded up, so a header may
/// start at an unaligned address. It is always accessed with
/// [`write_unaligned`](std::ptr::write_unaligned) /
/// [`read_unaligned`](std::ptr::read_unaligned).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub(crate) struct BlockHeader {
    /// Usable bytes after the header.
    pub size: usize,
    /// Header of the next block in creation order. Only raw heap walkers
    /// follow it; the allocator itself uses [`Block::next`].
    #[allow(dead_code)]
    pub next: Option<NonNull<BlockHeader>>,
    /// Flag to tell whether the block is free or not.
    pub free: bool,
}

/// Opaque handle of a block inside the allocator's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub(crate) usize);

impl BlockId {
    /// Position of the block in creation order.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Raw memory source a block was carved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Break,
    Mapped,
}

/// Arena record of a block.
#[derive(Debug)]
pub(crate) struct Block {
    /// Start of the in-memory [`BlockHeader`].
    pub header: NonNull<u8>,
    /// Usable size, fixed at creation.
    pub size: usize,
    pub free: bool,
    /// Next block in creation order.
    pub next: Option<BlockId>,
    pub origin: Origin,
}

impl Block {
    /// First byte handed to the caller.
    #[inline]
    pub fn payload(&self) -> NonNull<u8> {
        // SAFETY: every block is created from a region of at least
        // `HEADER_SIZE + size` bytes starting at `header`.
        unsafe { self.header.add(HEADER_SIZE) }
    }

    /// Writes this record into the raw header.
    ///
    /// **SAFETY**: `self.header` must point to at least `HEADER_SIZE`
    /// writable bytes owned by the allocator.
    pub unsafe fn sync_header(&self, next: Option<NonNull<u8>>) {
        let header = BlockHeader {
            size: self.size,
            next: next.map(NonNull::cast),
            free: self.free,
        };

        unsafe { self.header.cast::<BlockHeader>().as_ptr().write_unaligned(header) }
    }

    /// Reads back the raw header.
    ///
    /// **SAFETY**: same as [`Block::sync_header`].
    pub unsafe fn read_header(&self) -> BlockHeader {
        unsafe { self.header.cast::<BlockHeader>().as_ptr().read_unaligned() }
    }
}

/// Snapshot of a block, as reported by [`crate::MemAlloc::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub id: BlockId,
    /// Address of the payload.
    pub payload: usize,
    pub size: usize,
    pub free: bool,
    pub origin: Origin,
}

impl BlockInfo {
    pub(crate) fn new(id: BlockId, block: &Block) -> Self {
        Self {
            id,
            payload: block.payload().as_ptr() as usize,
            size: block.size,
            free: block.free,
            origin: block.origin,
        }
    }
}
