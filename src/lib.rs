//! # firstfit
//!
//! A first-fit heap allocator built on the program break and anonymous
//! mappings, with `malloc` / `calloc` / `free` style operations:
//! [`allocate`], [`zero_allocate`] and [`release`].
//!
//! Every block the allocator hands out is preceded by a small header and is
//! remembered forever in a singly linked chain, in creation order:
//!
//! ```text
//!   head
//!    |
//! +--v------------+     +---------------+     +-----------------+     +------------+
//! | hdr | payload | --> | hdr | payload | --> | hdr |  payload  | --> | hdr | free |
//! +---------------+     +---------------+     +-----------------+     +------------+
//!  <------- break region (sbrk) ------->       <----------- one mapping ---------->
//! ```
//!
//! - Allocation walks the chain and takes the **first** free block that is
//!   large enough. It is reused whole.
//! - If none fits, requests smaller than a page (header included) grow the
//!   break region by exactly `size + HEADER_SIZE`; larger ones map whole
//!   pages and give a big enough page tail back to the chain as a free block.
//! - Release only flips the block's `free` flag. Blocks are never merged,
//!   split on reuse, or returned to the operating system.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! let ptr = firstfit::allocate(64).unwrap();
//! unsafe { ptr.as_ptr().write_bytes(7, 64) };
//! firstfit::release(ptr).unwrap();
//! ```
//!
//! Independent heaps, for instance over a [`SimulatedSource`] in tests, are
//! plain values:
//!
//! ```rust
//! use firstfit::{MemAlloc, SimulatedSource};
//!
//! let heap = MemAlloc::with_source(SimulatedSource::with_page_size(4096));
//! let zeroed = heap.zero_allocate(16, 4).unwrap();
//! assert_eq!(unsafe { *zeroed.as_ptr() }, 0);
//! ```
//!
//! ## Logging
//!
//! Events go through the [`log`] facade: successful operations at `debug`,
//! rejected releases at `warn`, and exhaustion of the memory source at
//! `error`.

use std::{ptr::NonNull, sync::OnceLock};

mod block;
mod brk;
pub mod config;
pub mod error;
mod freelist;
pub mod kernel;
mod list;
mod memalloc;
mod mmap;
pub mod simulated;
mod utils;

pub use block::{BlockId, BlockInfo, HEADER_SIZE, Origin};
pub use config::Config;
pub use error::{AllocError, Strategy};
pub use freelist::HeapStats;
pub use kernel::{Kernel, MemorySource};
pub use memalloc::MemAlloc;
pub use simulated::SimulatedSource;

static GLOBAL: OnceLock<MemAlloc<Kernel>> = OnceLock::new();

/// The process-wide heap, created on first use.
pub fn global() -> &'static MemAlloc<Kernel> {
    GLOBAL.get_or_init(MemAlloc::new)
}

/// [`MemAlloc::allocate`] on the [`global`] heap.
pub fn allocate(size: usize) -> Result<NonNull<u8>, AllocError> {
    global().allocate(size)
}

/// [`MemAlloc::zero_allocate`] on the [`global`] heap.
pub fn zero_allocate(count: usize, elem_size: usize) -> Result<NonNull<u8>, AllocError> {
    global().zero_allocate(count, elem_size)
}

/// [`MemAlloc::release`] on the [`global`] heap.
pub fn release(ptr: NonNull<u8>) -> Result<(), AllocError> {
    global().release(ptr)
}
