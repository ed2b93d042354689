use std::ptr::NonNull;

use log::{debug, error, warn};
use parking_lot::Mutex;

use crate::{
    block::BlockInfo,
    config::Config,
    error::AllocError,
    freelist::{FreeList, HeapStats},
    kernel::{Kernel, MemorySource},
};

/// First-fit allocator over a [`MemorySource`].
///
/// All bookkeeping lives in the instance: the chain of blocks, the payload
/// index and the structure lock that guards them. The lock is held for a
/// whole search-or-grow, raw memory call included, so two threads that miss
/// at the same time never grow the heap off the same stale view, and the
/// very first block is created exactly once.
///
/// ```
/// use firstfit::{MemAlloc, SimulatedSource};
///
/// let heap = MemAlloc::with_source(SimulatedSource::default());
///
/// let ptr = heap.allocate(16).unwrap();
/// heap.release(ptr).unwrap();
///
/// // First fit hands the same block out again.
/// assert_eq!(heap.allocate(8).unwrap(), ptr);
/// ```
pub struct MemAlloc<S: MemorySource = Kernel> {
    source: S,
    config: Config,
    page_size: usize,
    free_list: Mutex<FreeList>,
}

impl MemAlloc<Kernel> {
    /// Allocator backed by the program break and `mmap`.
    pub fn new() -> Self {
        Self::with_source(Kernel)
    }
}

impl Default for MemAlloc<Kernel> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: MemorySource> MemAlloc<S> {
    pub fn with_source(source: S) -> Self {
        let page_size = source.page_size();

        Self {
            source,
            config: Config::default(),
            page_size,
            free_list: Mutex::new(FreeList::new()),
        }
    }

    /// Fails with [`AllocError::InvalidConfig`] if `config` does not fit
    /// `source`.
    pub fn with_config(source: S, config: Config) -> Result<Self, AllocError> {
        let page_size = config.effective_page_size(source.page_size())?;

        Ok(Self {
            source,
            config,
            page_size,
            free_list: Mutex::new(FreeList::new()),
        })
    }

    /// Returns a pointer to at least `size` writable bytes.
    ///
    /// The memory is not initialized and its alignment is only that of the
    /// position right after a block header.
    pub fn allocate(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        let result = {
            let mut free_list = self.free_list.lock();

            free_list
                .search_or_grow(&self.source, size, self.page_size)
                .map(|id| free_list.payload(id))
        };

        match result {
            Ok(ptr) => {
                if self.config.log_events {
                    debug!("malloc {size} bytes");
                }
                Ok(ptr)
            }
            Err(err) => {
                if err.is_exhaustion() {
                    error!("{err}: {}", error_source(&err));
                }
                Err(err)
            }
        }
    }

    /// Allocates `count * elem_size` bytes, all set to zero.
    ///
    /// The product is checked: an overflow fails with
    /// [`AllocError::SizeOverflow`] before anything is allocated.
    pub fn zero_allocate(&self, count: usize, elem_size: usize) -> Result<NonNull<u8>, AllocError> {
        let total = count
            .checked_mul(elem_size)
            .ok_or(AllocError::SizeOverflow { count, elem_size })?;

        let ptr = self.allocate(total)?;

        // Reused blocks keep whatever their previous owner wrote.
        // SAFETY: `allocate` returned at least `total` writable bytes.
        unsafe { ptr.as_ptr().write_bytes(0, total) };

        if self.config.log_events {
            debug!("calloc {total} bytes");
        }

        Ok(ptr)
    }

    /// Gives the block behind `ptr` back to the allocator.
    ///
    /// The payload is left as is. `ptr` must be a pointer previously returned
    /// by [`MemAlloc::allocate`] or [`MemAlloc::zero_allocate`] of this very
    /// instance; anything else is reported and ignored. Accessing the memory
    /// after releasing it is the caller's bug: the block may be handed out
    /// again at any time.
    pub fn release(&self, ptr: NonNull<u8>) -> Result<(), AllocError> {
        let result = self.free_list.lock().release(ptr);

        match result {
            Ok(size) => {
                if self.config.log_events {
                    debug!("freed {size} bytes");
                }
                Ok(())
            }
            Err(err) => {
                warn!("ignoring release: {err}");
                Err(err)
            }
        }
    }

    /// Snapshot of every block, in chain order.
    pub fn blocks(&self) -> Vec<BlockInfo> {
        self.free_list.lock().blocks()
    }

    pub fn stats(&self) -> HeapStats {
        self.free_list.lock().stats()
    }

    /// Page size driving the mapping threshold.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

fn error_source(err: &AllocError) -> String {
    match std::error::Error::source(err) {
        Some(source) => source.to_string(),
        None => String::from("unknown cause"),
    }
}
