//! An in-process [`MemorySource`] with a fixed budget.
//!
//! Real page sizes and a real program break make the allocator's decisions
//! depend on the machine and on whatever else in the process touches the
//! break. [`SimulatedSource`] carves the "break region" out of one buffer and
//! hands out "mappings" as separate page aligned buffers, so page size,
//! exhaustion and the exact number of raw calls are under the caller's
//! control.

use std::{
    alloc::{self, Layout},
    io,
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};

use parking_lot::Mutex;

use crate::kernel::MemorySource;

pub struct SimulatedSource {
    page_size: usize,
    /// Start of the emulated break region.
    base: NonNull<u8>,
    break_layout: Layout,
    /// Upper bound on the sum of all mapping lengths.
    mapping_limit: usize,
    state: Mutex<State>,
    break_calls: AtomicUsize,
    mapping_calls: AtomicUsize,
}

struct State {
    /// Bytes of the break region handed out so far.
    brk: usize,
    /// Live mappings, freed when the source is dropped.
    mappings: Vec<(NonNull<u8>, Layout)>,
    mapped: usize,
}

impl SimulatedSource {
    /// Creates a source with pages of `page_size` bytes, a break region of
    /// `break_capacity` bytes and at most `mapping_limit` mapped bytes.
    ///
    /// # Panics
    ///
    /// If `page_size` is not a power of two or `break_capacity` is zero.
    pub fn new(page_size: usize, break_capacity: usize, mapping_limit: usize) -> Self {
        assert!(page_size.is_power_of_two(), "page size must be a power of two");
        assert!(break_capacity > 0, "break region can not be empty");

        let break_layout = match Layout::from_size_align(break_capacity, page_size) {
            Ok(layout) => layout,
            Err(err) => panic!("invalid break region layout: {err}"),
        };

        let base = match NonNull::new(unsafe { alloc::alloc_zeroed(break_layout) }) {
            Some(base) => base,
            None => alloc::handle_alloc_error(break_layout),
        };

        Self {
            page_size,
            base,
            break_layout,
            mapping_limit,
            state: Mutex::new(State {
                brk: 0,
                mappings: Vec::new(),
                mapped: 0,
            }),
            break_calls: AtomicUsize::new(0),
            mapping_calls: AtomicUsize::new(0),
        }
    }

    /// 1 MiB of break region and 16 MiB of mappings.
    pub fn with_page_size(page_size: usize) -> Self {
        Self::new(page_size, 1 << 20, 16 << 20)
    }

    /// Bytes of the break region handed out so far.
    pub fn break_used(&self) -> usize {
        self.state.lock().brk
    }

    /// Bytes currently mapped.
    pub fn mapped_bytes(&self) -> usize {
        self.state.lock().mapped
    }

    /// Successful and failed calls to [`MemorySource::grow_break`].
    pub fn break_calls(&self) -> usize {
        self.break_calls.load(Ordering::Relaxed)
    }

    /// Successful and failed calls to [`MemorySource::map_anonymous`].
    pub fn mapping_calls(&self) -> usize {
        self.mapping_calls.load(Ordering::Relaxed)
    }

    /// Whether `addr` lies inside the emulated break region.
    pub fn in_break_region(&self, addr: usize) -> bool {
        let start = self.base.as_ptr() as usize;
        (start..start + self.break_layout.size()).contains(&addr)
    }
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::with_page_size(4096)
    }
}

fn exhausted() -> io::Error {
    io::Error::from(io::ErrorKind::OutOfMemory)
}

impl MemorySource for SimulatedSource {
    fn page_size(&self) -> usize {
        self.page_size
    }

    unsafe fn grow_break(&self, len: usize) -> io::Result<NonNull<u8>> {
        self.break_calls.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();

        let new_brk = state
            .brk
            .checked_add(len)
            .filter(|brk| *brk <= self.break_layout.size())
            .ok_or_else(exhausted)?;

        // SAFETY: `state.brk <= new_brk <= capacity`.
        let addr = unsafe { self.base.add(state.brk) };
        state.brk = new_brk;

        Ok(addr)
    }

    unsafe fn map_anonymous(&self, len: usize) -> io::Result<NonNull<u8>> {
        self.mapping_calls.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();

        if len == 0 || len % self.page_size != 0 {
            return Err(io::Error::from(io::ErrorKind::InvalidInput));
        }

        let mapped = state
            .mapped
            .checked_add(len)
            .filter(|mapped| *mapped <= self.mapping_limit)
            .ok_or_else(exhausted)?;

        let layout = Layout::from_size_align(len, self.page_size).map_err(|_| exhausted())?;
        let addr = NonNull::new(unsafe { alloc::alloc_zeroed(layout) }).ok_or_else(exhausted)?;

        state.mappings.push((addr, layout));
        state.mapped = mapped;

        Ok(addr)
    }
}

impl Drop for SimulatedSource {
    fn drop(&mut self) {
        let state = self.state.get_mut();

        unsafe {
            for (addr, layout) in state.mappings.drain(..) {
                alloc::dealloc(addr.as_ptr(), layout);
            }

            alloc::dealloc(self.base.as_ptr(), self.break_layout);
        }
    }
}

// SAFETY: the raw pointers only name buffers owned by the source; all
// mutation goes through `state`.
unsafe impl Send for SimulatedSource {}
unsafe impl Sync for SimulatedSource {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn break_is_contiguous_and_bounded() {
        let source = SimulatedSource::new(4096, 100, 0);

        unsafe {
            let first = source.grow_break(40).unwrap();
            let second = source.grow_break(60).unwrap();

            assert_eq!(second.as_ptr() as usize, first.as_ptr() as usize + 40);
            assert!(source.in_break_region(second.as_ptr() as usize));
            assert!(source.grow_break(1).is_err());
        }

        assert_eq!(source.break_used(), 100);
        assert_eq!(source.break_calls(), 3);
    }

    #[test]
    fn mappings_are_page_aligned_and_limited() {
        let source = SimulatedSource::new(4096, 4096, 8192);

        unsafe {
            let region = source.map_anonymous(8192).unwrap();

            assert_eq!(region.as_ptr() as usize % 4096, 0);
            assert!(!source.in_break_region(region.as_ptr() as usize));
            assert!(source.map_anonymous(4096).is_err());
            assert!(source.map_anonymous(100).is_err());
        }

        assert_eq!(source.mapped_bytes(), 8192);
        assert_eq!(source.mapping_calls(), 3);
    }
}
