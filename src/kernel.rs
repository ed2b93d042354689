use std::{
    io,
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};

use parking_lot::Mutex;

/// Raw memory primitives the allocator is built on.
///
/// This trait provides an abstraction over the low level memory operations.
/// The allocator, our top level view of this, has nothing to do with the
/// concrete syscalls offered by each kernel. It only relies on two
/// properties:
///
/// - the break region grows in a single direction and every successful
///   [`MemorySource::grow_break`] returns the bytes right after the ones
///   handed out by the previous call (unless someone else moved the break);
/// - [`MemorySource::map_anonymous`] is page granular.
///
/// Memory obtained from a source is never given back by the allocator.
pub trait MemorySource: Send + Sync {
    /// Size of a virtual memory page in bytes. Always a power of two.
    fn page_size(&self) -> usize;

    /// Extends the break region by `len` bytes and returns the first of the
    /// new bytes.
    ///
    /// **SAFETY**: the caller takes over the returned `len` bytes; they must
    /// not be handed out twice.
    unsafe fn grow_break(&self, len: usize) -> io::Result<NonNull<u8>>;

    /// Maps a fresh read/write anonymous region of `len` bytes. `len` is a
    /// multiple of [`MemorySource::page_size`].
    ///
    /// **SAFETY**: same as [`MemorySource::grow_break`].
    unsafe fn map_anonymous(&self, len: usize) -> io::Result<NonNull<u8>>;
}

/// The operating system as a [`MemorySource`].
///
/// On Unix the break region is the real program break (`sbrk(2)`) and
/// mappings come from `mmap(2)`. On Windows, which has no program break, a
/// large address range is reserved once and committed incrementally, which
/// gives the same contiguous and monotonic growth.
#[derive(Debug, Default, Clone, Copy)]
pub struct Kernel;

/// Serializes every raw memory call of the process. The program break is a
/// process-wide resource, so independent allocators share this lock.
///
/// Always acquired after (never before) an allocator's structure lock.
static SOURCE_LOCK: Mutex<()> = Mutex::new(());

/// Cached page size, 0 until first queried.
static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

/// Platform specific half of [`Kernel`].
trait PlatformMemory {
    /// Moves the break `len` bytes up. Returns the old break.
    unsafe fn sbrk(len: usize) -> io::Result<NonNull<u8>>;

    /// Request a memory region of size `len`.
    unsafe fn request_memory(len: usize) -> io::Result<NonNull<u8>>;

    /// Returns the virtual memory page size of the computer in bytes.
    fn query_page_size() -> usize;
}

/// Wrapper to calculate the computer's page size once.
#[inline]
pub fn page_size() -> usize {
    match PAGE_SIZE.load(Ordering::Relaxed) {
        0 => {
            let size = Kernel::query_page_size();
            PAGE_SIZE.store(size, Ordering::Relaxed);
            size
        }
        size => size,
    }
}

impl MemorySource for Kernel {
    fn page_size(&self) -> usize {
        page_size()
    }

    unsafe fn grow_break(&self, len: usize) -> io::Result<NonNull<u8>> {
        let _guard = SOURCE_LOCK.lock();
        unsafe { Kernel::sbrk(len) }
    }

    unsafe fn map_anonymous(&self, len: usize) -> io::Result<NonNull<u8>> {
        let _guard = SOURCE_LOCK.lock();
        unsafe { Kernel::request_memory(len) }
    }
}

#[cfg(unix)]
mod unix {
    use super::{Kernel, PlatformMemory};

    use libc::{c_void, intptr_t, mmap, off_t, size_t};

    use std::{
        io,
        os::raw::c_int,
        ptr::{self, NonNull},
    };

    impl PlatformMemory for Kernel {
        unsafe fn sbrk(len: usize) -> io::Result<NonNull<u8>> {
            let increment = intptr_t::try_from(len)
                .map_err(|_| io::Error::from(io::ErrorKind::OutOfMemory))?;

            let addr = unsafe { libc::sbrk(increment) };

            if addr == usize::MAX as *mut c_void {
                return Err(io::Error::last_os_error());
            }

            NonNull::new(addr.cast::<u8>())
                .ok_or_else(|| io::Error::from(io::ErrorKind::OutOfMemory))
        }

        unsafe fn request_memory(len: usize) -> io::Result<NonNull<u8>> {
            // mmap parameters.
            const ADDR: *mut c_void = ptr::null_mut::<c_void>();
            // Read-Write only memory.
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            unsafe {
                match mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET) {
                    libc::MAP_FAILED => Err(io::Error::last_os_error()),
                    addr => Ok(NonNull::new_unchecked(addr).cast::<u8>()),
                }
            }
        }

        fn query_page_size() -> usize {
            unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{io, mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use parking_lot::Mutex;
    use windows::Win32::System::{Memory, SystemInformation};

    use super::{Kernel, PlatformMemory, page_size};
    use crate::utils::align;

    /// Address space reserved for the emulated break region.
    const BREAK_RESERVE: usize = 1 << 30;

    /// Emulated program break: `[base, base + brk)` is handed out and
    /// `[base, base + committed)` is backed by memory.
    struct Break {
        base: usize,
        brk: usize,
        committed: usize,
    }

    static BREAK: Mutex<Break> = Mutex::new(Break {
        base: 0,
        brk: 0,
        committed: 0,
    });

    fn exhausted() -> io::Error {
        io::Error::from(io::ErrorKind::OutOfMemory)
    }

    impl PlatformMemory for Kernel {
        unsafe fn sbrk(len: usize) -> io::Result<NonNull<u8>> {
            let mut state = BREAK.lock();

            if state.base == 0 {
                let addr = unsafe {
                    Memory::VirtualAlloc(
                        None,
                        BREAK_RESERVE,
                        Memory::MEM_RESERVE,
                        Memory::PAGE_READWRITE,
                    )
                };
                if addr.is_null() {
                    return Err(io::Error::last_os_error());
                }
                state.base = addr as usize;
            }

            let new_brk = state
                .brk
                .checked_add(len)
                .filter(|brk| *brk <= BREAK_RESERVE)
                .ok_or_else(exhausted)?;

            if new_brk > state.committed {
                let target = align(new_brk, page_size())
                    .ok_or_else(exhausted)?
                    .min(BREAK_RESERVE);
                let start = (state.base + state.committed) as *const c_void;

                let addr = unsafe {
                    Memory::VirtualAlloc(
                        Some(start),
                        target - state.committed,
                        Memory::MEM_COMMIT,
                        Memory::PAGE_READWRITE,
                    )
                };
                if addr.is_null() {
                    return Err(io::Error::last_os_error());
                }
                state.committed = target;
            }

            let old = state.base + state.brk;
            state.brk = new_brk;

            NonNull::new(old as *mut u8).ok_or_else(exhausted)
        }

        unsafe fn request_memory(len: usize) -> io::Result<NonNull<u8>> {
            // Read-Write only.
            let protection = Memory::PAGE_READWRITE;

            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            unsafe {
                let addr = Memory::VirtualAlloc(None, len, flags, protection);

                NonNull::new(addr.cast()).ok_or_else(io::Error::last_os_error)
            }
        }

        fn query_page_size() -> usize {
            unsafe {
                let mut system_info = MaybeUninit::uninit();
                SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

                system_info.assume_init().dwPageSize as usize
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_a_power_of_two() {
        let size = Kernel.page_size();

        assert!(size.is_power_of_two());
        assert_eq!(size, page_size());
    }

    #[test]
    fn mapped_pages_are_writable() {
        let len = page_size() * 2;

        unsafe {
            let region = Kernel.map_anonymous(len).unwrap();
            region.as_ptr().write_bytes(0xAB, len);

            assert_eq!(*region.as_ptr(), 0xAB);
            assert_eq!(*region.as_ptr().add(len - 1), 0xAB);
        }
    }
}
