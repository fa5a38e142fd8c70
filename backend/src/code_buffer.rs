use std::io;
use std::ptr;
use std::sync::atomic::{compiler_fence, Ordering};

use ppcjit_core::{JitError, Result};

/// Outcome of [`CodeBuffer::reserve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reserve {
    /// The bytes fit after the cursor.
    Ready,
    /// The buffer was full; the cursor was reset to the code start. Every
    /// block emitted before is gone and must be dropped by the caller.
    Flushed,
}

/// Executable arena holding all translated code.
///
/// The mapping is read/write/execute for its whole life: blocks are appended
/// at the cursor and chained jumps are repatched in place while other blocks
/// are live. Bytes below `code_start` hold the global stubs and survive a
/// flush. Emitted code never moves; it disappears only when the cursor is
/// reset.
pub struct CodeBuffer {
    ptr: *mut u8,
    size: usize,
    offset: usize,
    code_start: usize,
}

// SAFETY: CodeBuffer owns its mmap'd memory exclusively.
unsafe impl Send for CodeBuffer {}

impl CodeBuffer {
    /// Map a new buffer of `size` bytes, rounded up to the page size.
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(JitError::InvalidConfig("code buffer size must be non-zero"));
        }
        let page_size = page_size();
        let size = (size + page_size - 1) & !(page_size - 1);

        // SAFETY: anonymous private mapping, no file backing.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error().into());
        }

        Ok(Self {
            ptr: ptr as *mut u8,
            size,
            offset: 0,
            code_start: 0,
        })
    }

    /// Current write offset.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Total capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.size
    }

    /// First offset available to blocks.
    #[inline]
    pub fn code_start(&self) -> usize {
        self.code_start
    }

    /// Largest block that can ever be emitted.
    #[inline]
    pub fn usable(&self) -> usize {
        self.size - self.code_start
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.size - self.offset
    }

    /// Freeze everything emitted so far (the global stubs) below the flush
    /// point.
    pub fn set_code_start(&mut self) {
        self.code_start = self.offset;
    }

    #[inline]
    pub fn base_ptr(&self) -> *const u8 {
        self.ptr as *const u8
    }

    /// Host address of buffer offset `offset`.
    #[inline]
    pub fn addr_at(&self, offset: usize) -> usize {
        assert!(offset <= self.size);
        self.ptr as usize + offset
    }

    /// Buffer offset of host address `addr`, if it lies inside the buffer.
    #[inline]
    pub fn offset_of(&self, addr: usize) -> Option<usize> {
        let base = self.ptr as usize;
        (addr >= base && addr < base + self.size).then(|| addr - base)
    }

    /// Make room for `n` contiguous bytes, flushing if they do not fit.
    pub fn reserve(&mut self, n: usize) -> Result<Reserve> {
        if n > self.usable() {
            return Err(JitError::BlockTooLarge {
                requested: n,
                usable: self.usable(),
            });
        }
        if n <= self.remaining() {
            return Ok(Reserve::Ready);
        }
        self.flush();
        Ok(Reserve::Flushed)
    }

    /// Drop every block: the cursor returns to the code start.
    pub fn flush(&mut self) {
        self.offset = self.code_start;
    }

    /// Discard everything written after `offset`.
    pub fn rewind(&mut self, offset: usize) {
        assert!(offset >= self.code_start && offset <= self.offset);
        self.offset = offset;
    }

    /// Copy `data` at the cursor and return where it starts.
    pub fn append(&mut self, data: &[u8]) -> usize {
        assert!(
            data.len() <= self.remaining(),
            "code buffer overflow: {} bytes at {:#x}",
            data.len(),
            self.offset
        );
        let at = self.offset;
        // SAFETY: bounds checked above; source and mapping never overlap.
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.add(at), data.len());
        }
        self.offset += data.len();
        at
    }

    /// Overwrite already-emitted bytes.
    pub fn patch(&mut self, offset: usize, data: &[u8]) {
        assert!(offset + data.len() <= self.offset, "patch past the cursor");
        // SAFETY: inside the written part of the mapping.
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.add(offset), data.len());
        }
    }

    #[inline]
    pub fn patch_u8(&mut self, offset: usize, val: u8) {
        self.patch(offset, &[val]);
    }

    #[inline]
    pub fn read_u8(&self, offset: usize) -> u8 {
        self.read(offset, 1)[0]
    }

    #[inline]
    pub fn read_u32(&self, offset: usize) -> u32 {
        let mut b = [0u8; 4];
        b.copy_from_slice(self.read(offset, 4));
        u32::from_ne_bytes(b)
    }

    /// Emitted bytes `[offset, offset + len)`.
    pub fn read(&self, offset: usize, len: usize) -> &[u8] {
        assert!(offset + len <= self.offset, "read past the cursor");
        // SAFETY: inside the written part of the mapping.
        unsafe { std::slice::from_raw_parts(self.ptr.add(offset), len) }
    }

    /// All emitted bytes.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr..ptr+offset has been written.
        unsafe { std::slice::from_raw_parts(self.ptr, self.offset) }
    }

    /// Make freshly written bytes in `[offset, offset + len)` visible to
    /// instruction fetch.
    pub fn sync_icache(&self, offset: usize, len: usize) {
        assert!(offset + len <= self.size);
        compiler_fence(Ordering::SeqCst);
        // SAFETY: range lies inside the mapping.
        unsafe { flush_icache_range(self.ptr.add(offset), len) };
    }
}

impl Drop for CodeBuffer {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            // SAFETY: ptr/size come from the successful mmap in `new`.
            unsafe {
                libc::munmap(self.ptr as *mut libc::c_void, self.size);
            }
        }
    }
}

fn page_size() -> usize {
    // SAFETY: sysconf is always safe to call.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

// x86 keeps instruction fetch coherent with stores.
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
unsafe fn flush_icache_range(_start: *mut u8, _len: usize) {}

#[cfg(all(not(any(target_arch = "x86", target_arch = "x86_64")), target_os = "linux"))]
unsafe fn flush_icache_range(start: *mut u8, len: usize) {
    extern "C" {
        fn __clear_cache(begin: *mut libc::c_char, end: *mut libc::c_char);
    }
    __clear_cache(start as *mut libc::c_char, start.add(len) as *mut libc::c_char);
}

#[cfg(all(not(any(target_arch = "x86", target_arch = "x86_64")), target_os = "macos"))]
unsafe fn flush_icache_range(start: *mut u8, len: usize) {
    extern "C" {
        fn sys_icache_invalidate(start: *mut libc::c_void, len: libc::size_t);
    }
    sys_icache_invalidate(start as *mut libc::c_void, len);
}
