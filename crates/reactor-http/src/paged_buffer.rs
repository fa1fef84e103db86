//! Paged, mmap-backed growable buffer (spec §5 "Memory discipline"),
//! grounded on `examples/original_source/paged_memory.h`'s `PagedMemory`:
//! page-aligned, zero-initialized anonymous mappings, here bracketed by
//! `PROT_NONE` guard pages on both sides so an overrun faults immediately
//! instead of silently corrupting adjacent memory.

use std::io;
use std::ptr::NonNull;

fn page_size() -> usize {
    // SAFETY: sysconf(_SC_PAGESIZE) takes no pointer arguments and never
    // fails on Linux.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

fn round_up_to_page(size: usize, page: usize) -> usize {
    size.div_ceil(page) * page
}

struct Reservation {
    base: NonNull<libc::c_void>,
    total_len: usize,
    data: NonNull<u8>,
    data_len: usize,
}

// SAFETY: the mapping is anonymous, process-private memory with no
// thread-affinity; moving the `Reservation` (and therefore the pointers
// into it) between threads is sound as long as access stays synchronized
// by the owner, same as any other owned buffer.
unsafe impl Send for Reservation {}

impl Reservation {
    fn new(usable_size: usize) -> io::Result<Reservation> {
        let page = page_size();
        let usable = round_up_to_page(usable_size.max(1), page);
        let total = usable + 2 * page;

        // SAFETY: requesting an anonymous, inaccessible mapping of `total`
        // bytes; the result is checked for MAP_FAILED before use.
        let base = unsafe {
            libc::mmap(std::ptr::null_mut(), total, libc::PROT_NONE, libc::MAP_PRIVATE | libc::MAP_ANONYMOUS, -1, 0)
        };
        if base == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let data_ptr = unsafe { (base as *mut u8).add(page) };

        // SAFETY: `data_ptr` points `page` bytes into the `total`-byte
        // mapping just created, so `[data_ptr, data_ptr+usable)` lies
        // entirely within it, leaving one guard page on each side PROT_NONE.
        let rc = unsafe { libc::mprotect(data_ptr as *mut libc::c_void, usable, libc::PROT_READ | libc::PROT_WRITE) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            // SAFETY: `base`/`total` are exactly the mapping just created.
            unsafe { libc::munmap(base, total) };
            return Err(err);
        }

        Ok(Reservation {
            base: NonNull::new(base).unwrap(),
            total_len: total,
            data: NonNull::new(data_ptr).unwrap(),
            data_len: usable,
        })
    }

    fn as_slice(&self) -> &[u8] {
        // SAFETY: `data` is a committed, readable mapping of `data_len`
        // bytes for the lifetime of this `Reservation`.
        unsafe { std::slice::from_raw_parts(self.data.as_ptr(), self.data_len) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: see `as_slice`; `&mut self` gives exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.data.as_ptr(), self.data_len) }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        // SAFETY: `base`/`total_len` describe exactly the mapping created
        // in `new`, never resized or partially unmapped elsewhere.
        unsafe {
            libc::munmap(self.base.as_ptr(), self.total_len);
        }
    }
}

/// A growable receive buffer: `used` bytes of valid data at the front,
/// capacity grows (re-mapping and copying) up to `max_size`, matching the
/// HTTP server connection's rx buffer (64 KiB initial / 1 MiB safety cap
/// by convention — see [`PagedBuffer::for_http_connection`]).
pub struct PagedBuffer {
    reservation: Reservation,
    used: usize,
    max_size: usize,
}

impl PagedBuffer {
    pub fn new(initial_capacity: usize, max_size: usize) -> io::Result<PagedBuffer> {
        Ok(PagedBuffer { reservation: Reservation::new(initial_capacity)?, used: 0, max_size })
    }

    pub fn for_http_connection() -> io::Result<PagedBuffer> {
        PagedBuffer::new(64 * 1024, 1024 * 1024)
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn capacity(&self) -> usize {
        self.reservation.data_len
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn filled(&self) -> &[u8] {
        &self.reservation.as_slice()[..self.used]
    }

    /// The writable tail past `used`, growing the backing mapping first if
    /// it's currently full (and under `max_size`). Returns an empty slice
    /// if already at `max_size` — callers should treat that as "buffer
    /// full" (spec: "cap at buffer safety limit").
    pub fn spare_capacity_mut(&mut self) -> &mut [u8] {
        if self.used == self.capacity() {
            let _ = self.grow();
        }
        let used = self.used;
        &mut self.reservation.as_mut_slice()[used..]
    }

    pub fn mark_filled(&mut self, additional: usize) {
        self.used += additional;
    }

    /// Drops the first `n` bytes by shifting the remainder to the front,
    /// matching the server connection's "shift rxbuf left by bytes
    /// consumed" step between pipelined requests.
    pub fn consume(&mut self, n: usize) {
        assert!(n <= self.used);
        self.reservation.as_mut_slice().copy_within(n..self.used, 0);
        self.used -= n;
    }

    fn grow(&mut self) -> bool {
        let current = self.capacity();
        if current >= self.max_size {
            return false;
        }
        let new_size = (current * 2).min(self.max_size).max(current + 1);
        let mut new_reservation = match Reservation::new(new_size) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "failed to grow rx buffer");
                return false;
            }
        };
        new_reservation.as_mut_slice()[..self.used].copy_from_slice(&self.reservation.as_slice()[..self.used]);
        self.reservation = new_reservation;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_buffer_is_zeroed_and_page_aligned() {
        let buf = PagedBuffer::new(100, 4096).unwrap();
        assert!(buf.capacity() >= 100);
        assert_eq!(buf.capacity() % page_size(), 0);
        assert!(buf.filled().is_empty());
    }

    #[test]
    fn mark_filled_and_consume_round_trip() {
        let mut buf = PagedBuffer::new(64, 4096).unwrap();
        buf.spare_capacity_mut()[..5].copy_from_slice(b"hello");
        buf.mark_filled(5);
        assert_eq!(buf.filled(), b"hello");
        buf.consume(2);
        assert_eq!(buf.filled(), b"llo");
    }

    #[test]
    fn grows_past_initial_capacity_up_to_max() {
        let mut buf = PagedBuffer::new(4096, 16384).unwrap();
        let initial_cap = buf.capacity();
        buf.mark_filled(initial_cap);
        let spare = buf.spare_capacity_mut();
        assert!(!spare.is_empty());
        assert!(buf.capacity() > initial_cap);
        assert!(buf.capacity() <= 16384);
    }

    #[test]
    fn refuses_to_grow_past_max_size() {
        let mut buf = PagedBuffer::new(4096, 4096).unwrap();
        buf.mark_filled(buf.capacity());
        let spare = buf.spare_capacity_mut();
        assert!(spare.is_empty());
    }
}
