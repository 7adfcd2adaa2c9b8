//! Growable byte accumulator for stream I/O
//!
//! `StreamBuffer` keeps a read index and a write index over one contiguous
//! allocation:
//!
//! ```text
//!  0          ridx             widx            capacity
//!  ├──────────┼────────────────┼───────────────┤
//!  │ consumed │  unread (len)  │  spare space  │
//!  └──────────┴────────────────┴───────────────┘
//! ```
//!
//! Writes are two-phase so a transport can fill the spare region directly:
//! `prepare_write(n)` → copy into `spare_mut()` → `commit_write(n)`.
//! When the spare region is too small the unread bytes are first shifted to
//! offset 0; only if that is still not enough does the storage grow.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Default initial capacity.
pub const DEFAULT_CAPACITY: usize = 8192;

/// Byte buffer with independent read and write cursors.
///
/// Invariant: `ridx <= widx <= storage.len()`.
#[derive(Clone)]
pub struct StreamBuffer {
    storage: Vec<u8>,
    ridx: usize,
    widx: usize,
}

impl StreamBuffer {
    /// Create a buffer with `DEFAULT_CAPACITY` bytes of storage.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a buffer with `capacity` bytes of storage.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: vec![0; capacity],
            ridx: 0,
            widx: 0,
        }
    }

    // ========================================================================
    // Write side
    // ========================================================================

    /// Append `data`, growing as needed. Returns the number of bytes written.
    pub fn write(&mut self, data: &[u8]) -> usize {
        self.prepare_write(data.len());
        self.storage[self.widx..self.widx + data.len()].copy_from_slice(data);
        self.commit_write(data.len());
        data.len()
    }

    /// Ensure at least `n` bytes of spare space after the write index.
    ///
    /// Compacts first; grows to `widx + capacity + 2n` only if compaction did
    /// not free enough room.
    pub fn prepare_write(&mut self, n: usize) {
        if self.left_space() < n {
            self.compact();
        }
        if self.left_space() < n {
            let grow = self.storage.len() + n * 2;
            self.storage.resize(self.widx + grow, 0);
        }
    }

    /// The spare region after the write index.
    #[inline]
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.storage[self.widx..]
    }

    /// Mark `n` bytes of the spare region as written.
    ///
    /// # Panics
    ///
    /// If `n` exceeds `left_space()`.
    #[inline]
    pub fn commit_write(&mut self, n: usize) {
        assert!(n <= self.left_space(), "commit_write past capacity");
        self.widx += n;
    }

    /// Bytes available after the write index.
    #[inline]
    pub fn left_space(&self) -> usize {
        self.storage.len() - self.widx
    }

    // ========================================================================
    // Read side
    // ========================================================================

    /// Drain every unread byte into `out` (cleared first).
    pub fn read_all(&mut self, out: &mut Vec<u8>) -> usize {
        let n = self.len();
        self.read_bytes(out, n)
    }

    /// Move up to `n` unread bytes into `out` (cleared first).
    pub fn read_bytes(&mut self, out: &mut Vec<u8>, n: usize) -> usize {
        out.clear();
        let n = n.min(self.len());
        out.extend_from_slice(&self.storage[self.ridx..self.ridx + n]);
        self.ridx += n;
        n
    }

    /// Copy up to `dst.len()` unread bytes into `dst`.
    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.len());
        dst[..n].copy_from_slice(&self.storage[self.ridx..self.ridx + n]);
        self.ridx += n;
        n
    }

    /// Consume one byte.
    pub fn read_byte(&mut self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }
        let b = self.storage[self.ridx];
        self.ridx += 1;
        Some(b)
    }

    /// Consume up to `n` bytes and return a view of them without copying.
    ///
    /// The view borrows the buffer, so it cannot outlive the next write or
    /// compaction.
    pub fn zero_copy_read(&mut self, n: usize) -> &[u8] {
        let n = n.min(self.len());
        let start = self.ridx;
        self.ridx += n;
        &self.storage[start..start + n]
    }

    /// Discard up to `n` unread bytes.
    pub fn skip(&mut self, n: usize) -> usize {
        let n = n.min(self.len());
        self.ridx += n;
        n
    }

    /// Rewind the read index by one byte.
    pub fn unread_byte(&mut self) -> bool {
        self.unread_bytes(1)
    }

    /// Rewind the read index by `n` bytes.
    ///
    /// Returns `false` (and leaves the buffer untouched) if fewer than `n`
    /// consumed bytes are still held.
    pub fn unread_bytes(&mut self, n: usize) -> bool {
        if n > self.ridx {
            return false;
        }
        self.ridx -= n;
        true
    }

    // ========================================================================
    // Random access
    // ========================================================================

    /// Append `size` unread bytes starting `index` bytes past the read index
    /// to `out`, without consuming them.
    pub fn peek_at(&self, out: &mut Vec<u8>, index: usize, size: usize) -> bool {
        match self.pointer_at(index, size) {
            Some(bytes) => {
                out.extend_from_slice(bytes);
                true
            }
            None => false,
        }
    }

    /// View of `size` unread bytes starting `index` bytes past the read
    /// index. `None` if the range is empty or leaves the unread region.
    pub fn pointer_at(&self, index: usize, size: usize) -> Option<&[u8]> {
        if size == 0 || index >= self.len() || size > self.len() - index {
            return None;
        }
        let start = self.ridx + index;
        Some(&self.storage[start..start + size])
    }

    // ========================================================================
    // Bookkeeping
    // ========================================================================

    /// Unread bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.storage[self.ridx..self.widx]
    }

    /// Number of unread bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.widx - self.ridx
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.widx == self.ridx
    }

    /// Total storage size.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Forget all content. Storage is kept.
    pub fn reset(&mut self) {
        self.ridx = 0;
        self.widx = 0;
    }

    /// Shift the unread region to offset 0.
    pub fn compact(&mut self) {
        if self.ridx == 0 {
            return;
        }
        let len = self.len();
        self.storage.copy_within(self.ridx..self.widx, 0);
        self.ridx = 0;
        self.widx = len;
    }
}

impl Default for StreamBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StreamBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamBuffer")
            .field("len", &self.len())
            .field("ridx", &self.ridx)
            .field("widx", &self.widx)
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Cloneable, thread-safe handle to a `StreamBuffer`.
///
/// The stream pump fills its receive buffer through one of these; the same
/// handle is what `bytes_read` subscribers receive, so readers consume the
/// pump's bytes in place without an extra copy.
#[derive(Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<StreamBuffer>>,
}

impl SharedBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StreamBuffer::with_capacity(capacity))),
        }
    }

    /// Lock the buffer. A panic in another holder does not leave the
    /// cursors inconsistent, so poisoning is ignored.
    pub fn lock(&self) -> MutexGuard<'_, StreamBuffer> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Unread byte count.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drain all unread bytes into a new vector.
    pub fn take_all(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.lock().read_all(&mut out);
        out
    }

    /// Whether two handles refer to the same buffer.
    pub fn ptr_eq(&self, other: &SharedBuffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SharedBuffer").field(&*self.lock()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read_all() {
        let mut buf = StreamBuffer::with_capacity(16);
        let payload = b"hello spindle";
        assert_eq!(buf.write(payload), payload.len());
        assert_eq!(buf.len(), payload.len());

        let mut out = Vec::new();
        assert_eq!(buf.read_bytes(&mut out, payload.len()), payload.len());
        assert_eq!(out, payload);
        assert_eq!(buf.len(), 0);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_two_phase_write() {
        let mut buf = StreamBuffer::with_capacity(4);
        buf.prepare_write(10);
        assert!(buf.left_space() >= 10);

        buf.spare_mut()[..3].copy_from_slice(b"abc");
        buf.commit_write(3);
        assert_eq!(buf.as_slice(), b"abc");
    }

    #[test]
    #[should_panic(expected = "commit_write past capacity")]
    fn test_commit_past_capacity_panics() {
        let mut buf = StreamBuffer::with_capacity(4);
        buf.commit_write(5);
    }

    #[test]
    fn test_prepare_write_compacts_before_growing() {
        let mut buf = StreamBuffer::with_capacity(8);
        buf.write(b"abcdef");
        let mut out = Vec::new();
        buf.read_bytes(&mut out, 4);
        assert_eq!(buf.left_space(), 2);

        // 2 unread bytes + 6 requested fit in 8 after shifting.
        buf.prepare_write(6);
        assert_eq!(buf.capacity(), 8);
        assert_eq!(buf.as_slice(), b"ef");
        assert_eq!(buf.left_space(), 6);
    }

    #[test]
    fn test_prepare_write_grows() {
        let mut buf = StreamBuffer::with_capacity(8);
        buf.write(b"12345678");
        buf.prepare_write(4);
        assert!(buf.capacity() >= 8 + 2 * 4);
        assert!(buf.left_space() >= 4);
        assert_eq!(buf.as_slice(), b"12345678");
    }

    #[test]
    fn test_read_into_slice_and_byte() {
        let mut buf = StreamBuffer::with_capacity(8);
        buf.write(b"xyz");
        assert_eq!(buf.read_byte(), Some(b'x'));

        let mut dst = [0u8; 8];
        assert_eq!(buf.read(&mut dst), 2);
        assert_eq!(&dst[..2], b"yz");
        assert_eq!(buf.read_byte(), None);
    }

    #[test]
    fn test_zero_copy_read_clamps() {
        let mut buf = StreamBuffer::with_capacity(8);
        buf.write(b"abc");
        assert_eq!(buf.zero_copy_read(2), b"ab");
        assert_eq!(buf.zero_copy_read(10), b"c");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_unread_bytes() {
        let mut buf = StreamBuffer::with_capacity(8);
        buf.write(b"abcd");
        buf.skip(3);
        assert!(buf.unread_bytes(2));
        assert_eq!(buf.as_slice(), b"bcd");
        assert!(buf.unread_byte());
        assert_eq!(buf.as_slice(), b"abcd");
        assert!(!buf.unread_byte());
    }

    #[test]
    fn test_peek_and_pointer_at() {
        let mut buf = StreamBuffer::with_capacity(8);
        buf.write(b"012345");
        buf.skip(1);

        assert_eq!(buf.pointer_at(0, 2), Some(&b"12"[..]));
        assert_eq!(buf.pointer_at(3, 2), Some(&b"45"[..]));
        assert_eq!(buf.pointer_at(3, 3), None);
        assert_eq!(buf.pointer_at(5, 1), None);
        assert_eq!(buf.pointer_at(0, 0), None);

        let mut out = Vec::new();
        assert!(buf.peek_at(&mut out, 1, 3));
        assert_eq!(out, b"234");
        // Peeking does not consume.
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn test_interleaved_operations_keep_invariant() {
        let mut buf = StreamBuffer::with_capacity(5);
        let mut expected = std::collections::VecDeque::new();
        let mut out = Vec::new();

        for round in 0u8..50 {
            let chunk: Vec<u8> = (0..(round % 7)).map(|i| round.wrapping_add(i)).collect();
            buf.write(&chunk);
            expected.extend(chunk.iter().copied());

            let take = (round as usize * 3) % 5;
            let n = buf.read_bytes(&mut out, take);
            for byte in &out[..n] {
                assert_eq!(Some(*byte), expected.pop_front());
            }
            assert!(buf.ridx <= buf.widx && buf.widx <= buf.capacity());
            assert_eq!(buf.len(), expected.len());
        }
    }

    #[test]
    fn test_reset_keeps_storage() {
        let mut buf = StreamBuffer::with_capacity(8);
        buf.write(b"abc");
        buf.reset();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), 8);
    }

    #[test]
    fn test_shared_buffer_handles_share_state() {
        let a = SharedBuffer::new(16);
        let b = a.clone();
        a.lock().write(b"ping");
        assert_eq!(b.len(), 4);
        assert_eq!(b.take_all(), b"ping");
        assert!(a.is_empty());
        assert!(a.ptr_eq(&b));
    }
}
