//! Headroom-aware byte buffers and the slab pool behind them.
//!
//! A [`Buffer`] owns one contiguous slab and exposes a logical window
//! `start..end` inside it. Bytes in front of the window are front headroom,
//! bytes behind it are rear headroom; protocol layers prepend and append
//! framing there in place. Every window adjustment is bounds-checked and
//! fails with [`BufferError`] instead of reallocating or truncating.
//!
//! ```text
//! 0          start              end        limit     capacity
//! |-- front --|==== payload ====|-- writable --|- rear -|
//! ```
//!
//! Sources fill the writable region up to `limit`; sinks may extend the
//! window up to `capacity`, which is how rear headroom reserved by the copy
//! engine becomes available to the sink that asked for it.

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};
use thiserror::Error;

/// Default stream buffer size.
pub const BUFFER_SIZE: usize = 32 * 1024;

/// Default datagram buffer size.
pub const UDP_BUFFER_SIZE: usize = 65535;

const MIN_CLASS_LOG: u32 = 6;
const MAX_CLASS_LOG: u32 = 16;
const DEFAULT_MAX_PER_CLASS: usize = 64;

/// Buffer window errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// Requested window does not fit in the buffer
    #[error("window {start}+{len} exceeds capacity {capacity}")]
    OutOfBounds {
        /// Requested start
        start: usize,
        /// Requested length
        len: usize,
        /// Buffer capacity
        capacity: usize,
    },

    /// Not enough front headroom to prepend
    #[error("need {needed} bytes of front headroom, {available} available")]
    NoFrontRoom {
        /// Bytes requested
        needed: usize,
        /// Bytes available
        available: usize,
    },

    /// Not enough room behind the window
    #[error("need {needed} bytes behind the window, {available} available")]
    NoRearRoom {
        /// Bytes requested
        needed: usize,
        /// Bytes available
        available: usize,
    },

    /// Window holds fewer bytes than requested
    #[error("short buffer: wanted {wanted}, {available} available")]
    Short {
        /// Bytes requested
        wanted: usize,
        /// Bytes available
        available: usize,
    },
}

/// Owned byte region with a logical window and headroom on both sides.
pub struct Buffer {
    slab: Box<[u8]>,
    capacity: usize,
    start: usize,
    end: usize,
    limit: usize,
    pool: Option<BufferPool>,
}

impl Buffer {
    /// Allocate an unpooled buffer of `capacity` bytes with an empty window.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::from_slab(vec![0u8; capacity].into_boxed_slice(), capacity, None)
    }

    /// Copy `data` into a new buffer whose window covers exactly `data`.
    #[must_use]
    pub fn from_slice(data: &[u8]) -> Self {
        let mut buffer = Self::new(data.len());
        buffer.slab.copy_from_slice(data);
        buffer.end = data.len();
        buffer
    }

    /// Copy `data` into a new buffer reserving `front` and `rear` headroom.
    #[must_use]
    pub fn with_headroom(front: usize, data: &[u8], rear: usize) -> Self {
        let mut buffer = Self::new(front + data.len() + rear);
        buffer.start = front;
        buffer.end = front + data.len();
        buffer.slab[front..buffer.end].copy_from_slice(data);
        buffer
    }

    fn from_slab(slab: Box<[u8]>, capacity: usize, pool: Option<BufferPool>) -> Self {
        Self {
            slab,
            capacity,
            start: 0,
            end: 0,
            limit: capacity,
            pool,
        }
    }

    /// Total usable bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Offset of the window inside the buffer, equal to the front headroom.
    #[must_use]
    pub fn start(&self) -> usize {
        self.start
    }

    /// Length of the window.
    #[must_use]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether the window is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// Bytes available behind the window, up to capacity.
    #[must_use]
    pub fn rear_room(&self) -> usize {
        self.capacity - self.end
    }

    /// The window.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.slab[self.start..self.end]
    }

    /// The window, mutably.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.slab[self.start..self.end]
    }

    /// Region a source may fill: from the end of the window to the limit.
    pub fn writable(&mut self) -> &mut [u8] {
        let limit = self.limit.max(self.end);
        &mut self.slab[self.end..limit]
    }

    /// Grow the window over `n` bytes previously written into
    /// [`writable`](Self::writable).
    ///
    /// # Errors
    ///
    /// Fails if `n` exceeds the writable region.
    pub fn commit(&mut self, n: usize) -> Result<(), BufferError> {
        let available = self.limit.saturating_sub(self.end);
        if n > available {
            return Err(BufferError::NoRearRoom {
                needed: n,
                available,
            });
        }
        self.end += n;
        Ok(())
    }

    /// Append `data` to the window inside the writable region.
    ///
    /// # Errors
    ///
    /// Fails if `data` does not fit before the limit.
    pub fn write(&mut self, data: &[u8]) -> Result<(), BufferError> {
        let end = self.end;
        self.commit(data.len())?;
        self.slab[end..self.end].copy_from_slice(data);
        Ok(())
    }

    /// Hold back the last `rear` bytes of capacity from sources.
    ///
    /// # Errors
    ///
    /// Fails if the window already reaches into that region.
    pub fn reserve_rear(&mut self, rear: usize) -> Result<(), BufferError> {
        let available = self.capacity - self.end;
        if rear > available {
            return Err(BufferError::NoRearRoom {
                needed: rear,
                available,
            });
        }
        self.limit = self.capacity - rear;
        Ok(())
    }

    /// Make the whole capacity writable again.
    pub fn release_rear(&mut self) {
        self.limit = self.capacity;
    }

    /// Empty the window and place it `front` bytes into the buffer.
    ///
    /// # Errors
    ///
    /// Fails if `front` reaches past the writable limit.
    pub fn reset(&mut self, front: usize) -> Result<(), BufferError> {
        if front > self.limit {
            return Err(BufferError::NoRearRoom {
                needed: front,
                available: self.limit,
            });
        }
        self.resize(front, 0)
    }

    /// Set the window to `start..start + len` without touching the bytes.
    ///
    /// # Errors
    ///
    /// Fails if the window does not fit in the capacity.
    pub fn resize(&mut self, start: usize, len: usize) -> Result<(), BufferError> {
        match start.checked_add(len) {
            Some(end) if end <= self.capacity => {
                self.start = start;
                self.end = end;
                Ok(())
            }
            _ => Err(BufferError::OutOfBounds {
                start,
                len,
                capacity: self.capacity,
            }),
        }
    }

    /// Drop `n` bytes from the front of the window.
    ///
    /// # Errors
    ///
    /// Fails if the window holds fewer than `n` bytes.
    pub fn advance(&mut self, n: usize) -> Result<(), BufferError> {
        if n > self.len() {
            return Err(BufferError::Short {
                wanted: n,
                available: self.len(),
            });
        }
        self.start += n;
        Ok(())
    }

    /// Shorten the window to at most `len` bytes.
    pub fn truncate(&mut self, len: usize) {
        if len < self.len() {
            self.end = self.start + len;
        }
    }

    /// Move the window start back by `n` bytes and return the new prefix.
    ///
    /// # Errors
    ///
    /// Fails if there are fewer than `n` bytes of front headroom.
    pub fn prepend(&mut self, n: usize) -> Result<&mut [u8], BufferError> {
        if n > self.start {
            return Err(BufferError::NoFrontRoom {
                needed: n,
                available: self.start,
            });
        }
        self.start -= n;
        Ok(&mut self.slab[self.start..self.start + n])
    }

    /// Grow the window by `n` bytes into the rear headroom and return them.
    ///
    /// # Errors
    ///
    /// Fails if there are fewer than `n` bytes behind the window.
    pub fn extend(&mut self, n: usize) -> Result<&mut [u8], BufferError> {
        if n > self.rear_room() {
            return Err(BufferError::NoRearRoom {
                needed: n,
                available: self.rear_room(),
            });
        }
        let end = self.end;
        self.end += n;
        Ok(&mut self.slab[end..self.end])
    }

    /// Consume and return the first `n` bytes of the window.
    ///
    /// # Errors
    ///
    /// Fails if the window holds fewer than `n` bytes.
    pub fn take(&mut self, n: usize) -> Result<&[u8], BufferError> {
        let start = self.start;
        self.advance(n)?;
        Ok(&self.slab[start..start + n])
    }

    /// Consume one byte.
    ///
    /// # Errors
    ///
    /// Fails on an empty window.
    pub fn read_u8(&mut self) -> Result<u8, BufferError> {
        Ok(self.take(1)?[0])
    }

    /// Consume a big-endian `u16`.
    ///
    /// # Errors
    ///
    /// Fails if fewer than 2 bytes remain.
    pub fn read_u16(&mut self) -> Result<u16, BufferError> {
        let mut raw = [0u8; 2];
        raw.copy_from_slice(self.take(2)?);
        Ok(u16::from_be_bytes(raw))
    }

    /// Consume a big-endian `u64`.
    ///
    /// # Errors
    ///
    /// Fails if fewer than 8 bytes remain.
    pub fn read_u64(&mut self) -> Result<u64, BufferError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(raw))
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.put(std::mem::take(&mut self.slab));
        }
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("start", &self.start)
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}

/// Bounded pool of power-of-two slabs.
///
/// Requests are rounded up to a size class between 64 bytes and 64 KiB;
/// larger requests are served unpooled. Each class keeps at most
/// `max_per_class` idle slabs, extra slabs are freed.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    classes: Mutex<Vec<Vec<Box<[u8]>>>>,
    max_per_class: usize,
}

impl BufferPool {
    /// Create a pool keeping at most `max_per_class` idle slabs per size class.
    #[must_use]
    pub fn new(max_per_class: usize) -> Self {
        let classes = (MIN_CLASS_LOG..=MAX_CLASS_LOG).map(|_| Vec::new()).collect();
        Self {
            inner: Arc::new(PoolInner {
                classes: Mutex::new(classes),
                max_per_class,
            }),
        }
    }

    /// Process-wide pool used by the copy engine.
    pub fn global() -> &'static BufferPool {
        static GLOBAL: OnceLock<BufferPool> = OnceLock::new();
        GLOBAL.get_or_init(|| BufferPool::new(DEFAULT_MAX_PER_CLASS))
    }

    /// Hand out a buffer with exactly `capacity` usable bytes.
    #[must_use]
    pub fn get(&self, capacity: usize) -> Buffer {
        let Some(class) = size_class(capacity) else {
            return Buffer::new(capacity);
        };
        let reused = self.lock()[class].pop();
        let slab = reused.unwrap_or_else(|| vec![0u8; 1 << (class as u32 + MIN_CLASS_LOG)].into());
        Buffer::from_slab(slab, capacity, Some(self.clone()))
    }

    /// Idle slabs currently held.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.lock().iter().map(Vec::len).sum()
    }

    fn put(&self, slab: Box<[u8]>) {
        let len = slab.len();
        if !len.is_power_of_two() {
            return;
        }
        let Some(class) = size_class(len) else {
            return;
        };
        let mut classes = self.lock();
        if classes[class].len() < self.inner.max_per_class {
            classes[class].push(slab);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Vec<Box<[u8]>>>> {
        self.inner
            .classes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("idle", &self.idle())
            .field("max_per_class", &self.inner.max_per_class)
            .finish()
    }
}

fn size_class(capacity: usize) -> Option<usize> {
    let rounded = capacity.max(1 << MIN_CLASS_LOG).checked_next_power_of_two()?;
    let log = rounded.trailing_zeros();
    (log <= MAX_CLASS_LOG).then(|| (log - MIN_CLASS_LOG) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_bounds() {
        let mut buffer = Buffer::new(16);
        assert!(buffer.resize(4, 12).is_ok());
        assert_eq!(buffer.len(), 12);
        assert!(matches!(
            buffer.resize(4, 13),
            Err(BufferError::OutOfBounds { .. })
        ));
        assert!(buffer.resize(usize::MAX, 2).is_err());
    }

    #[test]
    fn test_prepend_and_extend_use_headroom() {
        let mut buffer = Buffer::with_headroom(4, b"data", 2);
        assert_eq!(buffer.start(), 4);
        buffer.prepend(2).unwrap().copy_from_slice(b"hd");
        buffer.extend(2).unwrap().copy_from_slice(b"tl");
        assert_eq!(buffer.bytes(), b"hddatatl");

        assert_eq!(
            buffer.prepend(3).unwrap_err(),
            BufferError::NoFrontRoom {
                needed: 3,
                available: 2
            }
        );
        assert!(buffer.extend(1).is_err());
    }

    #[test]
    fn test_reserve_rear_limits_sources_not_sinks() {
        let mut buffer = Buffer::new(10);
        buffer.reserve_rear(4).unwrap();
        buffer.reset(2).unwrap();
        assert_eq!(buffer.writable().len(), 4);
        assert!(buffer.write(b"abcde").is_err());
        buffer.write(b"abcd").unwrap();

        // The sink still reaches the reserved tail.
        buffer.extend(4).unwrap();
        assert_eq!(buffer.len(), 8);
        assert_eq!(buffer.rear_room(), 0);
    }

    #[test]
    fn test_reads_consume_front() {
        let mut data = vec![7u8];
        data.extend_from_slice(&0x0102u16.to_be_bytes());
        data.extend_from_slice(&42u64.to_be_bytes());
        data.extend_from_slice(b"rest");
        let mut buffer = Buffer::from_slice(&data);

        assert_eq!(buffer.read_u8().unwrap(), 7);
        assert_eq!(buffer.read_u16().unwrap(), 0x0102);
        assert_eq!(buffer.read_u64().unwrap(), 42);
        assert_eq!(buffer.bytes(), b"rest");
        assert!(buffer.read_u64().is_err());
        assert_eq!(buffer.bytes(), b"rest");
    }

    #[test]
    fn test_truncate_and_advance() {
        let mut buffer = Buffer::from_slice(b"abcdef");
        buffer.advance(2).unwrap();
        buffer.truncate(2);
        assert_eq!(buffer.bytes(), b"cd");
        assert!(buffer.advance(3).is_err());
    }

    #[test]
    fn test_pool_reuses_slabs() {
        let pool = BufferPool::new(4);
        let buffer = pool.get(1000);
        assert_eq!(buffer.capacity(), 1000);
        drop(buffer);
        assert_eq!(pool.idle(), 1);

        let again = pool.get(1024);
        assert_eq!(pool.idle(), 0);
        drop(again);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_pool_is_bounded() {
        let pool = BufferPool::new(2);
        let buffers: Vec<_> = (0..5).map(|_| pool.get(100)).collect();
        drop(buffers);
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn test_oversized_requests_unpooled() {
        let pool = BufferPool::new(2);
        drop(pool.get(1 << 20));
        assert_eq!(pool.idle(), 0);
    }
}
