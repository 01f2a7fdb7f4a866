use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tracing::{debug, trace};

use crate::buffers::fixed_buffer::FixedBuf;

/// Pool of packet-sized buffers.
///
/// Besides avoiding per-packet allocation, the pool is where the transport's
///  allocation-failure semantics live: `max_outstanding` bounds the number of
///  buffers alive at once, and `get` reports exhaustion instead of allocating
///  past it. Callers translate that into the appropriate send error.
pub struct PacketPool {
    buf_size: usize,
    buffers: Mutex<Vec<FixedBuf>>,
    outstanding: AtomicUsize,
    max_outstanding: usize,
}

impl PacketPool {
    pub fn new(buf_size: usize, max_pool_size: usize, max_outstanding: usize) -> PacketPool {
        PacketPool {
            buf_size,
            buffers: Mutex::new(Vec::with_capacity(max_pool_size)),
            outstanding: AtomicUsize::new(0),
            max_outstanding,
        }
    }

    pub fn buf_size(&self) -> usize {
        self.buf_size
    }

    /// Number of buffers currently handed out.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }

    /// Take a buffer from the pool, or `None` when the outstanding limit is
    ///  reached.
    pub fn get(&self) -> Option<FixedBuf> {
        let claimed = self
            .outstanding
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |outstanding| {
                (outstanding < self.max_outstanding).then_some(outstanding + 1)
            });
        if claimed.is_err() {
            debug!("packet pool exhausted: {} buffers outstanding", self.max_outstanding);
            return None;
        }

        {
            let mut buffers = self.buffers.lock().unwrap();
            if let Some(buffer) = buffers.pop() {
                trace!("returning buffer from pool");
                return Some(buffer);
            }
        }

        trace!("no buffer in pool: creating new buffer");
        Some(FixedBuf::new(self.buf_size))
    }

    pub fn put(&self, mut buffer: FixedBuf) {
        assert_eq!(buffer.capacity(), self.buf_size,
                   "returned buffer does not have the regular capacity of {} bytes, maybe it came from a different pool"
                   , self.buf_size);

        buffer.clear();
        self.outstanding.fetch_sub(1, Ordering::Relaxed);

        let mut buffers = self.buffers.lock().unwrap();
        if buffers.capacity() > buffers.len() {
            trace!("returning buffer to pool");
            buffers.push(buffer);
        } else {
            debug!("pool is full: discarding returned buffer");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    #[test]
    fn test_recycled_buffers_are_clear() {
        let pool = PacketPool::new(10, 10, usize::MAX);

        let mut buf = pool.get().unwrap();
        buf.put_u8(1);
        pool.put(buf);

        assert!(pool.get().unwrap().is_empty());
    }

    #[test]
    fn test_outstanding_limit() {
        let pool = PacketPool::new(10, 10, 2);

        let a = pool.get().unwrap();
        let _b = pool.get().unwrap();
        assert!(pool.get().is_none());
        assert_eq!(pool.outstanding(), 2);

        pool.put(a);
        assert_eq!(pool.outstanding(), 1);
        assert!(pool.get().is_some());
    }

    #[test]
    fn test_pool_full_discards() {
        let pool = PacketPool::new(10, 1, usize::MAX);

        let a = pool.get().unwrap();
        let b = pool.get().unwrap();
        pool.put(a);
        pool.put(b);

        // both buffers were accounted as returned even though only one was
        // retained
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    #[should_panic]
    fn test_foreign_buffer_rejected() {
        let pool = PacketPool::new(10, 10, usize::MAX);
        pool.put(FixedBuf::new(20));
    }
}
