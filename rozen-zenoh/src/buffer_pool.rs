//! Process-wide pool of serialization buffers.
//!
//! Publishing serializes each message into a scratch buffer that lives
//! only for the duration of the put. Recycling those buffers through a
//! small pool keeps steady-state publishing allocation-free. The pool
//! holds at most [`POOL_SOFT_CAP`] bytes; buffers beyond the cap fall
//! back to the general allocator and are simply dropped on release.

use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::OnceLock;

/// Soft cap on the total bytes retained by the pool.
pub const POOL_SOFT_CAP: usize = 8 * 1024 * 1024;

struct PoolInner {
    buffers: Vec<Vec<u8>>,
    retained_bytes: usize,
}

/// A bounded free-list of byte buffers.
pub struct BufferPool {
    inner: Mutex<PoolInner>,
    soft_cap: usize,
}

static GLOBAL: OnceLock<BufferPool> = OnceLock::new();

impl BufferPool {
    fn with_cap(soft_cap: usize) -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                buffers: Vec::new(),
                retained_bytes: 0,
            }),
            soft_cap,
        }
    }

    /// The process-wide pool.
    pub fn global() -> &'static BufferPool {
        GLOBAL.get_or_init(|| BufferPool::with_cap(POOL_SOFT_CAP))
    }

    /// Take a zeroed buffer of exactly `len` bytes.
    ///
    /// The buffer returns to the pool when the handle drops, unless that
    /// would push the pool past its soft cap.
    pub fn take(&'static self, len: usize) -> PooledBuffer {
        let recycled = {
            let mut inner = self.inner.lock();
            let picked = inner
                .buffers
                .iter()
                .position(|b| b.capacity() >= len)
                .or_else(|| (!inner.buffers.is_empty()).then_some(0));
            picked.map(|i| {
                let buf = inner.buffers.swap_remove(i);
                inner.retained_bytes -= buf.capacity();
                buf
            })
        };
        let mut buf = recycled.unwrap_or_default();
        buf.clear();
        buf.resize(len, 0);
        PooledBuffer { buf, pool: self }
    }

    fn release(&self, buf: Vec<u8>) {
        let mut inner = self.inner.lock();
        if inner.retained_bytes + buf.capacity() <= self.soft_cap {
            inner.retained_bytes += buf.capacity();
            inner.buffers.push(buf);
        }
    }

    #[cfg(test)]
    fn retained_bytes(&self) -> usize {
        self.inner.lock().retained_bytes
    }
}

/// A buffer borrowed from a [`BufferPool`], released on every exit path
/// by its `Drop` impl.
pub struct PooledBuffer {
    buf: Vec<u8>,
    pool: &'static BufferPool,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buf));
    }
}
