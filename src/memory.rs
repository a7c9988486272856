//! Pooled byte buffers for channel-owned data, with explicit allocate/release.
//!
//! The channel layer never allocates a `Vec<u8>` directly; every buffer
//! comes from an injected [`MemoryManager`] so that buffer lifetime can be
//! tracked independently of the channel's own bookkeeping (double-free and
//! leak detection in tests, buffer reuse in production).

use std::fmt;

/// A pooled byte buffer. Carries no reference back to its pool — the holder
/// is responsible for handing it back to the `MemoryManager` that produced
/// it via [`MemoryManager::release`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PooledBuffer {
    data: Vec<u8>,
}

impl PooledBuffer {
    fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Consumes the buffer, returning the owned bytes. Used when ownership
    /// transfers to the application (e.g. `poll()` on the sequenced channel)
    /// and the buffer will never be released back to the pool.
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

/// Errors reported by a [`MemoryManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// The pool has no more capacity to satisfy the allocation.
    PoolExhausted { requested: usize },
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::PoolExhausted { requested } => {
                write!(f, "buffer pool exhausted (requested {requested} bytes)")
            }
        }
    }
}

impl std::error::Error for MemoryError {}

/// Pooled byte-buffer allocator, injected into channels.
pub trait MemoryManager {
    /// Allocates a zeroed buffer of exactly `len` bytes.
    fn allocate(&mut self, len: usize) -> Result<PooledBuffer, MemoryError>;

    /// Returns a buffer to the pool. Every `allocate` must be paired with
    /// exactly one `release` (or an explicit `into_vec()` when ownership
    /// transfers outside the pooled-buffer world).
    fn release(&mut self, buffer: PooledBuffer);
}

/// A free-list buffer pool keyed by exact buffer length, with an
/// outstanding-allocation counter for leak/double-free detection in tests.
#[derive(Debug, Default)]
pub struct BufferPool {
    free_by_len: std::collections::HashMap<usize, Vec<Vec<u8>>>,
    outstanding: usize,
    max_pooled_per_len: usize,
}

impl BufferPool {
    pub fn new() -> Self {
        Self {
            free_by_len: std::collections::HashMap::new(),
            outstanding: 0,
            max_pooled_per_len: 64,
        }
    }

    /// Caps how many freed buffers of a given length are retained for reuse
    /// before the rest are simply dropped (bounds unbounded growth of the
    /// free list under bursty, varied-size traffic).
    pub fn with_max_pooled_per_len(mut self, max: usize) -> Self {
        self.max_pooled_per_len = max;
        self
    }

    /// Number of buffers allocated but not yet released. Should be zero
    /// after every channel sharing this pool has been `reset()`.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }
}

impl MemoryManager for BufferPool {
    fn allocate(&mut self, len: usize) -> Result<PooledBuffer, MemoryError> {
        let data = match self.free_by_len.get_mut(&len).and_then(Vec::pop) {
            Some(mut reused) => {
                reused.iter_mut().for_each(|b| *b = 0);
                reused
            }
            None => vec![0u8; len],
        };
        self.outstanding += 1;
        Ok(PooledBuffer::new(data))
    }

    fn release(&mut self, buffer: PooledBuffer) {
        self.outstanding = self.outstanding.saturating_sub(1);
        let data = buffer.into_vec();
        let len = data.len();
        let bucket = self.free_by_len.entry(len).or_default();
        if bucket.len() < self.max_pooled_per_len {
            bucket.push(data);
        }
    }
}
