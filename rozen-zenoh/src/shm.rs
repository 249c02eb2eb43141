//! Shared-memory provider.
//!
//! Built once per context when the session config enables shared memory.
//! Publishers route payloads at or above [`SHM_MESSAGE_SIZE_THRESHOLD`]
//! through it and fall back to the heap with a log when allocation fails.

use rozen_core::{Error, Result};
use zenoh::shm::{GarbageCollect, PosixShmProviderBackend, ShmProvider, ShmProviderBuilder, ZShmMut};
use zenoh::Wait;

/// Bytes of shared memory reserved per context.
pub const SHM_POOL_SIZE: usize = 10 * 1024 * 1024;

/// Minimum serialized size for a payload to go through shared memory.
pub const SHM_MESSAGE_SIZE_THRESHOLD: usize = 2 * 1024;

/// Context-owned shared-memory allocator.
pub struct SharedMemoryProvider {
    provider: ShmProvider<PosixShmProviderBackend>,
}

impl SharedMemoryProvider {
    /// Reserve the context's shared-memory pool.
    pub fn new() -> Result<Self> {
        let provider = ShmProviderBuilder::default_backend(SHM_POOL_SIZE)
            .wait()
            .map_err(|e| Error::Allocation(format!("shm provider: {e}")))?;
        Ok(Self { provider })
    }

    /// Allocate a mutable shared-memory buffer of `len` bytes.
    ///
    /// Exhausted pools are garbage-collected once before giving up.
    pub fn alloc(&self, len: usize) -> Result<ZShmMut> {
        self.provider
            .alloc(len)
            .with_policy::<GarbageCollect>()
            .wait()
            .map_err(|e| Error::Allocation(format!("shm alloc of {len} bytes: {e:?}")))
    }
}
