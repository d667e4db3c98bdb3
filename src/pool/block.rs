//! Block lease handles and reference counting
//!
//! A block is a fixed-size, fixed-offset window into a slab. The pool hands
//! out exactly one [`Block`] per lease cycle; the holder may mint additional
//! read-only [`BlockRef`]s. The block re-enters the pool's free list when the
//! last reference drops, or is abandoned if its slab went inactive first.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use super::allocator::PoolShared;
use super::slab::Slab;

/// Shared state behind every lease handle for one block window.
///
/// `refs` counts live lease handles: 0 while parked in the free list, 1 when
/// freshly rented, +1 per outstanding [`BlockRef`]. The `Arc` around this
/// struct tracks object identity only; `refs` alone decides when the block
/// returns to the pool.
pub(crate) struct BlockCore {
    pub(crate) slab: Arc<Slab>,
    pub(crate) offset: usize,
    pub(crate) len: usize,
    pub(crate) refs: AtomicUsize,
    pub(crate) pool: Weak<PoolShared>,
}

impl BlockCore {
    pub(crate) fn payload_ptr(&self) -> *mut u8 {
        // SAFETY: offset + len never exceeds the slab allocation; checked at
        // carve time.
        unsafe { self.slab.base_ptr().add(self.offset) }
    }

    /// Decrement the lease count; on the last release, route the block back
    /// to the pool (or abandon it if the slab is inactive).
    ///
    /// Decrementing past zero is a corruption signal and aborts loudly.
    pub(crate) fn release(core: &Arc<BlockCore>) {
        let prev = core.refs.fetch_sub(1, Ordering::AcqRel);
        if prev == 0 {
            // The count just wrapped; some path released a reference it never
            // held. Memory may already be re-leased, so this is fatal.
            panic!("block reference count underflow: released past zero");
        }
        if prev == 1 {
            if let Some(pool) = core.pool.upgrade() {
                pool.release_block(Arc::clone(core));
            }
            // Pool already gone: the core drops with this Arc and the slab
            // reference goes with it.
        }
    }
}

/// Unique lease on one pooled block.
///
/// `Block` is move-only: dropping it releases the lease exactly once, so a
/// double return is unrepresentable. While no [`BlockRef`]s are outstanding
/// the holder has exclusive write access to the payload.
pub struct Block {
    pub(crate) core: Arc<BlockCore>,
}

impl Block {
    pub(crate) fn from_core(core: Arc<BlockCore>) -> Self {
        debug_assert_eq!(core.refs.load(Ordering::Relaxed), 1);
        Block { core }
    }

    /// Payload length in bytes (`stride - guard`, constant for the pool's
    /// lifetime)
    pub fn len(&self) -> usize {
        self.core.len
    }

    pub fn is_empty(&self) -> bool {
        self.core.len == 0
    }

    /// Offset of this block within its slab
    pub fn offset(&self) -> usize {
        self.core.offset
    }

    /// Absolute start address of the payload. Stride-aligned; usable as a
    /// native buffer identifier by transports.
    pub fn base_addr(&self) -> usize {
        self.core.payload_ptr() as usize
    }

    /// Id of the slab backing this block
    pub fn slab_id(&self) -> u64 {
        self.core.slab.id()
    }

    /// Number of live references to this block (this handle included)
    pub fn ref_count(&self) -> usize {
        self.core.refs.load(Ordering::Acquire)
    }

    /// Mint an additional read-only reference to the same block.
    pub fn retain(&self) -> BlockRef {
        self.core.refs.fetch_add(1, Ordering::AcqRel);
        BlockRef {
            core: Arc::clone(&self.core),
        }
    }

    /// Read access to the payload
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the window is valid for the slab's lifetime, which this
        // handle keeps alive; writers require &mut plus ref_count == 1.
        unsafe { std::slice::from_raw_parts(self.core.payload_ptr(), self.core.len) }
    }

    /// Exclusive write access to the payload.
    ///
    /// # Panics
    ///
    /// Panics if read references minted via [`Block::retain`] are still
    /// outstanding; writing while readers observe the payload violates the
    /// lease contract.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let refs = self.core.refs.load(Ordering::Acquire);
        if refs != 1 {
            panic!("exclusive write access requires a sole reference, found {refs}");
        }
        // SAFETY: sole reference checked above, window valid as in as_slice.
        unsafe { std::slice::from_raw_parts_mut(self.core.payload_ptr(), self.core.len) }
    }

    pub(crate) fn payload_ptr(&self) -> *mut u8 {
        self.core.payload_ptr()
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("slab", &self.core.slab.id())
            .field("offset", &self.core.offset)
            .field("len", &self.core.len)
            .field("refs", &self.ref_count())
            .finish()
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        BlockCore::release(&self.core);
    }
}

/// Shared read-only reference to a leased block.
///
/// Clones increment the block's reference count; every clone releases on
/// drop. The block cannot return to the pool while any `BlockRef` lives.
pub struct BlockRef {
    core: Arc<BlockCore>,
}

impl BlockRef {
    pub fn len(&self) -> usize {
        self.core.len
    }

    pub fn is_empty(&self) -> bool {
        self.core.len == 0
    }

    pub fn offset(&self) -> usize {
        self.core.offset
    }

    pub fn base_addr(&self) -> usize {
        self.core.payload_ptr() as usize
    }

    /// Read access to the payload
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: as in Block::as_slice; this handle keeps the slab alive.
        unsafe { std::slice::from_raw_parts(self.core.payload_ptr(), self.core.len) }
    }
}

impl Clone for BlockRef {
    fn clone(&self) -> Self {
        self.core.refs.fetch_add(1, Ordering::AcqRel);
        BlockRef {
            core: Arc::clone(&self.core),
        }
    }
}

impl fmt::Debug for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockRef")
            .field("slab", &self.core.slab.id())
            .field("offset", &self.core.offset)
            .field("len", &self.core.len)
            .finish()
    }
}

impl Drop for BlockRef {
    fn drop(&mut self) {
        BlockCore::release(&self.core);
    }
}

#[cfg(test)]
mod tests {
    use crate::pool::{Pool, PoolConfig};

    fn small_pool() -> Pool {
        Pool::new(PoolConfig {
            block_stride: 4096,
            guard_size: 64,
            blocks_per_slab: 4,
        })
        .expect("valid config")
    }

    #[test]
    fn test_block_capacity_invariant() {
        let pool = small_pool();
        let block = pool.rent(100).unwrap();
        assert_eq!(block.len(), 4096 - 64);
    }

    #[test]
    fn test_retain_release_counts() {
        let pool = small_pool();
        let block = pool.rent(10).unwrap();
        assert_eq!(block.ref_count(), 1);

        let r1 = block.retain();
        let r2 = r1.clone();
        assert_eq!(block.ref_count(), 3);

        drop(r1);
        assert_eq!(block.ref_count(), 2);
        drop(r2);
        assert_eq!(block.ref_count(), 1);
    }

    #[test]
    fn test_block_write_read_roundtrip() {
        let pool = small_pool();
        let mut block = pool.rent(16).unwrap();
        block.as_mut_slice()[..4].copy_from_slice(b"abcd");
        assert_eq!(&block.as_slice()[..4], b"abcd");

        let r = block.retain();
        assert_eq!(&r.as_slice()[..4], b"abcd");
    }

    #[test]
    #[should_panic(expected = "sole reference")]
    fn test_exclusive_write_rejected_while_retained() {
        let pool = small_pool();
        let mut block = pool.rent(16).unwrap();
        let _r = block.retain();
        let _ = block.as_mut_slice();
    }

    #[test]
    fn test_balanced_retain_release_returns_once() {
        let pool = small_pool();
        let block = pool.rent(10).unwrap();
        let free_before = pool.stats().blocks_free;

        // N retain/release pairs, then drop the lease
        let refs: Vec<_> = (0..8).map(|_| block.retain()).collect();
        drop(refs);
        drop(block);

        assert_eq!(pool.stats().blocks_free, free_before + 1);
    }
}
