//! Pool implementation
//!
//! Maintains a thread-safe free list of fixed-size blocks, growing by one
//! slab whenever the list runs dry. Rent and return may happen on arbitrary
//! threads; a block leased on one thread is routinely returned from another
//! (an I/O completion callback, typically).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use super::block::{Block, BlockCore};
use super::slab::{Slab, SlabObserver};
use crate::error::{Error, Result};

fn default_block_stride() -> usize {
    4096
}

fn default_guard_size() -> usize {
    64
}

fn default_blocks_per_slab() -> usize {
    32
}

/// Pool geometry
///
/// The stride is the gap between block start addresses; 4096 matches the
/// page size of most operating systems. The tail `guard_size` bytes of each
/// stride are never handed out, so the CPU prefetcher cannot pull the next
/// block's cache lines while the current one is being filled. 32 blocks per
/// slab gives 128 KiB slabs, large enough that one allocation amortizes many
/// leases.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Gap between block start addresses; must be a power of two
    #[serde(default = "default_block_stride")]
    pub block_stride: usize,
    /// Reserved bytes at the tail of every stride
    #[serde(default = "default_guard_size")]
    pub guard_size: usize,
    /// Number of blocks carved from each slab
    #[serde(default = "default_blocks_per_slab")]
    pub blocks_per_slab: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            block_stride: default_block_stride(),
            guard_size: default_guard_size(),
            blocks_per_slab: default_blocks_per_slab(),
        }
    }
}

impl PoolConfig {
    /// Configuration from environment variables, falling back to defaults
    ///
    /// Recognizes `PHOTONPIPE_BLOCK_STRIDE`, `PHOTONPIPE_GUARD_SIZE` and
    /// `PHOTONPIPE_BLOCKS_PER_SLAB`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            block_stride: std::env::var("PHOTONPIPE_BLOCK_STRIDE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.block_stride),
            guard_size: std::env::var("PHOTONPIPE_GUARD_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.guard_size),
            blocks_per_slab: std::env::var("PHOTONPIPE_BLOCKS_PER_SLAB")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.blocks_per_slab),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_stride == 0 || !self.block_stride.is_power_of_two() {
            return Err(Error::InvalidConfig(format!(
                "block_stride must be a power of two, got {}",
                self.block_stride
            )));
        }
        if self.guard_size >= self.block_stride {
            return Err(Error::InvalidConfig(format!(
                "guard_size {} must be smaller than block_stride {}",
                self.guard_size, self.block_stride
            )));
        }
        if self.blocks_per_slab == 0 {
            return Err(Error::InvalidConfig(
                "blocks_per_slab must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Usable payload bytes per block
    pub fn max_block_len(&self) -> usize {
        self.block_stride - self.guard_size
    }

    /// Total slab length in bytes
    pub fn slab_len(&self) -> usize {
        self.block_stride * self.blocks_per_slab
    }
}

/// Pool statistics snapshot
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PoolStats {
    pub slabs_allocated: u64,
    pub slabs_active: usize,
    pub blocks_free: usize,
    pub blocks_leased: usize,
    pub block_len: usize,
    pub slab_len: usize,
}

pub(crate) struct PoolShared {
    config: PoolConfig,
    /// Blocks currently available for lease. Pushed and popped from
    /// arbitrary threads; the mutex is held only for the queue operation.
    free: Mutex<VecDeque<Arc<BlockCore>>>,
    /// Every pooled slab allocated by this pool. Push-only until disposal.
    slabs: Mutex<Vec<Arc<Slab>>>,
    next_slab_id: AtomicU64,
    slabs_allocated: AtomicU64,
    leased: AtomicUsize,
    disposed: std::sync::atomic::AtomicBool,
    alloc_observer: Mutex<Option<SlabObserver>>,
    dealloc_observer: Mutex<Option<SlabObserver>>,
    self_ref: Weak<PoolShared>,
}

impl PoolShared {
    /// Return path for the last reference of a leased block.
    pub(crate) fn release_block(&self, core: Arc<BlockCore>) {
        self.leased.fetch_sub(1, Ordering::AcqRel);
        if core.slab.is_active() {
            self.free.lock().push_back(core);
        } else {
            // Inactive slab: abandon the block so the backing memory can be
            // reclaimed once the last sibling lease drops.
            trace!(slab_id = core.slab.id(), offset = core.offset, "Abandoning block");
        }
    }
}

/// Allocator managing slabs and the block free list.
///
/// Cloning the handle shares the same pool; components that need buffers
/// take a `Pool` at construction rather than reaching for a global instance.
#[derive(Clone)]
pub struct Pool {
    shared: Arc<PoolShared>,
}

impl Pool {
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;
        let shared = Arc::new_cyclic(|self_ref| PoolShared {
            config,
            free: Mutex::new(VecDeque::new()),
            slabs: Mutex::new(Vec::new()),
            next_slab_id: AtomicU64::new(0),
            slabs_allocated: AtomicU64::new(0),
            leased: AtomicUsize::new(0),
            disposed: std::sync::atomic::AtomicBool::new(false),
            alloc_observer: Mutex::new(None),
            dealloc_observer: Mutex::new(None),
            self_ref: self_ref.clone(),
        });
        Ok(Pool { shared })
    }

    /// Largest size a single `rent` call can satisfy
    pub fn max_block_len(&self) -> usize {
        self.shared.config.max_block_len()
    }

    pub fn config(&self) -> PoolConfig {
        self.shared.config
    }

    /// Lease one block of `size` usable bytes or more.
    ///
    /// Requesting more than [`Pool::max_block_len`] is a caller error, not a
    /// transient condition; it fails deterministically instead of silently
    /// minting an oversized one-off buffer.
    pub fn rent(&self, size: usize) -> Result<Block> {
        if self.shared.disposed.load(Ordering::Acquire) {
            return Err(Error::PoolDisposed);
        }
        let max = self.shared.config.max_block_len();
        if size > max {
            return Err(Error::RequestTooLarge {
                requested: size,
                max,
            });
        }

        if let Some(core) = self.shared.free.lock().pop_front() {
            debug_assert_eq!(core.refs.load(Ordering::Relaxed), 0);
            core.refs.store(1, Ordering::Release);
            self.shared.leased.fetch_add(1, Ordering::AcqRel);
            return Ok(Block::from_core(core));
        }

        // No blocks available - grow the pool
        self.allocate_slab()
    }

    /// Register the observer invoked once per slab allocation. At most one
    /// may be registered; a second registration replaces the first.
    pub fn register_slab_allocation_callback<F>(&self, callback: F)
    where
        F: Fn(super::slab::SlabInfo) + Send + Sync + 'static,
    {
        *self.shared.alloc_observer.lock() = Some(Arc::new(callback));
    }

    /// Register the observer invoked once per slab deallocation, when the
    /// backing memory is actually freed.
    pub fn register_slab_deallocation_callback<F>(&self, callback: F)
    where
        F: Fn(super::slab::SlabInfo) + Send + Sync + 'static,
    {
        *self.shared.dealloc_observer.lock() = Some(Arc::new(callback));
    }

    /// Allocate one slab, pool all of its blocks but the last, and hand the
    /// last block directly to the caller (skipping one free-list round-trip).
    fn allocate_slab(&self) -> Result<Block> {
        let config = &self.shared.config;
        let id = self.shared.next_slab_id.fetch_add(1, Ordering::Relaxed);
        let dealloc = self.shared.dealloc_observer.lock().clone();

        let slab = match Slab::allocate(config.slab_len(), config.block_stride, id, true, dealloc) {
            Some(slab) => Arc::new(slab),
            None => return self.rent_one_off(id),
        };

        self.shared.slabs.lock().push(Arc::clone(&slab));
        self.shared.slabs_allocated.fetch_add(1, Ordering::Relaxed);

        if let Some(observer) = self.shared.alloc_observer.lock().clone() {
            observer(slab.info());
        }

        let block_len = config.max_block_len();
        let mut free = self.shared.free.lock();
        for i in 0..config.blocks_per_slab - 1 {
            free.push_back(Arc::new(BlockCore {
                slab: Arc::clone(&slab),
                offset: i * config.block_stride,
                len: block_len,
                refs: AtomicUsize::new(0),
                pool: self.shared.self_ref.clone(),
            }));
        }
        drop(free);

        debug!(
            slab_id = id,
            blocks = config.blocks_per_slab,
            block_len,
            "Carved slab into blocks"
        );

        // Hand the last carved block to the caller instead of pooling it
        let last = Arc::new(BlockCore {
            slab,
            offset: (config.blocks_per_slab - 1) * config.block_stride,
            len: block_len,
            refs: AtomicUsize::new(1),
            pool: self.shared.self_ref.clone(),
        });
        self.shared.leased.fetch_add(1, Ordering::AcqRel);
        Ok(Block::from_core(last))
    }

    /// Degraded path when the host refuses a full slab: a dedicated
    /// single-block slab, born inactive so the block bypasses pooling and
    /// frees on release. The fixed-size invariant still holds.
    fn rent_one_off(&self, id: u64) -> Result<Block> {
        let config = &self.shared.config;
        let slab = Slab::allocate(config.block_stride, config.block_stride, id, false, None)
            .ok_or(Error::OutOfMemory {
                bytes: config.slab_len(),
            })?;

        info!(slab_id = id, "Slab allocation failed, degrading to one-off block");

        let core = Arc::new(BlockCore {
            slab: Arc::new(slab),
            offset: 0,
            len: config.max_block_len(),
            refs: AtomicUsize::new(1),
            pool: self.shared.self_ref.clone(),
        });
        self.shared.leased.fetch_add(1, Ordering::AcqRel);
        Ok(Block::from_core(core))
    }

    /// Statistics snapshot
    pub fn stats(&self) -> PoolStats {
        let config = &self.shared.config;
        PoolStats {
            slabs_allocated: self.shared.slabs_allocated.load(Ordering::Relaxed),
            slabs_active: self.shared.slabs.lock().len(),
            blocks_free: self.shared.free.lock().len(),
            blocks_leased: self.shared.leased.load(Ordering::Acquire),
            block_len: config.max_block_len(),
            slab_len: config.slab_len(),
        }
    }

    /// Tear the pool down.
    ///
    /// Every slab is marked inactive and unpinned from the slab stack, and
    /// the free list is drained. Slab memory is freed only once the last
    /// outstanding lease drops, so live blocks never lose their backing
    /// storage. Subsequent `rent` calls fail with `PoolDisposed`.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let slabs: Vec<_> = self.shared.slabs.lock().drain(..).collect();
        for slab in &slabs {
            slab.deactivate();
        }
        let freed = self.shared.free.lock().drain(..).count();

        info!(
            slabs = slabs.len(),
            blocks_discarded = freed,
            blocks_leased = self.shared.leased.load(Ordering::Acquire),
            "Disposed pool"
        );
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish()
    }
}
