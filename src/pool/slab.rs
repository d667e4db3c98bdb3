//! Slab management for the block pool
//!
//! A slab is one large contiguous heap allocation that backs a fixed number
//! of blocks. Slabs are allocated with their alignment equal to the block
//! stride, so every block carved from a slab starts on a stride boundary.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

/// Observer invoked once per slab lifecycle event (allocation or
/// deallocation). Transports use this to register/unregister the slab's base
/// address as a native buffer identifier.
pub type SlabObserver = Arc<dyn Fn(SlabInfo) + Send + Sync>;

/// Snapshot of a slab's identity, handed to lifecycle observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlabInfo {
    /// Slab id, unique within the owning pool
    pub id: u64,
    /// Base address of the backing allocation
    pub base: usize,
    /// Total length of the backing allocation in bytes
    pub len: usize,
}

/// One contiguous backing allocation, subdivided into blocks by the pool.
///
/// The base address never changes for the slab's lifetime. The allocation is
/// freed exactly once, in `Drop`, which only runs after the pool's slab stack
/// entry and every block carved from this slab have released their references.
pub struct Slab {
    ptr: NonNull<u8>,
    layout: Layout,
    id: u64,
    /// Inactive slabs never accept returned blocks; their blocks are
    /// abandoned on release so the backing memory can be reclaimed.
    active: AtomicBool,
    dealloc_observer: Option<SlabObserver>,
}

// The raw pointer is only dereferenced through blocks, each of which owns a
// disjoint window; the pool's hand-off discipline provides the required
// synchronization.
unsafe impl Send for Slab {}
unsafe impl Sync for Slab {}

impl Slab {
    /// Allocate a new slab of `len` bytes aligned to `align`.
    ///
    /// Returns `None` if the host allocator reports exhaustion; the caller
    /// decides whether to propagate or degrade.
    pub(crate) fn allocate(
        len: usize,
        align: usize,
        id: u64,
        active: bool,
        dealloc_observer: Option<SlabObserver>,
    ) -> Option<Slab> {
        debug_assert!(align.is_power_of_two());
        debug_assert!(len > 0 && len % align == 0);

        let layout = Layout::from_size_align(len, align).ok()?;
        // SAFETY: layout has non-zero size, checked above.
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw)?;

        debug!(slab_id = id, base = ptr.as_ptr() as usize, len, "Allocated slab");

        Some(Slab {
            ptr,
            layout,
            id,
            active: AtomicBool::new(active),
            dealloc_observer,
        })
    }

    /// Slab id, unique within the owning pool
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stable base address of the backing allocation
    pub fn base_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Total slab length in bytes
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    /// Whether returned blocks should re-enter the pool
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Mark the slab inactive. Blocks released afterwards are abandoned
    /// instead of re-pooled, letting the allocation drop once the last
    /// outstanding lease goes away.
    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Identity snapshot for lifecycle observers
    pub fn info(&self) -> SlabInfo {
        SlabInfo {
            id: self.id,
            base: self.ptr.as_ptr() as usize,
            len: self.layout.size(),
        }
    }
}

impl fmt::Debug for Slab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slab")
            .field("id", &self.id)
            .field("base", &(self.ptr.as_ptr() as usize))
            .field("len", &self.layout.size())
            .field("active", &self.is_active())
            .finish()
    }
}

impl Drop for Slab {
    fn drop(&mut self) {
        debug!(slab_id = self.id, len = self.layout.size(), "Deallocating slab");
        if let Some(observer) = self.dealloc_observer.take() {
            observer(self.info());
        }
        // SAFETY: ptr was obtained from alloc_zeroed with this exact layout
        // and is freed exactly once, here.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}
