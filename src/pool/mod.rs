//! Slab/Block Memory Pool
//!
//! Provides short-lived fixed-size byte buffers with minimal allocation
//! overhead. Memory is obtained in large stride-aligned slabs, carved into
//! fixed-size blocks, and recycled through a thread-safe free list.
//!
//! # Architecture
//!
//! ```text
//! Pool
//!   ├─→ Slab #0 (128 KiB, stride-aligned)
//!   │     ├─→ Block(offset=0)      ← leased
//!   │     ├─→ Block(offset=4096)   ← free list
//!   │     └─→ ...
//!   ├─→ Slab #1
//!   │     └─→ ...
//!   └─→ Free list: [Block, Block, ...]
//!
//! Lifecycle:
//!   rent() ─→ Block (unique lease) ─→ retain() ─→ BlockRef (shared, read-only)
//!     ↑                 │                             │
//!     └──── free list ←─┴──── last reference drops ───┘
//! ```
//!
//! Every block's start address is stride-aligned, so downstream transports
//! can use block addresses directly as native buffer identifiers. The tail
//! `guard_size` bytes of every stride are never handed out; they keep the
//! hardware prefetcher from pulling a neighbouring block into cache.

pub mod allocator;
pub mod block;
pub mod slab;

pub use allocator::{Pool, PoolConfig, PoolStats};
pub use block::{Block, BlockRef};
pub use slab::SlabInfo;
