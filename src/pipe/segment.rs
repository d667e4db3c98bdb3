//! Buffer segments
//!
//! A segment wraps one leased block and places it in the pipe's logical byte
//! stream at a fixed absolute offset. Segments form a singly-linked chain:
//! the writer appends at the tail, the reader retires fully consumed
//! segments at the head.
//!
//! Access discipline: the single writer fills payload bytes at or beyond the
//! committed watermark; readers only dereference bytes below it. Both sides
//! learn the watermark under the pipe's state lock, which provides the
//! ordering between the writer's stores and the reader's loads.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::pool::Block;

pub(crate) struct Segment {
    block: Block,
    /// Absolute stream offset of payload byte 0
    stream_offset: u64,
    next: Mutex<Option<Arc<Segment>>>,
}

impl Segment {
    pub(crate) fn new(block: Block, stream_offset: u64) -> Arc<Segment> {
        Arc::new(Segment {
            block,
            stream_offset,
            next: Mutex::new(None),
        })
    }

    pub(crate) fn stream_offset(&self) -> u64 {
        self.stream_offset
    }

    /// Writable bytes in the backing block
    pub(crate) fn capacity(&self) -> usize {
        self.block.len()
    }

    pub(crate) fn next(&self) -> Option<Arc<Segment>> {
        self.next.lock().clone()
    }

    /// Append `next` after this segment. A segment is linked at most once,
    /// while it is the chain tail.
    pub(crate) fn link_next(&self, next: Arc<Segment>) {
        let mut slot = self.next.lock();
        debug_assert!(slot.is_none(), "segment linked twice");
        *slot = Some(next);
    }

    /// Committed payload bytes in `[from, to)`.
    ///
    /// # Safety
    ///
    /// The caller must guarantee `to` does not exceed the committed
    /// watermark for this segment, i.e. the writer has published those bytes
    /// through a commit that happened-before this call.
    pub(crate) unsafe fn committed_slice(&self, from: usize, to: usize) -> &[u8] {
        debug_assert!(from <= to && to <= self.block.len());
        std::slice::from_raw_parts(self.block.payload_ptr().add(from), to - from)
    }

    /// Writable tail window starting at `from`.
    ///
    /// # Safety
    ///
    /// Only the pipe's single writer may call this, with `from` at or beyond
    /// the committed watermark, while no reader view covers `[from, ..)`.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn writable_slice(&self, from: usize) -> &mut [u8] {
        debug_assert!(from <= self.block.len());
        std::slice::from_raw_parts_mut(self.block.payload_ptr().add(from), self.block.len() - from)
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("stream_offset", &self.stream_offset)
            .field("capacity", &self.capacity())
            .field("linked", &self.next.lock().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Pool, PoolConfig};

    fn rent_block() -> Block {
        let pool = Pool::new(PoolConfig::default()).expect("valid config");
        pool.rent(64).unwrap()
    }

    #[test]
    fn test_segment_chain_links_in_order() {
        let first = Segment::new(rent_block(), 0);
        let cap = first.capacity() as u64;
        let second = Segment::new(rent_block(), cap);

        assert!(first.next().is_none());
        first.link_next(Arc::clone(&second));

        let linked = first.next().expect("linked");
        assert_eq!(linked.stream_offset(), cap);
        assert!(linked.next().is_none());
    }

    #[test]
    fn test_segment_write_then_read_window() {
        let seg = Segment::new(rent_block(), 0);

        // SAFETY: sole writer in this test, reads stay below the written end
        unsafe {
            let dst = seg.writable_slice(0);
            dst[..5].copy_from_slice(b"hello");
            assert_eq!(seg.committed_slice(0, 5), b"hello");
            assert_eq!(seg.committed_slice(1, 4), b"ell");
        }
    }
}
