//! Zero-copy read views
//!
//! A [`ReadBuffer`] is a read-only window over the pipe's segment chain,
//! addressed by absolute stream offsets. Slicing produces a narrower view
//! over the same blocks; nothing is copied until the caller explicitly asks
//! for `to_vec`. Views keep their segments (and therefore blocks) alive
//! until dropped, so a parser can hold on to a slice across await points
//! without racing segment retirement.

use std::sync::Arc;

use bytes::Buf;

use super::segment::Segment;

/// One segment's committed extent within a view
#[derive(Clone)]
pub(crate) struct SegmentView {
    seg: Arc<Segment>,
    abs_start: u64,
    abs_end: u64,
}

impl SegmentView {
    pub(crate) fn new(seg: Arc<Segment>, abs_start: u64, abs_end: u64) -> Self {
        SegmentView {
            seg,
            abs_start,
            abs_end,
        }
    }
}

/// Read-only, possibly multi-segment view of committed stream bytes.
#[derive(Clone)]
pub struct ReadBuffer {
    views: Vec<SegmentView>,
    start: u64,
    end: u64,
}

impl ReadBuffer {
    pub(crate) fn new(views: Vec<SegmentView>, start: u64, end: u64) -> Self {
        debug_assert!(start <= end);
        ReadBuffer { views, start, end }
    }

    /// Absolute stream offset of the first byte in the view
    pub fn start_offset(&self) -> u64 {
        self.start
    }

    /// Absolute stream offset one past the last byte in the view. Passing
    /// this to `PipeReader::consume` retires everything the view covers.
    pub fn end_offset(&self) -> u64 {
        self.end
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// The view's bytes, one slice per underlying segment.
    pub fn segments(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.views.iter().filter_map(move |v| {
            let a = v.abs_start.max(self.start);
            let b = v.abs_end.min(self.end);
            if b > a {
                let from = (a - v.seg.stream_offset()) as usize;
                let to = (b - v.seg.stream_offset()) as usize;
                // SAFETY: the view was built under the pipe state lock after
                // the covered bytes were committed; the Arc keeps the
                // segment (and its block) alive.
                Some(unsafe { v.seg.committed_slice(from, to) })
            } else {
                None
            }
        })
    }

    /// First contiguous run of bytes (empty when the view is empty)
    pub fn first(&self) -> &[u8] {
        self.segments().next().unwrap_or(&[])
    }

    /// Whether the whole view is one contiguous run
    pub fn is_single_segment(&self) -> bool {
        self.segments().take(2).count() <= 1
    }

    /// Narrow the view to `len` bytes starting `start` bytes in. Shares the
    /// same blocks; no memory moves.
    ///
    /// # Panics
    ///
    /// Panics when the requested range falls outside the view.
    pub fn slice(&self, start: u64, len: u64) -> ReadBuffer {
        let abs_from = self.start + start;
        let abs_to = abs_from + len;
        if abs_to > self.end {
            panic!(
                "slice {start}..{} out of bounds for view of {}",
                start + len,
                self.len()
            );
        }
        let views = self
            .views
            .iter()
            .filter(|v| v.abs_end > abs_from && v.abs_start < abs_to)
            .cloned()
            .collect();
        ReadBuffer {
            views,
            start: abs_from,
            end: abs_to,
        }
    }

    /// Narrow the view to everything from `start` bytes in
    pub fn slice_from(&self, start: u64) -> ReadBuffer {
        self.slice(start, self.len() - start)
    }

    /// Absolute offset of the first occurrence of `byte`, scanning across
    /// segment boundaries
    pub fn position_of(&self, byte: u8) -> Option<u64> {
        let mut abs = self.start;
        for chunk in self.segments() {
            if let Some(i) = chunk.iter().position(|&b| b == byte) {
                return Some(abs + i as u64);
            }
            abs += chunk.len() as u64;
        }
        None
    }

    /// View of everything before the first occurrence of `byte` (the
    /// delimiter excluded), or `None` when the delimiter is absent
    pub fn slice_to(&self, byte: u8) -> Option<ReadBuffer> {
        let pos = self.position_of(byte)?;
        Some(self.slice(0, pos - self.start))
    }

    /// Copy the view into a freshly allocated vector
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len() as usize);
        for chunk in self.segments() {
            out.extend_from_slice(chunk);
        }
        out
    }

    /// `bytes::Buf` adapter over the view, for consumers written against the
    /// ecosystem trait
    pub fn cursor(&self) -> ReadCursor<'_> {
        ReadCursor {
            buf: self,
            view_idx: 0,
            pos: self.start,
        }
    }
}

impl std::fmt::Debug for ReadBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadBuffer")
            .field("start", &self.start)
            .field("end", &self.end)
            .field("segments", &self.views.len())
            .finish()
    }
}

/// Consuming cursor over a [`ReadBuffer`], implementing [`bytes::Buf`].
pub struct ReadCursor<'a> {
    buf: &'a ReadBuffer,
    view_idx: usize,
    pos: u64,
}

impl Buf for ReadCursor<'_> {
    fn remaining(&self) -> usize {
        (self.buf.end - self.pos) as usize
    }

    fn chunk(&self) -> &[u8] {
        for v in &self.buf.views[self.view_idx..] {
            let a = v.abs_start.max(self.pos);
            let b = v.abs_end.min(self.buf.end);
            if b > a && a == self.pos {
                let from = (a - v.seg.stream_offset()) as usize;
                let to = (b - v.seg.stream_offset()) as usize;
                // SAFETY: as in ReadBuffer::segments
                return unsafe { v.seg.committed_slice(from, to) };
            }
        }
        &[]
    }

    fn advance(&mut self, cnt: usize) {
        let target = self.pos + cnt as u64;
        if target > self.buf.end {
            panic!(
                "advanced cursor {cnt} bytes with only {} remaining",
                self.remaining()
            );
        }
        self.pos = target;
        while self.view_idx < self.buf.views.len()
            && self.buf.views[self.view_idx].abs_end.min(self.buf.end) <= self.pos
        {
            self.view_idx += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Pool, PoolConfig};

    /// Hand-build a two-segment view: "hello " in one block, "world!" in the
    /// next.
    fn two_segment_view() -> ReadBuffer {
        let pool = Pool::new(PoolConfig::default()).expect("valid config");

        let first = Segment::new(pool.rent(16).unwrap(), 0);
        // SAFETY: test is the sole writer; reads stay below the written end
        unsafe { first.writable_slice(0)[..6].copy_from_slice(b"hello ") };

        let second = Segment::new(pool.rent(16).unwrap(), 6);
        unsafe { second.writable_slice(0)[..6].copy_from_slice(b"world!") };
        first.link_next(Arc::clone(&second));

        ReadBuffer::new(
            vec![
                SegmentView::new(first, 0, 6),
                SegmentView::new(second, 6, 12),
            ],
            0,
            12,
        )
    }

    #[test]
    fn test_view_spans_segments() {
        let view = two_segment_view();
        assert_eq!(view.len(), 12);
        assert!(!view.is_single_segment());
        assert_eq!(view.first(), b"hello ");
        assert_eq!(view.to_vec(), b"hello world!");
    }

    #[test]
    fn test_slice_shares_blocks() {
        let view = two_segment_view();

        let slice = view.slice(3, 6);
        assert_eq!(slice.to_vec(), b"lo wor");

        // Zero-copy: the slice reads the very same memory as the original
        let orig_ptr = view.segments().next().unwrap().as_ptr();
        let slice_ptr = slice.segments().next().unwrap().as_ptr();
        assert_eq!(unsafe { orig_ptr.add(3) }, slice_ptr);
    }

    #[test]
    fn test_slice_within_single_segment() {
        let view = two_segment_view();
        let slice = view.slice(0, 5);
        assert!(slice.is_single_segment());
        assert_eq!(slice.to_vec(), b"hello");
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_slice_out_of_bounds_panics() {
        let view = two_segment_view();
        let _ = view.slice(4, 20);
    }

    #[test]
    fn test_delimiter_scan_crosses_segments() {
        let view = two_segment_view();

        // 'w' lives in the second segment
        assert_eq!(view.position_of(b'w'), Some(6));
        assert_eq!(view.position_of(b'!'), Some(11));
        assert_eq!(view.position_of(b'?'), None);

        let line = view.slice_to(b'!').expect("delimiter present");
        assert_eq!(line.to_vec(), b"hello world");
    }

    #[test]
    fn test_delimiter_scan_respects_slice_start() {
        let view = two_segment_view();

        // "hello world!" sliced from offset 7 starts at the second 'o'
        let tail = view.slice_from(7);
        assert_eq!(tail.position_of(b'o'), Some(7));
        assert_eq!(tail.position_of(b'r'), Some(8));
        assert_eq!(tail.position_of(b'h'), None);
    }

    #[test]
    fn test_buf_cursor_walks_segments() {
        let view = two_segment_view();
        let mut cursor = view.cursor();

        assert_eq!(cursor.remaining(), 12);
        assert_eq!(cursor.chunk(), b"hello ");

        cursor.advance(6);
        assert_eq!(cursor.chunk(), b"world!");

        cursor.advance(5);
        assert_eq!(cursor.remaining(), 1);
        assert_eq!(cursor.chunk(), b"!");

        cursor.advance(1);
        assert_eq!(cursor.remaining(), 0);
        assert_eq!(cursor.chunk(), b"");
    }

    #[test]
    fn test_empty_view() {
        let view = ReadBuffer::new(Vec::new(), 42, 42);
        assert!(view.is_empty());
        assert_eq!(view.first(), b"");
        assert!(view.is_single_segment());
        assert_eq!(view.to_vec(), Vec::<u8>::new());
    }
}
