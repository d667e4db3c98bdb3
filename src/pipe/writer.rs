//! Pipe writer half
//!
//! The writer accumulates bytes into the segment chain: `writable` hands out
//! a contiguous window (leasing a fresh block when the tail runs short),
//! `advance` marks bytes as written, and `flush` commits them to the reader,
//! suspending while the unread backlog sits above the configured high-water
//! mark.

use std::sync::Arc;

use tracing::trace;

use super::pipe::{PipeShared, PipeStats};
use super::segment::Segment;
use crate::error::{Error, Result};

/// Outcome of a [`PipeWriter::flush`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushResult {
    /// The reader side has completed; further writes are pointless
    pub is_completed: bool,
    /// The flush was interrupted by [`FlushCanceller::cancel_pending_flush`];
    /// committed bytes stay committed
    pub is_cancelled: bool,
}

/// Producer half of a pipe. Single logical writer; all operations take
/// `&mut self`.
pub struct PipeWriter {
    shared: Arc<PipeShared>,
    /// Current write segment; also linked into the shared chain
    tail: Option<Arc<Segment>>,
    /// Bytes written into the tail segment (committed + pending)
    tail_written: usize,
    /// Written-but-uncommitted bytes across all segments
    pending: u64,
    finished: bool,
}

impl PipeWriter {
    pub(crate) fn new(shared: Arc<PipeShared>) -> Self {
        PipeWriter {
            shared,
            tail: None,
            tail_written: 0,
            pending: 0,
            finished: false,
        }
    }

    /// Guarantee at least `size_hint` contiguous writable bytes and return
    /// the writable window (which may be larger than the hint).
    ///
    /// A hint of 0 requests the configured default capacity. Hints beyond
    /// the pool's maximum block payload cannot be satisfied contiguously and
    /// fail with `RequestTooLarge`.
    pub fn writable(&mut self, size_hint: usize) -> Result<&mut [u8]> {
        let max = self.shared.pool.max_block_len();
        let hint = if size_hint == 0 {
            self.shared.options.minimum_write_capacity.min(max)
        } else {
            size_hint
        };
        if hint > max {
            return Err(Error::RequestTooLarge {
                requested: hint,
                max,
            });
        }

        let needs_segment = match &self.tail {
            Some(tail) => tail.capacity() - self.tail_written < hint,
            None => true,
        };
        if needs_segment {
            self.push_segment(hint)?;
        }

        let tail = self.tail.as_ref().expect("write tail just ensured");
        // SAFETY: this handle is the pipe's only writer and tail_written is
        // at or beyond the committed watermark; no reader view covers the
        // returned window.
        Ok(unsafe { tail.writable_slice(self.tail_written) })
    }

    /// Lease a fresh block and link it behind the current tail.
    fn push_segment(&mut self, size_hint: usize) -> Result<()> {
        let block = self.shared.pool.rent(size_hint)?;
        let stream_offset = self
            .tail
            .as_ref()
            .map(|t| t.stream_offset() + self.tail_written as u64)
            .unwrap_or(0);
        let segment = Segment::new(block, stream_offset);

        let mut state = self.shared.state.lock();
        if let Some(old_tail) = &self.tail {
            old_tail.link_next(Arc::clone(&segment));
        }
        if state.head.is_none() {
            state.head = Some(Arc::clone(&segment));
        }
        drop(state);

        trace!(stream_offset, "Appended pipe segment");
        self.tail = Some(segment);
        self.tail_written = 0;
        Ok(())
    }

    /// Mark `n` bytes of the window obtained from the last `writable` call
    /// as written. The bytes stay invisible to the reader until `flush`.
    ///
    /// # Panics
    ///
    /// Panics when `n` exceeds the remaining writable window; that is a
    /// contract violation, not a recoverable condition.
    pub fn advance(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        let tail = self
            .tail
            .as_ref()
            .unwrap_or_else(|| panic!("advanced {n} bytes without a writable window"));
        let remaining = tail.capacity() - self.tail_written;
        if n > remaining {
            panic!("advanced {n} bytes past the writable window ({remaining} remaining)");
        }
        self.tail_written += n;
        self.pending += n as u64;
    }

    /// Copy `src` into the stream, splitting across segment boundaries as
    /// needed. The bytes still require a `flush` to become visible.
    pub fn write(&mut self, mut src: &[u8]) -> Result<()> {
        let max = self.shared.pool.max_block_len();
        while !src.is_empty() {
            let want = src.len().min(max);
            let dst = self.writable(want)?;
            let n = dst.len().min(src.len());
            dst[..n].copy_from_slice(&src[..n]);
            self.advance(n);
            src = &src[n..];
        }
        Ok(())
    }

    /// Written-but-uncommitted bytes
    pub fn pending_bytes(&self) -> u64 {
        self.pending
    }

    /// Commit written bytes to the reader and apply back-pressure.
    ///
    /// Suspends while the committed-unread backlog is at or above the pause
    /// threshold, resuming once the reader drains below the resume
    /// threshold. Cancel-safe: dropping the future mid-suspension leaves all
    /// committed bytes committed and no cursor moved.
    pub async fn flush(&mut self) -> Result<FlushResult> {
        self.commit();

        let pause = self.shared.options.pause_writer_threshold as u64;
        let resume = self.shared.options.resume_writer_threshold as u64;
        let mut paused = false;

        loop {
            let notified = {
                let mut state = self.shared.state.lock();
                if state.reader_done {
                    return Ok(FlushResult {
                        is_completed: true,
                        is_cancelled: false,
                    });
                }
                if state.flush_cancel {
                    state.flush_cancel = false;
                    return Ok(FlushResult {
                        is_completed: false,
                        is_cancelled: true,
                    });
                }
                let threshold = if paused { resume } else { pause };
                if pause == 0 || state.backlog() < threshold {
                    return Ok(FlushResult {
                        is_completed: false,
                        is_cancelled: false,
                    });
                }
                paused = true;
                self.shared.writer_notify.notified()
            };
            notified.await;
        }
    }

    /// Publish pending bytes and wake the reader.
    fn commit(&mut self) {
        let mut state = self.shared.state.lock();
        if let Some(tail) = &self.tail {
            state.committed = tail.stream_offset() + self.tail_written as u64;
        }
        self.pending = 0;
        drop(state);
        self.shared.reader_notify.notify_one();
    }

    /// Terminate the stream cleanly. Pending bytes are committed first; the
    /// reader drains whatever is buffered and then observes end-of-stream.
    pub fn complete(mut self) {
        self.finish(None);
    }

    /// Terminate the stream with an error. The reader drains buffered data,
    /// then observes `Error::Faulted` carrying `reason`.
    pub fn fail(mut self, reason: impl Into<String>) {
        self.finish(Some(reason.into()));
    }

    fn finish(&mut self, fault: Option<String>) {
        if self.finished {
            return;
        }
        self.finished = true;

        let mut state = self.shared.state.lock();
        if let Some(tail) = &self.tail {
            state.committed = tail.stream_offset() + self.tail_written as u64;
        }
        self.pending = 0;
        trace!(
            committed = state.committed,
            faulted = fault.is_some(),
            "Writer completed"
        );
        state.writer_done = Some(fault);
        if state.reader_done {
            state.teardown();
        }
        drop(state);

        self.tail = None;
        self.shared.reader_notify.notify_one();
    }

    /// Handle for interrupting a pending flush from another task.
    pub fn canceller(&self) -> FlushCanceller {
        FlushCanceller {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Statistics snapshot of the underlying pipe
    pub fn stats(&self) -> PipeStats {
        self.shared.stats()
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.finish(None);
    }
}

impl std::fmt::Debug for PipeWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeWriter")
            .field("pending", &self.pending)
            .field("finished", &self.finished)
            .finish()
    }
}

/// Cancels a pending [`PipeWriter::flush`] without completing the writer.
#[derive(Clone)]
pub struct FlushCanceller {
    shared: Arc<PipeShared>,
}

impl FlushCanceller {
    /// Wake the pending flush (if any) with `is_cancelled` set. Committed
    /// bytes stay committed; only the suspension is interrupted.
    pub fn cancel_pending_flush(&self) {
        self.shared.state.lock().flush_cancel = true;
        self.shared.writer_notify.notify_one();
    }
}
