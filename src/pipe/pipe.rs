//! Pipe assembly and shared state
//!
//! One pipe is a pair of handles over shared state: a [`PipeWriter`] that
//! appends bytes and a [`PipeReader`] that consumes them. All cross-side
//! bookkeeping (commit/consume cursors, completion, cancellation requests)
//! lives behind a single mutex; two notifiers carry the wakeups.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use super::buffer::{ReadBuffer, SegmentView};
use super::reader::PipeReader;
use super::segment::Segment;
use super::writer::PipeWriter;
use crate::error::{Error, Result};
use crate::pool::Pool;

fn default_minimum_write_capacity() -> usize {
    2048
}

fn default_pause_writer_threshold() -> usize {
    65536
}

fn default_resume_writer_threshold() -> usize {
    32768
}

/// Pipe flow-control settings
///
/// The writer's `flush` suspends once committed-but-unread bytes reach
/// `pause_writer_threshold` and resumes when the reader drains below
/// `resume_writer_threshold`. A pause threshold of 0 disables back-pressure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PipeOptions {
    /// Contiguous bytes guaranteed by a zero-hint `writable` call
    #[serde(default = "default_minimum_write_capacity")]
    pub minimum_write_capacity: usize,
    /// Back-pressure high-water mark in bytes (0 disables)
    #[serde(default = "default_pause_writer_threshold")]
    pub pause_writer_threshold: usize,
    /// Back-pressure low-water mark in bytes
    #[serde(default = "default_resume_writer_threshold")]
    pub resume_writer_threshold: usize,
}

impl Default for PipeOptions {
    fn default() -> Self {
        Self {
            minimum_write_capacity: default_minimum_write_capacity(),
            pause_writer_threshold: default_pause_writer_threshold(),
            resume_writer_threshold: default_resume_writer_threshold(),
        }
    }
}

impl PipeOptions {
    /// Options from environment variables, falling back to defaults
    ///
    /// Recognizes `PHOTONPIPE_MINIMUM_WRITE_CAPACITY`,
    /// `PHOTONPIPE_PAUSE_WRITER_THRESHOLD` and
    /// `PHOTONPIPE_RESUME_WRITER_THRESHOLD`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            minimum_write_capacity: std::env::var("PHOTONPIPE_MINIMUM_WRITE_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.minimum_write_capacity),
            pause_writer_threshold: std::env::var("PHOTONPIPE_PAUSE_WRITER_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.pause_writer_threshold),
            resume_writer_threshold: std::env::var("PHOTONPIPE_RESUME_WRITER_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.resume_writer_threshold),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.minimum_write_capacity == 0 {
            return Err(Error::InvalidConfig(
                "minimum_write_capacity must be at least 1".to_string(),
            ));
        }
        if self.pause_writer_threshold > 0 {
            if self.resume_writer_threshold == 0
                || self.resume_writer_threshold > self.pause_writer_threshold
            {
                return Err(Error::InvalidConfig(format!(
                    "resume_writer_threshold {} must be in 1..={}",
                    self.resume_writer_threshold, self.pause_writer_threshold
                )));
            }
        }
        Ok(())
    }
}

/// Pipe statistics snapshot
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PipeStats {
    pub committed: u64,
    pub consumed: u64,
    pub examined: u64,
    pub backlog: u64,
    pub writer_complete: bool,
    pub reader_complete: bool,
}

pub(crate) struct PipeState {
    /// Oldest segment not yet retired; anchors the whole chain through the
    /// `next` links. `None` until the first segment exists.
    pub(crate) head: Option<Arc<Segment>>,
    /// Absolute offset the reader has consumed up to
    pub(crate) consumed: u64,
    /// Absolute offset the reader has examined up to (`>= consumed`)
    pub(crate) examined: u64,
    /// Absolute offset of committed (reader-visible) data
    pub(crate) committed: u64,
    /// `Some(None)` = completed, `Some(Some(reason))` = faulted
    pub(crate) writer_done: Option<Option<String>>,
    pub(crate) reader_done: bool,
    pub(crate) read_cancel: bool,
    pub(crate) flush_cancel: bool,
}

impl PipeState {
    /// Read-only view spanning `[consumed, committed)`.
    ///
    /// Built under the state lock, which orders the writer's payload stores
    /// before the view's reads.
    pub(crate) fn build_view(&self) -> ReadBuffer {
        let mut views = Vec::new();
        let mut cursor = self.head.clone();
        while let Some(seg) = cursor {
            if seg.stream_offset() >= self.committed {
                break;
            }
            let next = seg.next();
            let seg_end = next
                .as_ref()
                .map(|n| n.stream_offset())
                .unwrap_or(self.committed)
                .min(self.committed);
            if seg_end > self.consumed {
                views.push(SegmentView::new(Arc::clone(&seg), seg.stream_offset(), seg_end));
            }
            cursor = next;
        }
        ReadBuffer::new(views, self.consumed, self.committed)
    }

    /// Drop the whole chain; used once both sides are complete.
    pub(crate) fn teardown(&mut self) {
        self.head = None;
    }

    pub(crate) fn backlog(&self) -> u64 {
        self.committed - self.consumed
    }
}

pub(crate) struct PipeShared {
    pub(crate) pool: Pool,
    pub(crate) options: PipeOptions,
    pub(crate) state: Mutex<PipeState>,
    /// Wakes a suspended `read` (commit, completion or cancellation)
    pub(crate) reader_notify: Notify,
    /// Wakes a suspended `flush` (drain below low water, completion or
    /// cancellation)
    pub(crate) writer_notify: Notify,
}

impl PipeShared {
    pub(crate) fn stats(&self) -> PipeStats {
        let state = self.state.lock();
        PipeStats {
            committed: state.committed,
            consumed: state.consumed,
            examined: state.examined,
            backlog: state.backlog(),
            writer_complete: state.writer_done.is_some(),
            reader_complete: state.reader_done,
        }
    }
}

/// A single-producer/single-consumer byte pipe over pooled blocks.
pub struct Pipe;

impl Pipe {
    /// Create a pipe backed by `pool`, returning its writer and reader
    /// halves. The pool is injected explicitly; components never reach for a
    /// process-wide instance.
    pub fn new(pool: Pool, options: PipeOptions) -> Result<(PipeWriter, PipeReader)> {
        options.validate()?;
        let shared = Arc::new(PipeShared {
            pool,
            options,
            state: Mutex::new(PipeState {
                head: None,
                consumed: 0,
                examined: 0,
                committed: 0,
                writer_done: None,
                reader_done: false,
                read_cancel: false,
                flush_cancel: false,
            }),
            reader_notify: Notify::new(),
            writer_notify: Notify::new(),
        });
        Ok((
            PipeWriter::new(Arc::clone(&shared)),
            PipeReader::new(shared),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_validate() {
        assert!(PipeOptions::default().validate().is_ok());
    }

    #[test]
    fn test_resume_above_pause_rejected() {
        let options = PipeOptions {
            minimum_write_capacity: 2048,
            pause_writer_threshold: 1024,
            resume_writer_threshold: 2048,
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_zero_pause_disables_watermark_validation() {
        let options = PipeOptions {
            minimum_write_capacity: 1,
            pause_writer_threshold: 0,
            resume_writer_threshold: 0,
        };
        assert!(options.validate().is_ok());
    }
}
