//! Pipe reader half
//!
//! The reader observes a growing window of committed bytes without copying,
//! and controls retirement: `consume` declares a prefix of the stream done,
//! unlinking fully consumed segments so their blocks can return to the pool.

use std::sync::Arc;

use tracing::trace;

use super::buffer::ReadBuffer;
use super::pipe::{PipeShared, PipeState, PipeStats};
use crate::error::{Error, Result};

/// Outcome of a [`PipeReader::read`] call
#[derive(Debug)]
pub struct ReadResult {
    /// Zero-copy view spanning oldest-unconsumed to the committed end
    pub buffer: ReadBuffer,
    /// The writer has completed cleanly; no more data will arrive
    pub is_completed: bool,
    /// The read was interrupted by [`ReadCanceller::cancel_pending_read`];
    /// the consume cursor has not moved
    pub is_cancelled: bool,
}

/// Consumer half of a pipe. Single logical reader; all operations take
/// `&mut self`.
pub struct PipeReader {
    shared: Arc<PipeShared>,
    finished: bool,
}

impl PipeReader {
    pub(crate) fn new(shared: Arc<PipeShared>) -> Self {
        PipeReader {
            shared,
            finished: false,
        }
    }

    /// Wait until unexamined committed bytes exist, the writer completes, or
    /// a pending-read cancellation fires.
    ///
    /// The returned view spans everything from the oldest unconsumed byte to
    /// the committed end. After a writer `fail`, buffered data is drained
    /// first; the stored reason surfaces as `Error::Faulted` once the stream
    /// is empty. Cancel-safe: dropping the future leaves the cursor unmoved.
    pub async fn read(&mut self) -> Result<ReadResult> {
        loop {
            let notified = {
                let mut state = self.shared.state.lock();
                if let Some(result) = Self::try_read_locked(&mut state)? {
                    return Ok(result);
                }
                self.shared.reader_notify.notified()
            };
            notified.await;
        }
    }

    /// Non-suspending variant of [`PipeReader::read`]: returns `None` when
    /// no progress is possible yet.
    pub fn try_read(&mut self) -> Result<Option<ReadResult>> {
        let mut state = self.shared.state.lock();
        Self::try_read_locked(&mut state)
    }

    fn try_read_locked(state: &mut PipeState) -> Result<Option<ReadResult>> {
        if state.read_cancel {
            state.read_cancel = false;
            return Ok(Some(ReadResult {
                buffer: state.build_view(),
                is_completed: matches!(state.writer_done, Some(None)),
                is_cancelled: true,
            }));
        }

        if state.committed > state.examined {
            return Ok(Some(ReadResult {
                buffer: state.build_view(),
                is_completed: matches!(state.writer_done, Some(None)),
                is_cancelled: false,
            }));
        }

        match &state.writer_done {
            Some(Some(reason)) => {
                if state.committed > state.consumed {
                    // Drain buffered bytes before surfacing the fault
                    Ok(Some(ReadResult {
                        buffer: state.build_view(),
                        is_completed: false,
                        is_cancelled: false,
                    }))
                } else {
                    Err(Error::Faulted(reason.clone()))
                }
            }
            Some(None) => Ok(Some(ReadResult {
                buffer: state.build_view(),
                is_completed: true,
                is_cancelled: false,
            })),
            None => Ok(None),
        }
    }

    /// Declare everything before absolute offset `to` consumed.
    ///
    /// Bytes up to `to` count as examined; bytes a prior
    /// [`PipeReader::consume_examined`] already examined keep that status.
    /// When unexamined committed bytes remain, the next `read` returns
    /// immediately.
    pub fn consume(&mut self, to: u64) {
        let examined = self.shared.state.lock().examined.max(to);
        self.consume_examined(to, examined);
    }

    /// Declare bytes before `to` consumed and bytes before `examined` seen.
    ///
    /// A parser that needs more data before it can make progress passes
    /// `examined` = the committed end; the next `read` then suspends until
    /// the writer commits more instead of spinning on the same bytes.
    ///
    /// # Panics
    ///
    /// Panics when either position moves backwards, when `examined < to`,
    /// when a position runs past the committed end, or when examining
    /// everything would deadlock against a back-pressured writer. All of
    /// these are caller contract violations.
    pub fn consume_examined(&mut self, to: u64, examined: u64) {
        let mut state = self.shared.state.lock();

        if to < state.consumed {
            panic!(
                "consume position moved backwards: {to} < {consumed}",
                consumed = state.consumed
            );
        }
        if examined < to {
            panic!("examined position {examined} precedes consume position {to}");
        }
        if examined < state.examined {
            panic!(
                "examined position moved backwards: {examined} < {prior}",
                prior = state.examined
            );
        }
        if examined > state.committed {
            panic!(
                "examined position {examined} runs past committed end {committed}",
                committed = state.committed
            );
        }

        state.consumed = to;
        state.examined = examined;

        // Retire fully consumed segments. The tail always stays linked: the
        // writer keeps filling it even when the reader has caught up.
        let mut retired = 0usize;
        loop {
            let Some(head) = state.head.clone() else { break };
            let Some(next) = head.next() else { break };
            if next.stream_offset() <= to {
                state.head = Some(next);
                retired += 1;
            } else {
                break;
            }
        }
        if retired > 0 {
            trace!(retired, consumed = to, "Retired consumed segments");
        }

        let pause = self.shared.options.pause_writer_threshold as u64;
        let resume = self.shared.options.resume_writer_threshold as u64;
        let backlog = state.backlog();

        if state.examined == state.committed
            && state.writer_done.is_none()
            && pause > 0
            && backlog >= pause
        {
            // The reader will sleep on the next read and the writer's next
            // flush will pause; nobody is left to wake either side.
            panic!("back-pressure deadlock: all buffered data examined while the writer is paused");
        }

        drop(state);

        if pause == 0 || backlog < resume {
            self.shared.writer_notify.notify_one();
        }
    }

    /// Terminate the consumer side. A back-pressured writer wakes with
    /// `is_completed` set; once both sides are done the segment chain is
    /// torn down and every block heads back to the pool.
    pub fn complete(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        let mut state = self.shared.state.lock();
        state.reader_done = true;
        if state.writer_done.is_some() {
            state.teardown();
        }
        trace!(consumed = state.consumed, "Reader completed");
        drop(state);

        self.shared.writer_notify.notify_one();
    }

    /// Handle for interrupting a pending read from another task.
    pub fn canceller(&self) -> ReadCanceller {
        ReadCanceller {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Statistics snapshot of the underlying pipe
    pub fn stats(&self) -> PipeStats {
        self.shared.stats()
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.finish();
    }
}

impl std::fmt::Debug for PipeReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeReader")
            .field("finished", &self.finished)
            .finish()
    }
}

/// Cancels a pending [`PipeReader::read`] without completing the reader.
#[derive(Clone)]
pub struct ReadCanceller {
    shared: Arc<PipeShared>,
}

impl ReadCanceller {
    /// Wake the pending read (if any) with `is_cancelled` set. The consume
    /// cursor does not move; available data is still delivered.
    pub fn cancel_pending_read(&self) {
        self.shared.state.lock().read_cancel = true;
        self.shared.reader_notify.notify_one();
    }
}
