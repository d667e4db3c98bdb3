//! Buffer-Sequence Pipe
//!
//! A logically infinite, physically segmented byte stream built from pooled
//! blocks. One writer appends and commits; one reader observes committed
//! bytes zero-copy and retires what it has consumed. Back-pressure suspends
//! the writer when the unread backlog crosses a high-water mark.
//!
//! # Architecture
//!
//! ```text
//! PipeWriter                              PipeReader
//!   writable()/advance() ─┐                 │ read().await
//!   flush().await         │                 │ consume(offset)
//!            │            ▼                 ▼
//!            │   Segment → Segment → Segment → (tail)
//!            │   [Block]   [Block]   [Block]
//!            │      ▲                   │
//!            │      └── retired ────────┘
//!            ▼              │
//!        back-pressure      └─→ Pool free list
//! ```
//!
//! State machine: Idle → Writing ⇄ Readable → (Draining | Completed |
//! Faulted). Reads proceed concurrently with writes; terminal states accept
//! no new writes and drain remaining buffered data on reads.

pub mod bench;
pub mod buffer;
pub mod pipe;
pub mod reader;
pub mod segment;
pub mod writer;

pub use buffer::{ReadBuffer, ReadCursor};
pub use pipe::{Pipe, PipeOptions, PipeStats};
pub use reader::{PipeReader, ReadCanceller, ReadResult};
pub use writer::{FlushCanceller, FlushResult, PipeWriter};
