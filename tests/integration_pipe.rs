//! Integration tests driving the pipe the way transports and parsers do

use bytes::Buf;
use photonpipe::pipe::{Pipe, PipeOptions};
use photonpipe::pool::{Pool, PoolConfig};

/// Small blocks so multi-segment views appear with little data
fn tiny_pool() -> Pool {
    Pool::new(PoolConfig {
        block_stride: 256,
        guard_size: 32,
        blocks_per_slab: 8,
    })
    .expect("valid config")
}

fn no_backpressure() -> PipeOptions {
    PipeOptions {
        minimum_write_capacity: 16,
        pause_writer_threshold: 0,
        resume_writer_threshold: 0,
    }
}

/// A line parser over the reader contract: slice up to the delimiter,
/// consume complete lines, report partial tails as examined so the next
/// read waits for more data. Lines span segment boundaries.
#[tokio::test]
async fn line_parser_over_multi_segment_views() {
    let pool = tiny_pool();
    let (mut writer, mut reader) = Pipe::new(pool.clone(), no_backpressure()).unwrap();
    let block_len = pool.max_block_len();

    // Three lines, the middle one longer than a block
    let long_line = "B".repeat(block_len + 40);
    let payload = format!("alpha\n{long_line}\ngamma\n");
    writer.write(payload.as_bytes()).unwrap();
    writer.flush().await.unwrap();
    writer.complete();

    let mut lines = Vec::new();
    loop {
        let result = reader.read().await.unwrap();
        let mut view = result.buffer.clone();
        let mut consumed = view.start_offset();

        while let Some(line) = view.slice_to(b'\n') {
            lines.push(String::from_utf8(line.to_vec()).unwrap());
            consumed = line.end_offset() + 1;
            view = view.slice_from(line.len() + 1);
        }

        let examined = result.buffer.end_offset();
        let done = result.is_completed;
        drop((result, view));
        reader.consume_examined(consumed, examined);

        if done {
            break;
        }
    }

    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "alpha");
    assert_eq!(lines[1], long_line);
    assert_eq!(lines[2], "gamma");
}

/// A binary parser consumes the view through the `bytes::Buf` trait without
/// assuming single-segment contiguity.
#[tokio::test]
async fn buf_trait_reads_across_segment_boundary() {
    let pool = tiny_pool();
    let (mut writer, mut reader) = Pipe::new(pool.clone(), no_backpressure()).unwrap();

    // Enough little-endian u32 counters to cross one segment boundary
    let count = (pool.max_block_len() / 4 + 8) as u32;
    let mut payload = Vec::new();
    for i in 0..count {
        payload.extend_from_slice(&i.to_le_bytes());
    }
    writer.write(&payload).unwrap();
    writer.flush().await.unwrap();

    let result = reader.read().await.unwrap();
    assert!(!result.buffer.is_single_segment());

    let mut cursor = result.buffer.cursor();
    for expected in 0..count {
        assert_eq!(cursor.get_u32_le(), expected);
    }
    assert_eq!(cursor.remaining(), 0);

    let end = result.buffer.end_offset();
    drop(result);
    reader.consume(end);
}

/// Slices taken from a read view stay valid and zero-copy while the reader
/// keeps making progress behind them.
#[tokio::test]
async fn retained_slice_survives_consume() {
    let pool = tiny_pool();
    let (mut writer, mut reader) = Pipe::new(pool.clone(), no_backpressure()).unwrap();

    writer.write(b"header|body").unwrap();
    writer.flush().await.unwrap();

    let result = reader.read().await.unwrap();
    let header = result.buffer.slice_to(b'|').expect("delimiter");
    let end = result.buffer.end_offset();
    drop(result);

    // Retire everything; the held slice keeps its block alive
    reader.consume(end);
    assert_eq!(header.to_vec(), b"header");

    // Tear the pipe down; the slice alone now pins the block
    writer.complete();
    drop(reader);
    assert_eq!(header.to_vec(), b"header");

    drop(header);
    assert_eq!(pool.stats().blocks_leased, 0);
}

/// Full-duplex-style echo: bytes flow through two pipes sharing one pool,
/// with watermarks engaged, and arrive intact.
#[tokio::test]
async fn echo_through_two_pipes_preserves_bytes() {
    let pool = tiny_pool();
    let options = PipeOptions {
        minimum_write_capacity: 16,
        pause_writer_threshold: 2048,
        resume_writer_threshold: 1024,
    };
    let (mut client_tx, mut server_rx) = Pipe::new(pool.clone(), options).unwrap();
    let (mut server_tx, mut client_rx) = Pipe::new(pool.clone(), options).unwrap();

    const TOTAL: usize = 64 * 1024;

    let client = tokio::spawn(async move {
        let chunk: Vec<u8> = (0..337).map(|i| (i * 7 % 256) as u8).collect();
        let mut sent = 0;
        while sent < TOTAL {
            let n = chunk.len().min(TOTAL - sent);
            client_tx.write(&chunk[..n]).unwrap();
            sent += n;
            client_tx.flush().await.unwrap();
        }
        client_tx.complete();
    });

    let server = tokio::spawn(async move {
        loop {
            let result = server_rx.read().await.unwrap();
            for chunk in result.buffer.segments() {
                server_tx.write(chunk).unwrap();
            }
            server_tx.flush().await.unwrap();
            let end = result.buffer.end_offset();
            let done = result.is_completed;
            drop(result);
            server_rx.consume(end);
            if done {
                break;
            }
        }
        server_tx.complete();
    });

    let mut echoed = Vec::new();
    loop {
        let result = client_rx.read().await.unwrap();
        echoed.extend_from_slice(&result.buffer.to_vec());
        let end = result.buffer.end_offset();
        let done = result.is_completed;
        drop(result);
        client_rx.consume(end);
        if done {
            break;
        }
    }

    client.await.unwrap();
    server.await.unwrap();

    assert_eq!(echoed.len(), TOTAL);
    let expected: Vec<u8> = {
        let chunk: Vec<u8> = (0..337).map(|i| (i * 7 % 256) as u8).collect();
        chunk.iter().cycle().take(TOTAL).copied().collect()
    };
    assert_eq!(echoed, expected);

    // Every block found its way home
    drop(client_rx);
    assert_eq!(pool.stats().blocks_leased, 0);
}
