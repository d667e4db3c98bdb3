//! Integration tests for the pool as a transport-facing allocator

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use photonpipe::pool::{Pool, PoolConfig, SlabInfo};

fn pool_of(blocks_per_slab: usize) -> Pool {
    Pool::new(PoolConfig {
        block_stride: 4096,
        guard_size: 64,
        blocks_per_slab,
    })
    .expect("valid config")
}

/// A transport registers every slab base address as a native buffer id and
/// unregisters it on teardown. The pool must report each slab exactly once,
/// before any of its blocks are handed out.
#[test]
fn transport_observes_every_slab_lifecycle() {
    let pool = pool_of(2);

    let registered: Arc<Mutex<Vec<SlabInfo>>> = Arc::new(Mutex::new(Vec::new()));
    let unregistered: Arc<Mutex<Vec<SlabInfo>>> = Arc::new(Mutex::new(Vec::new()));

    let reg = Arc::clone(&registered);
    pool.register_slab_allocation_callback(move |info| {
        reg.lock().unwrap().push(info);
    });
    let unreg = Arc::clone(&unregistered);
    pool.register_slab_deallocation_callback(move |info| {
        unreg.lock().unwrap().push(info);
    });

    // Force two slabs
    let blocks: Vec<_> = (0..3).map(|_| pool.rent(512).unwrap()).collect();

    {
        let seen = registered.lock().unwrap();
        assert_eq!(seen.len(), 2);
        for info in seen.iter() {
            assert_eq!(info.base % 4096, 0);
            assert_eq!(info.len, 2 * 4096);
        }
        // Every block belongs to a registered slab
        for block in &blocks {
            assert!(seen
                .iter()
                .any(|s| block.base_addr() >= s.base && block.base_addr() < s.base + s.len));
        }
    }

    drop(blocks);
    pool.dispose();

    let seen = unregistered.lock().unwrap();
    assert_eq!(seen.len(), 2);
}

/// An I/O completion may return a block from a different thread than the one
/// that leased it, while read references are still live elsewhere.
#[test]
fn cross_thread_return_with_live_read_refs() {
    let pool = pool_of(4);

    let mut block = pool.rent(1024).unwrap();
    block.as_mut_slice()[..4].copy_from_slice(b"wire");
    let in_flight = block.retain();

    let handle = std::thread::spawn(move || {
        // Kernel still holds a reference; the lease drop must not recycle
        drop(block);
    });
    handle.join().unwrap();

    assert_eq!(pool.stats().blocks_free, 3);
    assert_eq!(&in_flight.as_slice()[..4], b"wire");

    drop(in_flight);
    assert_eq!(pool.stats().blocks_free, 4);
    assert_eq!(pool.stats().blocks_leased, 0);
}

#[test]
fn growth_produces_distinct_aligned_blocks() {
    let pool = pool_of(4);

    let blocks: Vec<_> = (0..12).map(|_| pool.rent(256).unwrap()).collect();
    assert_eq!(pool.stats().slabs_allocated, 3);

    let mut addrs: Vec<_> = blocks.iter().map(|b| b.base_addr()).collect();
    addrs.sort_unstable();
    addrs.dedup();
    assert_eq!(addrs.len(), 12, "duplicate block addresses handed out");
    assert!(addrs.iter().all(|a| a % 4096 == 0));
}

/// Dropping every pool handle with a lease outstanding must not invalidate
/// the lease; the slab lives until the block goes away.
#[test]
fn lease_outlives_pool_handle() {
    let freed = Arc::new(AtomicUsize::new(0));

    let mut block = {
        let pool = pool_of(2);
        let counter = Arc::clone(&freed);
        pool.register_slab_deallocation_callback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        pool.rent(128).unwrap()
        // Last pool handle drops here
    };

    block.as_mut_slice()[..7].copy_from_slice(b"orphan!");
    assert_eq!(freed.load(Ordering::SeqCst), 0);
    assert_eq!(&block.as_slice()[..7], b"orphan!");

    drop(block);
    assert_eq!(freed.load(Ordering::SeqCst), 1);
}

#[test]
fn hammer_free_list_from_many_threads() {
    let pool = pool_of(8);
    let mut handles = Vec::new();

    for t in 0..8 {
        let pool = pool.clone();
        handles.push(std::thread::spawn(move || {
            for i in 0..500 {
                let mut block = pool.rent(2048).unwrap();
                let sentinel = (t * 31 + i) as u8;
                block.as_mut_slice()[..32].fill(sentinel);
                assert!(block.as_slice()[..32].iter().all(|&b| b == sentinel));
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = pool.stats();
    assert_eq!(stats.blocks_leased, 0);
    assert_eq!(stats.blocks_free, stats.slabs_allocated as usize * 8);
}
