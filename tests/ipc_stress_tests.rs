//! Stress tests for the gates and the shared region.
//!
//! These tests exercise the handshake and the row-partitioned region under
//! many back-to-back cycles to verify ordering and isolation.

use bmpipe::bitmap::Pixel;
use bmpipe::config::{ImageLimits, PipelineConfig, Stage};
use bmpipe::partition::{RowRange, partition};
use bmpipe::shared::{Gates, RegionLayout, SharedImageBuffer, SyncGate};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

fn unique(tag: &str) -> String {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    format!(
        "bmpipe_st_{}_{}_{}",
        tag,
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

// ============================================================================
// Gate Stress Tests
// ============================================================================

/// Ping-pong between two gate handles for many rounds.
#[test]
fn test_gate_ping_pong() {
    let ping = format!("/{}", unique("ping"));
    let pong = format!("/{}", unique("pong"));
    let a = SyncGate::create(&ping, 0).unwrap();
    let b = SyncGate::create(&pong, 0).unwrap();
    let rounds = 2_000;

    let peer = {
        let (ping, pong) = (ping.clone(), pong.clone());
        thread::spawn(move || {
            let ping = SyncGate::open(&ping).unwrap();
            let pong = SyncGate::open(&pong).unwrap();
            for _ in 0..rounds {
                ping.wait().unwrap();
                pong.signal().unwrap();
            }
        })
    };

    let start = Instant::now();
    for _ in 0..rounds {
        a.signal().unwrap();
        b.wait_timeout(Duration::from_secs(10)).unwrap();
    }
    peer.join().unwrap();
    println!("{} round trips in {:?}", rounds, start.elapsed());

    assert_eq!(a.value().unwrap(), 0);
    assert_eq!(b.value().unwrap(), 0);
    SyncGate::unlink(&ping).unwrap();
    SyncGate::unlink(&pong).unwrap();
}

/// Many producers, one consumer: no post is lost.
#[test]
fn test_gate_counts_concurrent_posts() {
    let name = format!("/{}", unique("count"));
    let gate = Arc::new(SyncGate::create(&name, 0).unwrap());
    let producers = 8;
    let posts = 500;

    let handles: Vec<_> = (0..producers)
        .map(|_| {
            let name = name.clone();
            thread::spawn(move || {
                let gate = SyncGate::open(&name).unwrap();
                for _ in 0..posts {
                    gate.signal().unwrap();
                }
            })
        })
        .collect();

    for _ in 0..producers * posts {
        gate.wait_timeout(Duration::from_secs(10)).unwrap();
    }
    for h in handles {
        h.join().unwrap();
    }
    assert!(!gate.try_wait().unwrap());
    SyncGate::unlink(&name).unwrap();
}

/// The full ready/done sequence for many cycles: each stage sees exactly
/// one ready per cycle and the consumer exactly one done per stage.
#[test]
fn test_handshake_cycles_are_ordered() {
    let config = PipelineConfig::scoped(&unique("cycles"));
    let publisher = Gates::create(&config).unwrap();
    let cycles = 300u64;
    let progress: Arc<[AtomicU64; 2]> = Arc::new([AtomicU64::new(0), AtomicU64::new(0)]);

    let workers: Vec<_> = Stage::ALL
        .iter()
        .enumerate()
        .map(|(i, &stage)| {
            let config = config.clone();
            let progress = Arc::clone(&progress);
            thread::spawn(move || {
                let gates = Gates::open(&config).unwrap();
                for _ in 0..cycles {
                    gates.ready(stage).wait().unwrap();
                    progress[i].fetch_add(1, Ordering::SeqCst);
                    gates.done(stage).signal().unwrap();
                }
            })
        })
        .collect();

    for cycle in 1..=cycles {
        publisher.signal_ready().unwrap();
        for stage in Stage::ALL {
            publisher.wait_done(stage, Duration::from_secs(10)).unwrap();
        }
        // no stage can run ahead: it needs the next ready post
        for counter in progress.iter() {
            assert_eq!(counter.load(Ordering::SeqCst), cycle);
        }
    }

    for h in workers {
        h.join().unwrap();
    }
    assert_eq!(publisher.drain_done().unwrap(), 0);
    Gates::unlink(&config.gates).unwrap();
}

// ============================================================================
// Region Stress Tests
// ============================================================================

/// Writers on disjoint row ranges of one plane, each through its own
/// mapping, never disturb each other's rows.
#[test]
fn test_disjoint_row_writers() {
    let name = format!("/{}", unique("rows"));
    let layout = RegionLayout::new(ImageLimits::new(64, 96), 1);
    let region = SharedImageBuffer::create(&name, layout).unwrap();
    let (width, height) = (50, 96);
    let writers = 6;
    let rounds = 50;

    let handles: Vec<_> = partition(height, writers)
        .into_iter()
        .enumerate()
        .map(|(id, rows)| {
            let name = name.clone();
            thread::spawn(move || {
                let mapping = SharedImageBuffer::open(&name, layout).unwrap();
                for round in 0..rounds {
                    // SAFETY: `rows` belongs to this writer alone.
                    let mut view = unsafe { mapping.rows_mut(0, width, rows) };
                    for y in rows.as_range() {
                        view.row_mut(y)
                            .fill(Pixel::bgra(id as u8, round as u8, y as u8, 255));
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    // SAFETY: every writer has been joined.
    let plane = unsafe { region.plane(0, width, height) };
    for (id, rows) in partition(height, writers).into_iter().enumerate() {
        for y in rows.as_range() {
            let expected = Pixel::bgra(id as u8, (rounds - 1) as u8, y as u8, 255);
            assert!(plane.row(y).iter().all(|p| *p == expected), "row {y}");
        }
    }
    // columns past the image width were never written
    // SAFETY: as above.
    let storage = unsafe { region.rows_mut(0, 64, RowRange::new(0, 1)) };
    assert_eq!(storage.row(0)[width..], [Pixel::default(); 14]);

    drop(region);
    SharedImageBuffer::destroy(&name).unwrap();
}
