//! # One-Shot Pipeline
//!
//! Every role in one process, one thread each: the publisher loads a
//! generated image, both stages filter their half of a single in-place
//! plane, and the publisher merges and saves the result.
//!
//! Run: `cargo run --example one_shot [output.bmp]`

use bmpipe::bitmap::{self, ImageHeader, Pixel, PixelPlane};
use bmpipe::config::{Handshake, Lifecycle, MergePolicy, PipelineConfig, PlaneLayout, Stage};
use bmpipe::error::Result;
use bmpipe::pipeline::{FilterWorker, Publisher};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("bmpipe=debug,warn")
        .init();

    let dir = tempfile::tempdir()?;
    let src = dir.path().join("checker.bmp");
    let dst = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("one_shot.bmp"));

    let (width, height) = (320, 240);
    let image = PixelPlane::from_fn(width, height, |y, x| {
        if (x / 16 + y / 16) % 2 == 0 {
            Pixel::rgb(240, 200, 40)
        } else {
            Pixel::rgb(20, 40, 160)
        }
    });
    bitmap::save_image(&src, &ImageHeader::for_dimensions(width, height, 24)?, image.view())?;

    let config = PipelineConfig::scoped(&format!("bmpipe_demo_{}", std::process::id()))
        .with_layout(PlaneLayout::InPlace)
        .with_handshake(Handshake::Shared)
        .with_lifecycle(Lifecycle::OneShot)
        .with_merge(MergePolicy::row_split())
        .with_worker_threads(2)
        .with_done_timeout(Duration::from_secs(10));

    let mut publisher = Publisher::create(&config)?;

    let workers: Vec<_> = Stage::ALL
        .into_iter()
        .map(|stage| {
            let config = config.clone();
            thread::spawn(move || -> Result<u64> { FilterWorker::connect(&config, stage)?.serve() })
        })
        .collect();

    let outcomes = publisher.run([(src, dst.clone())])?;
    for handle in workers {
        let passes = handle.join().expect("worker thread panicked")?;
        println!("worker finished after {} pass(es)", passes);
    }

    match outcomes.first() {
        Some(outcome) if outcome.is_saved() => println!("Saved {}", dst.display()),
        Some(outcome) => println!("Nothing saved: {:?}", outcome.error()),
        None => println!("No job ran"),
    }

    publisher.teardown(false)
}
