//! # Pipeline Roles
//!
//! Each role of the filter pipeline as its own process, attached to the
//! default region and gate names.
//!
//! ```text
//! [publisher] ──ready──► [blur]    ──blur_done────► [publisher as combiner]
//!             ──ready──► [enhance] ──enhance_done─►
//! ```
//!
//! Start the publisher first, then one process per stage:
//!
//! ```text
//! cargo run --example pipeline_roles -- publisher in1.bmp out1.bmp in2.bmp out2.bmp
//! cargo run --example pipeline_roles -- blur
//! cargo run --example pipeline_roles -- enhance
//! ```
//!
//! Workers stop after 30 seconds without a new image. The publisher waits
//! up to 45 seconds for them to detach, then removes the region anyway.

use bmpipe::config::{PipelineConfig, Stage};
use bmpipe::error::{Error, Result};
use bmpipe::pipeline::{CycleOutcome, FilterWorker, Publisher};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

/// How long the publisher waits for workers to detach before forcing
/// teardown. Longer than the workers' ready timeout.
const DETACH_GRACE: Duration = Duration::from_secs(45);

const USAGE: &str = "usage: pipeline_roles publisher <src> <dst> [<src> <dst> ...] | blur | enhance";

fn config() -> PipelineConfig {
    PipelineConfig::default()
        .with_worker_threads(4)
        .with_done_timeout(Duration::from_secs(10))
        .with_ready_timeout(Some(Duration::from_secs(30)))
}

fn publisher(args: &[String]) -> Result<()> {
    if args.is_empty() || args.len() % 2 != 0 {
        return Err(Error::Config(USAGE.into()));
    }
    let jobs: Vec<(PathBuf, PathBuf)> = args
        .chunks(2)
        .map(|pair| (PathBuf::from(&pair[0]), PathBuf::from(&pair[1])))
        .collect();

    let config = config();
    let mut publisher = Publisher::create(&config)?;
    println!("Region {} ready; start the blur and enhance roles", config.region_name);

    // give the workers a chance to attach before the first ready post
    let deadline = Instant::now() + Duration::from_secs(30);
    while publisher.attached()? < Stage::ALL.len() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(100));
    }

    for (i, outcome) in publisher.run(jobs)?.into_iter().enumerate() {
        match outcome {
            CycleOutcome::Saved(header) => println!("image {}: saved {}", i + 1, header),
            other => println!("image {}: skipped ({:?})", i + 1, other.error()),
        }
    }

    println!("Waiting for workers to detach...");
    let deadline = Instant::now() + DETACH_GRACE;
    loop {
        match publisher.teardown(false) {
            Err(Error::StillAttached(n)) if Instant::now() < deadline => {
                tracing::debug!("{} peer(s) still attached", n);
                thread::sleep(Duration::from_millis(500));
            }
            // a worker that died without detaching never releases its count
            Err(Error::StillAttached(n)) => {
                println!("{} peer(s) never detached; removing the region anyway", n);
                return publisher.teardown(true);
            }
            result => return result,
        }
    }
}

fn worker(stage: Stage) -> Result<()> {
    let mut worker = FilterWorker::connect(&config(), stage)?;
    let passes = worker.serve()?;
    println!("{}: {} pass(es), {:?}", stage, passes, worker.stats());
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("bmpipe=info,warn")
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("publisher") => publisher(&args[1..]),
        Some("blur") => worker(Stage::Blur),
        Some("enhance") => worker(Stage::Enhance),
        _ => Err(Error::Config(USAGE.into())),
    }
}
