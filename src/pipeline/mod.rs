//! The three pipeline roles.
//!
//! - [`Publisher`] creates the region and gates, loads each source image
//!   and signals the workers. It can also act as the combiner
//!   ([`Publisher::run_cycle`]), and it alone tears the run down.
//! - [`FilterWorker`] runs one [`Stage`](crate::config::Stage) over its
//!   assigned rows each time it is signaled.
//! - [`Combiner`] waits for both stages, merges their output with the
//!   configured [`MergePolicy`](crate::config::MergePolicy) and saves it.
//!
//! Each role is normally its own process; all of them must be built from
//! the same [`PipelineConfig`](crate::config::PipelineConfig).
//!
//! # Example
//!
//! ```rust,ignore
//! use bmpipe::prelude::*;
//!
//! // publisher process
//! let config = PipelineConfig::default();
//! let mut publisher = Publisher::create(&config)?;
//!
//! // worker processes
//! let mut blur = FilterWorker::connect(&config, Stage::Blur)?;
//! blur.serve()?;
//!
//! // publisher again
//! let outcome = publisher.run_cycle("input.bmp", "output.bmp")?;
//! publisher.teardown(false)?;
//! ```

mod combiner;
mod publisher;
mod worker;

pub use combiner::{Combiner, collect, merge, merge_region};
pub use publisher::{CycleOutcome, Publisher};
pub use worker::{FilterWorker, WorkerStats, assigned_rows};

use crate::config::{PlaneLayout, Stage};

/// Plane holding the decoded source image.
pub const ORIGINAL_PLANE: usize = 0;

/// Plane a stage writes its output to.
pub fn output_plane(layout: PlaneLayout, stage: Stage) -> usize {
    match (layout, stage) {
        (PlaneLayout::InPlace, _) => ORIGINAL_PLANE,
        (PlaneLayout::Separate, Stage::Blur) => 1,
        (PlaneLayout::Separate, Stage::Enhance) => 2,
    }
}
