//! Filter worker role.
//!
//! A worker attaches to a region and gate set created by the publisher,
//! blocks on its stage's ready gate, filters its assigned rows and posts its
//! done gate exactly once per pass.

use super::{ORIGINAL_PLANE, output_plane};
use crate::config::{Lifecycle, PipelineConfig, PlaneLayout, Stage};
use crate::error::{Error, Result};
use crate::filter::{self, Source};
use crate::observability;
use crate::partition::RowRange;
use crate::shared::{Attachment, Gates, RegionLayout, SharedImageBuffer};
use std::time::Instant;

/// Counters for a worker's lifetime.
#[derive(Clone, Debug, Default)]
pub struct WorkerStats {
    /// Completed filter passes.
    pub passes: u64,
    /// Passes that failed before posting done.
    pub errors: u64,
    /// Rows filtered in total.
    pub rows: u64,
}

/// One filter stage attached to a running pipeline.
pub struct FilterWorker {
    stage: Stage,
    config: PipelineConfig,
    region: SharedImageBuffer,
    gates: Gates,
    stats: WorkerStats,
    _attachment: Attachment,
}

impl FilterWorker {
    /// Attach to the region and gates of a run.
    ///
    /// Fails with [`Error::GateMissing`] if the publisher has not created
    /// the gates and with [`Error::LayoutMismatch`] if the region was sized
    /// from a different configuration.
    pub fn connect(config: &PipelineConfig, stage: Stage) -> Result<Self> {
        config.validate()?;
        let gates = Gates::open(config)?;
        let region = SharedImageBuffer::open(&config.region_name, RegionLayout::from_config(config))?;
        let attachment = Attachment::register(&config.gates)?;

        tracing::info!(
            "FilterWorker: {} attached to {} ({:?}, {} thread(s))",
            stage,
            config.region_name,
            config.layout,
            config.worker_threads
        );

        Ok(Self {
            stage,
            config: config.clone(),
            region,
            gates,
            stats: WorkerStats::default(),
            _attachment: attachment,
        })
    }

    /// The stage this worker runs.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Lifetime counters.
    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Rows this worker owns in an image of `height` rows.
    pub fn rows(&self, height: usize) -> RowRange {
        assigned_rows(self.config.layout, self.stage, height)
    }

    /// Block until the publisher signals this stage.
    ///
    /// Bounded by the configured ready timeout, if any.
    pub fn wait_ready(&self) -> Result<()> {
        self.gates.ready(self.stage).wait_for(self.config.ready_timeout)
    }

    /// Filter the current image without touching any gate.
    ///
    /// # Safety
    ///
    /// The caller must have observed this stage's ready signal and not yet
    /// posted its done signal, so that the publisher is not writing the
    /// region and the assigned rows belong to this worker.
    pub unsafe fn process(&self) -> Result<RowRange> {
        let (width, height) = self
            .region
            .image_dimensions()
            .ok_or_else(|| Error::Format("region holds no valid image".into()))?;
        let rows = self.rows(height);
        let _span = observability::instrument_stage(self.stage, rows);
        let started = Instant::now();
        let filter = filter::for_stage(self.stage);
        let border = self.config.border;
        let threads = self.config.worker_threads;

        match self.config.layout {
            PlaneLayout::Separate => {
                // SAFETY: plane 0 is only written by the publisher before it
                // signals ready; the output plane is written by this stage
                // alone (caller's contract).
                let (src, dst) = unsafe {
                    (
                        self.region.plane(ORIGINAL_PLANE, width, height),
                        self.region
                            .rows_mut(output_plane(self.config.layout, self.stage), width, rows),
                    )
                };
                filter::convolve_parallel(filter, Source::new(src), dst, border, threads);
            }
            PlaneLayout::InPlace => {
                // SAFETY: the other stage owns the complementary rows of the
                // same plane; this view covers only our own.
                let dst = unsafe { self.region.rows_mut(ORIGINAL_PLANE, width, rows) };
                let snapshot = dst.to_plane();
                let src = Source::offset(snapshot.view(), rows.start);
                filter::convolve_parallel(filter, src, dst, border, threads);
            }
        }

        observability::trace_stage_done(self.stage, rows, started.elapsed());
        Ok(rows)
    }

    /// Wait for ready, filter, post done.
    ///
    /// Done is posted only after a successful pass; a failed pass leaves the
    /// stage to be reported as timed out by the combiner. Before posting,
    /// the worker records which image it filtered so a combiner can tell a
    /// late post for an earlier image from one for the current image.
    pub fn run_once(&mut self) -> Result<RowRange> {
        self.wait_ready()?;
        let generation = self.region.generation();
        // SAFETY: ready observed above, done not yet posted.
        match unsafe { self.process() } {
            Ok(rows) => {
                self.region.mark_stage_done(self.stage, generation);
                self.gates.done(self.stage).signal()?;
                self.stats.passes += 1;
                self.stats.rows += rows.len() as u64;
                Ok(rows)
            }
            Err(e) => {
                self.stats.errors += 1;
                Err(e)
            }
        }
    }

    /// Serve passes according to the configured lifecycle.
    ///
    /// One-shot workers return after one pass. Persistent workers loop,
    /// skipping passes that fail with a recoverable error, until the ready
    /// wait times out (only possible with a ready timeout configured).
    /// Returns the number of completed passes.
    pub fn serve(&mut self) -> Result<u64> {
        match self.config.lifecycle {
            Lifecycle::OneShot => {
                self.run_once()?;
            }
            Lifecycle::Persistent => loop {
                match self.run_once() {
                    Ok(_) => {}
                    Err(e) if e.is_timeout() => {
                        tracing::info!("FilterWorker: {} idle, stopping", self.stage);
                        break;
                    }
                    Err(e) if e.is_recoverable() => {
                        tracing::warn!("FilterWorker: {} pass failed: {}", self.stage, e);
                    }
                    Err(e) => return Err(e),
                }
            },
        }
        Ok(self.stats.passes)
    }
}

impl std::fmt::Debug for FilterWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterWorker")
            .field("stage", &self.stage)
            .field("region", &self.region.name())
            .field("stats", &self.stats)
            .finish()
    }
}

/// Rows a stage owns for a layout.
///
/// With separate output planes each stage filters the whole image; in place
/// the image is split at `height / 2`, Blur taking the upper half.
pub fn assigned_rows(layout: PlaneLayout, stage: Stage, height: usize) -> RowRange {
    match layout {
        PlaneLayout::Separate => RowRange::full(height),
        PlaneLayout::InPlace => {
            let (upper, lower) = RowRange::full(height).split_at(height / 2);
            match stage {
                Stage::Blur => upper,
                Stage::Enhance => lower,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assigned_rows_separate() {
        for stage in Stage::ALL {
            assert_eq!(assigned_rows(PlaneLayout::Separate, stage, 7), RowRange::full(7));
        }
    }

    #[test]
    fn test_assigned_rows_in_place_disjoint() {
        for height in 1..40 {
            let blur = assigned_rows(PlaneLayout::InPlace, Stage::Blur, height);
            let enhance = assigned_rows(PlaneLayout::InPlace, Stage::Enhance, height);
            assert!(!blur.overlaps(&enhance));
            assert_eq!(blur.start, 0);
            assert_eq!(blur.end, enhance.start);
            assert_eq!(enhance.end, height);
        }
    }

    #[test]
    fn test_connect_without_publisher() {
        let config = PipelineConfig::scoped(&format!("bmpipe_wk_none_{}", std::process::id()));
        let err = FilterWorker::connect(&config, Stage::Blur).unwrap_err();
        assert!(matches!(err, Error::GateMissing(_)));
    }
}
