//! Combiner role: wait for both stages, merge their output, save it.

use super::{ORIGINAL_PLANE, output_plane};
use crate::bitmap::{self, ImageHeader, Pixel, PixelPlane, PlaneRef};
use crate::config::{AlphaSource, MergePolicy, PipelineConfig, PlaneLayout, Stage};
use crate::error::{Error, Result};
use crate::observability;
use crate::shared::{Attachment, Gates, RegionLayout, SharedImageBuffer};
use std::path::Path;
use std::time::{Duration, Instant};

/// Merge two stage outputs of equal size into a new plane.
///
/// # Panics
///
/// Panics if the planes differ in size.
pub fn merge(policy: MergePolicy, blurred: PlaneRef<'_>, enhanced: PlaneRef<'_>) -> PixelPlane {
    assert_eq!(
        (blurred.width(), blurred.height()),
        (enhanced.width(), enhanced.height()),
        "stage outputs differ in size"
    );
    let (width, height) = (blurred.width(), blurred.height());

    match policy {
        MergePolicy::RowSplit { split_row } => {
            let split = split_row.unwrap_or(height / 2).min(height);
            PixelPlane::from_fn(width, height, |y, x| {
                if y < split {
                    blurred.get(y, x)
                } else {
                    enhanced.get(y, x)
                }
            })
        }
        MergePolicy::Averaged { alpha } => PixelPlane::from_fn(width, height, |y, x| {
            let a = blurred.get(y, x);
            let b = enhanced.get(y, x);
            let avg = |p: u8, q: u8| ((p as u16 + q as u16) / 2) as u8;
            let alpha = match alpha {
                AlphaSource::Blur => a.alpha,
                AlphaSource::Enhance => b.alpha,
            };
            Pixel::bgra(avg(a.blue, b.blue), avg(a.green, b.green), avg(a.red, b.red), alpha)
        }),
    }
}

/// Wait for every stage's done signal for the image currently in `region`.
///
/// A done post counts only if the stage's generation slot matches the
/// region's generation; posts a stage made for an earlier image are
/// discarded and the wait continues until the stage's deadline. Both gates
/// are waited on even when the first times out, so a late post from the
/// second stage is consumed in this cycle. Returns the first timeout.
pub fn collect(gates: &Gates, region: &SharedImageBuffer, timeout: Duration) -> Result<()> {
    let mut first_error = None;
    for stage in Stage::ALL {
        if let Err(e) = wait_current(gates, region, stage, timeout) {
            if e.is_timeout() {
                observability::trace_stage_timeout(stage, timeout);
            }
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn wait_current(
    gates: &Gates,
    region: &SharedImageBuffer,
    stage: Stage,
    timeout: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let expired = || Error::WorkerTimeout {
            gate: gates.done(stage).name().to_string(),
            after: timeout,
        };
        if remaining.is_zero() {
            return Err(expired());
        }
        match gates.wait_done(stage, remaining) {
            Ok(()) => {}
            Err(e) if e.is_timeout() => return Err(expired()),
            Err(e) => return Err(e),
        }

        let current = region.generation();
        let finished = region.stage_generation(stage);
        if finished == current {
            return Ok(());
        }
        tracing::warn!(
            "Combiner: discarding {} done for image {} (current image {})",
            stage,
            finished,
            current
        );
    }
}

/// Merge the current region contents.
///
/// # Safety
///
/// Every stage's done signal for the current image must have been observed
/// and the publisher must not have loaded a newer image since.
pub unsafe fn merge_region(
    region: &SharedImageBuffer,
    layout: PlaneLayout,
    policy: MergePolicy,
) -> Result<(ImageHeader, PixelPlane)> {
    let (width, height) = region
        .image_dimensions()
        .ok_or_else(|| Error::Format("region holds no valid image".into()))?;
    let header = region.header();

    // SAFETY: no stage writes after posting done (caller's contract).
    let plane = unsafe {
        match layout {
            PlaneLayout::InPlace => region.plane(ORIGINAL_PLANE, width, height).to_plane(),
            PlaneLayout::Separate => merge(
                policy,
                region.plane(output_plane(layout, Stage::Blur), width, height),
                region.plane(output_plane(layout, Stage::Enhance), width, height),
            ),
        }
    };
    Ok((header, plane))
}

/// A standalone combiner process attached to a running pipeline.
///
/// Each run has exactly one combiner role: either this type or
/// [`Publisher::run_cycle`](super::Publisher::run_cycle), never both.
pub struct Combiner {
    config: PipelineConfig,
    region: SharedImageBuffer,
    gates: Gates,
    _attachment: Attachment,
}

impl Combiner {
    /// Attach to the region and gates of a run.
    pub fn connect(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        let gates = Gates::open(config)?;
        let region = SharedImageBuffer::open(&config.region_name, RegionLayout::from_config(config))?;
        let attachment = Attachment::register(&config.gates)?;
        tracing::info!(
            "Combiner: attached to {} ({:?})",
            config.region_name,
            config.merge
        );
        Ok(Self {
            config: config.clone(),
            region,
            gates,
            _attachment: attachment,
        })
    }

    /// Wait for both stages within the configured done timeout.
    pub fn collect(&self) -> Result<()> {
        collect(&self.gates, &self.region, self.config.done_timeout)
    }

    /// Wait for both stages, merge and save to `dest`.
    ///
    /// A timeout skips the save and returns [`Error::WorkerTimeout`]. A
    /// failed save leaves the shared planes untouched.
    pub fn combine<P: AsRef<Path>>(&self, dest: P) -> Result<ImageHeader> {
        self.collect()?;
        // SAFETY: both done signals observed above.
        let (header, plane) =
            unsafe { merge_region(&self.region, self.config.layout, self.config.merge)? };
        bitmap::save_image(dest.as_ref(), &header, plane.view())?;
        tracing::info!("Combiner: saved {}", dest.as_ref().display());
        Ok(header)
    }
}

impl std::fmt::Debug for Combiner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Combiner")
            .field("region", &self.region.name())
            .field("merge", &self.config.merge)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLUE: Pixel = Pixel::bgra(255, 0, 0, 10);
    const RED: Pixel = Pixel::bgra(0, 0, 255, 200);

    #[test]
    fn test_row_split_midpoint() {
        let blurred = PixelPlane::filled(3, 5, BLUE);
        let enhanced = PixelPlane::filled(3, 5, RED);
        let merged = merge(MergePolicy::row_split(), blurred.view(), enhanced.view());

        // split at 5 / 2 = 2
        for y in 0..5 {
            let expected = if y < 2 { BLUE } else { RED };
            assert!(merged.row(y).iter().all(|p| *p == expected), "row {y}");
        }
    }

    #[test]
    fn test_row_split_explicit_row() {
        let blurred = PixelPlane::filled(2, 4, BLUE);
        let enhanced = PixelPlane::filled(2, 4, RED);

        let merged = merge(
            MergePolicy::RowSplit { split_row: Some(3) },
            blurred.view(),
            enhanced.view(),
        );
        assert_eq!(merged.get(2, 0), BLUE);
        assert_eq!(merged.get(3, 0), RED);

        // past the end: everything from Blur
        let merged = merge(
            MergePolicy::RowSplit { split_row: Some(10) },
            blurred.view(),
            enhanced.view(),
        );
        assert_eq!(merged, blurred);
    }

    #[test]
    fn test_averaged() {
        let blurred = PixelPlane::filled(2, 2, Pixel::bgra(10, 21, 255, 1));
        let enhanced = PixelPlane::filled(2, 2, Pixel::bgra(20, 0, 254, 2));

        let merged = merge(MergePolicy::averaged(), blurred.view(), enhanced.view());
        assert_eq!(merged.get(1, 1), Pixel::bgra(15, 10, 254, 1));

        let merged = merge(
            MergePolicy::Averaged {
                alpha: AlphaSource::Enhance,
            },
            blurred.view(),
            enhanced.view(),
        );
        assert_eq!(merged.get(0, 0).alpha, 2);
    }

    #[test]
    #[should_panic(expected = "differ in size")]
    fn test_merge_size_mismatch() {
        let a = PixelPlane::new(2, 2);
        let b = PixelPlane::new(2, 3);
        let _ = merge(MergePolicy::averaged(), a.view(), b.view());
    }
}
