//! Publisher role: owns the region and gates, loads images, drives cycles.

use super::combiner;
use crate::bitmap::{self, ImageHeader};
use crate::config::{Lifecycle, PipelineConfig};
use crate::error::{Error, Result};
use crate::observability;
use crate::shared::{Gates, RegionLayout, SharedImageBuffer};
use std::path::{Path, PathBuf};

/// What happened to one image.
#[derive(Debug)]
pub enum CycleOutcome {
    /// Both stages finished and the merged image was written.
    Saved(ImageHeader),
    /// The source could not be loaded; no stage was signaled.
    LoadFailed(Error),
    /// A stage missed its done deadline; nothing was written.
    Stale(Error),
    /// The merged image could not be written.
    SaveFailed(Error),
}

impl CycleOutcome {
    /// Whether the output file was written.
    pub fn is_saved(&self) -> bool {
        matches!(self, CycleOutcome::Saved(_))
    }

    /// The error that cut the cycle short, if any.
    pub fn error(&self) -> Option<&Error> {
        match self {
            CycleOutcome::Saved(_) => None,
            CycleOutcome::LoadFailed(e) | CycleOutcome::Stale(e) | CycleOutcome::SaveFailed(e) => {
                Some(e)
            }
        }
    }
}

/// Creator and sole owner of a run's region and gates.
pub struct Publisher {
    config: PipelineConfig,
    region: SharedImageBuffer,
    gates: Gates,
    cycle: u64,
    generation: u64,
}

impl Publisher {
    /// Create the region and a fresh gate set.
    ///
    /// Leftovers of an earlier run under the same names are replaced.
    pub fn create(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        let region =
            SharedImageBuffer::create(&config.region_name, RegionLayout::from_config(config))?;
        let gates = match Gates::create(config) {
            Ok(gates) => gates,
            Err(e) => {
                drop(region);
                if let Err(cleanup) = SharedImageBuffer::destroy(&config.region_name) {
                    tracing::warn!(
                        "Publisher: could not remove {}: {}",
                        config.region_name,
                        cleanup
                    );
                }
                return Err(e);
            }
        };
        tracing::info!(
            "Publisher: ready on {} ({:?}, {:?}, {:?})",
            config.region_name,
            config.layout,
            config.handshake,
            config.lifecycle
        );
        Ok(Self {
            config: config.clone(),
            region,
            gates,
            cycle: 0,
            generation: 0,
        })
    }

    /// The run configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The region this publisher owns.
    pub fn region(&self) -> &SharedImageBuffer {
        &self.region
    }

    /// Cycles started so far.
    pub fn cycles(&self) -> u64 {
        self.cycle
    }

    /// Load `path` into the region and signal every worker.
    ///
    /// Unclaimed ready posts and stale done posts from an earlier cycle are
    /// drained first, and the region's generation is advanced before the
    /// load, so a stage still finishing an earlier image can never complete
    /// this one. Nothing is signaled if the load fails.
    pub fn publish<P: AsRef<Path>>(&mut self, path: P) -> Result<ImageHeader> {
        self.gates.drain_ready()?;
        self.gates.drain_done()?;
        self.generation += 1;
        self.region.set_generation(self.generation);
        // SAFETY: every worker that finished the previous cycle is blocked on
        // its ready gate, and no ready post is outstanding.
        let header = unsafe { self.region.load_image(path)? };
        tracing::debug!("Publisher: {}", header);
        self.gates.signal_ready()?;
        Ok(header)
    }

    /// Publish `src`, act as the combiner, and save the result to `dst`.
    ///
    /// Recoverable failures end the cycle with a [`CycleOutcome`] and leave
    /// the region and gates valid for the next one; anything else is
    /// returned as an error.
    pub fn run_cycle<P: AsRef<Path>, Q: AsRef<Path>>(&mut self, src: P, dst: Q) -> Result<CycleOutcome> {
        self.cycle += 1;
        let cycle = self.cycle;
        let _span = observability::instrument_cycle(self.region.name(), cycle);

        if let Err(e) = self.publish(src.as_ref()) {
            return skip(cycle, e, CycleOutcome::LoadFailed);
        }
        if let Err(e) = combiner::collect(&self.gates, &self.region, self.config.done_timeout) {
            // a post nobody took belongs to an absent worker
            self.gates.drain_ready()?;
            return skip(cycle, e, CycleOutcome::Stale);
        }

        // SAFETY: both done signals for this image observed; no new image
        // loaded since.
        let (header, plane) = unsafe {
            combiner::merge_region(&self.region, self.config.layout, self.config.merge)?
        };
        match bitmap::save_image(dst.as_ref(), &header, plane.view()) {
            Ok(()) => {
                tracing::info!(
                    "Publisher: cycle {} saved {}",
                    cycle,
                    dst.as_ref().display()
                );
                Ok(CycleOutcome::Saved(header))
            }
            Err(e) => skip(cycle, e, CycleOutcome::SaveFailed),
        }
    }

    /// Run one cycle per job, honoring the lifecycle: a one-shot publisher
    /// stops after the first job.
    pub fn run<I>(&mut self, jobs: I) -> Result<Vec<CycleOutcome>>
    where
        I: IntoIterator<Item = (PathBuf, PathBuf)>,
    {
        let mut outcomes = Vec::new();
        for (src, dst) in jobs {
            outcomes.push(self.run_cycle(&src, &dst)?);
            if self.config.lifecycle == Lifecycle::OneShot {
                break;
            }
        }
        Ok(outcomes)
    }

    /// Number of workers and combiners still attached.
    pub fn attached(&self) -> Result<usize> {
        self.gates.attached().value()
    }

    /// Remove the region and every gate name.
    ///
    /// Refuses with [`Error::StillAttached`] while peers are registered,
    /// unless `force` is set. Existing mappings stay valid until dropped.
    pub fn teardown(&self, force: bool) -> Result<()> {
        let attached = self.attached()?;
        if attached > 0 {
            if !force {
                return Err(Error::StillAttached(attached));
            }
            tracing::warn!("Publisher: forcing teardown with {} peer(s) attached", attached);
        }
        SharedImageBuffer::destroy(&self.config.region_name)?;
        Gates::unlink(&self.config.gates)?;
        tracing::info!("Publisher: tore down {}", self.config.region_name);
        Ok(())
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("region", &self.region.name())
            .field("cycle", &self.cycle)
            .finish()
    }
}

fn skip(cycle: u64, error: Error, outcome: fn(Error) -> CycleOutcome) -> Result<CycleOutcome> {
    if !error.is_recoverable() {
        return Err(error);
    }
    observability::trace_cycle_error(cycle, &error);
    Ok(outcome(error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImageLimits;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn scoped_config(tag: &str) -> PipelineConfig {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        PipelineConfig::scoped(&format!(
            "bmpipe_pub_{}_{}_{}",
            tag,
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        ))
        .with_limits(ImageLimits::new(8, 8))
        .with_done_timeout(Duration::from_millis(50))
    }

    #[test]
    fn test_missing_source_is_recoverable() {
        let config = scoped_config("missing");
        let mut publisher = Publisher::create(&config).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let outcome = publisher
            .run_cycle(dir.path().join("nope.bmp"), dir.path().join("out.bmp"))
            .unwrap();
        assert!(matches!(outcome, CycleOutcome::LoadFailed(Error::Io(_))));
        assert!(!dir.path().join("out.bmp").exists());
        assert_eq!(publisher.cycles(), 1);

        publisher.teardown(false).unwrap();
    }

    #[test]
    fn test_no_workers_times_out() {
        let config = scoped_config("stale");
        let mut publisher = Publisher::create(&config).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.bmp");
        let image = bitmap::PixelPlane::filled(4, 4, bitmap::Pixel::rgb(1, 2, 3));
        let header = ImageHeader::for_dimensions(4, 4, 24).unwrap();
        bitmap::save_image(&src, &header, image.view()).unwrap();

        let outcome = publisher.run_cycle(&src, dir.path().join("out.bmp")).unwrap();
        assert!(matches!(outcome, CycleOutcome::Stale(ref e) if e.is_timeout()));
        assert!(!outcome.is_saved());
        assert!(!dir.path().join("out.bmp").exists());

        publisher.teardown(false).unwrap();
    }

    #[test]
    fn test_teardown_refuses_while_attached() {
        let config = scoped_config("attached");
        let publisher = Publisher::create(&config).unwrap();
        let peer = crate::shared::Attachment::register(&config.gates).unwrap();

        assert_eq!(publisher.attached().unwrap(), 1);
        assert!(matches!(publisher.teardown(false), Err(Error::StillAttached(1))));

        drop(peer);
        publisher.teardown(false).unwrap();
        assert!(matches!(
            Gates::open(&config),
            Err(Error::GateMissing(_))
        ));
    }

    #[test]
    fn test_failed_gate_setup_removes_region() {
        let mut config = scoped_config("cleanup");
        config.gates.enhance_done = "/bmpipe_bad\0gate".to_string();

        let err = Publisher::create(&config).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        let reopened = SharedImageBuffer::open(
            &config.region_name,
            RegionLayout::from_config(&config),
        );
        assert!(matches!(reopened, Err(Error::System(e)) if e == rustix::io::Errno::NOENT));
    }

    #[test]
    fn test_generation_advances_per_load() {
        let config = scoped_config("generation");
        let mut publisher = Publisher::create(&config).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.bmp");
        let image = bitmap::PixelPlane::filled(4, 4, bitmap::Pixel::rgb(1, 2, 3));
        let header = ImageHeader::for_dimensions(4, 4, 24).unwrap();
        bitmap::save_image(&src, &header, image.view()).unwrap();

        assert_eq!(publisher.region().generation(), 0);
        publisher.publish(&src).unwrap();
        assert_eq!(publisher.region().generation(), 1);
        publisher.publish(&src).unwrap();
        assert_eq!(publisher.region().generation(), 2);

        publisher.teardown(true).unwrap();
    }

    #[test]
    fn test_peer_that_never_detaches_needs_forced_teardown() {
        let config = scoped_config("leaked");
        let publisher = Publisher::create(&config).unwrap();
        // a peer killed before its attachment is dropped
        std::mem::forget(crate::shared::Attachment::register(&config.gates).unwrap());

        assert!(matches!(publisher.teardown(false), Err(Error::StillAttached(1))));
        assert!(matches!(publisher.teardown(false), Err(Error::StillAttached(1))));
        publisher.teardown(true).unwrap();
        assert!(matches!(Gates::open(&config), Err(Error::GateMissing(_))));
    }

    #[test]
    fn test_forced_teardown() {
        let config = scoped_config("forced");
        let publisher = Publisher::create(&config).unwrap();
        let _peer = crate::shared::Attachment::register(&config.gates).unwrap();
        publisher.teardown(true).unwrap();
    }
}
