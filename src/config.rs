//! Pipeline configuration.
//!
//! Every process taking part in a run (publisher, workers, combiner) must be
//! built from the same [`PipelineConfig`]: the region size is derived from
//! [`ImageLimits`] and [`PlaneLayout`], and the gates are found by the names
//! in [`GateNames`]. A mismatch between attachers surfaces as
//! [`Error::LayoutMismatch`] or [`Error::GateMissing`].
//!
//! # Example
//!
//! ```rust,ignore
//! use bmpipe::config::{PipelineConfig, MergePolicy, BorderPolicy};
//! use std::time::Duration;
//!
//! let config = PipelineConfig::default()
//!     .with_border(BorderPolicy::Clamp)
//!     .with_merge(MergePolicy::averaged())
//!     .with_worker_threads(4)
//!     .with_done_timeout(Duration::from_secs(10));
//! config.validate()?;
//! ```

use crate::error::{Error, Result};
use std::time::Duration;

/// Default name of the shared image region.
pub const DEFAULT_REGION_NAME: &str = "/bmpipe_shared";

/// Default prefix for gate names.
pub const DEFAULT_GATE_PREFIX: &str = "bmpipe";

/// Longest name accepted for a named semaphore or region (NAME_MAX minus the
/// `sem.` prefix glibc adds under `/dev/shm`).
const MAX_NAME_LEN: usize = 251;

/// Dimension bounds for decoded images.
///
/// These size the shared region, so every attacher must agree on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageLimits {
    /// Maximum image width in pixels.
    pub max_width: usize,
    /// Maximum normalized image height in pixels.
    pub max_height: usize,
}

impl ImageLimits {
    /// Create limits with the given maximum dimensions.
    pub const fn new(max_width: usize, max_height: usize) -> Self {
        Self {
            max_width,
            max_height,
        }
    }

    /// Check a width and normalized height against these limits.
    pub fn check(&self, width: i64, height: i64) -> Result<()> {
        let fits = |v: i64, max: usize| v >= 1 && (v as u64) <= max as u64;
        if fits(width, self.max_width) && fits(height, self.max_height) {
            Ok(())
        } else {
            Err(Error::Size {
                width,
                height,
                max_width: self.max_width,
                max_height: self.max_height,
            })
        }
    }

    /// Number of pixels in one reserved plane.
    pub fn plane_pixels(&self) -> usize {
        self.max_width * self.max_height
    }
}

impl Default for ImageLimits {
    fn default() -> Self {
        Self::new(1920, 1080)
    }
}

/// The two filter stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// 3x3 box blur.
    Blur,
    /// Unsharp-mask style edge enhancement.
    Enhance,
}

impl Stage {
    /// Both stages, in signaling order.
    pub const ALL: [Stage; 2] = [Stage::Blur, Stage::Enhance];

    /// Short lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Blur => "blur",
            Stage::Enhance => "enhance",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How pixel planes are arranged in the shared region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaneLayout {
    /// Original, blurred and enhanced planes. Each stage reads the original
    /// plane and writes its own output plane.
    #[default]
    Separate,
    /// A single plane. Each stage filters its own half of the rows in place.
    InPlace,
}

impl PlaneLayout {
    /// Number of reserved planes.
    pub fn plane_count(&self) -> usize {
        match self {
            PlaneLayout::Separate => 3,
            PlaneLayout::InPlace => 1,
        }
    }
}

/// Which gates trigger the workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Handshake {
    /// One ready gate per stage.
    #[default]
    Independent,
    /// A single `image_ready` gate posted once per worker.
    Shared,
}

/// Whether the roles serve one image or loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifecycle {
    /// Process one image, then stop.
    OneShot,
    /// Keep serving images until torn down.
    #[default]
    Persistent,
}

/// What a filter does with pixels whose 3x3 window leaves the readable rows
/// or columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BorderPolicy {
    /// Leave the pixel unmodified (it keeps its source value).
    #[default]
    Skip,
    /// Clamp neighbor coordinates to the nearest readable pixel.
    Clamp,
}

/// Which output plane supplies alpha for an averaged merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlphaSource {
    /// Take alpha from the blurred plane.
    #[default]
    Blur,
    /// Take alpha from the enhanced plane.
    Enhance,
}

/// How the combiner merges the two output planes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Rows above `split_row` from Blur, rows at or below it from Enhance.
    /// `None` splits at half the image height.
    RowSplit {
        /// First row taken from the enhanced plane.
        split_row: Option<usize>,
    },
    /// Per-channel average of both planes.
    Averaged {
        /// Plane that supplies alpha.
        alpha: AlphaSource,
    },
}

impl MergePolicy {
    /// Row split at the image midpoint.
    pub fn row_split() -> Self {
        MergePolicy::RowSplit { split_row: None }
    }

    /// Average with alpha from the blurred plane.
    pub fn averaged() -> Self {
        MergePolicy::Averaged {
            alpha: AlphaSource::Blur,
        }
    }
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self::averaged()
    }
}

/// Names of the process-visible gates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateNames {
    /// Triggers the blur worker ([`Handshake::Independent`]).
    pub blur_ready: String,
    /// Triggers the enhance worker ([`Handshake::Independent`]).
    pub enhance_ready: String,
    /// Triggers every worker ([`Handshake::Shared`]).
    pub image_ready: String,
    /// Posted by the blur worker when its pass is complete.
    pub blur_done: String,
    /// Posted by the enhance worker when its pass is complete.
    pub enhance_done: String,
    /// Counts peers attached to the run.
    pub attached: String,
}

impl GateNames {
    /// Derive a full name set from a prefix (`/<prefix>_blur_ready`, ...).
    pub fn scoped(prefix: &str) -> Self {
        let name = |suffix: &str| format!("/{prefix}_{suffix}");
        Self {
            blur_ready: name("blur_ready"),
            enhance_ready: name("enhance_ready"),
            image_ready: name("image_ready"),
            blur_done: name("blur_done"),
            enhance_done: name("enhance_done"),
            attached: name("attached"),
        }
    }

    /// Ready gate for a stage under the given handshake.
    pub fn ready(&self, stage: Stage, handshake: Handshake) -> &str {
        match (handshake, stage) {
            (Handshake::Shared, _) => &self.image_ready,
            (Handshake::Independent, Stage::Blur) => &self.blur_ready,
            (Handshake::Independent, Stage::Enhance) => &self.enhance_ready,
        }
    }

    /// Done gate for a stage.
    pub fn done(&self, stage: Stage) -> &str {
        match stage {
            Stage::Blur => &self.blur_done,
            Stage::Enhance => &self.enhance_done,
        }
    }

    pub(crate) fn all(&self) -> [&str; 6] {
        [
            &self.blur_ready,
            &self.enhance_ready,
            &self.image_ready,
            &self.blur_done,
            &self.enhance_done,
            &self.attached,
        ]
    }
}

impl Default for GateNames {
    fn default() -> Self {
        Self::scoped(DEFAULT_GATE_PREFIX)
    }
}

/// Configuration shared by every role in a run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Name of the shared image region.
    pub region_name: String,
    /// Gate names.
    pub gates: GateNames,
    /// Dimension bounds (sizes the region).
    pub limits: ImageLimits,
    /// Plane arrangement (sizes the region).
    pub layout: PlaneLayout,
    /// Ready gate arrangement.
    pub handshake: Handshake,
    /// One-shot or persistent roles.
    pub lifecycle: Lifecycle,
    /// Filter border handling.
    pub border: BorderPolicy,
    /// Combiner merge policy.
    pub merge: MergePolicy,
    /// Threads each worker fans out to for its row range.
    pub worker_threads: usize,
    /// Bound on waiting for a stage's done gate.
    pub done_timeout: Duration,
    /// Optional bound on a worker waiting for its ready gate.
    pub ready_timeout: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            region_name: DEFAULT_REGION_NAME.to_string(),
            gates: GateNames::default(),
            limits: ImageLimits::default(),
            layout: PlaneLayout::default(),
            handshake: Handshake::default(),
            lifecycle: Lifecycle::default(),
            border: BorderPolicy::default(),
            merge: MergePolicy::default(),
            worker_threads: 1,
            done_timeout: Duration::from_secs(60),
            ready_timeout: None,
        }
    }
}

impl PipelineConfig {
    /// Config whose region and gate names all derive from `prefix`.
    pub fn scoped(prefix: &str) -> Self {
        Self {
            region_name: format!("/{prefix}_shared"),
            gates: GateNames::scoped(prefix),
            ..Default::default()
        }
    }

    /// Set the image limits.
    pub fn with_limits(mut self, limits: ImageLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the plane layout.
    pub fn with_layout(mut self, layout: PlaneLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Set the handshake variant.
    pub fn with_handshake(mut self, handshake: Handshake) -> Self {
        self.handshake = handshake;
        self
    }

    /// Set the lifecycle.
    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Set the border policy.
    pub fn with_border(mut self, border: BorderPolicy) -> Self {
        self.border = border;
        self
    }

    /// Set the merge policy.
    pub fn with_merge(mut self, merge: MergePolicy) -> Self {
        self.merge = merge;
        self
    }

    /// Set the per-worker thread count.
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Set the done-gate timeout.
    pub fn with_done_timeout(mut self, timeout: Duration) -> Self {
        self.done_timeout = timeout;
        self
    }

    /// Set the ready-gate timeout.
    pub fn with_ready_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Check the configuration for values no role can run with.
    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(Error::Config("worker_threads must be > 0".into()));
        }
        if self.limits.max_width == 0 || self.limits.max_height == 0 {
            return Err(Error::Config("image limits must be non-zero".into()));
        }
        if self.done_timeout.is_zero() {
            return Err(Error::Config("done_timeout must be non-zero".into()));
        }
        // a looping worker could take the other worker's image_ready post
        if self.handshake == Handshake::Shared && self.lifecycle == Lifecycle::Persistent {
            return Err(Error::Config(
                "shared handshake requires a one-shot lifecycle".into(),
            ));
        }
        validate_name(&self.region_name)?;
        for name in self.gates.all() {
            validate_name(name)?;
        }
        Ok(())
    }
}

/// POSIX names for semaphores and shared memory: a leading slash, no other
/// slashes.
fn validate_name(name: &str) -> Result<()> {
    let body = name
        .strip_prefix('/')
        .ok_or_else(|| Error::Config(format!("name {name:?} must start with '/'")))?;
    if body.is_empty() || body.contains('/') {
        return Err(Error::Config(format!(
            "name {name:?} must have exactly one leading '/'"
        )));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::Config(format!("name {name:?} is too long")));
    }
    Ok(())
}
