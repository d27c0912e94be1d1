//! The ready/done gate set of a pipeline run.
//!
//! ```text
//!  Publisher            Blur worker          Enhance worker        Combiner
//!  load image
//!  post ready ───────►  wait ready
//!  post ready ──────────────────────────────► wait ready
//!                       filter rows           filter rows
//!                       post blur_done ──────────────────────────► wait
//!                                             post enhance_done ──► wait
//!                                                                  merge, save
//! ```
//!
//! Every done gate has exactly one consumer. Under [`Handshake::Shared`]
//! the single `image_ready` gate is posted once per worker instead.

use super::gate::SyncGate;
use crate::config::{GateNames, Handshake, PipelineConfig, Stage};
use crate::error::Result;
use std::time::Duration;

/// The ready gate arrangement.
#[derive(Debug)]
pub enum ReadyGates {
    /// One gate per stage.
    Independent {
        /// Triggers the blur worker.
        blur: SyncGate,
        /// Triggers the enhance worker.
        enhance: SyncGate,
    },
    /// One gate for every worker.
    Shared(SyncGate),
}

/// Handles on every gate of a run.
#[derive(Debug)]
pub struct Gates {
    ready: ReadyGates,
    blur_done: SyncGate,
    enhance_done: SyncGate,
    attached: SyncGate,
}

impl Gates {
    /// Create a fresh gate set, all counts at zero.
    ///
    /// Gates left behind by an earlier run under the same names are unlinked
    /// first, so stale posts never leak into this run.
    pub fn create(config: &PipelineConfig) -> Result<Self> {
        Self::unlink(&config.gates)?;
        let names = &config.gates;
        let ready = match config.handshake {
            Handshake::Independent => ReadyGates::Independent {
                blur: SyncGate::create(&names.blur_ready, 0)?,
                enhance: SyncGate::create(&names.enhance_ready, 0)?,
            },
            Handshake::Shared => ReadyGates::Shared(SyncGate::create(&names.image_ready, 0)?),
        };
        let gates = Self {
            ready,
            blur_done: SyncGate::create(&names.blur_done, 0)?,
            enhance_done: SyncGate::create(&names.enhance_done, 0)?,
            attached: SyncGate::create(&names.attached, 0)?,
        };
        tracing::info!("Gates: created {:?} gate set", config.handshake);
        Ok(gates)
    }

    /// Open a gate set created by the publisher.
    pub fn open(config: &PipelineConfig) -> Result<Self> {
        let names = &config.gates;
        let ready = match config.handshake {
            Handshake::Independent => ReadyGates::Independent {
                blur: SyncGate::open(&names.blur_ready)?,
                enhance: SyncGate::open(&names.enhance_ready)?,
            },
            Handshake::Shared => ReadyGates::Shared(SyncGate::open(&names.image_ready)?),
        };
        Ok(Self {
            ready,
            blur_done: SyncGate::open(&names.blur_done)?,
            enhance_done: SyncGate::open(&names.enhance_done)?,
            attached: SyncGate::open(&names.attached)?,
        })
    }

    /// Remove every gate name of a run. Missing gates are ignored.
    pub fn unlink(names: &GateNames) -> Result<()> {
        for name in names.all() {
            SyncGate::unlink(name)?;
        }
        Ok(())
    }

    /// Ready gate a stage's worker waits on.
    pub fn ready(&self, stage: Stage) -> &SyncGate {
        match (&self.ready, stage) {
            (ReadyGates::Shared(gate), _) => gate,
            (ReadyGates::Independent { blur, .. }, Stage::Blur) => blur,
            (ReadyGates::Independent { enhance, .. }, Stage::Enhance) => enhance,
        }
    }

    /// Done gate a stage's worker posts.
    pub fn done(&self, stage: Stage) -> &SyncGate {
        match stage {
            Stage::Blur => &self.blur_done,
            Stage::Enhance => &self.enhance_done,
        }
    }

    /// Gate counting attached peers.
    pub fn attached(&self) -> &SyncGate {
        &self.attached
    }

    /// Post one ready signal per worker.
    pub fn signal_ready(&self) -> Result<()> {
        for stage in Stage::ALL {
            self.ready(stage).signal()?;
        }
        Ok(())
    }

    /// Wait for a stage's done signal, bounded by `timeout`.
    pub fn wait_done(&self, stage: Stage, timeout: Duration) -> Result<()> {
        self.done(stage).wait_timeout(timeout)
    }

    /// Consume ready signals no worker picked up.
    ///
    /// A live worker takes its post as soon as it is made, so leftovers
    /// belong to a worker that was absent. Draining them before loading a new
    /// image keeps a late starter from filtering the region mid-load.
    pub fn drain_ready(&self) -> Result<usize> {
        let drained = match &self.ready {
            ReadyGates::Independent { blur, enhance } => blur.drain()? + enhance.drain()?,
            ReadyGates::Shared(gate) => gate.drain()?,
        };
        if drained > 0 {
            tracing::warn!("Gates: drained {} unclaimed ready signal(s)", drained);
        }
        Ok(drained)
    }

    /// Consume done signals left over from an earlier cycle.
    ///
    /// A worker that overran its timeout still posts when it finishes; that
    /// post must not satisfy the next cycle's wait.
    pub fn drain_done(&self) -> Result<usize> {
        let mut drained = 0;
        for stage in Stage::ALL {
            let stale = self.done(stage).drain()?;
            if stale > 0 {
                tracing::warn!("Gates: drained {} stale {} done signal(s)", stale, stage);
            }
            drained += stale;
        }
        Ok(drained)
    }
}

/// Registration of one peer in the `attached` count.
///
/// Incremented on creation and decremented on drop, so the publisher can
/// tell whether any worker or combiner still maps the region.
///
/// The count only drops when the value is dropped. A peer that dies
/// without unwinding (SIGKILL, `panic = "abort"`) stays counted for the
/// life of the gate, so a publisher waiting for detachment should bound
/// its wait and fall back to a forced teardown.
#[derive(Debug)]
pub struct Attachment {
    gate: SyncGate,
}

impl Attachment {
    /// Register a peer on the run's attachment gate.
    pub fn register(names: &GateNames) -> Result<Self> {
        let gate = SyncGate::open(&names.attached)?;
        gate.signal()?;
        Ok(Self { gate })
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        match self.gate.try_wait() {
            Ok(true) => {}
            Ok(false) => tracing::warn!("Attachment: {} already at zero", self.gate.name()),
            Err(e) => tracing::warn!("Attachment: release of {} failed: {}", self.gate.name(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Lifecycle;
    use crate::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn scoped_config(tag: &str) -> PipelineConfig {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        PipelineConfig::scoped(&format!(
            "bmpipe_hs_{}_{}_{}",
            tag,
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        ))
    }

    #[test]
    fn test_create_then_open() {
        let config = scoped_config("open");
        let publisher = Gates::create(&config).unwrap();
        let worker = Gates::open(&config).unwrap();

        publisher.signal_ready().unwrap();
        assert!(worker.ready(Stage::Blur).try_wait().unwrap());
        assert!(worker.ready(Stage::Enhance).try_wait().unwrap());
        assert!(!worker.ready(Stage::Blur).try_wait().unwrap());

        worker.done(Stage::Enhance).signal().unwrap();
        publisher
            .wait_done(Stage::Enhance, Duration::from_secs(5))
            .unwrap();

        Gates::unlink(&config.gates).unwrap();
    }

    #[test]
    fn test_open_before_create_is_missing() {
        let config = scoped_config("missing");
        assert!(matches!(Gates::open(&config), Err(Error::GateMissing(_))));
    }

    #[test]
    fn test_shared_handshake_posts_per_worker() {
        let config = scoped_config("shared")
            .with_handshake(Handshake::Shared)
            .with_lifecycle(Lifecycle::OneShot);
        let gates = Gates::create(&config).unwrap();
        gates.signal_ready().unwrap();

        assert!(std::ptr::eq(gates.ready(Stage::Blur), gates.ready(Stage::Enhance)));
        assert_eq!(gates.ready(Stage::Blur).value().unwrap(), 2);

        Gates::unlink(&config.gates).unwrap();
    }

    #[test]
    fn test_create_resets_stale_counts() {
        let config = scoped_config("stale");
        {
            let gates = Gates::create(&config).unwrap();
            gates.signal_ready().unwrap();
            gates.done(Stage::Blur).signal().unwrap();
        }
        let gates = Gates::create(&config).unwrap();
        for stage in Stage::ALL {
            assert_eq!(gates.ready(stage).value().unwrap(), 0);
            assert_eq!(gates.done(stage).value().unwrap(), 0);
        }
        Gates::unlink(&config.gates).unwrap();
    }

    #[test]
    fn test_drain_done() {
        let config = scoped_config("drain");
        let gates = Gates::create(&config).unwrap();
        gates.done(Stage::Blur).signal().unwrap();
        gates.done(Stage::Enhance).signal().unwrap();
        gates.done(Stage::Enhance).signal().unwrap();
        assert_eq!(gates.drain_done().unwrap(), 3);
        assert_eq!(gates.drain_done().unwrap(), 0);

        gates.signal_ready().unwrap();
        assert_eq!(gates.drain_ready().unwrap(), 2);
        assert_eq!(gates.ready(Stage::Blur).value().unwrap(), 0);
        Gates::unlink(&config.gates).unwrap();
    }

    #[test]
    fn test_wait_done_times_out() {
        let config = scoped_config("timeout");
        let gates = Gates::create(&config).unwrap();
        let err = gates
            .wait_done(Stage::Blur, Duration::from_millis(50))
            .unwrap_err();
        match err {
            Error::WorkerTimeout { gate, .. } => assert_eq!(gate, config.gates.blur_done),
            other => panic!("unexpected error: {other}"),
        }
        Gates::unlink(&config.gates).unwrap();
    }

    #[test]
    fn test_attachment_counts() {
        let config = scoped_config("attach");
        let gates = Gates::create(&config).unwrap();
        let a = Attachment::register(&config.gates).unwrap();
        let b = Attachment::register(&config.gates).unwrap();
        assert_eq!(gates.attached().value().unwrap(), 2);
        drop(a);
        assert_eq!(gates.attached().value().unwrap(), 1);
        drop(b);
        assert_eq!(gates.attached().value().unwrap(), 0);
        Gates::unlink(&config.gates).unwrap();
    }
}
