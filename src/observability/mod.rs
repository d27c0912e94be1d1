//! Tracing instrumentation.
//!
//! The library emits events and spans through `tracing` and never installs a
//! subscriber; binaries and tests choose their own.
//!
//! Spans:
//! - `cycle` per publish/filter/combine round (`region`, `cycle`)
//! - `stage` per filter pass (`stage`, `rows`)
//!
//! ## Example
//!
//! ```rust,ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("bmpipe=debug")
//!     .init();
//! ```

mod tracing_support;

pub use tracing_support::{
    instrument_cycle, instrument_stage, span_cycle, span_stage, trace_cycle_error,
    trace_stage_done, trace_stage_timeout,
};
