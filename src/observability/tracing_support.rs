//! Tracing spans and events for pipeline cycles.

use crate::config::Stage;
use crate::partition::RowRange;
use std::time::Duration;
use tracing::{Level, Span, span};

/// Create a span for one publish/filter/combine cycle.
///
/// # Example
///
/// ```rust,ignore
/// use bmpipe::observability::span_cycle;
///
/// let span = span_cycle("/bmpipe_shared", 3);
/// let _guard = span.enter();
/// // Cycle here...
/// ```
#[inline]
pub fn span_cycle(region: &str, cycle: u64) -> Span {
    span!(Level::INFO, "cycle", region = %region, cycle = cycle)
}

/// Create a span for one stage's filter pass.
#[inline]
pub fn span_stage(stage: Stage, rows: RowRange) -> Span {
    span!(Level::DEBUG, "stage", stage = %stage, rows = %rows)
}

/// Enter a cycle span.
pub fn instrument_cycle(region: &str, cycle: u64) -> tracing::span::EnteredSpan {
    span_cycle(region, cycle).entered()
}

/// Enter a stage span.
pub fn instrument_stage(stage: Stage, rows: RowRange) -> tracing::span::EnteredSpan {
    span_stage(stage, rows).entered()
}

/// Log a completed filter pass.
#[inline]
pub fn trace_stage_done(stage: Stage, rows: RowRange, elapsed: Duration) {
    tracing::debug!(
        stage = %stage,
        rows = %rows,
        elapsed_us = elapsed.as_micros() as u64,
        "stage done"
    );
}

/// Log a stage that missed its done deadline.
#[inline]
pub fn trace_stage_timeout(stage: Stage, after: Duration) {
    tracing::warn!(
        stage = %stage,
        after_ms = after.as_millis() as u64,
        "stage timed out; output is stale for this cycle"
    );
}

/// Log a cycle-level error that skips the current image.
#[inline]
pub fn trace_cycle_error(cycle: u64, error: &dyn std::error::Error) {
    tracing::error!(cycle = cycle, error = %error, "cycle skipped");
}
