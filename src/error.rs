//! Error types for bmpipe.

use std::time::Duration;
use thiserror::Error;

/// Result type alias using bmpipe's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for bmpipe operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The bitmap header failed a structural check (magic, planes,
    /// compression or bit depth).
    #[error("invalid bitmap: {0}")]
    Format(String),

    /// Image dimensions fall outside the configured limits.
    #[error("image {width}x{height} outside limits {max_width}x{max_height}")]
    Size {
        /// Width from the header.
        width: i64,
        /// Normalized height from the header.
        height: i64,
        /// Configured maximum width.
        max_width: usize,
        /// Configured maximum height.
        max_height: usize,
    },

    /// Fewer bytes than expected were available.
    #[error("truncated bitmap: {context}: expected {expected} bytes, got {actual}")]
    Truncated {
        /// What was being read.
        context: &'static str,
        /// Bytes required.
        expected: usize,
        /// Bytes actually read.
        actual: usize,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An attacher observed a shared region of a different size.
    #[error("shared region {name} is {actual} bytes, expected {expected}")]
    LayoutMismatch {
        /// Region name.
        name: String,
        /// Size implied by the local configuration.
        expected: usize,
        /// Size of the existing region.
        actual: usize,
    },

    /// A stage did not signal completion within its bound.
    #[error("{gate} not signaled within {after:?}")]
    WorkerTimeout {
        /// Name of the gate that was waited on.
        gate: String,
        /// The bound that expired.
        after: Duration,
    },

    /// A named gate does not exist (the publisher has not created it).
    #[error("gate {0} does not exist")]
    GateMissing(String),

    /// Teardown was refused because peers still hold attachments.
    #[error("{0} peer(s) still attached")]
    StillAttached(usize),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// System call error (via rustix).
    #[error("system error: {0}")]
    System(#[from] rustix::io::Errno),
}

impl Error {
    /// Whether the pipeline can skip the current image and keep running.
    ///
    /// Load/save failures and stage timeouts only abort one cycle. Layout,
    /// configuration and system errors leave the pipeline unusable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Format(_)
                | Error::Size { .. }
                | Error::Truncated { .. }
                | Error::Io(_)
                | Error::WorkerTimeout { .. }
        )
    }

    /// Whether this is a stage timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::WorkerTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(Error::Format("bad magic".into()).is_recoverable());
        assert!(
            Error::WorkerTimeout {
                gate: "/blur_done".into(),
                after: Duration::from_secs(1),
            }
            .is_recoverable()
        );
        assert!(
            !Error::LayoutMismatch {
                name: "/region".into(),
                expected: 10,
                actual: 20,
            }
            .is_recoverable()
        );
        assert!(!Error::Config("zero threads".into()).is_recoverable());
    }

    #[test]
    fn test_display_messages() {
        let err = Error::Size {
            width: 4000,
            height: 10,
            max_width: 1920,
            max_height: 1080,
        };
        assert_eq!(err.to_string(), "image 4000x10 outside limits 1920x1080");

        let err = Error::Truncated {
            context: "pixel row",
            expected: 12,
            actual: 5,
        };
        assert!(err.to_string().contains("expected 12 bytes, got 5"));
    }
}
