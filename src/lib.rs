//! # bmpipe
//!
//! A multi-process bitmap filter pipeline over named shared memory.
//!
//! A publisher decodes an uncompressed bitmap into a fixed-size shared
//! region, two filter workers (box blur and edge enhancement) process it in
//! independent processes, and a combiner merges their output and writes the
//! result. Processes share nothing but the mapped region; named semaphores
//! sequence every access to it.
//!
//! ## Features
//!
//! - **Bitmap codec**: 24/32-bit uncompressed, both row orders, padded rows
//! - **Fixed shared layout**: region size known before any image is loaded
//! - **Gate handshake**: ready/done semaphores, bounded done waits
//! - **Row ownership**: disjoint row ranges instead of locks
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use bmpipe::prelude::*;
//!
//! let config = PipelineConfig::default().with_merge(MergePolicy::row_split());
//! let mut publisher = Publisher::create(&config)?;
//! // start a FilterWorker per stage in other processes, then:
//! match publisher.run_cycle("input.bmp", "output.bmp")? {
//!     CycleOutcome::Saved(header) => println!("saved {header}"),
//!     other => eprintln!("skipped: {other:?}"),
//! }
//! publisher.teardown(false)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod bitmap;
pub mod config;
pub mod error;
pub mod filter;
pub mod observability;
pub mod partition;
pub mod pipeline;
pub mod shared;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::bitmap::{ImageHeader, Pixel, PixelPlane};
    pub use crate::config::{
        BorderPolicy, Handshake, ImageLimits, Lifecycle, MergePolicy, PipelineConfig, PlaneLayout,
        Stage,
    };
    pub use crate::error::{Error, Result};
    pub use crate::pipeline::{Combiner, CycleOutcome, FilterWorker, Publisher};
}

pub use error::{Error, Result};
