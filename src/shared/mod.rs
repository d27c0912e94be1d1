//! Cross-process state: the mapped image region and the named gates that
//! sequence access to it.
//!
//! # Example
//!
//! ```rust,ignore
//! use bmpipe::config::PipelineConfig;
//! use bmpipe::shared::{Gates, RegionLayout, SharedImageBuffer};
//!
//! let config = PipelineConfig::default();
//! let region = SharedImageBuffer::attach(&config.region_name, RegionLayout::from_config(&config))?;
//! let gates = Gates::open(&config)?;
//! ```

mod gate;
mod handshake;
mod region;

pub use gate::SyncGate;
pub use handshake::{Attachment, Gates, ReadyGates};
pub use region::{RegionLayout, SharedImageBuffer};
