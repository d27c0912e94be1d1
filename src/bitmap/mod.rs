//! Uncompressed bitmap codec.
//!
//! Reads and writes the 24/32-bit uncompressed bitmap layout: a 54-byte
//! little-endian header followed by rows padded to 4-byte boundaries, channel
//! order B, G, R[, A].
//!
//! # Example
//!
//! ```rust,ignore
//! use bmpipe::bitmap::{load_image, save_image};
//! use bmpipe::config::ImageLimits;
//!
//! let image = load_image("input.bmp", &ImageLimits::default())?;
//! println!("{}", image.header);
//! save_image("copy.bmp", &image.header, image.plane.view())?;
//! ```

mod codec;
mod header;
mod pixel;

pub use codec::{
    DecodedImage, decode, decode_into, encode, encode_to_vec, load_image, read_header, save_image,
};
pub use header::{
    FILE_HEADER_LEN, HEADER_LEN, INFO_HEADER_LEN, ImageHeader, MAGIC, Orientation, disk_row_len,
    row_padding,
};
pub use pixel::{Pixel, PixelPlane, PlaneMut, PlaneRef, RowsMut};

/// Structural validity of a header; see [`ImageHeader::validate`].
pub fn validate(header: &ImageHeader) -> bool {
    header.validate()
}
