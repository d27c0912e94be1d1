//! The 54-byte bitmap header.
//!
//! ```text
//! offset  size  field
//!  0      2     magic "BM"
//!  2      4     file size
//!  6      2     reserved1
//!  8      2     reserved2
//! 10      4     pixel data offset
//! 14      4     info header size
//! 18      4     width            (i32)
//! 22      4     height           (i32, > 0 bottom-up, < 0 top-down)
//! 26      2     planes           (must be 1)
//! 28      2     bits per pixel   (24 or 32)
//! 30      4     compression      (must be 0)
//! 34      4     image data size
//! 38      4     x resolution     (i32)
//! 42      4     y resolution     (i32)
//! 46      4     colors used
//! 50      4     important colors
//! ```
//!
//! All fields are little-endian.

use crate::error::{Error, Result};

/// `"BM"` read as a little-endian u16.
pub const MAGIC: u16 = u16::from_le_bytes(*b"BM");

/// Length of the file header.
pub const FILE_HEADER_LEN: usize = 14;

/// Length of the info header this codec reads and writes.
pub const INFO_HEADER_LEN: usize = 40;

/// Total serialized header length.
pub const HEADER_LEN: usize = FILE_HEADER_LEN + INFO_HEADER_LEN;

/// Row order on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    /// First stored row is the bottom of the image (positive height).
    #[default]
    BottomUp,
    /// First stored row is the top of the image (negative height).
    TopDown,
}

impl Orientation {
    /// In-memory row for the `disk_row`-th stored row of an image with
    /// `height` rows. Memory is always top-to-bottom.
    #[inline]
    pub fn memory_row(&self, disk_row: usize, height: usize) -> usize {
        match self {
            Orientation::BottomUp => height - 1 - disk_row,
            Orientation::TopDown => disk_row,
        }
    }
}

/// Bitmap file + info header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageHeader {
    /// Magic tag, [`MAGIC`] for valid files.
    pub magic: u16,
    /// Total file size in bytes.
    pub file_size: u32,
    /// Reserved.
    pub reserved1: u16,
    /// Reserved.
    pub reserved2: u16,
    /// Offset of the pixel data from the start of the file.
    pub data_offset: u32,
    /// Size of the info header.
    pub header_size: u32,
    /// Width in pixels.
    pub width: i32,
    /// Height in pixels; the sign encodes row order.
    pub height: i32,
    /// Color planes, must be 1.
    pub planes: u16,
    /// Bits per pixel, 24 or 32.
    pub bit_depth: u16,
    /// Compression code, must be 0.
    pub compression: u32,
    /// Size of the raw pixel data.
    pub image_size: u32,
    /// Horizontal resolution, pixels per meter.
    pub x_resolution: i32,
    /// Vertical resolution, pixels per meter.
    pub y_resolution: i32,
    /// Palette entries used.
    pub colors_used: u32,
    /// Important palette entries.
    pub important_colors: u32,
}

impl ImageHeader {
    /// Build a valid bottom-up header for a `width` x `height` image.
    ///
    /// Size fields are computed from the dimensions and row padding.
    pub fn for_dimensions(width: usize, height: usize, bit_depth: u16) -> Result<Self> {
        if bit_depth != 24 && bit_depth != 32 {
            return Err(Error::Format(format!("unsupported bit depth {bit_depth}")));
        }
        let (w, h) = match (i32::try_from(width), i32::try_from(height)) {
            (Ok(w), Ok(h)) if w > 0 && h > 0 => (w, h),
            _ => {
                return Err(Error::Size {
                    width: width as i64,
                    height: height as i64,
                    max_width: i32::MAX as usize,
                    max_height: i32::MAX as usize,
                });
            }
        };

        let image_size = disk_row_len(width, bit_depth as usize / 8) * height;
        let image_size = u32::try_from(image_size)
            .map_err(|_| Error::Format("image data exceeds 4 GiB".into()))?;

        Ok(Self {
            magic: MAGIC,
            file_size: HEADER_LEN as u32 + image_size,
            reserved1: 0,
            reserved2: 0,
            data_offset: HEADER_LEN as u32,
            header_size: INFO_HEADER_LEN as u32,
            width: w,
            height: h,
            planes: 1,
            bit_depth,
            compression: 0,
            image_size,
            // 72 DPI
            x_resolution: 2835,
            y_resolution: 2835,
            colors_used: 0,
            important_colors: 0,
        })
    }

    /// Parse a header from its serialized form.
    pub fn from_bytes(b: &[u8; HEADER_LEN]) -> Self {
        let u16_at = |o: usize| u16::from_le_bytes([b[o], b[o + 1]]);
        let u32_at = |o: usize| u32::from_le_bytes([b[o], b[o + 1], b[o + 2], b[o + 3]]);
        let i32_at = |o: usize| i32::from_le_bytes([b[o], b[o + 1], b[o + 2], b[o + 3]]);

        Self {
            magic: u16_at(0),
            file_size: u32_at(2),
            reserved1: u16_at(6),
            reserved2: u16_at(8),
            data_offset: u32_at(10),
            header_size: u32_at(14),
            width: i32_at(18),
            height: i32_at(22),
            planes: u16_at(26),
            bit_depth: u16_at(28),
            compression: u32_at(30),
            image_size: u32_at(34),
            x_resolution: i32_at(38),
            y_resolution: i32_at(42),
            colors_used: u32_at(46),
            important_colors: u32_at(50),
        }
    }

    /// Serialize the header.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut b = [0u8; HEADER_LEN];
        b[0..2].copy_from_slice(&self.magic.to_le_bytes());
        b[2..6].copy_from_slice(&self.file_size.to_le_bytes());
        b[6..8].copy_from_slice(&self.reserved1.to_le_bytes());
        b[8..10].copy_from_slice(&self.reserved2.to_le_bytes());
        b[10..14].copy_from_slice(&self.data_offset.to_le_bytes());
        b[14..18].copy_from_slice(&self.header_size.to_le_bytes());
        b[18..22].copy_from_slice(&self.width.to_le_bytes());
        b[22..26].copy_from_slice(&self.height.to_le_bytes());
        b[26..28].copy_from_slice(&self.planes.to_le_bytes());
        b[28..30].copy_from_slice(&self.bit_depth.to_le_bytes());
        b[30..34].copy_from_slice(&self.compression.to_le_bytes());
        b[34..38].copy_from_slice(&self.image_size.to_le_bytes());
        b[38..42].copy_from_slice(&self.x_resolution.to_le_bytes());
        b[42..46].copy_from_slice(&self.y_resolution.to_le_bytes());
        b[46..50].copy_from_slice(&self.colors_used.to_le_bytes());
        b[50..54].copy_from_slice(&self.important_colors.to_le_bytes());
        b
    }

    /// Structural validity: magic, planes, compression and bit depth.
    ///
    /// Dimensions are checked separately against
    /// [`ImageLimits`](crate::config::ImageLimits).
    pub fn validate(&self) -> bool {
        self.check().is_ok()
    }

    /// Like [`validate`](Self::validate), reporting the first failed check.
    pub fn check(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(Error::Format(format!(
                "bad magic {:#06x}, expected {:#06x}",
                self.magic, MAGIC
            )));
        }
        if self.planes != 1 {
            return Err(Error::Format(format!(
                "plane count {}, expected 1",
                self.planes
            )));
        }
        if self.compression != 0 {
            return Err(Error::Format(format!(
                "compression {} not supported",
                self.compression
            )));
        }
        if self.bit_depth != 24 && self.bit_depth != 32 {
            return Err(Error::Format(format!(
                "bit depth {} not supported",
                self.bit_depth
            )));
        }
        Ok(())
    }

    /// Row order encoded by the sign of the height.
    pub fn orientation(&self) -> Orientation {
        if self.height < 0 {
            Orientation::TopDown
        } else {
            Orientation::BottomUp
        }
    }

    /// Absolute value of the height.
    pub fn normalized_height(&self) -> i64 {
        (self.height as i64).abs()
    }

    /// Replace the height by its absolute value and return the original
    /// orientation.
    pub fn normalize(&mut self) -> Orientation {
        let orientation = self.orientation();
        self.height = self.height.saturating_abs();
        orientation
    }

    /// Bytes per pixel on disk.
    pub fn bytes_per_pixel(&self) -> usize {
        self.bit_depth as usize / 8
    }

    /// Padding bytes after each stored row.
    pub fn row_padding(&self) -> usize {
        row_padding(self.width.max(0) as usize, self.bytes_per_pixel())
    }

    /// One-line description for diagnostics.
    pub fn summary(&self) -> String {
        let [a, b] = self.magic.to_le_bytes();
        format!(
            "type={}{} size={}B offset={} {}x{} planes={} bpp={} compression={}",
            a as char,
            b as char,
            self.file_size,
            self.data_offset,
            self.width,
            self.height,
            self.planes,
            self.bit_depth,
            self.compression
        )
    }
}

impl std::fmt::Display for ImageHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.summary())
    }
}

/// Padding after a row of `width` pixels at `bytes_per_pixel`, so that rows
/// start on 4-byte boundaries.
#[inline]
pub fn row_padding(width: usize, bytes_per_pixel: usize) -> usize {
    (4 - (width * bytes_per_pixel) % 4) % 4
}

/// Stored row length including padding.
#[inline]
pub fn disk_row_len(width: usize, bytes_per_pixel: usize) -> usize {
    width * bytes_per_pixel + row_padding(width, bytes_per_pixel)
}
