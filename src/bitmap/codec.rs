//! Bitmap decoding and encoding.
//!
//! Decoding accepts either row order and always produces a top-to-bottom
//! plane. Encoding always writes bottom-up with a positive height.

use super::header::{HEADER_LEN, ImageHeader, Orientation, row_padding};
use super::pixel::{Pixel, PixelPlane, PlaneMut, PlaneRef};
use crate::config::ImageLimits;
use crate::error::{Error, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// A decoded image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    /// Header with the height normalized to its absolute value.
    pub header: ImageHeader,
    /// Row order the file was stored in.
    pub orientation: Orientation,
    /// Pixels, top row first.
    pub plane: PixelPlane,
}

impl DecodedImage {
    /// Width in pixels.
    pub fn width(&self) -> usize {
        self.plane.width()
    }

    /// Height in rows.
    pub fn height(&self) -> usize {
        self.plane.height()
    }
}

/// Read and check the header.
///
/// Fails with [`Error::Format`] when a structural check fails and with
/// [`Error::Size`] when the dimensions exceed `limits`. The returned header
/// has its height normalized.
pub fn read_header<R: Read>(reader: &mut R, limits: &ImageLimits) -> Result<(ImageHeader, Orientation)> {
    let mut bytes = [0u8; HEADER_LEN];
    let n = read_full(reader, &mut bytes)?;
    if n < HEADER_LEN {
        return Err(Error::Truncated {
            context: "header",
            expected: HEADER_LEN,
            actual: n,
        });
    }

    let mut header = ImageHeader::from_bytes(&bytes);
    header.check()?;

    let orientation = header.normalize();
    limits.check(header.width as i64, header.height as i64)?;

    if (header.data_offset as usize) < HEADER_LEN {
        return Err(Error::Format(format!(
            "pixel data offset {} overlaps the header",
            header.data_offset
        )));
    }

    Ok((header, orientation))
}

/// Decode a bitmap into an owned plane.
pub fn decode<R: Read + Seek>(reader: &mut R, limits: &ImageLimits) -> Result<DecodedImage> {
    let (header, orientation) = read_header(reader, limits)?;
    let mut plane = PixelPlane::new(header.width as usize, header.height as usize);
    read_pixels(reader, &header, orientation, plane.view_mut())?;

    tracing::debug!("BitmapCodec: decoded {} ({:?})", header, orientation);

    Ok(DecodedImage {
        header,
        orientation,
        plane,
    })
}

/// Decode a bitmap directly into caller-provided storage laid out at
/// `stride` pixels per row (a plane of the shared region).
///
/// Nothing is written to `storage` unless the header passes every check.
pub fn decode_into<R: Read + Seek>(
    reader: &mut R,
    limits: &ImageLimits,
    storage: &mut [Pixel],
    stride: usize,
) -> Result<(ImageHeader, Orientation)> {
    let (header, orientation) = read_header(reader, limits)?;
    let (width, height) = (header.width as usize, header.height as usize);

    if width > stride || (height - 1) * stride + width > storage.len() {
        return Err(Error::Config(format!(
            "plane storage of {} pixels at stride {} cannot hold {}x{}",
            storage.len(),
            stride,
            width,
            height
        )));
    }

    let plane = PlaneMut::new(storage, width, height, stride);
    read_pixels(reader, &header, orientation, plane)?;

    tracing::debug!("BitmapCodec: decoded {} into shared plane", header);

    Ok((header, orientation))
}

fn read_pixels<R: Read + Seek>(
    reader: &mut R,
    header: &ImageHeader,
    orientation: Orientation,
    mut plane: PlaneMut<'_>,
) -> Result<()> {
    let width = plane.width();
    let height = plane.height();
    let bpp = header.bytes_per_pixel();
    let row_bytes = width * bpp;
    let padding = row_padding(width, bpp);

    reader.seek(SeekFrom::Start(header.data_offset as u64))?;

    let mut buf = vec![0u8; row_bytes + padding];
    for disk_row in 0..height {
        let n = read_full(reader, &mut buf[..row_bytes])?;
        if n < row_bytes {
            return Err(Error::Truncated {
                context: "pixel row",
                expected: row_bytes,
                actual: n,
            });
        }
        // Some writers drop the padding after the final row
        read_full(reader, &mut buf[row_bytes..])?;

        let row = plane.row_mut(orientation.memory_row(disk_row, height));
        for (px, raw) in row.iter_mut().zip(buf[..row_bytes].chunks_exact(bpp)) {
            let alpha = if bpp == 4 { raw[3] } else { 255 };
            *px = Pixel::bgra(raw[0], raw[1], raw[2], alpha);
        }
    }

    Ok(())
}

/// Encode `plane` bottom-up.
///
/// The header is written as given except that its height is set to the
/// plane's (positive) height. The dimensions in the header must match the
/// plane and the header must pass [`ImageHeader::check`].
pub fn encode<W: Write + Seek>(header: &ImageHeader, plane: PlaneRef<'_>, writer: &mut W) -> Result<()> {
    header.check()?;

    let width = plane.width();
    let height = plane.height();
    if header.width as i64 != width as i64 || header.normalized_height() != height as i64 {
        return Err(Error::Format(format!(
            "header describes {}x{} but plane is {}x{}",
            header.width,
            header.normalized_height(),
            width,
            height
        )));
    }
    if (header.data_offset as usize) < HEADER_LEN {
        return Err(Error::Format(format!(
            "pixel data offset {} overlaps the header",
            header.data_offset
        )));
    }

    let mut out = *header;
    out.height = height as i32;
    writer.write_all(&out.to_bytes())?;
    writer.seek(SeekFrom::Start(header.data_offset as u64))?;

    let bpp = header.bytes_per_pixel();
    let row_bytes = width * bpp;
    let mut buf = vec![0u8; row_bytes + row_padding(width, bpp)];

    for disk_row in 0..height {
        let row = plane.row(Orientation::BottomUp.memory_row(disk_row, height));
        for (px, raw) in row.iter().zip(buf[..row_bytes].chunks_exact_mut(bpp)) {
            raw[0] = px.blue;
            raw[1] = px.green;
            raw[2] = px.red;
            if bpp == 4 {
                raw[3] = px.alpha;
            }
        }
        writer.write_all(&buf)?;
    }
    writer.flush()?;

    tracing::debug!("BitmapCodec: encoded {}x{} at {} bpp", width, height, header.bit_depth);

    Ok(())
}

/// Encode into a byte vector.
pub fn encode_to_vec(header: &ImageHeader, plane: PlaneRef<'_>) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    encode(header, plane, &mut cursor)?;
    Ok(cursor.into_inner())
}

/// Decode the bitmap at `path`.
pub fn load_image<P: AsRef<Path>>(path: P, limits: &ImageLimits) -> Result<DecodedImage> {
    let mut reader = BufReader::new(File::open(path.as_ref())?);
    decode(&mut reader, limits)
}

/// Encode `plane` to the file at `path`, replacing it.
pub fn save_image<P: AsRef<Path>>(path: P, header: &ImageHeader, plane: PlaneRef<'_>) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path.as_ref())?);
    encode(header, plane, &mut writer)?;
    writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    Ok(())
}

/// Read until `buf` is full or EOF; returns the bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
