//! Pixels and pixel planes.
//!
//! A plane is a row-major grid of [`Pixel`]s stored top-to-bottom. Planes
//! come in three forms that share one indexing model:
//!
//! - [`PixelPlane`]: owned, heap-backed, row stride equal to the width.
//! - [`PlaneRef`] / [`PlaneMut`]: borrowed views whose row stride may exceed
//!   the width (planes in the shared region are laid out at the reserved
//!   maximum width).
//! - [`RowsMut`]: mutable access to a [`RowRange`] of a plane, splittable
//!   into disjoint sub-ranges for parallel writers.

use crate::partition::RowRange;

/// One pixel, channels in on-disk order.
///
/// `#[repr(C)]` with byte fields: size 4, alignment 1, every bit pattern
/// valid. Shared memory is reinterpreted as `[Pixel]` on that basis.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Pixel {
    /// Blue channel.
    pub blue: u8,
    /// Green channel.
    pub green: u8,
    /// Red channel.
    pub red: u8,
    /// Alpha channel (255 = opaque).
    pub alpha: u8,
}

const _: () = assert!(std::mem::size_of::<Pixel>() == 4);
const _: () = assert!(std::mem::align_of::<Pixel>() == 1);

impl Pixel {
    /// Size of a pixel in memory.
    pub const SIZE: usize = 4;

    /// Create a pixel from channels in on-disk order.
    #[inline]
    pub const fn bgra(blue: u8, green: u8, red: u8, alpha: u8) -> Self {
        Self {
            blue,
            green,
            red,
            alpha,
        }
    }

    /// Create an opaque pixel.
    #[inline]
    pub const fn rgb(red: u8, green: u8, blue: u8) -> Self {
        Self::bgra(blue, green, red, 255)
    }
}

/// Immutable view of a plane.
#[derive(Debug, Clone, Copy)]
pub struct PlaneRef<'a> {
    pixels: &'a [Pixel],
    width: usize,
    height: usize,
    stride: usize,
}

impl<'a> PlaneRef<'a> {
    /// Wrap a pixel slice.
    ///
    /// # Panics
    ///
    /// Panics if `stride < width` or the slice is too short for
    /// `height` rows.
    pub fn new(pixels: &'a [Pixel], width: usize, height: usize, stride: usize) -> Self {
        assert!(stride >= width, "stride {stride} < width {width}");
        assert!(
            pixels.len() >= required_len(width, height, stride),
            "plane storage too small for {width}x{height} at stride {stride}"
        );
        Self {
            pixels,
            width,
            height,
            stride,
        }
    }

    /// Width in pixels.
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in rows.
    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// One row, `width` pixels.
    #[inline]
    pub fn row(&self, y: usize) -> &'a [Pixel] {
        let start = y * self.stride;
        &self.pixels[start..start + self.width]
    }

    /// Pixel at `(y, x)`.
    #[inline]
    pub fn get(&self, y: usize, x: usize) -> Pixel {
        self.row(y)[x]
    }

    /// Iterate over rows top to bottom.
    pub fn rows(&self) -> impl Iterator<Item = &'a [Pixel]> + '_ {
        (0..self.height).map(move |y| self.row(y))
    }

    /// Copy into an owned plane.
    pub fn to_plane(&self) -> PixelPlane {
        let mut pixels = Vec::with_capacity(self.width * self.height);
        for row in self.rows() {
            pixels.extend_from_slice(row);
        }
        PixelPlane {
            width: self.width,
            height: self.height,
            pixels,
        }
    }

    /// Whether both views hold the same pixels (strides may differ).
    pub fn same_pixels(&self, other: &PlaneRef<'_>) -> bool {
        self.width == other.width
            && self.height == other.height
            && (0..self.height).all(|y| self.row(y) == other.row(y))
    }
}

/// Mutable view of a whole plane.
#[derive(Debug)]
pub struct PlaneMut<'a> {
    pixels: &'a mut [Pixel],
    width: usize,
    height: usize,
    stride: usize,
}

impl<'a> PlaneMut<'a> {
    /// Wrap a mutable pixel slice.
    ///
    /// # Panics
    ///
    /// Panics if `stride < width` or the slice is too short for
    /// `height` rows.
    pub fn new(pixels: &'a mut [Pixel], width: usize, height: usize, stride: usize) -> Self {
        assert!(stride >= width, "stride {stride} < width {width}");
        assert!(
            pixels.len() >= required_len(width, height, stride),
            "plane storage too small for {width}x{height} at stride {stride}"
        );
        Self {
            pixels,
            width,
            height,
            stride,
        }
    }

    /// Width in pixels.
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in rows.
    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Reborrow as an immutable view.
    pub fn as_view(&self) -> PlaneRef<'_> {
        PlaneRef {
            pixels: &*self.pixels,
            width: self.width,
            height: self.height,
            stride: self.stride,
        }
    }

    /// One mutable row.
    #[inline]
    pub fn row_mut(&mut self, y: usize) -> &mut [Pixel] {
        let start = y * self.stride;
        &mut self.pixels[start..start + self.width]
    }

    /// Set every pixel.
    pub fn fill(&mut self, pixel: Pixel) {
        for y in 0..self.height {
            self.row_mut(y).fill(pixel);
        }
    }

    /// Copy all pixels from `src`, which must have the same dimensions.
    ///
    /// # Panics
    ///
    /// Panics if the dimensions differ.
    pub fn copy_from(&mut self, src: PlaneRef<'_>) {
        assert_eq!(
            (self.width, self.height),
            (src.width(), src.height()),
            "plane dimensions differ"
        );
        for y in 0..self.height {
            self.row_mut(y).copy_from_slice(src.row(y));
        }
    }

    /// Convert into mutable access to a row range.
    pub fn into_rows(self, range: RowRange) -> RowsMut<'a> {
        let range = RowRange::new(range.start.min(self.height), range.end.min(self.height));
        let start = (range.start * self.stride).min(self.pixels.len());
        let end = if range.is_empty() {
            start
        } else {
            (range.end - 1) * self.stride + self.width
        };
        RowsMut {
            pixels: &mut self.pixels[start..end],
            width: self.width,
            stride: self.stride,
            range,
        }
    }
}

/// Mutable access to rows `[range.start, range.end)` of a plane.
///
/// Rows are addressed by their absolute index in the plane.
#[derive(Debug)]
pub struct RowsMut<'a> {
    pixels: &'a mut [Pixel],
    width: usize,
    stride: usize,
    range: RowRange,
}

impl<'a> RowsMut<'a> {
    /// Wrap storage whose first pixel is the start of row `range.start`.
    ///
    /// # Panics
    ///
    /// Panics if `stride < width` or the slice is too short for the range.
    pub fn new(pixels: &'a mut [Pixel], width: usize, stride: usize, range: RowRange) -> Self {
        assert!(stride >= width, "stride {stride} < width {width}");
        let len = required_len(width, range.len(), stride);
        assert!(pixels.len() >= len, "row storage too small for {range}");
        Self {
            pixels: &mut pixels[..len],
            width,
            stride,
            range,
        }
    }

    /// The rows this view owns.
    #[inline]
    pub fn range(&self) -> RowRange {
        self.range
    }

    /// Width in pixels.
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// One row by absolute index.
    ///
    /// # Panics
    ///
    /// Panics if `y` is outside [`Self::range`].
    #[inline]
    pub fn row(&self, y: usize) -> &[Pixel] {
        assert!(self.range.contains(y), "row {y} outside {}", self.range);
        let start = (y - self.range.start) * self.stride;
        &self.pixels[start..start + self.width]
    }

    /// Copy the owned rows into a plane of `range.len()` rows.
    pub fn to_plane(&self) -> PixelPlane {
        let mut pixels = Vec::with_capacity(self.width * self.range.len());
        for y in self.range.as_range() {
            pixels.extend_from_slice(self.row(y));
        }
        PixelPlane {
            width: self.width,
            height: self.range.len(),
            pixels,
        }
    }

    /// One mutable row by absolute index.
    ///
    /// # Panics
    ///
    /// Panics if `y` is outside [`Self::range`].
    #[inline]
    pub fn row_mut(&mut self, y: usize) -> &mut [Pixel] {
        assert!(self.range.contains(y), "row {y} outside {}", self.range);
        let start = (y - self.range.start) * self.stride;
        &mut self.pixels[start..start + self.width]
    }

    /// Split into `[start, row)` and `[row, end)`.
    pub fn split_at(self, row: usize) -> (RowsMut<'a>, RowsMut<'a>) {
        let (upper, lower) = self.range.split_at(row);
        let mid = (upper.len() * self.stride).min(self.pixels.len());
        let (a, b) = self.pixels.split_at_mut(mid);
        (
            RowsMut {
                pixels: a,
                width: self.width,
                stride: self.stride,
                range: upper,
            },
            RowsMut {
                pixels: b,
                width: self.width,
                stride: self.stride,
                range: lower,
            },
        )
    }

    /// Split into one view per range.
    ///
    /// # Panics
    ///
    /// Panics unless `ranges` tile [`Self::range`] in order with no gaps,
    /// as produced by [`RowRange::partition`].
    pub fn split(self, ranges: &[RowRange]) -> Vec<RowsMut<'a>> {
        let mut parts = Vec::with_capacity(ranges.len());
        let mut rest = self;
        for range in ranges {
            assert_eq!(range.start, rest.range.start, "ranges must be contiguous");
            let (head, tail) = rest.split_at(range.end);
            assert_eq!(head.range, *range, "range {range} outside the view");
            parts.push(head);
            rest = tail;
        }
        assert!(rest.range.is_empty(), "ranges leave rows {} uncovered", rest.range);
        parts
    }
}

/// An owned plane, rows packed at stride = width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelPlane {
    width: usize,
    height: usize,
    pixels: Vec<Pixel>,
}

impl PixelPlane {
    /// A plane of default (zeroed) pixels.
    pub fn new(width: usize, height: usize) -> Self {
        Self::filled(width, height, Pixel::default())
    }

    /// A plane with every pixel set to `pixel`.
    pub fn filled(width: usize, height: usize, pixel: Pixel) -> Self {
        Self {
            width,
            height,
            pixels: vec![pixel; width * height],
        }
    }

    /// Build a plane by evaluating `f(y, x)` for every pixel.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> Pixel) -> Self {
        let mut pixels = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                pixels.push(f(y, x));
            }
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Width in pixels.
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in rows.
    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Pixel at `(y, x)`.
    #[inline]
    pub fn get(&self, y: usize, x: usize) -> Pixel {
        self.pixels[y * self.width + x]
    }

    /// Set the pixel at `(y, x)`.
    #[inline]
    pub fn set(&mut self, y: usize, x: usize, pixel: Pixel) {
        self.pixels[y * self.width + x] = pixel;
    }

    /// One row.
    pub fn row(&self, y: usize) -> &[Pixel] {
        &self.pixels[y * self.width..(y + 1) * self.width]
    }

    /// All pixels, row-major.
    pub fn pixels(&self) -> &[Pixel] {
        &self.pixels
    }

    /// Borrow as a view.
    pub fn view(&self) -> PlaneRef<'_> {
        PlaneRef {
            pixels: &self.pixels,
            width: self.width,
            height: self.height,
            stride: self.width,
        }
    }

    /// Borrow as a mutable view.
    pub fn view_mut(&mut self) -> PlaneMut<'_> {
        PlaneMut {
            pixels: &mut self.pixels,
            width: self.width,
            height: self.height,
            stride: self.width,
        }
    }
}

fn required_len(width: usize, height: usize, stride: usize) -> usize {
    if height == 0 {
        0
    } else {
        (height - 1) * stride + width
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::partition;

    #[test]
    fn test_pixel_layout() {
        let p = Pixel::rgb(1, 2, 3);
        assert_eq!((p.blue, p.green, p.red, p.alpha), (3, 2, 1, 255));
        assert_eq!(Pixel::bgra(3, 2, 1, 255), p);
    }

    #[test]
    fn test_strided_view() {
        // 2x2 image stored at stride 3
        let storage = vec![
            Pixel::rgb(1, 0, 0),
            Pixel::rgb(2, 0, 0),
            Pixel::rgb(99, 0, 0),
            Pixel::rgb(3, 0, 0),
            Pixel::rgb(4, 0, 0),
        ];
        let view = PlaneRef::new(&storage, 2, 2, 3);
        assert_eq!(view.get(0, 1).red, 2);
        assert_eq!(view.get(1, 0).red, 3);
        assert_eq!(view.row(1).len(), 2);

        let owned = view.to_plane();
        assert_eq!(owned.pixels().iter().map(|p| p.red).collect::<Vec<_>>(), [1, 2, 3, 4]);
        assert!(owned.view().same_pixels(&view));
    }

    #[test]
    #[should_panic(expected = "too small")]
    fn test_view_rejects_short_storage() {
        let storage = vec![Pixel::default(); 3];
        let _ = PlaneRef::new(&storage, 2, 2, 2);
    }

    #[test]
    fn test_rows_split_is_disjoint() {
        let mut plane = PixelPlane::new(3, 10);
        let rows = plane.view_mut().into_rows(RowRange::full(10));
        let ranges = partition(10, 3);
        let parts = rows.split(&ranges);
        assert_eq!(parts.len(), 3);

        for (i, mut part) in parts.into_iter().enumerate() {
            for y in part.range().as_range() {
                part.row_mut(y).fill(Pixel::rgb(i as u8, 0, 0));
            }
        }

        assert_eq!(plane.get(0, 0).red, 0);
        assert_eq!(plane.get(2, 2).red, 0);
        assert_eq!(plane.get(3, 0).red, 1);
        assert_eq!(plane.get(5, 1).red, 1);
        assert_eq!(plane.get(6, 0).red, 2);
        assert_eq!(plane.get(9, 2).red, 2);
    }

    #[test]
    fn test_rows_split_on_strided_storage() {
        // 2 wide, 4 tall, stride 5: the last row has no trailing stride gap
        let mut storage = vec![Pixel::default(); 3 * 5 + 2];
        let plane = PlaneMut::new(&mut storage, 2, 4, 5);
        let rows = plane.into_rows(RowRange::new(1, 4));
        let parts = rows.split(&[RowRange::new(1, 2), RowRange::new(2, 4)]);
        for mut part in parts {
            for y in part.range().as_range() {
                part.row_mut(y).fill(Pixel::rgb(y as u8, 0, 0));
            }
        }
        let view = PlaneRef::new(&storage, 2, 4, 5);
        assert_eq!(view.get(0, 0).red, 0);
        assert_eq!(view.get(1, 1).red, 1);
        assert_eq!(view.get(3, 1).red, 3);
        // Stride gap untouched
        assert_eq!(storage[2], Pixel::default());
    }

    #[test]
    #[should_panic(expected = "outside")]
    fn test_rows_mut_rejects_foreign_row() {
        let mut plane = PixelPlane::new(2, 4);
        let mut rows = plane.view_mut().into_rows(RowRange::new(0, 2));
        let _ = rows.row_mut(2);
    }

    #[test]
    fn test_rows_from_offset_storage() {
        // rows 2..4 of a 3-wide plane at stride 4, storage starting at row 2
        let mut storage = vec![Pixel::default(); 4 + 3];
        let mut rows = RowsMut::new(&mut storage, 3, 4, RowRange::new(2, 4));
        rows.row_mut(2).fill(Pixel::rgb(2, 0, 0));
        rows.row_mut(3).fill(Pixel::rgb(3, 0, 0));

        let snapshot = rows.to_plane();
        assert_eq!((snapshot.width(), snapshot.height()), (3, 2));
        assert_eq!(snapshot.get(0, 2).red, 2);
        assert_eq!(snapshot.get(1, 0).red, 3);
        assert_eq!(storage[3], Pixel::default());
        assert_eq!(storage[4].red, 3);
    }

    #[test]
    fn test_fill_and_copy() {
        let mut a = PixelPlane::new(3, 2);
        a.view_mut().fill(Pixel::rgb(9, 8, 7));
        let mut b = PixelPlane::new(3, 2);
        b.view_mut().copy_from(a.view());
        assert_eq!(a, b);
        assert!(b.pixels().iter().all(|p| *p == Pixel::rgb(9, 8, 7)));
    }
}
