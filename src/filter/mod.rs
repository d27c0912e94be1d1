//! 3x3 convolution filters.
//!
//! A [`PixelFilter`] maps a pixel's 3x3 [`Neighborhood`] to an output
//! pixel. [`convolve`] drives a filter over an owned row range, reading from
//! a [`Source`] whose readable rows may be narrower than the image (a worker
//! filtering half of a plane in place may only read its own half).
//!
//! Pixels whose window leaves the readable area are handled by the
//! [`BorderPolicy`]: `Skip` writes the source pixel back unchanged, `Clamp`
//! replaces missing neighbors with the nearest readable pixel.
//!
//! # Example
//!
//! ```rust,ignore
//! use bmpipe::filter::{self, BoxBlur, Source};
//! use bmpipe::config::BorderPolicy;
//! use bmpipe::partition::RowRange;
//!
//! let mut out = input.clone();
//! let rows = out.view_mut().into_rows(RowRange::full(input.height()));
//! filter::convolve_parallel(&BoxBlur, Source::new(input.view()), rows, BorderPolicy::Clamp, 4);
//! ```

mod blur;
mod enhance;

pub use blur::BoxBlur;
pub use enhance::Enhance;

use crate::bitmap::{Pixel, PlaneRef, RowsMut};
use crate::config::{BorderPolicy, Stage};
use crate::partition::RowRange;

/// A 3x3 pixel filter.
pub trait PixelFilter: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Output pixel for the window centered on it.
    fn apply(&self, window: &Neighborhood) -> Pixel;
}

/// The filter a stage applies.
pub fn for_stage(stage: Stage) -> &'static dyn PixelFilter {
    match stage {
        Stage::Blur => &BoxBlur,
        Stage::Enhance => &Enhance,
    }
}

/// A 3x3 window, `pixels[dy][dx]` with the center at `[1][1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Neighborhood {
    /// Window rows top to bottom.
    pub pixels: [[Pixel; 3]; 3],
}

impl Neighborhood {
    /// The center pixel.
    #[inline]
    pub fn center(&self) -> Pixel {
        self.pixels[1][1]
    }

    /// Per-channel sums `(blue, green, red)` over all nine pixels.
    #[inline]
    pub fn channel_sums(&self) -> (u32, u32, u32) {
        let mut sums = (0u32, 0u32, 0u32);
        for p in self.pixels.iter().flatten() {
            sums.0 += p.blue as u32;
            sums.1 += p.green as u32;
            sums.2 += p.red as u32;
        }
        sums
    }
}

/// Rows a filter may read.
///
/// `plane` holds rows `[origin, origin + plane.height())` of the image, so a
/// worker can read from a snapshot of just the rows it owns.
#[derive(Debug, Clone, Copy)]
pub struct Source<'a> {
    plane: PlaneRef<'a>,
    origin: usize,
}

impl<'a> Source<'a> {
    /// A source covering a whole plane.
    pub fn new(plane: PlaneRef<'a>) -> Self {
        Self { plane, origin: 0 }
    }

    /// A source whose first row is image row `origin`.
    pub fn offset(plane: PlaneRef<'a>, origin: usize) -> Self {
        Self { plane, origin }
    }

    /// Image rows this source can supply.
    pub fn readable(&self) -> RowRange {
        RowRange::new(self.origin, self.origin + self.plane.height())
    }

    /// Width in pixels.
    pub fn width(&self) -> usize {
        self.plane.width()
    }

    /// Pixel at image row `y`, column `x`.
    #[inline]
    pub fn get(&self, y: usize, x: usize) -> Pixel {
        self.plane.get(y - self.origin, x)
    }

    /// The window around `(y, x)`, or `None` when the border policy says to
    /// leave the pixel alone.
    pub fn neighborhood(&self, y: usize, x: usize, border: BorderPolicy) -> Option<Neighborhood> {
        let rows = self.readable();
        let width = self.width();
        let interior = y > rows.start && y + 1 < rows.end && x > 0 && x + 1 < width;
        if !interior && border == BorderPolicy::Skip {
            return None;
        }

        let mut pixels = [[Pixel::default(); 3]; 3];
        for (dy, window_row) in pixels.iter_mut().enumerate() {
            let sy = (y + dy).saturating_sub(1).clamp(rows.start, rows.end - 1);
            for (dx, pixel) in window_row.iter_mut().enumerate() {
                let sx = (x + dx).saturating_sub(1).min(width - 1);
                *pixel = self.get(sy, sx);
            }
        }
        Some(Neighborhood { pixels })
    }
}

/// Filter every row of `dst`.
///
/// Skipped border pixels receive their source value, so `dst` ends up fully
/// written either way.
///
/// # Panics
///
/// Panics if `dst` reaches outside the source's readable rows or the
/// widths differ.
pub fn convolve<F: PixelFilter + ?Sized>(
    filter: &F,
    src: Source<'_>,
    dst: &mut RowsMut<'_>,
    border: BorderPolicy,
) {
    let rows = dst.range();
    if rows.is_empty() {
        return;
    }
    let readable = src.readable();
    assert!(
        rows.start >= readable.start && rows.end <= readable.end,
        "rows {rows} outside readable {readable}"
    );
    assert_eq!(dst.width(), src.width(), "source and destination widths differ");

    for y in rows.as_range() {
        let out = dst.row_mut(y);
        for (x, pixel) in out.iter_mut().enumerate() {
            *pixel = match src.neighborhood(y, x, border) {
                Some(window) => filter.apply(&window),
                None => src.get(y, x),
            };
        }
    }
}

/// Filter `dst` with up to `threads` scoped threads, one per row slice.
///
/// Slices come from [`RowRange::partition`]; all threads are joined before
/// this returns.
pub fn convolve_parallel<F: PixelFilter + ?Sized>(
    filter: &F,
    src: Source<'_>,
    mut dst: RowsMut<'_>,
    border: BorderPolicy,
    threads: usize,
) {
    if threads <= 1 || dst.range().len() < 2 {
        convolve(filter, src, &mut dst, border);
        return;
    }

    let slices = dst.range().partition(threads);
    let parts = dst.split(&slices);
    std::thread::scope(|scope| {
        for mut part in parts.into_iter().filter(|p| !p.range().is_empty()) {
            scope.spawn(move || convolve(filter, src, &mut part, border));
        }
    });
}

#[inline]
pub(crate) fn clamp_channel(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::PixelPlane;

    fn gradient(width: usize, height: usize) -> PixelPlane {
        PixelPlane::from_fn(width, height, |y, x| {
            Pixel::bgra((x * 17) as u8, (y * 29) as u8, ((x + y) * 11) as u8, (x * y) as u8)
        })
    }

    /// Filter that marks every pixel it computes.
    struct Marker;

    impl PixelFilter for Marker {
        fn name(&self) -> &'static str {
            "marker"
        }

        fn apply(&self, window: &Neighborhood) -> Pixel {
            let c = window.center();
            Pixel::bgra(c.blue, c.green, c.red, 7)
        }
    }

    #[test]
    fn test_skip_leaves_outer_ring() {
        let src = gradient(5, 4);
        let mut out = PixelPlane::new(5, 4);
        let mut rows = out.view_mut().into_rows(RowRange::full(4));
        convolve(&Marker, Source::new(src.view()), &mut rows, BorderPolicy::Skip);

        for y in 0..4 {
            for x in 0..5 {
                let interior = y > 0 && y < 3 && x > 0 && x < 4;
                let expected = if interior { 7 } else { src.get(y, x).alpha };
                assert_eq!(out.get(y, x).alpha, expected, "pixel ({y}, {x})");
            }
        }
    }

    #[test]
    fn test_clamp_filters_every_pixel() {
        let src = gradient(3, 3);
        let mut out = PixelPlane::new(3, 3);
        let mut rows = out.view_mut().into_rows(RowRange::full(3));
        convolve(&Marker, Source::new(src.view()), &mut rows, BorderPolicy::Clamp);
        assert!(out.pixels().iter().all(|p| p.alpha == 7));
    }

    #[test]
    fn test_clamp_window_at_corner() {
        let src = gradient(4, 4);
        let window = Source::new(src.view())
            .neighborhood(0, 0, BorderPolicy::Clamp)
            .unwrap();
        assert_eq!(window.pixels[0][0], src.get(0, 0));
        assert_eq!(window.pixels[0][2], src.get(0, 1));
        assert_eq!(window.pixels[2][0], src.get(1, 0));
        assert_eq!(window.pixels[2][2], src.get(1, 1));
    }

    #[test]
    fn test_offset_source_bounds_reads() {
        let image = gradient(4, 8);
        // rows 4..8 only
        let lower = PixelPlane::from_fn(4, 4, |y, x| image.get(y + 4, x));
        let src = Source::offset(lower.view(), 4);
        assert_eq!(src.readable(), RowRange::new(4, 8));
        assert_eq!(src.get(5, 2), image.get(5, 2));

        // row 4 is an edge of the readable area even though it is interior
        // to the image
        assert!(src.neighborhood(4, 1, BorderPolicy::Skip).is_none());
        assert!(src.neighborhood(5, 1, BorderPolicy::Skip).is_some());
        let window = src.neighborhood(4, 1, BorderPolicy::Clamp).unwrap();
        assert_eq!(window.pixels[0][1], image.get(4, 1));
    }

    #[test]
    fn test_parallel_matches_serial() {
        let src = gradient(13, 23);
        let mut serial = PixelPlane::new(13, 23);
        let mut rows = serial.view_mut().into_rows(RowRange::full(23));
        convolve(&BoxBlur, Source::new(src.view()), &mut rows, BorderPolicy::Clamp);

        for threads in [1, 2, 3, 4, 7, 30] {
            let mut parallel = PixelPlane::new(13, 23);
            let rows = parallel.view_mut().into_rows(RowRange::full(23));
            convolve_parallel(&BoxBlur, Source::new(src.view()), rows, BorderPolicy::Clamp, threads);
            assert_eq!(parallel, serial, "threads={threads}");
        }
    }

    #[test]
    fn test_single_row_source() {
        let src = PixelPlane::filled(3, 1, Pixel::rgb(10, 20, 30));
        let mut out = PixelPlane::new(3, 1);
        let mut rows = out.view_mut().into_rows(RowRange::full(1));
        convolve(&Enhance, Source::new(src.view()), &mut rows, BorderPolicy::Clamp);
        assert_eq!(out, src);
    }

    #[test]
    fn test_for_stage() {
        assert_eq!(for_stage(Stage::Blur).name(), "blur");
        assert_eq!(for_stage(Stage::Enhance).name(), "enhance");
    }
}
