//! Unsharp-mask style edge enhancement.

use super::{Neighborhood, PixelFilter, clamp_channel};
use crate::bitmap::Pixel;

/// For each of blue, green and red: `clamp(2 * center - avg, 0, 255)`
/// where `avg` is the integer mean of the eight neighbors. Alpha is copied
/// from the center pixel.
#[derive(Debug, Clone, Copy, Default)]
pub struct Enhance;

impl PixelFilter for Enhance {
    fn name(&self) -> &'static str {
        "enhance"
    }

    #[inline]
    fn apply(&self, window: &Neighborhood) -> Pixel {
        let c = window.center();
        let (b, g, r) = window.channel_sums();
        let sharpen = |sum: u32, center: u8| {
            let avg = ((sum - center as u32) / 8) as i32;
            clamp_channel(2 * center as i32 - avg)
        };
        Pixel::bgra(sharpen(b, c.blue), sharpen(g, c.green), sharpen(r, c.red), c.alpha)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::PixelPlane;
    use crate::config::BorderPolicy;
    use crate::filter::{Source, convolve};
    use crate::partition::RowRange;

    fn enhance(src: &PixelPlane, border: BorderPolicy) -> PixelPlane {
        let mut out = src.clone();
        let mut rows = out.view_mut().into_rows(RowRange::full(src.height()));
        convolve(&Enhance, Source::new(src.view()), &mut rows, border);
        out
    }

    #[test]
    fn test_flat_region_idempotent() {
        let src = PixelPlane::filled(5, 5, Pixel::bgra(1, 128, 254, 77));
        for border in [BorderPolicy::Skip, BorderPolicy::Clamp] {
            let once = enhance(&src, border);
            let twice = enhance(&once, border);
            assert_eq!(once, src);
            assert_eq!(twice, src);
        }
    }

    #[test]
    fn test_bright_center_saturates() {
        let mut src = PixelPlane::filled(3, 3, Pixel::bgra(10, 10, 10, 255));
        src.set(1, 1, Pixel::bgra(200, 100, 10, 255));
        let out = enhance(&src, BorderPolicy::Skip);
        // 2*200-10 = 390 -> 255, 2*100-10 = 190, 2*10-10 = 10
        assert_eq!(out.get(1, 1), Pixel::bgra(255, 190, 10, 255));
    }

    #[test]
    fn test_dark_center_clamps_to_zero() {
        let mut src = PixelPlane::filled(3, 3, Pixel::bgra(200, 200, 200, 9));
        src.set(1, 1, Pixel::bgra(50, 100, 150, 9));
        let out = enhance(&src, BorderPolicy::Skip);
        // 100-200 < 0, 200-200 = 0, 300-200 = 100
        assert_eq!(out.get(1, 1), Pixel::bgra(0, 0, 100, 9));
    }

    #[test]
    fn test_neighbor_average_truncates() {
        let mut src = PixelPlane::filled(3, 3, Pixel::bgra(0, 0, 0, 255));
        src.set(0, 0, Pixel::bgra(15, 15, 15, 255));
        src.set(1, 1, Pixel::bgra(100, 100, 100, 255));
        let out = enhance(&src, BorderPolicy::Skip);
        // avg = 15 / 8 = 1
        assert_eq!(out.get(1, 1).blue, 199);
    }
}
