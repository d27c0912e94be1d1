//! 3x3 box blur.

use super::{Neighborhood, PixelFilter};
use crate::bitmap::Pixel;

/// Unweighted 3x3 average of blue, green and red. Alpha is copied from the
/// center pixel.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoxBlur;

impl PixelFilter for BoxBlur {
    fn name(&self) -> &'static str {
        "blur"
    }

    #[inline]
    fn apply(&self, window: &Neighborhood) -> Pixel {
        let (b, g, r) = window.channel_sums();
        Pixel::bgra((b / 9) as u8, (g / 9) as u8, (r / 9) as u8, window.center().alpha)
    }
}
