//! Bilinear sampling over a resident image buffer.

use crate::arena::ImageBuffer;
use crate::Color;

/// Sample `image` at the sub-pixel position `(x, y)`
///
/// Blends the four neighbors of `(floor(x), floor(y))` by the fractional
/// offsets. Within the last pixel's cell the right and bottom neighbors fall
/// past the image; they are clamped to the last column and row.
///
/// Accepts `0 <= x < width` and `0 <= y < height`. Returns `None` for
/// non-finite coordinates and for points outside that range, including every
/// point of an empty buffer. At integer coordinates the result is the stored
/// pixel exactly.
///
/// # Example
///
/// ```
/// use mvs_image_cache::{sample_bilinear, Color, ImageBuffer};
///
/// let mut image = ImageBuffer::with_capacity(2, 1);
/// image
///     .prepare(2, 1)
///     .unwrap()
///     .copy_from_slice(&[Color::gray(0.0), Color::gray(1.0)]);
///
/// assert_eq!(sample_bilinear(&image, 0.25, 0.0), Some(Color::gray(0.25)));
/// assert_eq!(sample_bilinear(&image, 1.0, 0.0), Some(Color::gray(1.0)));
/// // The right neighbor of the last column is the last column itself
/// assert_eq!(sample_bilinear(&image, 1.5, 0.0), Some(Color::gray(1.0)));
/// assert_eq!(sample_bilinear(&image, 2.0, 0.0), None);
/// ```
pub fn sample_bilinear(image: &ImageBuffer, x: f32, y: f32) -> Option<Color> {
    if !contains_point(image, x, y) {
        return None;
    }

    let xp = x.floor();
    let yp = y.floor();
    let u = x - xp;
    let v = y - yp;

    // f32 rounding of very large dimensions can land exactly on the bound
    let x0 = (xp as u32).min(image.width() - 1);
    let y0 = (yp as u32).min(image.height() - 1);
    let x1 = (x0 + 1).min(image.width() - 1);
    let y1 = (y0 + 1).min(image.height() - 1);

    let top_left = image.at(x0, y0);
    let top_right = image.at(x1, y0);
    let bottom_right = image.at(x1, y1);
    let bottom_left = image.at(x0, y1);

    let top = top_left.lerp(top_right, u);
    let bottom = bottom_left.lerp(bottom_right, u);
    Some(top.lerp(bottom, v))
}

/// True when `(x, y)` can be sampled from `image`
pub fn contains_point(image: &ImageBuffer, x: f32, y: f32) -> bool {
    if image.is_empty() || !x.is_finite() || !y.is_finite() {
        return false;
    }
    (0.0..image.width() as f32).contains(&x) && (0.0..image.height() as f32).contains(&y)
}
