use std::io::Cursor;

use image::{GrayImage, ImageFormat, Luma};
use ndarray::ArrayView1;

use crate::error::RenderError;

/// Maps values linearly onto `0..=255`.
///
/// The minimum lands on 0 and the maximum on 255. A constant input has no range
/// to stretch and becomes mid gray (128) everywhere.
pub fn normalize_image(f: ArrayView1<f64>) -> Vec<u8> {
    let (min, max) = f
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });

    if f.is_empty() || max == min {
        return vec![128; f.len()];
    }

    let range = max - min;
    f.iter()
        .map(|&v| ((v - min) / range * 255.0).clamp(0.0, 255.0) as u8)
        .collect()
}

/// Renders a flattened square image as an 8-bit grayscale PNG.
///
/// The vector is read column-major: index `x·side + y` becomes pixel `(x, y)`.
///
/// # Returns
/// The PNG bytes, or a `RenderError` if the vector is empty, not a perfect square,
/// or fails to encode.
pub fn render_png(f: ArrayView1<f64>) -> Result<Vec<u8>, RenderError> {
    if f.is_empty() {
        return Err(RenderError::Empty);
    }

    let side = (f.len() as f64).sqrt().round() as usize;
    if side * side != f.len() {
        return Err(RenderError::NotSquare(f.len()));
    }

    let pixels = normalize_image(f);
    let img = GrayImage::from_fn(side as u32, side as u32, |x, y| {
        Luma([pixels[x as usize * side + y as usize]])
    });

    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}
