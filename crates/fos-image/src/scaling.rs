//! Aspect-preserving size math and resampling

use image::imageops::{self, FilterType};
use image::RgbaImage;

use crate::request::{Scale, Size};

/// Output dimensions for a `src`-sized image scaled into `size`
pub fn scaled_dimensions(src: (u32, u32), size: Size, scale: Scale) -> (u32, u32) {
    let (src_w, src_h) = src;
    let Some((bound_w, bound_h)) = size.dimensions() else {
        return src;
    };
    if src_w == 0 || src_h == 0 {
        return src;
    }

    let sx = bound_w as f64 / src_w as f64;
    let sy = bound_h as f64 / src_h as f64;
    let factor = match scale {
        Scale::Fit => sx.min(sy),
        Scale::Fill => sx.max(sy),
    };

    (
        ((src_w as f64 * factor).round() as u32).max(1),
        ((src_h as f64 * factor).round() as u32).max(1),
    )
}

/// Whether producing `dst` from `src` drops source pixels
pub fn is_subsampled(src: (u32, u32), dst: (u32, u32)) -> bool {
    dst.0 < src.0 || dst.1 < src.1
}

/// Resample tightly packed RGBA pixels; `None` if `rgba` does not match `src`
pub fn resize_rgba(rgba: Vec<u8>, src: (u32, u32), dst: (u32, u32)) -> Option<Vec<u8>> {
    let image = RgbaImage::from_raw(src.0, src.1, rgba)?;
    if src == dst {
        return Some(image.into_raw());
    }
    Some(imageops::resize(&image, dst.0, dst.1, FilterType::Triangle).into_raw())
}
