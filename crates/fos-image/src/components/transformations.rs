//! Built-in transformations

use tiny_skia::{ColorU8, FillRule, FilterQuality, Paint, PathBuilder, Pattern, Pixmap, SpreadMode, Transform};

use crate::bitmap::Bitmap;
use crate::error::BoxError;
use crate::pool::{BitmapPool, PooledBitmap};
use crate::registry::Transformation;
use crate::request::Size;

/// Desaturate using Rec. 601 luma
#[derive(Debug, Clone, Copy, Default)]
pub struct Grayscale;

impl Transformation for Grayscale {
    fn cache_key(&self) -> String {
        "grayscale".to_string()
    }

    fn transform(&self, input: &Bitmap, _size: Size, pool: &BitmapPool) -> Result<PooledBitmap, BoxError> {
        let (width, height) = input.dimensions();
        let mut out = pool.checkout(width, height, input.format())?;
        for y in 0..height {
            for x in 0..width {
                if let Some([r, g, b, a]) = input.pixel(x, y) {
                    let luma = ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000) as u8;
                    out.set_pixel(x, y, [luma, luma, luma, a]);
                }
            }
        }
        Ok(out)
    }
}

/// Center-crop to a square and mask to the inscribed circle
#[derive(Debug, Clone, Copy, Default)]
pub struct CircleCrop;

impl Transformation for CircleCrop {
    fn cache_key(&self) -> String {
        "circle_crop".to_string()
    }

    fn transform(&self, input: &Bitmap, _size: Size, pool: &BitmapPool) -> Result<PooledBitmap, BoxError> {
        let (width, height) = input.dimensions();
        let side = width.min(height);

        // tiny-skia works in premultiplied RGBA
        let mut src = Pixmap::new(width, height).ok_or("cannot crop an empty bitmap")?;
        for (i, px) in src.pixels_mut().iter_mut().enumerate() {
            let (x, y) = ((i as u32) % width, (i as u32) / width);
            let [r, g, b, a] = input.pixel(x, y).unwrap_or_default();
            *px = ColorU8::from_rgba(r, g, b, a).premultiply();
        }

        let mut dst = Pixmap::new(side, side).ok_or("cannot crop an empty bitmap")?;
        let offset_x = (width - side) as f32 / 2.0;
        let offset_y = (height - side) as f32 / 2.0;
        let paint = Paint {
            shader: Pattern::new(
                src.as_ref(),
                SpreadMode::Pad,
                FilterQuality::Nearest,
                1.0,
                Transform::from_translate(-offset_x, -offset_y),
            ),
            anti_alias: true,
            ..Default::default()
        };
        let radius = side as f32 / 2.0;
        let circle = PathBuilder::from_circle(radius, radius, radius).ok_or("invalid crop circle")?;
        dst.fill_path(&circle, &paint, FillRule::Winding, Transform::identity(), None);

        let mut out = pool.checkout(side, side, input.format())?;
        for (i, px) in dst.pixels().iter().enumerate() {
            let color = px.demultiply();
            let (x, y) = ((i as u32) % side, (i as u32) / side);
            out.set_pixel(x, y, [color.red(), color.green(), color.blue(), color.alpha()]);
        }
        Ok(out)
    }
}
