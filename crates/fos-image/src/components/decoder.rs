//! Raster decoder for common formats
//!
//! Supports PNG, JPEG, GIF, WebP via the image crate. Decoding runs on the
//! blocking pool and writes into a pooled buffer at the requested size.

use async_trait::async_trait;
use image::{GenericImageView, ImageFormat as ImgFormat};

use crate::bitmap::BitmapTooLarge;
use crate::error::BoxError;
use crate::pool::BitmapPool;
use crate::registry::{DecodeResult, Decoder, ImageSource};
use crate::request::Options;
use crate::scaling::{is_subsampled, resize_rgba, scaled_dimensions};

/// Supported image formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    WebP,
    Unknown,
}

impl ImageFormat {
    /// Detect format from magic bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        if data.len() < 8 {
            return Self::Unknown;
        }

        // PNG: 89 50 4E 47 0D 0A 1A 0A
        if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
            return Self::Png;
        }

        // JPEG: FF D8 FF
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Self::Jpeg;
        }

        // GIF: GIF87a or GIF89a
        if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
            return Self::Gif;
        }

        // WebP: RIFF....WEBP
        if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
            return Self::WebP;
        }

        Self::Unknown
    }

    /// Get format from file extension
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "png" => Self::Png,
            "jpg" | "jpeg" => Self::Jpeg,
            "gif" => Self::Gif,
            "webp" => Self::WebP,
            _ => Self::Unknown,
        }
    }

    /// Get format from a declared MIME type (parameters ignored)
    pub fn from_mime_type(mime: &str) -> Self {
        let essence = mime.split(';').next().unwrap_or("").trim().to_lowercase();
        match essence.as_str() {
            "image/png" => Self::Png,
            "image/jpeg" | "image/jpg" => Self::Jpeg,
            "image/gif" => Self::Gif,
            "image/webp" => Self::WebP,
            _ => Self::Unknown,
        }
    }

    pub fn mime_type(self) -> Option<&'static str> {
        match self {
            Self::Png => Some("image/png"),
            Self::Jpeg => Some("image/jpeg"),
            Self::Gif => Some("image/gif"),
            Self::WebP => Some("image/webp"),
            Self::Unknown => None,
        }
    }

    /// Magic bytes first, then the declared type
    fn detect(source: &ImageSource, mime_type: Option<&str>) -> Self {
        match Self::from_bytes(source.bytes()) {
            Self::Unknown => mime_type.map(Self::from_mime_type).unwrap_or(Self::Unknown),
            format => format,
        }
    }

    /// Convert to image crate format
    fn to_image_format(self) -> Option<ImgFormat> {
        match self {
            Self::Png => Some(ImgFormat::Png),
            Self::Jpeg => Some(ImgFormat::Jpeg),
            Self::Gif => Some(ImgFormat::Gif),
            Self::WebP => Some(ImgFormat::WebP),
            Self::Unknown => None,
        }
    }
}

/// Image decoding errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum DecodeError {
    #[error("Unsupported image format")]
    UnsupportedFormat,

    #[error("Decode failed: {0}")]
    DecodeFailed(String),

    #[error(transparent)]
    TooLarge(#[from] BitmapTooLarge),
}

/// Decoder backed by the image crate
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterDecoder;

impl RasterDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode into a pooled buffer scaled per `options`
    pub fn decode_blocking(
        pool: &BitmapPool,
        data: &[u8],
        format: ImageFormat,
        options: &Options,
    ) -> Result<DecodeResult, DecodeError> {
        let img_format = format.to_image_format().ok_or(DecodeError::UnsupportedFormat)?;
        let img = image::load_from_memory_with_format(data, img_format)
            .map_err(|e| DecodeError::DecodeFailed(e.to_string()))?;

        let src = img.dimensions();
        let dst = scaled_dimensions(src, options.size, options.scale);
        let mut bitmap = pool.checkout(dst.0, dst.1, options.pixel_format)?;
        let rgba = resize_rgba(img.into_rgba8().into_raw(), src, dst)
            .ok_or_else(|| DecodeError::DecodeFailed("pixel buffer size mismatch".into()))?;
        bitmap.fill_from_rgba(&rgba);

        Ok(DecodeResult {
            bitmap,
            is_sampled: is_subsampled(src, dst),
        })
    }
}

#[async_trait]
impl Decoder for RasterDecoder {
    fn handles(&self, source: &ImageSource, mime_type: Option<&str>) -> bool {
        ImageFormat::detect(source, mime_type) != ImageFormat::Unknown
    }

    async fn decode(
        &self,
        pool: &BitmapPool,
        source: ImageSource,
        options: &Options,
    ) -> Result<DecodeResult, BoxError> {
        let format = ImageFormat::detect(&source, source.mime_type());
        let pool = pool.clone();
        let options = *options;
        let bytes = source.into_bytes();

        let result = smol::unblock(move || Self::decode_blocking(&pool, &bytes, format, &options)).await?;
        Ok(result)
    }

    fn name(&self) -> &'static str {
        "raster"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::PixelFormat;
    use crate::request::{Scale, Size};
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba([10, 20, 30, 255]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImgFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_format_detection_png() {
        let png_header = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        assert_eq!(ImageFormat::from_bytes(&png_header), ImageFormat::Png);
    }

    #[test]
    fn test_format_detection_jpeg() {
        let jpeg_header = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46];
        assert_eq!(ImageFormat::from_bytes(&jpeg_header), ImageFormat::Jpeg);
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ImageFormat::from_extension("png"), ImageFormat::Png);
        assert_eq!(ImageFormat::from_extension("JPG"), ImageFormat::Jpeg);
        assert_eq!(ImageFormat::from_extension("webp"), ImageFormat::WebP);
    }

    #[test]
    fn test_format_from_mime_type() {
        assert_eq!(ImageFormat::from_mime_type("image/png; charset=binary"), ImageFormat::Png);
        assert_eq!(ImageFormat::from_mime_type("text/html"), ImageFormat::Unknown);
    }

    #[test]
    fn test_handles_sniffs_bytes() {
        let decoder = RasterDecoder::new();
        let source = ImageSource::new(png(2, 2), None);
        assert!(decoder.handles(&source, None));
        let text = ImageSource::new(b"<html></html>".to_vec(), Some("text/html".into()));
        assert!(!decoder.handles(&text, text.mime_type()));
    }

    #[test]
    fn test_decode_scales_into_pool_buffer() {
        let pool = BitmapPool::new(1024 * 1024);
        let options = Options {
            size: Size::pixels(10, 10),
            ..Options::default()
        };
        let result = RasterDecoder::decode_blocking(&pool, &png(40, 20), ImageFormat::Png, &options).unwrap();
        assert_eq!(result.bitmap.dimensions(), (10, 5));
        assert!(result.is_sampled);
        assert_eq!(pool.stats().misses, 1);
    }

    #[test]
    fn test_decode_original_not_sampled() {
        let pool = BitmapPool::default();
        let result =
            RasterDecoder::decode_blocking(&pool, &png(6, 3), ImageFormat::Png, &Options::default()).unwrap();
        assert_eq!(result.bitmap.dimensions(), (6, 3));
        assert!(!result.is_sampled);
        assert_eq!(result.bitmap.pixel(0, 0), Some([10, 20, 30, 255]));
    }

    #[test]
    fn test_decode_rgb565() {
        let pool = BitmapPool::default();
        let options = Options {
            pixel_format: PixelFormat::Rgb565,
            scale: Scale::Fill,
            ..Options::default()
        };
        let result = RasterDecoder::decode_blocking(&pool, &png(4, 4), ImageFormat::Png, &options).unwrap();
        assert_eq!(result.bitmap.format(), PixelFormat::Rgb565);
        assert_eq!(result.bitmap.byte_size(), 4 * 4 * 2);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let pool = BitmapPool::default();
        let err = RasterDecoder::decode_blocking(&pool, &[0x89, 0x50, 0x4E, 0x47, 0, 0, 0, 0], ImageFormat::Png, &Options::default());
        assert!(matches!(err, Err(DecodeError::DecodeFailed(_))));
        // Nothing was checked out
        assert_eq!(pool.stats().misses, 0);
    }

    #[test]
    fn test_async_decode() {
        let pool = BitmapPool::default();
        let decoder = RasterDecoder::new();
        let result = smol::block_on(decoder.decode(&pool, ImageSource::new(png(3, 3), None), &Options::default()))
            .unwrap();
        assert_eq!(result.bitmap.dimensions(), (3, 3));
    }
}
