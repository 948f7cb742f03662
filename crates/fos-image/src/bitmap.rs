//! Raster buffers and visual resources

use std::fmt;
use std::sync::Arc;

/// Pixel layout of a raster buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// 8 bits per channel, straight alpha
    #[default]
    Rgba8888,
    /// 16-bit packed, opaque
    Rgb565,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba8888 => 4,
            PixelFormat::Rgb565 => 2,
        }
    }
}

/// Requested dimensions don't fit in memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("bitmap of {width}x{height} ({format:?}) is too large")]
pub struct BitmapTooLarge {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// A mutable, pixel-addressable image buffer
#[derive(Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

impl Bitmap {
    /// Create a zeroed (transparent) bitmap
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Result<Self, BitmapTooLarge> {
        let len = buffer_len(width, height, format).ok_or(BitmapTooLarge { width, height, format })?;
        Ok(Self {
            width,
            height,
            format,
            data: vec![0; len],
        })
    }

    /// Zero-sized placeholder
    pub(crate) fn empty() -> Self {
        Self {
            width: 0,
            height: 0,
            format: PixelFormat::Rgba8888,
            data: Vec::new(),
        }
    }

    /// Wrap existing pixel data; `None` if the length does not match
    pub fn from_pixels(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Option<Self> {
        if buffer_len(width, height, format) != Some(data.len()) {
            return None;
        }
        Some(Self { width, height, format, data })
    }

    /// Wrap RGBA data
    pub fn from_rgba(pixels: Vec<u8>, width: u32, height: u32) -> Option<Self> {
        Self::from_pixels(pixels, width, height, PixelFormat::Rgba8888)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Memory size in bytes
    pub fn byte_size(&self) -> usize {
        self.data.len()
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    /// Get pixel at (x, y) as RGBA
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = self.offset(x, y);
        match self.format {
            PixelFormat::Rgba8888 => Some([
                self.data[idx],
                self.data[idx + 1],
                self.data[idx + 2],
                self.data[idx + 3],
            ]),
            PixelFormat::Rgb565 => {
                let packed = u16::from_le_bytes([self.data[idx], self.data[idx + 1]]);
                Some(unpack_565(packed))
            }
        }
    }

    /// Set pixel at (x, y) from RGBA
    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = self.offset(x, y);
        match self.format {
            PixelFormat::Rgba8888 => self.data[idx..idx + 4].copy_from_slice(&rgba),
            PixelFormat::Rgb565 => {
                let packed = pack_565(rgba).to_le_bytes();
                self.data[idx..idx + 2].copy_from_slice(&packed);
            }
        }
    }

    /// Fill every pixel from tightly packed RGBA data of the same dimensions
    pub fn fill_from_rgba(&mut self, rgba: &[u8]) {
        match self.format {
            PixelFormat::Rgba8888 => {
                let len = self.data.len().min(rgba.len());
                self.data[..len].copy_from_slice(&rgba[..len]);
            }
            PixelFormat::Rgb565 => {
                for (dst, src) in self.data.chunks_exact_mut(2).zip(rgba.chunks_exact(4)) {
                    let packed = pack_565([src[0], src[1], src[2], src[3]]);
                    dst.copy_from_slice(&packed.to_le_bytes());
                }
            }
        }
    }

    /// Tightly packed RGBA copy of the pixels
    pub fn to_rgba(&self) -> Vec<u8> {
        match self.format {
            PixelFormat::Rgba8888 => self.data.clone(),
            PixelFormat::Rgb565 => self
                .data
                .chunks_exact(2)
                .flat_map(|px| unpack_565(u16::from_le_bytes([px[0], px[1]])))
                .collect(),
        }
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * self.format.bytes_per_pixel()
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .finish()
    }
}

/// Byte length of a `width` x `height` buffer; `None` past `isize::MAX`
fn buffer_len(width: u32, height: u32, format: PixelFormat) -> Option<usize> {
    (width as usize)
        .checked_mul(height as usize)?
        .checked_mul(format.bytes_per_pixel())
        .filter(|&len| len <= isize::MAX as usize)
}

fn pack_565([r, g, b, _]: [u8; 4]) -> u16 {
    ((r as u16 >> 3) << 11) | ((g as u16 >> 2) << 5) | (b as u16 >> 3)
}

fn unpack_565(packed: u16) -> [u8; 4] {
    let r = ((packed >> 11) & 0x1f) as u8;
    let g = ((packed >> 5) & 0x3f) as u8;
    let b = (packed & 0x1f) as u8;
    [(r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2), 255]
}

/// A non-raster visual that can draw itself into a bitmap
pub trait Drawable: Send + Sync + fmt::Debug {
    /// Natural size, if the drawable has one
    fn intrinsic_size(&self) -> Option<(u32, u32)>;

    /// Paint into `canvas`, covering its full extent
    fn draw(&self, canvas: &mut Bitmap);
}

/// Solid color with no intrinsic size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorDrawable {
    pub rgba: [u8; 4],
}

impl ColorDrawable {
    pub fn new(rgba: [u8; 4]) -> Self {
        Self { rgba }
    }
}

impl Drawable for ColorDrawable {
    fn intrinsic_size(&self) -> Option<(u32, u32)> {
        None
    }

    fn draw(&self, canvas: &mut Bitmap) {
        for y in 0..canvas.height() {
            for x in 0..canvas.width() {
                canvas.set_pixel(x, y, self.rgba);
            }
        }
    }
}

/// Visual resource delivered to consumers
#[derive(Clone)]
pub enum Image {
    Bitmap(Arc<Bitmap>),
    Drawable(Arc<dyn Drawable>),
}

impl Image {
    pub fn from_bitmap(bitmap: Bitmap) -> Self {
        Image::Bitmap(Arc::new(bitmap))
    }

    pub fn from_drawable(drawable: impl Drawable + 'static) -> Self {
        Image::Drawable(Arc::new(drawable))
    }

    /// Pixel dimensions, when known
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match self {
            Image::Bitmap(bitmap) => Some(bitmap.dimensions()),
            Image::Drawable(drawable) => drawable.intrinsic_size(),
        }
    }

    pub fn as_bitmap(&self) -> Option<&Arc<Bitmap>> {
        match self {
            Image::Bitmap(bitmap) => Some(bitmap),
            Image::Drawable(_) => None,
        }
    }

    /// Approximate memory held by this visual
    pub fn byte_size(&self) -> usize {
        match self {
            Image::Bitmap(bitmap) => bitmap.byte_size(),
            Image::Drawable(drawable) => drawable
                .intrinsic_size()
                .map(|(w, h)| w as usize * h as usize * 4)
                .unwrap_or(std::mem::size_of_val(drawable.as_ref())),
        }
    }

    /// Whether both handles refer to the same underlying resource
    pub fn same_instance(&self, other: &Image) -> bool {
        match (self, other) {
            (Image::Bitmap(a), Image::Bitmap(b)) => Arc::ptr_eq(a, b),
            (Image::Drawable(a), Image::Drawable(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Image::Bitmap(bitmap) => f.debug_tuple("Bitmap").field(bitmap).finish(),
            Image::Drawable(drawable) => f.debug_tuple("Drawable").field(drawable).finish(),
        }
    }
}
