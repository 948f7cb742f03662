//! Image requests and their outcomes

use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::abort::AbortSignal;
use crate::bitmap::{Image, PixelFormat};
use crate::cache::CacheKey;
use crate::data::Data;
use crate::error::ImageError;
use crate::listener::EventListener;
use crate::registry::Transformation;
use crate::target::Target;

/// Concrete output size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Size {
    /// Use the source's natural dimensions
    Original,
    /// Bounding box in pixels
    Pixels { width: NonZeroU32, height: NonZeroU32 },
}

impl Size {
    /// Pixel size; zero dimensions are clamped to one pixel
    pub fn pixels(width: u32, height: u32) -> Self {
        Size::Pixels {
            width: NonZeroU32::new(width).unwrap_or(NonZeroU32::MIN),
            height: NonZeroU32::new(height).unwrap_or(NonZeroU32::MIN),
        }
    }

    /// Pixel size, or `None` if either dimension is zero
    pub fn try_pixels(width: u32, height: u32) -> Option<Self> {
        Some(Size::Pixels {
            width: NonZeroU32::new(width)?,
            height: NonZeroU32::new(height)?,
        })
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match self {
            Size::Original => None,
            Size::Pixels { width, height } => Some((width.get(), height.get())),
        }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Size::Original => f.write_str("original"),
            Size::Pixels { width, height } => write!(f, "{}x{}", width, height),
        }
    }
}

/// How a request's size is determined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeSpec {
    Explicit(Size),
    /// Wait for the target to report its measured bounds
    FromTarget,
}

/// How a source is scaled into a pixel bound
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scale {
    /// Whole source fits inside the bound
    #[default]
    Fit,
    /// Source covers the bound
    Fill,
}

/// Read/write permission for a cache tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    #[default]
    Enabled,
    ReadOnly,
    WriteOnly,
    Disabled,
}

impl CachePolicy {
    pub fn read_enabled(self) -> bool {
        matches!(self, CachePolicy::Enabled | CachePolicy::ReadOnly)
    }

    pub fn write_enabled(self) -> bool {
        matches!(self, CachePolicy::Enabled | CachePolicy::WriteOnly)
    }
}

/// Where the data that satisfied a request came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataSource {
    Memory,
    Disk,
    Network,
}

/// Per-request parameters handed to fetchers and decoders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    pub size: Size,
    pub scale: Scale,
    pub pixel_format: PixelFormat,
    pub disk_cache_policy: CachePolicy,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            size: Size::Original,
            scale: Scale::Fit,
            pixel_format: PixelFormat::Rgba8888,
            disk_cache_policy: CachePolicy::Enabled,
        }
    }
}

/// A request for a visual
///
/// Built with the `with_*` methods and handed by value to the loader;
/// one request drives exactly one pipeline run.
#[derive(Clone, Default)]
pub struct ImageRequest {
    data: Option<Data>,
    target: Option<Arc<dyn Target>>,
    size: Option<Size>,
    scale: Option<Scale>,
    pixel_format: Option<PixelFormat>,
    memory_cache_policy: Option<CachePolicy>,
    disk_cache_policy: Option<CachePolicy>,
    transformations: Vec<Arc<dyn Transformation>>,
    listener: Option<Arc<dyn EventListener>>,
    placeholder: Option<Image>,
    error: Option<Image>,
    fallback: Option<Image>,
    signal: Option<AbortSignal>,
}

impl ImageRequest {
    /// Request for `data`
    pub fn new(data: impl Into<Data>) -> Self {
        Self {
            data: Some(data.into()),
            ..Default::default()
        }
    }

    /// Request with no data; always fails with [`ImageError::NoData`]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Request for optional data
    pub fn from_option(data: Option<Data>) -> Self {
        Self {
            data,
            ..Default::default()
        }
    }

    pub fn with_target(mut self, target: Arc<dyn Target>) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_size(mut self, size: Size) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_scale(mut self, scale: Scale) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn with_pixel_format(mut self, format: PixelFormat) -> Self {
        self.pixel_format = Some(format);
        self
    }

    pub fn with_memory_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.memory_cache_policy = Some(policy);
        self
    }

    pub fn with_disk_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.disk_cache_policy = Some(policy);
        self
    }

    pub fn with_transformation(mut self, transformation: Arc<dyn Transformation>) -> Self {
        self.transformations.push(transformation);
        self
    }

    pub fn with_transformations(mut self, transformations: Vec<Arc<dyn Transformation>>) -> Self {
        self.transformations = transformations;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn with_placeholder(mut self, image: Image) -> Self {
        self.placeholder = Some(image);
        self
    }

    /// Visual shown on the target for failures other than missing data
    pub fn with_error(mut self, image: Image) -> Self {
        self.error = Some(image);
        self
    }

    /// Visual shown on the target when the request has no data
    pub fn with_fallback(mut self, image: Image) -> Self {
        self.fallback = Some(image);
        self
    }

    pub fn with_signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn data(&self) -> Option<&Data> {
        self.data.as_ref()
    }

    pub fn target(&self) -> Option<&Arc<dyn Target>> {
        self.target.as_ref()
    }

    /// Explicit size, else the target's measurement, else the original size
    pub fn size_spec(&self) -> SizeSpec {
        match (self.size, &self.target) {
            (Some(size), _) => SizeSpec::Explicit(size),
            (None, Some(_)) => SizeSpec::FromTarget,
            (None, None) => SizeSpec::Explicit(Size::Original),
        }
    }

    pub fn scale(&self) -> Option<Scale> {
        self.scale
    }

    pub fn pixel_format(&self) -> Option<PixelFormat> {
        self.pixel_format
    }

    pub fn memory_cache_policy(&self) -> Option<CachePolicy> {
        self.memory_cache_policy
    }

    pub fn disk_cache_policy(&self) -> Option<CachePolicy> {
        self.disk_cache_policy
    }

    pub fn transformations(&self) -> &[Arc<dyn Transformation>] {
        &self.transformations
    }

    pub fn listener(&self) -> Option<&Arc<dyn EventListener>> {
        self.listener.as_ref()
    }

    pub fn placeholder(&self) -> Option<&Image> {
        self.placeholder.as_ref()
    }

    pub fn error(&self) -> Option<&Image> {
        self.error.as_ref()
    }

    pub fn fallback(&self) -> Option<&Image> {
        self.fallback.as_ref()
    }

    pub fn signal(&self) -> Option<&AbortSignal> {
        self.signal.as_ref()
    }
}

impl fmt::Debug for ImageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageRequest")
            .field("data", &self.data)
            .field("has_target", &self.target.is_some())
            .field("size", &self.size)
            .field("memory_cache_policy", &self.memory_cache_policy)
            .field("disk_cache_policy", &self.disk_cache_policy)
            .field("transformations", &self.transformations.len())
            .finish()
    }
}

/// A delivered visual
#[derive(Debug, Clone)]
pub struct SuccessResult {
    pub image: Image,
    pub data_source: DataSource,
    pub is_sampled: bool,
    pub memory_cache_key: Option<CacheKey>,
}

/// A failed request
#[derive(Debug, Clone)]
pub struct ErrorResult {
    pub error: ImageError,
    /// Visual shown on the target, if any
    pub image: Option<Image>,
}

/// Terminal outcome of a request
#[derive(Debug, Clone)]
pub enum ImageResult {
    Success(SuccessResult),
    /// Fetched without decoding; nothing consumed the decoded form
    Fetched { data_source: DataSource },
    Error(ErrorResult),
    Cancelled,
}

impl ImageResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ImageResult::Success(_) | ImageResult::Fetched { .. })
    }

    pub fn image(&self) -> Option<&Image> {
        match self {
            ImageResult::Success(success) => Some(&success.image),
            _ => None,
        }
    }

    /// Convert into the decoded result or the failure
    pub fn into_result(self) -> Result<SuccessResult, ImageError> {
        match self {
            ImageResult::Success(success) => Ok(success),
            ImageResult::Fetched { .. } => Err(ImageError::NotDecoded),
            ImageResult::Error(error) => Err(error.error),
            ImageResult::Cancelled => Err(ImageError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_gates() {
        assert!(CachePolicy::Enabled.read_enabled() && CachePolicy::Enabled.write_enabled());
        assert!(CachePolicy::ReadOnly.read_enabled() && !CachePolicy::ReadOnly.write_enabled());
        assert!(!CachePolicy::WriteOnly.read_enabled() && CachePolicy::WriteOnly.write_enabled());
        assert!(!CachePolicy::Disabled.read_enabled() && !CachePolicy::Disabled.write_enabled());
    }

    #[test]
    fn test_size_positive() {
        assert_eq!(Size::try_pixels(0, 10), None);
        assert_eq!(Size::pixels(0, 10).dimensions(), Some((1, 10)));
        assert_eq!(Size::pixels(30, 20).to_string(), "30x20");
    }

    #[test]
    fn test_size_spec_defaults() {
        assert_eq!(ImageRequest::new("a.png").size_spec(), SizeSpec::Explicit(Size::Original));
        let explicit = ImageRequest::new("a.png").with_size(Size::pixels(4, 4));
        assert_eq!(explicit.size_spec(), SizeSpec::Explicit(Size::pixels(4, 4)));
    }

    #[test]
    fn test_empty_request_has_no_data() {
        assert!(ImageRequest::empty().data().is_none());
        assert!(ImageRequest::from_option(None).data().is_none());
    }

    #[test]
    fn test_into_result() {
        let fetched = ImageResult::Fetched { data_source: DataSource::Network };
        assert!(fetched.is_success());
        assert!(matches!(fetched.into_result(), Err(ImageError::NotDecoded)));
        assert!(matches!(ImageResult::Cancelled.into_result(), Err(ImageError::Cancelled)));
    }
}
