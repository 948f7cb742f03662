//! Loader Configuration

use std::time::Duration;

use serde::Deserialize;

use crate::bitmap::PixelFormat;
use crate::request::{CachePolicy, Scale, Size};

/// Image loader configuration options
///
/// Every field has a default, so partial JSON documents are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Maximum bytes of decoded images held by the memory cache
    pub memory_cache_max_bytes: usize,

    /// Maximum bytes of released buffers held by the bitmap pool
    pub bitmap_pool_max_bytes: usize,

    /// Memory-cache policy for requests that don't set one
    pub memory_cache_policy: CachePolicy,

    /// Disk-cache policy for requests that don't set one
    pub disk_cache_policy: CachePolicy,

    /// Scale for requests that don't set one
    pub scale: Scale,

    /// Pixel format for requests that don't set one
    pub pixel_format: PixelFormat,

    /// Size used when a target reports zero bounds or cannot be measured;
    /// `None` means the source's original size
    pub fallback_size: Option<(u32, u32)>,

    /// How long to wait for a target measurement
    pub measure_timeout_ms: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            memory_cache_max_bytes: 50 * 1024 * 1024, // 50MB
            bitmap_pool_max_bytes: 32 * 1024 * 1024,  // 32MB
            memory_cache_policy: CachePolicy::Enabled,
            disk_cache_policy: CachePolicy::Enabled,
            scale: Scale::Fit,
            pixel_format: PixelFormat::Rgba8888,
            fallback_size: None,
            measure_timeout_ms: 5_000,
        }
    }
}

impl LoaderConfig {
    /// Parse a JSON document
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn fallback_size(&self) -> Size {
        match self.fallback_size {
            Some((width, height)) => Size::pixels(width, height),
            None => Size::Original,
        }
    }

    pub fn measure_timeout(&self) -> Duration {
        Duration::from_millis(self.measure_timeout_ms)
    }
}
