//! fOS Networking
//!
//! HTTP fetching for the image pipeline, backed by a persistent disk cache.
//!
//! # Example
//! ```rust,ignore
//! use fos_image::ImageLoader;
//! use fos_net::{DiskCache, HttpFetcher};
//!
//! let cache = DiskCache::open("/tmp/fos-images", 64 * 1024 * 1024)?;
//! let fetcher = HttpFetcher::new()?.with_disk_cache(cache);
//! let loader = ImageLoader::builder()
//!     .components(move |registry| registry.with_fetcher(fetcher))
//!     .build();
//! ```

mod cache;
mod fetcher;
mod transport;

pub use cache::{CacheEntry, CacheStats, DiskCache};
pub use fetcher::HttpFetcher;
pub use transport::{ReqwestTransport, Transport, TransportConfig};
pub use url::Url;

/// HTTP Response
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Media type without parameters (`image/png; q=1` is `image/png`)
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
            .and_then(|value| value.split(';').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

/// Network error
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("HTTP error: {status}")]
    HttpError { status: u16 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}
