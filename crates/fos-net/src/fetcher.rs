//! HTTP image fetcher
//!
//! Serves `http:`/`https:` URLs for the image pipeline, reading through and
//! writing to a [`DiskCache`] as the request's disk-cache policy allows.

use std::sync::Arc;

use async_trait::async_trait;
use fos_image::{BoxError, Data, DataSource, FetchResult, Fetcher, ImageSource, Options};
use url::Url;

use crate::cache::DiskCache;
use crate::transport::{ReqwestTransport, Transport};
use crate::NetError;

/// Fetches images over HTTP
#[derive(Clone)]
pub struct HttpFetcher {
    transport: Arc<dyn Transport>,
    cache: Option<DiskCache>,
}

impl HttpFetcher {
    /// Fetcher over the default reqwest transport, without a disk cache
    pub fn new() -> Result<Self, NetError> {
        Ok(Self::with_transport(ReqwestTransport::new()?))
    }

    pub fn with_transport(transport: impl Transport + 'static) -> Self {
        Self {
            transport: Arc::new(transport),
            cache: None,
        }
    }

    pub fn with_disk_cache(mut self, cache: DiskCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn disk_cache(&self) -> Option<&DiskCache> {
        self.cache.as_ref()
    }

    fn url(data: &Data) -> Result<&Url, NetError> {
        data.downcast_ref::<Url>()
            .ok_or_else(|| NetError::UnsupportedScheme(data.type_name().to_string()))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    fn handles(&self, data: &Data) -> bool {
        data.downcast_ref::<Url>()
            .is_some_and(|url| matches!(url.scheme(), "http" | "https"))
    }

    async fn fetch(&self, data: &Data, options: &Options) -> Result<FetchResult, BoxError> {
        let url = Self::url(data)?;
        let policy = options.disk_cache_policy;

        if let Some(cache) = self.cache.as_ref().filter(|_| policy.read_enabled()) {
            match cache.get(url.as_str()).await {
                Ok(Some(entry)) => {
                    tracing::debug!(%url, bytes = entry.body.len(), "disk cache hit");
                    return Ok(FetchResult::Source {
                        source: ImageSource::new(entry.body, entry.content_type),
                        data_source: DataSource::Disk,
                    });
                }
                Ok(None) => {}
                Err(err) => tracing::warn!(%url, %err, "disk cache read failed"),
            }
        }

        let response = self.transport.get(url).await?;
        if !response.is_success() {
            return Err(NetError::HttpError { status: response.status }.into());
        }
        let content_type = response.content_type().map(str::to_string);

        if let Some(cache) = self.cache.as_ref().filter(|_| policy.write_enabled()) {
            if let Err(err) = cache.put(url.as_str(), &response.body, content_type.as_deref()).await {
                tracing::warn!(%url, %err, "disk cache write failed");
            }
        }

        Ok(FetchResult::Source {
            source: ImageSource::new(response.body, content_type),
            data_source: DataSource::Network,
        })
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
