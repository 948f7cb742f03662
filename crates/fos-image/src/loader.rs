//! Image Loader
//!
//! Entry point that owns the registry, the memory cache and the bitmap
//! pool, and runs requests through the pipeline.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use smol::Task;

use crate::abort::AbortController;
use crate::cache::MemoryCache;
use crate::components::default_registry;
use crate::config::LoaderConfig;
use crate::error::ImageError;
use crate::listener::EventListener;
use crate::pipeline;
use crate::pool::BitmapPool;
use crate::registry::Registry;
use crate::request::{ImageRequest, ImageResult, SuccessResult};
use crate::size::SizeResolver;

pub(crate) struct LoaderInner {
    pub(crate) registry: Registry,
    pub(crate) memory_cache: MemoryCache,
    pub(crate) pool: BitmapPool,
    pub(crate) config: LoaderConfig,
    pub(crate) listener: Option<Arc<dyn EventListener>>,
    pub(crate) size_resolver: SizeResolver,
    next_id: AtomicU64,
}

impl LoaderInner {
    pub(crate) fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Loads images
///
/// Cheap to clone; clones share the cache, the pool and the registry.
///
/// ```no_run
/// use fos_image::{ImageLoader, ImageRequest};
///
/// let loader = ImageLoader::new();
/// let result = smol::block_on(loader.get(ImageRequest::new("photos/cat.png")));
/// ```
#[derive(Clone)]
pub struct ImageLoader {
    inner: Arc<LoaderInner>,
}

impl Default for ImageLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageLoader {
    /// Loader with the default configuration and built-in components
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> ImageLoaderBuilder {
        ImageLoaderBuilder::default()
    }

    /// Start `request` in the background
    ///
    /// The result goes to the request's target and listeners. Disposing the
    /// returned handle cancels the request unless it already finished.
    pub fn enqueue(&self, request: ImageRequest) -> Disposable {
        let controller = AbortController::new();
        let signal = controller.signal().clone();
        let inner = Arc::clone(&self.inner);
        let task = smol::spawn(async move { pipeline::run(&inner, request, false, Some(signal)).await });
        Disposable {
            controller,
            task: Some(task),
        }
    }

    /// Run `request` and wait for its outcome
    ///
    /// The caller counts as a consumer, so the source is always decoded.
    pub async fn execute(&self, request: ImageRequest) -> ImageResult {
        pipeline::run(&self.inner, request, true, None).await
    }

    /// Run `request` and return the decoded visual or the failure
    pub async fn get(&self, request: ImageRequest) -> Result<SuccessResult, ImageError> {
        self.execute(request).await.into_result()
    }

    pub fn memory_cache(&self) -> &MemoryCache {
        &self.inner.memory_cache
    }

    pub fn bitmap_pool(&self) -> &BitmapPool {
        &self.inner.pool
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.inner.config
    }
}

impl fmt::Debug for ImageLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageLoader")
            .field("registry", &self.inner.registry)
            .field("memory_cache", &self.inner.memory_cache.stats())
            .field("pool", &self.inner.pool.stats())
            .finish()
    }
}

type Extension = Box<dyn FnOnce(Registry) -> Registry + Send>;

/// Builder for [`ImageLoader`]
#[derive(Default)]
pub struct ImageLoaderBuilder {
    config: LoaderConfig,
    registry: Option<Registry>,
    extensions: Vec<Extension>,
    listener: Option<Arc<dyn EventListener>>,
    memory_cache: Option<MemoryCache>,
    pool: Option<BitmapPool>,
}

impl ImageLoaderBuilder {
    pub fn config(mut self, config: LoaderConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the built-in components entirely
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Add components on top of the built-in ones
    ///
    /// Applied in call order, after the base registry is created.
    pub fn components(mut self, extend: impl FnOnce(Registry) -> Registry + Send + 'static) -> Self {
        self.extensions.push(Box::new(extend));
        self
    }

    /// Listener notified of every request, before the request's own
    pub fn listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Share a memory cache with other loaders
    pub fn memory_cache(mut self, cache: MemoryCache) -> Self {
        self.memory_cache = Some(cache);
        self
    }

    /// Share a bitmap pool with other loaders
    pub fn bitmap_pool(mut self, pool: BitmapPool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn build(self) -> ImageLoader {
        let config = self.config;
        let pool = self
            .pool
            .unwrap_or_else(|| BitmapPool::new(config.bitmap_pool_max_bytes));
        let memory_cache = self
            .memory_cache
            .unwrap_or_else(|| MemoryCache::new(config.memory_cache_max_bytes))
            .with_bitmap_pool(pool.clone());
        let base = self.registry.unwrap_or_else(|| default_registry(&pool));
        let registry = self.extensions.into_iter().fold(base, |registry, extend| extend(registry));
        let size_resolver = SizeResolver::new(config.fallback_size(), config.measure_timeout());

        tracing::debug!(?registry, ?config, "image loader created");
        ImageLoader {
            inner: Arc::new(LoaderInner {
                registry,
                memory_cache,
                pool,
                config,
                listener: self.listener,
                size_resolver,
                next_id: AtomicU64::new(1),
            }),
        }
    }
}

/// Handle to an enqueued request
///
/// Dropping the handle lets the request run to completion.
pub struct Disposable {
    controller: AbortController,
    task: Option<Task<ImageResult>>,
}

impl Disposable {
    /// Cancel the request; no effect once it has finished
    pub fn dispose(&self) {
        self.controller.abort(Some("disposed"));
    }

    pub fn is_disposed(&self) -> bool {
        self.controller.signal().is_aborted()
    }

    /// Wait for the request's terminal outcome
    pub async fn wait(mut self) -> ImageResult {
        match self.task.take() {
            Some(task) => task.await,
            None => ImageResult::Cancelled,
        }
    }
}

impl Drop for Disposable {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.detach();
        }
    }
}

impl fmt::Debug for Disposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposable")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
