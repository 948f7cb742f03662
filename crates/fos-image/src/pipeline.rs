//! Request pipeline
//!
//! Drives one request through map, size resolution, the memory cache,
//! fetch, decode, transform and delivery. Every run ends in exactly one of
//! success, error or cancellation.

use std::sync::Arc;

use tracing::Instrument;

use crate::abort::AbortSignal;
use crate::bitmap::{Bitmap, Drawable, Image};
use crate::cache::{CacheKey, CachedImage};
use crate::error::{ImageError, NoDecoderError, Stage};
use crate::listener::{EventListener, Listeners, StageSpan};
use crate::loader::LoaderInner;
use crate::pool::{BitmapPool, PooledBitmap};
use crate::registry::{FetchResult, Transformation};
use crate::request::{
    CachePolicy, DataSource, ErrorResult, ImageRequest, ImageResult, Options, Size, SuccessResult,
};
use crate::scaling::scaled_dimensions;

/// Consumers of a decoded visual
///
/// When none of them exists the decode stage is skipped and the request
/// completes as [`ImageResult::Fetched`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeDemand {
    /// The caller awaits the result (`execute`/`get`)
    pub synchronous_consumer: bool,
    /// The result will be written to the memory cache
    pub memory_cache_write: bool,
    /// The target wants a drawable visual
    pub target_requires_decoded: bool,
}

impl DecodeDemand {
    pub fn requires_decode(&self) -> bool {
        self.synchronous_consumer || self.memory_cache_write || self.target_requires_decoded
    }
}

enum Halt {
    Failed(ImageError),
    Cancelled,
}

impl From<ImageError> for Halt {
    fn from(error: ImageError) -> Self {
        Halt::Failed(error)
    }
}

enum Delivery {
    Image(SuccessResult),
    Fetched(DataSource),
}

/// Visual between decode and delivery
enum Working {
    Pooled(PooledBitmap),
    Image(Image),
}

impl Working {
    fn into_image(self) -> Image {
        match self {
            Working::Pooled(bitmap) => Image::from_bitmap(bitmap.into_bitmap()),
            Working::Image(image) => image,
        }
    }
}

/// Raster fed to the next transformation
enum Raster {
    Pooled(PooledBitmap),
    Shared(Arc<Bitmap>),
}

impl Raster {
    fn bitmap(&self) -> &Bitmap {
        match self {
            Raster::Pooled(bitmap) => &**bitmap,
            Raster::Shared(bitmap) => &**bitmap,
        }
    }

    /// Return a superseded buffer to the pool if nothing else holds it
    fn release(self, pool: &BitmapPool) {
        match self {
            Raster::Pooled(bitmap) => drop(bitmap),
            Raster::Shared(bitmap) => {
                if let Ok(bitmap) = Arc::try_unwrap(bitmap) {
                    pool.release(bitmap);
                }
            }
        }
    }

    fn into_pooled(self, pool: &BitmapPool) -> PooledBitmap {
        match self {
            Raster::Pooled(bitmap) => bitmap,
            Raster::Shared(bitmap) => pool.adopt(Arc::unwrap_or_clone(bitmap)),
        }
    }
}

/// Fires `on_cancel` if the run is dropped before it settles
struct Terminal<'a> {
    listeners: &'a Listeners,
    request: &'a ImageRequest,
    settled: bool,
}

impl Drop for Terminal<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::debug!("request dropped before completion");
            self.listeners.on_cancel(self.request);
        }
    }
}

async fn aborted(signal: Option<&AbortSignal>) {
    match signal {
        Some(signal) => signal.aborted().await,
        None => smol::future::pending().await,
    }
}

/// Run `request` to its terminal outcome
///
/// `synchronous` marks a caller that awaits the result. `dispose` is the
/// signal of the [`Disposable`](crate::loader::Disposable) handed out by
/// `enqueue`, watched alongside the request's own signal.
pub(crate) async fn run(
    inner: &LoaderInner,
    request: ImageRequest,
    synchronous: bool,
    dispose: Option<AbortSignal>,
) -> ImageResult {
    let id = inner.next_request_id();
    let span = tracing::debug_span!("image_request", id);
    let pipeline = Pipeline {
        inner,
        listeners: Listeners::new(inner.listener.as_ref(), request.listener()),
        request: &request,
        synchronous,
        dispose,
    };
    pipeline.run().instrument(span).await
}

struct Pipeline<'a> {
    inner: &'a LoaderInner,
    listeners: Listeners,
    request: &'a ImageRequest,
    synchronous: bool,
    dispose: Option<AbortSignal>,
}

impl Pipeline<'_> {
    fn is_cancelled(&self) -> bool {
        self.request.signal().is_some_and(AbortSignal::is_aborted)
            || self.dispose.as_ref().is_some_and(AbortSignal::is_aborted)
    }

    async fn run(&self) -> ImageResult {
        let request = self.request;
        tracing::debug!(?request, "request started");
        self.listeners.on_start(request);
        if let Some(target) = request.target() {
            target.on_start(request.placeholder());
        }

        let mut terminal = Terminal {
            listeners: &self.listeners,
            request,
            settled: false,
        };

        // Polled first, so an already-aborted request never enters a stage
        let cancelled = async {
            smol::future::or(aborted(request.signal()), aborted(self.dispose.as_ref())).await;
            Err(Halt::Cancelled)
        };
        let outcome = smol::future::or(cancelled, self.stages()).await;
        terminal.settled = true;

        match outcome {
            Ok(Delivery::Image(success)) => {
                tracing::debug!(data_source = ?success.data_source, sampled = success.is_sampled, "request succeeded");
                if let Some(target) = request.target() {
                    target.on_success(&success.image, success.data_source);
                }
                self.listeners.on_success(request, success.data_source);
                ImageResult::Success(success)
            }
            Ok(Delivery::Fetched(data_source)) => {
                tracing::debug!(?data_source, "request completed without decoding");
                self.listeners.on_success(request, data_source);
                ImageResult::Fetched { data_source }
            }
            Err(Halt::Failed(error)) => {
                tracing::warn!(%error, "request failed");
                let image = match error {
                    ImageError::NoData => request.fallback(),
                    _ => request.error(),
                }
                .cloned();
                if let Some(target) = request.target() {
                    target.on_error(image.as_ref());
                }
                self.listeners.on_error(request, &error);
                ImageResult::Error(ErrorResult { error, image })
            }
            Err(Halt::Cancelled) => {
                tracing::debug!(reason = ?request.signal().and_then(AbortSignal::reason), "request cancelled");
                self.listeners.on_cancel(request);
                ImageResult::Cancelled
            }
        }
    }

    async fn stages(&self) -> Result<Delivery, Halt> {
        let inner = self.inner;
        let request = self.request;
        let listener: &dyn EventListener = &self.listeners;
        let config = &inner.config;

        let data = request.data().ok_or(ImageError::NoData)?;
        if !inner.registry.claims(data) {
            return Err(ImageError::UnsupportedData {
                data_type: data.type_name(),
            }
            .into());
        }

        let span = StageSpan::map(listener, request, data);
        let resolved = span.finish(inner.registry.resolve(data))?;

        let span = StageSpan::resolve_size(listener, request);
        let size = inner.size_resolver.resolve(request).await;
        span.complete();

        let options = Options {
            size,
            scale: request.scale().unwrap_or(config.scale),
            pixel_format: request.pixel_format().unwrap_or(config.pixel_format),
            disk_cache_policy: request.disk_cache_policy().unwrap_or(config.disk_cache_policy),
        };
        let memory_policy = request.memory_cache_policy().unwrap_or(config.memory_cache_policy);
        let transformations: Vec<Arc<dyn Transformation>> = inner
            .registry
            .transformations()
            .iter()
            .chain(request.transformations())
            .cloned()
            .collect();
        let cache_key = inner.registry.key(&resolved.data).await.map(|data| {
            CacheKey::new(data, size)
                .with_options(&options)
                .with_transformations(transformations.iter().map(|t| t.cache_key()).collect())
        });

        if let Some(hit) = self.read_memory_cache(cache_key.as_ref(), memory_policy) {
            return Ok(Delivery::Image(hit));
        }

        let fetcher = &resolved.fetcher;
        let span = StageSpan::fetch(listener, request, fetcher.name());
        let fetched = span.finish(
            fetcher
                .fetch(&resolved.data, &options)
                .await
                .map_err(|e| ImageError::stage(Stage::Fetch, e)),
        )?;

        let demand = DecodeDemand {
            synchronous_consumer: self.synchronous,
            memory_cache_write: cache_key.is_some() && memory_policy.write_enabled(),
            target_requires_decoded: request.target().is_some_and(|target| target.requires_decoded()),
        };
        if !demand.requires_decode() {
            tracing::debug!(?demand, "no consumer for the decoded image, skipping decode");
            return Ok(Delivery::Fetched(fetched.data_source()));
        }

        let (working, is_sampled, data_source) = match fetched {
            FetchResult::Source { source, data_source } => {
                let decoder = inner.registry.decoder_for(&source).cloned().ok_or_else(|| {
                    ImageError::stage(
                        Stage::Decode,
                        Box::new(NoDecoderError {
                            mime_type: source.mime_type().map(str::to_string),
                        }),
                    )
                })?;
                tracing::trace!(bytes = source.len(), decoder = decoder.name(), "decoding");
                let span = StageSpan::decode(listener, request, decoder.name());
                let decoded = span.finish(
                    decoder
                        .decode(&inner.pool, source, &options)
                        .await
                        .map_err(|e| ImageError::stage(Stage::Decode, e)),
                )?;
                (Working::Pooled(decoded.bitmap), decoded.is_sampled, data_source)
            }
            FetchResult::Decoded {
                image,
                is_sampled,
                data_source,
            } => (Working::Image(image), is_sampled, data_source),
        };

        let working = if transformations.is_empty() {
            working
        } else {
            let span = StageSpan::transform(listener, request, transformations.len());
            match self.apply_transformations(working, &transformations, &options) {
                Ok(bitmap) => {
                    span.complete();
                    Working::Pooled(bitmap)
                }
                // Leaves the span abandoned
                Err(Halt::Cancelled) => return Err(Halt::Cancelled),
                Err(halt) => {
                    span.fail();
                    return Err(halt);
                }
            }
        };

        let image = working.into_image();
        if let Some(key) = &cache_key {
            if memory_policy.write_enabled() {
                inner.memory_cache.put(
                    key.clone(),
                    CachedImage {
                        image: image.clone(),
                        is_sampled,
                    },
                );
            }
        }

        Ok(Delivery::Image(SuccessResult {
            image,
            data_source,
            is_sampled,
            memory_cache_key: cache_key,
        }))
    }

    fn read_memory_cache(&self, key: Option<&CacheKey>, policy: CachePolicy) -> Option<SuccessResult> {
        if !policy.read_enabled() {
            return None;
        }
        let key = key?;
        let hit = self.inner.memory_cache.get(key)?;
        tracing::debug!(key = %key.data, size = %key.size, "memory cache hit");
        Some(SuccessResult {
            image: hit.image,
            data_source: DataSource::Memory,
            is_sampled: hit.is_sampled,
            memory_cache_key: Some(key.clone()),
        })
    }

    fn apply_transformations(
        &self,
        working: Working,
        transformations: &[Arc<dyn Transformation>],
        options: &Options,
    ) -> Result<PooledBitmap, Halt> {
        let pool = &self.inner.pool;
        let mut current = match working {
            Working::Pooled(bitmap) => Raster::Pooled(bitmap),
            Working::Image(Image::Bitmap(bitmap)) => Raster::Shared(bitmap),
            Working::Image(Image::Drawable(drawable)) => Raster::Pooled(self.rasterize(drawable.as_ref(), options)?),
        };

        for transformation in transformations {
            if self.is_cancelled() {
                current.release(pool);
                return Err(Halt::Cancelled);
            }
            let next = transformation
                .transform(current.bitmap(), options.size, pool)
                .map_err(|e| ImageError::stage(Stage::Transform, e))?;
            current.release(pool);
            current = Raster::Pooled(next);
        }

        Ok(current.into_pooled(pool))
    }

    /// Draw a non-raster visual into a pooled buffer
    fn rasterize(&self, drawable: &dyn Drawable, options: &Options) -> Result<PooledBitmap, ImageError> {
        let (width, height) = match (drawable.intrinsic_size(), options.size) {
            (Some(intrinsic), size) => scaled_dimensions(intrinsic, size, options.scale),
            (None, Size::Pixels { width, height }) => (width.get(), height.get()),
            (None, Size::Original) => {
                return Err(ImageError::stage(
                    Stage::Transform,
                    "drawable has no intrinsic size and the request has no explicit size".into(),
                ));
            }
        };
        let mut canvas = self
            .inner
            .pool
            .checkout(width, height, options.pixel_format)
            .map_err(|e| ImageError::stage(Stage::Transform, Box::new(e)))?;
        drawable.draw(&mut canvas);
        Ok(canvas)
    }
}
