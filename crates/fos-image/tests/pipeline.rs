//! Pipeline tests for fos-image
//!
//! Drives whole requests through the loader and checks delivered sizes,
//! decode skipping, hook ordering, error routing and cancellation.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use smol::channel::{Receiver, Sender};

use fos_image::components::{
    BitmapFetcher, BundledResources, BytesFetcher, FileFetcher, FileUrlMapper, Grayscale, ImageFetcher, PathKeyer,
    RasterDecoder, ResourceFetcher, ResourceKeyer, ResourceUrlMapper, StringMapper, UrlKeyer,
};
use fos_image::{
    AbortController, AbortSignal, Bitmap, BitmapPool, BoxError, Bounds, CachePolicy, ColorDrawable, Data, DataSource,
    DecodeResult, Decoder, EventListener, FetchResult, Fetcher, Image, ImageError, ImageLoader, ImageRequest,
    ImageResult, ImageSource, LoaderConfig, Options, PixelFormat, PooledBitmap, Registry, ResourceId, Scale, Size,
    Stage, StageStatus, Target, Transformation, Url,
};

// ============================================================================
// FIXTURES
// ============================================================================

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([200, 40, 40, 255]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, png(width, height)).unwrap();
    path
}

fn solid_bitmap(width: u32, height: u32) -> Bitmap {
    let rgba = [90u8, 90, 90, 255].repeat((width * height) as usize);
    Bitmap::from_rgba(rgba, width, height).unwrap()
}

/// Raster decoder that counts its invocations
struct CountingDecoder {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Decoder for CountingDecoder {
    fn handles(&self, source: &ImageSource, mime_type: Option<&str>) -> bool {
        RasterDecoder.handles(source, mime_type)
    }

    async fn decode(&self, pool: &BitmapPool, source: ImageSource, options: &Options) -> Result<DecodeResult, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        RasterDecoder.decode(pool, source, options).await
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}

/// Serves a PNG for `https:` URLs as if it came over the network
struct FakeNetworkFetcher {
    body: Vec<u8>,
}

#[async_trait]
impl Fetcher for FakeNetworkFetcher {
    fn handles(&self, data: &Data) -> bool {
        data.downcast_ref::<Url>().is_some_and(|url| url.scheme() == "https")
    }

    async fn fetch(&self, _data: &Data, _options: &Options) -> Result<FetchResult, BoxError> {
        Ok(FetchResult::Source {
            source: ImageSource::new(self.body.clone(), Some("image/png".to_string())),
            data_source: DataSource::Network,
        })
    }

    fn name(&self) -> &'static str {
        "network"
    }
}

/// Blocks in fetch until released, announcing when it has started
struct GatedFetcher {
    started: Sender<()>,
    release: Receiver<()>,
}

#[async_trait]
impl Fetcher for GatedFetcher {
    fn handles(&self, data: &Data) -> bool {
        data.downcast_ref::<Url>().is_some_and(|url| url.scheme() == "gate")
    }

    async fn fetch(&self, _data: &Data, _options: &Options) -> Result<FetchResult, BoxError> {
        let _ = self.started.send(()).await;
        let _ = self.release.recv().await;
        Ok(FetchResult::Source {
            source: ImageSource::new(png(4, 4), None),
            data_source: DataSource::Network,
        })
    }

    fn name(&self) -> &'static str {
        "gated"
    }
}

const GATED_SOURCE: &[u8] = b"gated-source-bytes";

/// Holds a pooled buffer while blocked, announcing when it has started
struct GatedDecoder {
    started: Sender<()>,
    release: Receiver<()>,
}

#[async_trait]
impl Decoder for GatedDecoder {
    fn handles(&self, source: &ImageSource, _mime_type: Option<&str>) -> bool {
        source.bytes() == GATED_SOURCE
    }

    async fn decode(&self, pool: &BitmapPool, _source: ImageSource, options: &Options) -> Result<DecodeResult, BoxError> {
        let bitmap = pool.checkout(8, 8, options.pixel_format)?;
        let _ = self.started.send(()).await;
        let _ = self.release.recv().await;
        Ok(DecodeResult {
            bitmap,
            is_sampled: false,
        })
    }

    fn name(&self) -> &'static str {
        "gated"
    }
}

/// Produces a copy, then aborts the request it belongs to
struct AbortingTransformation {
    controller: AbortController,
}

impl Transformation for AbortingTransformation {
    fn cache_key(&self) -> String {
        "aborting".to_string()
    }

    fn transform(&self, input: &Bitmap, _size: Size, pool: &BitmapPool) -> Result<PooledBitmap, BoxError> {
        let mut out = pool.checkout(input.width(), input.height(), input.format())?;
        out.data_mut().copy_from_slice(input.data());
        self.controller.abort(Some("superseded"));
        Ok(out)
    }
}

struct CountingTransformation {
    calls: Arc<AtomicUsize>,
}

impl Transformation for CountingTransformation {
    fn cache_key(&self) -> String {
        "counting".to_string()
    }

    fn transform(&self, input: &Bitmap, size: Size, pool: &BitmapPool) -> Result<PooledBitmap, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Grayscale.transform(input, size, pool)
    }
}

struct FailingTransformation;

impl Transformation for FailingTransformation {
    fn cache_key(&self) -> String {
        "failing".to_string()
    }

    fn transform(&self, _input: &Bitmap, _size: Size, _pool: &BitmapPool) -> Result<PooledBitmap, BoxError> {
        Err("transformation exploded".into())
    }
}

fn error_kind(error: &ImageError) -> String {
    match error {
        ImageError::NoData => "no_data".to_string(),
        ImageError::UnsupportedData { .. } => "unsupported".to_string(),
        ImageError::Stage { stage, .. } => format!("stage:{stage:?}"),
        ImageError::Cancelled => "cancelled".to_string(),
        ImageError::NotDecoded => "not_decoded".to_string(),
    }
}

/// Listener that records every hook as a string
#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn count(&self, prefix: &str) -> usize {
        self.events().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

impl EventListener for Recorder {
    fn on_start(&self, _request: &ImageRequest) {
        self.push("on_start".into());
    }

    fn map_start(&self, _request: &ImageRequest, _input: &Data) {
        self.push("map_start".into());
    }

    fn map_end(&self, _request: &ImageRequest, status: StageStatus) {
        self.push(format!("map_end:{status:?}"));
    }

    fn resolve_size_start(&self, _request: &ImageRequest) {
        self.push("resolve_size_start".into());
    }

    fn resolve_size_end(&self, _request: &ImageRequest, status: StageStatus) {
        self.push(format!("resolve_size_end:{status:?}"));
    }

    fn fetch_start(&self, _request: &ImageRequest, fetcher: &str) {
        self.push(format!("fetch_start:{fetcher}"));
    }

    fn fetch_end(&self, _request: &ImageRequest, status: StageStatus) {
        self.push(format!("fetch_end:{status:?}"));
    }

    fn decode_start(&self, _request: &ImageRequest, decoder: &str) {
        self.push(format!("decode_start:{decoder}"));
    }

    fn decode_end(&self, _request: &ImageRequest, status: StageStatus) {
        self.push(format!("decode_end:{status:?}"));
    }

    fn transform_start(&self, _request: &ImageRequest, count: usize) {
        self.push(format!("transform_start:{count}"));
    }

    fn transform_end(&self, _request: &ImageRequest, status: StageStatus) {
        self.push(format!("transform_end:{status:?}"));
    }

    fn on_success(&self, _request: &ImageRequest, data_source: DataSource) {
        self.push(format!("on_success:{data_source:?}"));
    }

    fn on_error(&self, _request: &ImageRequest, error: &ImageError) {
        self.push(format!("on_error:{}", error_kind(error)));
    }

    fn on_cancel(&self, _request: &ImageRequest) {
        self.push("on_cancel".into());
    }
}

/// Target that records what it was asked to show
#[derive(Default)]
struct RecordingTarget {
    bounds: Option<Bounds>,
    events: Mutex<Vec<String>>,
    shown: Mutex<Option<Image>>,
}

impl RecordingTarget {
    fn measured(width: u32, height: u32) -> Self {
        Self {
            bounds: Some(Bounds::measured_at(width, height)),
            ..Self::default()
        }
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn shown(&self) -> Option<Image> {
        self.shown.lock().unwrap().clone()
    }
}

impl Target for RecordingTarget {
    fn on_start(&self, placeholder: Option<&Image>) {
        self.events.lock().unwrap().push("start".into());
        *self.shown.lock().unwrap() = placeholder.cloned();
    }

    fn on_success(&self, image: &Image, data_source: DataSource) {
        self.events.lock().unwrap().push(format!("success:{data_source:?}"));
        *self.shown.lock().unwrap() = Some(image.clone());
    }

    fn on_error(&self, image: Option<&Image>) {
        self.events.lock().unwrap().push("error".into());
        *self.shown.lock().unwrap() = image.cloned();
    }

    fn bounds(&self) -> Option<Bounds> {
        self.bounds.clone()
    }
}

struct Harness {
    loader: ImageLoader,
    decodes: Arc<AtomicUsize>,
    listener: Arc<Recorder>,
}

/// `RUST_LOG=fos_image=trace cargo test` shows the pipeline's spans
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn harness_with(config: LoaderConfig, extend: impl FnOnce(Registry) -> Registry) -> Harness {
    init_tracing();
    let decodes = Arc::new(AtomicUsize::new(0));
    let listener = Arc::new(Recorder::default());
    let pool = BitmapPool::new(config.bitmap_pool_max_bytes);
    let registry = Registry::new()
        .with_mapper(StringMapper)
        .with_mapper(FileUrlMapper)
        .with_mapper(ResourceUrlMapper)
        .with_keyer(UrlKeyer)
        .with_keyer(PathKeyer)
        .with_keyer(ResourceKeyer)
        .with_fetcher(ImageFetcher::new(pool.clone()))
        .with_fetcher(BitmapFetcher::new(pool.clone()))
        .with_fetcher(BytesFetcher)
        .with_fetcher(FileFetcher)
        .with_decoder(CountingDecoder { calls: decodes.clone() });

    let loader = ImageLoader::builder()
        .config(config)
        .bitmap_pool(pool)
        .registry(extend(registry))
        .listener(listener.clone())
        .build();
    Harness {
        loader,
        decodes,
        listener,
    }
}

fn harness() -> Harness {
    harness_with(LoaderConfig::default(), |registry| registry)
}

// ============================================================================
// SIZE RESOLUTION PER INPUT TYPE
// ============================================================================

#[test]
fn test_every_input_type_fits_target_bounds() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_png(dir.path(), "wide.png", 100, 50);
    let bundle = BundledResources::new();
    bundle.insert_bytes("wide", png(100, 50), Some("image/png"));
    let body = png(100, 50);
    let h = harness_with(LoaderConfig::default(), move |registry| {
        registry
            .with_fetcher(FakeNetworkFetcher { body })
            .with_fetcher(ResourceFetcher::new(bundle))
    });

    let inputs: Vec<(&str, Data)> = vec![
        ("remote", Data::from("https://example.com/wide.png")),
        ("path", Data::from(path)),
        ("resource", Data::from(ResourceId::new("wide"))),
        ("decoded", Data::from(Image::from_bitmap(solid_bitmap(100, 50)))),
        ("raster", Data::from(solid_bitmap(100, 50))),
    ];

    for (label, data) in inputs {
        let target = Arc::new(RecordingTarget::measured(40, 40));
        let request = ImageRequest::new(data).with_target(target.clone());
        let result = smol::block_on(h.loader.get(request)).unwrap();
        assert_eq!(result.image.dimensions(), Some((40, 20)), "{label}");
        assert_eq!(target.events(), vec!["start".to_string(), format!("success:{:?}", result.data_source)]);
    }
}

#[test]
fn test_explicit_size_wins_over_target() {
    let h = harness();
    let target = Arc::new(RecordingTarget::measured(40, 40));
    let request = ImageRequest::new(png(100, 50))
        .with_target(target)
        .with_size(Size::pixels(10, 10));
    let result = smol::block_on(h.loader.get(request)).unwrap();
    assert_eq!(result.image.dimensions(), Some((10, 5)));
    assert!(result.is_sampled);
}

#[test]
fn test_unmeasurable_target_uses_fallback_size() {
    let config = LoaderConfig {
        fallback_size: Some((8, 8)),
        ..LoaderConfig::default()
    };
    let h = harness_with(config, |registry| registry);
    let target = Arc::new(RecordingTarget::measured(0, 0));
    let request = ImageRequest::new(png(16, 16)).with_target(target);
    let result = smol::block_on(h.loader.get(request)).unwrap();
    assert_eq!(result.image.dimensions(), Some((8, 8)));
}

// ============================================================================
// UNSUPPORTED AND MISSING DATA
// ============================================================================

#[test]
fn test_unsupported_data_synchronous() {
    let h = harness();
    let err = smol::block_on(h.loader.get(ImageRequest::new(Data::new(42u32)))).unwrap_err();
    assert!(matches!(err, ImageError::UnsupportedData { .. }));
    assert_eq!(h.listener.events(), vec!["on_start", "on_error:unsupported"]);
}

#[test]
fn test_unsupported_data_enqueued_with_target() {
    let h = harness();
    let target = Arc::new(RecordingTarget::default());
    let request = ImageRequest::new(Data::new(42u32)).with_target(target.clone());
    let result = smol::block_on(h.loader.enqueue(request).wait());
    match result {
        ImageResult::Error(error) => assert!(matches!(error.error, ImageError::UnsupportedData { .. })),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(h.listener.events(), vec!["on_start", "on_error:unsupported"]);
    assert_eq!(target.events(), vec!["start", "error"]);
}

#[test]
fn test_null_data_shows_fallback_and_reports_no_data() {
    let h = harness();
    let fallback = Image::from_drawable(ColorDrawable::new([0, 0, 0, 255]));
    let error_image = Image::from_drawable(ColorDrawable::new([255, 0, 0, 255]));
    let target = Arc::new(RecordingTarget::default());
    let request = ImageRequest::empty()
        .with_target(target.clone())
        .with_fallback(fallback.clone())
        .with_error(error_image);

    let result = smol::block_on(h.loader.execute(request));
    let ImageResult::Error(error) = result else {
        panic!("expected an error");
    };
    assert!(matches!(error.error, ImageError::NoData));
    assert!(target.shown().is_some_and(|shown| shown.same_instance(&fallback)));
    assert!(error.image.is_some_and(|image| image.same_instance(&fallback)));
    assert_eq!(h.listener.events(), vec!["on_start", "on_error:no_data"]);
}

#[test]
fn test_null_data_without_fallback_shows_nothing() {
    let h = harness();
    let target = Arc::new(RecordingTarget::default());
    let request = ImageRequest::empty()
        .with_target(target.clone())
        .with_error(Image::from_drawable(ColorDrawable::new([255, 0, 0, 255])));
    let result = smol::block_on(h.loader.execute(request));
    assert!(matches!(result, ImageResult::Error(_)));
    assert_eq!(target.events(), vec!["start", "error"]);
    assert!(target.shown().is_none());
}

// ============================================================================
// DECODE SKIPPING
// ============================================================================

#[test]
fn test_fire_and_forget_without_memory_cache_skips_decode() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_png(dir.path(), "a.png", 8, 8);
    let h = harness();
    let request = ImageRequest::new(path).with_memory_cache_policy(CachePolicy::Disabled);

    let result = smol::block_on(h.loader.enqueue(request).wait());
    assert!(matches!(result, ImageResult::Fetched { data_source: DataSource::Disk }));
    assert_eq!(h.decodes.load(Ordering::SeqCst), 0);
    assert_eq!(h.listener.count("decode_"), 0);
    assert_eq!(h.listener.events().last().map(String::as_str), Some("on_success:Disk"));
}

#[test]
fn test_get_decodes_once_with_memory_cache_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_png(dir.path(), "a.png", 8, 8);
    let h = harness();
    let request = ImageRequest::new(path).with_memory_cache_policy(CachePolicy::Disabled);

    let result = smol::block_on(h.loader.get(request)).unwrap();
    assert_eq!(result.image.dimensions(), Some((8, 8)));
    assert_eq!(h.decodes.load(Ordering::SeqCst), 1);
    assert!(h.loader.memory_cache().is_empty());
}

#[test]
fn test_fire_and_forget_with_memory_cache_decodes() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_png(dir.path(), "a.png", 8, 8);
    let h = harness();

    let result = smol::block_on(h.loader.enqueue(ImageRequest::new(path)).wait());
    assert!(matches!(result, ImageResult::Success(_)));
    assert_eq!(h.decodes.load(Ordering::SeqCst), 1);
    assert_eq!(h.loader.memory_cache().len(), 1);
}

// ============================================================================
// TRANSFORMATIONS
// ============================================================================

#[test]
fn test_transformations_coerce_drawable_to_raster() {
    let h = harness();
    let drawable = Image::from_drawable(ColorDrawable::new([255, 0, 0, 255]));
    let request = ImageRequest::new(drawable)
        .with_size(Size::pixels(30, 20))
        .with_transformation(Arc::new(Grayscale));

    let result = smol::block_on(h.loader.get(request)).unwrap();
    let bitmap = result.image.as_bitmap().expect("raster output");
    assert_eq!(bitmap.dimensions(), (30, 20));
    assert_eq!(bitmap.pixel(0, 0), Some([76, 76, 76, 255]));
    assert!(h.listener.events().contains(&"transform_end:Completed".to_string()));
}

#[test]
fn test_empty_transformations_keep_original_instance() {
    let h = harness();
    let drawable = Image::from_drawable(ColorDrawable::new([255, 0, 0, 255]));
    let request = ImageRequest::new(drawable.clone()).with_size(Size::pixels(30, 20));

    let result = smol::block_on(h.loader.get(request)).unwrap();
    assert!(result.image.same_instance(&drawable));
    assert_eq!(result.data_source, DataSource::Memory);
    assert_eq!(h.listener.count("transform_"), 0);
    assert_eq!(h.listener.count("decode_"), 0);
}

#[test]
fn test_transformations_apply_in_order() {
    let h = harness();
    let request = ImageRequest::new(Image::from_bitmap(solid_bitmap(30, 20)))
        .with_transformation(Arc::new(fos_image::components::CircleCrop))
        .with_transformation(Arc::new(Grayscale));
    let result = smol::block_on(h.loader.get(request)).unwrap();
    assert_eq!(result.image.dimensions(), Some((20, 20)));
    assert_eq!(h.listener.count("transform_start:2"), 1);
}

#[test]
fn test_failed_transformation_releases_buffer() {
    let h = harness();
    let error_image = Image::from_drawable(ColorDrawable::new([255, 0, 0, 255]));
    let target = Arc::new(RecordingTarget::default());
    let request = ImageRequest::new(png(10, 10))
        .with_target(target.clone())
        .with_error(error_image.clone())
        .with_transformation(Arc::new(FailingTransformation));

    let result = smol::block_on(h.loader.execute(request));
    let ImageResult::Error(error) = result else {
        panic!("expected an error");
    };
    assert_eq!(error.error.failed_stage(), Some(Stage::Transform));
    assert!(target.shown().is_some_and(|shown| shown.same_instance(&error_image)));
    assert!(h.listener.events().contains(&"transform_end:Failed".to_string()));
    assert_eq!(h.loader.bitmap_pool().stats().num_buffers, 1);
}

// ============================================================================
// HOOK ORDERING AND TERMINAL OUTCOMES
// ============================================================================

#[test]
fn test_hooks_fire_in_pairs_in_pipeline_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_png(dir.path(), "a.png", 8, 8);
    let h = harness();

    smol::block_on(h.loader.get(ImageRequest::new(path.display().to_string()))).unwrap();
    assert_eq!(
        h.listener.events(),
        vec![
            "on_start",
            "map_start",
            "map_end:Completed",
            "resolve_size_start",
            "resolve_size_end:Completed",
            "fetch_start:file",
            "fetch_end:Completed",
            "decode_start:counting",
            "decode_end:Completed",
            "on_success:Disk",
        ]
    );
}

#[test]
fn test_decode_failure_reports_stage() {
    let h = harness();
    let request = ImageRequest::new(b"\x89PNG\r\n\x1a\nbroken".to_vec());
    let err = smol::block_on(h.loader.get(request)).unwrap_err();
    assert_eq!(err.failed_stage(), Some(Stage::Decode));
    assert!(h.listener.events().contains(&"decode_end:Failed".to_string()));
    assert_eq!(h.listener.count("on_"), 2);
}

#[test]
fn test_missing_decoder_fails_decode_stage() {
    let h = harness();
    let err = smol::block_on(h.loader.get(ImageRequest::new(b"plain text".to_vec()))).unwrap_err();
    assert_eq!(err.failed_stage(), Some(Stage::Decode));
    assert_eq!(h.listener.count("decode_"), 0);
}

#[test]
fn test_memory_cache_hit_skips_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_png(dir.path(), "a.png", 8, 8);
    let h = harness();

    let first = smol::block_on(h.loader.get(ImageRequest::new(path.clone()))).unwrap();
    assert_eq!(first.data_source, DataSource::Disk);
    let second = smol::block_on(h.loader.get(ImageRequest::new(path))).unwrap();
    assert_eq!(second.data_source, DataSource::Memory);
    assert!(second.image.same_instance(&first.image));
    assert_eq!(h.decodes.load(Ordering::SeqCst), 1);
    assert_eq!(h.listener.count("fetch_start"), 1);
    assert_eq!(second.memory_cache_key, first.memory_cache_key);
}

#[test]
fn test_scale_and_pixel_format_are_part_of_cache_identity() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_png(dir.path(), "wide.png", 200, 100);
    let h = harness();
    let load = |scale, format| {
        let request = ImageRequest::new(path.clone())
            .with_size(Size::pixels(50, 50))
            .with_scale(scale)
            .with_pixel_format(format);
        smol::block_on(h.loader.get(request)).unwrap()
    };

    let fit = load(Scale::Fit, PixelFormat::Rgba8888);
    assert_eq!(fit.image.dimensions(), Some((50, 25)));
    let fill = load(Scale::Fill, PixelFormat::Rgba8888);
    assert_eq!(fill.data_source, DataSource::Disk);
    assert_eq!(fill.image.dimensions(), Some((100, 50)));

    let rgb565 = load(Scale::Fit, PixelFormat::Rgb565);
    assert_eq!(rgb565.data_source, DataSource::Disk);
    assert_eq!(rgb565.image.as_bitmap().map(|b| b.format()), Some(PixelFormat::Rgb565));

    let fill_again = load(Scale::Fill, PixelFormat::Rgba8888);
    assert_eq!(fill_again.data_source, DataSource::Memory);
    assert!(fill_again.image.same_instance(&fill.image));
    assert_eq!(h.decodes.load(Ordering::SeqCst), 3);
}

#[test]
fn test_evicted_decodes_are_reused_by_the_pool() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_png(dir.path(), "a.png", 16, 16);
    let b = write_png(dir.path(), "b.png", 16, 16);
    // Room for one 16x16 RGBA bitmap
    let config = LoaderConfig {
        memory_cache_max_bytes: 1500,
        ..LoaderConfig::default()
    };
    let h = harness_with(config, |registry| registry);
    let pool = h.loader.bitmap_pool();

    smol::block_on(h.loader.get(ImageRequest::new(a.clone()))).unwrap();
    assert_eq!(pool.stats().num_buffers, 0);
    smol::block_on(h.loader.get(ImageRequest::new(b))).unwrap();
    assert_eq!(pool.stats().num_buffers, 1);

    let again = smol::block_on(h.loader.get(ImageRequest::new(a))).unwrap();
    assert_eq!(again.data_source, DataSource::Disk);
    assert_eq!(pool.stats().hits, 1);
    assert_eq!(pool.stats().num_buffers, 1);
}

#[test]
fn test_unaddressable_size_fails_the_stage() {
    let h = harness();
    let huge = Size::pixels(u32::MAX, u32::MAX);

    let decoded = ImageRequest::new(png(200, 100)).with_size(huge);
    let err = smol::block_on(h.loader.get(decoded)).unwrap_err();
    assert_eq!(err.failed_stage(), Some(Stage::Decode));

    let drawn = ImageRequest::new(Image::from_drawable(ColorDrawable::new([0, 0, 0, 255])))
        .with_size(huge)
        .with_transformation(Arc::new(Grayscale));
    let err = smol::block_on(h.loader.get(drawn)).unwrap_err();
    assert_eq!(err.failed_stage(), Some(Stage::Transform));
    assert_eq!(h.loader.bitmap_pool().stats().num_buffers, 0);
}

#[test]
fn test_read_only_policy_never_writes() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_png(dir.path(), "a.png", 8, 8);
    let h = harness();
    let request = ImageRequest::new(path).with_memory_cache_policy(CachePolicy::ReadOnly);
    smol::block_on(h.loader.get(request)).unwrap();
    assert!(h.loader.memory_cache().is_empty());
}

#[test]
fn test_global_listener_notified_before_request_listener() {
    let order = Arc::new(Mutex::new(Vec::new()));

    struct Tagged(&'static str, Arc<Mutex<Vec<&'static str>>>);

    impl EventListener for Tagged {
        fn on_start(&self, _request: &ImageRequest) {
            self.1.lock().unwrap().push(self.0);
        }
    }

    let loader = ImageLoader::builder()
        .listener(Arc::new(Tagged("global", order.clone())))
        .build();
    let request = ImageRequest::new(png(2, 2)).with_listener(Arc::new(Tagged("request", order.clone())));
    smol::block_on(loader.get(request)).unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["global", "request"]);
}

// ============================================================================
// CANCELLATION
// ============================================================================

#[test]
fn test_dispose_during_fetch_cancels() {
    let (started_tx, started_rx) = smol::channel::bounded(1);
    let (_release_tx, release_rx) = smol::channel::bounded(1);
    let h = harness_with(LoaderConfig::default(), move |registry| {
        registry.with_fetcher(GatedFetcher {
            started: started_tx,
            release: release_rx,
        })
    });
    let target = Arc::new(RecordingTarget::default());
    let request = ImageRequest::new(Url::parse("gate://slow").unwrap()).with_target(target.clone());

    let result = smol::block_on(async {
        let disposable = h.loader.enqueue(request);
        started_rx.recv().await.unwrap();
        disposable.dispose();
        assert!(disposable.is_disposed());
        disposable.wait().await
    });

    assert!(matches!(result, ImageResult::Cancelled));
    assert_eq!(
        h.listener.events(),
        vec![
            "on_start",
            "map_start",
            "map_end:Completed",
            "resolve_size_start",
            "resolve_size_end:Completed",
            "fetch_start:gated",
            "fetch_end:Abandoned",
            "on_cancel",
        ]
    );
    assert_eq!(target.events(), vec!["start"]);
}

#[test]
fn test_dispose_during_decode_returns_buffer_to_pool() {
    let (started_tx, started_rx) = smol::channel::bounded(1);
    let (_release_tx, release_rx) = smol::channel::bounded(1);
    let h = harness_with(LoaderConfig::default(), move |registry| {
        registry.with_decoder(GatedDecoder {
            started: started_tx,
            release: release_rx,
        })
    });
    let target = Arc::new(RecordingTarget::default());
    let request = ImageRequest::new(GATED_SOURCE.to_vec()).with_target(target.clone());

    let result = smol::block_on(async {
        let disposable = h.loader.enqueue(request);
        started_rx.recv().await.unwrap();
        assert_eq!(h.loader.bitmap_pool().stats().num_buffers, 0);
        disposable.dispose();
        disposable.wait().await
    });

    assert!(matches!(result, ImageResult::Cancelled));
    assert_eq!(h.loader.bitmap_pool().stats().num_buffers, 1);
    let events = h.listener.events();
    assert!(events.contains(&"decode_start:gated".to_string()));
    assert!(events.contains(&"decode_end:Abandoned".to_string()));
    assert_eq!(events.last().map(String::as_str), Some("on_cancel"));
    assert_eq!(target.events(), vec!["start"]);
}

#[test]
fn test_abort_between_transformations_returns_buffers() {
    let h = harness();
    let controller = AbortController::new();
    let later = Arc::new(AtomicUsize::new(0));
    let request = ImageRequest::new(png(10, 10))
        .with_signal(controller.signal().clone())
        .with_transformation(Arc::new(AbortingTransformation {
            controller: controller.clone(),
        }))
        .with_transformation(Arc::new(CountingTransformation { calls: later.clone() }));

    let err = smol::block_on(h.loader.get(request)).unwrap_err();
    assert!(matches!(err, ImageError::Cancelled));
    assert_eq!(later.load(Ordering::SeqCst), 0);
    // The decoded buffer and the first transformation's output
    assert_eq!(h.loader.bitmap_pool().stats().num_buffers, 2);
    assert!(h.listener.events().contains(&"transform_end:Abandoned".to_string()));
    assert_eq!(h.listener.count("on_cancel"), 1);
    assert_eq!(h.listener.count("on_error"), 0);
}

#[test]
fn test_request_signal_cancels_while_awaiting_measurement() {
    let h = harness();
    let controller = AbortController::new();
    let target = Arc::new(RecordingTarget {
        bounds: Some(Bounds::new()),
        ..RecordingTarget::default()
    });
    let request = ImageRequest::new(png(4, 4))
        .with_target(target)
        .with_signal(controller.signal().clone());

    let result = smol::block_on(async {
        let disposable = h.loader.enqueue(request);
        while h.listener.count("resolve_size_start") == 0 {
            smol::Timer::after(std::time::Duration::from_millis(1)).await;
        }
        controller.abort(Some("navigated away"));
        disposable.wait().await
    });

    assert!(matches!(result, ImageResult::Cancelled));
    assert_eq!(h.listener.count("fetch_start"), 0);
    assert_eq!(h.listener.count("on_cancel"), 1);
    assert!(h.listener.events().contains(&"resolve_size_end:Abandoned".to_string()));
}

#[test]
fn test_already_aborted_request_enters_no_stage() {
    let h = harness();
    let request = ImageRequest::new(png(4, 4)).with_signal(AbortSignal::aborted_with(None));
    let err = smol::block_on(h.loader.get(request)).unwrap_err();
    assert!(matches!(err, ImageError::Cancelled));
    assert_eq!(h.listener.events(), vec!["on_start", "on_cancel"]);
}

#[test]
fn test_abort_after_delivery_has_no_effect() {
    let h = harness();
    let controller = AbortController::new();
    let request = ImageRequest::new(png(4, 4)).with_signal(controller.signal().clone());
    let result = smol::block_on(h.loader.execute(request));
    controller.abort(None);
    assert!(result.is_success());
    assert_eq!(h.listener.count("on_cancel"), 0);
    assert_eq!(h.listener.count("on_success"), 1);
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[test]
fn test_concurrent_requests_complete_independently() {
    let h = harness();
    let results = smol::block_on(async {
        let handles: Vec<_> = (1..=8)
            .map(|side| h.loader.enqueue(ImageRequest::new(png(side, side)).with_pixel_format(PixelFormat::Rgb565)))
            .collect();
        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.wait().await);
        }
        results
    });
    assert!(results.iter().all(ImageResult::is_success));
    assert_eq!(h.listener.count("on_start"), 8);
    assert_eq!(h.listener.count("on_success"), 8);
}
