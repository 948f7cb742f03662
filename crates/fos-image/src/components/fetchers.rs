//! Built-in fetchers
//!
//! Local files, in-memory bytes, bundled platform resources, and visuals
//! that are already decoded.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock, PoisonError};

use async_trait::async_trait;

use crate::bitmap::{Bitmap, BitmapTooLarge, Image};
use crate::components::decoder::ImageFormat;
use crate::data::{Data, ResourceId};
use crate::error::BoxError;
use crate::pool::BitmapPool;
use crate::registry::{FetchResult, Fetcher, ImageSource};
use crate::request::{DataSource, Options};
use crate::scaling::{is_subsampled, resize_rgba, scaled_dimensions};

/// Fetch errors raised by the built-in fetchers
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("expected {expected}, got {actual}")]
    WrongData { expected: &'static str, actual: &'static str },

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("bitmap resampling failed")]
    Resample,

    #[error(transparent)]
    TooLarge(#[from] BitmapTooLarge),
}

fn downcast<'a, T: 'static>(data: &'a Data) -> Result<&'a T, FetchError> {
    data.downcast_ref::<T>().ok_or(FetchError::WrongData {
        expected: std::any::type_name::<T>(),
        actual: data.type_name(),
    })
}

/// Reads local files
#[derive(Debug, Clone, Copy, Default)]
pub struct FileFetcher;

#[async_trait]
impl Fetcher for FileFetcher {
    fn handles(&self, data: &Data) -> bool {
        data.is::<PathBuf>()
    }

    async fn fetch(&self, data: &Data, _options: &Options) -> Result<FetchResult, BoxError> {
        let path = downcast::<PathBuf>(data)?;
        let bytes = smol::fs::read(path).await.map_err(|source| FetchError::Io {
            path: path.clone(),
            source,
        })?;
        let mime_type = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| ImageFormat::from_extension(ext).mime_type())
            .map(str::to_string);

        Ok(FetchResult::Source {
            source: ImageSource::new(bytes, mime_type),
            data_source: DataSource::Disk,
        })
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// Serves encoded bytes already in memory
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesFetcher;

#[async_trait]
impl Fetcher for BytesFetcher {
    fn handles(&self, data: &Data) -> bool {
        data.is::<Vec<u8>>()
    }

    async fn fetch(&self, data: &Data, _options: &Options) -> Result<FetchResult, BoxError> {
        let bytes = downcast::<Vec<u8>>(data)?;
        Ok(FetchResult::Source {
            source: ImageSource::new(bytes.clone(), None),
            data_source: DataSource::Memory,
        })
    }

    fn name(&self) -> &'static str {
        "bytes"
    }
}

/// Resample `bitmap` to the requested size and format
///
/// Returns `None` when it already matches.
fn resample(pool: &BitmapPool, bitmap: &Bitmap, options: &Options) -> Result<Option<(Bitmap, bool)>, FetchError> {
    let src = bitmap.dimensions();
    let dst = scaled_dimensions(src, options.size, options.scale);
    if dst == src && bitmap.format() == options.pixel_format {
        return Ok(None);
    }
    let mut out = pool.checkout(dst.0, dst.1, options.pixel_format)?;
    let rgba = resize_rgba(bitmap.to_rgba(), src, dst).ok_or(FetchError::Resample)?;
    out.fill_from_rgba(&rgba);
    Ok(Some((out.into_bitmap(), is_subsampled(src, dst))))
}

/// Serves already-decoded visuals
///
/// Drawables pass through untouched. Bitmaps that don't match the requested
/// size are resampled; matching ones keep their identity.
#[derive(Clone, Default)]
pub struct ImageFetcher {
    pool: BitmapPool,
}

impl ImageFetcher {
    /// Resampled buffers are checked out of `pool`
    pub fn new(pool: BitmapPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Fetcher for ImageFetcher {
    fn handles(&self, data: &Data) -> bool {
        data.is::<Image>()
    }

    async fn fetch(&self, data: &Data, options: &Options) -> Result<FetchResult, BoxError> {
        let image = downcast::<Image>(data)?;
        let resampled = match image.as_bitmap() {
            Some(bitmap) => resample(&self.pool, bitmap, options)?,
            None => None,
        };
        let (image, is_sampled) = match resampled {
            Some((bitmap, is_sampled)) => (Image::from_bitmap(bitmap), is_sampled),
            None => (image.clone(), false),
        };
        Ok(FetchResult::Decoded {
            image,
            is_sampled,
            data_source: DataSource::Memory,
        })
    }

    fn name(&self) -> &'static str {
        "image"
    }
}

/// Serves raw rasters, resampled to the requested size
#[derive(Clone, Default)]
pub struct BitmapFetcher {
    pool: BitmapPool,
}

impl BitmapFetcher {
    /// Resampled buffers are checked out of `pool`
    pub fn new(pool: BitmapPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Fetcher for BitmapFetcher {
    fn handles(&self, data: &Data) -> bool {
        data.is::<Bitmap>()
    }

    async fn fetch(&self, data: &Data, options: &Options) -> Result<FetchResult, BoxError> {
        let bitmap = downcast::<Bitmap>(data)?;
        let (bitmap, is_sampled) = match resample(&self.pool, bitmap, options)? {
            Some(resampled) => resampled,
            None => (bitmap.clone(), false),
        };
        Ok(FetchResult::Decoded {
            image: Image::from_bitmap(bitmap),
            is_sampled,
            data_source: DataSource::Memory,
        })
    }

    fn name(&self) -> &'static str {
        "bitmap"
    }
}

/// A platform resource, either encoded or ready to draw
#[derive(Debug, Clone)]
pub enum Resource {
    Encoded { bytes: Vec<u8>, mime_type: Option<String> },
    Image(Image),
}

/// Platform resource lookup
pub trait ResourceResolver: Send + Sync {
    fn resolve(&self, id: &ResourceId) -> Option<Resource>;
}

/// In-memory resource bundle
#[derive(Debug, Clone, Default)]
pub struct BundledResources {
    resources: Arc<RwLock<HashMap<String, Resource>>>,
}

impl BundledResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_bytes(&self, name: impl Into<String>, bytes: Vec<u8>, mime_type: Option<&str>) {
        self.insert(
            name,
            Resource::Encoded {
                bytes,
                mime_type: mime_type.map(str::to_string),
            },
        );
    }

    pub fn insert_image(&self, name: impl Into<String>, image: Image) {
        self.insert(name, Resource::Image(image));
    }

    fn insert(&self, name: impl Into<String>, resource: Resource) {
        self.resources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), resource);
    }
}

impl ResourceResolver for BundledResources {
    fn resolve(&self, id: &ResourceId) -> Option<Resource> {
        self.resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id.0)
            .cloned()
    }
}

/// Resolves [`ResourceId`]s through a platform resolver
pub struct ResourceFetcher<R> {
    resolver: R,
}

impl<R: ResourceResolver> ResourceFetcher<R> {
    pub fn new(resolver: R) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl<R: ResourceResolver> Fetcher for ResourceFetcher<R> {
    fn handles(&self, data: &Data) -> bool {
        data.is::<ResourceId>()
    }

    async fn fetch(&self, data: &Data, _options: &Options) -> Result<FetchResult, BoxError> {
        let id = downcast::<ResourceId>(data)?;
        let resource = self
            .resolver
            .resolve(id)
            .ok_or_else(|| FetchError::ResourceNotFound(id.0.clone()))?;

        Ok(match resource {
            Resource::Encoded { bytes, mime_type } => FetchResult::Source {
                source: ImageSource::new(bytes, mime_type),
                data_source: DataSource::Disk,
            },
            Resource::Image(image) => FetchResult::Decoded {
                image,
                is_sampled: false,
                data_source: DataSource::Memory,
            },
        })
    }

    fn name(&self) -> &'static str {
        "resource"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::{ColorDrawable, PixelFormat};
    use crate::request::Size;

    #[test]
    fn test_file_fetcher_reads_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pic.png");
        std::fs::write(&path, b"not really a png").unwrap();

        let result = smol::block_on(FileFetcher.fetch(&Data::from(path), &Options::default())).unwrap();
        match result {
            FetchResult::Source { source, data_source } => {
                assert_eq!(source.bytes(), b"not really a png");
                assert_eq!(source.mime_type(), Some("image/png"));
                assert_eq!(data_source, DataSource::Disk);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_file_fetcher_missing_file() {
        let err = smol::block_on(FileFetcher.fetch(&Data::from(PathBuf::from("/nonexistent/x.png")), &Options::default()))
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/x.png"));
    }

    #[test]
    fn test_image_fetcher_preserves_identity() {
        let image = Image::from_drawable(ColorDrawable::new([1, 2, 3, 255]));
        let data = Data::from(image.clone());
        match smol::block_on(ImageFetcher::default().fetch(&data, &Options::default())).unwrap() {
            FetchResult::Decoded { image: fetched, is_sampled, .. } => {
                assert!(fetched.same_instance(&image));
                assert!(!is_sampled);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_bitmap_fetcher_downsamples() {
        let fetcher = BitmapFetcher::default();
        let data = Data::from(Bitmap::new(100, 50, PixelFormat::Rgba8888).unwrap());
        let options = Options {
            size: Size::pixels(20, 20),
            ..Options::default()
        };
        match smol::block_on(fetcher.fetch(&data, &options)).unwrap() {
            FetchResult::Decoded { image, is_sampled, .. } => {
                assert_eq!(image.dimensions(), Some((20, 10)));
                assert!(is_sampled);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_resource_fetcher() {
        let bundle = BundledResources::new();
        bundle.insert_bytes("icons/logo", vec![1, 2, 3], Some("image/png"));
        let fetcher = ResourceFetcher::new(bundle);

        let result = smol::block_on(fetcher.fetch(&Data::from(ResourceId::new("icons/logo")), &Options::default()));
        assert!(matches!(result, Ok(FetchResult::Source { data_source: DataSource::Disk, .. })));

        let missing = smol::block_on(fetcher.fetch(&Data::from(ResourceId::new("nope")), &Options::default()));
        assert!(missing.unwrap_err().to_string().contains("nope"));
    }
}
