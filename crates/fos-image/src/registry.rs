//! Capability registry
//!
//! Ordered, user-extensible lists of mappers, keyers, fetchers, decoders and
//! loader-wide transformations. Resolution is a linear scan in registration
//! order; the first capable handler wins.

use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::bitmap::{Bitmap, Image};
use crate::data::Data;
use crate::error::{BoxError, ImageError, Stage};
use crate::pool::{BitmapPool, PooledBitmap};
use crate::request::{DataSource, Options, Size};

/// Mapper chains longer than this are treated as unresolvable
pub const MAX_MAP_ITERATIONS: usize = 16;

/// Undecoded bytes plus their declared MIME type
#[derive(Clone, PartialEq, Eq)]
pub struct ImageSource {
    bytes: Vec<u8>,
    mime_type: Option<String>,
}

impl ImageSource {
    pub fn new(bytes: Vec<u8>, mime_type: Option<String>) -> Self {
        Self { bytes, mime_type }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageSource")
            .field("len", &self.bytes.len())
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

/// Output of a fetcher
#[derive(Debug)]
pub enum FetchResult {
    /// Bytes that still need decoding
    Source { source: ImageSource, data_source: DataSource },
    /// A ready visual; the decode stage is skipped
    Decoded {
        image: Image,
        is_sampled: bool,
        data_source: DataSource,
    },
}

impl FetchResult {
    pub fn data_source(&self) -> DataSource {
        match self {
            FetchResult::Source { data_source, .. } | FetchResult::Decoded { data_source, .. } => *data_source,
        }
    }
}

/// Output of a decoder
#[derive(Debug)]
pub struct DecodeResult {
    /// Decoded pixels, checked out of the request's pool
    pub bitmap: PooledBitmap,
    /// Whether the source was subsampled to fit the requested size
    pub is_sampled: bool,
}

/// Converts one datum type into another (e.g. a string into a URL)
pub trait Mapper: Send + Sync {
    fn handles(&self, data: &Data) -> bool;

    fn map(&self, data: &Data) -> Result<Data, BoxError>;

    fn name(&self) -> &'static str {
        type_name::<Self>()
    }
}

/// Normalizes a mapped datum into a memory cache key
#[async_trait]
pub trait Keyer: Send + Sync {
    /// `None` when this keyer does not understand the datum
    async fn key(&self, data: &Data) -> Option<String>;
}

/// Turns a datum into bytes or a ready visual
#[async_trait]
pub trait Fetcher: Send + Sync {
    fn handles(&self, data: &Data) -> bool;

    async fn fetch(&self, data: &Data, options: &Options) -> Result<FetchResult, BoxError>;

    fn name(&self) -> &'static str {
        type_name::<Self>()
    }
}

/// Turns bytes into a raster buffer
#[async_trait]
pub trait Decoder: Send + Sync {
    fn handles(&self, source: &ImageSource, mime_type: Option<&str>) -> bool;

    async fn decode(
        &self,
        pool: &BitmapPool,
        source: ImageSource,
        options: &Options,
    ) -> Result<DecodeResult, BoxError>;

    fn name(&self) -> &'static str {
        type_name::<Self>()
    }
}

/// Synchronous, pure raster-to-raster operation
pub trait Transformation: Send + Sync {
    /// Stable identity of this transformation and its parameters
    fn cache_key(&self) -> String;

    /// Produce a new raster; output buffers should come from `pool`
    fn transform(&self, input: &Bitmap, size: Size, pool: &BitmapPool) -> Result<PooledBitmap, BoxError>;
}

/// Datum after mapping, plus the fetcher that claims it
#[derive(Clone)]
pub struct Resolved {
    pub data: Data,
    pub fetcher: Arc<dyn Fetcher>,
}

/// Ordered capability lists
#[derive(Clone, Default)]
pub struct Registry {
    mappers: Vec<Arc<dyn Mapper>>,
    keyers: Vec<Arc<dyn Keyer>>,
    fetchers: Vec<Arc<dyn Fetcher>>,
    decoders: Vec<Arc<dyn Decoder>>,
    transformations: Vec<Arc<dyn Transformation>>,
}

impl Registry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mapper(mut self, mapper: impl Mapper + 'static) -> Self {
        self.mappers.push(Arc::new(mapper));
        self
    }

    pub fn with_keyer(mut self, keyer: impl Keyer + 'static) -> Self {
        self.keyers.push(Arc::new(keyer));
        self
    }

    pub fn with_fetcher(mut self, fetcher: impl Fetcher + 'static) -> Self {
        self.fetchers.push(Arc::new(fetcher));
        self
    }

    pub fn with_decoder(mut self, decoder: impl Decoder + 'static) -> Self {
        self.decoders.push(Arc::new(decoder));
        self
    }

    /// Transformation applied to every request before its own list
    pub fn with_transformation(mut self, transformation: impl Transformation + 'static) -> Self {
        self.transformations.push(Arc::new(transformation));
        self
    }

    /// Give a fetcher precedence over everything registered so far
    pub fn with_fetcher_first(mut self, fetcher: impl Fetcher + 'static) -> Self {
        self.fetchers.insert(0, Arc::new(fetcher));
        self
    }

    pub fn mappers(&self) -> &[Arc<dyn Mapper>] {
        &self.mappers
    }

    pub fn fetchers(&self) -> &[Arc<dyn Fetcher>] {
        &self.fetchers
    }

    pub fn decoders(&self) -> &[Arc<dyn Decoder>] {
        &self.decoders
    }

    pub fn transformations(&self) -> &[Arc<dyn Transformation>] {
        &self.transformations
    }

    /// Whether any mapper or fetcher accepts the raw datum
    pub fn claims(&self, data: &Data) -> bool {
        self.fetchers.iter().any(|f| f.handles(data)) || self.mappers.iter().any(|m| m.handles(data))
    }

    pub fn fetcher_for(&self, data: &Data) -> Option<&Arc<dyn Fetcher>> {
        self.fetchers.iter().find(|f| f.handles(data))
    }

    pub fn decoder_for(&self, source: &ImageSource) -> Option<&Arc<dyn Decoder>> {
        self.decoders
            .iter()
            .find(|d| d.handles(source, source.mime_type()))
    }

    /// Memory cache key of a mapped datum
    pub async fn key(&self, data: &Data) -> Option<String> {
        for keyer in &self.keyers {
            if let Some(key) = keyer.key(data).await {
                return Some(key);
            }
        }
        None
    }

    /// Map `data` until a fetcher claims it
    ///
    /// A fetcher claiming the datum directly wins over any mapper. Fails with
    /// [`ImageError::UnsupportedData`] when no mapper applies and no fetcher
    /// claims the result, or when the chain exceeds [`MAX_MAP_ITERATIONS`].
    pub fn resolve(&self, data: &Data) -> Result<Resolved, ImageError> {
        let mut current = data.clone();
        for _ in 0..MAX_MAP_ITERATIONS {
            if let Some(fetcher) = self.fetcher_for(&current) {
                return Ok(Resolved {
                    data: current,
                    fetcher: fetcher.clone(),
                });
            }
            let Some(mapper) = self.mappers.iter().find(|m| m.handles(&current)) else {
                break;
            };
            tracing::trace!(mapper = mapper.name(), from = current.type_name(), "mapping data");
            current = mapper
                .map(&current)
                .map_err(|err| ImageError::stage(Stage::Map, err))?;
        }
        Err(ImageError::UnsupportedData {
            data_type: current.type_name(),
        })
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("mappers", &self.mappers.iter().map(|m| m.name()).collect::<Vec<_>>())
            .field("keyers", &self.keyers.len())
            .field("fetchers", &self.fetchers.iter().map(|f| f.name()).collect::<Vec<_>>())
            .field("decoders", &self.decoders.iter().map(|d| d.name()).collect::<Vec<_>>())
            .field("transformations", &self.transformations.len())
            .finish()
    }
}
