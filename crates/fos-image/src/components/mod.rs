//! Built-in capabilities

pub mod decoder;
pub mod fetchers;
pub mod mappers;
pub mod transformations;

pub use decoder::{DecodeError, ImageFormat, RasterDecoder};
pub use fetchers::{
    BitmapFetcher, BundledResources, BytesFetcher, FetchError, FileFetcher, ImageFetcher, Resource,
    ResourceFetcher, ResourceResolver,
};
pub use mappers::{FileUrlMapper, PathKeyer, ResourceKeyer, ResourceUrlMapper, StringMapper, UrlKeyer};
pub use transformations::{CircleCrop, Grayscale};

use crate::pool::BitmapPool;
use crate::registry::Registry;

/// Registry with every built-in mapper, keyer, fetcher and decoder
///
/// Platform resources need a resolver; add one with
/// `with_fetcher(ResourceFetcher::new(..))`. Network URLs are served by an
/// HTTP fetcher from `fos-net`.
pub fn default_registry(pool: &BitmapPool) -> Registry {
    Registry::new()
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
        .with_decoder(RasterDecoder)
}
