//! fOS Image - Image Loading Pipeline
//!
//! Turns loosely typed inputs (strings, URLs, paths, bytes, bundled
//! resources, ready bitmaps) into sized, decoded, transformed visuals.
//!
//! # Pipeline
//! - Map the input until a fetcher claims it
//! - Resolve the target size (explicit, or measured from the target)
//! - Serve from the memory cache, or fetch and decode
//! - Apply transformations and deliver to the target and listeners
//!
//! Decoded buffers come from a shared [`BitmapPool`] and go back to it on
//! every exit path.
//!
//! # Example
//! ```rust,ignore
//! use fos_image::{ImageLoader, ImageRequest, Size};
//!
//! let loader = ImageLoader::new();
//! let request = ImageRequest::new("photos/cat.png").with_size(Size::pixels(128, 128));
//! let image = loader.get(request).await?.image;
//! ```

pub mod abort;
mod bitmap;
mod cache;
pub mod components;
mod config;
mod data;
mod error;
mod listener;
mod loader;
mod pipeline;
mod pool;
mod registry;
mod request;
pub mod scaling;
mod size;
mod target;

pub use abort::{AbortController, AbortSignal};
pub use bitmap::{Bitmap, BitmapTooLarge, ColorDrawable, Drawable, Image, PixelFormat};
pub use cache::{CacheKey, CacheStats, CachedImage, MemoryCache};
pub use config::LoaderConfig;
pub use data::{Data, ResourceId};
pub use error::{BoxError, ImageError, NoDecoderError, Stage};
pub use listener::{EventListener, StageStatus};
pub use loader::{Disposable, ImageLoader, ImageLoaderBuilder};
pub use pipeline::DecodeDemand;
pub use pool::{BitmapPool, PoolStats, PooledBitmap};
pub use registry::{
    DecodeResult, Decoder, FetchResult, Fetcher, ImageSource, Keyer, Mapper, Registry, Resolved, Transformation,
    MAX_MAP_ITERATIONS,
};
pub use request::{
    CachePolicy, DataSource, ErrorResult, ImageRequest, ImageResult, Options, Scale, Size, SizeSpec, SuccessResult,
};
pub use size::{Bounds, SizeResolver};
pub use target::Target;
pub use url::Url;
