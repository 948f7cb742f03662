//! Built-in mappers and keyers

use std::path::PathBuf;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use url::Url;

use crate::data::{Data, ResourceId};
use crate::error::BoxError;
use crate::registry::{Keyer, Mapper};

/// Scheme of bundled platform resources: `res://icons/logo.png`
pub const RESOURCE_SCHEME: &str = "res";

#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("expected {expected}, got {actual}")]
    WrongData { expected: &'static str, actual: &'static str },

    #[error("not a local file URL: {0}")]
    NotAFilePath(Url),
}

fn downcast<'a, T: 'static>(data: &'a Data) -> Result<&'a T, MapError> {
    data.downcast_ref::<T>().ok_or(MapError::WrongData {
        expected: std::any::type_name::<T>(),
        actual: data.type_name(),
    })
}

/// Parses strings as URLs, falling back to local paths
///
/// Single-letter schemes are treated as Windows drive letters, not URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringMapper;

impl Mapper for StringMapper {
    fn handles(&self, data: &Data) -> bool {
        data.is::<String>()
    }

    fn map(&self, data: &Data) -> Result<Data, BoxError> {
        let value = downcast::<String>(data)?;
        Ok(match Url::parse(value) {
            Ok(url) if url.scheme().len() > 1 => Data::from(url),
            _ => Data::from(PathBuf::from(value)),
        })
    }

    fn name(&self) -> &'static str {
        "string"
    }
}

/// `file:` URLs to paths
#[derive(Debug, Clone, Copy, Default)]
pub struct FileUrlMapper;

impl Mapper for FileUrlMapper {
    fn handles(&self, data: &Data) -> bool {
        data.downcast_ref::<Url>().is_some_and(|url| url.scheme() == "file")
    }

    fn map(&self, data: &Data) -> Result<Data, BoxError> {
        let url = downcast::<Url>(data)?;
        let path = url
            .to_file_path()
            .map_err(|()| MapError::NotAFilePath(url.clone()))?;
        Ok(Data::from(path))
    }

    fn name(&self) -> &'static str {
        "file_url"
    }
}

/// `res:` URLs to resource identifiers
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceUrlMapper;

impl Mapper for ResourceUrlMapper {
    fn handles(&self, data: &Data) -> bool {
        data.downcast_ref::<Url>()
            .is_some_and(|url| url.scheme() == RESOURCE_SCHEME)
    }

    fn map(&self, data: &Data) -> Result<Data, BoxError> {
        let url = downcast::<Url>(data)?;
        let name = format!("{}{}", url.host_str().unwrap_or(""), url.path());
        Ok(Data::from(ResourceId::new(name.trim_start_matches('/'))))
    }

    fn name(&self) -> &'static str {
        "resource_url"
    }
}

/// Keys URLs by their serialized form
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlKeyer;

#[async_trait]
impl Keyer for UrlKeyer {
    async fn key(&self, data: &Data) -> Option<String> {
        data.downcast_ref::<Url>().map(Url::to_string)
    }
}

/// Keys paths by location and modification time
///
/// A file rewritten in place gets a new key.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathKeyer;

#[async_trait]
impl Keyer for PathKeyer {
    async fn key(&self, data: &Data) -> Option<String> {
        let path = data.downcast_ref::<PathBuf>()?;
        let modified = smol::fs::metadata(path)
            .await
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok());
        Some(match modified {
            Some(age) => format!("{}:{}", path.display(), age.as_millis()),
            None => path.display().to_string(),
        })
    }
}

/// Keys platform resources by name
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceKeyer;

#[async_trait]
impl Keyer for ResourceKeyer {
    async fn key(&self, data: &Data) -> Option<String> {
        data.downcast_ref::<ResourceId>()
            .map(|id| format!("{}:{}", RESOURCE_SCHEME, id.0))
    }
}
