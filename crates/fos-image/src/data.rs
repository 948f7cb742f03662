//! Untyped request input
//!
//! A request accepts anything: a URL string, a path, a platform resource,
//! an already-decoded image. Mappers and fetchers downcast to the types
//! they understand.

use std::any::{Any, type_name};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use url::Url;

use crate::bitmap::{Bitmap, Image};

/// Opaque, cheaply cloneable input datum
#[derive(Clone)]
pub struct Data {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Data {
    /// Wrap any value
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            type_name: type_name::<T>(),
        }
    }

    /// Borrow the value as `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Whether the value is a `T`
    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    /// Rust type name of the wrapped value
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Data").field("type", &self.type_name).finish()
    }
}

/// Identifier of a platform-bundled resource
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId(pub String);

impl ResourceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl From<String> for Data {
    fn from(value: String) -> Self {
        Data::new(value)
    }
}

impl From<&str> for Data {
    fn from(value: &str) -> Self {
        Data::new(value.to_string())
    }
}

impl From<Url> for Data {
    fn from(value: Url) -> Self {
        Data::new(value)
    }
}

impl From<PathBuf> for Data {
    fn from(value: PathBuf) -> Self {
        Data::new(value)
    }
}

impl From<ResourceId> for Data {
    fn from(value: ResourceId) -> Self {
        Data::new(value)
    }
}

impl From<Image> for Data {
    fn from(value: Image) -> Self {
        Data::new(value)
    }
}

impl From<Bitmap> for Data {
    fn from(value: Bitmap) -> Self {
        Data::new(value)
    }
}

impl From<Vec<u8>> for Data {
    fn from(value: Vec<u8>) -> Self {
        Data::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downcast() {
        let data = Data::from("https://example.com/a.png");
        assert!(data.is::<String>());
        assert_eq!(
            data.downcast_ref::<String>().map(String::as_str),
            Some("https://example.com/a.png")
        );
        assert!(data.downcast_ref::<Url>().is_none());
    }

    #[test]
    fn test_type_name() {
        let data = Data::new(42u64);
        assert_eq!(data.type_name(), "u64");
    }
}
