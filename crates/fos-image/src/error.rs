//! Request failure taxonomy

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// Error type returned by capability implementations
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Pipeline stage that raised a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Map,
    ResolveSize,
    Fetch,
    Decode,
    Transform,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Map => "map",
            Stage::ResolveSize => "size resolution",
            Stage::Fetch => "fetch",
            Stage::Decode => "decode",
            Stage::Transform => "transform",
        };
        f.write_str(name)
    }
}

/// Why a request did not produce a visual
#[derive(Debug, Clone, thiserror::Error)]
pub enum ImageError {
    /// The request carried no input datum
    #[error("request has no data")]
    NoData,

    /// No mapper/fetcher chain claims the input
    #[error("unsupported data type: {data_type}")]
    UnsupportedData { data_type: &'static str },

    /// A mapper, fetcher, decoder or transformation raised
    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Arc<dyn StdError + Send + Sync>,
    },

    /// The request was cancelled before it completed
    #[error("request cancelled")]
    Cancelled,

    /// The request finished after fetching without decoding
    #[error("request completed without a decoded image")]
    NotDecoded,
}

impl ImageError {
    /// Wrap a component failure raised at `stage`
    pub fn stage(stage: Stage, source: BoxError) -> Self {
        Self::Stage {
            stage,
            source: Arc::from(source),
        }
    }

    /// Stage that raised this failure, if any
    pub fn failed_stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Raised when no registered decoder accepts a fetched source
#[derive(Debug, Clone, thiserror::Error)]
#[error("no decoder accepts source (mime type: {})", .mime_type.as_deref().unwrap_or("unknown"))]
pub struct NoDecoderError {
    pub mime_type: Option<String>,
}
