use futures::stream::BoxStream;
use hookwatch_core::ResourceSnapshot;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    /// A single resource could not be decoded; only that resource is skipped.
    #[error("resource could not be decoded: {0}")]
    Decode(String),
    /// The watch cursor is too old for the store (HTTP 410).
    #[error("watch cursor expired")]
    Expired,
    #[error("store returned status {code}: {message}")]
    Status { code: u16, message: String },
    #[error(transparent)]
    Kube(#[from] kube::Error),
}

impl FeedError {
    /// Classify a kube client error.
    pub fn from_kube(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(resp) => Self::from_status(resp),
            kube::Error::SerdeError(err) => FeedError::Decode(err.to_string()),
            other => FeedError::Kube(other),
        }
    }

    pub fn from_status(resp: kube::core::ErrorResponse) -> Self {
        if resp.code == 410 {
            FeedError::Expired
        } else {
            FeedError::Status { code: resp.code, message: resp.message }
        }
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, FeedError::Decode(_))
    }
}

/// Result of the enumeration phase: every current resource plus the cursor to watch from.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub items: Vec<ResourceSnapshot>,
    pub cursor: String,
}

/// One notification from an open subscription, classified by the store.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    Added(ResourceSnapshot),
    Modified(ResourceSnapshot),
    Deleted(ResourceSnapshot),
    /// Cursor-only progress marker.
    Bookmark(String),
}

pub type StoreStream = BoxStream<'static, Result<StoreEvent, FeedError>>;

/// List+watch capability of a resource store.
#[async_trait::async_trait]
pub trait ResourceStore: Send + Sync {
    async fn list(&self) -> Result<Listing, FeedError>;

    /// Subscribe to changes after `cursor`. The stream ends when the store closes it.
    async fn watch(&self, cursor: &str) -> Result<StoreStream, FeedError>;
}
