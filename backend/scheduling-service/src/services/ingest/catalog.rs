use crate::models::{ContentId, ContentType};
use crate::services::store::StoreResult;
use async_trait::async_trait;
use dashmap::DashMap;

/// Content metadata lookup provided by the surrounding platform
#[async_trait]
pub trait ContentCatalog: Send + Sync {
    /// `None` when the content item is unknown to the platform
    async fn content_type(&self, content_id: ContentId) -> StoreResult<Option<ContentType>>;
}

/// Catalog backed by an in-process map, filled by the embedder
#[derive(Debug, Default)]
pub struct StaticContentCatalog {
    types: DashMap<ContentId, ContentType>,
}

impl StaticContentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, content_id: ContentId, content_type: impl Into<ContentType>) {
        self.types.insert(content_id, content_type.into());
    }
}

#[async_trait]
impl ContentCatalog for StaticContentCatalog {
    async fn content_type(&self, content_id: ContentId) -> StoreResult<Option<ContentType>> {
        Ok(self.types.get(&content_id).map(|entry| entry.value().clone()))
    }
}
