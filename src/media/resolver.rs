//! Collaborator traits for turning resource ids into locations.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use townsite_api_types::MediaLocation;

use super::types::ResourceId;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid endpoint URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("resolver answered with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode resolver response: {0}")]
    Decode(String),
    #[error("resolver panicked while handling {ids} ids")]
    Panicked { ids: usize },
}

impl ResolveError {
    pub fn decode(err: impl std::fmt::Display) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Resolves many ids in one call.
///
/// Implementations return entries only for the ids they know; an `Err`
/// means none of the ids could be resolved.
#[async_trait]
pub trait BatchResolver: Send + Sync {
    async fn resolve_batch(
        &self,
        ids: &[ResourceId],
    ) -> Result<HashMap<ResourceId, MediaLocation>, ResolveError>;
}

/// Resolves exactly one id per call. Used when no coordinator is shared.
#[async_trait]
pub trait SingleResolver: Send + Sync {
    async fn resolve_one(&self, id: &ResourceId) -> Result<Option<MediaLocation>, ResolveError>;
}
