//! HTTP adapter for the site's media resolve endpoints.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use townsite_api_types::{
    MEDIA_ITEM_PATH, MEDIA_RESOLVE_PATH, MediaLocation, MediaResolveRequest, MediaResolveResponse,
};
use tracing::{debug, instrument};
use url::ParseError;

use crate::media::{BatchResolver, ResolveError, ResourceId, SingleResolver};

/// Resolves media ids against `POST /api/v1/media/resolve` and
/// `GET /api/v1/media/{id}`.
#[derive(Clone, Debug)]
pub struct HttpMediaResolver {
    client: Client,
    base: Url,
}

impl HttpMediaResolver {
    pub fn new(base_url: &Url, timeout: Duration) -> Result<Self, ResolveError> {
        let base = base_url.join("/")?;
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(timeout)
            .build()?;
        Ok(Self { client, base })
    }

    pub fn user_agent() -> &'static str {
        concat!("townsite/", env!("CARGO_PKG_VERSION"))
    }

    fn item_url(&self, id: &ResourceId) -> Result<Url, ResolveError> {
        let mut item = self.base.join(MEDIA_ITEM_PATH)?;
        item.path_segments_mut()
            .map_err(|_| ResolveError::Url(ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .push(id.as_str());
        Ok(item)
    }

    async fn handle<T: DeserializeOwned>(resp: Response) -> Result<T, ResolveError> {
        let status = resp.status();
        let bytes = resp.bytes().await?;
        if !status.is_success() {
            let body = String::from_utf8_lossy(&bytes).into_owned();
            return Err(ResolveError::Status {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_slice(&bytes).map_err(ResolveError::decode)
    }
}

#[async_trait]
impl BatchResolver for HttpMediaResolver {
    #[instrument(skip(self, ids), fields(ids = ids.len()))]
    async fn resolve_batch(
        &self,
        ids: &[ResourceId],
    ) -> Result<HashMap<ResourceId, MediaLocation>, ResolveError> {
        let url = self.base.join(MEDIA_RESOLVE_PATH)?;
        let body = MediaResolveRequest {
            ids: ids.iter().map(|id| id.as_str().to_string()).collect(),
        };

        let resp = self.client.post(url).json(&body).send().await?;
        let decoded: MediaResolveResponse = Self::handle(resp).await?;
        debug!(returned = decoded.entries.len(), "Batch resolve answered");

        Ok(decoded
            .entries
            .into_iter()
            .map(|(id, location)| (ResourceId::from(id), location))
            .collect())
    }
}

#[async_trait]
impl SingleResolver for HttpMediaResolver {
    #[instrument(skip(self), fields(resource_id = %id))]
    async fn resolve_one(&self, id: &ResourceId) -> Result<Option<MediaLocation>, ResolveError> {
        let url = self.item_url(id)?;
        let resp = self.client.get(url).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::handle(resp).await.map(Some)
    }
}
