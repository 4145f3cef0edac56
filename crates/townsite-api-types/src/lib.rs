//! Wire types for the Townsite media resolution API.
//!
//! The site exposes two read-only endpoints:
//!
//! - `POST /api/v1/media/resolve` takes a [`MediaResolveRequest`] and answers
//!   with a [`MediaResolveResponse`] containing entries for the subset of ids
//!   it knows about.
//! - `GET /api/v1/media/{id}` answers with a single [`MediaLocation`], or
//!   `404` when the id is unknown.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Path of the batch resolve endpoint.
pub const MEDIA_RESOLVE_PATH: &str = "/api/v1/media/resolve";

/// Path prefix of the single-id endpoint; the id is appended as one segment.
pub const MEDIA_ITEM_PATH: &str = "/api/v1/media";

/// Body of a batch resolve call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaResolveRequest {
    pub ids: Vec<String>,
}

/// Body returned by the batch resolve endpoint.
///
/// Ids missing from `entries` are unknown to the site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MediaResolveResponse {
    #[serde(default)]
    pub entries: BTreeMap<String, MediaLocation>,
}

/// Where a media resource can be displayed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaLocation {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl MediaLocation {
    pub fn new(url: impl Into<String>, mime_type: Option<String>) -> Self {
        Self {
            url: url.into(),
            mime_type,
        }
    }
}
