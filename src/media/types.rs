//! Identifiers and resolved entries for media resources.

use std::borrow::Borrow;
use std::fmt;

use townsite_api_types::MediaLocation;

const INLINE_PREVIEW_PREFIXES: &[&str] = &["image/", "video/", "audio/", "text/"];
const INLINE_PREVIEW_EXACT: &[&str] = &["application/pdf"];

/// Opaque key identifying a media resource, assigned by the site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ResourceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResourceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ResourceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&String> for ResourceId {
    fn from(value: &String) -> Self {
        Self(value.clone())
    }
}

/// A resource id bound to its display URL. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEntry {
    pub resource_id: ResourceId,
    pub url: String,
    pub mime_type: Option<String>,
}

impl ResolvedEntry {
    pub fn new(resource_id: ResourceId, location: MediaLocation) -> Self {
        Self {
            resource_id,
            url: location.url,
            mime_type: location.mime_type,
        }
    }

    /// Whether the entry can be shown inline (image, video, audio, text or PDF)
    /// rather than only linked.
    pub fn supports_inline_preview(&self) -> bool {
        self.mime_type.as_deref().is_some_and(|content_type| {
            INLINE_PREVIEW_PREFIXES
                .iter()
                .any(|prefix| content_type.starts_with(prefix))
                || INLINE_PREVIEW_EXACT.contains(&content_type)
        })
    }
}
