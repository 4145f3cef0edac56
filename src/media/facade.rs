use std::sync::Arc;

use super::coordinator::ResolutionCoordinator;
use super::degraded::DegradedResolver;
use super::resolver::SingleResolver;
use super::subscription::Subscription;
use super::types::{ResolvedEntry, ResourceId};

/// What rendering code holds to look up media URLs.
///
/// Backed by the session's shared [`ResolutionCoordinator`] when one is
/// available, or by a private [`DegradedResolver`] otherwise. Both expose the
/// same behavior; only the number of network calls differs.
#[derive(Clone)]
pub struct MediaUrls {
    backend: Backend,
}

#[derive(Clone)]
enum Backend {
    Shared(ResolutionCoordinator),
    Degraded(DegradedResolver),
}

impl MediaUrls {
    /// Use `shared` if the host provides one, else build a one-shot fallback.
    pub fn from_context(
        shared: Option<&ResolutionCoordinator>,
        fallback: Arc<dyn SingleResolver>,
    ) -> Self {
        let backend = match shared {
            Some(coordinator) => Backend::Shared(coordinator.clone()),
            None => Backend::Degraded(DegradedResolver::new(fallback)),
        };
        Self { backend }
    }

    pub fn request_resource<F>(&self, id: impl Into<ResourceId>, on_ready: F) -> Subscription
    where
        F: FnOnce(Arc<ResolvedEntry>) + Send + 'static,
    {
        match &self.backend {
            Backend::Shared(coordinator) => coordinator.request_resource(id, on_ready),
            Backend::Degraded(degraded) => degraded.request_resource(id, on_ready),
        }
    }

    pub fn prefetch(&self, id: impl Into<ResourceId>) {
        match &self.backend {
            Backend::Shared(coordinator) => coordinator.prefetch(id),
            Backend::Degraded(degraded) => degraded.prefetch(id),
        }
    }

    pub async fn resolve(&self, id: impl Into<ResourceId>) -> Option<Arc<ResolvedEntry>> {
        match &self.backend {
            Backend::Shared(coordinator) => coordinator.resolve(id).await,
            Backend::Degraded(degraded) => degraded.resolve(id).await,
        }
    }

    pub fn is_loading(&self, id: &str) -> bool {
        match &self.backend {
            Backend::Shared(coordinator) => coordinator.is_loading(id),
            Backend::Degraded(degraded) => degraded.is_loading(id),
        }
    }

    pub fn has_error(&self, id: &str) -> bool {
        match &self.backend {
            Backend::Shared(coordinator) => coordinator.has_error(id),
            Backend::Degraded(degraded) => degraded.has_error(id),
        }
    }

    pub fn cached_url(&self, id: &str) -> Option<String> {
        self.cached_entry(id).map(|entry| entry.url.clone())
    }

    pub fn cached_entry(&self, id: &str) -> Option<Arc<ResolvedEntry>> {
        match &self.backend {
            Backend::Shared(coordinator) => coordinator.cached_entry(id),
            Backend::Degraded(degraded) => degraded.cached_entry(id),
        }
    }

    pub fn clear_error(&self, id: &str) -> bool {
        match &self.backend {
            Backend::Shared(coordinator) => coordinator.clear_error(id),
            Backend::Degraded(degraded) => degraded.clear_error(id),
        }
    }
}
