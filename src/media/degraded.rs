//! Fallback resolution when no shared coordinator is available.
//!
//! Honors the same caller contract as the coordinator, but every newly
//! requested id goes out immediately as its own single-id call.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use tokio::sync::oneshot;
use tracing::warn;

use super::coordinator::{record_completion, settle};
use super::lock::mutex_lock;
use super::resolver::{ResolveError, SingleResolver};
use super::state::{ReadyCallback, ResolutionState};
use super::subscription::Subscription;
use super::types::{ResolvedEntry, ResourceId};

const SOURCE: &str = "media::degraded";

/// Private, per-call-site resolver backed by the single-id endpoint.
#[derive(Clone)]
pub struct DegradedResolver {
    resolver: Arc<dyn SingleResolver>,
    state: Arc<Mutex<ResolutionState>>,
}

impl DegradedResolver {
    pub fn new(resolver: Arc<dyn SingleResolver>) -> Self {
        Self {
            resolver,
            state: Arc::new(Mutex::new(ResolutionState::new())),
        }
    }

    pub fn request_resource<F>(&self, id: impl Into<ResourceId>, on_ready: F) -> Subscription
    where
        F: FnOnce(Arc<ResolvedEntry>) + Send + 'static,
    {
        self.admit(id.into(), Some(Box::new(on_ready)))
    }

    pub fn prefetch(&self, id: impl Into<ResourceId>) {
        self.admit(id.into(), None).detach();
    }

    pub async fn resolve(&self, id: impl Into<ResourceId>) -> Option<Arc<ResolvedEntry>> {
        let (sender, receiver) = oneshot::channel();
        let _subscription = self.request_resource(id, move |entry| {
            let _ = sender.send(entry);
        });
        receiver.await.ok()
    }

    pub fn is_loading(&self, id: &str) -> bool {
        mutex_lock(&self.state, SOURCE, "is_loading").is_loading(id)
    }

    pub fn has_error(&self, id: &str) -> bool {
        mutex_lock(&self.state, SOURCE, "has_error").has_error(id)
    }

    pub fn cached_entry(&self, id: &str) -> Option<Arc<ResolvedEntry>> {
        mutex_lock(&self.state, SOURCE, "cached_entry").cached(id)
    }

    pub fn clear_error(&self, id: &str) -> bool {
        mutex_lock(&self.state, SOURCE, "clear_error").clear_error(id)
    }

    fn admit(&self, id: ResourceId, callback: Option<ReadyCallback>) -> Subscription {
        let admission = mutex_lock(&self.state, SOURCE, "admit").admit(id.clone(), callback);
        let (subscription, queued) = settle(admission, id, &self.state);
        if queued {
            let chunks = mutex_lock(&self.state, SOURCE, "drain").drain_pending(NonZeroUsize::MIN);
            for chunk in chunks {
                tokio::spawn(fetch_one(
                    Arc::clone(&self.resolver),
                    Arc::clone(&self.state),
                    chunk,
                ));
            }
        }
        subscription
    }
}

async fn fetch_one(
    resolver: Arc<dyn SingleResolver>,
    state: Arc<Mutex<ResolutionState>>,
    chunk: Vec<ResourceId>,
) {
    let mut found = HashMap::new();
    for id in &chunk {
        let outcome = AssertUnwindSafe(resolver.resolve_one(id))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(ResolveError::Panicked { ids: 1 }));
        match outcome {
            Ok(Some(location)) => {
                found.insert(id.clone(), location);
            }
            Ok(None) => {}
            Err(error) => {
                warn!(resource_id = %id, error = %error, "Single media resolve failed");
            }
        }
    }

    let completion = mutex_lock(&state, SOURCE, "complete").complete(&chunk, found);
    record_completion(chunk.len(), &completion);
    completion.deliver();
}
