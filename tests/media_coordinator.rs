use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use townsite::media::{
    BatchResolver, CoordinatorConfig, MediaUrls, ResolutionCoordinator, ResolveError, ResourceId,
    SingleResolver, Subscription,
};
use townsite_api_types::MediaLocation;

const DEBOUNCE_MS: u64 = 20;

/// Batch resolver that records every call and answers from a fixed rule:
/// ids starting with `missing` are omitted, a chunk containing an id
/// starting with `broken` fails as a whole.
#[derive(Default)]
struct RecordingResolver {
    calls: Mutex<Vec<Vec<String>>>,
    singles: Mutex<Vec<String>>,
    gate: Option<Semaphore>,
}

impl RecordingResolver {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Calls block until [`Self::release`] is invoked.
    fn gated() -> Arc<Self> {
        Arc::new(Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        })
    }

    fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(Semaphore::MAX_PERMITS);
        }
    }

    fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn singles(&self) -> Vec<String> {
        self.singles.lock().expect("singles lock").clone()
    }

    async fn wait_for_gate(&self) {
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.expect("gate open");
        }
    }
}

fn location_for(id: &str) -> MediaLocation {
    MediaLocation::new(format!("/uploads/{id}.jpg"), Some("image/jpeg".to_string()))
}

#[async_trait]
impl BatchResolver for RecordingResolver {
    async fn resolve_batch(
        &self,
        ids: &[ResourceId],
    ) -> Result<HashMap<ResourceId, MediaLocation>, ResolveError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(ids.iter().map(|id| id.as_str().to_string()).collect());
        self.wait_for_gate().await;

        if ids.iter().any(|id| id.as_str().starts_with("broken")) {
            return Err(ResolveError::Status {
                status: 502,
                body: "upstream unavailable".to_string(),
            });
        }

        Ok(ids
            .iter()
            .filter(|id| !id.as_str().starts_with("missing"))
            .map(|id| (id.clone(), location_for(id.as_str())))
            .collect())
    }
}

#[async_trait]
impl SingleResolver for RecordingResolver {
    async fn resolve_one(&self, id: &ResourceId) -> Result<Option<MediaLocation>, ResolveError> {
        self.singles
            .lock()
            .expect("singles lock")
            .push(id.as_str().to_string());
        self.wait_for_gate().await;

        if id.as_str().starts_with("missing") {
            return Ok(None);
        }
        Ok(Some(location_for(id.as_str())))
    }
}

/// Collects `(id, url)` pairs delivered to callbacks.
#[derive(Clone, Default)]
struct Deliveries(Arc<Mutex<Vec<(String, String)>>>);

impl Deliveries {
    fn request(&self, media: &ResolutionCoordinator, id: &str) -> Subscription {
        let log = self.clone();
        let label = id.to_string();
        media.request_resource(id, move |entry| {
            log.0
                .lock()
                .expect("deliveries lock")
                .push((label, entry.url.clone()));
        })
    }

    fn request_via(&self, media: &MediaUrls, id: &str) -> Subscription {
        let log = self.clone();
        let label = id.to_string();
        media.request_resource(id, move |entry| {
            log.0
                .lock()
                .expect("deliveries lock")
                .push((label, entry.url.clone()));
        })
    }

    fn all(&self) -> Vec<(String, String)> {
        self.0.lock().expect("deliveries lock").clone()
    }

    fn count_for(&self, id: &str) -> usize {
        self.all().iter().filter(|(label, _)| label == id).count()
    }
}

fn coordinator(resolver: Arc<RecordingResolver>, max_batch_size: usize) -> ResolutionCoordinator {
    let config = CoordinatorConfig {
        debounce_ms: DEBOUNCE_MS,
        max_wait_ms: 100,
        max_batch_size,
    };
    ResolutionCoordinator::new(config, resolver)
}

/// Let the debounce window close and every spawned task run to idle.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(500)).await;
}

#[tokio::test(start_paused = true)]
async fn duplicate_requests_share_one_call() {
    let resolver = RecordingResolver::new();
    let media = coordinator(resolver.clone(), 50);
    let deliveries = Deliveries::default();

    let subscriptions: Vec<_> = (0..5)
        .map(|_| deliveries.request(&media, "poster"))
        .collect();
    assert!(media.is_loading("poster"));
    settle().await;

    assert_eq!(resolver.calls(), vec![vec!["poster".to_string()]]);
    assert_eq!(deliveries.count_for("poster"), 5);
    assert!(
        deliveries
            .all()
            .iter()
            .all(|(_, url)| url == "/uploads/poster.jpg")
    );
    assert!(!media.is_loading("poster"));
    drop(subscriptions);
}

#[tokio::test(start_paused = true)]
async fn ids_in_one_window_share_one_call() {
    let resolver = RecordingResolver::new();
    let media = coordinator(resolver.clone(), 50);
    let deliveries = Deliveries::default();

    let ids = ["fair", "parade", "market", "library", "pool", "park", "hall"];
    let subscriptions: Vec<_> = ids.iter().map(|id| deliveries.request(&media, id)).collect();
    settle().await;

    let calls = resolver.calls();
    assert_eq!(calls.len(), 1);
    let sent: HashSet<&str> = calls[0].iter().map(String::as_str).collect();
    assert_eq!(sent, ids.iter().copied().collect());
    assert_eq!(deliveries.all().len(), ids.len());
    drop(subscriptions);
}

#[tokio::test(start_paused = true)]
async fn oversized_window_is_split_into_bounded_chunks() {
    let resolver = RecordingResolver::new();
    let media = coordinator(resolver.clone(), 50);
    let deliveries = Deliveries::default();

    let ids: Vec<String> = (0..120).map(|n| format!("photo-{n:03}")).collect();
    let subscriptions: Vec<_> = ids.iter().map(|id| deliveries.request(&media, id)).collect();
    settle().await;

    let calls = resolver.calls();
    let mut sizes: Vec<usize> = calls.iter().map(Vec::len).collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![20, 50, 50]);

    let mut sent: Vec<&str> = calls.iter().flatten().map(String::as_str).collect();
    sent.sort_unstable();
    let mut expected: Vec<&str> = ids.iter().map(String::as_str).collect();
    expected.sort_unstable();
    assert_eq!(sent, expected);

    for id in &ids {
        assert_eq!(deliveries.count_for(id), 1, "callback count for {id}");
        assert_eq!(
            media.cached_url(id).as_deref(),
            Some(format!("/uploads/{id}.jpg").as_str())
        );
    }
    drop(subscriptions);

    let again = Deliveries::default();
    let repeats: Vec<_> = ids
        .iter()
        .take(5)
        .map(|id| again.request(&media, id))
        .collect();
    settle().await;

    assert_eq!(resolver.calls().len(), 3);
    assert_eq!(again.all().len(), 5);
    drop(repeats);
}

#[tokio::test(start_paused = true)]
async fn chunks_of_one_window_are_in_flight_together() {
    let resolver = RecordingResolver::gated();
    let media = coordinator(resolver.clone(), 50);
    let deliveries = Deliveries::default();

    let ids: Vec<String> = (0..120).map(|n| format!("scan-{n:03}")).collect();
    let subscriptions: Vec<_> = ids.iter().map(|id| deliveries.request(&media, id)).collect();
    settle().await;

    // No call has returned yet, so every chunk was started without waiting
    // on the others.
    assert_eq!(resolver.calls().len(), 3);
    assert!(deliveries.all().is_empty());
    assert!(ids.iter().all(|id| media.is_loading(id)));

    resolver.release();
    settle().await;

    assert_eq!(resolver.calls().len(), 3);
    assert_eq!(deliveries.all().len(), ids.len());
    for id in &ids {
        assert!(media.cached_url(id).is_some(), "{id} cached");
    }
    drop(subscriptions);
}

#[tokio::test(start_paused = true)]
async fn cached_id_is_answered_without_a_call() {
    let resolver = RecordingResolver::new();
    let media = coordinator(resolver.clone(), 50);

    let first = media.resolve("crest").await.expect("crest resolves");
    assert_eq!(first.url, "/uploads/crest.jpg");
    assert_eq!(resolver.calls().len(), 1);

    let deliveries = Deliveries::default();
    let subscription = deliveries.request(&media, "crest");
    assert!(!subscription.is_active());
    assert!(deliveries.all().is_empty(), "cache hits are delivered later");

    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(
        deliveries.all(),
        vec![("crest".to_string(), "/uploads/crest.jpg".to_string())]
    );
    assert_eq!(resolver.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn missing_entry_only_errors_that_id() {
    let resolver = RecordingResolver::new();
    let media = coordinator(resolver.clone(), 50);
    let deliveries = Deliveries::default();

    let subscriptions = [
        deliveries.request(&media, "a"),
        deliveries.request(&media, "missing-b"),
        deliveries.request(&media, "c"),
    ];
    settle().await;

    assert_eq!(resolver.calls().len(), 1);
    assert!(media.has_error("missing-b"));
    assert!(!media.is_loading("missing-b"));
    assert_eq!(deliveries.count_for("missing-b"), 0);
    assert_eq!(media.cached_url("a").as_deref(), Some("/uploads/a.jpg"));
    assert_eq!(media.cached_url("c").as_deref(), Some("/uploads/c.jpg"));
    assert!(!media.has_error("a"));
    drop(subscriptions);
}

#[tokio::test(start_paused = true)]
async fn late_joiner_is_served_by_the_flight_in_progress() {
    let resolver = RecordingResolver::gated();
    let media = coordinator(resolver.clone(), 50);
    let deliveries = Deliveries::default();

    let early = deliveries.request(&media, "banner");
    settle().await;
    assert_eq!(resolver.calls().len(), 1, "batch is in flight");
    assert!(media.is_loading("banner"));

    let late = deliveries.request(&media, "banner");
    assert!(late.is_active());

    resolver.release();
    settle().await;

    assert_eq!(resolver.calls().len(), 1);
    assert_eq!(deliveries.count_for("banner"), 2);
    drop((early, late));
}

#[tokio::test(start_paused = true)]
async fn withdrawn_callbacks_do_not_block_completion() {
    let resolver = RecordingResolver::gated();
    let media = coordinator(resolver.clone(), 50);
    let deliveries = Deliveries::default();

    let subscriptions: Vec<_> = ["x", "y", "missing-z"]
        .iter()
        .map(|id| deliveries.request(&media, id))
        .collect();
    settle().await;
    assert_eq!(resolver.calls().len(), 1);

    for subscription in subscriptions {
        subscription.cancel();
    }
    assert_eq!(media.stats().waiting_callbacks, 0);

    resolver.release();
    settle().await;

    assert!(deliveries.all().is_empty());
    assert_eq!(media.cached_url("x").as_deref(), Some("/uploads/x.jpg"));
    assert_eq!(media.cached_url("y").as_deref(), Some("/uploads/y.jpg"));
    assert!(media.has_error("missing-z"));
}

#[tokio::test(start_paused = true)]
async fn discarded_subscription_withdraws_callback_but_detached_one_runs() {
    let resolver = RecordingResolver::new();
    let media = coordinator(resolver.clone(), 50);
    let deliveries = Deliveries::default();

    let _ = deliveries.request(&media, "flyer");
    deliveries.request(&media, "poster").detach();
    settle().await;

    assert_eq!(resolver.calls().len(), 1);
    assert_eq!(deliveries.count_for("flyer"), 0);
    assert_eq!(deliveries.count_for("poster"), 1);
    assert!(media.cached_url("flyer").is_some());
}

#[tokio::test(start_paused = true)]
async fn dropping_every_handle_mid_flight_is_safe() {
    let resolver = RecordingResolver::gated();
    let media = coordinator(resolver.clone(), 50);
    let deliveries = Deliveries::default();

    let subscription = deliveries.request(&media, "mural");
    settle().await;
    assert_eq!(resolver.calls().len(), 1);

    drop(media);
    resolver.release();
    settle().await;

    assert_eq!(deliveries.count_for("mural"), 1);
    drop(subscription);
}

#[tokio::test(start_paused = true)]
async fn transport_failure_marks_the_whole_chunk() {
    let resolver = RecordingResolver::new();
    let media = coordinator(resolver.clone(), 2);
    let deliveries = Deliveries::default();

    let subscriptions: Vec<_> = ["ok-1", "broken-2", "ok-3"]
        .iter()
        .map(|id| deliveries.request(&media, id))
        .collect();
    settle().await;

    assert_eq!(resolver.calls().len(), 2);
    assert!(media.has_error("ok-1"));
    assert!(media.has_error("broken-2"));
    assert_eq!(media.cached_url("ok-3").as_deref(), Some("/uploads/ok-3.jpg"));
    assert_eq!(deliveries.all().len(), 1);
    drop(subscriptions);
}

#[tokio::test(start_paused = true)]
async fn errored_ids_wait_for_clear_error() {
    let resolver = RecordingResolver::new();
    let media = coordinator(resolver.clone(), 50);

    assert!(media.resolve("missing-logo").await.is_none());
    assert!(media.resolve("missing-logo").await.is_none());
    assert_eq!(resolver.calls().len(), 1);

    assert!(media.clear_error("missing-logo"));
    assert!(!media.has_error("missing-logo"));
    assert!(media.resolve("missing-logo").await.is_none());
    assert_eq!(resolver.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn panicking_callback_does_not_stop_siblings() {
    let resolver = RecordingResolver::new();
    let media = coordinator(resolver.clone(), 50);
    let fired = Arc::new(AtomicUsize::new(0));

    let panicking = media.request_resource("seal", |_| panic!("callback failure"));
    let counter = Arc::clone(&fired);
    let sibling = media.request_resource("seal", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    settle().await;

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(media.cached_url("seal").is_some());
    drop((panicking, sibling));
}

#[tokio::test(start_paused = true)]
async fn shutdown_drops_unwatched_queue() {
    let resolver = RecordingResolver::new();
    let media = coordinator(resolver.clone(), 50);

    media.prefetch("flyer");
    assert!(media.is_loading("flyer"));
    media.shutdown();
    settle().await;

    assert!(resolver.calls().is_empty());
    assert!(!media.is_loading("flyer"));
}

#[tokio::test(start_paused = true)]
async fn facade_with_coordinator_batches() {
    let resolver = RecordingResolver::new();
    let shared = coordinator(resolver.clone(), 50);
    let media = MediaUrls::from_context(Some(&shared), resolver.clone());
    let deliveries = Deliveries::default();

    let subscriptions: Vec<_> = ["a", "b", "a"]
        .iter()
        .map(|id| deliveries.request_via(&media, id))
        .collect();
    settle().await;

    assert_eq!(resolver.calls().len(), 1);
    assert!(resolver.singles().is_empty());
    assert_eq!(deliveries.all().len(), 3);
    assert_eq!(shared.cached_url("b"), media.cached_url("b"));
    drop(subscriptions);
}

#[tokio::test(start_paused = true)]
async fn facade_without_coordinator_fetches_each_id() {
    let resolver = RecordingResolver::gated();
    let media = MediaUrls::from_context(None, resolver.clone());
    let deliveries = Deliveries::default();

    let subscriptions: Vec<_> = ["a", "b", "a", "missing-c"]
        .iter()
        .map(|id| deliveries.request_via(&media, id))
        .collect();
    assert!(media.is_loading("a"));

    resolver.release();
    settle().await;

    let mut singles = resolver.singles();
    singles.sort();
    assert_eq!(singles, vec!["a", "b", "missing-c"]);
    assert!(resolver.calls().is_empty());
    assert_eq!(deliveries.count_for("a"), 2);
    assert_eq!(deliveries.count_for("b"), 1);
    assert!(media.has_error("missing-c"));
    drop(subscriptions);

    let cached = media.resolve("a").await.expect("cached");
    assert_eq!(cached.url, "/uploads/a.jpg");
    assert_eq!(resolver.singles().len(), 3);
}
