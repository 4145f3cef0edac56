//! Batched, deduplicated resolution of media URLs.
//!
//! Many independent callers (gallery thumbnails, event cards, archive rows)
//! ask for the display URL of a resource id. The coordinator collects those
//! requests for a short debounce window, dispatches them as a few bounded
//! batch calls in parallel, and fans every result back out to each caller
//! that asked for the id, including callers that joined while the batch was
//! already in flight.
//!
//! State lives behind one mutex and is only touched in short synchronous
//! sections; the lock is never held across an `.await` and callbacks always
//! run after it is released.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use futures::FutureExt;
use metrics::{counter, gauge, histogram};
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use super::config::CoordinatorConfig;
use super::lock::mutex_lock;
use super::resolver::{BatchResolver, ResolveError};
use super::state::{
    Admission, Completion, ReadyCallback, ResolutionState, ResolutionStats, invoke_callbacks,
};
use super::subscription::Subscription;
use super::types::{ResolvedEntry, ResourceId};

const SOURCE: &str = "media::coordinator";

const METRIC_CACHE_HIT: &str = "townsite_media_cache_hit_total";
const METRIC_CACHE_MISS: &str = "townsite_media_cache_miss_total";
const METRIC_BATCH_DISPATCHED: &str = "townsite_media_batch_dispatched_total";
const METRIC_BATCH_SIZE: &str = "townsite_media_batch_size";
const METRIC_RESOLVE_MS: &str = "townsite_media_resolve_ms";
const METRIC_CHUNK_FAILED: &str = "townsite_media_chunk_failed_total";
const METRIC_UNRESOLVED: &str = "townsite_media_unresolved_total";
const METRIC_PENDING_IDS: &str = "townsite_media_pending_ids";

/// Shared resolver for media display URLs.
///
/// Cheap to clone; every clone drives the same cache. Construct one per
/// session and hand it to callers, which only use the public methods.
/// Requests must be issued from within a Tokio runtime.
#[derive(Clone)]
pub struct ResolutionCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    config: CoordinatorConfig,
    resolver: Arc<dyn BatchResolver>,
    state: Arc<Mutex<ResolutionState>>,
    debounce: Arc<Debounce>,
    timer_task: Mutex<Option<JoinHandle<()>>>,
}

/// Debounce window shared with the coordinator's single timer task.
#[derive(Default)]
struct Debounce {
    window: Mutex<DebounceWindow>,
    wake: Notify,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct DebounceWindow {
    deadline: Option<Instant>,
    opened: Option<Instant>,
}

impl DebounceWindow {
    /// Open the window, or push its deadline out up to the `max_wait` ceiling.
    fn extend(&mut self, now: Instant, debounce: Duration, max_wait: Duration) {
        let opened = *self.opened.get_or_insert(now);
        self.deadline = Some((now + debounce).min(opened + max_wait));
    }

    /// Close the window if `expected` is still its deadline and has passed.
    fn close_if_due(&mut self, expected: Instant, now: Instant) -> bool {
        if self.deadline != Some(expected) || now < expected {
            return false;
        }
        *self = Self::default();
        true
    }

    fn cancel(&mut self) {
        *self = Self::default();
    }
}

impl Debounce {
    fn window(&self, op: &'static str) -> std::sync::MutexGuard<'_, DebounceWindow> {
        mutex_lock(&self.window, SOURCE, op)
    }
}

impl ResolutionCoordinator {
    pub fn new(config: CoordinatorConfig, resolver: Arc<dyn BatchResolver>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                resolver,
                state: Arc::new(Mutex::new(ResolutionState::new())),
                debounce: Arc::new(Debounce::default()),
                timer_task: Mutex::new(None),
            }),
        }
    }

    /// Ask for the display URL of `id`; `on_ready` runs once with the entry.
    ///
    /// The callback stays registered only while the returned [`Subscription`]
    /// is alive: `let _ = media.request_resource(..)` withdraws it at once.
    /// Hold the subscription for as long as the result is wanted, or call
    /// [`Subscription::detach`] for fire-and-forget use.
    ///
    /// A cached id answers on the next scheduler turn without a network call.
    /// An id that previously failed to resolve is not retried and `on_ready`
    /// is dropped without running (see [`Self::clear_error`]). Otherwise the
    /// id joins the next batch, or the batch already in flight for it.
    pub fn request_resource<F>(&self, id: impl Into<ResourceId>, on_ready: F) -> Subscription
    where
        F: FnOnce(Arc<ResolvedEntry>) + Send + 'static,
    {
        self.admit(id.into(), Some(Box::new(on_ready)))
    }

    /// Queue `id` for resolution without waiting on the result.
    pub fn prefetch(&self, id: impl Into<ResourceId>) {
        self.admit(id.into(), None).detach();
    }

    /// Resolve `id`, returning `None` if the resolver has no entry for it.
    pub async fn resolve(&self, id: impl Into<ResourceId>) -> Option<Arc<ResolvedEntry>> {
        let (sender, receiver) = oneshot::channel();
        let _subscription = self.request_resource(id, move |entry| {
            let _ = sender.send(entry);
        });
        receiver.await.ok()
    }

    /// True while `id` is queued or its batch is in flight.
    pub fn is_loading(&self, id: &str) -> bool {
        self.lock_state("is_loading").is_loading(id)
    }

    /// True once a batch completed without an entry for `id`.
    pub fn has_error(&self, id: &str) -> bool {
        self.lock_state("has_error").has_error(id)
    }

    pub fn cached_url(&self, id: &str) -> Option<String> {
        self.cached_entry(id).map(|entry| entry.url.clone())
    }

    pub fn cached_entry(&self, id: &str) -> Option<Arc<ResolvedEntry>> {
        self.lock_state("cached_entry").cached(id)
    }

    /// Forget a failed resolution so the next request for `id` is queued again.
    pub fn clear_error(&self, id: &str) -> bool {
        self.lock_state("clear_error").clear_error(id)
    }

    pub fn stats(&self) -> ResolutionStats {
        self.lock_state("stats").stats()
    }

    /// Tear down the coordinator's timer.
    ///
    /// When no subscriber is waiting on a queued id, the queued ids are
    /// forgotten and the debounce timer is cancelled. Batches already in
    /// flight still complete and populate the cache.
    pub fn shutdown(&self) {
        let mut window = self.inner.debounce.window("shutdown.window");
        let abandoned = self.lock_state("shutdown.state").abandon_idle_pending();

        match abandoned {
            Some(abandoned) => {
                window.cancel();
                drop(window);
                self.inner.debounce.wake.notify_one();
                gauge!(METRIC_PENDING_IDS).set(0.0);
                info!(abandoned, "Media coordinator shut down");
            }
            None => {
                debug!("Media coordinator shutdown deferred: subscribers wait on queued ids");
            }
        }
    }

    fn admit(&self, id: ResourceId, callback: Option<ReadyCallback>) -> Subscription {
        let (admission, pending) = {
            let mut state = self.lock_state("admit");
            let admission = state.admit(id.clone(), callback);
            (admission, state.pending_len())
        };

        let (subscription, queued) = settle(admission, id, &self.inner.state);
        if queued {
            gauge!(METRIC_PENDING_IDS).set(pending as f64);
            self.inner.arm_timer();
        }
        subscription
    }

    fn lock_state(&self, op: &'static str) -> std::sync::MutexGuard<'_, ResolutionState> {
        mutex_lock(&self.inner.state, SOURCE, op)
    }
}

impl Inner {
    /// Open or extend the debounce window after a new id was queued.
    fn arm_timer(self: &Arc<Self>) {
        self.debounce.window("arm_timer").extend(
            Instant::now(),
            self.config.debounce(),
            self.config.max_wait(),
        );

        let mut task = mutex_lock(&self.timer_task, SOURCE, "arm_timer.task");
        if task.is_none() {
            *task = Some(tokio::spawn(run_timer(
                Arc::clone(&self.debounce),
                Arc::downgrade(self),
            )));
        } else {
            self.debounce.wake.notify_one();
        }
    }

    /// Drain the pending set and dispatch one task per chunk.
    fn flush(self: &Arc<Self>) {
        let chunks = mutex_lock(&self.state, SOURCE, "flush.drain")
            .drain_pending(self.config.max_batch_size_non_zero());
        gauge!(METRIC_PENDING_IDS).set(0.0);
        if chunks.is_empty() {
            return;
        }

        debug!(
            ids = chunks.iter().map(Vec::len).sum::<usize>(),
            chunks = chunks.len(),
            "Dispatching media batch"
        );

        for chunk in chunks {
            tokio::spawn(Arc::clone(self).dispatch_chunk(chunk));
        }
    }

    async fn dispatch_chunk(self: Arc<Self>, chunk: Vec<ResourceId>) {
        let started_at = Instant::now();
        counter!(METRIC_BATCH_DISPATCHED).increment(1);
        histogram!(METRIC_BATCH_SIZE).record(chunk.len() as f64);

        let outcome = AssertUnwindSafe(self.resolver.resolve_batch(&chunk))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(ResolveError::Panicked { ids: chunk.len() }));
        histogram!(METRIC_RESOLVE_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);

        let found = match outcome {
            Ok(found) => found,
            Err(error) => {
                counter!(METRIC_CHUNK_FAILED).increment(1);
                warn!(
                    error = %error,
                    ids = chunk.len(),
                    "Media batch resolve failed; marking chunk unresolved"
                );
                HashMap::new()
            }
        };

        let completion = mutex_lock(&self.state, SOURCE, "complete").complete(&chunk, found);
        record_completion(chunk.len(), &completion);
        completion.deliver();
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let task = self
            .timer_task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = task.take() {
            handle.abort();
        }
    }
}

/// The coordinator's one timer task: sleeps until the current window
/// deadline, re-reading it whenever the window is extended or cancelled.
async fn run_timer(debounce: Arc<Debounce>, coordinator: Weak<Inner>) {
    let timer = sleep(Duration::ZERO);
    tokio::pin!(timer);

    loop {
        let changed = debounce.wake.notified();
        let deadline = debounce.window("timer.read").deadline;
        let Some(deadline) = deadline else {
            changed.await;
            continue;
        };

        timer.as_mut().reset(deadline);
        tokio::select! {
            () = &mut timer => {
                if !debounce.window("timer.fire").close_if_due(deadline, Instant::now()) {
                    continue;
                }
                match coordinator.upgrade() {
                    Some(inner) => inner.flush(),
                    None => return,
                }
            }
            () = changed => {}
        }
    }
}

/// Apply the caller-facing side of an admission: deferred delivery for cache
/// hits, silent drop for errored ids, a live subscription otherwise.
///
/// Returns whether the id was newly queued.
pub(super) fn settle(
    admission: Admission,
    id: ResourceId,
    state: &Arc<Mutex<ResolutionState>>,
) -> (Subscription, bool) {
    let token = admission.token();
    match admission {
        Admission::Cached { entry, callback } => {
            counter!(METRIC_CACHE_HIT).increment(1);
            if let Some(callback) = callback {
                tokio::spawn(async move {
                    invoke_callbacks(&entry, vec![callback]);
                });
            }
            (Subscription::inert(), false)
        }
        Admission::Errored { callback } => {
            debug!(resource_id = %id, "Skipping previously unresolved media id");
            drop(callback);
            (Subscription::inert(), false)
        }
        Admission::Joined { .. } => (
            Subscription::registered(id, token, Arc::downgrade(state)),
            false,
        ),
        Admission::Queued { .. } => {
            counter!(METRIC_CACHE_MISS).increment(1);
            (
                Subscription::registered(id, token, Arc::downgrade(state)),
                true,
            )
        }
    }
}

pub(super) fn record_completion(requested: usize, completion: &Completion) {
    let unresolved = completion.unresolved.len();
    if unresolved > 0 {
        counter!(METRIC_UNRESOLVED).increment(unresolved as u64);
        debug!(ids = ?completion.unresolved, "Media ids left unresolved");
    }
    info!(
        requested,
        resolved = completion.resolved_count(),
        unresolved,
        "Media batch completed"
    );
}
