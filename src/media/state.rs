//! Bookkeeping shared by the coordinator and the degraded resolver.
//!
//! [`ResolutionState`] is a synchronous state machine over the cache, the
//! pending/loading/error sets and the callback registry. It performs no I/O
//! and never runs callbacks itself: every transition hands callbacks back to
//! the caller, which invokes or drops them after releasing its lock.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use metrics::counter;
use townsite_api_types::MediaLocation;
use tracing::warn;

use super::types::{ResolvedEntry, ResourceId};

const METRIC_CALLBACK_PANIC: &str = "townsite_media_callback_panic_total";

/// Callback run once an id resolves.
pub(crate) type ReadyCallback = Box<dyn FnOnce(Arc<ResolvedEntry>) + Send + 'static>;

/// Identifies one registered callback so its owner can withdraw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct CallbackToken(u64);

struct Registered {
    token: CallbackToken,
    callback: ReadyCallback,
}

/// Outcome of admitting a request into the state machine.
pub(crate) enum Admission {
    /// Already cached; the callback (if any) must be invoked with `entry`.
    Cached {
        entry: Arc<ResolvedEntry>,
        callback: Option<ReadyCallback>,
    },
    /// Previously unresolved; the callback must be dropped uninvoked.
    Errored { callback: Option<ReadyCallback> },
    /// Already pending or in flight; the callback joined the existing wait.
    Joined { token: Option<CallbackToken> },
    /// Newly pending; the dispatch timer must be (re)armed.
    Queued { token: Option<CallbackToken> },
}

impl Admission {
    pub(crate) fn token(&self) -> Option<CallbackToken> {
        match self {
            Admission::Joined { token } | Admission::Queued { token } => *token,
            Admission::Cached { .. } | Admission::Errored { .. } => None,
        }
    }
}

/// Callbacks released by a chunk completion.
#[derive(Default)]
pub(crate) struct Completion {
    pub(crate) ready: Vec<(Arc<ResolvedEntry>, Vec<ReadyCallback>)>,
    pub(crate) unresolved: Vec<ResourceId>,
    pub(crate) discarded: Vec<ReadyCallback>,
}

impl Completion {
    pub(crate) fn resolved_count(&self) -> usize {
        self.ready.len()
    }

    /// Run ready callbacks and drop discarded ones. Must be called without
    /// holding the state lock.
    pub(crate) fn deliver(self) {
        drop(self.discarded);
        for (entry, callbacks) in self.ready {
            invoke_callbacks(&entry, callbacks);
        }
    }
}

/// Run callbacks in order, isolating each one so a panic cannot stop the rest.
pub(crate) fn invoke_callbacks(entry: &Arc<ResolvedEntry>, callbacks: Vec<ReadyCallback>) {
    for callback in callbacks {
        let shared = Arc::clone(entry);
        if catch_unwind(AssertUnwindSafe(move || callback(shared))).is_err() {
            counter!(METRIC_CALLBACK_PANIC).increment(1);
            warn!(
                resource_id = %entry.resource_id,
                "media ready callback panicked; continuing with remaining callbacks"
            );
        }
    }
}

/// Point-in-time sizes of the resolution sets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolutionStats {
    pub cached: usize,
    pub pending: usize,
    pub loading: usize,
    pub errored: usize,
    pub waiting_callbacks: usize,
}

#[derive(Default)]
pub(crate) struct ResolutionState {
    cache: HashMap<ResourceId, Arc<ResolvedEntry>>,
    pending_order: Vec<ResourceId>,
    pending: HashSet<ResourceId>,
    loading: HashSet<ResourceId>,
    errors: HashSet<ResourceId>,
    callbacks: HashMap<ResourceId, Vec<Registered>>,
    next_token: u64,
}

impl ResolutionState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn admit(&mut self, id: ResourceId, callback: Option<ReadyCallback>) -> Admission {
        if let Some(entry) = self.cache.get(&id) {
            return Admission::Cached {
                entry: Arc::clone(entry),
                callback,
            };
        }

        if self.errors.contains(&id) {
            return Admission::Errored { callback };
        }

        if self.pending.contains(&id) || self.loading.contains(&id) {
            let token = callback.map(|callback| self.register(&id, callback));
            return Admission::Joined { token };
        }

        let token = callback.map(|callback| self.register(&id, callback));
        self.pending.insert(id.clone());
        self.pending_order.push(id);
        Admission::Queued { token }
    }

    fn register(&mut self, id: &ResourceId, callback: ReadyCallback) -> CallbackToken {
        let token = CallbackToken(self.next_token);
        self.next_token += 1;
        self.callbacks
            .entry(id.clone())
            .or_default()
            .push(Registered { token, callback });
        token
    }

    /// Withdraw a callback that has not run yet.
    pub(crate) fn unregister(
        &mut self,
        id: &ResourceId,
        token: CallbackToken,
    ) -> Option<ReadyCallback> {
        let list = self.callbacks.get_mut(id)?;
        let position = list.iter().position(|registered| registered.token == token)?;
        let removed = list.remove(position);
        if list.is_empty() {
            self.callbacks.remove(id);
        }
        Some(removed.callback)
    }

    /// Move every pending id into the loading set, split into chunks of at
    /// most `max_batch_size` ids in arrival order.
    pub(crate) fn drain_pending(&mut self, max_batch_size: NonZeroUsize) -> Vec<Vec<ResourceId>> {
        self.pending.clear();
        let drained = std::mem::take(&mut self.pending_order);
        self.loading.extend(drained.iter().cloned());
        drained
            .chunks(max_batch_size.get())
            .map(<[ResourceId]>::to_vec)
            .collect()
    }

    /// Record the outcome of one chunk. Ids in `chunk` that are absent from
    /// `found` become errors; entries for ids outside `chunk` are ignored.
    pub(crate) fn complete(
        &mut self,
        chunk: &[ResourceId],
        mut found: HashMap<ResourceId, MediaLocation>,
    ) -> Completion {
        let mut completion = Completion::default();

        for id in chunk {
            if !self.loading.remove(id) {
                continue;
            }

            let callbacks = self
                .callbacks
                .remove(id)
                .unwrap_or_default()
                .into_iter()
                .map(|registered| registered.callback);

            match found.remove(id) {
                Some(location) => {
                    let entry = Arc::new(ResolvedEntry::new(id.clone(), location));
                    self.cache.insert(id.clone(), Arc::clone(&entry));
                    completion.ready.push((entry, callbacks.collect()));
                }
                None => {
                    self.errors.insert(id.clone());
                    completion.unresolved.push(id.clone());
                    completion.discarded.extend(callbacks);
                }
            }
        }

        completion
    }

    /// Forget pending ids when nobody is waiting on them. Returns how many
    /// ids were dropped, or `None` when a subscriber still waits.
    pub(crate) fn abandon_idle_pending(&mut self) -> Option<usize> {
        let waiting = self
            .pending_order
            .iter()
            .any(|id| self.callbacks.contains_key(id));
        if waiting {
            return None;
        }

        let abandoned = self.pending_order.len();
        self.pending_order.clear();
        self.pending.clear();
        Some(abandoned)
    }

    pub(crate) fn clear_error(&mut self, id: &str) -> bool {
        self.errors.remove(id)
    }

    pub(crate) fn is_loading(&self, id: &str) -> bool {
        self.pending.contains(id) || self.loading.contains(id)
    }

    pub(crate) fn has_error(&self, id: &str) -> bool {
        self.errors.contains(id)
    }

    pub(crate) fn cached(&self, id: &str) -> Option<Arc<ResolvedEntry>> {
        self.cache.get(id).cloned()
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending_order.len()
    }

    pub(crate) fn stats(&self) -> ResolutionStats {
        ResolutionStats {
            cached: self.cache.len(),
            pending: self.pending_order.len(),
            loading: self.loading.len(),
            errored: self.errors.len(),
            waiting_callbacks: self.callbacks.values().map(Vec::len).sum(),
        }
    }
}
