use std::sync::{Mutex, Weak};

use super::lock::mutex_lock;
use super::state::{CallbackToken, ResolutionState};
use super::types::ResourceId;

const SOURCE: &str = "media::subscription";

/// Keeps a ready-callback registered while it is alive.
///
/// Dropping the subscription withdraws the callback if it has not run yet,
/// so a caller that goes away never leaves a callback behind. Use
/// [`Subscription::detach`] to keep the callback registered regardless.
#[must_use = "dropping a Subscription withdraws its callback"]
pub struct Subscription {
    registration: Option<Registration>,
}

struct Registration {
    id: ResourceId,
    token: CallbackToken,
    state: Weak<Mutex<ResolutionState>>,
}

impl Subscription {
    pub(crate) fn inert() -> Self {
        Self { registration: None }
    }

    pub(crate) fn registered(
        id: ResourceId,
        token: Option<CallbackToken>,
        state: Weak<Mutex<ResolutionState>>,
    ) -> Self {
        Self {
            registration: token.map(|token| Registration { id, token, state }),
        }
    }

    /// Whether a callback is still tracked by this subscription.
    pub fn is_active(&self) -> bool {
        self.registration.is_some()
    }

    /// Withdraw the callback now. Equivalent to dropping the subscription.
    pub fn cancel(mut self) {
        self.release();
    }

    /// Leave the callback registered until it runs or is discarded.
    pub fn detach(mut self) {
        self.registration = None;
    }

    fn release(&mut self) {
        let Some(registration) = self.registration.take() else {
            return;
        };
        let Some(state) = registration.state.upgrade() else {
            return;
        };
        // Dropped after the guard so the callback's own drop may re-enter.
        let withdrawn =
            mutex_lock(&state, SOURCE, "release").unregister(&registration.id, registration.token);
        drop(withdrawn);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field(
                "resource_id",
                &self.registration.as_ref().map(|registration| &registration.id),
            )
            .finish()
    }
}
