//! Coordinator tuning.
//!
//! Built from the `[media]` table of `townsite.toml` via
//! [`MediaSettings`], which owns the defaults.

use std::num::NonZeroUsize;
use std::time::Duration;

use crate::config::MediaSettings;

/// Batching parameters for a [`ResolutionCoordinator`](super::ResolutionCoordinator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Quiet period after the latest new id before a batch is dispatched.
    pub debounce_ms: u64,
    /// Upper bound on how long a window may keep being extended.
    pub max_wait_ms: u64,
    /// Maximum ids per resolve call.
    pub max_batch_size: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::from(&MediaSettings::default())
    }
}

impl From<&MediaSettings> for CoordinatorConfig {
    fn from(settings: &MediaSettings) -> Self {
        Self {
            debounce_ms: settings.debounce.as_millis() as u64,
            max_wait_ms: settings.max_wait.as_millis() as u64,
            max_batch_size: settings.max_batch_size.get(),
        }
    }
}

impl CoordinatorConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// The window ceiling, never shorter than the debounce itself.
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms.max(self.debounce_ms))
    }

    /// Returns the chunk size as NonZeroUsize, clamping to 1 if zero.
    pub fn max_batch_size_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_batch_size).unwrap_or(NonZeroUsize::MIN)
    }
}
