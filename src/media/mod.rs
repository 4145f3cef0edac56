//! Media URL resolution
//!
//! Turns opaque resource ids (uploads referenced by galleries, events and
//! archive entries) into display URLs:
//!
//! - [`ResolutionCoordinator`]: session-wide cache that batches and
//!   deduplicates requests against the batch resolve endpoint
//! - [`DegradedResolver`]: per-call-site fallback using the single-id endpoint
//! - [`MediaUrls`]: the facade callers hold, built from whichever is available
//!
//! ## Configuration
//!
//! Batching is controlled via `townsite.toml`:
//!
//! ```toml
//! [media]
//! debounce_ms = 25
//! max_wait_ms = 100
//! max_batch_size = 50
//! ```

mod config;
mod coordinator;
mod degraded;
mod facade;
mod lock;
mod resolver;
mod state;
mod subscription;
mod types;

pub use config::CoordinatorConfig;
pub use coordinator::ResolutionCoordinator;
pub use degraded::DegradedResolver;
pub use facade::MediaUrls;
pub use resolver::{BatchResolver, ResolveError, SingleResolver};
pub use state::ResolutionStats;
pub use subscription::Subscription;
pub use types::{ResolvedEntry, ResourceId};
