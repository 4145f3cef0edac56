//! Townsite media resolution.
//!
//! Rendering code asks for media by opaque id through [`media::MediaUrls`];
//! ids requested close together are deduplicated, batched into chunked
//! resolve calls and cached for the rest of the session.

pub mod config;
pub mod error;
pub mod infra;
pub mod media;
