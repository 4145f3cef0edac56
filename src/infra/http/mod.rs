//! Outbound HTTP adapters.

mod media;

pub use media::HttpMediaResolver;
