//! Media resolution: bounded URL download and MIME detection.

pub mod fetch;
pub mod mime;

pub use fetch::{MediaError, MediaFetcher, MediaSource};
