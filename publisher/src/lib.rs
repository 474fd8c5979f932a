//! Publishing generated videos from a content manifest.

pub mod manifest;
pub mod settings;

pub use manifest::{ContentItem, ContentManifest, PostStatus};
