//! scanmoor — layer-aware vulnerability and misconfiguration scanner
//! core.
//!
//! The pipeline: an [`artifact::Artifact`] walks an image (layer by
//! layer) or a filesystem tree, dispatches per-file and post analyzers
//! concurrently, and caches each layer's [`types::BlobInfo`] under a
//! content+tooling key. A [`scan::Scanner`] then squashes the cached
//! blobs, runs the per-distribution OS package drivers and language
//! lookups against an advisory source, and the [`result`] module
//! filters, dedups and suppresses the findings into the final
//! [`types::Report`].

pub mod analyzer;
pub mod applier;
pub mod artifact;
pub mod cache;
pub mod detector;
pub mod error;
pub mod image;
pub mod options;
pub mod registry;
pub mod result;
pub mod scan;
pub mod types;
pub mod vulnsrc;
pub mod walker;

pub use error::{Error, Result};
pub use options::{ArtifactOptions, CancelToken};
