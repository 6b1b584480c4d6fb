//! Artifact contract and inspectors.

use crate::error::{Error, Result};
use crate::options::CancelToken;
use crate::types::ArtifactReference;

pub mod image;
pub mod local;

pub use image::ImageArtifact;
pub use local::LocalArtifact;

/// An inspectable artifact: a container image, a filesystem tree, etc.
pub trait Artifact {
    fn inspect(&self, ctx: &CancelToken) -> Result<ArtifactReference>;
    /// Drop the blobs owned by this artifact from the cache. Image
    /// blobs are shared across scans and stay cached.
    fn clean(&self, reference: &ArtifactReference) -> Result<()>;
}

/// Outcome of the remote SBOM lookup hook. `NotFound` falls through to
/// a full scan; `Error` aborts it.
pub enum RemoteSbomResult {
    Found(ArtifactReference),
    NotFound,
    Error(Error),
}

/// Hook consulted before scanning an image: a registry may already
/// publish an SBOM attestation for it.
pub trait SbomSource: Send + Sync {
    fn retrieve(&self, image_name: &str) -> RemoteSbomResult;
}

/// Default hook: never finds anything.
pub struct NoRemoteSbom;

impl SbomSource for NoRemoteSbom {
    fn retrieve(&self, _image_name: &str) -> RemoteSbomResult {
        RemoteSbomResult::NotFound
    }
}
