//! Content-addressed cache for analysis results.
//!
//! Blob keys are derived from content identity plus everything that can
//! change analysis output: analyzer versions, handler versions and the
//! key-relevant subset of scan options. A key hit therefore means "this
//! exact analysis has been done before" and the blob is reused.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::options::ArtifactOptions;
use crate::types::{ArtifactInfo, BlobInfo};

// ─── Key derivation ──────────────────────────────────────────────────

#[derive(Serialize)]
struct KeyInput<'a> {
    hash: &'a str,
    analyzers: &'a BTreeMap<String, u32>,
    handlers: &'a BTreeMap<String, u32>,
    options: crate::options::OptionsKeyMaterial,
}

/// Derive a deterministic cache key.
///
/// The maps are ordered, so permuting how callers built them cannot
/// change the digest; bumping any contributing version or option bit
/// does. Execution knobs (parallelism, logging) are excluded by
/// construction via [`ArtifactOptions::key_material`].
pub fn calc_key(
    content_hash: &str,
    analyzer_versions: &BTreeMap<String, u32>,
    handler_versions: &BTreeMap<String, u32>,
    options: &ArtifactOptions,
) -> Result<String> {
    let input = KeyInput {
        hash: content_hash,
        analyzers: analyzer_versions,
        handlers: handler_versions,
        options: options.key_material(),
    };
    let encoded = serde_json::to_vec(&input)?;
    let mut hasher = Sha256::new();
    hasher.update(&encoded);
    Ok(format!("sha256:{:x}", hasher.finalize()))
}

/// SHA-256 of arbitrary bytes, formatted like a blob digest.
pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{:x}", hasher.finalize())
}

// ─── Cache contract ──────────────────────────────────────────────────

/// Key-value store for analysis results, safe for concurrent access by
/// key. Artifact entries hold image-config analysis; blob entries hold
/// per-layer (or per-snapshot) analysis.
pub trait BlobCache: Send + Sync {
    fn put_artifact(&self, key: &str, info: &ArtifactInfo) -> Result<()>;
    fn put_blob(&self, key: &str, info: &BlobInfo) -> Result<()>;
    fn get_artifact(&self, key: &str) -> Result<Option<ArtifactInfo>>;
    fn get_blob(&self, key: &str) -> Result<Option<BlobInfo>>;
    /// Returns whether the artifact entry is missing, plus the subset of
    /// `blob_keys` not present in the store, preserving input order.
    fn missing_blobs(&self, artifact_key: &str, blob_keys: &[String])
        -> Result<(bool, Vec<String>)>;
    fn delete_blobs(&self, keys: &[String]) -> Result<()>;
}

// ─── Filesystem cache ────────────────────────────────────────────────

/// On-disk cache: one JSON file per key under `artifact/` and `blob/`.
/// Keys are printable (`sha256:<hex>`), sanitized for the filesystem.
pub struct FsCache {
    root: PathBuf,
}

impl FsCache {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("artifact"))?;
        fs::create_dir_all(root.join("blob"))?;
        Ok(Self { root })
    }

    fn entry_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.root.join(bucket).join(key.replace(':', "_"))
    }

    fn write(&self, bucket: &str, key: &str, data: &[u8]) -> Result<()> {
        let path = self.entry_path(bucket, key);
        fs::write(&path, data).map_err(|e| Error::Cache(format!("write {}: {e}", path.display())))
    }

    fn read(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.entry_path(bucket, key);
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Cache(format!("read {}: {e}", path.display()))),
        }
    }

    /// Remove every cached entry. Used by the CLI `clean` command.
    pub fn clear(&self) -> Result<()> {
        for bucket in ["artifact", "blob"] {
            let dir = self.root.join(bucket);
            if dir.exists() {
                fs::remove_dir_all(&dir)
                    .map_err(|e| Error::Cache(format!("clear {}: {e}", dir.display())))?;
            }
            fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}

impl BlobCache for FsCache {
    fn put_artifact(&self, key: &str, info: &ArtifactInfo) -> Result<()> {
        self.write("artifact", key, &serde_json::to_vec(info)?)
    }

    fn put_blob(&self, key: &str, info: &BlobInfo) -> Result<()> {
        self.write("blob", key, &serde_json::to_vec(info)?)
    }

    fn get_artifact(&self, key: &str) -> Result<Option<ArtifactInfo>> {
        match self.read("artifact", key)? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    fn get_blob(&self, key: &str) -> Result<Option<BlobInfo>> {
        match self.read("blob", key)? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    fn missing_blobs(
        &self,
        artifact_key: &str,
        blob_keys: &[String],
    ) -> Result<(bool, Vec<String>)> {
        let missing_artifact = self.read("artifact", artifact_key)?.is_none();
        let mut missing = Vec::new();
        for key in blob_keys {
            if self.read("blob", key)?.is_none() {
                missing.push(key.clone());
            }
        }
        Ok((missing_artifact, missing))
    }

    fn delete_blobs(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            let path = self.entry_path("blob", key);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::Cache(format!("delete {}: {e}", path.display()))),
            }
        }
        Ok(())
    }
}

// ─── In-memory cache ─────────────────────────────────────────────────

/// Process-local cache, mainly for tests and one-shot scans.
#[derive(Default)]
pub struct MemoryCache {
    artifacts: Mutex<HashMap<String, ArtifactInfo>>,
    blobs: Mutex<HashMap<String, BlobInfo>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobCache for MemoryCache {
    fn put_artifact(&self, key: &str, info: &ArtifactInfo) -> Result<()> {
        self.artifacts
            .lock()
            .unwrap()
            .insert(key.to_string(), info.clone());
        Ok(())
    }

    fn put_blob(&self, key: &str, info: &BlobInfo) -> Result<()> {
        self.blobs
            .lock()
            .unwrap()
            .insert(key.to_string(), info.clone());
        Ok(())
    }

    fn get_artifact(&self, key: &str) -> Result<Option<ArtifactInfo>> {
        Ok(self.artifacts.lock().unwrap().get(key).cloned())
    }

    fn get_blob(&self, key: &str) -> Result<Option<BlobInfo>> {
        Ok(self.blobs.lock().unwrap().get(key).cloned())
    }

    fn missing_blobs(
        &self,
        artifact_key: &str,
        blob_keys: &[String],
    ) -> Result<(bool, Vec<String>)> {
        let blobs = self.blobs.lock().unwrap();
        let missing = blob_keys
            .iter()
            .filter(|k| !blobs.contains_key(k.as_str()))
            .cloned()
            .collect();
        let missing_artifact = !self.artifacts.lock().unwrap().contains_key(artifact_key);
        Ok((missing_artifact, missing))
    }

    fn delete_blobs(&self, keys: &[String]) -> Result<()> {
        let mut blobs = self.blobs.lock().unwrap();
        for key in keys {
            blobs.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::AnalyzerType;

    fn versions(pairs: &[(&str, u32)]) -> BTreeMap<String, u32> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn calc_key_is_deterministic() {
        let av = versions(&[("apk", 1), ("dpkg", 2)]);
        let hv = BTreeMap::new();
        let opts = ArtifactOptions::default();
        let k1 = calc_key("sha256:aaa", &av, &hv, &opts).unwrap();
        let k2 = calc_key("sha256:aaa", &av, &hv, &opts).unwrap();
        assert_eq!(k1, k2);
        assert!(k1.starts_with("sha256:"));
    }

    #[test]
    fn calc_key_insensitive_to_map_insert_order() {
        let a = versions(&[("apk", 1), ("dpkg", 2), ("npm", 3)]);
        let b = versions(&[("npm", 3), ("apk", 1), ("dpkg", 2)]);
        let opts = ArtifactOptions::default();
        let hv = BTreeMap::new();
        assert_eq!(
            calc_key("sha256:aaa", &a, &hv, &opts).unwrap(),
            calc_key("sha256:aaa", &b, &hv, &opts).unwrap()
        );
    }

    #[test]
    fn calc_key_sensitive_to_version_bump() {
        let hv = BTreeMap::new();
        let opts = ArtifactOptions::default();
        let k1 = calc_key("sha256:aaa", &versions(&[("apk", 1)]), &hv, &opts).unwrap();
        let k2 = calc_key("sha256:aaa", &versions(&[("apk", 2)]), &hv, &opts).unwrap();
        assert_ne!(k1, k2);
    }

    #[test]
    fn calc_key_sensitive_to_option_bits() {
        let av = versions(&[("apk", 1)]);
        let hv = BTreeMap::new();
        let base = ArtifactOptions::default();
        let offline = ArtifactOptions {
            offline: true,
            ..Default::default()
        };
        let disabled = ArtifactOptions {
            disabled_analyzers: vec![AnalyzerType::Secret],
            ..Default::default()
        };
        let k = calc_key("sha256:aaa", &av, &hv, &base).unwrap();
        assert_ne!(k, calc_key("sha256:aaa", &av, &hv, &offline).unwrap());
        assert_ne!(k, calc_key("sha256:aaa", &av, &hv, &disabled).unwrap());
    }

    #[test]
    fn calc_key_ignores_parallelism() {
        let av = versions(&[("apk", 1)]);
        let hv = BTreeMap::new();
        let fast = ArtifactOptions {
            parallelism: 32,
            ..Default::default()
        };
        let slow = ArtifactOptions {
            slow: true,
            ..Default::default()
        };
        assert_eq!(
            calc_key("sha256:aaa", &av, &hv, &fast).unwrap(),
            calc_key("sha256:aaa", &av, &hv, &slow).unwrap()
        );
    }

    #[test]
    fn fs_cache_round_trip_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FsCache::new(dir.path()).unwrap();
        let blob = BlobInfo {
            schema_version: crate::types::BLOB_SCHEMA_VERSION,
            diff_id: "sha256:l1".into(),
            ..Default::default()
        };
        cache.put_blob("sha256:key1", &blob).unwrap();
        assert_eq!(cache.get_blob("sha256:key1").unwrap(), Some(blob));
        let (missing_artifact, missing) = cache
            .missing_blobs("sha256:img", &["sha256:key1".into(), "sha256:key2".into()])
            .unwrap();
        assert!(missing_artifact);
        assert_eq!(missing, vec!["sha256:key2".to_string()]);

        cache.delete_blobs(&["sha256:key1".into()]).unwrap();
        assert_eq!(cache.get_blob("sha256:key1").unwrap(), None);
    }
}
