//! Container image access.
//!
//! [`ImageSource`] is the capability surface the image inspector needs:
//! identity, config and layer readers by diffID. The shipped
//! implementation reads `docker save` tarballs (manifest.json + config
//! JSON + layer tars), resolving layers without unpacking the archive
//! to disk.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bzip2::read::BzDecoder;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use tar::Archive;

use crate::cache::digest_bytes;
use crate::error::{Error, Result};

// ─── Image config model ──────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Healthcheck {
    #[serde(default, rename = "Test")]
    pub test: Vec<String>,
    /// Nanoseconds, as the builder records them.
    #[serde(default, rename = "Interval")]
    pub interval: u64,
    #[serde(default, rename = "Timeout")]
    pub timeout: u64,
    #[serde(default, rename = "StartPeriod")]
    pub start_period: u64,
    #[serde(default, rename = "Retries")]
    pub retries: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default, rename = "User")]
    pub user: String,
    #[serde(default, rename = "Env")]
    pub env: Vec<String>,
    #[serde(default, rename = "Cmd")]
    pub cmd: Vec<String>,
    #[serde(default, rename = "Healthcheck")]
    pub healthcheck: Option<Healthcheck>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub empty_layer: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RootFs {
    #[serde(default)]
    pub diff_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub docker_version: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub config: RuntimeConfig,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub rootfs: RootFs,
}

/// Strip the shell wrapper the classic builder records.
pub fn normalize_created_by(created_by: &str) -> &str {
    let c = created_by.trim();
    let c = c.strip_prefix("/bin/sh -c ").unwrap_or(c);
    let c = c.strip_prefix("#(nop) ").unwrap_or(c);
    c.trim()
}

/// Map a history `created_by` back to the Dockerfile instruction that
/// produced it: `/bin/sh -c #(nop) X` was `X`, a bare `/bin/sh -c X`
/// was `RUN X`, and BuildKit records instructions verbatim.
pub fn history_instruction(created_by: &str) -> String {
    let c = created_by.trim();
    if let Some(rest) = c.strip_prefix("/bin/sh -c #(nop)") {
        return rest.trim().to_string();
    }
    if let Some(rest) = c.strip_prefix("/bin/sh -c") {
        return format!("RUN {}", rest.trim());
    }
    c.to_string()
}

/// Guess the index of the topmost base-image history entry.
///
/// Scans forward for the first entry whose (normalized) instruction is
/// one a user build would add: `COPY`, `RUN`, or an `ADD` that is not a
/// builder rootfs import (`ADD file:` / `ADD multi:`). Everything
/// before it is the base image. Returns `None` when no such entry
/// exists, i.e. no base/user boundary can be told apart.
pub fn guess_base_image_index(history: &[HistoryEntry]) -> Option<usize> {
    for (i, entry) in history.iter().enumerate() {
        let cmd = history_instruction(&entry.created_by);
        let is_user_instruction = cmd.starts_with("COPY")
            || cmd.starts_with("RUN")
            || (cmd.starts_with("ADD")
                && !cmd.starts_with("ADD file:")
                && !cmd.starts_with("ADD multi:"));
        if is_user_instruction {
            return i.checked_sub(1);
        }
    }
    None
}

/// Diff IDs of the layers that belong to the guessed base image.
/// History indexes and diffID indexes differ because empty layers have
/// history entries but no diffID.
pub fn base_diff_ids(history: &[HistoryEntry], diff_ids: &[String]) -> Vec<String> {
    let Some(base_index) = guess_base_image_index(history) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    let mut diff_idx = 0;
    for (i, entry) in history.iter().enumerate() {
        if i > base_index {
            break;
        }
        if entry.empty_layer {
            continue;
        }
        if diff_idx >= diff_ids.len() {
            // History and diffIDs disagree; bail out like an unknown base.
            return Vec::new();
        }
        out.push(diff_ids[diff_idx].clone());
        diff_idx += 1;
    }
    out
}

/// Format builder nanosecond durations the way Dockerfiles spell them.
pub fn format_duration(ns: u64) -> String {
    const SECOND: u64 = 1_000_000_000;
    if ns == 0 {
        return "0s".to_string();
    }
    if ns < SECOND {
        return format!("{}ms", ns / 1_000_000);
    }
    let total_secs = ns / SECOND;
    let (hours, rem) = (total_secs / 3600, total_secs % 3600);
    let (mins, secs) = (rem / 60, rem % 60);
    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if mins > 0 {
        out.push_str(&format!("{mins}m"));
    }
    if secs > 0 || out.is_empty() {
        out.push_str(&format!("{secs}s"));
    }
    out
}

// ─── Image source ────────────────────────────────────────────────────

/// An uncompressed-layer reader plus the compressed digest when the
/// stored layer was compressed.
pub struct LayerReader {
    pub digest: String,
    pub reader: Box<dyn Read + Send>,
}

pub trait ImageSource: Send + Sync {
    fn name(&self) -> String;
    /// Content-addressed image ID (`sha256:<hex>` of the config).
    fn id(&self) -> String;
    fn config_file(&self) -> &ConfigFile;
    fn repo_tags(&self) -> Vec<String>;
    fn layer_by_diff_id(&self, diff_id: &str) -> Result<LayerReader>;
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    #[serde(rename = "Config")]
    config: String,
    #[serde(default, rename = "RepoTags")]
    repo_tags: Option<Vec<String>>,
    #[serde(rename = "Layers")]
    layers: Vec<String>,
}

/// A `docker save` tarball.
pub struct ArchiveImage {
    path: PathBuf,
    name: String,
    id: String,
    config: ConfigFile,
    repo_tags: Vec<String>,
    /// diffID -> layer entry path inside the archive.
    layer_paths: Vec<(String, String)>,
}

impl ArchiveImage {
    pub fn open(path: &Path) -> Result<Self> {
        let manifest_raw = read_archive_entry(path, "manifest.json")?
            .ok_or_else(|| Error::Image(format!("{}: no manifest.json", path.display())))?;
        let manifest: Vec<ManifestEntry> = serde_json::from_slice(&manifest_raw)
            .map_err(|e| Error::Image(format!("manifest.json: {e}")))?;
        let entry = manifest
            .into_iter()
            .next()
            .ok_or_else(|| Error::Image("empty manifest".into()))?;

        let config_raw = read_archive_entry(path, &entry.config)?
            .ok_or_else(|| Error::Image(format!("missing config {}", entry.config)))?;
        let config: ConfigFile = serde_json::from_slice(&config_raw)
            .map_err(|e| Error::Image(format!("config json: {e}")))?;

        let diff_ids = &config.rootfs.diff_ids;
        if diff_ids.len() != entry.layers.len() {
            return Err(Error::Image(format!(
                "layer count mismatch: {} diff IDs, {} archive layers",
                diff_ids.len(),
                entry.layers.len()
            )));
        }
        let layer_paths = diff_ids
            .iter()
            .cloned()
            .zip(entry.layers.iter().cloned())
            .collect();

        let repo_tags = entry.repo_tags.unwrap_or_default();
        let name = repo_tags
            .first()
            .cloned()
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self {
            path: path.to_path_buf(),
            name,
            id: digest_bytes(&config_raw),
            config,
            repo_tags,
            layer_paths,
        })
    }
}

impl ImageSource for ArchiveImage {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn id(&self) -> String {
        self.id.clone()
    }

    fn config_file(&self) -> &ConfigFile {
        &self.config
    }

    fn repo_tags(&self) -> Vec<String> {
        self.repo_tags.clone()
    }

    fn layer_by_diff_id(&self, diff_id: &str) -> Result<LayerReader> {
        let entry_path = self
            .layer_paths
            .iter()
            .find(|(id, _)| id == diff_id)
            .map(|(_, p)| p.clone())
            .ok_or_else(|| Error::Image(format!("unknown layer: {diff_id}")))?;

        let (offset, size) = locate_archive_entry(&self.path, &entry_path)?
            .ok_or_else(|| Error::Image(format!("missing layer entry {entry_path}")))?;

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let raw = file.take(size);

        let compressed = entry_path.ends_with(".gz")
            || entry_path.ends_with(".tgz")
            || entry_path.ends_with(".bz2");
        let reader: Box<dyn Read + Send> = if entry_path.ends_with(".bz2") {
            Box::new(BzDecoder::new(raw))
        } else if entry_path.ends_with(".gz") || entry_path.ends_with(".tgz") {
            Box::new(GzDecoder::new(raw))
        } else {
            Box::new(raw)
        };

        // The compressed digest identifies the stored blob; for
        // uncompressed layers the diffID already does.
        let digest = if compressed {
            digest_archive_entry(&self.path, offset, size)?
        } else {
            String::new()
        };

        Ok(LayerReader { digest, reader })
    }
}

fn normalize_archive_path(p: &str) -> &str {
    p.strip_prefix("./").unwrap_or(p)
}

/// Read one entry of an uncompressed tar archive into memory.
fn read_archive_entry(path: &Path, wanted: &str) -> Result<Option<Vec<u8>>> {
    let mut archive = Archive::new(File::open(path)?);
    for entry in archive
        .entries()
        .map_err(|e| Error::Image(format!("{}: {e}", path.display())))?
    {
        let mut entry = entry.map_err(|e| Error::Image(e.to_string()))?;
        let entry_path = entry
            .path()
            .map_err(|e| Error::Image(e.to_string()))?
            .to_string_lossy()
            .into_owned();
        if normalize_archive_path(&entry_path) == wanted {
            let mut buf = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut buf)?;
            return Ok(Some(buf));
        }
    }
    Ok(None)
}

/// Find the byte offset and size of one entry's data.
fn locate_archive_entry(path: &Path, wanted: &str) -> Result<Option<(u64, u64)>> {
    let mut archive = Archive::new(File::open(path)?);
    for entry in archive
        .entries()
        .map_err(|e| Error::Image(format!("{}: {e}", path.display())))?
    {
        let entry = entry.map_err(|e| Error::Image(e.to_string()))?;
        let entry_path = entry
            .path()
            .map_err(|e| Error::Image(e.to_string()))?
            .to_string_lossy()
            .into_owned();
        if normalize_archive_path(&entry_path) == wanted {
            return Ok(Some((entry.raw_file_position(), entry.size())));
        }
    }
    Ok(None)
}

fn digest_archive_entry(path: &Path, offset: u64, size: u64) -> Result<String> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::with_capacity(size as usize);
    file.take(size).read_to_end(&mut buf)?;
    Ok(digest_bytes(&buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(created_by: &[(&str, bool)]) -> Vec<HistoryEntry> {
        created_by
            .iter()
            .map(|(c, empty)| HistoryEntry {
                created_by: c.to_string(),
                empty_layer: *empty,
            })
            .collect()
    }

    #[test]
    fn base_boundary_before_first_user_instruction() {
        let h = history(&[
            ("/bin/sh -c #(nop) ADD file:abc in / ", false),
            ("/bin/sh -c #(nop)  CMD [\"/bin/sh\"]", true),
            ("/bin/sh -c apk add curl", false),
            ("/bin/sh -c #(nop) COPY file:def in /app ", false),
        ]);
        assert_eq!(guess_base_image_index(&h), Some(1));

        let diff_ids = vec!["sha256:l1".to_string(), "sha256:l2".to_string(), "sha256:l3".to_string()];
        assert_eq!(base_diff_ids(&h, &diff_ids), vec!["sha256:l1".to_string()]);
    }

    #[test]
    fn no_user_instruction_means_no_base() {
        let h = history(&[
            ("/bin/sh -c #(nop) ADD file:abc in / ", false),
            ("/bin/sh -c #(nop)  CMD [\"/bin/sh\"]", true),
        ]);
        assert_eq!(guess_base_image_index(&h), None);
        assert!(base_diff_ids(&h, &["sha256:l1".to_string()]).is_empty());
    }

    #[test]
    fn user_instruction_first_means_empty_base() {
        let h = history(&[("RUN make install", false)]);
        assert_eq!(guess_base_image_index(&h), None);
    }

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(30_000_000_000), "30s");
        assert_eq!(format_duration(90_000_000_000), "1m30s");
        assert_eq!(format_duration(3_600_000_000_000), "1h");
        assert_eq!(format_duration(500_000_000), "500ms");
        assert_eq!(format_duration(0), "0s");
    }

    #[test]
    fn config_file_deserializes_docker_layout() {
        let raw = r#"{
          "architecture": "amd64",
          "config": {
            "User": "app",
            "Healthcheck": {"Test": ["CMD-SHELL", "curl -f localhost"], "Interval": 30000000000, "Retries": 3}
          },
          "created": "2023-04-01T12:00:00Z",
          "docker_version": "20.10.23",
          "history": [
            {"created_by": "/bin/sh -c #(nop) ADD file:a in /", "empty_layer": false}
          ],
          "os": "linux",
          "rootfs": {"type": "layers", "diff_ids": ["sha256:aaa"]}
        }"#;
        let config: ConfigFile = serde_json::from_str(raw).unwrap();
        assert_eq!(config.config.user, "app");
        assert_eq!(config.rootfs.diff_ids, vec!["sha256:aaa".to_string()]);
        let hc = config.config.healthcheck.unwrap();
        assert_eq!(hc.interval, 30_000_000_000);
        assert_eq!(hc.test[0], "CMD-SHELL");
    }
}
