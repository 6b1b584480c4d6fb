//! Filesystem and layer-tar walkers.
//!
//! Both variants share the same visitor contract: the walker calls
//! `visit(path, meta, opener)` for every regular file it encounters,
//! where `path` is root-relative and slash-delimited and `opener`
//! lazily yields the file content (reading it at most once).

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;

pub mod fs;
pub mod layer;

pub use fs::FsWalker;
pub use layer::LayerTarWalker;

/// Minimal file metadata delivered with every visit.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileMeta {
    pub size: u64,
    pub mode: u32,
    pub is_dir: bool,
    pub is_symlink: bool,
}

impl FileMeta {
    pub fn from_std(md: &std::fs::Metadata) -> Self {
        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            md.permissions().mode()
        };
        #[cfg(not(unix))]
        let mode = 0;
        Self {
            size: md.len(),
            mode,
            is_dir: md.is_dir(),
            is_symlink: md.file_type().is_symlink(),
        }
    }
}

/// Lazy file content. The first `open` reads the underlying source;
/// later calls return the cached bytes, so several analyzers can share
/// one read of the same tar entry.
pub trait FileOpener {
    fn open(&mut self) -> Result<Arc<Vec<u8>>>;
}

/// Opener over bytes already in memory.
pub struct BytesOpener(Arc<Vec<u8>>);

impl BytesOpener {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Arc::new(bytes.into()))
    }
}

impl FileOpener for BytesOpener {
    fn open(&mut self) -> Result<Arc<Vec<u8>>> {
        Ok(Arc::clone(&self.0))
    }
}

/// The visitor invoked per file. Never called reentrantly for the same
/// path.
pub type Visit<'a> = &'a mut dyn FnMut(&str, &FileMeta, &mut dyn FileOpener) -> Result<()>;

// ─── Skip lists ──────────────────────────────────────────────────────

/// Resolve skip entries to root-relative, slash-delimited paths.
///
/// Accepts three spellings and normalizes them all:
/// 1. relative to the scan root (used as-is),
/// 2. relative to the working directory,
/// 3. absolute.
pub fn normalize_skip_paths(base: &Path, paths: &[String]) -> Vec<String> {
    let abs_base = match absolutize(base) {
        Some(p) => p,
        None => return Vec::new(),
    };
    let mut out = Vec::new();
    for path in paths {
        let p = Path::new(path);
        let abs = match absolutize(p) {
            Some(a) => a,
            None => continue,
        };
        let rel = relative_to(&abs, &abs_base);
        let chosen = if !p.is_absolute() && rel.starts_with("..") {
            // Already relative to the root.
            path.clone()
        } else {
            rel
        };
        out.push(to_slash(Path::new(&chosen)));
    }
    out
}

/// True when `rel_path` is covered by a skip-file (exact) or skip-dir
/// (prefix) entry.
pub fn skip_path(rel_path: &str, skip_files: &[String], skip_dirs: &[String]) -> bool {
    if skip_files.iter().any(|f| f == rel_path) {
        return true;
    }
    skip_dirs
        .iter()
        .any(|d| rel_path == d || rel_path.starts_with(&format!("{d}/")))
}

fn absolutize(p: &Path) -> Option<PathBuf> {
    if p.is_absolute() {
        return Some(clean_path(p));
    }
    let cwd = std::env::current_dir().ok()?;
    Some(clean_path(&cwd.join(p)))
}

/// Lexically remove `.` and resolve `..` components.
fn clean_path(p: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for c in p.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Lexical relative path from `base` to `target` (both absolute).
fn relative_to(target: &Path, base: &Path) -> String {
    let t: Vec<_> = target.components().collect();
    let b: Vec<_> = base.components().collect();
    let common = t.iter().zip(b.iter()).take_while(|(a, b)| a == b).count();
    let mut parts: Vec<String> = std::iter::repeat("..".to_string())
        .take(b.len() - common)
        .collect();
    parts.extend(
        t[common..]
            .iter()
            .map(|c| c.as_os_str().to_string_lossy().into_owned()),
    );
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

fn to_slash(p: &Path) -> String {
    p.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_path_matches_files_and_dir_prefixes() {
        let files = vec!["etc/hostname".to_string()];
        let dirs = vec!["proc".to_string()];
        assert!(skip_path("etc/hostname", &files, &dirs));
        assert!(skip_path("proc", &files, &dirs));
        assert!(skip_path("proc/1/cmdline", &files, &dirs));
        assert!(!skip_path("procfs/x", &files, &dirs));
        assert!(!skip_path("etc/hosts", &files, &dirs));
    }

    #[test]
    fn normalize_resolves_absolute_and_root_relative() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("root");
        std::fs::create_dir_all(base.join("sub")).unwrap();

        let abs = base.join("sub").to_string_lossy().into_owned();
        let got = normalize_skip_paths(&base, &[abs, "plain/dir".to_string()]);
        assert_eq!(got, vec!["sub".to_string(), "plain/dir".to_string()]);
    }

    #[test]
    fn relative_to_walks_up() {
        assert_eq!(
            relative_to(Path::new("/a/b/c"), Path::new("/a/x")),
            "../b/c"
        );
        assert_eq!(relative_to(Path::new("/a/b"), Path::new("/a/b")), ".");
    }
}
