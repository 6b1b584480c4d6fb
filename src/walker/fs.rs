//! Directory-tree walker used by the local artifact inspector.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::walker::{skip_path, FileMeta, FileOpener, Visit};

/// Walks a filesystem root, delivering every regular file to the
/// visitor. Symlinks are followed only when their target stays inside
/// the root.
pub struct FsWalker {
    skip_files: Vec<String>,
    skip_dirs: Vec<String>,
}

struct PathOpener {
    path: PathBuf,
    cache: Option<Arc<Vec<u8>>>,
}

impl FileOpener for PathOpener {
    fn open(&mut self) -> Result<Arc<Vec<u8>>> {
        if let Some(cached) = &self.cache {
            return Ok(Arc::clone(cached));
        }
        let mut buf = Vec::new();
        File::open(&self.path)?.read_to_end(&mut buf)?;
        let content = Arc::new(buf);
        self.cache = Some(Arc::clone(&content));
        Ok(content)
    }
}

impl FsWalker {
    /// Skip lists must already be root-relative; see
    /// [`crate::walker::normalize_skip_paths`].
    pub fn new(skip_files: Vec<String>, skip_dirs: Vec<String>) -> Self {
        Self {
            skip_files,
            skip_dirs,
        }
    }

    pub fn walk(&self, root: &Path, visit: Visit) -> Result<()> {
        let canonical_root = root
            .canonicalize()
            .map_err(|e| Error::Walk(format!("{}: {e}", root.display())))?;

        let mut it = WalkDir::new(root).follow_links(false).into_iter();
        while let Some(entry) = it.next() {
            let entry = entry.map_err(|e| Error::Walk(e.to_string()))?;
            let rel = match entry.path().strip_prefix(root) {
                Ok(r) if r.as_os_str().is_empty() => continue,
                Ok(r) => r.to_string_lossy().replace('\\', "/"),
                Err(_) => continue,
            };

            if entry.file_type().is_dir() {
                if skip_path(&rel, &self.skip_files, &self.skip_dirs) {
                    it.skip_current_dir();
                }
                continue;
            }
            if skip_path(&rel, &self.skip_files, &self.skip_dirs) {
                continue;
            }

            let target = if entry.file_type().is_symlink() {
                // Follow only links that resolve inside the root.
                match entry.path().canonicalize() {
                    Ok(resolved) if resolved.starts_with(&canonical_root) => resolved,
                    Ok(_) | Err(_) => {
                        debug!(path = %rel, "skipping symlink leaving the scan root");
                        continue;
                    }
                }
            } else {
                entry.path().to_path_buf()
            };

            let md = match std::fs::metadata(&target) {
                Ok(md) if md.is_file() => md,
                Ok(_) => continue,
                Err(e) => {
                    debug!(path = %rel, error = %e, "unreadable entry skipped");
                    continue;
                }
            };

            let meta = FileMeta::from_std(&md);
            let mut opener = PathOpener {
                path: target,
                cache: None,
            };
            visit(&rel, &meta, &mut opener)?;
        }
        Ok(())
    }
}
