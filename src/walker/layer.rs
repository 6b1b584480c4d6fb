//! Layer-tar walker.
//!
//! Decodes one uncompressed layer tar, surfacing union-filesystem
//! markers instead of delivering them: `.wh..wh..opq` entries mark
//! their parent directory opaque, `.wh.<name>` entries mark the sibling
//! `<name>` as whited out. Both lists are returned to the caller so the
//! layer applier can reconstruct the effective filesystem later.

use std::io::Read;
use std::sync::Arc;

use tar::{Archive, EntryType};

use crate::error::{Error, Result};
use crate::walker::{skip_path, FileMeta, FileOpener, Visit};

const OPAQUE_MARKER: &str = ".wh..wh..opq";
const WHITEOUT_PREFIX: &str = ".wh.";

pub struct LayerTarWalker {
    skip_files: Vec<String>,
    skip_dirs: Vec<String>,
}

struct EntryOpener<'e, 'a, R: Read> {
    entry: &'e mut tar::Entry<'a, R>,
    cache: Option<Arc<Vec<u8>>>,
}

impl<R: Read> FileOpener for EntryOpener<'_, '_, R> {
    fn open(&mut self) -> Result<Arc<Vec<u8>>> {
        if let Some(cached) = &self.cache {
            return Ok(Arc::clone(cached));
        }
        let mut buf = Vec::with_capacity(self.entry.size() as usize);
        self.entry.read_to_end(&mut buf)?;
        let content = Arc::new(buf);
        self.cache = Some(Arc::clone(&content));
        Ok(content)
    }
}

impl LayerTarWalker {
    pub fn new(skip_files: Vec<String>, skip_dirs: Vec<String>) -> Self {
        Self {
            skip_files,
            skip_dirs,
        }
    }

    /// Walk a layer tar. Returns `(opaque_dirs, whiteout_files)`.
    pub fn walk<R: Read>(
        &self,
        reader: R,
        visit: Visit,
    ) -> Result<(Vec<String>, Vec<String>)> {
        let mut archive = Archive::new(reader);
        let mut opaque_dirs = Vec::new();
        let mut whiteout_files = Vec::new();

        let entries = archive
            .entries()
            .map_err(|e| Error::Walk(format!("tar entries: {e}")))?;
        for entry in entries {
            let mut entry = entry.map_err(|e| Error::Walk(format!("tar entry: {e}")))?;
            let raw_path = entry
                .path()
                .map_err(|e| Error::Walk(format!("tar path: {e}")))?
                .to_string_lossy()
                .into_owned();
            let path = normalize_entry_path(&raw_path);
            if path.is_empty() {
                continue;
            }

            let (dir, file_name) = split_path(&path);

            if file_name == OPAQUE_MARKER {
                opaque_dirs.push(dir.to_string());
                continue;
            }
            if let Some(hidden) = file_name.strip_prefix(WHITEOUT_PREFIX) {
                whiteout_files.push(join_path(dir, hidden));
                continue;
            }

            if entry.header().entry_type() != EntryType::Regular {
                continue;
            }
            if skip_path(&path, &self.skip_files, &self.skip_dirs) {
                continue;
            }

            let meta = FileMeta {
                size: entry.size(),
                mode: entry.header().mode().unwrap_or(0),
                is_dir: false,
                is_symlink: false,
            };
            let mut opener = EntryOpener {
                entry: &mut entry,
                cache: None,
            };
            visit(&path, &meta, &mut opener)?;
        }

        Ok((opaque_dirs, whiteout_files))
    }
}

/// Strip leading `./` and `/`, trailing `/`.
fn normalize_entry_path(raw: &str) -> String {
    let mut p = raw;
    while let Some(rest) = p.strip_prefix("./") {
        p = rest;
    }
    let p = p.trim_start_matches('/').trim_end_matches('/');
    p.to_string()
}

fn split_path(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some((dir, name)) => (dir, name),
        None => ("", path),
    }
}

fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn tar_with(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, *content).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn surfaces_whiteouts_and_opaque_dirs() {
        let data = tar_with(&[
            ("etc/os-release", b"ID=alpine\n"),
            ("var/lib/.wh.removed.txt", b""),
            ("opt/app/.wh..wh..opq", b""),
            ("./usr/bin/tool", b"\x7fELF"),
        ]);

        let walker = LayerTarWalker::new(Vec::new(), Vec::new());
        let mut seen = BTreeMap::new();
        let (opq, wh) = walker
            .walk(data.as_slice(), &mut |path, meta, opener| {
                seen.insert(path.to_string(), (meta.size, opener.open()?.to_vec()));
                Ok(())
            })
            .unwrap();

        assert_eq!(opq, vec!["opt/app".to_string()]);
        assert_eq!(wh, vec!["var/lib/removed.txt".to_string()]);
        assert_eq!(seen.len(), 2);
        assert_eq!(seen["etc/os-release"].1, b"ID=alpine\n".to_vec());
        assert_eq!(seen["usr/bin/tool"].0, 4);
    }

    #[test]
    fn skip_lists_apply_to_tar_entries() {
        let data = tar_with(&[("proc/kcore", b"x"), ("etc/hosts", b"h")]);
        let walker = LayerTarWalker::new(Vec::new(), vec!["proc".to_string()]);
        let mut seen = Vec::new();
        walker
            .walk(data.as_slice(), &mut |path, _, _| {
                seen.push(path.to_string());
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec!["etc/hosts".to_string()]);
    }

    #[test]
    fn opener_caches_content_across_opens() {
        let data = tar_with(&[("a.txt", b"hello")]);
        let walker = LayerTarWalker::new(Vec::new(), Vec::new());
        walker
            .walk(data.as_slice(), &mut |_, _, opener| {
                let first = opener.open()?;
                let second = opener.open()?;
                assert!(Arc::ptr_eq(&first, &second));
                Ok(())
            })
            .unwrap();
    }
}
