//! Local filesystem inspector: one directory tree, one blob.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::analyzer::{AnalysisResult, AnalyzerGroup, StagedFileSystems};
use crate::artifact::Artifact;
use crate::cache::{calc_key, digest_bytes, BlobCache};
use crate::error::{Error, Result};
use crate::options::{ArtifactOptions, CancelToken};
use crate::types::{ArtifactKind, ArtifactReference, BlobInfo, BLOB_SCHEMA_VERSION};
use crate::walker::{normalize_skip_paths, FsWalker};

pub struct LocalArtifact {
    root: PathBuf,
    cache: Arc<dyn BlobCache>,
    group: AnalyzerGroup,
    walker: FsWalker,
    options: ArtifactOptions,
}

impl LocalArtifact {
    pub fn new(
        root: impl Into<PathBuf>,
        cache: Arc<dyn BlobCache>,
        options: ArtifactOptions,
    ) -> Result<Self> {
        let root = root.into();
        let walker = FsWalker::new(
            normalize_skip_paths(&root, &options.skip_files),
            normalize_skip_paths(&root, &options.skip_dirs),
        );
        Ok(Self {
            group: AnalyzerGroup::default_group(&options)?,
            root,
            cache,
            walker,
            options,
        })
    }

    /// The blob content is its own identity: hash the JSON encoding and
    /// derive the cache key from that plus tool versions and options.
    fn calc_cache_key(&self, blob: &BlobInfo) -> Result<String> {
        let encoded = serde_json::to_vec(blob)?;
        let no_handlers = std::collections::BTreeMap::new();
        calc_key(
            &digest_bytes(&encoded),
            &self.group.analyzer_versions(),
            &no_handlers,
            &self.options,
        )
    }

    fn host_name(root: &Path) -> String {
        match std::fs::read_to_string(root.join("etc/hostname")) {
            Ok(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => root.to_string_lossy().replace('\\', "/"),
        }
    }
}

impl Artifact for LocalArtifact {
    fn inspect(&self, ctx: &CancelToken) -> Result<ArtifactReference> {
        let result = Mutex::new(AnalysisResult::default());
        // Local files are already on disk; staging just records paths.
        let staged = StagedFileSystems::linked(&self.root);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.effective_parallelism())
            .build()
            .map_err(|e| Error::Analysis(e.to_string()))?;

        pool.install(|| {
            rayon::scope(|s| {
                self.walker.walk(&self.root, &mut |path, meta, opener| {
                    self.group
                        .analyze_file(s, ctx, &result, path, meta, opener, &[])?;
                    self.group.stage_post_files(&staged, path, meta, opener)
                })
            })
        })?;

        ctx.check()?;
        self.group.post_analyze(ctx, &staged, &result)?;

        let mut result = result.into_inner().unwrap();
        result.sort();

        let blob = BlobInfo {
            schema_version: BLOB_SCHEMA_VERSION,
            os: result.os.map(|f| f.os),
            repository: result.repository,
            package_infos: result.package_infos,
            applications: result.applications,
            misconfigurations: result.misconfigurations,
            secrets: result.secrets,
            licenses: result.licenses,
            ..Default::default()
        };

        let cache_key = self.calc_cache_key(&blob)?;
        self.cache.put_blob(&cache_key, &blob)?;

        Ok(ArtifactReference {
            name: Self::host_name(&self.root),
            kind: ArtifactKind::Filesystem,
            id: cache_key.clone(),
            blob_ids: vec![cache_key],
            image_metadata: None,
        })
    }

    fn clean(&self, reference: &ArtifactReference) -> Result<()> {
        self.cache.delete_blobs(&reference.blob_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    fn scan(dir: &Path) -> (ArtifactReference, Arc<MemoryCache>) {
        let cache = Arc::new(MemoryCache::new());
        let artifact =
            LocalArtifact::new(dir, cache.clone(), ArtifactOptions::default()).unwrap();
        let reference = artifact.inspect(&CancelToken::new()).unwrap();
        (reference, cache)
    }

    #[test]
    fn inspects_a_directory_into_one_blob() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("etc")).unwrap();
        std::fs::write(
            dir.path().join("etc/os-release"),
            "ID=alpine\nVERSION_ID=3.17.3\n",
        )
        .unwrap();
        std::fs::create_dir_all(dir.path().join("lib/apk/db")).unwrap();
        std::fs::write(
            dir.path().join("lib/apk/db/installed"),
            "P:musl\nV:1.2.3-r4\nA:x86_64\n",
        )
        .unwrap();

        let (reference, cache) = scan(dir.path());
        assert_eq!(reference.kind, ArtifactKind::Filesystem);
        assert_eq!(reference.blob_ids.len(), 1);

        let blob = cache.get_blob(&reference.id).unwrap().unwrap();
        assert_eq!(blob.os.unwrap().name, "3.17.3");
        assert_eq!(blob.package_infos[0].packages[0].name, "musl");
    }

    #[test]
    fn npm_lockfile_is_post_analyzed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("srv/app")).unwrap();
        std::fs::write(
            dir.path().join("srv/app/package-lock.json"),
            r#"{
  "name": "demo",
  "lockfileVersion": 1,
  "dependencies": {
    "ms": { "version": "2.0.0" },
    "debug": {
      "version": "2.6.9",
      "dependencies": {
        "ms": { "version": "2.1.1" }
      }
    }
  }
}"#,
        )
        .unwrap();

        let (reference, cache) = scan(dir.path());
        let blob = cache.get_blob(&reference.id).unwrap().unwrap();
        let app = &blob.applications[0];
        assert_eq!(app.app_type, "npm");
        assert_eq!(app.file_path, "srv/app/package-lock.json");
        let ms: Vec<_> = app.packages.iter().filter(|p| p.name == "ms").collect();
        assert_eq!(ms.len(), 2);
        assert!(ms.iter().all(|p| !p.locations.is_empty()));
    }

    #[test]
    fn identical_trees_share_a_cache_key_and_clean_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.txt"), "hello").unwrap();

        let (ref1, cache) = scan(dir.path());
        let artifact =
            LocalArtifact::new(dir.path(), cache.clone(), ArtifactOptions::default()).unwrap();
        let ref2 = artifact.inspect(&CancelToken::new()).unwrap();
        assert_eq!(ref1.id, ref2.id);

        artifact.clean(&ref2).unwrap();
        assert!(cache.get_blob(&ref2.id).unwrap().is_none());
    }

    #[test]
    fn canceled_scan_returns_canceled() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.txt"), "hello").unwrap();
        let cache = Arc::new(MemoryCache::new());
        let artifact =
            LocalArtifact::new(dir.path(), cache, ArtifactOptions::default()).unwrap();
        let ctx = CancelToken::new();
        ctx.cancel();
        assert!(matches!(
            artifact.inspect(&ctx),
            Err(crate::error::Error::Canceled)
        ));
    }
}
