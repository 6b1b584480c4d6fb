//! Image artifact inspector.
//!
//! Walks an image layer by layer: cached layers are skipped via their
//! blob keys, missing layers run through the analyzer dispatcher on a
//! fixed-width pipeline, and the image config gets its own analyzer
//! group under a key that file-analyzer changes cannot invalidate.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use rayon::prelude::*;
use tracing::debug;

use crate::analyzer::imgconf::ConfigAnalyzerGroup;
use crate::analyzer::{AnalysisResult, AnalyzerGroup, AnalyzerType, StagedFileSystems};
use crate::artifact::{Artifact, NoRemoteSbom, RemoteSbomResult, SbomSource};
use crate::cache::{calc_key, BlobCache};
use crate::error::{Error, Result};
use crate::image::{base_diff_ids, normalize_created_by, ConfigFile, ImageSource, LayerReader};
use crate::options::{ArtifactOptions, CancelToken};
use crate::types::{
    ArtifactInfo, ArtifactKind, ArtifactReference, BlobInfo, ImageMetadata, Os,
    ARTIFACT_SCHEMA_VERSION, BLOB_SCHEMA_VERSION,
};
use crate::walker::LayerTarWalker;

struct LayerInfo {
    diff_id: String,
    created_by: String,
}

pub struct ImageArtifact {
    image: Box<dyn ImageSource>,
    cache: Arc<dyn BlobCache>,
    group: AnalyzerGroup,
    config_group: ConfigAnalyzerGroup,
    sbom: Box<dyn SbomSource>,
    options: ArtifactOptions,
}

impl ImageArtifact {
    pub fn new(
        image: Box<dyn ImageSource>,
        cache: Arc<dyn BlobCache>,
        options: ArtifactOptions,
    ) -> Result<Self> {
        Ok(Self {
            image,
            cache,
            group: AnalyzerGroup::default_group(&options)?,
            config_group: ConfigAnalyzerGroup::default_group(&options),
            sbom: Box::new(NoRemoteSbom),
            options,
        })
    }

    pub fn with_sbom_source(mut self, sbom: Box<dyn SbomSource>) -> Self {
        self.sbom = sbom;
        self
    }

    fn calc_cache_keys(&self, image_id: &str, diff_ids: &[String]) -> Result<(String, Vec<String>)> {
        let no_handlers = BTreeMap::new();
        // A zero options struct keeps the image key stable across
        // file-analyzer option changes.
        let image_key = calc_key(
            image_id,
            &self.config_group.analyzer_versions(),
            &no_handlers,
            &ArtifactOptions::default(),
        )?;
        let analyzer_versions = self.group.analyzer_versions();
        let mut layer_keys = Vec::with_capacity(diff_ids.len());
        for diff_id in diff_ids {
            layer_keys.push(calc_key(
                diff_id,
                &analyzer_versions,
                &no_handlers,
                &self.options,
            )?);
        }
        Ok((image_key, layer_keys))
    }

    /// Pair each layer key with its diffID and `created_by` line.
    /// When history and diffID counts disagree the `created_by` fields
    /// are dropped wholesale; empty-layer detection is known to be
    /// imprecise in rare cases and a wrong attribution is worse than
    /// none.
    fn consolidate_created_by(
        diff_ids: &[String],
        layer_keys: &[String],
        config: &ConfigFile,
    ) -> HashMap<String, LayerInfo> {
        let created_by: Vec<String> = config
            .history
            .iter()
            .filter(|h| !h.empty_layer)
            .map(|h| normalize_created_by(&h.created_by).to_string())
            .collect();
        let valid = created_by.len() == diff_ids.len();

        let mut map = HashMap::new();
        for (i, diff_id) in diff_ids.iter().enumerate() {
            map.insert(
                layer_keys[i].clone(),
                LayerInfo {
                    diff_id: diff_id.clone(),
                    created_by: if valid {
                        created_by[i].clone()
                    } else {
                        String::new()
                    },
                },
            );
        }
        map
    }

    fn inspect_layer(
        &self,
        ctx: &CancelToken,
        layer: &LayerInfo,
        disabled: &[AnalyzerType],
    ) -> Result<BlobInfo> {
        debug!(diff_id = %layer.diff_id, "analyzing missing layer");
        let LayerReader { digest, reader } = self.image.layer_by_diff_id(&layer.diff_id)?;

        // Post-analysis staging; the directory is removed on drop along
        // every exit path.
        let scratch = tempfile::tempdir()?;
        let staged = StagedFileSystems::materialized(scratch.path());
        let result = Mutex::new(AnalysisResult::default());
        let walker = LayerTarWalker::new(
            self.options.skip_files.clone(),
            self.options.skip_dirs.clone(),
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.effective_parallelism())
            .build()
            .map_err(|e| Error::Analysis(e.to_string()))?;

        let (opaque_dirs, whiteout_files) = pool.install(|| {
            rayon::scope(|s| {
                walker.walk(reader, &mut |path, meta, opener| {
                    self.group
                        .analyze_file(s, ctx, &result, path, meta, opener, disabled)?;
                    self.group.stage_post_files(&staged, path, meta, opener)
                })
            })
        })?;

        ctx.check()?;
        self.group.post_analyze(ctx, &staged, &result)?;

        let mut result = result.into_inner().unwrap();
        result.sort();

        Ok(BlobInfo {
            schema_version: BLOB_SCHEMA_VERSION,
            digest,
            diff_id: layer.diff_id.clone(),
            created_by: layer.created_by.clone(),
            os: result.os.map(|f| f.os),
            repository: result.repository,
            package_infos: result.package_infos,
            applications: result.applications,
            misconfigurations: result.misconfigurations,
            secrets: result.secrets,
            licenses: result.licenses,
            opaque_dirs,
            whiteout_files,
        })
    }

    fn inspect_config(
        &self,
        ctx: &CancelToken,
        image_key: &str,
        os: Option<&Os>,
        config: &ConfigFile,
    ) -> Result<()> {
        let result = self.config_group.analyze(ctx, os, config)?;
        let info = ArtifactInfo {
            schema_version: ARTIFACT_SCHEMA_VERSION,
            architecture: config.architecture.clone(),
            created: config.created,
            docker_version: config.docker_version.clone(),
            os: config.os.clone(),
            misconfigurations: result.misconfigurations,
            secrets: result.secrets,
        };
        self.cache.put_artifact(image_key, &info)
    }
}

impl Artifact for ImageArtifact {
    fn inspect(&self, ctx: &CancelToken) -> Result<ArtifactReference> {
        let image_id = self.image.id();
        let config = self.image.config_file().clone();
        let diff_ids = config.rootfs.diff_ids.clone();
        debug!(image_id = %image_id, layers = diff_ids.len(), "inspecting image");

        match self.sbom.retrieve(&self.image.name()) {
            RemoteSbomResult::Found(reference) => return Ok(reference),
            RemoteSbomResult::Error(e) => return Err(Error::RemoteSbom(e.to_string())),
            RemoteSbomResult::NotFound => {}
        }

        let base = base_diff_ids(&config.history, &diff_ids);
        debug!(base_layers = base.len(), "guessed base image boundary");

        let (image_key, layer_keys) = self.calc_cache_keys(&image_id, &diff_ids)?;
        let layer_info = Self::consolidate_created_by(&diff_ids, &layer_keys, &config);

        let (missing_image, missing_layers) = self.cache.missing_blobs(&image_key, &layer_keys)?;

        // Layer pipeline: each missing layer produces an independent
        // blob, so a fixed worker pool is safe.
        let workers = if self.options.slow { 1 } else { 5 };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| Error::Analysis(e.to_string()))?;

        let os_found: Mutex<Option<Os>> = Mutex::new(None);
        pool.install(|| {
            missing_layers.par_iter().try_for_each(|layer_key| {
                ctx.check()?;
                let layer = &layer_info[layer_key];

                // Secrets in a shared base layer were not introduced by
                // this image; scanning them only produces noise.
                let mut disabled = Vec::new();
                if base.contains(&layer.diff_id) {
                    disabled.push(AnalyzerType::Secret);
                }

                let blob = self.inspect_layer(ctx, layer, &disabled).map_err(|e| match e {
                    // Cancellation travels back verbatim.
                    Error::Canceled => Error::Canceled,
                    e => Error::Analysis(format!("layer {}: {e}", layer.diff_id)),
                })?;
                if let Some(os) = &blob.os {
                    *os_found.lock().unwrap() = Some(os.clone());
                }
                self.cache.put_blob(layer_key, &blob)
            })
        })?;

        if missing_image {
            debug!(image_id = %image_id, "image config missing in cache");
            let os = os_found.lock().unwrap().clone();
            self.inspect_config(ctx, &image_key, os.as_ref(), &config)?;
        }

        Ok(ArtifactReference {
            name: self.image.name(),
            kind: ArtifactKind::Image,
            id: image_key,
            blob_ids: layer_keys,
            image_metadata: Some(ImageMetadata {
                image_id,
                diff_ids,
                repo_tags: self.image.repo_tags(),
            }),
        })
    }

    fn clean(&self, _reference: &ArtifactReference) -> Result<()> {
        Ok(())
    }
}
