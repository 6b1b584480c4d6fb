//! End-to-end scan: inspect an artifact, squash its cached blobs,
//! run the detectors and assemble the report.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use crate::applier::{apply_layers, ArtifactDetail};
use crate::artifact::Artifact;
use crate::cache::BlobCache;
use crate::detector::{version::compare_semver, DriverRegistry};
use crate::error::{Error, Result};
use crate::options::CancelToken;
use crate::types::{
    Application, ArtifactReference, DetectedVulnerability, Report, ReportMetadata, ResultClass,
    ScanResult,
};
use crate::vulnsrc::VulnSource;

pub struct Scanner {
    cache: Arc<dyn BlobCache>,
    registry: DriverRegistry,
    source: Arc<dyn VulnSource>,
}

impl Scanner {
    pub fn new(cache: Arc<dyn BlobCache>, source: Arc<dyn VulnSource>) -> Self {
        Self {
            registry: DriverRegistry::default_registry(source.clone()),
            cache,
            source,
        }
    }

    /// Swap in a custom driver registry.
    pub fn with_registry(mut self, registry: DriverRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn scan(&self, ctx: &CancelToken, artifact: &dyn Artifact) -> Result<Report> {
        let reference = artifact.inspect(ctx)?;
        self.scan_reference(ctx, &reference)
    }

    /// Produce a report for an already-inspected artifact.
    pub fn scan_reference(&self, ctx: &CancelToken, reference: &ArtifactReference) -> Result<Report> {
        ctx.check()?;
        let mut blobs = Vec::with_capacity(reference.blob_ids.len());
        for key in &reference.blob_ids {
            let blob = self
                .cache
                .get_blob(key)?
                .ok_or_else(|| Error::Cache(format!("missing blob {key}")))?;
            blobs.push(blob);
        }

        let mut detail = apply_layers(&blobs);
        detail.image_config = self.cache.get_artifact(&reference.id)?;

        let mut results = Vec::new();
        self.os_result(ctx, reference, &mut detail, &mut results)?;
        self.language_results(ctx, &detail, &mut results)?;
        Self::config_results(&detail, &mut results);
        Self::secret_results(&detail, &mut results);
        Self::license_results(&detail, &mut results);

        let mut metadata = ReportMetadata {
            os: detail.os.clone(),
            ..Default::default()
        };
        if let Some(image) = &reference.image_metadata {
            metadata.image_id = image.image_id.clone();
            metadata.diff_ids = image.diff_ids.clone();
            metadata.repo_tags = image.repo_tags.clone();
        }

        Ok(Report {
            artifact_name: reference.name.clone(),
            artifact_kind: reference.kind,
            metadata,
            results,
        })
    }

    fn os_result(
        &self,
        ctx: &CancelToken,
        reference: &ArtifactReference,
        detail: &mut ArtifactDetail,
        results: &mut Vec<ScanResult>,
    ) -> Result<()> {
        let Some(os) = detail.os.clone() else {
            return Ok(());
        };
        ctx.check()?;

        let packages: Vec<_> = detail
            .packages
            .iter()
            .flat_map(|info| info.packages.iter().cloned())
            .collect();

        match self.registry.detect(&os, detail.repository.as_ref(), &packages) {
            Ok((vulns, eosl)) => {
                if let Some(os) = &mut detail.os {
                    os.eosl = eosl;
                }
                let mut result = ScanResult::new(
                    format!("{} ({} {})", reference.name, os.family, os.name),
                    ResultClass::OsPackages,
                );
                result.vulnerabilities = vulns;
                results.push(result);
            }
            // Per policy: an unsupported OS downgrades to a warning and
            // the scan carries on with everything else.
            Err(Error::UnsupportedOs(family)) => {
                warn!(family = %family, "no OS package driver, skipping OS detection");
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    fn language_results(
        &self,
        ctx: &CancelToken,
        detail: &ArtifactDetail,
        results: &mut Vec<ScanResult>,
    ) -> Result<()> {
        for app in &detail.applications {
            ctx.check()?;
            let vulns = self.detect_language(app)?;
            let mut result = ScanResult::new(app.file_path.clone(), ResultClass::LangPkgs);
            result.vulnerabilities = vulns;
            results.push(result);
        }
        Ok(())
    }

    /// Language advisories live under the ecosystem name with an empty
    /// release; applicability is decided by the fixed-version compare.
    fn detect_language(&self, app: &Application) -> Result<Vec<DetectedVulnerability>> {
        let mut vulns = Vec::new();
        for pkg in &app.packages {
            let advisories = self.source.advisories(&app.app_type, "", &pkg.name)?;
            for advisory in advisories {
                let mut vuln = DetectedVulnerability {
                    vulnerability_id: advisory.vulnerability_id,
                    pkg_name: pkg.name.clone(),
                    pkg_path: app.file_path.clone(),
                    installed_version: pkg.version.clone(),
                    severity: advisory.severity,
                    layer: pkg.layer.clone(),
                    data_source: advisory.data_source,
                    ..Default::default()
                };
                if advisory.fixed_version.is_empty() {
                    vulns.push(vuln);
                    continue;
                }
                if compare_semver(&pkg.version, &advisory.fixed_version) == Ordering::Less {
                    vuln.fixed_version = advisory.fixed_version;
                    vulns.push(vuln);
                }
            }
        }
        Ok(vulns)
    }

    fn config_results(detail: &ArtifactDetail, results: &mut Vec<ScanResult>) {
        let mut by_file: BTreeMap<String, Vec<_>> = BTreeMap::new();
        for misconf in &detail.misconfigurations {
            by_file
                .entry(misconf.file_path.clone())
                .or_default()
                .push(misconf.clone());
        }
        if let Some(config) = &detail.image_config {
            for misconf in &config.misconfigurations {
                by_file
                    .entry(misconf.file_path.clone())
                    .or_default()
                    .push(misconf.clone());
            }
        }
        for (target, misconfigurations) in by_file {
            let mut result = ScanResult::new(target, ResultClass::Config);
            result.misconfigurations = misconfigurations;
            results.push(result);
        }
    }

    fn secret_results(detail: &ArtifactDetail, results: &mut Vec<ScanResult>) {
        let mut by_file: BTreeMap<String, Vec<_>> = BTreeMap::new();
        for secret in &detail.secrets {
            by_file
                .entry(secret.file_path.clone())
                .or_default()
                .push(secret.clone());
        }
        if let Some(config) = &detail.image_config {
            for secret in &config.secrets {
                by_file
                    .entry(secret.file_path.clone())
                    .or_default()
                    .push(secret.clone());
            }
        }
        for (target, secrets) in by_file {
            let mut result = ScanResult::new(target, ResultClass::Secret);
            result.secrets = secrets;
            results.push(result);
        }
    }

    fn license_results(detail: &ArtifactDetail, results: &mut Vec<ScanResult>) {
        let mut by_file: BTreeMap<String, Vec<_>> = BTreeMap::new();
        for license in &detail.licenses {
            by_file
                .entry(license.file_path.clone())
                .or_default()
                .push(license.clone());
        }
        for (target, licenses) in by_file {
            let mut result = ScanResult::new(target, ResultClass::License);
            result.licenses = licenses;
            results.push(result);
        }
    }
}
