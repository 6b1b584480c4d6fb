//! Analyzer registry and per-layer dispatch.
//!
//! Two analyzer kinds exist. *File analyzers* look at one file at a
//! time and run concurrently on a bounded pool. *Post analyzers* need a
//! reconstructed view of many files (lockfile trees, config bundles);
//! matching files are staged into a per-analyzer virtual filesystem
//! during the walk and each post analyzer runs exactly once afterwards.
//!
//! Analyzers are registered explicitly; [`AnalyzerGroup::default_group`]
//! is the composition root wiring in every built-in analyzer. Each
//! analyzer declares a version, and bumping a version invalidates every
//! cached blob that depended on it through the cache key.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use regex::Regex;
use tracing::warn;

use crate::error::{Error, Result};
use crate::options::{AnalysisOptions, ArtifactOptions, CancelToken};
use crate::types::{
    Application, DetectedLicense, DetectedMisconfiguration, Os, PackageInfo, Repository,
    SecretFinding,
};
use crate::walker::{FileMeta, FileOpener};

pub mod apk;
pub mod config;
pub mod dpkg;
pub mod imgconf;
pub mod license;
pub mod npm;
pub mod os_release;
pub mod rpm;
pub mod secret;

// ─── Types ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AnalyzerType {
    OsRelease,
    LsbRelease,
    Apk,
    Dpkg,
    Rpm,
    Npm,
    Secret,
    License,
    K8sConfig,
    HistoryDockerfile,
    ImageConfigSecret,
}

impl fmt::Display for AnalyzerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::OsRelease => "os-release",
            Self::LsbRelease => "lsb-release",
            Self::Apk => "apk",
            Self::Dpkg => "dpkg",
            Self::Rpm => "rpm",
            Self::Npm => "npm",
            Self::Secret => "secret",
            Self::License => "license",
            Self::K8sConfig => "k8s-config",
            Self::HistoryDockerfile => "history-dockerfile",
            Self::ImageConfigSecret => "imgconf-secret",
        };
        f.write_str(s)
    }
}

impl FromStr for AnalyzerType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "os-release" => Ok(Self::OsRelease),
            "lsb-release" => Ok(Self::LsbRelease),
            "apk" => Ok(Self::Apk),
            "dpkg" => Ok(Self::Dpkg),
            "rpm" => Ok(Self::Rpm),
            "npm" => Ok(Self::Npm),
            "secret" => Ok(Self::Secret),
            "license" => Ok(Self::License),
            "k8s-config" => Ok(Self::K8sConfig),
            "history-dockerfile" => Ok(Self::HistoryDockerfile),
            "imgconf-secret" => Ok(Self::ImageConfigSecret),
            other => Err(Error::Analysis(format!("unknown analyzer type: {other}"))),
        }
    }
}

/// OS identity with the discovering analyzer's confidence. A full
/// os-release outranks weaker sources like lsb-release when partial
/// results merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsFound {
    pub os: Os,
    pub confidence: u8,
}

pub const CONFIDENCE_HIGH: u8 = 2;
pub const CONFIDENCE_LOW: u8 = 1;

/// Additive partial result returned by one analyzer invocation.
/// Merging is associative and commutative, so the dispatcher is free to
/// run analyzers in any order.
#[derive(Debug, Default)]
pub struct AnalysisResult {
    pub os: Option<OsFound>,
    pub repository: Option<Repository>,
    pub package_infos: Vec<PackageInfo>,
    pub applications: Vec<Application>,
    pub misconfigurations: Vec<DetectedMisconfiguration>,
    pub secrets: Vec<SecretFinding>,
    pub licenses: Vec<DetectedLicense>,
}

impl AnalysisResult {
    pub fn merge(&mut self, other: AnalysisResult) {
        if let Some(incoming) = other.os {
            match &self.os {
                Some(existing) if existing.confidence >= incoming.confidence => {}
                _ => self.os = Some(incoming),
            }
        }
        if self.repository.is_none() {
            self.repository = other.repository;
        }
        self.package_infos.extend(other.package_infos);
        self.applications.extend(other.applications);
        self.misconfigurations.extend(other.misconfigurations);
        self.secrets.extend(other.secrets);
        self.licenses.extend(other.licenses);
    }

    /// Canonical ordering and uniqueness, so identical inputs produce
    /// identical blobs regardless of analyzer interleaving.
    pub fn sort(&mut self) {
        self.package_infos.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        for info in &mut self.package_infos {
            info.packages
                .sort_by(|a, b| (&a.name, &a.version, &a.arch).cmp(&(&b.name, &b.version, &b.arch)));
            info.packages
                .dedup_by(|a, b| a.name == b.name && a.version == b.version && a.arch == b.arch);
        }
        self.applications.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        for app in &mut self.applications {
            app.packages
                .sort_by(|a, b| (&a.name, &a.version).cmp(&(&b.name, &b.version)));
            app.packages
                .dedup_by(|a, b| a.name == b.name && a.version == b.version);
        }
        self.misconfigurations
            .sort_by(|a, b| (&a.file_path, &a.id).cmp(&(&b.file_path, &b.id)));
        self.secrets.sort_by(|a, b| {
            (&a.file_path, &a.rule_id, a.start_line).cmp(&(&b.file_path, &b.rule_id, b.start_line))
        });
        self.licenses
            .sort_by(|a, b| (&a.file_path, &a.name).cmp(&(&b.file_path, &b.name)));
    }
}

/// Input to a file analyzer. Content is shared between every analyzer
/// that asked for the same file; the tar entry is read once.
pub struct AnalysisInput {
    pub file_path: String,
    pub content: Arc<Vec<u8>>,
    pub options: AnalysisOptions,
}

/// Input to a post analyzer: its staged virtual filesystem.
pub struct PostAnalysisInput<'a> {
    pub fs: &'a StagedFs,
    pub options: AnalysisOptions,
}

pub trait FileAnalyzer: Send + Sync {
    fn analyzer_type(&self) -> AnalyzerType;
    fn version(&self) -> u32;
    fn required(&self, file_path: &str, meta: &FileMeta) -> bool;
    fn analyze(&self, ctx: &CancelToken, input: AnalysisInput) -> Result<AnalysisResult>;
}

pub trait PostAnalyzer: Send + Sync {
    fn analyzer_type(&self) -> AnalyzerType;
    fn version(&self) -> u32;
    /// Gates staging: files for which this returns true are copied into
    /// this analyzer's virtual filesystem.
    fn required(&self, file_path: &str, meta: &FileMeta) -> bool;
    fn post_analyze(&self, ctx: &CancelToken, input: PostAnalysisInput) -> Result<AnalysisResult>;
}

// ─── Staged virtual filesystems ──────────────────────────────────────

/// One post analyzer's view of the walked filesystem: root-relative
/// paths mapped to readable host paths.
#[derive(Debug, Clone, Default)]
pub struct StagedFs {
    files: BTreeMap<String, PathBuf>,
}

impl StagedFs {
    pub fn files(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.files.iter().map(|(k, v)| (k.as_str(), v.as_path()))
    }

    pub fn contains(&self, rel: &str) -> bool {
        self.files.contains_key(rel)
    }

    pub fn read(&self, rel: &str) -> Result<Vec<u8>> {
        let host = self
            .files
            .get(rel)
            .ok_or_else(|| Error::PostAnalysis(format!("not staged: {rel}")))?;
        Ok(std::fs::read(host)?)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

enum StageMode {
    /// Copy content into a scratch directory (image scans, where the
    /// source is a transient tar stream).
    Materialize(PathBuf),
    /// Point at the real filesystem (local scans).
    Link(PathBuf),
}

/// Per-analyzer-type staging areas, safe for concurrent staging.
pub struct StagedFileSystems {
    mode: StageMode,
    inner: Mutex<BTreeMap<AnalyzerType, StagedFs>>,
}

impl StagedFileSystems {
    pub fn materialized(scratch: &Path) -> Self {
        Self {
            mode: StageMode::Materialize(scratch.to_path_buf()),
            inner: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn linked(root: &Path) -> Self {
        Self {
            mode: StageMode::Link(root.to_path_buf()),
            inner: Mutex::new(BTreeMap::new()),
        }
    }

    fn stage(
        &self,
        analyzer: AnalyzerType,
        rel: &str,
        opener: &mut dyn FileOpener,
    ) -> Result<()> {
        // Tar entries may carry traversal components; never let them
        // escape the scratch directory.
        if Path::new(rel)
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Ok(());
        }

        let host = match &self.mode {
            StageMode::Materialize(scratch) => {
                let dest = scratch.join(analyzer.to_string()).join(rel);
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| Error::PostAnalysis(format!("stage mkdir: {e}")))?;
                }
                let content = opener.open()?;
                std::fs::write(&dest, content.as_slice())
                    .map_err(|e| Error::PostAnalysis(format!("stage write {rel}: {e}")))?;
                dest
            }
            StageMode::Link(root) => root.join(rel),
        };

        let mut inner = self.inner.lock().unwrap();
        inner
            .entry(analyzer)
            .or_default()
            .files
            .insert(rel.to_string(), host);
        Ok(())
    }

    fn get(&self, analyzer: AnalyzerType) -> Option<StagedFs> {
        self.inner.lock().unwrap().get(&analyzer).cloned()
    }
}

// ─── Analyzer group ──────────────────────────────────────────────────

/// The registry plus dispatch logic for one scan.
pub struct AnalyzerGroup {
    file_analyzers: Vec<Box<dyn FileAnalyzer>>,
    post_analyzers: Vec<Box<dyn PostAnalyzer>>,
    file_patterns: HashMap<AnalyzerType, Vec<Regex>>,
    options: AnalysisOptions,
}

impl AnalyzerGroup {
    /// Build a group from explicit analyzer sets. Analyzers listed in
    /// `opts.disabled_analyzers` are dropped here, so they neither run
    /// nor contribute versions to cache keys.
    pub fn new(
        file_analyzers: Vec<Box<dyn FileAnalyzer>>,
        post_analyzers: Vec<Box<dyn PostAnalyzer>>,
        opts: &ArtifactOptions,
    ) -> Result<Self> {
        let file_patterns = parse_file_patterns(&opts.file_patterns)?;
        let disabled = &opts.disabled_analyzers;
        Ok(Self {
            file_analyzers: file_analyzers
                .into_iter()
                .filter(|a| !disabled.contains(&a.analyzer_type()))
                .collect(),
            post_analyzers: post_analyzers
                .into_iter()
                .filter(|a| !disabled.contains(&a.analyzer_type()))
                .collect(),
            file_patterns,
            options: AnalysisOptions {
                offline: opts.offline,
                file_checksum: opts.file_checksum,
            },
        })
    }

    /// Composition root: every built-in analyzer.
    pub fn default_group(opts: &ArtifactOptions) -> Result<Self> {
        let file_analyzers: Vec<Box<dyn FileAnalyzer>> = vec![
            Box::new(os_release::OsReleaseAnalyzer),
            Box::new(os_release::LsbReleaseAnalyzer),
            Box::new(apk::ApkAnalyzer),
            Box::new(dpkg::DpkgAnalyzer),
            Box::new(rpm::RpmAnalyzer),
            Box::new(secret::SecretAnalyzer::new(&opts.secret)),
            Box::new(license::LicenseAnalyzer::new(&opts.license)),
        ];
        let post_analyzers: Vec<Box<dyn PostAnalyzer>> = vec![
            Box::new(npm::NpmLockAnalyzer),
            Box::new(config::K8sConfigAnalyzer::new(&opts.misconf)),
        ];
        Self::new(file_analyzers, post_analyzers, opts)
    }

    /// `analyzer type -> version` for cache keying, covering both file
    /// and post analyzers.
    pub fn analyzer_versions(&self) -> BTreeMap<String, u32> {
        let mut versions = BTreeMap::new();
        for a in &self.file_analyzers {
            versions.insert(a.analyzer_type().to_string(), a.version());
        }
        for a in &self.post_analyzers {
            versions.insert(a.analyzer_type().to_string(), a.version());
        }
        versions
    }

    fn pattern_matches(&self, analyzer: AnalyzerType, file_path: &str) -> bool {
        self.file_patterns
            .get(&analyzer)
            .map(|patterns| patterns.iter().any(|p| p.is_match(file_path)))
            .unwrap_or(false)
    }

    /// Submit one walked file to every interested file analyzer.
    /// Analyzer tasks run on the surrounding rayon scope; their errors
    /// are logged and the file is skipped for that analyzer.
    #[allow(clippy::too_many_arguments)]
    pub fn analyze_file<'s>(
        &'s self,
        scope: &rayon::Scope<'s>,
        ctx: &CancelToken,
        result: &'s Mutex<AnalysisResult>,
        file_path: &str,
        meta: &FileMeta,
        opener: &mut dyn FileOpener,
        disabled: &[AnalyzerType],
    ) -> Result<()> {
        ctx.check()?;
        let mut content: Option<Arc<Vec<u8>>> = None;

        for analyzer in &self.file_analyzers {
            let atype = analyzer.analyzer_type();
            if disabled.contains(&atype) {
                continue;
            }
            if !analyzer.required(file_path, meta) && !self.pattern_matches(atype, file_path) {
                continue;
            }

            let bytes = match &content {
                Some(b) => Arc::clone(b),
                None => {
                    let b = opener.open()?;
                    content = Some(Arc::clone(&b));
                    b
                }
            };

            let input = AnalysisInput {
                file_path: file_path.to_string(),
                content: bytes,
                options: self.options,
            };
            let path_for_log = file_path.to_string();
            let task_ctx = ctx.clone();
            let analyzer: &'s dyn FileAnalyzer = analyzer.as_ref();
            scope.spawn(move |_| {
                if task_ctx.is_canceled() {
                    return;
                }
                match analyzer.analyze(&task_ctx, input) {
                    Ok(partial) => result.lock().unwrap().merge(partial),
                    Err(Error::Canceled) => {}
                    Err(e) => {
                        warn!(analyzer = %atype, file = %path_for_log, error = %e,
                            "analyzer failed, file skipped");
                    }
                }
            });
        }
        Ok(())
    }

    /// Stage one walked file for every post analyzer that wants it.
    pub fn stage_post_files(
        &self,
        staged: &StagedFileSystems,
        file_path: &str,
        meta: &FileMeta,
        opener: &mut dyn FileOpener,
    ) -> Result<()> {
        for analyzer in &self.post_analyzers {
            let atype = analyzer.analyzer_type();
            if analyzer.required(file_path, meta) || self.pattern_matches(atype, file_path) {
                staged.stage(atype, file_path, opener)?;
            }
        }
        Ok(())
    }

    /// Run every post analyzer over its staged filesystem. Must only be
    /// called after all file-analyzer tasks for the same blob finished.
    pub fn post_analyze(
        &self,
        ctx: &CancelToken,
        staged: &StagedFileSystems,
        result: &Mutex<AnalysisResult>,
    ) -> Result<()> {
        for analyzer in &self.post_analyzers {
            ctx.check()?;
            let Some(fs) = staged.get(analyzer.analyzer_type()) else {
                continue;
            };
            if fs.is_empty() {
                continue;
            }
            let input = PostAnalysisInput {
                fs: &fs,
                options: self.options,
            };
            match analyzer.post_analyze(ctx, input) {
                Ok(partial) => result.lock().unwrap().merge(partial),
                Err(Error::Canceled) => return Err(Error::Canceled),
                Err(e) => {
                    warn!(analyzer = %analyzer.analyzer_type(), error = %e,
                        "post analyzer failed, result skipped");
                }
            }
        }
        Ok(())
    }
}

fn parse_file_patterns(patterns: &[String]) -> Result<HashMap<AnalyzerType, Vec<Regex>>> {
    let mut out: HashMap<AnalyzerType, Vec<Regex>> = HashMap::new();
    for raw in patterns {
        let (atype, pattern) = raw
            .split_once(':')
            .ok_or_else(|| Error::Analysis(format!("invalid file pattern `{raw}`")))?;
        let atype = AnalyzerType::from_str(atype)?;
        let regex = Regex::new(pattern)
            .map_err(|e| Error::Analysis(format!("invalid file pattern `{raw}`: {e}")))?;
        out.entry(atype).or_default().push(regex);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OsFamily;
    use crate::walker::BytesOpener;

    struct FixedOs(OsFamily, &'static str, u8);

    impl FileAnalyzer for FixedOs {
        fn analyzer_type(&self) -> AnalyzerType {
            AnalyzerType::OsRelease
        }
        fn version(&self) -> u32 {
            1
        }
        fn required(&self, _: &str, _: &FileMeta) -> bool {
            true
        }
        fn analyze(&self, _: &CancelToken, _: AnalysisInput) -> Result<AnalysisResult> {
            Ok(AnalysisResult {
                os: Some(OsFound {
                    os: Os {
                        family: self.0,
                        name: self.1.to_string(),
                        eosl: false,
                    },
                    confidence: self.2,
                }),
                ..Default::default()
            })
        }
    }

    #[test]
    fn merge_keeps_highest_confidence_os() {
        let mut acc = AnalysisResult::default();
        let weak = FixedOs(OsFamily::Ubuntu, "20.04", CONFIDENCE_LOW);
        let strong = FixedOs(OsFamily::Alpine, "3.17", CONFIDENCE_HIGH);
        let ctx = CancelToken::new();
        let input = || AnalysisInput {
            file_path: "x".into(),
            content: Arc::new(Vec::new()),
            options: AnalysisOptions::default(),
        };

        acc.merge(strong.analyze(&ctx, input()).unwrap());
        acc.merge(weak.analyze(&ctx, input()).unwrap());
        assert_eq!(acc.os.as_ref().unwrap().os.family, OsFamily::Alpine);

        // Commutes: weak first, strong second.
        let mut acc2 = AnalysisResult::default();
        acc2.merge(weak.analyze(&ctx, input()).unwrap());
        acc2.merge(strong.analyze(&ctx, input()).unwrap());
        assert_eq!(acc2.os, acc.os);
    }

    #[test]
    fn sort_dedups_packages_by_identity() {
        use crate::types::Package;
        let pkg = |name: &str, version: &str| Package {
            name: name.into(),
            version: version.into(),
            ..Default::default()
        };
        let mut result = AnalysisResult {
            package_infos: vec![PackageInfo {
                file_path: "lib/apk/db/installed".into(),
                packages: vec![pkg("zlib", "1.2"), pkg("musl", "1.1"), pkg("zlib", "1.2")],
            }],
            ..Default::default()
        };
        result.sort();
        let names: Vec<_> = result.package_infos[0]
            .packages
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(names, vec!["musl", "zlib"]);
    }

    #[test]
    fn dispatch_runs_required_analyzers_concurrently() {
        let opts = ArtifactOptions::default();
        let group = AnalyzerGroup::new(
            vec![Box::new(FixedOs(OsFamily::Alpine, "3.17", CONFIDENCE_HIGH))],
            Vec::new(),
            &opts,
        )
        .unwrap();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(2)
            .build()
            .unwrap();
        let result = Mutex::new(AnalysisResult::default());
        let ctx = CancelToken::new();
        pool.scope(|s| {
            for path in ["etc/os-release", "usr/lib/os-release"] {
                let mut opener = BytesOpener::new(b"ID=alpine".to_vec());
                group
                    .analyze_file(
                        s,
                        &ctx,
                        &result,
                        path,
                        &FileMeta::default(),
                        &mut opener,
                        &[],
                    )
                    .unwrap();
            }
        });
        let result = result.into_inner().unwrap();
        assert!(result.os.is_some());
    }

    #[test]
    fn staged_fs_materializes_and_reads_back() {
        let scratch = tempfile::tempdir().unwrap();
        let staged = StagedFileSystems::materialized(scratch.path());
        let mut opener = BytesOpener::new(b"{\"name\":\"app\"}".to_vec());
        staged
            .stage(AnalyzerType::Npm, "srv/package-lock.json", &mut opener)
            .unwrap();

        let fs = staged.get(AnalyzerType::Npm).unwrap();
        assert!(fs.contains("srv/package-lock.json"));
        assert_eq!(fs.read("srv/package-lock.json").unwrap(), b"{\"name\":\"app\"}");
    }

    #[test]
    fn staging_rejects_traversal_paths() {
        let scratch = tempfile::tempdir().unwrap();
        let staged = StagedFileSystems::materialized(scratch.path());
        let mut opener = BytesOpener::new(b"x".to_vec());
        staged
            .stage(AnalyzerType::Npm, "../escape.json", &mut opener)
            .unwrap();
        assert!(staged.get(AnalyzerType::Npm).is_none());
    }

    #[test]
    fn disabled_analyzers_do_not_contribute_versions() {
        let mut opts = ArtifactOptions::default();
        opts.disabled_analyzers = vec![AnalyzerType::OsRelease];
        let group = AnalyzerGroup::new(
            vec![Box::new(FixedOs(OsFamily::Alpine, "3.17", CONFIDENCE_HIGH))],
            Vec::new(),
            &opts,
        )
        .unwrap();
        assert!(group.analyzer_versions().is_empty());
    }
}
