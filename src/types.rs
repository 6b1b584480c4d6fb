//! Core data model shared by the inspection pipeline, the detectors and
//! the reconciler. Everything here serializes to JSON; cached blobs are
//! exactly the serialized form of [`BlobInfo`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bump when the serialized shape of `BlobInfo` changes.
pub const BLOB_SCHEMA_VERSION: u32 = 2;
/// Bump when the serialized shape of `ArtifactInfo` changes.
pub const ARTIFACT_SCHEMA_VERSION: u32 = 1;

// ─── OS identity ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OsFamily {
    Alpine,
    Debian,
    Ubuntu,
    #[serde(rename = "redhat")]
    RedHat,
    #[serde(rename = "centos")]
    CentOs,
    Rocky,
    Alma,
    CblMariner,
    OpenSuseLeap,
    Sles,
    Photon,
    Wolfi,
    Chainguard,
    Amazon,
    Oracle,
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Alpine => "alpine",
            Self::Debian => "debian",
            Self::Ubuntu => "ubuntu",
            Self::RedHat => "redhat",
            Self::CentOs => "centos",
            Self::Rocky => "rocky",
            Self::Alma => "alma",
            Self::CblMariner => "cbl-mariner",
            Self::OpenSuseLeap => "opensuse-leap",
            Self::Sles => "sles",
            Self::Photon => "photon",
            Self::Wolfi => "wolfi",
            Self::Chainguard => "chainguard",
            Self::Amazon => "amazon",
            Self::Oracle => "oracle",
        };
        f.write_str(s)
    }
}

impl OsFamily {
    /// Parse an ID as it appears in os-release (`ID=` field).
    pub fn from_os_release_id(id: &str) -> Option<Self> {
        match id {
            "alpine" => Some(Self::Alpine),
            "debian" => Some(Self::Debian),
            "ubuntu" => Some(Self::Ubuntu),
            "rhel" | "redhat" => Some(Self::RedHat),
            "centos" => Some(Self::CentOs),
            "rocky" => Some(Self::Rocky),
            "almalinux" => Some(Self::Alma),
            "mariner" | "cbl-mariner" | "azurelinux" => Some(Self::CblMariner),
            "opensuse-leap" => Some(Self::OpenSuseLeap),
            "sles" => Some(Self::Sles),
            "photon" => Some(Self::Photon),
            "wolfi" => Some(Self::Wolfi),
            "chainguard" => Some(Self::Chainguard),
            "amzn" => Some(Self::Amazon),
            "ol" | "oracle" => Some(Self::Oracle),
            _ => None,
        }
    }
}

/// Detected operating system of an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Os {
    pub family: OsFamily,
    /// Release name or version, e.g. `3.17.3` or `11.7`.
    pub name: String,
    /// Set by the detector when the release is past end of support.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub eosl: bool,
}

/// Extra repository hint, e.g. Alpine edge branches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub family: OsFamily,
    pub release: String,
}

// ─── Packages ────────────────────────────────────────────────────────

/// Source location of a package declaration inside a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location {
    pub start_line: u32,
    pub end_line: u32,
}

/// The layer a finding was introduced by.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub digest: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub diff_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created_by: String,
}

impl Layer {
    pub fn is_empty(&self) -> bool {
        self.digest.is_empty() && self.diff_id.is_empty() && self.created_by.is_empty()
    }
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

/// An installed package, OS-level or language-level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub epoch: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub release: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub arch: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub src_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub src_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub src_release: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub src_epoch: u32,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub indirect: bool,
    #[serde(default, skip_serializing_if = "Layer::is_empty")]
    pub layer: Layer,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<Location>,
}

impl Package {
    /// `epoch:version-release` as the ecosystem comparator expects it.
    /// Epoch and release are omitted when absent.
    pub fn format_version(&self) -> String {
        format_evr(self.epoch, &self.version, &self.release)
    }

    /// Source-package version, falling back to the binary version when
    /// the analyzer could not determine a source version.
    pub fn format_src_version(&self) -> String {
        if self.src_version.is_empty() {
            return self.format_version();
        }
        format_evr(self.src_epoch, &self.src_version, &self.src_release)
    }
}

fn format_evr(epoch: u32, version: &str, release: &str) -> String {
    let mut out = String::new();
    if epoch > 0 {
        out.push_str(&format!("{epoch}:"));
    }
    out.push_str(version);
    if !release.is_empty() {
        out.push('-');
        out.push_str(release);
    }
    out
}

/// Packages found in one OS package database file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub file_path: String,
    pub packages: Vec<Package>,
}

/// A language-ecosystem manifest and the packages it declares.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    /// Ecosystem identifier, e.g. `npm`.
    pub app_type: String,
    pub file_path: String,
    pub packages: Vec<Package>,
}

// ─── Findings ────────────────────────────────────────────────────────

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    #[default]
    Unknown,
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Critical => "CRITICAL",
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

impl Severity {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "CRITICAL" => Some(Self::Critical),
            "HIGH" => Some(Self::High),
            "MEDIUM" => Some(Self::Medium),
            "LOW" => Some(Self::Low),
            "UNKNOWN" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// All severities, most severe first.
    pub fn all() -> Vec<Self> {
        vec![
            Self::Critical,
            Self::High,
            Self::Medium,
            Self::Low,
            Self::Unknown,
        ]
    }
}

/// Where an advisory came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSource {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedVulnerability {
    pub vulnerability_id: String,
    pub pkg_name: String,
    /// Path of the manifest the package came from; empty for OS packages.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pkg_path: String,
    pub installed_version: String,
    /// Empty means no fix is available (an unpatched finding).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fixed_version: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Layer::is_empty")]
    pub layer: Layer,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source: Option<DataSource>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MisconfStatus {
    #[serde(rename = "FAIL")]
    Failure,
    #[serde(rename = "PASS")]
    Passed,
    #[serde(rename = "EXCEPTION")]
    Exception,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedMisconfiguration {
    /// Check identifier, e.g. `DS002`.
    pub id: String,
    /// Stable database identifier, e.g. `AVD-DS-0002`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub avd_id: String,
    /// Config family, e.g. `dockerfile` or `kubernetes`.
    pub config_type: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub severity: Severity,
    pub status: MisconfStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Layer::is_empty")]
    pub layer: Layer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretFinding {
    pub rule_id: String,
    pub title: String,
    pub severity: Severity,
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    /// The matched text with the sensitive part masked.
    pub match_text: String,
    #[serde(default, skip_serializing_if = "Layer::is_empty")]
    pub layer: Layer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedLicense {
    pub name: String,
    pub severity: Severity,
    pub file_path: String,
}

// ─── Blobs and artifacts ─────────────────────────────────────────────

/// Analysis result of one layer or one filesystem snapshot. Created
/// exactly once per `(content, tool versions, options)` tuple and cached
/// thereafter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlobInfo {
    pub schema_version: u32,
    /// Digest of the compressed layer; empty for uncompressed layers
    /// and filesystem snapshots.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub digest: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub diff_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<Os>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<Repository>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub package_infos: Vec<PackageInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applications: Vec<Application>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub misconfigurations: Vec<DetectedMisconfiguration>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<SecretFinding>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub licenses: Vec<DetectedLicense>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub opaque_dirs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub whiteout_files: Vec<String>,
}

/// Analysis result of the image configuration itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactInfo {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub architecture: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub docker_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub os: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub misconfigurations: Vec<DetectedMisconfiguration>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<SecretFinding>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Image,
    Filesystem,
    Sbom,
    Repository,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => f.write_str("image"),
            Self::Filesystem => f.write_str("filesystem"),
            Self::Sbom => f.write_str("sbom"),
            Self::Repository => f.write_str("repository"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diff_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repo_tags: Vec<String>,
}

/// Handle to a fully inspected artifact. `id` and `blob_ids` are cache
/// keys; for images, `blob_ids` preserves layer order from base to top.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactReference {
    pub name: String,
    pub kind: ArtifactKind,
    pub id: String,
    pub blob_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_metadata: Option<ImageMetadata>,
}

// ─── Report ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResultClass {
    OsPackages,
    LangPkgs,
    Config,
    Secret,
    License,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MisconfSummary {
    pub successes: usize,
    pub failures: usize,
    pub exceptions: usize,
}

impl MisconfSummary {
    pub fn is_empty(&self) -> bool {
        self.successes == 0 && self.failures == 0 && self.exceptions == 0
    }
}

/// Findings for a single target: one OS, one lockfile, one config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub target: String,
    pub class: ResultClass,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vulnerabilities: Vec<DetectedVulnerability>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub misconfigurations: Vec<DetectedMisconfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub misconf_summary: Option<MisconfSummary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<SecretFinding>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub licenses: Vec<DetectedLicense>,
}

impl ScanResult {
    pub fn new(target: impl Into<String>, class: ResultClass) -> Self {
        Self {
            target: target.into(),
            class,
            vulnerabilities: Vec::new(),
            misconfigurations: Vec::new(),
            misconf_summary: None,
            secrets: Vec::new(),
            licenses: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<Os>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diff_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repo_tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub artifact_name: String,
    pub artifact_kind: ArtifactKind,
    pub metadata: ReportMetadata,
    pub results: Vec<ScanResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_version_with_epoch_and_release() {
        let pkg = Package {
            name: "openssl".into(),
            version: "1.1.1k".into(),
            epoch: 1,
            release: "5.el8".into(),
            ..Default::default()
        };
        assert_eq!(pkg.format_version(), "1:1.1.1k-5.el8");
    }

    #[test]
    fn format_src_version_falls_back_to_binary() {
        let pkg = Package {
            name: "libssl".into(),
            version: "2.0".into(),
            ..Default::default()
        };
        assert_eq!(pkg.format_src_version(), "2.0");
    }

    #[test]
    fn severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Low > Severity::Unknown);
        assert_eq!(Severity::parse("high"), Some(Severity::High));
    }

    #[test]
    fn blob_info_round_trips() {
        let blob = BlobInfo {
            schema_version: BLOB_SCHEMA_VERSION,
            diff_id: "sha256:abc".into(),
            os: Some(Os {
                family: OsFamily::Alpine,
                name: "3.17".into(),
                eosl: false,
            }),
            ..Default::default()
        };
        let json = serde_json::to_string(&blob).unwrap();
        let back: BlobInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(blob, back);
    }
}
