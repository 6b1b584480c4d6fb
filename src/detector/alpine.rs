//! Alpine driver.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::debug;

use crate::detector::version::compare_apk;
use crate::detector::{eol_date, eol_supported, Driver};
use crate::error::Result;
use crate::types::{DetectedVulnerability, OsFamily, Package, Repository};
use crate::vulnsrc::VulnSource;

const FAMILY: &str = "alpine";

fn eol_table() -> Vec<(&'static str, NaiveDate)> {
    vec![
        ("3.14", eol_date(2023, 5, 1)),
        ("3.15", eol_date(2023, 11, 1)),
        ("3.16", eol_date(2024, 5, 23)),
        ("3.17", eol_date(2024, 11, 22)),
        ("3.18", eol_date(2025, 5, 9)),
        ("3.19", eol_date(2025, 11, 1)),
        ("edge", eol_date(9999, 12, 31)),
    ]
}

pub struct Scanner {
    source: Arc<dyn VulnSource>,
}

impl Scanner {
    pub fn new(source: Arc<dyn VulnSource>) -> Self {
        Self { source }
    }
}

/// `3.17.3` -> `3.17`; the secdb is keyed by branch.
fn branch(os_ver: &str) -> String {
    let mut parts = os_ver.split('.');
    match (parts.next(), parts.next()) {
        (Some(major), Some(minor)) => format!("{major}.{minor}"),
        _ => os_ver.to_string(),
    }
}

impl Driver for Scanner {
    fn detect(
        &self,
        os_ver: &str,
        repo: Option<&Repository>,
        pkgs: &[Package],
    ) -> Result<Vec<DetectedVulnerability>> {
        // Images built from edge carry the branch in the repository
        // hint rather than the os-release version.
        let release = match repo {
            Some(repo) if !repo.release.is_empty() => repo.release.clone(),
            _ => branch(os_ver),
        };
        debug!(release = %release, packages = pkgs.len(), "detecting Alpine vulnerabilities");

        let mut vulns = Vec::new();
        for pkg in pkgs {
            let advisories = self.source.advisories(FAMILY, &release, &pkg.name)?;
            let installed = pkg.format_version();

            for advisory in advisories {
                let mut vuln = DetectedVulnerability {
                    vulnerability_id: advisory.vulnerability_id,
                    pkg_name: pkg.name.clone(),
                    installed_version: installed.clone(),
                    severity: advisory.severity,
                    layer: pkg.layer.clone(),
                    data_source: advisory.data_source,
                    ..Default::default()
                };
                if advisory.fixed_version.is_empty() {
                    vulns.push(vuln);
                    continue;
                }
                if compare_apk(&installed, &advisory.fixed_version) == Ordering::Less {
                    vuln.fixed_version = advisory.fixed_version;
                    vulns.push(vuln);
                }
            }
        }
        Ok(vulns)
    }

    fn is_supported_version(&self, _os_family: &OsFamily, os_ver: &str) -> bool {
        eol_supported(&eol_table(), &branch(os_ver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Severity;
    use crate::vulnsrc::{Advisory, MemoryVulnSource};

    fn pkg(name: &str, version: &str) -> Package {
        Package {
            name: name.into(),
            version: version.into(),
            src_name: name.into(),
            src_version: version.into(),
            ..Default::default()
        }
    }

    #[test]
    fn detects_by_binary_name_on_branch() {
        let mut source = MemoryVulnSource::new();
        source.add(
            FAMILY,
            "3.17",
            "libssl3",
            Advisory {
                vulnerability_id: "CVE-2023-0464".into(),
                fixed_version: "3.0.8-r3".into(),
                severity: Severity::High,
                data_source: None,
            },
        );
        let scanner = Scanner::new(Arc::new(source));

        let vulns = scanner
            .detect("3.17.3", None, &[pkg("libssl3", "3.0.8-r2")])
            .unwrap();
        assert_eq!(vulns.len(), 1);
        assert_eq!(vulns[0].fixed_version, "3.0.8-r3");

        let fixed = scanner
            .detect("3.17.3", None, &[pkg("libssl3", "3.0.8-r3")])
            .unwrap();
        assert!(fixed.is_empty());
    }

    #[test]
    fn repository_hint_overrides_release() {
        let mut source = MemoryVulnSource::new();
        source.add(
            FAMILY,
            "edge",
            "musl",
            Advisory {
                vulnerability_id: "CVE-2024-0001".into(),
                fixed_version: String::new(),
                severity: Severity::Unknown,
                data_source: None,
            },
        );
        let scanner = Scanner::new(Arc::new(source));
        let repo = Repository {
            family: OsFamily::Alpine,
            release: "edge".into(),
        };
        let vulns = scanner
            .detect("3.17.3", Some(&repo), &[pkg("musl", "1.2.3-r4")])
            .unwrap();
        assert_eq!(vulns.len(), 1);
    }

    #[test]
    fn eol_release_is_unsupported() {
        let scanner = Scanner::new(Arc::new(MemoryVulnSource::new()));
        assert!(!scanner.is_supported_version(&OsFamily::Alpine, "3.14.0"));
        assert!(scanner.is_supported_version(&OsFamily::Alpine, "edge"));
    }
}
