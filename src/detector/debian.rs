//! Debian and Ubuntu driver, parameterized by flavor: the two share
//! packaging and version semantics but differ in release naming and
//! EOL schedules.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::debug;

use crate::detector::version::compare_deb;
use crate::detector::{eol_date, eol_supported, Driver};
use crate::error::Result;
use crate::types::{DetectedVulnerability, OsFamily, Package, Repository};
use crate::vulnsrc::VulnSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    Debian,
    Ubuntu,
}

impl Flavor {
    fn family(&self) -> &'static str {
        match self {
            Self::Debian => "debian",
            Self::Ubuntu => "ubuntu",
        }
    }

    /// Debian advisories are keyed by major release, Ubuntu's by
    /// `YY.MM`.
    fn release(&self, os_ver: &str) -> String {
        match self {
            Self::Debian => os_ver.split('.').next().unwrap_or(os_ver).to_string(),
            Self::Ubuntu => {
                let mut parts = os_ver.split('.');
                match (parts.next(), parts.next()) {
                    (Some(major), Some(minor)) => format!("{major}.{minor}"),
                    _ => os_ver.to_string(),
                }
            }
        }
    }

    fn eol_table(&self) -> Vec<(&'static str, NaiveDate)> {
        match self {
            Self::Debian => vec![
                ("10", eol_date(2024, 6, 30)),
                ("11", eol_date(2026, 8, 31)),
                ("12", eol_date(2028, 6, 30)),
            ],
            Self::Ubuntu => vec![
                ("18.04", eol_date(2023, 5, 31)),
                ("20.04", eol_date(2025, 4, 30)),
                ("22.04", eol_date(2027, 4, 30)),
                ("24.04", eol_date(2029, 4, 30)),
            ],
        }
    }
}

pub struct Scanner {
    flavor: Flavor,
    source: Arc<dyn VulnSource>,
}

impl Scanner {
    pub fn new(flavor: Flavor, source: Arc<dyn VulnSource>) -> Self {
        Self { flavor, source }
    }
}

impl Driver for Scanner {
    fn detect(
        &self,
        os_ver: &str,
        _repo: Option<&Repository>,
        pkgs: &[Package],
    ) -> Result<Vec<DetectedVulnerability>> {
        let release = self.flavor.release(os_ver);
        debug!(family = self.flavor.family(), release = %release, packages = pkgs.len(),
            "detecting vulnerabilities");

        let mut vulns = Vec::new();
        for pkg in pkgs {
            let advisories = self
                .source
                .advisories(self.flavor.family(), &release, &pkg.name)?;
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
                if compare_deb(&installed, &advisory.fixed_version) == Ordering::Less {
                    vuln.fixed_version = advisory.fixed_version;
                    vulns.push(vuln);
                }
            }
        }
        Ok(vulns)
    }

    fn is_supported_version(&self, _os_family: &OsFamily, os_ver: &str) -> bool {
        eol_supported(&self.flavor.eol_table(), &self.flavor.release(os_ver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Severity;
    use crate::vulnsrc::{Advisory, MemoryVulnSource};

    fn pkg(name: &str, version: &str, epoch: u32) -> Package {
        Package {
            name: name.into(),
            version: version.into(),
            epoch,
            src_name: name.into(),
            ..Default::default()
        }
    }

    #[test]
    fn debian_release_is_major_only() {
        let mut source = MemoryVulnSource::new();
        source.add(
            "debian",
            "11",
            "libssl1.1",
            Advisory {
                vulnerability_id: "CVE-2023-0464".into(),
                fixed_version: "1.1.1n-0+deb11u5".into(),
                severity: Severity::High,
                data_source: None,
            },
        );
        let scanner = Scanner::new(Flavor::Debian, Arc::new(source));
        let vulns = scanner
            .detect("11.7", None, &[pkg("libssl1.1", "1.1.1n-0+deb11u4", 0)])
            .unwrap();
        assert_eq!(vulns.len(), 1);
        assert_eq!(vulns[0].fixed_version, "1.1.1n-0+deb11u5");
    }

    #[test]
    fn epoch_participates_in_comparison() {
        let mut source = MemoryVulnSource::new();
        source.add(
            "ubuntu",
            "22.04",
            "dash",
            Advisory {
                vulnerability_id: "CVE-2024-0001".into(),
                fixed_version: "1:0.5.12".into(),
                severity: Severity::Low,
                data_source: None,
            },
        );
        let scanner = Scanner::new(Flavor::Ubuntu, Arc::new(source));
        let vulns = scanner
            .detect("22.04", None, &[pkg("dash", "0.5.11", 1)])
            .unwrap();
        assert_eq!(vulns.len(), 1);

        // 2:x is already past the 1:x fix.
        let newer = scanner
            .detect("22.04", None, &[pkg("dash", "0.5.11", 2)])
            .unwrap();
        assert!(newer.is_empty());
    }

    #[test]
    fn flavors_have_separate_eol_tables() {
        let src: Arc<MemoryVulnSource> = Arc::new(MemoryVulnSource::new());
        let debian = Scanner::new(Flavor::Debian, src.clone());
        let ubuntu = Scanner::new(Flavor::Ubuntu, src);
        assert!(debian.is_supported_version(&OsFamily::Debian, "12.1"));
        assert!(!debian.is_supported_version(&OsFamily::Debian, "10.3"));
        assert!(ubuntu.is_supported_version(&OsFamily::Ubuntu, "24.04"));
        assert!(!ubuntu.is_supported_version(&OsFamily::Ubuntu, "18.04"));
    }
}
