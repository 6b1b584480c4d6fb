//! Red Hat family driver. CentOS is registered against this same
//! driver; both consume the Red Hat advisory stream.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::debug;

use crate::detector::version::compare_rpm;
use crate::detector::Driver;
use crate::error::Result;
use crate::types::{DetectedVulnerability, OsFamily, Package, Repository};
use crate::vulnsrc::VulnSource;

const FAMILY: &str = "redhat";

pub struct Scanner {
    source: Arc<dyn VulnSource>,
}

impl Scanner {
    pub fn new(source: Arc<dyn VulnSource>) -> Self {
        Self { source }
    }
}

impl Driver for Scanner {
    fn detect(
        &self,
        os_ver: &str,
        _repo: Option<&Repository>,
        pkgs: &[Package],
    ) -> Result<Vec<DetectedVulnerability>> {
        let release = os_ver.split('.').next().unwrap_or(os_ver);
        debug!(release = %release, packages = pkgs.len(), "detecting Red Hat vulnerabilities");

        let mut vulns = Vec::new();
        for pkg in pkgs {
            // RPM advisories are indexed by source package.
            let advisories = self.source.advisories(FAMILY, release, &pkg.src_name)?;
            let installed = pkg.format_src_version();

            for advisory in advisories {
                let mut vuln = DetectedVulnerability {
                    vulnerability_id: advisory.vulnerability_id,
                    pkg_name: pkg.name.clone(),
                    installed_version: pkg.format_version(),
                    severity: advisory.severity,
                    layer: pkg.layer.clone(),
                    data_source: advisory.data_source,
                    ..Default::default()
                };
                if advisory.fixed_version.is_empty() {
                    vulns.push(vuln);
                    continue;
                }
                if compare_rpm(&installed, &advisory.fixed_version) == Ordering::Less {
                    vuln.fixed_version = advisory.fixed_version;
                    vulns.push(vuln);
                }
            }
        }
        Ok(vulns)
    }

    fn is_supported_version(&self, _os_family: &OsFamily, _os_ver: &str) -> bool {
        // No EOL table wired in; extended support contracts make the
        // cutoff a policy question, not a data point.
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Severity;
    use crate::vulnsrc::{Advisory, MemoryVulnSource};

    #[test]
    fn source_package_lookup_with_epoch_comparison() {
        let mut source = MemoryVulnSource::new();
        source.add(
            FAMILY,
            "8",
            "openssl",
            Advisory {
                vulnerability_id: "CVE-2023-0286".into(),
                fixed_version: "1:1.1.1k-9.el8".into(),
                severity: Severity::High,
                data_source: None,
            },
        );
        let scanner = Scanner::new(Arc::new(source));

        let pkg = Package {
            name: "openssl-libs".into(),
            version: "1.1.1k".into(),
            release: "7.el8".into(),
            epoch: 1,
            src_name: "openssl".into(),
            src_version: "1.1.1k".into(),
            src_release: "7.el8".into(),
            src_epoch: 1,
            ..Default::default()
        };
        let vulns = scanner.detect("8.7", None, &[pkg]).unwrap();
        assert_eq!(vulns.len(), 1);
        assert_eq!(vulns[0].pkg_name, "openssl-libs");
        assert_eq!(vulns[0].installed_version, "1:1.1.1k-7.el8");
        assert_eq!(vulns[0].fixed_version, "1:1.1.1k-9.el8");
    }
}
