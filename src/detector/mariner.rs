//! CBL-Mariner driver.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::debug;

use crate::detector::version::compare_rpm;
use crate::detector::Driver;
use crate::error::Result;
use crate::types::{DetectedVulnerability, OsFamily, Package, Repository};
use crate::vulnsrc::VulnSource;

const FAMILY: &str = "cbl-mariner";

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
        // e.g. 2.0.20240101 -> 2.0; advisories are keyed by the
        // two-segment release.
        let mut os_ver = os_ver;
        if os_ver.matches('.').count() > 1 {
            os_ver = &os_ver[..os_ver.rfind('.').unwrap_or(os_ver.len())];
        }
        debug!(os_ver = %os_ver, packages = pkgs.len(), "detecting CBL-Mariner vulnerabilities");

        let mut vulns = Vec::new();
        for pkg in pkgs {
            // The Mariner feed indexes source package names only.
            let advisories = self.source.advisories(FAMILY, os_ver, &pkg.src_name)?;
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
                    // Unpatched: reported without a fixed version.
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
        // No public EOL data for CBL-Mariner.
        true
    }
}
