//! SUSE driver, parameterized by flavor: openSUSE Leap and SUSE Linux
//! Enterprise share everything but the advisory stream they read.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::debug;

use crate::detector::version::compare_rpm;
use crate::detector::Driver;
use crate::error::Result;
use crate::types::{DetectedVulnerability, OsFamily, Package, Repository};
use crate::vulnsrc::VulnSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    OpenSuseLeap,
    EnterpriseLinux,
}

impl Flavor {
    fn family(&self) -> &'static str {
        match self {
            Self::OpenSuseLeap => "opensuse-leap",
            Self::EnterpriseLinux => "sles",
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
        debug!(family = self.flavor.family(), release = %os_ver, packages = pkgs.len(),
            "detecting SUSE vulnerabilities");

        let mut vulns = Vec::new();
        for pkg in pkgs {
            let advisories = self
                .source
                .advisories(self.flavor.family(), os_ver, &pkg.src_name)?;
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
        true
    }
}
