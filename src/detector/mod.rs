//! OS package vulnerability detection.
//!
//! A [`Driver`] per distribution family implements the common
//! `detect(os_version, repo, packages)` contract with its own version
//! semantics. The [`DriverRegistry`] dispatches on the detected OS
//! family; aliases (CentOS -> RedHat) are plain double registrations.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::warn;

use crate::error::{Error, Result};
use crate::types::{DetectedVulnerability, Os, OsFamily, Package, Repository};
use crate::vulnsrc::VulnSource;

pub mod alpine;
pub mod debian;
pub mod mariner;
pub mod redhat;
pub mod suse;
pub mod version;

pub trait Driver: Send + Sync {
    fn detect(
        &self,
        os_ver: &str,
        repo: Option<&Repository>,
        pkgs: &[Package],
    ) -> Result<Vec<DetectedVulnerability>>;

    /// Whether the release still receives security fixes. Drivers
    /// without an EOL table answer `true` unconditionally.
    fn is_supported_version(&self, os_family: &OsFamily, os_ver: &str) -> bool;
}

/// `release -> end-of-support` lookup shared by the drivers that have
/// published EOL dates. A release missing from the table is treated as
/// unsupported.
pub(crate) fn eol_supported(table: &[(&str, NaiveDate)], release: &str) -> bool {
    match table.iter().find(|(r, _)| *r == release) {
        Some((_, eol)) => Utc::now().date_naive() <= *eol,
        None => {
            warn!(release = %release, "unknown release, treating as end of support");
            false
        }
    }
}

pub(crate) fn eol_date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("static EOL date")
}

pub struct DriverRegistry {
    drivers: HashMap<OsFamily, Arc<dyn Driver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self {
            drivers: HashMap::new(),
        }
    }

    pub fn register(&mut self, family: OsFamily, driver: Arc<dyn Driver>) {
        self.drivers.insert(family, driver);
    }

    /// Composition root wiring every built-in driver to one advisory
    /// source.
    pub fn default_registry(source: Arc<dyn VulnSource>) -> Self {
        let mut registry = Self::new();
        registry.register(
            OsFamily::Alpine,
            Arc::new(alpine::Scanner::new(source.clone())),
        );
        registry.register(
            OsFamily::Debian,
            Arc::new(debian::Scanner::new(debian::Flavor::Debian, source.clone())),
        );
        registry.register(
            OsFamily::Ubuntu,
            Arc::new(debian::Scanner::new(debian::Flavor::Ubuntu, source.clone())),
        );
        let redhat = Arc::new(redhat::Scanner::new(source.clone()));
        registry.register(OsFamily::RedHat, redhat.clone());
        // CentOS consumes the Red Hat advisory stream.
        registry.register(OsFamily::CentOs, redhat);
        registry.register(
            OsFamily::CblMariner,
            Arc::new(mariner::Scanner::new(source.clone())),
        );
        registry.register(
            OsFamily::OpenSuseLeap,
            Arc::new(suse::Scanner::new(suse::Flavor::OpenSuseLeap, source.clone())),
        );
        registry.register(
            OsFamily::Sles,
            Arc::new(suse::Scanner::new(suse::Flavor::EnterpriseLinux, source)),
        );
        registry
    }

    pub fn driver(&self, family: OsFamily) -> Result<&Arc<dyn Driver>> {
        self.drivers
            .get(&family)
            .ok_or_else(|| Error::UnsupportedOs(family.to_string()))
    }

    /// Detect vulnerabilities for the given OS. Returns the findings
    /// plus whether the release is past end of support.
    pub fn detect(
        &self,
        os: &Os,
        repo: Option<&Repository>,
        pkgs: &[Package],
    ) -> Result<(Vec<DetectedVulnerability>, bool)> {
        let driver = self.driver(os.family)?;
        let eosl = !driver.is_supported_version(&os.family, &os.name);
        let vulns = driver
            .detect(&os.name, repo, pkgs)
            .map_err(|e| Error::Detection(e.to_string()))?;
        Ok((vulns, eosl))
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulnsrc::MemoryVulnSource;

    #[test]
    fn unknown_family_is_a_sentinel_error() {
        let registry = DriverRegistry::new();
        let os = Os {
            family: OsFamily::Photon,
            name: "4.0".into(),
            eosl: false,
        };
        match registry.detect(&os, None, &[]) {
            Err(Error::UnsupportedOs(family)) => assert_eq!(family, "photon"),
            other => panic!("expected UnsupportedOs, got {other:?}"),
        }
    }

    #[test]
    fn centos_aliases_to_redhat() {
        let registry = DriverRegistry::default_registry(Arc::new(MemoryVulnSource::new()));
        assert!(registry.driver(OsFamily::CentOs).is_ok());
        assert!(registry.driver(OsFamily::RedHat).is_ok());
    }
}
