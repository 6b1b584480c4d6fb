//! Scan configuration and cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::analyzer::AnalyzerType;
use crate::error::{Error, Result};

/// Options for the misconfiguration checks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MisconfOptions {
    /// Check IDs to skip entirely.
    pub disabled_checks: Vec<String>,
}

/// Options for the secret analyzer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SecretOptions {
    /// Rule IDs to skip.
    pub disabled_rules: Vec<String>,
}

/// Options for the license analyzer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LicenseOptions {
    /// Classify every text file, not just well-known license paths.
    pub full_scan: bool,
}

/// Everything that shapes an artifact inspection.
///
/// Only the subset returned by [`ArtifactOptions::key_material`]
/// participates in cache keys; execution knobs such as `parallelism` and
/// `slow` never invalidate cached blobs.
#[derive(Debug, Clone)]
pub struct ArtifactOptions {
    pub skip_files: Vec<String>,
    pub skip_dirs: Vec<String>,
    /// `analyzer-type:regex` entries forcing extra paths onto analyzers.
    pub file_patterns: Vec<String>,
    pub disabled_analyzers: Vec<AnalyzerType>,
    /// Width of the per-file analyzer pool inside one layer.
    pub parallelism: usize,
    /// Sequential mode: one layer at a time, one file at a time.
    pub slow: bool,
    pub offline: bool,
    /// Record a SHA-256 per analyzed file.
    pub file_checksum: bool,
    pub misconf: MisconfOptions,
    pub secret: SecretOptions,
    pub license: LicenseOptions,
}

impl Default for ArtifactOptions {
    fn default() -> Self {
        Self {
            skip_files: Vec::new(),
            skip_dirs: Vec::new(),
            file_patterns: Vec::new(),
            disabled_analyzers: Vec::new(),
            parallelism: 5,
            slow: false,
            offline: false,
            file_checksum: false,
            misconf: MisconfOptions::default(),
            secret: SecretOptions::default(),
            license: LicenseOptions::default(),
        }
    }
}

/// The canonical, serializable subset of options that influences
/// analysis output. Two scans with equal key material and equal tool
/// versions must hit the same cache entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OptionsKeyMaterial {
    file_patterns: Vec<String>,
    disabled_analyzers: Vec<String>,
    offline: bool,
    file_checksum: bool,
    misconf: MisconfOptions,
    secret: SecretOptions,
    license: LicenseOptions,
}

impl ArtifactOptions {
    pub fn key_material(&self) -> OptionsKeyMaterial {
        let mut file_patterns = self.file_patterns.clone();
        file_patterns.sort();
        let mut disabled: Vec<String> = self
            .disabled_analyzers
            .iter()
            .map(|a| a.to_string())
            .collect();
        disabled.sort();
        let mut misconf = self.misconf.clone();
        misconf.disabled_checks.sort();
        let mut secret = self.secret.clone();
        secret.disabled_rules.sort();
        OptionsKeyMaterial {
            file_patterns,
            disabled_analyzers: disabled,
            offline: self.offline,
            file_checksum: self.file_checksum,
            misconf,
            secret,
            license: self.license.clone(),
        }
    }

    /// Effective analyzer-pool width; sequential mode forces one.
    pub fn effective_parallelism(&self) -> usize {
        if self.slow {
            1
        } else {
            self.parallelism.max(1)
        }
    }
}

/// Options handed to each analyzer invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalysisOptions {
    pub offline: bool,
    pub file_checksum: bool,
}

/// Cooperative cancellation token shared by every worker in a scan.
/// Analyzers check it at I/O boundaries; a canceled scan discards
/// partial results instead of persisting them.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Bail out with [`Error::Canceled`] when the token has fired.
    pub fn check(&self) -> Result<()> {
        if self.is_canceled() {
            return Err(Error::Canceled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_material_ignores_execution_knobs() {
        let mut a = ArtifactOptions::default();
        let mut b = ArtifactOptions::default();
        a.parallelism = 1;
        a.slow = true;
        b.parallelism = 32;
        assert_eq!(a.key_material(), b.key_material());
    }

    #[test]
    fn key_material_sorts_pattern_sets() {
        let mut a = ArtifactOptions::default();
        let mut b = ArtifactOptions::default();
        a.file_patterns = vec!["npm:foo".into(), "dpkg:bar".into()];
        b.file_patterns = vec!["dpkg:bar".into(), "npm:foo".into()];
        assert_eq!(a.key_material(), b.key_material());
    }

    #[test]
    fn cancel_token_fires_once() {
        let token = CancelToken::new();
        assert!(token.check().is_ok());
        token.cancel();
        assert!(matches!(token.check(), Err(Error::Canceled)));
    }
}
