//! VEX filtering.
//!
//! A VEX document states which vulnerabilities do not apply to the
//! product under scan; statements of `not_affected` or `fixed` remove
//! the matching findings before any other filtering runs.

use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::types::DetectedVulnerability;

/// Opaque VEX capability: given findings, return the ones that remain.
pub trait VexDocument: Send + Sync {
    fn filter(&self, vulns: Vec<DetectedVulnerability>) -> Vec<DetectedVulnerability>;
}

#[derive(Debug, Deserialize)]
struct StatementVulnerability {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Statement {
    vulnerability: StatementVulnerability,
    status: String,
}

/// OpenVEX-shaped JSON document.
#[derive(Debug, Deserialize)]
pub struct OpenVex {
    #[serde(default)]
    statements: Vec<Statement>,
}

impl OpenVex {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path).map_err(|e| Error::Vex(format!("{}: {e}", path.display())))?;
        serde_json::from_slice(&raw).map_err(|e| Error::Vex(format!("{}: {e}", path.display())))
    }

    fn suppressed(&self, vuln_id: &str) -> bool {
        self.statements.iter().any(|s| {
            s.vulnerability.name == vuln_id
                && matches!(s.status.as_str(), "not_affected" | "fixed")
        })
    }
}

impl VexDocument for OpenVex {
    fn filter(&self, vulns: Vec<DetectedVulnerability>) -> Vec<DetectedVulnerability> {
        vulns
            .into_iter()
            .filter(|v| !self.suppressed(&v.vulnerability_id))
            .collect()
    }
}
