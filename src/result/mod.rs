//! Result reconciliation: VEX suppression, severity filtering,
//! ignore rules, deduplication, policy evaluation and ordering.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::types::{
    DetectedMisconfiguration, DetectedVulnerability, MisconfStatus, MisconfSummary, Report,
    ScanResult, Severity,
};

pub mod ignore;
pub mod policy;
pub mod vex;

use policy::Policy;
use vex::VexDocument;

pub struct FilterOptions {
    pub severities: Vec<Severity>,
    pub ignore_unfixed: bool,
    pub include_non_failures: bool,
    pub ignore_file: PathBuf,
    pub policy_file: Option<PathBuf>,
    pub ignored_licenses: Vec<String>,
    pub vex: Option<Box<dyn VexDocument>>,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            severities: Severity::all(),
            ignore_unfixed: false,
            include_non_failures: false,
            ignore_file: PathBuf::from(ignore::DEFAULT_IGNORE_FILE),
            policy_file: None,
            ignored_licenses: Vec::new(),
            vex: None,
        }
    }
}

/// Filter the whole report in place.
pub fn filter_report(report: &mut Report, opts: &FilterOptions) -> Result<()> {
    // VEX statements apply before anything else.
    if let Some(vex) = &opts.vex {
        for result in &mut report.results {
            if result.vulnerabilities.is_empty() {
                continue;
            }
            result.vulnerabilities = vex.filter(std::mem::take(&mut result.vulnerabilities));
        }
    }

    let ignored_ids = ignore::load_ignore_file(&opts.ignore_file);
    let policy = match &opts.policy_file {
        Some(path) => Some(Policy::load(path)?),
        None => None,
    };

    for result in &mut report.results {
        filter_result(result, opts, &ignored_ids, policy.as_ref())?;
    }
    Ok(())
}

/// Filter one result in place.
pub fn filter_result(
    result: &mut ScanResult,
    opts: &FilterOptions,
    ignored_ids: &[String],
    policy: Option<&Policy>,
) -> Result<()> {
    let mut vulns = filter_vulnerabilities(
        std::mem::take(&mut result.vulnerabilities),
        &opts.severities,
        opts.ignore_unfixed,
        ignored_ids,
    );
    let (summary, mut misconfs) = filter_misconfigurations(
        std::mem::take(&mut result.misconfigurations),
        &opts.severities,
        opts.include_non_failures,
        ignored_ids,
    );

    result.secrets.retain(|secret| {
        opts.severities.contains(&secret.severity) && !ignored_ids.contains(&secret.rule_id)
    });
    result.licenses.retain(|license| {
        opts.severities.contains(&license.severity)
            && !opts.ignored_licenses.contains(&license.name)
    });

    if let Some(policy) = policy {
        vulns = apply_policy(vulns, policy)?;
        misconfs = apply_policy(misconfs, policy)?;
    }

    // Severity descending, IDs ascending within a severity.
    vulns.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.vulnerability_id.cmp(&b.vulnerability_id))
    });

    result.vulnerabilities = vulns;
    result.misconfigurations = misconfs;
    result.misconf_summary = summary;
    Ok(())
}

fn filter_vulnerabilities(
    vulns: Vec<DetectedVulnerability>,
    severities: &[Severity],
    ignore_unfixed: bool,
    ignored_ids: &[String],
) -> Vec<DetectedVulnerability> {
    let mut unique: HashMap<(String, String, String, String), DetectedVulnerability> =
        HashMap::new();

    for vuln in vulns {
        // Blank severities surface as Unknown instead of disappearing.
        if !severities.contains(&vuln.severity) {
            continue;
        }
        if ignore_unfixed && vuln.fixed_version.is_empty() {
            continue;
        }
        if ignored_ids.contains(&vuln.vulnerability_id) {
            continue;
        }

        let key = (
            vuln.vulnerability_id.clone(),
            vuln.pkg_name.clone(),
            vuln.installed_version.clone(),
            vuln.pkg_path.clone(),
        );
        match unique.get(&key) {
            // The same finding from several layers: prefer the record
            // with the greater fixed version, so a patched advisory
            // supersedes its unpatched twin. The comparison is
            // deliberately on the raw strings.
            Some(existing) if existing.fixed_version >= vuln.fixed_version => {}
            _ => {
                unique.insert(key, vuln);
            }
        }
    }
    unique.into_values().collect()
}

fn filter_misconfigurations(
    misconfs: Vec<DetectedMisconfiguration>,
    severities: &[Severity],
    include_non_failures: bool,
    ignored_ids: &[String],
) -> (Option<MisconfSummary>, Vec<DetectedMisconfiguration>) {
    let mut summary = MisconfSummary::default();
    let mut filtered = Vec::new();

    for misconf in misconfs {
        if !severities.contains(&misconf.severity) {
            continue;
        }
        if ignored_ids.contains(&misconf.id) || ignored_ids.contains(&misconf.avd_id) {
            continue;
        }

        // Counted whether or not they are reported.
        match misconf.status {
            MisconfStatus::Failure => summary.failures += 1,
            MisconfStatus::Passed => summary.successes += 1,
            MisconfStatus::Exception => summary.exceptions += 1,
        }

        if misconf.status != MisconfStatus::Failure && !include_non_failures {
            continue;
        }
        filtered.push(misconf);
    }

    if summary.is_empty() {
        (None, Vec::new())
    } else {
        (Some(summary), filtered)
    }
}

fn apply_policy<T: serde::Serialize>(findings: Vec<T>, policy: &Policy) -> Result<Vec<T>> {
    let mut kept = Vec::new();
    for finding in findings {
        let as_json = serde_json::to_value(&finding).map_err(Error::Json)?;
        if !policy.evaluate(&as_json)? {
            kept.push(finding);
        }
    }
    Ok(kept)
}
