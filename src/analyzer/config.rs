//! Built-in misconfiguration checks.
//!
//! Two config families are covered: Dockerfiles (fed with text
//! reconstructed from image history, see [`crate::analyzer::imgconf`])
//! and JSON-encoded Kubernetes manifests staged from the walked
//! filesystem. Every check emits `Passed` as well as `Failure`, so
//! the reconciler can count successes and honor
//! `include_non_failures`.

use serde_json::Value;
use tracing::debug;

use crate::analyzer::{AnalysisResult, AnalyzerType, PostAnalysisInput, PostAnalyzer};
use crate::error::Result;
use crate::options::{CancelToken, MisconfOptions};
use crate::types::{DetectedMisconfiguration, MisconfStatus, Severity};
use crate::walker::FileMeta;

// ─── Dockerfile checks ───────────────────────────────────────────────

struct DockerfileCheck {
    id: &'static str,
    avd_id: &'static str,
    title: &'static str,
    severity: Severity,
    /// Returns a failure message, or None when the check passes.
    run: fn(&[&str]) -> Option<String>,
}

const DOCKERFILE_CHECKS: &[DockerfileCheck] = &[
    DockerfileCheck {
        id: "DS002",
        avd_id: "AVD-DS-0002",
        title: "Image user should not be root",
        severity: Severity::High,
        run: check_root_user,
    },
    DockerfileCheck {
        id: "DS005",
        avd_id: "AVD-DS-0005",
        title: "ADD instead of COPY",
        severity: Severity::Low,
        run: check_add_usage,
    },
    DockerfileCheck {
        id: "DS013",
        avd_id: "AVD-DS-0013",
        title: "RUN cd instead of WORKDIR",
        severity: Severity::Medium,
        run: check_run_cd,
    },
    DockerfileCheck {
        id: "DS026",
        avd_id: "AVD-DS-0026",
        title: "No HEALTHCHECK defined",
        severity: Severity::Low,
        run: check_healthcheck,
    },
];

fn check_root_user(lines: &[&str]) -> Option<String> {
    let last_user = lines
        .iter()
        .filter_map(|l| l.strip_prefix("USER "))
        .last()
        .map(str::trim);
    match last_user {
        None => Some("no USER instruction, image runs as root".to_string()),
        Some("root") | Some("0") => Some("last USER instruction is root".to_string()),
        Some(_) => None,
    }
}

fn check_add_usage(lines: &[&str]) -> Option<String> {
    // `ADD file:` entries are rootfs imports written by the builder,
    // not user instructions.
    lines
        .iter()
        .find(|l| {
            l.starts_with("ADD ") && !l.starts_with("ADD file:") && !l.starts_with("ADD multi:")
        })
        .map(|l| format!("consider COPY instead of `{l}`"))
}

fn check_run_cd(lines: &[&str]) -> Option<String> {
    lines
        .iter()
        .find(|l| l.starts_with("RUN ") && l.split("&&").any(|part| part.trim().starts_with("cd ")))
        .map(|l| format!("use WORKDIR instead of `{l}`"))
}

fn check_healthcheck(lines: &[&str]) -> Option<String> {
    if lines.iter().any(|l| l.starts_with("HEALTHCHECK")) {
        None
    } else {
        Some("add a HEALTHCHECK instruction".to_string())
    }
}

/// Run every Dockerfile check over reconstructed Dockerfile text.
pub fn scan_dockerfile(
    file_path: &str,
    text: &str,
    opts: &MisconfOptions,
) -> Vec<DetectedMisconfiguration> {
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    let mut out = Vec::new();
    for check in DOCKERFILE_CHECKS {
        if opts.disabled_checks.iter().any(|d| d == check.id) {
            continue;
        }
        let (status, message) = match (check.run)(&lines) {
            Some(message) => (MisconfStatus::Failure, message),
            None => (MisconfStatus::Passed, String::new()),
        };
        out.push(DetectedMisconfiguration {
            id: check.id.to_string(),
            avd_id: check.avd_id.to_string(),
            config_type: "dockerfile".to_string(),
            title: check.title.to_string(),
            message,
            severity: check.severity,
            status,
            file_path: file_path.to_string(),
            layer: Default::default(),
        });
    }
    out
}

// ─── Kubernetes manifest checks ──────────────────────────────────────

pub struct K8sConfigAnalyzer {
    opts: MisconfOptions,
}

impl K8sConfigAnalyzer {
    pub fn new(opts: &MisconfOptions) -> Self {
        Self { opts: opts.clone() }
    }
}

impl PostAnalyzer for K8sConfigAnalyzer {
    fn analyzer_type(&self) -> AnalyzerType {
        AnalyzerType::K8sConfig
    }

    fn version(&self) -> u32 {
        1
    }

    fn required(&self, file_path: &str, _: &FileMeta) -> bool {
        file_path.ends_with(".json")
    }

    fn post_analyze(&self, ctx: &CancelToken, input: PostAnalysisInput) -> Result<AnalysisResult> {
        let mut misconfigurations = Vec::new();
        let paths: Vec<String> = input.fs.files().map(|(p, _)| p.to_string()).collect();
        for path in paths {
            ctx.check()?;
            let raw = input.fs.read(&path)?;
            let manifest: Value = match serde_json::from_slice(&raw) {
                Ok(v) => v,
                Err(e) => {
                    debug!(file = %path, error = %e, "not a JSON manifest, skipped");
                    continue;
                }
            };
            // Only treat documents that look like Kubernetes objects.
            if manifest.get("apiVersion").is_none() || manifest.get("kind").is_none() {
                continue;
            }
            misconfigurations.extend(scan_k8s_manifest(&path, &manifest, &self.opts));
        }
        Ok(AnalysisResult {
            misconfigurations,
            ..Default::default()
        })
    }
}

fn scan_k8s_manifest(
    file_path: &str,
    manifest: &Value,
    opts: &MisconfOptions,
) -> Vec<DetectedMisconfiguration> {
    let containers = find_containers(manifest);
    let mut out = Vec::new();

    let mut push = |id: &str, avd_id: &str, title: &str, severity, failure: Option<String>| {
        if opts.disabled_checks.iter().any(|d| d == id) {
            return;
        }
        let (status, message) = match failure {
            Some(message) => (MisconfStatus::Failure, message),
            None => (MisconfStatus::Passed, String::new()),
        };
        out.push(DetectedMisconfiguration {
            id: id.to_string(),
            avd_id: avd_id.to_string(),
            config_type: "kubernetes".to_string(),
            title: title.to_string(),
            message,
            severity,
            status,
            file_path: file_path.to_string(),
            layer: Default::default(),
        });
    };

    let privileged = containers.iter().find(|c| {
        c.pointer("/securityContext/privileged")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    });
    push(
        "KSV017",
        "AVD-KSV-0017",
        "Privileged container",
        Severity::High,
        privileged.map(|c| format!("container `{}` is privileged", container_name(c))),
    );

    let running_as_root = containers.iter().find(|c| {
        !c.pointer("/securityContext/runAsNonRoot")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    });
    push(
        "KSV012",
        "AVD-KSV-0012",
        "Containers must not run as root",
        Severity::Medium,
        running_as_root.map(|c| {
            format!(
                "container `{}` does not set runAsNonRoot",
                container_name(c)
            )
        }),
    );

    out
}

fn container_name(container: &Value) -> String {
    container
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("unnamed")
        .to_string()
}

/// Containers from a bare pod spec or a workload template.
fn find_containers(manifest: &Value) -> Vec<&Value> {
    for pointer in ["/spec/containers", "/spec/template/spec/containers"] {
        if let Some(containers) = manifest.pointer(pointer).and_then(Value::as_array) {
            return containers.iter().collect();
        }
    }
    Vec::new()
}
