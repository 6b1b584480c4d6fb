//! License classifier over well-known license file paths.
//!
//! Severity encodes the license category the way report filters expect
//! it: copyleft licenses rank higher than permissive ones.

use std::sync::LazyLock;

use regex::Regex;

use crate::analyzer::{AnalysisInput, AnalysisResult, AnalyzerType, FileAnalyzer};
use crate::error::Result;
use crate::options::{CancelToken, LicenseOptions};
use crate::types::{DetectedLicense, Severity};
use crate::walker::FileMeta;

struct LicensePattern {
    name: &'static str,
    severity: Severity,
    regex: &'static LazyLock<Regex>,
}

static RE_AGPL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"GNU AFFERO GENERAL PUBLIC LICENSE").unwrap());

static RE_GPL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)This program is free software.{0,200}General Public License").unwrap()
});

static RE_LGPL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"GNU LESSER GENERAL PUBLIC LICENSE").unwrap());

static RE_MIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Permission is hereby granted, free of charge").unwrap());

static RE_APACHE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Apache License,?\s+Version 2\.0").unwrap());

static RE_BSD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Redistribution and use in source and binary forms").unwrap()
});

static PATTERNS: &[LicensePattern] = &[
    LicensePattern {
        name: "AGPL-3.0",
        severity: Severity::Critical,
        regex: &RE_AGPL,
    },
    LicensePattern {
        name: "LGPL",
        severity: Severity::Medium,
        regex: &RE_LGPL,
    },
    LicensePattern {
        name: "GPL",
        severity: Severity::High,
        regex: &RE_GPL,
    },
    LicensePattern {
        name: "MIT",
        severity: Severity::Low,
        regex: &RE_MIT,
    },
    LicensePattern {
        name: "Apache-2.0",
        severity: Severity::Low,
        regex: &RE_APACHE,
    },
    LicensePattern {
        name: "BSD",
        severity: Severity::Low,
        regex: &RE_BSD,
    },
];

pub struct LicenseAnalyzer {
    full_scan: bool,
}

impl LicenseAnalyzer {
    pub fn new(opts: &LicenseOptions) -> Self {
        Self {
            full_scan: opts.full_scan,
        }
    }
}

impl FileAnalyzer for LicenseAnalyzer {
    fn analyzer_type(&self) -> AnalyzerType {
        AnalyzerType::License
    }

    fn version(&self) -> u32 {
        1
    }

    fn required(&self, file_path: &str, _: &FileMeta) -> bool {
        let name = file_path.rsplit('/').next().unwrap_or(file_path);
        let stem = name.split('.').next().unwrap_or(name).to_uppercase();
        if matches!(stem.as_str(), "LICENSE" | "LICENCE" | "COPYING" | "COPYRIGHT") {
            return true;
        }
        self.full_scan && (name.ends_with(".txt") || name.ends_with(".md"))
    }

    fn analyze(&self, _ctx: &CancelToken, input: AnalysisInput) -> Result<AnalysisResult> {
        let text = String::from_utf8_lossy(&input.content);
        for pattern in PATTERNS {
            if pattern.regex.is_match(&text) {
                return Ok(AnalysisResult {
                    licenses: vec![DetectedLicense {
                        name: pattern.name.to_string(),
                        severity: pattern.severity,
                        file_path: input.file_path,
                    }],
                    ..Default::default()
                });
            }
        }
        Ok(AnalysisResult::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn classify(content: &str) -> Option<DetectedLicense> {
        LicenseAnalyzer::new(&LicenseOptions::default())
            .analyze(
                &CancelToken::new(),
                AnalysisInput {
                    file_path: "usr/share/licenses/pkg/LICENSE".into(),
                    content: Arc::new(content.as_bytes().to_vec()),
                    options: Default::default(),
                },
            )
            .unwrap()
            .licenses
            .pop()
    }

    #[test]
    fn classifies_mit() {
        let license = classify(
            "MIT License\n\nPermission is hereby granted, free of charge, to any person...",
        )
        .unwrap();
        assert_eq!(license.name, "MIT");
        assert_eq!(license.severity, Severity::Low);
    }

    #[test]
    fn classifies_gpl_as_restricted() {
        let license = classify(
            "This program is free software: you can redistribute it under the \
             terms of the GNU General Public License",
        )
        .unwrap();
        assert_eq!(license.name, "GPL");
        assert_eq!(license.severity, Severity::High);
    }

    #[test]
    fn unknown_text_yields_nothing() {
        assert!(classify("all rights reserved, call a lawyer").is_none());
    }

    #[test]
    fn required_matches_license_paths_only_by_default() {
        let analyzer = LicenseAnalyzer::new(&LicenseOptions::default());
        let meta = FileMeta::default();
        assert!(analyzer.required("LICENSE", &meta));
        assert!(analyzer.required("vendor/pkg/COPYING", &meta));
        assert!(analyzer.required("LICENSE.md", &meta));
        assert!(!analyzer.required("README.md", &meta));

        let full = LicenseAnalyzer::new(&LicenseOptions { full_scan: true });
        assert!(full.required("README.md", &meta));
    }
}
