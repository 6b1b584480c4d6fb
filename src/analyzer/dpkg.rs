//! Debian/Ubuntu package analyzer: parses `var/lib/dpkg/status` and the
//! split `status.d` directory used by distroless images.

use crate::analyzer::{AnalysisInput, AnalysisResult, AnalyzerType, FileAnalyzer};
use crate::error::Result;
use crate::options::CancelToken;
use crate::types::{Package, PackageInfo};
use crate::walker::FileMeta;

const STATUS_FILE: &str = "var/lib/dpkg/status";
const STATUS_DIR: &str = "var/lib/dpkg/status.d/";

pub struct DpkgAnalyzer;

impl FileAnalyzer for DpkgAnalyzer {
    fn analyzer_type(&self) -> AnalyzerType {
        AnalyzerType::Dpkg
    }

    fn version(&self) -> u32 {
        1
    }

    fn required(&self, file_path: &str, _: &FileMeta) -> bool {
        file_path == STATUS_FILE
            || (file_path.starts_with(STATUS_DIR) && !file_path.ends_with(".md5sums"))
    }

    fn analyze(&self, _ctx: &CancelToken, input: AnalysisInput) -> Result<AnalysisResult> {
        let text = String::from_utf8_lossy(&input.content);
        // status.d fragments carry no Status field.
        let require_installed = input.file_path == STATUS_FILE;
        let packages = parse_dpkg_status(&text, require_installed);
        if packages.is_empty() {
            return Ok(AnalysisResult::default());
        }
        Ok(AnalysisResult {
            package_infos: vec![PackageInfo {
                file_path: input.file_path,
                packages,
            }],
            ..Default::default()
        })
    }
}

/// RFC-822-ish stanzas. Versions may carry an epoch (`1:2.36-9`);
/// `Source:` may carry an explicit version in parentheses.
fn parse_dpkg_status(contents: &str, require_installed: bool) -> Vec<Package> {
    let mut out = Vec::new();
    let mut current = Package::default();
    let mut installed = !require_installed;

    let mut flush = |pkg: &mut Package, installed: &mut bool| {
        if !pkg.name.is_empty() && !pkg.version.is_empty() && *installed {
            if pkg.src_name.is_empty() {
                pkg.src_name = pkg.name.clone();
            }
            if pkg.src_version.is_empty() {
                pkg.src_version = pkg.version.clone();
                pkg.src_epoch = pkg.epoch;
            }
            out.push(std::mem::take(pkg));
        } else {
            *pkg = Package::default();
        }
        *installed = !require_installed;
    };

    for line in contents.lines() {
        if line.is_empty() {
            flush(&mut current, &mut installed);
            continue;
        }
        if let Some(v) = line.strip_prefix("Package:") {
            current.name = v.trim().to_string();
        } else if let Some(v) = line.strip_prefix("Version:") {
            let (epoch, version) = split_epoch(v.trim());
            current.epoch = epoch;
            current.version = version;
        } else if let Some(v) = line.strip_prefix("Architecture:") {
            current.arch = v.trim().to_string();
        } else if let Some(v) = line.strip_prefix("Source:") {
            let v = v.trim();
            // "Source: openssl (1.1.1n-0+deb11u4)"
            match v.split_once('(') {
                Some((name, ver)) => {
                    current.src_name = name.trim().to_string();
                    let (epoch, version) = split_epoch(ver.trim_end_matches(')').trim());
                    current.src_epoch = epoch;
                    current.src_version = version;
                }
                None => current.src_name = v.to_string(),
            }
        } else if let Some(v) = line.strip_prefix("Status:") {
            installed = v.contains("install ok installed");
        }
    }
    flush(&mut current, &mut installed);
    out
}

fn split_epoch(version: &str) -> (u32, String) {
    match version.split_once(':') {
        Some((epoch, rest)) => match epoch.parse() {
            Ok(e) => (e, rest.to_string()),
            Err(_) => (0, version.to_string()),
        },
        None => (0, version.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const STATUS: &str = "\
Package: bash
Status: install ok installed
Version: 5.1-2+deb11u1
Architecture: amd64

Package: libssl1.1
Status: install ok installed
Source: openssl (1.1.1n-0+deb11u4)
Version: 1.1.1n-0+deb11u4
Architecture: amd64

Package: removed-pkg
Status: deinstall ok config-files
Version: 1.0-1
";

    fn analyze(path: &str, content: &str) -> AnalysisResult {
        DpkgAnalyzer
            .analyze(
                &CancelToken::new(),
                AnalysisInput {
                    file_path: path.into(),
                    content: Arc::new(content.as_bytes().to_vec()),
                    options: Default::default(),
                },
            )
            .unwrap()
    }

    #[test]
    fn parses_status_and_skips_removed() {
        let result = analyze(STATUS_FILE, STATUS);
        let pkgs = &result.package_infos[0].packages;
        assert_eq!(pkgs.len(), 2);
        assert_eq!(pkgs[0].name, "bash");
        assert_eq!(pkgs[0].src_name, "bash");
        assert_eq!(pkgs[1].name, "libssl1.1");
        assert_eq!(pkgs[1].src_name, "openssl");
        assert_eq!(pkgs[1].src_version, "1.1.1n-0+deb11u4");
    }

    #[test]
    fn epoch_is_split_from_version() {
        let result = analyze(
            STATUS_FILE,
            "Package: dash\nStatus: install ok installed\nVersion: 1:0.5.11\n",
        );
        let pkg = &result.package_infos[0].packages[0];
        assert_eq!(pkg.epoch, 1);
        assert_eq!(pkg.version, "0.5.11");
        assert_eq!(pkg.format_version(), "1:0.5.11");
    }

    #[test]
    fn status_d_fragments_need_no_status_field() {
        let result = analyze(
            "var/lib/dpkg/status.d/base",
            "Package: base-files\nVersion: 11.1\n",
        );
        assert_eq!(result.package_infos[0].packages.len(), 1);
    }
}
