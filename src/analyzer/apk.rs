//! Alpine package analyzer: parses `lib/apk/db/installed`.

use crate::analyzer::{AnalysisInput, AnalysisResult, AnalyzerType, FileAnalyzer};
use crate::error::Result;
use crate::options::CancelToken;
use crate::types::{Package, PackageInfo};
use crate::walker::FileMeta;

const INSTALLED_DB: &str = "lib/apk/db/installed";

pub struct ApkAnalyzer;

impl FileAnalyzer for ApkAnalyzer {
    fn analyzer_type(&self) -> AnalyzerType {
        AnalyzerType::Apk
    }

    fn version(&self) -> u32 {
        1
    }

    fn required(&self, file_path: &str, _: &FileMeta) -> bool {
        file_path == INSTALLED_DB
    }

    fn analyze(&self, _ctx: &CancelToken, input: AnalysisInput) -> Result<AnalysisResult> {
        let text = String::from_utf8_lossy(&input.content);
        let packages = parse_apk_installed(&text);
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

/// The installed DB is a sequence of stanzas separated by blank lines.
/// `P:` name, `V:` version, `A:` arch, `o:` origin (source) package.
fn parse_apk_installed(contents: &str) -> Vec<Package> {
    let mut out = Vec::new();
    let mut current = Package::default();

    let mut flush = |pkg: &mut Package| {
        if !pkg.name.is_empty() && !pkg.version.is_empty() {
            if pkg.src_name.is_empty() {
                pkg.src_name = pkg.name.clone();
            }
            if pkg.src_version.is_empty() {
                pkg.src_version = pkg.version.clone();
            }
            out.push(std::mem::take(pkg));
        } else {
            *pkg = Package::default();
        }
    };

    for line in contents.lines() {
        if line.is_empty() {
            flush(&mut current);
            continue;
        }
        match line.split_once(':') {
            Some(("P", v)) => current.name = v.trim().to_string(),
            Some(("V", v)) => current.version = v.trim().to_string(),
            Some(("A", v)) => current.arch = v.trim().to_string(),
            Some(("o", v)) => current.src_name = v.trim().to_string(),
            _ => {}
        }
    }
    flush(&mut current);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const INSTALLED: &str = "\
P:musl
V:1.2.3-r4
A:x86_64

P:libssl3
V:3.0.8-r3
A:x86_64
o:openssl

P:broken-no-version
";

    #[test]
    fn parses_installed_db() {
        let analyzer = ApkAnalyzer;
        let result = analyzer
            .analyze(
                &CancelToken::new(),
                AnalysisInput {
                    file_path: INSTALLED_DB.into(),
                    content: Arc::new(INSTALLED.as_bytes().to_vec()),
                    options: Default::default(),
                },
            )
            .unwrap();

        let info = &result.package_infos[0];
        assert_eq!(info.file_path, INSTALLED_DB);
        assert_eq!(info.packages.len(), 2);

        let musl = &info.packages[0];
        assert_eq!(musl.name, "musl");
        assert_eq!(musl.version, "1.2.3-r4");
        assert_eq!(musl.src_name, "musl");

        let ssl = &info.packages[1];
        assert_eq!(ssl.name, "libssl3");
        assert_eq!(ssl.src_name, "openssl");
        assert_eq!(ssl.arch, "x86_64");
    }

    #[test]
    fn only_matches_the_installed_db_path() {
        let analyzer = ApkAnalyzer;
        assert!(analyzer.required(INSTALLED_DB, &FileMeta::default()));
        assert!(!analyzer.required("lib/apk/db/scripts", &FileMeta::default()));
    }
}
