//! OS identity analyzers.
//!
//! `os-release` is the authoritative source; `lsb-release` is a weaker
//! fallback that loses the confidence tie-break when both are present.

use crate::analyzer::{
    AnalysisInput, AnalysisResult, AnalyzerType, FileAnalyzer, OsFound, CONFIDENCE_HIGH,
    CONFIDENCE_LOW,
};
use crate::error::Result;
use crate::options::CancelToken;
use crate::types::{Os, OsFamily};
use crate::walker::FileMeta;

pub struct OsReleaseAnalyzer;

impl FileAnalyzer for OsReleaseAnalyzer {
    fn analyzer_type(&self) -> AnalyzerType {
        AnalyzerType::OsRelease
    }

    fn version(&self) -> u32 {
        1
    }

    fn required(&self, file_path: &str, _: &FileMeta) -> bool {
        file_path == "etc/os-release" || file_path == "usr/lib/os-release"
    }

    fn analyze(&self, _ctx: &CancelToken, input: AnalysisInput) -> Result<AnalysisResult> {
        let text = String::from_utf8_lossy(&input.content);
        let mut id = None;
        let mut version_id = None;
        for line in text.lines() {
            match line.split_once('=') {
                Some(("ID", v)) => id = Some(unquote(v)),
                Some(("VERSION_ID", v)) => version_id = Some(unquote(v)),
                _ => {}
            }
        }

        let os = id
            .as_deref()
            .and_then(OsFamily::from_os_release_id)
            .map(|family| Os {
                family,
                name: version_id.unwrap_or_default(),
                eosl: false,
            });

        Ok(AnalysisResult {
            os: os.map(|os| OsFound {
                os,
                confidence: CONFIDENCE_HIGH,
            }),
            ..Default::default()
        })
    }
}

pub struct LsbReleaseAnalyzer;

impl FileAnalyzer for LsbReleaseAnalyzer {
    fn analyzer_type(&self) -> AnalyzerType {
        AnalyzerType::LsbRelease
    }

    fn version(&self) -> u32 {
        1
    }

    fn required(&self, file_path: &str, _: &FileMeta) -> bool {
        file_path == "etc/lsb-release"
    }

    fn analyze(&self, _ctx: &CancelToken, input: AnalysisInput) -> Result<AnalysisResult> {
        let text = String::from_utf8_lossy(&input.content);
        let mut id = None;
        let mut release = None;
        for line in text.lines() {
            match line.split_once('=') {
                Some(("DISTRIB_ID", v)) => id = Some(unquote(v).to_lowercase()),
                Some(("DISTRIB_RELEASE", v)) => release = Some(unquote(v)),
                _ => {}
            }
        }

        let os = id
            .as_deref()
            .and_then(OsFamily::from_os_release_id)
            .map(|family| Os {
                family,
                name: release.unwrap_or_default(),
                eosl: false,
            });

        Ok(AnalysisResult {
            os: os.map(|os| OsFound {
                os,
                confidence: CONFIDENCE_LOW,
            }),
            ..Default::default()
        })
    }
}

fn unquote(v: &str) -> String {
    v.trim().trim_matches('"').trim_matches('\'').to_string()
}
