//! npm lockfile post-analyzer.
//!
//! Parses `package-lock.json` (v1 nested `dependencies` and v2+ flat
//! `packages`) and records, for every package, the line span of its
//! entry in the lockfile. Spans come from a single JSON pre-pass that
//! maps each object's key path to its start and end lines, so the same
//! package appearing at several spots yields several locations on one
//! entry.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use tracing::debug;

use crate::analyzer::{
    AnalysisResult, AnalyzerType, PostAnalysisInput, PostAnalyzer,
};
use crate::error::{Error, Result};
use crate::options::CancelToken;
use crate::types::{Application, Location, Package};
use crate::walker::FileMeta;

const LOCK_FILE: &str = "package-lock.json";

pub struct NpmLockAnalyzer;

impl PostAnalyzer for NpmLockAnalyzer {
    fn analyzer_type(&self) -> AnalyzerType {
        AnalyzerType::Npm
    }

    fn version(&self) -> u32 {
        1
    }

    fn required(&self, file_path: &str, _: &FileMeta) -> bool {
        let name = file_path.rsplit('/').next().unwrap_or(file_path);
        name == LOCK_FILE && !file_path.contains("node_modules/")
    }

    fn post_analyze(&self, ctx: &CancelToken, input: PostAnalysisInput) -> Result<AnalysisResult> {
        let mut applications = Vec::new();
        let paths: Vec<String> = input.fs.files().map(|(p, _)| p.to_string()).collect();
        for path in paths {
            ctx.check()?;
            let raw = input.fs.read(&path)?;
            let text = String::from_utf8_lossy(&raw);
            match parse_lockfile(&text) {
                Ok(packages) if !packages.is_empty() => applications.push(Application {
                    app_type: "npm".to_string(),
                    file_path: path,
                    packages,
                }),
                Ok(_) => {}
                Err(e) => debug!(file = %path, error = %e, "unparsable lockfile skipped"),
            }
        }
        Ok(AnalysisResult {
            applications,
            ..Default::default()
        })
    }
}

/// Parse one lockfile into packages with line locations, unique by
/// `(name, version)`.
pub fn parse_lockfile(text: &str) -> Result<Vec<Package>> {
    let root: Value = serde_json::from_str(text)
        .map_err(|e| Error::PostAnalysis(format!("lockfile json: {e}")))?;
    let spans = object_spans(text);

    // (name, version) -> (indirect, locations)
    let mut found: BTreeMap<(String, String), (bool, Vec<Location>)> = BTreeMap::new();
    let mut record = |name: &str, version: &str, indirect: bool, path: &str| {
        let entry = found
            .entry((name.to_string(), version.to_string()))
            .or_insert((indirect, Vec::new()));
        entry.0 = entry.0 && indirect;
        if let Some(&(start_line, end_line)) = spans.get(path) {
            entry.1.push(Location {
                start_line,
                end_line,
            });
        }
    };

    if let Some(packages) = root.get("packages").and_then(Value::as_object) {
        // v2/v3: flat map keyed by install path.
        for (key, value) in packages {
            if key.is_empty() {
                continue;
            }
            let Some(version) = value.get("version").and_then(Value::as_str) else {
                continue;
            };
            let name = match key.rfind("node_modules/") {
                Some(idx) => &key[idx + "node_modules/".len()..],
                None => key.as_str(),
            };
            let indirect = key.matches("node_modules/").count() > 1;
            record(name, version, indirect, &format!("packages/{key}"));
        }
    } else if let Some(deps) = root.get("dependencies").and_then(Value::as_object) {
        // v1: nested dependency tree.
        walk_v1(deps, "dependencies", 1, &mut record);
    }

    let mut packages: Vec<Package> = found
        .into_iter()
        .map(|((name, version), (indirect, mut locations))| {
            locations.sort();
            locations.dedup();
            Package {
                name,
                version,
                indirect,
                locations,
                ..Default::default()
            }
        })
        .collect();
    packages.sort_by(|a, b| (&a.name, &a.version).cmp(&(&b.name, &b.version)));
    Ok(packages)
}

fn walk_v1(
    deps: &serde_json::Map<String, Value>,
    prefix: &str,
    depth: u32,
    record: &mut impl FnMut(&str, &str, bool, &str),
) {
    for (name, value) in deps {
        let path = format!("{prefix}/{name}");
        if let Some(version) = value.get("version").and_then(Value::as_str) {
            record(name, version, depth > 1, &path);
        }
        if let Some(nested) = value.get("dependencies").and_then(Value::as_object) {
            walk_v1(nested, &format!("{path}/dependencies"), depth + 1, record);
        }
    }
}

// ─── JSON object spans ───────────────────────────────────────────────

/// Map every JSON object to `(start_line, end_line)`, keyed by the
/// slash-joined object-key path from the root. Arrays are traversed but
/// contribute nothing to paths; lockfiles keep packages in objects.
fn object_spans(text: &str) -> HashMap<String, (u32, u32)> {
    #[derive(Clone, Copy, PartialEq)]
    enum Frame {
        Object,
        Array,
    }

    let mut spans = HashMap::new();
    let mut line: u32 = 1;
    let mut in_string = false;
    let mut escaped = false;
    let mut current_string = String::new();
    let mut last_string: Option<String> = None;
    let mut pending_key: Option<String> = None;
    // Key path of enclosing objects; `starts` pairs with `frames`.
    let mut path: Vec<String> = Vec::new();
    let mut frames: Vec<(Frame, Option<usize>, u32)> = Vec::new(); // (kind, path index, start line)

    for c in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
                last_string = Some(std::mem::take(&mut current_string));
            } else {
                if c == '\n' {
                    line += 1;
                }
                current_string.push(c);
            }
            continue;
        }
        match c {
            '\n' => line += 1,
            '"' => {
                in_string = true;
                current_string.clear();
            }
            ':' => pending_key = last_string.take(),
            '{' => {
                let path_idx = pending_key.take().map(|key| {
                    path.push(key);
                    path.len() - 1
                });
                frames.push((Frame::Object, path_idx, line));
            }
            '}' => {
                if let Some((_, path_idx, start)) = frames.pop() {
                    if path_idx.is_some() {
                        spans.insert(path.join("/"), (start, line));
                        path.pop();
                    }
                }
            }
            '[' => {
                pending_key = None;
                frames.push((Frame::Array, None, line));
            }
            ']' => {
                frames.pop();
            }
            _ => {}
        }
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCK_V1: &str = r#"{
  "name": "demo",
  "lockfileVersion": 1,
  "dependencies": {
    "debug": {
      "version": "2.6.9",
      "requires": {
        "ms": "2.0.0"
      },
      "dependencies": {
        "ms": {
          "version": "2.0.0"
        }
      }
    },
    "ms": {
      "version": "2.1.1"
    }
  }
}"#;

    #[test]
    fn v1_distinguishes_same_name_by_version() {
        let packages = parse_lockfile(LOCK_V1).unwrap();
        let ms: Vec<_> = packages.iter().filter(|p| p.name == "ms").collect();
        assert_eq!(ms.len(), 2);
        assert_eq!(ms[0].version, "2.0.0");
        assert_eq!(ms[1].version, "2.1.1");
        // Both carry source spans.
        assert_eq!(ms[0].locations, vec![Location { start_line: 11, end_line: 13 }]);
        assert_eq!(ms[1].locations, vec![Location { start_line: 16, end_line: 18 }]);
    }

    #[test]
    fn v1_marks_nested_dependencies_indirect() {
        let packages = parse_lockfile(LOCK_V1).unwrap();
        let nested_ms = packages
            .iter()
            .find(|p| p.name == "ms" && p.version == "2.0.0")
            .unwrap();
        let top_ms = packages
            .iter()
            .find(|p| p.name == "ms" && p.version == "2.1.1")
            .unwrap();
        assert!(nested_ms.indirect);
        assert!(!top_ms.indirect);
    }

    const LOCK_V2: &str = r#"{
  "name": "demo",
  "lockfileVersion": 2,
  "packages": {
    "": {
      "name": "demo"
    },
    "node_modules/ms": {
      "version": "2.1.1"
    },
    "node_modules/debug": {
      "version": "2.6.9",
      "dependencies": {
        "ms": "2.0.0"
      }
    },
    "node_modules/debug/node_modules/ms": {
      "version": "2.0.0"
    }
  }
}"#;

    #[test]
    fn v2_flat_packages_with_locations() {
        let packages = parse_lockfile(LOCK_V2).unwrap();
        assert_eq!(packages.len(), 3);
        let ms: Vec<_> = packages.iter().filter(|p| p.name == "ms").collect();
        assert_eq!(ms.len(), 2);
        let nested = ms.iter().find(|p| p.version == "2.0.0").unwrap();
        assert!(nested.indirect);
        assert_eq!(nested.locations, vec![Location { start_line: 17, end_line: 19 }]);
        let top = ms.iter().find(|p| p.version == "2.1.1").unwrap();
        assert!(!top.indirect);
        assert_eq!(top.locations, vec![Location { start_line: 8, end_line: 10 }]);
    }

    #[test]
    fn duplicate_entries_merge_locations() {
        // The same (name, version) under two parents: one package, two spans.
        let text = r#"{
  "dependencies": {
    "a": {
      "version": "1.0.0",
      "dependencies": {
        "ms": { "version": "2.0.0" }
      }
    },
    "b": {
      "version": "1.0.0",
      "dependencies": {
        "ms": { "version": "2.0.0" }
      }
    }
  }
}"#;
        let packages = parse_lockfile(text).unwrap();
        let ms = packages.iter().find(|p| p.name == "ms").unwrap();
        assert_eq!(ms.locations.len(), 2);
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_spans() {
        let text = r#"{
  "dependencies": {
    "weird": {
      "version": "1.0.0",
      "resolved": "https://host/path?q={strange}\"quoted\""
    }
  }
}"#;
        let packages = parse_lockfile(text).unwrap();
        assert_eq!(packages[0].locations, vec![Location { start_line: 3, end_line: 6 }]);
    }

    #[test]
    fn required_ignores_vendored_lockfiles() {
        let analyzer = NpmLockAnalyzer;
        let meta = FileMeta::default();
        assert!(analyzer.required("package-lock.json", &meta));
        assert!(analyzer.required("srv/app/package-lock.json", &meta));
        assert!(!analyzer.required("srv/node_modules/x/package-lock.json", &meta));
        assert!(!analyzer.required("package.json", &meta));
    }
}
