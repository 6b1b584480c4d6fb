//! Ignore-file parsing.
//!
//! One rule per line: `ID [field=value]...`, `#` comments and blank
//! lines skipped. The only recognized field is `exp:YYYY-MM-DD`; a rule
//! stays active through its expiry day and goes inactive strictly
//! after it.

use std::path::Path;

use chrono::{NaiveDate, Utc};
use tracing::{debug, warn};

/// Default ignore-file name looked up in the invocation directory.
pub const DEFAULT_IGNORE_FILE: &str = ".scanmoorignore";

/// Load active ignore IDs. A missing file is not an error; scans must
/// work without one.
pub fn load_ignore_file(path: &Path) -> Vec<String> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return Vec::new(),
    };
    debug!(path = %path.display(), "found ignore file");
    parse_ignore(&content, Utc::now().date_naive())
}

/// Parse ignore rules, keeping those active on `today`.
pub fn parse_ignore(content: &str, today: NaiveDate) -> Vec<String> {
    let mut ids = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let Some(id) = fields.next() else {
            continue;
        };

        let mut active = true;
        for field in fields {
            if let Some(date) = field.strip_prefix("exp:") {
                match NaiveDate::parse_from_str(date, "%Y-%m-%d") {
                    // Expired when today is strictly past the date.
                    Ok(exp) => active = today <= exp,
                    Err(e) => {
                        warn!(line = %line, error = %e, "bad expiry date, rule skipped");
                        active = false;
                    }
                }
            }
        }
        if active {
            ids.push(id.to_string());
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parses_ids_comments_and_expiry() {
        let content = "\
CVE-A
CVE-B exp:2000-01-01
# comment
CVE-C exp:2999-01-01
";
        let ids = parse_ignore(content, day(2024, 1, 1));
        assert_eq!(ids, vec!["CVE-A".to_string(), "CVE-C".to_string()]);
    }

    #[test]
    fn rule_is_active_on_its_expiry_day() {
        let content = "CVE-X exp:2024-06-01\n";
        assert_eq!(parse_ignore(content, day(2024, 6, 1)).len(), 1);
        assert_eq!(parse_ignore(content, day(2024, 6, 2)).len(), 0);
        assert_eq!(parse_ignore(content, day(2024, 5, 31)).len(), 1);
    }

    #[test]
    fn malformed_expiry_disables_the_rule() {
        let content = "CVE-X exp:not-a-date\nCVE-Y\n";
        assert_eq!(parse_ignore(content, day(2024, 1, 1)), vec!["CVE-Y".to_string()]);
    }

    #[test]
    fn missing_file_is_empty() {
        assert!(load_ignore_file(Path::new("/nonexistent/.scanmoorignore")).is_empty());
    }
}
