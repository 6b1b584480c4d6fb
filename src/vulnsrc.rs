//! Advisory source.
//!
//! Drivers look up advisories by `(family, release, package)`; how the
//! advisories got there is not this crate's concern. The shipped
//! implementation reads a pre-built SQLite database; tests and embedders
//! can supply [`MemoryVulnSource`] or their own.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection, OpenFlags};

use crate::error::{Error, Result};
use crate::types::{DataSource, Severity};

/// Current schema version, checked against the `metadata` table.
const SCHEMA_VERSION: &str = "1";

/// One advisory row: a vulnerability affecting a package, optionally
/// fixed at some version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Advisory {
    pub vulnerability_id: String,
    /// Empty when no fixed version exists (unpatched).
    pub fixed_version: String,
    pub severity: Severity,
    pub data_source: Option<DataSource>,
}

pub trait VulnSource: Send + Sync {
    /// Advisories applicable to `pkg_name` on `family`/`release`.
    /// `release` is empty for language ecosystems.
    fn advisories(&self, family: &str, release: &str, pkg_name: &str) -> Result<Vec<Advisory>>;
}

// ─── SQLite-backed source ────────────────────────────────────────────

/// Default advisory DB path: `~/.scanmoor/db/scanmoor.db`, overridable
/// with `SCANMOOR_DB`.
pub fn default_db_path() -> PathBuf {
    if let Ok(p) = std::env::var("SCANMOOR_DB") {
        return PathBuf::from(p);
    }
    let home = std::env::var_os("HOME").unwrap_or_default();
    PathBuf::from(home)
        .join(".scanmoor")
        .join("db")
        .join("scanmoor.db")
}

const CREATE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS metadata (key TEXT PRIMARY KEY, value TEXT NOT NULL);

CREATE TABLE IF NOT EXISTS advisories (
    family TEXT NOT NULL,
    release TEXT NOT NULL,
    package TEXT NOT NULL,
    vuln_id TEXT NOT NULL,
    fixed_version TEXT NOT NULL DEFAULT '',
    severity TEXT NOT NULL DEFAULT 'UNKNOWN',
    source_id TEXT NOT NULL DEFAULT '',
    source_name TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (family, release, package, vuln_id)
);
CREATE INDEX IF NOT EXISTS idx_advisories_pkg ON advisories (family, release, package);
"#;

/// Read-only advisory lookups against a local SQLite database.
/// rusqlite connections are not Sync, so the connection sits behind a
/// mutex; lookups are short point queries.
pub struct SqliteVulnSource {
    conn: Mutex<Connection>,
}

impl SqliteVulnSource {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| Error::AdvisorySource(format!("{}: {e}", path.display())))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an empty database with the current schema. Used by tests
    /// and by whatever tool populates the DB.
    pub fn create(path: &Path) -> Result<Connection> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(CREATE_SCHEMA)?;
        conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?1)",
            params![SCHEMA_VERSION],
        )?;
        Ok(conn)
    }

    /// Insert one advisory row; a convenience for DB builders.
    pub fn insert_advisory(
        conn: &Connection,
        family: &str,
        release: &str,
        package: &str,
        advisory: &Advisory,
    ) -> Result<()> {
        let (source_id, source_name) = advisory
            .data_source
            .as_ref()
            .map(|d| (d.id.as_str(), d.name.as_str()))
            .unwrap_or(("", ""));
        conn.execute(
            "INSERT OR REPLACE INTO advisories
             (family, release, package, vuln_id, fixed_version, severity, source_id, source_name)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                family,
                release,
                package,
                advisory.vulnerability_id,
                advisory.fixed_version,
                advisory.severity.to_string(),
                source_id,
                source_name,
            ],
        )?;
        Ok(())
    }

    pub fn schema_version(&self) -> Option<String> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT value FROM metadata WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .ok()
    }
}

impl VulnSource for SqliteVulnSource {
    fn advisories(&self, family: &str, release: &str, pkg_name: &str) -> Result<Vec<Advisory>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT vuln_id, fixed_version, severity, source_id, source_name
                 FROM advisories WHERE family = ?1 AND release = ?2 AND package = ?3
                 ORDER BY vuln_id",
            )
            .map_err(|e| Error::AdvisorySource(e.to_string()))?;
        let rows = stmt
            .query_map(params![family, release, pkg_name], |row| {
                let source_id: String = row.get(3)?;
                let source_name: String = row.get(4)?;
                Ok(Advisory {
                    vulnerability_id: row.get(0)?,
                    fixed_version: row.get(1)?,
                    severity: Severity::parse(&row.get::<_, String>(2)?).unwrap_or_default(),
                    data_source: if source_id.is_empty() {
                        None
                    } else {
                        Some(DataSource {
                            id: source_id,
                            name: source_name,
                        })
                    },
                })
            })
            .map_err(|e| Error::AdvisorySource(e.to_string()))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::AdvisorySource(e.to_string()))
    }
}

// ─── In-memory source ────────────────────────────────────────────────

/// Advisory fixture store keyed by `(family, release, package)`.
#[derive(Default)]
pub struct MemoryVulnSource {
    advisories: HashMap<(String, String, String), Vec<Advisory>>,
}

impl MemoryVulnSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, family: &str, release: &str, package: &str, advisory: Advisory) {
        self.advisories
            .entry((family.to_string(), release.to_string(), package.to_string()))
            .or_default()
            .push(advisory);
    }
}

impl VulnSource for MemoryVulnSource {
    fn advisories(&self, family: &str, release: &str, pkg_name: &str) -> Result<Vec<Advisory>> {
        Ok(self
            .advisories
            .get(&(
                family.to_string(),
                release.to_string(),
                pkg_name.to_string(),
            ))
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("adv.db");
        let conn = SqliteVulnSource::create(&path).unwrap();
        SqliteVulnSource::insert_advisory(
            &conn,
            "cbl-mariner",
            "2.0",
            "pkgA",
            &Advisory {
                vulnerability_id: "CVE-2024-0001".into(),
                fixed_version: "1.2.3-1".into(),
                severity: Severity::High,
                data_source: Some(DataSource {
                    id: "cbl-mariner".into(),
                    name: "CBL-Mariner Vulnerability Data".into(),
                }),
            },
        )
        .unwrap();
        drop(conn);

        let src = SqliteVulnSource::open(&path).unwrap();
        assert_eq!(src.schema_version().as_deref(), Some(SCHEMA_VERSION));

        let advisories = src.advisories("cbl-mariner", "2.0", "pkgA").unwrap();
        assert_eq!(advisories.len(), 1);
        assert_eq!(advisories[0].vulnerability_id, "CVE-2024-0001");
        assert_eq!(advisories[0].severity, Severity::High);
        assert!(src.advisories("cbl-mariner", "2.0", "other").unwrap().is_empty());
    }
}
