//! RPM package analyzer.
//!
//! Reads the SQLite rpmdb backend (`rpmdb.sqlite`) and decodes the
//! package header blobs directly: each row in `Packages` is a header
//! image (entry count, store size, 16-byte index entries, data store),
//! from which the NEVRA tags and the source RPM are extracted.

use std::io::Write;

use rusqlite::{Connection, OpenFlags};
use tracing::debug;

use crate::analyzer::{AnalysisInput, AnalysisResult, AnalyzerType, FileAnalyzer};
use crate::error::{Error, Result};
use crate::options::CancelToken;
use crate::types::{Package, PackageInfo};
use crate::walker::FileMeta;

const DB_PATHS: &[&str] = &[
    "var/lib/rpm/rpmdb.sqlite",
    "usr/lib/sysimage/rpm/rpmdb.sqlite",
];

// Header tag numbers, from the rpm tag table.
const TAG_NAME: u32 = 1000;
const TAG_VERSION: u32 = 1001;
const TAG_RELEASE: u32 = 1002;
const TAG_EPOCH: u32 = 1003;
const TAG_ARCH: u32 = 1022;
const TAG_SOURCERPM: u32 = 1044;

const TYPE_INT32: u32 = 4;
const TYPE_STRING: u32 = 6;
const TYPE_I18NSTRING: u32 = 9;

pub struct RpmAnalyzer;

impl FileAnalyzer for RpmAnalyzer {
    fn analyzer_type(&self) -> AnalyzerType {
        AnalyzerType::Rpm
    }

    fn version(&self) -> u32 {
        1
    }

    fn required(&self, file_path: &str, _: &FileMeta) -> bool {
        DB_PATHS.contains(&file_path)
    }

    fn analyze(&self, ctx: &CancelToken, input: AnalysisInput) -> Result<AnalysisResult> {
        ctx.check()?;
        // rusqlite wants a file on disk; the layer walker hands us bytes.
        let mut tmp = tempfile::NamedTempFile::new()?;
        tmp.write_all(&input.content)?;
        tmp.flush()?;

        let conn = Connection::open_with_flags(tmp.path(), OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let mut stmt = conn.prepare("SELECT blob FROM Packages")?;
        let rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;

        let mut packages = Vec::new();
        for blob in rows {
            ctx.check()?;
            match parse_header(&blob?) {
                Ok(Some(pkg)) => packages.push(pkg),
                Ok(None) => {}
                Err(e) => debug!(error = %e, "undecodable rpm header skipped"),
            }
        }

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

struct IndexEntry {
    tag: u32,
    typ: u32,
    offset: usize,
}

/// Decode one header image into a package. Returns `Ok(None)` for
/// public-key headers and other entries without a name.
fn parse_header(blob: &[u8]) -> Result<Option<Package>> {
    if blob.len() < 8 {
        return Err(Error::Analysis("rpm header too short".into()));
    }
    let count = be_u32(&blob[0..4]) as usize;
    let store_size = be_u32(&blob[4..8]) as usize;
    let index_end = 8 + count * 16;
    if blob.len() < index_end + store_size {
        return Err(Error::Analysis("rpm header truncated".into()));
    }
    let store = &blob[index_end..index_end + store_size];

    let mut entries = Vec::with_capacity(count);
    for i in 0..count {
        let at = 8 + i * 16;
        entries.push(IndexEntry {
            tag: be_u32(&blob[at..at + 4]),
            typ: be_u32(&blob[at + 4..at + 8]),
            offset: be_u32(&blob[at + 8..at + 12]) as usize,
        });
    }

    let string_tag = |tag: u32| -> Option<String> {
        entries
            .iter()
            .find(|e| e.tag == tag && (e.typ == TYPE_STRING || e.typ == TYPE_I18NSTRING))
            .and_then(|e| read_cstr(store, e.offset))
    };
    let int_tag = |tag: u32| -> Option<u32> {
        entries
            .iter()
            .find(|e| e.tag == tag && e.typ == TYPE_INT32)
            .and_then(|e| store.get(e.offset..e.offset + 4))
            .map(be_u32)
    };

    let Some(name) = string_tag(TAG_NAME) else {
        return Ok(None);
    };
    let mut pkg = Package {
        name,
        version: string_tag(TAG_VERSION).unwrap_or_default(),
        release: string_tag(TAG_RELEASE).unwrap_or_default(),
        epoch: int_tag(TAG_EPOCH).unwrap_or(0),
        arch: string_tag(TAG_ARCH).unwrap_or_default(),
        ..Default::default()
    };
    if pkg.version.is_empty() {
        return Ok(None);
    }

    if let Some(srpm) = string_tag(TAG_SOURCERPM) {
        if let Some((sname, sver, srel)) = parse_source_rpm(&srpm) {
            pkg.src_name = sname;
            pkg.src_version = sver;
            pkg.src_release = srel;
            pkg.src_epoch = pkg.epoch;
        }
    }
    if pkg.src_name.is_empty() {
        pkg.src_name = pkg.name.clone();
        pkg.src_version = pkg.version.clone();
        pkg.src_release = pkg.release.clone();
        pkg.src_epoch = pkg.epoch;
    }
    Ok(Some(pkg))
}

/// `openssl-1.1.1k-5.el8.src.rpm` -> `(openssl, 1.1.1k, 5.el8)`
fn parse_source_rpm(srpm: &str) -> Option<(String, String, String)> {
    let base = srpm
        .strip_suffix(".src.rpm")
        .or_else(|| srpm.strip_suffix(".nosrc.rpm"))?;
    let (rest, release) = base.rsplit_once('-')?;
    let (name, version) = rest.rsplit_once('-')?;
    Some((name.to_string(), version.to_string(), release.to_string()))
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn read_cstr(store: &[u8], offset: usize) -> Option<String> {
    let slice = store.get(offset..)?;
    let end = slice.iter().position(|&b| b == 0)?;
    String::from_utf8(slice[..end].to_vec()).ok()
}
