//! Layer squash: turn an ordered stack of cached blobs into the
//! effective view a detector sees.
//!
//! Blobs are applied in diffID order (base to top). A later layer's
//! whiteout or opaque-directory marker removes paths introduced below
//! it; a package database reappearing in a later layer replaces the
//! earlier one wholesale, the way the union filesystem would present
//! it. Every surviving package and finding is attributed to the layer
//! that introduced it.

use crate::types::{
    Application, ArtifactInfo, BlobInfo, DetectedMisconfiguration, DetectedLicense, Layer, Os,
    PackageInfo, Repository, SecretFinding,
};

/// The merged, artifact-wide analysis detail.
#[derive(Debug, Clone, Default)]
pub struct ArtifactDetail {
    pub os: Option<Os>,
    pub repository: Option<Repository>,
    pub packages: Vec<PackageInfo>,
    pub applications: Vec<Application>,
    pub misconfigurations: Vec<DetectedMisconfiguration>,
    pub secrets: Vec<SecretFinding>,
    pub licenses: Vec<DetectedLicense>,
    /// Misconfigurations and secrets found in the image config itself.
    pub image_config: Option<ArtifactInfo>,
}

/// Apply `blobs` bottom-up. The slice must be in layer order.
pub fn apply_layers(blobs: &[BlobInfo]) -> ArtifactDetail {
    let mut detail = ArtifactDetail::default();

    for blob in blobs {
        let layer = Layer {
            digest: blob.digest.clone(),
            diff_id: blob.diff_id.clone(),
            created_by: blob.created_by.clone(),
        };

        // Union-filesystem deletions first: they hide lower content.
        for whiteout in &blob.whiteout_files {
            remove_path(&mut detail, whiteout);
        }
        for opaque in &blob.opaque_dirs {
            remove_dir(&mut detail, opaque);
        }

        if let Some(os) = &blob.os {
            // Later layers win; merging keeps the more specific name.
            detail.os = Some(match detail.os.take() {
                Some(prev) if os.name.is_empty() => Os {
                    family: os.family,
                    name: prev.name,
                    eosl: false,
                },
                _ => os.clone(),
            });
        }
        if blob.repository.is_some() {
            detail.repository = blob.repository.clone();
        }

        for info in &blob.package_infos {
            let mut info = info.clone();
            for pkg in &mut info.packages {
                pkg.layer = layer.clone();
            }
            // A reappearing package DB replaces the lower layer's view.
            detail.packages.retain(|p| p.file_path != info.file_path);
            detail.packages.push(info);
        }

        for app in &blob.applications {
            let mut app = app.clone();
            for pkg in &mut app.packages {
                pkg.layer = layer.clone();
            }
            detail.applications.retain(|a| a.file_path != app.file_path);
            detail.applications.push(app);
        }

        for misconf in &blob.misconfigurations {
            let mut misconf = misconf.clone();
            misconf.layer = layer.clone();
            detail.misconfigurations.push(misconf);
        }
        for secret in &blob.secrets {
            let mut secret = secret.clone();
            secret.layer = layer.clone();
            detail.secrets.push(secret);
        }
        detail.licenses.extend(blob.licenses.iter().cloned());
    }

    detail.packages.sort_by(|a, b| a.file_path.cmp(&b.file_path));
    detail
        .applications
        .sort_by(|a, b| a.file_path.cmp(&b.file_path));
    detail
}

fn remove_path(detail: &mut ArtifactDetail, path: &str) {
    detail.packages.retain(|p| p.file_path != path);
    detail.applications.retain(|a| a.file_path != path);
    detail.misconfigurations.retain(|m| m.file_path != path);
    detail.secrets.retain(|s| s.file_path != path);
    detail.licenses.retain(|l| l.file_path != path);
}

fn remove_dir(detail: &mut ArtifactDetail, dir: &str) {
    let prefix = format!("{dir}/");
    detail.packages.retain(|p| !p.file_path.starts_with(&prefix));
    detail
        .applications
        .retain(|a| !a.file_path.starts_with(&prefix));
    detail
        .misconfigurations
        .retain(|m| !m.file_path.starts_with(&prefix));
    detail.secrets.retain(|s| !s.file_path.starts_with(&prefix));
    detail.licenses.retain(|l| !l.file_path.starts_with(&prefix));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OsFamily, Package};

    fn blob(diff_id: &str) -> BlobInfo {
        BlobInfo {
            schema_version: crate::types::BLOB_SCHEMA_VERSION,
            diff_id: diff_id.to_string(),
            ..Default::default()
        }
    }

    fn pkg_info(path: &str, names: &[&str]) -> PackageInfo {
        PackageInfo {
            file_path: path.to_string(),
            packages: names
                .iter()
                .map(|n| Package {
                    name: n.to_string(),
                    version: "1.0".to_string(),
                    ..Default::default()
                })
                .collect(),
        }
    }

    #[test]
    fn later_package_db_replaces_lower_layer() {
        let mut base = blob("sha256:l1");
        base.package_infos = vec![pkg_info("lib/apk/db/installed", &["musl", "zlib"])];
        let mut top = blob("sha256:l2");
        top.package_infos = vec![pkg_info("lib/apk/db/installed", &["musl", "zlib", "curl"])];

        let detail = apply_layers(&[base, top]);
        assert_eq!(detail.packages.len(), 1);
        assert_eq!(detail.packages[0].packages.len(), 3);
        // Attribution points at the introducing layer.
        assert!(detail.packages[0]
            .packages
            .iter()
            .all(|p| p.layer.diff_id == "sha256:l2"));
    }

    #[test]
    fn whiteout_hides_lower_application() {
        let mut base = blob("sha256:l1");
        base.applications = vec![Application {
            app_type: "npm".into(),
            file_path: "app/package-lock.json".into(),
            packages: vec![],
        }];
        let mut top = blob("sha256:l2");
        top.whiteout_files = vec!["app/package-lock.json".to_string()];

        let detail = apply_layers(&[base, top]);
        assert!(detail.applications.is_empty());
    }

    #[test]
    fn opaque_dir_hides_everything_below_it() {
        let mut base = blob("sha256:l1");
        base.applications = vec![Application {
            app_type: "npm".into(),
            file_path: "opt/app/package-lock.json".into(),
            packages: vec![],
        }];
        let mut top = blob("sha256:l2");
        top.opaque_dirs = vec!["opt/app".to_string()];

        let detail = apply_layers(&[base, top]);
        assert!(detail.applications.is_empty());
    }

    #[test]
    fn os_from_later_layer_wins_but_keeps_name_when_blank() {
        let mut base = blob("sha256:l1");
        base.os = Some(Os {
            family: OsFamily::Debian,
            name: "11.7".into(),
            eosl: false,
        });
        let mut top = blob("sha256:l2");
        top.os = Some(Os {
            family: OsFamily::Debian,
            name: String::new(),
            eosl: false,
        });

        let detail = apply_layers(&[base, top]);
        let os = detail.os.unwrap();
        assert_eq!(os.family, OsFamily::Debian);
        assert_eq!(os.name, "11.7");
    }

    #[test]
    fn interleaving_independent_layers_is_order_stable() {
        let mut l1 = blob("sha256:l1");
        l1.package_infos = vec![pkg_info("var/lib/dpkg/status", &["bash"])];
        let mut l2 = blob("sha256:l2");
        l2.applications = vec![Application {
            app_type: "npm".into(),
            file_path: "srv/package-lock.json".into(),
            packages: vec![],
        }];

        let detail = apply_layers(&[l1.clone(), l2.clone()]);
        assert_eq!(detail.packages.len(), 1);
        assert_eq!(detail.applications.len(), 1);
    }
}
