use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::CatalogError;
use crate::report::{ProgressEvent, ProgressSink, Severity};
use crate::store::Store;

/// Object store holding catalog backups, addressed by `/`-separated keys.
pub trait ArchiveTarget {
    /// Last-modified time of every object below `prefix`.
    fn list(&self, prefix: &str) -> Result<BTreeMap<String, DateTime<Utc>>, CatalogError>;
    fn upload(&self, source: &Utf8Path, key: &str) -> Result<(), CatalogError>;
    fn location(&self, prefix: &str) -> String;
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BackupReport {
    pub location: String,
    pub uploaded: Vec<String>,
    pub unchanged: Vec<String>,
}

/// Uploads `path` (a file or a directory tree) below `prefix`, skipping
/// objects whose archived copy is at least as new as the local file.
pub fn sync(
    path: &Utf8Path,
    prefix: &str,
    target: &dyn ArchiveTarget,
    sink: &dyn ProgressSink,
) -> Result<BackupReport, CatalogError> {
    let prefix = prefix.trim_matches('/');
    let remote = target.list(prefix)?;
    let mut report = BackupReport {
        location: target.location(prefix),
        ..BackupReport::default()
    };

    for (source, key) in planned_uploads(path, prefix)? {
        let modified = modified_at(&source)?;
        let stale = remote.get(&key).is_none_or(|archived| modified > *archived);
        if !stale {
            report.unchanged.push(key);
            continue;
        }
        target.upload(&source, &key).map_err(|err| {
            sink.error(&key, format!("upload of {source} failed: {err}"));
            err
        })?;
        sink.info(&key, format!("uploaded {source}"));
        report.uploaded.push(key);
    }

    sink.event(ProgressEvent::new(
        Severity::Info,
        format!(
            "phase=Backup; {} uploaded, {} unchanged, at {}",
            report.uploaded.len(),
            report.unchanged.len(),
            report.location
        ),
    ));
    Ok(report)
}

/// Local files paired with their archive keys.
fn planned_uploads(path: &Utf8Path, prefix: &str) -> Result<Vec<(Utf8PathBuf, String)>, CatalogError> {
    if !Store::exists(path) {
        return Err(CatalogError::Archive(format!("{path} does not exist")));
    }
    if path.is_file() {
        let name = path
            .file_name()
            .ok_or_else(|| CatalogError::Archive(format!("{path} has no file name")))?;
        return Ok(vec![(path.to_path_buf(), join_key(prefix, name))]);
    }
    Store::list_files(path)?
        .into_iter()
        .map(|file| {
            let relative = file
                .strip_prefix(path)
                .map_err(|err| CatalogError::Archive(err.to_string()))?;
            let key = relative
                .components()
                .map(|component| component.as_str())
                .collect::<Vec<_>>()
                .join("/");
            Ok((file.clone(), join_key(prefix, &key)))
        })
        .collect()
}

fn join_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}/{key}")
    }
}

fn modified_at(path: &Utf8Path) -> Result<DateTime<Utc>, CatalogError> {
    let modified = fs::metadata(path.as_std_path())
        .and_then(|metadata| metadata.modified())
        .map_err(|err| CatalogError::Filesystem(format!("{path}: {err}")))?;
    Ok(DateTime::<Utc>::from(modified))
}

/// Archive kept in a local directory; keys map to relative paths.
#[derive(Debug, Clone)]
pub struct LocalDirArchive {
    root: Utf8PathBuf,
}

impl LocalDirArchive {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, key: &str) -> Utf8PathBuf {
        key.split('/').fold(self.root.clone(), |path, part| path.join(part))
    }
}

impl ArchiveTarget for LocalDirArchive {
    fn list(&self, prefix: &str) -> Result<BTreeMap<String, DateTime<Utc>>, CatalogError> {
        let base = self.object_path(prefix);
        if !Store::exists(&base) {
            return Ok(BTreeMap::new());
        }
        let mut objects = BTreeMap::new();
        for file in Store::list_files(&base)? {
            let relative = file
                .strip_prefix(&self.root)
                .map_err(|err| CatalogError::Archive(err.to_string()))?;
            let key = relative
                .components()
                .map(|component| component.as_str())
                .collect::<Vec<_>>()
                .join("/");
            objects.insert(key, modified_at(&file)?);
        }
        Ok(objects)
    }

    fn upload(&self, source: &Utf8Path, key: &str) -> Result<(), CatalogError> {
        Store::copy_file_atomic(source, &self.object_path(key))
    }

    fn location(&self, prefix: &str) -> String {
        self.object_path(prefix).to_string()
    }
}
