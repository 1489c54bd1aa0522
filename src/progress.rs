use std::collections::BTreeMap;
use std::fmt;

use camino::Utf8PathBuf;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::catalog::ItemLocation;
use crate::error::CatalogError;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    NoAssets,
    NoData,
    RecordNoTitle,
    AlreadyExists,
    FailedToAdd,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::NoAssets => "no_assets",
            FailureReason::NoData => "no_data",
            FailureReason::RecordNoTitle => "record_no_title",
            FailureReason::AlreadyExists => "already_exists",
            FailureReason::FailedToAdd => "failed_to_add",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Pending,
    Successful,
    Failed,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::Pending => "pending",
            ProgressStatus::Successful => "successful",
            ProgressStatus::Failed => "failed",
        }
    }
}

/// Final state of one processing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Successful,
    Failed(FailureReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub in_stac: ProgressStatus,
    /// `Ok` on success, the failure reason code otherwise.
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub stac_family: Option<String>,
    #[serde(default)]
    pub stac_collection: Option<String>,
    #[serde(default)]
    pub stac_id: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSummary {
    pub successful: usize,
    pub failed: usize,
    pub pending: usize,
    pub failures_by_reason: BTreeMap<String, usize>,
}

/// Per-record outcomes, persisted as JSON and CSV after every update.
#[derive(Debug)]
pub struct ProgressStore {
    json_path: Utf8PathBuf,
    csv_path: Utf8PathBuf,
    entries: BTreeMap<String, ProgressEntry>,
}

impl ProgressStore {
    pub fn load(store: &Store) -> Result<Self, CatalogError> {
        let json_path = store.progress_json_path();
        let entries = if Store::exists(&json_path) {
            Store::read_json(&json_path)?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            json_path,
            csv_path: store.progress_csv_path(),
            entries,
        })
    }

    pub fn get(&self, id: &str) -> Option<&ProgressEntry> {
        self.entries.get(id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &ProgressEntry> {
        self.entries.values()
    }

    pub fn is_successful(&self, id: &str) -> bool {
        self.get(id)
            .map(|entry| entry.in_stac == ProgressStatus::Successful)
            .unwrap_or(false)
    }

    /// Marks the start of an attempt; kept in memory until the outcome is
    /// recorded.
    pub fn begin(&mut self, id: &str, title: Option<&str>) {
        self.entries
            .entry(id.to_string())
            .or_insert_with(|| ProgressEntry {
                id: id.to_string(),
                title: title.map(str::to_string),
                in_stac: ProgressStatus::Pending,
                reason: None,
                stac_family: None,
                stac_collection: None,
                stac_id: None,
                updated_at: None,
            });
    }

    /// Records the outcome of an attempt and persists both exports.
    pub fn record(
        &mut self,
        id: &str,
        title: Option<&str>,
        outcome: Outcome,
        location: Option<&ItemLocation>,
    ) -> Result<(), CatalogError> {
        let (in_stac, reason) = match outcome {
            Outcome::Successful => (ProgressStatus::Successful, "Ok".to_string()),
            Outcome::Failed(reason) => (ProgressStatus::Failed, reason.to_string()),
        };
        self.entries.insert(
            id.to_string(),
            ProgressEntry {
                id: id.to_string(),
                title: title.map(str::to_string),
                in_stac,
                reason: Some(reason),
                stac_family: location.map(|location| location.family.clone()),
                stac_collection: location.map(|location| location.collection.clone()),
                stac_id: location.map(|location| location.item.clone()),
                updated_at: Some(Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()),
            },
        );
        self.persist()
    }

    pub fn persist(&self) -> Result<(), CatalogError> {
        Store::write_json_atomic(&self.json_path, &self.entries)?;
        Store::write_bytes_atomic(&self.csv_path, self.to_csv().as_bytes())
    }

    pub fn summary(&self) -> ProgressSummary {
        let mut summary = ProgressSummary::default();
        for entry in self.entries.values() {
            match entry.in_stac {
                ProgressStatus::Successful => summary.successful += 1,
                ProgressStatus::Pending => summary.pending += 1,
                ProgressStatus::Failed => {
                    summary.failed += 1;
                    let reason = entry.reason.clone().unwrap_or_else(|| "unknown".to_string());
                    *summary.failures_by_reason.entry(reason).or_default() += 1;
                }
            }
        }
        summary
    }

    pub fn to_csv(&self) -> String {
        let mut out = String::from("id,title,in_stac,reason,stac_family,stac_collection,stac_id,updated_at\n");
        for entry in self.entries.values() {
            let row = [
                entry.id.as_str(),
                entry.title.as_deref().unwrap_or_default(),
                entry.in_stac.as_str(),
                entry.reason.as_deref().unwrap_or_default(),
                entry.stac_family.as_deref().unwrap_or_default(),
                entry.stac_collection.as_deref().unwrap_or_default(),
                entry.stac_id.as_deref().unwrap_or_default(),
                entry.updated_at.as_deref().unwrap_or_default(),
            ];
            let line = row.iter().map(|field| csv_field(field)).collect::<Vec<_>>().join(",");
            out.push_str(&line);
            out.push('\n');
        }
        out
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        (dir, Store::in_dir(&root, "test"))
    }

    #[test]
    fn outcomes_persist_and_reload() {
        let (_dir, store) = temp_store();
        let mut progress = ProgressStore::load(&store).unwrap();
        progress.begin("a", Some("First"));
        assert_eq!(progress.get("a").unwrap().in_stac, ProgressStatus::Pending);
        progress
            .record(
                "a",
                Some("First"),
                Outcome::Successful,
                Some(&ItemLocation {
                    family: "physics".to_string(),
                    collection: "emodnet-physics".to_string(),
                    item: "first".to_string(),
                }),
            )
            .unwrap();
        progress
            .record("b", Some("Second, with comma"), Outcome::Failed(FailureReason::NoAssets), None)
            .unwrap();

        let reloaded = ProgressStore::load(&store).unwrap();
        assert!(reloaded.is_successful("a"));
        assert!(!reloaded.is_successful("b"));
        assert_eq!(reloaded.get("b").unwrap().reason.as_deref(), Some("no_assets"));

        let summary = reloaded.summary();
        assert_eq!(summary.successful, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failures_by_reason.get("no_assets"), Some(&1));

        let csv = std::fs::read_to_string(store.progress_csv_path().as_std_path()).unwrap();
        assert!(csv.lines().any(|line| line.starts_with("b,\"Second, with comma\",failed,no_assets")));
    }

    #[test]
    fn csv_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
