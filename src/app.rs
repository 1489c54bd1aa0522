use std::collections::BTreeMap;
use std::time::Instant;

use serde::Serialize;

use crate::catalog::{CatalogStats, CatalogTree, ItemLocation};
use crate::classify::{Classification, ClassificationResolver};
use crate::config::ResolvedConfig;
use crate::domain::{MetadataRecord, Slug, custom_slugify};
use crate::enrich::{self, EnrichmentSource};
use crate::error::CatalogError;
use crate::links::classify_url;
use crate::probe::HttpProbe;
use crate::progress::{FailureReason, Outcome, ProgressStore, ProgressSummary};
use crate::report::{ProgressEvent, ProgressSink, Severity};
use crate::store::Store;
use crate::validate::{AssetValidator, has_publishable_role};

#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Stop after this many attempted records.
    pub limit: Option<usize>,
    pub skip_enrichment: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordAction {
    Added,
    /// Already present in the catalog; only the progress entry was repaired.
    Reconciled,
    Rejected,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordResult {
    pub id: String,
    pub title: Option<String>,
    pub action: RecordAction,
    pub reason: Option<FailureReason>,
    pub family: Option<String>,
    pub collection: Option<String>,
    pub item: Option<String>,
}

impl RecordResult {
    fn new(record: &MetadataRecord, action: RecordAction) -> Self {
        Self {
            id: record.id.clone(),
            title: record.title().map(str::to_string),
            action,
            reason: None,
            family: None,
            collection: None,
            item: None,
        }
    }

    fn rejected(record: &MetadataRecord, reason: FailureReason) -> Self {
        Self {
            reason: Some(reason),
            ..Self::new(record, RecordAction::Rejected)
        }
    }

    fn at(mut self, location: &ItemLocation) -> Self {
        self.family = Some(location.family.clone());
        self.collection = Some(location.collection.clone());
        self.item = Some(location.item.clone());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessResult {
    pub records: Vec<RecordResult>,
    pub summary: ProgressSummary,
    pub catalog: CatalogStats,
}

impl ProcessResult {
    pub fn count(&self, action: RecordAction) -> usize {
        self.records
            .iter()
            .filter(|record| record.action == action)
            .count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResult {
    pub progress_path: String,
    pub summary: ProgressSummary,
    pub catalog: Option<CatalogStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassifyResult {
    pub url: String,
    pub asset_type: Option<String>,
    pub title: Option<String>,
    pub media_type: Option<String>,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlugifyResult {
    pub text: String,
    pub slug: String,
}

/// Feeds harvested records through validation, enrichment, classification
/// and catalog insertion, recording one outcome per record.
pub struct App<P: HttpProbe, E: EnrichmentSource> {
    config: ResolvedConfig,
    probe: P,
    enrichment: Option<E>,
    resolver: ClassificationResolver,
}

impl<P: HttpProbe, E: EnrichmentSource> App<P, E> {
    pub fn new(config: ResolvedConfig, probe: P, enrichment: Option<E>) -> Self {
        Self {
            config,
            probe,
            enrichment,
            resolver: ClassificationResolver::default(),
        }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn process(
        &self,
        options: &ProcessOptions,
        sink: &dyn ProgressSink,
    ) -> Result<ProcessResult, CatalogError> {
        let store = self.config.store();
        store.ensure_dirs()?;
        let records = load_records(&store)?;
        let mut tree = CatalogTree::open(store.clone(), &self.config.root, sink)?;
        let mut progress = ProgressStore::load(&store)?;

        let pending = records
            .iter()
            .filter(|record| !progress.is_successful(&record.id))
            .count();
        sink.event(ProgressEvent::new(
            Severity::Info,
            format!("phase=Process; {} records, {pending} not yet in the catalog", records.len()),
        ));

        let mut results = Vec::new();
        let mut attempted = 0usize;
        for record in records {
            if !self.config.should_process(&record.id) {
                sink.event(
                    ProgressEvent::new(Severity::Debug, "not selected for processing").for_record(&record.id),
                );
                continue;
            }
            if progress.is_successful(&record.id) {
                sink.info(&record.id, "already processed and in the catalog".to_string());
                results.push(RecordResult::new(&record, RecordAction::Skipped));
                continue;
            }
            if options.limit.is_some_and(|limit| attempted >= limit) {
                break;
            }
            attempted += 1;

            let started = Instant::now();
            let result = self.process_record(&mut tree, &mut progress, record, options, sink)?;
            sink.event(
                ProgressEvent::new(
                    Severity::Info,
                    format!("record finished: {:?}", result.action).to_lowercase(),
                )
                .for_record(&result.id)
                .with_elapsed(started.elapsed()),
            );
            results.push(result);
        }

        let summary = progress.summary();
        sink.event(ProgressEvent::new(
            Severity::Info,
            format!(
                "phase=Done; {} successful, {} failed",
                summary.successful, summary.failed
            ),
        ));
        Ok(ProcessResult {
            records: results,
            summary,
            catalog: tree.stats(),
        })
    }

    /// Runs one record to a terminal outcome. Only progress persistence
    /// failures escape; everything else becomes a recorded rejection.
    fn process_record(
        &self,
        tree: &mut CatalogTree,
        progress: &mut ProgressStore,
        record: MetadataRecord,
        options: &ProcessOptions,
        sink: &dyn ProgressSink,
    ) -> Result<RecordResult, CatalogError> {
        if let Some(location) = tree.find_by_source(&record.id) {
            sink.warn(
                &record.id,
                format!("record already in the catalog as {}, repairing progress", location.item),
            );
            progress.record(&record.id, record.title(), Outcome::Successful, Some(&location))?;
            return Ok(RecordResult::new(&record, RecordAction::Reconciled).at(&location));
        }

        progress.begin(&record.id, record.title());
        sink.info(&record.id, format!("processing {}", record.display_title()));

        let validator = AssetValidator::new(&self.probe, self.config.timeouts);
        let mut record = validator.find_assets(reset_derived(record), sink);
        if record.assets.is_empty() {
            return self.reject(progress, &record, FailureReason::NoAssets, sink);
        }

        if let Some(source) = self.enrichment.as_ref().filter(|_| self.config.enrich && !options.skip_enrichment) {
            record = enrich::supplement(record, source, sink);
        }

        if !has_publishable_role(&record) {
            return self.reject(progress, &record, FailureReason::NoData, sink);
        }
        let Some(item_id) = record.title().and_then(|title| title.parse::<Slug>().ok()) else {
            return self.reject(progress, &record, FailureReason::RecordNoTitle, sink);
        };
        if tree.contains_item_id(item_id.as_str()) {
            return self.reject(progress, &record, FailureReason::AlreadyExists, sink);
        }

        let classification = self.resolver.resolve(&record, sink);
        match self.insert(tree, &record, &classification, sink) {
            Ok(location) => {
                progress.record(&record.id, record.title(), Outcome::Successful, Some(&location))?;
                sink.info(
                    &record.id,
                    format!(
                        "added to {}/{}/{}",
                        location.family, location.collection, location.item
                    ),
                );
                Ok(RecordResult::new(&record, RecordAction::Added).at(&location))
            }
            Err(err) => {
                sink.error(&record.id, format!("failed to add to the catalog: {err}"));
                self.reject(progress, &record, FailureReason::FailedToAdd, sink)
            }
        }
    }

    fn insert(
        &self,
        tree: &mut CatalogTree,
        record: &MetadataRecord,
        classification: &Classification,
        sink: &dyn ProgressSink,
    ) -> Result<ItemLocation, CatalogError> {
        let family = tree.add_or_use_family(&classification.variable_family, sink)?;
        // The record that creates a collection also sets its license.
        let license = record.license_or(&self.config.default_license);
        let collection = tree.add_or_use_collection(&family, classification, license, sink)?;
        let item = tree.add_item(&family, &collection, record, &self.config.default_license, sink)?;
        Ok(ItemLocation {
            family: family.to_string(),
            collection: collection.to_string(),
            item: item.to_string(),
        })
    }

    fn reject(
        &self,
        progress: &mut ProgressStore,
        record: &MetadataRecord,
        reason: FailureReason,
        sink: &dyn ProgressSink,
    ) -> Result<RecordResult, CatalogError> {
        sink.warn(
            &record.id,
            format!("not added to the catalog: {reason}"),
        );
        progress.record(&record.id, record.title(), Outcome::Failed(reason), None)?;
        Ok(RecordResult::rejected(record, reason))
    }

    pub fn status(&self, sink: &dyn ProgressSink) -> Result<StatusResult, CatalogError> {
        let store = self.config.store();
        sink.event(ProgressEvent::new(
            Severity::Debug,
            format!("phase=Resolve; reading {}", store.progress_json_path()),
        ));
        let progress = ProgressStore::load(&store)?;
        let catalog = if Store::exists(&store.catalog_root_path()) {
            Some(CatalogTree::load(store.clone())?.stats())
        } else {
            None
        };
        Ok(StatusResult {
            progress_path: store.progress_json_path().to_string(),
            summary: progress.summary(),
            catalog,
        })
    }
}

pub fn classify(url: &str) -> ClassifyResult {
    let class = classify_url(url);
    ClassifyResult {
        url: url.to_string(),
        asset_type: class.as_ref().map(|class| class.asset_type.to_string()),
        title: class.as_ref().map(|class| class.title.to_string()),
        media_type: class.as_ref().map(|class| class.media_type.to_string()),
        roles: class
            .map(|class| class.roles.iter().map(ToString::to_string).collect())
            .unwrap_or_default(),
    }
}

pub fn slugify(text: &str) -> SlugifyResult {
    SlugifyResult {
        text: text.to_string(),
        slug: custom_slugify(text),
    }
}

/// Reads the harvested records, a JSON object keyed by identifier.
///
/// A record without its own identifier takes the key.
pub fn load_records(store: &Store) -> Result<Vec<MetadataRecord>, CatalogError> {
    let raw: BTreeMap<String, MetadataRecord> = Store::read_json(store.records_path())?;
    Ok(raw
        .into_iter()
        .map(|(key, mut record)| {
            if record.id.trim().is_empty() {
                record.id = key;
            }
            record
        })
        .collect())
}

/// Clears fields the pipeline derives so a retried record starts clean.
fn reset_derived(record: MetadataRecord) -> MetadataRecord {
    MetadataRecord {
        assets: Vec::new(),
        temporal_extent: None,
        ..record
    }
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;
    use crate::config::{Config, ConfigLoader};
    use crate::enrich::EnrichmentDocument;
    use crate::probe::ProbeResponse;
    use crate::report::RecordingSink;
    use std::time::Duration;

    struct OkProbe;

    impl HttpProbe for OkProbe {
        fn get(&self, _url: &str, _timeout: Option<Duration>) -> Result<ProbeResponse, CatalogError> {
            Ok(ProbeResponse::new(200, Some("text/csv")))
        }

        fn head(&self, _url: &str, _timeout: Option<Duration>) -> Result<ProbeResponse, CatalogError> {
            Ok(ProbeResponse::new(200, Some("text/csv")))
        }

        fn get_text(
            &self,
            url: &str,
            _timeout: Option<Duration>,
        ) -> Result<(ProbeResponse, String), CatalogError> {
            Err(CatalogError::Http(format!("unexpected fetch of {url}")))
        }
    }

    struct NoEnrichment;

    impl EnrichmentSource for NoEnrichment {
        fn fetch(&self, record_id: &str) -> Result<EnrichmentDocument, CatalogError> {
            Err(CatalogError::Http(format!("no document for {record_id}")))
        }
    }

    fn app_in(dir: &tempfile::TempDir) -> App<OkProbe, NoEnrichment> {
        let data_dir = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let config = ConfigLoader::resolve_config(Config {
            data_dir: Some(data_dir.to_string()),
            ..Config::default()
        })
        .unwrap();
        App::new(config, OkProbe, None)
    }

    fn write_records(app: &App<OkProbe, NoEnrichment>, records: serde_json::Value) {
        Store::write_json_atomic(app.config().store().records_path(), &records).unwrap();
    }

    #[test]
    fn record_without_links_is_rejected_as_no_assets() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_in(&dir);
        write_records(
            &app,
            serde_json::json!({"r1": {"title": "Empty record", "links": []}}),
        );

        let result = app.process(&ProcessOptions::default(), &RecordingSink::default()).unwrap();
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].id, "r1");
        assert_eq!(result.records[0].reason, Some(FailureReason::NoAssets));
        assert_eq!(result.summary.failures_by_reason.get("no_assets"), Some(&1));
    }

    #[test]
    fn allow_list_and_limit_bound_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app_in(&dir);
        app.config.records_to_process = vec!["b".to_string(), "c".to_string()];
        write_records(
            &app,
            serde_json::json!({
                "a": {"title": "A", "links": []},
                "b": {"title": "B", "links": []},
                "c": {"title": "C", "links": []}
            }),
        );

        let options = ProcessOptions {
            limit: Some(1),
            skip_enrichment: true,
        };
        let result = app.process(&options, &RecordingSink::default()).unwrap();
        let ids = result.records.iter().map(|record| record.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["b"]);
    }

    #[test]
    fn dot_only_title_counts_as_untitled() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_in(&dir);
        write_records(
            &app,
            serde_json::json!({
                "r1": {"title": "..", "links": [{"url": "https://example.org/data/file.csv"}]}
            }),
        );

        let sink = RecordingSink::default();
        let first = app.process(&ProcessOptions::default(), &sink).unwrap();
        assert_eq!(first.records[0].reason, Some(FailureReason::RecordNoTitle));
        assert_eq!(first.catalog.items, 0);

        let second = app.process(&ProcessOptions::default(), &sink).unwrap();
        assert_eq!(second.records[0].reason, Some(FailureReason::RecordNoTitle));
    }

    #[test]
    fn helpers_classify_and_slugify() {
        let result = classify("https://example.org/data/file.csv");
        assert_eq!(result.asset_type.as_deref(), Some("csv"));
        assert_eq!(result.roles, vec!["data".to_string()]);
        assert!(classify("https://example.org/about").asset_type.is_none());
        assert_eq!(slugify("Sea Surface - Temperature").slug, "sea_surface_temperature");
    }
}
