use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use camino::Utf8PathBuf;

use geonet_stac::app::{App, ProcessOptions, ProcessResult, RecordAction};
use geonet_stac::catalog::{CatalogTree, StacCollection, StacItem};
use geonet_stac::config::{Config, ConfigLoader};
use geonet_stac::domain::Slug;
use geonet_stac::enrich::{EnrichmentDocument, EnrichmentFields, EnrichmentSource};
use geonet_stac::error::CatalogError;
use geonet_stac::output::JsonOutput;
use geonet_stac::probe::{HttpProbe, ProbeResponse};
use geonet_stac::progress::{FailureReason, ProgressStatus, ProgressStore};
use geonet_stac::report::RecordingSink;
use geonet_stac::store::Store;

/// Answers 200 for known URLs and 404 for everything else.
#[derive(Default)]
struct MockProbe {
    live: HashSet<String>,
    calls: Mutex<usize>,
}

impl MockProbe {
    fn with_live(urls: &[&str]) -> Self {
        Self {
            live: urls.iter().map(|url| url.to_string()).collect(),
            calls: Mutex::new(0),
        }
    }

    fn respond(&self, url: &str) -> ProbeResponse {
        *self.calls.lock().unwrap() += 1;
        if self.live.contains(url) {
            ProbeResponse::new(200, Some("application/octet-stream"))
        } else {
            ProbeResponse::new(404, Some("text/html"))
        }
    }
}

impl HttpProbe for MockProbe {
    fn get(&self, url: &str, _timeout: Option<Duration>) -> Result<ProbeResponse, CatalogError> {
        Ok(self.respond(url))
    }

    fn head(&self, url: &str, _timeout: Option<Duration>) -> Result<ProbeResponse, CatalogError> {
        Ok(self.respond(url))
    }

    fn get_text(
        &self,
        url: &str,
        _timeout: Option<Duration>,
    ) -> Result<(ProbeResponse, String), CatalogError> {
        Ok((self.respond(url), String::new()))
    }
}

/// Supplies a document only for the given record.
struct MockEnrichment {
    record_id: &'static str,
}

impl EnrichmentSource for MockEnrichment {
    fn fetch(&self, record_id: &str) -> Result<EnrichmentDocument, CatalogError> {
        if record_id != self.record_id {
            return Err(CatalogError::HttpStatus {
                url: format!("https://example.org/{record_id}.xml"),
                status: 404,
            });
        }
        Ok(EnrichmentDocument {
            xml_url: format!("https://example.org/{record_id}.xml"),
            csw_url: format!("https://example.org/csw?id={record_id}"),
            fields: EnrichmentFields {
                organisation: Some("VLIZ".to_string()),
                rights: Some("Open access".to_string()),
                ..EnrichmentFields::default()
            },
        })
    }
}

const CSV: &str = "https://physics.example.org/sst/data.csv";
const PNG: &str = "https://physics.example.org/sst/preview.png";
const HTML: &str = "https://physics.example.org/sst/about.html";
const DEAD: &str = "https://physics.example.org/gone/data.csv";

fn records() -> serde_json::Value {
    serde_json::json!({
        "rec-data-thumb": {
            "title": "Sea surface temperature 2020",
            "abstract": "Gridded sea surface temperature.",
            "subjects": ["Oceanographic geographical features"],
            "links": [{"url": CSV}, {"url": PNG}],
            "bbox": [0.0, 40.0, 10.0, 50.0],
            "created": "2020",
            "license": "CC0-1.0"
        },
        "rec-dead": {
            "title": "Dead links",
            "links": [{"url": DEAD}]
        },
        "rec-dup": {
            "title": "Sea surface temperature 2020",
            "links": [{"url": CSV}]
        },
        "rec-meta-only": {
            "title": "Metadata only",
            "links": [{"url": HTML}]
        },
        "rec-no-links": {
            "title": "No links at all",
            "links": null
        },
        "rec-no-title": {
            "title": "  ",
            "links": [{"url": CSV}]
        }
    })
}

fn workspace() -> (tempfile::TempDir, Config) {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    let config = Config {
        data_dir: Some(data_dir.to_string()),
        ..Config::default()
    };
    let resolved = ConfigLoader::resolve_config(clone_config(&config)).unwrap();
    Store::write_json_atomic(resolved.store().records_path(), &records()).unwrap();
    (dir, config)
}

fn run(config: Config, enrichment: Option<MockEnrichment>) -> (ProcessResult, Store) {
    let resolved = ConfigLoader::resolve_config(config).unwrap();
    let store = resolved.store();
    let app = App::new(resolved, MockProbe::with_live(&[CSV, PNG, HTML]), enrichment);
    let result = app
        .process(&ProcessOptions::default(), &RecordingSink::default())
        .unwrap();
    (result, store)
}

fn reason_of(result: &ProcessResult, id: &str) -> Option<FailureReason> {
    result
        .records
        .iter()
        .find(|record| record.id == id)
        .and_then(|record| record.reason)
}

fn clone_config(config: &Config) -> Config {
    Config {
        data_dir: config.data_dir.clone(),
        ..Config::default()
    }
}

#[test]
fn records_reach_one_terminal_outcome_each() {
    let (_dir, config) = workspace();
    let (result, store) = run(config, None);

    assert_eq!(result.count(RecordAction::Added), 1);
    assert_eq!(reason_of(&result, "rec-dead"), Some(FailureReason::NoAssets));
    assert_eq!(reason_of(&result, "rec-no-links"), Some(FailureReason::NoAssets));
    assert_eq!(reason_of(&result, "rec-meta-only"), Some(FailureReason::NoData));
    assert_eq!(reason_of(&result, "rec-no-title"), Some(FailureReason::RecordNoTitle));
    assert_eq!(reason_of(&result, "rec-dup"), Some(FailureReason::AlreadyExists));
    assert_eq!(result.catalog.items, 1);

    let progress = ProgressStore::load(&store).unwrap();
    assert!(progress.is_successful("rec-data-thumb"));
    assert_eq!(progress.entries().count(), 6);
    assert!(
        progress
            .entries()
            .all(|entry| entry.in_stac != ProgressStatus::Pending)
    );
    assert!(Store::exists(&store.progress_csv_path()));
}

#[test]
fn added_item_carries_assets_extent_and_source() {
    let (_dir, config) = workspace();
    let (result, store) = run(config, None);

    let added = result
        .records
        .iter()
        .find(|record| record.action == RecordAction::Added)
        .unwrap();
    assert_eq!(added.id, "rec-data-thumb");
    assert_eq!(added.family.as_deref(), Some("physics"));
    assert!(added.collection.as_deref().unwrap().starts_with("emodnet-"));
    assert_eq!(added.item.as_deref(), Some("sea_surface_temperature_2020"));

    let family = Slug::from_existing(added.family.as_deref().unwrap());
    let collection = Slug::from_existing(added.collection.as_deref().unwrap());
    let path = store.item_path(
        &family,
        &collection,
        &Slug::from_existing(added.item.as_deref().unwrap()),
    );
    let item: StacItem = Store::read_json(&path).unwrap();
    assert_eq!(item.properties.license, "CC0-1.0");
    let stored: StacCollection =
        Store::read_json(&store.collection_path(&family, &collection)).unwrap();
    assert_eq!(stored.license, "CC0-1.0");
    assert_eq!(item.bbox, [0.0, 40.0, 10.0, 50.0]);
    assert_eq!(item.properties.source_id.as_deref(), Some("rec-data-thumb"));
    assert_eq!(item.properties.start_datetime, "2020-01-01T00:00:00Z");
    assert_eq!(item.properties.end_datetime, "2100-01-01T00:00:00Z");
    assert_eq!(item.properties.proj_epsg, Some(4326));
    assert!(item.properties.datetime.is_none());
    assert_eq!(
        item.assets.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["csv", "png"]
    );
    assert_eq!(item.assets["csv"].roles, vec!["data".to_string()]);
    assert_eq!(item.assets["png"].roles, vec!["thumbnail".to_string()]);
}

#[test]
fn rerun_adds_no_duplicates_and_retries_failures() {
    let (_dir, config) = workspace();
    let (first, store) = run(clone_config(&config), None);
    let (second, _) = run(config, None);

    assert_eq!(first.catalog, second.catalog);
    assert_eq!(second.count(RecordAction::Added), 0);
    assert_eq!(second.count(RecordAction::Skipped), 1);
    assert_eq!(second.count(RecordAction::Rejected), 5);

    let tree = CatalogTree::load(store).unwrap();
    assert_eq!(tree.stats().items, 1);
    assert_eq!(tree.stats().families, 1);
    assert_eq!(tree.stats().collections, 1);
}

#[test]
fn lost_progress_is_repaired_from_the_catalog() {
    let (_dir, config) = workspace();
    let (_, store) = run(clone_config(&config), None);
    std::fs::remove_file(store.progress_json_path().as_std_path()).unwrap();

    let (result, _) = run(config, None);
    let repaired = result
        .records
        .iter()
        .find(|record| record.id == "rec-data-thumb")
        .unwrap();
    assert_eq!(repaired.action, RecordAction::Reconciled);
    assert_eq!(result.catalog.items, 1);
    assert!(ProgressStore::load(&store).unwrap().is_successful("rec-data-thumb"));
}

#[test]
fn enrichment_adds_metadata_assets_and_provider() {
    let (_dir, config) = workspace();
    let (result, store) = run(
        config,
        Some(MockEnrichment {
            record_id: "rec-meta-only",
        }),
    );

    // Metadata assets alone never make a record publishable.
    assert_eq!(reason_of(&result, "rec-meta-only"), Some(FailureReason::NoData));
    assert_eq!(reason_of(&result, "rec-dead"), Some(FailureReason::NoAssets));
    assert_eq!(result.count(RecordAction::Added), 1);
    assert_eq!(CatalogTree::load(store).unwrap().stats().items, 1);
}

#[test]
fn json_sink_is_silent() {
    let (_dir, config) = workspace();
    let resolved = ConfigLoader::resolve_config(config).unwrap();
    let app = App::new(resolved, MockProbe::with_live(&[CSV]), None::<MockEnrichment>);
    let result = app.process(&ProcessOptions::default(), &JsonOutput).unwrap();
    assert_eq!(result.count(RecordAction::Added), 1);
}
