use assert_matches::assert_matches;

use geonet_stac::config::{Config, ConfigLoader};
use geonet_stac::error::CatalogError;

#[test]
fn explicit_file_overrides_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pipeline.json");
    std::fs::write(
        &path,
        r#"{
            "catalog_title": "emodnet",
            "data_dir": "/srv/geonet",
            "records_to_process": ["a1", "b2"],
            "link_timeout_secs": 5,
            "root": {"id": "edito", "title": "EDITO", "description": "EDITO catalog"},
            "enrich": false
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.stac_dir, "/srv/geonet/stac");
    assert_eq!(resolved.records_path, "/srv/geonet/all_emodnet_records.json");
    assert_eq!(resolved.root.id, "edito");
    assert_eq!(resolved.timeouts.link, Some(std::time::Duration::from_secs(5)));
    assert_eq!(resolved.timeouts.service, Some(std::time::Duration::from_secs(20)));
    assert!(!resolved.enrich);
    assert!(resolved.should_process("b2"));
    assert!(!resolved.should_process("c3"));
    assert!(
        resolved
            .store()
            .progress_json_path()
            .ends_with("all_emodnet_processed_records.json")
    );
}

#[test]
fn unreadable_explicit_path_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.json");
    assert_matches!(
        ConfigLoader::resolve(missing.to_str()),
        Err(CatalogError::ConfigRead(_))
    );
}

#[test]
fn malformed_file_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(CatalogError::ConfigParse(_))
    );
}

#[test]
fn invalid_values_are_rejected() {
    let empty_title = Config {
        catalog_title: Some("   ".to_string()),
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(empty_title),
        Err(CatalogError::ConfigValue(_))
    );

    let config: Config = serde_json::from_str(
        r#"{"enrichment": {"xml_url_template": "https://example.org/xml", "csw_url_template": "https://example.org/csw?id={id}"}}"#,
    )
    .unwrap();
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(CatalogError::ConfigValue(message)) if message.contains("placeholder")
    );
}
