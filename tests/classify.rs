use geonet_stac::classify::{ClassificationResolver, DEFAULT_LABEL};
use geonet_stac::domain::{AssetRole, AssetType, MetadataRecord, ValidatedAsset};
use geonet_stac::report::{RecordingSink, Severity};

fn asset(href: &str) -> ValidatedAsset {
    ValidatedAsset {
        asset_type: AssetType::Csv,
        href: href.to_string(),
        title: "CSV".to_string(),
        media_type: "text/csv".to_string(),
        roles: vec![AssetRole::Data],
    }
}

#[test]
fn biology_record_is_grouped_by_its_download_links() {
    let record = MetadataRecord {
        id: "bio-1".to_string(),
        title: Some("Macrobenthos of the North Sea".to_string()),
        assets: vec![asset("https://ipt.vliz.be/eurobis/archive.do?r=macrobenthos")],
        ..MetadataRecord::default()
    };
    let sink = RecordingSink::default();
    let classification = ClassificationResolver::default().resolve(&record, &sink);

    assert_eq!(classification.thematic_lot, "EMODnet Biology");
    assert_eq!(classification.variable_family, "Biodiversity");
    assert_eq!(classification.convention, Some("EMODnet"));
    assert_eq!(classification.providers[0].name, "EMODnet Biology");
    assert!(classification.collection_slug().unwrap().as_str().starts_with("emodnet-"));
    assert!(classification.collection_title().ends_with("(EMODnet Convention)"));
    assert!(
        sink.events()
            .iter()
            .all(|event| event.record_id.as_deref() == Some("bio-1") || event.record_id.is_none())
    );
}

#[test]
fn unmatched_record_falls_back_to_default_label() {
    let record = MetadataRecord {
        id: "plain".to_string(),
        title: Some("Untitled survey".to_string()),
        creator: Some("Some Institute".to_string()),
        ..MetadataRecord::default()
    };
    let sink = RecordingSink::default();
    let classification = ClassificationResolver::default().resolve(&record, &sink);

    assert_eq!(classification.thematic_lot, DEFAULT_LABEL);
    assert_eq!(classification.collection, DEFAULT_LABEL);
    assert_eq!(classification.variable_family, DEFAULT_LABEL);
    assert_eq!(classification.providers[0].name, "Some Institute");
    assert_eq!(classification.convention, None);
    assert_eq!(classification.collection_title(), DEFAULT_LABEL);
    assert!(
        sink.messages_at(Severity::Warn)
            .iter()
            .any(|message| message.contains("variable family"))
    );
}
