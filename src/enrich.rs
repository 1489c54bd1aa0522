use std::time::Duration;

use quick_xml::Reader;
use quick_xml::events::Event;
use serde::{Deserialize, Serialize};

use crate::domain::{AssetRole, AssetType, Coordinate, MetadataRecord, Provider, TimePeriod, ValidatedAsset};
use crate::error::CatalogError;
use crate::links::classify_url;
use crate::probe::HttpProbe;
use crate::report::ProgressSink;

pub const ID_PLACEHOLDER: &str = "{id}";

/// URL templates of the per-record auxiliary documents; `{id}` is replaced
/// by the record identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentTemplates {
    pub xml_url_template: String,
    pub csw_url_template: String,
}

impl Default for EnrichmentTemplates {
    fn default() -> Self {
        Self {
            xml_url_template:
                "https://emodnet.ec.europa.eu/geonetwork/srv/api/records/{id}/formatters/xml".to_string(),
            csw_url_template: "https://emodnet.ec.europa.eu/geonetwork/emodnet/eng/csw?request=GetRecordById&service=CSW&version=2.0.2&elementSetName=full&id={id}".to_string(),
        }
    }
}

impl EnrichmentTemplates {
    pub fn xml_url(&self, record_id: &str) -> String {
        self.xml_url_template.replace(ID_PLACEHOLDER, record_id)
    }

    pub fn csw_url(&self, record_id: &str) -> String {
        self.csw_url_template.replace(ID_PLACEHOLDER, record_id)
    }
}

/// Fields recovered from an auxiliary metadata document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnrichmentFields {
    pub organisation: Option<String>,
    pub rights: Option<String>,
    /// West, south, east, north.
    pub bbox: Option<[f64; 4]>,
    pub period: Option<TimePeriod>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentDocument {
    pub xml_url: String,
    pub csw_url: String,
    pub fields: EnrichmentFields,
}

pub trait EnrichmentSource {
    fn fetch(&self, record_id: &str) -> Result<EnrichmentDocument, CatalogError>;
}

pub struct HttpEnrichmentSource<'a> {
    probe: &'a dyn HttpProbe,
    templates: EnrichmentTemplates,
    timeout: Option<Duration>,
}

impl<'a> HttpEnrichmentSource<'a> {
    pub fn new(probe: &'a dyn HttpProbe, templates: EnrichmentTemplates, timeout: Option<Duration>) -> Self {
        Self {
            probe,
            templates,
            timeout,
        }
    }
}

impl EnrichmentSource for HttpEnrichmentSource<'_> {
    fn fetch(&self, record_id: &str) -> Result<EnrichmentDocument, CatalogError> {
        let xml_url = self.templates.xml_url(record_id);
        let (response, body) = self.probe.get_text(&xml_url, self.timeout)?;
        if response.status != 200 {
            return Err(CatalogError::HttpStatus {
                url: xml_url,
                status: response.status,
            });
        }
        let fields = parse_enrichment_xml(&body)?;
        Ok(EnrichmentDocument {
            csw_url: self.templates.csw_url(record_id),
            xml_url,
            fields,
        })
    }
}

/// Applies the auxiliary document to the record. Fetch and parse failures
/// are reported and leave the record unchanged.
pub fn supplement(
    record: MetadataRecord,
    source: &dyn EnrichmentSource,
    sink: &dyn ProgressSink,
) -> MetadataRecord {
    match source.fetch(&record.id) {
        Ok(document) => apply(record, document, sink),
        Err(err) => {
            sink.warn(&record.id, format!("enrichment skipped: {err}"));
            record
        }
    }
}

pub fn apply(mut record: MetadataRecord, document: EnrichmentDocument, sink: &dyn ProgressSink) -> MetadataRecord {
    for url in [document.xml_url, document.csw_url] {
        record = record.with_asset(metadata_asset(url));
    }

    let fields = document.fields;
    if record.provider.is_empty() {
        match fields.organisation {
            Some(name) => {
                sink.info(&record.id, format!("provider found: {name}"));
                record.provider.push(Provider::new(name, "provider"));
            }
            None => sink.warn(&record.id, "no responsible party in metadata document".to_string()),
        }
    }
    if let Some(rights) = fields.rights {
        record.data_rights_restrictions = Some(rights);
    }
    match fields.bbox {
        Some(bbox) => {
            record.geographic_extent = Some(bbox.into_iter().map(|value| Some(Coordinate::Number(value))).collect());
        }
        None => sink.warn(&record.id, "geographic element not found in metadata document".to_string()),
    }

    let has_period = record
        .temporal_extent
        .as_ref()
        .map(|period| period.start.is_some() || period.end.is_some())
        .unwrap_or(false);
    if !has_period {
        record.temporal_extent = fields.period;
    }
    record
}

fn metadata_asset(href: String) -> ValidatedAsset {
    match classify_url(&href) {
        Some(class) => ValidatedAsset {
            asset_type: class.asset_type,
            title: class.title.trim().to_string(),
            media_type: class.media_type.to_string(),
            roles: class.roles.to_vec(),
            href,
        },
        None => ValidatedAsset {
            asset_type: AssetType::Xml,
            title: "XML".to_string(),
            media_type: "application/xml".to_string(),
            roles: vec![AssetRole::Metadata],
            href,
        },
    }
}

const BOUND_ELEMENTS: [&str; 4] = [
    "westBoundLongitude",
    "southBoundLatitude",
    "eastBoundLongitude",
    "northBoundLatitude",
];

/// Extracts the first geographic bounding box, time period, responsible
/// party organisation and constraint text, matching on local names.
pub fn parse_enrichment_xml(xml: &str) -> Result<EnrichmentFields, CatalogError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut fields = EnrichmentFields::default();
    let mut stack: Vec<String> = Vec::new();
    let mut bounds: [Option<f64>; 4] = [None; 4];
    let mut period = TimePeriod::default();
    let (mut bbox_done, mut period_done, mut party_done) = (false, false, false);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                stack.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Ok(Event::End(_)) => match stack.pop().as_deref() {
                Some("EX_GeographicBoundingBox") if !bbox_done => {
                    bbox_done = true;
                    if let [Some(west), Some(south), Some(east), Some(north)] = bounds {
                        fields.bbox = Some([west, south, east, north]);
                    }
                }
                Some("TimePeriod") if !period_done => {
                    period_done = true;
                    if period.start.is_some() || period.end.is_some() {
                        fields.period = Some(period.clone());
                    }
                }
                Some("CI_ResponsibleParty") => party_done = true,
                _ => {}
            },
            Ok(Event::Text(text)) => {
                let text = text
                    .unescape()
                    .map_err(|err| CatalogError::Xml(err.to_string()))?
                    .trim()
                    .to_string();
                if text.is_empty() {
                    continue;
                }
                let (Some(leaf), parent) = (stack.last(), stack.iter().rev().nth(1)) else {
                    continue;
                };
                let within = |name: &str| stack.iter().any(|element| element == name);

                if !bbox_done && leaf == "Decimal" && within("EX_GeographicBoundingBox") {
                    if let Some(index) = parent.and_then(|parent| BOUND_ELEMENTS.iter().position(|bound| bound == parent)) {
                        bounds[index] = text.parse::<f64>().ok();
                    }
                }
                if !period_done && within("TimePeriod") {
                    match leaf.as_str() {
                        "beginPosition" => period.start = Some(text.clone()),
                        "endPosition" => period.end = Some(text.clone()),
                        _ => {}
                    }
                }
                let parent_is = |name: &str| parent.map(|parent| parent == name).unwrap_or(false);
                if leaf == "CharacterString" {
                    if !party_done
                        && fields.organisation.is_none()
                        && parent_is("organisationName")
                        && within("CI_ResponsibleParty")
                    {
                        fields.organisation = Some(text.clone());
                    }
                    if fields.rights.is_none() && parent_is("otherConstraints") {
                        fields.rights = Some(text);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(CatalogError::Xml(err.to_string())),
            _ => {}
        }
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::report::{RecordingSink, Severity};

    const DOCUMENT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gmd:MD_Metadata xmlns:gmd="http://www.isotc211.org/2005/gmd"
                 xmlns:gco="http://www.isotc211.org/2005/gco"
                 xmlns:gml="http://www.opengis.net/gml/3.2">
  <gmd:contact>
    <gmd:CI_ResponsibleParty>
      <gmd:organisationName><gco:CharacterString>Flanders Marine Institute</gco:CharacterString></gmd:organisationName>
    </gmd:CI_ResponsibleParty>
  </gmd:contact>
  <gmd:identificationInfo>
    <gmd:resourceConstraints>
      <gmd:MD_LegalConstraints>
        <gmd:otherConstraints><gco:CharacterString>Open access &amp; attribution</gco:CharacterString></gmd:otherConstraints>
      </gmd:MD_LegalConstraints>
    </gmd:resourceConstraints>
    <gmd:extent>
      <gmd:EX_Extent>
        <gmd:geographicElement>
          <gmd:EX_GeographicBoundingBox>
            <gmd:westBoundLongitude><gco:Decimal>-10.5</gco:Decimal></gmd:westBoundLongitude>
            <gmd:eastBoundLongitude><gco:Decimal>12</gco:Decimal></gmd:eastBoundLongitude>
            <gmd:southBoundLatitude><gco:Decimal>35.25</gco:Decimal></gmd:southBoundLatitude>
            <gmd:northBoundLatitude><gco:Decimal>60</gco:Decimal></gmd:northBoundLatitude>
          </gmd:EX_GeographicBoundingBox>
        </gmd:geographicElement>
        <gmd:temporalElement>
          <gmd:EX_TemporalExtent>
            <gmd:extent>
              <gml:TimePeriod gml:id="tp1">
                <gml:beginPosition>1998-03</gml:beginPosition>
                <gml:endPosition/>
              </gml:TimePeriod>
            </gmd:extent>
          </gmd:EX_TemporalExtent>
        </gmd:temporalElement>
      </gmd:EX_Extent>
    </gmd:extent>
  </gmd:identificationInfo>
</gmd:MD_Metadata>"#;

    struct FixedSource(Result<EnrichmentFields, String>);

    impl EnrichmentSource for FixedSource {
        fn fetch(&self, record_id: &str) -> Result<EnrichmentDocument, CatalogError> {
            let templates = EnrichmentTemplates::default();
            match &self.0 {
                Ok(fields) => Ok(EnrichmentDocument {
                    xml_url: templates.xml_url(record_id),
                    csw_url: templates.csw_url(record_id),
                    fields: fields.clone(),
                }),
                Err(message) => Err(CatalogError::Http(message.clone())),
            }
        }
    }

    #[test]
    fn parses_document_fields() {
        let fields = parse_enrichment_xml(DOCUMENT).unwrap();
        assert_eq!(fields.organisation.as_deref(), Some("Flanders Marine Institute"));
        assert_eq!(fields.rights.as_deref(), Some("Open access & attribution"));
        assert_eq!(fields.bbox, Some([-10.5, 35.25, 12.0, 60.0]));
        assert_eq!(
            fields.period,
            Some(TimePeriod {
                start: Some("1998-03".to_string()),
                end: None
            })
        );
    }

    #[test]
    fn incomplete_bounding_box_is_ignored() {
        let xml = r#"<MD_Metadata><EX_GeographicBoundingBox>
            <westBoundLongitude><Decimal>1</Decimal></westBoundLongitude>
            <southBoundLatitude><Decimal>x</Decimal></southBoundLatitude>
        </EX_GeographicBoundingBox></MD_Metadata>"#;
        assert_eq!(parse_enrichment_xml(xml).unwrap().bbox, None);
        assert_matches!(parse_enrichment_xml("<a><b></a>"), Err(CatalogError::Xml(_)));
    }

    #[test]
    fn supplement_fills_missing_fields_and_adds_metadata_assets() {
        let sink = RecordingSink::default();
        let source = FixedSource(parse_enrichment_xml(DOCUMENT).map_err(|err| err.to_string()));
        let record = MetadataRecord {
            id: "abc".to_string(),
            ..MetadataRecord::default()
        };
        let record = supplement(record, &source, &sink);
        assert_eq!(record.assets.len(), 2);
        assert_eq!(record.assets[0].asset_type, AssetType::Xml);
        assert_eq!(record.assets[1].asset_type, AssetType::Csw);
        assert!(record.assets.iter().all(|asset| asset.roles == vec![AssetRole::Metadata]));
        assert_eq!(record.provider, vec![Provider::new("Flanders Marine Institute", "provider")]);
        assert_eq!(record.geographic_extent.as_ref().map(Vec::len), Some(4));
        assert_eq!(record.temporal_extent.and_then(|period| period.start).as_deref(), Some("1998-03"));
    }

    #[test]
    fn supplement_failure_leaves_record_untouched() {
        let sink = RecordingSink::default();
        let record = MetadataRecord {
            id: "abc".to_string(),
            ..MetadataRecord::default()
        };
        let out = supplement(record.clone(), &FixedSource(Err("timeout".to_string())), &sink);
        assert_eq!(out, record);
        assert_eq!(sink.messages_at(Severity::Warn).len(), 1);
    }

    #[test]
    fn templates_substitute_identifier() {
        let templates = EnrichmentTemplates::default();
        assert!(templates.xml_url("x-1").ends_with("/records/x-1/formatters/xml"));
        assert!(templates.csw_url("x-1").ends_with("&id=x-1"));
    }
}
