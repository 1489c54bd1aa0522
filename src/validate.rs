use std::time::{Duration, Instant};

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use thiserror::Error;

use crate::domain::{AssetRole, AssetType, Link, MetadataRecord, ValidatedAsset};
use crate::links::{LinkClass, classify_link, classify_url};
use crate::probe::HttpProbe;
use crate::report::{ProgressEvent, ProgressSink, Severity};

/// Feature-service query that replaces toolbox download pages; the dataset
/// identifier is appended.
pub const TOOLBOX_FEATURE_BASE: &str = "https://geo.vliz.be/geoserver/Dataportal/wfs?service=wfs&version=1.1.0&typeName=eurobis-obisenv_basic&request=GetFeature&outputFormat=text%2Fcsv&viewParams=datasetid%3A";

const MAP_WIDTH: u32 = 800;
const MAP_HEIGHT: u32 = 600;
const MAP_CRS: &str = "EPSG:4326";
const MAP_FORMAT: &str = "image/png";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("link has no URL")]
    MissingUrl,

    #[error("no asset type for {0}")]
    Unclassified(String),

    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("{url} returned content type {found:?}, expected {expected}")]
    ContentType {
        url: String,
        expected: String,
        found: Option<String>,
    },

    #[error("capabilities of {url} unusable: {reason}")]
    Capabilities { url: String, reason: String },

    #[error("map service link {0} has no layer name")]
    MissingLayer(String),

    #[error("unsupported output format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid IPT link format: {0}")]
    InvalidResourceLink(String),

    #[error("array store {url} could not be opened: {reason}")]
    ArrayStore { url: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationTimeouts {
    /// Plain link checks and array-store probes.
    pub link: Option<Duration>,
    /// Capability documents, map renders and feature-service HEAD checks.
    pub service: Option<Duration>,
}

impl Default for ValidationTimeouts {
    fn default() -> Self {
        Self {
            link: Some(Duration::from_secs(10)),
            service: Some(Duration::from_secs(20)),
        }
    }
}

/// Protocol version and first layer bounding box of a map service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapCapabilities {
    pub version: String,
    pub bbox: String,
}

pub struct AssetValidator<'a> {
    probe: &'a dyn HttpProbe,
    timeouts: ValidationTimeouts,
}

impl<'a> AssetValidator<'a> {
    pub fn new(probe: &'a dyn HttpProbe, timeouts: ValidationTimeouts) -> Self {
        Self { probe, timeouts }
    }

    /// Classifies and validates every link of the record, returning the
    /// record with the surviving assets appended.
    pub fn find_assets(&self, record: MetadataRecord, sink: &dyn ProgressSink) -> MetadataRecord {
        if record.links.is_empty() {
            sink.warn(
                &record.id,
                format!("no links found in record {}", record.display_title()),
            );
            return record;
        }

        let outcomes = record
            .links
            .iter()
            .map(|link| self.validate_link(&record.id, link, sink))
            .collect::<Vec<_>>();

        let mut record = record;
        for outcome in outcomes {
            match outcome {
                Ok(asset) => {
                    sink.info(
                        &record.id,
                        format!("{} asset {} added", asset.asset_type, asset.href),
                    );
                    record = record.with_asset(asset);
                }
                Err(ValidationError::MissingUrl) => {
                    sink.error(&record.id, "link item has no URL".to_string());
                }
                Err(err) => sink.warn(&record.id, format!("link dropped: {err}")),
            }
        }
        record
    }

    pub fn validate_link(
        &self,
        record_id: &str,
        link: &Link,
        sink: &dyn ProgressSink,
    ) -> Result<ValidatedAsset, ValidationError> {
        let url = link.url().ok_or(ValidationError::MissingUrl)?;
        let class = classify_link(record_id, url, sink)
            .ok_or_else(|| ValidationError::Unclassified(url.to_string()))?;

        let start = Instant::now();
        let result = match class.asset_type {
            AssetType::Wms => self.test_map_service(url, link.name.as_deref()),
            AssetType::Wfs => Ok(url.to_string()),
            AssetType::Iptresource => self.test_resource_archive(url),
            AssetType::Eurobistoolbox => self.test_toolbox_download(url),
            AssetType::Opendap => self.test_array_store(url),
            AssetType::Mdazip => self.test_direct_link(url),
            _ => self.test_link(url),
        };
        sink.event(
            ProgressEvent::new(
                Severity::Debug,
                format!(
                    "validated {} link {url}: {}",
                    class.asset_type,
                    if result.is_ok() { "ok" } else { "failed" }
                ),
            )
            .for_record(record_id)
            .with_elapsed(start.elapsed()),
        );

        let href = result?;
        Ok(build_asset(href, &class))
    }

    fn test_link(&self, url: &str) -> Result<String, ValidationError> {
        let response = self
            .probe
            .get(url, self.timeouts.link)
            .map_err(|err| transport(url, err))?;
        if response.status != 200 {
            return Err(ValidationError::Status {
                url: url.to_string(),
                status: response.status,
            });
        }
        Ok(url.to_string())
    }

    fn test_success(&self, url: &str) -> Result<String, ValidationError> {
        let response = self
            .probe
            .get(url, self.timeouts.link)
            .map_err(|err| transport(url, err))?;
        if !response.is_success() {
            return Err(ValidationError::Status {
                url: url.to_string(),
                status: response.status,
            });
        }
        Ok(url.to_string())
    }

    fn test_resource_archive(&self, url: &str) -> Result<String, ValidationError> {
        let archive = resource_to_archive_url(url)?;
        self.test_success(&archive)
    }

    fn test_direct_link(&self, url: &str) -> Result<String, ValidationError> {
        self.test_success(&normalize_direct_link(url))
    }

    fn test_toolbox_download(&self, url: &str) -> Result<String, ValidationError> {
        let query = toolbox_to_feature_query(url);
        self.test_feature_service(&query, "csv")?;
        Ok(query)
    }

    /// HEAD check whose content type must contain the MIME type of `format`.
    pub fn test_feature_service(&self, url: &str, format: &str) -> Result<(), ValidationError> {
        let expected = expected_mime(format)
            .ok_or_else(|| ValidationError::UnsupportedFormat(format.to_string()))?;
        let response = self
            .probe
            .head(url, self.timeouts.service)
            .map_err(|err| transport(url, err))?;
        if !response.is_success() {
            return Err(ValidationError::Status {
                url: url.to_string(),
                status: response.status,
            });
        }
        let content_type = response.content_type.clone().unwrap_or_default();
        if content_type.to_lowercase().contains(expected) {
            Ok(())
        } else {
            Err(ValidationError::ContentType {
                url: url.to_string(),
                expected: expected.to_string(),
                found: response.content_type,
            })
        }
    }

    fn test_array_store(&self, url: &str) -> Result<String, ValidationError> {
        let descriptor_url = format!("{}.dds", url.trim_end_matches('/'));
        let (response, body) = self
            .probe
            .get_text(&descriptor_url, self.timeouts.link)
            .map_err(|err| ValidationError::ArrayStore {
                url: url.to_string(),
                reason: err.to_string(),
            })?;
        if !response.is_success() {
            return Err(ValidationError::ArrayStore {
                url: url.to_string(),
                reason: format!("descriptor returned status {}", response.status),
            });
        }
        parse_dataset_descriptor(&body).map_err(|reason| ValidationError::ArrayStore {
            url: url.to_string(),
            reason,
        })?;
        Ok(url.to_string())
    }

    fn test_map_service(&self, url: &str, layers: Option<&str>) -> Result<String, ValidationError> {
        let layers = layers
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ValidationError::MissingLayer(url.to_string()))?;

        let capabilities_url = capabilities_url(url);
        let (response, body) = self
            .probe
            .get_text(&capabilities_url, self.timeouts.service)
            .map_err(|err| transport(&capabilities_url, err))?;
        if response.status != 200 {
            return Err(ValidationError::Status {
                url: capabilities_url,
                status: response.status,
            });
        }
        let capabilities =
            parse_capabilities(&body).map_err(|reason| ValidationError::Capabilities {
                url: url.to_string(),
                reason,
            })?;

        let request = get_map_url(url, layers, &capabilities);
        let response = self
            .probe
            .get(&request, self.timeouts.service)
            .map_err(|err| transport(&request, err))?;
        if response.status != 200 {
            return Err(ValidationError::Status {
                url: request,
                status: response.status,
            });
        }
        let is_png = response
            .content_type
            .as_deref()
            .and_then(|value| value.split(';').next())
            .map(|value| value.trim().eq_ignore_ascii_case(MAP_FORMAT))
            .unwrap_or(false);
        if !is_png {
            return Err(ValidationError::ContentType {
                url: request,
                expected: MAP_FORMAT.to_string(),
                found: response.content_type,
            });
        }
        Ok(request)
    }
}

fn transport(url: &str, err: crate::error::CatalogError) -> ValidationError {
    ValidationError::Transport {
        url: url.to_string(),
        message: err.to_string(),
    }
}

/// A rewritten URL is re-classified so the asset describes what it now
/// points at; the original class is kept when the rewrite is unclassifiable.
fn build_asset(href: String, original: &LinkClass) -> ValidatedAsset {
    let class = classify_url(&href).unwrap_or_else(|| original.clone());
    ValidatedAsset {
        asset_type: class.asset_type,
        href,
        title: class.title.trim().to_string(),
        media_type: class.media_type.to_string(),
        roles: class.roles.to_vec(),
    }
}

pub fn expected_mime(format: &str) -> Option<&'static str> {
    match format.to_lowercase().as_str() {
        "csv" => Some("text/csv"),
        "json" => Some("application/json"),
        "shp" => Some("application/x-shapefile"),
        _ => None,
    }
}

pub fn resource_to_archive_url(url: &str) -> Result<String, ValidationError> {
    let url = match url.strip_prefix("http://") {
        Some(rest) => format!("https://{rest}"),
        None => url.to_string(),
    };
    if url.contains("/resource?r=") {
        Ok(url.replace("/resource?r=", "/archive.do?r="))
    } else if url.contains("/archive.do") {
        Ok(url)
    } else {
        Err(ValidationError::InvalidResourceLink(url))
    }
}

pub fn toolbox_to_feature_query(url: &str) -> String {
    let dataset_id = url.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
    format!("{TOOLBOX_FEATURE_BASE}{dataset_id}")
}

pub fn normalize_direct_link(url: &str) -> String {
    let bare = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    format!("https://{}", bare.replace("/mda/", "/"))
}

pub fn capabilities_url(base: &str) -> String {
    let base = base.strip_suffix('?').unwrap_or(base);
    format!("{base}?SERVICE=WMS&REQUEST=GetCapabilities")
}

pub fn get_map_url(base: &str, layers: &str, capabilities: &MapCapabilities) -> String {
    let params = [
        ("SERVICE", "WMS".to_string()),
        ("VERSION", capabilities.version.clone()),
        ("REQUEST", "GetMap".to_string()),
        ("LAYERS", layers.to_string()),
        ("STYLES", String::new()),
        ("CRS", MAP_CRS.to_string()),
        ("BBOX", capabilities.bbox.clone()),
        ("WIDTH", MAP_WIDTH.to_string()),
        ("HEIGHT", MAP_HEIGHT.to_string()),
        ("FORMAT", MAP_FORMAT.to_string()),
    ];
    let query = params
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&");
    if base.ends_with('?') {
        format!("{base}{query}")
    } else {
        format!("{base}?{query}")
    }
}

/// Reads the root `version` attribute and the first bounding box that is a
/// direct child of a `Layer` element.
pub fn parse_capabilities(xml: &str) -> Result<MapCapabilities, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut version: Option<String> = None;
    let mut seen_root = false;
    let mut stack: Vec<Vec<u8>> = Vec::new();

    loop {
        let (element, is_empty) = match reader.read_event() {
            Ok(Event::Start(e)) => (e, false),
            Ok(Event::Empty(e)) => (e, true),
            Ok(Event::End(_)) => {
                stack.pop();
                continue;
            }
            Ok(Event::Eof) => break,
            Ok(_) => continue,
            Err(err) => return Err(err.to_string()),
        };

        if !seen_root {
            seen_root = true;
            version = attribute(&element, b"version");
        }
        let in_layer = stack.last().map(|name| name == b"Layer").unwrap_or(false);
        if in_layer && element.local_name().as_ref() == b"BoundingBox" {
            if let Some(bbox) = bbox_attributes(&element) {
                let version = version.ok_or_else(|| "no protocol version".to_string())?;
                return Ok(MapCapabilities { version, bbox });
            }
        }
        if !is_empty {
            stack.push(element.local_name().as_ref().to_vec());
        }
    }

    match version {
        None => Err("no protocol version".to_string()),
        Some(_) => Err("no layer bounding box".to_string()),
    }
}

fn bbox_attributes(element: &BytesStart<'_>) -> Option<String> {
    let minx = attribute(element, b"minx")?;
    let miny = attribute(element, b"miny")?;
    let maxx = attribute(element, b"maxx")?;
    let maxy = attribute(element, b"maxy")?;
    Some(format!("{minx},{miny},{maxx},{maxy}"))
}

fn attribute(element: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == name)
        .and_then(|attr| attr.unescape_value().ok().map(|value| value.into_owned()))
}

/// Accepts a DAP2 dataset descriptor (`Dataset { ... } name;`).
pub fn parse_dataset_descriptor(body: &str) -> Result<(), String> {
    let body = body.trim();
    if !body.starts_with("Dataset") {
        return Err("descriptor does not declare a Dataset".to_string());
    }
    let open = body.find('{').ok_or_else(|| "descriptor has no body".to_string())?;
    let close = body
        .rfind('}')
        .ok_or_else(|| "descriptor body is not closed".to_string())?;
    if close < open || !body.ends_with(';') {
        return Err("descriptor is truncated".to_string());
    }
    let declarations = body[open + 1..close].trim();
    if declarations.is_empty() {
        return Err("dataset declares no variables".to_string());
    }
    Ok(())
}

/// Roles that make a record publishable.
pub fn has_publishable_role(record: &MetadataRecord) -> bool {
    record.has_role(AssetRole::Data) || record.has_role(AssetRole::Thumbnail)
}
