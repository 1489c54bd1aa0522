use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::CatalogError;

/// One harvested dataset description, progressively enriched by the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    #[serde(default, alias = "geonetwork_uri")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, rename = "abstract")]
    pub abstract_text: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub subjects: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub links: Vec<Link>,
    #[serde(default)]
    pub bbox: Option<Vec<Option<Coordinate>>>,
    #[serde(default)]
    pub geographic_extent: Option<Vec<Option<Coordinate>>>,
    #[serde(default)]
    pub crs: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub issued: Option<String>,
    #[serde(default)]
    pub modified: Option<String>,
    #[serde(default)]
    pub start_datetime: Option<String>,
    #[serde(default)]
    pub end_datetime: Option<String>,
    #[serde(default)]
    pub creator: Option<String>,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(default)]
    pub distributor: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub provider: Vec<Provider>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub rights: Option<Value>,
    #[serde(default)]
    pub references: Option<Value>,
    #[serde(default)]
    pub thematic_lot: Option<String>,
    #[serde(default)]
    pub variable_family: Option<String>,
    #[serde(default)]
    pub data_rights_restrictions: Option<String>,
    #[serde(default)]
    pub temporal_extent: Option<TimePeriod>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub assets: Vec<ValidatedAsset>,
}

impl MetadataRecord {
    pub fn title(&self) -> Option<&str> {
        self.title
            .as_deref()
            .map(str::trim)
            .filter(|title| !title.is_empty())
    }

    pub fn display_title(&self) -> &str {
        self.title().unwrap_or("<untitled>")
    }

    /// The record's own license when it names one.
    pub fn license_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.license
            .as_deref()
            .map(str::trim)
            .filter(|license| !license.is_empty())
            .unwrap_or(default)
    }

    pub fn has_role(&self, role: AssetRole) -> bool {
        self.assets.iter().any(|asset| asset.roles.contains(&role))
    }

    pub fn asset_urls(&self) -> impl Iterator<Item = &str> {
        self.assets.iter().map(|asset| asset.href.as_str())
    }

    pub fn provider_names(&self) -> impl Iterator<Item = &str> {
        self.provider.iter().map(|provider| provider.name.as_str())
    }

    /// Returns the record with `asset` appended to its asset list.
    pub fn with_asset(mut self, asset: ValidatedAsset) -> Self {
        self.assets.push(asset);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Link {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub protocol: Option<String>,
}

impl Link {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn named(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn url(&self) -> Option<&str> {
        self.url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    pub name: String,
    #[serde(default, deserialize_with = "roles_from_string_or_list")]
    pub roles: Vec<String>,
}

impl Provider {
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            roles: vec![role.into()],
        }
    }
}

/// One raw bounding-box coordinate as the harvester delivered it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Coordinate {
    Number(f64),
    Text(String),
}

impl Coordinate {
    /// Numeric value, or `None` for NaN and non-numeric text.
    pub fn value(&self) -> Option<f64> {
        let value = match self {
            Coordinate::Number(value) => *value,
            Coordinate::Text(text) => text.trim().parse::<f64>().ok()?,
        };
        (!value.is_nan()).then_some(value)
    }
}

impl From<f64> for Coordinate {
    fn from(value: f64) -> Self {
        Coordinate::Number(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimePeriod {
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetRole {
    Data,
    Thumbnail,
    Metadata,
}

impl fmt::Display for AssetRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetRole::Data => write!(f, "data"),
            AssetRole::Thumbnail => write!(f, "thumbnail"),
            AssetRole::Metadata => write!(f, "metadata"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Zarr,
    Netcdf,
    Zip,
    Geotiff,
    Parquet,
    Geoparquet,
    Csv,
    Json,
    Html,
    Png,
    Jpg,
    Opendap,
    Wms,
    Wfs,
    Wfscsv,
    Xml,
    Csw,
    Doi,
    Eurobistoolbox,
    Gbifdataset,
    Iptresource,
    Iptdwca,
    Mdazip,
}

impl AssetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Zarr => "zarr",
            AssetType::Netcdf => "netcdf",
            AssetType::Zip => "zip",
            AssetType::Geotiff => "geotiff",
            AssetType::Parquet => "parquet",
            AssetType::Geoparquet => "geoparquet",
            AssetType::Csv => "csv",
            AssetType::Json => "json",
            AssetType::Html => "html",
            AssetType::Png => "png",
            AssetType::Jpg => "jpg",
            AssetType::Opendap => "opendap",
            AssetType::Wms => "wms",
            AssetType::Wfs => "wfs",
            AssetType::Wfscsv => "wfscsv",
            AssetType::Xml => "xml",
            AssetType::Csw => "csw",
            AssetType::Doi => "doi",
            AssetType::Eurobistoolbox => "eurobistoolbox",
            AssetType::Gbifdataset => "gbifdataset",
            AssetType::Iptresource => "iptresource",
            AssetType::Iptdwca => "iptdwca",
            AssetType::Mdazip => "mdazip",
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A link that passed classification and, where applicable, live validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedAsset {
    pub asset_type: AssetType,
    pub href: String,
    pub title: String,
    pub media_type: String,
    pub roles: Vec<AssetRole>,
}

/// Catalog node identifier derived from a display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Slug(String);

impl Slug {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wraps an identifier read back from a persisted catalog.
    pub fn from_existing(id: &str) -> Self {
        Self(id.to_string())
    }

    pub fn prefixed(&self, prefix: &str) -> Self {
        Self(format!("{prefix}{}", self.0))
    }
}

impl fmt::Display for Slug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Slug {
    type Err = CatalogError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let slug = custom_slugify(value);
        // Slugs become path components; a dot-only slug would leave its directory.
        if !slug.chars().any(|c| c.is_alphanumeric() || c == '_') {
            return Err(CatalogError::InvalidIdentifier(value.to_string()));
        }
        Ok(Self(slug))
    }
}

static SEPARATOR_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-\s]+").expect("separator pattern"));
static DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s.-]").expect("disallowed-character pattern"));

/// Lossy, deterministic identifier normalization.
///
/// Whitespace and hyphen runs collapse to `_`, characters outside word
/// characters, dot and hyphen are dropped, and the result is lowercased.
/// Dots are kept, so version-like names such as `v1.2` survive intact.
pub fn custom_slugify(text: &str) -> String {
    let separated = SEPARATOR_RUNS.replace_all(text.trim(), "_");
    let stripped = DISALLOWED.replace_all(&separated, "");
    stripped.to_lowercase()
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn roles_from_string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Roles {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<Roles>::deserialize(deserializer)? {
        Some(Roles::One(role)) => vec![role],
        Some(Roles::Many(roles)) => roles,
        None => Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn slugify_thematic_lot_name() {
        assert_eq!(
            custom_slugify("EMODnet Seabed Habitats"),
            "emodnet_seabed_habitats"
        );
    }

    #[test]
    fn slugify_keeps_version_dots_and_drops_punctuation() {
        assert_eq!(custom_slugify("Bathymetry DTM v1.2 (2022)!"), "bathymetry_dtm_v1.2_2022");
        assert_eq!(custom_slugify("sea-surface  temperature"), "sea_surface_temperature");
    }

    #[test]
    fn slugify_is_idempotent() {
        for name in ["EMODnet Seabed Habitats", "a -!- b", "Ölçüm: 3.5 m", "  x--y  "] {
            let once = custom_slugify(name);
            assert_eq!(custom_slugify(&once), once);
        }
    }

    #[test]
    fn slug_rejects_empty_result() {
        let err = "!!!".parse::<Slug>().unwrap_err();
        assert_matches!(err, CatalogError::InvalidIdentifier(_));
    }

    #[test]
    fn record_accepts_harvester_field_names() {
        let json = r#"{
            "geonetwork_uri": "abc-123",
            "title": "Seabed map",
            "abstract": "A map",
            "subjects": null,
            "links": [{"url": "https://example.org/a.csv", "name": null}],
            "bbox": [-10.0, "40.5", null, 60],
            "provider": [{"name": "EMODnet Geology", "roles": "provider"}]
        }"#;
        let record: MetadataRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id, "abc-123");
        assert_eq!(record.abstract_text.as_deref(), Some("A map"));
        assert!(record.subjects.is_empty());
        assert_eq!(record.links[0].url(), Some("https://example.org/a.csv"));
        let bbox = record.bbox.unwrap();
        assert_eq!(bbox[1].as_ref().and_then(Coordinate::value), Some(40.5));
        assert!(bbox[2].is_none());
        assert_eq!(record.provider[0].roles, vec!["provider".to_string()]);
    }

    #[test]
    fn coordinate_rejects_nan_text() {
        assert_eq!(Coordinate::Text("NaN".to_string()).value(), None);
        assert_eq!(Coordinate::Text("abc".to_string()).value(), None);
        assert_eq!(Coordinate::Number(f64::NAN).value(), None);
    }
}
