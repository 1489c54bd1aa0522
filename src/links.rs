use std::sync::LazyLock;

use regex::Regex;

use crate::domain::{AssetRole, AssetType};
use crate::report::{ProgressEvent, ProgressSink, Severity};

/// Result of classifying one link URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkClass {
    pub asset_type: AssetType,
    pub title: &'static str,
    pub media_type: &'static str,
    pub roles: &'static [AssetRole],
}

impl LinkClass {
    pub fn primary_role(&self) -> Option<AssetRole> {
        self.roles.first().copied()
    }
}

type Rule = (&'static str, AssetType, &'static str, &'static str, &'static [AssetRole]);

const DATA: &[AssetRole] = &[AssetRole::Data];
const THUMBNAIL: &[AssetRole] = &[AssetRole::Thumbnail];
const METADATA: &[AssetRole] = &[AssetRole::Metadata];

/// File-extension suffix rules, checked first and in order.
pub const EXTENSION_RULES: &[Rule] = &[
    (".zarr", AssetType::Zarr, "Zarr", "application/vnd+zarr", DATA),
    (".zarr/", AssetType::Zarr, "Zarr", "application/vnd+zarr", DATA),
    (".nc", AssetType::Netcdf, "NetCDF", "application/vnd+netcdf", DATA),
    (".zip", AssetType::Zip, "Zip", "application/zip", DATA),
    (".tif", AssetType::Geotiff, "GeoTIFF", "image/tiff; application=geotiff", DATA),
    (".tiff", AssetType::Geotiff, "GeoTIFF", "image/tiff; application=geotiff", DATA),
    (".parquet", AssetType::Parquet, "Parquet", "application/vnd+parquet", DATA),
    (".parquet/", AssetType::Parquet, "Parquet", "application/vnd+parquet", DATA),
    (".geoparquet", AssetType::Geoparquet, "GeoParquet", "application/vnd+parquet", DATA),
    (".geoparquet/", AssetType::Geoparquet, "GeoParquet", "application/vnd+parquet", DATA),
    (".csv", AssetType::Csv, "CSV", "text/csv", DATA),
    (".json", AssetType::Json, "JSON", "application/json", METADATA),
    (".html", AssetType::Html, "HTML", "text/html", METADATA),
    (".png", AssetType::Png, "PNG", "image/png", THUMBNAIL),
    (".jpg", AssetType::Jpg, "JPEG", "image/jpeg", THUMBNAIL),
];

/// Regex rules, checked after the extension rules; the first match wins.
///
/// Order matters: the bare protocol keywords shadow the longer request
/// shapes that follow them, and `xml` captures any URL mentioning it before
/// the catalog-protocol rule is reached.
pub const PATTERN_RULES: &[Rule] = &[
    ("opendap", AssetType::Opendap, "OPeNDAP ", "application/opendap", DATA),
    ("wms", AssetType::Wms, "WMS", "OGC:WMS", THUMBNAIL),
    ("wfs", AssetType::Wfs, "WFS", "OGC:WFS", DATA),
    ("wms?SERVICE=WMS&REQUEST=GetMap", AssetType::Wms, "WMS", "OGC:WMS", THUMBNAIL),
    ("wfs?SERVICE=WFS&REQUEST=GetFeature", AssetType::Wfs, "WFS", "OGC:WFS", DATA),
    ("request=GetFeature&outputFormat=text%2Fcsv", AssetType::Wfscsv, "CSV", "text/csv", DATA),
    ("xml", AssetType::Xml, "XML", "application/xml", METADATA),
    (r"csw\?request=", AssetType::Csw, "CSW", "application/csw", METADATA),
    ("doi.org", AssetType::Doi, "DOI", "application/vnd+doi", DATA),
    ("doi:", AssetType::Doi, "DOI", "application/vnd+doi", DATA),
    ("eurobis.org/toolbox/en/download/", AssetType::Eurobistoolbox, "Eurobis toolbox", "application/html", METADATA),
    ("gbif.org/dataset/", AssetType::Gbifdataset, "GBIF Dataset", "application/html", METADATA),
    (r"ipt\.[a-zA-Z0-9-]+\.[a-zA-Z]+(?:/.*)?/resource\?r=", AssetType::Iptresource, "IPT Resource", "application/html", METADATA),
    (r"ipt\.[a-zA-Z0-9-]+\.[a-zA-Z]+(?:/.*)?(?:/archive\.do\?)", AssetType::Iptdwca, "Darwin Core Archive", "application/zip", DATA),
    ("mda.vliz.be/directlink.php?", AssetType::Mdazip, "Zip", "application/zip", DATA),
    ("mda.vliz.be/mda/directlink.php?", AssetType::Mdazip, "Zip", "application/zip", DATA),
];

static COMPILED_PATTERNS: LazyLock<Vec<(Regex, LinkClass)>> = LazyLock::new(|| {
    PATTERN_RULES
        .iter()
        .map(|(pattern, asset_type, title, media_type, roles)| {
            let regex = Regex::new(pattern).expect("link pattern rule");
            (regex, make_class(*asset_type, title, media_type, roles))
        })
        .collect()
});

fn make_class(
    asset_type: AssetType,
    title: &'static str,
    media_type: &'static str,
    roles: &'static [AssetRole],
) -> LinkClass {
    LinkClass {
        asset_type,
        title,
        media_type,
        roles,
    }
}

/// Classifies a URL without reporting; `None` means unclassified.
pub fn classify_url(url: &str) -> Option<LinkClass> {
    for (suffix, asset_type, title, media_type, roles) in EXTENSION_RULES {
        if url.ends_with(suffix) {
            return Some(make_class(*asset_type, title, media_type, roles));
        }
    }
    COMPILED_PATTERNS
        .iter()
        .find(|(regex, _)| regex.is_match(url))
        .map(|(_, class)| class.clone())
}

/// Classifies a URL and reports unclassified links as warnings.
pub fn classify_link(record_id: &str, url: &str, sink: &dyn ProgressSink) -> Option<LinkClass> {
    let class = classify_url(url);
    match &class {
        Some(class) => sink.event(
            ProgressEvent::new(
                Severity::Debug,
                format!("link {url} classified as {}", class.asset_type),
            )
            .for_record(record_id),
        ),
        None => sink.warn(record_id, format!("no asset type for link {url}")),
    }
    class
}
