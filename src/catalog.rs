use std::collections::BTreeMap;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::classify::Classification;
use crate::domain::{MetadataRecord, Slug, ValidatedAsset};
use crate::error::CatalogError;
use crate::extent::{BBox, Interval, WORLD_BBOX, finalize_boundaries, finalize_interval, format_utc, parse_datetime, union_bbox, union_interval};
use crate::report::ProgressSink;
use crate::store::{CATALOG_FILE, COLLECTION_FILE, Store};

pub const STAC_VERSION: &str = "1.0.0";
pub const PROJECTION_EXTENSION: &str =
    "https://stac-extensions.github.io/projection/v1.1.0/schema.json";
const JSON_MEDIA_TYPE: &str = "application/json";
const GEOJSON_MEDIA_TYPE: &str = "application/geo+json";
const DEFAULT_EPSG: u32 = 4326;

/// Identity of the catalog root, used when no catalog exists yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogRoot {
    pub id: String,
    pub title: String,
    pub description: String,
}

impl Default for CatalogRoot {
    fn default() -> Self {
        Self {
            id: "emodnet_geonetwork".to_string(),
            title: "EMODnet Geonetwork Catalog".to_string(),
            description: "Catalog of records found on EMODnet Geonetwork".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StacLink {
    pub rel: String,
    pub href: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl StacLink {
    fn new(rel: &str, href: String, media_type: &str, title: Option<&str>) -> Self {
        Self {
            rel: rel.to_string(),
            href,
            media_type: Some(media_type.to_string()),
            title: title.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StacCatalog {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub stac_version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stac_extensions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub description: String,
    #[serde(default)]
    pub links: Vec<StacLink>,
}

impl StacCatalog {
    pub fn new(id: &str, title: &str, description: &str) -> Self {
        Self {
            kind: "Catalog".to_string(),
            id: id.to_string(),
            stac_version: STAC_VERSION.to_string(),
            stac_extensions: Vec::new(),
            title: Some(title.to_string()),
            description: description.to_string(),
            links: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StacProvider {
    pub name: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialExtent {
    pub bbox: Vec<BBox>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalExtent {
    pub interval: Vec<[Option<String>; 2]>,
}

/// Aggregate extent of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionExtent {
    pub spatial: SpatialExtent,
    pub temporal: TemporalExtent,
}

impl CollectionExtent {
    /// Whole world with an open interval, used for a collection without items.
    pub fn open() -> Self {
        Self {
            spatial: SpatialExtent {
                bbox: vec![WORLD_BBOX],
            },
            temporal: TemporalExtent {
                interval: vec![[None, None]],
            },
        }
    }

    /// Union of the item boxes and intervals.
    pub fn from_items(items: &[StacItem]) -> Self {
        let Some(bbox) = union_bbox(items.iter().map(|item| &item.bbox)) else {
            return Self::open();
        };
        let interval = union_interval(items.iter().filter_map(StacItem::interval));
        Self {
            spatial: SpatialExtent { bbox: vec![bbox] },
            temporal: TemporalExtent {
                interval: vec![match interval {
                    Some(interval) => [Some(interval.start_string()), Some(interval.end_string())],
                    None => [None, None],
                }],
            },
        }
    }

    pub fn bbox(&self) -> Option<&BBox> {
        self.spatial.bbox.first()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StacCollection {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub stac_version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stac_extensions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub description: String,
    #[serde(default)]
    pub links: Vec<StacLink>,
    pub license: String,
    #[serde(default)]
    pub providers: Vec<StacProvider>,
    pub extent: CollectionExtent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StacAsset {
    pub href: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl From<&ValidatedAsset> for StacAsset {
    fn from(asset: &ValidatedAsset) -> Self {
        Self {
            href: asset.href.clone(),
            title: Some(asset.title.clone()),
            media_type: Some(asset.media_type.clone()),
            roles: asset.roles.iter().map(ToString::to_string).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemProperties {
    pub title: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub license: String,
    #[serde(rename = "proj:epsg", default)]
    pub proj_epsg: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<Value>,
    /// Identifier of the metadata record the item was built from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    pub start_datetime: String,
    pub end_datetime: String,
    #[serde(default)]
    pub datetime: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StacItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub stac_version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stac_extensions: Vec<String>,
    pub id: String,
    pub geometry: Value,
    pub bbox: BBox,
    pub properties: ItemProperties,
    #[serde(default)]
    pub links: Vec<StacLink>,
    #[serde(default)]
    pub assets: BTreeMap<String, StacAsset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
}

impl StacItem {
    pub fn interval(&self) -> Option<Interval> {
        Some(Interval {
            start: parse_datetime(&self.properties.start_datetime)?,
            end: parse_datetime(&self.properties.end_datetime)?,
        })
    }
}

pub fn polygon_from_bbox(bbox: &BBox) -> Value {
    let [lon_min, lat_min, lon_max, lat_max] = *bbox;
    json!({
        "type": "Polygon",
        "coordinates": [[
            [lon_min, lat_min],
            [lon_max, lat_min],
            [lon_max, lat_max],
            [lon_min, lat_max],
            [lon_min, lat_min]
        ]]
    })
}

/// EPSG code of a CRS reference (`EPSG:3035`, `.../EPSG/0/3035`, `3035`);
/// anything else maps to 4326.
pub fn epsg_code(crs: Option<&str>) -> u32 {
    let Some(crs) = crs.map(str::trim).filter(|crs| !crs.is_empty()) else {
        return DEFAULT_EPSG;
    };
    let start = crs
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map_or(crs.len(), |(index, _)| index);
    let (prefix, digits) = crs.split_at(start);
    if !prefix.is_empty() && !prefix.to_ascii_uppercase().contains("EPSG") {
        return DEFAULT_EPSG;
    }
    digits.parse().unwrap_or(DEFAULT_EPSG)
}

/// Asset map keyed by type tag; repeated tags get `_2`, `_3`, ...
pub fn keyed_assets(assets: &[ValidatedAsset]) -> BTreeMap<String, StacAsset> {
    let mut keyed = BTreeMap::new();
    for asset in assets {
        let base = asset.asset_type.as_str();
        let mut key = base.to_string();
        let mut suffix = 2;
        while keyed.contains_key(&key) {
            key = format!("{base}_{suffix}");
            suffix += 1;
        }
        keyed.insert(key, StacAsset::from(asset));
    }
    keyed
}

/// Builds the item document for a record; the identifier is already checked.
pub fn build_item(
    record: &MetadataRecord,
    item_id: &Slug,
    collection_id: &Slug,
    default_license: &str,
    sink: &dyn ProgressSink,
) -> StacItem {
    let bbox = finalize_boundaries(record, sink);
    let interval = finalize_interval(record, sink);
    sink.info(
        &record.id,
        format!(
            "start datetime {}, end datetime {}",
            format_utc(&interval.start),
            format_utc(&interval.end)
        ),
    );
    StacItem {
        kind: "Feature".to_string(),
        stac_version: STAC_VERSION.to_string(),
        stac_extensions: vec![PROJECTION_EXTENSION.to_string()],
        id: item_id.to_string(),
        geometry: polygon_from_bbox(&bbox),
        bbox,
        properties: ItemProperties {
            title: record.display_title().to_string(),
            keywords: record.subjects.clone(),
            license: record.license_or(default_license).to_string(),
            proj_epsg: Some(epsg_code(record.crs.as_deref())),
            provider: record.provider_names().next().map(str::to_string),
            references: record.references.clone().filter(|value| !value.is_null()),
            source_id: Some(record.id.clone()),
            start_datetime: interval.start_string(),
            end_datetime: interval.end_string(),
            datetime: None,
        },
        links: Vec::new(),
        assets: keyed_assets(&record.assets),
        collection: Some(collection_id.to_string()),
    }
}

#[derive(Debug, Clone)]
pub struct CollectionNode {
    pub collection: StacCollection,
    pub items: Vec<StacItem>,
}

#[derive(Debug, Clone)]
pub struct FamilyNode {
    pub catalog: StacCatalog,
    pub collections: Vec<CollectionNode>,
}

/// Where an item sits in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemLocation {
    pub family: String,
    pub collection: String,
    pub item: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CatalogStats {
    pub families: usize,
    pub collections: usize,
    pub items: usize,
}

/// The persistent root, family, collection and item tree.
///
/// Every successful mutation rewrites the whole tree before returning.
#[derive(Debug)]
pub struct CatalogTree {
    store: Store,
    root: StacCatalog,
    families: Vec<FamilyNode>,
}

impl CatalogTree {
    /// Loads the catalog below the store, or creates and persists an empty one.
    pub fn open(store: Store, root: &CatalogRoot, sink: &dyn ProgressSink) -> Result<Self, CatalogError> {
        if Store::exists(&store.catalog_root_path()) {
            sink.info(
                &root.id,
                format!("catalog already exists at {}", store.catalog_root_path()),
            );
            return Self::load(store);
        }
        let tree = Self {
            root: StacCatalog::new(&root.id, &root.title, &root.description),
            families: Vec::new(),
            store,
        };
        tree.save()?;
        sink.info(
            &root.id,
            format!("initialized catalog at {}", tree.store.catalog_root_path()),
        );
        Ok(tree)
    }

    pub fn load(store: Store) -> Result<Self, CatalogError> {
        let root_path = store.catalog_root_path();
        let root: StacCatalog = Store::read_json(&root_path)?;
        let mut families = Vec::new();
        for family_path in child_paths(&root_path, &root.links, "child")? {
            let catalog: StacCatalog = Store::read_json(&family_path)?;
            let mut collections = Vec::new();
            for collection_path in child_paths(&family_path, &catalog.links, "child")? {
                let collection: StacCollection = Store::read_json(&collection_path)?;
                let items = child_paths(&collection_path, &collection.links, "item")?
                    .iter()
                    .map(|path| Store::read_json::<StacItem>(path))
                    .collect::<Result<Vec<_>, _>>()?;
                collections.push(CollectionNode { collection, items });
            }
            families.push(FamilyNode { catalog, collections });
        }
        Ok(Self {
            store,
            root,
            families,
        })
    }

    pub fn root(&self) -> &StacCatalog {
        &self.root
    }

    pub fn families(&self) -> &[FamilyNode] {
        &self.families
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn family_ids(&self) -> Vec<&str> {
        self.families
            .iter()
            .map(|family| family.catalog.id.as_str())
            .collect()
    }

    pub fn family(&self, family: &Slug) -> Option<&FamilyNode> {
        self.families
            .iter()
            .find(|node| node.catalog.id == family.as_str())
    }

    pub fn collection_ids(&self, family: &Slug) -> Vec<&str> {
        self.family(family)
            .map(|node| {
                node.collections
                    .iter()
                    .map(|collection| collection.collection.id.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn collection(&self, family: &Slug, collection: &Slug) -> Option<&CollectionNode> {
        self.family(family)?
            .collections
            .iter()
            .find(|node| node.collection.id == collection.as_str())
    }

    pub fn item_ids(&self, family: &Slug, collection: &Slug) -> Vec<&str> {
        self.collection(family, collection)
            .map(|node| node.items.iter().map(|item| item.id.as_str()).collect())
            .unwrap_or_default()
    }

    pub fn all_items(&self) -> impl Iterator<Item = (&FamilyNode, &CollectionNode, &StacItem)> {
        self.families.iter().flat_map(|family| {
            family.collections.iter().flat_map(move |collection| {
                collection
                    .items
                    .iter()
                    .map(move |item| (family, collection, item))
            })
        })
    }

    /// Whether any collection holds an item with this identifier.
    pub fn contains_item_id(&self, item_id: &str) -> bool {
        self.all_items().any(|(_, _, item)| item.id == item_id)
    }

    /// Item built from the given record, if any.
    pub fn find_by_source(&self, record_id: &str) -> Option<ItemLocation> {
        self.all_items()
            .find(|(_, _, item)| item.properties.source_id.as_deref() == Some(record_id))
            .map(|(family, collection, item)| ItemLocation {
                family: family.catalog.id.clone(),
                collection: collection.collection.id.clone(),
                item: item.id.clone(),
            })
    }

    pub fn stats(&self) -> CatalogStats {
        CatalogStats {
            families: self.families.len(),
            collections: self
                .families
                .iter()
                .map(|family| family.collections.len())
                .sum(),
            items: self.all_items().count(),
        }
    }

    /// Returns the family identifier, creating the family when absent.
    pub fn add_or_use_family(&mut self, name: &str, sink: &dyn ProgressSink) -> Result<Slug, CatalogError> {
        let slug: Slug = name.parse()?;
        if self.family(&slug).is_some() {
            sink.info(
                &self.root.id,
                format!("variable family {name} already exists in the catalog"),
            );
            return Ok(slug);
        }

        self.families.push(FamilyNode {
            catalog: StacCatalog::new(slug.as_str(), name, &format!("Variable Family {name}")),
            collections: Vec::new(),
        });
        if let Err(err) = self.save() {
            self.families.pop();
            return Err(err);
        }
        sink.info(&self.root.id, format!("added variable family {name} as {slug}"));
        Ok(slug)
    }

    /// Returns the collection identifier, creating the collection when absent.
    /// An existing collection is returned unchanged.
    pub fn add_or_use_collection(
        &mut self,
        family: &Slug,
        classification: &Classification,
        license: &str,
        sink: &dyn ProgressSink,
    ) -> Result<Slug, CatalogError> {
        let slug = classification.collection_slug()?;
        let family_node = self.family_mut(family)?;
        if family_node
            .collections
            .iter()
            .any(|node| node.collection.id == slug.as_str())
        {
            sink.info(
                family.as_str(),
                format!("collection {} already exists in the catalog", classification.collection),
            );
            return Ok(slug);
        }

        let mut providers: Vec<StacProvider> = Vec::new();
        for provider in &classification.providers {
            if !providers.iter().any(|existing| existing.name == provider.name) {
                providers.push(StacProvider {
                    name: provider.name.clone(),
                    roles: provider.roles.clone(),
                });
            }
        }
        family_node.collections.push(CollectionNode {
            collection: StacCollection {
                kind: "Collection".to_string(),
                id: slug.to_string(),
                stac_version: STAC_VERSION.to_string(),
                stac_extensions: Vec::new(),
                title: Some(classification.collection_title()),
                description: format!("Collection of {} data", classification.collection),
                links: Vec::new(),
                license: license.to_string(),
                providers,
                extent: CollectionExtent::open(),
            },
            items: Vec::new(),
        });
        if let Err(err) = self.save() {
            self.family_mut(family)?.collections.pop();
            return Err(err);
        }
        sink.info(
            family.as_str(),
            format!("added collection {} as {slug}", classification.collection_title()),
        );
        Ok(slug)
    }

    /// Inserts a new item; never updates an existing one.
    ///
    /// Fails without touching the tree when the record has no title, its item
    /// identifier is taken in the collection, or it has no assets. On success
    /// the collection extent is recomputed from all its items.
    pub fn add_item(
        &mut self,
        family: &Slug,
        collection: &Slug,
        record: &MetadataRecord,
        default_license: &str,
        sink: &dyn ProgressSink,
    ) -> Result<Slug, CatalogError> {
        let title = record
            .title()
            .ok_or_else(|| CatalogError::MissingTitle(record.id.clone()))?;
        let item_id: Slug = title.parse()?;
        let node = self.collection_mut(family, collection)?;
        if node.items.iter().any(|item| item.id == item_id.as_str()) {
            return Err(CatalogError::ItemExists {
                collection: collection.to_string(),
                item: item_id.to_string(),
            });
        }
        if record.assets.is_empty() {
            return Err(CatalogError::NoAssets(record.id.clone()));
        }

        let item = build_item(record, &item_id, collection, default_license, sink);
        let previous_extent = node.collection.extent.clone();
        node.items.push(item);
        node.collection.extent = CollectionExtent::from_items(&node.items);

        if let Err(err) = self.save() {
            let node = self.collection_mut(family, collection)?;
            node.items.pop();
            node.collection.extent = previous_extent;
            return Err(err);
        }
        sink.info(
            &record.id,
            format!("added item {item_id} to collection {collection}"),
        );
        Ok(item_id)
    }

    fn family_mut(&mut self, family: &Slug) -> Result<&mut FamilyNode, CatalogError> {
        self.families
            .iter_mut()
            .find(|node| node.catalog.id == family.as_str())
            .ok_or_else(|| CatalogError::FamilyNotFound(family.to_string()))
    }

    fn collection_mut(&mut self, family: &Slug, collection: &Slug) -> Result<&mut CollectionNode, CatalogError> {
        self.family_mut(family)?
            .collections
            .iter_mut()
            .find(|node| node.collection.id == collection.as_str())
            .ok_or_else(|| CatalogError::CollectionNotFound(collection.to_string()))
    }

    /// Rewrites every document of the tree with freshly derived relative links.
    pub fn save(&self) -> Result<(), CatalogError> {
        let root_title = self.root.title.as_deref();
        let mut root = self.root.clone();
        root.links = vec![StacLink::new("root", format!("./{CATALOG_FILE}"), JSON_MEDIA_TYPE, root_title)];
        root.links.extend(self.families.iter().map(|family| {
            StacLink::new(
                "child",
                format!("./{}/{CATALOG_FILE}", family.catalog.id),
                JSON_MEDIA_TYPE,
                family.catalog.title.as_deref(),
            )
        }));
        Store::write_json_atomic(&self.store.catalog_root_path(), &root)?;

        let root_href = |depth: usize| format!("{}{CATALOG_FILE}", "../".repeat(depth));
        for family in &self.families {
            let family_slug = Slug::from_existing(&family.catalog.id);
            let mut catalog = family.catalog.clone();
            catalog.links = vec![
                StacLink::new("root", root_href(1), JSON_MEDIA_TYPE, root_title),
                StacLink::new("parent", root_href(1), JSON_MEDIA_TYPE, root_title),
            ];
            catalog.links.extend(family.collections.iter().map(|node| {
                StacLink::new(
                    "child",
                    format!("./{}/{COLLECTION_FILE}", node.collection.id),
                    JSON_MEDIA_TYPE,
                    node.collection.title.as_deref(),
                )
            }));
            Store::write_json_atomic(&self.store.family_path(&family_slug), &catalog)?;

            for node in &family.collections {
                let collection_slug = Slug::from_existing(&node.collection.id);
                let mut collection = node.collection.clone();
                collection.links = vec![
                    StacLink::new("root", root_href(2), JSON_MEDIA_TYPE, root_title),
                    StacLink::new(
                        "parent",
                        format!("../{CATALOG_FILE}"),
                        JSON_MEDIA_TYPE,
                        family.catalog.title.as_deref(),
                    ),
                ];
                collection.links.extend(node.items.iter().map(|item| {
                    StacLink::new(
                        "item",
                        format!("./{0}/{0}.json", item.id),
                        GEOJSON_MEDIA_TYPE,
                        Some(item.properties.title.as_str()),
                    )
                }));
                Store::write_json_atomic(
                    &self.store.collection_path(&family_slug, &collection_slug),
                    &collection,
                )?;

                for item in &node.items {
                    let mut item = item.clone();
                    let collection_title = node.collection.title.as_deref();
                    item.links = vec![
                        StacLink::new("root", root_href(3), JSON_MEDIA_TYPE, root_title),
                        StacLink::new("parent", format!("../{COLLECTION_FILE}"), JSON_MEDIA_TYPE, collection_title),
                        StacLink::new("collection", format!("../{COLLECTION_FILE}"), JSON_MEDIA_TYPE, collection_title),
                    ];
                    let item_slug = Slug::from_existing(&item.id);
                    Store::write_json_atomic(
                        &self.store.item_path(&family_slug, &collection_slug, &item_slug),
                        &item,
                    )?;
                }
            }
        }
        Ok(())
    }
}

/// Files referenced by `rel` links of the document at `document`.
fn child_paths(document: &Utf8Path, links: &[StacLink], rel: &str) -> Result<Vec<Utf8PathBuf>, CatalogError> {
    let base = document.parent().unwrap_or(Utf8Path::new(""));
    links
        .iter()
        .filter(|link| link.rel == rel)
        .map(|link| {
            let href = link.href.trim_start_matches("./");
            let escapes = Utf8Path::new(href)
                .components()
                .any(|component| !matches!(component, Utf8Component::Normal(_)));
            if escapes || href.contains("://") {
                return Err(CatalogError::MalformedCatalog {
                    path: document.to_string(),
                    message: format!("{rel} link {} is not relative to the catalog", link.href),
                });
            }
            let path = base.join(href);
            if !Store::exists(&path) {
                return Err(CatalogError::MalformedCatalog {
                    path: document.to_string(),
                    message: format!("{rel} link {} points to a missing file", link.href),
                });
            }
            Ok(path)
        })
        .collect()
}
