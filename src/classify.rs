use crate::domain::{MetadataRecord, Provider, Slug};
use crate::error::CatalogError;
use crate::report::ProgressSink;

/// Ordered keyword to label associations; the first matching key wins.
pub type LabelTable = &'static [(&'static str, &'static str)];

/// Label used when no layer of a lookup matches.
pub const DEFAULT_LABEL: &str = "EMODnet";

/// Organisation marker that switches a collection to the network convention.
pub const CONVENTION_MARKER: &str = "EMODnet";
pub const CONVENTION_PREFIX: &str = "emodnet-";

pub const THEMATIC_LOTS: LabelTable = &[
    ("seabed-habitats", "EMODnet Seabed Habitats"),
    ("seabedhabitats", "EMODnet Seabed Habitats"),
    ("emodnet-seabedhabitats", "EMODnet Seabed Habitats"),
    ("EMODnet Seabed Habitats", "EMODnet Seabed Habitats"),
    ("bathymetry", "EMODnet Bathymetry"),
    ("EMODnet Bathymetry", "EMODnet Bathymetry"),
    ("emodnet-bathymetry", "EMODnet Bathymetry"),
    ("geology", "EMODnet Geology"),
    ("EMODnet Geology", "EMODnet Geology"),
    ("emodnet-geology", "EMODnet Geology"),
    ("chemistry", "EMODnet Chemistry"),
    ("emodnet-chemistry", "EMODnet Chemistry"),
    ("EMODnet Chemistry", "EMODnet Chemistry"),
    ("eurobis", "EMODnet Biology"),
    ("obis", "EMODnet Biology"),
    ("gbif", "EMODnet Biology"),
    ("ipt", "EMODnet Biology"),
    ("mda.vliz", "EMODnet Biology"),
    ("emodnet-biology", "EMODnet Biology"),
    ("EMODnet Biology", "EMODnet Biology"),
    ("emodnet-physics", "EMODnet Physics"),
    ("EMODnet Physics", "EMODnet Physics"),
    ("physics", "EMODnet Physics"),
    ("humanactivities", "EMODnet Human Activities"),
    ("emodnet-humanactivities", "EMODnet Human Activities"),
    ("EMODnet Human Activities", "EMODnet Human Activities"),
];

pub const COLLECTIONS: LabelTable = &[
    ("seabed-habitats", "Seabed Habitats"),
    ("seabedhabitats", "Seabed Habitats"),
    ("emodnet-seabedhabitats", "Seabed Habitats"),
    ("EMODnet Seabed Habitats", "Seabed Habitats"),
    ("bathymetry", "Bathymetry"),
    ("EMODnet Bathymetry", "Bathymetry"),
    ("emodnet-bathymetry", "Bathymetry"),
    ("geology", "Geology"),
    ("EMODnet Geology", "Geology"),
    ("emodnet-geology", "Geology"),
    ("chemistry", "Chemistry"),
    ("emodnet-chemistry", "Chemistry"),
    ("EMODnet Chemistry", "Chemistry"),
    ("gbif", "Biology"),
    ("eurobis", "Biology"),
    ("obis", "Biology"),
    ("ipt", "Biology"),
    ("mda.vliz", "Biology"),
    ("emodnet-biology", "Biology"),
    ("EMODnet Biology", "Biology"),
    ("emodnet-physics", "Physics"),
    ("EMODnet Physics", "Physics"),
    ("physics", "Physics"),
    ("humanactivities", "Human Activities"),
    ("emodnet-humanactivities", "Human Activities"),
    ("EMODnet Human Activities", "Human Activities"),
];

/// Matched against lowercased text, so the mixed-case keys near the end
/// never match; kept so table order stays comparable across lookups.
pub const VARIABLE_FAMILIES: LabelTable = &[
    ("litter", "litter"),
    ("oxygen", "o2"),
    ("alkalinity", "ph"),
    ("acidity", "ph"),
    ("salinity", "Salinity"),
    ("contaminants", "Contaminants"),
    ("phosphate", "Nutrients"),
    ("nitrate", "Nutrients"),
    ("silicate", "Nutrients"),
    ("currents", "Currents"),
    ("temperature", "Temperature"),
    ("waves", "Waves"),
    ("elevation", "Elevation"),
    ("seabed-habitats", "Seabed habitats"),
    ("seabedhabitats", "Seabed habitats"),
    ("emodnet-seabedhabitats", "Seabed habitats"),
    ("EMODnet Seabed Habitats", "Seabed habitats"),
    ("bathymetry", "Elevation"),
    ("EMODnet Bathymetry", "Elevation"),
    ("emodnet-bathymetry", "Elevation"),
    ("geology", "Marine geology"),
    ("EMODnet Geology", "Marine geology"),
    ("emodnet-geology", "Marine geology"),
    ("chemistry", "Chemistry"),
    ("emodnet-chemistry", "Chemistry"),
    ("EMODnet Chemistry", "Chemistry"),
    ("eurobis", "Biodiversity"),
    ("gbif", "Biodiversity"),
    ("obis", "Biodiversity"),
    ("ipt", "Biodiversity"),
    ("mda.vliz", "Biodiversity"),
    ("emodnet-biology", "Biodiversity"),
    ("EMODnet Biology", "Biodiversity"),
    ("emodnet-physics", "Physics"),
    ("EMODnet Physics", "Physics"),
    ("physics", "Physics"),
    ("humanactivities", "Human marine activities"),
    ("emodnet-humanactivities", "Human marine activities"),
    ("EMODnet Human Activities", "Human marine activities"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    CaseSensitive,
    /// The inspected text is lowercased; keys are used as written.
    LowercaseText,
}

#[derive(Debug, Clone, Copy)]
pub struct LabelLookup {
    name: &'static str,
    table: LabelTable,
    mode: MatchMode,
}

impl LabelLookup {
    pub const fn new(name: &'static str, table: LabelTable, mode: MatchMode) -> Self {
        Self { name, table, mode }
    }

    /// First table entry whose key occurs in `text`.
    pub fn match_text(&self, text: &str) -> Option<(&'static str, &'static str)> {
        let lowered;
        let haystack = match self.mode {
            MatchMode::CaseSensitive => text,
            MatchMode::LowercaseText => {
                lowered = text.to_lowercase();
                lowered.as_str()
            }
        };
        self.table
            .iter()
            .find(|(key, _)| haystack.contains(key))
            .copied()
    }

    /// First table entry whose key contains `name`.
    fn match_contained(&self, name: &str) -> Option<(&'static str, &'static str)> {
        if name.is_empty() {
            return None;
        }
        self.table.iter().find(|(key, _)| key.contains(name)).copied()
    }

    fn match_layer<'r>(
        &self,
        record_id: &str,
        layer: &str,
        values: impl IntoIterator<Item = &'r str>,
        sink: &dyn ProgressSink,
    ) -> Option<&'static str> {
        for value in values {
            if let Some((key, label)) = self.match_text(value) {
                sink.info(
                    record_id,
                    format!("{key} found in {layer}, {} {label} match", self.name),
                );
                return Some(label);
            }
        }
        None
    }

    /// Asset URLs, then subjects, then the abstract.
    fn match_content(&self, record: &MetadataRecord, sink: &dyn ProgressSink) -> Option<&'static str> {
        self.match_layer(&record.id, "asset", record.asset_urls(), sink)
            .or_else(|| {
                self.match_layer(
                    &record.id,
                    "subjects",
                    record.subjects.iter().map(String::as_str),
                    sink,
                )
            })
            .or_else(|| {
                self.match_layer(&record.id, "abstract", record.abstract_text.as_deref(), sink)
            })
    }
}

/// Grouping decided for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub thematic_lot: String,
    pub variable_family: String,
    pub collection: String,
    pub providers: Vec<Provider>,
    pub convention: Option<&'static str>,
}

impl Classification {
    pub fn collection_slug(&self) -> Result<Slug, CatalogError> {
        let slug: Slug = self.collection.parse()?;
        Ok(match self.convention {
            Some(_) => slug.prefixed(CONVENTION_PREFIX),
            None => slug,
        })
    }

    pub fn collection_title(&self) -> String {
        match self.convention {
            Some(convention) => format!("{} ({convention} Convention)", self.collection),
            None => self.collection.clone(),
        }
    }
}

/// Layered keyword lookups for thematic lot, collection and variable family.
#[derive(Debug, Clone, Copy)]
pub struct ClassificationResolver {
    thematic_lots: LabelLookup,
    collections: LabelLookup,
    families: LabelLookup,
}

impl Default for ClassificationResolver {
    fn default() -> Self {
        Self::new(
            LabelLookup::new("thematic lot", THEMATIC_LOTS, MatchMode::CaseSensitive),
            LabelLookup::new("collection", COLLECTIONS, MatchMode::CaseSensitive),
            LabelLookup::new("variable family", VARIABLE_FAMILIES, MatchMode::LowercaseText),
        )
    }
}

impl ClassificationResolver {
    pub fn new(thematic_lots: LabelLookup, collections: LabelLookup, families: LabelLookup) -> Self {
        Self {
            thematic_lots,
            collections,
            families,
        }
    }

    pub fn resolve(&self, record: &MetadataRecord, sink: &dyn ProgressSink) -> Classification {
        let thematic_lot = self.resolve_thematic_lot(record, sink);
        let providers = self.derive_providers(record, &thematic_lot, sink);
        let with_providers = MetadataRecord {
            provider: providers.clone(),
            ..record.clone()
        };
        let collection = self.resolve_collection(&with_providers, sink);
        let variable_family = self.resolve_variable_family(&with_providers, sink);
        let convention = convention_of(&providers);
        Classification {
            thematic_lot,
            variable_family,
            collection,
            providers,
            convention,
        }
    }

    /// Explicit thematic lot, else the content layers.
    pub fn resolve_thematic_lot(&self, record: &MetadataRecord, sink: &dyn ProgressSink) -> String {
        if let Some(explicit) = non_empty(record.thematic_lot.as_deref()) {
            return explicit.to_string();
        }
        self.thematic_lots
            .match_content(record, sink)
            .unwrap_or_else(|| {
                sink.warn(
                    &record.id,
                    "no thematic lot found in assets, subjects or abstract".to_string(),
                );
                DEFAULT_LABEL
            })
            .to_string()
    }

    /// Provider names, else the content layers.
    pub fn resolve_collection(&self, record: &MetadataRecord, sink: &dyn ProgressSink) -> String {
        self.collections
            .match_layer(&record.id, "provider", record.provider_names(), sink)
            .or_else(|| self.collections.match_content(record, sink))
            .unwrap_or_else(|| {
                sink.warn(&record.id, "no collection match, using default".to_string());
                DEFAULT_LABEL
            })
            .to_string()
    }

    /// Explicit family, else the content layers and the title, else a table
    /// key containing a provider name.
    pub fn resolve_variable_family(&self, record: &MetadataRecord, sink: &dyn ProgressSink) -> String {
        if let Some(explicit) = non_empty(record.variable_family.as_deref()) {
            return explicit.to_string();
        }
        let matched = self
            .families
            .match_content(record, sink)
            .or_else(|| self.families.match_layer(&record.id, "title", record.title(), sink))
            .or_else(|| {
                record.provider_names().find_map(|name| {
                    self.families.match_contained(name).map(|(key, label)| {
                        sink.info(&record.id, format!("{key} matched provider {name}, variable family {label}"));
                        label
                    })
                })
            });
        matched
            .unwrap_or_else(|| {
                sink.warn(&record.id, "no variable family match, using default".to_string());
                DEFAULT_LABEL
            })
            .to_string()
    }

    /// Existing providers plus one derived from creator, publisher or
    /// distributor (the last present wins), else from the thematic lot.
    /// De-duplicated by name; the first occurrence keeps its roles.
    pub fn derive_providers(
        &self,
        record: &MetadataRecord,
        thematic_lot: &str,
        sink: &dyn ProgressSink,
    ) -> Vec<Provider> {
        let derived = [
            ("creator", record.creator.as_deref()),
            ("publisher", record.publisher.as_deref()),
            ("distributor", record.distributor.as_deref()),
        ]
        .into_iter()
        .filter_map(|(role, name)| non_empty(name).map(|name| Provider::new(name, role)))
        .last()
        .unwrap_or_else(|| {
            sink.warn(
                &record.id,
                format!("no provider in record metadata, using thematic lot {thematic_lot}"),
            );
            Provider::new(thematic_lot, "provider")
        });

        let mut providers: Vec<Provider> = Vec::new();
        for provider in record.provider.iter().cloned().chain(std::iter::once(derived)) {
            if !providers.iter().any(|existing| existing.name == provider.name) {
                providers.push(provider);
            }
        }
        providers
    }
}

pub fn convention_of(providers: &[Provider]) -> Option<&'static str> {
    providers
        .iter()
        .any(|provider| provider.name.contains(CONVENTION_MARKER))
        .then_some(CONVENTION_MARKER)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AssetRole, AssetType, ValidatedAsset};
    use crate::report::RecordingSink;

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
    fn table_order_decides_between_matching_keys() {
        let lookup = LabelLookup::new("collection", COLLECTIONS, MatchMode::CaseSensitive);
        // "bathymetry" precedes "emodnet-geology" in the table
        assert_eq!(
            lookup.match_text("https://emodnet-geology.eu/bathymetry.csv"),
            Some(("bathymetry", "Bathymetry"))
        );
        assert_eq!(lookup.match_text("https://ipt.vliz.be/x"), Some(("ipt", "Biology")));
    }

    #[test]
    fn collection_prefers_provider_names_over_content() {
        let resolver = ClassificationResolver::default();
        let record = MetadataRecord {
            id: "r1".to_string(),
            provider: vec![Provider::new("EMODnet Chemistry", "provider")],
            assets: vec![asset("https://ows.emodnet-bathymetry.eu/data.csv")],
            ..MetadataRecord::default()
        };
        let sink = RecordingSink::default();
        assert_eq!(resolver.resolve_collection(&record, &sink), "Chemistry");
    }

    #[test]
    fn layers_fall_through_to_abstract_and_default() {
        let resolver = ClassificationResolver::default();
        let sink = RecordingSink::default();
        let record = MetadataRecord {
            id: "r1".to_string(),
            subjects: vec!["Oceanography".to_string()],
            abstract_text: Some("Sediment geology of the shelf".to_string()),
            ..MetadataRecord::default()
        };
        assert_eq!(resolver.resolve_collection(&record, &sink), "Geology");
        assert_eq!(resolver.resolve_thematic_lot(&record, &sink), "EMODnet Geology");

        let bare = MetadataRecord::default();
        assert_eq!(resolver.resolve_collection(&bare, &sink), DEFAULT_LABEL);
        assert_eq!(resolver.resolve_thematic_lot(&bare, &sink), DEFAULT_LABEL);
    }

    #[test]
    fn case_sensitivity_differs_between_lookups() {
        let resolver = ClassificationResolver::default();
        let sink = RecordingSink::default();
        let record = MetadataRecord {
            id: "r1".to_string(),
            subjects: vec!["Sea Water TEMPERATURE".to_string(), "GEOLOGY".to_string()],
            ..MetadataRecord::default()
        };
        assert_eq!(resolver.resolve_variable_family(&record, &sink), "Temperature");
        assert_eq!(resolver.resolve_collection(&record, &sink), DEFAULT_LABEL);
    }

    #[test]
    fn variable_family_uses_title_then_provider_name() {
        let resolver = ClassificationResolver::default();
        let sink = RecordingSink::default();
        let titled = MetadataRecord {
            title: Some("Dissolved Oxygen climatology".to_string()),
            ..MetadataRecord::default()
        };
        assert_eq!(resolver.resolve_variable_family(&titled, &sink), "o2");

        let provided = MetadataRecord {
            provider: vec![Provider::new("EMODnet Physics", "provider")],
            ..MetadataRecord::default()
        };
        assert_eq!(resolver.resolve_variable_family(&provided, &sink), "Physics");
    }

    #[test]
    fn explicit_fields_win() {
        let resolver = ClassificationResolver::default();
        let sink = RecordingSink::default();
        let record = MetadataRecord {
            thematic_lot: Some("EMODnet Physics".to_string()),
            variable_family: Some("Waves".to_string()),
            abstract_text: Some("geology".to_string()),
            ..MetadataRecord::default()
        };
        assert_eq!(resolver.resolve_thematic_lot(&record, &sink), "EMODnet Physics");
        assert_eq!(resolver.resolve_variable_family(&record, &sink), "Waves");
    }

    #[test]
    fn provider_derivation_order_and_fallback() {
        let resolver = ClassificationResolver::default();
        let sink = RecordingSink::default();
        let record = MetadataRecord {
            creator: Some("VLIZ".to_string()),
            distributor: Some("EMODnet Biology".to_string()),
            provider: vec![Provider::new("EMODnet Biology", "host")],
            ..MetadataRecord::default()
        };
        let providers = resolver.derive_providers(&record, "EMODnet", &sink);
        assert_eq!(providers, vec![Provider::new("EMODnet Biology", "host")]);

        let providers = resolver.derive_providers(&MetadataRecord::default(), "EMODnet Geology", &sink);
        assert_eq!(providers, vec![Provider::new("EMODnet Geology", "provider")]);
    }

    #[test]
    fn convention_prefixes_collection_identifier() {
        let resolver = ClassificationResolver::default();
        let sink = RecordingSink::default();
        let record = MetadataRecord {
            id: "r1".to_string(),
            publisher: Some("EMODnet Seabed Habitats".to_string()),
            ..MetadataRecord::default()
        };
        let classification = resolver.resolve(&record, &sink);
        assert_eq!(classification.collection, "Seabed Habitats");
        assert_eq!(classification.convention, Some("EMODnet"));
        assert_eq!(
            classification.collection_slug().unwrap().as_str(),
            "emodnet-seabed_habitats"
        );
        assert_eq!(
            classification.collection_title(),
            "Seabed Habitats (EMODnet Convention)"
        );
        assert_eq!(classification.variable_family, "Seabed habitats");

        let plain = resolver.resolve(
            &MetadataRecord {
                creator: Some("Ifremer".to_string()),
                abstract_text: Some("chemistry survey".to_string()),
                ..MetadataRecord::default()
            },
            &sink,
        );
        assert_eq!(plain.convention, None);
        assert_eq!(plain.collection_slug().unwrap().as_str(), "chemistry");
        assert_eq!(plain.collection_title(), "Chemistry");
    }
}
