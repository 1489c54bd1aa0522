use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::catalog::CatalogRoot;
use crate::enrich::EnrichmentTemplates;
use crate::error::CatalogError;
use crate::store::Store;
use crate::validate::ValidationTimeouts;

pub const DEFAULT_CONFIG_FILE: &str = "geonet-stac.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub catalog_title: Option<String>,
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub stac_dir: Option<String>,
    #[serde(default)]
    pub records_path: Option<String>,
    #[serde(default)]
    pub root: Option<CatalogRoot>,
    #[serde(default)]
    pub records_to_process: Vec<String>,
    #[serde(default)]
    pub link_timeout_secs: Option<u64>,
    #[serde(default)]
    pub service_timeout_secs: Option<u64>,
    #[serde(default)]
    pub default_license: Option<String>,
    #[serde(default)]
    pub enrichment: Option<EnrichmentTemplates>,
    #[serde(default)]
    pub enrich: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub catalog_title: String,
    pub data_dir: Utf8PathBuf,
    pub stac_dir: Utf8PathBuf,
    pub records_path: Utf8PathBuf,
    pub root: CatalogRoot,
    /// Identifier allow-list; empty means every record.
    pub records_to_process: Vec<String>,
    pub timeouts: ValidationTimeouts,
    pub default_license: String,
    pub enrichment: EnrichmentTemplates,
    pub enrich: bool,
}

impl ResolvedConfig {
    pub fn store(&self) -> Store {
        Store::new(
            self.data_dir.clone(),
            self.stac_dir.clone(),
            self.records_path.clone(),
            self.catalog_title.clone(),
        )
    }

    pub fn should_process(&self, id: &str) -> bool {
        self.records_to_process.is_empty() || self.records_to_process.iter().any(|wanted| wanted == id)
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or the default file from the working directory and then
    /// the user config directory. Without any file the defaults apply; an
    /// explicit path must be readable.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, CatalogError> {
        let config_path = match path {
            Some(path) => Some(PathBuf::from(path)),
            None => Self::default_paths().into_iter().find(|candidate| candidate.exists()),
        };

        let config = match config_path {
            Some(config_path) => {
                let content = fs::read_to_string(&config_path)
                    .map_err(|_| CatalogError::ConfigRead(config_path.clone()))?;
                serde_json::from_str(&content).map_err(|err| CatalogError::ConfigParse(err.to_string()))?
            }
            None => Config::default(),
        };

        Self::resolve_config(config)
    }

    pub fn default_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(DEFAULT_CONFIG_FILE)];
        if let Some(dirs) = ProjectDirs::from("eu", "emodnet", "geonet-stac") {
            paths.push(dirs.config_dir().join(DEFAULT_CONFIG_FILE));
        }
        paths
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, CatalogError> {
        let catalog_title = non_empty(config.catalog_title, "catalog_title")?
            .unwrap_or_else(|| "emodnetgeonetwork".to_string());
        let data_dir = Utf8PathBuf::from(non_empty(config.data_dir, "data_dir")?.unwrap_or_else(|| "data".to_string()));
        let stac_dir = non_empty(config.stac_dir, "stac_dir")?
            .map(Utf8PathBuf::from)
            .unwrap_or_else(|| data_dir.join("stac"));
        let records_path = non_empty(config.records_path, "records_path")?
            .map(Utf8PathBuf::from)
            .unwrap_or_else(|| data_dir.join(format!("all_{catalog_title}_records.json")));

        let root = config.root.unwrap_or_default();
        if root.id.trim().is_empty() {
            return Err(CatalogError::ConfigValue("root.id must not be empty".to_string()));
        }

        let enrichment = config.enrichment.unwrap_or_default();
        for template in [&enrichment.xml_url_template, &enrichment.csw_url_template] {
            if !template.contains(crate::enrich::ID_PLACEHOLDER) {
                return Err(CatalogError::ConfigValue(format!(
                    "enrichment template {template:?} has no {{id}} placeholder"
                )));
            }
        }

        Ok(ResolvedConfig {
            catalog_title,
            data_dir,
            stac_dir,
            records_path,
            root,
            records_to_process: config.records_to_process,
            timeouts: ValidationTimeouts {
                link: Some(timeout(config.link_timeout_secs, 10, "link_timeout_secs")?),
                service: Some(timeout(config.service_timeout_secs, 20, "service_timeout_secs")?),
            },
            default_license: config.default_license.unwrap_or_else(|| "CC-BY-4.0".to_string()),
            enrichment,
            enrich: config.enrich.unwrap_or(true),
        })
    }
}

fn non_empty(value: Option<String>, field: &str) -> Result<Option<String>, CatalogError> {
    match value {
        Some(value) if value.trim().is_empty() => Err(CatalogError::ConfigValue(format!(
            "{field} must not be empty"
        ))),
        other => Ok(other),
    }
}

fn timeout(value: Option<u64>, default: u64, field: &str) -> Result<Duration, CatalogError> {
    match value.unwrap_or(default) {
        0 => Err(CatalogError::ConfigValue(format!("{field} must be positive"))),
        secs => Ok(Duration::from_secs(secs)),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn defaults_follow_data_dir() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved.catalog_title, "emodnetgeonetwork");
        assert_eq!(resolved.stac_dir, "data/stac");
        assert_eq!(resolved.records_path, "data/all_emodnetgeonetwork_records.json");
        assert_eq!(resolved.root.id, "emodnet_geonetwork");
        assert_eq!(resolved.timeouts, ValidationTimeouts::default());
        assert_eq!(resolved.default_license, "CC-BY-4.0");
        assert!(resolved.enrich);
        assert!(resolved.should_process("anything"));
    }

    #[test]
    fn rejects_zero_timeout() {
        let config = Config {
            link_timeout_secs: Some(0),
            ..Config::default()
        };
        assert_matches!(
            ConfigLoader::resolve_config(config),
            Err(CatalogError::ConfigValue(_))
        );
    }
}
