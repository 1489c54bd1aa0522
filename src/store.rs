use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde::de::DeserializeOwned;
use walkdir::WalkDir;

use crate::domain::Slug;
use crate::error::CatalogError;

pub const CATALOG_FILE: &str = "catalog.json";
pub const COLLECTION_FILE: &str = "collection.json";

/// On-disk layout of one pipeline workspace.
///
/// The catalog tree is self-contained: families live at
/// `<family>/catalog.json`, collections at `<family>/<collection>/collection.json`
/// and items at `<family>/<collection>/<item>/<item>.json`.
#[derive(Debug, Clone)]
pub struct Store {
    data_dir: Utf8PathBuf,
    stac_dir: Utf8PathBuf,
    records_path: Utf8PathBuf,
    catalog_title: String,
}

impl Store {
    pub fn new(
        data_dir: Utf8PathBuf,
        stac_dir: Utf8PathBuf,
        records_path: Utf8PathBuf,
        catalog_title: impl Into<String>,
    ) -> Self {
        Self {
            data_dir,
            stac_dir,
            records_path,
            catalog_title: catalog_title.into(),
        }
    }

    /// Workspace rooted at `data_dir` with the default file names.
    pub fn in_dir(data_dir: &Utf8Path, catalog_title: &str) -> Self {
        Self::new(
            data_dir.to_path_buf(),
            data_dir.join("stac"),
            data_dir.join(format!("all_{catalog_title}_records.json")),
            catalog_title,
        )
    }

    pub fn data_dir(&self) -> &Utf8Path {
        &self.data_dir
    }

    pub fn stac_dir(&self) -> &Utf8Path {
        &self.stac_dir
    }

    pub fn records_path(&self) -> &Utf8Path {
        &self.records_path
    }

    pub fn catalog_root_path(&self) -> Utf8PathBuf {
        self.stac_dir.join(CATALOG_FILE)
    }

    pub fn family_path(&self, family: &Slug) -> Utf8PathBuf {
        self.stac_dir.join(family.as_str()).join(CATALOG_FILE)
    }

    pub fn collection_path(&self, family: &Slug, collection: &Slug) -> Utf8PathBuf {
        self.stac_dir
            .join(family.as_str())
            .join(collection.as_str())
            .join(COLLECTION_FILE)
    }

    pub fn item_path(&self, family: &Slug, collection: &Slug, item: &Slug) -> Utf8PathBuf {
        self.stac_dir
            .join(family.as_str())
            .join(collection.as_str())
            .join(item.as_str())
            .join(format!("{item}.json"))
    }

    pub fn progress_json_path(&self) -> Utf8PathBuf {
        self.data_dir
            .join(format!("all_{}_processed_records.json", self.catalog_title))
    }

    pub fn progress_csv_path(&self) -> Utf8PathBuf {
        self.data_dir
            .join(format!("all_{}_processed_records.csv", self.catalog_title))
    }

    pub fn ensure_dirs(&self) -> Result<(), CatalogError> {
        for dir in [&self.data_dir, &self.stac_dir] {
            fs::create_dir_all(dir.as_std_path())
                .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
        }
        Ok(())
    }

    pub fn exists(path: &Utf8Path) -> bool {
        path.as_std_path().exists()
    }

    pub fn read_json<T: DeserializeOwned>(path: &Utf8Path) -> Result<T, CatalogError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| CatalogError::Filesystem(format!("{path}: {err}")))?;
        serde_json::from_str(&content).map_err(|err| CatalogError::Decode {
            what: path.to_string(),
            message: err.to_string(),
        })
    }

    pub fn write_json_atomic<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), CatalogError> {
        let content = serde_json::to_vec_pretty(value).map_err(|err| CatalogError::Encode {
            what: path.to_string(),
            message: err.to_string(),
        })?;
        Self::write_bytes_atomic(path, &content)
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), CatalogError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
        }
        let tmp_path = path.with_extension("tmp");
        fs::write(tmp_path.as_std_path(), content)
            .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
        fs::rename(tmp_path.as_std_path(), path.as_std_path())
            .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn copy_file_atomic(source: &Utf8Path, dest: &Utf8Path) -> Result<(), CatalogError> {
        let parent = dest
            .parent()
            .ok_or_else(|| CatalogError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
        let temp = tempfile::Builder::new()
            .prefix("geonet-stac-file")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
        fs::copy(source.as_std_path(), temp.path())
            .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
        temp.persist(dest.as_std_path())
            .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
        Ok(())
    }

    /// Regular files below `root`, sorted; a single file yields itself.
    pub fn list_files(root: &Utf8Path) -> Result<Vec<Utf8PathBuf>, CatalogError> {
        let mut files = Vec::new();
        for entry in WalkDir::new(root.as_std_path()).sort_by_file_name() {
            let entry = entry.map_err(|err| CatalogError::Filesystem(err.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = Utf8PathBuf::from_path_buf(entry.into_path())
                .map_err(|path| CatalogError::Filesystem(format!("non UTF-8 path {}", path.display())))?;
            files.push(path);
        }
        Ok(files)
    }
}
