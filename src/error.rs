use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CatalogError {
    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config value: {0}")]
    ConfigValue(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to decode {what}: {message}")]
    Decode { what: String, message: String },

    #[error("failed to encode {what}: {message}")]
    Encode { what: String, message: String },

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("{url} returned status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("XML parse failed: {0}")]
    Xml(String),

    #[error("name {0:?} has no identifier characters")]
    InvalidIdentifier(String),

    #[error("record {0} has no title")]
    MissingTitle(String),

    #[error("item {item} already exists in collection {collection}")]
    ItemExists { collection: String, item: String },

    #[error("record {0} has no assets")]
    NoAssets(String),

    #[error("variable family not found in catalog: {0}")]
    FamilyNotFound(String),

    #[error("collection not found in catalog: {0}")]
    CollectionNotFound(String),

    #[error("malformed catalog document {path}: {message}")]
    MalformedCatalog { path: String, message: String },

    #[error("export of {id} failed: {message}")]
    Export { id: String, message: String },

    #[error("archive transfer failed: {0}")]
    Archive(String),
}
