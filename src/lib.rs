pub mod app;
pub mod backup;
pub mod catalog;
pub mod classify;
pub mod config;
pub mod domain;
pub mod enrich;
pub mod error;
pub mod export;
pub mod extent;
pub mod links;
pub mod output;
pub mod probe;
pub mod progress;
pub mod report;
pub mod store;
pub mod validate;
