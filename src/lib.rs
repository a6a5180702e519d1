//! Media catalog ingestion: content hashing, thumbnails, perceptual
//! duplicate grouping and the deletion cascade, behind a single-flight
//! scan lock.

pub mod config;
pub mod core;
pub mod database;
pub mod schema;
pub mod services;

pub use config::{CatalogConfig, FolderConfig};
pub use database::Database;
pub use services::{Catalog, ScanMode, ScanOutcome};
