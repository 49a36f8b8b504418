//! # aisrelay-core
//!
//! Core AIS data model, vessel store and configuration.
//!
//! This crate provides:
//! - Data model types (Mmsi, PositionReport, VesselSummary, BoundingBox)
//! - The `VesselStore` persistence trait, with in-memory and SQLite implementations
//! - Settings and the `ConfigStorage` abstraction
//!
//! This crate is intentionally runtime-agnostic and contains no async code.

pub mod config;
pub mod model;
pub mod sqlite;
pub mod store;

pub use config::{
    ConfigError, ConfigStorage, FeedSettings, FileConfigStorage, Settings, StorageBackend,
    StorageSettings,
};
pub use model::*;
pub use sqlite::SqliteStore;
pub use store::{MemoryStore, StoreError, VesselPage, VesselPosition, VesselQuery, VesselStore};
