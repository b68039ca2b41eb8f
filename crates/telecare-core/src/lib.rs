//! telecare-core - Offline-first data and sync layer for Telecare
//!
//! This crate contains the local store, the outbound sync queue and its
//! dispatcher, connectivity monitoring, and the emergency SOS path shared by
//! all Telecare front-ends (mobile shell, CLI).

pub mod clock;
pub mod config;
pub mod db;
pub mod emergency;
pub mod engine;
pub mod error;
pub mod models;
pub mod network;
pub mod services;
pub mod sync;
pub mod util;

pub use config::SyncSettings;
pub use engine::OfflineEngine;
pub use error::{Error, Result};
pub use models::{Collection, Record, RecordId, SyncStatus, SyncSummary};
pub use services::LocalStore;
