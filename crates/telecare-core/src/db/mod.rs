//! Database layer for Telecare

mod connection;
mod meta_repository;
mod migrations;
mod queue_repository;
mod record_repository;

pub use connection::Database;
pub use meta_repository::{LibSqlMetaRepository, MetaRepository, SyncMeta};
pub use queue_repository::{LibSqlQueueRepository, QueueRepository};
pub use record_repository::{LibSqlRecordRepository, RecordFilter, RecordRepository, StatusCounts};
