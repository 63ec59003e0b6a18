//! Database layer for the local replica

mod connection;
mod kv_repository;
mod migrations;
mod record_repository;

pub use connection::Database;
pub use kv_repository::{KvRepository, LibSqlKvRepository};
pub use record_repository::{LibSqlRecordRepository, RecordRepository};
