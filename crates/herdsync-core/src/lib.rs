//! herdsync-core - Core library for Herdsync
//!
//! This crate contains the livestock record models, the on-device replica
//! (libSQL), the remote store client (Supabase REST + Realtime), and the
//! offline-first sync engine that reconciles the two.

pub mod auth;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod repository;
pub mod store;
pub mod sync;
pub mod util;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{Error, RemoteError, RemoteErrorKind, Result};
pub use models::{EntityType, LocalRecord, OperationKind, SyncOperation, WriteOrigin};
pub use store::LocalStore;
pub use sync::SyncEngine;
