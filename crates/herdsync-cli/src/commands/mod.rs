pub mod auth_cmd;
pub mod common;
pub mod config;
pub mod queue;
pub mod status;
pub mod sync;
