//! Bidirectional sync between the local replica and the remote store
//!
//! - [`AutoSync`] pushes local commits as they happen.
//! - [`RealtimeSync`] applies remote change notifications.
//! - [`SyncManager`] runs staged full pulls and push-all recovery.
//! - [`RetryQueue`] and [`RetryProcessor`] replay what could not be pushed.
//! - [`SyncEngine`] wires them together around one replica.

mod apply;
mod auto_sync;
mod engine;
mod guard;
mod manager;
mod realtime;
mod retry_processor;
mod retry_queue;
mod status;

pub use apply::{apply_remote_change, merge_records, ApplyOutcome};
pub use auto_sync::{AutoSync, PushOutcome, PushReport};
pub use engine::SyncEngine;
pub use guard::{FlightGuard, PushSuppression, SingleFlight, SuppressionGuard};
pub use manager::{
    FullSyncOptions, FullSyncOutcome, FullSyncReport, PushAllOutcome, PushAllReport, SyncManager,
    LAST_FULL_SYNC_KEY,
};
pub use realtime::{RealtimeSync, SubscriptionReport};
pub use retry_processor::{ProcessOutcome, ProcessReport, RetryProcessor};
pub use retry_queue::{RetryQueue, RETRY_QUEUE_KEY};
pub use status::{StatusBoard, SyncSnapshot, SyncState};
