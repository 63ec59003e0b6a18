//! Durable retry work items and their backoff schedule

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entity::{EntityType, OperationKind};

/// A failed or deferred push waiting in the retry queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOperation {
    pub id: Uuid,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub operation: OperationKind,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl SyncOperation {
    pub fn new(
        entity_type: EntityType,
        entity_id: impl Into<String>,
        operation: OperationKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_type,
            entity_id: entity_id.into(),
            operation,
            enqueued_at: Utc::now(),
            retry_count: 0,
            last_attempt_at: None,
            last_error: None,
        }
    }

    /// De-duplication key.
    pub fn key(&self) -> (EntityType, &str, OperationKind) {
        (self.entity_type, self.entity_id.as_str(), self.operation)
    }

    pub const fn is_exhausted(&self, policy: &BackoffPolicy) -> bool {
        self.retry_count >= policy.max_retries
    }

    /// Earliest instant this operation may be replayed. `None` when exhausted.
    pub fn next_attempt_at(&self, policy: &BackoffPolicy) -> Option<DateTime<Utc>> {
        if self.is_exhausted(policy) {
            return None;
        }
        let Some(last_attempt) = self.last_attempt_at else {
            return Some(self.enqueued_at);
        };
        let delay = chrono::Duration::from_std(policy.delay_for(self.retry_count))
            .unwrap_or(chrono::Duration::MAX);
        Some(last_attempt.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }

    /// Whether the operation is eligible for replay at `now`.
    pub fn can_retry_now(&self, now: DateTime<Utc>, policy: &BackoffPolicy) -> bool {
        if self.is_exhausted(policy) {
            return false;
        }
        match self.last_attempt_at {
            None => true,
            Some(_) => self.next_attempt_at(policy).is_some_and(|at| now >= at),
        }
    }
}

/// Capped exponential backoff: `min(base * 2^retry_count, cap)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
            max_retries: 5,
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_count).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.cap, |delay| delay.min(self.cap))
    }
}
