//! Per-user bookkeeping for long-running generation operations.
//!
//! State machine: `Pending → InProgress → {Completed, Failed, Cancelled}`,
//! plus `Pending → {Completed, Failed, Cancelled}`. Terminal states are final.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod handlers;
pub mod manager;
pub mod store;

pub use manager::OperationManager;
pub use store::{InMemoryOperationStore, OperationStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Failed | OperationStatus::Cancelled
        )
    }
}

/// One tracked async unit of work.
#[derive(Debug, Clone, Serialize)]
pub struct Operation {
    pub id: String,
    pub user_id: String,
    pub operation_type: String,
    pub status: OperationStatus,
    pub start_time: DateTime<Utc>,
    pub completed_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub metadata: Map<String, Value>,
    pub result: Option<Value>,
    /// Creation order; breaks ties between identical start times.
    #[serde(skip)]
    pub(crate) sequence: u64,
}

/// Concurrency cap, timeout and retention delays.
#[derive(Debug, Clone)]
pub struct OperationLimits {
    pub max_concurrent: usize,
    pub timeout: Duration,
    pub completed_retention: Duration,
    pub failed_retention: Duration,
    pub cancelled_retention: Duration,
}

impl Default for OperationLimits {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            timeout: Duration::from_secs(30),
            completed_retention: Duration::from_secs(5 * 60),
            failed_retention: Duration::from_secs(10 * 60),
            cancelled_retention: Duration::from_secs(60),
        }
    }
}

impl OperationLimits {
    /// How long a terminal record stays visible before it is dropped.
    pub fn retention(&self, status: OperationStatus) -> Option<Duration> {
        match status {
            OperationStatus::Completed => Some(self.completed_retention),
            OperationStatus::Failed => Some(self.failed_retention),
            OperationStatus::Cancelled => Some(self.cancelled_retention),
            OperationStatus::Pending | OperationStatus::InProgress => None,
        }
    }
}
