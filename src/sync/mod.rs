// SPDX-License-Identifier: MPL-2.0

mod batch;
mod convert;
mod orchestrator;
mod progress;
mod types;

pub use batch::{BatchSummary, TaskOutcome, run_batched, successful_items};
pub use orchestrator::{SyncOrchestrator, stage_states};
pub use progress::{ProgressCallback, SyncProgress};
pub use types::{
    DEFAULT_BATCH_SIZE, DEFAULT_DAYS_BACK, DEFAULT_RETENTION_DAYS, INCREMENTAL_DAYS_BACK, StageKey,
    StageReport, SyncMode, SyncOptions, SyncReport,
};

use crate::atproto::ClientError;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("sync cancelled")]
    Cancelled,
    #[error("a sync is already running")]
    AlreadyRunning,
}

impl SyncError {
    /// Errors that end the run even when raised by a single fan-out item.
    pub fn escalates(&self) -> bool {
        matches!(
            self,
            SyncError::Client(ClientError::Auth(_) | ClientError::Cancelled) | SyncError::Cancelled
        )
    }

    /// Fold client-side cancellation into [`SyncError::Cancelled`].
    pub fn normalize(self) -> Self {
        match self {
            SyncError::Client(ClientError::Cancelled) => SyncError::Cancelled,
            other => other,
        }
    }
}
