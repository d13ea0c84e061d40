// SPDX-License-Identifier: MPL-2.0

//! Progress events emitted during a sync run, for presentation layers.
//! Logging goes through `tracing` independently of these.

use crate::sync::types::StageKey;

#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum SyncProgress {
    /// A stage recorded `syncing` and is about to hit the network.
    StageStarted { stage: StageKey },

    /// One page of a listing was applied.
    PageFetched {
        stage: StageKey,
        /// Page number (1-indexed) within the listing.
        page: u32,
        count: usize,
        total_so_far: usize,
    },

    /// One concurrent batch of fan-out tasks finished.
    BatchCompleted {
        stage: StageKey,
        /// Batch number (1-indexed).
        batch: usize,
        batches: usize,
        succeeded: usize,
        failed: usize,
    },

    StageCompleted { stage: StageKey, items: u64 },

    StageFailed { stage: StageKey, error: String },
}

/// Caller-supplied progress sink.
pub type ProgressCallback = Box<dyn Fn(SyncProgress) + Send + Sync>;
