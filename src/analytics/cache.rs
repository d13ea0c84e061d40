// SPDX-License-Identifier: MPL-2.0

use crate::analytics::engine::{AnalyticsEngine, NoiseScore, ReciprocityScore};
use crate::store::{CachedAnalytics, LocalStore, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Default snapshot lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);

/// One complete computation of both score sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSnapshot {
    pub noise_scores: Vec<NoiseScore>,
    pub reciprocity_scores: Vec<ReciprocityScore>,
    pub computed_at: DateTime<Utc>,
}

/// Time-bounded memo of [`AnalyticsEngine`] output, persisted in the store
/// so it survives restarts.
pub struct AnalyticsCache {
    engine: AnalyticsEngine,
    store: Arc<dyn LocalStore>,
    ttl: Duration,
    /// Serializes check-and-recompute so callers never see a half-written row.
    refresh: Mutex<()>,
}

impl AnalyticsCache {
    pub fn new(engine: AnalyticsEngine, store: Arc<dyn LocalStore>, ttl: Duration) -> Self {
        Self {
            engine,
            store,
            ttl,
            refresh: Mutex::new(()),
        }
    }

    pub fn engine(&self) -> &AnalyticsEngine {
        &self.engine
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get_analytics(&self) -> Result<AnalyticsSnapshot, StoreError> {
        self.get_analytics_at(Utc::now())
    }

    /// Cached snapshot if younger than the TTL at `now`, else a fresh one.
    pub fn get_analytics_at(&self, now: DateTime<Utc>) -> Result<AnalyticsSnapshot, StoreError> {
        let _guard = self.refresh.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(cached) = self.store.get_cached_analytics()?
            && self.is_fresh(cached.computed_at, now)
        {
            match serde_json::from_str::<AnalyticsSnapshot>(&cached.payload) {
                Ok(snapshot) => return Ok(snapshot),
                Err(e) => tracing::warn!(error = %e, "discarding unreadable analytics snapshot"),
            }
        }

        self.recompute(now)
    }

    /// Drop the snapshot so the next read recomputes.
    pub fn invalidate(&self) -> Result<(), StoreError> {
        let _guard = self.refresh.lock().unwrap_or_else(PoisonError::into_inner);
        self.store.clear_cached_analytics()?;
        tracing::debug!("analytics cache invalidated");
        Ok(())
    }

    fn is_fresh(&self, computed_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        // a snapshot from the future counts as age zero
        let age = (now - computed_at).to_std().unwrap_or_default();
        age < self.ttl
    }

    fn recompute(&self, now: DateTime<Utc>) -> Result<AnalyticsSnapshot, StoreError> {
        let (noise_scores, reciprocity_scores) = self.engine.compute_all()?;
        let computed_at = DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);
        let snapshot = AnalyticsSnapshot {
            noise_scores,
            reciprocity_scores,
            computed_at,
        };

        let payload = serde_json::to_string(&snapshot)?;
        self.store.put_cached_analytics(&CachedAnalytics {
            payload: payload.clone(),
            computed_at,
        })?;

        tracing::info!(
            contributors = snapshot.noise_scores.len(),
            counterparts = snapshot.reciprocity_scores.len(),
            "analytics recomputed"
        );

        // Hand out what a cache hit would return, so repeated reads agree exactly.
        Ok(serde_json::from_str(&payload)?)
    }
}
