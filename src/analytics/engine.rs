// SPDX-License-Identifier: MPL-2.0

use crate::store::{Engagement, Interaction, LocalStore, Post, PostKind, Profile, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Multiplier applied to accounts the user follows without being followed back.
const ONE_WAY_FOLLOW_BOOST: f64 = 1.2;
/// Smaller side must reach this share of the larger side to count as balanced.
const BALANCED_RATIO: f64 = 0.8;

/// Stored activity of one account, by post kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contribution {
    pub did: String,
    pub posts: u32,
    pub reposts: u32,
    pub replies: u32,
    pub quotes: u32,
    pub total: u32,
}

impl Contribution {
    fn record(&mut self, kind: &PostKind) {
        match kind {
            PostKind::Post => self.posts += 1,
            PostKind::Repost { .. } => self.reposts += 1,
            PostKind::Reply { .. } => self.replies += 1,
            PostKind::Quote { .. } => self.quotes += 1,
        }
        self.total += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseScore {
    pub did: String,
    pub handle: Option<String>,
    /// In `[0, 1]`; higher means more volume with less engagement from the user.
    pub score: f64,
    pub volume_percentile: f64,
    pub engagement_rate: f64,
    pub total_activity: u32,
    pub your_interactions: u32,
    pub is_mutual: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReciprocityScore {
    pub did: String,
    pub handle: Option<String>,
    /// Share of the mutual activity that came from the other account.
    pub score: f64,
    pub your_total: u32,
    pub their_total: u32,
    pub balanced: bool,
}

/// Scores relationships from what the store holds for one account.
#[derive(Clone)]
pub struct AnalyticsEngine {
    store: Arc<dyn LocalStore>,
    account_did: String,
}

impl AnalyticsEngine {
    pub fn new(store: Arc<dyn LocalStore>, account_did: impl Into<String>) -> Self {
        Self {
            store,
            account_did: account_did.into(),
        }
    }

    pub fn account_did(&self) -> &str {
        &self.account_did
    }

    /// Per-contributor activity counts in first-seen order.
    pub fn aggregate_contributions(&self) -> Result<Vec<Contribution>, StoreError> {
        let posts = self.store.all_posts()?;
        Ok(aggregate(&posts, &self.account_did))
    }

    pub fn noise_score(&self, did: &str) -> Result<NoiseScore, StoreError> {
        Ok(self.dataset()?.noise(did))
    }

    pub fn reciprocity_score(&self, did: &str) -> Result<ReciprocityScore, StoreError> {
        Ok(self.dataset()?.reciprocity(did))
    }

    /// Every contributor, highest score first.
    pub fn compute_all_noise_scores(&self) -> Result<Vec<NoiseScore>, StoreError> {
        Ok(self.dataset()?.all_noise())
    }

    /// Every account with interactions in either direction, highest score first.
    pub fn compute_all_reciprocity_scores(&self) -> Result<Vec<ReciprocityScore>, StoreError> {
        Ok(self.dataset()?.all_reciprocity())
    }

    /// Contributors whose noise score is at least `threshold`.
    pub fn noise_outliers(&self, threshold: f64) -> Result<Vec<NoiseScore>, StoreError> {
        Ok(noise_outliers(self.compute_all_noise_scores()?, threshold))
    }

    /// Accounts the user engages with that rarely engage back.
    pub fn one_sided(&self, threshold: f64) -> Result<Vec<ReciprocityScore>, StoreError> {
        Ok(one_sided(self.compute_all_reciprocity_scores()?, threshold))
    }

    /// Both score sets from a single read of the store.
    pub fn compute_all(&self) -> Result<(Vec<NoiseScore>, Vec<ReciprocityScore>), StoreError> {
        let dataset = self.dataset()?;
        Ok((dataset.all_noise(), dataset.all_reciprocity()))
    }

    fn dataset(&self) -> Result<Dataset, StoreError> {
        let posts = self.store.all_posts()?;
        let interactions = self.store.all_interactions()?;
        let engagements = self.store.all_engagements()?;
        let profiles = self.store.all_profiles()?;
        Ok(Dataset::build(
            &self.account_did,
            &posts,
            &interactions,
            &engagements,
            profiles,
        ))
    }
}

pub fn noise_outliers(scores: Vec<NoiseScore>, threshold: f64) -> Vec<NoiseScore> {
    scores.into_iter().filter(|s| s.score >= threshold).collect()
}

pub fn one_sided(scores: Vec<ReciprocityScore>, threshold: f64) -> Vec<ReciprocityScore> {
    scores
        .into_iter()
        .filter(|s| s.your_total > 0 && s.score <= threshold)
        .collect()
}

fn aggregate(posts: &[Post], account_did: &str) -> Vec<Contribution> {
    let mut order: Vec<Contribution> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for post in posts {
        let did = post.contributor();
        if did == account_did {
            continue;
        }
        let slot = *index.entry(did).or_insert_with(|| {
            order.push(Contribution {
                did: did.to_string(),
                ..Default::default()
            });
            order.len() - 1
        });
        order[slot].record(&post.kind);
    }

    order
}

/// Counted view of the store used by every score computation.
struct Dataset {
    contributions: Vec<Contribution>,
    totals_by_did: HashMap<String, u32>,
    /// Sorted contributor totals for percentile lookups.
    sorted_totals: Vec<u32>,
    your_counts: HashMap<String, u32>,
    their_counts: HashMap<String, u32>,
    /// Accounts with activity in either direction, first-seen order.
    counterparts: Vec<String>,
    profiles: HashMap<String, Profile>,
}

impl Dataset {
    fn build(
        account_did: &str,
        posts: &[Post],
        interactions: &[Interaction],
        engagements: &[Engagement],
        profiles: Vec<Profile>,
    ) -> Self {
        let contributions = aggregate(posts, account_did);
        let totals_by_did: HashMap<String, u32> = contributions
            .iter()
            .map(|c| (c.did.clone(), c.total))
            .collect();
        let mut sorted_totals: Vec<u32> = contributions.iter().map(|c| c.total).collect();
        sorted_totals.sort_unstable();

        let mut counterparts = Vec::new();
        let mut your_counts: HashMap<String, u32> = HashMap::new();
        for interaction in interactions {
            let did = &interaction.target_author_did;
            if did == account_did {
                continue;
            }
            let count = your_counts.entry(did.clone()).or_insert(0);
            if *count == 0 {
                counterparts.push(did.clone());
            }
            *count += 1;
        }

        let mut their_counts: HashMap<String, u32> = HashMap::new();
        for engagement in engagements {
            let did = &engagement.from_did;
            if did == account_did {
                continue;
            }
            let count = their_counts.entry(did.clone()).or_insert(0);
            if *count == 0 && !your_counts.contains_key(did) {
                counterparts.push(did.clone());
            }
            *count += 1;
        }

        Self {
            contributions,
            totals_by_did,
            sorted_totals,
            your_counts,
            their_counts,
            counterparts,
            profiles: profiles.into_iter().map(|p| (p.did.clone(), p)).collect(),
        }
    }

    fn handle(&self, did: &str) -> Option<String> {
        self.profiles.get(did).map(|p| p.handle.clone())
    }

    /// Share of contributors whose total is at or below `total`.
    fn volume_percentile(&self, total: u32) -> f64 {
        let n = self.sorted_totals.len();
        if n == 0 {
            return 0.0;
        }
        let at_or_below = self.sorted_totals.partition_point(|&t| t <= total);
        at_or_below as f64 / n as f64
    }

    fn noise(&self, did: &str) -> NoiseScore {
        let profile = self.profiles.get(did);
        let is_mutual = profile.is_some_and(|p| p.is_mutual);
        let your_interactions = self.your_counts.get(did).copied().unwrap_or(0);

        let Some(&total) = self.totals_by_did.get(did) else {
            return NoiseScore {
                did: did.to_string(),
                handle: self.handle(did),
                score: 0.0,
                volume_percentile: 0.0,
                engagement_rate: 0.0,
                total_activity: 0,
                your_interactions: 0,
                is_mutual,
            };
        };

        let volume_percentile = self.volume_percentile(total);
        let engagement_rate = if total == 0 {
            0.0
        } else {
            (your_interactions as f64 / total as f64).min(1.0)
        };

        let mut score = volume_percentile * (1.0 - engagement_rate);
        if profile.is_some_and(Profile::is_one_way_followed) {
            score = (score * ONE_WAY_FOLLOW_BOOST).min(1.0);
        }

        NoiseScore {
            did: did.to_string(),
            handle: self.handle(did),
            score,
            volume_percentile,
            engagement_rate,
            total_activity: total,
            your_interactions,
            is_mutual,
        }
    }

    fn reciprocity(&self, did: &str) -> ReciprocityScore {
        let your_total = self.your_counts.get(did).copied().unwrap_or(0);
        let their_total = self.their_counts.get(did).copied().unwrap_or(0);
        let sum = your_total + their_total;

        let score = if sum == 0 {
            0.0
        } else {
            their_total as f64 / sum as f64
        };
        let (low, high) = (your_total.min(their_total), your_total.max(their_total));
        let balanced = high == 0 || low as f64 >= BALANCED_RATIO * high as f64;

        ReciprocityScore {
            did: did.to_string(),
            handle: self.handle(did),
            score,
            your_total,
            their_total,
            balanced,
        }
    }

    fn all_noise(&self) -> Vec<NoiseScore> {
        let mut scores: Vec<NoiseScore> = self
            .contributions
            .iter()
            .map(|c| self.noise(&c.did))
            .collect();
        // stable: ties keep first-seen order
        scores.sort_by(|a, b| b.score.total_cmp(&a.score));
        scores
    }

    fn all_reciprocity(&self) -> Vec<ReciprocityScore> {
        let mut scores: Vec<ReciprocityScore> = self
            .counterparts
            .iter()
            .map(|did| self.reciprocity(did))
            .collect();
        scores.sort_by(|a, b| b.score.total_cmp(&a.score));
        scores
    }
}
