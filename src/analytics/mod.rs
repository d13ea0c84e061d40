// SPDX-License-Identifier: MPL-2.0

mod cache;
mod engine;

pub use cache::{AnalyticsCache, AnalyticsSnapshot, DEFAULT_TTL};
pub use engine::{
    AnalyticsEngine, Contribution, NoiseScore, ReciprocityScore, noise_outliers, one_sided,
};
