// SPDX-License-Identifier: MPL-2.0

//! Rate-gated Bluesky sync and relationship analytics.
//!
//! The engine mirrors a slice of the user's network into a local store
//! ([`sync`]) and scores relationships from it ([`analytics`]). Every outbound
//! call goes through one [`ratelimit::RateLimiter`] instance.

pub mod analytics;
pub mod atproto;
pub mod config;
pub mod ratelimit;
pub mod state;
pub mod store;
pub mod sync;
