// SPDX-License-Identifier: MPL-2.0

pub const APP_ID: &str = "io.github.sethcottle.Rapport";
pub const APP_NAME: &str = "rapport";

/// Default PDS used for login when the user does not name one.
pub const DEFAULT_PDS: &str = "https://bsky.social";

/// Unauthenticated AppView endpoint for public reads.
pub const PUBLIC_API: &str = "https://public.api.bsky.app";

pub const USER_AGENT: &str = "Rapport/0.1 (Bluesky relationship analytics)";
