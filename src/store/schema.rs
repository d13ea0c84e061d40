// SPDX-License-Identifier: MPL-2.0

/// SQL schema for the engine database. All timestamps are integer
/// milliseconds since the Unix epoch.
pub const SCHEMA: &str = r#"
PRAGMA user_version = 1;

-- profiles: one row per known account, follow edges relative to the user
CREATE TABLE IF NOT EXISTS profiles (
    did TEXT PRIMARY KEY,
    handle TEXT NOT NULL,
    display_name TEXT,
    avatar TEXT,
    follows_you INTEGER NOT NULL DEFAULT 0,
    you_follow INTEGER NOT NULL DEFAULT 0,
    is_mutual INTEGER NOT NULL DEFAULT 0,
    last_updated INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_profiles_you_follow ON profiles(you_follow);

-- posts: insert-once, counters are fetch-time snapshots
CREATE TABLE IF NOT EXISTS posts (
    uri TEXT PRIMARY KEY,
    cid TEXT NOT NULL,
    author_did TEXT NOT NULL,
    contributor_did TEXT NOT NULL,
    kind TEXT NOT NULL,
    subject TEXT,
    created_at INTEGER NOT NULL,
    indexed_at INTEGER NOT NULL,
    like_count INTEGER NOT NULL DEFAULT 0,
    repost_count INTEGER NOT NULL DEFAULT 0,
    reply_count INTEGER NOT NULL DEFAULT 0,
    quote_count INTEGER NOT NULL DEFAULT 0,
    fetched_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_posts_contributor ON posts(contributor_did);
CREATE INDEX IF NOT EXISTS idx_posts_author ON posts(author_did);
CREATE INDEX IF NOT EXISTS idx_posts_created_at ON posts(created_at);

-- interactions: the user acting on others' posts, keyed type:targetUri
CREATE TABLE IF NOT EXISTS interactions (
    key TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    target_uri TEXT NOT NULL,
    target_author_did TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    own_post_uri TEXT
);

CREATE INDEX IF NOT EXISTS idx_interactions_target_author ON interactions(target_author_did);

-- engagements: others acting on the user's posts, keyed type:fromDid:targetUri
CREATE TABLE IF NOT EXISTS engagements (
    key TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    target_uri TEXT NOT NULL,
    from_did TEXT NOT NULL,
    from_handle TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    their_post_uri TEXT
);

CREATE INDEX IF NOT EXISTS idx_engagements_from ON engagements(from_did);

-- sync_state: one row per stage key
CREATE TABLE IF NOT EXISTS sync_state (
    key TEXT PRIMARY KEY,
    cursor TEXT,
    last_sync_at INTEGER,
    items_processed INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    error TEXT
);

-- cached_analytics: single snapshot row
CREATE TABLE IF NOT EXISTS cached_analytics (
    id TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    computed_at INTEGER NOT NULL
);
"#;

/// Tables wiped by a full reset, in deletion order.
pub const TABLES: [&str; 6] = [
    "posts",
    "interactions",
    "engagements",
    "profiles",
    "sync_state",
    "cached_analytics",
];
