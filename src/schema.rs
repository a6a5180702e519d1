//! Catalog tables. `tags` and `asset_tags` are shared with the tagging layer.

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS assets (
    id TEXT PRIMARY KEY,
    path TEXT NOT NULL UNIQUE,
    filename TEXT NOT NULL,
    type TEXT NOT NULL,
    size INTEGER NOT NULL,
    identity_hash TEXT NOT NULL,
    phash_small TEXT NOT NULL,
    phash_medium TEXT NOT NULL,
    phash_large TEXT NOT NULL,
    width INTEGER NOT NULL DEFAULT 0,
    height INTEGER NOT NULL DEFAULT 0,
    artist TEXT,
    rating INTEGER,
    source TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_assets_identity_hash ON assets(identity_hash);
CREATE INDEX IF NOT EXISTS idx_assets_phash_small ON assets(phash_small);
CREATE INDEX IF NOT EXISTS idx_assets_phash_medium ON assets(phash_medium);
CREATE INDEX IF NOT EXISTS idx_assets_phash_large ON assets(phash_large);

CREATE TABLE IF NOT EXISTS duplicate_groups (
    asset_id TEXT PRIMARY KEY REFERENCES assets(id) ON DELETE CASCADE,
    prime_id TEXT NOT NULL REFERENCES assets(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_duplicate_groups_prime ON duplicate_groups(prime_id);

CREATE TABLE IF NOT EXISTS tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    count INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS asset_tags (
    asset_id TEXT NOT NULL REFERENCES assets(id) ON DELETE CASCADE,
    tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
    PRIMARY KEY (asset_id, tag_id)
);

CREATE INDEX IF NOT EXISTS idx_asset_tags_tag ON asset_tags(tag_id);

CREATE TABLE IF NOT EXISTS folders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL UNIQUE,
    recursive INTEGER NOT NULL DEFAULT 1,
    enabled INTEGER NOT NULL DEFAULT 1,
    exclude_patterns TEXT NOT NULL DEFAULT '[]',
    last_scanned_at TEXT
);
";
