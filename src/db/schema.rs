pub const SCHEMA: &str = r#"
-- feed_targets table
CREATE TABLE IF NOT EXISTS feed_targets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_name TEXT NOT NULL,
    link TEXT NOT NULL,
    site TEXT NOT NULL,
    last_modified TEXT,
    etag TEXT,
    enabled INTEGER NOT NULL DEFAULT 1,
    gone INTEGER NOT NULL DEFAULT 0,
    auth_required INTEGER NOT NULL DEFAULT 0,
    side INTEGER,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_feed_targets_link ON feed_targets(link);

-- sites table (whitelisted publishers and their side)
CREATE TABLE IF NOT EXISTS sites (
    site TEXT PRIMARY KEY,
    side INTEGER NOT NULL,
    publisher TEXT,
    source TEXT
);

-- articles table; `link` is the dedup key, checked by the store rather than
-- by a UNIQUE constraint so duplicates surface as errors
CREATE TABLE IF NOT EXISTS articles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_name TEXT NOT NULL,
    link TEXT NOT NULL,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    summary TEXT NOT NULL,
    authors TEXT NOT NULL DEFAULT '[]',
    published TEXT,
    image TEXT,
    keywords TEXT NOT NULL DEFAULT '[]',
    side INTEGER,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_articles_link ON articles(link);
CREATE INDEX IF NOT EXISTS idx_articles_published ON articles(published);
CREATE INDEX IF NOT EXISTS idx_articles_created_at ON articles(created_at);

CREATE TABLE IF NOT EXISTS article_keywords (
    article_id INTEGER NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
    keyword TEXT NOT NULL,
    PRIMARY KEY (article_id, keyword)
);

CREATE INDEX IF NOT EXISTS idx_article_keywords_keyword ON article_keywords(keyword);

-- bias_pairs table
CREATE TABLE IF NOT EXISTS bias_pairs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    left_id INTEGER NOT NULL REFERENCES articles(id),
    right_id INTEGER NOT NULL REFERENCES articles(id),
    score REAL NOT NULL,
    published TEXT,
    keywords TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_bias_pairs_left ON bias_pairs(left_id);
CREATE INDEX IF NOT EXISTS idx_bias_pairs_right ON bias_pairs(right_id);

-- leases table (named locks with an expiry)
CREATE TABLE IF NOT EXISTS leases (
    name TEXT PRIMARY KEY,
    holder TEXT NOT NULL,
    expires_at TEXT NOT NULL
);
"#;
