pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- briefings table
CREATE TABLE IF NOT EXISTS briefings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    generated_at TEXT NOT NULL,
    period_start TEXT,
    period_end TEXT,
    post_count INTEGER NOT NULL DEFAULT 0,
    summary TEXT
);

-- posts table
CREATE TABLE IF NOT EXISTS posts (
    id TEXT PRIMARY KEY,
    author TEXT NOT NULL,
    content TEXT,
    content_text TEXT,
    media_urls TEXT NOT NULL DEFAULT '[]',
    post_url TEXT,
    published_at TEXT,
    fetched_at TEXT NOT NULL,
    category TEXT,
    category_reason TEXT,
    confidence REAL,
    briefing_id INTEGER REFERENCES briefings(id),
    classify_attempts INTEGER NOT NULL DEFAULT 0,
    last_classify_attempt TEXT
);

CREATE INDEX IF NOT EXISTS idx_posts_category ON posts(category);
CREATE INDEX IF NOT EXISTS idx_posts_briefing_id ON posts(briefing_id);
CREATE INDEX IF NOT EXISTS idx_posts_published_at ON posts(published_at);

-- settings table (JSON-encoded values)
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;
