pub const SCHEMA: &str = r#"
-- entries table
CREATE TABLE IF NOT EXISTS entries (
    id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    source_url TEXT NOT NULL,
    normalized_url TEXT NOT NULL,
    tag TEXT,
    notes TEXT,
    time_spent_seconds INTEGER,
    quantity INTEGER,
    canonical_url TEXT,
    domain TEXT,
    source_type TEXT NOT NULL DEFAULT 'other',
    title TEXT,
    description TEXT,
    published_at TEXT,
    runtime_seconds INTEGER,
    metadata_json TEXT,
    enrichment_status TEXT NOT NULL DEFAULT 'pending',
    enrichment_error TEXT,
    enriched_at TEXT,
    summary_text TEXT,
    summary_status TEXT NOT NULL DEFAULT 'pending',
    summary_error TEXT,
    summary_provider TEXT,
    summary_model TEXT,
    summary_version TEXT,
    summary_generated_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_entries_normalized_url ON entries(normalized_url);
CREATE INDEX IF NOT EXISTS idx_entries_enrichment_status ON entries(enrichment_status, created_at);
CREATE INDEX IF NOT EXISTS idx_entries_summary_status ON entries(summary_status, enrichment_status, created_at);

-- summary_cache table (one row per canonical URL hash)
CREATE TABLE IF NOT EXISTS summary_cache (
    url_hash TEXT PRIMARY KEY,
    canonical_url TEXT NOT NULL,
    summary_text TEXT NOT NULL,
    provider TEXT NOT NULL,
    model TEXT NOT NULL,
    version TEXT NOT NULL,
    created_at TEXT NOT NULL
);
"#;
