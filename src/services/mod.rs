mod safe_fetcher;
mod summary_cache;
mod text;
mod url_normalizer;

pub use safe_fetcher::{SafeFetcher, UrlGuard, DEFAULT_MAX_BODY_BYTES};
pub use summary_cache::SummaryCache;
pub use text::{clean_text, truncate_chars};
pub use url_normalizer::dedup_key;
