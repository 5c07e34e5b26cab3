//! Canonical comparison keys for submitted URLs.

use url::form_urlencoded;
use url::Url;

use crate::error::{AppError, Result};

/// Query parameters that only carry tracking state. Compared case-insensitively.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "dclid", "msclkid", "mc_cid", "mc_eid", "ref", "ref_src", "igshid",
];

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

/// Normalize a URL for duplicate detection.
///
/// Lowercases scheme and host, drops default ports, the fragment, trailing
/// slashes on non-root paths and tracking parameters, and sorts the remaining
/// query parameters by key. Callers fall back to the raw URL on error.
pub fn normalize_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidUrl("empty url".to_string()));
    }

    let mut url =
        Url::parse(trimmed).map_err(|e| AppError::InvalidUrl(format!("{}: {}", trimmed, e)))?;

    let host = match url.host_str() {
        Some(host) if !host.is_empty() => host.to_ascii_lowercase(),
        _ => return Err(AppError::InvalidUrl(format!("{}: missing host", trimmed))),
    };
    // Special schemes (http, https, ...) are already lowercased by the parser
    if url.host_str() != Some(host.as_str()) {
        url.set_host(Some(&host))
            .map_err(|e| AppError::InvalidUrl(format!("{}: {}", trimmed, e)))?;
    }

    let default_port = match url.scheme() {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    };
    if url.port().is_some() && url.port() == default_port {
        let _ = url.set_port(None);
    }

    url.set_fragment(None);

    let path = url.path().to_string();
    if path != "/" && path.ends_with('/') {
        let stripped = path.trim_end_matches('/');
        url.set_path(if stripped.is_empty() { "/" } else { stripped });
    }

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    // Stable sort keeps the relative order of repeated keys
    params.sort_by(|a, b| a.0.cmp(&b.0));

    if params.is_empty() {
        url.set_query(None);
    } else {
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params.iter())
            .finish();
        url.set_query(Some(&query));
    }

    Ok(url.to_string())
}

/// Dedup key for a raw submission: the normalized URL, or the trimmed input when it cannot be normalized.
pub fn dedup_key(raw: &str) -> String {
    normalize_url(raw).unwrap_or_else(|_| raw.trim().to_string())
}
