//! Duration parsing for media metadata: ISO-8601, clock strings and JSON-LD.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static ISO_DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"PT(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?").expect("Failed to compile duration regex")
});

/// `PT#H#M#S` to seconds. Returns 0 when nothing matches.
pub fn parse_iso8601(duration: &str) -> i64 {
    let Some(caps) = ISO_DURATION_RE.captures(duration) else {
        return 0;
    };
    let part = |i: usize| caps.get(i).map_or(Some(0), |m| m.as_str().parse::<i64>().ok());
    match (part(1), part(2), part(3)) {
        (Some(hours), Some(minutes), Some(seconds)) => to_seconds(hours, minutes, seconds),
        _ => 0,
    }
}

/// 0 when the total does not fit.
fn to_seconds(hours: i64, minutes: i64, seconds: i64) -> i64 {
    hours
        .checked_mul(3600)
        .and_then(|total| minutes.checked_mul(60)?.checked_add(total))
        .and_then(|total| total.checked_add(seconds))
        .unwrap_or(0)
}

/// Seconds from an ISO-8601 duration, `H:MM:SS` / `MM:SS`, or an integer string.
pub fn parse_duration_string(duration: &str) -> i64 {
    let trimmed = duration.trim();
    if trimmed.is_empty() {
        return 0;
    }

    if trimmed.starts_with('P') {
        if trimmed.starts_with("PT") {
            let seconds = parse_iso8601(trimmed);
            if seconds > 0 {
                return seconds;
            }
        }
        // Date part is ignored, e.g. "P0DT1H"
        if let Some(idx) = trimmed.find('T') {
            let seconds = parse_iso8601(&format!("PT{}", &trimmed[idx + 1..]));
            if seconds > 0 {
                return seconds;
            }
        }
    }

    if trimmed.contains(':') {
        let seconds = parse_clock(trimmed);
        if seconds > 0 {
            return seconds;
        }
    }

    match trimmed.parse::<i64>() {
        Ok(seconds) if seconds > 0 => seconds,
        _ => 0,
    }
}

fn parse_clock(duration: &str) -> i64 {
    let parts: Option<Vec<i64>> = duration.split(':').map(parse_clock_part).collect();
    match parts.as_deref() {
        Some([minutes, seconds]) => to_seconds(0, *minutes, *seconds),
        Some([hours, minutes, seconds]) => to_seconds(*hours, *minutes, *seconds),
        _ => 0,
    }
}

fn parse_clock_part(part: &str) -> Option<i64> {
    let trimmed = part.trim();
    // Fractional seconds are truncated
    let whole = trimmed.split('.').next().unwrap_or(trimmed);
    if whole.is_empty() {
        return None;
    }
    whole.parse().ok()
}

/// First positive `duration` found anywhere in a JSON-LD script body.
pub fn parse_json_ld_duration(content: &str) -> i64 {
    let content = content.trim();
    if content.is_empty() {
        return 0;
    }
    match serde_json::from_str::<Value>(content) {
        Ok(data) => find_duration_seconds(&data),
        Err(_) => 0,
    }
}

fn find_duration_seconds(data: &Value) -> i64 {
    match data {
        Value::Object(map) => {
            if let Some(seconds) = map.get("duration").map(parse_duration_value) {
                if seconds > 0 {
                    return seconds;
                }
            }
            map.values()
                .map(find_duration_seconds)
                .find(|s| *s > 0)
                .unwrap_or(0)
        }
        Value::Array(items) => items
            .iter()
            .map(find_duration_seconds)
            .find(|s| *s > 0)
            .unwrap_or(0),
        _ => 0,
    }
}

fn parse_duration_value(value: &Value) -> i64 {
    match value {
        Value::String(s) => parse_duration_string(s),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .filter(|s| *s > 0)
            .unwrap_or(0),
        Value::Object(map) => ["value", "@value"]
            .iter()
            .filter_map(|key| map.get(*key))
            .map(parse_duration_value)
            .find(|s| *s > 0)
            .unwrap_or(0),
        _ => 0,
    }
}
