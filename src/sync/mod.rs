// src/sync/mod.rs
pub mod adapters;
pub mod merge;
pub mod orchestrator;
pub mod scheduler;
pub mod types;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("sync_runs_total", "Refresh runs started.");
        describe_counter!(
            "sync_records_applied_total",
            "Canonical records inserted or replaced."
        );
        describe_counter!(
            "sync_records_stale_total",
            "Source records discarded as not newer than stored state."
        );
        describe_counter!(
            "sync_adapter_errors_total",
            "Adapter fetch/parse/timeout failures."
        );
        describe_counter!(
            "sync_trigger_refused_total",
            "Triggers refused by the access guard."
        );
        describe_counter!("sync_records_parsed_total", "Records parsed from providers.");
        describe_histogram!("sync_parse_ms", "Provider parse time in milliseconds.");
        describe_histogram!("sync_fetch_ms", "Adapter fetch time in milliseconds.");
        describe_gauge!("sync_last_run_ts", "Unix ts when a refresh run last finished.");
    });
}

/// Current wall clock in unix milliseconds.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Normalize an upstream display name: decode entities, strip tags, collapse
/// whitespace, trim.
pub fn normalize_name(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();

    out.trim().to_string()
}

/// Lowercase slug of an identifier part: alphanumerics kept, runs of anything
/// else collapsed to a single '-'. Stable across fetches.
pub fn slugify(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut dash_pending = false;
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            if dash_pending && !out.is_empty() {
                out.push('-');
            }
            dash_pending = false;
            out.push(c.to_ascii_lowercase());
        } else {
            dash_pending = true;
        }
    }
    out
}

/// Natural key: source id prefix + slugged upstream identifier parts.
/// The prefix prevents cross-source collisions.
pub fn natural_key(source_id: &str, parts: &[&str]) -> String {
    let mut key = String::from(source_id);
    for p in parts {
        key.push(':');
        key.push_str(&slugify(p));
    }
    key
}

/// Short hex digest of a JSON value. `serde_json` maps are ordered, so equal
/// values always produce equal digests.
pub fn fingerprint(v: &serde_json::Value) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(v.to_string().as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(16);
    for b in digest.iter().take(8) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_name_strips_tags_and_ws() {
        let s = "  <b>Boston&nbsp;&nbsp;Celtics</b>  ";
        assert_eq!(normalize_name(s), "Boston Celtics");
    }

    #[test]
    fn slugify_is_stable_and_lossy_only_on_separators() {
        assert_eq!(slugify("Basketball NBA"), "basketball-nba");
        assert_eq!(slugify("  401585441 "), "401585441");
        assert_eq!(slugify("a--b__c"), "a-b-c");
    }

    #[test]
    fn natural_key_prefixes_source_id() {
        let k = natural_key("odds-api", &["basketball_nba", "abc123"]);
        assert_eq!(k, "odds-api:basketball-nba:abc123");
    }

    #[test]
    fn fingerprint_is_deterministic_for_equal_values() {
        let a = serde_json::json!({"b": 1, "a": 2});
        let b = serde_json::json!({"a": 2, "b": 1});
        assert_eq!(fingerprint(&a), fingerprint(&b));
        let c = serde_json::json!({"a": 2, "b": 3});
        assert_ne!(fingerprint(&a), fingerprint(&c));
    }
}
