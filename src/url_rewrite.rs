//! Domain rewriting applied before navigation (C1).
//!
//! Rewriting never affects cache keys: callers always fingerprint the
//! original URL and only pass the rewritten URL to the browser driver.
//! Rule updates publish a fresh immutable snapshot behind an `ArcSwap`
//! rather than taking a lock per request (see design notes on dynamic
//! rule tables).

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RewriteRule {
    pub target_host: String,
    pub scheme: String,
}

pub type RuleSnapshot = Arc<HashMap<String, RewriteRule>>;

/// Holds the currently published rule table. Readers call `load()` once per
/// request and rewrite against that snapshot; writers call `update`/`remove`
/// which build a new map and swap it in atomically.
pub struct RuleTable {
    rules: ArcSwap<HashMap<String, RewriteRule>>,
}

impl RuleTable {
    pub fn new() -> Self {
        Self {
            rules: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    pub fn load(&self) -> RuleSnapshot {
        self.rules.load_full()
    }

    pub fn set(&self, source_host: impl Into<String>, rule: RewriteRule) {
        let source_host = normalize_host(&source_host.into());
        let mut next = (**self.rules.load()).clone();
        next.insert(source_host, rule);
        self.rules.store(Arc::new(next));
    }

    pub fn remove(&self, source_host: &str) -> bool {
        let source_host = normalize_host(source_host);
        let mut next = (**self.rules.load()).clone();
        let removed = next.remove(&source_host).is_some();
        if removed {
            self.rules.store(Arc::new(next));
        }
        removed
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_host(host: &str) -> String {
    let lower = host.to_ascii_lowercase();
    lower.strip_prefix("www.").unwrap_or(&lower).to_string()
}

/// Rewrites `input` against `rules`. Malformed input, or input whose host has
/// no matching rule, is returned unchanged. Path, query, and fragment are
/// preserved byte-for-byte; only scheme and host are substituted.
pub fn rewrite(input: &str, rules: &RuleSnapshot) -> String {
    let Ok(mut url) = Url::parse(input) else {
        return input.to_string();
    };
    let Some(host) = url.host_str() else {
        return input.to_string();
    };
    let key = normalize_host(host);
    let Some(rule) = rules.get(&key) else {
        return input.to_string();
    };

    if url.set_scheme(&rule.scheme).is_err() {
        return input.to_string();
    }
    if url.set_host(Some(&rule.target_host)).is_err() {
        return input.to_string();
    }
    url.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with(source: &str, target: &str, scheme: &str) -> RuleTable {
        let table = RuleTable::new();
        table.set(
            source,
            RewriteRule {
                target_host: target.to_string(),
                scheme: scheme.to_string(),
            },
        );
        table
    }

    #[test]
    fn rewrite_preserves_path_query_fragment() {
        let table = table_with("viding.co", "viding-co_website-revamp", "http");
        let out = rewrite(
            "https://viding.co/mini-rsvp/1240?x=1#frag",
            &table.load(),
        );
        assert_eq!(
            out,
            "http://viding-co_website-revamp/mini-rsvp/1240?x=1#frag"
        );
    }

    #[test]
    fn unmatched_host_is_unchanged() {
        let table = RuleTable::new();
        let input = "https://example.com/path?q=1";
        assert_eq!(rewrite(input, &table.load()), input);
    }

    #[test]
    fn malformed_input_is_unchanged() {
        let table = table_with("example.com", "other.com", "https");
        let input = "not a url";
        assert_eq!(rewrite(input, &table.load()), input);
    }

    #[test]
    fn www_prefix_is_stripped_case_insensitively() {
        let table = table_with("Example.com", "other.com", "https");
        let out = rewrite("https://WWW.example.com/x", &table.load());
        assert_eq!(out, "https://other.com/x");
    }

    #[test]
    fn rewrite_is_idempotent_when_target_is_not_itself_a_source() {
        let table = table_with("a.com", "b.com", "https");
        let once = rewrite("https://a.com/p", &table.load());
        let twice = rewrite(&once, &table.load());
        assert_eq!(once, twice);
    }

    #[test]
    fn set_then_remove_round_trips() {
        let table = table_with("a.com", "b.com", "https");
        assert!(table.remove("a.com"));
        let input = "https://a.com/p";
        assert_eq!(rewrite(input, &table.load()), input);
    }
}
