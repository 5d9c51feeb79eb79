//! Category TTL Policy
//!
//! Keys are grouped into categories by string prefix. Each category maps to a
//! default lifetime, consulted only when a caller supplies no explicit TTL.
//! The longest matching prefix wins.

use serde::{Deserialize, Serialize};

/// Seconds in a minute
const MINUTE: u64 = 60;
/// Seconds in an hour
const HOUR: u64 = 60 * MINUTE;
/// Seconds in a day
const DAY: u64 = 24 * HOUR;

/// Lifetime resolved for a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryTtl {
    /// Cache for this many seconds (0 = never expires)
    Expire(u64),
    /// Never cache keys of this category
    NoCache,
}

impl CategoryTtl {
    /// Seconds to live, or `None` when the category is never cached
    pub fn seconds(&self) -> Option<u64> {
        match self {
            CategoryTtl::Expire(secs) => Some(*secs),
            CategoryTtl::NoCache => None,
        }
    }
}

/// A single prefix rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlRule {
    /// Key prefix, e.g. `user:`
    pub prefix: String,
    /// Lifetime in seconds
    #[serde(default)]
    pub ttl_seconds: u64,
    /// False for real-time content that must never be cached
    #[serde(default = "default_cacheable")]
    pub cacheable: bool,
}

fn default_cacheable() -> bool {
    true
}

impl TtlRule {
    /// Rule caching matching keys for `ttl_seconds`
    pub fn expire(prefix: impl Into<String>, ttl_seconds: u64) -> Self {
        Self {
            prefix: prefix.into(),
            ttl_seconds,
            cacheable: true,
        }
    }

    /// Rule that keeps matching keys out of the cache
    pub fn no_cache(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ttl_seconds: 0,
            cacheable: false,
        }
    }

    fn resolve(&self) -> CategoryTtl {
        if self.cacheable {
            CategoryTtl::Expire(self.ttl_seconds)
        } else {
            CategoryTtl::NoCache
        }
    }
}

/// Prefix → TTL table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlPolicy {
    /// Prefix rules
    pub rules: Vec<TtlRule>,
    /// TTL for keys matching no rule
    pub default_ttl_seconds: u64,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            rules: vec![
                TtlRule::expire("static:", DAY),
                TtlRule::expire("template:", DAY),
                TtlRule::expire("user:", HOUR),
                TtlRule::expire("stat:", 5 * MINUTE),
                TtlRule::expire("dynamic:", 5 * MINUTE),
                TtlRule::no_cache("realtime:"),
            ],
            default_ttl_seconds: HOUR,
        }
    }
}

impl TtlPolicy {
    /// Empty table; every key gets `default_ttl_seconds`
    pub fn uniform(default_ttl_seconds: u64) -> Self {
        Self {
            rules: Vec::new(),
            default_ttl_seconds,
        }
    }

    /// Add or replace the rule for a prefix
    pub fn with_rule(mut self, rule: TtlRule) -> Self {
        self.rules.retain(|r| r.prefix != rule.prefix);
        self.rules.push(rule);
        self
    }

    /// Category lifetime for `key`
    pub fn category_ttl(&self, key: &str) -> CategoryTtl {
        self.rules
            .iter()
            .filter(|rule| key.starts_with(rule.prefix.as_str()))
            .max_by_key(|rule| rule.prefix.len())
            .map(TtlRule::resolve)
            .unwrap_or(CategoryTtl::Expire(self.default_ttl_seconds))
    }

    /// Effective TTL: an explicit TTL always wins, else the category TTL
    pub fn resolve(&self, key: &str, explicit: Option<u64>) -> CategoryTtl {
        match explicit {
            Some(secs) => CategoryTtl::Expire(secs),
            None => self.category_ttl(key),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_categories() {
        let policy = TtlPolicy::default();
        assert_eq!(policy.category_ttl("static:logo"), CategoryTtl::Expire(86_400));
        assert_eq!(policy.category_ttl("template:hero"), CategoryTtl::Expire(86_400));
        assert_eq!(policy.category_ttl("user:42"), CategoryTtl::Expire(3_600));
        assert_eq!(policy.category_ttl("stat:views"), CategoryTtl::Expire(300));
        assert_eq!(policy.category_ttl("dynamic:feed"), CategoryTtl::Expire(300));
        assert_eq!(policy.category_ttl("realtime:ticker"), CategoryTtl::NoCache);
        assert_eq!(policy.category_ttl("misc"), CategoryTtl::Expire(3_600));
    }

    #[test]
    fn test_longest_prefix_wins() {
        let policy = TtlPolicy::default().with_rule(TtlRule::expire("user:session:", 60));
        assert_eq!(policy.category_ttl("user:session:abc"), CategoryTtl::Expire(60));
        assert_eq!(policy.category_ttl("user:profile"), CategoryTtl::Expire(3_600));
    }

    #[test]
    fn test_explicit_ttl_overrides_category() {
        let policy = TtlPolicy::default();
        assert_eq!(policy.resolve("realtime:x", Some(5)), CategoryTtl::Expire(5));
        assert_eq!(policy.resolve("user:1", Some(0)), CategoryTtl::Expire(0));
        assert_eq!(policy.resolve("realtime:x", None), CategoryTtl::NoCache);
        assert_eq!(CategoryTtl::NoCache.seconds(), None);
    }

    #[test]
    fn test_with_rule_replaces_prefix() {
        let policy = TtlPolicy::default().with_rule(TtlRule::expire("user:", 10));
        assert_eq!(policy.rules.iter().filter(|r| r.prefix == "user:").count(), 1);
        assert_eq!(policy.category_ttl("user:1"), CategoryTtl::Expire(10));
    }

    #[test]
    fn test_policy_from_yaml() {
        let yaml = r#"
rules:
  - prefix: "img:"
    ttl_seconds: 120
  - prefix: "live:"
    cacheable: false
default_ttl_seconds: 30
"#;
        let policy: TtlPolicy = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(policy.category_ttl("img:1"), CategoryTtl::Expire(120));
        assert_eq!(policy.category_ttl("live:1"), CategoryTtl::NoCache);
        assert_eq!(policy.category_ttl("other"), CategoryTtl::Expire(30));
    }
}
