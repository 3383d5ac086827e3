//! Endpoint normalization and pacing classification.

use crate::error::{ProxyRotationError, Result};

use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use std::time::Duration;
use url::Url;

/// Placeholder substituted for purely numeric path segments.
pub const ID_PLACEHOLDER: &str = "{id}";
/// Placeholder substituted for CDN content hashes.
pub const HASH_PLACEHOLDER: &str = "{hash}";

const CONTENT_HASH_LEN: usize = 32;

/// `{anything}` inside a rule pattern.
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[^/{}]*\}").expect("placeholder regex is valid"));

/// A pacing rule as supplied by configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointRule {
    /// Host and path template, e.g. `api.example.com/users/{id}/friends`.
    pub pattern: String,
    pub cooldown_ms: u64,
}

impl EndpointRule {
    pub fn new(pattern: impl Into<String>, cooldown_ms: u64) -> Self {
        Self {
            pattern: pattern.into(),
            cooldown_ms,
        }
    }
}

/// Build the canonical endpoint key for `host` + `path`.
///
/// Numeric segments become `{id}`. A 32 character hex content hash becomes
/// `{hash}`, keeping any file extension, only where CDNs put it: as the last
/// segment, directly after an id (`/avatars/{id}/<hash>.png`). Hex-looking
/// segments anywhere else are left alone.
pub fn normalize(host: &str, path: &str) -> String {
    let mut key = String::with_capacity(host.len() + path.len());
    key.push_str(host);

    let mut segments = path.split('/').enumerate().peekable();
    let mut after_id = false;
    while let Some((i, segment)) = segments.next() {
        if i > 0 {
            key.push('/');
        }
        if is_numeric(segment) {
            key.push_str(ID_PLACEHOLDER);
            after_id = true;
            continue;
        }

        let last = segments.peek().is_none();
        match content_hash_extension(segment) {
            Some(extension) if after_id && last => {
                key.push_str(HASH_PLACEHOLDER);
                key.push_str(extension);
            }
            _ => key.push_str(segment),
        }
        after_id = false;
    }
    key
}

fn is_numeric(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

/// The extension (possibly empty) following a content-hash stem.
fn content_hash_extension(segment: &str) -> Option<&str> {
    let (stem, extension) = match segment.find('.') {
        Some(dot) => segment.split_at(dot),
        None => (segment, ""),
    };
    let is_hash = stem.len() == CONTENT_HASH_LEN && stem.bytes().all(|b| b.is_ascii_hexdigit());
    is_hash.then_some(extension)
}

#[derive(Debug)]
struct CompiledRule {
    pattern: String,
    matcher: Regex,
    cooldown: Duration,
}

/// Maps canonical endpoint keys to cooldowns.
///
/// Rules are evaluated top-down and the first match wins. Templated segments
/// (`{anything}`) match exactly one path segment; everything else, dots in
/// hostnames included, matches literally.
#[derive(Debug)]
pub struct EndpointClassifier {
    rules: Vec<CompiledRule>,
    default_cooldown: Duration,
}

impl EndpointClassifier {
    pub fn new(rules: &[EndpointRule], default_cooldown: Duration) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| {
                Ok(CompiledRule {
                    pattern: rule.pattern.clone(),
                    matcher: compile_pattern(&rule.pattern)?,
                    cooldown: Duration::from_millis(rule.cooldown_ms),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { rules, default_cooldown })
    }

    /// Cooldown for an already-normalized endpoint key.
    pub fn classify_pacing(&self, canonical_key: &str) -> Duration {
        self.rules
            .iter()
            .find(|rule| rule.matcher.is_match(canonical_key))
            .map(|rule| rule.cooldown)
            .unwrap_or(self.default_cooldown)
    }

    /// The pattern that would pace `canonical_key`, if any.
    pub fn matching_pattern(&self, canonical_key: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| rule.matcher.is_match(canonical_key))
            .map(|rule| rule.pattern.as_str())
    }

    /// Normalize a request URL and look up its cooldown.
    pub fn classify(&self, url: &Url) -> (String, Duration) {
        let key = normalize(url.host_str().unwrap_or_default(), url.path());
        let cooldown = self.classify_pacing(&key);
        (key, cooldown)
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex> {
    let mut source = String::from("^");
    let mut last = 0;
    for found in PLACEHOLDER.find_iter(pattern) {
        source.push_str(&regex::escape(&pattern[last..found.start()]));
        source.push_str("[^/]+");
        last = found.end();
    }
    source.push_str(&regex::escape(&pattern[last..]));
    source.push('$');

    Regex::new(&source).map_err(|e| ProxyRotationError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: &str = "api.example.com";

    #[test]
    fn replaces_every_numeric_segment() {
        assert_eq!(
            normalize(HOST, "/users/123/friends/456/789"),
            "api.example.com/users/{id}/friends/{id}/{id}"
        );
    }

    #[test]
    fn replaces_cdn_hash_and_ids() {
        assert_eq!(
            normalize(
                "cdn.example.com",
                "/avatars/80351110224678912/0123456789abcdef0123456789ABCDEF.png"
            ),
            "cdn.example.com/avatars/{id}/{hash}.png"
        );
        assert_eq!(
            normalize("cdn.example.com", "/icons/42/0123456789abcdef0123456789abcdef"),
            "cdn.example.com/icons/{id}/{hash}"
        );
    }

    #[test]
    fn leaves_plain_paths_alone() {
        assert_eq!(normalize(HOST, "/api/v1/status"), "api.example.com/api/v1/status");
        assert_eq!(normalize(HOST, ""), "api.example.com");
        assert_eq!(normalize(HOST, "/"), "api.example.com/");
    }

    #[test]
    fn near_miss_hashes_are_not_replaced() {
        // 31 hex chars, and 32 chars with a non-hex letter
        assert_eq!(
            normalize(HOST, "/x/0123456789abcdef0123456789abcde"),
            "api.example.com/x/0123456789abcdef0123456789abcde"
        );
        assert_eq!(
            normalize(HOST, "/x/0123456789abcdef0123456789abcdeg"),
            "api.example.com/x/0123456789abcdef0123456789abcdeg"
        );
        assert_eq!(normalize(HOST, "/v2/12a"), "api.example.com/v2/12a");
    }

    #[test]
    fn hashes_outside_the_cdn_template_are_kept() {
        const HASH: &str = "0123456789abcdef0123456789abcdef";
        // Not preceded by an id.
        assert_eq!(
            normalize(HOST, &format!("/commits/{}", HASH)),
            format!("api.example.com/commits/{}", HASH)
        );
        // Not the last segment.
        assert_eq!(
            normalize(HOST, &format!("/avatars/7/{}/raw", HASH)),
            format!("api.example.com/avatars/{{id}}/{}/raw", HASH)
        );
        // First segment of the path.
        assert_eq!(
            normalize(HOST, &format!("/{}.png", HASH)),
            format!("api.example.com/{}.png", HASH)
        );
    }

    #[test]
    fn rule_placeholders_compile_to_segment_wildcards() {
        let matcher = compile_pattern("a.example/{x}/b{}").unwrap();
        assert_eq!(matcher.as_str(), r"^a\.example/[^/]+/b[^/]+$");
        assert!(matcher.is_match("a.example/7/bz"));
        assert!(!matcher.is_match("a.example/7/8/bz"));
    }

    fn classifier() -> EndpointClassifier {
        EndpointClassifier::new(
            &[
                EndpointRule::new("api.example.com/users/{id}/friends", 2_000),
                EndpointRule::new("api.example.com/users/{id}", 500),
                EndpointRule::new("api.example.com/users/{id}/{any}", 750),
                EndpointRule::new("cdn.example.com/avatars/{id}/{hash}.png", 0),
            ],
            Duration::from_millis(100),
        )
        .unwrap()
    }

    #[test]
    fn first_matching_rule_wins() {
        let c = classifier();
        assert_eq!(
            c.classify_pacing("api.example.com/users/{id}/friends"),
            Duration::from_millis(2_000)
        );
        assert_eq!(c.classify_pacing("api.example.com/users/{id}"), Duration::from_millis(500));
        assert_eq!(
            c.classify_pacing("api.example.com/users/{id}/games"),
            Duration::from_millis(750)
        );
        assert_eq!(
            c.matching_pattern("api.example.com/users/{id}/games"),
            Some("api.example.com/users/{id}/{any}")
        );
    }

    #[test]
    fn wildcards_match_a_single_segment_only() {
        let c = classifier();
        assert_eq!(
            c.classify_pacing("api.example.com/users/{id}/a/b"),
            Duration::from_millis(100)
        );
    }

    #[test]
    fn dots_in_hosts_are_literal() {
        let c = classifier();
        assert_eq!(
            c.classify_pacing("apiXexample.com/users/{id}"),
            Duration::from_millis(100)
        );
        assert_eq!(c.matching_pattern("apiXexample.com/users/{id}"), None);
    }

    #[test]
    fn classify_uses_request_url() {
        let c = classifier();
        let url = Url::parse(
            "https://cdn.example.com/avatars/1/0123456789abcdef0123456789abcdef.png?size=64",
        )
        .unwrap();
        let (key, cooldown) = c.classify(&url);
        assert_eq!(key, "cdn.example.com/avatars/{id}/{hash}.png");
        assert_eq!(cooldown, Duration::ZERO);
    }
}
