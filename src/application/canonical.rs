//! URL canonicalization, rewrite rules, and cache-eligibility routing.
//!
//! Canonicalization makes the cache key stable: query parameters are
//! filtered and sorted per site policy, the fragment is dropped unless kept,
//! and the result is idempotent. Rewriting then maps the canonical URL to
//! the target the worker or proxy actually fetches.

use regex::Regex;
use tracing::warn;
use url::Url;

use crate::application::error::RestError;
use crate::domain::site::{EffectiveSettings, KeepQuery, RewriteRule};

/// Canonicalization result: the cache-key path, the canonical URL, and the
/// rewritten fetch target.
#[derive(Debug, Clone)]
pub struct CanonicalUrl {
    pub url: Url,
    /// Canonical pathname + query + hash; the `path` component of the cache key.
    pub path: String,
    /// Fetch target after rewrite rules; equals the canonical href when no
    /// rule matches.
    pub target: String,
}

/// Canonicalize `url` under the effective settings and apply rewrite rules.
pub fn canonicalize(url: &Url, settings: &EffectiveSettings) -> Result<CanonicalUrl, RestError> {
    let mut url = url.clone();

    match &settings.keep_query {
        KeepQuery::All(false) => url.set_query(None),
        KeepQuery::All(true) => sort_query(&mut url),
        KeepQuery::Rules(rules) => match find_query_rule(rules, url.path()) {
            Some(rule) if !rule.allow.is_empty() => {
                retain_params(&mut url, &rule.allow);
                sort_query(&mut url);
            }
            Some(_) => sort_query(&mut url),
            None => url.set_query(None),
        },
    }

    if !settings.keep_hash {
        url.set_fragment(None);
    }

    let path = cache_path(&url);
    let target = match &settings.rewrites {
        Some(rules) => rewrite(url.as_str(), rules)?,
        None => url.as_str().to_string(),
    };

    Ok(CanonicalUrl { url, path, target })
}

/// Whether the path skips the cache entirely. A path is excluded when it
/// matches any `excludes` pattern and no `includes` pattern; `includes`
/// always wins.
pub fn is_excluded(settings: &EffectiveSettings, pathname: &str) -> bool {
    path_in_list(settings.excludes.as_deref(), pathname)
        && !path_in_list(settings.includes.as_deref(), pathname)
}

fn cache_path(url: &Url) -> String {
    let mut path = url.path().to_string();
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }
    if let Some(fragment) = url.fragment() {
        path.push('#');
        path.push_str(fragment);
    }
    path
}

fn find_query_rule<'a>(
    rules: &'a [crate::domain::site::QueryRule],
    pathname: &str,
) -> Option<&'a crate::domain::site::QueryRule> {
    rules.iter().find(|rule| {
        match Regex::new(&rule.pattern) {
            Ok(re) => re.is_match(pathname),
            Err(err) => {
                warn!(
                    target = "application::canonical",
                    pattern = rule.pattern,
                    error = %err,
                    "skipping invalid keepQuery pattern"
                );
                false
            }
        }
    })
}

fn retain_params(url: &mut Url, allow: &[String]) {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| allow.iter().any(|a| a == key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    replace_query(url, kept);
}

fn sort_query(url: &mut Url) {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    replace_query(url, pairs);
}

fn replace_query(url: &mut Url, pairs: Vec<(String, String)>) {
    if pairs.is_empty() {
        url.set_query(None);
        return;
    }
    url.query_pairs_mut().clear().extend_pairs(pairs);
}

/// Map the canonical href through the rewrite rule set.
///
/// The first rule whose pattern matches wins. A rule whose replacement
/// yields an empty target explicitly rejects the URL. An unmatched rule set
/// leaves the href unchanged.
fn rewrite(href: &str, rules: &[RewriteRule]) -> Result<String, RestError> {
    for rule in rules {
        let re = Regex::new(rule.pattern()).map_err(|_| RestError::UrlRewrite {
            url: href.to_string(),
        })?;

        if re.is_match(href) {
            let target = re.replace(href, rule.replacement()).into_owned();
            if target.is_empty() {
                return Err(RestError::NotFound);
            }
            return Ok(target);
        }
    }

    Ok(href.to_string())
}

fn path_in_list(list: Option<&[String]>, pathname: &str) -> bool {
    let Some(list) = list else {
        return false;
    };

    list.iter().any(|pattern| match Regex::new(pattern) {
        Ok(re) => re.is_match(pathname),
        Err(err) => {
            warn!(
                target = "application::canonical",
                pattern,
                error = %err,
                "skipping invalid path pattern"
            );
            false
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::site::QueryRule;

    fn settings() -> EffectiveSettings {
        EffectiveSettings {
            profile: None,
            keep_query: KeepQuery::All(true),
            keep_hash: true,
            rewrites: None,
            excludes: None,
            includes: None,
            user_agent: None,
            service_unavailable: false,
        }
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn keep_all_sorts_parameters() {
        let canonical =
            canonicalize(&url("https://example.com/a?z=1&a=2&m=3"), &settings()).unwrap();
        assert_eq!(canonical.path, "/a?a=2&m=3&z=1");
    }

    #[test]
    fn keep_none_drops_all_parameters() {
        let mut s = settings();
        s.keep_query = KeepQuery::All(false);
        let canonical = canonicalize(&url("https://example.com/a?z=1&a=2"), &s).unwrap();
        assert_eq!(canonical.path, "/a");
        assert_eq!(canonical.url.as_str(), "https://example.com/a");
    }

    #[test]
    fn allow_list_keeps_only_listed_parameters() {
        let mut s = settings();
        s.keep_query = KeepQuery::Rules(vec![QueryRule {
            pattern: "^/search".to_string(),
            allow: vec!["q".to_string()],
        }]);
        let canonical = canonicalize(&url("https://example.com/search?q=1&lang=en"), &s).unwrap();
        assert_eq!(canonical.path, "/search?q=1");
    }

    #[test]
    fn matched_rule_without_allow_list_keeps_all_sorted() {
        let mut s = settings();
        s.keep_query = KeepQuery::Rules(vec![QueryRule {
            pattern: "^/docs".to_string(),
            allow: vec![],
        }]);
        let canonical = canonicalize(&url("https://example.com/docs?b=2&a=1"), &s).unwrap();
        assert_eq!(canonical.path, "/docs?a=1&b=2");
    }

    #[test]
    fn unmatched_rule_list_drops_all_parameters() {
        let mut s = settings();
        s.keep_query = KeepQuery::Rules(vec![QueryRule {
            pattern: "^/search".to_string(),
            allow: vec!["q".to_string()],
        }]);
        let canonical = canonicalize(&url("https://example.com/other?a=1"), &s).unwrap();
        assert_eq!(canonical.path, "/other");
    }

    #[test]
    fn first_matching_rule_wins() {
        let mut s = settings();
        s.keep_query = KeepQuery::Rules(vec![
            QueryRule {
                pattern: "^/search".to_string(),
                allow: vec!["q".to_string()],
            },
            QueryRule {
                pattern: "^/search/advanced".to_string(),
                allow: vec!["q".to_string(), "filter".to_string()],
            },
        ]);
        let canonical =
            canonicalize(&url("https://example.com/search/advanced?q=1&filter=x"), &s).unwrap();
        assert_eq!(canonical.path, "/search/advanced?q=1");
    }

    #[test]
    fn fragment_dropped_unless_kept() {
        let mut s = settings();
        s.keep_hash = false;
        let canonical = canonicalize(&url("https://example.com/a#section"), &s).unwrap();
        assert_eq!(canonical.path, "/a");

        s.keep_hash = true;
        let canonical = canonicalize(&url("https://example.com/a#section"), &s).unwrap();
        assert_eq!(canonical.path, "/a#section");
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let mut s = settings();
        s.keep_query = KeepQuery::Rules(vec![QueryRule {
            pattern: "^/search".to_string(),
            allow: vec!["q".to_string(), "page".to_string()],
        }]);
        let first =
            canonicalize(&url("https://example.com/search?z=9&q=rust&page=2&utm=x"), &s).unwrap();
        let second = canonicalize(&first.url, &s).unwrap();
        assert_eq!(first.path, second.path);
        assert_eq!(first.url, second.url);
    }

    #[test]
    fn rewrite_maps_to_fetch_target() {
        let mut s = settings();
        s.rewrites = Some(vec![RewriteRule(
            "^https://www\\.example\\.com/(.*)$".to_string(),
            "https://origin.internal/$1".to_string(),
        )]);
        let canonical = canonicalize(&url("https://www.example.com/page?a=1"), &s).unwrap();
        assert_eq!(canonical.target, "https://origin.internal/page?a=1");
        // The cache key is derived from the canonical URL, not the target.
        assert_eq!(canonical.path, "/page?a=1");
    }

    #[test]
    fn rewrite_to_empty_rejects_the_path() {
        let mut s = settings();
        s.rewrites = Some(vec![RewriteRule(
            "^https://example\\.com/forbidden.*$".to_string(),
            "".to_string(),
        )]);
        let err = canonicalize(&url("https://example.com/forbidden/x"), &s).unwrap_err();
        assert!(matches!(err, RestError::NotFound));
    }

    #[test]
    fn malformed_rewrite_rule_is_reported() {
        let mut s = settings();
        s.rewrites = Some(vec![RewriteRule("([unclosed".to_string(), "x".to_string())]);
        let err = canonicalize(&url("https://example.com/a"), &s).unwrap_err();
        assert!(matches!(err, RestError::UrlRewrite { .. }));
    }

    #[test]
    fn includes_wins_over_excludes() {
        let mut s = settings();
        s.excludes = Some(vec!["^/assets".to_string()]);
        s.includes = Some(vec!["^/assets/pages".to_string()]);

        assert!(is_excluded(&s, "/assets/logo.png"));
        assert!(!is_excluded(&s, "/assets/pages/about"));
        assert!(!is_excluded(&s, "/other"));
    }
}
