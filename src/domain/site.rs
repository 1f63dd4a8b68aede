//! Per-site configuration and the policy resolver.
//!
//! A site carries default settings plus a table of named profiles. The
//! resolver merges the selected profile over the site defaults into one
//! effective settings bundle for the request.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

/// Query-string handling policy.
///
/// Either a blanket keep/drop, or an ordered rule list matched against the
/// request path (first match wins).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeepQuery {
    All(bool),
    Rules(Vec<QueryRule>),
}

impl Default for KeepQuery {
    fn default() -> Self {
        KeepQuery::All(true)
    }
}

/// One keep-query rule: a path pattern plus an optional parameter allow-list.
///
/// Configured either as a bare pattern string or as an array whose first
/// element is the pattern and whose remainder is the allow-list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "QueryRuleRepr", into = "QueryRuleRepr")]
pub struct QueryRule {
    pub pattern: String,
    pub allow: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum QueryRuleRepr {
    Pattern(String),
    WithAllow(Vec<String>),
}

impl From<QueryRuleRepr> for QueryRule {
    fn from(repr: QueryRuleRepr) -> Self {
        match repr {
            QueryRuleRepr::Pattern(pattern) => QueryRule {
                pattern,
                allow: Vec::new(),
            },
            QueryRuleRepr::WithAllow(mut parts) => {
                if parts.is_empty() {
                    return QueryRule {
                        pattern: String::new(),
                        allow: Vec::new(),
                    };
                }
                let pattern = parts.remove(0);
                QueryRule {
                    pattern,
                    allow: parts,
                }
            }
        }
    }
}

impl From<QueryRule> for QueryRuleRepr {
    fn from(rule: QueryRule) -> Self {
        if rule.allow.is_empty() {
            QueryRuleRepr::Pattern(rule.pattern)
        } else {
            let mut parts = Vec::with_capacity(rule.allow.len() + 1);
            parts.push(rule.pattern);
            parts.extend(rule.allow);
            QueryRuleRepr::WithAllow(parts)
        }
    }
}

/// One rewrite rule: `(pattern, replacement)`, configured as a two-element
/// array. The pattern is an anchored regex over the canonical href; the
/// replacement may reference capture groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewriteRule(pub String, pub String);

impl RewriteRule {
    pub fn pattern(&self) -> &str {
        &self.0
    }

    pub fn replacement(&self) -> &str {
        &self.1
    }
}

/// Named-profile overrides. Every field is optional; a present field
/// replaces the site default wholly (no structural merging of lists, and an
/// explicit `false` overrides a default `true`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileSettings {
    pub keep_query: Option<KeepQuery>,
    pub keep_hash: Option<bool>,
    pub rewrites: Option<Vec<RewriteRule>>,
    pub excludes: Option<Vec<String>>,
    pub includes: Option<Vec<String>>,
    pub user_agent: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub service_unavailable: Option<OffsetDateTime>,
}

/// Site-level defaults plus the profile table. Read-only per request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SiteConfig {
    pub default_profile: Option<String>,
    pub profiles: HashMap<String, ProfileSettings>,
    pub keep_query: Option<KeepQuery>,
    pub keep_hash: Option<bool>,
    pub rewrites: Option<Vec<RewriteRule>>,
    pub excludes: Option<Vec<String>>,
    pub includes: Option<Vec<String>>,
    pub user_agent: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub service_unavailable: Option<OffsetDateTime>,
}

/// The merged settings bundle one request runs under.
#[derive(Debug, Clone)]
pub struct EffectiveSettings {
    /// Selected profile name; part of the cache key.
    pub profile: Option<String>,
    pub keep_query: KeepQuery,
    pub keep_hash: bool,
    pub rewrites: Option<Vec<RewriteRule>>,
    pub excludes: Option<Vec<String>>,
    pub includes: Option<Vec<String>>,
    pub user_agent: Option<String>,
    /// Whether the origin is currently marked unavailable. When set, stale
    /// snapshots stay servable and `fallback` is forced off.
    pub service_unavailable: bool,
}

#[derive(Debug, Error)]
pub enum SiteError {
    #[error("profile `{0}` is not defined for this site")]
    UnknownProfile(String),
}

/// Merge site defaults with the selected profile into effective settings.
///
/// The profile defaults to the site's `default_profile` when the request
/// names none. A requested-but-undefined profile is an error. The stored
/// `service_unavailable` timestamp resolves to a boolean: the origin counts
/// as down for `unavailable_window` after the recorded outage.
pub fn resolve(
    site: &SiteConfig,
    requested_profile: Option<&str>,
    now: OffsetDateTime,
    unavailable_window: Duration,
) -> Result<EffectiveSettings, SiteError> {
    let profile_name = requested_profile
        .map(str::to_string)
        .or_else(|| site.default_profile.clone());

    let profile = match &profile_name {
        Some(name) => Some(
            site.profiles
                .get(name)
                .ok_or_else(|| SiteError::UnknownProfile(name.clone()))?,
        ),
        None => None,
    };

    let mut keep_query = site.keep_query.clone().unwrap_or_default();
    let mut keep_hash = site.keep_hash.unwrap_or(true);
    let mut rewrites = site.rewrites.clone();
    let mut excludes = site.excludes.clone();
    let mut includes = site.includes.clone();
    let mut user_agent = site.user_agent.clone();
    let mut service_unavailable = site.service_unavailable;

    if let Some(profile) = profile {
        if let Some(value) = &profile.keep_query {
            keep_query = value.clone();
        }
        if let Some(value) = profile.keep_hash {
            keep_hash = value;
        }
        if let Some(value) = &profile.rewrites {
            rewrites = Some(value.clone());
        }
        if let Some(value) = &profile.excludes {
            excludes = Some(value.clone());
        }
        if let Some(value) = &profile.includes {
            includes = Some(value.clone());
        }
        if let Some(value) = &profile.user_agent {
            if !value.is_empty() {
                user_agent = Some(value.clone());
            }
        }
        // A selected profile owns the outage marker outright, including
        // clearing a site-level one it does not set.
        service_unavailable = profile.service_unavailable;
    }

    let service_unavailable = service_unavailable
        .is_some_and(|marked_at| marked_at + unavailable_window > now);

    Ok(EffectiveSettings {
        profile: profile_name,
        keep_query,
        keep_hash,
        rewrites,
        excludes,
        includes,
        user_agent,
        service_unavailable,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const WINDOW: Duration = Duration::from_secs(10);

    fn site_with_profile(name: &str, profile: ProfileSettings) -> SiteConfig {
        let mut profiles = HashMap::new();
        profiles.insert(name.to_string(), profile);
        SiteConfig {
            profiles,
            ..SiteConfig::default()
        }
    }

    #[test]
    fn unknown_profile_is_rejected() {
        let site = SiteConfig::default();
        let err = resolve(&site, Some("mobile"), OffsetDateTime::now_utc(), WINDOW).unwrap_err();
        assert!(matches!(err, SiteError::UnknownProfile(name) if name == "mobile"));
    }

    #[test]
    fn default_profile_applies_when_request_names_none() {
        let mut site = site_with_profile(
            "mobile",
            ProfileSettings {
                keep_hash: Some(false),
                ..ProfileSettings::default()
            },
        );
        site.default_profile = Some("mobile".to_string());

        let settings = resolve(&site, None, OffsetDateTime::now_utc(), WINDOW).unwrap();
        assert_eq!(settings.profile.as_deref(), Some("mobile"));
        assert!(!settings.keep_hash);
    }

    #[test]
    fn explicit_false_overrides_default_true() {
        let site = site_with_profile(
            "strict",
            ProfileSettings {
                keep_query: Some(KeepQuery::All(false)),
                ..ProfileSettings::default()
            },
        );

        let settings = resolve(&site, Some("strict"), OffsetDateTime::now_utc(), WINDOW).unwrap();
        assert_eq!(settings.keep_query, KeepQuery::All(false));
    }

    #[test]
    fn list_fields_replace_wholly() {
        let mut site = site_with_profile(
            "alt",
            ProfileSettings {
                excludes: Some(vec!["^/private".to_string()]),
                ..ProfileSettings::default()
            },
        );
        site.excludes = Some(vec!["^/admin".to_string(), "^/static".to_string()]);

        let settings = resolve(&site, Some("alt"), OffsetDateTime::now_utc(), WINDOW).unwrap();
        assert_eq!(settings.excludes, Some(vec!["^/private".to_string()]));
    }

    #[test]
    fn unset_profile_fields_fall_back_to_site_defaults() {
        let mut site = site_with_profile("plain", ProfileSettings::default());
        site.user_agent = Some("kasha/site".to_string());
        site.keep_hash = Some(false);

        let settings = resolve(&site, Some("plain"), OffsetDateTime::now_utc(), WINDOW).unwrap();
        assert_eq!(settings.user_agent.as_deref(), Some("kasha/site"));
        assert!(!settings.keep_hash);
    }

    #[test]
    fn recent_outage_marks_service_unavailable() {
        let now = datetime!(2024-03-01 12:00:00 UTC);
        let site = site_with_profile(
            "down",
            ProfileSettings {
                service_unavailable: Some(now - Duration::from_secs(5)),
                ..ProfileSettings::default()
            },
        );

        let settings = resolve(&site, Some("down"), now, WINDOW).unwrap();
        assert!(settings.service_unavailable);
    }

    #[test]
    fn old_outage_has_expired() {
        let now = datetime!(2024-03-01 12:00:00 UTC);
        let site = site_with_profile(
            "recovered",
            ProfileSettings {
                service_unavailable: Some(now - Duration::from_secs(60)),
                ..ProfileSettings::default()
            },
        );

        let settings = resolve(&site, Some("recovered"), now, WINDOW).unwrap();
        assert!(!settings.service_unavailable);
    }

    #[test]
    fn selected_profile_clears_site_outage_marker() {
        let now = datetime!(2024-03-01 12:00:00 UTC);
        let mut site = site_with_profile("clean", ProfileSettings::default());
        site.service_unavailable = Some(now - Duration::from_secs(1));

        let settings = resolve(&site, Some("clean"), now, WINDOW).unwrap();
        assert!(!settings.service_unavailable);
    }

    #[test]
    fn keep_query_rules_deserialize_from_mixed_shapes() {
        let json = r#"[["/search", "q", "page"], "/docs"]"#;
        let rules: Vec<QueryRule> = serde_json::from_str(json).unwrap();
        assert_eq!(rules[0].pattern, "/search");
        assert_eq!(rules[0].allow, vec!["q", "page"]);
        assert_eq!(rules[1].pattern, "/docs");
        assert!(rules[1].allow.is_empty());
    }

    #[test]
    fn rewrite_rules_deserialize_from_pairs() {
        let json = r#"[["^https://www\\.example\\.com/(.*)$", "https://origin.internal/$1"]]"#;
        let rules: Vec<RewriteRule> = serde_json::from_str(json).unwrap();
        assert_eq!(rules[0].pattern(), "^https://www\\.example\\.com/(.*)$");
        assert_eq!(rules[0].replacement(), "https://origin.internal/$1");
    }
}
