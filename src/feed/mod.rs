//! Threat-feed fetching and diffing (C6).
//!
//! [`crate::units::feed::FeedUnit`] ticks each enabled feed on its own
//! `update_frequency_s`; the actual HTTP fetch and diff computation live
//! here so they can be unit tested without a network.

use std::time::Duration;

use dnsctl_api::{FeedFormat, RpzRuleCreate, RuleSource};
use dnsctl_store::RpzRuleRow;

use crate::model::feed::parse_feed_body;
use crate::model::rpz::manual_rule_outranks_feed;

pub enum FetchOutcome {
    NotModified,
    Fetched {
        domains: Vec<String>,
        etag: Option<String>,
        last_modified: Option<String>,
    },
    Error(String),
}

/// Conditional GET against a feed's URL, sending `If-None-Match`/
/// `If-Modified-Since` when a prior attempt recorded them, so unchanged
/// feeds cost a 304 instead of a full re-download and re-parse.
pub async fn fetch_feed(
    client: &reqwest::Client,
    url: &str,
    format: FeedFormat,
    etag: Option<&str>,
    last_modified: Option<&str>,
    request_timeout: Duration,
) -> FetchOutcome {
    let mut request = client.get(url).timeout(request_timeout);
    if let Some(etag) = etag {
        request = request.header(reqwest::header::IF_NONE_MATCH, etag);
    }
    if let Some(last_modified) = last_modified {
        request = request.header(reqwest::header::IF_MODIFIED_SINCE, last_modified);
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(err) => return FetchOutcome::Error(err.to_string()),
    };

    if response.status() == reqwest::StatusCode::NOT_MODIFIED {
        return FetchOutcome::NotModified;
    }
    if !response.status().is_success() {
        return FetchOutcome::Error(format!("HTTP {}", response.status()));
    }

    let etag = response
        .headers()
        .get(reqwest::header::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let last_modified = response
        .headers()
        .get(reqwest::header::LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let body = match response.text().await {
        Ok(body) => body,
        Err(err) => return FetchOutcome::Error(err.to_string()),
    };

    FetchOutcome::Fetched {
        domains: parse_feed_body(format, &body),
        etag,
        last_modified,
    }
}

/// Diff a freshly fetched domain set against the rules currently sourced
/// from this feed. Domains already covered by a manual rule are skipped
/// entirely -- manual rules always win (spec. §4.4, §4.6).
pub fn compute_diff(
    rpz_zone: &str,
    category: &str,
    fresh_domains: &[String],
    existing_feed_rules: &[RpzRuleRow],
    other_active_rules: &[RpzRuleRow],
) -> dnsctl_api::RpzDiff {
    let manual_domains: std::collections::HashSet<&str> = other_active_rules
        .iter()
        .filter(|r| manual_rule_outranks_feed(&r.source))
        .map(|r| r.domain.as_str())
        .collect();

    let existing_domains: std::collections::HashSet<&str> =
        existing_feed_rules.iter().map(|r| r.domain.as_str()).collect();
    let fresh_set: std::collections::HashSet<&str> = fresh_domains.iter().map(String::as_str).collect();

    let add = fresh_domains
        .iter()
        .filter(|d| !existing_domains.contains(d.as_str()) && !manual_domains.contains(d.as_str()))
        .map(|d| RpzRuleCreate {
            domain: d.clone(),
            rpz_zone: rpz_zone.to_string(),
            action: dnsctl_api::RpzAction::Block,
            redirect_target: None,
            category: category.to_string(),
        })
        .collect();

    let remove = existing_feed_rules
        .iter()
        .filter(|r| !fresh_set.contains(r.domain.as_str()))
        .map(|r| (r.rpz_zone.clone(), r.domain.clone()))
        .collect();

    dnsctl_api::RpzDiff { add, remove }
}

pub fn source_tag(feed_id: i64) -> String {
    RuleSource::Feed(feed_id).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(domain: &str, rpz_zone: &str, source: &str) -> RpzRuleRow {
        RpzRuleRow {
            id: 1,
            domain: domain.to_string(),
            rpz_zone: rpz_zone.to_string(),
            action: "block".to_string(),
            redirect_target: None,
            category: "malware".to_string(),
            source: source.to_string(),
            is_active: true,
            created_at: "2026-01-01T00:00:00Z".parse().unwrap(),
        }
    }

    #[test]
    fn skips_domains_already_covered_by_a_manual_rule() {
        let fresh = vec!["evil.example".to_string()];
        let manual = vec![rule("evil.example", "rpz.dnsctld", "manual")];
        let diff = compute_diff("rpz.dnsctld", "malware", &fresh, &[], &manual);
        assert!(diff.add.is_empty());
    }

    #[test]
    fn removes_stale_feed_domains_not_in_the_new_fetch() {
        let fresh = vec!["still-bad.example".to_string()];
        let existing = vec![
            rule("still-bad.example", "rpz.dnsctld", "feed:1"),
            rule("now-clean.example", "rpz.dnsctld", "feed:1"),
        ];
        let diff = compute_diff("rpz.dnsctld", "malware", &fresh, &existing, &[]);
        assert!(diff.add.is_empty());
        assert_eq!(diff.remove, vec![("rpz.dnsctld".to_string(), "now-clean.example".to_string())]);
    }
}
