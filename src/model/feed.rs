//! Threat-feed parsing (spec. §4.6).

use dnsctl_api::FeedFormat;

pub fn format_from_str(s: &str) -> FeedFormat {
    match s {
        "hosts" => FeedFormat::Hosts,
        "rpz" => FeedFormat::Rpz,
        _ => FeedFormat::Domains,
    }
}

pub fn format_str(format: FeedFormat) -> &'static str {
    match format {
        FeedFormat::Hosts => "hosts",
        FeedFormat::Domains => "domains",
        FeedFormat::Rpz => "rpz",
    }
}

pub fn status_from_str(s: &str) -> dnsctl_api::FeedStatus {
    match s {
        "ok" => dnsctl_api::FeedStatus::Ok,
        "error" => dnsctl_api::FeedStatus::Error,
        _ => dnsctl_api::FeedStatus::Never,
    }
}

pub fn row_to_view(row: dnsctl_store::ThreatFeedRow) -> dnsctl_api::ThreatFeedView {
    dnsctl_api::ThreatFeedView {
        id: row.id,
        name: row.name,
        url: row.url,
        format: format_from_str(&row.format),
        category: row.category,
        rpz_zone: row.rpz_zone,
        update_frequency_s: row.update_frequency_s as u32,
        enabled: row.enabled,
        last_status: status_from_str(&row.last_status),
        last_attempt_at: row.last_attempt_at,
        last_success_at: row.last_success_at,
        rule_count: row.rule_count as u64,
    }
}

/// Parse feed body text into a deduplicated, normalized set of domain names.
///
/// - `Hosts`: `/etc/hosts`-style lines, `0.0.0.0 domain` or `127.0.0.1 domain`.
/// - `Domains`: one bare domain per line.
/// - `Rpz`: zone-file-style RPZ source, `domain CLASS TYPE RDATA` lines; only
///   the owner name is extracted, the rest is ignored (the daemon derives
///   its own action/category rather than trusting the feed's policy).
pub fn parse_feed_body(format: FeedFormat, body: &str) -> Vec<String> {
    let mut domains: Vec<String> = body
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with(';'))
        .filter_map(|line| match format {
            FeedFormat::Hosts => {
                let mut parts = line.split_whitespace();
                let ip = parts.next()?;
                let domain = parts.next()?;
                is_blackhole_ip(ip).then(|| domain.to_string())
            }
            FeedFormat::Domains => Some(line.split_whitespace().next()?.to_string()),
            FeedFormat::Rpz => Some(line.split_whitespace().next()?.to_string()),
        })
        .map(|d| normalize_domain(&d))
        .filter(|d| !d.is_empty())
        .collect();

    domains.sort();
    domains.dedup();
    domains
}

fn is_blackhole_ip(ip: &str) -> bool {
    matches!(ip, "0.0.0.0" | "127.0.0.1" | "::" | "::1")
}

fn normalize_domain(raw: &str) -> String {
    raw.trim_end_matches('.').trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hosts_format() {
        let body = "# comment\n0.0.0.0 Bad.Example.com\n127.0.0.1 localhost\n1.2.3.4 not-blocked.example.com\n";
        let domains = parse_feed_body(FeedFormat::Hosts, body);
        assert_eq!(domains, vec!["bad.example.com", "localhost"]);
    }

    #[test]
    fn parses_domains_format_and_dedupes() {
        let body = "evil.example.\nevil.example.\nother.example.\n";
        let domains = parse_feed_body(FeedFormat::Domains, body);
        assert_eq!(domains, vec!["evil.example", "other.example"]);
    }
}
