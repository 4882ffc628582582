//! Rendering RPZ rules into RPZ response-policy zones (spec. §4.4).

use std::collections::BTreeMap;
use std::fmt::Write as _;

use dnsctl_api::{RpzAction, RpzRuleView};

/// Render every active rule into one zonefile per distinct `rpz_zone`,
/// keyed by zone name.
///
/// A domain can in principle carry active rules in more than one RPZ zone
/// at once (e.g. a manual block and a threat-feed rule for the same
/// domain). BIND evaluates `response-policy` zones in listing order and
/// stops at the first match, which makes the outcome depend on the order
/// dnsctld happens to emit zones into `named.conf`. To keep the result
/// independent of that ordering, collisions are resolved here instead:
/// a domain present in more than one zone is kept only in the
/// alphabetically-lowest `rpz_zone` and dropped from the others.
pub fn render_rpz_zonefiles(serial: u32, rules: &[RpzRuleView]) -> BTreeMap<String, String> {
    let active: Vec<&RpzRuleView> = rules.iter().filter(|r| r.is_active).collect();

    let mut owner: BTreeMap<&str, &str> = BTreeMap::new();
    for rule in &active {
        owner
            .entry(rule.domain.as_str())
            .and_modify(|current| {
                if rule.rpz_zone.as_str() < *current {
                    *current = rule.rpz_zone.as_str();
                }
            })
            .or_insert(rule.rpz_zone.as_str());
    }

    let mut by_zone: BTreeMap<&str, Vec<&RpzRuleView>> = BTreeMap::new();
    for rule in &active {
        if owner.get(rule.domain.as_str()).copied() == Some(rule.rpz_zone.as_str()) {
            by_zone.entry(rule.rpz_zone.as_str()).or_default().push(rule);
        }
    }

    by_zone
        .into_iter()
        .map(|(zone, rules)| (zone.to_string(), render_one_zonefile(zone, serial, &rules)))
        .collect()
}

/// Render one RPZ zone's winning rules into zonefile text. BIND applies
/// RPZ rules as CNAME rewrites at a well-known trigger name.
fn render_one_zonefile(rpz_zone: &str, serial: u32, rules: &[&RpzRuleView]) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "; Generated by dnsctld. Do not edit by hand.");
    let _ = writeln!(out, "$TTL 300");
    let _ = writeln!(
        out,
        "@ IN SOA {zone} admin.{zone} ({serial} 3600 900 604800 300)",
        zone = rpz_zone,
    );
    let _ = writeln!(out, "@ IN NS localhost.");

    for rule in rules {
        let target = match rule.action {
            RpzAction::Block => ".".to_string(),
            RpzAction::Passthru => "rpz-passthru.".to_string(),
            RpzAction::Redirect => rule
                .redirect_target
                .clone()
                .map(|t| format!("{t}."))
                .unwrap_or_else(|| ".".to_string()),
        };
        let _ = writeln!(out, "{} CNAME {target}", rule.domain);
        let _ = writeln!(out, "*.{} CNAME {target}", rule.domain);
    }

    out
}

#[cfg(test)]
mod tests {
    use dnsctl_api::RuleSource;
    use jiff::Timestamp;

    use super::*;

    fn rule(domain: &str, zone: &str) -> RpzRuleView {
        RpzRuleView {
            id: 1,
            domain: domain.to_string(),
            rpz_zone: zone.to_string(),
            action: RpzAction::Block,
            redirect_target: None,
            category: "test".to_string(),
            source: RuleSource::Manual,
            is_active: true,
            created_at: Timestamp::UNIX_EPOCH,
        }
    }

    #[test]
    fn splits_rules_by_rpz_zone() {
        let rules = vec![rule("evil.example", "rpz.threat"), rule("internal.example", "rpz.manual")];
        let files = render_rpz_zonefiles(1, &rules);
        assert_eq!(files.len(), 2);
        assert!(files["rpz.threat"].contains("evil.example"));
        assert!(files["rpz.manual"].contains("internal.example"));
        assert!(!files["rpz.threat"].contains("internal.example"));
    }

    #[test]
    fn colliding_domain_is_kept_only_by_lowest_zone_name() {
        let rules = vec![rule("evil.example", "rpz.zzz"), rule("evil.example", "rpz.aaa")];
        let files = render_rpz_zonefiles(1, &rules);
        assert!(files["rpz.aaa"].contains("evil.example"));
        assert!(!files.contains_key("rpz.zzz") || !files["rpz.zzz"].contains("evil.example"));
    }
}
