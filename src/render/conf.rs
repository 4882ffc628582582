//! Rendering `named.conf` and the three config files it includes
//! (SUPPLEMENT: the original spec left BIND's top-level configuration
//! untouched; dnsctld owns one clearly delimited `include` block inside it
//! so operators can still hand-edit the rest).
//!
//! Zones, forwarders and the RPZ policy are written to their own files
//! (`zones.conf`, `forwarders.conf`, `rpz-policy.conf`) rather than one
//! inline block, so a `named-checkconf` failure against one concern is
//! easy to isolate and so the files can be diffed independently.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use camino::Utf8Path;
use dnsctl_api::{ForwardPolicy, ForwarderView, ZoneType, ZoneView};

pub const MARKER_BEGIN: &str = "// BEGIN DNSCTLD MANAGED BLOCK -- do not edit by hand";
pub const MARKER_END: &str = "// END DNSCTLD MANAGED BLOCK";

/// Render the three `include` directives dnsctld owns, wrapped in
/// begin/end markers so [`splice_named_conf`] can find and replace just
/// this block on future deploys.
pub fn render_named_conf_includes(config_dir: &Utf8Path) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{MARKER_BEGIN}");
    let _ = writeln!(out, "include \"{config_dir}/zones.conf\";");
    let _ = writeln!(out, "include \"{config_dir}/forwarders.conf\";");
    let _ = writeln!(out, "include \"{config_dir}/rpz-policy.conf\";");
    let _ = writeln!(out, "{MARKER_END}");
    out
}

/// Render every active zone's `zone { ... }` stanza into `zones.conf`.
pub fn render_zones_conf(zones: &[ZoneView], zones_dir: &Utf8Path) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "// Generated by dnsctld. Do not edit by hand.");

    for zone in zones.iter().filter(|z| z.is_active) {
        let zone_type = match zone.zone_type {
            ZoneType::Master => "master",
            ZoneType::Slave => "slave",
            ZoneType::Forward => "forward",
        };
        let _ = writeln!(out, "zone \"{}\" {{", zone.name);
        let _ = writeln!(out, "    type {zone_type};");
        let _ = writeln!(out, "    file \"{}/{}.zone\";", zones_dir, zone.name);
        if zone.zone_type == ZoneType::Slave {
            let masters: Vec<String> = zone.masters.iter().map(|ip| format!("{ip};")).collect();
            let _ = writeln!(out, "    masters {{ {} }};", masters.join(" "));
        }
        let _ = writeln!(out, "}};");
        let _ = writeln!(out);
    }

    out
}

/// Render every active forwarder's domain(s) into `forwarders.conf`.
pub fn render_forwarders_conf(forwarders: &[ForwarderView]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "// Generated by dnsctld. Do not edit by hand.");

    for forwarder in forwarders.iter().filter(|f| f.is_active) {
        let policy = match forwarder.forward_policy {
            ForwardPolicy::First => "first",
            ForwardPolicy::Only => "only",
        };
        let servers: Vec<String> = forwarder
            .servers
            .iter()
            .filter(|s| s.enabled)
            .map(|s| format!("{} port {};", s.ip, s.port))
            .collect();

        for domain in std::iter::once(&forwarder.domain).chain(forwarder.additional_domains.iter()) {
            let _ = writeln!(out, "zone \"{domain}\" {{");
            let _ = writeln!(out, "    type forward;");
            let _ = writeln!(out, "    forward {policy};");
            let _ = writeln!(out, "    forwarders {{ {} }};", servers.join(" "));
            let _ = writeln!(out, "}};");
            let _ = writeln!(out);
        }
    }

    out
}

/// Render the `response-policy` clause and one `zone { ... }` stanza per
/// distinct active RPZ zone into `rpz-policy.conf`. `rpz_zones` must be
/// given in the priority order BIND should evaluate them in.
pub fn render_rpz_policy_conf(rpz_zones: &[String], rpz_dir: &Utf8Path) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "// Generated by dnsctld. Do not edit by hand.");

    if rpz_zones.is_empty() {
        return out;
    }

    let _ = writeln!(out, "response-policy {{");
    for zone in rpz_zones {
        let _ = writeln!(out, "    zone \"{zone}\";");
    }
    let _ = writeln!(out, "}};");
    let _ = writeln!(out);

    for zone in rpz_zones {
        let _ = writeln!(out, "zone \"{zone}\" {{");
        let _ = writeln!(out, "    type master;");
        let _ = writeln!(out, "    file \"{rpz_dir}/{zone}.zone\";");
        let _ = writeln!(out, "    allow-query {{ none; }};");
        let _ = writeln!(out, "}};");
        let _ = writeln!(out);
    }

    out
}

/// Replace the managed block inside an existing `named.conf`, preserving
/// everything an operator hand-wrote outside of it. If no markers are
/// found, the block is appended.
pub fn splice_named_conf(existing: &str, managed_block: &str) -> String {
    if let (Some(start), Some(end)) = (existing.find(MARKER_BEGIN), existing.find(MARKER_END)) {
        let end = end + MARKER_END.len();
        format!("{}{}{}", &existing[..start], managed_block, &existing[end..])
    } else {
        format!("{existing}\n{managed_block}\n")
    }
}

/// Reject a `named.conf` that would confuse `named` itself: BIND treats a
/// repeated `include` of the same file as a hard parse error, but silently
/// accepts it if the paths differ only by whitespace, which
/// `named-checkconf` doesn't always catch ahead of a reload. Checked
/// before staging ever touches the live tree.
pub fn validate_named_conf(text: &str) -> Result<(), String> {
    let mut seen = BTreeSet::new();
    for line in text.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix("include") else {
            continue;
        };
        let rest = rest.trim_start();
        let Some(start) = rest.find('"') else { continue };
        let Some(end) = rest[start + 1..].find('"') else {
            continue;
        };
        let path = &rest[start + 1..start + 1 + end];
        if !seen.insert(path.to_string()) {
            return Err(format!("named.conf includes '{path}' more than once"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splice_replaces_only_the_managed_block() {
        let existing = format!(
            "options {{ recursion no; }};\n\n{MARKER_BEGIN}\nold content\n{MARKER_END}\n"
        );
        let spliced = splice_named_conf(&existing, &format!("{MARKER_BEGIN}\nnew content\n{MARKER_END}"));
        assert!(spliced.contains("options { recursion no; };"));
        assert!(spliced.contains("new content"));
        assert!(!spliced.contains("old content"));
    }

    #[test]
    fn splice_appends_when_no_markers_present() {
        let existing = "options { recursion no; };\n";
        let spliced = splice_named_conf(existing, &format!("{MARKER_BEGIN}\nnew\n{MARKER_END}"));
        assert!(spliced.starts_with(existing));
        assert!(spliced.contains("new"));
    }

    #[test]
    fn validate_rejects_duplicate_includes() {
        let text = "include \"/etc/bind/zones.conf\";\ninclude \"/etc/bind/zones.conf\";\n";
        assert!(validate_named_conf(text).is_err());
    }

    #[test]
    fn validate_accepts_distinct_includes() {
        let text = "include \"/etc/bind/zones.conf\";\ninclude \"/etc/bind/forwarders.conf\";\n";
        assert!(validate_named_conf(text).is_ok());
    }
}
