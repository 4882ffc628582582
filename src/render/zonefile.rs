//! Rendering a zone's records into BIND zonefile text (spec. §4.2).

use std::fmt::Write as _;

use dnsctl_api::{RecordType, ZoneView};
use dnsctl_store::RecordRow;

/// Render one zone's SOA, NS glue and records into zonefile text.
///
/// `serial` is the serial to stamp into the SOA record; callers compute it
/// via [`crate::model::zone::next_serial`] before calling this, since serial
/// selection depends on state this function deliberately doesn't see.
pub fn render_zonefile(zone: &ZoneView, serial: u32, records: &[RecordRow]) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "; Generated by dnsctld. Do not edit by hand.");
    let _ = writeln!(out, "$TTL {}", zone.minimum);
    let _ = writeln!(
        out,
        "@ IN SOA {name} {email} ({serial} {refresh} {retry} {expire} {minimum})",
        name = zone.name,
        email = rname(&zone.email),
        refresh = zone.refresh,
        retry = zone.retry,
        expire = zone.expire,
        minimum = zone.minimum,
    );
    let _ = writeln!(out, "@ IN NS {}", zone.name);

    for record in records.iter().filter(|r| r.is_active) {
        render_record(&mut out, record);
    }

    out
}

/// RFC 1035 email-to-rname conversion: the first unescaped `@` becomes `.`.
fn rname(email: &str) -> String {
    let mut rname = email.replacen('@', ".", 1);
    if !rname.ends_with('.') {
        rname.push('.');
    }
    rname
}

fn render_record(out: &mut String, record: &RecordRow) {
    let owner = if record.name.is_empty() {
        "@".to_string()
    } else {
        record.name.clone()
    };

    match record.record_type.as_str() {
        "SRV" => {
            let _ = writeln!(
                out,
                "{owner} {ttl} IN SRV {prio} {weight} {port} {value}",
                ttl = record.ttl,
                prio = record.priority.unwrap_or(0),
                weight = record.weight.unwrap_or(0),
                port = record.port.unwrap_or(0),
                value = record.value,
            );
        }
        "TXT" => {
            let _ = writeln!(
                out,
                "{owner} {ttl} IN TXT \"{value}\"",
                ttl = record.ttl,
                value = record.value.replace('"', "\\\"")
            );
        }
        rtype => {
            let _ = writeln!(
                out,
                "{owner} {ttl} IN {rtype} {value}",
                ttl = record.ttl,
                value = record.value,
            );
        }
    }
}

/// Sort key grouping records the way a hand-written zonefile typically
/// reads: SOA/NS first, then alphabetically by owner name.
pub fn sort_key(record_type: RecordType, name: &str) -> (u8, String) {
    let rank = match record_type {
        RecordType::Soa => 0,
        RecordType::Ns => 1,
        _ => 2,
    };
    (rank, name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_email_to_rname() {
        assert_eq!(rname("hostmaster@example.com"), "hostmaster.example.com.");
    }
}
