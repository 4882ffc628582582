//! Record invariants (spec. §3: Record).

use dnsctl_api::{RecordCreate, RecordType, RecordView};
use dnsctl_store::RecordRow;

use super::zone::ModelError;

/// Validate a record in isolation (type-specific field requirements).
pub fn validate_record_create(req: &RecordCreate) -> Result<(), ModelError> {
    if req.record_type == RecordType::Srv
        && (req.priority.is_none() || req.weight.is_none() || req.port.is_none())
    {
        return Err(ModelError::SrvFieldsRequired);
    }
    Ok(())
}

/// CNAME may not coexist with any other record at the same owner name
/// (spec. §3's CNAME-exclusivity invariant). `existing` excludes the record
/// being created/updated itself.
pub fn validate_cname_exclusivity(
    new_type: RecordType,
    existing: &[RecordRow],
) -> Result<(), ModelError> {
    let has_cname = existing.iter().any(|r| r.record_type == "CNAME");
    let adding_cname = new_type == RecordType::Cname;
    if (adding_cname && !existing.is_empty()) || (has_cname && !adding_cname) {
        return Err(ModelError::CnameConflict);
    }
    Ok(())
}

fn record_type_from_str(s: &str) -> RecordType {
    match s {
        "A" => RecordType::A,
        "AAAA" => RecordType::Aaaa,
        "CNAME" => RecordType::Cname,
        "MX" => RecordType::Mx,
        "TXT" => RecordType::Txt,
        "SRV" => RecordType::Srv,
        "PTR" => RecordType::Ptr,
        "NS" => RecordType::Ns,
        _ => RecordType::Soa,
    }
}

pub fn row_to_view(row: RecordRow) -> RecordView {
    RecordView {
        id: row.id,
        zone_id: row.zone_id,
        name: row.name,
        record_type: record_type_from_str(&row.record_type),
        value: row.value,
        ttl: row.ttl as u32,
        priority: row.priority.map(|v| v as u16),
        weight: row.weight.map(|v| v as u16),
        port: row.port.map(|v| v as u16),
        is_active: row.is_active,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cname_cannot_join_existing_records() {
        let existing = vec![RecordRow {
            id: 1,
            zone_id: 1,
            name: "www".into(),
            record_type: "A".into(),
            value: "10.0.0.1".into(),
            ttl: 300,
            priority: None,
            weight: None,
            port: None,
            is_active: true,
            version: 0,
        }];
        assert_eq!(
            validate_cname_exclusivity(RecordType::Cname, &existing),
            Err(ModelError::CnameConflict)
        );
    }

    #[test]
    fn other_records_cannot_join_a_cname() {
        let existing = vec![RecordRow {
            id: 1,
            zone_id: 1,
            name: "www".into(),
            record_type: "CNAME".into(),
            value: "other.example.com.".into(),
            ttl: 300,
            priority: None,
            weight: None,
            port: None,
            is_active: true,
            version: 0,
        }];
        assert_eq!(
            validate_cname_exclusivity(RecordType::A, &existing),
            Err(ModelError::CnameConflict)
        );
    }
}
