//! Zone invariants (spec. §3: Zone).

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use domain::base::Name;
use jiff::Timestamp;

use dnsctl_api::{ZoneCreate, ZoneType, ZoneView};
use dnsctl_store::ZoneRow;

/// A validation failure caught before a mutation reaches the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    InvalidName(String),
    MissingMasters,
    CnameConflict,
    SrvFieldsRequired,
    RedirectTargetRequired,
    RedirectTargetForbidden,
    EmptyServerList,
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidName(name) => write!(f, "'{name}' is not a valid domain name"),
            Self::MissingMasters => f.write_str("slave zones require at least one master"),
            Self::CnameConflict => {
                f.write_str("a CNAME record cannot coexist with other records at the same name")
            }
            Self::SrvFieldsRequired => {
                f.write_str("SRV records require priority, weight and port")
            }
            Self::RedirectTargetRequired => {
                f.write_str("redirect RPZ actions require a redirect target")
            }
            Self::RedirectTargetForbidden => {
                f.write_str("only redirect RPZ actions take a redirect target")
            }
            Self::EmptyServerList => f.write_str("a forwarder requires at least one server"),
        }
    }
}

impl std::error::Error for ModelError {}

/// Validate a zone name is a syntactically well-formed absolute domain name.
pub fn validate_zone_name(name: &str) -> Result<Name<Bytes>, ModelError> {
    Name::from_str(name).map_err(|_| ModelError::InvalidName(name.to_string()))
}

/// Validate a [`ZoneCreate`] request before it is persisted.
pub fn validate_zone_create(req: &ZoneCreate) -> Result<(), ModelError> {
    validate_zone_name(&req.name.to_string())?;
    if req.zone_type == ZoneType::Slave && req.masters.is_empty() {
        return Err(ModelError::MissingMasters);
    }
    Ok(())
}

/// The next serial to publish for a zone, given its previous serial and the
/// current UTC date. Uses `max(old + 1, yyyymmddNN)` (resolved Open
/// Question, see DESIGN.md): this keeps the serial monotonic even across
/// multiple same-day deploys or clock skew, while still producing the
/// conventional date-based serial most operators expect to read.
pub fn next_serial(old_serial: u32, now: Timestamp) -> u32 {
    let zoned = now.to_zoned(jiff::tz::TimeZone::UTC);
    let date_serial = (zoned.year() as u32) * 1_000_000
        + (zoned.month() as u32) * 10_000
        + (zoned.day() as u32) * 100;
    (old_serial + 1).max(date_serial)
}

pub fn row_to_view(row: ZoneRow) -> Result<ZoneView, ModelError> {
    let zone_type = match row.zone_type.as_str() {
        "master" => ZoneType::Master,
        "slave" => ZoneType::Slave,
        _ => ZoneType::Forward,
    };
    let name = validate_zone_name(&row.name)?;
    Ok(ZoneView {
        id: row.id,
        name,
        zone_type,
        email: row.email,
        serial: row.serial as u32,
        refresh: row.refresh as u32,
        retry: row.retry as u32,
        expire: row.expire as u32,
        minimum: row.minimum as u32,
        is_active: row.is_active,
        masters: row.masters,
        forwarders: row.forwarders,
        version: row.version,
        created_at: row.created_at,
        updated_at: row.updated_at,
        created_by: row.created_by,
    })
}

pub fn zone_type_str(zone_type: ZoneType) -> &'static str {
    match zone_type {
        ZoneType::Master => "master",
        ZoneType::Slave => "slave",
        ZoneType::Forward => "forward",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_names() {
        assert!(validate_zone_name("..bad..").is_err());
    }

    #[test]
    fn accepts_well_formed_names() {
        assert!(validate_zone_name("example.com.").is_ok());
    }

    #[test]
    fn serial_is_monotonic_across_same_day_deploys() {
        let now = "2026-07-28T00:00:00Z".parse::<Timestamp>().unwrap();
        let first = next_serial(2026072700, now);
        let second = next_serial(first, now);
        assert!(second > first);
    }

    #[test]
    fn serial_jumps_to_date_serial_when_stale() {
        let now = "2026-07-28T00:00:00Z".parse::<Timestamp>().unwrap();
        let next = next_serial(1, now);
        assert_eq!(next, 2026072800);
    }
}
