//! Forwarder invariants (spec. §3: Forwarder).

use dnsctl_api::{ForwarderCreate, ForwarderServer, ForwarderType, ForwarderView, HealthCheckConfig};
use dnsctl_store::ForwarderRow;

use super::zone::ModelError;

pub fn validate_forwarder_create(req: &ForwarderCreate) -> Result<(), ModelError> {
    if req.servers.is_empty() {
        return Err(ModelError::EmptyServerList);
    }
    Ok(())
}

fn forwarder_type_str(t: ForwarderType) -> &'static str {
    match t {
        ForwarderType::ActiveDirectory => "active_directory",
        ForwarderType::Intranet => "intranet",
        ForwarderType::Public => "public",
    }
}

fn forwarder_type_from_str(s: &str) -> ForwarderType {
    match s {
        "active_directory" => ForwarderType::ActiveDirectory,
        "intranet" => ForwarderType::Intranet,
        _ => ForwarderType::Public,
    }
}

pub fn forward_policy_str(p: dnsctl_api::ForwardPolicy) -> &'static str {
    match p {
        dnsctl_api::ForwardPolicy::First => "first",
        dnsctl_api::ForwardPolicy::Only => "only",
    }
}

pub fn forward_policy_from_str(s: &str) -> dnsctl_api::ForwardPolicy {
    match s {
        "only" => dnsctl_api::ForwardPolicy::Only,
        _ => dnsctl_api::ForwardPolicy::First,
    }
}

pub fn health_status_from_str(s: &str) -> dnsctl_api::HealthStatus {
    match s {
        "healthy" => dnsctl_api::HealthStatus::Healthy,
        "degraded" => dnsctl_api::HealthStatus::Degraded,
        "unhealthy" => dnsctl_api::HealthStatus::Unhealthy,
        _ => dnsctl_api::HealthStatus::Unknown,
    }
}

pub fn health_status_str(status: dnsctl_api::HealthStatus) -> &'static str {
    match status {
        dnsctl_api::HealthStatus::Unknown => "unknown",
        dnsctl_api::HealthStatus::Healthy => "healthy",
        dnsctl_api::HealthStatus::Degraded => "degraded",
        dnsctl_api::HealthStatus::Unhealthy => "unhealthy",
    }
}

pub fn encode_servers(servers: &[ForwarderServer]) -> String {
    serde_json::to_string(servers).expect("ForwarderServer always serializes")
}

pub fn decode_servers(json: &str) -> Vec<ForwarderServer> {
    serde_json::from_str(json).unwrap_or_default()
}

pub fn encode_health_check(hc: &HealthCheckConfig) -> String {
    serde_json::to_string(hc).expect("HealthCheckConfig always serializes")
}

pub fn decode_health_check(json: &str) -> HealthCheckConfig {
    serde_json::from_str(json).unwrap_or(HealthCheckConfig {
        enabled: true,
        interval_s: 30,
        timeout_s: 2,
        retries: 3,
    })
}

pub fn row_to_view(row: ForwarderRow) -> ForwarderView {
    ForwarderView {
        id: row.id,
        name: row.name,
        domain: row.domain,
        additional_domains: row.additional_domains,
        forwarder_type: forwarder_type_from_str(&row.forwarder_type),
        servers: decode_servers(&row.servers_json),
        forward_policy: forward_policy_from_str(&row.forward_policy),
        health_check: decode_health_check(&row.health_check_json),
        priority: row.priority as u8,
        weight: row.weight as u16,
        is_active: row.is_active,
        health_status: health_status_from_str(&row.health_status),
        last_checked_at: row.last_checked_at,
        version: row.version,
    }
}

pub fn new_row_fields(req: &ForwarderCreate) -> dnsctl_store::NewForwarder {
    dnsctl_store::NewForwarder {
        name: req.name.clone(),
        domain: req.domain.clone(),
        additional_domains: req.additional_domains.clone(),
        forwarder_type: forwarder_type_str(req.forwarder_type).to_string(),
        servers_json: encode_servers(&req.servers),
        forward_policy: forward_policy_str(req.forward_policy).to_string(),
        health_check_json: encode_health_check(&req.health_check),
        priority: req.priority as i64,
        weight: req.weight as i64,
    }
}
