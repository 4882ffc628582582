//! The BIND controller (C3): stage, validate, swap and reload BIND's
//! configuration, with rollback on failure.

pub mod snapshot;

use std::fmt;
use std::fmt::Write as _;
use std::process::Stdio;

use camino::Utf8PathBuf;
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::model::zone;
use crate::render;
use dnsctl_api::{ForwarderView, RpzRuleView, ZoneView};
use dnsctl_store::{Page, SortOrder, Store};

#[derive(Debug, Clone)]
pub enum DeployError {
    CheckConf(String),
    CheckZone { zone: String, detail: String },
    Reload(String),
    Io(String),
    Store(String),
}

impl fmt::Display for DeployError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CheckConf(detail) => write!(f, "named-checkconf rejected the new config: {detail}"),
            Self::CheckZone { zone, detail } => {
                write!(f, "named-checkzone rejected zone '{zone}': {detail}")
            }
            Self::Reload(detail) => write!(f, "reload failed: {detail}"),
            Self::Io(detail) => write!(f, "I/O error during deploy: {detail}"),
            Self::Store(detail) => write!(f, "store error during deploy: {detail}"),
        }
    }
}

impl std::error::Error for DeployError {}

impl From<dnsctl_store::StoreError> for DeployError {
    fn from(err: dnsctl_store::StoreError) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<std::io::Error> for DeployError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Result of a [`deploy`] call. `changed` is `false` when the rendered
/// configuration was byte-for-byte identical to the last deploy and
/// nothing was written, validated or reloaded.
#[derive(Debug, Clone, Copy)]
pub struct DeployOutcome {
    pub serial: u32,
    pub changed: bool,
}

const FINGERPRINT_FILE: &str = ".dnsctld-deploy-fingerprint";

/// Render the full set of configuration artifacts from the store, validate
/// them against the running BIND installation, atomically swap them in and
/// reload. On any validation failure, nothing already live is touched. On a
/// reload failure after the swap, a restart is attempted before falling
/// back to restoring the previous snapshot and reloading with it again
/// (spec. §4.3, §4.9).
///
/// If the rendered configuration is identical to the last deploy, the swap
/// and reload are skipped entirely and `changed` is `false`.
pub async fn deploy(store: &Store, config: &Config) -> Result<DeployOutcome, DeployError> {
    let mut tx = store.begin().await?;
    let zone_rows = dnsctl_store::list_zones(&mut tx, false, Page { offset: 0, limit: 10_000 }, SortOrder::Asc).await?;
    let forwarder_rows = dnsctl_store::list_forwarders(&mut tx, false).await?;
    let rpz_rows = dnsctl_store::list_active_rpz_rules(&mut tx).await?;

    let mut zones = Vec::with_capacity(zone_rows.len());
    let mut per_zone_records = Vec::with_capacity(zone_rows.len());
    for row in zone_rows {
        let records = dnsctl_store::list_records(&mut tx, row.id, Page { offset: 0, limit: 100_000 }).await?;
        let view = zone::row_to_view(row).map_err(|e| DeployError::Io(e.to_string()))?;
        per_zone_records.push(records);
        zones.push(view);
    }
    let forwarders: Vec<_> = forwarder_rows
        .into_iter()
        .map(crate::model::forwarder::row_to_view)
        .collect();
    let rpz_rules: Vec<_> = rpz_rows.into_iter().map(crate::model::rpz::row_to_view).collect();
    tx.commit().await?;

    let zones_dir = &config.bind_zones_dir;
    let rpz_dir = &config.bind_rpz_dir;
    let config_dir = &config.bind_config_dir;

    let fingerprint = fingerprint_inputs(&zones, &forwarders, &rpz_rules);
    let fingerprint_path = config_dir.join(FINGERPRINT_FILE);
    let previous_fingerprint = tokio::fs::read_to_string(&fingerprint_path).await.ok();
    if previous_fingerprint.as_deref() == Some(fingerprint.as_str()) {
        info!("deploy inputs unchanged since last deploy, skipping reload");
        let serial = zones.iter().map(|z| z.serial).max().unwrap_or(0);
        return Ok(DeployOutcome { serial, changed: false });
    }

    let mut max_serial = 0u32;
    let mut zonefiles = Vec::with_capacity(zones.len());
    for (view, records) in zones.iter().zip(per_zone_records.iter()) {
        let serial = zone::next_serial(view.serial, jiff_now());
        max_serial = max_serial.max(serial);
        let text = render::render_zonefile(view, serial, records);
        zonefiles.push((zones_dir.join(format!("{}.zone", view.name)), text));
    }

    let rpz_zonefiles = render::render_rpz_zonefiles(max_serial.max(1), &rpz_rules);
    let mut rpz_zone_names: Vec<String> = rpz_zonefiles.keys().cloned().collect();
    rpz_zone_names.sort();
    let rpz_files: Vec<(Utf8PathBuf, String)> = rpz_zonefiles
        .into_iter()
        .map(|(zone, text)| (rpz_dir.join(format!("{zone}.zone")), text))
        .collect();

    let zones_conf = render::render_zones_conf(&zones, zones_dir);
    let forwarders_conf = render::render_forwarders_conf(&forwarders);
    let rpz_policy_conf = render::render_rpz_policy_conf(&rpz_zone_names, rpz_dir);
    let includes_block = render::render_named_conf_includes(config_dir);

    let named_conf_path = config_dir.join("named.conf");
    let existing_named_conf = tokio::fs::read_to_string(&named_conf_path).await.unwrap_or_default();
    let new_named_conf = render::conf::splice_named_conf(&existing_named_conf, &includes_block);

    render::validate_named_conf(&new_named_conf).map_err(DeployError::CheckConf)?;

    if let Ok((path, hash)) = snapshot::take_snapshot(
        &config.bind_snapshot_dir,
        &[("conf", config_dir), ("zones", zones_dir), ("rpz", rpz_dir)],
    ) {
        let mut tx = store.begin().await?;
        dnsctl_store::record_snapshot(&mut tx, &hash, "deploy", path.as_str(), jiff_now()).await?;
        tx.commit().await?;
    } else {
        warn!("failed to snapshot current configuration before deploy");
    }

    let mut snapshot_files = Vec::new();

    snapshot_files.push((named_conf_path.clone(), existing_named_conf));
    for path in [&config_dir.join("zones.conf"), &config_dir.join("forwarders.conf"), &config_dir.join("rpz-policy.conf")] {
        let existing = tokio::fs::read_to_string(path).await.unwrap_or_default();
        snapshot_files.push((path.clone(), existing));
    }
    for (path, _) in zonefiles.iter().chain(rpz_files.iter()) {
        let existing = tokio::fs::read_to_string(path).await.unwrap_or_default();
        snapshot_files.push((path.clone(), existing));
    }

    crate::util::write_file(&named_conf_path, new_named_conf.as_bytes()).map_err(|e| DeployError::Io(e.to_string()))?;
    crate::util::write_file(&config_dir.join("zones.conf"), zones_conf.as_bytes())
        .map_err(|e| DeployError::Io(e.to_string()))?;
    crate::util::write_file(&config_dir.join("forwarders.conf"), forwarders_conf.as_bytes())
        .map_err(|e| DeployError::Io(e.to_string()))?;
    crate::util::write_file(&config_dir.join("rpz-policy.conf"), rpz_policy_conf.as_bytes())
        .map_err(|e| DeployError::Io(e.to_string()))?;
    for (path, text) in &zonefiles {
        crate::util::write_file(path, text.as_bytes()).map_err(|e| DeployError::Io(e.to_string()))?;
    }
    for (path, text) in &rpz_files {
        crate::util::write_file(path, text.as_bytes()).map_err(|e| DeployError::Io(e.to_string()))?;
    }

    if let Err(err) = checkconf(&named_conf_path, config.reload_timeout).await {
        rollback(&snapshot_files).await;
        return Err(err);
    }

    for view in &zones {
        let path = zones_dir.join(format!("{}.zone", view.name));
        if let Err(detail) = checkzone(&view.name.to_string(), &path, config.reload_timeout).await {
            rollback(&snapshot_files).await;
            return Err(DeployError::CheckZone {
                zone: view.name.to_string(),
                detail,
            });
        }
    }

    if let Err(err) = reload(&config.bind_service_name, config.reload_timeout).await {
        warn!("reload failed after deploy, attempting a full restart: {err}");
        if let Err(restart_err) = restart(&config.bind_service_name, config.restart_timeout).await {
            warn!("restart also failed, rolling back: {restart_err}");
            rollback(&snapshot_files).await;
            let _ = reload(&config.bind_service_name, config.reload_timeout).await;
            return Err(err);
        }
        info!("restart recovered BIND after a failed reload");
    }

    if let Err(e) = tokio::fs::write(&fingerprint_path, fingerprint.as_bytes()).await {
        warn!("failed to persist deploy fingerprint: {e}");
    }

    info!("Deployed configuration for {} zones", zones.len());
    Ok(DeployOutcome {
        serial: max_serial,
        changed: true,
    })
}

/// A deterministic fingerprint over the parts of the store that feed the
/// renderer, ignoring volatile bookkeeping fields (serials, versions,
/// timestamps, health status) that change on their own without the
/// rendered configuration changing.
fn fingerprint_inputs(zones: &[ZoneView], forwarders: &[ForwarderView], rpz_rules: &[RpzRuleView]) -> String {
    let mut buf = String::new();
    for z in zones.iter().filter(|z| z.is_active) {
        let _ = writeln!(
            buf,
            "zone|{}|{:?}|{}|{}|{}|{}|{}|{:?}|{:?}",
            z.name, z.zone_type, z.email, z.refresh, z.retry, z.expire, z.minimum, z.masters, z.forwarders
        );
    }
    for f in forwarders.iter().filter(|f| f.is_active) {
        let _ = writeln!(
            buf,
            "fwd|{}|{:?}|{:?}|{:?}|{}",
            f.domain, f.additional_domains, f.forward_policy, f.servers, f.priority
        );
    }
    for r in rpz_rules.iter().filter(|r| r.is_active) {
        let _ = writeln!(buf, "rpz|{}|{}|{:?}|{:?}", r.rpz_zone, r.domain, r.action, r.redirect_target);
    }
    snapshot::hash::content_hash(buf.as_bytes())
}

async fn checkconf(path: &Utf8PathBuf, timeout: std::time::Duration) -> Result<(), DeployError> {
    run_checked("named-checkconf", &[path.as_str()], timeout)
        .await
        .map_err(DeployError::CheckConf)
}

async fn checkzone(zone: &str, path: &Utf8PathBuf, timeout: std::time::Duration) -> Result<(), String> {
    run_checked("named-checkzone", &[zone, path.as_str()], timeout).await
}

pub(crate) async fn reload(service: &str, timeout: std::time::Duration) -> Result<(), DeployError> {
    run_checked("rndc", &["reload", service], timeout)
        .await
        .map_err(DeployError::Reload)
}

/// Restart the BIND service outright. Tried once after a reload failure,
/// before falling back to rolling the config back (spec. §4.9).
async fn restart(service: &str, timeout: std::time::Duration) -> Result<(), DeployError> {
    run_checked("systemctl", &["restart", service], timeout)
        .await
        .map_err(DeployError::Reload)
}

async fn run_checked(bin: &str, args: &[&str], timeout: std::time::Duration) -> Result<(), String> {
    let fut = Command::new(bin)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output();

    let output = tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| format!("{bin} timed out after {timeout:?}"))?
        .map_err(|e| format!("failed to run {bin}: {e}"))?;

    if output.status.success() {
        Ok(())
    } else {
        Err(String::from_utf8_lossy(&output.stderr).into_owned())
    }
}

async fn rollback(snapshot_files: &[(Utf8PathBuf, String)]) {
    for (path, contents) in snapshot_files {
        if let Err(err) = crate::util::write_file(path, contents.as_bytes()) {
            error!("rollback failed to restore '{path}': {err}");
        }
    }
}

fn jiff_now() -> jiff::Timestamp {
    jiff::Timestamp::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dnsctl_api::ZoneType;

    fn zone(name: &str) -> ZoneView {
        ZoneView {
            id: 1,
            name: name.parse().unwrap(),
            zone_type: ZoneType::Master,
            email: "hostmaster@example.com".to_string(),
            serial: 1,
            refresh: 3600,
            retry: 900,
            expire: 604800,
            minimum: 3600,
            is_active: true,
            masters: vec![],
            forwarders: vec![],
            version: 1,
            created_at: jiff::Timestamp::UNIX_EPOCH,
            updated_at: jiff::Timestamp::UNIX_EPOCH,
            created_by: "test".to_string(),
        }
    }

    #[test]
    fn fingerprint_is_stable_across_volatile_field_changes() {
        let mut a = zone("example.com.");
        let mut b = a.clone();
        b.serial = 9999;
        b.version = 42;
        b.updated_at = jiff::Timestamp::now();
        assert_eq!(
            fingerprint_inputs(&[a.clone()], &[], &[]),
            fingerprint_inputs(&[b.clone()], &[], &[])
        );
        a.refresh = 1800;
        assert_ne!(fingerprint_inputs(&[a], &[], &[]), fingerprint_inputs(&[b], &[], &[]));
    }

    #[test]
    fn fingerprint_ignores_inactive_rows() {
        let mut z = zone("example.com.");
        z.is_active = false;
        assert_eq!(fingerprint_inputs(&[z], &[], &[]), fingerprint_inputs(&[], &[], &[]));
    }
}
