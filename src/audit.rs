//! Audit trail and config rollback (C9).
//!
//! Every mutation already appends an [`dnsctl_store::NewAuditEntry`] inline
//! in `crate::service`; this module is the read side plus the one
//! operation services don't do for themselves -- restoring BIND's config
//! from a previously recorded snapshot.

use std::fmt;
use std::sync::Arc;

use dnsctl_store::SnapshotRow;

use crate::bind::snapshot;
use crate::center::Center;

#[derive(Debug, Clone)]
pub enum RollbackError {
    Store(String),
    Io(String),
    Reload(String),
    NotFound,
}

impl fmt::Display for RollbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(detail) => write!(f, "store error during rollback: {detail}"),
            Self::Io(detail) => write!(f, "I/O error during rollback: {detail}"),
            Self::Reload(detail) => write!(f, "reload after rollback failed: {detail}"),
            Self::NotFound => f.write_str("no snapshot with that id was found"),
        }
    }
}

impl std::error::Error for RollbackError {}

impl From<dnsctl_store::StoreError> for RollbackError {
    fn from(err: dnsctl_store::StoreError) -> Self {
        Self::Store(err.to_string())
    }
}

pub async fn list_snapshots(center: &Arc<Center>) -> Result<Vec<SnapshotRow>, RollbackError> {
    let mut tx = center.store.begin().await?;
    let rows = dnsctl_store::list_snapshots(&mut tx).await?;
    tx.commit().await?;
    Ok(rows)
}

/// Restore a named snapshot's config/zones/RPZ files over the daemon's live
/// directories and force BIND to reload with them, bypassing the usual
/// store-driven render (spec. §4.9: "roll back to any retained snapshot").
pub async fn rollback_to(center: &Arc<Center>, snapshot_id: i64) -> Result<(), RollbackError> {
    let mut tx = center.store.begin().await?;
    let rows = dnsctl_store::list_snapshots(&mut tx).await?;
    tx.commit().await?;

    let target = rows
        .into_iter()
        .find(|row| row.id == snapshot_id)
        .ok_or(RollbackError::NotFound)?;

    let snapshot_path = camino::Utf8PathBuf::from(&target.path);
    snapshot::restore_snapshot(&snapshot_path, &center.config.bind_config_dir.parent().unwrap_or(&center.config.bind_config_dir).to_path_buf())
        .map_err(|e| RollbackError::Io(e.to_string()))?;

    crate::bind::reload(&center.config.bind_service_name, center.config.reload_timeout)
        .await
        .map_err(|e| RollbackError::Reload(e.to_string()))
}

/// Remove snapshots beyond `config.snapshot_retention_count`, oldest first,
/// returning how many were pruned. Called by the scheduler unit (C8).
pub async fn prune_stale_snapshots(center: &Arc<Center>) -> Result<usize, RollbackError> {
    let mut tx = center.store.begin().await?;
    let pruned =
        dnsctl_store::prune_snapshots(&mut tx, center.config.snapshot_retention_count as i64).await?;
    tx.commit().await?;
    for row in &pruned {
        let _ = std::fs::remove_file(&row.path);
    }
    Ok(pruned.len())
}
