//! The DNS service (C4): validated CRUD over zones, records, forwarders and
//! RPZ rules, each one transaction against the store plus the resulting
//! audit entry and event, per spec. §4.1 and §4.7.
//!
//! Every mutating operation deploys synchronously before reporting success
//! to its caller: the store commit happens first, then [`crate::bind::deploy`]
//! is run against the updated store state. If BIND rejects or fails to pick
//! up the new configuration, the store change is reverted in a fresh
//! transaction and the caller gets back a `DeployRejected`/`DeployFailed`
//! error rather than an `Ok` for a change that never actually took effect
//! (spec. §4.1, §4.9).

use std::sync::Arc;

use jiff::Timestamp;
use serde_json::json;
use tracing::error;

use crate::bind::DeployError;
use crate::center::{Center, Change, Update};
use crate::model::{forwarder as forwarder_model, record as record_model, rpz as rpz_model, zone as zone_model};
use dnsctl_api::{
    Event, EventType, ForwarderCreate, ForwarderUpdate, ForwarderView, RecordCreate, RecordUpdate,
    RecordView, RpzDiff, RpzRuleCreate, RpzRuleUpdate, RpzRuleView, ServiceError, ZoneCreate, ZoneUpdate,
    ZoneView,
};
use dnsctl_store::{NewAuditEntry, NewForwarder, NewRecord, NewRpzRule, NewZone, Page, SortOrder};

impl From<dnsctl_store::StoreError> for ServiceError {
    fn from(err: dnsctl_store::StoreError) -> Self {
        match err {
            dnsctl_store::StoreError::AlreadyExists => ServiceError::Validation("already exists".into()),
            dnsctl_store::StoreError::Conflict => ServiceError::Conflict,
            dnsctl_store::StoreError::NotFound => ServiceError::NotFound,
            dnsctl_store::StoreError::Unavailable => ServiceError::StoreUnavailable,
            dnsctl_store::StoreError::Database(msg) => ServiceError::Internal { correlation_id: msg },
        }
    }
}

impl From<zone_model::ModelError> for ServiceError {
    fn from(err: zone_model::ModelError) -> Self {
        ServiceError::Validation(err.to_string())
    }
}

fn emit(center: &Center, event: EventType, data: serde_json::Value) {
    center.publish(Event {
        event,
        data,
        ts: Timestamp::now(),
    });
}

async fn audit(
    tx: &mut dnsctl_store::Tx<'_>,
    actor: &str,
    action: &str,
    target_kind: &str,
    target_id: impl ToString,
) -> Result<(), ServiceError> {
    dnsctl_store::append_audit_entry(
        tx,
        NewAuditEntry {
            actor: actor.to_string(),
            action: action.to_string(),
            target_kind: target_kind.to_string(),
            target_id: target_id.to_string(),
            before_hash: None,
            after_hash: None,
            success: true,
            note: None,
        },
        Timestamp::now(),
    )
    .await?;
    Ok(())
}

/// Run a deploy after a mutation's transaction has committed. Maps a
/// validation-shaped [`DeployError`] (the new configuration itself is
/// broken) to [`ServiceError::DeployRejected`], and everything else
/// (I/O, reload, store) to [`ServiceError::DeployFailed`].
async fn deploy_after_commit(center: &Arc<Center>) -> Result<(), ServiceError> {
    match crate::bind::deploy(&center.store, &center.config).await {
        Ok(_) => Ok(()),
        Err(err @ (DeployError::CheckConf(_) | DeployError::CheckZone { .. })) => {
            Err(ServiceError::DeployRejected(err.to_string()))
        }
        Err(err) => Err(ServiceError::DeployFailed(err.to_string())),
    }
}

//----------- Zones -----------------------------------------------------------

pub async fn create_zone(center: &Arc<Center>, req: ZoneCreate) -> Result<ZoneView, ServiceError> {
    zone_model::validate_zone_create(&req)?;

    let mut tx = center.store.begin().await?;
    if dnsctl_store::get_zone_by_name(&mut tx, &req.name.to_string())
        .await?
        .is_some()
    {
        return Err(ServiceError::Validation(format!(
            "a zone named '{}' already exists",
            req.name
        )));
    }

    let row = dnsctl_store::insert_zone(
        &mut tx,
        NewZone {
            name: req.name.to_string(),
            zone_type: zone_model::zone_type_str(req.zone_type).to_string(),
            email: req.email.clone(),
            refresh: req.refresh as i64,
            retry: req.retry as i64,
            expire: req.expire as i64,
            minimum: req.minimum as i64,
            masters: req.masters.clone(),
            forwarders: req.forwarders.clone(),
            created_by: req.created_by.clone(),
        },
        Timestamp::now(),
    )
    .await?;

    audit(&mut tx, &req.created_by, "zone.create", "zone", row.id).await?;
    tx.commit().await?;

    if let Err(err) = deploy_after_commit(center).await {
        if let Ok(mut tx) = center.store.begin().await {
            if let Err(e) = dnsctl_store::delete_zone(&mut tx, row.id).await {
                error!("failed to revert zone {} after rejected deploy: {e}", row.id);
            } else {
                let _ = tx.commit().await;
            }
        }
        return Err(err);
    }

    let view = zone_model::row_to_view(row)?;
    center
        .update_tx
        .send(Update::Changed(Change::ZoneAdded(view.id)))
        .ok();
    emit(center, EventType::ZoneCreated, json!({ "id": view.id, "name": view.name.to_string() }));
    Ok(view)
}

pub async fn update_zone(center: &Arc<Center>, req: ZoneUpdate) -> Result<ZoneView, ServiceError> {
    let mut tx = center.store.begin().await?;
    let previous = dnsctl_store::get_zone(&mut tx, req.id).await?;

    let masters = req.masters.clone().unwrap_or_else(|| previous.masters.clone());
    let forwarders = req
        .forwarders
        .clone()
        .unwrap_or_else(|| previous.forwarders.clone());

    dnsctl_store::update_zone_metadata(
        &mut tx,
        req.id,
        req.version,
        req.email.as_deref().unwrap_or(&previous.email),
        req.refresh.map(|v| v as i64).unwrap_or(previous.refresh),
        req.retry.map(|v| v as i64).unwrap_or(previous.retry),
        req.expire.map(|v| v as i64).unwrap_or(previous.expire),
        req.minimum.map(|v| v as i64).unwrap_or(previous.minimum),
        &masters,
        &forwarders,
        Timestamp::now(),
    )
    .await?;

    audit(&mut tx, "api", "zone.update", "zone", req.id).await?;
    tx.commit().await?;

    if let Err(err) = deploy_after_commit(center).await {
        if let Ok(mut tx) = center.store.begin().await {
            let reverted = dnsctl_store::update_zone_metadata(
                &mut tx,
                req.id,
                req.version + 1,
                &previous.email,
                previous.refresh,
                previous.retry,
                previous.expire,
                previous.minimum,
                &previous.masters,
                &previous.forwarders,
                Timestamp::now(),
            )
            .await;
            match reverted {
                Ok(()) => {
                    let _ = tx.commit().await;
                }
                Err(e) => error!("failed to revert zone {} after rejected deploy: {e}", req.id),
            }
        }
        return Err(err);
    }

    let mut tx = center.store.begin().await?;
    let row = dnsctl_store::get_zone(&mut tx, req.id).await?;
    tx.commit().await?;
    let view = zone_model::row_to_view(row)?;

    center
        .update_tx
        .send(Update::Changed(Change::ZoneChanged(view.id)))
        .ok();
    emit(center, EventType::ZoneUpdated, json!({ "id": view.id }));
    Ok(view)
}

pub async fn delete_zone(center: &Arc<Center>, id: i64) -> Result<(), ServiceError> {
    let mut tx = center.store.begin().await?;
    let previous = dnsctl_store::get_zone(&mut tx, id).await?;
    dnsctl_store::delete_zone(&mut tx, id).await?;
    audit(&mut tx, "api", "zone.delete", "zone", id).await?;
    tx.commit().await?;

    if let Err(err) = deploy_after_commit(center).await {
        if let Ok(mut tx) = center.store.begin().await {
            let reinserted = dnsctl_store::insert_zone(
                &mut tx,
                NewZone {
                    name: previous.name.clone(),
                    zone_type: previous.zone_type.clone(),
                    email: previous.email.clone(),
                    refresh: previous.refresh,
                    retry: previous.retry,
                    expire: previous.expire,
                    minimum: previous.minimum,
                    masters: previous.masters.clone(),
                    forwarders: previous.forwarders.clone(),
                    created_by: previous.created_by.clone(),
                },
                Timestamp::now(),
            )
            .await;
            match reinserted {
                Ok(_) => {
                    let _ = tx.commit().await;
                }
                Err(e) => error!("failed to revert deletion of zone {id} after rejected deploy: {e}"),
            }
        }
        return Err(err);
    }

    center.update_tx.send(Update::Changed(Change::ZoneRemoved(id))).ok();
    emit(center, EventType::ZoneDeleted, json!({ "id": id }));
    Ok(())
}

pub async fn list_zones(center: &Arc<Center>) -> Result<Vec<ZoneView>, ServiceError> {
    let mut tx = center.store.begin().await?;
    let rows = dnsctl_store::list_zones(&mut tx, false, Page::default(), SortOrder::Asc).await?;
    tx.commit().await?;
    rows.into_iter()
        .map(|r| zone_model::row_to_view(r).map_err(ServiceError::from))
        .collect()
}

//----------- Records -----------------------------------------------------------

pub async fn create_record(center: &Arc<Center>, req: RecordCreate) -> Result<RecordView, ServiceError> {
    record_model::validate_record_create(&req)?;

    let mut tx = center.store.begin().await?;
    let existing = dnsctl_store::records_at_name(&mut tx, req.zone_id, &req.name).await?;
    record_model::validate_cname_exclusivity(req.record_type, &existing)?;

    let record_type_str = req.record_type.to_string();
    let row = dnsctl_store::insert_record(
        &mut tx,
        NewRecord {
            zone_id: req.zone_id,
            name: req.name.clone(),
            record_type: record_type_str,
            value: req.value.clone(),
            ttl: req.ttl as i64,
            priority: req.priority.map(|v| v as i64),
            weight: req.weight.map(|v| v as i64),
            port: req.port.map(|v| v as i64),
        },
    )
    .await?;

    audit(&mut tx, "api", "record.create", "record", row.id).await?;
    tx.commit().await?;

    if let Err(err) = deploy_after_commit(center).await {
        if let Ok(mut tx) = center.store.begin().await {
            if let Err(e) = dnsctl_store::delete_record(&mut tx, row.id).await {
                error!("failed to revert record {} after rejected deploy: {e}", row.id);
            } else {
                let _ = tx.commit().await;
            }
        }
        return Err(err);
    }

    let view = record_model::row_to_view(row);
    center
        .update_tx
        .send(Update::Changed(Change::RecordChanged(view.id)))
        .ok();
    emit(center, EventType::RecordCreated, json!({ "id": view.id }));
    Ok(view)
}

pub async fn update_record(center: &Arc<Center>, req: RecordUpdate) -> Result<(), ServiceError> {
    let mut tx = center.store.begin().await?;
    let previous = dnsctl_store::get_record(&mut tx, req.id).await?;
    dnsctl_store::update_record(
        &mut tx,
        req.id,
        req.version,
        req.value.as_deref(),
        req.ttl.map(|v| v as i64),
        req.is_active,
    )
    .await?;
    audit(&mut tx, "api", "record.update", "record", req.id).await?;
    tx.commit().await?;

    if let Err(err) = deploy_after_commit(center).await {
        if let Ok(mut tx) = center.store.begin().await {
            let reverted = dnsctl_store::update_record(
                &mut tx,
                req.id,
                req.version + 1,
                Some(&previous.value),
                Some(previous.ttl),
                Some(previous.is_active),
            )
            .await;
            match reverted {
                Ok(()) => {
                    let _ = tx.commit().await;
                }
                Err(e) => error!("failed to revert record {} after rejected deploy: {e}", req.id),
            }
        }
        return Err(err);
    }

    center
        .update_tx
        .send(Update::Changed(Change::RecordChanged(req.id)))
        .ok();
    emit(center, EventType::RecordUpdated, json!({ "id": req.id }));
    Ok(())
}

pub async fn delete_record(center: &Arc<Center>, id: i64) -> Result<(), ServiceError> {
    let mut tx = center.store.begin().await?;
    let previous = dnsctl_store::get_record(&mut tx, id).await?;
    dnsctl_store::delete_record(&mut tx, id).await?;
    audit(&mut tx, "api", "record.delete", "record", id).await?;
    tx.commit().await?;

    if let Err(err) = deploy_after_commit(center).await {
        if let Ok(mut tx) = center.store.begin().await {
            let reinserted = dnsctl_store::insert_record(
                &mut tx,
                NewRecord {
                    zone_id: previous.zone_id,
                    name: previous.name.clone(),
                    record_type: previous.record_type.clone(),
                    value: previous.value.clone(),
                    ttl: previous.ttl,
                    priority: previous.priority,
                    weight: previous.weight,
                    port: previous.port,
                },
            )
            .await;
            match reinserted {
                Ok(_) => {
                    let _ = tx.commit().await;
                }
                Err(e) => error!("failed to revert deletion of record {id} after rejected deploy: {e}"),
            }
        }
        return Err(err);
    }

    center
        .update_tx
        .send(Update::Changed(Change::RecordChanged(id)))
        .ok();
    emit(center, EventType::RecordDeleted, json!({ "id": id }));
    Ok(())
}

//----------- Forwarders --------------------------------------------------------

pub async fn create_forwarder(
    center: &Arc<Center>,
    req: ForwarderCreate,
) -> Result<ForwarderView, ServiceError> {
    forwarder_model::validate_forwarder_create(&req)?;

    let mut tx = center.store.begin().await?;
    let row = dnsctl_store::insert_forwarder(&mut tx, forwarder_model::new_row_fields(&req)).await?;
    audit(&mut tx, "api", "forwarder.create", "forwarder", row.id).await?;
    tx.commit().await?;

    if let Err(err) = deploy_after_commit(center).await {
        if let Ok(mut tx) = center.store.begin().await {
            if let Err(e) = dnsctl_store::delete_forwarder(&mut tx, row.id).await {
                error!("failed to revert forwarder {} after rejected deploy: {e}", row.id);
            } else {
                let _ = tx.commit().await;
            }
        }
        return Err(err);
    }

    let view = forwarder_model::row_to_view(row);
    center
        .update_tx
        .send(Update::Changed(Change::ForwarderAdded(view.id)))
        .ok();
    emit(center, EventType::ForwarderCreated, json!({ "id": view.id }));
    Ok(view)
}

pub async fn update_forwarder(center: &Arc<Center>, req: ForwarderUpdate) -> Result<(), ServiceError> {
    let servers_json = req.servers.as_ref().map(|s| forwarder_model::encode_servers(s));
    let policy_str = req.forward_policy.map(forwarder_model::forward_policy_str);
    let hc_json = req
        .health_check
        .as_ref()
        .map(|hc| forwarder_model::encode_health_check(hc));

    let mut tx = center.store.begin().await?;
    let previous = dnsctl_store::get_forwarder(&mut tx, req.id).await?;
    dnsctl_store::update_forwarder_config(
        &mut tx,
        req.id,
        req.version,
        servers_json.as_deref(),
        policy_str,
        hc_json.as_deref(),
        req.is_active,
    )
    .await?;
    audit(&mut tx, "api", "forwarder.update", "forwarder", req.id).await?;
    tx.commit().await?;

    if let Err(err) = deploy_after_commit(center).await {
        if let Ok(mut tx) = center.store.begin().await {
            let reverted = dnsctl_store::update_forwarder_config(
                &mut tx,
                req.id,
                req.version + 1,
                Some(&previous.servers_json),
                Some(&previous.forward_policy),
                Some(&previous.health_check_json),
                Some(previous.is_active),
            )
            .await;
            match reverted {
                Ok(()) => {
                    let _ = tx.commit().await;
                }
                Err(e) => error!("failed to revert forwarder {} after rejected deploy: {e}", req.id),
            }
        }
        return Err(err);
    }

    center
        .update_tx
        .send(Update::Changed(Change::ForwarderChanged(req.id)))
        .ok();
    emit(center, EventType::ForwarderUpdated, json!({ "id": req.id }));
    Ok(())
}

pub async fn delete_forwarder(center: &Arc<Center>, id: i64) -> Result<(), ServiceError> {
    let mut tx = center.store.begin().await?;
    let previous = dnsctl_store::get_forwarder(&mut tx, id).await?;
    dnsctl_store::delete_forwarder(&mut tx, id).await?;
    audit(&mut tx, "api", "forwarder.delete", "forwarder", id).await?;
    tx.commit().await?;

    if let Err(err) = deploy_after_commit(center).await {
        if let Ok(mut tx) = center.store.begin().await {
            let reinserted = dnsctl_store::insert_forwarder(
                &mut tx,
                NewForwarder {
                    name: previous.name.clone(),
                    domain: previous.domain.clone(),
                    additional_domains: previous.additional_domains.clone(),
                    forwarder_type: previous.forwarder_type.clone(),
                    servers_json: previous.servers_json.clone(),
                    forward_policy: previous.forward_policy.clone(),
                    health_check_json: previous.health_check_json.clone(),
                    priority: previous.priority,
                    weight: previous.weight,
                },
            )
            .await;
            match reinserted {
                Ok(_) => {
                    let _ = tx.commit().await;
                }
                Err(e) => error!("failed to revert deletion of forwarder {id} after rejected deploy: {e}"),
            }
        }
        return Err(err);
    }

    center
        .update_tx
        .send(Update::Changed(Change::ForwarderRemoved(id)))
        .ok();
    emit(center, EventType::ForwarderDeleted, json!({ "id": id }));
    Ok(())
}

pub async fn list_forwarders(center: &Arc<Center>) -> Result<Vec<ForwarderView>, ServiceError> {
    let mut tx = center.store.begin().await?;
    let rows = dnsctl_store::list_forwarders(&mut tx, false).await?;
    tx.commit().await?;
    Ok(rows.into_iter().map(forwarder_model::row_to_view).collect())
}

//----------- RPZ rules -----------------------------------------------------------

pub async fn create_rpz_rule(
    center: &Arc<Center>,
    req: RpzRuleCreate,
) -> Result<RpzRuleView, ServiceError> {
    rpz_model::validate_rpz_rule_create(&req)?;

    let mut tx = center.store.begin().await?;
    let row = dnsctl_store::insert_rpz_rule(&mut tx, rpz_model::new_row_fields(&req, "manual"), Timestamp::now())
        .await?;
    audit(&mut tx, "api", "rpz.create", "rpz_rule", row.id).await?;
    tx.commit().await?;

    if let Err(err) = deploy_after_commit(center).await {
        if let Ok(mut tx) = center.store.begin().await {
            if let Err(e) = dnsctl_store::delete_rpz_rule(&mut tx, row.id).await {
                error!("failed to revert rpz rule {} after rejected deploy: {e}", row.id);
            } else {
                let _ = tx.commit().await;
            }
        }
        return Err(err);
    }

    let view = rpz_model::row_to_view(row);
    center.update_tx.send(Update::Changed(Change::RpzRulesChanged)).ok();
    emit(center, EventType::RpzRuleCreated, json!({ "id": view.id }));
    Ok(view)
}

pub async fn delete_rpz_rule(center: &Arc<Center>, id: i64) -> Result<(), ServiceError> {
    let mut tx = center.store.begin().await?;
    let previous = dnsctl_store::get_rpz_rule(&mut tx, id).await?;
    dnsctl_store::delete_rpz_rule(&mut tx, id).await?;
    audit(&mut tx, "api", "rpz.delete", "rpz_rule", id).await?;
    tx.commit().await?;

    if let Err(err) = deploy_after_commit(center).await {
        if let Ok(mut tx) = center.store.begin().await {
            let reinserted = dnsctl_store::insert_rpz_rule(
                &mut tx,
                NewRpzRule {
                    domain: previous.domain.clone(),
                    rpz_zone: previous.rpz_zone.clone(),
                    action: previous.action.clone(),
                    redirect_target: previous.redirect_target.clone(),
                    category: previous.category.clone(),
                    source: previous.source.clone(),
                },
                Timestamp::now(),
            )
            .await;
            match reinserted {
                Ok(_) => {
                    let _ = tx.commit().await;
                }
                Err(e) => error!("failed to revert deletion of rpz rule {id} after rejected deploy: {e}"),
            }
        }
        return Err(err);
    }

    center.update_tx.send(Update::Changed(Change::RpzRulesChanged)).ok();
    emit(center, EventType::RpzRuleDeleted, json!({ "id": id }));
    Ok(())
}

pub async fn list_rpz_rules(center: &Arc<Center>) -> Result<Vec<RpzRuleView>, ServiceError> {
    let mut tx = center.store.begin().await?;
    let rows = dnsctl_store::list_active_rpz_rules(&mut tx).await?;
    tx.commit().await?;
    Ok(rows.into_iter().map(rpz_model::row_to_view).collect())
}

pub async fn update_rpz_rule(center: &Arc<Center>, req: RpzRuleUpdate) -> Result<(), ServiceError> {
    let action_str = req.action.map(rpz_model::action_str);
    let redirect_target = req.redirect_target.as_deref().map(Some);
    let mut tx = center.store.begin().await?;
    let previous = dnsctl_store::get_rpz_rule(&mut tx, req.id).await?;
    dnsctl_store::update_rpz_rule(&mut tx, req.id, action_str, redirect_target, req.is_active).await?;
    audit(&mut tx, "api", "rpz.update", "rpz_rule", req.id).await?;
    tx.commit().await?;

    if let Err(err) = deploy_after_commit(center).await {
        if let Ok(mut tx) = center.store.begin().await {
            let reverted = dnsctl_store::update_rpz_rule(
                &mut tx,
                req.id,
                Some(&previous.action),
                Some(previous.redirect_target.as_deref()),
                Some(previous.is_active),
            )
            .await;
            match reverted {
                Ok(()) => {
                    let _ = tx.commit().await;
                }
                Err(e) => error!("failed to revert rpz rule {} after rejected deploy: {e}", req.id),
            }
        }
        return Err(err);
    }

    center.update_tx.send(Update::Changed(Change::RpzRulesChanged)).ok();
    emit(center, EventType::RpzRuleUpdated, json!({ "id": req.id }));
    Ok(())
}

/// Apply a diff computed by the feed ingestor (C6): additions are inserted
/// under `source`, removals are dropped by `(rpz_zone, domain)` (spec. §4.4,
/// §4.6). Manual rules never appear in a feed's diff -- the ingestor already
/// filtered them out via [`rpz_model::manual_rule_outranks_feed`].
///
/// A feed's diff can be large, so on a rejected deploy this reverts the
/// whole batch rather than any one rule: the added rows are deleted and the
/// removed rows are re-added (losing their original id, acceptable for
/// feed-sourced rules which carry no identity of their own beyond
/// `(rpz_zone, domain)`).
pub async fn apply_rpz_diff(
    center: &Arc<Center>,
    source: &str,
    diff: RpzDiff,
) -> Result<u64, ServiceError> {
    if diff.add.is_empty() && diff.remove.is_empty() {
        return Ok(0);
    }

    let new_rules: Vec<NewRpzRule> = diff.add.iter().map(|r| rpz_model::new_row_fields(r, source)).collect();

    let mut tx = center.store.begin().await?;
    let mut removed_rows = Vec::with_capacity(diff.remove.len());
    for (rpz_zone, domain) in &diff.remove {
        if let Some(row) = dnsctl_store::list_active_rpz_rules(&mut tx)
            .await?
            .into_iter()
            .find(|r| &r.rpz_zone == rpz_zone && &r.domain == domain)
        {
            removed_rows.push(row);
        }
    }
    let inserted = dnsctl_store::bulk_insert_rpz_rules(&mut tx, &new_rules, Timestamp::now()).await?;
    for (rpz_zone, domain) in &diff.remove {
        dnsctl_store::delete_rpz_rule_by_domain(&mut tx, rpz_zone, domain).await?;
    }
    audit(&mut tx, "feed", "rpz.bulk_apply", "rpz_zone", source).await?;
    tx.commit().await?;

    if let Err(err) = deploy_after_commit(center).await {
        if let Ok(mut tx) = center.store.begin().await {
            let mut ok = true;
            for rule in &new_rules {
                if let Err(e) = dnsctl_store::delete_rpz_rule_by_domain(&mut tx, &rule.rpz_zone, &rule.domain).await {
                    error!("failed to revert added rpz rule {}/{}: {e}", rule.rpz_zone, rule.domain);
                    ok = false;
                }
            }
            let restored: Vec<NewRpzRule> = removed_rows
                .iter()
                .map(|row| NewRpzRule {
                    domain: row.domain.clone(),
                    rpz_zone: row.rpz_zone.clone(),
                    action: row.action.clone(),
                    redirect_target: row.redirect_target.clone(),
                    category: row.category.clone(),
                    source: row.source.clone(),
                })
                .collect();
            if let Err(e) = dnsctl_store::bulk_insert_rpz_rules(&mut tx, &restored, Timestamp::now()).await {
                error!("failed to restore removed rpz rules for {source}: {e}");
                ok = false;
            }
            if ok {
                let _ = tx.commit().await;
            }
        }
        return Err(err);
    }

    center.update_tx.send(Update::Changed(Change::RpzRulesChanged)).ok();
    emit(
        center,
        EventType::RpzRuleUpdated,
        json!({ "source": source, "added": inserted, "removed": diff.remove.len() }),
    );
    Ok(inserted)
}

//----------- Toggling and reloads ----------------------------------------------

pub async fn toggle_zone(center: &Arc<Center>, id: i64, version: i64, active: bool) -> Result<(), ServiceError> {
    let mut tx = center.store.begin().await?;
    let previous = dnsctl_store::get_zone(&mut tx, id).await?;
    dnsctl_store::set_zone_active(&mut tx, id, version, active).await?;
    audit(&mut tx, "api", "zone.toggle", "zone", id).await?;
    tx.commit().await?;

    if let Err(err) = deploy_after_commit(center).await {
        if let Ok(mut tx) = center.store.begin().await {
            let reverted = dnsctl_store::set_zone_active(&mut tx, id, version + 1, previous.is_active).await;
            match reverted {
                Ok(()) => {
                    let _ = tx.commit().await;
                }
                Err(e) => error!("failed to revert toggle of zone {id} after rejected deploy: {e}"),
            }
        }
        return Err(err);
    }

    center.update_tx.send(Update::Changed(Change::ZoneChanged(id))).ok();
    Ok(())
}

pub async fn toggle_forwarder(
    center: &Arc<Center>,
    id: i64,
    version: i64,
    active: bool,
) -> Result<(), ServiceError> {
    let mut tx = center.store.begin().await?;
    let previous = dnsctl_store::get_forwarder(&mut tx, id).await?;
    dnsctl_store::update_forwarder_config(&mut tx, id, version, None, None, None, Some(active)).await?;
    audit(&mut tx, "api", "forwarder.toggle", "forwarder", id).await?;
    tx.commit().await?;

    if let Err(err) = deploy_after_commit(center).await {
        if let Ok(mut tx) = center.store.begin().await {
            let reverted =
                dnsctl_store::update_forwarder_config(&mut tx, id, version + 1, None, None, None, Some(previous.is_active))
                    .await;
            match reverted {
                Ok(()) => {
                    let _ = tx.commit().await;
                }
                Err(e) => error!("failed to revert toggle of forwarder {id} after rejected deploy: {e}"),
            }
        }
        return Err(err);
    }

    center
        .update_tx
        .send(Update::Changed(Change::ForwarderChanged(id)))
        .ok();
    Ok(())
}

/// Force an immediate full deploy, bypassing the usual coalescing window
/// (spec. §4.3's manual "reload now" operation).
pub fn reload_all(center: &Arc<Center>) {
    center.request_deploy(crate::center::DeployReason::Manual);
}

/// Re-derive BIND's configuration from the store on startup, before the
/// first change-triggered deploy would otherwise happen (spec. §4.9: the
/// store is the source of truth, so a restart must re-assert it even if
/// BIND's on-disk state drifted while dnsctld was down).
pub async fn reconcile_on_startup(center: &Arc<Center>) {
    center.request_deploy(crate::center::DeployReason::Startup);
}
