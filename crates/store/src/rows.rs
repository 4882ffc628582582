//! Row types and CRUD queries for each entity in the data model.

use std::net::IpAddr;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use sqlx::Row;

use crate::{parse_opt_timestamp, parse_timestamp, Page, SortOrder, StoreError, Tx};

//----------- Zone ----------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneRow {
    pub id: i64,
    pub name: String,
    pub zone_type: String,
    pub email: String,
    pub serial: i64,
    pub refresh: i64,
    pub retry: i64,
    pub expire: i64,
    pub minimum: i64,
    pub is_active: bool,
    pub masters: Vec<IpAddr>,
    pub forwarders: Vec<IpAddr>,
    pub version: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub created_by: String,
}

fn zone_from_row(row: &sqlx::any::AnyRow) -> Result<ZoneRow, StoreError> {
    let masters_json: String = row.try_get("masters")?;
    let forwarders_json: String = row.try_get("forwarders")?;
    Ok(ZoneRow {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        zone_type: row.try_get("zone_type")?,
        email: row.try_get("email")?,
        serial: row.try_get("serial")?,
        refresh: row.try_get("refresh")?,
        retry: row.try_get("retry")?,
        expire: row.try_get("expire")?,
        minimum: row.try_get("minimum")?,
        is_active: row.try_get::<i64, _>("is_active")? != 0,
        masters: serde_json::from_str(&masters_json)
            .map_err(|e| StoreError::Database(e.to_string()))?,
        forwarders: serde_json::from_str(&forwarders_json)
            .map_err(|e| StoreError::Database(e.to_string()))?,
        version: row.try_get("version")?,
        created_at: parse_timestamp(row, "created_at")?,
        updated_at: parse_timestamp(row, "updated_at")?,
        created_by: row.try_get("created_by")?,
    })
}

pub struct NewZone {
    pub name: String,
    pub zone_type: String,
    pub email: String,
    pub refresh: i64,
    pub retry: i64,
    pub expire: i64,
    pub minimum: i64,
    pub masters: Vec<IpAddr>,
    pub forwarders: Vec<IpAddr>,
    pub created_by: String,
}

pub async fn insert_zone(tx: &mut Tx<'_>, z: NewZone, now: Timestamp) -> Result<ZoneRow, StoreError> {
    let masters = serde_json::to_string(&z.masters).unwrap();
    let forwarders = serde_json::to_string(&z.forwarders).unwrap();
    let row = sqlx::query(
        "INSERT INTO zones
            (name, zone_type, email, serial, refresh, retry, expire, minimum,
             is_active, masters, forwarders, version, created_at, updated_at, created_by)
         VALUES (?, ?, ?, 0, ?, ?, ?, ?, 1, ?, ?, 0, ?, ?, ?)
         RETURNING *",
    )
    .bind(&z.name)
    .bind(&z.zone_type)
    .bind(&z.email)
    .bind(z.refresh)
    .bind(z.retry)
    .bind(z.expire)
    .bind(z.minimum)
    .bind(masters)
    .bind(forwarders)
    .bind(now.to_string())
    .bind(now.to_string())
    .bind(&z.created_by)
    .fetch_one(tx.conn().as_mut())
    .await?;
    zone_from_row(&row)
}

pub async fn get_zone(tx: &mut Tx<'_>, id: i64) -> Result<ZoneRow, StoreError> {
    let row = sqlx::query("SELECT * FROM zones WHERE id = ?")
        .bind(id)
        .fetch_optional(tx.conn().as_mut())
        .await?
        .ok_or(StoreError::NotFound)?;
    zone_from_row(&row)
}

pub async fn get_zone_by_name(tx: &mut Tx<'_>, name: &str) -> Result<Option<ZoneRow>, StoreError> {
    let row = sqlx::query("SELECT * FROM zones WHERE name = ?")
        .bind(name)
        .fetch_optional(tx.conn().as_mut())
        .await?;
    row.as_ref().map(zone_from_row).transpose()
}

pub async fn list_zones(
    tx: &mut Tx<'_>,
    active_only: bool,
    page: Page,
    sort: SortOrder,
) -> Result<Vec<ZoneRow>, StoreError> {
    let order = match sort {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    };
    let sql = if active_only {
        format!("SELECT * FROM zones WHERE is_active = 1 ORDER BY name {order} LIMIT ? OFFSET ?")
    } else {
        format!("SELECT * FROM zones ORDER BY name {order} LIMIT ? OFFSET ?")
    };
    let rows = sqlx::query(&sql)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(tx.conn().as_mut())
        .await?;
    rows.iter().map(zone_from_row).collect()
}

/// Bump `serial` and `updated_at`, checking the optimistic `version`.
pub async fn update_zone_rendered(
    tx: &mut Tx<'_>,
    id: i64,
    expected_version: i64,
    new_serial: u32,
    now: Timestamp,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        "UPDATE zones SET serial = ?, updated_at = ?, version = version + 1
         WHERE id = ? AND version = ?",
    )
    .bind(new_serial as i64)
    .bind(now.to_string())
    .bind(id)
    .bind(expected_version)
    .execute(tx.conn().as_mut())
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::Conflict);
    }
    Ok(())
}

/// Update zone metadata (everything but serial/active, which have their own
/// dedicated statements). Checks the optimistic `version`.
#[allow(clippy::too_many_arguments)]
pub async fn update_zone_metadata(
    tx: &mut Tx<'_>,
    id: i64,
    expected_version: i64,
    email: &str,
    refresh: i64,
    retry: i64,
    expire: i64,
    minimum: i64,
    masters: &[IpAddr],
    forwarders: &[IpAddr],
    now: Timestamp,
) -> Result<(), StoreError> {
    let masters_json = serde_json::to_string(masters).unwrap();
    let forwarders_json = serde_json::to_string(forwarders).unwrap();
    let result = sqlx::query(
        "UPDATE zones SET email = ?, refresh = ?, retry = ?, expire = ?, minimum = ?,
         masters = ?, forwarders = ?, updated_at = ?, version = version + 1
         WHERE id = ? AND version = ?",
    )
    .bind(email)
    .bind(refresh)
    .bind(retry)
    .bind(expire)
    .bind(minimum)
    .bind(masters_json)
    .bind(forwarders_json)
    .bind(now.to_string())
    .bind(id)
    .bind(expected_version)
    .execute(tx.conn().as_mut())
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::Conflict);
    }
    Ok(())
}

pub async fn set_zone_active(
    tx: &mut Tx<'_>,
    id: i64,
    expected_version: i64,
    active: bool,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        "UPDATE zones SET is_active = ?, version = version + 1 WHERE id = ? AND version = ?",
    )
    .bind(active as i64)
    .bind(id)
    .bind(expected_version)
    .execute(tx.conn().as_mut())
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::Conflict);
    }
    Ok(())
}

pub async fn delete_zone(tx: &mut Tx<'_>, id: i64) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM records WHERE zone_id = ?")
        .bind(id)
        .execute(tx.conn().as_mut())
        .await?;
    let result = sqlx::query("DELETE FROM zones WHERE id = ?")
        .bind(id)
        .execute(tx.conn().as_mut())
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

//----------- Record --------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordRow {
    pub id: i64,
    pub zone_id: i64,
    pub name: String,
    pub record_type: String,
    pub value: String,
    pub ttl: i64,
    pub priority: Option<i64>,
    pub weight: Option<i64>,
    pub port: Option<i64>,
    pub is_active: bool,
    pub version: i64,
}

fn record_from_row(row: &sqlx::any::AnyRow) -> Result<RecordRow, StoreError> {
    Ok(RecordRow {
        id: row.try_get("id")?,
        zone_id: row.try_get("zone_id")?,
        name: row.try_get("name")?,
        record_type: row.try_get("record_type")?,
        value: row.try_get("value")?,
        ttl: row.try_get("ttl")?,
        priority: row.try_get("priority")?,
        weight: row.try_get("weight")?,
        port: row.try_get("port")?,
        is_active: row.try_get::<i64, _>("is_active")? != 0,
        version: row.try_get("version")?,
    })
}

pub struct NewRecord {
    pub zone_id: i64,
    pub name: String,
    pub record_type: String,
    pub value: String,
    pub ttl: i64,
    pub priority: Option<i64>,
    pub weight: Option<i64>,
    pub port: Option<i64>,
}

pub async fn get_record(tx: &mut Tx<'_>, id: i64) -> Result<RecordRow, StoreError> {
    let row = sqlx::query("SELECT * FROM records WHERE id = ?")
        .bind(id)
        .fetch_optional(tx.conn().as_mut())
        .await?
        .ok_or(StoreError::NotFound)?;
    record_from_row(&row)
}

pub async fn insert_record(tx: &mut Tx<'_>, r: NewRecord) -> Result<RecordRow, StoreError> {
    let row = sqlx::query(
        "INSERT INTO records (zone_id, name, record_type, value, ttl, priority, weight, port, is_active, version)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, 0)
         RETURNING *",
    )
    .bind(r.zone_id)
    .bind(&r.name)
    .bind(&r.record_type)
    .bind(&r.value)
    .bind(r.ttl)
    .bind(r.priority)
    .bind(r.weight)
    .bind(r.port)
    .fetch_one(tx.conn().as_mut())
    .await?;
    record_from_row(&row)
}

pub async fn records_at_name(
    tx: &mut Tx<'_>,
    zone_id: i64,
    name: &str,
) -> Result<Vec<RecordRow>, StoreError> {
    let rows = sqlx::query("SELECT * FROM records WHERE zone_id = ? AND name = ? AND is_active = 1")
        .bind(zone_id)
        .bind(name)
        .fetch_all(tx.conn().as_mut())
        .await?;
    rows.iter().map(record_from_row).collect()
}

pub async fn list_records(tx: &mut Tx<'_>, zone_id: i64, page: Page) -> Result<Vec<RecordRow>, StoreError> {
    let rows = sqlx::query(
        "SELECT * FROM records WHERE zone_id = ? ORDER BY name ASC LIMIT ? OFFSET ?",
    )
    .bind(zone_id)
    .bind(page.limit)
    .bind(page.offset)
    .fetch_all(tx.conn().as_mut())
    .await?;
    rows.iter().map(record_from_row).collect()
}

pub async fn update_record(
    tx: &mut Tx<'_>,
    id: i64,
    expected_version: i64,
    value: Option<&str>,
    ttl: Option<i64>,
    is_active: Option<bool>,
) -> Result<(), StoreError> {
    let current = sqlx::query("SELECT * FROM records WHERE id = ?")
        .bind(id)
        .fetch_optional(tx.conn().as_mut())
        .await?
        .ok_or(StoreError::NotFound)?;
    let current = record_from_row(&current)?;

    let new_value = value.unwrap_or(&current.value);
    let new_ttl = ttl.unwrap_or(current.ttl);
    let new_active = is_active.unwrap_or(current.is_active);

    let result = sqlx::query(
        "UPDATE records SET value = ?, ttl = ?, is_active = ?, version = version + 1
         WHERE id = ? AND version = ?",
    )
    .bind(new_value)
    .bind(new_ttl)
    .bind(new_active as i64)
    .bind(id)
    .bind(expected_version)
    .execute(tx.conn().as_mut())
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::Conflict);
    }
    Ok(())
}

pub async fn delete_record(tx: &mut Tx<'_>, id: i64) -> Result<(), StoreError> {
    let result = sqlx::query("DELETE FROM records WHERE id = ?")
        .bind(id)
        .execute(tx.conn().as_mut())
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

//----------- Forwarder ------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwarderRow {
    pub id: i64,
    pub name: String,
    pub domain: String,
    pub additional_domains: Vec<String>,
    pub forwarder_type: String,
    pub servers_json: String,
    pub forward_policy: String,
    pub health_check_json: String,
    pub priority: i64,
    pub weight: i64,
    pub is_active: bool,
    pub health_status: String,
    pub last_checked_at: Option<Timestamp>,
    /// Status the health unit is gating towards but hasn't confirmed for
    /// `K` consecutive cycles yet; `None` once `health_status` catches up.
    pub candidate_status: Option<String>,
    /// How many consecutive cycles `candidate_status` has held.
    pub candidate_count: i64,
    pub version: i64,
}

fn forwarder_from_row(row: &sqlx::any::AnyRow) -> Result<ForwarderRow, StoreError> {
    let additional_json: String = row.try_get("additional_domains")?;
    Ok(ForwarderRow {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        domain: row.try_get("domain")?,
        additional_domains: serde_json::from_str(&additional_json)
            .map_err(|e| StoreError::Database(e.to_string()))?,
        forwarder_type: row.try_get("forwarder_type")?,
        servers_json: row.try_get("servers")?,
        forward_policy: row.try_get("forward_policy")?,
        health_check_json: row.try_get("health_check")?,
        priority: row.try_get("priority")?,
        weight: row.try_get("weight")?,
        is_active: row.try_get::<i64, _>("is_active")? != 0,
        health_status: row.try_get("health_status")?,
        last_checked_at: parse_opt_timestamp(row, "last_checked_at")?,
        candidate_status: row.try_get("candidate_status")?,
        candidate_count: row.try_get("candidate_count")?,
        version: row.try_get("version")?,
    })
}

pub struct NewForwarder {
    pub name: String,
    pub domain: String,
    pub additional_domains: Vec<String>,
    pub forwarder_type: String,
    pub servers_json: String,
    pub forward_policy: String,
    pub health_check_json: String,
    pub priority: i64,
    pub weight: i64,
}

pub async fn insert_forwarder(tx: &mut Tx<'_>, f: NewForwarder) -> Result<ForwarderRow, StoreError> {
    let additional = serde_json::to_string(&f.additional_domains).unwrap();
    let row = sqlx::query(
        "INSERT INTO forwarders
            (name, domain, additional_domains, forwarder_type, servers, forward_policy,
             health_check, priority, weight, is_active, health_status, version)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1, 'unknown', 0)
         RETURNING *",
    )
    .bind(&f.name)
    .bind(&f.domain)
    .bind(additional)
    .bind(&f.forwarder_type)
    .bind(&f.servers_json)
    .bind(&f.forward_policy)
    .bind(&f.health_check_json)
    .bind(f.priority)
    .bind(f.weight)
    .fetch_one(tx.conn().as_mut())
    .await?;
    forwarder_from_row(&row)
}

pub async fn list_forwarders(tx: &mut Tx<'_>, active_only: bool) -> Result<Vec<ForwarderRow>, StoreError> {
    let sql = if active_only {
        "SELECT * FROM forwarders WHERE is_active = 1 ORDER BY name ASC"
    } else {
        "SELECT * FROM forwarders ORDER BY name ASC"
    };
    let rows = sqlx::query(sql).fetch_all(tx.conn().as_mut()).await?;
    rows.iter().map(forwarder_from_row).collect()
}

pub async fn get_forwarder(tx: &mut Tx<'_>, id: i64) -> Result<ForwarderRow, StoreError> {
    let row = sqlx::query("SELECT * FROM forwarders WHERE id = ?")
        .bind(id)
        .fetch_optional(tx.conn().as_mut())
        .await?
        .ok_or(StoreError::NotFound)?;
    forwarder_from_row(&row)
}

pub async fn update_forwarder_config(
    tx: &mut Tx<'_>,
    id: i64,
    expected_version: i64,
    servers_json: Option<&str>,
    forward_policy: Option<&str>,
    health_check_json: Option<&str>,
    is_active: Option<bool>,
) -> Result<(), StoreError> {
    let current = get_forwarder(tx, id).await?;
    let servers = servers_json.unwrap_or(&current.servers_json);
    let policy = forward_policy.unwrap_or(&current.forward_policy);
    let hc = health_check_json.unwrap_or(&current.health_check_json);
    let active = is_active.unwrap_or(current.is_active);

    let result = sqlx::query(
        "UPDATE forwarders SET servers = ?, forward_policy = ?, health_check = ?,
         is_active = ?, version = version + 1 WHERE id = ? AND version = ?",
    )
    .bind(servers)
    .bind(policy)
    .bind(hc)
    .bind(active as i64)
    .bind(id)
    .bind(expected_version)
    .execute(tx.conn().as_mut())
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::Conflict);
    }
    Ok(())
}

/// Update the health status and the K-consecutive-cycle gating state.
/// Exclusive to C5 (spec. §3 ownership rules).
pub async fn update_forwarder_health(
    tx: &mut Tx<'_>,
    id: i64,
    status: &str,
    candidate_status: Option<&str>,
    candidate_count: i64,
    now: Timestamp,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        "UPDATE forwarders SET health_status = ?, candidate_status = ?, candidate_count = ?,
         last_checked_at = ? WHERE id = ?",
    )
    .bind(status)
    .bind(candidate_status)
    .bind(candidate_count)
    .bind(now.to_string())
    .bind(id)
    .execute(tx.conn().as_mut())
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

pub async fn delete_forwarder(tx: &mut Tx<'_>, id: i64) -> Result<(), StoreError> {
    let result = sqlx::query("DELETE FROM forwarders WHERE id = ?")
        .bind(id)
        .execute(tx.conn().as_mut())
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

//----------- ForwarderHealthSample -------------------------------------------------

pub async fn insert_health_sample(
    tx: &mut Tx<'_>,
    forwarder_id: i64,
    server_ip: &str,
    ts: Timestamp,
    ok: bool,
    response_ms: Option<i64>,
    error: Option<&str>,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO forwarder_health_samples (forwarder_id, server_ip, ts, ok, response_ms, error)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(forwarder_id)
    .bind(server_ip)
    .bind(ts.to_string())
    .bind(ok as i64)
    .bind(response_ms)
    .bind(error)
    .execute(tx.conn().as_mut())
    .await?;
    Ok(())
}

/// Windowed aggregation: failure rate and average response time over the
/// last `n` samples for a forwarder, across all of its servers.
pub struct HealthAggregate {
    pub samples: i64,
    pub failures: i64,
    pub avg_response_ms: Option<f64>,
}

pub async fn aggregate_recent_health(
    tx: &mut Tx<'_>,
    forwarder_id: i64,
    n: i64,
) -> Result<HealthAggregate, StoreError> {
    let row = sqlx::query(
        "SELECT
            COUNT(*) AS samples,
            SUM(CASE WHEN ok = 0 THEN 1 ELSE 0 END) AS failures,
            AVG(response_ms) AS avg_response_ms
         FROM (
            SELECT ok, response_ms FROM forwarder_health_samples
            WHERE forwarder_id = ? ORDER BY ts DESC LIMIT ?
         ) recent",
    )
    .bind(forwarder_id)
    .bind(n)
    .fetch_one(tx.conn().as_mut())
    .await?;
    Ok(HealthAggregate {
        samples: row.try_get::<Option<i64>, _>("samples")?.unwrap_or(0),
        failures: row.try_get::<Option<i64>, _>("failures")?.unwrap_or(0),
        avg_response_ms: row.try_get("avg_response_ms")?,
    })
}

/// Downsample/prune samples older than `before`, per spec. §4.5's "older
/// samples are downsampled via periodic compaction". Keeps one sample per
/// hour beyond the cutoff rather than every probe result.
pub async fn compact_health_samples(tx: &mut Tx<'_>, before: Timestamp) -> Result<u64, StoreError> {
    let result = sqlx::query(
        "DELETE FROM forwarder_health_samples
         WHERE ts < ? AND id NOT IN (
            SELECT MIN(id) FROM forwarder_health_samples
            WHERE ts < ?
            GROUP BY forwarder_id, server_ip, substr(ts, 1, 13)
         )",
    )
    .bind(before.to_string())
    .bind(before.to_string())
    .execute(tx.conn().as_mut())
    .await?;
    Ok(result.rows_affected())
}

//----------- RpzRule ---------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpzRuleRow {
    pub id: i64,
    pub domain: String,
    pub rpz_zone: String,
    pub action: String,
    pub redirect_target: Option<String>,
    pub category: String,
    pub source: String,
    pub is_active: bool,
    pub created_at: Timestamp,
}

fn rpz_rule_from_row(row: &sqlx::any::AnyRow) -> Result<RpzRuleRow, StoreError> {
    Ok(RpzRuleRow {
        id: row.try_get("id")?,
        domain: row.try_get("domain")?,
        rpz_zone: row.try_get("rpz_zone")?,
        action: row.try_get("action")?,
        redirect_target: row.try_get("redirect_target")?,
        category: row.try_get("category")?,
        source: row.try_get("source")?,
        is_active: row.try_get::<i64, _>("is_active")? != 0,
        created_at: parse_timestamp(row, "created_at")?,
    })
}

pub struct NewRpzRule {
    pub domain: String,
    pub rpz_zone: String,
    pub action: String,
    pub redirect_target: Option<String>,
    pub category: String,
    pub source: String,
}

pub async fn insert_rpz_rule(
    tx: &mut Tx<'_>,
    r: NewRpzRule,
    now: Timestamp,
) -> Result<RpzRuleRow, StoreError> {
    let row = sqlx::query(
        "INSERT INTO rpz_rules (domain, rpz_zone, action, redirect_target, category, source, is_active, created_at)
         VALUES (?, ?, ?, ?, ?, ?, 1, ?)
         RETURNING *",
    )
    .bind(&r.domain)
    .bind(&r.rpz_zone)
    .bind(&r.action)
    .bind(&r.redirect_target)
    .bind(&r.category)
    .bind(&r.source)
    .bind(now.to_string())
    .fetch_one(tx.conn().as_mut())
    .await?;
    rpz_rule_from_row(&row)
}

pub async fn list_active_rpz_rules(tx: &mut Tx<'_>) -> Result<Vec<RpzRuleRow>, StoreError> {
    let rows = sqlx::query("SELECT * FROM rpz_rules WHERE is_active = 1 ORDER BY rpz_zone, domain")
        .fetch_all(tx.conn().as_mut())
        .await?;
    rows.iter().map(rpz_rule_from_row).collect()
}

pub async fn list_rpz_rules_by_source(
    tx: &mut Tx<'_>,
    source: &str,
) -> Result<Vec<RpzRuleRow>, StoreError> {
    let rows = sqlx::query("SELECT * FROM rpz_rules WHERE source = ? AND is_active = 1")
        .bind(source)
        .fetch_all(tx.conn().as_mut())
        .await?;
    rows.iter().map(rpz_rule_from_row).collect()
}

pub async fn get_rpz_rule(tx: &mut Tx<'_>, id: i64) -> Result<RpzRuleRow, StoreError> {
    let row = sqlx::query("SELECT * FROM rpz_rules WHERE id = ?")
        .bind(id)
        .fetch_optional(tx.conn().as_mut())
        .await?
        .ok_or(StoreError::NotFound)?;
    rpz_rule_from_row(&row)
}

pub async fn update_rpz_rule(
    tx: &mut Tx<'_>,
    id: i64,
    action: Option<&str>,
    redirect_target: Option<Option<&str>>,
    is_active: Option<bool>,
) -> Result<(), StoreError> {
    let row = sqlx::query("SELECT * FROM rpz_rules WHERE id = ?")
        .bind(id)
        .fetch_optional(tx.conn().as_mut())
        .await?
        .ok_or(StoreError::NotFound)?;
    let current = rpz_rule_from_row(&row)?;

    let new_action = action.unwrap_or(&current.action);
    let new_redirect = redirect_target
        .map(|t| t.map(|s| s.to_string()))
        .unwrap_or(current.redirect_target);
    let new_active = is_active.unwrap_or(current.is_active);

    let result = sqlx::query(
        "UPDATE rpz_rules SET action = ?, redirect_target = ?, is_active = ? WHERE id = ?",
    )
    .bind(new_action)
    .bind(new_redirect)
    .bind(new_active as i64)
    .bind(id)
    .execute(tx.conn().as_mut())
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

pub async fn delete_rpz_rule(tx: &mut Tx<'_>, id: i64) -> Result<(), StoreError> {
    let result = sqlx::query("DELETE FROM rpz_rules WHERE id = ?")
        .bind(id)
        .execute(tx.conn().as_mut())
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

pub async fn delete_rpz_rule_by_domain(
    tx: &mut Tx<'_>,
    rpz_zone: &str,
    domain: &str,
) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM rpz_rules WHERE rpz_zone = ? AND domain = ?")
        .bind(rpz_zone)
        .bind(domain)
        .execute(tx.conn().as_mut())
        .await?;
    Ok(())
}

/// Bulk-insert RPZ rules, targeting the ≥10k rows/s throughput named in
/// spec. §4.1, by batching into one multi-row `INSERT` per call rather than
/// one round-trip per row. Rows that collide on `(rpz_zone, domain)` are
/// skipped (`P5`: pre-existing rows keep their original `source`).
pub async fn bulk_insert_rpz_rules(
    tx: &mut Tx<'_>,
    rules: &[NewRpzRule],
    now: Timestamp,
) -> Result<u64, StoreError> {
    const BATCH: usize = 500;
    let mut inserted = 0u64;
    for chunk in rules.chunks(BATCH) {
        if chunk.is_empty() {
            continue;
        }
        let mut sql = String::from(
            "INSERT INTO rpz_rules (domain, rpz_zone, action, redirect_target, category, source, is_active, created_at) VALUES ",
        );
        let placeholders: Vec<&str> = chunk.iter().map(|_| "(?, ?, ?, ?, ?, ?, 1, ?)").collect();
        sql.push_str(&placeholders.join(", "));
        sql.push_str(" ON CONFLICT (rpz_zone, domain) DO NOTHING");

        let mut query = sqlx::query(&sql);
        for r in chunk {
            query = query
                .bind(&r.domain)
                .bind(&r.rpz_zone)
                .bind(&r.action)
                .bind(&r.redirect_target)
                .bind(&r.category)
                .bind(&r.source)
                .bind(now.to_string());
        }
        let result = query.execute(tx.conn().as_mut()).await?;
        inserted += result.rows_affected();
    }
    Ok(inserted)
}

//----------- ThreatFeed ------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatFeedRow {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub format: String,
    pub category: String,
    pub rpz_zone: String,
    pub update_frequency_s: i64,
    pub enabled: bool,
    pub last_status: String,
    pub last_attempt_at: Option<Timestamp>,
    pub last_success_at: Option<Timestamp>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub rule_count: i64,
    /// Consecutive failed attempts since the last success; drives the
    /// exponential backoff applied to due-ness checks.
    pub consecutive_errors: i64,
    pub version: i64,
}

fn feed_from_row(row: &sqlx::any::AnyRow) -> Result<ThreatFeedRow, StoreError> {
    Ok(ThreatFeedRow {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        url: row.try_get("url")?,
        format: row.try_get("format")?,
        category: row.try_get("category")?,
        rpz_zone: row.try_get("rpz_zone")?,
        update_frequency_s: row.try_get("update_frequency_s")?,
        enabled: row.try_get::<i64, _>("enabled")? != 0,
        last_status: row.try_get("last_status")?,
        last_attempt_at: parse_opt_timestamp(row, "last_attempt_at")?,
        last_success_at: parse_opt_timestamp(row, "last_success_at")?,
        etag: row.try_get("etag")?,
        last_modified: row.try_get("last_modified")?,
        rule_count: row.try_get("rule_count")?,
        consecutive_errors: row.try_get("consecutive_errors")?,
        version: row.try_get("version")?,
    })
}

pub async fn list_feeds(tx: &mut Tx<'_>, enabled_only: bool) -> Result<Vec<ThreatFeedRow>, StoreError> {
    let sql = if enabled_only {
        "SELECT * FROM threat_feeds WHERE enabled = 1"
    } else {
        "SELECT * FROM threat_feeds"
    };
    let rows = sqlx::query(sql).fetch_all(tx.conn().as_mut()).await?;
    rows.iter().map(feed_from_row).collect()
}

pub async fn get_feed(tx: &mut Tx<'_>, id: i64) -> Result<ThreatFeedRow, StoreError> {
    let row = sqlx::query("SELECT * FROM threat_feeds WHERE id = ?")
        .bind(id)
        .fetch_optional(tx.conn().as_mut())
        .await?
        .ok_or(StoreError::NotFound)?;
    feed_from_row(&row)
}

#[allow(clippy::too_many_arguments)]
pub async fn record_feed_attempt(
    tx: &mut Tx<'_>,
    id: i64,
    status: &str,
    success: bool,
    etag: Option<&str>,
    last_modified: Option<&str>,
    rule_count: Option<i64>,
    now: Timestamp,
) -> Result<(), StoreError> {
    if success {
        sqlx::query(
            "UPDATE threat_feeds SET last_status = ?, last_attempt_at = ?, last_success_at = ?,
             etag = COALESCE(?, etag), last_modified = COALESCE(?, last_modified),
             rule_count = COALESCE(?, rule_count), consecutive_errors = 0, version = version + 1
             WHERE id = ?",
        )
        .bind(status)
        .bind(now.to_string())
        .bind(now.to_string())
        .bind(etag)
        .bind(last_modified)
        .bind(rule_count)
        .bind(id)
        .execute(tx.conn().as_mut())
        .await?;
    } else {
        sqlx::query(
            "UPDATE threat_feeds SET last_status = ?, last_attempt_at = ?,
             consecutive_errors = consecutive_errors + 1, version = version + 1
             WHERE id = ?",
        )
        .bind(status)
        .bind(now.to_string())
        .bind(id)
        .execute(tx.conn().as_mut())
        .await?;
    }
    Ok(())
}

//----------- AuditEntry -------------------------------------------------------------

pub struct NewAuditEntry {
    pub actor: String,
    pub action: String,
    pub target_kind: String,
    pub target_id: String,
    pub before_hash: Option<String>,
    pub after_hash: Option<String>,
    pub success: bool,
    pub note: Option<String>,
}

pub async fn append_audit_entry(
    tx: &mut Tx<'_>,
    e: NewAuditEntry,
    now: Timestamp,
) -> Result<i64, StoreError> {
    let row = sqlx::query(
        "INSERT INTO audit_entries (ts, actor, action, target_kind, target_id, before_hash, after_hash, success, note)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
         RETURNING id",
    )
    .bind(now.to_string())
    .bind(&e.actor)
    .bind(&e.action)
    .bind(&e.target_kind)
    .bind(&e.target_id)
    .bind(&e.before_hash)
    .bind(&e.after_hash)
    .bind(e.success as i64)
    .bind(&e.note)
    .fetch_one(tx.conn().as_mut())
    .await?;
    Ok(row.try_get("id")?)
}

//----------- ConfigSnapshot ---------------------------------------------------------

pub async fn record_snapshot(
    tx: &mut Tx<'_>,
    content_hash: &str,
    source_action: &str,
    path: &str,
    now: Timestamp,
) -> Result<i64, StoreError> {
    let row = sqlx::query(
        "INSERT INTO config_snapshots (content_hash, ts, source_action, path) VALUES (?, ?, ?, ?)
         RETURNING id",
    )
    .bind(content_hash)
    .bind(now.to_string())
    .bind(source_action)
    .bind(path)
    .fetch_one(tx.conn().as_mut())
    .await?;
    Ok(row.try_get("id")?)
}

pub struct SnapshotRow {
    pub id: i64,
    pub content_hash: String,
    pub ts: Timestamp,
    pub source_action: String,
    pub path: String,
}

pub async fn list_snapshots(tx: &mut Tx<'_>) -> Result<Vec<SnapshotRow>, StoreError> {
    let rows = sqlx::query("SELECT * FROM config_snapshots ORDER BY ts DESC")
        .fetch_all(tx.conn().as_mut())
        .await?;
    rows.iter()
        .map(|row| {
            Ok(SnapshotRow {
                id: row.try_get("id")?,
                content_hash: row.try_get("content_hash")?,
                ts: parse_timestamp(row, "ts")?,
                source_action: row.try_get("source_action")?,
                path: row.try_get("path")?,
            })
        })
        .collect()
}

/// Prune all but the most recent `keep` snapshots (spec. §3: "retained N,
/// default 20, most recent"). Returns the pruned rows so the caller can
/// remove their on-disk directories too.
pub async fn prune_snapshots(tx: &mut Tx<'_>, keep: i64) -> Result<Vec<SnapshotRow>, StoreError> {
    let all = list_snapshots(tx).await?;
    let stale: Vec<_> = all.into_iter().skip(keep.max(0) as usize).collect();
    for s in &stale {
        sqlx::query("DELETE FROM config_snapshots WHERE id = ?")
            .bind(s.id)
            .execute(tx.conn().as_mut())
            .await?;
    }
    Ok(stale)
}
