//! RPZ rule invariants (spec. §3: RPZRule, §4.4).

use dnsctl_api::{RpzAction, RpzRuleCreate, RpzRuleView, RuleSource};
use dnsctl_store::{NewRpzRule, RpzRuleRow};

use super::zone::ModelError;

pub fn validate_rpz_rule_create(req: &RpzRuleCreate) -> Result<(), ModelError> {
    match req.action {
        RpzAction::Redirect if req.redirect_target.is_none() => {
            Err(ModelError::RedirectTargetRequired)
        }
        RpzAction::Block | RpzAction::Passthru if req.redirect_target.is_some() => {
            Err(ModelError::RedirectTargetForbidden)
        }
        _ => Ok(()),
    }
}

pub fn action_str(action: RpzAction) -> &'static str {
    match action {
        RpzAction::Block => "block",
        RpzAction::Redirect => "redirect",
        RpzAction::Passthru => "passthru",
    }
}

fn action_from_str(s: &str) -> RpzAction {
    match s {
        "redirect" => RpzAction::Redirect,
        "passthru" => RpzAction::Passthru,
        _ => RpzAction::Block,
    }
}

/// Parse the `source` column, encoded as `manual`, `feed:<id>` or
/// `manual_list:<id>`.
fn source_from_str(s: &str) -> RuleSource {
    if let Some(id) = s.strip_prefix("feed:").and_then(|v| v.parse().ok()) {
        RuleSource::Feed(id)
    } else if let Some(id) = s.strip_prefix("manual_list:").and_then(|v| v.parse().ok()) {
        RuleSource::ManualList(id)
    } else {
        RuleSource::Manual
    }
}

pub fn row_to_view(row: RpzRuleRow) -> RpzRuleView {
    RpzRuleView {
        id: row.id,
        domain: row.domain,
        rpz_zone: row.rpz_zone,
        action: action_from_str(&row.action),
        redirect_target: row.redirect_target,
        category: row.category,
        source: source_from_str(&row.source),
        is_active: row.is_active,
        created_at: row.created_at,
    }
}

pub fn new_row_fields(req: &RpzRuleCreate, source: &str) -> NewRpzRule {
    NewRpzRule {
        domain: req.domain.clone(),
        rpz_zone: req.rpz_zone.clone(),
        action: action_str(req.action).to_string(),
        redirect_target: req.redirect_target.clone(),
        category: req.category.clone(),
        source: source.to_string(),
    }
}

/// RPZ rule precedence on collision: a manually-created rule always wins
/// over a feed-sourced one for the same `(rpz_zone, domain)` (spec. §4.4 /
/// §4.6's collision policy). Feed ingestion skips domains a manual rule
/// already covers rather than overwriting them.
pub fn manual_rule_outranks_feed(existing_source: &str) -> bool {
    existing_source == "manual" || existing_source.starts_with("manual_list:")
}
