//! Audit trail for manager actions on hierarchy endpoints.

use db::{
    DBService,
    models::manager_action_log::{ManagerActionLog, NewManagerAction},
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

pub const REDACTED: &str = "[REDACTED]";

const UUID: &str = "[0-9a-fA-F-]{36}";

struct ActionRule {
    method: Option<&'static str>,
    pattern: Regex,
    action: &'static str,
}

fn rule(method: Option<&'static str>, path: &str, action: &'static str) -> ActionRule {
    let pattern = format!("^(?:/api)?/hierarchy{}/?$", path.replace("{id}", UUID));
    ActionRule {
        method,
        pattern: Regex::new(&pattern).expect("Invalid hierarchy action regex"),
        action,
    }
}

static ACTION_RULES: Lazy<Vec<ActionRule>> = Lazy::new(|| {
    vec![
        rule(None, "/managers/{id}/analytics", "view_team_analytics"),
        rule(Some("POST"), "/managers/{id}/notifications", "send_team_notification"),
        rule(None, "/managers/{id}/team", "view_team_members"),
        rule(None, "/managers/{id}/statistics", "view_user_statistics"),
        rule(None, "/team-members/{id}", "view_member_profile"),
        rule(Some("POST"), "/assign-manager", "assign_manager"),
        rule(Some("PUT"), "/assign-manager", "update_manager"),
        rule(None, "/remove-manager", "remove_manager"),
        rule(None, "/validate-assignment", "validate_assignment"),
        rule(None, "/users/{id}/info", "view_user_info"),
        rule(None, "/users/{id}/subordinates", "view_subordinates"),
        rule(None, "/programs/{id}/tree", "view_hierarchy_tree"),
        rule(None, "/change-logs", "view_change_logs"),
    ]
});

static TARGET_USER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!("/hierarchy/(?:managers|team-members|users)/({UUID})"))
        .expect("Invalid target user regex")
});

/// Audit action name for a hierarchy request.
pub fn action_for(method: &str, path: &str) -> &'static str {
    ACTION_RULES
        .iter()
        .find(|r| {
            r.method.is_none_or(|m| m.eq_ignore_ascii_case(method)) && r.pattern.is_match(path)
        })
        .map_or("unknown_hierarchy_action", |r| r.action)
}

/// User a hierarchy path is about, if it names one.
pub fn target_user_id(path: &str) -> Option<Uuid> {
    TARGET_USER
        .captures(path)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Replace the values of sensitive keys, at any depth, with `[REDACTED]`.
pub fn redact_payload(value: &Value, fields: &[String]) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let redacted = if fields.iter().any(|f| f.eq_ignore_ascii_case(k)) {
                        Value::String(REDACTED.to_string())
                    } else {
                        redact_payload(v, fields)
                    };
                    (k.clone(), redacted)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|v| redact_payload(v, fields)).collect()),
        other => other.clone(),
    }
}

/// Write one audit row; failures are logged and swallowed so the request still succeeds.
pub async fn record(db: &DBService, entry: NewManagerAction) {
    let action = entry.action.clone();
    match ManagerActionLog::create(&db.pool, entry).await {
        Ok(log) => debug!(action = %action, log_id = %log.id, "Manager action recorded"),
        Err(e) => warn!(action = %action, error = %e, "Failed to record manager action"),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn names_hierarchy_actions() {
        let id = Uuid::new_v4();
        assert_eq!(
            action_for("GET", &format!("/api/hierarchy/managers/{id}/analytics")),
            "view_team_analytics"
        );
        assert_eq!(
            action_for("POST", &format!("/api/hierarchy/managers/{id}/notifications")),
            "send_team_notification"
        );
        assert_eq!(
            action_for("GET", &format!("/api/hierarchy/managers/{id}/notifications")),
            "unknown_hierarchy_action"
        );
        assert_eq!(action_for("post", "/api/hierarchy/assign-manager"), "assign_manager");
        assert_eq!(action_for("PUT", "/api/hierarchy/assign-manager"), "update_manager");
        assert_eq!(
            action_for("GET", &format!("/hierarchy/programs/{id}/tree")),
            "view_hierarchy_tree"
        );
        assert_eq!(action_for("GET", "/api/hierarchy/managers/not-a-uuid/team"), "unknown_hierarchy_action");
    }

    #[test]
    fn extracts_target_user() {
        let id = Uuid::new_v4();
        assert_eq!(target_user_id(&format!("/api/hierarchy/team-members/{id}")), Some(id));
        assert_eq!(target_user_id(&format!("/api/hierarchy/programs/{id}/tree")), None);
    }

    #[test]
    fn redacts_nested_secrets() {
        let fields = vec!["password".to_string(), "token".to_string()];
        let payload = json!({
            "user_id": "u1",
            "Password": "hunter2",
            "nested": {"token": "abc", "keep": 1},
            "list": [{"password": "x"}]
        });
        assert_eq!(
            redact_payload(&payload, &fields),
            json!({
                "user_id": "u1",
                "Password": REDACTED,
                "nested": {"token": REDACTED, "keep": 1},
                "list": [{"password": REDACTED}]
            })
        );
    }
}
