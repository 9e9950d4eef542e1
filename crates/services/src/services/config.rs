//! Environment-driven configuration for the API server and the hierarchy security layer.

use std::{collections::HashMap, net::SocketAddr, str::FromStr, time::Duration};

use db::models::user::UserRole;
use secrecy::SecretString;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} is invalid: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Limits applied to manager-to-team notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationLimits {
    pub max_per_hour: u32,
    pub max_per_day: u32,
    pub max_recipients: usize,
    pub subject_max_length: usize,
    pub message_max_length: usize,
}

impl Default for NotificationLimits {
    fn default() -> Self {
        Self {
            max_per_hour: 50,
            max_per_day: 200,
            max_recipients: 100,
            subject_max_length: 255,
            message_max_length: 5000,
        }
    }
}

/// What holding a manager position lets a user do over their own subordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerPermissions {
    pub view_analytics: bool,
    pub view_team_profiles: bool,
    pub send_notifications: bool,
    pub export_data: bool,
    pub assign_activities: bool,
    pub modify_structure: bool,
}

impl Default for ManagerPermissions {
    fn default() -> Self {
        Self {
            view_analytics: true,
            view_team_profiles: true,
            send_notifications: true,
            export_data: true,
            assign_activities: false,
            modify_structure: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub notifications: NotificationLimits,
    pub analytics_requests_per_minute: u32,
    pub max_hierarchy_depth: usize,
    pub bypass_roles: Vec<UserRole>,
    pub manager_permissions: ManagerPermissions,
    pub audit_logging_enabled: bool,
    pub redacted_fields: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            notifications: NotificationLimits::default(),
            analytics_requests_per_minute: 30,
            max_hierarchy_depth: 10,
            bypass_roles: vec![UserRole::SuperAdmin, UserRole::Admin, UserRole::ProgramAdmin],
            manager_permissions: ManagerPermissions::default(),
            audit_logging_enabled: true,
            redacted_fields: [
                "password",
                "password_confirmation",
                "token",
                "api_key",
                "secret",
                "credit_card",
                "ssn",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

impl SecurityConfig {
    pub fn from_kv(kv: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let n = &defaults.notifications;
        let m = &defaults.manager_permissions;

        Ok(Self {
            notifications: NotificationLimits {
                max_per_hour: parse(kv, "HIERARCHY_MAX_NOTIFICATIONS_PER_HOUR", n.max_per_hour)?,
                max_per_day: parse(kv, "HIERARCHY_MAX_NOTIFICATIONS_PER_DAY", n.max_per_day)?,
                max_recipients: parse(
                    kv,
                    "HIERARCHY_MAX_RECIPIENTS_PER_NOTIFICATION",
                    n.max_recipients,
                )?,
                subject_max_length: n.subject_max_length,
                message_max_length: n.message_max_length,
            },
            analytics_requests_per_minute: parse(
                kv,
                "HIERARCHY_MAX_ANALYTICS_REQUESTS_PER_MINUTE",
                defaults.analytics_requests_per_minute,
            )?,
            max_hierarchy_depth: parse(kv, "HIERARCHY_MAX_DEPTH", defaults.max_hierarchy_depth)?,
            bypass_roles: defaults.bypass_roles.clone(),
            manager_permissions: ManagerPermissions {
                view_analytics: parse_bool(kv, "HIERARCHY_MANAGERS_CAN_VIEW_ANALYTICS", m.view_analytics)?,
                view_team_profiles: parse_bool(
                    kv,
                    "HIERARCHY_MANAGERS_CAN_VIEW_PROFILES",
                    m.view_team_profiles,
                )?,
                send_notifications: parse_bool(
                    kv,
                    "HIERARCHY_MANAGERS_CAN_SEND_NOTIFICATIONS",
                    m.send_notifications,
                )?,
                export_data: parse_bool(kv, "HIERARCHY_MANAGERS_CAN_EXPORT", m.export_data)?,
                assign_activities: parse_bool(
                    kv,
                    "HIERARCHY_MANAGERS_CAN_ASSIGN_ACTIVITIES",
                    m.assign_activities,
                )?,
                modify_structure: parse_bool(
                    kv,
                    "HIERARCHY_MANAGERS_CAN_MODIFY_STRUCTURE",
                    m.modify_structure,
                )?,
            },
            audit_logging_enabled: parse_bool(
                kv,
                "HIERARCHY_AUDIT_LOGGING_ENABLED",
                defaults.audit_logging_enabled,
            )?,
            redacted_fields: defaults.redacted_fields,
        })
    }

    pub fn is_bypass_role(&self, role: UserRole) -> bool {
        self.bypass_roles.contains(&role)
    }
}

#[derive(Debug, Clone)]
pub struct SendGridConfig {
    pub api_key: Option<SecretString>,
    pub from_email: String,
    pub from_name: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub app_url: String,
    pub sendgrid: SendGridConfig,
    pub reminder_poll_interval: Duration,
    pub security: SecurityConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_kv(&std::env::vars().collect())
    }

    pub fn from_kv(kv: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let host = value(kv, "HOST").unwrap_or("127.0.0.1");
        let port: u16 = parse(kv, "PORT", 3001)?;
        let bind_addr = format!("{host}:{port}")
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                key: "HOST",
                message: e.to_string(),
            })?;

        Ok(Self {
            bind_addr,
            database_url: value(kv, "DATABASE_URL")
                .unwrap_or("sqlite://qsights.db")
                .to_string(),
            app_url: value(kv, "APP_URL")
                .unwrap_or("http://localhost:3000")
                .trim_end_matches('/')
                .to_string(),
            sendgrid: SendGridConfig {
                api_key: value(kv, "SENDGRID_API_KEY").map(|k| SecretString::from(k.to_string())),
                from_email: value(kv, "SENDGRID_FROM_EMAIL")
                    .unwrap_or("noreply@qsights.com")
                    .to_string(),
                from_name: value(kv, "SENDGRID_FROM_NAME")
                    .unwrap_or("QSights")
                    .to_string(),
            },
            reminder_poll_interval: Duration::from_secs(parse(kv, "REMINDER_POLL_SECONDS", 3600)?),
            security: SecurityConfig::from_kv(kv)?,
        })
    }
}

fn value<'a>(kv: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    kv.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn parse<T>(kv: &HashMap<String, String>, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value(kv, key) {
        None => Ok(default),
        Some(v) => v.parse::<T>().map_err(|e| ConfigError::Invalid {
            key,
            message: e.to_string(),
        }),
    }
}

fn parse_bool(
    kv: &HashMap<String, String>,
    key: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    match value(kv, key) {
        None => Ok(default),
        Some("1" | "true" | "TRUE" | "yes" | "YES") => Ok(true),
        Some("0" | "false" | "FALSE" | "no" | "NO") => Ok(false),
        Some(other) => Err(ConfigError::Invalid {
            key,
            message: format!("expected a boolean, got {other:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kv(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_match_documented_limits() {
        let config = SecurityConfig::from_kv(&HashMap::new()).unwrap();
        assert_eq!(config.notifications.max_per_hour, 50);
        assert_eq!(config.notifications.max_per_day, 200);
        assert_eq!(config.notifications.max_recipients, 100);
        assert_eq!(config.max_hierarchy_depth, 10);
        assert!(!config.manager_permissions.modify_structure);
        assert!(config.is_bypass_role(UserRole::ProgramAdmin));
        assert!(!config.is_bypass_role(UserRole::ProgramManager));
    }

    #[test]
    fn env_overrides_are_applied() {
        let config = SecurityConfig::from_kv(&kv(&[
            ("HIERARCHY_MAX_NOTIFICATIONS_PER_HOUR", "5"),
            ("HIERARCHY_MANAGERS_CAN_MODIFY_STRUCTURE", "true"),
            ("HIERARCHY_MAX_DEPTH", " "),
        ]))
        .unwrap();
        assert_eq!(config.notifications.max_per_hour, 5);
        assert!(config.manager_permissions.modify_structure);
        assert_eq!(config.max_hierarchy_depth, 10);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = SecurityConfig::from_kv(&kv(&[("HIERARCHY_MAX_DEPTH", "deep")])).unwrap_err();
        assert!(err.to_string().contains("HIERARCHY_MAX_DEPTH"));
        assert!(AppConfig::from_kv(&kv(&[("PORT", "99999")])).is_err());
        assert!(
            SecurityConfig::from_kv(&kv(&[("HIERARCHY_AUDIT_LOGGING_ENABLED", "maybe")])).is_err()
        );
    }

    #[test]
    fn app_config_defaults() {
        let config = AppConfig::from_kv(&HashMap::new()).unwrap();
        assert_eq!(config.bind_addr.port(), 3001);
        assert!(config.sendgrid.api_key.is_none());
        assert_eq!(config.reminder_poll_interval, Duration::from_secs(3600));
    }
}
