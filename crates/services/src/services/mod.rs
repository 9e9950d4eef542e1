pub mod audit;
pub mod auth;
pub mod config;
pub mod database_validator;
pub mod email_templates;
pub mod evaluation;
pub mod hierarchy;
pub mod notification;
pub mod permissions;
pub mod program_scope;
pub mod questionnaire;
pub mod rate_limit;
pub mod reminders;
pub mod sendgrid;
