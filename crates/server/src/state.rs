use std::sync::Arc;

use db::DBService;
use services::services::{
    auth::AuthService,
    config::AppConfig,
    evaluation::EvaluationService,
    hierarchy::HierarchyService,
    notification::NotificationService,
    questionnaire::QuestionnaireService,
    rate_limit::NotificationRateLimiter,
    reminders::ReminderService,
    sendgrid::EmailSender,
};

/// Shared handles every handler and middleware can reach.
#[derive(Clone)]
pub struct AppState {
    pub db: DBService,
    pub config: Arc<AppConfig>,
    pub auth: AuthService,
    pub hierarchy: HierarchyService,
    pub notifications: NotificationService,
    pub rate_limiter: NotificationRateLimiter,
    pub evaluations: EvaluationService,
    pub questionnaires: QuestionnaireService,
    pub reminders: ReminderService,
}

impl AppState {
    pub fn new(db: DBService, config: AppConfig, email: Arc<dyn EmailSender>) -> Self {
        let limits = config.security.notifications.clone();
        let hierarchy = HierarchyService::new(db.clone(), config.security.clone());
        let notifications =
            NotificationService::new(db.clone(), email, hierarchy.clone(), limits.clone());
        let reminders = ReminderService::new(
            db.clone(),
            notifications.clone(),
            config.app_url.clone(),
            config.reminder_poll_interval,
        );

        Self {
            auth: AuthService::new(db.clone()),
            evaluations: EvaluationService::new(db.clone()),
            questionnaires: QuestionnaireService::new(db.clone()),
            rate_limiter: NotificationRateLimiter::in_memory(limits),
            hierarchy,
            notifications,
            reminders,
            config: Arc::new(config),
            db,
        }
    }
}
