//! Manager-to-team messages, in-app notifications and the delivery log.

use std::{collections::HashSet, sync::Arc};

use db::{
    DBService,
    models::{
        notification_log::{
            DeliveryStatus, NewNotificationLog, NotificationChannel, NotificationLog,
            NotificationLogFilter,
        },
        user::User,
        user_notification::UserNotification,
    },
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use ts_rs::TS;
use uuid::Uuid;

use super::{
    config::NotificationLimits,
    email_templates::{self, EmailContent},
    hierarchy::{HierarchyError, HierarchyService},
    sendgrid::EmailSender,
};

pub const TEAM_MESSAGE: &str = "team_message";

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Hierarchy(#[from] HierarchyError),
    #[error("{0}")]
    Validation(String),
    #[error("manager not found")]
    ManagerNotFound,
    #[error("notification not found")]
    NotFound,
    #[error("no recipients: the manager has no team members in this program")]
    NoRecipients,
    #[error("recipients are not in your team")]
    RecipientsOutsideTeam { user_ids: Vec<Uuid> },
    #[error("recipients are not in this program")]
    RecipientsOutsideProgram { user_ids: Vec<Uuid> },
    #[error("recipients do not exist")]
    UnknownRecipients { user_ids: Vec<Uuid> },
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct SendTeamNotification {
    pub program_id: Option<Uuid>,
    pub subject: String,
    pub message: String,
    /// Defaults to every subordinate of the manager.
    #[serde(default)]
    pub recipient_ids: Option<Vec<Uuid>>,
    #[serde(default = "default_true")]
    pub send_email: bool,
}

impl SendTeamNotification {
    /// Number of recipients named in the request, before defaults are applied.
    pub fn named_recipients(&self) -> usize {
        self.recipient_ids.as_ref().map_or(0, Vec::len)
    }
}

#[derive(Debug, Clone, Default, Serialize, TS)]
pub struct TeamNotificationReport {
    pub recipients: usize,
    pub in_app: usize,
    pub emails_sent: usize,
    pub emails_failed: usize,
    pub emails_skipped: usize,
}

/// One email to deliver and log.
pub struct Delivery<'a> {
    pub program_id: Option<Uuid>,
    pub sender_user_id: Option<Uuid>,
    pub recipient_user_id: Option<Uuid>,
    pub recipient_email: &'a str,
    pub recipient_name: Option<&'a str>,
    pub notification_type: &'a str,
    pub content: EmailContent,
}

#[derive(Clone)]
pub struct NotificationService {
    db: DBService,
    sender: Arc<dyn EmailSender>,
    hierarchy: HierarchyService,
    limits: NotificationLimits,
}

impl NotificationService {
    pub fn new(
        db: DBService,
        sender: Arc<dyn EmailSender>,
        hierarchy: HierarchyService,
        limits: NotificationLimits,
    ) -> Self {
        Self {
            db,
            sender,
            hierarchy,
            limits,
        }
    }

    pub fn email_enabled(&self) -> bool {
        self.sender.is_enabled()
    }

    /// Send one email and record the outcome in `notification_logs`.
    pub async fn deliver(&self, delivery: Delivery<'_>) -> Result<DeliveryStatus, sqlx::Error> {
        let subject = delivery.content.subject.clone();
        let (status, provider_message_id, error_message) = if !self.sender.is_enabled() {
            (DeliveryStatus::Skipped, None, Some("email delivery disabled".to_string()))
        } else {
            let message = delivery
                .content
                .to(delivery.recipient_email, delivery.recipient_name);
            match self.sender.send(&message).await {
                Ok(sent) => (DeliveryStatus::Sent, sent.message_id, None),
                Err(e) => {
                    warn!(
                        to = %delivery.recipient_email,
                        notification_type = delivery.notification_type,
                        error = %e,
                        "Email delivery failed"
                    );
                    (DeliveryStatus::Failed, None, Some(e.to_string()))
                }
            }
        };

        NotificationLog::create(
            &self.db.pool,
            &NewNotificationLog {
                program_id: delivery.program_id,
                sender_user_id: delivery.sender_user_id,
                recipient_user_id: delivery.recipient_user_id,
                recipient_email: delivery.recipient_email.to_string(),
                channel: NotificationChannel::Email,
                notification_type: delivery.notification_type.to_string(),
                subject,
                status,
                provider_message_id,
                error_message,
            },
        )
        .await?;
        Ok(status)
    }

    fn validate(&self, req: &SendTeamNotification) -> Result<(), NotificationError> {
        let subject = req.subject.trim();
        let message = req.message.trim();
        if subject.is_empty() {
            return Err(NotificationError::Validation("subject is required".to_string()));
        }
        if subject.chars().count() > self.limits.subject_max_length {
            return Err(NotificationError::Validation(format!(
                "subject must not exceed {} characters",
                self.limits.subject_max_length
            )));
        }
        if message.is_empty() {
            return Err(NotificationError::Validation("message is required".to_string()));
        }
        if message.chars().count() > self.limits.message_max_length {
            return Err(NotificationError::Validation(format!(
                "message must not exceed {} characters",
                self.limits.message_max_length
            )));
        }
        if req.named_recipients() > self.limits.max_recipients {
            return Err(NotificationError::Validation(format!(
                "cannot send to more than {} recipients at once",
                self.limits.max_recipients
            )));
        }
        Ok(())
    }

    /// Message a manager's team in-app and, optionally, by email.
    ///
    /// Every named recipient must exist and report to the manager directly or indirectly.
    /// Platform admins may also name other members of the program.
    pub async fn send_team_notification(
        &self,
        sender: &User,
        manager_id: Uuid,
        req: &SendTeamNotification,
    ) -> Result<TeamNotificationReport, NotificationError> {
        self.validate(req)?;
        let program_id = req.program_id.or(sender.program_id).ok_or_else(|| {
            NotificationError::Validation("program_id is required".to_string())
        })?;
        let manager = User::find_by_id(&self.db.pool, manager_id)
            .await?
            .ok_or(NotificationError::ManagerNotFound)?;

        let team: HashSet<Uuid> = self
            .hierarchy
            .all_subordinates(manager_id, program_id)
            .await?
            .into_iter()
            .map(|s| s.user_id)
            .collect();

        let recipient_ids: Vec<Uuid> = match req.recipient_ids.as_ref().filter(|ids| !ids.is_empty()) {
            Some(ids) => {
                let mut seen = HashSet::new();
                ids.iter().copied().filter(|id| seen.insert(*id)).collect()
            }
            None => team.iter().copied().collect(),
        };
        if recipient_ids.is_empty() {
            return Err(NotificationError::NoRecipients);
        }
        if recipient_ids.len() > self.limits.max_recipients {
            return Err(NotificationError::Validation(format!(
                "cannot send to more than {} recipients at once",
                self.limits.max_recipients
            )));
        }

        let recipients = User::find_by_ids(&self.db.pool, &recipient_ids).await?;
        if recipients.len() < recipient_ids.len() {
            let found: HashSet<Uuid> = recipients.iter().map(|r| r.id).collect();
            let unknown: Vec<Uuid> = recipient_ids
                .iter()
                .copied()
                .filter(|id| !found.contains(id))
                .collect();
            return Err(NotificationError::UnknownRecipients { user_ids: unknown });
        }

        // Platform admins may reach anyone in the program, everyone else only the team.
        let platform_admin = sender.role.is_platform_admin();
        let mut outside = Vec::new();
        for recipient in &recipients {
            let allowed = team.contains(&recipient.id)
                || (platform_admin
                    && self.hierarchy.is_program_member(recipient.id, program_id).await?);
            if !allowed {
                outside.push(recipient.id);
            }
        }
        if !outside.is_empty() {
            warn!(
                sender_id = %sender.id,
                manager_id = %manager_id,
                program_id = %program_id,
                outside = outside.len(),
                "Team notification names users the sender may not reach"
            );
            return Err(if platform_admin {
                NotificationError::RecipientsOutsideProgram { user_ids: outside }
            } else {
                NotificationError::RecipientsOutsideTeam { user_ids: outside }
            });
        }

        let subject = req.subject.trim();
        let message = req.message.trim();
        let mut report = TeamNotificationReport {
            recipients: recipients.len(),
            ..Default::default()
        };

        for recipient in &recipients {
            UserNotification::create(
                &self.db.pool,
                recipient.id,
                Some(manager.id),
                TEAM_MESSAGE,
                subject,
                message,
            )
            .await?;
            NotificationLog::create(
                &self.db.pool,
                &NewNotificationLog {
                    program_id: Some(program_id),
                    sender_user_id: Some(sender.id),
                    recipient_user_id: Some(recipient.id),
                    recipient_email: recipient.email.clone(),
                    channel: NotificationChannel::InApp,
                    notification_type: TEAM_MESSAGE.to_string(),
                    subject: subject.to_string(),
                    status: DeliveryStatus::Sent,
                    provider_message_id: None,
                    error_message: None,
                },
            )
            .await?;
            report.in_app += 1;

            if !req.send_email {
                continue;
            }
            let status = self
                .deliver(Delivery {
                    program_id: Some(program_id),
                    sender_user_id: Some(sender.id),
                    recipient_user_id: Some(recipient.id),
                    recipient_email: &recipient.email,
                    recipient_name: Some(&recipient.name),
                    notification_type: TEAM_MESSAGE,
                    content: email_templates::team_message(&manager.name, subject, message),
                })
                .await?;
            match status {
                DeliveryStatus::Sent => report.emails_sent += 1,
                DeliveryStatus::Failed => report.emails_failed += 1,
                DeliveryStatus::Skipped => report.emails_skipped += 1,
            }
        }

        info!(
            sender_id = %sender.id,
            manager_id = %manager_id,
            program_id = %program_id,
            recipients = report.recipients,
            emails_sent = report.emails_sent,
            emails_failed = report.emails_failed,
            "Team notification sent"
        );
        Ok(report)
    }

    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        unread_only: bool,
    ) -> Result<Vec<UserNotification>, NotificationError> {
        Ok(UserNotification::find_for_user(&self.db.pool, user_id, unread_only).await?)
    }

    pub async fn unread_count(&self, user_id: Uuid) -> Result<i64, NotificationError> {
        Ok(UserNotification::unread_count(&self.db.pool, user_id).await?)
    }

    pub async fn mark_read(
        &self,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<UserNotification, NotificationError> {
        UserNotification::mark_read(&self.db.pool, id, user_id)
            .await?
            .ok_or(NotificationError::NotFound)
    }

    pub async fn logs(
        &self,
        filter: &NotificationLogFilter,
    ) -> Result<Vec<NotificationLog>, NotificationError> {
        Ok(NotificationLog::find(&self.db.pool, filter).await?)
    }
}

#[cfg(test)]
mod tests {
    use db::models::user::UserRole;

    use super::*;
    use crate::services::test_support::{self, HierarchyFixture, RecordingSender};

    async fn team() -> HierarchyFixture {
        let fx = test_support::hierarchy_fixture().await;
        fx.service
            .assign_manager(&fx.request(fx.staff_a, fx.lead), fx.admin)
            .await
            .unwrap();
        fx
    }

    fn service(fx: &HierarchyFixture, sender: RecordingSender) -> NotificationService {
        NotificationService::new(
            fx.db.clone(),
            Arc::new(sender),
            fx.service.clone(),
            NotificationLimits::default(),
        )
    }

    fn program_request(program_id: Uuid, recipient_ids: Vec<Uuid>) -> SendTeamNotification {
        SendTeamNotification {
            program_id: Some(program_id),
            ..request(Some(recipient_ids))
        }
    }

    fn request(recipient_ids: Option<Vec<Uuid>>) -> SendTeamNotification {
        SendTeamNotification {
            program_id: None,
            subject: "Kickoff".to_string(),
            message: "See you at 10".to_string(),
            recipient_ids,
            send_email: true,
        }
    }

    #[tokio::test]
    async fn defaults_to_the_whole_team_and_logs_each_delivery() {
        let fx = team().await;
        let sender = RecordingSender::default();
        let notifications = service(&fx, sender.clone());
        let lead = User::find_by_id(&fx.db.pool, fx.lead).await.unwrap().unwrap();

        let report = notifications
            .send_team_notification(&lead, fx.lead, &request(None))
            .await
            .unwrap();
        assert_eq!(report.recipients, 1);
        assert_eq!(report.in_app, 1);
        assert_eq!(report.emails_sent, 1);
        assert_eq!(sender.sent.lock().unwrap().len(), 1);

        assert_eq!(notifications.unread_count(fx.staff_a).await.unwrap(), 1);
        let inbox = notifications.list_for_user(fx.staff_a, true).await.unwrap();
        notifications.mark_read(inbox[0].id, fx.staff_a).await.unwrap();
        assert_eq!(notifications.unread_count(fx.staff_a).await.unwrap(), 0);
        assert!(matches!(
            notifications.mark_read(inbox[0].id, fx.staff_b).await.unwrap_err(),
            NotificationError::NotFound
        ));

        let logs = notifications
            .logs(&NotificationLogFilter::default())
            .await
            .unwrap();
        assert_eq!(logs.len(), 2);
        assert!(logs.iter().all(|l| l.status == DeliveryStatus::Sent));
    }

    #[tokio::test]
    async fn recipients_outside_the_team_are_refused() {
        let fx = team().await;
        let notifications = service(&fx, RecordingSender::default());
        let lead = User::find_by_id(&fx.db.pool, fx.lead).await.unwrap().unwrap();

        let err = notifications
            .send_team_notification(&lead, fx.lead, &request(Some(vec![fx.staff_a, fx.staff_b])))
            .await
            .unwrap_err();
        assert!(
            matches!(err, NotificationError::RecipientsOutsideTeam { ref user_ids } if user_ids == &vec![fx.staff_b])
        );

        // program admins are held to the manager's team as well
        let padmin = test_support::user(&fx.db, "Padmin", UserRole::ProgramAdmin, Some(fx.program)).await;
        let err = notifications
            .send_team_notification(&padmin, fx.lead, &request(Some(vec![fx.staff_b])))
            .await
            .unwrap_err();
        assert!(matches!(err, NotificationError::RecipientsOutsideTeam { .. }));

        let admin = User::find_by_id(&fx.db.pool, fx.admin).await.unwrap().unwrap();
        let report = notifications
            .send_team_notification(&admin, fx.lead, &program_request(fx.program, vec![fx.staff_b]))
            .await
            .unwrap();
        assert_eq!(report.recipients, 1);
    }

    #[tokio::test]
    async fn platform_admins_cannot_reach_other_programs_or_unknown_users() {
        let fx = team().await;
        let notifications = service(&fx, RecordingSender::default());
        let admin = User::find_by_id(&fx.db.pool, fx.admin).await.unwrap().unwrap();
        let outsider = test_support::user(&fx.db, "Outsider", UserRole::Participant, None).await;

        let err = notifications
            .send_team_notification(
                &admin,
                fx.lead,
                &program_request(fx.program, vec![fx.staff_a, outsider.id]),
            )
            .await
            .unwrap_err();
        assert!(
            matches!(err, NotificationError::RecipientsOutsideProgram { ref user_ids } if user_ids == &vec![outsider.id])
        );

        let missing = Uuid::new_v4();
        let err = notifications
            .send_team_notification(
                &admin,
                fx.lead,
                &program_request(fx.program, vec![fx.staff_a, missing]),
            )
            .await
            .unwrap_err();
        assert!(
            matches!(err, NotificationError::UnknownRecipients { ref user_ids } if user_ids == &vec![missing])
        );

        // nothing was delivered by the refused sends
        assert_eq!(notifications.unread_count(outsider.id).await.unwrap(), 0);
        assert_eq!(notifications.unread_count(fx.staff_a).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_emails_are_counted_not_fatal() {
        let fx = team().await;
        let staff_a = User::find_by_id(&fx.db.pool, fx.staff_a).await.unwrap().unwrap();
        let sender = RecordingSender {
            fail_for: vec![staff_a.email.clone()],
            ..Default::default()
        };
        let notifications = service(&fx, sender);
        let lead = User::find_by_id(&fx.db.pool, fx.lead).await.unwrap().unwrap();

        let report = notifications
            .send_team_notification(&lead, fx.lead, &request(None))
            .await
            .unwrap();
        assert_eq!(report.in_app, 1);
        assert_eq!(report.emails_failed, 1);

        let failed = notifications
            .logs(&NotificationLogFilter {
                status: Some(DeliveryStatus::Failed),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].error_message.as_deref().unwrap().contains("400"));
    }

    #[tokio::test]
    async fn input_limits_are_enforced() {
        let fx = team().await;
        let notifications = service(&fx, RecordingSender::default());
        let lead = User::find_by_id(&fx.db.pool, fx.lead).await.unwrap().unwrap();

        let mut req = request(None);
        req.subject = "x".repeat(256);
        assert!(matches!(
            notifications.send_team_notification(&lead, fx.lead, &req).await.unwrap_err(),
            NotificationError::Validation(_)
        ));

        let mut req = request(None);
        req.message = "  ".to_string();
        assert!(matches!(
            notifications.send_team_notification(&lead, fx.lead, &req).await.unwrap_err(),
            NotificationError::Validation(_)
        ));

        // staff_b has no team
        let staff_b = User::find_by_id(&fx.db.pool, fx.staff_b).await.unwrap().unwrap();
        assert!(matches!(
            notifications
                .send_team_notification(&staff_b, fx.staff_b, &request(None))
                .await
                .unwrap_err(),
            NotificationError::NoRecipients
        ));
    }
}
