//! Background job that sends evaluation reminders and flags missed deadlines.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use db::{
    DBService,
    models::{
        evaluation_assignment::{AssignmentStatus, EvaluationAssignment, ReminderCandidate},
        notification_log::DeliveryStatus,
        user_notification::UserNotification,
    },
};
use serde::Serialize;
use thiserror::Error;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use ts_rs::TS;
use uuid::Uuid;

use super::{
    email_templates::{self, AssignmentEmail},
    notification::{Delivery, NotificationService},
};

/// Minimum gap between two reminder attempts for the same assignment, whatever their outcome.
const REMINDER_COOLDOWN_HOURS: i64 = 24;

#[derive(Debug, Error)]
pub enum ReminderError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, TS)]
pub struct JobReport {
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl JobReport {
    fn record(&mut self, status: DeliveryStatus) {
        match status {
            DeliveryStatus::Sent => self.sent += 1,
            DeliveryStatus::Failed => self.failed += 1,
            DeliveryStatus::Skipped => self.skipped += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, TS)]
pub struct ReminderRunReport {
    pub reminders: JobReport,
    pub missed_deadlines: JobReport,
}

#[derive(Clone)]
pub struct ReminderService {
    db: DBService,
    notifications: NotificationService,
    app_url: String,
    poll_interval: Duration,
}

impl ReminderService {
    pub fn new(
        db: DBService,
        notifications: NotificationService,
        app_url: String,
        poll_interval: Duration,
    ) -> Self {
        Self {
            db,
            notifications,
            app_url,
            poll_interval,
        }
    }

    /// Spawn the reminder loop onto the runtime.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.start().await;
        })
    }

    async fn start(&self) {
        info!(
            "Starting evaluation reminder service with interval {:?}",
            self.poll_interval
        );

        let mut interval = interval(self.poll_interval);

        loop {
            interval.tick().await;
            let now = Utc::now();
            match self.run_once(now.date_naive(), now).await {
                Ok(report) => info!(
                    reminders_sent = report.reminders.sent,
                    reminders_failed = report.reminders.failed,
                    reminders_skipped = report.reminders.skipped,
                    overdue_marked = report.missed_deadlines.sent + report.missed_deadlines.failed
                        + report.missed_deadlines.skipped,
                    "Reminder run complete"
                ),
                Err(e) => error!("Error running evaluation reminders: {}", e),
            }
        }
    }

    /// One pass of both jobs. `today` and `now` are injected so runs are reproducible.
    pub async fn run_once(
        &self,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<ReminderRunReport, ReminderError> {
        Ok(ReminderRunReport {
            reminders: self.send_reminders(today, now).await?,
            missed_deadlines: self.process_missed_deadlines(today).await?,
        })
    }

    fn recently_reminded(candidate: &ReminderCandidate, now: DateTime<Utc>) -> bool {
        candidate
            .reminder_sent_at
            .is_some_and(|at| now - at < chrono::Duration::hours(REMINDER_COOLDOWN_HOURS))
    }

    async fn send_reminders(
        &self,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<JobReport, ReminderError> {
        let candidates = EvaluationAssignment::find_reminder_candidates(&self.db.pool, today).await?;
        let mut report = JobReport::default();

        if candidates.is_empty() {
            debug!("Evaluation reminders: nothing due");
            return Ok(report);
        }

        for candidate in candidates {
            if Self::recently_reminded(&candidate, now) {
                report.skipped += 1;
                continue;
            }

            let url = email_templates::evaluation_url(&self.app_url, &candidate.access_token);
            let content = email_templates::evaluation_reminder(
                &AssignmentEmail {
                    evaluator_name: &candidate.evaluator_name,
                    evaluatee_name: &candidate.evaluatee_name,
                    event_name: &candidate.event_name,
                    end_date: candidate.end_date,
                    url: &url,
                },
                (candidate.end_date - today).num_days(),
            );

            let status = match self.deliver(&candidate, "evaluation_reminder", content).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(
                        assignment_id = %candidate.assignment_id,
                        error = %e,
                        "Evaluation reminders: could not record delivery"
                    );
                    DeliveryStatus::Failed
                }
            };
            // skipped and failed attempts also start the cooldown; they are logged, not retried
            EvaluationAssignment::record_reminder(&self.db.pool, candidate.assignment_id, now)
                .await?;
            report.record(status);
        }

        Ok(report)
    }

    /// Email every pending assignment of an event its evaluation link.
    pub async fn send_invitations(
        &self,
        event_id: Uuid,
        program_id: Uuid,
        sent_by: Uuid,
    ) -> Result<JobReport, ReminderError> {
        let candidates = EvaluationAssignment::find_pending_for_event(&self.db.pool, event_id).await?;
        let mut report = JobReport::default();

        for candidate in candidates {
            let url = email_templates::evaluation_url(&self.app_url, &candidate.access_token);
            let content = email_templates::evaluation_invitation(&AssignmentEmail {
                evaluator_name: &candidate.evaluator_name,
                evaluatee_name: &candidate.evaluatee_name,
                event_name: &candidate.event_name,
                end_date: candidate.end_date,
                url: &url,
            });
            let status = self
                .notifications
                .deliver(Delivery {
                    program_id: Some(program_id),
                    sender_user_id: Some(sent_by),
                    recipient_user_id: Some(candidate.evaluator_id),
                    recipient_email: &candidate.evaluator_email,
                    recipient_name: Some(&candidate.evaluator_name),
                    notification_type: "evaluation_invitation",
                    content,
                })
                .await?;
            report.record(status);
        }

        info!(
            evaluation_event_id = %event_id,
            sent = report.sent,
            failed = report.failed,
            skipped = report.skipped,
            "Evaluation invitations processed"
        );
        Ok(report)
    }

    /// Mark open assignments of lapsed events overdue and tell their evaluators.
    async fn process_missed_deadlines(&self, today: NaiveDate) -> Result<JobReport, ReminderError> {
        let candidates = EvaluationAssignment::find_missed_deadlines(&self.db.pool, today).await?;
        let mut report = JobReport::default();

        for candidate in candidates {
            EvaluationAssignment::update_status(
                &self.db.pool,
                candidate.assignment_id,
                AssignmentStatus::Overdue,
            )
            .await?;
            info!(
                assignment_id = %candidate.assignment_id,
                evaluation_event_id = %candidate.evaluation_event_id,
                end_date = %candidate.end_date,
                "Evaluation assignment marked overdue"
            );

            let content = email_templates::missed_deadline(&AssignmentEmail {
                evaluator_name: &candidate.evaluator_name,
                evaluatee_name: &candidate.evaluatee_name,
                event_name: &candidate.event_name,
                end_date: candidate.end_date,
                url: "",
            });
            if let Err(e) = UserNotification::create(
                &self.db.pool,
                candidate.evaluator_id,
                None,
                "evaluation_overdue",
                &content.subject,
                &content.text,
            )
            .await
            {
                warn!(assignment_id = %candidate.assignment_id, error = %e, "Could not create overdue notification");
            }

            match self.deliver(&candidate, "evaluation_missed_deadline", content).await {
                Ok(status) => report.record(status),
                Err(e) => {
                    warn!(assignment_id = %candidate.assignment_id, error = %e, "Missed deadline email not recorded");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    async fn deliver(
        &self,
        candidate: &ReminderCandidate,
        notification_type: &str,
        content: email_templates::EmailContent,
    ) -> Result<DeliveryStatus, sqlx::Error> {
        self.notifications
            .deliver(Delivery {
                program_id: None,
                sender_user_id: None,
                recipient_user_id: Some(candidate.evaluator_id),
                recipient_email: &candidate.evaluator_email,
                recipient_name: Some(&candidate.evaluator_name),
                notification_type,
                content,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Days;
    use db::models::{
        evaluation_event::{CreateEvaluationEvent, EvaluationType},
        notification_log::NotificationLogFilter,
    };

    use super::*;
    use crate::services::{
        config::NotificationLimits,
        evaluation::EvaluationService,
        sendgrid::DisabledEmailSender,
        test_support::{self, HierarchyFixture, RecordingSender},
    };

    async fn setup(
        start: NaiveDate,
        end: NaiveDate,
    ) -> (HierarchyFixture, ReminderService, RecordingSender, EvaluationService) {
        let fx = test_support::hierarchy_fixture().await;
        for staff in [fx.staff_a, fx.staff_b] {
            fx.service
                .assign_manager(&fx.request(staff, fx.lead), fx.admin)
                .await
                .unwrap();
        }
        let evaluations = EvaluationService::new(fx.db.clone());
        let event = evaluations
            .create(
                &CreateEvaluationEvent {
                    program_id: fx.program,
                    questionnaire_id: None,
                    name: "Annual".to_string(),
                    description: None,
                    evaluation_type: EvaluationType::SubordinateToManager,
                    start_date: start,
                    end_date: end,
                    reminder_days_before: Some(3),
                    send_reminders: Some(true),
                    is_anonymous: None,
                },
                fx.admin,
            )
            .await
            .unwrap();
        evaluations.activate(event.id).await.unwrap();
        evaluations.generate_assignments(event.id).await.unwrap();

        let sender = RecordingSender::default();
        let notifications = NotificationService::new(
            fx.db.clone(),
            Arc::new(sender.clone()),
            fx.service.clone(),
            NotificationLimits::default(),
        );
        let reminders = ReminderService::new(
            fx.db.clone(),
            notifications,
            "https://app.example.com".to_string(),
            Duration::from_secs(3600),
        );
        (fx, reminders, sender, evaluations)
    }

    #[tokio::test]
    async fn reminders_respect_the_cooldown() {
        let today = Utc::now().date_naive();
        let (_fx, reminders, sender, _) = setup(today, today + Days::new(2)).await;
        let now = Utc::now();

        let first = reminders.run_once(today, now).await.unwrap();
        assert_eq!(first.reminders, JobReport { sent: 2, failed: 0, skipped: 0 });
        assert_eq!(first.missed_deadlines, JobReport::default());
        {
            let sent = sender.sent.lock().unwrap();
            assert_eq!(sent.len(), 2);
            assert!(sent[0].subject.starts_with("Reminder: Complete Evaluation"));
            assert!(sent[0].text.contains("https://app.example.com/e/evaluate/"));
        }

        let again = reminders.run_once(today, now).await.unwrap();
        assert_eq!(again.reminders, JobReport { sent: 0, failed: 0, skipped: 2 });

        let later = now + chrono::Duration::hours(25);
        let next_day = reminders.run_once(today, later).await.unwrap();
        assert_eq!(next_day.reminders.sent, 2);
    }

    #[tokio::test]
    async fn undelivered_reminders_also_wait_out_the_cooldown() {
        let today = Utc::now().date_naive();
        let (fx, _, _, _) = setup(today, today + Days::new(2)).await;
        let notifications = NotificationService::new(
            fx.db.clone(),
            Arc::new(DisabledEmailSender),
            fx.service.clone(),
            NotificationLimits::default(),
        );
        let reminders = ReminderService::new(
            fx.db.clone(),
            notifications.clone(),
            "https://app.example.com".to_string(),
            Duration::from_secs(3600),
        );
        let now = Utc::now();

        let first = reminders.run_once(today, now).await.unwrap();
        assert_eq!(first.reminders, JobReport { sent: 0, failed: 0, skipped: 2 });
        for hours in 1..=4 {
            reminders
                .run_once(today, now + chrono::Duration::hours(hours))
                .await
                .unwrap();
        }
        let logs = notifications.logs(&NotificationLogFilter::default()).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert!(logs.iter().all(|l| l.status == DeliveryStatus::Skipped));

        reminders
            .run_once(today, now + chrono::Duration::hours(25))
            .await
            .unwrap();
        let logs = notifications.logs(&NotificationLogFilter::default()).await.unwrap();
        assert_eq!(logs.len(), 4);
    }

    #[tokio::test]
    async fn invitations_go_to_pending_evaluators() {
        let today = Utc::now().date_naive();
        let (fx, reminders, sender, evaluations) = setup(today, today + Days::new(14)).await;
        let event = evaluations.list(Some(fx.program), None).await.unwrap().remove(0);

        let report = reminders
            .send_invitations(event.id, fx.program, fx.admin)
            .await
            .unwrap();
        assert_eq!(report, JobReport { sent: 2, failed: 0, skipped: 0 });
        let sent = sender.sent.lock().unwrap();
        assert!(sent.iter().all(|m| m.subject == "Evaluation Request: Annual"));
    }

    #[tokio::test]
    async fn nothing_is_sent_outside_the_reminder_window() {
        let today = Utc::now().date_naive();
        let (_fx, reminders, sender, _) = setup(today, today + Days::new(10)).await;
        let report = reminders.run_once(today, Utc::now()).await.unwrap();
        assert_eq!(report, ReminderRunReport::default());
        assert!(sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn lapsed_assignments_become_overdue_once() {
        let today = Utc::now().date_naive();
        let (fx, reminders, sender, evaluations) =
            setup(today - Days::new(10), today - Days::new(1)).await;

        let report = reminders.run_once(today, Utc::now()).await.unwrap();
        assert_eq!(report.missed_deadlines.sent, 2);
        assert_eq!(report.reminders, JobReport::default());

        let events = evaluations.list(Some(fx.program), None).await.unwrap();
        let summary = evaluations.summary(events[0].id).await.unwrap();
        assert_eq!(summary.assignments.overdue, 2);
        assert_eq!(sender.sent.lock().unwrap().len(), 2);

        let rerun = reminders.run_once(today, Utc::now()).await.unwrap();
        assert_eq!(rerun.missed_deadlines, JobReport::default());

        // the manager evaluated by both reports is not the one notified
        let inbox = UserNotification::find_for_user(&fx.db.pool, fx.staff_a, true)
            .await
            .unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].notification_type, "evaluation_overdue");
    }
}
