//! Evaluation events: status transitions, assignment generation from the program hierarchy
//! and the evaluator-facing assignment lifecycle.

use std::collections::{BTreeMap, HashSet};

use db::{
    DBService,
    models::{
        evaluation_assignment::{
            AssignmentPair, AssignmentStatus, AssignmentStatusCounts, EvaluationAssignment,
            EvaluatorType, MyAssignment,
        },
        evaluation_event::{
            CreateEvaluationEvent, EvaluationEvent, EvaluationStatus, EvaluationType,
            UpdateEvaluationEvent,
        },
        program::Program,
        questionnaire::Questionnaire,
        user_role_hierarchy::UserRoleHierarchy,
    },
};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use ts_rs::TS;
use utils::token::generate_token;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("evaluation event not found")]
    EventNotFound,
    #[error("evaluation assignment not found")]
    AssignmentNotFound,
    #[error("program not found")]
    ProgramNotFound,
    #[error("questionnaire not found")]
    QuestionnaireNotFound,
    #[error("{0}")]
    Validation(String),
    #[error("cannot change evaluation status from {from} to {to}")]
    InvalidTransition {
        from: EvaluationStatus,
        to: EvaluationStatus,
    },
    #[error("only draft evaluations can be modified (current status: {status})")]
    NotEditable { status: EvaluationStatus },
    #[error("assignments cannot be generated for a {status} evaluation")]
    GenerationNotAllowed { status: EvaluationStatus },
    #[error("evaluation is not accepting responses (status: {status})")]
    EventNotOpen { status: EvaluationStatus },
    #[error("assignment is already {status}")]
    AssignmentClosed { status: AssignmentStatus },
}

#[derive(Debug, Clone, Copy, Serialize, TS)]
pub struct GenerationReport {
    pub created: usize,
    pub skipped: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, TS)]
pub struct EventSummary {
    pub event: EvaluationEvent,
    pub assignments: AssignmentStatusCounts,
}

fn push_unique(
    pairs: &mut Vec<AssignmentPair>,
    seen: &mut HashSet<(Uuid, Uuid)>,
    evaluator_id: Uuid,
    evaluatee_id: Uuid,
    evaluator_type: EvaluatorType,
) {
    if seen.insert((evaluator_id, evaluatee_id)) {
        pairs.push(AssignmentPair {
            evaluator_id,
            evaluatee_id,
            evaluator_type,
        });
    }
}

/// Evaluator/evaluatee pairs for an evaluation type, derived from a program's hierarchy rows.
///
/// The output is deduplicated on (evaluator, evaluatee) with the first relationship winning,
/// so a 360 review lists manager, subordinate, peer and self pairs in that order.
pub fn plan_assignments(
    evaluation_type: EvaluationType,
    rows: &[UserRoleHierarchy],
) -> Vec<AssignmentPair> {
    let mut pairs = Vec::new();
    let mut seen = HashSet::new();

    let edges: Vec<(Uuid, Uuid)> = rows
        .iter()
        .filter_map(|r| r.manager_user_id.map(|m| (m, r.user_id)))
        .filter(|(m, u)| m != u)
        .collect();

    let (manager_down, report_up, peers, own) = match evaluation_type {
        EvaluationType::ManagerToSubordinate => (true, false, false, false),
        EvaluationType::SubordinateToManager => (false, true, false, false),
        EvaluationType::Peer => (false, false, true, false),
        EvaluationType::SelfReview => (false, false, false, true),
        EvaluationType::ThreeSixty => (true, true, true, true),
    };

    if manager_down {
        for &(manager, report) in &edges {
            push_unique(&mut pairs, &mut seen, manager, report, EvaluatorType::Manager);
        }
    }
    if report_up {
        for &(manager, report) in &edges {
            push_unique(&mut pairs, &mut seen, report, manager, EvaluatorType::Subordinate);
        }
    }
    if peers {
        let mut teams: BTreeMap<Uuid, Vec<Uuid>> = BTreeMap::new();
        for &(manager, report) in &edges {
            teams.entry(manager).or_default().push(report);
        }
        for team in teams.values() {
            for &a in team {
                for &b in team {
                    if a != b {
                        push_unique(&mut pairs, &mut seen, a, b, EvaluatorType::Peer);
                    }
                }
            }
        }
    }
    if own {
        let mut members = Vec::new();
        let mut known = HashSet::new();
        for row in rows {
            for id in std::iter::once(row.user_id).chain(row.manager_user_id) {
                if known.insert(id) {
                    members.push(id);
                }
            }
        }
        for id in members {
            push_unique(&mut pairs, &mut seen, id, id, EvaluatorType::SelfReview);
        }
    }

    pairs
}

fn validate_dates(event: &CreateEvaluationEvent) -> Result<(), EvaluationError> {
    if event.name.trim().is_empty() {
        return Err(EvaluationError::Validation("name is required".to_string()));
    }
    if event.end_date < event.start_date {
        return Err(EvaluationError::Validation(
            "end_date must not be before start_date".to_string(),
        ));
    }
    if event.reminder_days_before.is_some_and(|d| d < 0) {
        return Err(EvaluationError::Validation(
            "reminder_days_before must not be negative".to_string(),
        ));
    }
    Ok(())
}

#[derive(Clone)]
pub struct EvaluationService {
    db: DBService,
}

impl EvaluationService {
    pub fn new(db: DBService) -> Self {
        Self { db }
    }

    pub async fn get(&self, id: Uuid) -> Result<EvaluationEvent, EvaluationError> {
        EvaluationEvent::find_by_id(&self.db.pool, id)
            .await?
            .ok_or(EvaluationError::EventNotFound)
    }

    pub async fn list(
        &self,
        program_id: Option<Uuid>,
        status: Option<EvaluationStatus>,
    ) -> Result<Vec<EvaluationEvent>, EvaluationError> {
        Ok(EvaluationEvent::find_all(&self.db.pool, program_id, status).await?)
    }

    pub async fn create(
        &self,
        data: &CreateEvaluationEvent,
        created_by: Uuid,
    ) -> Result<EvaluationEvent, EvaluationError> {
        validate_dates(data)?;
        if Program::find_by_id(&self.db.pool, data.program_id)
            .await?
            .is_none()
        {
            return Err(EvaluationError::ProgramNotFound);
        }
        if let Some(questionnaire_id) = data.questionnaire_id {
            if Questionnaire::find_by_id(&self.db.pool, questionnaire_id)
                .await?
                .is_none()
            {
                return Err(EvaluationError::QuestionnaireNotFound);
            }
        }

        let event = EvaluationEvent::create(&self.db.pool, data, Some(created_by)).await?;
        info!(
            evaluation_event_id = %event.id,
            program_id = %event.program_id,
            evaluation_type = %event.evaluation_type,
            "Evaluation event created"
        );
        Ok(event)
    }

    pub async fn update(
        &self,
        id: Uuid,
        data: &UpdateEvaluationEvent,
    ) -> Result<EvaluationEvent, EvaluationError> {
        let current = self.get(id).await?;
        if !current.status.is_editable() {
            return Err(EvaluationError::NotEditable {
                status: current.status,
            });
        }
        let start = data.start_date.unwrap_or(current.start_date);
        let end = data.end_date.unwrap_or(current.end_date);
        if end < start {
            return Err(EvaluationError::Validation(
                "end_date must not be before start_date".to_string(),
            ));
        }
        if data.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(EvaluationError::Validation("name is required".to_string()));
        }

        EvaluationEvent::update(&self.db.pool, id, data)
            .await?
            .ok_or(EvaluationError::EventNotFound)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), EvaluationError> {
        let current = self.get(id).await?;
        if !current.status.is_editable() {
            return Err(EvaluationError::NotEditable {
                status: current.status,
            });
        }
        EvaluationEvent::delete(&self.db.pool, id).await?;
        info!(evaluation_event_id = %id, "Evaluation event deleted");
        Ok(())
    }

    /// Move an event to `to` if the state machine allows it from its current status.
    pub async fn transition(
        &self,
        id: Uuid,
        to: EvaluationStatus,
    ) -> Result<EvaluationEvent, EvaluationError> {
        let current = self.get(id).await?;
        if !current.status.can_transition_to(to) {
            warn!(
                evaluation_event_id = %id,
                from = %current.status,
                to = %to,
                "Rejected evaluation status change"
            );
            return Err(EvaluationError::InvalidTransition {
                from: current.status,
                to,
            });
        }

        match EvaluationEvent::update_status(&self.db.pool, id, current.status, to).await? {
            Some(event) => {
                info!(evaluation_event_id = %id, from = %current.status, to = %to, "Evaluation status changed");
                Ok(event)
            }
            // changed underneath us; report against the status it has now
            None => {
                let now = self.get(id).await?;
                Err(EvaluationError::InvalidTransition {
                    from: now.status,
                    to,
                })
            }
        }
    }

    pub async fn activate(&self, id: Uuid) -> Result<EvaluationEvent, EvaluationError> {
        self.transition(id, EvaluationStatus::Active).await
    }

    pub async fn pause(&self, id: Uuid) -> Result<EvaluationEvent, EvaluationError> {
        self.transition(id, EvaluationStatus::Paused).await
    }

    pub async fn complete(&self, id: Uuid) -> Result<EvaluationEvent, EvaluationError> {
        self.transition(id, EvaluationStatus::Completed).await
    }

    /// Create the event's missing assignments from the program hierarchy in one transaction.
    pub async fn generate_assignments(
        &self,
        event_id: Uuid,
    ) -> Result<GenerationReport, EvaluationError> {
        let mut tx = self.db.pool.begin().await?;

        let event = EvaluationEvent::find_by_id(&mut *tx, event_id)
            .await?
            .ok_or(EvaluationError::EventNotFound)?;
        if !matches!(
            event.status,
            EvaluationStatus::Draft | EvaluationStatus::Active
        ) {
            return Err(EvaluationError::GenerationNotAllowed {
                status: event.status,
            });
        }

        let rows = UserRoleHierarchy::find_by_program(&mut *tx, event.program_id).await?;
        let planned = plan_assignments(event.evaluation_type, &rows);
        let existing: HashSet<(Uuid, Uuid)> =
            EvaluationAssignment::existing_pairs(&mut *tx, event_id)
                .await?
                .into_iter()
                .collect();

        let mut created = 0;
        for pair in planned
            .iter()
            .filter(|p| !existing.contains(&(p.evaluator_id, p.evaluatee_id)))
        {
            EvaluationAssignment::insert(
                &mut *tx,
                event_id,
                pair,
                &generate_token(),
                Some(event.end_date),
            )
            .await?;
            created += 1;
        }
        tx.commit().await?;

        let report = GenerationReport {
            created,
            skipped: planned.len() - created,
            total: planned.len(),
        };
        info!(
            evaluation_event_id = %event_id,
            evaluation_type = %event.evaluation_type,
            created = report.created,
            skipped = report.skipped,
            "Generated evaluation assignments"
        );
        Ok(report)
    }

    pub async fn summary(&self, event_id: Uuid) -> Result<EventSummary, EvaluationError> {
        let event = self.get(event_id).await?;
        let assignments = EvaluationAssignment::count_by_status(&self.db.pool, event_id).await?;
        Ok(EventSummary { event, assignments })
    }

    pub async fn assignments(
        &self,
        event_id: Uuid,
        status: Option<AssignmentStatus>,
    ) -> Result<Vec<EvaluationAssignment>, EvaluationError> {
        self.get(event_id).await?;
        Ok(EvaluationAssignment::find_by_event(&self.db.pool, event_id, status).await?)
    }

    pub async fn my_assignments(&self, user_id: Uuid) -> Result<Vec<MyAssignment>, EvaluationError> {
        Ok(EvaluationAssignment::find_for_evaluator(&self.db.pool, user_id).await?)
    }

    async fn open_assignment(
        &self,
        access_token: &str,
    ) -> Result<EvaluationAssignment, EvaluationError> {
        let assignment = EvaluationAssignment::find_by_access_token(&self.db.pool, access_token)
            .await?
            .ok_or(EvaluationError::AssignmentNotFound)?;
        let event = self.get(assignment.evaluation_event_id).await?;
        if event.status != EvaluationStatus::Active {
            return Err(EvaluationError::EventNotOpen {
                status: event.status,
            });
        }
        if !assignment.status.is_open() {
            return Err(EvaluationError::AssignmentClosed {
                status: assignment.status,
            });
        }
        Ok(assignment)
    }

    /// Open an assignment by its access token, moving it to in_progress on first visit.
    pub async fn start(&self, access_token: &str) -> Result<EvaluationAssignment, EvaluationError> {
        let assignment = self.open_assignment(access_token).await?;
        if assignment.status == AssignmentStatus::Pending {
            if let Some(started) =
                EvaluationAssignment::mark_started(&self.db.pool, assignment.id).await?
            {
                return Ok(started);
            }
        }
        Ok(assignment)
    }

    pub async fn submit(
        &self,
        access_token: &str,
        responses: &serde_json::Value,
    ) -> Result<EvaluationAssignment, EvaluationError> {
        if !responses.is_object() {
            return Err(EvaluationError::Validation(
                "responses must be a JSON object".to_string(),
            ));
        }
        let assignment = self.open_assignment(access_token).await?;
        let submitted = EvaluationAssignment::submit(&self.db.pool, assignment.id, responses)
            .await?
            .ok_or(EvaluationError::AssignmentClosed {
                status: AssignmentStatus::Completed,
            })?;
        info!(
            assignment_id = %submitted.id,
            evaluation_event_id = %submitted.evaluation_event_id,
            "Evaluation submitted"
        );
        Ok(submitted)
    }

    pub async fn skip(&self, assignment_id: Uuid) -> Result<EvaluationAssignment, EvaluationError> {
        let assignment = EvaluationAssignment::find_by_id(&self.db.pool, assignment_id)
            .await?
            .ok_or(EvaluationError::AssignmentNotFound)?;
        if !assignment.status.is_open() {
            return Err(EvaluationError::AssignmentClosed {
                status: assignment.status,
            });
        }
        EvaluationAssignment::update_status(&self.db.pool, assignment_id, AssignmentStatus::Skipped)
            .await?
            .ok_or(EvaluationError::AssignmentNotFound)
    }

    pub async fn delete_assignment(&self, assignment_id: Uuid) -> Result<(), EvaluationError> {
        let assignment = EvaluationAssignment::find_by_id(&self.db.pool, assignment_id)
            .await?
            .ok_or(EvaluationError::AssignmentNotFound)?;
        if EvaluationAssignment::delete_if_unanswered(&self.db.pool, assignment_id).await? == 0 {
            return Err(EvaluationError::AssignmentClosed {
                status: assignment.status,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Days, Utc};
    use serde_json::json;

    use super::*;
    use crate::services::test_support;

    fn row(user_id: Uuid, manager_user_id: Option<Uuid>) -> UserRoleHierarchy {
        let now = Utc::now();
        UserRoleHierarchy {
            id: Uuid::new_v4(),
            user_id,
            program_id: Uuid::nil(),
            hierarchical_role_id: Uuid::nil(),
            manager_user_id,
            assigned_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    fn count(pairs: &[AssignmentPair], kind: EvaluatorType) -> usize {
        pairs.iter().filter(|p| p.evaluator_type == kind).count()
    }

    #[test]
    fn planning_follows_the_reporting_lines() {
        let (lead, a, b) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let rows = vec![row(lead, None), row(a, Some(lead)), row(b, Some(lead))];

        let down = plan_assignments(EvaluationType::ManagerToSubordinate, &rows);
        assert_eq!(down.len(), 2);
        assert!(down.iter().all(|p| p.evaluator_id == lead));

        let up = plan_assignments(EvaluationType::SubordinateToManager, &rows);
        assert_eq!(up.len(), 2);
        assert!(up.iter().all(|p| p.evaluatee_id == lead));

        let peer = plan_assignments(EvaluationType::Peer, &rows);
        assert_eq!(peer.len(), 2);
        assert!(peer.iter().any(|p| p.evaluator_id == a && p.evaluatee_id == b));
        assert!(peer.iter().any(|p| p.evaluator_id == b && p.evaluatee_id == a));

        let own = plan_assignments(EvaluationType::SelfReview, &rows);
        assert_eq!(own.len(), 3);
        assert!(own.iter().all(|p| p.evaluator_id == p.evaluatee_id));
    }

    #[test]
    fn three_sixty_combines_every_relationship_without_duplicates() {
        let (lead, a, b) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let rows = vec![row(lead, None), row(a, Some(lead)), row(b, Some(lead))];

        let pairs = plan_assignments(EvaluationType::ThreeSixty, &rows);
        assert_eq!(pairs.len(), 9);
        assert_eq!(count(&pairs, EvaluatorType::Manager), 2);
        assert_eq!(count(&pairs, EvaluatorType::Subordinate), 2);
        assert_eq!(count(&pairs, EvaluatorType::Peer), 2);
        assert_eq!(count(&pairs, EvaluatorType::SelfReview), 3);

        let unique: HashSet<_> = pairs.iter().map(|p| (p.evaluator_id, p.evaluatee_id)).collect();
        assert_eq!(unique.len(), pairs.len());
    }

    #[test]
    fn peers_are_grouped_by_manager() {
        let (m1, m2) = (Uuid::new_v4(), Uuid::new_v4());
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let rows = vec![row(a, Some(m1)), row(b, Some(m1)), row(c, Some(m2))];
        let peer = plan_assignments(EvaluationType::Peer, &rows);
        assert_eq!(peer.len(), 2);
        assert!(peer.iter().all(|p| p.evaluator_id != c && p.evaluatee_id != c));
    }

    async fn fixture_with_team() -> (test_support::HierarchyFixture, EvaluationService) {
        let fx = test_support::hierarchy_fixture().await;
        for staff in [fx.staff_a, fx.staff_b] {
            fx.service
                .assign_manager(&fx.request(staff, fx.lead), fx.admin)
                .await
                .unwrap();
        }
        let service = EvaluationService::new(fx.db.clone());
        (fx, service)
    }

    fn new_event(program_id: Uuid, evaluation_type: EvaluationType) -> CreateEvaluationEvent {
        let today = Utc::now().date_naive();
        CreateEvaluationEvent {
            program_id,
            questionnaire_id: None,
            name: "Mid-year review".to_string(),
            description: None,
            evaluation_type,
            start_date: today,
            end_date: today + Days::new(14),
            reminder_days_before: None,
            send_reminders: None,
            is_anonymous: None,
        }
    }

    #[tokio::test]
    async fn status_follows_the_state_machine() {
        let (fx, service) = fixture_with_team().await;
        let event = service
            .create(&new_event(fx.program, EvaluationType::Peer), fx.admin)
            .await
            .unwrap();
        assert_eq!(event.status, EvaluationStatus::Draft);

        let err = service.pause(event.id).await.unwrap_err();
        assert!(matches!(
            err,
            EvaluationError::InvalidTransition {
                from: EvaluationStatus::Draft,
                to: EvaluationStatus::Paused
            }
        ));

        assert_eq!(service.activate(event.id).await.unwrap().status, EvaluationStatus::Active);
        assert_eq!(service.pause(event.id).await.unwrap().status, EvaluationStatus::Paused);
        assert_eq!(service.activate(event.id).await.unwrap().status, EvaluationStatus::Active);

        let err = service
            .update(event.id, &UpdateEvaluationEvent::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EvaluationError::NotEditable { .. }));

        assert_eq!(
            service.complete(event.id).await.unwrap().status,
            EvaluationStatus::Completed
        );
        assert!(matches!(
            service.activate(event.id).await.unwrap_err(),
            EvaluationError::InvalidTransition { .. }
        ));
        assert!(matches!(
            service.generate_assignments(event.id).await.unwrap_err(),
            EvaluationError::GenerationNotAllowed { .. }
        ));
    }

    #[tokio::test]
    async fn rejects_inverted_dates() {
        let (fx, service) = fixture_with_team().await;
        let mut data = new_event(fx.program, EvaluationType::Peer);
        data.end_date = data.start_date - Days::new(1);
        assert!(matches!(
            service.create(&data, fx.admin).await.unwrap_err(),
            EvaluationError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn generation_is_idempotent() {
        let (fx, service) = fixture_with_team().await;
        let event = service
            .create(&new_event(fx.program, EvaluationType::ThreeSixty), fx.admin)
            .await
            .unwrap();

        let first = service.generate_assignments(event.id).await.unwrap();
        assert_eq!(first.created, 9);
        assert_eq!(first.skipped, 0);

        let second = service.generate_assignments(event.id).await.unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.skipped, 9);

        let summary = service.summary(event.id).await.unwrap();
        assert_eq!(summary.assignments.total, 9);
        assert_eq!(summary.assignments.pending, 9);

        let tokens: HashSet<_> = service
            .assignments(event.id, None)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.access_token)
            .collect();
        assert_eq!(tokens.len(), 9);
        assert!(tokens.iter().all(|t| t.len() == 64));
    }

    #[tokio::test]
    async fn evaluator_starts_and_submits_by_token() {
        let (fx, service) = fixture_with_team().await;
        let event = service
            .create(&new_event(fx.program, EvaluationType::ManagerToSubordinate), fx.admin)
            .await
            .unwrap();
        service.generate_assignments(event.id).await.unwrap();

        let assignment = service
            .assignments(event.id, None)
            .await
            .unwrap()
            .remove(0);

        // drafts are not open for answers
        assert!(matches!(
            service.start(&assignment.access_token).await.unwrap_err(),
            EvaluationError::EventNotOpen { .. }
        ));
        assert!(service.my_assignments(fx.lead).await.unwrap().is_empty());

        service.activate(event.id).await.unwrap();
        assert_eq!(service.my_assignments(fx.lead).await.unwrap().len(), 2);

        let started = service.start(&assignment.access_token).await.unwrap();
        assert_eq!(started.status, AssignmentStatus::InProgress);

        let done = service
            .submit(&assignment.access_token, &json!({"q1": 4}))
            .await
            .unwrap();
        assert_eq!(done.status, AssignmentStatus::Completed);
        assert!(done.completed_at.is_some());

        assert!(matches!(
            service
                .submit(&assignment.access_token, &json!({"q1": 5}))
                .await
                .unwrap_err(),
            EvaluationError::AssignmentClosed {
                status: AssignmentStatus::Completed
            }
        ));
        assert!(matches!(
            service.delete_assignment(done.id).await.unwrap_err(),
            EvaluationError::AssignmentClosed { .. }
        ));
    }
}
