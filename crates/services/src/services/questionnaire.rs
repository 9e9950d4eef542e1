use std::collections::HashSet;

use db::{
    DBService,
    models::{
        program::Program,
        questionnaire::{CreateQuestionnaire, Questionnaire, Section, UpdateQuestionnaire},
    },
};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum QuestionnaireError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("questionnaire not found")]
    NotFound,
    #[error("program not found")]
    ProgramNotFound,
    #[error("questionnaire is invalid")]
    Invalid(Vec<String>),
}

/// Every problem with a questionnaire's title and sections, in document order.
pub fn validate(title: &str, sections: &[Section]) -> Vec<String> {
    let mut errors = Vec::new();
    if title.trim().is_empty() {
        errors.push("title is required".to_string());
    }

    let mut section_ids = HashSet::new();
    let mut question_ids = HashSet::new();
    for section in sections {
        if section.id.trim().is_empty() {
            errors.push("section id is required".to_string());
        } else if !section_ids.insert(section.id.as_str()) {
            errors.push(format!("duplicate section id '{}'", section.id));
        }

        for question in &section.questions {
            if question.id.trim().is_empty() {
                errors.push(format!("section '{}': question id is required", section.id));
            } else if !question_ids.insert(question.id.as_str()) {
                errors.push(format!("duplicate question id '{}'", question.id));
            }
            if question.text.trim().is_empty() {
                errors.push(format!("question '{}': text is required", question.id));
            }
            if question.question_type.needs_options() && question.options.len() < 2 {
                errors.push(format!(
                    "question '{}': {} needs at least two options",
                    question.id, question.question_type
                ));
            }
        }
    }
    errors
}

#[derive(Clone)]
pub struct QuestionnaireService {
    db: DBService,
}

impl QuestionnaireService {
    pub fn new(db: DBService) -> Self {
        Self { db }
    }

    pub async fn get(&self, id: Uuid) -> Result<Questionnaire, QuestionnaireError> {
        Questionnaire::find_by_id(&self.db.pool, id)
            .await?
            .ok_or(QuestionnaireError::NotFound)
    }

    pub async fn list(&self, program_id: Option<Uuid>) -> Result<Vec<Questionnaire>, QuestionnaireError> {
        Ok(Questionnaire::find_all(&self.db.pool, program_id).await?)
    }

    pub async fn create(
        &self,
        data: &CreateQuestionnaire,
        created_by: Uuid,
    ) -> Result<Questionnaire, QuestionnaireError> {
        let errors = validate(&data.title, &data.sections);
        if !errors.is_empty() {
            return Err(QuestionnaireError::Invalid(errors));
        }
        if Program::find_by_id(&self.db.pool, data.program_id)
            .await?
            .is_none()
        {
            return Err(QuestionnaireError::ProgramNotFound);
        }

        let questionnaire = Questionnaire::create(&self.db.pool, data, Some(created_by)).await?;
        info!(
            questionnaire_id = %questionnaire.id,
            questions = questionnaire.question_count(),
            "Questionnaire created"
        );
        Ok(questionnaire)
    }

    pub async fn update(
        &self,
        id: Uuid,
        data: &UpdateQuestionnaire,
    ) -> Result<Questionnaire, QuestionnaireError> {
        let current = self.get(id).await?;
        let title = data.title.as_deref().unwrap_or(&current.title);
        let sections = data.sections.as_deref().unwrap_or(&current.sections.0);
        let errors = validate(title, sections);
        if !errors.is_empty() {
            return Err(QuestionnaireError::Invalid(errors));
        }

        Questionnaire::update(&self.db.pool, id, data)
            .await?
            .ok_or(QuestionnaireError::NotFound)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), QuestionnaireError> {
        if Questionnaire::delete(&self.db.pool, id).await? == 0 {
            return Err(QuestionnaireError::NotFound);
        }
        info!(questionnaire_id = %id, "Questionnaire deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use db::models::questionnaire::{Question, QuestionType};

    use super::*;
    use crate::services::test_support;

    fn question(id: &str, question_type: QuestionType, options: &[&str]) -> Question {
        Question {
            id: id.to_string(),
            text: format!("Question {id}"),
            question_type,
            required: true,
            options: options.iter().map(|o| o.to_string()).collect(),
        }
    }

    fn section(id: &str, questions: Vec<Question>) -> Section {
        Section {
            id: id.to_string(),
            title: id.to_uppercase(),
            questions,
        }
    }

    #[test]
    fn valid_questionnaire_has_no_errors() {
        let sections = vec![
            section("s1", vec![question("q1", QuestionType::Rating, &[])]),
            section(
                "s2",
                vec![question("q2", QuestionType::SingleChoice, &["Yes", "No"])],
            ),
        ];
        assert!(validate("Leadership 360", &sections).is_empty());
    }

    #[test]
    fn reports_every_problem() {
        let sections = vec![
            section("s1", vec![question("q1", QuestionType::Text, &[])]),
            section(
                "s1",
                vec![
                    question("q1", QuestionType::MultipleChoice, &["only"]),
                    question("", QuestionType::Text, &[]),
                ],
            ),
        ];
        let errors = validate(" ", &sections);
        assert_eq!(
            errors,
            vec![
                "title is required".to_string(),
                "duplicate section id 's1'".to_string(),
                "duplicate question id 'q1'".to_string(),
                "question 'q1': multiple_choice needs at least two options".to_string(),
                "section 's1': question id is required".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn update_is_validated_against_merged_state() {
        let db = test_support::db().await;
        let program = test_support::program(&db).await;
        let author = test_support::user(&db, "Author", db::models::user::UserRole::Admin, None).await;
        let service = QuestionnaireService::new(db.clone());

        let created = service
            .create(
                &CreateQuestionnaire {
                    program_id: program.id,
                    title: "Pulse".to_string(),
                    description: None,
                    sections: vec![section("s1", vec![question("q1", QuestionType::YesNo, &[])])],
                },
                author.id,
            )
            .await
            .unwrap();
        assert_eq!(created.question_count(), 1);

        let err = service
            .update(
                created.id,
                &UpdateQuestionnaire {
                    title: Some(String::new()),
                    description: None,
                    status: None,
                    sections: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, QuestionnaireError::Invalid(errors) if errors.len() == 1));

        service.delete(created.id).await.unwrap();
        assert!(matches!(
            service.delete(created.id).await.unwrap_err(),
            QuestionnaireError::NotFound
        ));
    }
}
