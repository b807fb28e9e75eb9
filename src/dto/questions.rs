//! DTO definitions for the question sourcing endpoints.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    config::{MAX_RANK, MIN_RANK},
    dao::models::{AnswerOption, QuestionEntity, QuestionKind},
    dto::validation::validate_identifier,
    services::sourcing_service::{ProvenanceWarning, QuestionSource, SourcingReport},
};

/// Upper bound on AI questions per request.
const MAX_GENERATED: usize = 20;

/// A quiz question as exchanged over HTTP.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub question: String,
    #[serde(rename = "type", default)]
    #[schema(value_type = String, example = "mcq")]
    pub kind: QuestionKind,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub level: u8,
    #[serde(default)]
    pub options: Vec<String>,
    /// Correct option index, or a boolean for true/false questions.
    #[schema(value_type = Object)]
    pub answer: AnswerOption,
    #[serde(default)]
    pub explanation: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    #[schema(value_type = Object)]
    pub format_hints: Value,
}

impl From<QuestionEntity> for QuestionDto {
    fn from(question: QuestionEntity) -> Self {
        Self {
            id: question.id,
            question: question.question,
            kind: question.kind,
            topic: question.topic,
            level: question.level,
            options: question.options,
            answer: question.answer,
            explanation: question.explanation,
            format_hints: question.format_hints,
        }
    }
}

impl From<QuestionDto> for QuestionEntity {
    fn from(question: QuestionDto) -> Self {
        Self {
            id: question.id,
            question: question.question,
            kind: question.kind,
            topic: question.topic,
            level: question.level,
            options: question.options,
            answer: question.answer,
            explanation: question.explanation,
            format_hints: question.format_hints,
            responses: None,
        }
    }
}

fn into_dtos(questions: Vec<QuestionEntity>) -> Vec<QuestionDto> {
    questions.into_iter().map(QuestionDto::from).collect()
}

/// Race the bank against the AI provider for an existing match.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SourceQuestionsRequest {
    #[validate(length(max = 128), custom(function = "validate_identifier"))]
    pub game_id: String,
    /// Falls back to the configured default topic when absent.
    #[serde(default)]
    #[validate(length(max = 200))]
    pub topic: Option<String>,
    #[validate(range(min = 1, max = MAX_GENERATED))]
    pub count: usize,
    #[validate(range(min = MIN_RANK, max = MAX_RANK))]
    pub level: u8,
}

/// Both batches of a sourcing run.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SourceQuestionsResponse {
    /// Questions of the faster source.
    pub questions: Vec<QuestionDto>,
    pub source: QuestionSource,
    pub other_source: QuestionSource,
    pub other_questions: Vec<QuestionDto>,
    pub total_questions: usize,
    /// Present when bank bookkeeping was partial; the response is then a 207.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ProvenanceWarning>,
}

impl From<SourcingReport> for SourceQuestionsResponse {
    fn from(report: SourcingReport) -> Self {
        Self {
            questions: into_dtos(report.questions),
            source: report.source,
            other_source: report.other_source,
            other_questions: into_dtos(report.other_questions),
            total_questions: report.total_questions,
            warnings: report.warnings,
        }
    }
}

/// Fetch least used bank questions of a difficulty.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct BankQuestionsRequest {
    #[validate(range(min = MIN_RANK, max = MAX_RANK))]
    pub level: u8,
}

/// Generate and verify fresh questions.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct GenerateQuestionsRequest {
    #[validate(length(min = 1, max = 200))]
    pub topic: String,
    #[validate(range(min = 1, max = MAX_GENERATED))]
    pub count: usize,
    #[validate(range(min = MIN_RANK, max = MAX_RANK))]
    pub level: u8,
}

/// A list of questions.
#[derive(Debug, Serialize, ToSchema)]
pub struct QuestionsResponse {
    pub questions: Vec<QuestionDto>,
}

impl From<Vec<QuestionEntity>> for QuestionsResponse {
    fn from(questions: Vec<QuestionEntity>) -> Self {
        Self {
            questions: into_dtos(questions),
        }
    }
}

/// Questions to check with the verification model.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct VerifyQuestionsRequest {
    #[validate(length(min = 1, max = 50))]
    pub questions: Vec<QuestionDto>,
}

/// Corrected questions.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedQuestionsResponse {
    pub verified_questions: Vec<QuestionDto>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sourcing_request_bounds_are_enforced() {
        let valid: SourceQuestionsRequest =
            serde_json::from_str(r#"{"gameId": "quiz:1", "count": 3, "level": 4}"#).unwrap();
        assert!(valid.validate().is_ok());
        assert!(valid.topic.is_none());

        let invalid: SourceQuestionsRequest =
            serde_json::from_str(r#"{"gameId": "quiz:1", "count": 0, "level": 11}"#).unwrap();
        let errors = invalid.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("count"));
        assert!(errors.field_errors().contains_key("level"));
    }

    #[test]
    fn question_dto_drops_responses() {
        let raw = r#"{"id":"q1","question":"q","type":"true_false","answer":true,
            "responses":[{"userId":"a","optionNum":true,"timeTaken":3,"xp":13}]}"#;
        let entity: QuestionEntity = serde_json::from_str(raw).unwrap();
        let value = serde_json::to_value(QuestionDto::from(entity)).unwrap();
        assert!(value.get("responses").is_none());
        assert_eq!(value["type"], "true_false");
    }
}
