use mongodb::bson::DateTime;
use serde::{Deserialize, Serialize};

use crate::dao::models::{ContestEntity, QuestionEntity, StandingEntity};

pub const QUESTION_COLLECTION_NAME: &str = "quiz_bank";
pub const CONTEST_COLLECTION_NAME: &str = "contests";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoQuestionDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(flatten)]
    pub question: QuestionEntity,
    pub use_count: i64,
    pub created_at: DateTime,
}

impl MongoQuestionDocument {
    /// Wrap a generated question; callers assign the id beforehand.
    pub fn generated(id: String, mut question: QuestionEntity) -> Self {
        question.id = None;
        question.responses = None;
        Self {
            id,
            question,
            use_count: 1,
            created_at: DateTime::now(),
        }
    }
}

impl From<MongoQuestionDocument> for QuestionEntity {
    fn from(doc: MongoQuestionDocument) -> Self {
        Self {
            id: Some(doc.id),
            ..doc.question
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoContestDocument {
    #[serde(rename = "_id")]
    pub match_id: String,
    pub winner: StandingEntity,
    pub loser: StandingEntity,
    pub draw: bool,
    pub questions: Vec<QuestionEntity>,
    pub finished_at: DateTime,
}

impl From<ContestEntity> for MongoContestDocument {
    fn from(contest: ContestEntity) -> Self {
        Self {
            match_id: contest.match_id,
            winner: contest.winner,
            loser: contest.loser,
            draw: contest.draw,
            questions: contest.questions,
            finished_at: DateTime::from_system_time(contest.finished_at),
        }
    }
}
