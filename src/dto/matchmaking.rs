//! DTO definitions for matchmaking and match inspection.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    dao::models::MatchRecord,
    dto::validation::validate_identifier,
    services::matchmaking_service::{MatchOutcome, RankSpec},
    state::match_session::SessionSnapshot,
};

/// Request to enter ranked matchmaking.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StartMatchRequest {
    #[validate(length(max = 128), custom(function = "validate_identifier"))]
    pub user_id: String,
    /// Tier name (e.g. `"Elder"`) or a score in `1..=10`.
    pub rank: RankInput,
}

/// Rank as sent by clients: a number, or a string holding a tier name or a number.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
#[serde(untagged)]
pub enum RankInput {
    Score(i64),
    Name(String),
}

impl From<RankInput> for RankSpec {
    fn from(value: RankInput) -> Self {
        match value {
            RankInput::Score(score) => RankSpec::Score(score),
            RankInput::Name(name) => RankSpec::Name(name),
        }
    }
}

/// Outcome of a matchmaking request.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartMatchResponse {
    pub match_found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opponent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_id: Option<String>,
}

impl From<MatchOutcome> for StartMatchResponse {
    fn from(outcome: MatchOutcome) -> Self {
        match outcome {
            MatchOutcome::Queued => Self {
                match_found: false,
                opponent: None,
                game_id: None,
            },
            MatchOutcome::Matched { opponent, match_id } => Self {
                match_found: true,
                opponent: Some(opponent),
                game_id: Some(match_id),
            },
        }
    }
}

/// Result of leaving the waiting pool.
#[derive(Debug, Serialize, ToSchema)]
pub struct LeaveQueueResponse {
    /// Whether the player was waiting.
    pub removed: bool,
}

/// Score of one player in a match.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlayerScoreView {
    pub xp: i64,
    pub correct_answers: u32,
}

/// Read-only view of a match.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MatchView {
    pub game_id: String,
    pub players: Vec<String>,
    #[schema(value_type = Object)]
    pub scores: IndexMap<String, PlayerScoreView>,
    pub question_count: usize,
    /// Questions answered by at least one player.
    pub answered_questions: usize,
    /// Round phase of the live session, absent when no session runs in this process.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round_index: Option<usize>,
}

impl MatchView {
    pub fn new(match_id: String, record: MatchRecord, session: Option<SessionSnapshot>) -> Self {
        let scores = record
            .stats
            .iter()
            .map(|(player_id, stats)| {
                (
                    player_id.clone(),
                    PlayerScoreView {
                        xp: stats.xp,
                        correct_answers: stats.correct_count,
                    },
                )
            })
            .collect();
        let answered_questions = record
            .questions
            .iter()
            .filter(|question| question.response_count() > 0)
            .count();

        Self {
            game_id: match_id,
            players: record.players,
            scores,
            question_count: record.questions.len(),
            answered_questions,
            phase: session.as_ref().map(|snapshot| snapshot.phase.to_owned()),
            round_index: session.and_then(|snapshot| snapshot.round_index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_accepts_numbers_and_names() {
        let request: StartMatchRequest =
            serde_json::from_str(r#"{"userId": "alice", "rank": 5}"#).unwrap();
        assert!(matches!(request.rank, RankInput::Score(5)));

        let request: StartMatchRequest =
            serde_json::from_str(r#"{"userId": "alice", "rank": "Elder"}"#).unwrap();
        assert!(matches!(request.rank, RankInput::Name(ref name) if name == "Elder"));
    }

    #[test]
    fn queued_response_omits_match_fields() {
        let value = serde_json::to_value(StartMatchResponse::from(MatchOutcome::Queued)).unwrap();
        assert_eq!(value, serde_json::json!({"matchFound": false}));
    }
}
