use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    dao::models::{AnswerOption, QuestionEntity, QuestionKind},
    dto::validation::validate_identifier,
};

#[derive(Debug, Deserialize, Serialize, ToSchema)]
/// Messages accepted from player WebSocket clients, as `{"event": ..., "data": ...}`.
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Must be the first message of every connection.
    JoinRoom(JoinRoomPayload),
    /// Reload the questions of the match.
    ReadyCheck(GameRef),
    /// Open the next round, or finish the match after the last one.
    NextQuestion(GameRef),
    Answered(AnswerPayload),
}

impl ClientMessage {
    /// Parse and validate a text frame.
    pub fn from_json_str(raw: &str) -> Result<Self, String> {
        let message: Self = serde_json::from_str(raw).map_err(|err| err.to_string())?;
        let validation = match &message {
            ClientMessage::JoinRoom(payload) => payload.validate(),
            ClientMessage::ReadyCheck(payload) | ClientMessage::NextQuestion(payload) => {
                payload.validate()
            }
            ClientMessage::Answered(payload) => payload.validate(),
        };
        validation.map_err(|err| err.to_string())?;
        Ok(message)
    }

    /// Match the message refers to.
    pub fn game_id(&self) -> &str {
        match self {
            ClientMessage::JoinRoom(payload) => &payload.game_id,
            ClientMessage::ReadyCheck(payload) | ClientMessage::NextQuestion(payload) => {
                &payload.game_id
            }
            ClientMessage::Answered(payload) => &payload.game_id,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomPayload {
    #[validate(length(max = 128), custom(function = "validate_identifier"))]
    pub user_id: String,
    #[validate(length(max = 128), custom(function = "validate_identifier"))]
    pub game_id: String,
}

#[derive(Debug, Deserialize, Serialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GameRef {
    #[validate(length(max = 128), custom(function = "validate_identifier"))]
    pub game_id: String,
}

#[derive(Debug, Deserialize, Serialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
/// A player's answer to the open round.
pub struct AnswerPayload {
    #[validate(length(max = 128), custom(function = "validate_identifier"))]
    pub user_id: String,
    #[validate(length(max = 128), custom(function = "validate_identifier"))]
    pub game_id: String,
    /// Option index, or a boolean for true/false questions.
    #[schema(value_type = Object)]
    pub option_num: AnswerOption,
    /// Seconds since the round opened.
    #[validate(range(min = 0.0))]
    pub time: f64,
}

#[derive(Debug, Clone, Serialize)]
/// Events pushed to every connection of a match room, as `{"event": ..., "data": ...}`.
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Sent only to the connection that joined.
    Joined(JoinedPayload),
    Question(PublicQuestion),
    /// Seconds left in the open round.
    Timer(u32),
    TimeOut,
    /// A player answered correctly and the round closed.
    Answered(AnswerBroadcast),
    /// Both players answered and nobody was right.
    RoomMessage(RoomMessagePayload),
    QuizComplete,
    /// Sent only to the connection whose request failed.
    ErrorMessage(ErrorPayload),
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Acknowledgement of a successful `join-room`.
pub struct JoinedPayload {
    pub game_id: String,
    pub user_id: String,
    pub question_count: usize,
    pub phase: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// A question without its answer or explanation.
pub struct PublicQuestion {
    pub id: String,
    pub question: String,
    #[serde(rename = "type")]
    #[schema(value_type = String)]
    pub kind: QuestionKind,
    pub topic: String,
    pub level: u8,
    pub options: Vec<String>,
    /// Position in play order, starting at zero.
    pub index: usize,
    pub total: usize,
}

impl PublicQuestion {
    pub fn new(id: String, question: &QuestionEntity, index: usize, total: usize) -> Self {
        Self {
            id,
            question: question.question.clone(),
            kind: question.kind.clone(),
            topic: question.topic.clone(),
            level: question.level,
            options: question.options.clone(),
            index,
            total,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AnswerBroadcast {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "gameId")]
    pub game_id: String,
    #[serde(rename = "optionNum")]
    #[schema(value_type = Object)]
    pub option_num: AnswerOption,
    #[serde(rename = "XP")]
    pub xp: i64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RoomMessagePayload {
    pub message: String,
    /// Text of the correct answer.
    pub answer: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ErrorPayload {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn client_events_use_kebab_case_tags() {
        let raw = r#"{"event":"answered","data":{"userId":"alice","gameId":"quiz:1","optionNum":"2","time":12.4}}"#;
        let ClientMessage::Answered(payload) = ClientMessage::from_json_str(raw).unwrap() else {
            panic!("expected an answer");
        };
        assert_eq!(payload.option_num, AnswerOption::Index(2));
        assert_eq!(payload.game_id, "quiz:1");

        let raw = r#"{"event":"next-question","data":{"gameId":"quiz:1"}}"#;
        assert!(matches!(
            ClientMessage::from_json_str(raw).unwrap(),
            ClientMessage::NextQuestion(_)
        ));
    }

    #[test]
    fn invalid_client_messages_are_rejected() {
        assert!(ClientMessage::from_json_str(r#"{"event":"buzz","data":{}}"#).is_err());
        assert!(
            ClientMessage::from_json_str(r#"{"event":"join-room","data":{"userId":"","gameId":"g"}}"#)
                .is_err()
        );
        assert!(ClientMessage::from_json_str(
            r#"{"event":"answered","data":{"userId":"a","gameId":"g","optionNum":0,"time":-3}}"#
        )
        .is_err());
    }

    #[test]
    fn server_events_match_the_room_protocol() {
        let answered = ServerMessage::Answered(AnswerBroadcast {
            user_id: "alice".into(),
            game_id: "quiz:1".into(),
            option_num: AnswerOption::Index(1),
            xp: 22,
        });
        assert_eq!(
            serde_json::to_value(&answered).unwrap(),
            json!({"event": "answered", "data": {"userId": "alice", "gameId": "quiz:1", "optionNum": 1, "XP": 22}})
        );
        assert_eq!(
            serde_json::to_value(ServerMessage::Timer(29)).unwrap(),
            json!({"event": "timer", "data": 29})
        );
        assert_eq!(
            serde_json::to_value(ServerMessage::TimeOut).unwrap(),
            json!({"event": "time-out"})
        );
        assert_eq!(
            serde_json::to_value(ServerMessage::QuizComplete).unwrap(),
            json!({"event": "quiz-complete"})
        );
        let error = ServerMessage::ErrorMessage(ErrorPayload {
            error: "round closed".into(),
        });
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!({"event": "error-message", "data": {"error": "round closed"}})
        );
    }
}
