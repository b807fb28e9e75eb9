use std::{fmt, time::SystemTime};

use indexmap::IndexMap;
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{self, Visitor},
};
use serde_json::Value;

/// Shared state of a two-player contest, stored as one document per match id.
///
/// The serialized shape (`players`, `GameStats`, `questions`) is the one clients and the
/// session store already agree on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchRecord {
    /// Ordered pair of player ids; the order is stable and breaks exact ties.
    pub players: Vec<String>,
    /// Cumulative stats keyed by player id, in `players` order.
    #[serde(rename = "GameStats")]
    pub stats: IndexMap<String, PlayerStatsEntity>,
    /// Questions in play order.
    #[serde(default)]
    pub questions: Vec<QuestionEntity>,
}

impl MatchRecord {
    /// Build a fresh record for the pair with zeroed stats and no questions.
    pub fn new(first: impl Into<String>, second: impl Into<String>) -> Self {
        let players = vec![first.into(), second.into()];
        let stats = players
            .iter()
            .map(|id| (id.clone(), PlayerStatsEntity::default()))
            .collect();
        Self {
            players,
            stats,
            questions: Vec::new(),
        }
    }

    /// Whether the id belongs to one of the two participants.
    pub fn is_player(&self, player_id: &str) -> bool {
        self.players.iter().any(|id| id == player_id)
    }

    /// Locate a question by its identifier.
    pub fn question(&self, question_id: &str) -> Option<&QuestionEntity> {
        self.questions
            .iter()
            .find(|question| question.id.as_deref() == Some(question_id))
    }

    /// Locate a question by its identifier for in-place mutation.
    pub fn question_mut(&mut self, question_id: &str) -> Option<&mut QuestionEntity> {
        self.questions
            .iter_mut()
            .find(|question| question.id.as_deref() == Some(question_id))
    }
}

/// Per-player accumulated score.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerStatsEntity {
    /// Sum of the xp deltas of every response.
    pub xp: i64,
    /// Number of questions answered correctly.
    #[serde(rename = "no_of_correct_answers")]
    pub correct_count: u32,
}

/// Category of a quiz question as produced by the generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    #[default]
    Mcq,
    TrueFalse,
    FillBlank,
    #[serde(other)]
    Other,
}

/// A quiz question, either reused from the bank or freshly generated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionEntity {
    /// Bank identifier; generated questions receive one before they are written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Question text shown to the players.
    pub question: String,
    #[serde(rename = "type", default)]
    pub kind: QuestionKind,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub level: u8,
    /// Answer choices; empty for true/false questions.
    #[serde(default)]
    pub options: Vec<String>,
    /// Correct option index, or the expected boolean for true/false questions.
    pub answer: AnswerOption,
    #[serde(default)]
    pub explanation: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub format_hints: Value,
    /// Responses recorded during play, absent until the first answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responses: Option<Vec<ResponseEntity>>,
}

impl QuestionEntity {
    /// Whether `player_id` already answered this question.
    pub fn has_response_from(&self, player_id: &str) -> bool {
        self.responses
            .as_ref()
            .is_some_and(|responses| responses.iter().any(|r| r.player_id == player_id))
    }

    /// Number of recorded responses.
    pub fn response_count(&self) -> usize {
        self.responses.as_ref().map_or(0, Vec::len)
    }

    /// Human readable form of the correct answer, resolving indices to option text.
    pub fn answer_text(&self) -> String {
        match self.answer {
            AnswerOption::Index(index) => self
                .options
                .get(index as usize)
                .cloned()
                .unwrap_or_else(|| index.to_string()),
            AnswerOption::Flag(flag) => flag.to_string(),
        }
    }
}

/// A single player's answer to a question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseEntity {
    #[serde(rename = "userId")]
    pub player_id: String,
    #[serde(rename = "optionNum")]
    pub selected: AnswerOption,
    /// Whole seconds elapsed since the round opened.
    #[serde(rename = "timeTaken")]
    pub time_taken: u32,
    /// Xp delta awarded for this response.
    pub xp: i64,
}

/// Either an index into the options or a boolean for true/false questions.
///
/// Generators are loose about the encoding, so numbers, booleans and strings holding either are
/// all accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerOption {
    Index(u32),
    Flag(bool),
}

impl fmt::Display for AnswerOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnswerOption::Index(index) => write!(f, "{index}"),
            AnswerOption::Flag(flag) => write!(f, "{flag}"),
        }
    }
}

impl Serialize for AnswerOption {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            AnswerOption::Index(index) => serializer.serialize_u32(*index),
            AnswerOption::Flag(flag) => serializer.serialize_bool(*flag),
        }
    }
}

impl<'de> Deserialize<'de> for AnswerOption {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(AnswerOptionVisitor)
    }
}

struct AnswerOptionVisitor;

impl Visitor<'_> for AnswerOptionVisitor {
    type Value = AnswerOption;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a non-negative option index or a boolean")
    }

    fn visit_bool<E: de::Error>(self, value: bool) -> Result<Self::Value, E> {
        Ok(AnswerOption::Flag(value))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
        u32::try_from(value)
            .map(AnswerOption::Index)
            .map_err(|_| E::custom(format!("option index {value} out of range")))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
        u64::try_from(value)
            .map_err(|_| E::custom(format!("option index {value} is negative")))
            .and_then(|value| self.visit_u64(value))
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> Result<Self::Value, E> {
        if value.fract() == 0.0 && value >= 0.0 && value <= u32::MAX as f64 {
            Ok(AnswerOption::Index(value as u32))
        } else {
            Err(E::custom(format!("option index {value} is not a whole number")))
        }
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
        let trimmed = value.trim();
        if let Ok(index) = trimmed.parse::<u32>() {
            return Ok(AnswerOption::Index(index));
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "true" => Ok(AnswerOption::Flag(true)),
            "false" => Ok(AnswerOption::Flag(false)),
            _ => Err(E::custom(format!("unrecognised answer `{value}`"))),
        }
    }
}

/// A player waiting in the ranked pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolEntry {
    pub player_id: String,
    /// Skill score in `1..=10`.
    pub rank: u8,
    pub joined_at: SystemTime,
}

/// Outcome of trying to remove a pair of players from the waiting pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairClaim {
    /// Both players were removed.
    Claimed,
    /// The candidate was already removed by someone else; nothing changed.
    CandidateTaken,
    /// The requesting player was already removed by someone else; nothing changed.
    SelfTaken,
}

/// Final standings of a participant in a finished contest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StandingEntity {
    pub player_id: String,
    pub xp: i64,
    pub correct_count: u32,
}

/// Persisted outcome of a finished match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContestEntity {
    pub match_id: String,
    pub winner: StandingEntity,
    pub loser: StandingEntity,
    /// Set when both players ended with identical correct answers and xp.
    pub draw: bool,
    /// Every question played, with the responses attached.
    pub questions: Vec<QuestionEntity>,
    pub finished_at: SystemTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_record_uses_the_session_document_shape() {
        let record = MatchRecord::new("alice", "bob");
        let value = serde_json::to_value(&record).unwrap();

        assert_eq!(value["players"], serde_json::json!(["alice", "bob"]));
        assert_eq!(value["GameStats"]["alice"]["xp"], 0);
        assert_eq!(value["GameStats"]["bob"]["no_of_correct_answers"], 0);
        assert_eq!(value["questions"], serde_json::json!([]));
    }

    #[test]
    fn answer_accepts_loose_encodings() {
        let parse = |raw: &str| serde_json::from_str::<AnswerOption>(raw).unwrap();
        assert_eq!(parse("2"), AnswerOption::Index(2));
        assert_eq!(parse("\"1\""), AnswerOption::Index(1));
        assert_eq!(parse("true"), AnswerOption::Flag(true));
        assert_eq!(parse("\"False\""), AnswerOption::Flag(false));
        assert!(serde_json::from_str::<AnswerOption>("-1").is_err());
        assert!(serde_json::from_str::<AnswerOption>("\"maybe\"").is_err());
    }

    #[test]
    fn generated_question_parses_without_id_or_responses() {
        let raw = r#"{
            "question": "Who built the ark?",
            "type": "mcq",
            "topic": "Genesis",
            "level": 3,
            "options": ["Moses", "Noah", "David", "Paul"],
            "answer": "1",
            "explanation": "Genesis 6",
            "formatHints": {}
        }"#;
        let question: QuestionEntity = serde_json::from_str(raw).unwrap();

        assert!(question.id.is_none());
        assert!(question.responses.is_none());
        assert_eq!(question.answer, AnswerOption::Index(1));
        assert_eq!(question.answer_text(), "Noah");
    }

    #[test]
    fn unknown_question_kind_falls_back_to_other() {
        let raw = r#"{"question": "q", "type": "quote_guess", "answer": 0}"#;
        let question: QuestionEntity = serde_json::from_str(raw).unwrap();
        assert_eq!(question.kind, QuestionKind::Other);
    }
}
