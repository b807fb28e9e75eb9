//! Answer scoring and recording for the round currently open in a match.

use std::time::Duration;

use tracing::debug;

use crate::{
    dao::{
        models::{AnswerOption, QuestionEntity, ResponseEntity},
        session_store::SessionStore,
    },
    error::ServiceError,
    services::records::{self, Change},
};

/// Bonus on top of the elapsed seconds for a correct answer.
pub const CORRECT_ANSWER_BONUS: i64 = 10;

/// A player's answer to the open round.
#[derive(Debug, Clone)]
pub struct AnswerSubmission {
    pub player_id: String,
    pub selected: AnswerOption,
    /// Seconds since the round opened, as reported by the client.
    pub elapsed_seconds: f64,
}

/// What happened to a submitted answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerOutcome {
    /// The answer was right; the round should close.
    Correct { xp: i64 },
    Incorrect {
        xp: i64,
        /// Every participant has now answered this question.
        all_answered: bool,
    },
    /// The player already answered this question; nothing was written.
    Duplicate,
}

/// Xp delta of an answer: `elapsed + 10` when correct, `-elapsed` otherwise.
pub fn score(correct: bool, elapsed: u32) -> i64 {
    let elapsed = i64::from(elapsed);
    if correct {
        elapsed + CORRECT_ANSWER_BONUS
    } else {
        -elapsed
    }
}

/// Round the reported time to whole seconds, capped at the round length.
pub fn normalize_elapsed(elapsed_seconds: f64, round: Duration) -> Result<u32, ServiceError> {
    if !elapsed_seconds.is_finite() || elapsed_seconds < 0.0 {
        return Err(ServiceError::InvalidInput(format!(
            "elapsed time `{elapsed_seconds}` must be a non-negative number of seconds"
        )));
    }
    let cap = round.as_secs().min(u64::from(u32::MAX)) as f64;
    Ok(elapsed_seconds.round().min(cap) as u32)
}

/// Whether `selected` is the right answer to `question`.
///
/// True/false questions may be answered by index when their options spell out the booleans.
pub fn is_correct(question: &QuestionEntity, selected: AnswerOption) -> bool {
    if question.answer == selected {
        return true;
    }
    match (question.answer, selected) {
        (AnswerOption::Flag(expected), AnswerOption::Index(index)) => question
            .options
            .get(index as usize)
            .and_then(|text| text.trim().to_ascii_lowercase().parse::<bool>().ok())
            .is_some_and(|flag| flag == expected),
        _ => false,
    }
}

/// Whether the round of `question` already ended: someone answered correctly, or every player
/// answered.
pub fn is_settled(question: &QuestionEntity, player_count: usize) -> bool {
    question.response_count() >= player_count
        || question
            .responses
            .iter()
            .flatten()
            .any(|response| is_correct(question, response.selected))
}

/// Score and store an answer to `question_id`.
///
/// The first answer of a player to a question wins; later ones return
/// [`AnswerOutcome::Duplicate`] without touching the record.
pub async fn submit_answer(
    store: &dyn SessionStore,
    match_id: &str,
    question_id: &str,
    submission: &AnswerSubmission,
    round: Duration,
) -> Result<(Vec<QuestionEntity>, AnswerOutcome), ServiceError> {
    let elapsed = normalize_elapsed(submission.elapsed_seconds, round)?;
    let player_id = submission.player_id.as_str();

    let (record, outcome) = records::update_match(store, match_id, |record| {
        if !record.is_player(player_id) {
            return Err(ServiceError::InvalidInput(format!(
                "player `{player_id}` does not take part in match `{match_id}`"
            )));
        }

        let player_count = record.players.len();
        let question =
            record
                .question_mut(question_id)
                .ok_or_else(|| ServiceError::QuestionNotFound {
                    match_id: match_id.to_owned(),
                    question_id: question_id.to_owned(),
                })?;

        if question.has_response_from(player_id) {
            return Ok(Change::Keep(AnswerOutcome::Duplicate));
        }

        let correct = is_correct(question, submission.selected);
        let xp = score(correct, elapsed);
        question
            .responses
            .get_or_insert_with(Vec::new)
            .push(ResponseEntity {
                player_id: player_id.to_owned(),
                selected: submission.selected,
                time_taken: elapsed,
                xp,
            });
        let all_answered = question.response_count() >= player_count;

        let stats = record.stats.entry(player_id.to_owned()).or_default();
        stats.xp += xp;
        if correct {
            stats.correct_count += 1;
        }

        Ok(Change::Write(if correct {
            AnswerOutcome::Correct { xp }
        } else {
            AnswerOutcome::Incorrect { xp, all_answered }
        }))
    })
    .await?;

    debug!(match_id, question_id, player_id, ?outcome, "answer processed");
    Ok((record.questions, outcome))
}

#[cfg(test)]
mod tests {
    use futures::future::BoxFuture;
    use serde_json::Value;

    use super::*;
    use crate::dao::{
        models::{MatchRecord, PairClaim, PoolEntry, QuestionKind},
        session_store::{MemorySessionStore, Revision, VersionedMatch},
        storage::{StorageResult, StoreHealth},
    };

    /// Yields after every read so concurrent writers both see the same revision.
    #[derive(Clone, Default)]
    struct Interleaving {
        inner: MemorySessionStore,
    }

    impl SessionStore for Interleaving {
        fn load_match(
            &self,
            match_id: &str,
        ) -> BoxFuture<'static, StorageResult<Option<VersionedMatch>>> {
            let read = self.inner.load_match(match_id);
            Box::pin(async move {
                let loaded = read.await;
                tokio::task::yield_now().await;
                loaded
            })
        }

        fn create_match(
            &self,
            match_id: &str,
            record: MatchRecord,
        ) -> BoxFuture<'static, StorageResult<Revision>> {
            self.inner.create_match(match_id, record)
        }

        fn replace_match(
            &self,
            match_id: &str,
            record: MatchRecord,
            expected_revision: Revision,
        ) -> BoxFuture<'static, StorageResult<Revision>> {
            self.inner.replace_match(match_id, record, expected_revision)
        }

        fn pool_insert(&self, entry: PoolEntry) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.pool_insert(entry)
        }

        fn pool_range(
            &self,
            min_rank: u8,
            max_rank: u8,
        ) -> BoxFuture<'static, StorageResult<Vec<PoolEntry>>> {
            self.inner.pool_range(min_rank, max_rank)
        }

        fn pool_claim_pair(
            &self,
            player_id: &str,
            candidate_id: &str,
        ) -> BoxFuture<'static, StorageResult<PairClaim>> {
            self.inner.pool_claim_pair(player_id, candidate_id)
        }

        fn pool_remove(&self, player_id: &str) -> BoxFuture<'static, StorageResult<bool>> {
            self.inner.pool_remove(player_id)
        }
    }

    impl StoreHealth for Interleaving {
        fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.health_check()
        }

        fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.try_reconnect()
        }
    }

    const ROUND: Duration = Duration::from_secs(60);

    fn question(id: &str) -> QuestionEntity {
        QuestionEntity {
            id: Some(id.into()),
            question: "Who built the ark?".into(),
            kind: QuestionKind::Mcq,
            topic: "Genesis".into(),
            level: 3,
            options: vec!["Moses".into(), "Noah".into()],
            answer: AnswerOption::Index(1),
            explanation: String::new(),
            format_hints: Value::Null,
            responses: None,
        }
    }

    async fn store_with_match() -> MemorySessionStore {
        let store = MemorySessionStore::new();
        let mut record = MatchRecord::new("alice", "bob");
        record.questions.push(question("q1"));
        store.create_match("quiz:1", record).await.unwrap();
        store
    }

    fn answer(player: &str, option: u32, elapsed: f64) -> AnswerSubmission {
        AnswerSubmission {
            player_id: player.into(),
            selected: AnswerOption::Index(option),
            elapsed_seconds: elapsed,
        }
    }

    #[test]
    fn scoring_rewards_correct_and_penalises_wrong_answers() {
        assert_eq!(score(true, 12), 22);
        assert_eq!(score(false, 20), -20);
        assert_eq!(score(false, 0), 0);
    }

    #[test]
    fn elapsed_is_rounded_and_capped() {
        assert_eq!(normalize_elapsed(11.6, ROUND).unwrap(), 12);
        assert_eq!(normalize_elapsed(600.0, ROUND).unwrap(), 60);
        assert!(normalize_elapsed(-1.0, ROUND).is_err());
        assert!(normalize_elapsed(f64::NAN, ROUND).is_err());
    }

    #[test]
    fn true_false_accepts_index_into_boolean_options() {
        let mut q = question("tf");
        q.kind = QuestionKind::TrueFalse;
        q.options = vec!["True".into(), "False".into()];
        q.answer = AnswerOption::Flag(false);

        assert!(is_correct(&q, AnswerOption::Flag(false)));
        assert!(is_correct(&q, AnswerOption::Index(1)));
        assert!(!is_correct(&q, AnswerOption::Index(0)));
    }

    #[test]
    fn rounds_settle_on_a_correct_answer_or_full_participation() {
        let response = |player: &str, option: u32| ResponseEntity {
            player_id: player.into(),
            selected: AnswerOption::Index(option),
            time_taken: 3,
            xp: 0,
        };
        let mut q = question("q1");
        assert!(!is_settled(&q, 2));

        q.responses = Some(vec![response("alice", 0)]);
        assert!(!is_settled(&q, 2));

        q.responses = Some(vec![response("alice", 1)]);
        assert!(is_settled(&q, 2));

        q.responses = Some(vec![response("alice", 0), response("bob", 0)]);
        assert!(is_settled(&q, 2));
    }

    #[tokio::test]
    async fn correct_answer_updates_stats() {
        let store = store_with_match().await;
        let (_, outcome) = submit_answer(&store, "quiz:1", "q1", &answer("alice", 1, 12.0), ROUND)
            .await
            .unwrap();
        assert_eq!(outcome, AnswerOutcome::Correct { xp: 22 });

        let record = records::load_match(&store, "quiz:1").await.unwrap();
        assert_eq!(record.stats["alice"].xp, 22);
        assert_eq!(record.stats["alice"].correct_count, 1);
        assert_eq!(record.questions[0].response_count(), 1);
    }

    #[tokio::test]
    async fn second_answer_from_same_player_is_a_no_op() {
        let store = store_with_match().await;
        submit_answer(&store, "quiz:1", "q1", &answer("bob", 0, 20.0), ROUND)
            .await
            .unwrap();
        let (_, outcome) = submit_answer(&store, "quiz:1", "q1", &answer("bob", 1, 25.0), ROUND)
            .await
            .unwrap();
        assert_eq!(outcome, AnswerOutcome::Duplicate);

        let record = records::load_match(&store, "quiz:1").await.unwrap();
        assert_eq!(record.stats["bob"].xp, -20);
        assert_eq!(record.stats["bob"].correct_count, 0);
        assert_eq!(record.questions[0].response_count(), 1);
    }

    #[tokio::test]
    async fn both_wrong_answers_mark_the_round_as_fully_answered() {
        let store = store_with_match().await;
        let (_, first) = submit_answer(&store, "quiz:1", "q1", &answer("alice", 0, 5.0), ROUND)
            .await
            .unwrap();
        let (_, second) = submit_answer(&store, "quiz:1", "q1", &answer("bob", 0, 7.0), ROUND)
            .await
            .unwrap();
        assert_eq!(
            first,
            AnswerOutcome::Incorrect {
                xp: -5,
                all_answered: false
            }
        );
        assert_eq!(
            second,
            AnswerOutcome::Incorrect {
                xp: -7,
                all_answered: true
            }
        );
    }

    #[tokio::test]
    async fn unknown_question_and_match_are_reported() {
        let store = store_with_match().await;
        let err = submit_answer(&store, "quiz:1", "nope", &answer("alice", 1, 1.0), ROUND)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::QuestionNotFound { .. }));

        let err = submit_answer(&store, "quiz:2", "q1", &answer("alice", 1, 1.0), ROUND)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::MatchNotFound(_)));
    }

    #[tokio::test]
    async fn outsiders_cannot_answer() {
        let store = store_with_match().await;
        let err = submit_answer(&store, "quiz:1", "q1", &answer("mallory", 1, 1.0), ROUND)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn concurrent_answers_from_one_player_record_a_single_response() {
        let store = Interleaving::default();
        let mut record = MatchRecord::new("alice", "bob");
        record.questions.push(question("q1"));
        store.create_match("quiz:1", record).await.unwrap();

        let right = answer("alice", 1, 4.0);
        let wrong = answer("alice", 0, 6.0);
        let (first, second) = tokio::join!(
            submit_answer(&store, "quiz:1", "q1", &right, ROUND),
            submit_answer(&store, "quiz:1", "q1", &wrong, ROUND),
        );
        let outcomes = [first.unwrap().1, second.unwrap().1];
        assert_eq!(
            outcomes
                .iter()
                .filter(|outcome| **outcome == AnswerOutcome::Duplicate)
                .count(),
            1
        );

        let record = records::load_match(&store, "quiz:1").await.unwrap();
        let responses = record.questions[0].responses.clone().unwrap_or_default();
        assert_eq!(responses.len(), 1);
        assert_eq!(record.stats["alice"].xp, responses[0].xp);
        assert!(outcomes.iter().any(|outcome| match outcome {
            AnswerOutcome::Correct { xp } | AnswerOutcome::Incorrect { xp, .. } => {
                *xp == responses[0].xp
            }
            AnswerOutcome::Duplicate => false,
        }));
    }
}
