use std::sync::Arc;

use futures::future::BoxFuture;
use indexmap::IndexMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::QuestionBank;
use crate::dao::{
    models::{ContestEntity, QuestionEntity},
    storage::{StorageResult, StoreHealth},
};

/// In-process question bank, used when MongoDB is not configured and throughout the tests.
#[derive(Clone, Default)]
pub struct MemoryQuestionBank {
    inner: Arc<Mutex<BankState>>,
}

#[derive(Default)]
struct BankState {
    rows: IndexMap<String, BankRow>,
    contests: IndexMap<String, ContestEntity>,
}

struct BankRow {
    question: QuestionEntity,
    use_count: u64,
}

impl MemoryQuestionBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preload questions as if they had been played once, assigning ids where missing.
    pub async fn seed(&self, questions: impl IntoIterator<Item = QuestionEntity>) {
        let mut state = self.inner.lock().await;
        for mut question in questions {
            let id = question
                .id
                .get_or_insert_with(|| Uuid::new_v4().to_string())
                .clone();
            state.rows.insert(
                id,
                BankRow {
                    question,
                    use_count: 1,
                },
            );
        }
    }

    /// Current use count of a stored question.
    pub async fn use_count(&self, id: &str) -> Option<u64> {
        self.inner.lock().await.rows.get(id).map(|row| row.use_count)
    }

    /// Number of stored questions across all levels.
    pub async fn question_count(&self) -> usize {
        self.inner.lock().await.rows.len()
    }

    /// Contest saved for a finished match, if any.
    pub async fn contest(&self, match_id: &str) -> Option<ContestEntity> {
        self.inner.lock().await.contests.get(match_id).cloned()
    }
}

impl QuestionBank for MemoryQuestionBank {
    fn fetch_by_level(
        &self,
        level: u8,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<QuestionEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let state = inner.lock().await;
            let mut rows: Vec<&BankRow> = state
                .rows
                .values()
                .filter(|row| row.question.level == level)
                .collect();
            // Stable sort keeps insertion order among equally used questions.
            rows.sort_by_key(|row| row.use_count);
            Ok(rows
                .into_iter()
                .take(limit)
                .map(|row| row.question.clone())
                .collect())
        })
    }

    fn increment_use_counts(&self, ids: Vec<String>) -> BoxFuture<'static, StorageResult<u64>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut state = inner.lock().await;
            let mut updated = 0;
            for id in ids {
                if let Some(row) = state.rows.get_mut(&id) {
                    row.use_count += 1;
                    updated += 1;
                }
            }
            Ok(updated)
        })
    }

    fn insert_generated(
        &self,
        questions: Vec<QuestionEntity>,
    ) -> BoxFuture<'static, StorageResult<u64>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut state = inner.lock().await;
            let mut inserted = 0;
            for mut question in questions {
                question.responses = None;
                let id = question
                    .id
                    .get_or_insert_with(|| Uuid::new_v4().to_string())
                    .clone();
                if state.rows.contains_key(&id) {
                    continue;
                }
                state.rows.insert(
                    id,
                    BankRow {
                        question,
                        use_count: 1,
                    },
                );
                inserted += 1;
            }
            Ok(inserted)
        })
    }

    fn save_contest(&self, contest: ContestEntity) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner
                .lock()
                .await
                .contests
                .insert(contest.match_id.clone(), contest);
            Ok(())
        })
    }
}

impl StoreHealth for MemoryQuestionBank {
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::dao::models::{AnswerOption, QuestionKind};

    fn question(text: &str, level: u8) -> QuestionEntity {
        QuestionEntity {
            id: None,
            question: text.into(),
            kind: QuestionKind::TrueFalse,
            topic: "Genesis".into(),
            level,
            options: Vec::new(),
            answer: AnswerOption::Flag(true),
            explanation: String::new(),
            format_hints: Value::Null,
            responses: None,
        }
    }

    #[tokio::test]
    async fn fetch_prefers_least_used_and_filters_level() {
        let bank = MemoryQuestionBank::new();
        bank.seed([question("a", 3), question("b", 3), question("c", 4)])
            .await;

        let first = bank.fetch_by_level(3, 10).await.unwrap();
        assert_eq!(first.len(), 2);
        let a_id = first[0].id.clone().unwrap();
        assert_eq!(bank.increment_use_counts(vec![a_id.clone()]).await.unwrap(), 1);

        let next = bank.fetch_by_level(3, 1).await.unwrap();
        assert_eq!(next[0].question, "b");
        assert_eq!(bank.use_count(&a_id).await, Some(2));
    }

    #[tokio::test]
    async fn increment_counts_only_known_ids() {
        let bank = MemoryQuestionBank::new();
        bank.seed([question("a", 1)]).await;
        let id = bank.fetch_by_level(1, 10).await.unwrap()[0].id.clone().unwrap();

        let updated = bank
            .increment_use_counts(vec![id, "missing".into()])
            .await
            .unwrap();
        assert_eq!(updated, 1);
    }

    #[tokio::test]
    async fn generated_questions_start_with_one_use() {
        let bank = MemoryQuestionBank::new();
        let mut generated = question("new", 2);
        generated.id = Some("gen-1".into());

        assert_eq!(bank.insert_generated(vec![generated]).await.unwrap(), 1);
        assert_eq!(bank.use_count("gen-1").await, Some(1));
    }
}
