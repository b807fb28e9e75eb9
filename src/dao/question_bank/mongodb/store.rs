use std::sync::Arc;

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{Collection, Database, IndexModel, bson::doc, options::IndexOptions};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{
        CONTEST_COLLECTION_NAME, MongoContestDocument, MongoQuestionDocument,
        QUESTION_COLLECTION_NAME,
    },
};
use crate::dao::{
    models::{ContestEntity, QuestionEntity},
    question_bank::QuestionBank,
    storage::{StorageResult, StoreHealth},
};

#[derive(Clone)]
pub struct MongoQuestionBank {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    database: RwLock<Database>,
    config: MongoConfig,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = self.database.read().await.clone();
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (_client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        *self.database.write().await = database;
        Ok(())
    }
}

impl MongoQuestionBank {
    /// Connect to MongoDB and make sure the bank index exists.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (_client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let bank = Self {
            inner: Arc::new(MongoInner {
                database: RwLock::new(database),
                config,
            }),
        };
        bank.ensure_indexes().await?;
        Ok(bank)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let index = IndexModel::builder()
            .keys(doc! { "level": 1, "use_count": 1 })
            .options(
                IndexOptions::builder()
                    .name(Some("bank_level_use_idx".to_owned()))
                    .build(),
            )
            .build();

        self.questions()
            .await
            .create_index(index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: QUESTION_COLLECTION_NAME,
                index: "level,use_count",
                source,
            })?;
        Ok(())
    }

    async fn questions(&self) -> Collection<MongoQuestionDocument> {
        self.inner
            .database
            .read()
            .await
            .collection(QUESTION_COLLECTION_NAME)
    }

    async fn contests(&self) -> Collection<MongoContestDocument> {
        self.inner
            .database
            .read()
            .await
            .collection(CONTEST_COLLECTION_NAME)
    }

    async fn fetch_by_level(&self, level: u8, limit: usize) -> MongoResult<Vec<QuestionEntity>> {
        let documents: Vec<MongoQuestionDocument> = self
            .questions()
            .await
            .find(doc! { "level": i32::from(level) })
            .sort(doc! { "use_count": 1, "created_at": 1 })
            .limit(i64::try_from(limit).unwrap_or(i64::MAX))
            .await
            .map_err(|source| MongoDaoError::FetchQuestions { level, source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::FetchQuestions { level, source })?;

        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn increment_use_counts(&self, ids: Vec<String>) -> MongoResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let count = ids.len();
        let result = self
            .questions()
            .await
            .update_many(
                doc! { "_id": { "$in": ids } },
                doc! { "$inc": { "use_count": 1 } },
            )
            .await
            .map_err(|source| MongoDaoError::IncrementUseCounts { count, source })?;
        Ok(result.modified_count)
    }

    async fn insert_generated(&self, questions: Vec<QuestionEntity>) -> MongoResult<u64> {
        if questions.is_empty() {
            return Ok(0);
        }
        let count = questions.len();
        let documents: Vec<MongoQuestionDocument> = questions
            .into_iter()
            .map(|mut question| {
                let id = question
                    .id
                    .take()
                    .unwrap_or_else(|| Uuid::new_v4().to_string());
                MongoQuestionDocument::generated(id, question)
            })
            .collect();

        let result = self
            .questions()
            .await
            .insert_many(documents)
            .await
            .map_err(|source| MongoDaoError::InsertQuestions { count, source })?;
        Ok(result.inserted_ids.len() as u64)
    }

    async fn save_contest(&self, contest: ContestEntity) -> MongoResult<()> {
        let match_id = contest.match_id.clone();
        let document = MongoContestDocument::from(contest);
        self.contests()
            .await
            .replace_one(doc! { "_id": match_id.as_str() }, &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveContest { match_id, source })?;
        Ok(())
    }
}

impl QuestionBank for MongoQuestionBank {
    fn fetch_by_level(
        &self,
        level: u8,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<QuestionEntity>>> {
        let bank = self.clone();
        Box::pin(async move { bank.fetch_by_level(level, limit).await.map_err(Into::into) })
    }

    fn increment_use_counts(&self, ids: Vec<String>) -> BoxFuture<'static, StorageResult<u64>> {
        let bank = self.clone();
        Box::pin(async move { bank.increment_use_counts(ids).await.map_err(Into::into) })
    }

    fn insert_generated(
        &self,
        questions: Vec<QuestionEntity>,
    ) -> BoxFuture<'static, StorageResult<u64>> {
        let bank = self.clone();
        Box::pin(async move { bank.insert_generated(questions).await.map_err(Into::into) })
    }

    fn save_contest(&self, contest: ContestEntity) -> BoxFuture<'static, StorageResult<()>> {
        let bank = self.clone();
        Box::pin(async move { bank.save_contest(contest).await.map_err(Into::into) })
    }
}

impl StoreHealth for MongoQuestionBank {
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let bank = self.clone();
        Box::pin(async move { bank.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let bank = self.clone();
        Box::pin(async move { bank.inner.reconnect().await.map_err(Into::into) })
    }
}
