use mongodb::error::Error as MongoError;
use thiserror::Error;

pub type MongoResult<T> = Result<T, MongoDaoError>;

#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to fetch level {level} questions")]
    FetchQuestions {
        level: u8,
        #[source]
        source: MongoError,
    },
    #[error("failed to increment use counts of {count} question(s)")]
    IncrementUseCounts {
        count: usize,
        #[source]
        source: MongoError,
    },
    #[error("failed to insert {count} generated question(s)")]
    InsertQuestions {
        count: usize,
        #[source]
        source: MongoError,
    },
    #[error("failed to save contest `{match_id}`")]
    SaveContest {
        match_id: String,
        #[source]
        source: MongoError,
    },
}
