pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use futures::future::BoxFuture;

use crate::dao::{
    models::{ContestEntity, QuestionEntity},
    storage::{StorageResult, StoreHealth},
};

pub use memory::MemoryQuestionBank;

/// Durable store of every question ever played plus the finished contests.
pub trait QuestionBank: StoreHealth {
    /// Questions of the given difficulty, least used first.
    fn fetch_by_level(
        &self,
        level: u8,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<QuestionEntity>>>;
    /// Bump the use count of each id, returning how many rows were updated.
    fn increment_use_counts(&self, ids: Vec<String>) -> BoxFuture<'static, StorageResult<u64>>;
    /// Insert freshly generated questions with a use count of one.
    fn insert_generated(
        &self,
        questions: Vec<QuestionEntity>,
    ) -> BoxFuture<'static, StorageResult<u64>>;
    /// Persist the outcome of a finished match. Saving the same match twice overwrites it.
    fn save_contest(&self, contest: ContestEntity) -> BoxFuture<'static, StorageResult<()>>;
}
