//! Read-modify-write helpers over match records guarded by store revisions.

use tracing::debug;

use crate::{
    dao::{models::MatchRecord, session_store::SessionStore},
    error::ServiceError,
};

/// Conflicting writers are retried this many times before giving up.
const MAX_WRITE_ATTEMPTS: usize = 8;

/// What a mutation closure decided to do with the record it was handed.
pub enum Change<T> {
    /// Persist the mutated record.
    Write(T),
    /// Leave the stored record untouched.
    Keep(T),
}

/// Load a match record or fail with [`ServiceError::MatchNotFound`].
pub async fn load_match(
    store: &dyn SessionStore,
    match_id: &str,
) -> Result<MatchRecord, ServiceError> {
    store
        .load_match(match_id)
        .await?
        .map(|versioned| versioned.record)
        .ok_or_else(|| ServiceError::MatchNotFound(match_id.to_owned()))
}

/// Apply `mutate` to the latest record and write it back at the revision it was read at.
///
/// A concurrent writer makes the replace fail with a conflict, in which case the record is
/// reloaded and `mutate` runs again on the fresh copy.
pub async fn update_match<T, F>(
    store: &dyn SessionStore,
    match_id: &str,
    mut mutate: F,
) -> Result<(MatchRecord, T), ServiceError>
where
    F: FnMut(&mut MatchRecord) -> Result<Change<T>, ServiceError>,
{
    for attempt in 1..=MAX_WRITE_ATTEMPTS {
        let versioned = store
            .load_match(match_id)
            .await?
            .ok_or_else(|| ServiceError::MatchNotFound(match_id.to_owned()))?;

        let mut record = versioned.record;
        let value = match mutate(&mut record)? {
            Change::Keep(value) => return Ok((record, value)),
            Change::Write(value) => value,
        };

        match store
            .replace_match(match_id, record.clone(), versioned.revision)
            .await
        {
            Ok(_) => return Ok((record, value)),
            Err(err) if err.is_conflict() => {
                debug!(match_id, attempt, "match record changed concurrently; retrying");
                tokio::task::yield_now().await;
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(ServiceError::InvalidState(format!(
        "match `{match_id}` kept changing concurrently"
    )))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use futures::future::BoxFuture;

    use super::*;
    use crate::dao::{
        models::{PairClaim, PoolEntry},
        session_store::{MemorySessionStore, Revision, VersionedMatch},
        storage::{StorageResult, StoreHealth},
    };

    /// Lets another writer credit `b` right before the first replace lands.
    struct RacedOnce {
        inner: MemorySessionStore,
        armed: AtomicBool,
    }

    impl SessionStore for RacedOnce {
        fn load_match(
            &self,
            match_id: &str,
        ) -> BoxFuture<'static, StorageResult<Option<VersionedMatch>>> {
            self.inner.load_match(match_id)
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
            if !self.armed.swap(false, Ordering::SeqCst) {
                return self.inner.replace_match(match_id, record, expected_revision);
            }
            let inner = self.inner.clone();
            let match_id = match_id.to_owned();
            Box::pin(async move {
                if let Some(mut current) = inner.load_match(&match_id).await? {
                    if let Some(stats) = current.record.stats.get_mut("b") {
                        stats.xp += 3;
                    }
                    inner
                        .replace_match(&match_id, current.record, current.revision)
                        .await?;
                }
                inner.replace_match(&match_id, record, expected_revision).await
            })
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

    impl StoreHealth for RacedOnce {
        fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.health_check()
        }

        fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.try_reconnect()
        }
    }

    #[tokio::test]
    async fn keep_skips_the_write() {
        let store = MemorySessionStore::new();
        store
            .create_match("quiz:1", MatchRecord::new("a", "b"))
            .await
            .unwrap();
        let before = store.load_match("quiz:1").await.unwrap().unwrap().revision;

        let (_, value) = update_match(&store, "quiz:1", |_| Ok(Change::Keep(7)))
            .await
            .unwrap();

        let after = store.load_match("quiz:1").await.unwrap().unwrap().revision;
        assert_eq!(value, 7);
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn write_persists_the_mutation() {
        let store = MemorySessionStore::new();
        store
            .create_match("quiz:1", MatchRecord::new("a", "b"))
            .await
            .unwrap();

        update_match(&store, "quiz:1", |record| {
            if let Some(stats) = record.stats.get_mut("a") {
                stats.xp += 5;
            }
            Ok(Change::Write(()))
        })
        .await
        .unwrap();

        let record = load_match(&store, "quiz:1").await.unwrap();
        assert_eq!(record.stats["a"].xp, 5);
    }

    #[tokio::test]
    async fn missing_match_is_reported() {
        let store = MemorySessionStore::new();
        let err = update_match(&store, "quiz:404", |_| Ok(Change::Write(())))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::MatchNotFound(id) if id == "quiz:404"));
    }

    #[tokio::test]
    async fn conflicting_write_reruns_the_mutation_on_the_fresh_record() {
        let store = RacedOnce {
            inner: MemorySessionStore::new(),
            armed: AtomicBool::new(true),
        };
        store
            .create_match("quiz:1", MatchRecord::new("a", "b"))
            .await
            .unwrap();
        let runs = AtomicUsize::new(0);

        let (record, ()) = update_match(&store, "quiz:1", |record| {
            runs.fetch_add(1, Ordering::SeqCst);
            if let Some(stats) = record.stats.get_mut("a") {
                stats.xp += 5;
            }
            Ok(Change::Write(()))
        })
        .await
        .unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(record.stats["a"].xp, 5);
        assert_eq!(record.stats["b"].xp, 3);
        let stored = load_match(&store, "quiz:1").await.unwrap();
        assert_eq!(stored, record);
    }
}
