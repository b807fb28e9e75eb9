use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::BoxFuture;
use indexmap::IndexMap;
use tokio::sync::Mutex;

use super::{Revision, SessionStore, VersionedMatch, sort_pool};
use crate::dao::{
    models::{MatchRecord, PairClaim, PoolEntry},
    storage::{StorageError, StorageResult, StoreHealth},
};

/// Process-local session store used when no CouchDB is configured, and by tests.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    matches: DashMap<String, StoredMatch>,
    pool: Mutex<IndexMap<String, PoolEntry>>,
}

struct StoredMatch {
    record: MatchRecord,
    revision: u64,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of players currently waiting.
    pub async fn pool_len(&self) -> usize {
        self.inner.pool.lock().await.len()
    }
}

fn revision_of(counter: u64) -> Revision {
    counter.to_string()
}

impl SessionStore for MemorySessionStore {
    fn load_match(&self, match_id: &str) -> BoxFuture<'static, StorageResult<Option<VersionedMatch>>> {
        let inner = self.inner.clone();
        let match_id = match_id.to_owned();
        Box::pin(async move {
            Ok(inner.matches.get(&match_id).map(|stored| VersionedMatch {
                record: stored.record.clone(),
                revision: revision_of(stored.revision),
            }))
        })
    }

    fn create_match(
        &self,
        match_id: &str,
        record: MatchRecord,
    ) -> BoxFuture<'static, StorageResult<Revision>> {
        let inner = self.inner.clone();
        let match_id = match_id.to_owned();
        Box::pin(async move {
            match inner.matches.entry(match_id) {
                Entry::Occupied(entry) => Err(StorageError::conflict(entry.key().clone())),
                Entry::Vacant(entry) => {
                    entry.insert(StoredMatch {
                        record,
                        revision: 1,
                    });
                    Ok(revision_of(1))
                }
            }
        })
    }

    fn replace_match(
        &self,
        match_id: &str,
        record: MatchRecord,
        expected_revision: Revision,
    ) -> BoxFuture<'static, StorageResult<Revision>> {
        let inner = self.inner.clone();
        let match_id = match_id.to_owned();
        Box::pin(async move {
            match inner.matches.entry(match_id) {
                Entry::Occupied(mut entry) => {
                    let stored = entry.get_mut();
                    if revision_of(stored.revision) != expected_revision {
                        return Err(StorageError::conflict(entry.key().clone()));
                    }
                    stored.revision += 1;
                    stored.record = record;
                    Ok(revision_of(stored.revision))
                }
                Entry::Vacant(entry) => Err(StorageError::conflict(entry.key().clone())),
            }
        })
    }

    fn pool_insert(&self, entry: PoolEntry) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner
                .pool
                .lock()
                .await
                .insert(entry.player_id.clone(), entry);
            Ok(())
        })
    }

    fn pool_range(
        &self,
        min_rank: u8,
        max_rank: u8,
    ) -> BoxFuture<'static, StorageResult<Vec<PoolEntry>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let pool = inner.pool.lock().await;
            let mut entries: Vec<PoolEntry> = pool
                .values()
                .filter(|entry| (min_rank..=max_rank).contains(&entry.rank))
                .cloned()
                .collect();
            sort_pool(&mut entries);
            Ok(entries)
        })
    }

    fn pool_claim_pair(
        &self,
        player_id: &str,
        candidate_id: &str,
    ) -> BoxFuture<'static, StorageResult<PairClaim>> {
        let inner = self.inner.clone();
        let player_id = player_id.to_owned();
        let candidate_id = candidate_id.to_owned();
        Box::pin(async move {
            let mut pool = inner.pool.lock().await;
            if !pool.contains_key(&player_id) {
                return Ok(PairClaim::SelfTaken);
            }
            if !pool.contains_key(&candidate_id) {
                return Ok(PairClaim::CandidateTaken);
            }
            pool.shift_remove(&player_id);
            pool.shift_remove(&candidate_id);
            Ok(PairClaim::Claimed)
        })
    }

    fn pool_remove(&self, player_id: &str) -> BoxFuture<'static, StorageResult<bool>> {
        let inner = self.inner.clone();
        let player_id = player_id.to_owned();
        Box::pin(async move { Ok(inner.pool.lock().await.shift_remove(&player_id).is_some()) })
    }
}

impl StoreHealth for MemorySessionStore {
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::*;

    fn entry(player: &str, rank: u8, offset: u64) -> PoolEntry {
        PoolEntry {
            player_id: player.into(),
            rank,
            joined_at: SystemTime::UNIX_EPOCH + Duration::from_secs(offset),
        }
    }

    #[tokio::test]
    async fn replace_rejects_stale_revision() {
        let store = MemorySessionStore::new();
        let first = store
            .create_match("quiz:1", MatchRecord::new("a", "b"))
            .await
            .unwrap();

        let second = store
            .replace_match("quiz:1", MatchRecord::new("a", "b"), first.clone())
            .await
            .unwrap();
        assert_ne!(first, second);

        let err = store
            .replace_match("quiz:1", MatchRecord::new("a", "b"), first)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn create_over_existing_is_a_conflict() {
        let store = MemorySessionStore::new();
        store
            .create_match("quiz:1", MatchRecord::new("a", "b"))
            .await
            .unwrap();
        let err = store
            .create_match("quiz:1", MatchRecord::new("c", "d"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn pool_range_is_inclusive_and_ordered() {
        let store = MemorySessionStore::new();
        store.pool_insert(entry("late", 5, 20)).await.unwrap();
        store.pool_insert(entry("early", 5, 10)).await.unwrap();
        store.pool_insert(entry("low", 4, 30)).await.unwrap();
        store.pool_insert(entry("out", 8, 0)).await.unwrap();

        let ids: Vec<_> = store
            .pool_range(4, 6)
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.player_id)
            .collect();
        assert_eq!(ids, ["low", "early", "late"]);
    }

    #[tokio::test]
    async fn claim_pair_is_all_or_nothing() {
        let store = MemorySessionStore::new();
        store.pool_insert(entry("a", 5, 0)).await.unwrap();
        store.pool_insert(entry("b", 6, 1)).await.unwrap();

        assert_eq!(
            store.pool_claim_pair("a", "ghost").await.unwrap(),
            PairClaim::CandidateTaken
        );
        assert_eq!(store.pool_len().await, 2);

        assert_eq!(
            store.pool_claim_pair("a", "b").await.unwrap(),
            PairClaim::Claimed
        );
        assert_eq!(store.pool_len().await, 0);

        assert_eq!(
            store.pool_claim_pair("a", "b").await.unwrap(),
            PairClaim::SelfTaken
        );
    }
}
