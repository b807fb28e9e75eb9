#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;

use futures::future::BoxFuture;

use crate::dao::{
    models::{MatchRecord, PairClaim, PoolEntry},
    storage::{StorageResult, StoreHealth},
};

pub use memory::MemorySessionStore;

/// Opaque optimistic-concurrency token returned with every stored match record.
pub type Revision = String;

/// A match record together with the revision it was read at.
#[derive(Debug, Clone)]
pub struct VersionedMatch {
    pub record: MatchRecord,
    pub revision: Revision,
}

/// Low-latency store shared by every connection: match records plus the ranked waiting pool.
pub trait SessionStore: StoreHealth {
    fn load_match(&self, match_id: &str) -> BoxFuture<'static, StorageResult<Option<VersionedMatch>>>;
    /// Store a brand-new record; fails with a conflict when the id is already taken.
    fn create_match(
        &self,
        match_id: &str,
        record: MatchRecord,
    ) -> BoxFuture<'static, StorageResult<Revision>>;
    /// Overwrite the record only if it is still at `expected_revision`.
    fn replace_match(
        &self,
        match_id: &str,
        record: MatchRecord,
        expected_revision: Revision,
    ) -> BoxFuture<'static, StorageResult<Revision>>;
    /// Insert or re-rank a waiting player.
    fn pool_insert(&self, entry: PoolEntry) -> BoxFuture<'static, StorageResult<()>>;
    /// Waiting players whose rank lies in `min_rank..=max_rank`, ordered by rank then age.
    fn pool_range(
        &self,
        min_rank: u8,
        max_rank: u8,
    ) -> BoxFuture<'static, StorageResult<Vec<PoolEntry>>>;
    /// Remove both players, or neither.
    fn pool_claim_pair(
        &self,
        player_id: &str,
        candidate_id: &str,
    ) -> BoxFuture<'static, StorageResult<PairClaim>>;
    /// Drop a player from the pool, returning whether it was queued.
    fn pool_remove(&self, player_id: &str) -> BoxFuture<'static, StorageResult<bool>>;
}

/// Order pool entries the way every backend reports them.
pub(crate) fn sort_pool(entries: &mut [PoolEntry]) {
    entries.sort_by(|a, b| {
        a.rank
            .cmp(&b.rank)
            .then(a.joined_at.cmp(&b.joined_at))
            .then_with(|| a.player_id.cmp(&b.player_id))
    });
}
