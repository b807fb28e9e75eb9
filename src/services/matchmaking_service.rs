//! Ranked matchmaking: queue a player, look for the closest waiting opponent with a widening
//! rank window, then create the match and wait for its first questions.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::{Rng, distr::Alphanumeric};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::{
    config::{AppConfig, MAX_RANK, MIN_RANK},
    dao::{
        models::{MatchRecord, PairClaim, PoolEntry},
        session_store::SessionStore,
    },
    error::ServiceError,
    services::{
        records,
        sourcing_service::{self, SourcingRequest},
    },
    state::{
        SharedState,
        match_session::{self, SessionSnapshot},
    },
};

/// Attempts at claiming an opponent before giving up on this request.
const MAX_CLAIM_ATTEMPTS: usize = 5;

/// Skill level as supplied by a client: a tier name or a score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RankSpec {
    Score(i64),
    Name(String),
}

/// Result of a matchmaking request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// The player waits in the pool for someone else to pick them.
    Queued,
    Matched { opponent: String, match_id: String },
}

/// Turn a tier name, a score, or a score written as text into a rank in `1..=10`.
pub fn resolve_rank(config: &AppConfig, rank: &RankSpec) -> Result<u8, ServiceError> {
    let score = match rank {
        RankSpec::Score(score) => *score,
        RankSpec::Name(name) => match name.trim().parse::<i64>() {
            Ok(score) => score,
            Err(_) => {
                return config
                    .rank_for_tier(name)
                    .ok_or_else(|| ServiceError::InvalidRank(name.clone()));
            }
        },
    };

    u8::try_from(score)
        .ok()
        .filter(|score| (MIN_RANK..=MAX_RANK).contains(score))
        .ok_or_else(|| ServiceError::InvalidRank(score.to_string()))
}

/// Rank windows searched around `rank`, widening by one on each side until the whole domain
/// is covered.
pub fn search_windows(rank: u8) -> impl Iterator<Item = (u8, u8)> {
    let rank = rank.clamp(MIN_RANK, MAX_RANK);
    let widest = (rank - MIN_RANK).max(MAX_RANK - rank).max(1);
    (1..=widest).map(move |k| {
        (
            rank.saturating_sub(k).max(MIN_RANK),
            rank.saturating_add(k).min(MAX_RANK),
        )
    })
}

/// Identifier of a new match.
pub fn new_match_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("quiz:{millis}:{}", suffix.to_ascii_lowercase())
}

/// Queue `player_id` and try to pair them with the closest waiting player.
///
/// On a match, the record is created and the call returns once the first question batch is
/// stored, or fails with [`ServiceError::SourcingTimeout`].
pub async fn start_match(
    state: &SharedState,
    player_id: &str,
    rank: &RankSpec,
) -> Result<MatchOutcome, ServiceError> {
    let config = state.config();
    let rank = resolve_rank(&config, rank)?;
    let store = state.require_session_store().await?;

    store
        .pool_insert(PoolEntry {
            player_id: player_id.to_owned(),
            rank,
            joined_at: SystemTime::now(),
        })
        .await?;
    debug!(player_id, rank, "player queued");

    let Some(opponent) = claim_opponent(store.as_ref(), player_id, rank).await? else {
        info!(player_id, rank, "no opponent available; player stays queued");
        return Ok(MatchOutcome::Queued);
    };

    let match_id = new_match_id();
    store
        .create_match(&match_id, MatchRecord::new(player_id, opponent.clone()))
        .await?;
    match_session::ensure(state, &match_id)?;
    info!(%match_id, player_id, %opponent, rank, "match created");

    await_first_questions(state, &config, &match_id, rank).await?;

    Ok(MatchOutcome::Matched { opponent, match_id })
}

/// Remove a player from the waiting pool, returning whether they were queued.
pub async fn leave_queue(state: &SharedState, player_id: &str) -> Result<bool, ServiceError> {
    let store = state.require_session_store().await?;
    Ok(store.pool_remove(player_id).await?)
}

/// Stored record of a match plus the state of its live session, if one runs here.
pub async fn describe_match(
    state: &SharedState,
    match_id: &str,
) -> Result<(MatchRecord, Option<SessionSnapshot>), ServiceError> {
    let store = state.require_session_store().await?;
    let record = records::load_match(store.as_ref(), match_id).await?;
    let session = match state.session(match_id) {
        Some(handle) => handle.snapshot().await.ok(),
        None => None,
    };
    Ok((record, session))
}

async fn claim_opponent(
    store: &dyn SessionStore,
    player_id: &str,
    rank: u8,
) -> Result<Option<String>, ServiceError> {
    let mut attempts = 0;

    'windows: for (min_rank, max_rank) in search_windows(rank) {
        loop {
            let Some(candidate) = find_candidate(store, player_id, rank, min_rank, max_rank).await?
            else {
                continue 'windows;
            };

            attempts += 1;
            match store.pool_claim_pair(player_id, &candidate).await? {
                PairClaim::Claimed => return Ok(Some(candidate)),
                PairClaim::SelfTaken => {
                    info!(player_id, "player was claimed by a concurrent request");
                    return Ok(None);
                }
                PairClaim::CandidateTaken if attempts < MAX_CLAIM_ATTEMPTS => {
                    debug!(player_id, %candidate, "candidate claimed concurrently; searching again");
                }
                PairClaim::CandidateTaken => {
                    warn!(player_id, "gave up claiming an opponent after repeated races");
                    return Ok(None);
                }
            }
        }
    }

    Ok(None)
}

/// Closest waiting player in the window, preferring an exact rank match.
async fn find_candidate(
    store: &dyn SessionStore,
    player_id: &str,
    rank: u8,
    min_rank: u8,
    max_rank: u8,
) -> Result<Option<String>, ServiceError> {
    let exact = store.pool_range(rank, rank).await?;
    if let Some(entry) = exact.into_iter().find(|entry| entry.player_id != player_id) {
        return Ok(Some(entry.player_id));
    }

    let window = store.pool_range(min_rank, max_rank).await?;
    Ok(window
        .into_iter()
        .filter(|entry| entry.player_id != player_id)
        .min_by_key(|entry| entry.rank.abs_diff(rank))
        .map(|entry| entry.player_id))
}

async fn await_first_questions(
    state: &SharedState,
    config: &AppConfig,
    match_id: &str,
    level: u8,
) -> Result<(), ServiceError> {
    let request = SourcingRequest {
        match_id: match_id.to_owned(),
        topic: config.default_topic.clone(),
        count: config.question_count,
        level,
    };
    let (ready_tx, ready_rx) = oneshot::channel();
    let sourcing = tokio::spawn(sourcing_service::source_questions(
        state.clone(),
        request,
        Some(ready_tx),
    ));

    if ready_rx.await.is_ok() {
        return Ok(());
    }

    // The sender was dropped without firing, so sourcing already settled with an error.
    match sourcing.await {
        Ok(Err(err)) => Err(err),
        Ok(Ok(_)) => Err(ServiceError::Internal(
            "sourcing finished without signalling readiness".into(),
        )),
        Err(err) => Err(ServiceError::Internal(format!("sourcing task failed: {err}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::session_store::MemorySessionStore;

    #[test]
    fn windows_widen_by_one_and_stop_at_full_domain() {
        let windows: Vec<_> = search_windows(5).collect();
        assert_eq!(windows.first(), Some(&(4, 6)));
        assert_eq!(windows.last(), Some(&(1, 10)));
        assert_eq!(windows.len(), 5);

        let edge: Vec<_> = search_windows(1).collect();
        assert_eq!(edge[0], (1, 2));
        assert_eq!(edge.last(), Some(&(1, 10)));
        assert_eq!(edge.len(), 9);

        for pair in windows.windows(2) {
            assert!(pair[1].0 <= pair[0].0 && pair[1].1 >= pair[0].1);
        }
    }

    #[test]
    fn ranks_resolve_from_tiers_and_scores() {
        let config = AppConfig::default();
        assert_eq!(resolve_rank(&config, &RankSpec::Score(7)).unwrap(), 7);
        assert_eq!(resolve_rank(&config, &RankSpec::Name(" 3 ".into())).unwrap(), 3);
        assert_eq!(resolve_rank(&config, &RankSpec::Name("elder".into())).unwrap(), 6);
        assert!(matches!(
            resolve_rank(&config, &RankSpec::Score(11)),
            Err(ServiceError::InvalidRank(_))
        ));
        assert!(matches!(
            resolve_rank(&config, &RankSpec::Name("pope".into())),
            Err(ServiceError::InvalidRank(_))
        ));
        assert!(resolve_rank(&config, &RankSpec::Score(0)).is_err());
    }

    #[test]
    fn match_ids_are_prefixed_and_unique() {
        let first = new_match_id();
        let second = new_match_id();
        assert!(first.starts_with("quiz:"));
        assert_ne!(first, second);
    }

    async fn queue(store: &MemorySessionStore, player: &str, rank: u8) {
        store
            .pool_insert(PoolEntry {
                player_id: player.into(),
                rank,
                joined_at: SystemTime::now(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn exact_rank_is_preferred_over_closer_queue_position() {
        let store = MemorySessionStore::new();
        queue(&store, "near", 4).await;
        queue(&store, "exact", 5).await;
        queue(&store, "me", 5).await;

        let opponent = claim_opponent(&store, "me", 5).await.unwrap();
        assert_eq!(opponent.as_deref(), Some("exact"));
        assert_eq!(store.pool_len().await, 1);
    }

    #[tokio::test]
    async fn lone_player_stays_queued() {
        let store = MemorySessionStore::new();
        queue(&store, "me", 5).await;

        assert!(claim_opponent(&store, "me", 5).await.unwrap().is_none());
        assert_eq!(store.pool_len().await, 1);
    }

    #[tokio::test]
    async fn distant_player_is_found_once_the_window_reaches_them() {
        let store = MemorySessionStore::new();
        queue(&store, "far", 10).await;
        queue(&store, "me", 1).await;

        let opponent = claim_opponent(&store, "me", 1).await.unwrap();
        assert_eq!(opponent.as_deref(), Some("far"));
    }

    #[tokio::test]
    async fn player_claimed_concurrently_is_reported_as_queued() {
        let store = MemorySessionStore::new();
        queue(&store, "other", 5).await;

        // "me" already left the pool through someone else's claim.
        assert!(claim_opponent(&store, "me", 5).await.unwrap().is_none());
        assert_eq!(store.pool_len().await, 1);
    }
}
