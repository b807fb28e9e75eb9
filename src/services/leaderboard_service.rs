//! Final standings of a finished match and their persistence in the question bank.

use std::{cmp::Ordering, time::SystemTime};

use tracing::{error, info};

use crate::{
    dao::models::{ContestEntity, MatchRecord, StandingEntity},
    error::ServiceError,
    services::records,
    state::SharedState,
};

/// Winner and loser of a match; a draw keeps the players' stored order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Standings {
    pub winner: StandingEntity,
    pub loser: StandingEntity,
    pub draw: bool,
}

/// Rank the two players by correct answers, then by xp.
pub fn standings(record: &MatchRecord) -> Result<Standings, ServiceError> {
    let [first, second] = record.players.as_slice() else {
        return Err(ServiceError::InvalidState(format!(
            "a match needs exactly two players, found {}",
            record.players.len()
        )));
    };

    let standing = |player_id: &String| {
        let stats = record.stats.get(player_id).copied().unwrap_or_default();
        StandingEntity {
            player_id: player_id.clone(),
            xp: stats.xp,
            correct_count: stats.correct_count,
        }
    };
    let first = standing(first);
    let second = standing(second);

    let order = first
        .correct_count
        .cmp(&second.correct_count)
        .then(first.xp.cmp(&second.xp));

    Ok(match order {
        Ordering::Less => Standings {
            winner: second,
            loser: first,
            draw: false,
        },
        Ordering::Greater => Standings {
            winner: first,
            loser: second,
            draw: false,
        },
        Ordering::Equal => Standings {
            winner: first,
            loser: second,
            draw: true,
        },
    })
}

/// Compute the standings of `match_id` and save the contest in the question bank.
pub async fn finalize(state: &SharedState, match_id: &str) -> Result<ContestEntity, ServiceError> {
    let store = state.require_session_store().await?;
    let record = records::load_match(store.as_ref(), match_id).await?;
    let Standings {
        winner,
        loser,
        draw,
    } = standings(&record)?;

    let contest = ContestEntity {
        match_id: match_id.to_owned(),
        winner,
        loser,
        draw,
        questions: record.questions,
        finished_at: SystemTime::now(),
    };

    let bank = state.require_question_bank().await?;
    bank.save_contest(contest.clone()).await?;
    info!(
        match_id,
        winner = %contest.winner.player_id,
        draw = contest.draw,
        "contest saved"
    );
    Ok(contest)
}

/// Run [`finalize`] in the background; failures are only logged.
pub fn spawn_finalize(state: SharedState, match_id: String) {
    tokio::spawn(async move {
        if let Err(err) = finalize(&state, &match_id).await {
            error!(%match_id, error = %err, "failed to save contest");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(alice: (i64, u32), bob: (i64, u32)) -> MatchRecord {
        let mut record = MatchRecord::new("alice", "bob");
        for (id, (xp, correct)) in [("alice", alice), ("bob", bob)] {
            let stats = record.stats.get_mut(id).unwrap();
            stats.xp = xp;
            stats.correct_count = correct;
        }
        record
    }

    #[test]
    fn correct_answers_outrank_xp() {
        let result = standings(&record((90, 1), (12, 2))).unwrap();
        assert_eq!(result.winner.player_id, "bob");
        assert_eq!(result.loser.player_id, "alice");
        assert!(!result.draw);
    }

    #[test]
    fn xp_breaks_equal_correct_counts() {
        let result = standings(&record((22, 1), (15, 1))).unwrap();
        assert_eq!(result.winner.player_id, "alice");
        assert_eq!(result.winner.xp, 22);
    }

    #[test]
    fn exact_tie_is_a_draw_in_player_order() {
        let result = standings(&record((-4, 0), (-4, 0))).unwrap();
        assert!(result.draw);
        assert_eq!(result.winner.player_id, "alice");
        assert_eq!(result.loser.player_id, "bob");
    }

    #[test]
    fn single_player_record_is_rejected() {
        let mut broken = MatchRecord::new("alice", "bob");
        broken.players.pop();
        assert!(standings(&broken).is_err());
    }
}
