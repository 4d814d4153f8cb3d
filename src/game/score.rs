//! Settlement
//!
//! Turns a finished match into a finishing order and score deltas.
//! Settlement is pure: the caller feeds it the surviving participant
//! and the elimination order, and hands the resulting record to the
//! persistence layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::game::state::{EliminationCause, Match, Participant, ParticipantId, RoundSnapshot};

/// One participant's final placement.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Standing {
    /// Participant id.
    pub id: ParticipantId,
    /// Display name at settlement time.
    pub name: String,
    /// 1-based finishing place, strictly sequential.
    pub place: u32,
    /// Score awarded for this match.
    pub delta: i64,
    /// Cumulative score after the ledger applied this match.
    pub total: i64,
    /// Likes received during the match.
    pub likes: u32,
}

/// Durable record of a settled match, appended to the match log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchRecord {
    /// Match id, hex encoded.
    pub match_id: String,
    /// Settlement time.
    pub settled_at: DateTime<Utc>,
    /// Rounds played.
    pub rounds: u32,
    /// Final standings, best place first.
    pub standings: Vec<Standing>,
    /// Per-round snapshots in play order.
    pub history: Vec<RoundSnapshot>,
}

/// Award for a given 1-based place in a match of `count` participants.
///
/// Tiers widen with the field: small matches pay the winner only,
/// larger ones hand every finisher at least a point.
pub fn award(count: usize, place: u32) -> i64 {
    match count {
        0..=2 => {
            if place == 1 {
                1
            } else {
                0
            }
        }
        3..=4 => {
            if place == 1 {
                2
            } else {
                1
            }
        }
        5..=6 => match place {
            1 => 3,
            2 => 2,
            _ => 1,
        },
        _ => match place {
            1 => 4,
            2 => 3,
            3 | 4 => 2,
            _ => 1,
        },
    }
}

/// Compute final standings.
///
/// Order is: survivors first (by id for a stable output), then the
/// eliminated in reverse elimination order. A participant who walked
/// out voluntarily while still healthy forfeits their award.
pub fn settle(game: &Match) -> MatchRecord {
    let count = game.participants.len();

    let mut ordered: Vec<&Participant> = game
        .participants
        .values()
        .filter(|p| p.alive)
        .collect();
    for id in game.elimination_order.iter().rev() {
        if let Some(p) = game.participants.get(id) {
            ordered.push(p);
        }
    }

    let standings = ordered
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let place = i as u32 + 1;
            let delta = if forfeits_award(p) {
                0
            } else {
                award(count, place)
            };
            Standing {
                id: p.id,
                name: p.name.clone(),
                place,
                delta,
                total: delta,
                likes: p.likes_received,
            }
        })
        .collect();

    MatchRecord {
        match_id: hex::encode(game.id),
        settled_at: Utc::now(),
        rounds: game.round,
        standings,
        history: game.history.clone(),
    }
}

/// Walked out voluntarily with more than 1 hp remaining.
fn forfeits_award(p: &Participant) -> bool {
    p.elimination_cause == Some(EliminationCause::Voluntary)
        && p.hp_at_elimination.map_or(false, |hp| hp > 1)
}

// =============================================================================
// TESTS
// =============================================================================
