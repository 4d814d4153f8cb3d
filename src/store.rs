//! Persistence
//!
//! Match records append to a JSONL file; cumulative scores live in an
//! in-memory ledger. Persistence is fire-and-forget from the match
//! actors: a write failure is logged and the game carries on.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::game::score::MatchRecord;
use crate::game::state::ParticipantId;

/// Persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Record could not be serialized.
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Record file could not be written.
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// RECORD SINK
// =============================================================================

/// Appends settled-match records to a JSONL file, one record per line.
/// Without a configured path records are dropped after logging.
#[derive(Debug)]
pub struct RecordSink {
    path: Option<PathBuf>,
}

impl RecordSink {
    /// Sink writing to the given file, created on first append.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    /// Append one record.
    pub async fn append(&self, record: &MatchRecord) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            debug!(match_id = %record.match_id, "no record path configured, dropping record");
            return Ok(());
        };

        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Append, logging failure instead of propagating it. Settlement
    /// must never fail because the disk did.
    pub async fn append_logged(&self, record: &MatchRecord) {
        if let Err(e) = self.append(record).await {
            warn!(match_id = %record.match_id, error = %e, "failed to persist match record");
        }
    }
}

// =============================================================================
// ACCOUNT LEDGER
// =============================================================================

/// Cumulative per-account totals.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AccountProfile {
    /// Most recent display name.
    pub name: String,
    /// Cumulative score across matches.
    pub total_score: i64,
    /// Matches settled.
    pub matches_played: u32,
    /// Likes received across matches.
    pub likes_received: u64,
}

/// In-memory score ledger, keyed by participant id.
#[derive(Debug, Default)]
pub struct AccountLedger {
    accounts: RwLock<BTreeMap<ParticipantId, AccountProfile>>,
}

impl AccountLedger {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a settled match's deltas to every participant in it,
    /// writing each standing's resulting cumulative total back into
    /// the record.
    pub async fn apply(&self, record: &mut MatchRecord) {
        let mut accounts = self.accounts.write().await;
        for standing in &mut record.standings {
            let profile = accounts.entry(standing.id).or_default();
            profile.name = standing.name.clone();
            profile.total_score += standing.delta;
            profile.matches_played += 1;
            profile.likes_received += standing.likes as u64;
            standing.total = profile.total_score;
        }
    }

    /// Look up one account.
    pub async fn profile(&self, id: &ParticipantId) -> Option<AccountProfile> {
        self.accounts.read().await.get(id).cloned()
    }

    /// Number of known accounts.
    pub async fn len(&self) -> usize {
        self.accounts.read().await.len()
    }

    /// True when no account has settled a match yet.
    pub async fn is_empty(&self) -> bool {
        self.accounts.read().await.is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::score::Standing;
    use chrono::Utc;

    fn pid(n: u8) -> ParticipantId {
        ParticipantId::new([n; 16])
    }

    fn record(deltas: &[(u8, i64)]) -> MatchRecord {
        MatchRecord {
            match_id: hex::encode([1u8; 16]),
            settled_at: Utc::now(),
            rounds: 3,
            standings: deltas
                .iter()
                .enumerate()
                .map(|(i, &(id, delta))| Standing {
                    id: pid(id),
                    name: format!("p{id}"),
                    place: i as u32 + 1,
                    delta,
                    total: delta,
                    likes: 1,
                })
                .collect(),
            history: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_ledger_accumulates_across_matches() {
        let ledger = AccountLedger::new();
        ledger.apply(&mut record(&[(1, 2), (2, 1), (3, 0)])).await;
        let mut second = record(&[(2, 2), (1, 1), (3, 0)]);
        ledger.apply(&mut second).await;

        let p1 = ledger.profile(&pid(1)).await.unwrap();
        assert_eq!(p1.total_score, 3);
        let s1 = second.standings.iter().find(|s| s.id == pid(1)).unwrap();
        assert_eq!(s1.total, 3, "record carries the new cumulative total");
        assert_eq!(p1.matches_played, 2);
        assert_eq!(p1.likes_received, 2);

        let p3 = ledger.profile(&pid(3)).await.unwrap();
        assert_eq!(p3.total_score, 0);
        assert_eq!(ledger.len().await, 3);
    }

    #[tokio::test]
    async fn test_ledger_unknown_account() {
        let ledger = AccountLedger::new();
        assert!(ledger.profile(&pid(9)).await.is_none());
        assert!(ledger.is_empty().await);
    }

    #[tokio::test]
    async fn test_sink_appends_jsonl() {
        let dir = std::env::temp_dir().join(format!("diminish-test-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("records.jsonl");

        let sink = RecordSink::new(Some(path.clone()));
        sink.append(&record(&[(1, 2)])).await.unwrap();
        sink.append(&record(&[(2, 1)])).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let parsed: MatchRecord = serde_json::from_str(line).unwrap();
            assert_eq!(parsed.rounds, 3);
        }

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_sink_without_path_is_noop() {
        let sink = RecordSink::new(None);
        sink.append(&record(&[(1, 2)])).await.unwrap();
    }
}
