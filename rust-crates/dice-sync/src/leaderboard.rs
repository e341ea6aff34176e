use crate::read_cache::ContractReader;
use alloy::primitives::Address;
use futures::future::join_all;
use std::future::Future;
use tracing::warn;

/// Per-player score source.
pub trait ScoreLookup {
    fn score(&self, player: Address) -> impl Future<Output = anyhow::Result<u64>> + Send;
}

/// Scores read straight from the game contract.
pub struct OnChainScores<'a, R>(pub &'a R);

impl<R: ContractReader> ScoreLookup for OnChainScores<'_, R> {
    async fn score(&self, player: Address) -> anyhow::Result<u64> {
        let raw = self.0.player_score(player).await?;
        Ok(raw.saturating_to::<u64>())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub address: Address,
    pub score: u64,
    /// 1-based.
    pub position: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LeaderboardStats {
    pub total_players: usize,
    pub highest_score: u64,
    /// Mean rounded half up.
    pub average_score: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Leaderboard {
    pub entries: Vec<LeaderboardEntry>,
    pub stats: LeaderboardStats,
}

/// Highest score first. Ties keep their input order.
pub fn rank_players(mut scores: Vec<(Address, u64)>) -> Vec<LeaderboardEntry> {
    scores.sort_by(|a, b| b.1.cmp(&a.1));
    scores
        .into_iter()
        .enumerate()
        .map(|(index, (address, score))| LeaderboardEntry {
            address,
            score,
            position: index + 1,
        })
        .collect()
}

pub fn leaderboard_stats(entries: &[LeaderboardEntry]) -> LeaderboardStats {
    let total_players = entries.len();
    if total_players == 0 {
        return LeaderboardStats::default();
    }
    let highest_score = entries.iter().map(|entry| entry.score).max().unwrap_or(0);
    let sum: u128 = entries.iter().map(|entry| u128::from(entry.score)).sum();
    let n = total_players as u128;
    let average_score = ((2 * sum + n) / (2 * n)) as u64;
    LeaderboardStats {
        total_players,
        highest_score,
        average_score,
    }
}

/// Looks up every player's score concurrently. A failed lookup counts as zero.
pub async fn build_leaderboard<L: ScoreLookup>(lookup: &L, players: Vec<Address>) -> Leaderboard {
    let lookups = players.iter().map(|player| async move {
        match lookup.score(*player).await {
            Ok(score) => (*player, score),
            Err(err) => {
                warn!(%player, %err, "score lookup failed; counting as zero");
                (*player, 0)
            }
        }
    });
    let entries = rank_players(join_all(lookups).await);
    let stats = leaderboard_stats(&entries);
    Leaderboard { entries, stats }
}
