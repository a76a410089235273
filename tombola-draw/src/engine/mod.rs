pub mod seed;

pub use seed::{derive_seed, fisher_yates, verification_hash};

use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashSet;
use tombola_core::{DrawAlgorithm, DrawRng, DrawStrategy, Lottery, UserId, VerificationRecord};

/// Users eligible to win, as produced by the eligibility filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidatePool {
    /// Shuffle input, ordered by user id.
    Random { candidates: Vec<UserId> },
    /// `designated` holds post authors in ascending post-number order.
    /// `eligible` holds every eligible participant by user id and is the
    /// source for fallback slots.
    SpecificPosts {
        designated: Vec<UserId>,
        eligible: Vec<UserId>,
    },
}

impl CandidatePool {
    pub fn empty(strategy: DrawStrategy) -> Self {
        match strategy {
            DrawStrategy::Random => CandidatePool::Random {
                candidates: Vec::new(),
            },
            DrawStrategy::SpecificPosts => CandidatePool::SpecificPosts {
                designated: Vec::new(),
                eligible: Vec::new(),
            },
        }
    }

    /// Number of distinct eligible users.
    pub fn len(&self) -> usize {
        match self {
            CandidatePool::Random { candidates } => candidates.len(),
            CandidatePool::SpecificPosts { eligible, .. } => eligible.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct DrawResult {
    /// Winners in position order, position 1 first.
    pub winners: Vec<UserId>,
    pub record: VerificationRecord,
}

impl DrawResult {
    pub fn seed(&self) -> u32 {
        self.record.seed
    }

    /// `(user, position)` pairs with positions 1..=k.
    pub fn positions(&self) -> impl Iterator<Item = (UserId, u32)> + '_ {
        self.winners
            .iter()
            .enumerate()
            .map(|(idx, user)| (*user, idx as u32 + 1))
    }
}

pub struct DrawEngine;

impl DrawEngine {
    pub fn draw(lottery: &Lottery, pool: &CandidatePool, drawn_at: DateTime<Utc>) -> DrawResult {
        let timestamp = drawn_at.to_rfc3339_opts(SecondsFormat::Micros, true);
        let seed = derive_seed(&timestamp, lottery.id, lottery.end_time, pool.len());

        let (winners, candidate_ids, designated_ids, algorithm) = match pool {
            CandidatePool::Random { candidates } => (
                select_random(candidates, lottery.winner_count, seed),
                candidates.clone(),
                Vec::new(),
                DrawAlgorithm::FisherYates,
            ),
            CandidatePool::SpecificPosts {
                designated,
                eligible,
            } => {
                let (winners, algorithm) =
                    select_specific_posts(designated, eligible, lottery.winner_count, seed);
                (winners, eligible.clone(), designated.clone(), algorithm)
            }
        };

        tracing::debug!(
            "Drew {} of {} candidates for lottery {} with seed {}",
            winners.len(),
            pool.len(),
            lottery.id,
            seed
        );

        DrawResult {
            record: VerificationRecord {
                seed,
                timestamp,
                lottery_id: lottery.id,
                winner_ids: winners.clone(),
                candidate_ids,
                designated_ids,
                candidate_count: pool.len(),
                winner_count: lottery.winner_count,
                algorithm,
                rng: DrawRng::ChaCha20,
            },
            winners,
        }
    }

    /// Replays the selection from the record and compares the published
    /// winner sequence.
    pub fn verify(record: &VerificationRecord) -> bool {
        let (winners, algorithm) = match record.algorithm {
            DrawAlgorithm::FisherYates => (
                select_random(&record.candidate_ids, record.winner_count, record.seed),
                DrawAlgorithm::FisherYates,
            ),
            DrawAlgorithm::SpecificPosts | DrawAlgorithm::SpecificPostsWithFallback => {
                select_specific_posts(
                    &record.designated_ids,
                    &record.candidate_ids,
                    record.winner_count,
                    record.seed,
                )
            }
        };

        record.rng == DrawRng::ChaCha20
            && algorithm == record.algorithm
            && winners == record.winner_ids
            && record.candidate_count == record.candidate_ids.len()
    }
}

/// Shuffles a copy of `candidates` and keeps the first `winner_count`.
pub fn select_random(candidates: &[UserId], winner_count: u32, seed: u32) -> Vec<UserId> {
    let mut shuffled = candidates.to_vec();
    fisher_yates(&mut shuffled, seed);
    shuffled.truncate(winner_count as usize);
    shuffled
}

/// Designated users first, in list order, then shuffled fallback picks from
/// eligible users that are neither selected nor designated.
pub fn select_specific_posts(
    designated: &[UserId],
    eligible: &[UserId],
    winner_count: u32,
    seed: u32,
) -> (Vec<UserId>, DrawAlgorithm) {
    let wanted = winner_count as usize;
    let eligible_set: HashSet<UserId> = eligible.iter().copied().collect();

    let mut winners: Vec<UserId> = Vec::with_capacity(wanted);
    for user in designated {
        if winners.len() >= wanted {
            break;
        }
        if eligible_set.contains(user) && !winners.contains(user) {
            winners.push(*user);
        }
    }

    let remaining = wanted - winners.len();
    if remaining == 0 {
        return (winners, DrawAlgorithm::SpecificPosts);
    }

    let fallback: Vec<UserId> = eligible
        .iter()
        .filter(|user| !winners.contains(user) && !designated.contains(user))
        .copied()
        .collect();
    if fallback.is_empty() {
        return (winners, DrawAlgorithm::SpecificPosts);
    }

    winners.extend(select_random(&fallback, remaining as u32, seed));
    (winners, DrawAlgorithm::SpecificPostsWithFallback)
}
