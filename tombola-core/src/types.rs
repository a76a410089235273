use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type LotteryId = Uuid;
pub type UserId = i64;
pub type TopicId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LotteryStatus {
    Active,
    Drawing,
    Completed,
    Cancelled,
}

impl LotteryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LotteryStatus::Active => "active",
            LotteryStatus::Drawing => "drawing",
            LotteryStatus::Completed => "completed",
            LotteryStatus::Cancelled => "cancelled",
        }
    }

    /// Completed and Cancelled never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LotteryStatus::Completed | LotteryStatus::Cancelled)
    }
}

impl fmt::Display for LotteryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LotteryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(LotteryStatus::Active),
            "drawing" => Ok(LotteryStatus::Drawing),
            "completed" => Ok(LotteryStatus::Completed),
            "cancelled" => Ok(LotteryStatus::Cancelled),
            other => Err(format!("unknown lottery status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawStrategy {
    Random,
    SpecificPosts,
}

impl DrawStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DrawStrategy::Random => "random",
            DrawStrategy::SpecificPosts => "specific_posts",
        }
    }
}

impl fmt::Display for DrawStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DrawStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random" => Ok(DrawStrategy::Random),
            "specific_posts" | "specific-posts" => Ok(DrawStrategy::SpecificPosts),
            other => Err(format!("unknown draw strategy '{}'", other)),
        }
    }
}

/// What happens when fewer than `min_participants` are eligible at draw time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsufficientStrategy {
    Cancel,
    Proceed,
}

impl InsufficientStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsufficientStrategy::Cancel => "cancel",
            InsufficientStrategy::Proceed => "proceed",
        }
    }
}

impl fmt::Display for InsufficientStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InsufficientStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cancel" => Ok(InsufficientStrategy::Cancel),
            "proceed" => Ok(InsufficientStrategy::Proceed),
            other => Err(format!("unknown insufficient strategy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    InsufficientParticipants,
    NoWinners,
    DrawFailed(String),
    Manual,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::InsufficientParticipants => f.write_str("insufficient_participants"),
            CancelReason::NoWinners => f.write_str("no_winners"),
            CancelReason::DrawFailed(msg) => write!(f, "draw_failed: {}", msg),
            CancelReason::Manual => f.write_str("manual"),
        }
    }
}

impl FromStr for CancelReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insufficient_participants" => Ok(CancelReason::InsufficientParticipants),
            "no_winners" => Ok(CancelReason::NoWinners),
            "manual" => Ok(CancelReason::Manual),
            other => match other.strip_prefix("draw_failed: ") {
                Some(msg) => Ok(CancelReason::DrawFailed(msg.to_string())),
                None => Err(format!("unknown cancel reason '{}'", other)),
            },
        }
    }
}

/// Identifies which selection routine produced a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrawAlgorithm {
    #[serde(rename = "fisher_yates_shuffle")]
    FisherYates,
    #[serde(rename = "specific_posts")]
    SpecificPosts,
    #[serde(rename = "specific_posts_with_fisher_yates_fallback")]
    SpecificPostsWithFallback,
}

/// Generator behind the shuffle. Recorded so a replay does not depend on
/// whatever a library's default generator happens to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrawRng {
    /// ChaCha20 keyed with the big-endian seed, indices by rejection sampling
    /// over 64-bit outputs.
    #[serde(rename = "chacha20")]
    ChaCha20,
}

/// Everything a third party needs to replay a draw and check the published
/// winners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub seed: u32,
    pub timestamp: String,
    pub lottery_id: LotteryId,
    pub winner_ids: Vec<UserId>,
    /// Shuffle input in the exact order it was fed to Fisher-Yates.
    pub candidate_ids: Vec<UserId>,
    /// Post-designated users in ascending post-number order.
    pub designated_ids: Vec<UserId>,
    pub candidate_count: usize,
    pub winner_count: u32,
    pub algorithm: DrawAlgorithm,
    pub rng: DrawRng,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lottery {
    pub id: LotteryId,
    pub owner_id: UserId,
    pub topic_id: Option<TopicId>,
    pub title: String,
    pub description: String,
    pub prize: String,
    pub winner_count: u32,
    pub min_participants: u32,
    pub draw_strategy: DrawStrategy,
    pub insufficient_strategy: InsufficientStrategy,
    pub specific_post_numbers: Vec<u32>,
    pub end_time: DateTime<Utc>,
    pub status: LotteryStatus,
    pub participant_count: u32,
    pub drawn_at: Option<DateTime<Utc>>,
    pub draw_seed: Option<u32>,
    pub verification: Option<VerificationRecord>,
    pub cancel_reason: Option<CancelReason>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lottery {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.end_time
    }

    pub fn accepts_participants(&self, now: DateTime<Utc>) -> bool {
        self.status == LotteryStatus::Active && !self.is_expired(now)
    }

    /// Configuration edits are allowed until the announcement post is locked.
    pub fn edit_window_closes(&self, lock_delay: std::time::Duration) -> DateTime<Utc> {
        self.created_at
            + chrono::Duration::from_std(lock_delay).unwrap_or_else(|_| chrono::Duration::zero())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub lottery_id: LotteryId,
    pub user_id: UserId,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Winner {
    pub lottery_id: LotteryId,
    pub user_id: UserId,
    pub position: u32,
    pub drawn_at: DateTime<Utc>,
    pub verification_hash: String,
}

/// Why the registry refused a join or leave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotOpenReason {
    NotActive(LotteryStatus),
    Expired,
    IsOwner,
}

impl fmt::Display for NotOpenReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotOpenReason::NotActive(status) => write!(f, "lottery is {}", status),
            NotOpenReason::Expired => f.write_str("lottery deadline has passed"),
            NotOpenReason::IsOwner => f.write_str("owner cannot participate"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined { count: u32 },
    AlreadyJoined,
    NotOpen(NotOpenReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    Left { count: u32 },
    NotParticipating,
    NotOpen(NotOpenReason),
}
