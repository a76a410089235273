use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tombola_core::{LotteryId, LotteryStatus, NotOpenReason};

pub type Result<T> = std::result::Result<T, LotteryError>;

/// Join-time rejection reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ineligible {
    NotActive(LotteryStatus),
    Expired,
    AlreadyJoined,
    IsOwner,
    Excluded,
}

impl std::fmt::Display for Ineligible {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Ineligible::NotActive(status) => write!(f, "lottery is {}", status),
            Ineligible::Expired => f.write_str("lottery deadline has passed"),
            Ineligible::AlreadyJoined => f.write_str("already joined"),
            Ineligible::IsOwner => f.write_str("the owner cannot participate"),
            Ineligible::Excluded => f.write_str("user is excluded from lotteries"),
        }
    }
}

impl From<NotOpenReason> for Ineligible {
    fn from(reason: NotOpenReason) -> Self {
        match reason {
            NotOpenReason::NotActive(status) => Ineligible::NotActive(status),
            NotOpenReason::Expired => Ineligible::Expired,
            NotOpenReason::IsOwner => Ineligible::IsOwner,
        }
    }
}

#[derive(Error, Debug)]
pub enum LotteryError {
    #[error("Tombola core error: {0}")]
    Core(#[from] tombola_core::TombolaError),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not eligible: {0}")]
    NotEligible(Ineligible),

    #[error("User {0} is not participating")]
    NotParticipating(i64),

    #[error("Lottery {id} cannot be drawn before {end_time}")]
    DrawNotDue {
        id: LotteryId,
        end_time: DateTime<Utc>,
    },

    #[error("User {user} is not allowed to {action}")]
    Unauthorized { user: i64, action: &'static str },

    #[error("Invalid lottery state: {0}")]
    InvalidState(String),

    #[error("Draw failed for lottery {id}: {reason}")]
    DrawFailed { id: LotteryId, reason: String },

    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LotteryError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn collaborator(msg: impl Into<String>) -> Self {
        Self::Collaborator(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }
}
