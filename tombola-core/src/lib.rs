//! Tombola core - data model and storage for time-boxed lottery draws
//!
//! Lotteries, their participants and their winners live in a single SQLite
//! database. The participation registry and the lifecycle store operations are
//! the only writers of lottery status and participant/winner rows.

pub mod clock;
pub mod config;
pub mod error;
pub mod storage;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CleanupPolicy, EngineConfig};
pub use error::{Result, TombolaError};
pub use storage::{DrawSnapshot, LotteryStore, ParticipationRegistry, Storage, WinnerStore};
pub use types::{
    CancelReason, DrawAlgorithm, DrawRng, DrawStrategy, InsufficientStrategy, JoinOutcome, LeaveOutcome,
    Lottery, LotteryId, LotteryStatus, NotOpenReason, Participant, TopicId, UserId,
    VerificationRecord, Winner,
};
